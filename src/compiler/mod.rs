//! Parallel compilation of function-level scopes
//!
//! ```text
//! SourceProgram ─▶ CompilationContext ─▶ CompileQueue::schedule ─▶ workers run CompileJobs
//!                                          CompileQueue::wait ─▶ FunctionElements in scope order
//! ```

pub mod job;
pub mod queue;

pub use job::CompileJob;
pub use queue::CompileQueue;

use crate::codegen::{FunctionElement, FunctionLowering};
use crate::diagnostics::DiagnosticEngine;
use crate::frontend::{FunctionScope, SourceProgram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// State shared by every job of one compilation. Workers only read it.
pub struct CompilationContext {
    program: SourceProgram,
    diagnostics: Arc<DiagnosticEngine>,
    lowering: Arc<dyn FunctionLowering>,
}

impl CompilationContext {
    pub fn new(
        program: SourceProgram,
        diagnostics: Arc<DiagnosticEngine>,
        lowering: Arc<dyn FunctionLowering>,
    ) -> Self {
        Self {
            program,
            diagnostics,
            lowering,
        }
    }

    pub fn program(&self) -> &SourceProgram {
        &self.program
    }

    pub fn scope(&self, index: usize) -> &FunctionScope {
        &self.program.scopes[index]
    }

    pub fn scope_count(&self) -> usize {
        self.program.scopes.len()
    }

    pub fn diagnostics(&self) -> &DiagnosticEngine {
        &self.diagnostics
    }

    pub fn lowering(&self) -> &dyn FunctionLowering {
        self.lowering.as_ref()
    }
}

impl std::fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("module", &self.program.module)
            .field("scopes", &self.program.scopes.len())
            .finish_non_exhaustive()
    }
}

/// The compiled artifact of one source file. `functions[0]` is always the
/// module initialiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub module: String,
    pub source: String,
    pub functions: Vec<FunctionElement>,
}

impl Program {
    pub fn new(module: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            source: source.into(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionElement> {
        self.functions.iter().find(|f| f.name == name)
    }
}
