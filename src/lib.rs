//! arkc: ahead-of-time bytecode compiler
//!
//! Each source file is parsed into function-level scopes, and every scope
//! is lowered by a compile job on a fixed pool of worker threads.
//!
//! # Architecture
//!
//! ```text
//! arktsconfig.json → ProjectConfig → (source, destination) pairs
//!                                         │
//! Source → Lexer → Parser → SourceProgram → CompileQueue → Program (.abc)
//!                                         │
//!                                 DiagnosticEngine
//! ```
//!
//! # Example
//!
//! ```no_run
//! use arkc::{Compiler, CompilerOptions};
//!
//! let compiler = Compiler::new(CompilerOptions::default())?;
//! let program = compiler.compile_source("main.ets", "main", "function f() { return 1 }")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod frontend;

pub use codegen::{BytecodeLowering, FunctionElement, FunctionLowering};
pub use compiler::{CompilationContext, CompileJob, CompileQueue, Program};
pub use config::{ProjectConfig, find_project_sources};
pub use diagnostics::{Diagnostic, DiagnosticEngine, DiagnosticError, DiagnosticKind, SourcePosition};
pub use driver::{Compiler, CompilerOptions};

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
