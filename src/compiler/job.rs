//! Compile job: the unit of work for one function-level scope

use super::CompilationContext;
use crate::codegen::FunctionElement;
use crate::diagnostics::DiagnosticError;
use crate::frontend::FunctionScope;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Lowers one scope of a [`CompilationContext`].
///
/// The result slot is written at most once, and only when [`run`](Self::run)
/// succeeds. A job may have a single dependent: when this job completes it
/// [`signal`](Self::signal)s that dependent, decrementing its pending
/// dependency count.
#[derive(Debug)]
pub struct CompileJob {
    index: usize,
    context: Arc<CompilationContext>,
    element: OnceLock<FunctionElement>,
    dependencies: AtomicUsize,
    dependent: OnceLock<usize>,
}

impl CompileJob {
    pub fn new(index: usize, context: Arc<CompilationContext>) -> Self {
        Self {
            index,
            context,
            element: OnceLock::new(),
            dependencies: AtomicUsize::new(0),
            dependent: OnceLock::new(),
        }
    }

    /// One job per scope of `context`, in scope order
    pub fn batch(context: &Arc<CompilationContext>) -> Vec<CompileJob> {
        (0..context.scope_count())
            .map(|index| CompileJob::new(index, Arc::clone(context)))
            .collect()
    }

    /// Position of this job in its batch
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scope(&self) -> &FunctionScope {
        self.context.scope(self.index)
    }

    pub fn context(&self) -> &Arc<CompilationContext> {
        &self.context
    }

    /// Lower the scope. Safe to call from any worker; it only reads the
    /// shared context and fills this job's own slot.
    pub fn run(&self) -> Result<(), DiagnosticError> {
        let element = self.context.lowering().lower(&self.context, self.scope())?;
        self.element.set(element).map_err(|_| {
            DiagnosticError::fatal(format!(
                "compile job for `{}` produced a result twice",
                self.scope().name
            ))
        })
    }

    /// Register that `other` completing should signal this job.
    ///
    /// # Panics
    ///
    /// If `other` already has a dependent.
    pub fn depends_on(&self, other: &CompileJob) {
        if other.dependent.set(self.index).is_err() {
            panic!(
                "compile job {} already has a dependent; {} cannot be added",
                other.index, self.index
            );
        }
        self.dependencies.fetch_add(1, Ordering::AcqRel);
    }

    /// Notify this job's dependent (if any) that this job has completed
    pub fn signal(&self, batch: &[CompileJob]) {
        if let Some(&dependent) = self.dependent.get() {
            if let Some(job) = batch.get(dependent) {
                let previous = job.dependencies.fetch_sub(1, Ordering::AcqRel);
                debug_assert!(previous > 0, "dependency counter underflow");
            }
        }
    }

    pub fn dependent(&self) -> Option<usize> {
        self.dependent.get().copied()
    }

    pub fn pending_dependencies(&self) -> usize {
        self.dependencies.load(Ordering::Acquire)
    }

    /// No unsignalled dependencies remain
    pub fn is_ready(&self) -> bool {
        self.pending_dependencies() == 0
    }

    pub fn element(&self) -> Option<&FunctionElement> {
        self.element.get()
    }

    /// Take the compiled result out of a finished job
    pub fn into_element(self) -> Option<FunctionElement> {
        self.element.into_inner()
    }
}
