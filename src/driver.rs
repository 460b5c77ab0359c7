//! Compiler driver
//!
//! Resolves sources, parses each one into function-level scopes, runs the
//! scopes through the [`CompileQueue`] and writes the assembled
//! [`Program`]. Every failure ends up in the [`DiagnosticEngine`]; the
//! `run_*` entry points turn its state into a process exit status.

use crate::codegen::{BytecodeLowering, FunctionLowering};
use crate::compiler::queue::DEFAULT_THREAD_COUNT;
use crate::compiler::{CompilationContext, CompileQueue, Program};
use crate::config::sources::output_path;
use crate::config::{ProjectConfig, find_project_sources, module_name};
use crate::diagnostics::crash::{self, CrashGuard};
use crate::diagnostics::{DiagnosticEngine, DiagnosticError, SourcePosition};
use crate::frontend::parse_source;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Exit status of a run with no error-classified diagnostics
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status of a run that logged an error
pub const EXIT_FAILURE: i32 = 1;

#[derive(Error, Debug, Diagnostic)]
pub enum DriverError {
    #[error("Failed to read source file '{path}': {source}")]
    #[diagnostic(code(driver::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write output file '{path}': {source}")]
    #[diagnostic(code(driver::write))]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize program: {0}")]
    #[diagnostic(code(driver::serialize))]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] DiagnosticError),
}

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Worker threads of the compile queue, at least one
    pub thread_count: usize,
    /// Treat warnings as errors
    pub werror: bool,
    /// Stop after parsing and binding
    pub parse_only: bool,
    /// Output path for a single-file compile
    pub output: Option<PathBuf>,
    /// Project config used to name the module and place its output
    pub arktsconfig: Option<PathBuf>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            thread_count: DEFAULT_THREAD_COUNT,
            werror: false,
            parse_only: false,
            output: None,
            arktsconfig: None,
        }
    }
}

pub struct Compiler {
    options: CompilerOptions,
    diagnostics: Arc<DiagnosticEngine>,
    lowering: Arc<dyn FunctionLowering>,
    queue: CompileQueue,
    _crash_guard: CrashGuard,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> io::Result<Self> {
        Self::with_lowering(options, Arc::new(BytecodeLowering))
    }

    pub fn with_lowering(
        options: CompilerOptions,
        lowering: Arc<dyn FunctionLowering>,
    ) -> io::Result<Self> {
        let diagnostics = Arc::new(DiagnosticEngine::new());
        diagnostics.set_werror(options.werror);
        let queue = CompileQueue::new(options.thread_count)?;
        let crash_guard = crash::register(&diagnostics);
        Ok(Self {
            options,
            diagnostics,
            lowering,
            queue,
            _crash_guard: crash_guard,
        })
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticEngine> {
        &self.diagnostics
    }

    /// Parse, bind and compile one source text.
    ///
    /// Returns `Ok(None)` in parse-only mode. A failed job fails the whole
    /// file: no partial program is produced.
    pub fn compile_source(
        &self,
        path: &str,
        module: &str,
        source: &str,
    ) -> Result<Option<Program>, DiagnosticError> {
        self.diagnostics.note_position(SourcePosition::file(path));
        let program = parse_source(path, module, source, &self.diagnostics)?;
        tracing::debug!(module, scopes = program.scopes.len(), "parsed source");
        if self.options.parse_only {
            return Ok(None);
        }

        let context = Arc::new(CompilationContext::new(
            program,
            Arc::clone(&self.diagnostics),
            Arc::clone(&self.lowering),
        ));
        self.queue.schedule(&context);

        let mut artifact = Program::new(module, path);
        let mut missing = Vec::new();
        self.queue.wait(|job| {
            let index = job.index();
            match job.into_element() {
                Some(element) => artifact.functions.push(element),
                None => missing.push(index),
            }
        })?;
        if let Some(index) = missing.first() {
            return Err(self.diagnostics.throw_fatal_error(
                format!("compile job {index} finished without a result"),
                SourcePosition::file(path),
            ));
        }
        Ok(Some(artifact))
    }

    /// Compile `source` and write the program to `output` as JSON
    pub fn compile_file(
        &self,
        source: &Path,
        output: &Path,
        module: &str,
    ) -> Result<Option<Program>, DriverError> {
        let _span = tracing::info_span!("compile_file", file = %source.display()).entered();
        let text = fs::read_to_string(source).map_err(|e| DriverError::Read {
            path: source.to_path_buf(),
            source: e,
        })?;
        let program = self.compile_source(&source.display().to_string(), module, &text)?;
        let Some(program) = program else {
            return Ok(None);
        };

        let json = serde_json::to_string_pretty(&program)?;
        let write = |path: &Path| -> io::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json.as_bytes())
        };
        write(output).map_err(|e| DriverError::Write {
            path: output.to_path_buf(),
            source: e,
        })?;
        tracing::info!(
            output = %output.display(),
            functions = program.functions.len(),
            "wrote program"
        );
        Ok(Some(program))
    }

    /// Parse a project config and fold its dependencies. `None` once a
    /// config error has been logged.
    pub fn load_config(&self, path: &Path) -> Option<ProjectConfig> {
        let mut config = ProjectConfig::new(path);
        let mut visited = FxHashSet::default();
        if !config.parse(&mut visited, &self.diagnostics) {
            return None;
        }
        if !config.resolve_all_dependencies(&self.diagnostics) {
            return None;
        }
        Some(config)
    }

    /// Every `(source, destination)` pair of a project
    pub fn resolve_sources(&self, config: &ProjectConfig) -> Option<Vec<(PathBuf, PathBuf)>> {
        match find_project_sources(config) {
            Ok(sources) => Some(sources),
            Err(e) => {
                self.diagnostics.log_fatal_error(
                    format!("Failed to collect project sources: {e}"),
                    SourcePosition::file(config.config_path().display().to_string()),
                );
                None
            }
        }
    }

    /// Compile one file and return the exit status
    pub fn run_single(&self, input: &Path) -> i32 {
        let input = fs::canonicalize(input).unwrap_or_else(|_| input.to_path_buf());
        let config = match &self.options.arktsconfig {
            Some(path) => match self.load_config(path) {
                Some(config) => Some(config),
                None => return self.finish(),
            },
            None => None,
        };

        let module = match &config {
            Some(config) => module_name(config, &input),
            None => input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let output = self
            .options
            .output
            .clone()
            .or_else(|| {
                config
                    .as_ref()
                    .map(|config| output_path(config.root_dir(), config.out_dir(), &input))
            })
            .unwrap_or_else(|| input.with_extension(crate::config::BYTECODE_EXTENSION));

        tracing::info!(input = %input.display(), module = %module, "compiling");
        if let Err(e) = self.compile_file(&input, &output, &module) {
            self.report(e);
        }
        self.finish()
    }

    /// Compile every source of a project. A failing file does not stop the
    /// remaining ones; the status is a failure if any of them failed.
    pub fn run_project(&self, config_path: &Path) -> i32 {
        let Some(config) = self.load_config(config_path) else {
            return self.finish();
        };
        let Some(sources) = self.resolve_sources(&config) else {
            return self.finish();
        };
        tracing::info!(
            package = %config.package(),
            sources = sources.len(),
            "compiling project"
        );

        let mut status = EXIT_SUCCESS;
        for (source, destination) in &sources {
            let module = module_name(&config, source);
            if let Err(e) = self.compile_file(source, destination, &module) {
                self.report(e);
            }
            status = status.max(self.finish());
        }
        status
    }

    /// Log a driver error into the store. Errors thrown through the store
    /// are logged again; flushing removes the duplicate.
    fn report(&self, error: DriverError) {
        match error {
            DriverError::Compile(e) => self.diagnostics.log(e.into_diagnostic()),
            other => self
                .diagnostics
                .log_fatal_error(other.to_string(), SourcePosition::default()),
        }
    }

    /// Flush all diagnostics and map them to an exit status
    fn finish(&self) -> i32 {
        let failed = self.diagnostics.is_any_error();
        self.diagnostics.flush_diagnostic();
        if failed { EXIT_FAILURE } else { EXIT_SUCCESS }
    }
}
