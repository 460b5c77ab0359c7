//! Diagnostic store
//!
//! Every stage of the compiler reports positioned messages through a
//! [`DiagnosticEngine`]. Entries are accumulated in one bucket per
//! [`DiagnosticKind`] and only become control flow when a `throw_*` method is
//! used: those log the entry and hand back a [`DiagnosticError`] for the
//! caller to propagate with `?`.
//!
//! The engine is internally synchronised so compile jobs running on worker
//! threads can log while the driver thread keeps a handle to it.

pub mod crash;

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Kind of a diagnostic. The order of variants is the tie-breaker used when
/// sorting entries that share a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticKind {
    Fatal,
    Syntax,
    Semantic,
    Warning,
    PluginError,
    PluginWarning,
    DeclgenError,
    DeclgenWarning,
    ArkTsConfigError,
    Suggestion,
    IsolatedDeclgenError,
}

impl DiagnosticKind {
    pub const COUNT: usize = 11;

    pub const ALL: [DiagnosticKind; Self::COUNT] = [
        DiagnosticKind::Fatal,
        DiagnosticKind::Syntax,
        DiagnosticKind::Semantic,
        DiagnosticKind::Warning,
        DiagnosticKind::PluginError,
        DiagnosticKind::PluginWarning,
        DiagnosticKind::DeclgenError,
        DiagnosticKind::DeclgenWarning,
        DiagnosticKind::ArkTsConfigError,
        DiagnosticKind::Suggestion,
        DiagnosticKind::IsolatedDeclgenError,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Display label printed in front of the message
    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::Fatal => "Fatal error",
            DiagnosticKind::Syntax => "SyntaxError",
            DiagnosticKind::Semantic => "TypeError",
            DiagnosticKind::Warning => "Warning",
            DiagnosticKind::PluginError => "Plugin error",
            DiagnosticKind::PluginWarning => "Plugin warning",
            DiagnosticKind::DeclgenError => "Declgen error",
            DiagnosticKind::DeclgenWarning => "Declgen warning",
            DiagnosticKind::ArkTsConfigError => "ArkTS config error",
            DiagnosticKind::Suggestion => "Suggestion",
            DiagnosticKind::IsolatedDeclgenError => "Isolated declgen error",
        }
    }

    /// Kinds that only count as errors under warnings-as-errors
    pub fn is_warning(self) -> bool {
        matches!(
            self,
            DiagnosticKind::Warning | DiagnosticKind::PluginWarning | DiagnosticKind::DeclgenWarning
        )
    }

    /// Classify the kind. `werror` promotes the warning family.
    pub fn is_error(self, werror: bool) -> bool {
        match self {
            DiagnosticKind::Fatal
            | DiagnosticKind::Syntax
            | DiagnosticKind::Semantic
            | DiagnosticKind::PluginError
            | DiagnosticKind::DeclgenError
            | DiagnosticKind::ArkTsConfigError
            | DiagnosticKind::IsolatedDeclgenError => true,
            DiagnosticKind::Warning
            | DiagnosticKind::PluginWarning
            | DiagnosticKind::DeclgenWarning => werror,
            DiagnosticKind::Suggestion => false,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// File, line and column of a diagnostic. Lines and columns are 1-based;
/// an empty file means the position is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourcePosition {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Position that only names a file
    pub fn file(file: impl Into<String>) -> Self {
        Self::new(file, 0, 0)
    }

    pub fn is_known(&self) -> bool {
        !self.file.is_empty()
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A suggested fix attached to a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Suggestion {
    pub message: String,
    pub replacement: Option<String>,
}

impl Suggestion {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            replacement: None,
        }
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = Some(replacement.into());
        self
    }
}

/// One compiler message
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub position: SourcePosition,
    pub message: String,
    pub suggestions: Vec<Suggestion>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, position: SourcePosition) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Display order: file, line, column, kind, then message so that exact
    /// duplicates always end up adjacent.
    fn sort_key(&self) -> (&str, usize, usize, DiagnosticKind, &str) {
        (
            &self.position.file,
            self.position.line,
            self.position.column,
            self.kind,
            &self.message,
        )
    }

    /// Render as `Label: message [file:line:column]` plus one `help:` line
    /// per suggestion.
    pub fn render(&self) -> String {
        let mut out = if self.position.is_known() {
            format!("{}: {} [{}]", self.kind, self.message, self.position)
        } else {
            format!("{}: {}", self.kind, self.message)
        };
        for suggestion in &self.suggestions {
            out.push_str("\n  help: ");
            out.push_str(&suggestion.message);
            if let Some(replacement) = &suggestion.replacement {
                out.push_str(&format!(" (replace with `{replacement}`)"));
            }
        }
        out
    }
}

/// Two entries are duplicates when kind, position and message agree;
/// suggestions do not take part.
impl PartialEq for Diagnostic {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for Diagnostic {}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A diagnostic raised as control flow.
///
/// Returned by the `throw_*` family of [`DiagnosticEngine`] and by compile
/// jobs; the compile queue surfaces the first one of a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
#[error("{}", .diagnostic.render())]
#[diagnostic(code(arkc::compile_error))]
pub struct DiagnosticError {
    diagnostic: Diagnostic,
}

impl DiagnosticError {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, position: SourcePosition) -> Self {
        Diagnostic::new(kind, message, position).into()
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Fatal, message, SourcePosition::default())
    }

    pub fn syntax(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(DiagnosticKind::Syntax, message, position)
    }

    pub fn semantic(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(DiagnosticKind::Semantic, message, position)
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.diagnostic.kind
    }

    pub fn message(&self) -> &str {
        &self.diagnostic.message
    }

    pub fn position(&self) -> &SourcePosition {
        &self.diagnostic.position
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        self.diagnostic
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self { diagnostic }
    }
}

type Buckets = [Vec<Diagnostic>; DiagnosticKind::COUNT];

/// Thread-safe diagnostic store
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    buckets: Mutex<Buckets>,
    werror: AtomicBool,
    /// Best-known position for the crash banner
    crash_position: Mutex<Option<SourcePosition>>,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat the warning family as errors
    pub fn set_werror(&self, werror: bool) {
        self.werror.store(werror, Ordering::Relaxed);
    }

    pub fn werror(&self) -> bool {
        self.werror.load(Ordering::Relaxed)
    }

    pub fn is_error(&self, kind: DiagnosticKind) -> bool {
        kind.is_error(self.werror())
    }

    pub fn log(&self, diagnostic: Diagnostic) {
        tracing::trace!(kind = %diagnostic.kind, "{}", diagnostic.message);
        self.buckets.lock()[diagnostic.kind.index()].push(diagnostic);
    }

    pub fn log_diagnostic(
        &self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: SourcePosition,
    ) {
        self.log(Diagnostic::new(kind, message, position));
    }

    pub fn log_syntax_error(&self, message: impl Into<String>, position: SourcePosition) {
        self.log_diagnostic(DiagnosticKind::Syntax, message, position);
    }

    pub fn log_semantic_error(&self, message: impl Into<String>, position: SourcePosition) {
        self.log_diagnostic(DiagnosticKind::Semantic, message, position);
    }

    pub fn log_fatal_error(&self, message: impl Into<String>, position: SourcePosition) {
        self.log_diagnostic(DiagnosticKind::Fatal, message, position);
    }

    pub fn log_warning(&self, message: impl Into<String>, position: SourcePosition) {
        self.log_diagnostic(DiagnosticKind::Warning, message, position);
    }

    /// Log `diagnostic` and return it as an error for the caller to propagate
    pub fn throw(&self, diagnostic: Diagnostic) -> DiagnosticError {
        self.log(diagnostic.clone());
        diagnostic.into()
    }

    pub fn throw_diagnostic(
        &self,
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: SourcePosition,
    ) -> DiagnosticError {
        self.throw(Diagnostic::new(kind, message, position))
    }

    pub fn throw_syntax_error(
        &self,
        message: impl Into<String>,
        position: SourcePosition,
    ) -> DiagnosticError {
        self.throw_diagnostic(DiagnosticKind::Syntax, message, position)
    }

    pub fn throw_semantic_error(
        &self,
        message: impl Into<String>,
        position: SourcePosition,
    ) -> DiagnosticError {
        self.throw_diagnostic(DiagnosticKind::Semantic, message, position)
    }

    pub fn throw_fatal_error(
        &self,
        message: impl Into<String>,
        position: SourcePosition,
    ) -> DiagnosticError {
        self.throw_diagnostic(DiagnosticKind::Fatal, message, position)
    }

    /// True iff any bucket classified as an error is non-empty
    pub fn is_any_error(&self) -> bool {
        let werror = self.werror();
        let buckets = self.buckets.lock();
        DiagnosticKind::ALL
            .iter()
            .any(|kind| kind.is_error(werror) && !buckets[kind.index()].is_empty())
    }

    pub fn error_count(&self) -> usize {
        let werror = self.werror();
        let buckets = self.buckets.lock();
        DiagnosticKind::ALL
            .iter()
            .filter(|kind| kind.is_error(werror))
            .map(|kind| buckets[kind.index()].len())
            .sum()
    }

    /// Entries from every error-classified bucket, in bucket order
    pub fn error_diagnostics(&self) -> Vec<Diagnostic> {
        let werror = self.werror();
        let buckets = self.buckets.lock();
        DiagnosticKind::ALL
            .iter()
            .filter(|kind| kind.is_error(werror))
            .flat_map(|kind| buckets[kind.index()].iter().cloned())
            .collect()
    }

    /// Entries from every bucket, in bucket order
    pub fn all_diagnostics(&self) -> Vec<Diagnostic> {
        self.buckets.lock().iter().flatten().cloned().collect()
    }

    /// Sorted, de-duplicated rendering of the error buckets. Nothing is
    /// cleared.
    pub fn print_and_flush_error_diagnostic(&self) -> String {
        render_sorted(self.error_diagnostics())
    }

    /// Sorted, de-duplicated rendering of every bucket, written to stderr.
    /// All buckets are cleared afterwards.
    pub fn flush_diagnostic(&self) -> String {
        let drained: Vec<Diagnostic> = {
            let mut buckets = self.buckets.lock();
            buckets.iter_mut().flat_map(std::mem::take).collect()
        };
        let text = render_sorted(drained);
        if !text.is_empty() {
            eprintln!("{text}");
        }
        text
    }

    /// Record the position the compiler is working on, for the crash banner
    pub fn note_position(&self, position: SourcePosition) {
        *self.crash_position.lock() = Some(position);
    }

    /// Flush for the crash path: never blocks on a held lock and never logs.
    pub(crate) fn render_for_crash(&self) -> (Option<String>, Option<SourcePosition>) {
        let text = self.buckets.try_lock().map(|mut buckets| {
            let drained: Vec<Diagnostic> = buckets.iter_mut().flat_map(std::mem::take).collect();
            render_sorted(drained)
        });
        let position = self.crash_position.try_lock().and_then(|pos| (*pos).clone());
        (text, position)
    }
}

fn render_sorted(mut diagnostics: Vec<Diagnostic>) -> String {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    diagnostics.dedup();
    diagnostics
        .iter()
        .map(Diagnostic::render)
        .collect::<Vec<_>>()
        .join("\n")
}
