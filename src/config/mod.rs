//! Project configuration (`arktsconfig.json`)
//!
//! A [`ProjectConfig`] is parsed once per compilation from a root file.
//! `extends` ancestors are parsed first and inherited, then the file's own
//! fields override them. Dependency configs named under
//! `compilerOptions.dependencies` are parsed with the same visited set and
//! later folded into the root by [`ProjectConfig::resolve_all_dependencies`].
//!
//! Failures are logged as [`DiagnosticKind::ArkTsConfigError`] and reported
//! as `false`; the caller must not go on to schedule anything.

pub mod sources;

pub use sources::{BYTECODE_EXTENSION, SOURCE_EXTENSIONS, find_project_sources, module_name};

use crate::diagnostics::{DiagnosticEngine, DiagnosticKind, SourcePosition};
use indexmap::IndexMap;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conventional file name of a project config
pub const CONFIG_FILE_NAME: &str = "arktsconfig.json";

/// Configuration error
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    #[diagnostic(code(config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse JSON in '{path}': {source}")]
    #[diagnostic(code(config::json))]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{key}' must be {expected}")]
    #[diagnostic(code(config::invalid_type))]
    InvalidType { key: String, expected: &'static str },

    #[error("Failed to resolve 'extends' path: {path}")]
    #[diagnostic(code(config::unresolved_extends))]
    UnresolvedExtends { path: PathBuf },

    #[error("Failed to parse base config: {path}")]
    #[diagnostic(code(config::base_failed))]
    BaseConfigFailed { path: PathBuf },

    #[error("Failed to resolve config of dependency '{name}': {path}")]
    #[diagnostic(code(config::unresolved_dependency))]
    UnresolvedDependency { name: String, path: PathBuf },

    #[error("Failed to parse config of dependency '{name}'")]
    #[diagnostic(code(config::dependency_failed))]
    DependencyFailed { name: String },

    #[error("Substitutions for pattern '{pattern}' shouldn't be an empty array")]
    #[diagnostic(code(config::empty_substitutions))]
    EmptySubstitutions { pattern: String },

    #[error("Dynamic path '{name}' requires a 'language'")]
    #[diagnostic(code(config::missing_language))]
    MissingLanguage { name: String },

    #[error("Duplicated dynamic path '{name}' in dependency '{dependency}'")]
    #[diagnostic(code(config::duplicate_dynamic_path))]
    DuplicateDynamicPath { name: String, dependency: String },
}

/// A module provided by a foreign-language runtime. It has no source file
/// the compiler parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicImportData {
    pub language: String,
    pub decl_path: Option<PathBuf>,
    pub ohm_url: Option<String>,
}

/// `paths` entry. A pattern ending in `*` matches by prefix; the matched
/// rest replaces the `*` of the substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAlias {
    pub pattern: String,
    pub substitutions: Vec<String>,
}

impl PathAlias {
    fn substitute(&self, import: &str) -> Option<Vec<String>> {
        let rest = match self.pattern.strip_suffix('*') {
            Some(prefix) => import.strip_prefix(prefix)?,
            None if self.pattern == import => "",
            None => return None,
        };
        Some(
            self.substitutions
                .iter()
                .map(|sub| match sub.strip_suffix('*') {
                    Some(base) => format!("{base}{rest}"),
                    None => sub.clone(),
                })
                .collect(),
        )
    }
}

/// Where the sources of one package live, kept after its config is folded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    pub package: String,
    pub root_dir: PathBuf,
    pub out_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    config_path: PathBuf,
    parsed: bool,
    package: String,
    base_url: PathBuf,
    out_dir: PathBuf,
    root_dir: PathBuf,
    /// Sorted by pattern length, longest first
    paths: Vec<PathAlias>,
    dynamic_paths: IndexMap<String, DynamicImportData>,
    files: Vec<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
    dependencies: IndexMap<String, ProjectConfig>,
    dependency_sources: Vec<SourceSet>,
}

impl ProjectConfig {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let config_path = config_path.into();
        let dir = parent_dir(&config_path);
        Self {
            parsed: false,
            package: String::new(),
            out_dir: dir.join("dist"),
            base_url: dir.clone(),
            root_dir: dir,
            paths: Vec::new(),
            dynamic_paths: IndexMap::new(),
            files: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            dependencies: IndexMap::new(),
            dependency_sources: Vec::new(),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// False until a parse actually read this file. A repeated visit leaves
    /// the config unparsed.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn base_url(&self) -> &Path {
        &self.base_url
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn paths(&self) -> &[PathAlias] {
        &self.paths
    }

    pub fn dynamic_paths(&self) -> &IndexMap<String, DynamicImportData> {
        &self.dynamic_paths
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Dependency configs parsed but not yet folded
    pub fn dependencies(&self) -> &IndexMap<String, ProjectConfig> {
        &self.dependencies
    }

    /// Source sets of folded dependencies
    pub fn dependency_sources(&self) -> &[SourceSet] {
        &self.dependency_sources
    }

    /// This config's own source set
    pub fn source_set(&self) -> SourceSet {
        SourceSet {
            package: self.package.clone(),
            root_dir: self.root_dir.clone(),
            out_dir: self.out_dir.clone(),
            files: self.files.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        }
    }

    /// Parse this config and everything it extends or depends on.
    ///
    /// A file already in `visited` is not read again: the call returns
    /// `true` and leaves this config unparsed.
    pub fn parse(&mut self, visited: &mut FxHashSet<PathBuf>, diagnostics: &DiagnosticEngine) -> bool {
        let canonical = match fs::canonicalize(&self.config_path) {
            Ok(path) => path,
            Err(source) => {
                self.report(
                    ConfigError::Read {
                        path: self.config_path.clone(),
                        source,
                    },
                    diagnostics,
                );
                return false;
            }
        };
        if !visited.insert(canonical.clone()) {
            tracing::debug!(config = %canonical.display(), "config already parsed");
            return true;
        }
        self.config_path = canonical;

        match self.parse_file(visited, diagnostics) {
            Ok(()) => {
                self.parsed = true;
                tracing::debug!(
                    config = %self.config_path.display(),
                    package = %self.package,
                    "parsed config"
                );
                true
            }
            Err(error) => {
                self.report(error, diagnostics);
                false
            }
        }
    }

    fn report(&self, error: ConfigError, diagnostics: &DiagnosticEngine) {
        diagnostics.log_diagnostic(
            DiagnosticKind::ArkTsConfigError,
            error.to_string(),
            SourcePosition::file(self.config_path.display().to_string()),
        );
    }

    fn parse_file(
        &mut self,
        visited: &mut FxHashSet<PathBuf>,
        diagnostics: &DiagnosticEngine,
    ) -> Result<(), ConfigError> {
        let text = fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Read {
            path: self.config_path.clone(),
            source,
        })?;
        let root: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: self.config_path.clone(),
            source,
        })?;
        let root = root.as_object().ok_or_else(|| ConfigError::InvalidType {
            key: "<root>".to_string(),
            expected: "an object",
        })?;
        let dir = parent_dir(&self.config_path);

        if let Some(extends) = root.get("extends") {
            let extends = expect_str(extends, "extends")?;
            let base_path = resolve(&dir, extends);
            if !base_path.is_file() {
                return Err(ConfigError::UnresolvedExtends { path: base_path });
            }
            let mut base = ProjectConfig::new(&base_path);
            if !base.parse(visited, diagnostics) {
                return Err(ConfigError::BaseConfigFailed { path: base_path });
            }
            if base.is_parsed() {
                self.inherit(base);
            } else {
                tracing::debug!(
                    config = %self.config_path.display(),
                    base = %base_path.display(),
                    "base config already visited, nothing inherited"
                );
            }
        }

        if let Some(options) = root.get("compilerOptions") {
            let options = expect_object(options, "compilerOptions")?;
            self.parse_compiler_options(options, &dir, visited, diagnostics)?;
        }

        if let Some(files) = root.get("files") {
            self.files = expect_str_array(files, "files")?
                .into_iter()
                .map(|file| resolve(&dir, file))
                .collect();
        }
        if let Some(include) = root.get("include") {
            self.include = expect_str_array(include, "include")?
                .into_iter()
                .map(|pattern| join_pattern(&dir, pattern))
                .collect();
        }
        if let Some(exclude) = root.get("exclude") {
            self.exclude = expect_str_array(exclude, "exclude")?
                .into_iter()
                .map(|pattern| join_pattern(&dir, pattern))
                .collect();
        }
        Ok(())
    }

    /// Take every field of an already-parsed base config
    fn inherit(&mut self, base: ProjectConfig) {
        self.package = base.package;
        self.base_url = base.base_url;
        self.out_dir = base.out_dir;
        self.root_dir = base.root_dir;
        self.paths = base.paths;
        self.dynamic_paths = base.dynamic_paths;
        self.files = base.files;
        self.include = base.include;
        self.exclude = base.exclude;
        self.dependencies = base.dependencies;
    }

    fn parse_compiler_options(
        &mut self,
        options: &Map<String, Value>,
        dir: &Path,
        visited: &mut FxHashSet<PathBuf>,
        diagnostics: &DiagnosticEngine,
    ) -> Result<(), ConfigError> {
        if let Some(package) = options.get("package") {
            self.package = expect_str(package, "package")?.to_string();
        }
        // baseUrl first: `paths` substitutions are relative to it
        if let Some(base_url) = options.get("baseUrl") {
            self.base_url = resolve(dir, expect_str(base_url, "baseUrl")?);
        }
        if let Some(out_dir) = options.get("outDir") {
            self.out_dir = resolve(dir, expect_str(out_dir, "outDir")?);
        }
        if let Some(root_dir) = options.get("rootDir") {
            self.root_dir = resolve(dir, expect_str(root_dir, "rootDir")?);
        }

        if let Some(paths) = options.get("paths") {
            for (pattern, substitutions) in expect_object(paths, "paths")? {
                let substitutions = expect_str_array(substitutions, pattern)?;
                if substitutions.is_empty() {
                    return Err(ConfigError::EmptySubstitutions {
                        pattern: pattern.clone(),
                    });
                }
                let substitutions = substitutions
                    .into_iter()
                    .map(|sub| resolve(&self.base_url, sub).to_string_lossy().into_owned())
                    .collect();
                self.set_alias(PathAlias {
                    pattern: pattern.clone(),
                    substitutions,
                });
            }
        }

        if let Some(dynamic_paths) = options.get("dynamicPaths") {
            for (name, data) in expect_object(dynamic_paths, "dynamicPaths")? {
                let data = expect_object(data, name)?;
                let language = data
                    .get("language")
                    .map(|language| expect_str(language, "language"))
                    .transpose()?
                    .ok_or_else(|| ConfigError::MissingLanguage { name: name.clone() })?;
                let decl_path = data
                    .get("declPath")
                    .map(|path| expect_str(path, "declPath"))
                    .transpose()?
                    .map(|path| resolve(dir, path));
                let ohm_url = data
                    .get("ohmUrl")
                    .map(|url| expect_str(url, "ohmUrl"))
                    .transpose()?
                    .map(str::to_string);
                self.dynamic_paths.insert(
                    name.clone(),
                    DynamicImportData {
                        language: language.to_string(),
                        decl_path,
                        ohm_url,
                    },
                );
            }
        }

        if let Some(dependencies) = options.get("dependencies") {
            for (name, path) in expect_object(dependencies, "dependencies")? {
                let path = resolve(dir, expect_str(path, name)?);
                if !path.is_file() {
                    return Err(ConfigError::UnresolvedDependency {
                        name: name.clone(),
                        path,
                    });
                }
                let mut dependency = ProjectConfig::new(path);
                if !dependency.parse(visited, diagnostics) {
                    return Err(ConfigError::DependencyFailed { name: name.clone() });
                }
                if dependency.is_parsed() {
                    self.dependencies.insert(name.clone(), dependency);
                }
            }
        }
        Ok(())
    }

    /// Insert or replace the alias for `alias.pattern`, keeping the longest
    /// patterns first.
    fn set_alias(&mut self, alias: PathAlias) {
        match self.paths.iter_mut().find(|a| a.pattern == alias.pattern) {
            Some(existing) => *existing = alias,
            None => self.paths.push(alias),
        }
        self.paths
            .sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
    }

    fn add_alias_if_absent(&mut self, alias: PathAlias) {
        if !self.paths.iter().any(|a| a.pattern == alias.pattern) {
            self.set_alias(alias);
        }
    }

    /// Fold every parsed dependency into this config and drop the
    /// sub-configs. Each dependency's package becomes an alias for its
    /// `rootDir`; its aliases and dynamic paths are merged without
    /// overriding entries already present here.
    pub fn resolve_all_dependencies(&mut self, diagnostics: &DiagnosticEngine) -> bool {
        let mut ok = true;
        // Dynamic path name -> dependency that contributed it
        let mut contributed: IndexMap<String, String> = IndexMap::new();

        for (name, mut dependency) in std::mem::take(&mut self.dependencies) {
            if !dependency.resolve_all_dependencies(diagnostics) {
                ok = false;
                continue;
            }
            let package = if dependency.package.is_empty() {
                name.clone()
            } else {
                dependency.package.clone()
            };
            let root = dependency.root_dir.to_string_lossy().into_owned();

            self.add_alias_if_absent(PathAlias {
                pattern: package.clone(),
                substitutions: vec![root.clone()],
            });
            self.add_alias_if_absent(PathAlias {
                pattern: format!("{package}/*"),
                substitutions: vec![format!("{}/*", root.trim_end_matches('/'))],
            });
            for alias in std::mem::take(&mut dependency.paths) {
                self.add_alias_if_absent(alias);
            }

            for (module, data) in std::mem::take(&mut dependency.dynamic_paths) {
                match self.dynamic_paths.get(&module) {
                    None => {
                        contributed.insert(module.clone(), package.clone());
                        self.dynamic_paths.insert(module, data);
                    }
                    Some(existing) if contributed.contains_key(&module) && *existing != data => {
                        self.report(
                            ConfigError::DuplicateDynamicPath {
                                name: module,
                                dependency: package.clone(),
                            },
                            diagnostics,
                        );
                        ok = false;
                    }
                    Some(_) => {}
                }
            }

            self.dependency_sources.push(dependency.source_set());
            self.dependency_sources
                .extend(std::mem::take(&mut dependency.dependency_sources));
            tracing::debug!(dependency = %name, package = %package, "folded dependency config");
        }
        ok
    }

    /// Resolve an import path.
    ///
    /// Static aliases are tried before dynamic paths unless `is_dynamic` is
    /// set, in which case dynamic paths go first and static aliases are the
    /// fallback.
    pub fn resolve_path(&self, import: &str, is_dynamic: bool) -> Option<String> {
        if is_dynamic {
            self.resolve_dynamic_path(import)
                .or_else(|| self.resolve_static_path(import))
        } else {
            self.resolve_static_path(import)
                .or_else(|| self.resolve_dynamic_path(import))
        }
    }

    /// Longest matching alias wins. Among its substitutions the first one
    /// that exists on disk is preferred.
    pub fn resolve_static_path(&self, import: &str) -> Option<String> {
        let candidates = self
            .paths
            .iter()
            .find_map(|alias| alias.substitute(import))?;
        candidates
            .iter()
            .find(|candidate| candidate_exists(candidate))
            .or_else(|| candidates.first())
            .cloned()
    }

    pub fn resolve_dynamic_path(&self, import: &str) -> Option<String> {
        self.dynamic_paths
            .contains_key(import)
            .then(|| import.to_string())
    }
}

fn candidate_exists(candidate: &str) -> bool {
    let path = Path::new(candidate);
    path.exists()
        || SOURCE_EXTENSIONS
            .iter()
            .any(|ext| path.with_extension(ext).is_file())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `dir.join(relative)` with `.` components dropped, so joined paths and
/// patterns compare equal to the paths a directory walk produces
fn resolve(dir: &Path, relative: &str) -> PathBuf {
    dir.join(relative).components().collect()
}

fn join_pattern(dir: &Path, pattern: &str) -> String {
    resolve(dir, pattern).to_string_lossy().into_owned()
}

fn expect_str<'v>(value: &'v Value, key: &str) -> Result<&'v str, ConfigError> {
    value.as_str().ok_or_else(|| ConfigError::InvalidType {
        key: key.to_string(),
        expected: "a string",
    })
}

fn expect_object<'v>(value: &'v Value, key: &str) -> Result<&'v Map<String, Value>, ConfigError> {
    value.as_object().ok_or_else(|| ConfigError::InvalidType {
        key: key.to_string(),
        expected: "an object",
    })
}

fn expect_str_array<'v>(value: &'v Value, key: &str) -> Result<Vec<&'v str>, ConfigError> {
    let invalid = || ConfigError::InvalidType {
        key: key.to_string(),
        expected: "an array of strings",
    };
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| item.as_str().ok_or_else(invalid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(pattern: &str, sub: &str) -> PathAlias {
        PathAlias {
            pattern: pattern.to_string(),
            substitutions: vec![sub.to_string()],
        }
    }

    #[test]
    fn test_substitute_wildcard() {
        let a = alias("std/*", "/lib/std/*");
        assert_eq!(a.substitute("std/math"), Some(vec!["/lib/std/math".to_string()]));
        assert_eq!(a.substitute("other/math"), None);
    }

    #[test]
    fn test_substitute_exact() {
        let a = alias("app", "/src/app");
        assert_eq!(a.substitute("app"), Some(vec!["/src/app".to_string()]));
        assert_eq!(a.substitute("app/x"), None);
    }

    #[test]
    fn test_set_alias_keeps_longest_first() {
        let mut config = ProjectConfig::new("/p/arktsconfig.json");
        config.set_alias(alias("a/*", "/x/*"));
        config.set_alias(alias("a/b/*", "/y/*"));
        config.set_alias(alias("c", "/z"));
        let patterns: Vec<_> = config.paths().iter().map(|a| a.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["a/b/*", "a/*", "c"]);
    }

    #[test]
    fn test_dynamic_first_when_requested() {
        let mut config = ProjectConfig::new("/p/arktsconfig.json");
        config.set_alias(alias("lib", "/static/lib"));
        config.dynamic_paths.insert(
            "lib".to_string(),
            DynamicImportData {
                language: "js".to_string(),
                decl_path: None,
                ohm_url: None,
            },
        );
        assert_eq!(config.resolve_path("lib", false).as_deref(), Some("/static/lib"));
        assert_eq!(config.resolve_path("lib", true).as_deref(), Some("lib"));
    }

    #[test]
    fn test_parent_dir_of_bare_file() {
        assert_eq!(parent_dir(Path::new("arktsconfig.json")), PathBuf::from("."));
    }
}
