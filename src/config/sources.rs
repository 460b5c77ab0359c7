//! Project source discovery
//!
//! Turns a resolved [`ProjectConfig`] into the ordered list of
//! `(source, destination)` pairs the driver compiles.

use super::{ProjectConfig, SourceSet};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Extension of compiled output files
pub const BYTECODE_EXTENSION: &str = "abc";

/// Extensions recognised as compilable sources
pub const SOURCE_EXTENSIONS: &[&str] = &["ets", "ts"];

/// Longest leading run of path components without glob metacharacters.
///
/// `src/lib/**/*.ets` searches from `src/lib`; a pattern with no wildcard
/// searches from the pattern itself.
pub fn search_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(['*', '?', '[']) {
                break;
            }
        }
        root.push(component);
    }
    root
}

pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// `*` and `?` stop at `/`; only `**` spans directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn compile_patterns(patterns: &[String]) -> io::Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{pattern}: {e}")))
        })
        .collect()
}

/// Sources of one source set: explicit files first, then every include
/// match not hit by an exclude pattern, sorted and without duplicates.
///
/// A set with neither `files` nor `include` takes every source under its
/// root directory.
pub fn collect_sources(set: &SourceSet) -> io::Result<Vec<PathBuf>> {
    let default_include;
    let include = if set.files.is_empty() && set.include.is_empty() {
        default_include = vec![set.root_dir.join("**").join("*").to_string_lossy().into_owned()];
        &default_include
    } else {
        &set.include
    };
    let exclude = compile_patterns(&set.exclude)?;
    let excluded = |path: &Path| exclude
        .iter()
        .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS));

    let mut sources: Vec<PathBuf> = set
        .files
        .iter()
        .filter(|file| !excluded(file))
        .cloned()
        .collect();

    let mut matched = BTreeSet::new();
    for (pattern, root) in compile_patterns(include)?.iter().zip(include.iter().map(|p| search_root(p))) {
        if !root.exists() {
            tracing::debug!(root = %root.display(), "include search root does not exist");
            continue;
        }
        for entry in WalkDir::new(&root).follow_links(true).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if entry.file_type().is_file()
                && is_source_file(path)
                && pattern.matches_path_with(path, MATCH_OPTIONS)
                && !excluded(path)
            {
                matched.insert(path.to_path_buf());
            }
        }
    }

    for path in matched {
        if !sources.contains(&path) {
            sources.push(path);
        }
    }
    Ok(sources)
}

/// Destination of `source`: re-rooted from `root_dir` under `out_dir`, with
/// the bytecode extension. Sources outside `root_dir` keep only their file
/// name.
pub fn output_path(root_dir: &Path, out_dir: &Path, source: &Path) -> PathBuf {
    let relative = source
        .strip_prefix(root_dir)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| source.file_name().map(PathBuf::from).unwrap_or_default());
    out_dir.join(relative).with_extension(BYTECODE_EXTENSION)
}

/// Every `(source, destination)` pair of the project and its folded
/// dependencies, creating destination directories as needed.
pub fn find_project_sources(config: &ProjectConfig) -> io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut pairs = Vec::new();
    let sets = std::iter::once(config.source_set()).chain(config.dependency_sources().iter().cloned());
    for set in sets {
        for source in collect_sources(&set)? {
            if pairs.iter().any(|(src, _): &(PathBuf, PathBuf)| *src == source) {
                continue;
            }
            let destination = output_path(&set.root_dir, &set.out_dir, &source);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            pairs.push((source, destination));
        }
    }
    tracing::debug!(sources = pairs.len(), "resolved project sources");
    Ok(pairs)
}

/// Module name of `source`: the package owning it followed by the path
/// relative to that package's `rootDir` without extension, joined with `.`.
///
/// Folded dependencies own the sources under their root directories; the
/// most specific root wins. Anything else is named after the project's
/// package and the file stem.
pub fn module_name(config: &ProjectConfig, source: &Path) -> String {
    let owner = std::iter::once((config.package(), config.root_dir()))
        .chain(
            config
                .dependency_sources()
                .iter()
                .map(|set| (set.package.as_str(), set.root_dir.as_path())),
        )
        .filter(|(_, root)| source.starts_with(root))
        .max_by_key(|(_, root)| root.components().count());

    let (package, relative) = match owner {
        Some((package, root)) => (package, source.strip_prefix(root).unwrap_or(source)),
        None => (
            config.package(),
            source.file_name().map(Path::new).unwrap_or(source),
        ),
    };

    let mut segments: Vec<String> = Vec::new();
    if !package.is_empty() {
        segments.push(package.to_string());
    }
    let stem = relative.with_extension("");
    segments.extend(stem.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }));
    segments.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_root() {
        assert_eq!(search_root("/p/src/**/*.ets"), PathBuf::from("/p/src"));
        assert_eq!(search_root("/p/src/a?.ets"), PathBuf::from("/p/src"));
        assert_eq!(search_root("/p/src/main.ets"), PathBuf::from("/p/src/main.ets"));
    }

    #[test]
    fn test_output_path() {
        let out = output_path(Path::new("/p"), Path::new("/p/dist"), Path::new("/p/src/a.ets"));
        assert_eq!(out, PathBuf::from("/p/dist/src/a.abc"));
        let outside = output_path(Path::new("/p"), Path::new("/p/dist"), Path::new("/q/b.ts"));
        assert_eq!(outside, PathBuf::from("/p/dist/b.abc"));
    }

    #[test]
    fn test_single_star_stays_in_directory() {
        let pattern = Pattern::new("/p/src/*.ets").unwrap();
        assert!(pattern.matches_path_with(Path::new("/p/src/a.ets"), MATCH_OPTIONS));
        assert!(!pattern.matches_path_with(Path::new("/p/src/deep/b.ets"), MATCH_OPTIONS));
        let recursive = Pattern::new("/p/src/**/*.ets").unwrap();
        assert!(recursive.matches_path_with(Path::new("/p/src/deep/b.ets"), MATCH_OPTIONS));
    }

    #[test]
    fn test_is_source_file() {
        assert!(is_source_file(Path::new("a.ets")));
        assert!(is_source_file(Path::new("a.ts")));
        assert!(!is_source_file(Path::new("a.json")));
        assert!(!is_source_file(Path::new("Makefile")));
    }
}
