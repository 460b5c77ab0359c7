//! Project config resolution tests

use arkc::config::{ProjectConfig, find_project_sources, module_name};
use arkc::diagnostics::{DiagnosticEngine, DiagnosticKind};
use pretty_assertions::assert_eq;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn project() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = fs::canonicalize(dir.path()).expect("canonical tempdir");
    (dir, root)
}

fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

fn parse(path: &Path) -> (ProjectConfig, bool, DiagnosticEngine) {
    let engine = DiagnosticEngine::new();
    let mut config = ProjectConfig::new(path);
    let mut visited = FxHashSet::default();
    let ok = config.parse(&mut visited, &engine);
    (config, ok, engine)
}

fn resolved(path: &Path) -> (ProjectConfig, DiagnosticEngine) {
    let (mut config, ok, engine) = parse(path);
    assert!(ok, "{}", engine.flush_diagnostic());
    assert!(config.resolve_all_dependencies(&engine), "{}", engine.flush_diagnostic());
    (config, engine)
}

fn config_error(engine: &DiagnosticEngine) -> String {
    let errors = engine.error_diagnostics();
    assert!(!errors.is_empty(), "expected a config error");
    assert!(errors.iter().all(|d| d.kind == DiagnosticKind::ArkTsConfigError));
    errors
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn test_extends_inherits_package() {
    let (_dir, root) = project();
    write(&root, "base.json", r#"{ "compilerOptions": { "package": "core" } }"#);
    let child = write(&root, "child.json", r#"{ "extends": "base.json" }"#);

    let (config, ok, _) = parse(&child);
    assert!(ok);
    assert!(config.is_parsed());
    assert_eq!(config.package(), "core");
}

#[test]
fn test_local_fields_override_extends() {
    let (_dir, root) = project();
    write(
        &root,
        "base.json",
        r#"{ "compilerOptions": { "package": "core", "outDir": "base-out" }, "include": ["lib/**/*"] }"#,
    );
    let child = write(
        &root,
        "child.json",
        r#"{ "extends": "base.json", "compilerOptions": { "package": "app" } }"#,
    );

    let (config, ok, _) = parse(&child);
    assert!(ok);
    assert_eq!(config.package(), "app");
    assert_eq!(config.out_dir(), root.join("base-out"));
    assert_eq!(
        config.include().to_vec(),
        vec![root.join("lib/**/*").to_string_lossy().into_owned()]
    );
}

#[test]
fn test_defaults_relative_to_config_dir() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", "{}");
    let (config, ok, _) = parse(&path);
    assert!(ok);
    assert_eq!(config.base_url(), root);
    assert_eq!(config.root_dir(), root);
    assert_eq!(config.out_dir(), root.join("dist"));
}

#[test]
fn test_extends_cycle_is_silent() {
    let (_dir, root) = project();
    write(&root, "a.json", r#"{ "extends": "b.json", "compilerOptions": { "package": "a" } }"#);
    write(&root, "b.json", r#"{ "extends": "a.json", "compilerOptions": { "package": "b" } }"#);

    let (config, ok, engine) = parse(&root.join("a.json"));
    assert!(ok);
    assert!(!engine.is_any_error());
    assert_eq!(config.package(), "a");
}

#[test]
fn test_self_extends_is_silent() {
    let (_dir, root) = project();
    let path = write(&root, "self.json", r#"{ "extends": "./self.json" }"#);
    let (_, ok, engine) = parse(&path);
    assert!(ok);
    assert!(!engine.is_any_error());
}

#[test]
fn test_repeated_visit_is_noop() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", r#"{ "compilerOptions": { "package": "p" } }"#);
    let engine = DiagnosticEngine::new();
    let mut visited = FxHashSet::default();

    let mut first = ProjectConfig::new(&path);
    assert!(first.parse(&mut visited, &engine));
    let mut second = ProjectConfig::new(&path);
    assert!(second.parse(&mut visited, &engine));

    assert!(first.is_parsed());
    assert!(!second.is_parsed());
    assert_eq!(second.package(), "");
    assert_eq!(visited.len(), 1);
}

#[test]
fn test_diamond_dependencies_parsed_once() {
    let (_dir, root) = project();
    write(&root, "c/arktsconfig.json", r#"{ "compilerOptions": { "package": "c" } }"#);
    write(
        &root,
        "a/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "a", "dependencies": { "c": "../c/arktsconfig.json" } } }"#,
    );
    write(
        &root,
        "b/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "b", "dependencies": { "c": "../c/arktsconfig.json" } } }"#,
    );
    let main = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": {
            "package": "main",
            "dependencies": { "a": "a/arktsconfig.json", "b": "b/arktsconfig.json" }
        } }"#,
    );

    let engine = DiagnosticEngine::new();
    let mut config = ProjectConfig::new(&main);
    let mut visited = FxHashSet::default();
    assert!(config.parse(&mut visited, &engine));
    assert_eq!(visited.len(), 4);
    assert!(config.resolve_all_dependencies(&engine));

    let packages: Vec<&str> = config
        .dependency_sources()
        .iter()
        .map(|set| set.package.as_str())
        .collect();
    assert_eq!(packages.iter().filter(|p| **p == "c").count(), 1);
    assert_eq!(packages.len(), 3);
    assert!(config.dependencies().is_empty());
}

#[test]
fn test_longest_alias_wins() {
    let (_dir, root) = project();
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "paths": { "a/*": ["short/*"], "a/b/*": ["long/*"] } } }"#,
    );
    let (config, _) = resolved(&path);

    let resolved = config.resolve_path("a/b/c", false).expect("alias matches");
    assert_eq!(PathBuf::from(resolved), root.join("long/c"));
    let resolved = config.resolve_path("a/x", false).expect("alias matches");
    assert_eq!(PathBuf::from(resolved), root.join("short/x"));
}

#[test]
fn test_alias_prefers_existing_substitution() {
    let (_dir, root) = project();
    write(&root, "second/util.ets", "");
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "paths": { "lib/*": ["first/*", "second/*"] } } }"#,
    );
    let (config, _) = resolved(&path);
    let resolved = config.resolve_path("lib/util", false).unwrap();
    assert_eq!(PathBuf::from(resolved), root.join("second/util"));
}

#[test]
fn test_dynamic_paths() {
    let (_dir, root) = project();
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": {
            "paths": { "net": ["native/net"] },
            "dynamicPaths": {
                "net": { "language": "js" },
                "@ohos/ui": { "language": "js", "declPath": "decl/ui.d.ets", "ohmUrl": "@ohos:ui" }
            }
        } }"#,
    );
    let (config, _) = resolved(&path);

    let ui = &config.dynamic_paths()["@ohos/ui"];
    assert_eq!(ui.language, "js");
    assert_eq!(ui.decl_path.as_deref(), Some(root.join("decl/ui.d.ets").as_path()));
    assert_eq!(ui.ohm_url.as_deref(), Some("@ohos:ui"));

    assert_eq!(config.resolve_path("@ohos/ui", false).as_deref(), Some("@ohos/ui"));
    assert_eq!(config.resolve_path("missing", false), None);

    // Static first unless the import is dynamic
    let static_net = config.resolve_path("net", false).unwrap();
    assert_eq!(PathBuf::from(static_net), root.join("native/net"));
    assert_eq!(config.resolve_path("net", true).as_deref(), Some("net"));
}

#[test]
fn test_invalid_json_is_config_error() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", "{ not json");
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("Failed to parse JSON"));
}

#[test]
fn test_missing_extends_is_config_error() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", r#"{ "extends": "nowhere.json" }"#);
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("Failed to resolve 'extends' path"));
}

#[test]
fn test_missing_dependency_is_config_error() {
    let (_dir, root) = project();
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "dependencies": { "gone": "gone/arktsconfig.json" } } }"#,
    );
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("dependency 'gone'"));
}

#[test]
fn test_empty_substitutions_is_config_error() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", r#"{ "compilerOptions": { "paths": { "x/*": [] } } }"#);
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("shouldn't be an empty array"));
}

#[test]
fn test_dynamic_path_requires_language() {
    let (_dir, root) = project();
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "dynamicPaths": { "x": { "declPath": "x.d.ets" } } } }"#,
    );
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("requires a 'language'"));
}

#[test]
fn test_wrong_type_is_config_error() {
    let (_dir, root) = project();
    let path = write(&root, "arktsconfig.json", r#"{ "include": "src" }"#);
    let (_, ok, engine) = parse(&path);
    assert!(!ok);
    assert!(config_error(&engine).contains("'include' must be an array of strings"));
}

#[test]
fn test_conflicting_dynamic_paths_across_dependencies() {
    let (_dir, root) = project();
    write(
        &root,
        "x/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "x", "dynamicPaths": { "shared": { "language": "js" } } } }"#,
    );
    write(
        &root,
        "y/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "y", "dynamicPaths": { "shared": { "language": "c" } } } }"#,
    );
    let main = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "dependencies": { "x": "x/arktsconfig.json", "y": "y/arktsconfig.json" } } }"#,
    );

    let (mut config, ok, engine) = parse(&main);
    assert!(ok);
    assert!(!config.resolve_all_dependencies(&engine));
    assert!(config_error(&engine).contains("Duplicated dynamic path 'shared'"));
}

#[test]
fn test_parent_dynamic_path_wins_over_dependency() {
    let (_dir, root) = project();
    write(
        &root,
        "x/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "x", "dynamicPaths": { "shared": { "language": "c" } } } }"#,
    );
    let main = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": {
            "dynamicPaths": { "shared": { "language": "js" } },
            "dependencies": { "x": "x/arktsconfig.json" }
        } }"#,
    );
    let (config, engine) = resolved(&main);
    assert!(!engine.is_any_error());
    assert_eq!(config.dynamic_paths()["shared"].language, "js");
}

#[test]
fn test_dependency_package_becomes_alias() {
    let (_dir, root) = project();
    write(
        &root,
        "util/arktsconfig.json",
        r#"{ "compilerOptions": { "package": "util", "rootDir": "src" } }"#,
    );
    write(&root, "util/src/strings.ets", "function trim(s) { return s }");
    let main = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "dependencies": { "util": "util/arktsconfig.json" } } }"#,
    );
    let (config, _) = resolved(&main);

    let strings = config.resolve_path("util/strings", false).unwrap();
    assert_eq!(PathBuf::from(strings), root.join("util/src/strings"));
    let util = config.resolve_path("util", false).unwrap();
    assert_eq!(PathBuf::from(util), root.join("util/src"));
}

#[test]
fn test_find_project_sources_include_exclude() {
    let (_dir, root) = project();
    write(&root, "src/a.ets", "");
    write(&root, "src/nested/b.ts", "");
    write(&root, "src/skip/c.ets", "");
    write(&root, "src/readme.md", "");
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{
            "compilerOptions": { "outDir": "build" },
            "include": ["src/**/*"],
            "exclude": ["src/skip/**"]
        }"#,
    );
    let (config, _) = resolved(&path);

    let pairs = find_project_sources(&config).unwrap();
    assert_eq!(
        pairs,
        vec![
            (root.join("src/a.ets"), root.join("build/src/a.abc")),
            (root.join("src/nested/b.ts"), root.join("build/src/nested/b.abc")),
        ]
    );
    assert!(root.join("build/src/nested").is_dir());
}

#[test]
fn test_single_star_does_not_cross_directories() {
    let (_dir, root) = project();
    write(&root, "src/a.ets", "");
    write(&root, "src/a.test.ets", "");
    write(&root, "src/deep/b.ets", "");
    write(&root, "src/deep/b.test.ets", "");
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "include": ["src/*.ets", "src/deep/b.test.ets"], "exclude": ["src/*.test.ets"] }"#,
    );
    let (config, _) = resolved(&path);

    let sources: Vec<PathBuf> = find_project_sources(&config)
        .unwrap()
        .into_iter()
        .map(|(src, _)| src)
        .collect();
    assert_eq!(
        sources,
        vec![root.join("src/a.ets"), root.join("src/deep/b.test.ets")]
    );
}

#[test]
fn test_explicit_files_come_first() {
    let (_dir, root) = project();
    write(&root, "z.ets", "");
    write(&root, "lib/a.ets", "");
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "files": ["z.ets"], "include": ["lib/*.ets", "z.ets"] }"#,
    );
    let (config, _) = resolved(&path);

    let sources: Vec<PathBuf> = find_project_sources(&config)
        .unwrap()
        .into_iter()
        .map(|(src, _)| src)
        .collect();
    assert_eq!(sources, vec![root.join("z.ets"), root.join("lib/a.ets")]);
}

#[test]
fn test_default_include_takes_root_dir() {
    let (_dir, root) = project();
    write(&root, "src/main.ets", "");
    write(&root, "other/ignored.ets", "");
    let path = write(&root, "arktsconfig.json", r#"{ "compilerOptions": { "rootDir": "src" } }"#);
    let (config, _) = resolved(&path);

    let pairs = find_project_sources(&config).unwrap();
    assert_eq!(pairs, vec![(root.join("src/main.ets"), root.join("dist/main.abc"))]);
}

#[test]
fn test_dependency_sources_are_collected() {
    let (_dir, root) = project();
    write(&root, "dep/arktsconfig.json", r#"{ "compilerOptions": { "package": "dep" } }"#);
    write(&root, "dep/lib.ets", "");
    write(&root, "app/main.ets", "");
    let main = write(
        &root,
        "app/arktsconfig.json",
        r#"{ "compilerOptions": { "dependencies": { "dep": "../dep/arktsconfig.json" } } }"#,
    );
    let (config, _) = resolved(&main);

    let pairs = find_project_sources(&config).unwrap();
    assert_eq!(
        pairs,
        vec![
            (root.join("app/main.ets"), root.join("app/dist/main.abc")),
            (root.join("dep/lib.ets"), root.join("dep/dist/lib.abc")),
        ]
    );
}

#[test]
fn test_module_name() {
    let (_dir, root) = project();
    let path = write(
        &root,
        "arktsconfig.json",
        r#"{ "compilerOptions": { "package": "app", "rootDir": "src" } }"#,
    );
    let (config, _) = resolved(&path);
    assert_eq!(module_name(&config, &root.join("src/nested/b.ets")), "app.nested.b");
    assert_eq!(module_name(&config, &root.join("src/main.ets")), "app.main");
}

mod props {
    use arkc::config::ProjectConfig;
    use proptest::prelude::*;
    use std::fs;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_more_specific_alias_wins(prefix in "[a-z]{1,6}", mid in "[a-z]{1,6}", rest in "[a-z]{1,6}") {
            let dir = tempfile::tempdir().unwrap();
            let root = fs::canonicalize(dir.path()).unwrap();
            let json = format!(
                r#"{{ "compilerOptions": {{ "paths": {{ "{prefix}/*": ["short/*"], "{prefix}/{mid}/*": ["long/*"] }} }} }}"#
            );
            let path = root.join("arktsconfig.json");
            fs::write(&path, json).unwrap();

            let engine = arkc::DiagnosticEngine::new();
            let mut config = ProjectConfig::new(&path);
            prop_assert!(config.parse(&mut Default::default(), &engine));

            let resolved = config.resolve_path(&format!("{prefix}/{mid}/{rest}"), false).unwrap();
            prop_assert_eq!(std::path::PathBuf::from(resolved), root.join("long").join(&rest));
        }
    }
}

#[derive(Clone, Default)]
struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
    type Writer = CapturedLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_dependency_extending_visited_base_is_logged() {
    let (_dir, root) = project();
    write(&root, "base.json", r#"{ "compilerOptions": { "package": "core" } }"#);
    write(&root, "dep/arktsconfig.json", r#"{ "extends": "../base.json" }"#);
    let main = write(
        &root,
        "arktsconfig.json",
        r#"{ "extends": "base.json", "compilerOptions": { "dependencies": { "dep": "dep/arktsconfig.json" } } }"#,
    );

    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let (config, ok, _) = tracing::subscriber::with_default(subscriber, || parse(&main));

    assert!(ok);
    assert_eq!(config.package(), "core");
    assert_eq!(config.dependencies()["dep"].package(), "");
    let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    assert!(text.contains("base config already visited"), "log: {text}");
    assert!(text.contains("base.json"));
}
