use crate::{config, project, read};
use stitch::core::interfaces::BuildService;
use stitch::core::models::BuildManifest;
use stitch::core::services::StitchBuildService;

const TWO_ENTRIES: &str = r#"{"entry": {"a": "./src/a.js", "b": "./src/b.js"}}"#;

fn shared_util_project() -> (tempfile::TempDir, std::path::PathBuf) {
    project(&[
        ("src/a.js", "import './util';\nconsole.log('a');\n"),
        ("src/b.js", "import './util';\nconsole.log('b');\n"),
        ("src/util.js", "export const UTIL_BODY = 1;\n"),
    ])
}

#[tokio::test]
async fn test_module_shared_by_two_entries_is_extracted() {
    let (_tmp, root) = shared_util_project();
    let service = StitchBuildService::new(config(&root, TWO_ENTRIES)).unwrap();

    let snapshot = service.build().await.unwrap();

    let manifest: BuildManifest = serde_json::from_str(&read(&root, "dist/manifest.json")).unwrap();
    assert_eq!(manifest, snapshot.manifest);
    let names: Vec<&str> = manifest.chunks.keys().map(|n| n.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "shared~util"]);
    assert_eq!(manifest.entrypoints["a"], vec!["shared~util", "a"]);
    assert_eq!(manifest.entrypoints["b"], vec!["shared~util", "b"]);

    // util lives in exactly one artifact
    assert!(read(&root, "dist/shared~util.js").contains("UTIL_BODY"));
    assert!(!read(&root, "dist/a.js").contains("UTIL_BODY"));
    assert!(!read(&root, "dist/b.js").contains("UTIL_BODY"));
    assert_eq!(manifest.chunks["shared~util"].modules, vec!["src/util.js"]);
}

#[tokio::test]
async fn test_repeated_build_is_idempotent() {
    let (_tmp, root) = shared_util_project();
    let service = StitchBuildService::new(config(&root, TWO_ENTRIES)).unwrap();

    service.build().await.unwrap();
    let first = read(&root, "dist/manifest.json");
    let second = service.build().await.unwrap();

    assert_eq!(read(&root, "dist/manifest.json"), first);
    assert!(second.result.written.is_empty());
}

#[tokio::test]
async fn test_loaders_run_last_declared_first() {
    let (_tmp, root) = project(&[("src/index.js", "export default 'TOKEN_X';\n")]);
    let service = StitchBuildService::new(config(
        &root,
        r#"{
            "entry": "./src/index.js",
            "module": {"rules": [{
                "test": "\\.js$",
                "use": [
                    {"loader": "replace", "options": {"pattern": "TOKEN_X", "replacement": "TOKEN_Y"}},
                    {"loader": "replace", "options": {"pattern": "TOKEN_Y", "replacement": "TOKEN_Z"}}
                ]
            }]}
        }"#,
    ))
    .unwrap();

    service.build().await.unwrap();

    let main = read(&root, "dist/main.js");
    assert!(main.contains("TOKEN_Y"));
    assert!(!main.contains("TOKEN_Z"));
}

#[tokio::test]
async fn test_single_runtime_chunk_and_html_page() {
    let (_tmp, root) = shared_util_project();
    let service = StitchBuildService::new(config(
        &root,
        r#"{
            "entry": {"a": "./src/a.js", "b": "./src/b.js"},
            "output": {"html": true},
            "optimization": {"runtimeChunk": "single"}
        }"#,
    ))
    .unwrap();

    let snapshot = service.build().await.unwrap();

    assert_eq!(snapshot.manifest.entrypoints["a"], vec!["runtime", "shared~util", "a"]);
    assert!(snapshot.manifest.chunks["runtime"].modules.is_empty());

    let html = read(&root, "dist/index.html");
    let position = |file: &str| html.find(&format!("src=\"{}\"", file)).unwrap();
    assert!(position("runtime.js") < position("shared~util.js"));
    assert!(position("shared~util.js") < position("a.js"));
    assert!(position("a.js") < position("b.js"));
    assert_eq!(html.matches("runtime.js").count(), 1);
}

#[tokio::test]
async fn test_failed_build_emits_nothing() {
    let (_tmp, root) = project(&[
        ("src/index.js", "import data from './data.json';\n"),
        ("src/data.json", "{ not json"),
    ]);
    let service = StitchBuildService::new(config(
        &root,
        r#"{"module": {"rules": [{"test": "\\.json$", "use": "json"}]}}"#,
    ))
    .unwrap();

    let err = service.build().await.unwrap_err();

    assert!(err.format_detailed().contains("data.json"));
    assert!(!root.join("dist").exists());
}

#[tokio::test]
async fn test_alias_and_search_roots() {
    let (_tmp, root) = project(&[
        ("src/index.js", "import '@/components/button';\nimport 'lib';\n"),
        ("src/components/button.js", "export const BUTTON = 1;\n"),
        ("node_modules/lib/package.json", r#"{"main": "main.js"}"#),
        ("node_modules/lib/main.js", "export const LIB = 1;\n"),
    ]);
    let service = StitchBuildService::new(config(
        &root,
        r#"{"resolve": {"alias": {"@": "./src"}}}"#,
    ))
    .unwrap();

    let snapshot = service.build().await.unwrap();

    assert_eq!(snapshot.result.modules, 3);
    let names: Vec<&str> = snapshot.manifest.chunks.keys().map(|n| n.as_str()).collect();
    assert_eq!(names, vec!["main", "vendors~main"]);
    assert!(read(&root, "dist/vendors~main.js").contains("LIB"));
}
