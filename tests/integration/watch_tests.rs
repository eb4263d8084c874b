use crate::{config, project, read, write};
use std::time::Duration;
use stitch::core::services::StitchBuildService;
use stitch::utils::watch::{CoordinatorState, IncrementalCoordinator, RebuildOutcome};

const HASHED: &str = r#"{
    "entry": {"a": "./src/a.js", "b": "./src/b.js"},
    "output": {"filename": "[name].[contenthash:8].js"},
    "module": {"rules": [{"test": "\\.json$", "use": "json"}]}
}"#;

fn files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("src/a.js", "import './util';\nconsole.log('a');\n"),
        ("src/b.js", "import './util';\nconsole.log('b');\n"),
        ("src/util.js", "import data from './values.json';\nexport default data;\n"),
        ("src/values.json", r#"{"version": 1}"#),
    ]
}

async fn coordinator(root: &std::path::Path) -> IncrementalCoordinator<StitchBuildService> {
    let service = StitchBuildService::new(config(root, HASHED)).unwrap();
    let mut coordinator = IncrementalCoordinator::new(service, Duration::from_millis(10));
    coordinator.start().await.unwrap();
    coordinator
}

#[tokio::test]
async fn test_change_in_shared_module_keeps_sibling_hashes() {
    let (_tmp, root) = project(&files());
    let mut coordinator = coordinator(&root).await;
    let before = coordinator.manifest().cloned().unwrap();

    write(&root, "src/values.json", r#"{"version": 2}"#);
    let outcome = coordinator.handle_changes(&[root.join("src/values.json")]).await;

    assert_eq!(outcome, RebuildOutcome::Rebuilt { written: vec!["shared~util".to_string()] });
    let after = coordinator.manifest().cloned().unwrap();
    assert_eq!(before.chunks["a"], after.chunks["a"]);
    assert_eq!(before.chunks["b"], after.chunks["b"]);
    assert_ne!(before.chunks["shared~util"].hash, after.chunks["shared~util"].hash);

    // the replaced artifact is gone, the new one is on disk
    let old_file = &before.chunks["shared~util"].file;
    let new_file = &after.chunks["shared~util"].file;
    assert_ne!(old_file, new_file);
    assert!(!root.join("dist").join(old_file).exists());
    assert!(read(&root, &format!("dist/{}", new_file)).contains("\"version\":2"));
}

#[tokio::test]
async fn test_broken_change_keeps_last_good_output() {
    let (_tmp, root) = project(&files());
    let mut coordinator = coordinator(&root).await;
    let good_manifest = read(&root, "dist/manifest.json");

    write(&root, "src/values.json", "{ broken");
    let outcome = coordinator.handle_changes(&[root.join("src/values.json")]).await;

    assert!(matches!(outcome, RebuildOutcome::Failed(_)));
    assert_eq!(coordinator.state(), CoordinatorState::Watching);
    assert_eq!(read(&root, "dist/manifest.json"), good_manifest);

    write(&root, "src/values.json", r#"{"version": 3}"#);
    let outcome = coordinator.handle_changes(&[root.join("src/values.json")]).await;

    assert!(matches!(outcome, RebuildOutcome::Rebuilt { .. }));
    assert_ne!(read(&root, "dist/manifest.json"), good_manifest);
}

#[tokio::test]
async fn test_new_import_replans_chunks() {
    let (_tmp, root) = project(&files());
    let mut coordinator = coordinator(&root).await;

    write(&root, "src/extra.js", "export const EXTRA = 1;\n");
    write(&root, "src/a.js", "import './util';\nimport './extra';\nconsole.log('a');\n");
    let outcome = coordinator.handle_changes(&[root.join("src/extra.js"), root.join("src/a.js")]).await;

    assert!(matches!(outcome, RebuildOutcome::Rebuilt { .. }));
    let snapshot = coordinator.snapshot().unwrap();
    assert_eq!(snapshot.graph.len(), 5);
    assert_eq!(snapshot.manifest.chunks["a"].modules, vec!["src/a.js", "src/extra.js"]);
    assert!(coordinator.watch_state().get(&root.join("src/extra.js")).is_some());
}

#[tokio::test]
async fn test_touch_without_edit_is_ignored() {
    let (_tmp, root) = project(&files());
    let mut coordinator = coordinator(&root).await;

    write(&root, "src/util.js", "import data from './values.json';\nexport default data;\n");
    let outcome = coordinator.handle_changes(&[root.join("src/util.js"), root.join("README.md")]).await;

    assert_eq!(outcome, RebuildOutcome::Unchanged);
}
