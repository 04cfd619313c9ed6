//! Engine built from a YAML file, loading from the filesystem

mod common;

use common::{ids, init_tracing};
use modlink::{
    AlertMetric, AlertSeverity, CompatLevel, EngineConfig, FsContentStore, ModlinkError,
    ModuleEngine, PerformanceSample, Reason,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/engine.yaml")
}

fn write_payloads(dir: &std::path::Path) {
    let mut lang = String::new();
    for i in 0..40 {
        lang.push_str("/* grammar notes that are not needed at runtime */");
        lang.push_str("  rule: shared production used across the grammar\n");
        lang.push_str(&format!("  token_{i}: value\n"));
    }
    let files = [
        ("base", "base: true\n".to_string()),
        ("auth", "auth:\n  <!-- reviewer note -->\n  mode: strict\n".to_string()),
        ("lang", lang),
        ("sandbox", "sandbox: on\n".to_string()),
        ("scout", "scout: on\n".to_string()),
    ];
    for (id, body) in files {
        std::fs::write(dir.join(format!("{id}.yaml")), body).unwrap();
    }
}

fn engine(dir: &std::path::Path) -> ModuleEngine {
    let store = FsContentStore::new(dir).with_extension("yaml");
    ModuleEngine::from_yaml_file(fixture_path(), Arc::new(store)).unwrap()
}

#[test]
fn test_fixture_parses() {
    let config = EngineConfig::from_yaml_file(fixture_path()).unwrap();
    assert_eq!(config.groups.len(), 2);
    assert_eq!(config.modules().count(), 5);
    assert_eq!(config.loader.max_parallel, 2);
    assert_eq!(config.cache.default_ttl_secs, 600);
    assert_eq!(config.monitor.baseline_samples, 5);
}

#[tokio::test]
async fn test_engine_resolves_and_loads_from_disk() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_payloads(dir.path());
    let engine = engine(dir.path());

    let groups = engine.resolve(&ids(&["sandbox", "lang"])).unwrap();
    assert_eq!(
        modlink::resolver::group_ids(&groups),
        vec![ids(&["base"]), ids(&["auth", "lang"]), ids(&["sandbox"])]
    );

    let result = engine.load_group("extensions").await.unwrap();
    assert!(result.is_success(), "failures: {:?}", result.failed);
    assert_eq!(result.loaded.len(), 5);
    let lang = &result.loaded["lang"];
    assert!(lang.payload.is_compressed());
    assert!(lang.payload.compression_ratio() < 0.7);
    assert!(!result.loaded["auth"].payload.body.contains("reviewer"));

    let again = engine.load_all(&ids(&["lang"])).await.unwrap();
    assert_eq!(again.from_cache.len(), 2);
    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 2);
    assert!(stats.hit_rate() > 0.0);
    assert!(stats.bytes_used <= stats.byte_budget);
}

#[tokio::test]
async fn test_compatibility_from_configured_matrix() {
    let dir = tempfile::tempdir().unwrap();
    write_payloads(dir.path());
    let engine = engine(dir.path());

    let auth_sandbox = engine.score("sandbox", "auth").unwrap();
    // 0.4 base, shared "session" capability, format 1.x vs 2.x
    assert_eq!(auth_sandbox.module_a, "auth");
    assert!((auth_sandbox.score - 0.1).abs() < 1e-9);
    assert_eq!(auth_sandbox.level, CompatLevel::Low);

    let sandbox_scout = engine.score("scout", "sandbox").unwrap();
    // 0.6 base, auth pinned to 1.0 vs 2.0, shared tag absent, format mismatch
    assert!((sandbox_scout.score - 0.2).abs() < 1e-9);
    assert!(sandbox_scout
        .basis
        .iter()
        .any(|r| matches!(r, Reason::DependencyConflict { .. })));

    let lang_scout = engine.score("lang", "scout").unwrap();
    assert_eq!(lang_scout.level, CompatLevel::Incompatible);

    assert!(matches!(
        engine.score("lang", "nope"),
        Err(ModlinkError::UnknownModule { .. })
    ));
}

#[tokio::test]
async fn test_load_and_validate_raises_alerts() {
    let dir = tempfile::tempdir().unwrap();
    write_payloads(dir.path());
    let engine = engine(dir.path());

    let validated = engine
        .load_and_validate(&ids(&["lang", "scout"]))
        .await
        .unwrap();
    // Loading is never blocked by compatibility
    assert!(validated.load.is_success());
    assert_eq!(validated.incompatible_pairs().count(), 1);

    let alerts = engine.check_thresholds();
    assert!(alerts
        .iter()
        .any(|a| a.metric == AlertMetric::IncompatiblePair && a.severity == AlertSeverity::Critical));

    engine.monitor().set_baseline("render", 10.0);
    engine.record(PerformanceSample::new("render", Duration::from_millis(50), 0));
    assert!(engine
        .check_thresholds()
        .iter()
        .any(|a| a.metric == AlertMetric::LoadTimeRegression
            && a.operation.as_deref() == Some("render")));
}

#[tokio::test]
async fn test_snapshot_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_payloads(dir.path());
    let snapshot = tempfile::tempdir().unwrap();
    let path = snapshot.path().join("cache");

    let first = engine(dir.path());
    first.load_all(&ids(&["auth"])).await.unwrap();
    assert_eq!(first.save_snapshot(&path).unwrap(), 2);
    drop(first);

    let second = engine(dir.path());
    assert_eq!(second.restore_snapshot(&path).unwrap(), 2);
    let result = second.load_all(&ids(&["auth"])).await.unwrap();
    assert_eq!(result.from_cache.len(), 2);
}
