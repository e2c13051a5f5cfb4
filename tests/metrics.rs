use std::{collections::HashSet, sync::Arc, time::Duration};

use metrics_util::debugging::DebuggingRecorder;
use quill::{
    application::persistence::{Persistence, PersistenceConfig},
    domain::entries::{EntryDraft, EntryStore},
    infra::storage::JsonFileRepository,
    presentation::templates::TemplateCache,
};
use time::OffsetDateTime;

fn persistence_for(path: std::path::PathBuf) -> Persistence {
    Persistence::new(
        Arc::new(JsonFileRepository::new(path)),
        PersistenceConfig {
            save_timeout: Duration::from_secs(5),
            ..PersistenceConfig::default()
        },
    )
}

#[tokio::test]
async fn store_template_and_save_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Entry creation
    let store = EntryStore::new();
    store.add(
        EntryDraft::new("Counted", "body").expect("draft"),
        OffsetDateTime::now_utc(),
    );

    // Template compile success and failure
    let templates_dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(templates_dir.path().join("ok.html"), "{{ 1 + 1 }}").expect("write");
    let templates = TemplateCache::new(templates_dir.path());
    let rendered = templates
        .render_to_string("ok.html", serde_json::json!({}))
        .await
        .expect("render");
    assert_eq!(rendered, "2");
    assert!(
        templates
            .render_to_string("missing.html", serde_json::json!({}))
            .await
            .is_err()
    );

    // Save success and failure
    let data_dir = tempfile::tempdir().expect("tempdir");
    persistence_for(data_dir.path().join("entries.json"))
        .save(&store)
        .await
        .expect("save succeeds");

    let blocker = data_dir.path().join("not-a-directory");
    std::fs::write(&blocker, "file").expect("write");
    persistence_for(blocker.join("entries.json"))
        .save(&store)
        .await
        .expect_err("parent is a file");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "quill_entries_created_total",
        "quill_template_compile_total",
        "quill_template_compile_failures_total",
        "quill_store_save_total",
        "quill_store_save_failures_total",
        "quill_store_save_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
