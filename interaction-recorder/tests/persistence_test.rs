use chrono::{Duration as ChronoDuration, Utc};
use interaction_recorder::{
    Action, ExportPolicy, InteractionRecorder, JsonFileStorage, LogStorage, MemoryHost,
    MemoryPage, MemoryStorage, OperationRecord, OutboundMessage, PageContext, RecorderConfig,
    StructureTriggerConfig,
};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "nanoRecorderLogs";

fn persistent_config() -> RecorderConfig {
    RecorderConfig {
        structure: StructureTriggerConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn setup(storage: Arc<dyn LogStorage>) -> (Arc<MemoryPage>, InteractionRecorder) {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let recorder = InteractionRecorder::builder(page.clone())
        .config(persistent_config())
        .storage(storage)
        .build()
        .unwrap();
    (page, recorder)
}

/// Poll until `condition` holds, giving spawned tasks time to run
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_storage_converges_on_buffer() {
    let storage = Arc::new(MemoryStorage::new());
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    recorder.enable();
    for _ in 0..3 {
        page.click(&button);
    }
    recorder.persisted().await;

    assert_eq!(storage.slot(KEY), Some(recorder.records()));
    assert!(storage.write_count() >= 1);
}

#[tokio::test]
async fn test_failed_writes_do_not_affect_capture() {
    let storage = Arc::new(MemoryStorage::new());
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    storage.set_fail_writes(true);
    recorder.enable();
    page.click(&button);
    recorder.persisted().await;

    assert_eq!(recorder.records().len(), 1);
    assert_eq!(storage.slot(KEY), None);

    // The next successful write carries the earlier record too
    storage.set_fail_writes(false);
    page.click(&button);
    recorder.persisted().await;
    assert_eq!(storage.slot(KEY).map(|logs| logs.len()), Some(2));
}

#[tokio::test]
async fn test_consuming_export_clears_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    recorder.enable();
    page.click(&button);
    recorder.persisted().await;
    assert!(storage.slot(KEY).is_some());

    let exported = recorder.export(ExportPolicy::Consume);
    recorder.persisted().await;
    assert_eq!(exported.len(), 1);
    assert_eq!(storage.slot(KEY), None);

    page.click(&button);
    recorder.persisted().await;
    assert_eq!(storage.slot(KEY).map(|logs| logs.len()), Some(1));
}

#[tokio::test]
async fn test_restore_puts_stored_records_first() {
    let storage = Arc::new(MemoryStorage::new());
    let earlier = Utc::now() - ChronoDuration::minutes(5);
    let stored: Vec<OperationRecord> = (0..2)
        .map(|index| {
            let mut record = OperationRecord::new(
                Action::Scroll,
                None,
                PageContext {
                    url: "https://example.com/previous".to_string(),
                    ..Default::default()
                },
            );
            record.timestamp = earlier + ChronoDuration::seconds(index);
            record
        })
        .collect();
    storage.insert_slot(KEY, stored.clone());

    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");
    recorder.enable();
    page.click(&button);

    assert_eq!(recorder.restore().await.unwrap(), 3);
    let records = recorder.records();
    assert_eq!(&records[..2], &stored[..]);
    assert_eq!(records[2].action, Action::Click);

    recorder.persisted().await;
    assert_eq!(storage.slot(KEY), Some(records));
}

fn previous_page_log(storage: &MemoryStorage) -> OperationRecord {
    let mut stored = OperationRecord::new(
        Action::Scroll,
        None,
        PageContext {
            url: "https://example.com/previous".to_string(),
            ..Default::default()
        },
    );
    stored.timestamp = Utc::now() - ChronoDuration::minutes(1);
    storage.insert_slot(KEY, vec![stored.clone()]);
    stored
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capture_before_restore_keeps_stored_log() {
    let storage = Arc::new(MemoryStorage::new());
    let stored = previous_page_log(&storage);
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    recorder.enable();
    page.click(&button);
    recorder.persisted().await;

    assert_eq!(recorder.restore().await.unwrap(), 2);
    let records = recorder.records();
    let actions: Vec<Action> = records.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![Action::Scroll, Action::Click]);
    assert_eq!(records[0], stored);
    assert_eq!(records[1].context.url, "https://example.com/");
    assert_eq!(storage.slot(KEY), Some(records));

    // Asking again does not splice the log in twice
    assert_eq!(recorder.restore().await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stored_log_survives_without_restore_call() {
    let storage = Arc::new(MemoryStorage::new());
    previous_page_log(&storage);
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    recorder.enable();
    page.click(&button);
    page.click(&button);
    recorder.persisted().await;

    let slot = storage.slot(KEY).unwrap();
    assert_eq!(slot.len(), 3);
    assert_eq!(slot[0].context.url, "https://example.com/previous");
    assert_eq!(slot, recorder.records());
}

#[tokio::test]
async fn test_consume_before_load_keeps_stored_log_durable() {
    let storage = Arc::new(MemoryStorage::new());
    let stored = previous_page_log(&storage);
    let (page, recorder) = setup(storage.clone());
    let button = page.document().body().append("button");

    // Still on this task, so the writer has not loaded the slot yet
    recorder.enable();
    page.click(&button);
    let exported = recorder.export(ExportPolicy::Consume);
    assert_eq!(exported.len(), 1);

    recorder.persisted().await;
    assert_eq!(recorder.records(), vec![stored.clone()]);
    assert_eq!(storage.slot(KEY), Some(vec![stored]));
}

#[tokio::test]
async fn test_restore_without_stored_log() {
    let storage = Arc::new(MemoryStorage::new());
    let (_page, recorder) = setup(storage);
    assert_eq!(recorder.restore().await.unwrap(), 0);
}

#[tokio::test]
async fn test_json_file_storage_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(JsonFileStorage::new(dir.path()));

    {
        let (page, recorder) = setup(storage.clone());
        let input = page.document().body().append("input");
        recorder.enable();
        page.type_into(&input, "hello");
        recorder.persisted().await;
    }
    assert!(storage.slot_path(KEY).exists());

    // A fresh page instance picks the log back up
    let (_page, recorder) = setup(storage.clone());
    assert_eq!(recorder.restore().await.unwrap(), 1);
    let target = recorder.records()[0].target.clone().unwrap();
    assert_eq!(target.value.as_deref(), Some("hello"));

    recorder.export(ExportPolicy::Consume);
    recorder.persisted().await;
    assert!(!storage.slot_path(KEY).exists());
    assert_eq!(storage.load(KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_persistence_can_be_switched_off() {
    let storage = Arc::new(MemoryStorage::new());
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let recorder = InteractionRecorder::builder(page.clone())
        .config(RecorderConfig {
            persist_logs: false,
            ..persistent_config()
        })
        .storage(storage.clone())
        .build()
        .unwrap();
    let button = page.document().body().append("button");

    recorder.enable();
    page.click(&button);
    recorder.persisted().await;

    assert_eq!(recorder.records().len(), 1);
    assert_eq!(storage.write_count(), 0);
}

fn structure_config(max_retries: u32) -> RecorderConfig {
    RecorderConfig {
        structure: StructureTriggerConfig {
            max_retries,
            retry_interval_ms: 5,
            ..Default::default()
        },
        ..RecorderConfig::default()
    }
}

#[tokio::test]
async fn test_enable_requests_structure_build() {
    let page = Arc::new(MemoryPage::new("https://example.com/app", "App"));
    let host = Arc::new(MemoryHost::new(Some(42)));
    page.mark_structure_builder_loaded();
    let recorder = InteractionRecorder::builder(page.clone())
        .config(structure_config(3))
        .host(host.clone())
        .build()
        .unwrap();

    recorder.enable();
    assert!(wait_for(|| host.sent().len() >= 2).await);
    assert!(wait_for(|| page.structure_builder_runs() == 1).await);

    let sent = host.sent();
    assert_eq!(sent[0], OutboundMessage::GetTabId);
    let OutboundMessage::UserAction { action } = &sent[1] else {
        panic!("expected user_action, got {:?}", sent[1]);
    };
    assert_eq!(action.action, Action::BuildDomTree);
    assert_eq!(action.params.tab_id, 42);
    assert_eq!(action.params.url, "https://example.com/app");
    assert_eq!(action.params.focus_element, -1);
    assert!(action.params.show_highlight_elements);

    let json = serde_json::to_value(&sent[1]).unwrap();
    assert_eq!(json["type"], "user_action");
    assert_eq!(json["action"]["type"], "build_dom_tree");
    assert_eq!(json["action"]["params"]["tabId"], 42);

    // Records captured after the tab id resolved carry it
    let button = page.document().body().append("button");
    page.click(&button);
    assert_eq!(recorder.records()[0].context.tab_id, Some(42));
    assert_eq!(recorder.session().tab_id(), Some(42));
}

#[tokio::test]
async fn test_missing_tab_id_skips_build_request() {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let host = Arc::new(MemoryHost::new(None));
    let recorder = InteractionRecorder::builder(page.clone())
        .config(structure_config(0))
        .host(host.clone())
        .build()
        .unwrap();

    recorder.enable();
    assert!(wait_for(|| !host.sent().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(host.sent(), vec![OutboundMessage::GetTabId]);
    assert!(recorder.is_enabled());
}

#[tokio::test]
async fn test_highlight_waits_for_builder_to_load() {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let recorder = InteractionRecorder::builder(page.clone())
        .config(structure_config(100))
        .build()
        .unwrap();

    recorder.enable();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(page.structure_builder_runs(), 0);

    page.mark_structure_builder_loaded();
    assert!(wait_for(|| page.structure_builder_runs() == 1).await);
}

#[tokio::test]
async fn test_highlight_poll_stops_on_disable() {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let recorder = InteractionRecorder::builder(page.clone())
        .config(structure_config(100))
        .build()
        .unwrap();

    recorder.enable();
    tokio::time::sleep(Duration::from_millis(10)).await;
    recorder.disable();
    page.mark_structure_builder_loaded();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(page.structure_builder_runs(), 0);
}
