use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidyscan::controller::{
    Applied, ControlOp, PendingCommand, ScanController, SessionConfig, StartOutcome,
};
use tidyscan::domains::{
    wire, ClassificationOps, ClassificationParams, DomainOps, ResidueOps, ResidueParams,
};
use tidyscan::error::{BackendError, ErrorKind, SessionError};
use tidyscan::ipc::{EventBus, Invoker};
use tidyscan::model::{
    Category, DeleteOptions, EntryKind, FileEntry, ScanDomain, ScanProgress, ScanResult,
    ScanStatus, SessionId,
};
use tidyscan::pagination::PaginationConfig;

/// Worker stand-in that answers from a per-command queue and records every call
#[derive(Default)]
struct Scripted {
    replies: Mutex<HashMap<String, VecDeque<Result<Value, BackendError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl Scripted {
    fn reply(&self, command: &str, value: Value) {
        self.push(command, Ok(value));
    }

    fn fail(&self, command: &str, err: BackendError) {
        self.push(command, Err(err));
    }

    fn push(&self, command: &str, reply: Result<Value, BackendError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    fn calls_to(&self, command: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl Invoker for Scripted {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), args));
        self.replies
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(Value::Null))
    }
}

const DOMAIN: ScanDomain = ScanDomain::FileClassification;

type Controller = ScanController<ClassificationOps<Arc<Scripted>>>;

fn classification(worker: &Arc<Scripted>, bus: &EventBus) -> Controller {
    let mut controller = ScanController::new(ClassificationOps::new(worker.clone()), bus.clone());
    controller.setup_listeners();
    controller
}

fn emit_progress(bus: &EventBus, id: &str, status: ScanStatus, percent: f32) {
    let mut progress = ScanProgress::new(SessionId::new(id), status);
    progress.percent = percent;
    progress.scanned_count = (percent * 10.0) as u64;
    bus.emit(DOMAIN.progress_channel(), wire::progress(DOMAIN, &progress));
}

fn files(key: &str, range: std::ops::Range<usize>) -> Vec<FileEntry> {
    range
        .map(|i| FileEntry::from_path(format!("/{}/{:04}", key, i), (i as u64 + 1) * 10, 0))
        .collect()
}

/// A category holding `loaded` files out of `file_count`
fn category(key: &str, loaded: usize, file_count: u64) -> Category {
    let mut category = Category::complete(key, key, files(key, 0..loaded));
    category.file_count = file_count;
    category.has_more = (loaded as u64) < file_count;
    category
}

fn emit_complete(bus: &EventBus, id: &str, categories: Vec<Category>) {
    let result = ScanResult::new(SessionId::new(id), categories, 42);
    bus.emit(DOMAIN.complete_channel(), wire::result(DOMAIN, &result));
}

async fn started(worker: &Arc<Scripted>, bus: &EventBus, id: &str) -> Controller {
    let mut controller = classification(worker, bus);
    worker.reply("disk_scan_start", json!(id));
    controller.start(&ClassificationParams::default()).await.unwrap();
    controller
}

async fn completed_with(
    worker: &Arc<Scripted>,
    bus: &EventBus,
    categories: Vec<Category>,
) -> Controller {
    let mut controller = started(worker, bus, "s1").await;
    emit_complete(bus, "s1", categories);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Completed);
    controller
}

fn assert_counts_hold(controller: &ScanController<impl DomainOps>) {
    if let Some(result) = controller.result() {
        for category in &result.categories {
            assert!(category.files.len() as u64 <= category.file_count, "{}", category.key);
        }
    }
}

fn loaded_selected_size(controller: &ScanController<impl DomainOps>) -> u64 {
    let result = controller.result().unwrap();
    result
        .loaded_entries()
        .filter(|f| controller.selection().contains(&f.id))
        .map(|f| f.size)
        .sum()
}

#[tokio::test]
async fn test_scan_lifecycle_to_completion() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);
    assert_eq!(controller.status(), ScanStatus::Idle);

    worker.reply("disk_scan_start", json!("s1"));
    let id = controller.start(&ClassificationParams::default()).await.unwrap();
    assert_eq!(id.as_str(), "s1");
    assert_eq!(controller.status(), ScanStatus::Scanning);
    assert!(controller.is_confirmed());

    for percent in [0.0, 25.0, 60.0] {
        emit_progress(&bus, "s1", ScanStatus::Scanning, percent);
        assert_eq!(controller.next_event().await, Some(Applied::Progress));
        assert_eq!(controller.progress().unwrap().percent, percent);
    }

    emit_complete(
        &bus,
        "s1",
        vec![category("video", 40, 40), category("image", 40, 40), category("docs", 40, 40)],
    );
    assert_eq!(controller.next_event().await, Some(Applied::Result));

    assert_eq!(controller.status(), ScanStatus::Completed);
    assert!(controller.progress().is_none());
    let result = controller.result().unwrap();
    assert_eq!(result.categories.len(), 3);
    assert_eq!(result.categories.iter().map(|c| c.files.len()).sum::<usize>(), 120);
    assert_eq!(result.total_files, 120);
}

#[tokio::test]
async fn test_restart_ignores_cancelled_session_events() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    emit_progress(&bus, "s1", ScanStatus::Scanning, 30.0);
    assert_eq!(controller.pump(), 1);

    controller.cancel().await.unwrap();
    assert_eq!(controller.status(), ScanStatus::Cancelled);
    assert!(controller.session_id().is_none());
    assert_eq!(worker.calls_to("disk_scan_cancel"), vec![json!({ "scanId": "s1" })]);

    // stray events before the new start
    emit_progress(&bus, "s1", ScanStatus::Scanning, 35.0);
    assert_eq!(controller.pump(), 0);

    worker.reply("disk_scan_start", json!("s2"));
    controller.start(&ClassificationParams::default()).await.unwrap();

    emit_progress(&bus, "s1", ScanStatus::Scanning, 90.0);
    emit_complete(&bus, "s1", vec![category("video", 5, 5)]);
    emit_progress(&bus, "s1", ScanStatus::Error, 91.0);
    assert_eq!(controller.pump(), 0);
    assert_eq!(controller.status(), ScanStatus::Scanning);
    assert!(controller.progress().is_none());
    assert!(controller.result().is_none());

    emit_progress(&bus, "s2", ScanStatus::Scanning, 10.0);
    assert_eq!(controller.pump(), 1);
    let progress = controller.progress().unwrap();
    assert_eq!(progress.session_id.as_str(), "s2");
    assert_eq!(progress.percent, 10.0);
}

#[tokio::test]
async fn test_events_before_start_ack_are_adopted() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    let ticket = controller.begin_start().unwrap();
    assert_eq!(controller.pending(), Some(PendingCommand::Start));
    assert!(controller.session_id().is_none());

    emit_progress(&bus, "s7", ScanStatus::Scanning, 5.0);
    emit_progress(&bus, "other", ScanStatus::Scanning, 80.0);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.session_id().map(SessionId::as_str), Some("s7"));
    assert_eq!(controller.progress().unwrap().percent, 5.0);

    let outcome = controller
        .finish_start(ticket, Ok(SessionId::new("s7")))
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started(SessionId::new("s7")));
    assert!(controller.is_confirmed());
}

#[tokio::test]
async fn test_start_ack_after_cancel_is_abandoned() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    let ticket = controller.begin_start().unwrap();
    // nothing to address yet, so nothing is sent
    assert!(controller.begin_control(ControlOp::Cancel).is_none());
    assert_eq!(controller.status(), ScanStatus::Cancelled);

    let outcome = controller
        .finish_start(ticket, Ok(SessionId::new("late")))
        .unwrap();
    assert_eq!(outcome, StartOutcome::Abandoned(Some(SessionId::new("late"))));
    assert!(controller.session_id().is_none());

    emit_progress(&bus, "late", ScanStatus::Scanning, 50.0);
    assert_eq!(controller.pump(), 0);
}

#[tokio::test]
async fn test_setup_listeners_is_idempotent() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);
    controller.setup_listeners();
    controller.setup_listeners();

    assert_eq!(bus.subscriber_count(DOMAIN.progress_channel()), 1);
    assert_eq!(bus.subscriber_count(DOMAIN.complete_channel()), 1);

    controller.cleanup();
    assert_eq!(bus.subscriber_count(DOMAIN.progress_channel()), 0);
    assert_eq!(bus.subscriber_count(DOMAIN.complete_channel()), 0);
    assert!(controller.next_event().await.is_none());

    // a second controller on the same bus is independent
    let other = classification(&worker, &bus);
    assert_eq!(bus.subscriber_count(DOMAIN.progress_channel()), 1);
    drop(other);
    assert_eq!(bus.subscriber_count(DOMAIN.progress_channel()), 0);
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    let err = controller
        .start(&ClassificationParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive { status: ScanStatus::Scanning }));

    controller.pause().await.unwrap();
    assert!(matches!(
        controller.start(&ClassificationParams::default()).await,
        Err(SessionError::AlreadyActive { status: ScanStatus::Paused })
    ));
    assert_eq!(worker.calls_to("disk_scan_start").len(), 1);
}

#[tokio::test]
async fn test_optimistic_pause_is_not_rolled_back() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    let request = controller.begin_control(ControlOp::Pause).unwrap();
    assert_eq!(controller.status(), ScanStatus::Paused);
    assert_eq!(controller.pending(), Some(PendingCommand::Pause));
    assert!(!controller.is_confirmed());

    let err = controller
        .confirm_control(&request, Err(BackendError::command("disk_scan_pause", "busy")))
        .unwrap_err();
    assert!(err.to_string().contains("busy"));
    assert_eq!(controller.status(), ScanStatus::Paused);
    assert!(controller.is_confirmed());
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Control);

    // the worker's own report settles it
    emit_progress(&bus, "s1", ScanStatus::Scanning, 40.0);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Scanning);
}

#[tokio::test]
async fn test_pause_resume_round_trip() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    controller.pause().await.unwrap();
    assert_eq!(controller.status(), ScanStatus::Paused);
    controller.resume().await.unwrap();
    assert_eq!(controller.status(), ScanStatus::Scanning);

    // no-op outside the states it applies to
    controller.resume().await.unwrap();
    assert_eq!(worker.calls_to("disk_scan_pause"), vec![json!({ "scanId": "s1" })]);
    assert_eq!(worker.calls_to("disk_scan_resume").len(), 1);
}

#[tokio::test]
async fn test_start_failure_then_retry() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    worker.fail("disk_scan_start", BackendError::command("disk_scan_start", "disk busy"));
    assert!(controller.start(&ClassificationParams::default()).await.is_err());
    assert_eq!(controller.status(), ScanStatus::Error);
    let error = controller.error().unwrap();
    assert_eq!(error.kind, ErrorKind::StartFailure);
    assert!(error.kind.offers_retry());
    assert!(error.message.contains("disk busy"));

    worker.reply("disk_scan_start", json!("s2"));
    controller.start(&ClassificationParams::default()).await.unwrap();
    assert_eq!(controller.status(), ScanStatus::Scanning);
    assert!(controller.error().is_none());
}

#[tokio::test]
async fn test_unavailable_host_is_an_environment_error() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    worker.fail("disk_scan_start", BackendError::Unavailable("no native runtime".into()));
    assert!(controller.start(&ClassificationParams::default()).await.is_err());
    let error = controller.error().unwrap();
    assert_eq!(error.kind, ErrorKind::Environment);
    assert!(!error.kind.offers_retry());
}

#[tokio::test]
async fn test_mid_scan_error_and_expiry() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    emit_progress(&bus, "s1", ScanStatus::Error, 12.0);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Error);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::MidScan);

    // trailing events for the failed session change nothing
    emit_progress(&bus, "s1", ScanStatus::Scanning, 13.0);
    assert_eq!(controller.pump(), 0);

    assert!(!controller.tick(Instant::now()));
    assert!(controller.error().is_some());
    controller.tick(Instant::now() + Duration::from_secs(6));
    assert!(controller.error().is_none());
    assert_eq!(controller.status(), ScanStatus::Error);
}

#[tokio::test]
async fn test_stalled_scan_is_failed() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = ScanController::with_config(
        ClassificationOps::new(worker.clone()),
        bus.clone(),
        SessionConfig {
            stall_timeout: Some(Duration::from_secs(300)),
            error_display: Duration::from_secs(5),
        },
        PaginationConfig::default(),
    );
    controller.setup_listeners();
    worker.reply("disk_scan_start", json!("s1"));
    controller.start(&ClassificationParams::default()).await.unwrap();

    let now = Instant::now();
    assert!(!controller.tick(now + Duration::from_secs(200)));
    assert!(controller.tick(now + Duration::from_secs(301)));
    assert_eq!(controller.status(), ScanStatus::Error);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Stalled);

    emit_progress(&bus, "s1", ScanStatus::Scanning, 99.0);
    assert_eq!(controller.pump(), 0);
}

#[tokio::test]
async fn test_paused_scan_never_stalls() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;
    controller.pause().await.unwrap();

    assert!(!controller.tick(Instant::now() + Duration::from_secs(3600)));
    assert_eq!(controller.status(), ScanStatus::Paused);
}

#[tokio::test]
async fn test_progress_after_completion_is_dropped() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    emit_progress(&bus, "s1", ScanStatus::Completed, 100.0);
    emit_complete(&bus, "s1", vec![category("video", 3, 3)]);
    emit_progress(&bus, "s1", ScanStatus::Scanning, 97.0);

    assert_eq!(controller.pump(), 2);
    assert_eq!(controller.status(), ScanStatus::Completed);
    assert!(controller.progress().is_none());
    assert_eq!(controller.result().unwrap().total_files, 3);
}

#[tokio::test]
async fn test_load_more_keeps_selection_and_count() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("video", 50, 500)]).await;

    assert!(controller.toggle("/video/0003"));
    assert!(controller.toggle("/video/0010"));
    assert_eq!(controller.selected_size(), loaded_selected_size(&controller));

    worker.reply(
        "disk_scan_category_files",
        wire::page(&files("video", 50..100), 500, true),
    );
    let added = controller.load_more_at("video", 50, 50).await.unwrap();
    assert_eq!(added, 50);
    assert_eq!(
        worker.calls_to("disk_scan_category_files"),
        vec![json!({ "scanId": "s1", "categoryName": "video", "offset": 50, "limit": 50 })]
    );

    let video = controller.result().unwrap().category("video").unwrap();
    assert_eq!(video.files.len(), 100);
    assert_eq!(video.file_count, 500);
    assert!(video.has_more);
    assert_eq!(video.files[50].path, "/video/0050");

    assert_eq!(controller.selected_count(), 2);
    assert!(controller.selection().contains("/video/0003"));
    assert!(!controller.selection().contains("/video/0050"));
    assert_eq!(controller.selected_size(), loaded_selected_size(&controller));
    assert_counts_hold(&controller);
}

#[tokio::test]
async fn test_failed_or_empty_page_leaves_category_untouched() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("video", 50, 500)]).await;
    let before = controller.result().unwrap().clone();

    worker.fail(
        "disk_scan_category_files",
        BackendError::command("disk_scan_category_files", "timeout"),
    );
    assert!(controller.load_more("video").await.is_err());
    assert_eq!(controller.result().unwrap(), &before);
    assert!(!controller.loader().is_loading("video"));
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Load);

    // the worker answers null: nothing to merge
    assert_eq!(controller.load_more("video").await.unwrap(), 0);
    assert_eq!(controller.result().unwrap(), &before);
}

#[tokio::test]
async fn test_oversized_page_is_clamped_to_file_count() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("docs", 5, 8)]).await;

    worker.reply("disk_scan_category_files", wire::page(&files("docs", 3..20), 20, false));
    assert_eq!(controller.load_more("docs").await.unwrap(), 3);

    let docs = controller.result().unwrap().category("docs").unwrap();
    assert_eq!(docs.files.len(), 8);
    assert!(!docs.has_more);
    assert_counts_hold(&controller);
}

#[tokio::test]
async fn test_expanding_empty_category_fetches_first_page() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("music", 0, 30)]).await;

    worker.reply("disk_scan_category_files", wire::page(&files("music", 0..30), 30, false));
    assert_eq!(controller.expand("music").await.unwrap(), 30);
    assert_eq!(controller.expand("music").await.unwrap(), 0);
    assert_eq!(worker.calls_to("disk_scan_category_files").len(), 1);
    assert!(controller.loader().is_expanded("music"));
}

#[tokio::test]
async fn test_selection_only_covers_loaded_files() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(
        &worker,
        &bus,
        vec![category("video", 10, 500), category("docs", 4, 4)],
    )
    .await;

    controller.select_all();
    assert_eq!(controller.selected_count(), 14);
    assert_eq!(controller.selected_size(), loaded_selected_size(&controller));
    let video_loaded: u64 = (1..=10).map(|i| i * 10).sum();
    let docs_loaded: u64 = (1..=4).map(|i| i * 10).sum();
    assert_eq!(controller.selected_size(), video_loaded + docs_loaded);

    controller.toggle_category("docs").unwrap();
    assert_eq!(controller.selected_count(), 10);
    controller.deselect_all();
    assert_eq!(controller.selected_size(), 0);
    assert!(!controller.toggle("/video/0400"));
}

#[tokio::test]
async fn test_delete_all_loaded_video_drops_category() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(
        &worker,
        &bus,
        vec![category("video", 100, 100), category("docs", 3, 3)],
    )
    .await;

    controller.toggle_category("video").unwrap();
    assert_eq!(controller.selected_count(), 100);

    worker.reply(
        "disk_scan_delete_selected",
        json!({ "cleaned_files": 100, "cleaned_size": 50500, "failed_files": 0, "errors": [] }),
    );
    let outcome = controller
        .delete_selected(DeleteOptions::default())
        .await
        .unwrap();

    let calls = worker.calls_to("disk_scan_delete_selected");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["filePaths"].as_array().unwrap().len(), 100);
    assert_eq!(calls[0]["moveToTrash"], json!(true));

    assert_eq!(outcome.removed, 100);
    assert_eq!(outcome.dropped_categories, vec!["video".to_string()]);
    assert!(controller.result().unwrap().category("video").is_none());
    assert_eq!(controller.selected_count(), 0);
    assert_eq!(controller.result().unwrap().total_files, 3);
    assert!(worker.calls_to("disk_scan_start").len() == 1);
}

#[tokio::test]
async fn test_partial_delete_keeps_failures_only() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("docs", 4, 4)]).await;
    controller.select_all();

    worker.reply(
        "disk_scan_delete_selected",
        json!({
            "cleaned_files": 3,
            "cleaned_size": 80,
            "failed_files": 1,
            "errors": [{ "path": "/docs/0001", "error_code": "EBUSY", "error_message": "in use" }]
        }),
    );
    let outcome = controller
        .delete_selected(DeleteOptions { move_to_recycle_bin: false })
        .await
        .unwrap();

    assert!(outcome.is_partial());
    assert_eq!(outcome.report.failed_items[0].error, "EBUSY: in use");
    let docs = controller.result().unwrap().category("docs").unwrap();
    assert_eq!(docs.files.len(), 1);
    assert_eq!(docs.files[0].path, "/docs/0001");
    assert_eq!(controller.selected_count(), 1);
    assert_eq!(worker.calls_to("disk_scan_delete_selected")[0]["moveToTrash"], json!(false));
}

#[tokio::test]
async fn test_failed_delete_changes_nothing() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = completed_with(&worker, &bus, vec![category("docs", 4, 4)]).await;
    controller.select_all();
    let before = controller.result().unwrap().clone();

    worker.fail(
        "disk_scan_delete_selected",
        BackendError::command("disk_scan_delete_selected", "permission denied"),
    );
    assert!(controller.delete_selected(DeleteOptions::default()).await.is_err());

    assert_eq!(controller.result().unwrap(), &before);
    assert_eq!(controller.selected_count(), 4);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Delete);

    controller.deselect_all();
    assert!(matches!(
        controller.delete_selected(DeleteOptions::default()).await,
        Err(SessionError::EmptySelection)
    ));
}

#[tokio::test]
async fn test_residue_cleanup_filters_unsafe_items() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = ScanController::new(ResidueOps::new(worker.clone()), bus.clone());
    controller.setup_listeners();

    worker.reply("residue_scan_start", json!("r1"));
    controller.start(&ResidueParams::default()).await.unwrap();

    let mut folder = FileEntry::from_path("/opt/old-app", 300, 0);
    folder.id = "f1".to_string();
    folder.kind = EntryKind::Directory;
    let mut risky = FileEntry::from_path("/opt/shared", 100, 0);
    risky.id = "f2".to_string();
    risky.kind = EntryKind::Directory;
    risky.safe_to_delete = false;
    let mut key = FileEntry::from_path("HKCU\\Software\\OldApp", 0, 0);
    key.id = "k1".to_string();
    key.kind = EntryKind::RegistryKey;

    let result = ScanResult::new(
        SessionId::new("r1"),
        vec![
            Category::complete("leftover_folder", "Leftover folders", vec![folder, risky]),
            Category::complete("registry_key", "Registry keys", vec![key]),
        ],
        10,
    );
    let domain = ScanDomain::SoftwareResidue;
    bus.emit(domain.complete_channel(), wire::result(domain, &result));
    assert_eq!(controller.pump(), 1);

    controller.select_all();
    worker.reply(
        "residue_delete",
        json!({ "deleted_count": 1, "deleted_size": 300, "failed_count": 0, "failed_items": [] }),
    );
    let outcome = controller
        .delete_selected(DeleteOptions::default())
        .await
        .unwrap();

    let calls = worker.calls_to("residue_delete");
    assert_eq!(calls, vec![json!({ "itemIds": ["f1"], "moveToRecycleBin": true })]);
    assert_eq!(outcome.skipped.len(), 2);
    assert_eq!(outcome.removed, 1);
    assert!(controller.result().unwrap().contains_entry("f2"));
    assert!(controller.result().unwrap().contains_entry("k1"));
    assert_eq!(controller.selected_count(), 2);
}

#[tokio::test]
async fn test_reset_cancels_and_clears_worker_result() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    controller.reset().await;
    assert_eq!(controller.status(), ScanStatus::Idle);
    assert_eq!(worker.calls_to("disk_scan_cancel").len(), 1);
    assert!(worker.calls_to("disk_scan_clear_result").is_empty());

    let mut controller = completed_with(&worker, &bus, vec![category("docs", 2, 2)]).await;
    controller.reset().await;
    assert!(controller.result().is_none());
    assert_eq!(
        worker.calls_to("disk_scan_clear_result"),
        vec![json!({ "scanId": "s1" })]
    );
}

#[tokio::test]
async fn test_sync_polls_progress_and_result() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    let mut progress = ScanProgress::new(SessionId::new("s1"), ScanStatus::Completed);
    progress.percent = 100.0;
    worker.reply("disk_scan_progress", wire::progress(DOMAIN, &progress));
    let result = ScanResult::new(SessionId::new("s1"), vec![category("video", 2, 2)], 5);
    worker.reply("disk_scan_result", wire::result(DOMAIN, &result));

    assert_eq!(controller.sync().await.unwrap(), Applied::Result);
    assert_eq!(controller.status(), ScanStatus::Completed);
    assert_eq!(controller.result().unwrap().total_files, 2);
}

#[tokio::test]
async fn test_paused_worker_report_reconciles_resume() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    emit_progress(&bus, "s1", ScanStatus::Paused, 20.0);
    assert_eq!(controller.next_event().await, Some(Applied::Reconciled(ScanStatus::Paused)));
    assert_eq!(controller.status(), ScanStatus::Paused);

    // while a command is pending the optimistic status stands
    let request = controller.begin_control(ControlOp::Resume).unwrap();
    emit_progress(&bus, "s1", ScanStatus::Paused, 20.0);
    assert_eq!(controller.next_event().await, Some(Applied::Progress));
    assert_eq!(controller.status(), ScanStatus::Scanning);
    controller.confirm_control(&request, Ok(())).unwrap();
}

#[tokio::test]
async fn test_report_queued_before_pause_does_not_undo_it() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = started(&worker, &bus, "s1").await;

    // sent by the worker before it saw the pause
    emit_progress(&bus, "s1", ScanStatus::Scanning, 30.0);
    controller.pause().await.unwrap();
    assert!(controller.is_confirmed());

    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Paused);
    assert_eq!(controller.progress().unwrap().percent, 30.0);

    controller.resume().await.unwrap();
    assert_eq!(worker.calls_to("disk_scan_resume"), vec![json!({ "scanId": "s1" })]);
    assert_eq!(controller.status(), ScanStatus::Scanning);

    // same race the other way round
    emit_progress(&bus, "s1", ScanStatus::Paused, 31.0);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Scanning);

    // once the worker has caught up its reports count again
    emit_progress(&bus, "s1", ScanStatus::Scanning, 40.0);
    emit_progress(&bus, "s1", ScanStatus::Paused, 45.0);
    controller.pump();
    assert_eq!(controller.status(), ScanStatus::Paused);
}

#[tokio::test]
async fn test_residue_progress_without_status_keeps_pause() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = ScanController::new(ResidueOps::new(worker.clone()), bus.clone());
    controller.setup_listeners();

    worker.reply("residue_scan_start", json!("r1"));
    controller.start(&ResidueParams::default()).await.unwrap();
    controller.pause().await.unwrap();

    let domain = ScanDomain::SoftwareResidue;
    bus.emit(
        domain.progress_channel(),
        json!({
            "scan_id": "r1",
            "percent": 40.0,
            "current_phase": "files",
            "current_path": "/opt/old-app",
            "scanned_count": 10,
            "found_count": 1,
            "elapsed_time": 900
        }),
    );
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.status(), ScanStatus::Paused);

    controller.resume().await.unwrap();
    assert_eq!(worker.calls_to("residue_scan_resume").len(), 1);
}

#[tokio::test]
async fn test_scan_finishing_before_start_ack_is_kept() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    let ticket = controller.begin_start().unwrap();
    emit_progress(&bus, "s1", ScanStatus::Completed, 100.0);
    emit_complete(&bus, "s1", vec![category("docs", 3, 3)]);
    assert_eq!(controller.pump(), 2);
    assert_eq!(controller.status(), ScanStatus::Completed);

    let outcome = controller
        .finish_start(ticket, Ok(SessionId::new("s1")))
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started(SessionId::new("s1")));
    assert_eq!(controller.session_id().map(SessionId::as_str), Some("s1"));
    assert_eq!(controller.status(), ScanStatus::Completed);
    assert_eq!(controller.result().unwrap().total_files, 3);
    assert!(worker.calls_to("disk_scan_cancel").is_empty());
}

#[tokio::test]
async fn test_cancelled_session_finishing_during_next_start_is_discarded() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    let first = controller.begin_start().unwrap();
    assert!(controller.begin_control(ControlOp::Cancel).is_none());
    let second = controller.begin_start().unwrap();

    // the cancelled scan still completes and is taken for the new one
    emit_complete(&bus, "A", vec![category("docs", 2, 2)]);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.session_id().map(SessionId::as_str), Some("A"));

    let outcome = controller.finish_start(first, Ok(SessionId::new("A"))).unwrap();
    assert_eq!(outcome, StartOutcome::Abandoned(Some(SessionId::new("A"))));
    assert!(controller.session_id().is_none());
    assert!(controller.result().is_none());
    assert_eq!(controller.status(), ScanStatus::Scanning);
    assert_eq!(controller.pending(), Some(PendingCommand::Start));

    let outcome = controller.finish_start(second, Ok(SessionId::new("B"))).unwrap();
    assert_eq!(outcome, StartOutcome::Started(SessionId::new("B")));
    assert!(controller.is_confirmed());

    emit_progress(&bus, "B", ScanStatus::Scanning, 10.0);
    emit_complete(&bus, "A", vec![category("docs", 2, 2)]);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.progress().unwrap().session_id.as_str(), "B");
    assert!(controller.result().is_none());
}

#[tokio::test]
async fn test_new_start_ack_replaces_adopted_foreign_result() {
    let worker = Arc::new(Scripted::default());
    let bus = EventBus::new();
    let mut controller = classification(&worker, &bus);

    let first = controller.begin_start().unwrap();
    assert!(controller.begin_control(ControlOp::Cancel).is_none());
    let second = controller.begin_start().unwrap();

    emit_complete(&bus, "A", vec![category("docs", 2, 2)]);
    controller.pump();
    controller.select_all();

    let outcome = controller.finish_start(second, Ok(SessionId::new("B"))).unwrap();
    assert_eq!(outcome, StartOutcome::Started(SessionId::new("B")));
    assert_eq!(controller.status(), ScanStatus::Scanning);
    assert!(controller.result().is_none());
    assert_eq!(controller.selected_count(), 0);

    let outcome = controller.finish_start(first, Ok(SessionId::new("A"))).unwrap();
    assert_eq!(outcome, StartOutcome::Abandoned(Some(SessionId::new("A"))));
    assert_eq!(controller.session_id().map(SessionId::as_str), Some("B"));

    emit_complete(&bus, "B", vec![category("video", 4, 4)]);
    assert_eq!(controller.pump(), 1);
    assert_eq!(controller.result().unwrap().session_id.as_str(), "B");
}
