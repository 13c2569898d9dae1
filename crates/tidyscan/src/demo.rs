//! Simulated worker that speaks every domain's command set and pushes events
//! on the domain channels, without touching the filesystem.
//!
//! Useful for trying the session layer end to end and for tests.

use crate::domains::{self, residue, wire, DELETE_FILES};
use crate::error::BackendError;
use crate::ipc::{EventBus, Invoker};
use crate::model::{
    Category, DeleteReport, EntryKind, FailedItem, FileEntry, ScanDomain, ScanProgress, ScanResult,
    ScanStatus, SessionId,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Category keys to produce. Empty picks a set that fits the domain.
    pub categories: Vec<String>,
    pub files_per_category: usize,
    /// Progress events per scan
    pub steps: u32,
    pub step_delay: Duration,
    /// Files per category in a classification result; the rest is paged
    pub initial_page: usize,
    pub fail_start: bool,
    /// Every n-th target of a delete call fails
    pub fail_every: Option<usize>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            files_per_category: 40,
            steps: 5,
            step_delay: Duration::from_millis(50),
            initial_page: 100,
            fail_start: false,
            fail_every: None,
        }
    }
}

impl DemoConfig {
    pub fn category_keys(&self, domain: ScanDomain) -> Vec<String> {
        if !self.categories.is_empty() {
            return self.categories.clone();
        }
        let keys: &[&str] = match domain {
            ScanDomain::LargeFile => &["video", "archive", "disk_image"],
            ScanDomain::JunkFile => &["temp_files", "old_logs", "old_installers"],
            ScanDomain::AppCache => &["chat_images", "chat_videos", "chat_files"],
            ScanDomain::SoftwareResidue => &["leftover_folder", "registry_key", "cache_file"],
            ScanDomain::FileClassification => &["video", "image", "document", "archive"],
        };
        keys.iter().map(|k| k.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Paused,
    Cancelled,
}

struct DemoSession {
    domain: ScanDomain,
    control: watch::Sender<RunState>,
    progress: Option<ScanProgress>,
    /// Everything the scan finds, untruncated
    catalog: ScanResult,
    finished: bool,
}

struct Inner {
    bus: EventBus,
    config: DemoConfig,
    sessions: Mutex<HashMap<String, DemoSession>>,
}

fn lock(sessions: &Mutex<HashMap<String, DemoSession>>) -> MutexGuard<'_, HashMap<String, DemoSession>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct DemoWorker {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdArgs {
    scan_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageArgs {
    scan_id: String,
    category_name: String,
    offset: u64,
    limit: u64,
}

#[derive(Deserialize)]
struct PathArgs {
    paths: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemArgs {
    item_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectedArgs {
    file_paths: Vec<String>,
}

impl DemoWorker {
    pub fn new(bus: EventBus, config: DemoConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Sessions the worker still holds state for
    pub fn session_count(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    fn start(&self, command: &str, domain: ScanDomain) -> Result<Value, BackendError> {
        if self.inner.config.fail_start {
            return Err(BackendError::command(command, "demo worker refused to start"));
        }

        let id = Uuid::new_v4().to_string();
        let catalog = catalog(&self.inner.config, domain, SessionId::new(id.clone()));
        let (control, receiver) = watch::channel(RunState::Running);

        lock(&self.inner.sessions).insert(
            id.clone(),
            DemoSession {
                domain,
                control,
                progress: None,
                catalog,
                finished: false,
            },
        );

        info!("Demo {} scan {} started", domain, id);
        tokio::spawn(run_scan(self.inner.clone(), id.clone(), receiver));
        Ok(json!(id))
    }

    fn control(&self, command: &str, args: Value, state: RunState) -> Result<Value, BackendError> {
        let args: IdArgs = domains::decode(command, args)?;
        let event = {
            let mut sessions = lock(&self.inner.sessions);
            let session = sessions
                .get_mut(&args.scan_id)
                .ok_or_else(|| BackendError::command(command, format!("unknown scan {}", args.scan_id)))?;
            if session.finished {
                debug!("{} after scan {} finished", command, args.scan_id);
                return Ok(Value::Null);
            }
            session.control.send_replace(state);

            let status = match state {
                RunState::Running => ScanStatus::Scanning,
                RunState::Paused => ScanStatus::Paused,
                RunState::Cancelled => ScanStatus::Cancelled,
            };
            if state == RunState::Cancelled {
                session.finished = true;
            }
            let progress = session
                .progress
                .get_or_insert_with(|| ScanProgress::new(SessionId::new(args.scan_id.clone()), status));
            progress.status = status;
            (session.domain, progress.clone())
        };

        let (domain, progress) = event;
        self.inner
            .bus
            .emit(domain.progress_channel(), wire::progress(domain, &progress));
        Ok(Value::Null)
    }

    fn progress(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        let args: IdArgs = domains::decode(command, args)?;
        let sessions = lock(&self.inner.sessions);
        Ok(sessions
            .get(&args.scan_id)
            .and_then(|s| s.progress.as_ref().map(|p| wire::progress(s.domain, p)))
            .unwrap_or(Value::Null))
    }

    fn result(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        let args: IdArgs = domains::decode(command, args)?;
        let sessions = lock(&self.inner.sessions);
        let Some(session) = sessions.get(&args.scan_id).filter(|s| s.finished) else {
            return Ok(Value::Null);
        };
        if session.progress.as_ref().map(|p| p.status) != Some(ScanStatus::Completed) {
            return Ok(Value::Null);
        }

        let result = truncated(&self.inner.config, session.domain, &session.catalog);
        let mut payload = wire::result(session.domain, &result);
        // These two answer the query with the bare group list
        match session.domain {
            ScanDomain::JunkFile | ScanDomain::SoftwareResidue => Ok(payload["results"].take()),
            _ => Ok(payload),
        }
    }

    fn clear(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        let args: IdArgs = domains::decode(command, args)?;
        if let Some(session) = lock(&self.inner.sessions).remove(&args.scan_id) {
            session.control.send_replace(RunState::Cancelled);
            debug!("Cleared demo scan {}", args.scan_id);
        }
        Ok(Value::Null)
    }

    fn category_files(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        let args: PageArgs = domains::decode(command, args)?;
        let sessions = lock(&self.inner.sessions);
        let Some(category) = sessions
            .get(&args.scan_id)
            .and_then(|s| s.catalog.category(&args.category_name))
        else {
            return Ok(Value::Null);
        };

        let total = category.files.len() as u64;
        let start = args.offset.min(total) as usize;
        let end = args.offset.saturating_add(args.limit).min(total) as usize;
        Ok(wire::page(&category.files[start..end], total, (end as u64) < total))
    }

    /// Remove the targets from every held catalog. `by_id` picks the key the
    /// caller addressed them with.
    fn remove(&self, targets: &[String], by_id: bool) -> DeleteReport {
        let mut report = DeleteReport::default();
        let mut sessions = lock(&self.inner.sessions);

        for (index, target) in targets.iter().enumerate() {
            let refused = self
                .inner
                .config
                .fail_every
                .is_some_and(|n| n > 0 && (index + 1) % n == 0);

            let removed = if refused {
                None
            } else {
                sessions
                    .values_mut()
                    .find_map(|session| take_entry(&mut session.catalog, target, by_id))
            };

            match removed {
                Some(entry) => {
                    report.deleted_count += 1;
                    report.deleted_size += entry.size;
                }
                None => {
                    report.failed_count += 1;
                    let error = if refused { "file in use" } else { "not found" };
                    report.failed_items.push(FailedItem {
                        id: if by_id { target.clone() } else { String::new() },
                        path: if by_id { String::new() } else { target.clone() },
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            "Demo delete: {} removed, {} failed",
            report.deleted_count, report.failed_count
        );
        report
    }

    fn encode_report(command: &str, report: &DeleteReport) -> Result<Value, BackendError> {
        serde_json::to_value(report).map_err(|source| BackendError::Decode {
            command: command.to_string(),
            source,
        })
    }
}

fn take_entry(catalog: &mut ScanResult, target: &str, by_id: bool) -> Option<FileEntry> {
    for category in catalog.categories.iter_mut() {
        let position = category
            .files
            .iter()
            .position(|f| if by_id { f.id == target } else { f.path == target });
        if let Some(position) = position {
            let entry = category.files.remove(position);
            category.file_count = category.file_count.saturating_sub(1);
            category.total_size = category.total_size.saturating_sub(entry.size);
            catalog.categories.retain(|c| c.file_count > 0);
            catalog.recompute_totals();
            return Some(entry);
        }
    }
    None
}

#[async_trait]
impl Invoker for DemoWorker {
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BackendError> {
        debug!("Demo worker received {}", command);

        if command == DELETE_FILES {
            let args: PathArgs = domains::decode(command, args)?;
            return Self::encode_report(command, &self.remove(&args.paths, false));
        }
        if command == residue::DELETE_ITEMS {
            let args: ItemArgs = domains::decode(command, args)?;
            return Self::encode_report(command, &self.remove(&args.item_ids, true));
        }

        let Some((domain, op)) = ScanDomain::ALL.iter().find_map(|domain| {
            command
                .strip_prefix(domain.command_prefix())
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|op| (*domain, op))
        }) else {
            return Err(BackendError::Unsupported(format!("unknown command {}", command)));
        };

        match op {
            "start" => self.start(command, domain),
            "pause" => self.control(command, args, RunState::Paused),
            "resume" => self.control(command, args, RunState::Running),
            "cancel" => self.control(command, args, RunState::Cancelled),
            "progress" => self.progress(command, args),
            "result" => self.result(command, args),
            "clear" | "clear_result" => self.clear(command, args),
            "category_files" if domain == ScanDomain::FileClassification => {
                self.category_files(command, args)
            }
            "delete_selected" if domain == ScanDomain::FileClassification => {
                let args: SelectedArgs = domains::decode(command, args)?;
                let report = self.remove(&args.file_paths, false);
                let errors: Vec<Value> = report
                    .failed_items
                    .iter()
                    .map(|f| json!({ "path": f.path, "error_code": "E_DEMO", "error_message": f.error }))
                    .collect();
                Ok(json!({
                    "cleaned_files": report.deleted_count,
                    "cleaned_size": report.deleted_size,
                    "failed_files": report.failed_count,
                    "errors": errors,
                }))
            }
            _ => Err(BackendError::Unsupported(format!("unknown command {}", command))),
        }
    }
}

/// Step through the scan, honouring pause and cancel, then publish the result.
async fn run_scan(inner: Arc<Inner>, id: String, mut control: watch::Receiver<RunState>) {
    let steps = inner.config.steps.max(1);
    let mut step = 0;

    while step < steps {
        let state = *control.borrow_and_update();
        match state {
            RunState::Cancelled => return,
            RunState::Paused => {
                if control.changed().await.is_err() {
                    return;
                }
                continue;
            }
            RunState::Running => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.config.step_delay) => {}
            changed = control.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        }

        step += 1;
        report_step(&inner, &id, step, steps);
    }

    complete(&inner, &id);
}

fn report_step(inner: &Inner, id: &str, step: u32, steps: u32) {
    let event = {
        let mut sessions = lock(&inner.sessions);
        let Some(session) = sessions.get_mut(id) else {
            return;
        };

        let total = session.catalog.total_files;
        let done = total * u64::from(step) / u64::from(steps);
        let mut progress = ScanProgress::new(SessionId::new(id), ScanStatus::Scanning);
        progress.scanned_count = done;
        progress.found_count = done;
        progress.scanned_size = session.catalog.total_size * u64::from(step) / u64::from(steps);
        progress.total_size = session.catalog.total_size;
        progress.percent = step as f32 * 100.0 / steps as f32;
        progress.current_path = session
            .catalog
            .loaded_entries()
            .nth(done.saturating_sub(1) as usize)
            .map(|f| f.path.clone())
            .unwrap_or_default();
        progress.phase = Some(format!("pass {}/{}", step, steps));
        session.progress = Some(progress.clone());
        (session.domain, progress)
    };

    let (domain, progress) = event;
    inner
        .bus
        .emit(domain.progress_channel(), wire::progress(domain, &progress));
}

/// Progress(completed) goes out first, then the completion payload
fn complete(inner: &Inner, id: &str) {
    let event = {
        let mut sessions = lock(&inner.sessions);
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        session.finished = true;

        let mut progress = session
            .progress
            .clone()
            .unwrap_or_else(|| ScanProgress::new(SessionId::new(id), ScanStatus::Scanning));
        progress.status = ScanStatus::Completed;
        progress.percent = 100.0;
        session.progress = Some(progress.clone());

        let result = truncated(&inner.config, session.domain, &session.catalog);
        (session.domain, progress, result)
    };

    let (domain, progress, result) = event;
    info!("Demo {} scan {} completed with {} files", domain, id, result.total_files);
    inner
        .bus
        .emit(domain.progress_channel(), wire::progress(domain, &progress));
    inner
        .bus
        .emit(domain.complete_channel(), wire::result(domain, &result));
}

/// The result as published: classification categories carry only their
/// first page, everything else is sent whole.
fn truncated(config: &DemoConfig, domain: ScanDomain, catalog: &ScanResult) -> ScanResult {
    let mut result = catalog.clone();
    if domain == ScanDomain::FileClassification {
        for category in result.categories.iter_mut() {
            category.has_more = category.files.len() > config.initial_page;
            category.files.truncate(config.initial_page);
        }
    }
    result
}

fn catalog(config: &DemoConfig, domain: ScanDomain, id: SessionId) -> ScanResult {
    let categories = config
        .category_keys(domain)
        .into_iter()
        .enumerate()
        .map(|(rank, key)| {
            let files = (0..config.files_per_category)
                .map(|i| demo_entry(domain, &key, rank, i))
                .collect();
            let display = key.replace('_', " ");
            Category::complete(key, display, files)
        })
        .collect();
    ScanResult::new(id, categories, 0)
}

fn demo_entry(domain: ScanDomain, key: &str, rank: usize, index: usize) -> FileEntry {
    let size = 1024 * (rank as u64 + 1) * (index as u64 % 100 + 1);
    let mtime = 1_700_000_000_000 + index as i64 * 60_000;

    if domain == ScanDomain::SoftwareResidue && key == "registry_key" {
        let mut entry = FileEntry::from_path(format!("HKCU\\Software\\Demo\\key_{}", index), 0, mtime);
        entry.id = format!("reg-{}", index);
        entry.kind = EntryKind::RegistryKey;
        entry.detail = Some("Demo App".to_string());
        return entry;
    }

    let path = format!("/demo/{}/{}/file_{:04}.bin", domain.name(), key, index);
    let mut entry = FileEntry::from_path(path, size, mtime);
    match domain {
        ScanDomain::SoftwareResidue => {
            entry.id = format!("{}-{}", key, index);
            if key == "leftover_folder" {
                entry.kind = EntryKind::Directory;
            }
            entry.detail = Some("Demo App".to_string());
        }
        ScanDomain::AppCache => {
            entry.id = format!("{}-{}", key, index);
            entry.detail = Some("Demo Chat".to_string());
        }
        _ => {}
    }
    entry
}
