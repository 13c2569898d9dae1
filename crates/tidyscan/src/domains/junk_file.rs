use super::{humanize, DomainOps, WireStatus, Worker};
use crate::error::BackendError;
use crate::ipc::Invoker;
use crate::model::{
    Category, DeleteOptions, DeleteReport, FileEntry, ScanDomain, ScanProgress, ScanResult,
    ScanStatus, SessionId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunkFileParams {
    pub scan_paths: Vec<String>,
    pub include_empty_folders: bool,
    pub include_invalid_shortcuts: bool,
    pub include_old_logs: bool,
    pub include_old_installers: bool,
    pub include_small_files: bool,
    pub small_file_max_size: u64,
    pub log_max_age_days: u32,
    pub installer_max_age_days: u32,
    pub exclude_paths: Vec<String>,
}

impl Default for JunkFileParams {
    fn default() -> Self {
        Self {
            scan_paths: Vec::new(),
            include_empty_folders: true,
            include_invalid_shortcuts: true,
            include_old_logs: true,
            include_old_installers: true,
            include_small_files: false,
            small_file_max_size: 1024,
            log_max_age_days: 30,
            installer_max_age_days: 90,
            exclude_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProgress {
    scan_id: String,
    #[serde(default)]
    current_path: String,
    #[serde(default)]
    scanned_files: u64,
    #[serde(default)]
    found_files: u64,
    #[serde(default)]
    scanned_size: u64,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    percent: f32,
    #[serde(default)]
    current_phase: String,
    status: Option<WireStatus>,
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireComplete {
    scan_id: String,
    results: Vec<WireGroup>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireGroup {
    file_type: String,
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    path: String,
    size: u64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    modified_time: i64,
    #[serde(default = "default_safe")]
    safe_to_delete: bool,
}

fn default_safe() -> bool {
    true
}

impl From<WireProgress> for ScanProgress {
    fn from(wire: WireProgress) -> Self {
        ScanProgress {
            session_id: SessionId::from(wire.scan_id),
            status: wire.status.map_or(ScanStatus::Scanning, Into::into),
            status_reported: wire.status.is_some(),
            current_path: wire.current_path,
            scanned_count: wire.scanned_files,
            found_count: wire.found_files,
            scanned_size: wire.scanned_size,
            total_size: wire.total_size,
            percent: wire.percent,
            speed: wire.speed.unwrap_or_default(),
            phase: (!wire.current_phase.is_empty()).then_some(wire.current_phase),
            message: None,
        }
    }
}

fn categories(groups: Vec<WireGroup>) -> Vec<Category> {
    groups
        .into_iter()
        .filter(|group| !group.items.is_empty())
        .map(|group| {
            let files = group
                .items
                .into_iter()
                .map(|item| {
                    let mut entry = FileEntry::from_path(item.path, item.size, item.modified_time);
                    entry.safe_to_delete = item.safe_to_delete;
                    entry.detail = (!item.description.is_empty()).then_some(item.description);
                    entry
                })
                .collect();
            let display = humanize(&group.file_type);
            Category::complete(group.file_type, display, files)
        })
        .collect()
}

pub struct JunkFileOps<I> {
    worker: Worker<I>,
}

impl<I: Invoker> JunkFileOps<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            worker: Worker::new(invoker, ScanDomain::JunkFile),
        }
    }
}

#[async_trait]
impl<I: Invoker> DomainOps for JunkFileOps<I> {
    type Params = JunkFileParams;

    fn domain(&self) -> ScanDomain {
        ScanDomain::JunkFile
    }

    async fn start(&self, params: &JunkFileParams) -> Result<SessionId, BackendError> {
        self.worker.start(json!({ "options": params })).await
    }

    async fn pause(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("pause", id).await
    }

    async fn resume(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("resume", id).await
    }

    async fn cancel(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("cancel", id).await
    }

    async fn progress(&self, id: &SessionId) -> Result<Option<ScanProgress>, BackendError> {
        let wire: Option<WireProgress> = self.worker.fetch("progress", id).await?;
        Ok(wire.map(Into::into))
    }

    /// The query form returns the bare group list
    async fn result(&self, id: &SessionId) -> Result<Option<ScanResult>, BackendError> {
        let groups: Option<Vec<WireGroup>> = self.worker.fetch("result", id).await?;
        Ok(groups.map(|groups| ScanResult::new(id.clone(), categories(groups), 0)))
    }

    async fn clear_result(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("clear", id).await
    }

    async fn delete(
        &self,
        _session: &SessionId,
        entries: &[FileEntry],
        options: DeleteOptions,
    ) -> Result<DeleteReport, BackendError> {
        self.worker.delete_files(entries, options).await
    }

    fn is_deletable(&self, entry: &FileEntry) -> Result<(), String> {
        if entry.safe_to_delete {
            Ok(())
        } else {
            Err("flagged as risky by the scanner".to_string())
        }
    }

    fn decode_progress(&self, payload: Value) -> Result<ScanProgress, BackendError> {
        let wire: WireProgress = super::decode(self.domain().progress_channel(), payload)?;
        Ok(wire.into())
    }

    fn decode_result(&self, payload: Value) -> Result<ScanResult, BackendError> {
        let wire: WireComplete = super::decode(self.domain().complete_channel(), payload)?;
        Ok(ScanResult::new(
            wire.scan_id.into(),
            categories(wire.results),
            wire.duration_ms,
        ))
    }
}

pub fn encode_progress(progress: &ScanProgress) -> Value {
    json!({
        "scanId": progress.session_id,
        "currentPath": progress.current_path,
        "scannedFiles": progress.scanned_count,
        "foundFiles": progress.found_count,
        "scannedSize": progress.scanned_size,
        "totalSize": progress.total_size,
        "percent": progress.percent,
        "currentPhase": progress.phase.clone().unwrap_or_default(),
        "status": progress.status,
        "speed": progress.speed,
    })
}

pub fn encode_result(result: &ScanResult) -> Value {
    let results: Vec<Value> = result
        .categories
        .iter()
        .map(|category| {
            let items: Vec<Value> = category
                .files
                .iter()
                .map(|file| {
                    json!({
                        "id": file.id,
                        "path": file.path,
                        "size": file.size,
                        "file_type": category.key,
                        "description": file.detail.clone().unwrap_or_default(),
                        "modified_time": file.modified_time,
                        "safe_to_delete": file.safe_to_delete,
                    })
                })
                .collect();
            json!({
                "file_type": category.key,
                "items": items,
                "total_size": category.total_size,
                "count": category.file_count,
            })
        })
        .collect();

    json!({
        "scanId": result.session_id,
        "results": results,
        "durationMs": result.duration_ms,
    })
}
