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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppCacheParams {
    /// Messaging apps to scan (`wechat`, `qq`, ...). Empty means all.
    pub apps: Vec<String>,
    pub categories: Vec<String>,
    pub incremental: bool,
    pub force_rescan: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProgress {
    scan_id: String,
    status: Option<WireStatus>,
    #[serde(default)]
    current_path: String,
    #[serde(default)]
    scanned_files: u64,
    #[serde(default)]
    scanned_size: u64,
    #[serde(default)]
    total_files: u64,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    percent: f32,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    current_app: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    scan_id: String,
    files: Vec<WireFile>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    id: String,
    path: String,
    #[serde(default)]
    name: String,
    size: u64,
    category: String,
    #[serde(default)]
    app: String,
    #[serde(default)]
    chat_object: String,
    #[serde(default)]
    modified_at: i64,
}

impl From<WireProgress> for ScanProgress {
    fn from(wire: WireProgress) -> Self {
        ScanProgress {
            session_id: SessionId::from(wire.scan_id),
            status: wire.status.map_or(ScanStatus::Scanning, Into::into),
            status_reported: wire.status.is_some(),
            current_path: wire.current_path,
            scanned_count: wire.scanned_files,
            found_count: wire.total_files,
            scanned_size: wire.scanned_size,
            total_size: wire.total_size,
            percent: wire.percent,
            speed: wire.speed,
            phase: (!wire.current_app.is_empty()).then_some(wire.current_app),
            message: None,
        }
    }
}

fn detail(app: &str, chat_object: &str) -> Option<String> {
    match (app.is_empty(), chat_object.is_empty()) {
        (true, true) => None,
        (false, true) => Some(app.to_string()),
        (true, false) => Some(chat_object.to_string()),
        (false, false) => Some(format!("{} / {}", app, chat_object)),
    }
}

/// Cache files are grouped by their clean category (chat images, videos, ...).
fn group_by_category(files: Vec<WireFile>) -> Vec<Category> {
    let mut groups: Vec<(String, Vec<FileEntry>)> = Vec::new();
    for file in files {
        let mut entry = FileEntry::from_path(file.path, file.size, file.modified_at);
        // The same attachment can be cached by several chats
        entry.id = file.id;
        if !file.name.is_empty() {
            entry.name = file.name;
        }
        entry.detail = detail(&file.app, &file.chat_object);

        match groups.iter_mut().find(|(key, _)| *key == file.category) {
            Some((_, entries)) => entries.push(entry),
            None => groups.push((file.category, vec![entry])),
        }
    }

    groups
        .into_iter()
        .map(|(key, entries)| {
            let display = humanize(&key);
            Category::complete(key, display, entries)
        })
        .collect()
}

pub struct AppCacheOps<I> {
    worker: Worker<I>,
}

impl<I: Invoker> AppCacheOps<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            worker: Worker::new(invoker, ScanDomain::AppCache),
        }
    }
}

#[async_trait]
impl<I: Invoker> DomainOps for AppCacheOps<I> {
    type Params = AppCacheParams;

    fn domain(&self) -> ScanDomain {
        ScanDomain::AppCache
    }

    async fn start(&self, params: &AppCacheParams) -> Result<SessionId, BackendError> {
        self.worker
            .start(json!({
                "apps": params.apps,
                "categories": params.categories,
                "incremental": params.incremental,
                "forceRescan": params.force_rescan,
            }))
            .await
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

    async fn result(&self, id: &SessionId) -> Result<Option<ScanResult>, BackendError> {
        let wire: Option<WireResult> = self.worker.fetch("result", id).await?;
        Ok(wire.map(|w| ScanResult::new(w.scan_id.into(), group_by_category(w.files), w.duration_ms)))
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

    fn decode_progress(&self, payload: Value) -> Result<ScanProgress, BackendError> {
        let wire: WireProgress = super::decode(self.domain().progress_channel(), payload)?;
        Ok(wire.into())
    }

    fn decode_result(&self, payload: Value) -> Result<ScanResult, BackendError> {
        let wire: WireResult = super::decode(self.domain().complete_channel(), payload)?;
        Ok(ScanResult::new(
            wire.scan_id.into(),
            group_by_category(wire.files),
            wire.duration_ms,
        ))
    }
}

pub fn encode_progress(progress: &ScanProgress) -> Value {
    json!({
        "scanId": progress.session_id,
        "status": progress.status,
        "currentPath": progress.current_path,
        "scannedFiles": progress.scanned_count,
        "scannedSize": progress.scanned_size,
        "totalFiles": progress.found_count,
        "totalSize": progress.total_size,
        "percent": progress.percent,
        "speed": progress.speed,
        "currentApp": progress.phase.clone().unwrap_or_default(),
        "incremental": false,
        "skippedFiles": 0,
    })
}

pub fn encode_result(result: &ScanResult) -> Value {
    let files: Vec<Value> = result
        .categories
        .iter()
        .flat_map(|category| {
            category.files.iter().map(move |file| {
                json!({
                    "id": file.id,
                    "path": file.path,
                    "name": file.name,
                    "size": file.size,
                    "category": category.key,
                    "app": file.detail.clone().unwrap_or_default(),
                    "chatObject": "",
                    "createdAt": file.modified_time,
                    "modifiedAt": file.modified_time,
                })
            })
        })
        .collect();

    json!({
        "scanId": result.session_id,
        "files": files,
        "totalFiles": result.total_files,
        "totalSize": result.total_size,
        "durationMs": result.duration_ms,
        "status": "completed",
        "incremental": false,
        "skippedFiles": 0,
    })
}
