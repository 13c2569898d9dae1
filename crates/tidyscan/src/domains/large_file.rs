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
pub struct LargeFileParams {
    pub path: String,
    /// Minimum size in bytes for a file to be reported
    pub threshold: u64,
}

impl Default for LargeFileParams {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            threshold: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
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
    speed: f64,
    status: Option<WireStatus>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    scan_id: String,
    files: Vec<WireFile>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    path: String,
    #[serde(default)]
    name: String,
    size: u64,
    #[serde(default)]
    modified_time: i64,
    #[serde(default)]
    file_type: String,
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
            speed: wire.speed,
            phase: None,
            message: None,
        }
    }
}

/// Large files arrive as one flat list; they are grouped by `file_type`.
fn group_by_type(files: Vec<WireFile>) -> Vec<Category> {
    let mut groups: Vec<(String, Vec<FileEntry>)> = Vec::new();
    for file in files {
        let key = if file.file_type.is_empty() {
            "other".to_string()
        } else {
            file.file_type
        };
        let mut entry = FileEntry::from_path(file.path, file.size, file.modified_time);
        if !file.name.is_empty() {
            entry.name = file.name;
        }

        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, entries)) => entries.push(entry),
            None => groups.push((key, vec![entry])),
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

pub struct LargeFileOps<I> {
    worker: Worker<I>,
}

impl<I: Invoker> LargeFileOps<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            worker: Worker::new(invoker, ScanDomain::LargeFile),
        }
    }
}

#[async_trait]
impl<I: Invoker> DomainOps for LargeFileOps<I> {
    type Params = LargeFileParams;

    fn domain(&self) -> ScanDomain {
        ScanDomain::LargeFile
    }

    async fn start(&self, params: &LargeFileParams) -> Result<SessionId, BackendError> {
        self.worker
            .start(json!({ "path": params.path, "threshold": params.threshold }))
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
        Ok(wire.map(|w| ScanResult::new(w.scan_id.into(), group_by_type(w.files), w.duration_ms)))
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
        Ok(ScanResult::new(wire.scan_id.into(), group_by_type(wire.files), wire.duration_ms))
    }
}

pub fn encode_progress(progress: &ScanProgress) -> Value {
    json!({
        "scan_id": progress.session_id,
        "current_path": progress.current_path,
        "scanned_files": progress.scanned_count,
        "found_files": progress.found_count,
        "scanned_size": progress.scanned_size,
        "total_size": progress.total_size,
        "percent": progress.percent,
        "speed": progress.speed,
        "status": progress.status,
    })
}

pub fn encode_result(result: &ScanResult) -> Value {
    let files: Vec<Value> = result
        .categories
        .iter()
        .flat_map(|category| {
            category.files.iter().map(move |file| {
                json!({
                    "path": file.path,
                    "name": file.name,
                    "size": file.size,
                    "modified_time": file.modified_time,
                    "file_type": category.key,
                })
            })
        })
        .collect();

    json!({
        "scan_id": result.session_id,
        "total_files": result.total_files,
        "total_size": result.total_size,
        "files": files,
        "duration_ms": result.duration_ms,
    })
}
