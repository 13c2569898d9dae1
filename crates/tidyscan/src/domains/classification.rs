//! Whole-disk classification. The only domain whose categories arrive truncated
//! and are paged in on demand.

use super::{DomainOps, WireStatus, Worker};
use crate::error::BackendError;
use crate::ipc::Invoker;
use crate::model::{
    Category, CategoryPage, DeleteOptions, DeleteReport, FailedItem, FileEntry, ScanDomain,
    ScanProgress, ScanResult, ScanStatus, SessionId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationParams {
    pub paths: Vec<String>,
    /// `quick`, `full` or `custom`
    pub mode: String,
    pub include_hidden: bool,
    pub include_system: bool,
    pub exclude_paths: Vec<String>,
}

impl Default for ClassificationParams {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            mode: "quick".to_string(),
            include_hidden: false,
            include_system: false,
            exclude_paths: Vec::new(),
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
    scanned_size: u64,
    #[serde(default)]
    total_files: u64,
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
    categories: Vec<WireCategory>,
    #[serde(default)]
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    name: String,
    #[serde(default)]
    display_name: String,
    file_count: u64,
    total_size: u64,
    files: Vec<WireFile>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    path: String,
    #[serde(default)]
    name: String,
    size: u64,
    #[serde(default)]
    modified_time: i64,
}

#[derive(Debug, Deserialize)]
struct WirePage {
    files: Vec<WireFile>,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct WireCleanResult {
    cleaned_files: u64,
    cleaned_size: u64,
    failed_files: u64,
    #[serde(default)]
    errors: Vec<WireCleanError>,
}

#[derive(Debug, Deserialize)]
struct WireCleanError {
    path: String,
    #[serde(default)]
    error_code: String,
    error_message: String,
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
            phase: None,
            message: None,
        }
    }
}

impl From<WireFile> for FileEntry {
    fn from(wire: WireFile) -> Self {
        let mut entry = FileEntry::from_path(wire.path, wire.size, wire.modified_time);
        if !wire.name.is_empty() {
            entry.name = wire.name;
        }
        entry
    }
}

impl From<WireCategory> for Category {
    fn from(wire: WireCategory) -> Self {
        let display_name = if wire.display_name.is_empty() {
            super::humanize(&wire.name)
        } else {
            wire.display_name
        };
        let mut category = Category {
            key: wire.name,
            display_name,
            files: wire.files.into_iter().map(Into::into).collect(),
            file_count: wire.file_count,
            total_size: wire.total_size,
            has_more: wire.has_more,
        };
        category.enforce_count();
        category
    }
}

impl From<WireResult> for ScanResult {
    fn from(wire: WireResult) -> Self {
        ScanResult::new(
            wire.scan_id.into(),
            wire.categories.into_iter().map(Into::into).collect(),
            wire.duration,
        )
    }
}

impl From<WireCleanResult> for DeleteReport {
    fn from(wire: WireCleanResult) -> Self {
        DeleteReport {
            deleted_count: wire.cleaned_files,
            deleted_size: wire.cleaned_size,
            failed_count: wire.failed_files,
            failed_items: wire
                .errors
                .into_iter()
                .map(|e| FailedItem {
                    id: String::new(),
                    path: e.path,
                    error: if e.error_code.is_empty() {
                        e.error_message
                    } else {
                        format!("{}: {}", e.error_code, e.error_message)
                    },
                })
                .collect(),
        }
    }
}

pub struct ClassificationOps<I> {
    worker: Worker<I>,
}

impl<I: Invoker> ClassificationOps<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            worker: Worker::new(invoker, ScanDomain::FileClassification),
        }
    }
}

#[async_trait]
impl<I: Invoker> DomainOps for ClassificationOps<I> {
    type Params = ClassificationParams;

    fn domain(&self) -> ScanDomain {
        ScanDomain::FileClassification
    }

    async fn start(&self, params: &ClassificationParams) -> Result<SessionId, BackendError> {
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

    async fn result(&self, id: &SessionId) -> Result<Option<ScanResult>, BackendError> {
        let wire: Option<WireResult> = self.worker.fetch("result", id).await?;
        Ok(wire.map(Into::into))
    }

    async fn clear_result(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("clear_result", id).await
    }

    async fn category_files(
        &self,
        id: &SessionId,
        category: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Option<CategoryPage>, BackendError> {
        let command = self.worker.command("category_files");
        let page: Option<WirePage> = self
            .worker
            .call(
                &command,
                json!({
                    "scanId": id,
                    "categoryName": category,
                    "offset": offset,
                    "limit": limit,
                }),
            )
            .await?;

        Ok(page.map(|page| CategoryPage {
            files: page.files.into_iter().map(Into::into).collect(),
            has_more: page.has_more,
        }))
    }

    async fn delete(
        &self,
        session: &SessionId,
        entries: &[FileEntry],
        options: DeleteOptions,
    ) -> Result<DeleteReport, BackendError> {
        let command = self.worker.command("delete_selected");
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        let wire: WireCleanResult = self
            .worker
            .call(
                &command,
                json!({
                    "scanId": session,
                    "filePaths": paths,
                    "moveToTrash": options.move_to_recycle_bin,
                }),
            )
            .await?;
        Ok(wire.into())
    }

    fn decode_progress(&self, payload: Value) -> Result<ScanProgress, BackendError> {
        let wire: WireProgress = super::decode(self.domain().progress_channel(), payload)?;
        Ok(wire.into())
    }

    fn decode_result(&self, payload: Value) -> Result<ScanResult, BackendError> {
        let wire: WireResult = super::decode(self.domain().complete_channel(), payload)?;
        Ok(wire.into())
    }
}

fn encode_file(file: &FileEntry, category: &str) -> Value {
    json!({
        "path": file.path,
        "name": file.name,
        "size": file.size,
        "modified_time": file.modified_time,
        "category": category,
    })
}

pub fn encode_progress(progress: &ScanProgress) -> Value {
    json!({
        "scan_id": progress.session_id,
        "current_path": progress.current_path,
        "scanned_files": progress.scanned_count,
        "scanned_size": progress.scanned_size,
        "total_files": progress.found_count,
        "total_size": progress.total_size,
        "percent": progress.percent,
        "speed": progress.speed,
        "status": progress.status,
    })
}

pub fn encode_result(result: &ScanResult) -> Value {
    let categories: Vec<Value> = result
        .categories
        .iter()
        .map(|category| {
            let files: Vec<Value> = category
                .files
                .iter()
                .map(|file| encode_file(file, &category.key))
                .collect();
            json!({
                "name": category.key,
                "display_name": category.display_name,
                "description": "",
                "file_count": category.file_count,
                "total_size": category.total_size,
                "files": files,
                "has_more": category.has_more,
            })
        })
        .collect();

    json!({
        "scan_id": result.session_id,
        "start_time": 0,
        "end_time": result.duration_ms,
        "total_files": result.total_files,
        "total_size": result.total_size,
        "total_folders": 0,
        "categories": categories,
        "status": "completed",
        "duration": result.duration_ms,
    })
}

pub fn encode_page(files: &[FileEntry], total: u64, has_more: bool) -> Value {
    let files: Vec<Value> = files.iter().map(|file| encode_file(file, "")).collect();
    json!({ "files": files, "total": total, "has_more": has_more })
}
