//! Per-domain worker adapters.
//!
//! Every scan domain exposes the same command contract under its own command
//! prefix and push channels, but with its own payload shapes. [`DomainOps`]
//! is that contract expressed against the shared model; the submodules map
//! each domain's wire format onto it.

use crate::error::BackendError;
use crate::ipc::Invoker;
use crate::model::{
    CategoryPage, DeleteOptions, DeleteReport, FileEntry, ScanDomain, ScanProgress, ScanResult,
    ScanStatus, SessionId,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub mod app_cache;
pub mod classification;
pub mod junk_file;
pub mod large_file;
pub mod residue;

pub use app_cache::{AppCacheOps, AppCacheParams};
pub use classification::{ClassificationOps, ClassificationParams};
pub use junk_file::{JunkFileOps, JunkFileParams};
pub use large_file::{LargeFileOps, LargeFileParams};
pub use residue::{ResidueOps, ResidueParams};

/// Backend operations of one scan domain.
#[async_trait]
pub trait DomainOps: Send + Sync {
    /// Arguments of the start command
    type Params: Clone + Send + Sync;

    fn domain(&self) -> ScanDomain;

    async fn start(&self, params: &Self::Params) -> Result<SessionId, BackendError>;

    async fn pause(&self, id: &SessionId) -> Result<(), BackendError>;

    async fn resume(&self, id: &SessionId) -> Result<(), BackendError>;

    async fn cancel(&self, id: &SessionId) -> Result<(), BackendError>;

    async fn progress(&self, id: &SessionId) -> Result<Option<ScanProgress>, BackendError>;

    async fn result(&self, id: &SessionId) -> Result<Option<ScanResult>, BackendError>;

    async fn clear_result(&self, id: &SessionId) -> Result<(), BackendError>;

    /// Fetch a further page of one category. Only domains whose results are
    /// truncated per category support this.
    async fn category_files(
        &self,
        _id: &SessionId,
        category: &str,
        _offset: u64,
        _limit: u64,
    ) -> Result<Option<CategoryPage>, BackendError> {
        Err(BackendError::Unsupported(format!(
            "{} results are not paginated (category `{}`)",
            self.domain(),
            category
        )))
    }

    async fn delete(
        &self,
        session: &SessionId,
        entries: &[FileEntry],
        options: DeleteOptions,
    ) -> Result<DeleteReport, BackendError>;

    /// Safety predicate applied before deletion. `Err` carries the reason to skip.
    fn is_deletable(&self, _entry: &FileEntry) -> Result<(), String> {
        Ok(())
    }

    fn decode_progress(&self, payload: Value) -> Result<ScanProgress, BackendError>;

    fn decode_result(&self, payload: Value) -> Result<ScanResult, BackendError>;
}

/// Command plumbing shared by the adapters: naming, argument shapes and decoding.
#[derive(Debug, Clone)]
pub struct Worker<I> {
    invoker: I,
    domain: ScanDomain,
}

impl<I: Invoker> Worker<I> {
    pub fn new(invoker: I, domain: ScanDomain) -> Self {
        Self { invoker, domain }
    }

    pub fn domain(&self) -> ScanDomain {
        self.domain
    }

    pub fn command(&self, op: &str) -> String {
        format!("{}_{}", self.domain.command_prefix(), op)
    }

    pub async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T, BackendError> {
        let value = self.invoker.invoke(command, args).await?;
        decode(command, value)
    }

    pub async fn start(&self, args: Value) -> Result<SessionId, BackendError> {
        let command = self.command("start");
        let id: String = self.call(&command, args).await?;
        if id.is_empty() {
            return Err(BackendError::command(command, "worker returned an empty scan id"));
        }
        Ok(SessionId::from(id))
    }

    /// Fire a command whose response carries nothing
    pub async fn control(&self, op: &str, id: &SessionId) -> Result<(), BackendError> {
        self.invoker.invoke(&self.command(op), id_args(id)).await?;
        Ok(())
    }

    pub async fn fetch<W: DeserializeOwned>(&self, op: &str, id: &SessionId) -> Result<Option<W>, BackendError> {
        self.call(&self.command(op), id_args(id)).await
    }

    /// The generic `delete_files` command, addressed by path
    pub async fn delete_files(&self, entries: &[FileEntry], options: DeleteOptions) -> Result<DeleteReport, BackendError> {
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        self.call(
            DELETE_FILES,
            json!({ "paths": paths, "moveToRecycleBin": options.move_to_recycle_bin }),
        )
        .await
    }
}

pub const DELETE_FILES: &str = "delete_files";

pub fn id_args(id: &SessionId) -> Value {
    json!({ "scanId": id })
}

pub fn decode<T: DeserializeOwned>(command: &str, value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|source| BackendError::Decode {
        command: command.to_string(),
        source,
    })
}

/// Status as the worker spells it. `stopped` is accepted as a synonym for cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WireStatus {
    Idle,
    Scanning,
    Paused,
    Completed,
    #[serde(alias = "stopped")]
    Cancelled,
    Error,
}

impl From<WireStatus> for ScanStatus {
    fn from(status: WireStatus) -> Self {
        match status {
            WireStatus::Idle => ScanStatus::Idle,
            WireStatus::Scanning => ScanStatus::Scanning,
            WireStatus::Paused => ScanStatus::Paused,
            WireStatus::Completed => ScanStatus::Completed,
            WireStatus::Cancelled => ScanStatus::Cancelled,
            WireStatus::Error => ScanStatus::Error,
        }
    }
}

/// Title-case a snake_case key for display ("old_logs" -> "Old logs")
pub(crate) fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Wire-format encoders used by the simulated worker to speak each domain's dialect.
pub mod wire {
    use super::*;

    pub fn progress(domain: ScanDomain, progress: &ScanProgress) -> Value {
        match domain {
            ScanDomain::LargeFile => large_file::encode_progress(progress),
            ScanDomain::JunkFile => junk_file::encode_progress(progress),
            ScanDomain::AppCache => app_cache::encode_progress(progress),
            ScanDomain::SoftwareResidue => residue::encode_progress(progress),
            ScanDomain::FileClassification => classification::encode_progress(progress),
        }
    }

    pub fn result(domain: ScanDomain, result: &ScanResult) -> Value {
        match domain {
            ScanDomain::LargeFile => large_file::encode_result(result),
            ScanDomain::JunkFile => junk_file::encode_result(result),
            ScanDomain::AppCache => app_cache::encode_result(result),
            ScanDomain::SoftwareResidue => residue::encode_result(result),
            ScanDomain::FileClassification => classification::encode_result(result),
        }
    }

    pub fn page(files: &[FileEntry], total: u64, has_more: bool) -> Value {
        classification::encode_page(files, total, has_more)
    }
}

/// Invoker for decode-only tests; every command fails
#[cfg(test)]
pub(crate) struct Offline;

#[cfg(test)]
#[async_trait]
impl Invoker for Offline {
    async fn invoke(&self, _command: &str, _args: Value) -> Result<Value, BackendError> {
        Err(BackendError::Unavailable("offline".into()))
    }
}
