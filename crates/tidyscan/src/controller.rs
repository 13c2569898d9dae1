//! The scan session state machine.
//!
//! ```text
//! idle -[start]-> scanning
//! scanning -[pause]-> paused
//! paused -[resume]-> scanning
//! scanning|paused -[cancel]-> cancelled
//! scanning -[progress(completed) | complete]-> completed
//! scanning|paused -[progress(error) | start failure | stall]-> error
//! completed|cancelled|error -[start]-> scanning
//! any -[reset]-> idle
//! ```
//!
//! User commands are applied optimistically: `status` changes at once and
//! `pending()` reports the command until the worker has answered. Commands
//! come in two halves (`begin_*` / `finish_*` or `confirm_*`) so callers can
//! interleave events with an outstanding call; the async wrappers run both.

use crate::cleanup::{self, CleanupOutcome};
use crate::correlator::{Listeners, SessionFilter, Verdict};
use crate::domains::DomainOps;
use crate::error::{BackendError, ErrorKind, Result, SessionError};
use crate::ipc::{EventBus, HostEvent};
use crate::model::{
    CategoryPage, DeleteOptions, ScanDomain, ScanProgress, ScanResult, ScanSession, ScanStatus,
    SessionId,
};
use crate::pagination::{CategoryLoader, PageRequest, PaginationConfig, RenderMode};
use crate::selection::{CategoryCheck, SelectionSet};
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Force `error` when a scanning session has been silent this long. `None` disables.
    pub stall_timeout: Option<Duration>,
    /// How long a stored error stays visible
    pub error_display: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Some(Duration::from_secs(300)),
            error_display: Duration::from_secs(5),
        }
    }
}

/// Displayable error kept on the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub raised_at: Instant,
}

impl ErrorNotice {
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.raised_at) >= window
    }
}

/// A user command applied locally but not yet confirmed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    Start,
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Pause,
    Resume,
    Cancel,
}

impl From<ControlOp> for PendingCommand {
    fn from(op: ControlOp) -> Self {
        match op {
            ControlOp::Pause => PendingCommand::Pause,
            ControlOp::Resume => PendingCommand::Resume,
            ControlOp::Cancel => PendingCommand::Cancel,
        }
    }
}

/// Handed out by `begin_start`, redeemed by `finish_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionId),
    /// The start was overtaken by a cancel or reset. A returned id belongs to
    /// a scan nobody tracks any more and should be cancelled.
    Abandoned(Option<SessionId>),
}

/// A control command that needs to reach the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub op: ControlOp,
    pub session_id: SessionId,
}

/// What an event did to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Progress,
    /// Progress whose status overrode the local one
    Reconciled(ScanStatus),
    Terminal(ScanStatus),
    Result,
    Ignored,
}

pub struct ScanController<D: DomainOps> {
    ops: D,
    config: SessionConfig,
    session: ScanSession,
    pending: Option<PendingCommand>,
    progress: Option<ScanProgress>,
    result: Option<ScanResult>,
    selection: SelectionSet,
    loader: CategoryLoader,
    error: Option<ErrorNotice>,
    filter: SessionFilter,
    listeners: Listeners,
    last_activity: Option<Instant>,
    next_ticket: u64,
    awaiting_ack: Option<u64>,
    /// Status before the last confirmed pause or resume. Worker reports of it
    /// were sent before the worker saw the command.
    control_latch: Option<ScanStatus>,
}

impl<D: DomainOps> ScanController<D> {
    pub fn new(ops: D, bus: EventBus) -> Self {
        Self::with_config(ops, bus, SessionConfig::default(), PaginationConfig::default())
    }

    pub fn with_config(ops: D, bus: EventBus, config: SessionConfig, pagination: PaginationConfig) -> Self {
        let domain = ops.domain();
        Self {
            ops,
            config,
            session: ScanSession::new(domain),
            pending: None,
            progress: None,
            result: None,
            selection: SelectionSet::new(),
            loader: CategoryLoader::new(pagination),
            error: None,
            filter: SessionFilter::new(),
            listeners: Listeners::new(bus),
            last_activity: None,
            next_ticket: 0,
            awaiting_ack: None,
            control_latch: None,
        }
    }

    pub fn domain(&self) -> ScanDomain {
        self.session.domain
    }

    pub fn ops(&self) -> &D {
        &self.ops
    }

    pub fn status(&self) -> ScanStatus {
        self.session.status
    }

    pub fn pending(&self) -> Option<PendingCommand> {
        self.pending
    }

    /// Status the worker has acknowledged, as opposed to an optimistic one
    pub fn is_confirmed(&self) -> bool {
        self.pending.is_none()
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.id.as_ref()
    }

    pub fn progress(&self) -> Option<&ScanProgress> {
        self.progress.as_ref()
    }

    pub fn result(&self) -> Option<&ScanResult> {
        self.result.as_ref()
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn loader(&self) -> &CategoryLoader {
        &self.loader
    }

    pub fn error(&self) -> Option<&ErrorNotice> {
        self.error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    /// Subscribe to the domain's channels. Calling it again changes nothing.
    pub fn setup_listeners(&mut self) {
        let domain = self.domain();
        if self.listeners.is_listening(domain.progress_channel())
            && self.listeners.is_listening(domain.complete_channel())
        {
            debug!("Listeners for {} already set up", domain);
            return;
        }
        self.listeners.subscribe(domain.progress_channel());
        self.listeners.subscribe(domain.complete_channel());
        debug!("Listening on {} and {}", domain.progress_channel(), domain.complete_channel());
    }

    /// Release the event subscriptions
    pub fn cleanup(&mut self) {
        self.listeners.clear();
    }

    fn raise(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        warn!("{} [{}]: {}", self.domain(), kind.code(), message);
        self.error = Some(ErrorNotice {
            kind,
            message,
            raised_at: Instant::now(),
        });
    }

    fn raise_backend(&mut self, fallback: ErrorKind, err: &BackendError) {
        let kind = if err.is_environment() {
            ErrorKind::Environment
        } else {
            fallback
        };
        self.raise(kind, err.to_string());
    }

    // Lifecycle

    pub fn begin_start(&mut self) -> Result<StartTicket> {
        if !self.session.status.can_start() {
            return Err(SessionError::AlreadyActive {
                status: self.session.status,
            });
        }

        self.result = None;
        self.progress = None;
        self.selection.clear();
        self.loader.reset();
        self.error = None;
        self.filter.begin();

        self.session.id = None;
        self.session.status = ScanStatus::Scanning;
        self.session.started_at = Some(Utc::now());
        self.pending = Some(PendingCommand::Start);
        self.control_latch = None;
        self.last_activity = Some(Instant::now());

        self.next_ticket += 1;
        self.awaiting_ack = Some(self.next_ticket);
        info!("Starting {} scan", self.domain());
        Ok(StartTicket(self.next_ticket))
    }

    pub fn finish_start(
        &mut self,
        ticket: StartTicket,
        outcome: std::result::Result<SessionId, BackendError>,
    ) -> Result<StartOutcome> {
        let live = self.awaiting_ack == Some(ticket.0);
        let adopted = self.session.id.clone();

        match outcome {
            Ok(id) if live => {
                if adopted.as_ref().is_some_and(|adopted| *adopted != id) {
                    debug!("Events adopted from {:?} were not from {}", adopted, id);
                    self.discard_adopted();
                }
                self.awaiting_ack = None;
                self.filter.assign(id.clone());
                self.session.id = Some(id.clone());
                if self.pending == Some(PendingCommand::Start) {
                    self.pending = None;
                }
                info!("{} scan acknowledged as {}", self.domain(), id);
                Ok(StartOutcome::Started(id))
            }
            Ok(id) => {
                debug!("Start of {} returned {} after it was abandoned", self.domain(), id);
                // A newer start may have adopted this id while waiting for its own ack
                if self.awaiting_ack.is_some() && adopted.as_ref() == Some(&id) {
                    self.discard_adopted();
                }
                self.filter.retire(id.clone());
                Ok(StartOutcome::Abandoned(Some(id)))
            }
            Err(err) if live => {
                self.awaiting_ack = None;
                self.session.status = ScanStatus::Error;
                self.pending = None;
                self.progress = None;
                self.filter.disarm();
                self.raise_backend(ErrorKind::StartFailure, &err);
                Err(err.into())
            }
            Err(err) => {
                debug!("Abandoned start of {} failed: {}", self.domain(), err);
                Ok(StartOutcome::Abandoned(None))
            }
        }
    }

    /// Forget what events of a foreign session did while the start was unacknowledged
    fn discard_adopted(&mut self) {
        self.session.id = None;
        self.progress = None;
        self.result = None;
        self.selection.clear();
        self.loader.reset();
        self.error = None;
        self.filter.forget_adopted();
        if !self.session.status.is_active() {
            self.session.status = ScanStatus::Scanning;
        }
        if self.awaiting_ack.is_some() {
            self.pending = Some(PendingCommand::Start);
        }
        self.last_activity = Some(Instant::now());
    }

    /// Start a new scan. Rejected with `AlreadyActive` while scanning or paused.
    pub async fn start(&mut self, params: &D::Params) -> Result<SessionId> {
        let ticket = self.begin_start()?;
        let outcome = self.ops.start(params).await;
        match self.finish_start(ticket, outcome)? {
            StartOutcome::Started(id) => Ok(id),
            StartOutcome::Abandoned(orphan) => {
                if let Some(id) = orphan {
                    if let Err(err) = self.ops.cancel(&id).await {
                        warn!("Failed to cancel orphaned scan {}: {}", id, err);
                    }
                }
                Err(SessionError::NoSession)
            }
        }
    }

    /// Apply a control command locally. Returns the request to send, or `None`
    /// when the command does not apply or there is no acknowledged session.
    pub fn begin_control(&mut self, op: ControlOp) -> Option<ControlRequest> {
        let status = self.session.status;
        let target = match (op, status) {
            (ControlOp::Pause, ScanStatus::Scanning) => ScanStatus::Paused,
            (ControlOp::Resume, ScanStatus::Paused) => ScanStatus::Scanning,
            (ControlOp::Cancel, ScanStatus::Scanning | ScanStatus::Paused) => ScanStatus::Cancelled,
            _ => {
                debug!("Ignoring {:?} while {}", op, status);
                return None;
            }
        };

        self.session.status = target;
        info!("{} scan {} -> {}", self.domain(), status, target);

        match op {
            ControlOp::Pause => self.control_latch = Some(status),
            ControlOp::Resume => {
                self.control_latch = Some(status);
                self.last_activity = Some(Instant::now());
            }
            ControlOp::Cancel => {
                self.control_latch = None;
                self.progress = None;
                self.selection.clear();
                self.loader.reset();
                self.awaiting_ack = None;
                self.filter.disarm();
            }
        }

        let id = if op == ControlOp::Cancel {
            self.session.id.take()
        } else {
            self.session.id.clone()
        };

        match id {
            Some(session_id) => {
                self.pending = Some(op.into());
                Some(ControlRequest { op, session_id })
            }
            None => {
                self.pending = None;
                None
            }
        }
    }

    /// Record the worker's answer. A failure is reported, the optimistic status stays.
    pub fn confirm_control(
        &mut self,
        request: &ControlRequest,
        outcome: std::result::Result<(), BackendError>,
    ) -> Result<()> {
        if self.pending == Some(request.op.into()) {
            self.pending = None;
        }

        match outcome {
            Ok(()) => {
                self.error = None;
                Ok(())
            }
            Err(err) => {
                // Unknown whether the worker applied it, so its next report wins
                self.control_latch = None;
                self.raise_backend(ErrorKind::Control, &err);
                Err(err.into())
            }
        }
    }

    async fn control(&mut self, op: ControlOp) -> Result<()> {
        let Some(request) = self.begin_control(op) else {
            return Ok(());
        };
        let outcome = match op {
            ControlOp::Pause => self.ops.pause(&request.session_id).await,
            ControlOp::Resume => self.ops.resume(&request.session_id).await,
            ControlOp::Cancel => self.ops.cancel(&request.session_id).await,
        };
        self.confirm_control(&request, outcome)
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.control(ControlOp::Pause).await
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.control(ControlOp::Resume).await
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.control(ControlOp::Cancel).await
    }

    /// Back to idle. An active scan is cancelled first; the worker is asked to
    /// drop the previous result. Neither call's failure blocks the reset.
    pub async fn reset(&mut self) {
        if self.session.status.is_active() {
            if let Err(err) = self.cancel().await {
                debug!("Cancel during reset failed: {}", err);
            }
        }

        let previous = self
            .result
            .as_ref()
            .map(|r| r.session_id.clone())
            .or_else(|| self.session.id.clone());
        if let Some(id) = previous {
            if let Err(err) = self.ops.clear_result(&id).await {
                debug!("Failed to clear result {}: {}", id, err);
            }
        }

        self.reset_local();
    }

    /// Drop all session state without talking to the worker
    pub fn reset_local(&mut self) {
        self.session = ScanSession::new(self.domain());
        self.pending = None;
        self.progress = None;
        self.result = None;
        self.selection.clear();
        self.loader.reset();
        self.error = None;
        self.filter.reset();
        self.last_activity = None;
        self.awaiting_ack = None;
        self.control_latch = None;
    }

    // Events

    pub fn handle_event(&mut self, event: HostEvent) -> Applied {
        let domain = self.domain();
        if event.channel == domain.progress_channel() {
            match self.ops.decode_progress(event.payload) {
                Ok(progress) => self.on_progress(progress),
                Err(err) => {
                    warn!("Dropping malformed {} event: {}", event.channel, err);
                    Applied::Ignored
                }
            }
        } else if event.channel == domain.complete_channel() {
            match self.ops.decode_result(event.payload) {
                Ok(result) => self.on_result(result),
                Err(err) => {
                    warn!("Dropping malformed {} event: {}", event.channel, err);
                    Applied::Ignored
                }
            }
        } else {
            debug!("Ignoring event on unrelated channel {}", event.channel);
            Applied::Ignored
        }
    }

    fn adopt(&mut self, verdict: &Verdict) {
        if let Verdict::Adopt(id) = verdict {
            debug!("Adopting session {} before the start call returned", id);
            self.session.id = Some(id.clone());
        }
    }

    fn on_progress(&mut self, progress: ScanProgress) -> Applied {
        let verdict = self.filter.check(&progress.session_id);
        if !verdict.is_accepted() {
            debug!("Dropping {:?} progress for {}", verdict, progress.session_id);
            return Applied::Ignored;
        }
        if !self.session.status.is_active() {
            debug!("Dropping progress while {}", self.session.status);
            return Applied::Ignored;
        }
        self.adopt(&verdict);
        self.last_activity = Some(Instant::now());

        match progress.status {
            ScanStatus::Completed => {
                self.finish_terminal(ScanStatus::Completed);
                Applied::Terminal(ScanStatus::Completed)
            }
            ScanStatus::Cancelled => {
                self.finish_terminal(ScanStatus::Cancelled);
                Applied::Terminal(ScanStatus::Cancelled)
            }
            ScanStatus::Error => {
                let message = progress
                    .message
                    .clone()
                    .unwrap_or_else(|| "scan failed".to_string());
                self.finish_terminal(ScanStatus::Error);
                self.raise(ErrorKind::MidScan, message);
                Applied::Terminal(ScanStatus::Error)
            }
            reported => {
                if let Some(previous) = &self.progress {
                    if progress.percent < previous.percent {
                        debug!("Progress went back from {} to {}", previous.percent, progress.percent);
                    }
                }
                let sent = progress.status_reported;
                self.progress = Some(progress);
                if sent {
                    self.reconcile(reported)
                } else {
                    Applied::Progress
                }
            }
        }
    }

    /// Take over an active status the worker reported, unless a command is
    /// pending or the report predates the last confirmed command.
    fn reconcile(&mut self, reported: ScanStatus) -> Applied {
        let local = self.session.status;
        if reported == local {
            self.control_latch = None;
            return Applied::Progress;
        }
        if self.pending.is_some() || !reported.is_active() {
            return Applied::Progress;
        }
        if self.control_latch == Some(reported) {
            debug!("Ignoring {} report sent before the worker saw {}", reported, local);
            return Applied::Progress;
        }

        info!("{} status reconciled {} -> {}", self.domain(), local, reported);
        self.session.status = reported;
        self.control_latch = None;
        Applied::Reconciled(reported)
    }

    fn finish_terminal(&mut self, status: ScanStatus) {
        info!("{} scan finished: {}", self.domain(), status);
        self.session.status = status;
        self.pending = None;
        self.progress = None;
        self.control_latch = None;
        self.filter.mark_terminal();
    }

    fn on_result(&mut self, mut result: ScanResult) -> Applied {
        let verdict = self.filter.check(&result.session_id);
        let accepted = match &verdict {
            Verdict::Accept | Verdict::Adopt(_) => self.session.status.is_active(),
            // progress(completed) may overtake the completion payload
            Verdict::AfterTerminal => {
                self.session.status == ScanStatus::Completed && self.result.is_none()
            }
            Verdict::Stale => false,
        };
        if !accepted {
            debug!("Dropping result for {} ({:?})", result.session_id, verdict);
            return Applied::Ignored;
        }
        self.adopt(&verdict);

        let clamped = result.enforce_counts();
        if clamped > 0 {
            warn!("Result for {} listed {} files beyond the reported counts", result.session_id, clamped);
        }

        if self.session.status != ScanStatus::Completed {
            self.finish_terminal(ScanStatus::Completed);
        }
        info!(
            "{} result: {} categories, {} files",
            self.domain(),
            result.categories.len(),
            result.total_files
        );
        self.result = Some(result);
        self.selection.clear();
        self.loader.reset();
        self.error = None;
        Applied::Result
    }

    /// Apply everything already queued. Returns how many events changed state.
    pub fn pump(&mut self) -> usize {
        self.listeners
            .drain()
            .into_iter()
            .map(|event| self.handle_event(event))
            .filter(|applied| *applied != Applied::Ignored)
            .count()
    }

    /// Wait for the next event and apply it. `None` once no listener is set up.
    pub async fn next_event(&mut self) -> Option<Applied> {
        let event = self.listeners.recv().await?;
        Some(self.handle_event(event))
    }

    /// Poll the worker instead of waiting for pushed events
    pub async fn sync(&mut self) -> Result<Applied> {
        let id = self.session.id.clone().ok_or(SessionError::NoSession)?;

        let progress = self.ops.progress(&id).await?;
        let mut applied = match progress {
            Some(progress) => self.on_progress(progress),
            None => Applied::Ignored,
        };

        let finished = self.session.status == ScanStatus::Completed && self.result.is_none();
        if finished {
            if let Some(result) = self.ops.result(&id).await? {
                applied = self.on_result(result);
            }
        }
        Ok(applied)
    }

    /// Expire the stored error and detect stalled scans. Returns true when the
    /// session was failed for inactivity.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Some(error) = &self.error {
            if error.is_expired(now, self.config.error_display) {
                debug!("Clearing expired error: {}", error.message);
                self.error = None;
            }
        }

        let (Some(timeout), Some(last)) = (self.config.stall_timeout, self.last_activity) else {
            return false;
        };
        if self.session.status != ScanStatus::Scanning
            || now.saturating_duration_since(last) < timeout
        {
            return false;
        }

        self.finish_terminal(ScanStatus::Error);
        self.awaiting_ack = None;
        self.filter.disarm();
        self.raise(
            ErrorKind::Stalled,
            format!("no progress for {}s", timeout.as_secs()),
        );
        true
    }

    // Selection

    pub fn toggle(&mut self, id: &str) -> bool {
        match &self.result {
            Some(result) => self.selection.toggle(result, id),
            None => false,
        }
    }

    pub fn select_all(&mut self) {
        if let Some(result) = &self.result {
            self.selection.select_all(result);
        }
    }

    pub fn deselect_all(&mut self) {
        self.selection.deselect_all();
    }

    pub fn toggle_category(&mut self, key: &str) -> Result<CategoryCheck> {
        let result = self.result.as_ref().ok_or(SessionError::NoResult)?;
        self.selection.toggle_category(result, key)
    }

    pub fn category_check(&self, key: &str) -> Option<CategoryCheck> {
        let category = self.result.as_ref()?.category(key)?;
        Some(self.selection.category_check(category))
    }

    pub fn selected_count(&self) -> usize {
        self.selection.selected_count()
    }

    pub fn selected_size(&self) -> u64 {
        self.result
            .as_ref()
            .map_or(0, |result| self.selection.selected_size(result))
    }

    // Pagination

    pub fn begin_load(&mut self, category: &str) -> Result<PageRequest> {
        let result = self.result.as_ref().ok_or(SessionError::NoResult)?;
        self.loader.begin(result, category)
    }

    pub fn begin_load_at(&mut self, category: &str, offset: u64, limit: u64) -> Result<PageRequest> {
        let result = self.result.as_ref().ok_or(SessionError::NoResult)?;
        self.loader.begin_at(result, category, offset, limit)
    }

    pub fn finish_load(
        &mut self,
        request: &PageRequest,
        outcome: std::result::Result<Option<CategoryPage>, BackendError>,
    ) -> Result<usize> {
        let Some(result) = self.result.as_mut() else {
            self.loader.abandon(&request.category);
            return Err(SessionError::NoResult);
        };

        match self.loader.finish(result, request, outcome) {
            Ok(added) => {
                debug!("Loaded {} more files into {}", added, request.category);
                Ok(added)
            }
            Err(err) => {
                self.raise_backend(ErrorKind::Load, &err);
                Err(err.into())
            }
        }
    }

    async fn fetch(&mut self, request: PageRequest) -> Result<usize> {
        let outcome = self
            .ops
            .category_files(
                &request.session_id,
                &request.category,
                request.offset,
                request.limit,
            )
            .await;
        self.finish_load(&request, outcome)
    }

    /// Fetch the next page of `category`
    pub async fn load_more(&mut self, category: &str) -> Result<usize> {
        let request = self.begin_load(category)?;
        self.fetch(request).await
    }

    pub async fn load_more_at(&mut self, category: &str, offset: u64, limit: u64) -> Result<usize> {
        let request = self.begin_load_at(category, offset, limit)?;
        self.fetch(request).await
    }

    /// Expand a category, fetching its first page if nothing of it is loaded yet
    pub async fn expand(&mut self, category: &str) -> Result<usize> {
        let result = self.result.as_ref().ok_or(SessionError::NoResult)?;
        match self.loader.expand(result, category)? {
            Some(request) => self.fetch(request).await,
            None => Ok(0),
        }
    }

    pub fn collapse(&mut self, category: &str) {
        self.loader.collapse(category);
    }

    pub fn render_mode(&self, category: &str) -> Option<RenderMode> {
        let category = self.result.as_ref()?.category(category)?;
        Some(self.loader.render_mode(category))
    }

    // Cleanup

    /// Delete the selected entries with a single worker call and reconcile the
    /// result. On failure nothing local changes.
    pub async fn delete_selected(&mut self, options: DeleteOptions) -> Result<CleanupOutcome> {
        let result = self.result.as_ref().ok_or(SessionError::NoResult)?;
        if self.selection.is_empty() {
            return Err(SessionError::EmptySelection);
        }

        let plan = cleanup::plan(&self.ops, &self.selection, result);
        for skipped in &plan.skipped {
            debug!("Skipping {}: {}", skipped.path, skipped.reason);
        }
        if plan.is_empty() {
            return Ok(CleanupOutcome::skipped_only(plan.skipped));
        }

        let session_id = result.session_id.clone();
        let report = match self.ops.delete(&session_id, &plan.targets, options).await {
            Ok(report) => report,
            Err(err) => {
                self.raise_backend(ErrorKind::Delete, &err);
                return Err(err.into());
            }
        };
        if report.is_partial() {
            warn!(
                "Deleted {} entries, {} failed",
                report.deleted_count, report.failed_count
            );
        }

        let Some(current) = self.result.as_ref() else {
            return Err(SessionError::NoResult);
        };
        let reconciled = cleanup::apply_report(current, &plan, &report);
        self.selection
            .remove_all(reconciled.removed.iter().map(String::as_str));
        self.selection.prune(&reconciled.result);
        self.loader.retain(&reconciled.result);
        self.result = Some(reconciled.result);
        self.error = None;

        info!(
            "Removed {} entries, dropped categories {:?}",
            reconciled.removed.len(),
            reconciled.dropped_categories
        );
        Ok(CleanupOutcome {
            report,
            skipped: plan.skipped,
            removed: reconciled.removed.len(),
            dropped_categories: reconciled.dropped_categories,
        })
    }
}
