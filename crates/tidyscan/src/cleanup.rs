//! Deleting selected entries and reconciling the result without a re-scan

use crate::domains::DomainOps;
use crate::model::{DeleteReport, FileEntry, ScanResult};
use crate::selection::SelectionSet;
use std::collections::HashSet;

/// A selected entry the safety predicate refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub id: String,
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupPlan {
    pub targets: Vec<FileEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl CleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target_size(&self) -> u64 {
        self.targets.iter().map(|t| t.size).sum()
    }
}

/// Split the selected loaded entries into those to send and those to skip
pub fn plan<D: DomainOps + ?Sized>(ops: &D, selection: &SelectionSet, result: &ScanResult) -> CleanupPlan {
    let mut plan = CleanupPlan::default();
    let mut seen = HashSet::new();

    for entry in selection.selected_entries(result) {
        if !seen.insert(entry.id.as_str()) {
            continue;
        }
        match ops.is_deletable(entry) {
            Ok(()) => plan.targets.push(entry.clone()),
            Err(reason) => plan.skipped.push(SkippedEntry {
                id: entry.id.clone(),
                path: entry.path.clone(),
                reason,
            }),
        }
    }
    plan
}

/// The result after a delete call, with what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub result: ScanResult,
    pub removed: Vec<String>,
    pub dropped_categories: Vec<String>,
}

/// Build the post-delete result. Every target not named in the report's
/// failures counts as deleted; categories emptied by the removal are dropped.
pub fn apply_report(result: &ScanResult, plan: &CleanupPlan, report: &DeleteReport) -> Reconciled {
    let deleted: HashSet<&str> = plan
        .targets
        .iter()
        .filter(|target| !report.failed_items.iter().any(|failed| failed.matches(target)))
        .map(|target| target.id.as_str())
        .collect();

    let mut next = result.clone();
    let mut dropped_categories = Vec::new();

    next.categories.retain_mut(|category| {
        let before = category.files.len();
        let mut removed_size = 0;
        category.files.retain(|file| {
            if deleted.contains(file.id.as_str()) {
                removed_size += file.size;
                false
            } else {
                true
            }
        });

        let removed = before - category.files.len();
        if removed == 0 {
            return true;
        }
        category.file_count = category.file_count.saturating_sub(removed as u64);
        category.total_size = category.total_size.saturating_sub(removed_size);

        if category.files.is_empty() {
            dropped_categories.push(category.key.clone());
            false
        } else {
            true
        }
    });
    next.recompute_totals();

    let mut removed: Vec<String> = deleted.into_iter().map(str::to_string).collect();
    removed.sort();

    Reconciled {
        result: next,
        removed,
        dropped_categories,
    }
}

/// What a completed cleanup did, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOutcome {
    pub report: DeleteReport,
    pub skipped: Vec<SkippedEntry>,
    pub removed: usize,
    pub dropped_categories: Vec<String>,
}

impl CleanupOutcome {
    /// Only skipped entries, nothing was sent
    pub fn skipped_only(skipped: Vec<SkippedEntry>) -> Self {
        Self {
            report: DeleteReport::default(),
            skipped,
            removed: 0,
            dropped_categories: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.report.is_partial() || !self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, FailedItem};

    fn result() -> ScanResult {
        let video_files = (0..4)
            .map(|i| FileEntry::from_path(format!("/video/{}", i), 10, 0))
            .collect();
        let mut video = Category::complete("video", "Video", video_files);
        video.file_count = 10;
        video.total_size = 100;
        video.has_more = true;

        let logs = Category::complete("logs", "Logs", vec![FileEntry::from_path("/logs/a", 5, 0)]);
        ScanResult::new("s1".into(), vec![video, logs], 0)
    }

    fn plan_of(result: &ScanResult, ids: &[&str]) -> CleanupPlan {
        CleanupPlan {
            targets: ids
                .iter()
                .map(|id| result.find_entry(id).unwrap().clone())
                .collect(),
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_removes_entries_and_drops_emptied_category() {
        let result = result();
        let plan = plan_of(&result, &["/video/0", "/logs/a"]);
        let report = DeleteReport {
            deleted_count: 2,
            deleted_size: 15,
            ..Default::default()
        };

        let reconciled = apply_report(&result, &plan, &report);
        assert_eq!(reconciled.dropped_categories, vec!["logs".to_string()]);
        assert_eq!(reconciled.removed, vec!["/logs/a".to_string(), "/video/0".to_string()]);

        let video = reconciled.result.category("video").unwrap();
        assert_eq!(video.files.len(), 3);
        assert_eq!(video.file_count, 9);
        assert_eq!(video.total_size, 90);
        assert_eq!(reconciled.result.total_files, 9);
        // input untouched
        assert_eq!(result.categories.len(), 2);
    }

    #[test]
    fn test_failed_items_stay() {
        let result = result();
        let plan = plan_of(&result, &["/video/0", "/video/1"]);
        let report = DeleteReport {
            deleted_count: 1,
            deleted_size: 10,
            failed_count: 1,
            failed_items: vec![FailedItem {
                id: String::new(),
                path: "/video/1".to_string(),
                error: "in use".to_string(),
            }],
        };

        let reconciled = apply_report(&result, &plan, &report);
        assert_eq!(reconciled.removed, vec!["/video/0".to_string()]);
        assert!(reconciled.result.contains_entry("/video/1"));
    }

    #[test]
    fn test_fully_deleted_loaded_page_drops_category_even_with_unloaded_rest() {
        let result = result();
        let plan = plan_of(&result, &["/video/0", "/video/1", "/video/2", "/video/3"]);
        let reconciled = apply_report(&result, &plan, &DeleteReport::default());

        assert!(reconciled.result.category("video").is_none());
        assert_eq!(reconciled.dropped_categories, vec!["video".to_string()]);
    }
}
