//! Incremental loading of category pages

use crate::error::{BackendError, Result, SessionError};
use crate::model::{Category, CategoryPage, ScanResult, SessionId};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    /// Files per category the worker puts in a result. Also the size of the
    /// first fetch for a category expanded with nothing loaded.
    pub initial_page_size: u64,
    /// Files requested per `load_more`
    pub page_size: u64,
    /// Categories with more files than this render virtualized
    pub virtualize_threshold: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 100,
            page_size: 100,
            virtualize_threshold: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Full,
    Virtualized,
}

/// A page fetch that has been started and must be handed back to [`CategoryLoader::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub session_id: SessionId,
    pub category: String,
    pub offset: u64,
    pub limit: u64,
}

/// Tracks in-flight page loads and expanded categories.
#[derive(Debug, Default)]
pub struct CategoryLoader {
    config: PaginationConfig,
    in_flight: HashSet<String>,
    expanded: HashSet<String>,
}

impl CategoryLoader {
    pub fn new(config: PaginationConfig) -> Self {
        Self {
            config,
            in_flight: HashSet::new(),
            expanded: HashSet::new(),
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub fn is_loading(&self, category: &str) -> bool {
        self.in_flight.contains(category)
    }

    /// Start a fetch of the next page of `category`
    pub fn begin(&mut self, result: &ScanResult, category: &str) -> Result<PageRequest> {
        let offset = result
            .category(category)
            .map(|c| c.files.len() as u64)
            .ok_or_else(|| SessionError::UnknownCategory(category.to_string()))?;
        self.begin_at(result, category, offset, self.config.page_size)
    }

    /// Start a fetch with an explicit window
    pub fn begin_at(
        &mut self,
        result: &ScanResult,
        category: &str,
        offset: u64,
        limit: u64,
    ) -> Result<PageRequest> {
        if result.category(category).is_none() {
            return Err(SessionError::UnknownCategory(category.to_string()));
        }
        if !self.in_flight.insert(category.to_string()) {
            return Err(SessionError::LoadInFlight(category.to_string()));
        }

        Ok(PageRequest {
            session_id: result.session_id.clone(),
            category: category.to_string(),
            offset,
            limit,
        })
    }

    /// Complete a fetch. The in-flight flag is cleared whatever the outcome; the
    /// page is only touched by a successful, non-empty response for the same session.
    ///
    /// Returns the number of entries appended.
    pub fn finish(
        &mut self,
        result: &mut ScanResult,
        request: &PageRequest,
        outcome: std::result::Result<Option<CategoryPage>, BackendError>,
    ) -> std::result::Result<usize, BackendError> {
        self.in_flight.remove(&request.category);

        let page = match outcome? {
            Some(page) => page,
            None => {
                debug!("No page returned for {} at {}", request.category, request.offset);
                return Ok(0);
            }
        };

        if result.session_id != request.session_id {
            debug!(
                "Discarding page for {} from superseded session {}",
                request.category, request.session_id
            );
            return Ok(0);
        }

        match result.category_mut(&request.category) {
            Some(category) => Ok(merge_page(category, page)),
            None => {
                warn!("Category {} disappeared while loading", request.category);
                Ok(0)
            }
        }
    }

    /// Clear the in-flight flag of a fetch whose response will never be merged
    pub fn abandon(&mut self, category: &str) {
        self.in_flight.remove(category);
    }

    /// Mark a category expanded. Returns a request when it holds nothing yet but
    /// the worker has more to give.
    pub fn expand(&mut self, result: &ScanResult, category: &str) -> Result<Option<PageRequest>> {
        let needs_fetch = {
            let c = result
                .category(category)
                .ok_or_else(|| SessionError::UnknownCategory(category.to_string()))?;
            c.files.is_empty() && c.has_more
        };
        self.expanded.insert(category.to_string());

        if needs_fetch && !self.is_loading(category) {
            self.begin_at(result, category, 0, self.config.initial_page_size)
                .map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn collapse(&mut self, category: &str) {
        self.expanded.remove(category);
    }

    pub fn is_expanded(&self, category: &str) -> bool {
        self.expanded.contains(category)
    }

    pub fn render_mode(&self, category: &Category) -> RenderMode {
        if category.file_count > self.config.virtualize_threshold {
            RenderMode::Virtualized
        } else {
            RenderMode::Full
        }
    }

    /// Forget categories that no longer exist
    pub fn retain(&mut self, result: &ScanResult) {
        self.expanded.retain(|key| result.category(key).is_some());
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.expanded.clear();
    }
}

/// Append a page after the loaded files, skipping ids already present and
/// stopping at `file_count`. `has_more` is taken from the page as is.
pub fn merge_page(category: &mut Category, page: CategoryPage) -> usize {
    let mut seen: HashSet<String> = category.files.iter().map(|f| f.id.clone()).collect();
    let limit = category.file_count as usize;
    let mut added = 0;

    for file in page.files {
        if category.files.len() >= limit {
            debug!("Category {} is full at {} files", category.key, limit);
            break;
        }
        if seen.insert(file.id.clone()) {
            category.files.push(file);
            added += 1;
        }
    }

    category.has_more = page.has_more;
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileEntry;

    fn files(range: std::ops::Range<usize>) -> Vec<FileEntry> {
        range
            .map(|i| FileEntry::from_path(format!("/video/{}", i), 1, 0))
            .collect()
    }

    fn video_result() -> ScanResult {
        let mut video = Category::complete("video", "Video", files(0..50));
        video.file_count = 500;
        video.total_size = 500;
        video.has_more = true;
        ScanResult::new("s1".into(), vec![video], 0)
    }

    #[test]
    fn test_load_more_appends_in_order() {
        let mut result = video_result();
        let mut loader = CategoryLoader::new(PaginationConfig::default());

        let request = loader.begin_at(&result, "video", 50, 50).unwrap();
        assert!(loader.is_loading("video"));

        let page = CategoryPage {
            files: files(50..100),
            has_more: true,
        };
        let added = loader.finish(&mut result, &request, Ok(Some(page))).unwrap();

        let video = result.category("video").unwrap();
        assert_eq!(added, 50);
        assert_eq!(video.files.len(), 100);
        assert_eq!(video.file_count, 500);
        assert_eq!(video.files[50].path, "/video/50");
        assert!(!loader.is_loading("video"));
    }

    #[test]
    fn test_one_load_per_category() {
        let mut result = video_result();
        result
            .categories
            .push(Category::complete("docs", "Docs", Vec::new()));
        let mut loader = CategoryLoader::default();

        loader.begin(&result, "video").unwrap();
        assert!(matches!(
            loader.begin(&result, "video"),
            Err(SessionError::LoadInFlight(_))
        ));
        assert!(loader.begin(&result, "docs").is_ok());
    }

    #[test]
    fn test_failure_leaves_page_untouched() {
        let mut result = video_result();
        let before = result.clone();
        let mut loader = CategoryLoader::default();

        let request = loader.begin(&result, "video").unwrap();
        let err = loader
            .finish(
                &mut result,
                &request,
                Err(BackendError::command("disk_scan_category_files", "gone")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
        assert_eq!(result, before);
        assert!(!loader.is_loading("video"));

        let request = loader.begin(&result, "video").unwrap();
        assert_eq!(loader.finish(&mut result, &request, Ok(None)).unwrap(), 0);
        assert_eq!(result, before);
    }

    #[test]
    fn test_merge_skips_duplicates_and_clamps() {
        let mut category = Category::complete("docs", "Docs", files(0..3));
        category.file_count = 5;
        category.has_more = true;

        let added = merge_page(
            &mut category,
            CategoryPage {
                files: files(2..9),
                has_more: false,
            },
        );
        assert_eq!(added, 2);
        assert_eq!(category.files.len(), 5);
        assert!(!category.has_more);
    }

    #[test]
    fn test_page_for_superseded_session_is_dropped() {
        let mut result = video_result();
        let mut loader = CategoryLoader::default();
        let request = loader.begin(&result, "video").unwrap();

        result.session_id = "s2".into();
        let page = CategoryPage {
            files: files(50..60),
            has_more: true,
        };
        assert_eq!(loader.finish(&mut result, &request, Ok(Some(page))).unwrap(), 0);
        assert_eq!(result.category("video").unwrap().files.len(), 50);
    }

    #[test]
    fn test_expand_empty_category_fetches_once() {
        let mut empty = Category::complete("music", "Music", Vec::new());
        empty.file_count = 20;
        empty.has_more = true;
        let result = ScanResult::new("s1".into(), vec![empty], 0);
        let mut loader = CategoryLoader::default();

        let request = loader.expand(&result, "music").unwrap().unwrap();
        assert_eq!(request.offset, 0);
        assert_eq!(request.limit, 100);
        assert!(loader.is_expanded("music"));
        assert!(loader.expand(&result, "music").unwrap().is_none());
    }

    #[test]
    fn test_first_fetch_uses_initial_page_size() {
        let mut empty = Category::complete("music", "Music", Vec::new());
        empty.file_count = 300;
        empty.has_more = true;
        let mut result = ScanResult::new("s1".into(), vec![empty], 0);
        let mut loader = CategoryLoader::new(PaginationConfig {
            initial_page_size: 100,
            page_size: 25,
            virtualize_threshold: 200,
        });

        let request = loader.expand(&result, "music").unwrap().unwrap();
        assert_eq!((request.offset, request.limit), (0, 100));

        let page = CategoryPage {
            files: files(0..100),
            has_more: true,
        };
        loader.finish(&mut result, &request, Ok(Some(page))).unwrap();
        let next = loader.begin(&result, "music").unwrap();
        assert_eq!((next.offset, next.limit), (100, 25));
    }

    #[test]
    fn test_render_mode_threshold() {
        let loader = CategoryLoader::default();
        let result = video_result();
        assert_eq!(
            loader.render_mode(result.category("video").unwrap()),
            RenderMode::Virtualized
        );
        let small = Category::complete("docs", "Docs", files(0..10));
        assert_eq!(loader.render_mode(&small), RenderMode::Full);
    }
}
