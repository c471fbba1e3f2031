//! End-to-end sync flows: catalog crawl, single-title ingest, targeted sync
//! of one persisted title, and full-catalog sync.
//!
//! Titles are processed one at a time. A failing title is logged and
//! skipped by the multi-title loops; nothing is retried.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::helpers::clean_page_refs;
use crate::models::{
    CanonicalChapter, CanonicalTitle, ChapterNumber, PersistedChapter, PersistedTitle, SyncReport,
};
use crate::reconcile::{
    metadata_changed, needs_page_write, ChapterOutcome, ChapterReconciler, TitleReconciler,
};
use crate::sources::SourceAdapter;
use crate::store::{now_millis, CatalogStore};
use crate::throttle::ConnectionThrottle;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: u32,
    pub titles_synced: usize,
    pub titles_failed: usize,
    pub chapters_created: usize,
    pub chapters_updated: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FullSyncSummary {
    pub report: SyncReport,
    pub titles_synced: usize,
    pub titles_failed: usize,
}

/// Persisted vs source chapters of one title.
#[derive(Debug, Default)]
pub struct ChapterDiff<'a> {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// New and changed chapters, in source order
    pub writes: Vec<&'a CanonicalChapter>,
    pub removed: Vec<&'a PersistedChapter>,
}

impl ChapterDiff<'_> {
    pub fn report(&self) -> SyncReport {
        SyncReport {
            new: self.new,
            updated: self.changed,
            deleted: self.removed.len(),
        }
    }
}

/// Split `source` into new / changed / unchanged against `stored`, and
/// collect stored chapters whose number the source no longer lists.
pub fn diff_chapters<'a>(
    stored: &'a [PersistedChapter],
    source: &'a [CanonicalChapter],
) -> ChapterDiff<'a> {
    let mut diff = ChapterDiff::default();

    for chapter in source {
        match stored.iter().find(|s| s.number == chapter.number) {
            None => {
                diff.new += 1;
                diff.writes.push(chapter);
            }
            Some(existing) => {
                let pages = clean_page_refs(&chapter.pages);
                if metadata_changed(existing, chapter) || needs_page_write(&existing.pages, &pages, false) {
                    diff.changed += 1;
                    diff.writes.push(chapter);
                } else {
                    diff.unchanged += 1;
                }
            }
        }
    }

    let source_numbers: HashSet<ChapterNumber> = source.iter().map(|c| c.number).collect();
    diff.removed = stored
        .iter()
        .filter(|s| !source_numbers.contains(&s.number))
        .collect();
    diff
}

pub struct SyncOrchestrator {
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<dyn CatalogStore>,
    throttle: Arc<ConnectionThrottle>,
    titles: TitleReconciler,
    chapters: ChapterReconciler,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        store: Arc<dyn CatalogStore>,
        throttle: Arc<ConnectionThrottle>,
        config: SyncConfig,
    ) -> Self {
        let titles = TitleReconciler::new(store.clone(), throttle.clone(), config.title_tx_timeout());
        let chapters = ChapterReconciler::new(
            store.clone(),
            throttle.clone(),
            config.chapter_batch_size,
            config.chapter_batch_delay(),
        );
        Self {
            adapter,
            store,
            throttle,
            titles,
            chapters,
            config,
        }
    }

    fn source(&self) -> &str {
        self.adapter.name()
    }

    /// Walk catalog pages from `start_page` until `end_page` (inclusive) or
    /// the source reports no next page. A failed title is skipped; a failed
    /// catalog page ends the crawl with that error.
    pub async fn crawl(&self, start_page: u32, end_page: Option<u32>) -> SyncResult<CrawlSummary> {
        let mut summary = CrawlSummary::default();
        let mut page = start_page.max(1);

        log::info!(
            "[{}] Crawl starting at page {}{}",
            self.source(),
            page,
            end_page.map(|e| format!(" up to page {}", e)).unwrap_or_default()
        );

        loop {
            if end_page.is_some_and(|end| page > end) {
                break;
            }

            let catalog = self.adapter.fetch_catalog_page(page).await.map_err(|e| {
                log::error!("[{}] Catalog page {} failed: {}", self.source(), page, e);
                e
            })?;
            summary.pages += 1;
            log::info!(
                "[{}] Page {}: {} titles{}",
                self.source(),
                page,
                catalog.titles.len(),
                catalog.total.map(|t| format!(" (catalog total {})", t)).unwrap_or_default()
            );

            for (index, title) in catalog.titles.iter().enumerate() {
                if index > 0 {
                    self.pause(self.config.title_delay()).await;
                }
                match self.ingest(title).await {
                    Ok(outcome) => {
                        summary.titles_synced += 1;
                        summary.chapters_created += outcome.created;
                        summary.chapters_updated += outcome.updated;
                    }
                    Err(e) => {
                        summary.titles_failed += 1;
                        log::error!("[{}] Skipping title '{}': {}", self.source(), title.slug, e);
                    }
                }
            }

            let next = match (catalog.has_next, catalog.next_page) {
                (false, _) => break,
                (true, Some(next)) if next > page => next,
                (true, Some(next)) => {
                    log::warn!("[{}] Next page {} does not advance past {}; stopping", self.source(), next, page);
                    break;
                }
                (true, None) => page + 1,
            };
            if end_page.is_some_and(|end| next > end) {
                break;
            }
            self.pause(self.config.page_delay()).await;
            page = next;
        }

        log::info!(
            "[{}] Crawl finished: {} pages, {} titles synced, {} failed, chapters created={} updated={}",
            self.source(),
            summary.pages,
            summary.titles_synced,
            summary.titles_failed,
            summary.chapters_created,
            summary.chapters_updated
        );
        Ok(summary)
    }

    /// Fetch one provider title by id and reconcile it with its chapters.
    pub async fn ingest_title(&self, provider_id: &str) -> SyncResult<ChapterOutcome> {
        let detail = self.adapter.fetch_title_detail(provider_id).await?;
        let outcome = self.ingest(&detail).await?;
        log::info!(
            "[{}] Ingested '{}': {} chapters created, {} updated, {} unchanged",
            self.source(),
            detail.slug,
            outcome.created,
            outcome.updated,
            outcome.unchanged
        );
        Ok(outcome)
    }

    async fn ingest(&self, title: &CanonicalTitle) -> SyncResult<ChapterOutcome> {
        let title_id = self.titles.reconcile(title).await?;
        let chapters = self.fetch_all_chapters(&title.source_id).await?;
        self.chapters.reconcile_many(&chapters, title_id, false).await
    }

    /// Targeted sync of one persisted title, by slug or numeric id.
    pub async fn sync_title(&self, ident: &str) -> SyncResult<SyncReport> {
        let title = self.resolve_title(ident).await?;
        if title.source_name != self.source() {
            return Err(SyncError::NotFound(format!(
                "title '{}' belongs to source '{}', not '{}'",
                title.slug,
                title.source_name,
                self.source()
            )));
        }
        let report = self.sync_persisted(&title).await?;
        log::info!("[{}] Synced '{}': {}", self.source(), title.slug, report);
        Ok(report)
    }

    /// Targeted sync of every persisted title of this source, least recently
    /// updated first. Failures are counted and skipped.
    pub async fn sync_all(&self) -> SyncResult<FullSyncSummary> {
        let titles = self
            .throttle
            .run(self.store.list_titles_oldest_first(self.source()))
            .await?;
        log::info!("[{}] Full sync of {} titles", self.source(), titles.len());

        let mut summary = FullSyncSummary::default();
        for (index, title) in titles.iter().enumerate() {
            if index > 0 {
                self.pause(self.config.sync_delay()).await;
            }
            match self.sync_persisted(title).await {
                Ok(report) => {
                    if !report.is_empty() {
                        log::info!("[{}] '{}': {}", self.source(), title.slug, report);
                    }
                    summary.report += report;
                    summary.titles_synced += 1;
                }
                Err(e) => {
                    summary.titles_failed += 1;
                    log::error!("[{}] Sync of '{}' (id {}) failed: {}", self.source(), title.slug, title.id, e);
                }
            }
        }

        log::info!(
            "[{}] Full sync complete: {} ({} titles synced, {} failed)",
            self.source(),
            summary.report,
            summary.titles_synced,
            summary.titles_failed
        );
        Ok(summary)
    }

    async fn sync_persisted(&self, title: &PersistedTitle) -> SyncResult<SyncReport> {
        // the stored slug is the identity; a renamed title must not fork a new row
        let detail = self.adapter.fetch_title_detail(&title.source_id).await?;
        let refreshed = CanonicalTitle {
            slug: title.slug.clone(),
            ..detail
        };
        let source_chapters = self.fetch_all_chapters(&title.source_id).await?;

        self.titles.reconcile(&refreshed).await?;
        let stored = self.throttle.run(self.store.list_chapters(title.id)).await?;

        let diff = diff_chapters(&stored, &source_chapters);
        log::debug!(
            "[{}] '{}': {} new, {} changed, {} unchanged, {} removed",
            self.source(),
            title.slug,
            diff.new,
            diff.changed,
            diff.unchanged,
            diff.removed.len()
        );

        // unchanged chapters still get their scalar fields refreshed
        self.chapters.reconcile_many(&source_chapters, title.id, false).await?;

        for chapter in &diff.removed {
            self.throttle.run(self.store.delete_chapter(chapter.id)).await?;
            log::info!("[{}] '{}': removed chapter {}", self.source(), title.slug, chapter.number);
        }
        if !diff.removed.is_empty() {
            self.throttle
                .run(self.store.touch_title_content(title.id, now_millis()))
                .await?;
        }

        Ok(diff.report())
    }

    async fn resolve_title(&self, ident: &str) -> SyncResult<PersistedTitle> {
        let by_slug = self.throttle.run(self.store.find_title_by_slug(ident)).await?;
        if let Some(title) = by_slug {
            return Ok(title);
        }
        if let Ok(id) = ident.parse::<i64>() {
            if let Some(title) = self.throttle.run(self.store.find_title_by_id(id)).await? {
                return Ok(title);
            }
        }
        Err(SyncError::NotFound(format!("no persisted title with slug or id '{}'", ident)))
    }

    /// Every chapter-list page of a title. Repeated chapter numbers after
    /// the first occurrence are dropped.
    async fn fetch_all_chapters(&self, provider_title_id: &str) -> SyncResult<Vec<CanonicalChapter>> {
        let mut chapters = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        loop {
            let batch = self.adapter.fetch_chapter_list(provider_title_id, page).await?;
            for chapter in batch.chapters {
                if seen.insert(chapter.number) {
                    chapters.push(chapter);
                } else {
                    log::warn!(
                        "[{}] Title {} lists chapter {} more than once; keeping the first",
                        self.source(),
                        provider_title_id,
                        chapter.number
                    );
                }
            }

            page = match (batch.has_next, batch.next_page) {
                (false, _) => break,
                (true, Some(next)) if next > page => next,
                (true, Some(_)) => break,
                (true, None) => page + 1,
            };
        }
        Ok(chapters)
    }

    async fn pause(&self, delay: std::time::Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersistedPage;

    fn stored(number: f64, pages: &[&str]) -> PersistedChapter {
        PersistedChapter {
            id: number as i64,
            title_id: 1,
            source_id: format!("c{}", number),
            number: ChapterNumber::new(number),
            title: None,
            slug: format!("chapter-{}", number),
            views: 0,
            released_at: None,
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, url)| PersistedPage {
                    chapter_id: number as i64,
                    page_number: i as u32 + 1,
                    image_url: url.to_string(),
                })
                .collect(),
        }
    }

    fn source(number: f64, pages: &[&str]) -> CanonicalChapter {
        CanonicalChapter {
            source_id: format!("c{}", number),
            title_source_id: "t".to_string(),
            number: ChapterNumber::new(number),
            title: None,
            slug: format!("chapter-{}", number),
            pages: pages.iter().map(|p| p.to_string()).collect(),
            views: 9,
            released_at: None,
        }
    }

    #[test]
    fn test_diff_new_changed_removed() {
        let persisted = vec![stored(1.0, &["a"]), stored(2.0, &["b"]), stored(3.0, &["c"])];
        let incoming = vec![source(2.0, &["b"]), source(3.0, &["c", "d"]), source(4.0, &["e"])];

        let diff = diff_chapters(&persisted, &incoming);
        assert_eq!(diff.report(), SyncReport { new: 1, updated: 1, deleted: 1 });
        assert_eq!(diff.unchanged, 1);
        let writes: Vec<f64> = diff.writes.iter().map(|c| c.number.value()).collect();
        assert_eq!(writes, vec![3.0, 4.0]);
        assert_eq!(diff.removed[0].number, ChapterNumber::new(1.0));
    }

    #[test]
    fn test_diff_title_change_counts_as_changed() {
        let persisted = vec![stored(1.0, &["a"])];
        let mut incoming = vec![source(1.0, &["a"])];
        assert!(diff_chapters(&persisted, &incoming).report().is_empty());

        incoming[0].title = Some("The Beginning".to_string());
        assert_eq!(diff_chapters(&persisted, &incoming).report().updated, 1);
    }
}
