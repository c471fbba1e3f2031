use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncResult;
use crate::helpers::clean_page_refs;
use crate::models::CanonicalChapter;
use crate::reconcile::{metadata_changed, needs_page_write};
use crate::store::{now_millis, CatalogStore};
use crate::throttle::ConnectionThrottle;

/// What one `reconcile_many` call wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChapterOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Chapters whose page list was replaced
    pub page_writes: usize,
}

impl ChapterOutcome {
    pub fn touched(&self) -> usize {
        self.created + self.updated
    }
}

enum Change {
    Created,
    Updated,
    Unchanged,
}

pub struct ChapterReconciler {
    store: Arc<dyn CatalogStore>,
    throttle: Arc<ConnectionThrottle>,
    batch_size: usize,
    batch_delay: Duration,
}

impl ChapterReconciler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        throttle: Arc<ConnectionThrottle>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            store,
            throttle,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    /// Reconcile `chapters` of one title in source order, `batch_size` at a
    /// time with `batch_delay` between batches.
    ///
    /// Scalar fields are always upserted; pages only when
    /// [`should_update_pages`](crate::reconcile::should_update_pages) says so.
    /// The title's content timestamp is refreshed once if any chapter was
    /// created or changed, also when a later chapter fails.
    pub async fn reconcile_many(
        &self,
        chapters: &[CanonicalChapter],
        title_id: i64,
        force: bool,
    ) -> SyncResult<ChapterOutcome> {
        let mut outcome = ChapterOutcome::default();
        let result = self.apply_batches(chapters, title_id, force, &mut outcome).await;

        if outcome.touched() > 0 {
            let touched = self
                .throttle
                .run(self.store.touch_title_content(title_id, now_millis()))
                .await;
            match (touched, &result) {
                (Err(e), Ok(())) => return Err(e),
                (Err(e), Err(_)) => {
                    log::error!("Title {}: content timestamp not refreshed: {}", title_id, e);
                }
                (Ok(()), _) => {}
            }
        }

        result.map(|_| {
            log::debug!(
                "Title {}: {} chapters created, {} updated, {} unchanged, {} page rewrites",
                title_id,
                outcome.created,
                outcome.updated,
                outcome.unchanged,
                outcome.page_writes
            );
            outcome
        })
    }

    async fn apply_batches(
        &self,
        chapters: &[CanonicalChapter],
        title_id: i64,
        force: bool,
        outcome: &mut ChapterOutcome,
    ) -> SyncResult<()> {
        for (index, batch) in chapters.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            for chapter in batch {
                let (change, wrote_pages) = self.reconcile_one(chapter, title_id, force).await?;
                match change {
                    Change::Created => outcome.created += 1,
                    Change::Updated => outcome.updated += 1,
                    Change::Unchanged => outcome.unchanged += 1,
                }
                if wrote_pages {
                    outcome.page_writes += 1;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_one(
        &self,
        chapter: &CanonicalChapter,
        title_id: i64,
        force: bool,
    ) -> SyncResult<(Change, bool)> {
        let existing = self
            .throttle
            .run(self.store.find_chapter(title_id, chapter.number))
            .await?;
        let pages = clean_page_refs(&chapter.pages);

        let chapter_id = self
            .throttle
            .run(self.store.upsert_chapter(title_id, chapter))
            .await?;

        let (change, rewrite) = match &existing {
            None => (Change::Created, force || !pages.is_empty()),
            Some(stored) => {
                let rewrite = needs_page_write(&stored.pages, &pages, force);
                if rewrite || metadata_changed(stored, chapter) {
                    (Change::Updated, rewrite)
                } else {
                    (Change::Unchanged, false)
                }
            }
        };

        if rewrite {
            self.throttle
                .run(self.store.replace_pages(chapter_id, &pages))
                .await?;
            log::debug!(
                "Chapter {} of title {}: wrote {} pages",
                chapter.number,
                title_id,
                pages.len()
            );
        }

        Ok((change, rewrite))
    }
}
