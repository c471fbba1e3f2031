//! Persistence seam for the catalog.
//!
//! The store only ever upserts and deletes rows of four shapes: titles,
//! chapters (unique on title + number), pages (ordered per chapter) and
//! genres joined many-to-many to titles. Every call from the reconcilers
//! goes through the [`ConnectionThrottle`](crate::throttle::ConnectionThrottle).

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::SyncResult;
use crate::models::{CanonicalChapter, CanonicalTitle, ChapterNumber, PersistedChapter, PersistedTitle};

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_title_by_slug(&self, slug: &str) -> SyncResult<Option<PersistedTitle>>;

    async fn find_title_by_id(&self, id: i64) -> SyncResult<Option<PersistedTitle>>;

    /// Titles of one source, least recently updated first.
    async fn list_titles_oldest_first(&self, source_name: &str) -> SyncResult<Vec<PersistedTitle>>;

    /// Upsert the title row keyed by slug and, when the title carries
    /// genres, replace its genre links wholesale. One transaction.
    async fn save_title(&self, title: &CanonicalTitle) -> SyncResult<i64>;

    /// Chapter plus its pages ordered by page number.
    async fn find_chapter(
        &self,
        title_id: i64,
        number: ChapterNumber,
    ) -> SyncResult<Option<PersistedChapter>>;

    /// All chapters of a title with their pages, ordered by number.
    async fn list_chapters(&self, title_id: i64) -> SyncResult<Vec<PersistedChapter>>;

    /// Upsert scalar chapter fields on (title_id, number); returns the id.
    async fn upsert_chapter(&self, title_id: i64, chapter: &CanonicalChapter) -> SyncResult<i64>;

    /// Delete every page of the chapter and insert `pages` as 1..N.
    /// One transaction: a partial page list is never visible.
    async fn replace_pages(&self, chapter_id: i64, pages: &[String]) -> SyncResult<()>;

    /// Delete the chapter and its pages.
    async fn delete_chapter(&self, chapter_id: i64) -> SyncResult<()>;

    /// Set the title's last-content-update timestamp (unix millis).
    async fn touch_title_content(&self, title_id: i64, at_millis: i64) -> SyncResult<()>;

    /// Release the underlying connection(s). Later calls fail with `StoreClosed`.
    async fn close(&self) -> SyncResult<()>;
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Open the backend selected in `[database]`.
pub async fn open_store(config: &DatabaseConfig) -> SyncResult<Arc<dyn CatalogStore>> {
    match config.backend {
        DatabaseBackend::Sqlite => {
            log::info!("Opening SQLite store at {}", config.sqlite_path);
            Ok(Arc::new(SqliteStore::open(&config.sqlite_path)?))
        }
        DatabaseBackend::Postgres => {
            let store = PostgresStore::connect(config)?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
