use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::collections::HashMap;
use tokio_postgres::{NoTls, Row};

use super::{now_millis, CatalogStore};
use crate::config::DatabaseConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    CanonicalChapter, CanonicalTitle, ChapterNumber, PersistedChapter, PersistedPage,
    PersistedTitle, TitleStatus,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS titles (
    id BIGSERIAL PRIMARY KEY,
    source_name TEXT NOT NULL,
    source_id TEXT NOT NULL,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    alt_titles TEXT NOT NULL DEFAULT '{}',
    synopsis TEXT,
    cover_url TEXT,
    status TEXT NOT NULL DEFAULT 'unknown',
    views BIGINT NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    content_updated_at BIGINT
);
CREATE TABLE IF NOT EXISTS genres (
    id BIGSERIAL PRIMARY KEY,
    source_genre_id TEXT NOT NULL,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS title_genres (
    title_id BIGINT NOT NULL REFERENCES titles (id) ON DELETE CASCADE,
    genre_id BIGINT NOT NULL REFERENCES genres (id) ON DELETE CASCADE,
    PRIMARY KEY (title_id, genre_id)
);
CREATE TABLE IF NOT EXISTS chapters (
    id BIGSERIAL PRIMARY KEY,
    title_id BIGINT NOT NULL REFERENCES titles (id) ON DELETE CASCADE,
    source_id TEXT NOT NULL,
    number DOUBLE PRECISION NOT NULL,
    title TEXT,
    slug TEXT NOT NULL,
    views BIGINT NOT NULL DEFAULT 0,
    released_at BIGINT,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    UNIQUE (title_id, number)
);
CREATE TABLE IF NOT EXISTS pages (
    id BIGSERIAL PRIMARY KEY,
    chapter_id BIGINT NOT NULL REFERENCES chapters (id) ON DELETE CASCADE,
    page_number INTEGER NOT NULL,
    image_url TEXT NOT NULL,
    UNIQUE (chapter_id, page_number)
);
CREATE INDEX IF NOT EXISTS idx_titles_source_updated ON titles (source_name, updated_at);
CREATE INDEX IF NOT EXISTS idx_chapters_title ON chapters (title_id);
CREATE INDEX IF NOT EXISTS idx_pages_chapter ON pages (chapter_id);
";

const TITLE_COLUMNS: &str =
    "id, source_name, source_id, title, slug, cover_url, status, views, updated_at, content_updated_at";
const CHAPTER_COLUMNS: &str = "id, title_id, source_id, number, title, slug, views, released_at";

/// PostgreSQL store backed by a deadpool connection pool
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool. Connections are opened lazily on first use.
    pub fn connect(config: &DatabaseConfig) -> SyncResult<Self> {
        log::info!(
            "Creating PostgreSQL connection pool for {}@{}:{}/{} (size {})",
            config.user,
            config.host,
            config.port,
            config.dbname,
            config.pool_size
        );

        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.pool_size.max(1)));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SyncError::Config(format!("postgres pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> SyncResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        log::info!("PostgreSQL schema ensured");
        Ok(())
    }
}

fn title_from_row(row: &Row) -> PersistedTitle {
    let status: String = row.get(6);
    PersistedTitle {
        id: row.get(0),
        source_name: row.get(1),
        source_id: row.get(2),
        title: row.get(3),
        slug: row.get(4),
        cover_url: row.get(5),
        status: TitleStatus::from_db(&status),
        views: row.get(7),
        updated_at: row.get(8),
        content_updated_at: row.get(9),
    }
}

fn chapter_from_row(row: &Row) -> PersistedChapter {
    PersistedChapter {
        id: row.get(0),
        title_id: row.get(1),
        source_id: row.get(2),
        number: ChapterNumber::new(row.get(3)),
        title: row.get(4),
        slug: row.get(5),
        views: row.get(6),
        released_at: row.get(7),
        pages: Vec::new(),
    }
}

fn page_from_row(row: &Row) -> PersistedPage {
    let page_number: i32 = row.get(1);
    PersistedPage {
        chapter_id: row.get(0),
        page_number: page_number.max(0) as u32,
        image_url: row.get(2),
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn find_title_by_slug(&self, slug: &str) -> SyncResult<Option<PersistedTitle>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM titles WHERE slug = $1", TITLE_COLUMNS);
        let row = client.query_opt(&sql, &[&slug]).await?;
        Ok(row.as_ref().map(title_from_row))
    }

    async fn find_title_by_id(&self, id: i64) -> SyncResult<Option<PersistedTitle>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {} FROM titles WHERE id = $1", TITLE_COLUMNS);
        let row = client.query_opt(&sql, &[&id]).await?;
        Ok(row.as_ref().map(title_from_row))
    }

    async fn list_titles_oldest_first(&self, source_name: &str) -> SyncResult<Vec<PersistedTitle>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM titles WHERE source_name = $1 ORDER BY updated_at ASC, id ASC",
            TITLE_COLUMNS
        );
        let rows = client.query(&sql, &[&source_name]).await?;
        Ok(rows.iter().map(title_from_row).collect())
    }

    async fn save_title(&self, title: &CanonicalTitle) -> SyncResult<i64> {
        let alt_titles = serde_json::to_string(&title.alt_titles)
            .map_err(|e| SyncError::Database(format!("encoding alt titles: {}", e)))?;
        let now = now_millis();
        let created_at = title.created_at.map(|d| d.timestamp_millis()).unwrap_or(now);
        let status = title.status.as_str();

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO titles (source_name, source_id, title, slug, alt_titles, synopsis, cover_url, status, views, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (slug) DO UPDATE SET
                    source_name = EXCLUDED.source_name,
                    source_id = EXCLUDED.source_id,
                    title = EXCLUDED.title,
                    alt_titles = EXCLUDED.alt_titles,
                    synopsis = EXCLUDED.synopsis,
                    cover_url = EXCLUDED.cover_url,
                    status = EXCLUDED.status,
                    views = EXCLUDED.views,
                    updated_at = EXCLUDED.updated_at
                 RETURNING id",
                &[
                    &title.source_name,
                    &title.source_id,
                    &title.title,
                    &title.slug,
                    &alt_titles,
                    &title.synopsis,
                    &title.cover_url,
                    &status,
                    &title.views,
                    &created_at,
                    &now,
                ],
            )
            .await?;
        let title_id: i64 = row.get(0);

        if !title.genres.is_empty() {
            tx.execute("DELETE FROM title_genres WHERE title_id = $1", &[&title_id])
                .await?;
            let upsert_genre = tx
                .prepare(
                    "INSERT INTO genres (source_genre_id, name, slug) VALUES ($1, $2, $3)
                     ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
                     RETURNING id",
                )
                .await?;
            let link = tx
                .prepare(
                    "INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                )
                .await?;
            for genre in &title.genres {
                let row = tx
                    .query_one(&upsert_genre, &[&genre.source_genre_id, &genre.name, &genre.slug])
                    .await?;
                let genre_id: i64 = row.get(0);
                tx.execute(&link, &[&title_id, &genre_id]).await?;
            }
        }

        tx.commit().await?;
        Ok(title_id)
    }

    async fn find_chapter(
        &self,
        title_id: i64,
        number: ChapterNumber,
    ) -> SyncResult<Option<PersistedChapter>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM chapters WHERE title_id = $1 AND number = $2",
            CHAPTER_COLUMNS
        );
        let number = number.value();
        let Some(row) = client.query_opt(&sql, &[&title_id, &number]).await? else {
            return Ok(None);
        };
        let mut chapter = chapter_from_row(&row);
        let pages = client
            .query(
                "SELECT chapter_id, page_number, image_url FROM pages WHERE chapter_id = $1 ORDER BY page_number",
                &[&chapter.id],
            )
            .await?;
        chapter.pages = pages.iter().map(page_from_row).collect();
        Ok(Some(chapter))
    }

    async fn list_chapters(&self, title_id: i64) -> SyncResult<Vec<PersistedChapter>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM chapters WHERE title_id = $1 ORDER BY number",
            CHAPTER_COLUMNS
        );
        let rows = client.query(&sql, &[&title_id]).await?;
        let mut chapters: Vec<PersistedChapter> = rows.iter().map(chapter_from_row).collect();

        let page_rows = client
            .query(
                "SELECT p.chapter_id, p.page_number, p.image_url FROM pages p
                 JOIN chapters c ON c.id = p.chapter_id
                 WHERE c.title_id = $1 ORDER BY p.chapter_id, p.page_number",
                &[&title_id],
            )
            .await?;
        let mut by_chapter: HashMap<i64, Vec<PersistedPage>> = HashMap::new();
        for row in &page_rows {
            let page = page_from_row(row);
            by_chapter.entry(page.chapter_id).or_default().push(page);
        }
        for chapter in &mut chapters {
            chapter.pages = by_chapter.remove(&chapter.id).unwrap_or_default();
        }
        Ok(chapters)
    }

    async fn upsert_chapter(&self, title_id: i64, chapter: &CanonicalChapter) -> SyncResult<i64> {
        let client = self.pool.get().await?;
        let now = now_millis();
        let number = chapter.number.value();
        let released_at = chapter.released_at.map(|d| d.timestamp_millis());
        let row = client
            .query_one(
                "INSERT INTO chapters (title_id, source_id, number, title, slug, views, released_at, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                 ON CONFLICT (title_id, number) DO UPDATE SET
                    source_id = EXCLUDED.source_id,
                    title = EXCLUDED.title,
                    slug = EXCLUDED.slug,
                    views = EXCLUDED.views,
                    released_at = EXCLUDED.released_at,
                    updated_at = EXCLUDED.updated_at
                 RETURNING id",
                &[
                    &title_id,
                    &chapter.source_id,
                    &number,
                    &chapter.title,
                    &chapter.slug,
                    &chapter.views,
                    &released_at,
                    &now,
                ],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn replace_pages(&self, chapter_id: i64, pages: &[String]) -> SyncResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM pages WHERE chapter_id = $1", &[&chapter_id])
            .await?;
        let insert = tx
            .prepare("INSERT INTO pages (chapter_id, page_number, image_url) VALUES ($1, $2, $3)")
            .await?;
        for (index, url) in pages.iter().enumerate() {
            let page_number = index as i32 + 1;
            tx.execute(&insert, &[&chapter_id, &page_number, url]).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_chapter(&self, chapter_id: i64) -> SyncResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM pages WHERE chapter_id = $1", &[&chapter_id])
            .await?;
        tx.execute("DELETE FROM chapters WHERE id = $1", &[&chapter_id])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn touch_title_content(&self, title_id: i64, at_millis: i64) -> SyncResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE titles SET content_updated_at = $1 WHERE id = $2",
                &[&at_millis, &title_id],
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> SyncResult<()> {
        self.pool.close();
        log::info!("PostgreSQL pool closed");
        Ok(())
    }
}
