use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::{now_millis, CatalogStore};
use crate::error::{SyncError, SyncResult};
use crate::models::{
    CanonicalChapter, CanonicalTitle, ChapterNumber, PersistedChapter, PersistedPage,
    PersistedTitle, TitleStatus,
};

const TITLE_COLUMNS: &str =
    "id, source_name, source_id, title, slug, cover_url, status, views, updated_at, content_updated_at";
const CHAPTER_COLUMNS: &str = "id, title_id, source_id, number, title, slug, views, released_at";

/// Single-connection SQLite store. The connection sits behind a mutex and is
/// never held across an await point.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SyncResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> SyncResult<T>) -> SyncResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SyncError::Database("sqlite connection mutex poisoned".to_string()))?;
        let conn = guard.as_mut().ok_or(SyncError::StoreClosed)?;
        f(conn)
    }

    /// Genre slugs linked to a title, sorted.
    #[cfg(test)]
    pub(crate) fn genre_slugs(&self, title_id: i64) -> Vec<String> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.slug FROM genres g JOIN title_genres tg ON tg.genre_id = g.id
                 WHERE tg.title_id = ?1 ORDER BY g.slug",
            )?;
            let rows = stmt.query_map([title_id], |r| r.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
        .unwrap()
    }
}

pub fn create_tables(conn: &Connection) -> SyncResult<()> {
    log::debug!("Creating tables if not exists...");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS titles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_name TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            alt_titles TEXT NOT NULL DEFAULT '{}',
            synopsis TEXT,
            cover_url TEXT,
            status TEXT NOT NULL DEFAULT 'unknown',
            views INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            content_updated_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS genres (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_genre_id TEXT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS title_genres (
            title_id INTEGER NOT NULL REFERENCES titles (id) ON DELETE CASCADE,
            genre_id INTEGER NOT NULL REFERENCES genres (id) ON DELETE CASCADE,
            PRIMARY KEY (title_id, genre_id)
        );
        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title_id INTEGER NOT NULL REFERENCES titles (id) ON DELETE CASCADE,
            source_id TEXT NOT NULL,
            number REAL NOT NULL,
            title TEXT,
            slug TEXT NOT NULL,
            views INTEGER NOT NULL DEFAULT 0,
            released_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (title_id, number)
        );
        CREATE TABLE IF NOT EXISTS pages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chapter_id INTEGER NOT NULL REFERENCES chapters (id) ON DELETE CASCADE,
            page_number INTEGER NOT NULL,
            image_url TEXT NOT NULL,
            UNIQUE (chapter_id, page_number)
        );
        CREATE INDEX IF NOT EXISTS idx_titles_source_updated ON titles (source_name, updated_at);
        CREATE INDEX IF NOT EXISTS idx_chapters_title ON chapters (title_id);
        CREATE INDEX IF NOT EXISTS idx_pages_chapter ON pages (chapter_id);",
    )?;
    Ok(())
}

fn title_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedTitle> {
    let status: String = row.get(6)?;
    Ok(PersistedTitle {
        id: row.get(0)?,
        source_name: row.get(1)?,
        source_id: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        cover_url: row.get(5)?,
        status: TitleStatus::from_db(&status),
        views: row.get(7)?,
        updated_at: row.get(8)?,
        content_updated_at: row.get(9)?,
    })
}

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedChapter> {
    let number: f64 = row.get(3)?;
    Ok(PersistedChapter {
        id: row.get(0)?,
        title_id: row.get(1)?,
        source_id: row.get(2)?,
        number: ChapterNumber::new(number),
        title: row.get(4)?,
        slug: row.get(5)?,
        views: row.get(6)?,
        released_at: row.get(7)?,
        pages: Vec::new(),
    })
}

fn load_pages(conn: &Connection, chapter_id: i64) -> rusqlite::Result<Vec<PersistedPage>> {
    let mut stmt = conn.prepare(
        "SELECT chapter_id, page_number, image_url FROM pages WHERE chapter_id = ?1 ORDER BY page_number",
    )?;
    let rows = stmt.query_map([chapter_id], |row| {
        Ok(PersistedPage {
            chapter_id: row.get(0)?,
            page_number: row.get(1)?,
            image_url: row.get(2)?,
        })
    })?;
    rows.collect()
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn find_title_by_slug(&self, slug: &str) -> SyncResult<Option<PersistedTitle>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM titles WHERE slug = ?1", TITLE_COLUMNS);
            Ok(conn.query_row(&sql, [slug], title_from_row).optional()?)
        })
    }

    async fn find_title_by_id(&self, id: i64) -> SyncResult<Option<PersistedTitle>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM titles WHERE id = ?1", TITLE_COLUMNS);
            Ok(conn.query_row(&sql, [id], title_from_row).optional()?)
        })
    }

    async fn list_titles_oldest_first(&self, source_name: &str) -> SyncResult<Vec<PersistedTitle>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM titles WHERE source_name = ?1 ORDER BY updated_at ASC, id ASC",
                TITLE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([source_name], title_from_row)?;
            let mut titles = Vec::new();
            for row in rows {
                titles.push(row?);
            }
            Ok(titles)
        })
    }

    async fn save_title(&self, title: &CanonicalTitle) -> SyncResult<i64> {
        let alt_titles = serde_json::to_string(&title.alt_titles)
            .map_err(|e| SyncError::Database(format!("encoding alt titles: {}", e)))?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            let created_at = title.created_at.map(|d| d.timestamp_millis()).unwrap_or(now);

            tx.execute(
                "INSERT INTO titles (source_name, source_id, title, slug, alt_titles, synopsis, cover_url, status, views, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(slug) DO UPDATE SET
                    source_name = excluded.source_name,
                    source_id = excluded.source_id,
                    title = excluded.title,
                    alt_titles = excluded.alt_titles,
                    synopsis = excluded.synopsis,
                    cover_url = excluded.cover_url,
                    status = excluded.status,
                    views = excluded.views,
                    updated_at = excluded.updated_at",
                params![
                    title.source_name,
                    title.source_id,
                    title.title,
                    title.slug,
                    alt_titles,
                    title.synopsis,
                    title.cover_url,
                    title.status.as_str(),
                    title.views,
                    created_at,
                    now,
                ],
            )?;
            let title_id: i64 =
                tx.query_row("SELECT id FROM titles WHERE slug = ?1", [&title.slug], |r| r.get(0))?;

            if !title.genres.is_empty() {
                tx.execute("DELETE FROM title_genres WHERE title_id = ?1", [title_id])?;
                for genre in &title.genres {
                    tx.execute(
                        "INSERT INTO genres (source_genre_id, name, slug) VALUES (?1, ?2, ?3)
                         ON CONFLICT(slug) DO UPDATE SET name = excluded.name",
                        params![genre.source_genre_id, genre.name, genre.slug],
                    )?;
                    let genre_id: i64 =
                        tx.query_row("SELECT id FROM genres WHERE slug = ?1", [&genre.slug], |r| r.get(0))?;
                    tx.execute(
                        "INSERT OR IGNORE INTO title_genres (title_id, genre_id) VALUES (?1, ?2)",
                        params![title_id, genre_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(title_id)
        })
    }

    async fn find_chapter(
        &self,
        title_id: i64,
        number: ChapterNumber,
    ) -> SyncResult<Option<PersistedChapter>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chapters WHERE title_id = ?1 AND number = ?2",
                CHAPTER_COLUMNS
            );
            let chapter = conn
                .query_row(&sql, params![title_id, number.value()], chapter_from_row)
                .optional()?;
            match chapter {
                Some(mut chapter) => {
                    chapter.pages = load_pages(conn, chapter.id)?;
                    Ok(Some(chapter))
                }
                None => Ok(None),
            }
        })
    }

    async fn list_chapters(&self, title_id: i64) -> SyncResult<Vec<PersistedChapter>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chapters WHERE title_id = ?1 ORDER BY number",
                CHAPTER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut chapters = stmt
                .query_map([title_id], chapter_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT p.chapter_id, p.page_number, p.image_url FROM pages p
                 JOIN chapters c ON c.id = p.chapter_id
                 WHERE c.title_id = ?1 ORDER BY p.chapter_id, p.page_number",
            )?;
            let rows = stmt.query_map([title_id], |row| {
                Ok(PersistedPage {
                    chapter_id: row.get(0)?,
                    page_number: row.get(1)?,
                    image_url: row.get(2)?,
                })
            })?;
            let mut by_chapter: HashMap<i64, Vec<PersistedPage>> = HashMap::new();
            for row in rows {
                let page = row?;
                by_chapter.entry(page.chapter_id).or_default().push(page);
            }
            for chapter in &mut chapters {
                chapter.pages = by_chapter.remove(&chapter.id).unwrap_or_default();
            }
            Ok(chapters)
        })
    }

    async fn upsert_chapter(&self, title_id: i64, chapter: &CanonicalChapter) -> SyncResult<i64> {
        self.with_conn(|conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO chapters (title_id, source_id, number, title, slug, views, released_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(title_id, number) DO UPDATE SET
                    source_id = excluded.source_id,
                    title = excluded.title,
                    slug = excluded.slug,
                    views = excluded.views,
                    released_at = excluded.released_at,
                    updated_at = excluded.updated_at",
                params![
                    title_id,
                    chapter.source_id,
                    chapter.number.value(),
                    chapter.title,
                    chapter.slug,
                    chapter.views,
                    chapter.released_at.map(|d| d.timestamp_millis()),
                    now,
                ],
            )?;
            let id = conn.query_row(
                "SELECT id FROM chapters WHERE title_id = ?1 AND number = ?2",
                params![title_id, chapter.number.value()],
                |r| r.get(0),
            )?;
            Ok(id)
        })
    }

    async fn replace_pages(&self, chapter_id: i64, pages: &[String]) -> SyncResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pages WHERE chapter_id = ?1", [chapter_id])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO pages (chapter_id, page_number, image_url) VALUES (?1, ?2, ?3)",
                )?;
                for (index, url) in pages.iter().enumerate() {
                    stmt.execute(params![chapter_id, index as i64 + 1, url])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn delete_chapter(&self, chapter_id: i64) -> SyncResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pages WHERE chapter_id = ?1", [chapter_id])?;
            tx.execute("DELETE FROM chapters WHERE id = ?1", [chapter_id])?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn touch_title_content(&self, title_id: i64, at_millis: i64) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE titles SET content_updated_at = ?1 WHERE id = ?2",
                params![at_millis, title_id],
            )?;
            Ok(())
        })
    }

    async fn close(&self) -> SyncResult<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SyncError::Database("sqlite connection mutex poisoned".to_string()))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| SyncError::from(e))?;
            log::info!("SQLite store closed");
        }
        Ok(())
    }
}
