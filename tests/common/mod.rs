#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use manga_sync::config::SyncConfig;
use manga_sync::error::{SyncError, SyncResult};
use manga_sync::models::{
    CanonicalChapter, CanonicalTitle, CatalogPage, ChapterNumber, ChapterPage, PersistedChapter,
    PersistedTitle, TitleStatus,
};
use manga_sync::sources::SourceAdapter;
use manga_sync::store::{CatalogStore, SqliteStore};
use manga_sync::sync::SyncOrchestrator;
use manga_sync::throttle::ConnectionThrottle;

pub const SOURCE: &str = "fake";

pub fn title(n: usize) -> CanonicalTitle {
    CanonicalTitle {
        source_id: format!("t{}", n),
        source_name: SOURCE.to_string(),
        title: format!("Title {}", n),
        slug: format!("title-{}", n),
        alt_titles: BTreeMap::new(),
        synopsis: Some(format!("Synopsis {}", n)),
        cover_url: Some(format!("https://img.example.test/{}/cover.jpg", n)),
        status: TitleStatus::Ongoing,
        views: 100,
        genres: Vec::new(),
        created_at: None,
        updated_at: None,
    }
}

pub fn chapter(title_n: usize, number: f64, pages: usize) -> CanonicalChapter {
    CanonicalChapter {
        source_id: format!("t{}-c{}", title_n, number),
        title_source_id: format!("t{}", title_n),
        number: ChapterNumber::new(number),
        title: None,
        slug: format!("chapter-{}", number),
        pages: (1..=pages)
            .map(|p| format!("https://img.example.test/{}/{}/{}.jpg", title_n, number, p))
            .collect(),
        views: 0,
        released_at: None,
    }
}

/// In-memory provider whose payloads tests can change between runs.
#[derive(Default)]
pub struct FakeSource {
    titles: Mutex<BTreeMap<String, (CanonicalTitle, Vec<CanonicalChapter>)>>,
    failing: Mutex<HashSet<String>>,
    /// Chapters per chapter-list page
    pub chapter_page_size: usize,
    pub catalog_page_size: usize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            chapter_page_size: 50,
            catalog_page_size: 50,
            ..Default::default()
        }
    }

    pub fn put(&self, title: CanonicalTitle, chapters: Vec<CanonicalChapter>) {
        self.titles
            .lock()
            .unwrap()
            .insert(title.source_id.clone(), (title, chapters));
    }

    pub fn set_chapters(&self, source_id: &str, chapters: Vec<CanonicalChapter>) {
        if let Some(entry) = self.titles.lock().unwrap().get_mut(source_id) {
            entry.1 = chapters;
        }
    }

    pub fn push_chapter(&self, source_id: &str, chapter: CanonicalChapter) {
        if let Some(entry) = self.titles.lock().unwrap().get_mut(source_id) {
            entry.1.push(chapter);
        }
    }

    pub fn fail(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    fn check(&self, source_id: &str) -> SyncResult<()> {
        if self.failing.lock().unwrap().contains(source_id) {
            return Err(SyncError::SourceUnavailable {
                provider: SOURCE.to_string(),
                message: format!("HTTP 503 for {}", source_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch_catalog_page(&self, page: u32) -> SyncResult<CatalogPage> {
        let titles: Vec<CanonicalTitle> =
            self.titles.lock().unwrap().values().map(|(t, _)| t.clone()).collect();
        let start = (page as usize - 1) * self.catalog_page_size;
        let slice: Vec<CanonicalTitle> =
            titles.iter().skip(start).take(self.catalog_page_size).cloned().collect();
        let has_next = start + self.catalog_page_size < titles.len();
        Ok(CatalogPage {
            titles: slice,
            has_next,
            next_page: has_next.then_some(page + 1),
            total: Some(titles.len() as u64),
        })
    }

    async fn fetch_title_detail(&self, provider_id: &str) -> SyncResult<CanonicalTitle> {
        self.check(provider_id)?;
        self.titles
            .lock()
            .unwrap()
            .get(provider_id)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| SyncError::NotFound(provider_id.to_string()))
    }

    async fn fetch_chapter_list(&self, provider_title_id: &str, page: u32) -> SyncResult<ChapterPage> {
        self.check(provider_title_id)?;
        let chapters = self
            .titles
            .lock()
            .unwrap()
            .get(provider_title_id)
            .map(|(_, c)| c.clone())
            .unwrap_or_default();
        let start = (page as usize - 1) * self.chapter_page_size;
        let has_next = start + self.chapter_page_size < chapters.len();
        Ok(ChapterPage {
            chapters: chapters.into_iter().skip(start).take(self.chapter_page_size).collect(),
            has_next,
            next_page: has_next.then_some(page + 1),
        })
    }
}

/// SQLite store that counts page and delete writes.
pub struct CountingStore {
    pub inner: SqliteStore,
    pub page_writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            page_writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn page_writes(&self) -> usize {
        self.page_writes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.page_writes.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogStore for CountingStore {
    async fn find_title_by_slug(&self, slug: &str) -> SyncResult<Option<PersistedTitle>> {
        self.inner.find_title_by_slug(slug).await
    }

    async fn find_title_by_id(&self, id: i64) -> SyncResult<Option<PersistedTitle>> {
        self.inner.find_title_by_id(id).await
    }

    async fn list_titles_oldest_first(&self, source_name: &str) -> SyncResult<Vec<PersistedTitle>> {
        self.inner.list_titles_oldest_first(source_name).await
    }

    async fn save_title(&self, title: &CanonicalTitle) -> SyncResult<i64> {
        self.inner.save_title(title).await
    }

    async fn find_chapter(&self, title_id: i64, number: ChapterNumber) -> SyncResult<Option<PersistedChapter>> {
        self.inner.find_chapter(title_id, number).await
    }

    async fn list_chapters(&self, title_id: i64) -> SyncResult<Vec<PersistedChapter>> {
        self.inner.list_chapters(title_id).await
    }

    async fn upsert_chapter(&self, title_id: i64, chapter: &CanonicalChapter) -> SyncResult<i64> {
        self.inner.upsert_chapter(title_id, chapter).await
    }

    async fn replace_pages(&self, chapter_id: i64, pages: &[String]) -> SyncResult<()> {
        self.page_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.replace_pages(chapter_id, pages).await
    }

    async fn delete_chapter(&self, chapter_id: i64) -> SyncResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_chapter(chapter_id).await
    }

    async fn touch_title_content(&self, title_id: i64, at_millis: i64) -> SyncResult<()> {
        self.inner.touch_title_content(title_id, at_millis).await
    }

    async fn close(&self) -> SyncResult<()> {
        self.inner.close().await
    }
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub store: Arc<CountingStore>,
    pub throttle: Arc<ConnectionThrottle>,
    pub orchestrator: SyncOrchestrator,
}

pub fn harness() -> Harness {
    let source = Arc::new(FakeSource::new());
    let store = Arc::new(CountingStore::new());
    let throttle = Arc::new(ConnectionThrottle::new(2));
    let orchestrator = SyncOrchestrator::new(
        source.clone(),
        store.clone(),
        throttle.clone(),
        SyncConfig::without_delays(),
    );
    Harness {
        source,
        store,
        throttle,
        orchestrator,
    }
}

pub async fn chapter_numbers(store: &CountingStore, slug: &str) -> Vec<f64> {
    let title = store.find_title_by_slug(slug).await.unwrap().unwrap();
    store
        .list_chapters(title.id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.number.value())
        .collect()
}

