use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use manga_sync::error::{SyncError, SyncResult};
use manga_sync::models::{CanonicalChapter, CanonicalTitle, ChapterNumber, PersistedChapter, PersistedTitle};
use manga_sync::store::CatalogStore;
use manga_sync::throttle::ConnectionThrottle;

/// Store whose only real operation is a slow `touch_title_content` that
/// notices if the connection was closed underneath it.
#[derive(Default)]
struct SlowStore {
    closed: AtomicBool,
    completed: AtomicUsize,
    completed_at_close: AtomicUsize,
    saw_closed: AtomicBool,
}

#[async_trait]
impl CatalogStore for SlowStore {
    async fn find_title_by_slug(&self, _slug: &str) -> SyncResult<Option<PersistedTitle>> {
        Ok(None)
    }

    async fn find_title_by_id(&self, _id: i64) -> SyncResult<Option<PersistedTitle>> {
        Ok(None)
    }

    async fn list_titles_oldest_first(&self, _source_name: &str) -> SyncResult<Vec<PersistedTitle>> {
        Ok(Vec::new())
    }

    async fn save_title(&self, _title: &CanonicalTitle) -> SyncResult<i64> {
        Err(SyncError::Database("not supported".into()))
    }

    async fn find_chapter(&self, _title_id: i64, _number: ChapterNumber) -> SyncResult<Option<PersistedChapter>> {
        Ok(None)
    }

    async fn list_chapters(&self, _title_id: i64) -> SyncResult<Vec<PersistedChapter>> {
        Ok(Vec::new())
    }

    async fn upsert_chapter(&self, _title_id: i64, _chapter: &CanonicalChapter) -> SyncResult<i64> {
        Err(SyncError::Database("not supported".into()))
    }

    async fn replace_pages(&self, _chapter_id: i64, _pages: &[String]) -> SyncResult<()> {
        Ok(())
    }

    async fn delete_chapter(&self, _chapter_id: i64) -> SyncResult<()> {
        Ok(())
    }

    async fn touch_title_content(&self, title_id: i64, _at_millis: i64) -> SyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            self.saw_closed.store(true, Ordering::SeqCst);
            return Err(SyncError::StoreClosed);
        }
        tokio::time::sleep(Duration::from_millis(10 + (title_id as u64 % 4) * 5)).await;
        if self.closed.load(Ordering::SeqCst) {
            self.saw_closed.store(true, Ordering::SeqCst);
            return Err(SyncError::StoreClosed);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> SyncResult<()> {
        self.completed_at_close
            .store(self.completed.load(Ordering::SeqCst), Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_waits_for_in_flight_operations() {
    let store = Arc::new(SlowStore::default());
    let throttle = Arc::new(ConnectionThrottle::new(3));

    let mut handles = Vec::new();
    for id in 0..12i64 {
        let store = store.clone();
        let throttle = throttle.clone();
        handles.push(tokio::spawn(async move {
            throttle.run(store.touch_title_content(id, 0)).await
        }));
    }

    // let some of them start and queue
    for _ in 0..100 {
        if throttle.status().active > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(throttle.status().active > 0);

    throttle.drain_and_close(store.as_ref()).await.unwrap();

    assert!(!store.saw_closed.load(Ordering::SeqCst));
    assert_eq!(throttle.status().active, 0);

    // every operation either completed before close or was refused outright
    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => completed += 1,
            Err(SyncError::ThrottleClosed) => {}
            Err(other) => panic!("operation saw {}", other),
        }
    }
    assert_eq!(completed, store.completed_at_close.load(Ordering::SeqCst));
    assert!(completed >= 1);
}

#[tokio::test]
async fn test_run_after_drain_is_refused() {
    let store = SlowStore::default();
    let throttle = ConnectionThrottle::new(2);
    throttle.drain_and_close(&store).await.unwrap();

    let err = throttle.run(store.touch_title_content(1, 0)).await.unwrap_err();
    assert!(matches!(err, SyncError::ThrottleClosed));
    assert!(store.closed.load(Ordering::SeqCst));
}
