use std::sync::Arc;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::models::CanonicalTitle;
use crate::store::CatalogStore;
use crate::throttle::ConnectionThrottle;

pub struct TitleReconciler {
    store: Arc<dyn CatalogStore>,
    throttle: Arc<ConnectionThrottle>,
    tx_timeout: Duration,
}

impl TitleReconciler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        throttle: Arc<ConnectionThrottle>,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            store,
            throttle,
            tx_timeout,
        }
    }

    /// Upsert `title` and its genre links; returns the internal title id.
    ///
    /// Lookup, cover decision and the title + genre transaction run under a
    /// single throttle permit and must finish within `tx_timeout`.
    pub async fn reconcile(&self, title: &CanonicalTitle) -> SyncResult<i64> {
        let secs = self.tx_timeout.as_secs();
        let work = async {
            let existing = self.store.find_title_by_slug(&title.slug).await?;

            let cover_url = match (&existing, &title.cover_url) {
                (Some(stored), Some(new)) if stored.cover_url.as_deref() != Some(new.as_str()) => {
                    log::info!(
                        "Cover changed for '{}': {} -> {}",
                        title.slug,
                        stored.cover_url.as_deref().unwrap_or("<none>"),
                        new
                    );
                    Some(new.clone())
                }
                // a payload without a cover keeps the stored one
                (Some(stored), None) => stored.cover_url.clone(),
                (_, new) => new.clone(),
            };

            let candidate = CanonicalTitle {
                cover_url,
                ..title.clone()
            };
            let id = self.store.save_title(&candidate).await?;
            log::debug!(
                "Saved title '{}' (id {}, {} genres)",
                candidate.slug,
                id,
                candidate.genres.len()
            );
            Ok(id)
        };

        self.throttle
            .run(async {
                match tokio::time::timeout(self.tx_timeout, work).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout {
                        operation: format!("saving title '{}'", title.slug),
                        secs,
                    }),
                }
            })
            .await
    }
}
