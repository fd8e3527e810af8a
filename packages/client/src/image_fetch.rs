//! Bounded, deduplicated image fetching and revocable object URLs.
//!
//! At most `max_concurrent` fetches run at once; further requests wait in
//! FIFO order. Requests for a path already in flight join the pending fetch
//! instead of issuing a new one. A fetch runs to completion in its own task,
//! so callers may drop their future at any time. Every caller gets its own [`ObjectUrl`],
//! which is revoked when released or dropped without affecting other
//! holders of the same image.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Semaphore;

use crate::error::{ApiError, ImageFetchError};

/// Where image bytes come from (the authenticated backend in production)
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, path: &str) -> Result<Vec<u8>, ApiError>;
}

type ImageBytes = Arc<Vec<u8>>;
type PendingFetch = Shared<BoxFuture<'static, Result<ImageBytes, ImageFetchError>>>;

/// Registry of live object URLs
#[derive(Clone, Default)]
pub struct ObjectUrlRegistry {
    entries: Arc<Mutex<HashMap<String, ImageBytes>>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ImageBytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `bytes` under a fresh URL
    pub fn create(&self, bytes: ImageBytes) -> ObjectUrl {
        let url = format!("blob:hondacamera/{}", uuid::Uuid::new_v4());
        self.entries().insert(url.clone(), bytes);
        ObjectUrl {
            url,
            registry: self.clone(),
        }
    }

    /// Bytes behind a live URL
    pub fn resolve(&self, url: &str) -> Option<ImageBytes> {
        self.entries().get(url).cloned()
    }

    fn revoke(&self, url: &str) -> bool {
        self.entries().remove(url).is_some()
    }

    /// Number of live URLs
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// One consumer's handle on a fetched image. Revoked on drop.
pub struct ObjectUrl {
    url: String,
    registry: ObjectUrlRegistry,
}

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The image bytes, while this URL is live
    pub fn bytes(&self) -> Option<ImageBytes> {
        self.registry.resolve(&self.url)
    }

    /// Release the URL now
    pub fn revoke(self) {
        // Drop does the work
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}

impl std::fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectUrl").field(&self.url).finish()
    }
}

/// Image loader with a concurrency cap and in-flight deduplication
pub struct ImageFetcher {
    source: Arc<dyn ImageSource>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<String, PendingFetch>>>,
    registry: ObjectUrlRegistry,
}

impl ImageFetcher {
    pub fn new(source: Arc<dyn ImageSource>, max_concurrent: usize) -> Self {
        Self {
            source,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            registry: ObjectUrlRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    /// Number of distinct paths currently being fetched
    pub fn in_flight(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Fetch `path` and hand out a fresh object URL for it
    pub async fn fetch(&self, path: &str) -> Result<ObjectUrl, ImageFetchError> {
        let pending = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            match in_flight.get(path) {
                Some(pending) => {
                    tracing::debug!("Joining in-flight fetch of {}", path);
                    pending.clone()
                }
                None => {
                    let pending = self.start(path);
                    in_flight.insert(path.to_string(), pending.clone());
                    pending
                }
            }
        };

        let bytes = pending.await?;
        Ok(self.registry.create(bytes))
    }

    /// Stop accepting queued fetches; waiters get [`ImageFetchError::Closed`]
    pub fn close(&self) {
        self.permits.close();
    }

    /// Spawn the fetch so it owns its permit and map entry whether or not
    /// anyone is still waiting for it.
    fn start(&self, path: &str) -> PendingFetch {
        let source = Arc::clone(&self.source);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        let path = path.to_string();

        let task = tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => source
                    .fetch_image(&path)
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        tracing::warn!("Image fetch of {} failed: {}", path, e);
                        ImageFetchError::Source(Arc::new(e))
                    }),
                Err(_) => Err(ImageFetchError::Closed),
            };
            lock_in_flight(&in_flight).remove(&path);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                tracing::warn!("Image fetch task ended early: {}", e);
                Err(ImageFetchError::Closed)
            })
        }
        .boxed()
        .shared()
    }
}

fn lock_in_flight(
    in_flight: &Mutex<HashMap<String, PendingFetch>>,
) -> MutexGuard<'_, HashMap<String, PendingFetch>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}
