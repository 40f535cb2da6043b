use std::path::PathBuf;
use std::sync::Arc;

use crate::services::{jobs::JobService, queue::JobQueue, store::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ResultStore>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs: JobService::new(queue.clone(), store.clone()),
            queue,
            store,
            upload_dir: Arc::new(upload_dir.into()),
        }
    }
}
