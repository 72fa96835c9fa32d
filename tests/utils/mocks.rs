use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use packrally::shared::AppError;
use packrally::trade::{InMemoryOfferRepository, OfferLineModel, OfferRepository};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Offer store wrapper that stalls the first remote write. Used to show
/// that the per-session serialized queue applies an owner's edits in
/// submission order even when the first write is slow.
pub struct SlowFirstWriteOfferRepository {
    inner: Arc<InMemoryOfferRepository>,
    stalled: AtomicBool,
    delay: Duration,
}

impl SlowFirstWriteOfferRepository {
    pub fn new(inner: Arc<InMemoryOfferRepository>, delay: Duration) -> Self {
        Self {
            inner,
            stalled: AtomicBool::new(false),
            delay,
        }
    }

    async fn stall_once(&self) {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl OfferRepository for SlowFirstWriteOfferRepository {
    async fn insert_line(&self, line: &OfferLineModel) -> Result<(), AppError> {
        self.stall_once().await;
        self.inner.insert_line(line).await
    }

    async fn get_line(
        &self,
        session_id: &str,
        owner_nickname: &str,
        item_name: &str,
    ) -> Result<Option<OfferLineModel>, AppError> {
        self.inner.get_line(session_id, owner_nickname, item_name).await
    }

    async fn lines_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<OfferLineModel>, AppError> {
        self.inner.lines_for_session(session_id).await
    }

    async fn lines_for_owner(
        &self,
        session_id: &str,
        owner_nickname: &str,
    ) -> Result<Vec<OfferLineModel>, AppError> {
        self.inner.lines_for_owner(session_id, owner_nickname).await
    }

    async fn set_quantity(&self, line_id: &str, quantity: u32) -> Result<u64, AppError> {
        self.stall_once().await;
        self.inner.set_quantity(line_id, quantity).await
    }

    async fn delete_line(&self, line_id: &str) -> Result<u64, AppError> {
        self.stall_once().await;
        self.inner.delete_line(line_id).await
    }
}
