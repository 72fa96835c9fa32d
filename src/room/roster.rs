use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::{models::PlayerModel, repository::PlayerRepository};
use crate::shared::AppError;
use crate::store::ChangeBus;

/// Maintains the live player list for a room.
///
/// Every change notification triggers a full roster refetch rather than
/// an incremental patch; rosters are small and this removes the whole
/// class of merge bugs. Refetches may complete out of order, so each
/// carries a monotonically increasing token and a completed fetch is
/// applied only if nothing newer has been applied already.
pub struct RosterSync {
    players: Arc<dyn PlayerRepository>,
    bus: ChangeBus<PlayerModel>,
}

impl RosterSync {
    pub fn new(players: Arc<dyn PlayerRepository>, bus: ChangeBus<PlayerModel>) -> Self {
        Self { players, bus }
    }

    #[instrument(skip(self))]
    pub async fn subscribe(&self, room_id: &str) -> Result<RosterHandle, AppError> {
        let initial = self.players.find_by_room(room_id).await?;
        let (tx, rx) = watch::channel(initial);

        let tx = Arc::new(tx);
        let seq = Arc::new(AtomicU64::new(1));
        let applied = Arc::new(Mutex::new(1u64));

        let mut events = self.bus.subscribe(room_id).await;
        let players = Arc::clone(&self.players);
        let room_id = room_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(room_id = %room_id, kind = ?event.kind, "Roster change notification");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed notifications are fine: the refetch
                        // below reads the whole roster anyway.
                        debug!(room_id = %room_id, skipped = skipped, "Roster notifications lagged");
                    }
                    Err(RecvError::Closed) => break,
                }

                let token = seq.fetch_add(1, Ordering::SeqCst) + 1;
                let players = Arc::clone(&players);
                let applied = Arc::clone(&applied);
                let tx = Arc::clone(&tx);
                let room_id = room_id.clone();

                tokio::spawn(async move {
                    match players.find_by_room(&room_id).await {
                        Ok(roster) => {
                            let mut applied = applied.lock().unwrap();
                            if token > *applied {
                                *applied = token;
                                let _ = tx.send(roster);
                            } else {
                                // A later-initiated fetch already
                                // landed; this response is stale.
                                debug!(room_id = %room_id, token = token, "Discarding stale roster fetch");
                            }
                        }
                        Err(e) => {
                            warn!(room_id = %room_id, error = %e, "Roster refetch failed");
                        }
                    }
                });
            }
        });

        Ok(RosterHandle { rx, task })
    }
}

/// Handle to a synced roster. Dropping it tears the subscription down.
pub struct RosterHandle {
    rx: watch::Receiver<Vec<PlayerModel>>,
    task: JoinHandle<()>,
}

impl RosterHandle {
    pub fn receiver(&self) -> watch::Receiver<Vec<PlayerModel>> {
        self.rx.clone()
    }

    pub fn current(&self) -> Vec<PlayerModel> {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for RosterHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
