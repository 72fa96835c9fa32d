use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{
    models::{RoomModel, RoomStatus},
    repository::{PlayerRepository, RoomRepository},
};
use crate::shared::AppError;
use crate::store::ChangeBus;

/// Room lifecycle operations: host-gated start, idempotent end, and a
/// live view of the room record.
pub struct GameLifecycle {
    rooms: Arc<dyn RoomRepository>,
    players: Arc<dyn PlayerRepository>,
    bus: ChangeBus<RoomModel>,
}

impl GameLifecycle {
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        players: Arc<dyn PlayerRepository>,
        bus: ChangeBus<RoomModel>,
    ) -> Self {
        Self {
            rooms,
            players,
            bus,
        }
    }

    /// Starts the game: waiting -> playing with a wall-clock deadline.
    ///
    /// Host-only. The underlying write is conditional on the room still
    /// waiting, so a duplicate start affects zero rows and keeps the
    /// original deadline.
    #[instrument(skip(self))]
    pub async fn start_game(&self, room_id: &str, nickname: &str) -> Result<(), AppError> {
        let room = self
            .rooms
            .get_room(room_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

        let player = self
            .players
            .find_by_room_and_nickname(room_id, nickname)
            .await?
            .ok_or_else(|| AppError::NotFound("You are not in this room".to_string()))?;

        if !player.is_host {
            return Err(AppError::Conflict(
                "Only the host can start the game".to_string(),
            ));
        }

        let now = Utc::now();
        let ends_at = now + ChronoDuration::minutes(room.time_limit_minutes);
        let affected = self.rooms.mark_started(room_id, now, ends_at).await?;
        if affected == 0 {
            debug!(room_id = %room_id, "Game was already started");
        } else {
            info!(room_id = %room_id, ends_at = %ends_at, "Game started");
        }
        Ok(())
    }

    /// Ends the game: playing -> finished.
    ///
    /// Unconditional from the caller's point of view and safe to issue
    /// redundantly from every client whose countdown reaches zero;
    /// finished is absorbing.
    #[instrument(skip(self))]
    pub async fn end_game(&self, room_id: &str) -> Result<(), AppError> {
        let affected = self.rooms.mark_finished(room_id).await?;
        if affected == 0 {
            debug!(room_id = %room_id, "Game was already finished");
        }
        Ok(())
    }

    /// Live view of the room record, refreshed on every change
    /// notification. Used by clients to observe status flips and the
    /// winner fields.
    pub async fn watch_room(&self, room_id: &str) -> Result<RoomWatch, AppError> {
        let initial = self.rooms.get_room(room_id).await?;
        let (tx, rx) = watch::channel(initial);

        let mut events = self.bus.subscribe(room_id).await;
        let rooms = Arc::clone(&self.rooms);
        let room_id = room_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        // The event payload may be stale by now; always
                        // re-read the record instead of trusting it.
                        match rooms.get_room(&room_id).await {
                            Ok(room) => {
                                if tx.send(room).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(room_id = %room_id, error = %e, "Room refetch failed");
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(RoomWatch { rx, task })
    }
}

/// Handle to a live room view. Dropping it tears the subscription down.
pub struct RoomWatch {
    rx: watch::Receiver<Option<RoomModel>>,
    task: JoinHandle<()>,
}

impl RoomWatch {
    pub fn receiver(&self) -> watch::Receiver<Option<RoomModel>> {
        self.rx.clone()
    }

    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn current(&self) -> Option<RoomModel> {
        self.rx.borrow().clone()
    }
}

impl Drop for RoomWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client-local countdown.
///
/// Each client independently recomputes `remaining = max(0, ends_at -
/// now)` on a local tick instead of trusting any pushed "remaining"
/// value, which makes it immune to per-tick network jitter (though not
/// to systematic client clock skew). When the countdown hits zero while
/// the room is still playing, this client issues the end-of-game write
/// itself; every participant doing so is harmless.
pub struct GameClock;

impl GameClock {
    pub fn spawn(
        room_id: &str,
        rooms: Arc<dyn RoomRepository>,
        tick: Duration,
    ) -> CountdownHandle {
        let (tx, rx) = watch::channel(Duration::ZERO);
        let room_id = room_id.to_string();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;

                let room = match rooms.get_room(&room_id).await {
                    Ok(Some(room)) => room,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(room_id = %room_id, error = %e, "Countdown fetch failed");
                        continue;
                    }
                };

                match room.status {
                    RoomStatus::Waiting => continue,
                    RoomStatus::Finished => {
                        let _ = tx.send(Duration::ZERO);
                        break;
                    }
                    RoomStatus::Playing => {
                        let Some(ends_at) = room.ends_at else {
                            continue;
                        };
                        let remaining =
                            (ends_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        let _ = tx.send(remaining);

                        if remaining.is_zero() {
                            info!(room_id = %room_id, "Countdown reached zero, ending game");
                            if let Err(e) = rooms.mark_finished(&room_id).await {
                                warn!(room_id = %room_id, error = %e, "End-of-game write failed");
                            }
                            break;
                        }
                    }
                }
            }
        });

        CountdownHandle { rx, task }
    }
}

/// Handle to a running countdown. Dropping it stops the clock.
pub struct CountdownHandle {
    rx: watch::Receiver<Duration>,
    task: JoinHandle<()>,
}

impl CountdownHandle {
    pub fn remaining(&self) -> Duration {
        *self.rx.borrow()
    }

    pub fn receiver(&self) -> watch::Receiver<Duration> {
        self.rx.clone()
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
