use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use super::repository::{PlayerRepository, RoomRepository};
use crate::shared::AppError;

/// Configuration for the host-less room sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to run the sweep.
    pub sweep_interval: Duration,
    /// How old a player-less room must be before deletion. Covers the
    /// window between the room insert and the host-player insert.
    pub grace_period: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(5 * 60),
        }
    }
}

/// Background reconciliation for the two-step room creation.
///
/// Room creation inserts the room and then the host player without a
/// transaction; if the second insert fails, the room is left with zero
/// players. This task periodically deletes such rooms once they are
/// past the grace period.
#[instrument(skip(rooms, players))]
pub async fn start_sweep_task(
    rooms: Arc<dyn RoomRepository>,
    players: Arc<dyn PlayerRepository>,
    config: SweepConfig,
) {
    info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        grace_period_secs = config.grace_period.as_secs(),
        "Starting host-less room sweep"
    );

    let mut sweep_interval = interval(config.sweep_interval);

    loop {
        sweep_interval.tick().await;

        match sweep_hostless_rooms(&rooms, &players, config.grace_period).await {
            Ok(deleted_count) => {
                debug!(deleted_count = deleted_count, "Room sweep completed");
            }
            Err(e) => {
                error!(error = %e, "Room sweep failed");
            }
        }
    }
}

/// Deletes rooms that have no players and are older than the grace
/// period. Returns the number of rooms deleted.
#[instrument(skip(rooms, players))]
pub async fn sweep_hostless_rooms(
    rooms: &Arc<dyn RoomRepository>,
    players: &Arc<dyn PlayerRepository>,
    grace_period: Duration,
) -> Result<usize, AppError> {
    let all_rooms = rooms.list_rooms().await?;
    let now = Utc::now();
    let mut deleted_count = 0;

    for room in all_rooms {
        let age = (now - room.created_at).to_std().unwrap_or(Duration::ZERO);
        if age < grace_period {
            continue;
        }

        let roster = players.find_by_room(&room.id).await?;
        if !roster.is_empty() {
            continue;
        }

        match rooms.delete_room(&room.id).await {
            Ok(_) => {
                deleted_count += 1;
                info!(room_id = %room.id, "Deleted host-less room");
            }
            Err(e) => {
                warn!(room_id = %room.id, error = %e, "Failed to delete host-less room");
            }
        }
    }

    Ok(deleted_count)
}
