//! PostgreSQL implementation of the room and player stores.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE rooms (
//!     id TEXT PRIMARY KEY,
//!     pin_code TEXT NOT NULL,
//!     host_nickname TEXT NOT NULL,
//!     mode TEXT NOT NULL,
//!     target_rarity TEXT,
//!     time_limit_minutes BIGINT NOT NULL,
//!     status TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     started_at TIMESTAMPTZ,
//!     ends_at TIMESTAMPTZ,
//!     winner_nickname TEXT,
//!     winning_item TEXT
//! );
//!
//! CREATE TABLE room_players (
//!     id TEXT PRIMARY KEY,
//!     room_id TEXT NOT NULL,
//!     nickname TEXT NOT NULL,
//!     is_host BOOLEAN NOT NULL,
//!     current_item TEXT,
//!     current_rarity TEXT,
//!     current_score BIGINT NOT NULL DEFAULT 0
//! );
//! ```
//!
//! Conditional writes (lifecycle transitions, the winner CAS) are plain
//! `UPDATE ... WHERE` statements whose row count decides the outcome.
//! Change notifications ride on LISTEN/NOTIFY: every mutation emits its
//! record on a fixed channel, and [`spawn_change_feed`] republishes
//! them onto the in-process buses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgListener, PgPool, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::models::{GameMode, PlayerModel, RoomModel, RoomStatus};
use super::repository::{PlayerRepository, RoomRepository};
use crate::shared::AppError;
use crate::store::{ChangeBus, ChangeEvent, ChangeKind};

const ROOM_CHANNEL: &str = "room_changes";
const PLAYER_CHANNEL: &str = "player_changes";

fn store_err(e: sqlx::Error) -> AppError {
    AppError::Store(e.to_string())
}

fn room_from_row(row: &PgRow) -> Result<RoomModel, AppError> {
    let mode: String = row.try_get("mode").map_err(store_err)?;
    let status: String = row.try_get("status").map_err(store_err)?;

    Ok(RoomModel {
        id: row.try_get("id").map_err(store_err)?,
        pin_code: row.try_get("pin_code").map_err(store_err)?,
        host_nickname: row.try_get("host_nickname").map_err(store_err)?,
        mode: GameMode::from_str(&mode)
            .map_err(|_| AppError::Store(format!("Unknown game mode: {}", mode)))?,
        target_rarity: row.try_get("target_rarity").map_err(store_err)?,
        time_limit_minutes: row.try_get("time_limit_minutes").map_err(store_err)?,
        status: RoomStatus::from_str(&status)
            .map_err(|_| AppError::Store(format!("Unknown room status: {}", status)))?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        started_at: row.try_get("started_at").map_err(store_err)?,
        ends_at: row.try_get("ends_at").map_err(store_err)?,
        winner_nickname: row.try_get("winner_nickname").map_err(store_err)?,
        winning_item: row.try_get("winning_item").map_err(store_err)?,
    })
}

fn player_from_row(row: &PgRow) -> Result<PlayerModel, AppError> {
    Ok(PlayerModel {
        id: row.try_get("id").map_err(store_err)?,
        room_id: row.try_get("room_id").map_err(store_err)?,
        nickname: row.try_get("nickname").map_err(store_err)?,
        is_host: row.try_get("is_host").map_err(store_err)?,
        current_item: row.try_get("current_item").map_err(store_err)?,
        current_rarity: row.try_get("current_rarity").map_err(store_err)?,
        current_score: row.try_get("current_score").map_err(store_err)?,
    })
}

async fn notify<T: Serialize>(
    pool: &PgPool,
    channel: &str,
    kind: ChangeKind,
    record: T,
) -> Result<(), AppError> {
    let payload = serde_json::to_string(&ChangeEvent { kind, record })
        .map_err(|e| AppError::Store(e.to_string()))?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(pool)
        .await
        .map_err(store_err)?;
    Ok(())
}

/// PostgreSQL implementation of RoomRepository.
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    #[instrument(skip(self, room))]
    async fn insert_room(&self, room: &RoomModel) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO rooms (id, pin_code, host_nickname, mode, target_rarity, \
             time_limit_minutes, status, created_at, started_at, ends_at, \
             winner_nickname, winning_item) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&room.id)
        .bind(&room.pin_code)
        .bind(&room.host_nickname)
        .bind(room.mode.to_string())
        .bind(&room.target_rarity)
        .bind(room.time_limit_minutes)
        .bind(room.status.to_string())
        .bind(room.created_at)
        .bind(room.started_at)
        .bind(room.ends_at)
        .bind(&room.winner_nickname)
        .bind(&room.winning_item)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to insert room");
            store_err(e)
        })?;

        notify(&self.pool, ROOM_CHANNEL, ChangeKind::Insert, room).await
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError> {
        let row = sqlx::query("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref().map(room_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_waiting_by_pin(&self, pin_code: &str) -> Result<Option<RoomModel>, AppError> {
        let row = sqlx::query(
            "SELECT * FROM rooms WHERE pin_code = $1 AND status = 'waiting' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(pin_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(room_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
        let rows = sqlx::query("SELECT * FROM rooms")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter().map(room_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn mark_started(
        &self,
        room_id: &str,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let row = sqlx::query(
            "UPDATE rooms SET status = 'playing', started_at = $2, ends_at = $3 \
             WHERE id = $1 AND status = 'waiting' RETURNING *",
        )
        .bind(room_id)
        .bind(started_at)
        .bind(ends_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let room = room_from_row(&row)?;
                notify(&self.pool, ROOM_CHANNEL, ChangeKind::Update, &room).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn mark_finished(&self, room_id: &str) -> Result<u64, AppError> {
        let row = sqlx::query(
            "UPDATE rooms SET status = 'finished' \
             WHERE id = $1 AND status = 'playing' RETURNING *",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let room = room_from_row(&row)?;
                notify(&self.pool, ROOM_CHANNEL, ChangeKind::Update, &room).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn try_claim_winner(
        &self,
        room_id: &str,
        nickname: &str,
        winning_item: &str,
    ) -> Result<bool, AppError> {
        // The WHERE clause is the compare-and-swap: of any number of
        // concurrent qualifiers, exactly one update returns a row.
        let row = sqlx::query(
            "UPDATE rooms SET winner_nickname = $2, winning_item = $3 \
             WHERE id = $1 AND status = 'playing' AND winner_nickname IS NULL \
             RETURNING *",
        )
        .bind(room_id)
        .bind(nickname)
        .bind(winning_item)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let room = room_from_row(&row)?;
                notify(&self.pool, ROOM_CHANNEL, ChangeKind::Update, &room).await?;
                Ok(true)
            }
            None => {
                debug!(room_id = %room_id, nickname = %nickname, "Winner claim lost");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_room(&self, room_id: &str) -> Result<u64, AppError> {
        let row = sqlx::query("DELETE FROM rooms WHERE id = $1 RETURNING *")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match row {
            Some(row) => {
                let room = room_from_row(&row)?;
                notify(&self.pool, ROOM_CHANNEL, ChangeKind::Delete, &room).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// PostgreSQL implementation of PlayerRepository.
pub struct PgPlayerRepository {
    pool: PgPool,
}

impl PgPlayerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlayerRepository for PgPlayerRepository {
    #[instrument(skip(self, player))]
    async fn insert_player(&self, player: &PlayerModel) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO room_players (id, room_id, nickname, is_host, current_item, \
             current_rarity, current_score) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&player.id)
        .bind(&player.room_id)
        .bind(&player.nickname)
        .bind(player.is_host)
        .bind(&player.current_item)
        .bind(&player.current_rarity)
        .bind(player.current_score)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to insert player");
            store_err(e)
        })?;

        notify(&self.pool, PLAYER_CHANNEL, ChangeKind::Insert, player).await
    }

    #[instrument(skip(self))]
    async fn find_by_room(&self, room_id: &str) -> Result<Vec<PlayerModel>, AppError> {
        let rows = sqlx::query("SELECT * FROM room_players WHERE room_id = $1 ORDER BY nickname")
            .bind(room_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.iter().map(player_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn find_by_room_and_nickname(
        &self,
        room_id: &str,
        nickname: &str,
    ) -> Result<Option<PlayerModel>, AppError> {
        let row = sqlx::query("SELECT * FROM room_players WHERE room_id = $1 AND nickname = $2")
            .bind(room_id)
            .bind(nickname)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref().map(player_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn update_reported_item(
        &self,
        room_id: &str,
        nickname: &str,
        item_name: &str,
        rarity: &str,
    ) -> Result<u64, AppError> {
        let row = sqlx::query(
            "UPDATE room_players SET current_item = $3, current_rarity = $4 \
             WHERE room_id = $1 AND nickname = $2 RETURNING *",
        )
        .bind(room_id)
        .bind(nickname)
        .bind(item_name)
        .bind(rarity)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let player = player_from_row(&row)?;
                notify(&self.pool, PLAYER_CHANNEL, ChangeKind::Update, &player).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn update_score(
        &self,
        room_id: &str,
        nickname: &str,
        score: i64,
    ) -> Result<u64, AppError> {
        let row = sqlx::query(
            "UPDATE room_players SET current_score = $3 \
             WHERE room_id = $1 AND nickname = $2 RETURNING *",
        )
        .bind(room_id)
        .bind(nickname)
        .bind(score)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let player = player_from_row(&row)?;
                notify(&self.pool, PLAYER_CHANNEL, ChangeKind::Update, &player).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn delete_player(&self, room_id: &str, nickname: &str) -> Result<u64, AppError> {
        let row = sqlx::query(
            "DELETE FROM room_players WHERE room_id = $1 AND nickname = $2 RETURNING *",
        )
        .bind(room_id)
        .bind(nickname)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => {
                let player = player_from_row(&row)?;
                notify(&self.pool, PLAYER_CHANNEL, ChangeKind::Delete, &player).await?;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Bridges LISTEN/NOTIFY onto the in-process change buses so the same
/// subscription code runs against either store implementation.
pub async fn spawn_change_feed(
    pool: PgPool,
    rooms_bus: ChangeBus<RoomModel>,
    players_bus: ChangeBus<PlayerModel>,
) -> Result<JoinHandle<()>, AppError> {
    let mut listener = PgListener::connect_with(&pool).await.map_err(store_err)?;
    listener
        .listen_all([ROOM_CHANNEL, PLAYER_CHANNEL])
        .await
        .map_err(store_err)?;

    let task = tokio::spawn(async move {
        loop {
            let notification = match listener.recv().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Change feed receive failed");
                    continue;
                }
            };

            match notification.channel() {
                ROOM_CHANNEL => {
                    match serde_json::from_str::<ChangeEvent<RoomModel>>(notification.payload()) {
                        Ok(event) => {
                            let topic = event.record.id.clone();
                            rooms_bus.emit(&topic, event).await;
                        }
                        Err(e) => warn!(error = %e, "Malformed room change payload"),
                    }
                }
                PLAYER_CHANNEL => {
                    match serde_json::from_str::<ChangeEvent<PlayerModel>>(notification.payload())
                    {
                        Ok(event) => {
                            let topic = event.record.room_id.clone();
                            players_bus.emit(&topic, event).await;
                        }
                        Err(e) => warn!(error = %e, "Malformed player change payload"),
                    }
                }
                other => debug!(channel = %other, "Ignoring unknown channel"),
            }
        }
    });

    Ok(task)
}
