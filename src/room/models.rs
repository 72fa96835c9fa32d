use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Game mode for a room.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// First player to report an item at or above the room's target
    /// rarity wins (store-level CAS arbitration).
    Classic,
    /// Score-ranked arcade variant: no winner field, rank is computed
    /// from the roster snapshot by the caller.
    ScoredArcade,
}

/// Room lifecycle status. Transitions only ever move forward:
/// waiting -> playing -> finished, and finished is absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// Store model for a game room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomModel {
    pub id: String,
    /// Fixed-width numeric join code. Not checked for uniqueness
    /// against other active rooms; collisions are accepted at this
    /// code-space size.
    pub pin_code: String,
    pub host_nickname: String,
    pub mode: GameMode,
    /// Classic mode only.
    pub target_rarity: Option<String>,
    pub time_limit_minutes: i64,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Set at most once per room, only while playing, only in classic
    /// mode, via the store's conditional write.
    pub winner_nickname: Option<String>,
    pub winning_item: Option<String>,
}

impl RoomModel {
    /// Creates a new waiting room with a generated id and join code.
    pub fn new(
        host_nickname: String,
        mode: GameMode,
        target_rarity: Option<String>,
        time_limit_minutes: i64,
    ) -> Self {
        let room_id = petname::Petnames::default().generate_one(2, "-");
        let pin_code = format!("{:06}", rand::rng().random_range(0..1_000_000));

        Self {
            id: room_id,
            pin_code,
            host_nickname,
            mode,
            target_rarity,
            time_limit_minutes,
            status: RoomStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            ends_at: None,
            winner_nickname: None,
            winning_item: None,
        }
    }
}

/// Store model for a player's membership in a room.
///
/// Created on join, deleted on leave. One row per (room_id, nickname).
/// There is no heartbeat eviction: a player whose client crashed
/// without leaving persists as a roster entry until the room ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerModel {
    pub id: String,
    pub room_id: String,
    pub nickname: String,
    pub is_host: bool,
    pub current_item: Option<String>,
    pub current_rarity: Option<String>,
    pub current_score: i64,
}

impl PlayerModel {
    pub fn new(room_id: String, nickname: String, is_host: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id,
            nickname,
            is_host,
            current_item: None,
            current_rarity: None,
            current_score: 0,
        }
    }
}
