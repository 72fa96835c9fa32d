use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    models::{GameMode, PlayerModel, RoomModel},
    repository::{PlayerRepository, RoomRepository},
};
use crate::shared::AppError;

/// Result of creating a room: the stored record plus the join code to
/// show the host.
#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub room: RoomModel,
    pub pin_code: String,
}

/// Creates and joins rooms by join code.
pub struct RoomDirectory {
    rooms: Arc<dyn RoomRepository>,
    players: Arc<dyn PlayerRepository>,
}

impl RoomDirectory {
    pub fn new(rooms: Arc<dyn RoomRepository>, players: Arc<dyn PlayerRepository>) -> Self {
        Self { rooms, players }
    }

    /// Creates a room and inserts the host as its first player.
    ///
    /// The join code is random and not checked against other active
    /// rooms. The host insert is a second, separate write: if it fails
    /// after the room insert succeeded, the room is left host-less (no
    /// rollback) and the cleanup sweep reclaims it later.
    #[instrument(skip(self))]
    pub async fn create_room(
        &self,
        host_nickname: &str,
        mode: GameMode,
        target_rarity: Option<String>,
        time_limit_minutes: i64,
    ) -> Result<CreatedRoom, AppError> {
        if host_nickname.trim().is_empty() {
            return Err(AppError::Validation("Nickname cannot be empty".to_string()));
        }
        if time_limit_minutes < 1 {
            return Err(AppError::Validation(
                "Time limit must be at least one minute".to_string(),
            ));
        }
        if mode == GameMode::Classic
            && target_rarity.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(AppError::Validation(
                "Classic mode needs a target rarity".to_string(),
            ));
        }

        let room = RoomModel::new(
            host_nickname.to_string(),
            mode,
            target_rarity,
            time_limit_minutes,
        );
        debug!(room_id = %room.id, pin = %room.pin_code, "Generated room");

        self.rooms.insert_room(&room).await?;

        let host = PlayerModel::new(room.id.clone(), host_nickname.to_string(), true);
        if let Err(e) = self.players.insert_player(&host).await {
            // Known partial-failure state: room exists with zero
            // players until the cleanup sweep deletes it.
            warn!(room_id = %room.id, error = %e, "Host insert failed after room insert");
            return Err(e);
        }

        info!(
            room_id = %room.id,
            host = %host_nickname,
            mode = %room.mode,
            "Room created"
        );

        Ok(CreatedRoom {
            pin_code: room.pin_code.clone(),
            room,
        })
    }

    /// Joins a waiting room by pin code.
    #[instrument(skip(self))]
    pub async fn join_room(&self, pin_code: &str, nickname: &str) -> Result<RoomModel, AppError> {
        if nickname.trim().is_empty() {
            return Err(AppError::Validation("Nickname cannot be empty".to_string()));
        }

        let room = self
            .rooms
            .find_waiting_by_pin(pin_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound("No joinable game with that code".to_string())
            })?;

        if self
            .players
            .find_by_room_and_nickname(&room.id, nickname)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "Nickname {} is already taken in this room",
                nickname
            )));
        }

        let player = PlayerModel::new(room.id.clone(), nickname.to_string(), false);
        self.players.insert_player(&player).await?;

        info!(room_id = %room.id, nickname = %nickname, "Player joined room");
        Ok(room)
    }

    /// Removes the caller's own player row. Subscription teardown is
    /// the caller dropping its roster handle.
    #[instrument(skip(self))]
    pub async fn leave_room(&self, room_id: &str, nickname: &str) -> Result<(), AppError> {
        let affected = self.players.delete_player(room_id, nickname).await?;
        if affected == 0 {
            debug!(room_id = %room_id, nickname = %nickname, "Player was not in room");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::repository::{InMemoryPlayerRepository, InMemoryRoomRepository};
    use crate::store::ChangeBus;
    use chrono::Utc;

    fn directory() -> (RoomDirectory, Arc<InMemoryRoomRepository>, Arc<InMemoryPlayerRepository>) {
        let rooms = Arc::new(InMemoryRoomRepository::new(ChangeBus::new()));
        let players = Arc::new(InMemoryPlayerRepository::new(ChangeBus::new()));
        (
            RoomDirectory::new(rooms.clone(), players.clone()),
            rooms,
            players,
        )
    }

    #[tokio::test]
    async fn test_create_room_inserts_host_player() {
        let (directory, _rooms, players) = directory();

        let created = directory
            .create_room("host", GameMode::Classic, Some("Rare".to_string()), 5)
            .await
            .unwrap();

        assert_eq!(created.pin_code.len(), 6);
        let roster = players.find_by_room(&created.room.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert!(roster[0].is_host);
        assert_eq!(roster[0].nickname, "host");
    }

    #[tokio::test]
    async fn test_create_room_validates_input() {
        let (directory, _, _) = directory();

        let blank = directory
            .create_room("  ", GameMode::Classic, Some("Rare".to_string()), 5)
            .await;
        assert!(matches!(blank.unwrap_err(), AppError::Validation(_)));

        let no_rarity = directory
            .create_room("host", GameMode::Classic, None, 5)
            .await;
        assert!(matches!(no_rarity.unwrap_err(), AppError::Validation(_)));

        let zero_limit = directory
            .create_room("host", GameMode::ScoredArcade, None, 0)
            .await;
        assert!(matches!(zero_limit.unwrap_err(), AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_scored_arcade_needs_no_rarity() {
        let (directory, _, _) = directory();

        let created = directory
            .create_room("host", GameMode::ScoredArcade, None, 10)
            .await
            .unwrap();
        assert!(created.room.target_rarity.is_none());
    }

    #[tokio::test]
    async fn test_join_room_by_pin() {
        let (directory, _, players) = directory();
        let created = directory
            .create_room("host", GameMode::Classic, Some("Rare".to_string()), 5)
            .await
            .unwrap();

        let room = directory.join_room(&created.pin_code, "ash").await.unwrap();
        assert_eq!(room.id, created.room.id);

        let roster = players.find_by_room(&room.id).await.unwrap();
        assert_eq!(roster.len(), 2);
    }

    #[tokio::test]
    async fn test_join_unknown_pin_is_not_found() {
        let (directory, _, _) = directory();

        let result = directory.join_room("000000", "ash").await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_join_started_room_is_not_found() {
        let (directory, rooms, _) = directory();
        let created = directory
            .create_room("host", GameMode::Classic, Some("Rare".to_string()), 5)
            .await
            .unwrap();

        rooms
            .mark_started(&created.room.id, Utc::now(), Utc::now())
            .await
            .unwrap();

        let result = directory.join_room(&created.pin_code, "ash").await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_join_with_taken_nickname_conflicts() {
        let (directory, _, _) = directory();
        let created = directory
            .create_room("host", GameMode::Classic, Some("Rare".to_string()), 5)
            .await
            .unwrap();

        directory.join_room(&created.pin_code, "ash").await.unwrap();
        let result = directory.join_room(&created.pin_code, "ash").await;
        assert!(matches!(result.unwrap_err(), AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_leave_room_removes_player() {
        let (directory, _, players) = directory();
        let created = directory
            .create_room("host", GameMode::Classic, Some("Rare".to_string()), 5)
            .await
            .unwrap();
        directory.join_room(&created.pin_code, "ash").await.unwrap();

        directory.leave_room(&created.room.id, "ash").await.unwrap();
        // Leaving twice is harmless.
        directory.leave_room(&created.room.id, "ash").await.unwrap();

        let roster = players.find_by_room(&created.room.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].nickname, "host");
    }
}
