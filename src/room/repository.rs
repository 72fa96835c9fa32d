use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::models::{PlayerModel, RoomModel, RoomStatus};
use crate::shared::AppError;
use crate::store::{ChangeBus, ChangeEvent, ChangeKind};

/// Trait for room store operations.
///
/// Lifecycle writes are conditional on the current status so that the
/// forward-only invariant (waiting -> playing -> finished) holds no
/// matter how many clients issue them; a write whose condition no
/// longer holds affects zero rows and is not an error.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn insert_room(&self, room: &RoomModel) -> Result<(), AppError>;
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError>;

    /// Looks up a joinable room: matching pin code, still waiting.
    async fn find_waiting_by_pin(&self, pin_code: &str) -> Result<Option<RoomModel>, AppError>;

    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError>;

    /// waiting -> playing. Returns the number of rows affected.
    async fn mark_started(
        &self,
        room_id: &str,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    /// playing -> finished. Finished is absorbing, so a redundant call
    /// affects zero rows.
    async fn mark_finished(&self, room_id: &str) -> Result<u64, AppError>;

    /// Compare-and-swap winner assignment: succeeds only if the room is
    /// still playing and no winner has been recorded. Exactly one of
    /// any set of concurrent callers observes `true`.
    async fn try_claim_winner(
        &self,
        room_id: &str,
        nickname: &str,
        winning_item: &str,
    ) -> Result<bool, AppError>;

    async fn delete_room(&self, room_id: &str) -> Result<u64, AppError>;
}

/// Trait for player store operations within a room.
#[async_trait]
pub trait PlayerRepository: Send + Sync {
    async fn insert_player(&self, player: &PlayerModel) -> Result<(), AppError>;
    async fn find_by_room(&self, room_id: &str) -> Result<Vec<PlayerModel>, AppError>;
    async fn find_by_room_and_nickname(
        &self,
        room_id: &str,
        nickname: &str,
    ) -> Result<Option<PlayerModel>, AppError>;

    async fn update_reported_item(
        &self,
        room_id: &str,
        nickname: &str,
        item_name: &str,
        rarity: &str,
    ) -> Result<u64, AppError>;

    async fn update_score(
        &self,
        room_id: &str,
        nickname: &str,
        score: i64,
    ) -> Result<u64, AppError>;

    async fn delete_player(&self, room_id: &str, nickname: &str) -> Result<u64, AppError>;
}

/// In-memory implementation of RoomRepository for development and
/// testing. Conditional writes are realized by checking and mutating
/// under one lock, which is exactly the atomicity the production store
/// provides per row.
pub struct InMemoryRoomRepository {
    rooms: Mutex<HashMap<String, RoomModel>>,
    bus: ChangeBus<RoomModel>,
}

impl InMemoryRoomRepository {
    pub fn new(bus: ChangeBus<RoomModel>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            bus,
        }
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    #[instrument(skip(self, room))]
    async fn insert_room(&self, room: &RoomModel) -> Result<(), AppError> {
        debug!(room_id = %room.id, host = %room.host_nickname, "Creating room in memory");

        {
            let mut rooms = self.rooms.lock().unwrap();
            if rooms.contains_key(&room.id) {
                warn!(room_id = %room.id, "Room already exists in memory");
                return Err(AppError::Store("Room already exists".to_string()));
            }
            rooms.insert(room.id.clone(), room.clone());
        }

        self.bus
            .emit(
                &room.id,
                ChangeEvent {
                    kind: ChangeKind::Insert,
                    record: room.clone(),
                },
            )
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomModel>, AppError> {
        let rooms = self.rooms.lock().unwrap();
        Ok(rooms.get(room_id).cloned())
    }

    #[instrument(skip(self))]
    async fn find_waiting_by_pin(&self, pin_code: &str) -> Result<Option<RoomModel>, AppError> {
        let rooms = self.rooms.lock().unwrap();
        // On a pin collision the most recently created waiting room wins.
        let room = rooms
            .values()
            .filter(|r| r.pin_code == pin_code && r.status == RoomStatus::Waiting)
            .max_by_key(|r| r.created_at)
            .cloned();
        Ok(room)
    }

    #[instrument(skip(self))]
    async fn list_rooms(&self) -> Result<Vec<RoomModel>, AppError> {
        let rooms = self.rooms.lock().unwrap();
        Ok(rooms.values().cloned().collect())
    }

    #[instrument(skip(self))]
    async fn mark_started(
        &self,
        room_id: &str,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let updated = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get_mut(room_id) {
                Some(room) if room.status == RoomStatus::Waiting => {
                    room.status = RoomStatus::Playing;
                    room.started_at = Some(started_at);
                    room.ends_at = Some(ends_at);
                    Some(room.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(room) => {
                info!(room_id = %room_id, ends_at = %ends_at, "Room started");
                self.bus
                    .emit(
                        room_id,
                        ChangeEvent {
                            kind: ChangeKind::Update,
                            record: room,
                        },
                    )
                    .await;
                Ok(1)
            }
            None => {
                debug!(room_id = %room_id, "Start had no effect");
                Ok(0)
            }
        }
    }

    #[instrument(skip(self))]
    async fn mark_finished(&self, room_id: &str) -> Result<u64, AppError> {
        let updated = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get_mut(room_id) {
                Some(room) if room.status == RoomStatus::Playing => {
                    room.status = RoomStatus::Finished;
                    Some(room.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(room) => {
                info!(room_id = %room_id, "Room finished");
                self.bus
                    .emit(
                        room_id,
                        ChangeEvent {
                            kind: ChangeKind::Update,
                            record: room,
                        },
                    )
                    .await;
                Ok(1)
            }
            None => {
                // Redundant end-of-game writes from multiple clients land here.
                debug!(room_id = %room_id, "Finish had no effect");
                Ok(0)
            }
        }
    }

    #[instrument(skip(self))]
    async fn try_claim_winner(
        &self,
        room_id: &str,
        nickname: &str,
        winning_item: &str,
    ) -> Result<bool, AppError> {
        let claimed = {
            let mut rooms = self.rooms.lock().unwrap();
            match rooms.get_mut(room_id) {
                Some(room)
                    if room.status == RoomStatus::Playing && room.winner_nickname.is_none() =>
                {
                    room.winner_nickname = Some(nickname.to_string());
                    room.winning_item = Some(winning_item.to_string());
                    Some(room.clone())
                }
                _ => None,
            }
        };

        match claimed {
            Some(room) => {
                info!(room_id = %room_id, winner = %nickname, item = %winning_item, "Winner claimed");
                self.bus
                    .emit(
                        room_id,
                        ChangeEvent {
                            kind: ChangeKind::Update,
                            record: room,
                        },
                    )
                    .await;
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
        let removed = {
            let mut rooms = self.rooms.lock().unwrap();
            rooms.remove(room_id)
        };

        match removed {
            Some(room) => {
                info!(room_id = %room_id, "Room deleted");
                self.bus
                    .emit(
                        room_id,
                        ChangeEvent {
                            kind: ChangeKind::Delete,
                            record: room,
                        },
                    )
                    .await;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// In-memory implementation of PlayerRepository for development and testing.
pub struct InMemoryPlayerRepository {
    players: Mutex<HashMap<String, PlayerModel>>,
    bus: ChangeBus<PlayerModel>,
}

impl InMemoryPlayerRepository {
    pub fn new(bus: ChangeBus<PlayerModel>) -> Self {
        Self {
            players: Mutex::new(HashMap::new()),
            bus,
        }
    }

    fn emit_event(&self, kind: ChangeKind, record: PlayerModel) -> (String, ChangeEvent<PlayerModel>) {
        (record.room_id.clone(), ChangeEvent { kind, record })
    }
}

#[async_trait]
impl PlayerRepository for InMemoryPlayerRepository {
    #[instrument(skip(self, player))]
    async fn insert_player(&self, player: &PlayerModel) -> Result<(), AppError> {
        debug!(
            room_id = %player.room_id,
            nickname = %player.nickname,
            is_host = player.is_host,
            "Creating player in memory"
        );

        {
            let mut players = self.players.lock().unwrap();
            if players.contains_key(&player.id) {
                return Err(AppError::Store("Player already exists".to_string()));
            }
            players.insert(player.id.clone(), player.clone());
        }

        let (topic, event) = self.emit_event(ChangeKind::Insert, player.clone());
        self.bus.emit(&topic, event).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_room(&self, room_id: &str) -> Result<Vec<PlayerModel>, AppError> {
        let players = self.players.lock().unwrap();
        let mut roster: Vec<PlayerModel> = players
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        roster.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        Ok(roster)
    }

    #[instrument(skip(self))]
    async fn find_by_room_and_nickname(
        &self,
        room_id: &str,
        nickname: &str,
    ) -> Result<Option<PlayerModel>, AppError> {
        let players = self.players.lock().unwrap();
        Ok(players
            .values()
            .find(|p| p.room_id == room_id && p.nickname == nickname)
            .cloned())
    }

    #[instrument(skip(self))]
    async fn update_reported_item(
        &self,
        room_id: &str,
        nickname: &str,
        item_name: &str,
        rarity: &str,
    ) -> Result<u64, AppError> {
        let updated = {
            let mut players = self.players.lock().unwrap();
            players
                .values_mut()
                .find(|p| p.room_id == room_id && p.nickname == nickname)
                .map(|p| {
                    p.current_item = Some(item_name.to_string());
                    p.current_rarity = Some(rarity.to_string());
                    p.clone()
                })
        };

        match updated {
            Some(player) => {
                let (topic, event) = self.emit_event(ChangeKind::Update, player);
                self.bus.emit(&topic, event).await;
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
        let updated = {
            let mut players = self.players.lock().unwrap();
            players
                .values_mut()
                .find(|p| p.room_id == room_id && p.nickname == nickname)
                .map(|p| {
                    p.current_score = score;
                    p.clone()
                })
        };

        match updated {
            Some(player) => {
                let (topic, event) = self.emit_event(ChangeKind::Update, player);
                self.bus.emit(&topic, event).await;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn delete_player(&self, room_id: &str, nickname: &str) -> Result<u64, AppError> {
        let removed = {
            let mut players = self.players.lock().unwrap();
            let id = players
                .values()
                .find(|p| p.room_id == room_id && p.nickname == nickname)
                .map(|p| p.id.clone());
            id.and_then(|id| players.remove(&id))
        };

        match removed {
            Some(player) => {
                info!(room_id = %room_id, nickname = %nickname, "Player deleted");
                let (topic, event) = self.emit_event(ChangeKind::Delete, player);
                self.bus.emit(&topic, event).await;
                Ok(1)
            }
            None => {
                debug!(room_id = %room_id, nickname = %nickname, "No player to delete");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::models::GameMode;
    use std::sync::Arc;

    fn classic_room(host: &str) -> RoomModel {
        RoomModel::new(
            host.to_string(),
            GameMode::Classic,
            Some("Rare".to_string()),
            5,
        )
    }

    fn room_repo() -> InMemoryRoomRepository {
        InMemoryRoomRepository::new(ChangeBus::new())
    }

    #[tokio::test]
    async fn test_insert_and_get_room() {
        let repo = room_repo();
        let room = classic_room("host");

        repo.insert_room(&room).await.unwrap();

        let fetched = repo.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, room.id);
        assert_eq!(fetched.status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_insert_duplicate_room() {
        let repo = room_repo();
        let room = classic_room("host");

        repo.insert_room(&room).await.unwrap();
        let result = repo.insert_room(&room).await;

        assert!(matches!(result.unwrap_err(), AppError::Store(_)));
    }

    #[tokio::test]
    async fn test_find_waiting_by_pin_excludes_started_rooms() {
        let repo = room_repo();
        let room = classic_room("host");
        repo.insert_room(&room).await.unwrap();

        let found = repo.find_waiting_by_pin(&room.pin_code).await.unwrap();
        assert!(found.is_some());

        repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap();

        let found = repo.find_waiting_by_pin(&room.pin_code).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_is_forward_only() {
        let repo = room_repo();
        let room = classic_room("host");
        repo.insert_room(&room).await.unwrap();

        // Finish before start has no effect.
        assert_eq!(repo.mark_finished(&room.id).await.unwrap(), 0);

        assert_eq!(
            repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap(),
            1
        );
        // Double start has no effect.
        assert_eq!(
            repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap(),
            0
        );

        assert_eq!(repo.mark_finished(&room.id).await.unwrap(), 1);
        // Finished is absorbing.
        assert_eq!(repo.mark_finished(&room.id).await.unwrap(), 0);
        assert_eq!(
            repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap(),
            0
        );

        let fetched = repo.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RoomStatus::Finished);
    }

    #[tokio::test]
    async fn test_winner_claim_requires_playing() {
        let repo = room_repo();
        let room = classic_room("host");
        repo.insert_room(&room).await.unwrap();

        assert!(!repo.try_claim_winner(&room.id, "ash", "Geode").await.unwrap());

        repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap();
        assert!(repo.try_claim_winner(&room.id, "ash", "Geode").await.unwrap());

        // Second claim loses, winner is not overwritten.
        assert!(!repo.try_claim_winner(&room.id, "misty", "Pearl").await.unwrap());
        let fetched = repo.get_room(&room.id).await.unwrap().unwrap();
        assert_eq!(fetched.winner_nickname.as_deref(), Some("ash"));
        assert_eq!(fetched.winning_item.as_deref(), Some("Geode"));
    }

    #[tokio::test]
    async fn test_concurrent_winner_claims_exactly_one_wins() {
        let repo = Arc::new(room_repo());
        let room = classic_room("host");
        repo.insert_room(&room).await.unwrap();
        repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap();

        let handles = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                let room_id = room.id.clone();
                tokio::spawn(async move {
                    repo.try_claim_winner(&room_id, &format!("player-{}", i), "Geode")
                        .await
                })
            })
            .collect::<Vec<_>>();

        let results = futures::future::join_all(handles).await;
        let wins = results
            .into_iter()
            .filter(|r| *r.as_ref().unwrap().as_ref().unwrap())
            .count();

        assert_eq!(wins, 1);

        let fetched = repo.get_room(&room.id).await.unwrap().unwrap();
        assert!(fetched.winner_nickname.is_some());
    }

    #[tokio::test]
    async fn test_room_changes_are_published() {
        let bus = ChangeBus::new();
        let repo = InMemoryRoomRepository::new(bus.clone());
        let room = classic_room("host");

        let mut rx = bus.subscribe(&room.id).await;
        repo.insert_room(&room).await.unwrap();
        repo.mark_started(&room.id, Utc::now(), Utc::now()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Insert);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.record.status, RoomStatus::Playing);
    }

    #[tokio::test]
    async fn test_player_crud_and_roster_order() {
        let repo = InMemoryPlayerRepository::new(ChangeBus::new());

        repo.insert_player(&PlayerModel::new("room-1".into(), "zoe".into(), true))
            .await
            .unwrap();
        repo.insert_player(&PlayerModel::new("room-1".into(), "ash".into(), false))
            .await
            .unwrap();
        repo.insert_player(&PlayerModel::new("room-2".into(), "misty".into(), true))
            .await
            .unwrap();

        let roster = repo.find_by_room("room-1").await.unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].nickname, "ash");
        assert_eq!(roster[1].nickname, "zoe");

        assert_eq!(repo.delete_player("room-1", "ash").await.unwrap(), 1);
        assert_eq!(repo.delete_player("room-1", "ash").await.unwrap(), 0);
        assert_eq!(repo.find_by_room("room-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_reported_item_and_score() {
        let repo = InMemoryPlayerRepository::new(ChangeBus::new());
        repo.insert_player(&PlayerModel::new("room-1".into(), "ash".into(), false))
            .await
            .unwrap();

        assert_eq!(
            repo.update_reported_item("room-1", "ash", "Geode", "Rare").await.unwrap(),
            1
        );
        assert_eq!(repo.update_score("room-1", "ash", 12).await.unwrap(), 1);
        assert_eq!(
            repo.update_score("room-1", "nobody", 3).await.unwrap(),
            0
        );

        let player = repo
            .find_by_room_and_nickname("room-1", "ash")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(player.current_item.as_deref(), Some("Geode"));
        assert_eq!(player.current_rarity.as_deref(), Some("Rare"));
        assert_eq!(player.current_score, 12);
    }

    #[tokio::test]
    async fn test_player_changes_are_published_per_room() {
        let bus = ChangeBus::new();
        let repo = InMemoryPlayerRepository::new(bus.clone());

        let mut rx = bus.subscribe("room-1").await;
        repo.insert_player(&PlayerModel::new("room-1".into(), "ash".into(), false))
            .await
            .unwrap();
        repo.insert_player(&PlayerModel::new("room-2".into(), "misty".into(), false))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.record.nickname, "ash");
        assert!(rx.try_recv().is_err());
    }
}
