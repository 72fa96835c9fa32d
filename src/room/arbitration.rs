use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    models::{GameMode, PlayerModel, RoomStatus},
    repository::{PlayerRepository, RoomRepository},
};
use crate::shared::AppError;

/// Ordering over rarity names.
///
/// Supplied by the game content layer and treated as opaque here: the
/// arbitration logic only asks whether one rarity meets a target.
pub trait RarityOrder: Send + Sync {
    /// Position of a rarity in the ordering, lowest first. `None` for
    /// unknown rarities, which never qualify.
    fn rank(&self, rarity: &str) -> Option<usize>;

    fn meets(&self, rarity: &str, target: &str) -> bool {
        match (self.rank(rarity), self.rank(target)) {
            (Some(r), Some(t)) => r >= t,
            _ => false,
        }
    }
}

/// RarityOrder backed by an explicit tier list.
pub struct TierList {
    tiers: Vec<String>,
}

impl TierList {
    pub fn new<I, S>(tiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tiers: tiers.into_iter().map(Into::into).collect(),
        }
    }
}

impl RarityOrder for TierList {
    fn rank(&self, rarity: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t == rarity)
    }
}

/// Report handling for both game modes.
///
/// Classic mode is the one place in the layer where genuine race
/// correctness matters: concurrent qualifying reports are arbitrated by
/// the store's conditional write, never by a read-then-write sequence.
pub struct WinnerArbitration {
    rooms: Arc<dyn RoomRepository>,
    players: Arc<dyn PlayerRepository>,
    rarity_order: Arc<dyn RarityOrder>,
}

impl WinnerArbitration {
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        players: Arc<dyn PlayerRepository>,
        rarity_order: Arc<dyn RarityOrder>,
    ) -> Self {
        Self {
            rooms,
            players,
            rarity_order,
        }
    }

    /// Records the caller's latest pull and, in classic mode, races for
    /// the winner slot if the rarity qualifies. Losing the race is a
    /// silent no-op, not an error.
    #[instrument(skip(self))]
    pub async fn report_item(
        &self,
        room_id: &str,
        nickname: &str,
        item_name: &str,
        rarity: &str,
    ) -> Result<(), AppError> {
        self.players
            .update_reported_item(room_id, nickname, item_name, rarity)
            .await?;

        let Some(room) = self.rooms.get_room(room_id).await? else {
            return Ok(());
        };

        if room.mode != GameMode::Classic
            || room.status != RoomStatus::Playing
            || room.winner_nickname.is_some()
        {
            return Ok(());
        }

        let Some(target) = room.target_rarity.as_deref() else {
            return Ok(());
        };
        if !self.rarity_order.meets(rarity, target) {
            return Ok(());
        }

        // The local winner check above is only an optimization; the
        // conditional write is what arbitrates concurrent qualifiers.
        let won = self
            .rooms
            .try_claim_winner(room_id, nickname, item_name)
            .await?;
        if won {
            info!(room_id = %room_id, nickname = %nickname, item = %item_name, "Won the round");
        } else {
            debug!(room_id = %room_id, nickname = %nickname, "Winner already claimed");
        }

        Ok(())
    }

    /// Scored-arcade report: plain numeric update on the caller's own
    /// row. Rank is computed from the roster snapshot by the caller.
    #[instrument(skip(self))]
    pub async fn report_score(
        &self,
        room_id: &str,
        nickname: &str,
        count: i64,
    ) -> Result<(), AppError> {
        self.players.update_score(room_id, nickname, count).await?;
        Ok(())
    }
}

/// Sorts a roster snapshot for display: score descending, nickname
/// ascending for ties.
pub fn rank_roster(mut players: Vec<PlayerModel>) -> Vec<PlayerModel> {
    players.sort_by(|a, b| {
        b.current_score
            .cmp(&a.current_score)
            .then_with(|| a.nickname.cmp(&b.nickname))
    });
    players
}
