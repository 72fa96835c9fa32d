use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::models::{TradeRole, TradeStatus};
use super::repository::{OfferRepository, TradeRepository};
use crate::profile::ProfileRepository;
use crate::shared::AppError;

/// Finalizes trades: acceptance flags, the completion write, and the
/// exactly-once settlement effects.
///
/// Completion is triggered by whichever client first observes both
/// acceptance flags true, and both clients may trigger it redundantly.
/// Two effects are guarded against double-application:
///
/// - the `successful_trades` counters are written only by the
///   requester (static role-based single writer);
/// - each side's inventory transfer is gated on a per-role settlement
///   marker persisted on the session via conditional write, so a
///   duplicate trigger, or a client restart mid-settlement, cannot
///   apply it twice.
pub struct SettlementEngine {
    trades: Arc<dyn TradeRepository>,
    offers: Arc<dyn OfferRepository>,
    profiles: Arc<dyn ProfileRepository>,
}

impl SettlementEngine {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        offers: Arc<dyn OfferRepository>,
        profiles: Arc<dyn ProfileRepository>,
    ) -> Self {
        Self {
            trades,
            offers,
            profiles,
        }
    }

    /// Sets the caller's own acceptance flag. Plain unconditional
    /// write; each flag has exactly one writer by convention.
    #[instrument(skip(self))]
    pub async fn accept_trade(&self, session_id: &str, role: TradeRole) -> Result<(), AppError> {
        let affected = self.trades.set_accepted(session_id, role, true).await?;
        if affected == 0 {
            return Err(AppError::NotFound("Trade session not found".to_string()));
        }
        Ok(())
    }

    /// Withdraws the caller's acceptance while still trading.
    #[instrument(skip(self))]
    pub async fn withdraw_acceptance(
        &self,
        session_id: &str,
        role: TradeRole,
    ) -> Result<(), AppError> {
        let affected = self.trades.set_accepted(session_id, role, false).await?;
        if affected == 0 {
            return Err(AppError::NotFound("Trade session not found".to_string()));
        }
        Ok(())
    }

    /// Completes the trade and applies this side's settlement effects
    /// exactly once. Safe to call redundantly from either party.
    #[instrument(skip(self))]
    pub async fn complete_trade(&self, session_id: &str, role: TradeRole) -> Result<(), AppError> {
        // Idempotent status write: of the two parties racing here,
        // one transition applies and the other affects zero rows.
        let _ = self
            .trades
            .try_transition(session_id, TradeStatus::Completed)
            .await?;

        let session = self
            .trades
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Trade session not found".to_string()))?;

        if session.status != TradeStatus::Completed {
            // A concurrent terminal write (cancel/decline) got there
            // first; nothing to settle.
            debug!(session_id = %session_id, status = %session.status, "Completion had no effect");
            return Ok(());
        }

        if !self.trades.try_mark_settled(session_id, role).await? {
            debug!(session_id = %session_id, role = ?role, "Side already settled");
            return Ok(());
        }

        let (own_nickname, counterpart_nickname) = match role {
            TradeRole::Requester => (
                session.requester_nickname.clone(),
                session.target_nickname.clone(),
            ),
            TradeRole::Target => (
                session.target_nickname.clone(),
                session.requester_nickname.clone(),
            ),
        };

        // Inventory transfer for this side only: give up what we
        // offered, receive what the counterpart offered.
        for line in self.offers.lines_for_owner(session_id, &own_nickname).await? {
            self.profiles
                .remove_items(&own_nickname, &line.item_name, line.quantity)
                .await?;
        }
        for line in self
            .offers
            .lines_for_owner(session_id, &counterpart_nickname)
            .await?
        {
            self.profiles
                .grant_items(
                    &own_nickname,
                    &line.item_name,
                    &line.item_rarity,
                    line.quantity,
                )
                .await?;
        }

        // Counter increments have a single writer: the requester
        // updates both nicknames, so the pair is counted once even
        // though both parties run this method.
        if role == TradeRole::Requester {
            self.profiles
                .increment_successful_trades(&session.requester_nickname)
                .await?;
            self.profiles
                .increment_successful_trades(&session.target_nickname)
                .await?;
        }

        info!(
            session_id = %session_id,
            nickname = %own_nickname,
            "Trade settled for this side"
        );
        Ok(())
    }
}
