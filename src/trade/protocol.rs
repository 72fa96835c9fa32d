use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::models::TradeSessionModel;
use super::repository::{incoming_topic, session_topic, TradeRepository};
use crate::profile::ProfileRepository;
use crate::shared::AppError;
use crate::store::ChangeBus;
use crate::trade::models::TradeStatus;

/// Two-party trade session lifecycle: request, accept/decline, cancel,
/// and the live views both parties drive their UI from.
pub struct TradeProtocol {
    trades: Arc<dyn TradeRepository>,
    profiles: Arc<dyn ProfileRepository>,
    bus: ChangeBus<TradeSessionModel>,
}

impl TradeProtocol {
    pub fn new(
        trades: Arc<dyn TradeRepository>,
        profiles: Arc<dyn ProfileRepository>,
        bus: ChangeBus<TradeSessionModel>,
    ) -> Self {
        Self {
            trades,
            profiles,
            bus,
        }
    }

    /// Creates a pending session toward a registered player. The target
    /// does not need to be online, only to exist.
    #[instrument(skip(self))]
    pub async fn initiate_trade_request(
        &self,
        requester_nickname: &str,
        target_nickname: &str,
    ) -> Result<TradeSessionModel, AppError> {
        if target_nickname.trim().is_empty() {
            return Err(AppError::Validation(
                "Enter a nickname to trade with".to_string(),
            ));
        }
        if requester_nickname == target_nickname {
            return Err(AppError::Validation(
                "You cannot trade with yourself".to_string(),
            ));
        }

        if self.profiles.get_profile(target_nickname).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "No player named {}",
                target_nickname
            )));
        }

        let session = TradeSessionModel::new(
            requester_nickname.to_string(),
            target_nickname.to_string(),
        );
        self.trades.insert_session(&session).await?;

        info!(
            session_id = %session.id,
            requester = %requester_nickname,
            target = %target_nickname,
            "Trade request sent"
        );
        Ok(session)
    }

    /// Target accepts: pending -> trading. Requester-blind; if the
    /// session already left pending the write is a silent no-op.
    #[instrument(skip(self))]
    pub async fn accept_trade_request(&self, session_id: &str) -> Result<(), AppError> {
        self.ensure_exists(session_id).await?;
        let applied = self.trades.try_transition(session_id, TradeStatus::Trading).await?;
        if !applied {
            debug!(session_id = %session_id, "Accept had no effect");
        }
        Ok(())
    }

    /// Target declines a pending request.
    #[instrument(skip(self))]
    pub async fn decline_trade_request(&self, session_id: &str) -> Result<(), AppError> {
        self.ensure_exists(session_id).await?;
        let applied = self.trades.try_transition(session_id, TradeStatus::Declined).await?;
        if !applied {
            debug!(session_id = %session_id, "Decline had no effect");
        }
        Ok(())
    }

    /// Either party abandons an active trade. Offer lines are left in
    /// place; they are scoped to the dead session and inert.
    #[instrument(skip(self))]
    pub async fn cancel_trade(&self, session_id: &str) -> Result<(), AppError> {
        self.ensure_exists(session_id).await?;
        let applied = self.trades.try_transition(session_id, TradeStatus::Cancelled).await?;
        if !applied {
            debug!(session_id = %session_id, "Cancel had no effect");
        }
        Ok(())
    }

    async fn ensure_exists(&self, session_id: &str) -> Result<(), AppError> {
        self.trades
            .get_session(session_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("Trade session not found".to_string()))
    }

    /// Surfaces the most recent pending request targeting a nickname,
    /// or None when there is none.
    pub async fn watch_incoming(&self, nickname: &str) -> Result<SessionWatch, AppError> {
        let initial = self.trades.latest_pending_for_target(nickname).await?;
        let (tx, rx) = watch::channel(initial);

        let mut events = self.bus.subscribe(&incoming_topic(nickname)).await;
        let trades = Arc::clone(&self.trades);
        let nickname = nickname.to_string();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        match trades.latest_pending_for_target(&nickname).await {
                            Ok(latest) => {
                                if tx.send(latest).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(nickname = %nickname, error = %e, "Incoming refetch failed");
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(SessionWatch { rx, task })
    }

    /// Live view of one session; both parties use this to observe
    /// acceptance flags and terminal transitions.
    pub async fn watch_session(&self, session_id: &str) -> Result<SessionWatch, AppError> {
        let initial = self.trades.get_session(session_id).await?;
        let (tx, rx) = watch::channel(initial);

        let mut events = self.bus.subscribe(&session_topic(session_id)).await;
        let trades = Arc::clone(&self.trades);
        let session_id = session_id.to_string();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        match trades.get_session(&session_id).await {
                            Ok(session) => {
                                if tx.send(session).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "Session refetch failed");
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(SessionWatch { rx, task })
    }
}

/// Handle to a live trade session view. Dropping it tears the
/// subscription down.
pub struct SessionWatch {
    rx: watch::Receiver<Option<TradeSessionModel>>,
    task: JoinHandle<()>,
}

impl SessionWatch {
    pub fn receiver(&self) -> watch::Receiver<Option<TradeSessionModel>> {
        self.rx.clone()
    }

    pub fn current(&self) -> Option<TradeSessionModel> {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
