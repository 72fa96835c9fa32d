use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::models::{OfferLineModel, TradeRole, TradeSessionModel, TradeStatus};
use crate::shared::AppError;
use crate::store::{ChangeBus, ChangeEvent, ChangeKind};

/// Bus topic carrying incoming requests for a target nickname.
pub fn incoming_topic(nickname: &str) -> String {
    format!("target:{}", nickname)
}

/// Bus topic carrying every change to one session.
pub fn session_topic(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Trait for trade session store operations.
///
/// Status writes go through [`try_transition`], which applies the
/// lifecycle table: an illegal write affects zero rows and is not an
/// error, which is what makes redundant completion/decline calls from
/// both parties safe.
///
/// [`try_transition`]: TradeRepository::try_transition
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert_session(&self, session: &TradeSessionModel) -> Result<(), AppError>;
    async fn get_session(&self, session_id: &str)
        -> Result<Option<TradeSessionModel>, AppError>;

    /// Most recently created pending session targeting a nickname.
    async fn latest_pending_for_target(
        &self,
        nickname: &str,
    ) -> Result<Option<TradeSessionModel>, AppError>;

    async fn try_transition(
        &self,
        session_id: &str,
        to: TradeStatus,
    ) -> Result<bool, AppError>;

    /// Unconditional write of the caller's own acceptance flag. Each
    /// flag has a single writer by convention (its owner).
    async fn set_accepted(
        &self,
        session_id: &str,
        role: TradeRole,
        accepted: bool,
    ) -> Result<u64, AppError>;

    /// Conditional write of the per-role settlement marker. Returns
    /// true for exactly one call per (session, role); the winner
    /// applies that side's settlement effects.
    async fn try_mark_settled(
        &self,
        session_id: &str,
        role: TradeRole,
    ) -> Result<bool, AppError>;
}

/// Trait for offer line store operations.
#[async_trait]
pub trait OfferRepository: Send + Sync {
    async fn insert_line(&self, line: &OfferLineModel) -> Result<(), AppError>;
    async fn get_line(
        &self,
        session_id: &str,
        owner_nickname: &str,
        item_name: &str,
    ) -> Result<Option<OfferLineModel>, AppError>;
    async fn lines_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<OfferLineModel>, AppError>;
    async fn lines_for_owner(
        &self,
        session_id: &str,
        owner_nickname: &str,
    ) -> Result<Vec<OfferLineModel>, AppError>;
    async fn set_quantity(&self, line_id: &str, quantity: u32) -> Result<u64, AppError>;
    async fn delete_line(&self, line_id: &str) -> Result<u64, AppError>;
}

/// In-memory implementation of TradeRepository for development and testing.
pub struct InMemoryTradeRepository {
    sessions: Mutex<HashMap<String, TradeSessionModel>>,
    bus: ChangeBus<TradeSessionModel>,
}

impl InMemoryTradeRepository {
    pub fn new(bus: ChangeBus<TradeSessionModel>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            bus,
        }
    }

    async fn publish(&self, kind: ChangeKind, session: TradeSessionModel) {
        self.bus
            .emit(
                &incoming_topic(&session.target_nickname),
                ChangeEvent {
                    kind,
                    record: session.clone(),
                },
            )
            .await;
        self.bus
            .emit(
                &session_topic(&session.id),
                ChangeEvent {
                    kind,
                    record: session,
                },
            )
            .await;
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    #[instrument(skip(self, session))]
    async fn insert_session(&self, session: &TradeSessionModel) -> Result<(), AppError> {
        debug!(
            session_id = %session.id,
            requester = %session.requester_nickname,
            target = %session.target_nickname,
            "Creating trade session in memory"
        );

        {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&session.id) {
                warn!(session_id = %session.id, "Trade session already exists");
                return Err(AppError::Store("Trade session already exists".to_string()));
            }
            sessions.insert(session.id.clone(), session.clone());
        }

        self.publish(ChangeKind::Insert, session.clone()).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<TradeSessionModel>, AppError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.get(session_id).cloned())
    }

    #[instrument(skip(self))]
    async fn latest_pending_for_target(
        &self,
        nickname: &str,
    ) -> Result<Option<TradeSessionModel>, AppError> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .values()
            .filter(|s| s.target_nickname == nickname && s.status == TradeStatus::Pending)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned())
    }

    #[instrument(skip(self))]
    async fn try_transition(
        &self,
        session_id: &str,
        to: TradeStatus,
    ) -> Result<bool, AppError> {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(session_id) {
                Some(session) if session.status.can_transition_to(to) => {
                    session.status = to;
                    session.updated_at = Utc::now();
                    Some(session.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(session) => {
                info!(session_id = %session_id, status = %to, "Trade session transitioned");
                self.publish(ChangeKind::Update, session).await;
                Ok(true)
            }
            None => {
                debug!(session_id = %session_id, status = %to, "Transition had no effect");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self))]
    async fn set_accepted(
        &self,
        session_id: &str,
        role: TradeRole,
        accepted: bool,
    ) -> Result<u64, AppError> {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.get_mut(session_id).map(|session| {
                match role {
                    TradeRole::Requester => session.requester_accepted = accepted,
                    TradeRole::Target => session.target_accepted = accepted,
                }
                session.updated_at = Utc::now();
                session.clone()
            })
        };

        match updated {
            Some(session) => {
                self.publish(ChangeKind::Update, session).await;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn try_mark_settled(
        &self,
        session_id: &str,
        role: TradeRole,
    ) -> Result<bool, AppError> {
        let updated = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(session_id) {
                Some(session) => {
                    let flag = match role {
                        TradeRole::Requester => &mut session.settled_by_requester,
                        TradeRole::Target => &mut session.settled_by_target,
                    };
                    if *flag {
                        None
                    } else {
                        *flag = true;
                        session.updated_at = Utc::now();
                        Some(session.clone())
                    }
                }
                None => None,
            }
        };

        match updated {
            Some(session) => {
                info!(session_id = %session_id, role = ?role, "Settlement marker claimed");
                self.publish(ChangeKind::Update, session).await;
                Ok(true)
            }
            None => {
                debug!(session_id = %session_id, role = ?role, "Settlement marker already set");
                Ok(false)
            }
        }
    }
}

/// In-memory implementation of OfferRepository for development and testing.
pub struct InMemoryOfferRepository {
    lines: Mutex<HashMap<String, OfferLineModel>>,
}

impl Default for InMemoryOfferRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOfferRepository {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl OfferRepository for InMemoryOfferRepository {
    #[instrument(skip(self, line))]
    async fn insert_line(&self, line: &OfferLineModel) -> Result<(), AppError> {
        let mut lines = self.lines.lock().unwrap();
        let duplicate = lines.values().any(|l| {
            l.session_id == line.session_id
                && l.owner_nickname == line.owner_nickname
                && l.item_name == line.item_name
        });
        if duplicate {
            return Err(AppError::Conflict(
                "Offer line already exists for this item".to_string(),
            ));
        }
        lines.insert(line.id.clone(), line.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_line(
        &self,
        session_id: &str,
        owner_nickname: &str,
        item_name: &str,
    ) -> Result<Option<OfferLineModel>, AppError> {
        let lines = self.lines.lock().unwrap();
        Ok(lines
            .values()
            .find(|l| {
                l.session_id == session_id
                    && l.owner_nickname == owner_nickname
                    && l.item_name == item_name
            })
            .cloned())
    }

    #[instrument(skip(self))]
    async fn lines_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<OfferLineModel>, AppError> {
        let lines = self.lines.lock().unwrap();
        let mut result: Vec<OfferLineModel> = lines
            .values()
            .filter(|l| l.session_id == session_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.owner_nickname
                .cmp(&b.owner_nickname)
                .then_with(|| a.item_name.cmp(&b.item_name))
        });
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn lines_for_owner(
        &self,
        session_id: &str,
        owner_nickname: &str,
    ) -> Result<Vec<OfferLineModel>, AppError> {
        let mut result = self.lines_for_session(session_id).await?;
        result.retain(|l| l.owner_nickname == owner_nickname);
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn set_quantity(&self, line_id: &str, quantity: u32) -> Result<u64, AppError> {
        let mut lines = self.lines.lock().unwrap();
        match lines.get_mut(line_id) {
            Some(line) => {
                line.quantity = quantity;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self))]
    async fn delete_line(&self, line_id: &str) -> Result<u64, AppError> {
        let mut lines = self.lines.lock().unwrap();
        Ok(lines.remove(line_id).map_or(0, |_| 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(requester: &str, target: &str) -> TradeSessionModel {
        TradeSessionModel::new(requester.to_string(), target.to_string())
    }

    fn trade_repo() -> InMemoryTradeRepository {
        InMemoryTradeRepository::new(ChangeBus::new())
    }

    #[tokio::test]
    async fn test_insert_and_get_session() {
        let repo = trade_repo();
        let s = session("ash", "misty");

        repo.insert_session(&s).await.unwrap();

        let fetched = repo.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TradeStatus::Pending);
        assert_eq!(fetched.requester_nickname, "ash");
    }

    #[tokio::test]
    async fn test_transitions_follow_the_table() {
        let repo = trade_repo();
        let s = session("ash", "misty");
        repo.insert_session(&s).await.unwrap();

        // Illegal: pending -> completed.
        assert!(!repo.try_transition(&s.id, TradeStatus::Completed).await.unwrap());

        assert!(repo.try_transition(&s.id, TradeStatus::Trading).await.unwrap());
        assert!(repo.try_transition(&s.id, TradeStatus::Completed).await.unwrap());

        // Terminal states are final.
        assert!(!repo.try_transition(&s.id, TradeStatus::Cancelled).await.unwrap());
        assert!(!repo.try_transition(&s.id, TradeStatus::Trading).await.unwrap());

        let fetched = repo.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TradeStatus::Completed);
    }

    #[tokio::test]
    async fn test_latest_pending_for_target() {
        let repo = trade_repo();

        let older = session("ash", "misty");
        repo.insert_session(&older).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = session("brock", "misty");
        repo.insert_session(&newer).await.unwrap();
        let other_target = session("ash", "brock");
        repo.insert_session(&other_target).await.unwrap();

        let latest = repo.latest_pending_for_target("misty").await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);

        // A session that left pending no longer surfaces.
        repo.try_transition(&newer.id, TradeStatus::Declined).await.unwrap();
        let latest = repo.latest_pending_for_target("misty").await.unwrap().unwrap();
        assert_eq!(latest.id, older.id);
    }

    #[tokio::test]
    async fn test_set_accepted_per_role() {
        let repo = trade_repo();
        let s = session("ash", "misty");
        repo.insert_session(&s).await.unwrap();

        repo.set_accepted(&s.id, TradeRole::Requester, true).await.unwrap();
        let fetched = repo.get_session(&s.id).await.unwrap().unwrap();
        assert!(fetched.requester_accepted);
        assert!(!fetched.target_accepted);

        repo.set_accepted(&s.id, TradeRole::Target, true).await.unwrap();
        let fetched = repo.get_session(&s.id).await.unwrap().unwrap();
        assert!(fetched.both_accepted());
    }

    #[tokio::test]
    async fn test_settlement_marker_is_claimed_once_per_role() {
        let repo = trade_repo();
        let s = session("ash", "misty");
        repo.insert_session(&s).await.unwrap();

        assert!(repo.try_mark_settled(&s.id, TradeRole::Requester).await.unwrap());
        assert!(!repo.try_mark_settled(&s.id, TradeRole::Requester).await.unwrap());

        // The other role has its own marker.
        assert!(repo.try_mark_settled(&s.id, TradeRole::Target).await.unwrap());
        assert!(!repo.try_mark_settled(&s.id, TradeRole::Target).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_changes_reach_both_topics() {
        let bus = ChangeBus::new();
        let repo = InMemoryTradeRepository::new(bus.clone());
        let s = session("ash", "misty");

        let mut incoming = bus.subscribe(&incoming_topic("misty")).await;
        let mut by_session = bus.subscribe(&session_topic(&s.id)).await;

        repo.insert_session(&s).await.unwrap();

        assert_eq!(incoming.recv().await.unwrap().record.id, s.id);
        assert_eq!(by_session.recv().await.unwrap().record.id, s.id);
    }

    #[tokio::test]
    async fn test_offer_lines_unique_per_owner_and_item() {
        let repo = InMemoryOfferRepository::new();
        let line = OfferLineModel::new(
            "session-1".to_string(),
            "ash".to_string(),
            "Geode".to_string(),
            "Rare".to_string(),
            1,
        );
        repo.insert_line(&line).await.unwrap();

        let duplicate = OfferLineModel::new(
            "session-1".to_string(),
            "ash".to_string(),
            "Geode".to_string(),
            "Rare".to_string(),
            2,
        );
        assert!(matches!(
            repo.insert_line(&duplicate).await.unwrap_err(),
            AppError::Conflict(_)
        ));

        // Same item from the other owner is a separate line.
        let other_owner = OfferLineModel::new(
            "session-1".to_string(),
            "misty".to_string(),
            "Geode".to_string(),
            "Rare".to_string(),
            1,
        );
        repo.insert_line(&other_owner).await.unwrap();

        assert_eq!(repo.lines_for_session("session-1").await.unwrap().len(), 2);
        assert_eq!(
            repo.lines_for_owner("session-1", "ash").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_offer_quantity_update_and_delete() {
        let repo = InMemoryOfferRepository::new();
        let line = OfferLineModel::new(
            "session-1".to_string(),
            "ash".to_string(),
            "Geode".to_string(),
            "Rare".to_string(),
            1,
        );
        repo.insert_line(&line).await.unwrap();

        assert_eq!(repo.set_quantity(&line.id, 3).await.unwrap(), 1);
        let fetched = repo
            .get_line("session-1", "ash", "Geode")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.quantity, 3);

        assert_eq!(repo.delete_line(&line.id).await.unwrap(), 1);
        assert_eq!(repo.delete_line(&line.id).await.unwrap(), 0);
        assert!(repo
            .get_line("session-1", "ash", "Geode")
            .await
            .unwrap()
            .is_none());
    }
}
