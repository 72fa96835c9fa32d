use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Trade session lifecycle status.
///
/// pending -> trading -> {completed | cancelled}, with decline ending a
/// pending request. Terminal states are final.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Trading,
    Completed,
    Declined,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Completed | TradeStatus::Declined | TradeStatus::Cancelled
        )
    }

    /// Whether a status write from `self` to `to` is legal. Writes
    /// outside this table affect zero rows and are silent no-ops.
    pub fn can_transition_to(self, to: TradeStatus) -> bool {
        matches!(
            (self, to),
            (TradeStatus::Pending, TradeStatus::Trading)
                | (TradeStatus::Pending, TradeStatus::Declined)
                | (TradeStatus::Trading, TradeStatus::Completed)
                | (TradeStatus::Trading, TradeStatus::Cancelled)
        )
    }
}

/// Which side of a trade session the caller is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRole {
    Requester,
    Target,
}

/// Store model for a two-party trade session. Independent of any room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSessionModel {
    pub id: String,
    pub requester_nickname: String,
    pub target_nickname: String,
    pub status: TradeStatus,
    pub requester_accepted: bool,
    pub target_accepted: bool,
    /// Persisted settlement markers, one per side. Written via
    /// conditional update so each side's inventory transfer applies
    /// exactly once even across duplicate completion triggers or a
    /// client restart mid-settlement.
    pub settled_by_requester: bool,
    pub settled_by_target: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeSessionModel {
    pub fn new(requester_nickname: String, target_nickname: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            requester_nickname,
            target_nickname,
            status: TradeStatus::Pending,
            requester_accepted: false,
            target_accepted: false,
            settled_by_requester: false,
            settled_by_target: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The caller's role in this session, if they are a party to it.
    pub fn role_of(&self, nickname: &str) -> Option<TradeRole> {
        if self.requester_nickname == nickname {
            Some(TradeRole::Requester)
        } else if self.target_nickname == nickname {
            Some(TradeRole::Target)
        } else {
            None
        }
    }

    pub fn both_accepted(&self) -> bool {
        self.requester_accepted && self.target_accepted
    }
}

/// One (item, quantity) entry an owner has placed into a trade session.
///
/// At most one line per (session_id, owner_nickname, item_name); a line
/// is removed, not zeroed, when its quantity would drop to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLineModel {
    pub id: String,
    pub session_id: String,
    pub owner_nickname: String,
    pub item_name: String,
    pub item_rarity: String,
    pub quantity: u32,
}

impl OfferLineModel {
    pub fn new(
        session_id: String,
        owner_nickname: String,
        item_name: String,
        item_rarity: String,
        quantity: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            owner_nickname,
            item_name,
            item_rarity,
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TradeStatus::Pending, TradeStatus::Trading, true)]
    #[case(TradeStatus::Pending, TradeStatus::Declined, true)]
    #[case(TradeStatus::Pending, TradeStatus::Completed, false)]
    #[case(TradeStatus::Pending, TradeStatus::Cancelled, false)]
    #[case(TradeStatus::Trading, TradeStatus::Completed, true)]
    #[case(TradeStatus::Trading, TradeStatus::Cancelled, true)]
    #[case(TradeStatus::Trading, TradeStatus::Declined, false)]
    #[case(TradeStatus::Trading, TradeStatus::Pending, false)]
    #[case(TradeStatus::Completed, TradeStatus::Trading, false)]
    #[case(TradeStatus::Completed, TradeStatus::Cancelled, false)]
    #[case(TradeStatus::Declined, TradeStatus::Trading, false)]
    #[case(TradeStatus::Cancelled, TradeStatus::Completed, false)]
    fn test_transition_table(
        #[case] from: TradeStatus,
        #[case] to: TradeStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TradeStatus::Pending.is_terminal());
        assert!(!TradeStatus::Trading.is_terminal());
        assert!(TradeStatus::Completed.is_terminal());
        assert!(TradeStatus::Declined.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_role_of() {
        let session = TradeSessionModel::new("ash".to_string(), "misty".to_string());

        assert_eq!(session.role_of("ash"), Some(TradeRole::Requester));
        assert_eq!(session.role_of("misty"), Some(TradeRole::Target));
        assert_eq!(session.role_of("brock"), None);
    }

    #[test]
    fn test_new_session_defaults() {
        let session = TradeSessionModel::new("ash".to_string(), "misty".to_string());

        assert_eq!(session.status, TradeStatus::Pending);
        assert!(!session.both_accepted());
        assert!(!session.settled_by_requester);
        assert!(!session.settled_by_target);
    }
}
