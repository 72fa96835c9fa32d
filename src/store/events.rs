use serde::{Deserialize, Serialize};

/// What happened to a subscribed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single change notification for a subscribed record.
///
/// The record payload is the row state the emitting writer observed; a
/// consumer must not assume it is the latest state by the time the
/// event is handled. Roster sync, for example, treats every event as a
/// trigger to re-fetch rather than as a patch to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub record: T,
}
