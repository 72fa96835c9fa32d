use serde::{Deserialize, Serialize};

/// One (item, quantity) stack in a player's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_name: String,
    pub item_rarity: String,
    pub quantity: u32,
}

/// Registered player profile.
///
/// Profiles outlive rooms and trade sessions: trade initiation only
/// requires the target to be registered, not online. Settlement writes
/// the `successful_trades` counter and the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileModel {
    pub nickname: String,
    pub successful_trades: i64,
    pub inventory: Vec<ItemStack>,
}

impl ProfileModel {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            successful_trades: 0,
            inventory: Vec::new(),
        }
    }

    /// Quantity of a named item currently held.
    pub fn quantity_of(&self, item_name: &str) -> u32 {
        self.inventory
            .iter()
            .find(|s| s.item_name == item_name)
            .map(|s| s.quantity)
            .unwrap_or(0)
    }
}
