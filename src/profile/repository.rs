use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::{ItemStack, ProfileModel};
use crate::shared::AppError;

/// Trait for player profile store operations.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn upsert_profile(&self, profile: &ProfileModel) -> Result<(), AppError>;
    async fn get_profile(&self, nickname: &str) -> Result<Option<ProfileModel>, AppError>;

    /// Unconditional counter increment. The settlement engine's
    /// single-writer rule (only the trade requester calls this) is what
    /// keeps the count correct, not anything in the store.
    async fn increment_successful_trades(&self, nickname: &str) -> Result<u64, AppError>;

    /// Adds `quantity` of an item to the profile's inventory, creating
    /// the stack if absent.
    async fn grant_items(
        &self,
        nickname: &str,
        item_name: &str,
        item_rarity: &str,
        quantity: u32,
    ) -> Result<(), AppError>;

    /// Removes up to `quantity` of an item; the stack is deleted (not
    /// zeroed) when it runs out. Returns the quantity actually removed.
    async fn remove_items(
        &self,
        nickname: &str,
        item_name: &str,
        quantity: u32,
    ) -> Result<u32, AppError>;
}

/// In-memory implementation of ProfileRepository for development and testing.
pub struct InMemoryProfileRepository {
    profiles: Mutex<HashMap<String, ProfileModel>>,
}

impl Default for InMemoryProfileRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    #[instrument(skip(self, profile))]
    async fn upsert_profile(&self, profile: &ProfileModel) -> Result<(), AppError> {
        debug!(nickname = %profile.nickname, "Upserting profile in memory");

        let mut profiles = self.profiles.lock().unwrap();
        profiles.insert(profile.nickname.clone(), profile.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_profile(&self, nickname: &str) -> Result<Option<ProfileModel>, AppError> {
        let profiles = self.profiles.lock().unwrap();
        Ok(profiles.get(nickname).cloned())
    }

    #[instrument(skip(self))]
    async fn increment_successful_trades(&self, nickname: &str) -> Result<u64, AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        match profiles.get_mut(nickname) {
            Some(profile) => {
                profile.successful_trades += 1;
                debug!(
                    nickname = %nickname,
                    successful_trades = profile.successful_trades,
                    "Incremented trade counter"
                );
                Ok(1)
            }
            None => {
                warn!(nickname = %nickname, "No profile to increment counter on");
                Ok(0)
            }
        }
    }

    #[instrument(skip(self))]
    async fn grant_items(
        &self,
        nickname: &str,
        item_name: &str,
        item_rarity: &str,
        quantity: u32,
    ) -> Result<(), AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(nickname)
            .ok_or_else(|| AppError::NotFound(format!("No profile for {}", nickname)))?;

        match profile
            .inventory
            .iter_mut()
            .find(|s| s.item_name == item_name)
        {
            Some(stack) => stack.quantity += quantity,
            None => profile.inventory.push(ItemStack {
                item_name: item_name.to_string(),
                item_rarity: item_rarity.to_string(),
                quantity,
            }),
        }

        debug!(nickname = %nickname, item = %item_name, quantity = quantity, "Granted items");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_items(
        &self,
        nickname: &str,
        item_name: &str,
        quantity: u32,
    ) -> Result<u32, AppError> {
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles
            .get_mut(nickname)
            .ok_or_else(|| AppError::NotFound(format!("No profile for {}", nickname)))?;

        let Some(pos) = profile
            .inventory
            .iter()
            .position(|s| s.item_name == item_name)
        else {
            warn!(nickname = %nickname, item = %item_name, "No stack to remove items from");
            return Ok(0);
        };

        let stack = &mut profile.inventory[pos];
        let removed = stack.quantity.min(quantity);
        stack.quantity -= removed;
        if stack.quantity == 0 {
            profile.inventory.remove(pos);
        }

        debug!(nickname = %nickname, item = %item_name, removed = removed, "Removed items");
        Ok(removed)
    }
}
