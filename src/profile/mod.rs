pub mod models;
pub mod repository;

pub use models::{ItemStack, ProfileModel};
pub use repository::{InMemoryProfileRepository, ProfileRepository};
