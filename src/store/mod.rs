pub mod bus;
pub mod events;

pub use bus::ChangeBus;
pub use events::{ChangeEvent, ChangeKind};
