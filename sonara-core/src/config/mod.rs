//! Configuration descriptors for contexts and their background subsystems.

pub mod context_desc;
pub mod room_settings;

pub use context_desc::SonaraContextDesc;
pub use room_settings::{DynamicRoomSettings, PropagationSettings};
