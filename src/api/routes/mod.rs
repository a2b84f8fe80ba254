pub mod events;
pub mod export;
pub mod monitors;
pub mod stats;
