// Shared data models: stored paper records and parsed listings.

pub mod listing;
pub mod paper;
