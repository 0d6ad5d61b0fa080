//! Utility modules

pub mod hashing;
pub mod time;
