//! Storage backends and the contract they implement.

pub mod common;
pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;
