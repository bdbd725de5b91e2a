//! # Device Twin Core
//!
//! Twin document model and message builders for device twin synchronization.
//!
//! This crate provides:
//! - The versioned, partially-populated twin document (`DeviceTwinUpdate`)
//! - Device lifecycle signals (`DeviceStateUpdate`)
//! - Builders that turn raw sensor readings into twin updates
//!
//! Every optional member is omitted from serialized output when absent, so a
//! receiver merges a partial update instead of replacing the stored twin.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod twin;

pub use builder::{build_state_update, build_twin_update, DeviceState, UPDATED};
pub use twin::{
    BaseMessage, DeviceStateUpdate, DeviceTwinUpdate, MsgTwin, TwinValue, TwinVersion,
    TypeMetadata, ValueMetadata,
};
