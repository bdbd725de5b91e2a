//! # Device Twin Protocol
//!
//! Topic scheme and payload encoding for device twin synchronization.
//!
//! ## Topics
//!
//! Topic scheme: `{prefix}{device_id}{suffix}` with the default prefix
//! `$hw/events/device`:
//!
//! - `/state/update`: device lifecycle state
//! - `/twin/update`: twin update towards the edge
//! - `/twin/cloud_update`: twin update towards the cloud
//!
//! ## Payloads
//!
//! UTF-8 JSON; absent optional members are omitted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{decode, encode, MessageError};
pub use topics::{MessageClass, TopicScheme, UnknownClass, DEFAULT_PREFIX};
