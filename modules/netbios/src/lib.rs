//! NetBIOS name service discovery probe.
//!
//! Sends a node status query to every target, follows up each status reply with a
//! name query for the reported host name, and reports the host together with every
//! interface address it lists for itself.

pub mod codec;
pub mod probe;
pub mod reply;
pub mod tracker;

pub use probe::{NetbiosConfig, NetbiosProbe};
