//! Utility modules for chatty-core
//!
//! - reconnect: Reconnection with bounded exponential backoff and a circuit cooldown

mod reconnect;

pub use reconnect::{reconnect_with_backoff, ReconnectPolicy};
