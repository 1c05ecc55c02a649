//! Server module for Chatty
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Required-setting checks and production warnings
//! - `state`: Shared handler state
//! - `router`: Route and middleware assembly
//! - `init`: Startup sequence and run loop

pub mod config;
mod init;
mod loader;
mod router;
pub mod state;
mod validation;

pub use init::run;
pub use loader::load_config;
pub use state::AppState;

#[cfg(test)]
mod tests;
