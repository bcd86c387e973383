//! # hwx Common Library
//!
//! Shared code for the hwx workspace:
//! - Error type and result alias
//! - TOML configuration and root folder resolution
//! - Logging bootstrap
//! - Chain progress events and the EventBus that carries them

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
