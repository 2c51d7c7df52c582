pub mod config;
pub mod decision;
pub mod equity;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod store;

pub use error::{BotError, Result};
pub use models::*;
