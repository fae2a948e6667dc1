//! Common utilities and types shared across the proctoring monitor components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifier newtypes
pub mod types;

/// Module for the records read from the external stores
pub mod models;

/// Module for the external store contracts
pub mod stores;

/// Module for the publish/subscribe channel contract
pub mod transport;

/// Module for common configuration
pub mod config;
