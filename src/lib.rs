//! Offline cache proxy for the lookbook frontend.
//!
//! A versioned, cache-first proxy that keeps the lookbook shell and its API
//! responses available offline. Each deployed version owns one cache
//! generation; activating a version deletes every other generation.

pub mod cache;
pub mod config;
pub mod http;
pub mod message;
pub mod network;
pub mod policy;
pub mod registration;
pub mod server;
pub mod worker;

#[cfg(test)]
mod testing;
