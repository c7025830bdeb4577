//! Shardgate - Sharded Sliding-Window Rate Limiting
//!
//! This crate decides, per integer key, whether a request may proceed under a
//! sliding-window limit of `burst` requests per `window`. State is partitioned
//! across lock-isolated shards, and a background sweeper reclaims keys that
//! have gone idle.

pub mod config;
pub mod error;
pub mod ratelimit;
