//! reelcheck - duplicate detection and brief alignment for campaign videos
//!
//! A submitted video is checked against everything its campaign has already
//! accepted (by URL, global perceptual hash and frame sequence), then judged
//! against the campaign brief by a vision model within a daily budget.

pub mod budget;
pub mod collab;
pub mod commands;
pub mod config;
pub mod db;
pub mod dedupe;
pub mod error;
pub mod evaluate;
pub mod fingerprint;
pub mod keyframes;
pub mod retention;
pub mod store;

pub use error::{Error, Result};
