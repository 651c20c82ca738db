//! dirscan library crate
//!
//! Provides both the CLI binary and a library API: a depth-first crawler that
//! streams per-directory sizes as events, bounded work queues, and two sinks
//! (a live view tree and a streaming XML report) wired together by
//! [`analysis::Analysis`].

pub mod analysis;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod metadata;
pub mod node;
pub mod output;
pub mod path_util;
pub mod progress;
pub mod report;
pub mod scan_events;
pub mod size;
pub mod view;
pub mod work_queue;
pub mod xml;
