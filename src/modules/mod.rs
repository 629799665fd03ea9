//! Whale detection pipeline

pub mod dedup;
pub mod poll_loop;
pub mod rolling_stats;
pub mod transfer;
pub mod whale_detector;

pub use poll_loop::{PollLoop, PollServices, PollSettings};
