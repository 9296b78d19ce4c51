#![warn(clippy::all)]

//! Readers that count bytes and report transfer progress.

mod counting;
mod progress;
mod timed;

pub use counting::CountingReader;
pub use progress::ProgressReader;
pub use timed::TimedUpdate;
