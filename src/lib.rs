#![warn(clippy::all)]
#![warn(missing_docs)]

//! Byte-counting readers that report the progress of a transfer, as a percentage, to a
//! metrics sink.
//!
//! A transfer may span several sources read one after the other; the progress reader is
//! handed each new source and keeps reporting one continuous percentage. Progress is
//! published on every read and, optionally, on a timer.

pub mod config;
pub mod io;
pub mod metrics;
pub mod transfer;
