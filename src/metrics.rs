#![warn(clippy::all)]

//! Sinks that receive progress percentages.

use std::fmt;
use std::io::{self, Write};

use derive_more::{Display, From};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use serde::Serialize;

/// Opaque key identifying the logical transfer a reader belongs to.
///
/// It is used as the label of the published progress value.
#[derive(Debug, Display, From, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
  /// Return the owner ID as a string slice.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for OwnerId {
  fn from(value: &str) -> Self {
    Self(value.to_owned())
  }
}

/// Receiver of progress updates, keyed by owner.
///
/// Implementations must tolerate concurrent calls for the same or different owners. Setting
/// a value is assumed to never fail.
pub trait ProgressSink: Send + Sync {
  /// Set the progress of `owner` to `percentage` (in the range `0..=100`).
  fn set(&self, owner: &str, percentage: f64);
}

impl<F: Fn(&str, f64) + Send + Sync> ProgressSink for F {
  fn set(&self, owner: &str, percentage: f64) {
    self(owner, percentage)
  }
}

/// One labeled value of a [`Gauge`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
  /// Owner label.
  pub owner: String,
  /// Last value that was set.
  pub value: f64,
}

/// An in-memory gauge vector labeled by owner.
///
/// Values are overwritten on every `set`, never accumulated.
pub struct Gauge {
  name: String,
  help: String,
  values: RwLock<FnvHashMap<String, f64>>,
}

impl Gauge {
  /// Construct an empty gauge.
  ///
  /// # Arguments
  ///
  /// * `name` - Metric name used in the text exposition format.
  /// * `help` - One-line description of the metric.
  pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
    Self { name: name.into(), help: help.into(), values: RwLock::new(FnvHashMap::default()) }
  }

  /// Metric name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Value currently stored for `owner`, if any.
  pub fn get(&self, owner: &str) -> Option<f64> {
    self.values.read().get(owner).copied()
  }

  /// Forget the value of `owner`, returning it.
  pub fn remove(&self, owner: &str) -> Option<f64> {
    self.values.write().remove(owner)
  }

  /// All stored values, sorted by owner.
  pub fn samples(&self) -> Vec<Sample> {
    let mut samples: Vec<_> = self
      .values
      .read()
      .iter()
      .map(|(owner, value)| Sample { owner: owner.clone(), value: *value })
      .collect();
    samples.sort_by(|a, b| a.owner.cmp(&b.owner));
    samples
  }

  /// Write the gauge in the Prometheus text exposition format.
  pub fn write_text<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "# HELP {} {}", self.name, self.help)?;
    writeln!(writer, "# TYPE {} gauge", self.name)?;
    for sample in self.samples() {
      writeln!(writer, "{}{{ownerUID=\"{}\"}} {}", self.name, escape_label(&sample.owner), sample.value)?;
    }
    Ok(())
  }
}

impl ProgressSink for Gauge {
  fn set(&self, owner: &str, percentage: f64) {
    let mut values = self.values.write();
    match values.get_mut(owner) {
      Some(value) => *value = percentage,
      None => {
        values.insert(owner.to_owned(), percentage);
      }
    }
  }
}

impl fmt::Debug for Gauge {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Gauge").field("name", &self.name).field("samples", &self.samples()).finish()
  }
}

fn escape_label(value: &str) -> String {
  value.replace('\\', r"\\").replace('"', "\\\"").replace('\n', r"\n")
}
