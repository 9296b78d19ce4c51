#![warn(clippy::all)]

//! Percentage progress reporting on top of [`CountingReader`].

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::config::DEFAULT_UPDATE_INTERVAL;
use crate::io::counting::CountingReader;
use crate::io::timed::TimedUpdate;
use crate::metrics::{OwnerId, ProgressSink};

/// Counters visible to both the reading side and the timed update thread.
#[derive(Debug, Clone, Copy)]
struct Status {
  current: u64,
  done: bool,
  is_final: bool,
}

/// The part of a [`ProgressReader`] that does not depend on the source type.
pub(crate) struct Shared {
  total: u64,
  owner: OwnerId,
  sink: Arc<dyn ProgressSink>,
  status: Mutex<Status>,
}

impl Shared {
  pub(crate) fn owner(&self) -> &OwnerId {
    &self.owner
  }

  /// Publishes the current percentage and tells whether more updates are expected.
  ///
  /// The sink is written while the status lock is held, so concurrent callers publish in
  /// the order in which they observed the counters.
  pub(crate) fn update_progress(&self) -> bool {
    if self.total == 0 {
      return false;
    }

    let status = self.status.lock();
    let percentage = percentage(status.current, self.total);
    trace!("Progress of `{}`: {percentage:.2}%", self.owner);
    self.sink.set(self.owner.as_str(), percentage);

    !(status.done && status.is_final)
  }
}

fn percentage(current: u64, total: u64) -> f64 {
  (current as f64 / total as f64 * 100.0).min(100.0)
}

/// A reader that publishes how far a transfer has progressed.
///
/// `ProgressReader` forwards `std::io::Read::read` calls to a [`CountingReader`] and, after
/// every call, sets the sink value of its owner to `current / total * 100`. A `total` of
/// zero means the size of the transfer is unknown, in which case nothing is ever published.
///
/// A logical transfer may be made of several sources read one after the other. The reader
/// starts with the first one and is handed the next ones through
/// [`ProgressReader::set_next_reader`]; the byte count carries over so the published
/// percentage keeps growing across sources. Only the source marked as final ends the
/// transfer: a non-final source reaching end-of-input still counts as in progress.
///
/// Progress can additionally be published on a timer with
/// [`ProgressReader::start_timed_update`], which keeps the value fresh when reads are large
/// or stall.
pub struct ProgressReader<R> {
  counting: CountingReader<R>,
  shared: Arc<Shared>,
  update_interval: Duration,
}

impl<R: Read> ProgressReader<R> {
  /// Construct a new `ProgressReader` for a single-source transfer.
  ///
  /// # Arguments
  ///
  /// * `source` - The first (here: only) source of the transfer.
  /// * `total` - Expected number of bytes across all sources, or zero if unknown.
  /// * `owner` - Label under which progress is published.
  /// * `sink` - Receiver of the progress values.
  pub fn new(source: R, total: u64, owner: impl Into<OwnerId>, sink: Arc<dyn ProgressSink>) -> Self {
    Self::from_counting(CountingReader::new(source), total, owner.into(), sink)
  }

  fn from_counting(counting: CountingReader<R>, total: u64, owner: OwnerId, sink: Arc<dyn ProgressSink>) -> Self {
    let status = Status { current: counting.current(), done: counting.is_done(), is_final: true };
    let shared = Arc::new(Shared { total, owner, sink, status: Mutex::new(status) });
    Self { counting, shared, update_interval: DEFAULT_UPDATE_INTERVAL }
  }

  /// Mark whether the current source is the last one of the transfer.
  pub fn with_final(self, is_final: bool) -> Self {
    self.shared.status.lock().is_final = is_final;
    self
  }

  /// Set the period of the timed updates.
  pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
    self.update_interval = update_interval;
    self
  }

  /// Expected number of bytes, zero if unknown.
  pub fn total(&self) -> u64 {
    self.shared.total
  }

  /// Owner label of this transfer.
  pub fn owner(&self) -> &OwnerId {
    &self.shared.owner
  }

  /// Number of bytes read so far, across all sources.
  pub fn current(&self) -> u64 {
    self.counting.current()
  }

  /// Whether the current source has reported end-of-input.
  pub fn is_done(&self) -> bool {
    self.counting.is_done()
  }

  /// Whether the current source is the last one.
  pub fn is_final(&self) -> bool {
    self.shared.status.lock().is_final
  }

  /// Returns a reference to the current source.
  pub fn get_ref(&self) -> &R {
    self.counting.get_ref()
  }

  /// Publishes the current percentage.
  ///
  /// Returns `false` when there is nothing more to report: either the total is unknown or
  /// the final source is exhausted. Otherwise returns `true`, including when a non-final
  /// source is exhausted and the next one has not been handed over yet.
  ///
  /// The result is advisory. Reads are free to continue after it turned `false`; the timed
  /// updates use it to know when to stop.
  pub fn update_progress(&self) -> bool {
    self.shared.update_progress()
  }

  /// Continue the transfer with the next source.
  ///
  /// The byte count is kept, the done flag is cleared and the final flag is replaced by
  /// `is_final`. Returns the previous source.
  ///
  /// # Arguments
  ///
  /// * `source` - The next source of the transfer.
  /// * `is_final` - Whether `source` is the last one.
  pub fn set_next_reader(&mut self, source: R, is_final: bool) -> R {
    let mut status = self.shared.status.lock();
    let previous = self.counting.replace(source);
    status.done = false;
    status.is_final = is_final;
    debug!(
      "Next source for `{}` after {} of {} bytes (final: {is_final})",
      self.shared.owner,
      status.current,
      self.shared.total
    );
    previous
  }

  /// Start publishing progress periodically on a background thread.
  ///
  /// The thread stops by itself once [`ProgressReader::update_progress`] returns `false`,
  /// or when the returned handle is cancelled or dropped.
  pub fn start_timed_update(&self) -> io::Result<TimedUpdate> {
    TimedUpdate::start(Arc::clone(&self.shared), self.update_interval)
  }
}

impl<R: Read> Read for ProgressReader<R> {
  fn read(&mut self, destination: &mut [u8]) -> io::Result<usize> {
    let result = self.counting.read(destination);

    {
      let mut status = self.shared.status.lock();
      status.current = self.counting.current();
      status.done = self.counting.is_done();
    }

    let _ = self.shared.update_progress();
    result
  }
}
