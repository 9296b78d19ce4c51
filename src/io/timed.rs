#![warn(clippy::all)]

//! Periodic progress publishing on a background thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::io::progress::Shared;

struct Signal {
  cancelled: Mutex<bool>,
  wakeup: Condvar,
}

/// Handle to a running timed update, returned by
/// [`ProgressReader::start_timed_update`](crate::io::ProgressReader::start_timed_update).
///
/// Dropping the handle cancels the updates.
pub struct TimedUpdate {
  signal: Arc<Signal>,
  handle: Option<JoinHandle<()>>,
}

impl TimedUpdate {
  pub(crate) fn start(shared: Arc<Shared>, interval: Duration) -> io::Result<Self> {
    let signal = Arc::new(Signal { cancelled: Mutex::new(false), wakeup: Condvar::new() });
    let thread_signal = Arc::clone(&signal);

    debug!("Starting timed progress updates for `{}` every {interval:?}", shared.owner());
    let handle = thread::Builder::new()
      .name(format!("progress-{}", shared.owner()))
      .spawn(move || run(&shared, &thread_signal, interval))?;

    Ok(Self { signal, handle: Some(handle) })
  }

  /// Whether the update thread has stopped, either by itself or after a cancellation.
  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().is_none_or(|handle| handle.is_finished())
  }

  /// Stop the updates and wait for the thread to exit.
  ///
  /// Once this returns no further progress is published by the timer.
  pub fn cancel(mut self) {
    self.stop();
  }

  /// Wait until the updates stop by themselves, which happens when the transfer is
  /// complete or its total is unknown.
  pub fn wait(mut self) {
    self.join();
  }

  fn stop(&mut self) {
    {
      let mut cancelled = self.signal.cancelled.lock();
      *cancelled = true;
      self.signal.wakeup.notify_all();
    }

    self.join();
  }

  fn join(&mut self) {
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        warn!("Timed progress update thread panicked");
      }
    }
  }
}

impl Drop for TimedUpdate {
  fn drop(&mut self) {
    self.stop();
  }
}

// The cancellation lock is held while publishing, so a cancel either happens before a tick
// (which then does not publish) or waits for the tick to finish.
fn run(shared: &Shared, signal: &Signal, interval: Duration) {
  let mut cancelled = signal.cancelled.lock();

  loop {
    let deadline = Instant::now() + interval;
    while !*cancelled && Instant::now() < deadline {
      signal.wakeup.wait_until(&mut cancelled, deadline);
    }

    if *cancelled {
      debug!("Timed progress updates for `{}` cancelled", shared.owner());
      return;
    }

    if !shared.update_progress() {
      debug!("Timed progress updates for `{}` finished", shared.owner());
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io::{self, Read};
  use std::time::Duration;

  use crate::io::progress::tests::{make_gauge, make_reader, CountingSink, OWNER};
  use crate::io::ProgressReader;

  const TICK: Duration = Duration::from_millis(5);

  #[test]
  fn stops_when_finished() {
    let sink = CountingSink::new();
    let mut reader = ProgressReader::new("hello world".as_bytes(), 11, OWNER, sink.clone())
      .with_update_interval(TICK);
    let timer = reader.start_timed_update().unwrap();

    let mut data = Vec::new();
    reader.read_to_end(&mut data).unwrap();
    assert_eq!(data, b"hello world");

    timer.wait();
    assert_eq!(sink.gauge.get(OWNER), Some(100.0));
  }

  #[test]
  fn exhausted_final_reader_publishes_once() {
    let sink = CountingSink::new();
    let reader = make_reader(1000, true, 1000, true, sink.clone()).with_update_interval(TICK);
    let timer = reader.start_timed_update().unwrap();
    timer.wait();
    assert_eq!(sink.writes(), 1);
    assert_eq!(sink.gauge.get(OWNER), Some(100.0));

    std::thread::sleep(TICK * 4);
    assert_eq!(sink.writes(), 1);
  }

  #[test]
  fn zero_total_stops_without_publishing() {
    let sink = CountingSink::new();
    let reader = make_reader(10, false, 0, true, sink.clone()).with_update_interval(TICK);
    reader.start_timed_update().unwrap().wait();
    assert_eq!(sink.writes(), 0);
  }

  #[test]
  fn keeps_running_between_sources() {
    let sink = CountingSink::new();
    let mut reader =
      ProgressReader::new("first".as_bytes(), 10, OWNER, sink.clone()).with_final(false).with_update_interval(TICK);
    io::copy(&mut reader, &mut io::sink()).unwrap();

    let timer = reader.start_timed_update().unwrap();
    let before = sink.writes();
    while sink.writes() < before + 3 {
      std::thread::sleep(TICK);
    }
    assert!(!timer.is_finished());
    assert_eq!(sink.gauge.get(OWNER), Some(50.0));

    reader.set_next_reader("again".as_bytes(), true);
    io::copy(&mut reader, &mut io::sink()).unwrap();
    timer.wait();
    assert_eq!(sink.gauge.get(OWNER), Some(100.0));
  }

  #[test]
  fn no_updates_after_cancel() {
    let sink = CountingSink::new();
    let reader = make_reader(3, false, 10, true, sink.clone()).with_update_interval(TICK);
    let timer = reader.start_timed_update().unwrap();
    while sink.writes() == 0 {
      std::thread::sleep(TICK);
    }

    timer.cancel();
    let after_cancel = sink.writes();
    std::thread::sleep(TICK * 4);
    assert_eq!(sink.writes(), after_cancel);
  }

  #[test]
  fn long_interval_cancels_promptly() {
    let gauge = make_gauge();
    let reader = make_reader(3, false, 10, true, gauge.clone()).with_update_interval(Duration::from_secs(3600));
    let timer = reader.start_timed_update().unwrap();
    assert!(!timer.is_finished());
    drop(timer);
    assert_eq!(gauge.get(OWNER), None);
  }
}
