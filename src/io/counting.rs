#![warn(clippy::all)]

//! A passive byte counter for `std::io::Read` objects.

use std::io::{self, Read};
use std::mem;

/// Forwards `std::io::Read::read` calls to a source object of type `R` while keeping a
/// cumulative count of the bytes that went through it.
///
/// The counter also remembers whether the source reported end-of-input. Errors coming
/// from the source are returned untouched and never mark the reader as done.
///
/// The source can be swapped with [`CountingReader::replace`]; the byte count survives
/// the swap so that several sources read one after another add up to a single total.
#[derive(Debug)]
pub struct CountingReader<R> {
  source: R,
  current: u64,
  done: bool,
}

impl<R: Read> CountingReader<R> {
  /// Construct a new `CountingReader` starting at zero bytes.
  ///
  /// # Arguments
  ///
  /// * `source` - The source (read stream) object.
  pub fn new(source: R) -> Self {
    Self { source, current: 0, done: false }
  }

  #[cfg(test)]
  pub(crate) fn with_state(source: R, current: u64, done: bool) -> Self {
    Self { source, current, done }
  }

  /// Total number of bytes read so far, across all sources.
  pub fn current(&self) -> u64 {
    self.current
  }

  /// Whether the current source has reported end-of-input.
  pub fn is_done(&self) -> bool {
    self.done
  }

  /// Returns a reference to the current source.
  pub fn get_ref(&self) -> &R {
    &self.source
  }

  /// Consumes the counter, returning the current source.
  pub fn into_inner(self) -> R {
    self.source
  }

  /// Replaces the source, returning the previous one.
  ///
  /// The done flag is cleared, the byte count is left untouched.
  pub fn replace(&mut self, source: R) -> R {
    self.done = false;
    mem::replace(&mut self.source, source)
  }
}

impl<R: Read> Read for CountingReader<R> {
  fn read(&mut self, destination: &mut [u8]) -> io::Result<usize> {
    let bytes = self.source.read(destination)?;

    if bytes == 0 && !destination.is_empty() {
      self.done = true;
    } else {
      self.current += bytes as u64;
    }

    Ok(bytes)
  }
}
