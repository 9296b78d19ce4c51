#![warn(clippy::all)]

//! Multi-part transfers that report a single progress value.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use flate2::bufread::MultiGzDecoder;
use humantime::format_duration;
use log::{debug, info};
use reqwest::blocking::Client;
use url::Url;

use crate::config::Config;
use crate::io::ProgressReader;
use crate::metrics::{OwnerId, ProgressSink};

/// Errors when transferring.
#[derive(Debug, thiserror::Error)]
#[error("Transfer error")]
pub enum Error {
  /// No sources were given.
  #[error("Nothing to transfer")]
  NoSources,
  /// A source looked like a URL but could not be parsed.
  #[error("Invalid URL `{0}`: {1}")]
  Url(String, url::ParseError),
  /// Networking error.
  #[error("Networking error: {0}")]
  Net(#[from] reqwest::Error),
  /// IO error.
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
  /// Bytes that are not part of any gzip member follow the compressed data.
  #[error("{0} trailing bytes after gzip data")]
  TrailingData(u64),
}

/// A boxed source stream.
pub type Stream = Box<dyn Read + Send>;

/// Location of one part of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// A local file.
  File(PathBuf),
  /// An HTTP(S) resource.
  Url(Url),
}

impl Source {
  /// Interpret `value` as a URL if it starts with `http://` or `https://`, otherwise as a
  /// file path.
  pub fn parse(value: &str) -> Result<Self, Error> {
    if value.starts_with("http://") || value.starts_with("https://") {
      let url = Url::parse(value).map_err(|e| Error::Url(value.to_owned(), e))?;
      Ok(Source::Url(url))
    } else {
      Ok(Source::File(PathBuf::from(value)))
    }
  }

  /// Open the source, returning its stream and its length if known.
  ///
  /// # Arguments
  ///
  /// * `client` - HTTP client used for URL sources.
  pub fn open(&self, client: &Client) -> Result<(Stream, Option<u64>), Error> {
    match self {
      Source::File(path) => {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok((Box::new(file), Some(len)))
      }
      Source::Url(url) => {
        let resp = client.get(url.clone()).send()?.error_for_status()?;
        let len = resp.content_length();
        Ok((Box::new(resp), len))
      }
    }
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Source::File(path) => write!(f, "{}", path.display()),
      Source::Url(url) => write!(f, "{url}"),
    }
  }
}

/// Copies a sequence of sources into one writer while publishing the progress of the whole
/// sequence under a single owner.
pub struct Transfer {
  owner: OwnerId,
  config: Config,
  sink: Arc<dyn ProgressSink>,
  client: Client,
}

impl Transfer {
  /// Construct a new `Transfer`.
  ///
  /// # Arguments
  ///
  /// * `owner` - Label under which progress is published.
  /// * `config` - Update interval and decompression settings.
  /// * `sink` - Receiver of the progress values.
  pub fn new(owner: impl Into<OwnerId>, config: Config, sink: Arc<dyn ProgressSink>) -> Result<Self, Error> {
    let client = Client::builder().build()?;
    Ok(Self { owner: owner.into(), config, sink, client })
  }

  /// Owner label of this transfer.
  pub fn owner(&self) -> &OwnerId {
    &self.owner
  }

  /// Open all sources and return their streams and the sum of their lengths.
  ///
  /// The sum is zero if any length is unknown.
  fn open_all(&self, sources: &[Source]) -> Result<(Vec<Stream>, u64), Error> {
    let mut streams = Vec::with_capacity(sources.len());
    let mut total = Some(0u64);

    for source in sources {
      let (stream, len) = source.open(&self.client)?;
      debug!("Opened `{source}` ({})", len.map_or_else(|| "unknown length".to_owned(), |len| format!("{len} bytes")));
      total = total.zip(len).map(|(total, len)| total + len);
      streams.push(stream);
    }

    Ok((streams, total.unwrap_or(0)))
  }

  /// Transfer all sources, in order, into `writer`.
  ///
  /// Returns the number of bytes written.
  ///
  /// # Arguments
  ///
  /// * `sources` - The parts of the transfer.
  /// * `writer` - Destination of the (decompressed, if configured) data.
  pub fn run<W: Write>(&self, sources: &[Source], writer: &mut W) -> Result<u64, Error> {
    let start = Instant::now();
    let (streams, total) = self.open_all(sources)?;
    let n_streams = streams.len();
    let mut streams = streams.into_iter();
    let first = streams.next().ok_or(Error::NoSources)?;

    info!("Transferring {n_streams} source(s) for `{}`, {total} bytes expected", self.owner);

    let mut reader = ProgressReader::new(first, total, self.owner.clone(), Arc::clone(&self.sink))
      .with_final(n_streams == 1)
      .with_update_interval(self.config.update_interval);
    let timer = reader.start_timed_update()?;

    let mut written = self.copy(&mut reader, writer)?;
    for (index, stream) in streams.enumerate() {
      let is_final = index + 2 == n_streams;
      reader.set_next_reader(stream, is_final);
      written += self.copy(&mut reader, writer)?;
    }

    timer.cancel();
    writer.flush()?;

    debug!(
      "Transferred {} of {} bytes ({written} written) for `{}` in {}",
      reader.current(),
      reader.total(),
      reader.owner(),
      format_duration(Instant::now().duration_since(start))
    );

    Ok(written)
  }

  /// Copy the current source of `reader` into `writer` until its end-of-input.
  fn copy<R: Read, W: Write>(&self, reader: &mut ProgressReader<R>, writer: &mut W) -> Result<u64, Error> {
    if !self.config.gzip {
      return Ok(io::copy(reader, writer)?);
    }

    let mut decoder = MultiGzDecoder::new(BufReader::new(&mut *reader));
    let written = io::copy(&mut decoder, writer)?;

    // Reach end-of-input even if the decoder stopped short of it.
    let trailing = io::copy(&mut decoder.into_inner(), &mut io::sink())?;
    if trailing > 0 {
      return Err(Error::TrailingData(trailing));
    }

    Ok(written)
  }
}

#[cfg(test)]
mod tests {
  use flate2::write::GzEncoder;
  use flate2::Compression;
  use tempfile::NamedTempFile;

  use super::*;
  use crate::metrics::Gauge;

  const OWNER: &str = "2222-2222-222";

  fn make_file(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
  }

  fn gzip(contents: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents).unwrap();
    encoder.finish().unwrap()
  }

  fn make_gz_file(contents: &[u8]) -> NamedTempFile {
    make_file(&gzip(contents))
  }

  fn gzip_transfer(gauge: Arc<Gauge>) -> Transfer {
    let config = Config { gzip: true, ..Config::default() };
    Transfer::new(OWNER, config, gauge).unwrap()
  }

  fn file_source(file: &NamedTempFile) -> Source {
    Source::File(file.path().to_owned())
  }

  #[test]
  fn parse_source() {
    assert_eq!(Source::parse("/tmp/disk.img").unwrap(), Source::File(PathBuf::from("/tmp/disk.img")));
    assert_eq!(
      Source::parse("https://example.com/disk.img").unwrap(),
      Source::Url(Url::parse("https://example.com/disk.img").unwrap())
    );
    assert!(matches!(Source::parse("http://[::1"), Err(Error::Url(_, _))));
  }

  #[test]
  fn no_sources() {
    let transfer = Transfer::new(OWNER, Config::default(), Arc::new(Gauge::new("t", "h"))).unwrap();
    let err = transfer.run(&[], &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::NoSources));
  }

  #[test]
  fn missing_file() {
    let transfer = Transfer::new(OWNER, Config::default(), Arc::new(Gauge::new("t", "h"))).unwrap();
    let sources = [Source::File(PathBuf::from("/nonexistent/xfer-progress/part"))];
    let err = transfer.run(&sources, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
  }

  #[test]
  fn multiple_parts() {
    let parts = [make_file(b"first"), make_file(b"second"), make_file(b"third")];
    let sources: Vec<_> = parts.iter().map(file_source).collect();
    let gauge = Arc::new(Gauge::new("import_progress", "help"));

    let transfer = Transfer::new(OWNER, Config::default(), gauge.clone()).unwrap();
    assert_eq!(transfer.owner().as_str(), OWNER);
    let mut out = Vec::new();
    assert_eq!(transfer.run(&sources, &mut out).unwrap(), 16);
    assert_eq!(out, b"firstsecondthird");
    assert_eq!(gauge.get(OWNER), Some(100.0));
  }

  #[test]
  fn gzip_parts() {
    let mut two_members = gzip(b"wide ");
    two_members.extend(gzip(b"world"));
    let parts = [make_gz_file(b"hello "), make_file(&two_members)];
    let sources: Vec<_> = parts.iter().map(file_source).collect();
    let gauge = Arc::new(Gauge::new("import_progress", "help"));

    let transfer = gzip_transfer(gauge.clone());
    let mut out = Vec::new();
    assert_eq!(transfer.run(&sources, &mut out).unwrap(), 16);
    assert_eq!(out, b"hello wide world");
    assert_eq!(gauge.get(OWNER), Some(100.0));
  }

  #[test]
  fn gzip_copy_reaches_end_of_input() {
    let payload = vec![b'x'; 100_000];
    let mut data = gzip(&payload);
    data.extend(gzip(b"tail"));
    let total = data.len() as u64;
    let gauge = Arc::new(Gauge::new("import_progress", "help"));

    let transfer = gzip_transfer(gauge.clone());
    let mut reader = ProgressReader::new(data.as_slice(), total, OWNER, gauge.clone());
    let mut out = Vec::new();
    assert_eq!(transfer.copy(&mut reader, &mut out).unwrap(), 100_004);
    assert!(out.ends_with(b"xtail"));
    assert_eq!(reader.current(), total);
    assert!(reader.is_done());
    assert!(!reader.update_progress());
    assert_eq!(gauge.get(OWNER), Some(100.0));
  }

  #[test]
  fn gzip_trailing_garbage() {
    let mut data = gzip(b"hello");
    data.extend(b"\0\0\0");
    let gauge = Arc::new(Gauge::new("import_progress", "help"));

    let transfer = gzip_transfer(gauge.clone());
    let mut reader = ProgressReader::new(data.as_slice(), data.len() as u64, OWNER, gauge);
    assert!(transfer.copy(&mut reader, &mut Vec::new()).is_err());
  }
}
