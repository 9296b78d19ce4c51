#![warn(clippy::all)]

mod ui;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::ui::{create_progress_bar, create_progress_spinner};

use xfer_progress::config::{self, Config};
use xfer_progress::metrics::{Gauge, ProgressSink};
use xfer_progress::transfer::{self, Source, Transfer};

use clap::Parser;
use humantime::format_duration;
use indicatif::ProgressBar;
use log::{debug, error, log_enabled};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("xfer error")]
enum Error {
  #[error("Configuration error: {0}")]
  Config(#[from] config::Error),
  #[error("Invalid update interval `{0}`: {1}")]
  Interval(String, humantime::DurationError),
  #[error("Transfer error: {0}")]
  Transfer(#[from] transfer::Error),
  #[error("IO error: {0}")]
  Io(#[from] io::Error),
  #[error("Error writing metrics file: {0}")]
  Json(#[from] serde_json::Error),
}

#[derive(Debug, clap::Parser)]
#[clap(author, version, about = "Transfer one or more sources as a single logical transfer", long_about = None)]
struct Opt {
  /// Verbose output (can be specified multiple times)
  #[clap(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// JSON configuration file
  #[clap(short, long, name = "CONFIG")]
  config: Option<PathBuf>,

  /// Period of the timed progress updates (e.g. "500ms", "2s")
  #[clap(short, long, name = "INTERVAL")]
  interval: Option<String>,

  /// Label to publish progress under
  #[clap(short, long, name = "OWNER")]
  owner: Option<String>,

  /// Decompress gzip-compressed sources
  #[clap(short = 'z', long)]
  gzip: bool,

  /// Write the transferred data to PATH instead of standard output
  #[clap(long, name = "PATH")]
  output: Option<PathBuf>,

  /// Write the final progress values as JSON to METRICS
  #[clap(long, name = "METRICS")]
  metrics_json: Option<PathBuf>,

  /// Files or URLs, in transfer order
  #[clap(name = "SOURCE", required = true)]
  sources: Vec<String>,
}

fn get_log_level(verbose: u8) -> log::LevelFilter {
  match verbose {
    0 => log::LevelFilter::Off,
    1 => log::LevelFilter::Error,
    2 => log::LevelFilter::Warn,
    3 => log::LevelFilter::Info,
    4 => log::LevelFilter::Debug,
    _ => log::LevelFilter::Trace,
  }
}

macro_rules! fail {
  ($logger:expr, $e:expr) => {
    match $e {
      Ok(v) => v,
      Err(e) => {
        let logger: bool = $logger;
        if logger {
          error!("Error: {e}");
        } else {
          eprintln!("Error: {e}");
        }
        std::process::exit(1);
      }
    }
  };
}

fn load_config(opt: &Opt) -> Result<Config, Error> {
  let mut config = match &opt.config {
    Some(path) => Config::from_path(path)?,
    None => Config::default(),
  };

  if let Some(interval) = &opt.interval {
    config.update_interval =
      humantime::parse_duration(interval).map_err(|e| Error::Interval(interval.clone(), e))?;
  }

  if let Some(owner) = &opt.owner {
    config.owner = Some(owner.clone());
  }

  config.gzip |= opt.gzip;
  config.validate()?;
  Ok(config)
}

/// Shows a spinner until the first percentage arrives, then a progress bar.
///
/// The flag next to the bar tells whether the spinner was already replaced.
fn create_display_sink(gauge: Arc<Gauge>, msg: String) -> (Arc<dyn ProgressSink>, Arc<Mutex<(ProgressBar, bool)>>) {
  let display = Arc::new(Mutex::new((create_progress_spinner(msg.clone()), false)));
  let sink_display = Arc::clone(&display);

  let sink = move |owner: &str, percentage: f64| {
    gauge.set(owner, percentage);

    let mut display = sink_display.lock();
    let (bar, has_total) = &mut *display;
    if !*has_total {
      bar.finish_and_clear();
      *bar = create_progress_bar(msg.clone());
      *has_total = true;
    }
    bar.set_position(percentage.round() as u64);
  };

  let sink: Arc<dyn ProgressSink> = Arc::new(sink);
  (sink, display)
}

fn write_metrics(gauge: &Gauge, path: &Path) -> Result<(), Error> {
  let mut writer = BufWriter::new(File::create(path)?);
  serde_json::to_writer_pretty(&mut writer, &gauge.samples())?;
  writer.flush()?;
  Ok(())
}

fn run(opt: &Opt, config: Config) -> Result<u64, Error> {
  let sources = opt.sources.iter().map(|s| Source::parse(s)).collect::<Result<Vec<_>, _>>()?;
  let owner = config.owner.clone().unwrap_or_else(|| format!("xfer-{}", std::process::id()));

  let gauge = Arc::new(Gauge::new("xfer_progress", "The transfer progress in percentage"));
  let (sink, display) = create_display_sink(Arc::clone(&gauge), format!("Transferring {owner}"));
  let transfer = Transfer::new(owner, config, sink)?;
  debug!("Publishing progress of `{}` as `{}`", transfer.owner(), gauge.name());

  let written = match &opt.output {
    Some(path) => {
      let mut writer = BufWriter::new(File::create(path)?);
      transfer.run(&sources, &mut writer)
    }
    None => transfer.run(&sources, &mut io::stdout().lock()),
  };
  display.lock().0.finish_and_clear();
  let written = written?;

  if log_enabled!(log::Level::Debug) {
    let mut text = Vec::new();
    gauge.write_text(&mut text)?;
    debug!("Final metrics:\n{}", String::from_utf8_lossy(&text));
  }

  if let Some(path) = &opt.metrics_json {
    write_metrics(&gauge, path)?;
  }

  Ok(written)
}

fn main() {
  let start_time = Instant::now();
  let opt = Opt::parse();

  let log_level = get_log_level(opt.verbose);
  let logger = env_logger::Builder::new().filter_level(log_level).try_init();
  if let Err(e) = &logger {
    eprintln!("Error initializing logger: {e}");
  }
  let have_logger = logger.is_ok();

  let config = fail!(have_logger, load_config(&opt));
  debug!("Configuration: {config:?}");

  let written = fail!(have_logger, run(&opt, config));
  eprintln!("Transferred {written} bytes in {}", format_duration(Instant::now().duration_since(start_time)));
}
