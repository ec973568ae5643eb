use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use daqmux::utils::word_reader::WordOrder;

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = concat!(env!("CARGO_PKG_VERSION"), "\nbuilt ", env!("BUILD_TIMESTAMP")),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for demultiplexing VME digitizer word streams into events",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat malformed blocks as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Demultiplex a raw word dump and write the decoded events.
    Decode(DecodeArgs),

    /// Print decoding statistics for a raw word dump.
    Info(InfoArgs),
}

/// Options shared by every command reading a word dump.
#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Raw word dump (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Hardware module that produced the dump.
    #[arg(long, value_enum, default_value_t = ModuleKind::Caen965)]
    pub module: ModuleKind,

    /// YAML setup file with module parameters.
    #[arg(long, value_name = "FILE")]
    pub setup: Option<PathBuf>,

    /// Words are stored big endian.
    #[arg(long)]
    pub big_endian: bool,

    /// Capacity of the event buffer.
    #[arg(long, value_name = "EVENTS", default_value_t = 1024)]
    pub buffer_size: usize,
}

impl StreamArgs {
    pub fn word_order(&self) -> WordOrder {
        if self.big_endian {
            WordOrder::Big
        } else {
            WordOrder::Little
        }
    }

    pub fn is_pipe(&self) -> bool {
        self.input.to_string_lossy() == "-"
    }
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub stream: StreamArgs,

    /// Output file for decoded events (stdout when omitted).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Serialisation format of the decoded events.
    #[arg(long, value_enum, default_value_t = EventFormat::Yaml)]
    pub format: EventFormat,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub stream: StreamArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModuleKind {
    /// CAEN V965 dual range QDC.
    Caen965,
    /// SIS3302 digitizer with gamma firmware.
    Sis3302,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EventFormat {
    /// One YAML document per event.
    Yaml,
    /// One JSON object per line.
    Json,
}
