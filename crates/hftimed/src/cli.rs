use std::fmt::Display;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};

use hftime::{ChannelInfo, IqOrder, SiteLocation, Station};

const USAGE_SHORT: &str = r#"
This program receives complex baseband samples for ONE time-standard carrier from a multicast stream, and prints one JSON report per minute: which station was heard, and when its minute tone was transmitted.

See --help for more details.

THIS PROGRAM IS NOT A TIME SOURCE.
"#;

const USAGE_LONG: &str = r#"
This program receives complex baseband samples for ONE time-standard carrier from a multicast stream, and prints one JSON report per minute: which station was heard, and when its minute tone was transmitted.

Each datagram carries a 12-byte RTP header and big-endian 16-bit sample pairs at --rate. Run one copy of this program per carrier:

    hftimed --channel WWV_10 --carrier 10e6 \
        --group 239.1.2.3 --port 5004 \
        --receiver 39.0,-77.0 \
        --voter-dir /run/hftime/voter

    hftimed --channel WWV_15 --carrier 15e6 \
        --group 239.1.2.4 --port 5004 \
        --receiver 39.0,-77.0 \
        --voter-dir /run/hftime/voter

Copies which share a --voter-dir share their station decisions. On a carrier which WWV and WWVH share, a channel which cannot tell the two apart borrows the decision of one which can. Every copy must have a unique --channel name.

The station plan is chosen from --carrier. Use --station to override it.

THIS PROGRAM IS NOT A TIME SOURCE.
"#;

const ADVANCED: &str = "Advanced Options";

/// Top-level program arguments
#[derive(Parser, Clone, Debug)]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = USAGE_SHORT, after_long_help = USAGE_LONG)]
#[command(max_term_width = 100)]
pub struct Args {
    /// Verbosity level (-vvv for more)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print NOTHING, not even reports
    #[arg(short, long)]
    pub quiet: bool,

    /// Channel name, unique among cooperating copies
    #[arg(short, long)]
    pub channel: String,

    /// Carrier frequency (Hz)
    #[arg(long)]
    pub carrier: f64,

    /// Station(s) heard on this carrier (WWV, WWVH, CHU)
    ///
    /// Repeat for a shared carrier. If omitted, the standard
    /// station plan for --carrier is used.
    #[arg(long = "station")]
    pub stations: Vec<Station>,

    /// Sampling rate (Hz)
    ///
    /// Must be a multiple of 80 Hz with the default decimation.
    #[arg(short, long, default_value_t = 16000)]
    pub rate: u32,

    /// Multicast group (or unicast address) to receive on
    #[arg(long, default_value_t = Ipv4Addr::new(239, 1, 2, 3))]
    pub group: Ipv4Addr,

    /// UDP port
    #[arg(short, long, default_value_t = 5004)]
    pub port: u16,

    /// Address of the interface which joins the group
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    pub iface: Ipv4Addr,

    /// Accept only this stream source id (decimal or 0x hex)
    ///
    /// By default, the first valid packet's source is used.
    #[arg(long, value_parser = parse_source_id)]
    pub source_id: Option<u32>,

    /// Receiver location, "LAT,LON" in decimal degrees
    ///
    /// Propagation delays are meaningless without it.
    #[arg(long, allow_hyphen_values = true, default_value = "0,0")]
    pub receiver: SiteLocation,

    /// Directory shared with other channels' copies
    #[arg(long)]
    pub voter_dir: Option<PathBuf>,

    /// File in which to keep the station predictor
    #[arg(long)]
    pub predictor: Option<PathBuf>,

    /// Exit after this many minutes
    #[arg(long)]
    pub minutes: Option<u64>,

    /// Include decimated samples in each report
    #[arg(long)]
    pub with_samples: bool,

    /// Sample pair component order
    #[arg(long, value_enum, default_value_t = Order::Qi)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub iq_order: Order,

    /// Keep shared anchors for this long (minutes)
    #[arg(long, default_value_t = 60)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub retention: i64,

    /// Largest gap which is zero-filled (s)
    #[arg(long, default_value_t = 120)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub max_fill: u32,

    /// Tone detection threshold (dB SNR)
    #[arg(long, default_value_t = 6.0)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub detection_snr: f32,

    /// Fewest received samples worth examining (0.0 ≤ FRAC ≤ 1.0)
    #[arg(long, default_value_t = 0.5)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub min_completeness: f64,

    /// Socket read timeout (ms)
    #[arg(long, default_value_t = 1000)]
    #[arg(hide_short_help = true)]
    #[arg(help_heading = ADVANCED)]
    pub timeout_ms: u64,
}

/// Sample pair component order
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Quadrature first
    Qi,

    /// In-phase first
    Iq,
}

impl From<Order> for IqOrder {
    fn from(order: Order) -> IqOrder {
        match order {
            Order::Qi => IqOrder::QI,
            Order::Iq => IqOrder::IQ,
        }
    }
}

impl Args {
    /// The channel described by these arguments
    pub fn channel_info(&self) -> Result<ChannelInfo, anyhow::Error> {
        let info = if self.stations.is_empty() {
            ChannelInfo::standard(&self.channel, self.carrier)
                .context("use --station to name the stations on this carrier")?
        } else {
            ChannelInfo::new(&self.channel, self.carrier, &self.stations)
                .context("invalid --station list")?
        };
        Ok(info)
    }
}

fn parse_source_id(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

/// A program-level error with exit code
#[derive(Debug)]
pub struct CliError {
    error: anyhow::Error,
    exit_code: i32,
}

impl CliError {
    /// Create new error with a custom exit code
    pub fn new(error: anyhow::Error, code: i32) -> CliError {
        CliError {
            error,
            exit_code: code,
        }
    }

    /// Print this error to the terminal
    ///
    /// Errors from clap are printed verbatim. Other types of errors
    /// are printed indirectly via clap's fancy formatter.
    pub fn print(&self) -> std::io::Result<()> {
        if let Some(e) = self.error.downcast_ref::<clap::Error>() {
            e.print()
        } else {
            Args::command()
                .error(ErrorKind::Format, self.to_string())
                .print()
        }
    }

    /// Print this error to the terminal and exit
    pub fn exit(&self) -> ! {
        drop(self.print());
        std::process::exit(self.exit_code);
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.error)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> CliError {
        CliError::new(err, 1)
    }
}

impl From<clap::Error> for CliError {
    fn from(err: clap::Error) -> CliError {
        let code = if err.use_stderr() { 1 } else { 0 };
        CliError::new(err.into(), code)
    }
}
