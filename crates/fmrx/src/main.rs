//! FM multiplex receiver (stereo audio and RDS bits)
//!
//! Reads a real-valued MPX stream, as produced by an FM demodulator, and
//! writes the recovered stereo audio and RDS bitstream.
//!
//! # Usage Examples
//!
//! ## File playback, RDS bits on stdout
//! ```bash
//! fmrx --file mpx.f32 --audio-out audio.s16
//! ```
//!
//! ## TCP source at 176.4 kHz, RDS as JSON lines
//! ```bash
//! fmrx --tcp localhost:1234 --format s16 --mpx-rate 176.4k --json
//! ```
//!
//! ## Piped from stdin with a configuration file
//! ```bash
//! some-fm-demodulator | fmrx --config ~/.config/fmrx.json -v
//! ```

use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::{ArgAction, Parser};
use crossbeam::channel::{self, Receiver as ChannelReceiver, Sender};
use mpxrx::dsp::rds::SyncStatus;
use mpxrx::pipeline::{AudioSink, BitSink, BitWriter, JsonBitWriter, PcmWriter, run_stream};
use mpxrx::{Config, Deemphasis, Error, MpxAsyncSource, MpxFormat, Receiver, SharedReceiver, Volume};
use tracing::{info, warn};

/// Blocks in flight between the processing loop and the writer thread
const CHANNEL_DEPTH: usize = 64;

/// Sample rate in Hz, accepts a k/M suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rate(u32);

impl FromStr for Rate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (value, scale) = if let Some(stripped) = s.strip_suffix('M') {
            (stripped, 1_000_000.0)
        } else if let Some(stripped) = s.strip_suffix('k') {
            (stripped, 1_000.0)
        } else {
            (s, 1.0)
        };
        let val: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("Invalid rate '{s}'"))?;
        if !val.is_finite() || val <= 0.0 {
            return Err(format!("Rate must be positive: '{s}'"));
        }
        Ok(Rate((val * scale).round() as u32))
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "FM multiplex receiver: stereo audio and RDS bits", long_about = None)]
struct Args {
    /// Input file path (stdin when neither --file nor --tcp is given)
    #[arg(long, conflicts_with = "tcp")]
    file: Option<String>,

    /// TCP source as HOST:PORT
    #[arg(long)]
    tcp: Option<String>,

    /// Sample format of the input (f32, s16)
    #[arg(long, default_value = "f32")]
    format: String,

    /// MPX sample rate in Hz (accepts k/M suffix, e.g. 192k)
    #[arg(long, value_parser = Rate::from_str)]
    mpx_rate: Option<Rate>,

    /// Audio output rate in Hz (accepts k/M suffix)
    #[arg(long, value_parser = Rate::from_str)]
    audio_rate: Option<Rate>,

    /// Volume in dB
    #[arg(long, allow_hyphen_values = true, conflicts_with = "volume_percent")]
    volume: Option<f32>,

    /// Volume in percent of unity gain
    #[arg(long)]
    volume_percent: Option<f32>,

    /// De-emphasis time constant (eu, us, off)
    #[arg(long)]
    deemphasis: Option<String>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<String>,

    /// Write interleaved s16le stereo audio to this file
    #[arg(long)]
    audio_out: Option<String>,

    /// Write RDS bits to this file instead of stdout
    #[arg(long)]
    bits_out: Option<String>,

    /// Output RDS bits as JSON (one object per block, with lock status)
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Samples per input block
    #[arg(long, default_value_t = 8192)]
    chunk_size: usize,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> mpxrx::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };
        if let Some(Rate(rate)) = self.mpx_rate {
            config = config.with_mpx_rate(rate);
        }
        if let Some(Rate(rate)) = self.audio_rate {
            config = config.with_audio_rate(rate);
        }
        if let Some(db) = self.volume {
            config = config.with_volume(Volume::Decibels(db));
        }
        if let Some(pct) = self.volume_percent {
            config = config.with_volume(Volume::Percent(pct));
        }
        if let Some(name) = &self.deemphasis {
            config = config.with_deemphasis(Deemphasis::from_str(name)?);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Work handed to the writer thread
enum Output {
    Audio(Vec<f32>, Vec<f32>),
    Bits(Vec<u8>, SyncStatus),
}

/// Forwards processed blocks to the writer thread; a closed channel stops
/// the run loop.
#[derive(Clone)]
struct ChannelSink {
    tx: Sender<Output>,
}

impl ChannelSink {
    fn send(&self, output: Output) -> mpxrx::Result<()> {
        self.tx.send(output).map_err(|_| Error::Cancelled)
    }
}

impl AudioSink for ChannelSink {
    fn write_audio(&mut self, left: &[f32], right: &[f32]) -> mpxrx::Result<()> {
        self.send(Output::Audio(left.to_vec(), right.to_vec()))
    }
}

impl BitSink for ChannelSink {
    fn write_bits(&mut self, bits: &[u8], sync: &SyncStatus) -> mpxrx::Result<()> {
        if bits.is_empty() {
            return Ok(());
        }
        self.send(Output::Bits(bits.to_vec(), *sync))
    }
}

fn create(path: &str) -> mpxrx::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

fn bit_sink(args: &Args) -> mpxrx::Result<Box<dyn BitSink + Send>> {
    let writer: Box<dyn Write + Send> = match &args.bits_out {
        Some(path) => Box::new(create(path)?),
        None => Box::new(stdout()),
    };
    Ok(if args.json {
        Box::new(JsonBitWriter::new(writer))
    } else {
        Box::new(BitWriter::new(writer))
    })
}

fn writer_loop(
    rx: ChannelReceiver<Output>,
    mut audio: Option<PcmWriter<BufWriter<File>>>,
    mut bits: Box<dyn BitSink + Send>,
) -> mpxrx::Result<()> {
    let mut last_lock = false;
    for output in rx.iter() {
        match output {
            Output::Audio(left, right) => {
                if let Some(audio) = audio.as_mut() {
                    audio.write_audio(&left, &right)?;
                }
            }
            Output::Bits(block, sync) => {
                if sync.locked != last_lock {
                    info!(
                        "RDS {} (quality {:.2}, carrier offset {:+.1} Hz)",
                        if sync.locked { "locked" } else { "unlocked" },
                        sync.quality,
                        sync.carrier_offset_hz
                    );
                    last_lock = sync.locked;
                }
                bits.write_bits(&block, &sync)?;
            }
        }
    }
    if let Some(audio) = audio.as_mut() {
        audio.flush()?;
    }
    bits.flush()
}

async fn open_source(args: &Args, sample_rate: u32) -> mpxrx::Result<MpxAsyncSource> {
    let format = MpxFormat::from_str(&args.format)?;
    let source = match (&args.file, &args.tcp) {
        (Some(path), _) => {
            MpxAsyncSource::from_file(path, sample_rate, args.chunk_size, format).await?
        }
        (None, Some(address)) => {
            let (host, port) = address
                .rsplit_once(':')
                .and_then(|(host, port)| Some((host, port.parse::<u16>().ok()?)))
                .ok_or_else(|| Error::config(format!("invalid TCP address '{address}'")))?;
            MpxAsyncSource::from_tcp(host, port, sample_rate, args.chunk_size, format).await?
        }
        (None, None) => MpxAsyncSource::from_stdin(sample_rate, args.chunk_size, format),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> mpxrx::Result<()> {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    let config = args.config()?;
    let receiver = SharedReceiver::new(Receiver::new(config)?);
    let source = open_source(&args, config.mpx_rate).await?;

    let audio_writer = match &args.audio_out {
        Some(path) => Some(PcmWriter::new(create(path)?)),
        None => None,
    };
    let bits_writer = bit_sink(&args)?;
    let has_audio = audio_writer.is_some();

    let (tx, rx) = channel::bounded::<Output>(CHANNEL_DEPTH);
    let writer = thread::spawn(move || writer_loop(rx, audio_writer, bits_writer));

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current block");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let sink = ChannelSink { tx };
    let mut bit_sink = sink.clone();
    let summary = if has_audio {
        let mut audio_sink = sink;
        run_stream(source, &receiver, &mut audio_sink, &mut bit_sink, &cancel).await
    } else {
        drop(sink);
        run_stream(source, &receiver, &mut (), &mut bit_sink, &cancel).await
    };
    drop(bit_sink);

    let written = writer
        .join()
        .map_err(|_| Error::Io(std::io::Error::other("writer thread panicked")))?;
    let summary = summary?;
    written?;

    if args.json {
        eprintln!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_suffixes() {
        assert_eq!(Rate::from_str("192000"), Ok(Rate(192_000)));
        assert_eq!(Rate::from_str("192k"), Ok(Rate(192_000)));
        assert_eq!(Rate::from_str("176.4k"), Ok(Rate(176_400)));
        assert_eq!(Rate::from_str("0.2M"), Ok(Rate(200_000)));
        assert!(Rate::from_str("fast").is_err());
        assert!(Rate::from_str("-1k").is_err());
    }

    #[test]
    fn test_command_line_overrides_defaults() {
        let args = Args::parse_from([
            "fmrx",
            "--mpx-rate",
            "176.4k",
            "--volume",
            "-6",
            "--deemphasis",
            "us",
        ]);
        let config = args.config().unwrap();
        assert_eq!(config.mpx_rate, 176_400);
        assert_eq!(config.volume, Volume::Decibels(-6.0));
        assert_eq!(config.deemphasis, Deemphasis::Us);
        assert_eq!(config.audio_rate, 96_000);
    }

    #[test]
    fn test_invalid_rate_is_rejected() {
        let args = Args::parse_from(["fmrx", "--mpx-rate", "48k"]);
        assert!(matches!(args.config(), Err(Error::Config(_))));
    }

    #[test]
    fn test_conflicting_sources() {
        let result = Args::try_parse_from(["fmrx", "--file", "a.raw", "--tcp", "localhost:1"]);
        assert!(result.is_err());
    }
}
