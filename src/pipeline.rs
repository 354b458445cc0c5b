//! Receiver composition and run loop.
//!
//! [`Receiver`] wires the stages statically: every input block fans out to
//! the stereo path ([`StereoDecoder`] then [`AudioStage`]) and to the RDS
//! path ([`RdsDemodulator`]). Configuration changes are validated first and
//! then pushed to every stage before the call returns, so a block is
//! always processed by one consistent set of coefficients.
//!
//! [`SharedReceiver`] is the handle control code holds on to. Its mutex is
//! the only serialization point between a control thread and the
//! processing loop: a block runs under the lock, a reconfiguration waits
//! for the block to finish.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{info, trace};

use crate::config::{Config, Deemphasis, Volume};
use crate::dsp::audio::AudioStage;
use crate::dsp::rds::{RdsDemodulator, SyncStatus};
use crate::dsp::stereo::StereoDecoder;
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::{Error, Result};

/// Output of one processed MPX block
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Left channel at the audio rate
    pub left: Vec<f32>,
    /// Right channel at the audio rate
    pub right: Vec<f32>,
    /// Decoded RDS bits, in arrival order
    pub bits: Vec<u8>,
    /// RDS lock estimate at the end of the block
    pub sync: SyncStatus,
}

pub struct Receiver {
    config: Config,
    stereo: StereoDecoder,
    audio: AudioStage,
    rds: RdsDemodulator,
}

impl Receiver {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!(
            "Receiver: MPX {} Hz, audio {} Hz, volume {:?}, de-emphasis {:?}",
            config.mpx_rate, config.audio_rate, config.volume, config.deemphasis
        );
        Ok(Self {
            config,
            stereo: StereoDecoder::new(config.mpx_rate),
            audio: AudioStage::new(&config)?,
            rds: RdsDemodulator::new(config.mpx_rate),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the configuration.
    ///
    /// An invalid configuration is rejected and the previous one stays in
    /// effect. Otherwise every stage is reconfigured before returning.
    /// The audio stage goes first: it is the only one whose rebuild can
    /// fail, and it is left untouched when it does.
    pub fn set_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        if config == self.config {
            return Ok(());
        }
        info!("Reconfiguring: {:?} -> {:?}", self.config, config);
        self.audio.reconfigure(&config)?;
        self.stereo.reconfigure(&config)?;
        self.rds.reconfigure(&config)?;
        self.config = config;
        Ok(())
    }

    pub fn set_mpx_rate(&mut self, mpx_rate: u32) -> Result<()> {
        self.set_config(self.config.with_mpx_rate(mpx_rate))
    }

    pub fn set_audio_rate(&mut self, audio_rate: u32) -> Result<()> {
        self.set_config(self.config.with_audio_rate(audio_rate))
    }

    pub fn set_volume(&mut self, volume: Volume) -> Result<()> {
        self.set_config(self.config.with_volume(volume))
    }

    pub fn set_deemphasis(&mut self, deemphasis: Deemphasis) -> Result<()> {
        self.set_config(self.config.with_deemphasis(deemphasis))
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.rds.sync_status()
    }

    /// Process one block of MPX samples through both paths.
    pub fn process(&mut self, samples: &[f32]) -> Frame {
        let stereo = self.stereo.process(samples);
        let (left, right): (Vec<f32>, Vec<f32>) =
            self.audio.process(&stereo).into_iter().unzip();
        let bits = self.rds.process(samples);
        trace!(
            "[PIPELINE] {} samples -> {} audio frames, {} bits",
            samples.len(),
            left.len(),
            bits.len()
        );
        Frame {
            left,
            right,
            bits,
            sync: self.rds.sync_status(),
        }
    }

    /// Discard the state of every stage, keeping the configuration.
    pub fn reset(&mut self) {
        self.stereo.reset();
        self.audio.reset();
        self.rds.reset();
    }
}

/// Cloneable handle on a [`Receiver`] shared between threads
#[derive(Clone)]
pub struct SharedReceiver {
    inner: Arc<Mutex<Receiver>>,
}

impl SharedReceiver {
    pub fn new(receiver: Receiver) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Processing never leaves a stage half updated, so a poisoned lock
    /// still holds a usable receiver.
    fn lock(&self) -> MutexGuard<'_, Receiver> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> Config {
        *self.lock().config()
    }

    pub fn set_config(&self, config: Config) -> Result<()> {
        self.lock().set_config(config)
    }

    pub fn set_mpx_rate(&self, mpx_rate: u32) -> Result<()> {
        self.lock().set_mpx_rate(mpx_rate)
    }

    pub fn set_audio_rate(&self, audio_rate: u32) -> Result<()> {
        self.lock().set_audio_rate(audio_rate)
    }

    pub fn set_volume(&self, volume: Volume) -> Result<()> {
        self.lock().set_volume(volume)
    }

    pub fn set_deemphasis(&self, deemphasis: Deemphasis) -> Result<()> {
        self.lock().set_deemphasis(deemphasis)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.lock().sync_status()
    }

    pub fn process(&self, samples: &[f32]) -> Frame {
        self.lock().process(samples)
    }

    pub fn reset(&self) {
        self.lock().reset()
    }
}

/// Consumer of the stereo audio
///
/// Returning [`Error::Cancelled`] asks the run loop to stop.
pub trait AudioSink {
    fn write_audio(&mut self, left: &[f32], right: &[f32]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Consumer of the RDS bitstream
///
/// Returning [`Error::Cancelled`] asks the run loop to stop.
pub trait BitSink {
    fn write_bits(&mut self, bits: &[u8], sync: &SyncStatus) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects the audio in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl AudioSink for AudioBuffer {
    fn write_audio(&mut self, left: &[f32], right: &[f32]) -> Result<()> {
        self.left.extend_from_slice(left);
        self.right.extend_from_slice(right);
        Ok(())
    }
}

/// Collects the bits in memory
impl BitSink for Vec<u8> {
    fn write_bits(&mut self, bits: &[u8], _sync: &SyncStatus) -> Result<()> {
        self.extend_from_slice(bits);
        Ok(())
    }
}

/// Discards everything
impl AudioSink for () {
    fn write_audio(&mut self, _left: &[f32], _right: &[f32]) -> Result<()> {
        Ok(())
    }
}

impl BitSink for () {
    fn write_bits(&mut self, _bits: &[u8], _sync: &SyncStatus) -> Result<()> {
        Ok(())
    }
}

/// Interleaved stereo, signed 16-bit little-endian
pub struct PcmWriter<W: Write> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write> PcmWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn to_s16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

impl<W: Write> AudioSink for PcmWriter<W> {
    fn write_audio(&mut self, left: &[f32], right: &[f32]) -> Result<()> {
        self.buffer.clear();
        for (&l, &r) in left.iter().zip(right) {
            self.buffer.extend_from_slice(&to_s16(l).to_le_bytes());
            self.buffer.extend_from_slice(&to_s16(r).to_le_bytes());
        }
        self.writer.write_all(&self.buffer)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// RDS bits as ASCII `0`/`1`
pub struct BitWriter<W: Write> {
    writer: W,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn bits_to_ascii(bits: &[u8]) -> String {
    bits.iter()
        .map(|&b| if b & 1 == 1 { '1' } else { '0' })
        .collect()
}

impl<W: Write> BitSink for BitWriter<W> {
    fn write_bits(&mut self, bits: &[u8], _sync: &SyncStatus) -> Result<()> {
        self.writer.write_all(bits_to_ascii(bits).as_bytes())?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct BitRecord<'a> {
    bits: &'a str,
    #[serde(flatten)]
    sync: &'a SyncStatus,
}

/// One JSON object per non-empty bit block, newline separated
pub struct JsonBitWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonBitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> BitSink for JsonBitWriter<W> {
    fn write_bits(&mut self, bits: &[u8], sync: &SyncStatus) -> Result<()> {
        if bits.is_empty() {
            return Ok(());
        }
        let bits = bits_to_ascii(bits);
        let record = BitRecord { bits: &bits, sync };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Totals of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// MPX samples consumed
    pub samples: u64,
    /// Stereo audio frames produced
    pub audio_frames: u64,
    /// RDS bits produced
    pub bits: u64,
    /// The run stopped before the end of the source
    pub cancelled: bool,
}

impl RunSummary {
    fn record(&mut self, samples: usize, frame: &Frame) {
        self.samples += samples as u64;
        self.audio_frames += frame.left.len() as u64;
        self.bits += frame.bits.len() as u64;
    }
}

/// Process one block and hand the result to the sinks.
///
/// Returns `Ok(false)` when a sink asked to stop.
fn process_block<A, B>(
    samples: &[f32],
    receiver: &SharedReceiver,
    audio: &mut A,
    bits: &mut B,
    summary: &mut RunSummary,
) -> Result<bool>
where
    A: AudioSink + ?Sized,
    B: BitSink + ?Sized,
{
    let frame = receiver.process(samples);
    summary.record(samples.len(), &frame);
    let delivered = audio
        .write_audio(&frame.left, &frame.right)
        .and_then(|_| bits.write_bits(&frame.bits, &frame.sync));
    match delivered {
        Ok(()) => Ok(true),
        Err(Error::Cancelled) => Ok(false),
        Err(e) => Err(e),
    }
}

fn finish<A, B>(audio: &mut A, bits: &mut B, summary: RunSummary) -> Result<RunSummary>
where
    A: AudioSink + ?Sized,
    B: BitSink + ?Sized,
{
    match audio.flush().and_then(|_| bits.flush()) {
        Ok(()) | Err(Error::Cancelled) => {}
        Err(e) => return Err(e),
    }
    info!(
        "Processed {} samples: {} audio frames, {} RDS bits{}",
        summary.samples,
        summary.audio_frames,
        summary.bits,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    Ok(summary)
}

/// Drive a synchronous source through the receiver until the source ends
/// or `cancel` is set.
///
/// The cancel flag is checked between blocks; a block that has started is
/// always delivered to the sinks.
pub fn run<I, A, B>(
    source: I,
    receiver: &SharedReceiver,
    audio: &mut A,
    bits: &mut B,
    cancel: &AtomicBool,
) -> Result<RunSummary>
where
    I: IntoIterator<Item = std::io::Result<Vec<f32>>>,
    A: AudioSink + ?Sized,
    B: BitSink + ?Sized,
{
    let mut summary = RunSummary::default();
    for chunk in source {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            break;
        }
        let samples = chunk?;
        if !process_block(&samples, receiver, audio, bits, &mut summary)? {
            summary.cancelled = true;
            break;
        }
    }
    finish(audio, bits, summary)
}

/// Asynchronous counterpart of [`run`] over a [`Stream`] of blocks.
pub async fn run_stream<S, A, B>(
    mut source: S,
    receiver: &SharedReceiver,
    audio: &mut A,
    bits: &mut B,
    cancel: &AtomicBool,
) -> Result<RunSummary>
where
    S: Stream<Item = std::io::Result<Vec<f32>>> + Unpin,
    A: AudioSink + ?Sized,
    B: BitSink + ?Sized,
{
    let mut summary = RunSummary::default();
    while let Some(chunk) = source.next().await {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            break;
        }
        let samples = chunk?;
        if !process_block(&samples, receiver, audio, bits, &mut summary)? {
            summary.cancelled = true;
            break;
        }
    }
    finish(audio, bits, summary)
}
