//! De-emphasis, resampling and output gain for the stereo pair.
//!
//! Both channels are de-emphasized at the MPX rate, then converted to the
//! audio rate by one two-channel `rubato` resampler. The conversion is
//! synchronous: `FftFixedIn` reduces `mpx_rate / audio_rate` by their gcd
//! and works on fixed input chunks, so no sample is ever dropped or
//! repeated. Input that does not fill a chunk waits for the next block.
//!
//! The linear gain is applied to every frame a block produces, so a
//! volume change takes effect on a block boundary and never splits left
//! from right.

use rubato::{FftFixedIn, Resampler};
use tracing::{debug, warn};

use crate::config::Config;
use crate::dsp::deemphasis::DeemphasisFilter;
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::{Error, Result};

/// Requested input frames per resampler chunk
pub const CHUNK_FRAMES: usize = 1024;

/// Sub-chunks per chunk, trades FFT length against latency
pub const SUB_CHUNKS: usize = 2;

const CHANNELS: usize = 2;

pub struct AudioStage {
    deemphasis: [DeemphasisFilter; CHANNELS],
    resampler: FftFixedIn<f32>,
    /// De-emphasized input waiting for a full chunk, one buffer per channel
    leftover: [Vec<f32>; CHANNELS],
    gain: f32,
    mpx_rate: u32,
    audio_rate: u32,
}

impl AudioStage {
    pub fn new(config: &Config) -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            config.mpx_rate as usize,
            config.audio_rate as usize,
            CHUNK_FRAMES,
            SUB_CHUNKS,
            CHANNELS,
        )
        .map_err(|e| Error::config(format!("failed to create resampler: {e}")))?;
        let tau = config.deemphasis.tau();
        let stage = Self {
            deemphasis: [
                DeemphasisFilter::new(config.mpx_rate, tau),
                DeemphasisFilter::new(config.mpx_rate, tau),
            ],
            leftover: [
                Vec::with_capacity(2 * CHUNK_FRAMES),
                Vec::with_capacity(2 * CHUNK_FRAMES),
            ],
            resampler,
            gain: config.volume.linear(),
            mpx_rate: config.mpx_rate,
            audio_rate: config.audio_rate,
        };
        let (input, output) = stage.chunk_frames();
        debug!(
            "[AUDIO] {} Hz -> {} Hz: chunks of {} -> at most {} frames, delay {}, gain {:.3}",
            config.mpx_rate,
            config.audio_rate,
            input,
            output,
            stage.resampler.output_delay(),
            stage.gain
        );
        Ok(stage)
    }

    /// Linear gain currently applied to both channels
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Input frames per resampler chunk and the most output frames one
    /// chunk can yield
    pub fn chunk_frames(&self) -> (usize, usize) {
        (
            self.resampler.input_frames_next(),
            self.resampler.output_frames_max(),
        )
    }

    /// Input frames buffered until the next chunk is complete
    pub fn pending_frames(&self) -> usize {
        self.leftover[0].len()
    }

    pub fn reset(&mut self) {
        self.deemphasis.iter_mut().for_each(DeemphasisFilter::reset);
        self.leftover.iter_mut().for_each(Vec::clear);
        self.resampler.reset();
    }

    fn resample(&mut self) -> Vec<(f32, f32)> {
        let mut frames = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.leftover[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .leftover
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            match self.resampler.process(&chunk, None) {
                Ok(out) => frames.extend(
                    out[0]
                        .iter()
                        .zip(&out[1])
                        .map(|(&l, &r)| (l * self.gain, r * self.gain)),
                ),
                Err(e) => warn!("[AUDIO] Dropped a {needed} frame chunk: {e}"),
            }
        }
        frames
    }
}

impl DspBlock<(f32, f32), (f32, f32)> for AudioStage {
    fn process(&mut self, data: &[(f32, f32)]) -> Vec<(f32, f32)> {
        let [left, right] = &mut self.deemphasis;
        for &(l, r) in data {
            self.leftover[0].push(left.push(l));
            self.leftover[1].push(right.push(r));
        }
        self.resample()
    }
}

impl Reconfigure for AudioStage {
    fn reconfigure(&mut self, config: &Config) -> Result<()> {
        let rates_changed =
            config.mpx_rate != self.mpx_rate || config.audio_rate != self.audio_rate;
        if rates_changed {
            *self = AudioStage::new(config)?;
            return Ok(());
        }
        self.gain = config.volume.linear();
        for filter in &mut self.deemphasis {
            filter.reconfigure(config)?;
        }
        Ok(())
    }
}
