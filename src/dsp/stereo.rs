//! Stereo recovery.
//!
//! The multiplex carries `L+R` in baseband and `L−R` as a double-sideband
//! suppressed-carrier signal at twice the pilot frequency:
//!
//! ```text
//! mpx(t) = (L+R)(t) + (L−R)(t)·cos(2·ω_pilot·t) + pilot + RDS
//! ```
//!
//! `L+R` is isolated with a 17 kHz low-pass. `L−R` is shifted down from
//! 38 kHz with a translating filter, decimated by 4, demodulated by taking
//! twice the real part and interpolated back to the MPX rate. The `L+R`
//! branch is delayed by the interpolator's group delay so both branches
//! line up sample for sample before matrixing.
//!
//! The interpolator passband must reach the top of the audio band, or the
//! two branches differ in gain and separation collapses at high audio
//! frequencies. With a transition of `Fs/32` around the decimated Nyquist
//! frequency `Fs/8` the passband is flat to about `Fs/10`, which is why
//! the MPX rate has a floor of 160 kHz.
//!
//! The 38 kHz oscillator is assumed phase-coherent with the transmitted
//! subcarrier; a phase error only reduces channel separation.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::Config;
use crate::dsp::filters::{Delay, Fir, Interpolator};
use crate::dsp::firdes::{self, Window};
use crate::dsp::translate::{FreqXlatingFir, XlatingDesign};
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::Result;

/// Stereo pilot frequency in Hz
pub const PILOT_FREQ: f64 = 19_000.0;

/// Audio bandwidth of both the sum and difference channels
const AUDIO_CUTOFF: f64 = 17_000.0;
const AUDIO_TRANSITION: f64 = 3_000.0;

/// Decimation applied to the translated difference channel
pub const DIFF_DECIMATION: usize = 4;

const DIFF_DESIGN: XlatingDesign = XlatingDesign {
    center_freq: 2.0 * PILOT_FREQ,
    cutoff: AUDIO_CUTOFF,
    transition: AUDIO_TRANSITION,
    decimation: DIFF_DECIMATION,
};

pub struct StereoDecoder {
    sample_rate: u32,
    sum: Fir<f32>,
    sum_delay: Delay<f32>,
    diff: FreqXlatingFir,
    interpolator: Interpolator<f32>,
    pending: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl StereoDecoder {
    pub fn new(sample_rate: u32) -> Self {
        let interpolator = Self::design_interpolator(sample_rate);
        let decoder = Self {
            sample_rate,
            sum: Fir::new(Self::design_sum(sample_rate)),
            sum_delay: Delay::new(interpolator.delay()),
            diff: FreqXlatingFir::new(DIFF_DESIGN, sample_rate),
            interpolator,
            pending: VecDeque::with_capacity(2 * DIFF_DECIMATION),
            scratch: Vec::with_capacity(DIFF_DECIMATION),
        };
        debug!(
            "[STEREO] {} Hz: sum {} taps, difference {} taps, interpolator {} taps, delay {}",
            sample_rate,
            decoder.sum.taps().len(),
            decoder.diff.taps().len(),
            decoder.interpolator.taps().len(),
            decoder.delay()
        );
        decoder
    }

    fn design_sum(sample_rate: u32) -> Vec<f32> {
        firdes::low_pass(
            1.0,
            sample_rate as f64,
            AUDIO_CUTOFF,
            AUDIO_TRANSITION,
            Window::Hamming,
        )
    }

    fn design_interpolator(sample_rate: u32) -> Interpolator<f32> {
        let fs = sample_rate as f64;
        let decimated_nyquist = fs / (2 * DIFF_DECIMATION) as f64;
        let taps = firdes::low_pass(
            DIFF_DECIMATION as f64,
            fs,
            decimated_nyquist,
            decimated_nyquist / 4.0,
            Window::Hamming,
        );
        Interpolator::new(DIFF_DECIMATION, taps)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sum_taps(&self) -> &[f32] {
        self.sum.taps()
    }

    pub fn diff_taps(&self) -> &[f32] {
        self.diff.taps()
    }

    pub fn interpolator_taps(&self) -> &[f32] {
        self.interpolator.taps()
    }

    /// Total latency from MPX input to Left/Right output, in samples
    pub fn delay(&self) -> usize {
        self.sum.delay() + self.sum_delay.delay()
    }

    /// Decode one MPX sample into a (left, right) pair.
    pub fn push(&mut self, x: f32) -> (f32, f32) {
        let sum = self.sum_delay.push(self.sum.push(x));

        if let Some(z) = self.diff.push(x) {
            self.scratch.clear();
            self.interpolator.push(2.0 * z.re, &mut self.scratch);
            self.pending.extend(self.scratch.iter().copied());
        }
        let diff = self.pending.pop_front().unwrap_or(0.0);

        (0.5 * (sum + diff), 0.5 * (sum - diff))
    }

    pub fn reset(&mut self) {
        self.sum.reset();
        self.sum_delay.reset();
        self.diff.reset();
        self.interpolator.reset();
        self.pending.clear();
    }
}

/// One (left, right) frame per input sample
impl DspBlock<f32, (f32, f32)> for StereoDecoder {
    fn process(&mut self, data: &[f32]) -> Vec<(f32, f32)> {
        data.iter().map(|&x| self.push(x)).collect()
    }
}

impl Reconfigure for StereoDecoder {
    fn reconfigure(&mut self, config: &Config) -> Result<()> {
        if config.mpx_rate != self.sample_rate {
            *self = StereoDecoder::new(config.mpx_rate);
        }
        Ok(())
    }
}
