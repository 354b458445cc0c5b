//! Frequency-translating decimating FIR filter.
//!
//! Shifts a real input stream down by a subcarrier frequency, low-pass
//! filters the resulting complex baseband and keeps one output every
//! `decimation` inputs. The oscillator phase is an `f64` count of cycles
//! that starts at zero on the first sample after construction or
//! reconfiguration, so a subcarrier `cos(2π·f0·n/Fs)` lands on the real
//! axis.
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::DspBlock;
//! use mpxrx::dsp::translate::{FreqXlatingFir, XlatingDesign};
//!
//! let design = XlatingDesign {
//!     center_freq: 57_000.0,
//!     cutoff: 2_400.0,
//!     transition: 2_000.0,
//!     decimation: 4,
//! };
//! let mut xlate = FreqXlatingFir::new(design, 192_000);
//! let baseband = xlate.process(&vec![0.0; 400]);
//! assert_eq!(baseband.len(), 100);
//! ```

use std::f64::consts::PI;

use num_complex::Complex;
use tracing::debug;

use crate::config::Config;
use crate::dsp::filters::Fir;
use crate::dsp::firdes::{self, Window};
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::Result;

/// Rate-independent description of a translating filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XlatingDesign {
    /// Frequency shifted down to 0 Hz
    pub center_freq: f64,
    /// Low-pass cutoff in Hz
    pub cutoff: f64,
    /// Low-pass transition width in Hz
    pub transition: f64,
    /// Output keeps one sample every `decimation` inputs
    pub decimation: usize,
}

pub struct FreqXlatingFir {
    design: XlatingDesign,
    sample_rate: u32,
    fir: Fir<Complex<f32>>,
    /// Oscillator phase in cycles [0, 1)
    phase: f64,
    /// Oscillator step in cycles per sample
    step: f64,
    /// Input index modulo the decimation factor
    counter: usize,
}

impl FreqXlatingFir {
    pub fn new(design: XlatingDesign, sample_rate: u32) -> Self {
        assert!(design.decimation > 0, "Decimation must be greater than 0");
        let taps = Self::design_taps(&design, sample_rate);
        Self {
            design,
            sample_rate,
            fir: Fir::new(taps),
            phase: 0.0,
            step: design.center_freq / sample_rate as f64,
            counter: 0,
        }
    }

    fn design_taps(design: &XlatingDesign, sample_rate: u32) -> Vec<f32> {
        let taps = firdes::low_pass(
            1.0,
            sample_rate as f64,
            design.cutoff,
            design.transition,
            Window::Hamming,
        );
        debug!(
            "[XLATE] {:.0} Hz @ {} Hz: {} taps, decimation {}",
            design.center_freq,
            sample_rate,
            taps.len(),
            design.decimation
        );
        taps
    }

    pub fn taps(&self) -> &[f32] {
        self.fir.taps()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output sample rate in Hz
    pub fn output_rate(&self) -> f64 {
        self.sample_rate as f64 / self.design.decimation as f64
    }

    pub fn decimation(&self) -> usize {
        self.design.decimation
    }

    /// Group delay of the low-pass in input samples
    pub fn delay(&self) -> usize {
        self.fir.delay()
    }

    pub fn reset(&mut self) {
        self.fir.reset();
        self.phase = 0.0;
        self.counter = 0;
    }

    /// Push one input sample; returns an output on every `decimation`-th
    /// input, starting with the first.
    pub fn push(&mut self, x: f32) -> Option<Complex<f32>> {
        let mixed = self.mix(x);
        self.fir.feed(mixed);
        let emit = self.counter == 0;
        self.counter = (self.counter + 1) % self.design.decimation;
        emit.then(|| self.fir.output())
    }

    #[inline]
    fn mix(&mut self, x: f32) -> Complex<f32> {
        let (sin, cos) = (2.0 * PI * self.phase).sin_cos();
        self.phase += self.step;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        Complex::new(x * cos as f32, -x * sin as f32)
    }
}

impl DspBlock<f32, Complex<f32>> for FreqXlatingFir {
    fn process(&mut self, data: &[f32]) -> Vec<Complex<f32>> {
        let mut out = Vec::with_capacity(data.len() / self.design.decimation + 1);
        out.extend(data.iter().filter_map(|&x| self.push(x)));
        out
    }
}

impl Reconfigure for FreqXlatingFir {
    fn reconfigure(&mut self, config: &Config) -> Result<()> {
        if config.mpx_rate == self.sample_rate {
            return Ok(());
        }
        self.sample_rate = config.mpx_rate;
        self.step = self.design.center_freq / config.mpx_rate as f64;
        self.fir.set_taps(Self::design_taps(&self.design, config.mpx_rate));
        self.reset();
        Ok(())
    }
}
