//! De-emphasis filter for FM broadcast audio.
//!
//! FM broadcast stations apply pre-emphasis to the audio signal before
//! transmission to improve signal-to-noise ratio (boost high frequencies).
//! This filter applies the inverse operation to restore the original audio
//! balance.
//!
//! Common time constants:
//! - North America, South Korea: 75 μs (75e-6)
//! - Europe, rest of world: 50 μs (50e-6)
//!
//! Implements a first-order IIR low-pass filter:
//! `y[n] = b*x[n] + a*y[n-1]`
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::DspBlock;
//! use mpxrx::dsp::deemphasis::DeemphasisFilter;
//!
//! // European FM broadcast (50 μs time constant)
//! let mut filter = DeemphasisFilter::new(192_000, Some(50e-6));
//!
//! let input = vec![0.1, 0.2, 0.3, 0.4, 0.5];
//! let output = filter.process(&input);
//! assert_eq!(output.len(), 5);
//! ```

use crate::config::Config;
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::Result;

pub struct DeemphasisFilter {
    /// Coefficient for previous output (feedback)
    a: f32,
    /// Coefficient for current input (feedforward)
    b: f32,
    /// Previous output sample
    prev_y: f32,
    sample_rate: u32,
    tau: Option<f32>,
}

impl DeemphasisFilter {
    /// Create a new de-emphasis filter.
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Sample rate in Hz
    /// * `tau` - Time constant in seconds, `None` for a pass-through
    pub fn new(sample_rate: u32, tau: Option<f32>) -> Self {
        let (a, b) = Self::coefficients(sample_rate, tau);
        Self {
            a,
            b,
            prev_y: 0.0,
            sample_rate,
            tau,
        }
    }

    fn coefficients(sample_rate: u32, tau: Option<f32>) -> (f32, f32) {
        match tau {
            Some(tau) if tau > 0.0 => {
                let dt = 1.0 / sample_rate as f32;
                let decay = (-dt / tau).exp();
                (decay, 1.0 - decay)
            }
            _ => (0.0, 1.0),
        }
    }

    /// Magnitude response at `freq` Hz.
    pub fn gain_at(&self, freq: f32) -> f32 {
        let w = 2.0 * std::f32::consts::PI * freq / self.sample_rate as f32;
        let re = 1.0 - self.a * w.cos();
        let im = self.a * w.sin();
        self.b / (re * re + im * im).sqrt()
    }

    #[inline]
    pub fn push(&mut self, x: f32) -> f32 {
        let out = self.b * x + self.a * self.prev_y;
        self.prev_y = out;
        out
    }

    /// Reset the internal state.
    ///
    /// Clears the previous output sample, useful when starting a new signal stream.
    pub fn reset(&mut self) {
        self.prev_y = 0.0;
    }
}

impl DspBlock<f32, f32> for DeemphasisFilter {
    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        samples.iter().map(|&x| self.push(x)).collect()
    }
}

impl Reconfigure for DeemphasisFilter {
    fn reconfigure(&mut self, config: &Config) -> Result<()> {
        let tau = config.deemphasis.tau();
        if config.mpx_rate == self.sample_rate && tau == self.tau {
            return Ok(());
        }
        (self.a, self.b) = Self::coefficients(config.mpx_rate, tau);
        self.sample_rate = config.mpx_rate;
        self.tau = tau;
        self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Deemphasis;
    use approx::assert_relative_eq;

    #[test]
    fn test_deemphasis_new() {
        let filter = DeemphasisFilter::new(192_000, Some(50e-6));

        // Coefficients should sum to approximately 1 for DC gain of 1
        assert_relative_eq!(filter.a + filter.b, 1.0, epsilon = 1e-6);
        assert_eq!(filter.prev_y, 0.0);
    }

    #[test]
    fn test_deemphasis_dc_signal() {
        let mut filter = DeemphasisFilter::new(192_000, Some(50e-6));
        let dc_value = 0.5;
        let samples = vec![dc_value; 200];
        let output = filter.process(&samples);

        assert_eq!(output.len(), 200);
        let final_value = output[output.len() - 1];
        assert_relative_eq!(final_value, dc_value, epsilon = 0.01);
    }

    #[test]
    fn test_deemphasis_impulse_response() {
        let mut filter = DeemphasisFilter::new(192_000, Some(50e-6));

        let mut samples = vec![0.0; 10];
        samples[0] = 1.0;

        let output = filter.process(&samples);

        assert!(output[0] > 0.0, "First sample should be positive");
        assert!(output[1] < output[0], "Should decay");
        assert!(output[2] < output[1], "Should continue to decay");
    }

    #[test]
    fn test_deemphasis_1khz_matches_analog() {
        let filter = DeemphasisFilter::new(192_000, Some(50e-6));
        // |H| = 1/sqrt(1 + (2π·f·τ)²)
        let analog = 1.0 / (1.0 + (2.0 * std::f32::consts::PI * 1_000.0 * 50e-6).powi(2)).sqrt();
        assert_relative_eq!(filter.gain_at(1_000.0), analog, epsilon = 0.002);
    }

    #[test]
    fn test_deemphasis_time_constants() {
        let filter_eu = DeemphasisFilter::new(192_000, Some(50e-6));
        let filter_na = DeemphasisFilter::new(192_000, Some(75e-6));

        assert!(
            filter_eu.a < filter_na.a,
            "50μs should decay faster than 75μs"
        );
    }

    #[test]
    fn test_deemphasis_bypass() {
        let mut filter = DeemphasisFilter::new(192_000, None);
        assert_eq!(filter.process(&[0.25, -1.0]), vec![0.25, -1.0]);
        assert_relative_eq!(filter.gain_at(10_000.0), 1.0);
    }

    #[test]
    fn test_reconfigure() {
        let mut filter = DeemphasisFilter::new(192_000, Some(50e-6));
        filter.process(&[1.0; 10]);

        // unchanged parameters keep the state
        filter.reconfigure(&Config::default()).unwrap();
        assert!(filter.prev_y > 0.0);

        let config = Config::default()
            .with_mpx_rate(176_400)
            .with_deemphasis(Deemphasis::Us);
        filter.reconfigure(&config).unwrap();
        let expected = DeemphasisFilter::new(176_400, Some(75e-6));
        assert_eq!(filter.a, expected.a);
        assert_eq!(filter.prev_y, 0.0);
    }

    #[test]
    fn test_deemphasis_empty_input() {
        let mut filter = DeemphasisFilter::new(192_000, Some(50e-6));
        let output = filter.process(&[]);
        assert_eq!(output.len(), 0);
    }
}
