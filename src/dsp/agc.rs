//! Amplitude normalization of the RDS baseband
//!
//! The carrier and timing loops are tuned for unit-amplitude symbols. The
//! RDS injection level varies between stations by more than 10 dB, so the
//! matched-filter output is scaled by `target / envelope` first.
//!
//! The envelope is an exponential moving average of the input magnitude.
//! Its start-up bias is removed by dividing by the running sum of the EMA
//! weights, so the very first samples are already normalized. The envelope
//! is measured before the gain is applied: there is no feedback path.
//!
//! ```
//! use mpxrx::dsp::agc::Agc;
//! use num_complex::Complex;
//!
//! let mut agc = Agc::new(0.01);
//! let out = agc.execute(Complex::new(0.02, 0.0));
//! assert!((out.norm() - 1.0).abs() < 1e-3);
//! ```

use num_complex::Complex;

use crate::dsp::DspBlock;

const MAX_GAIN: f32 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Agc {
    target: f32,
    bandwidth: f32,
    gain: f32,
    /// EMA of |x|, biased towards zero until `weight` reaches 1
    envelope: f32,
    weight: f32,
}

impl Agc {
    /// `bandwidth` is the EMA coefficient, clamped to [0, 1].
    pub fn new(bandwidth: f32) -> Self {
        Self::with_target(bandwidth, 1.0)
    }

    pub fn with_target(bandwidth: f32, target: f32) -> Self {
        Self {
            target,
            bandwidth: bandwidth.clamp(0.0, 1.0),
            gain: 1.0,
            envelope: 0.0,
            weight: 0.0,
        }
    }

    pub fn bandwidth(&self) -> f32 {
        self.bandwidth
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Bias-corrected input envelope, 0 before the first sample
    pub fn envelope(&self) -> f32 {
        if self.weight > 0.0 {
            self.envelope / self.weight
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::with_target(self.bandwidth, self.target);
    }

    /// Scale one sample. Silence and non-finite input leave the gain as
    /// it was.
    pub fn execute(&mut self, x: Complex<f32>) -> Complex<f32> {
        let magnitude = x.norm();
        if magnitude.is_finite() {
            let decay = 1.0 - self.bandwidth;
            self.envelope = decay * self.envelope + self.bandwidth * magnitude;
            self.weight = decay * self.weight + self.bandwidth;

            let envelope = self.envelope();
            if envelope > 1e-10 {
                self.gain = (self.target / envelope).min(MAX_GAIN);
            }
        }
        x * self.gain
    }
}

impl Default for Agc {
    fn default() -> Self {
        Self::new(1e-3)
    }
}

impl DspBlock<Complex<f32>, Complex<f32>> for Agc {
    fn process(&mut self, data: &[Complex<f32>]) -> Vec<Complex<f32>> {
        data.iter().map(|&x| self.execute(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn real(x: f32) -> Complex<f32> {
        Complex::new(x, 0.0)
    }

    #[test]
    fn test_first_sample_is_normalized() {
        let mut agc = Agc::new(1e-3);
        assert_relative_eq!(agc.execute(real(0.05)).norm(), 1.0, epsilon = 1e-4);
        assert_relative_eq!(agc.gain(), 20.0, epsilon = 1e-2);
    }

    #[test]
    fn test_follows_level_change() {
        let mut agc = Agc::new(0.1);
        for _ in 0..500 {
            agc.execute(real(0.1));
        }
        assert_relative_eq!(agc.gain(), 10.0, epsilon = 1e-3);
        for _ in 0..500 {
            agc.execute(Complex::new(0.0, -4.0));
        }
        assert_relative_eq!(agc.gain(), 0.25, epsilon = 1e-4);
    }

    #[test]
    fn test_silence_keeps_gain() {
        let mut agc = Agc::new(0.1);
        let out = agc.process(&[Complex::new(0.0, 0.0); 10]);
        assert!(out.iter().all(|s| s.norm() == 0.0));
        assert_relative_eq!(agc.gain(), 1.0);
    }

    #[test]
    fn test_non_finite_input_is_ignored() {
        let mut agc = Agc::new(0.1);
        for _ in 0..100 {
            agc.execute(real(0.5));
        }
        let gain = agc.gain();
        agc.execute(real(f32::NAN));
        agc.execute(real(f32::INFINITY));
        assert_relative_eq!(agc.gain(), gain);
        assert!(agc.envelope().is_finite());
    }

    #[test]
    fn test_reset() {
        let mut agc = Agc::with_target(0.1, 2.0);
        for _ in 0..100 {
            agc.execute(real(0.1));
        }
        agc.reset();
        assert_relative_eq!(agc.gain(), 1.0);
        assert_relative_eq!(agc.envelope(), 0.0);
        assert_relative_eq!(agc.execute(real(0.5)).norm(), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bandwidth_is_clamped() {
        assert_relative_eq!(Agc::new(2.0).bandwidth(), 1.0);
        assert_relative_eq!(Agc::new(-0.5).bandwidth(), 0.0);
    }
}
