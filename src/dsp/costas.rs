//! Carrier phase and frequency tracking for BPSK.
//!
//! [`CostasLoop`] is a small value type. Every operation consumes the
//! current state and returns the next one, which keeps the loop testable
//! in isolation:
//!
//! - [`CostasLoop::advance`] moves the oscillator forward by one input
//!   sample
//! - [`CostasLoop::track`] feeds one symbol-rate decision back into the
//!   second-order loop filter
//!
//! The phase detector is decision directed: `sign(Re s)·Im s / |s|`,
//! i.e. the sine of the residual phase folded onto the BPSK axis. It is
//! independent of the signal level and bounded to ±1, so neither a
//! level step nor a burst of garbage can kick the loop far away. The
//! frequency estimate saturates at a fixed bound.
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::costas::CostasLoop;
//! use num_complex::Complex;
//!
//! let mut carrier = CostasLoop::new(std::f32::consts::PI / 100.0, 20.0, 0.06);
//! let symbol = Complex::from_polar(1.0, 0.3);
//! for _ in 0..200 {
//!     let (next, _error) = carrier.track(carrier.derotate(symbol));
//!     carrier = next;
//! }
//! assert!((carrier.phase() - 0.3).abs() < 1e-3);
//! ```

use std::f32::consts::PI;

use num_complex::Complex;

/// Damping factor of both tracking loops
pub const DAMPING: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Proportional and integral gains of a second-order loop with normalized
/// bandwidth `bandwidth` (per update) and damping `damping`.
pub fn loop_gains(bandwidth: f32, damping: f32) -> (f32, f32) {
    let denom = 1.0 + 2.0 * damping * bandwidth + bandwidth * bandwidth;
    let alpha = 4.0 * damping * bandwidth / denom;
    let beta = 4.0 * bandwidth * bandwidth / denom;
    (alpha, beta)
}

/// Wrap a phase to [-π, π]
fn wrap(phase: f32) -> f32 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostasLoop {
    /// Oscillator phase in radians
    phase: f32,
    /// Oscillator frequency in radians per input sample
    freq: f32,
    /// Proportional gain (radians per unit error)
    alpha: f32,
    /// Integral gain, already divided by the samples per symbol
    beta: f32,
    /// Frequency bound in radians per input sample
    freq_limit: f32,
}

impl CostasLoop {
    /// # Arguments
    ///
    /// * `bandwidth` - Loop bandwidth, normalized to the symbol rate
    /// * `samples_per_symbol` - Input samples between two `track` calls
    /// * `freq_limit` - Largest frequency offset the loop may settle on,
    ///   in radians per input sample
    pub fn new(bandwidth: f32, samples_per_symbol: f32, freq_limit: f32) -> Self {
        let (alpha, beta) = loop_gains(bandwidth, DAMPING);
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta: beta / samples_per_symbol.max(1.0),
            freq_limit: freq_limit.abs(),
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn freq(&self) -> f32 {
        self.freq
    }

    pub fn freq_limit(&self) -> f32 {
        self.freq_limit
    }

    /// Remove the current carrier estimate from a sample.
    pub fn derotate(&self, sample: Complex<f32>) -> Complex<f32> {
        sample * Complex::from_polar(1.0, -self.phase)
    }

    /// Advance the oscillator by one input sample.
    pub fn advance(self) -> Self {
        Self {
            phase: wrap(self.phase + self.freq),
            ..self
        }
    }

    /// Decision-directed BPSK phase error in [-1, 1].
    pub fn phase_error(symbol: Complex<f32>) -> f32 {
        let norm = symbol.norm();
        if norm < 1e-12 || !norm.is_finite() {
            return 0.0;
        }
        symbol.re.signum() * symbol.im / norm
    }

    /// Update the loop with one derotated symbol.
    ///
    /// Returns the next state and the phase error that drove it.
    pub fn track(self, symbol: Complex<f32>) -> (Self, f32) {
        let error = Self::phase_error(symbol);
        let freq = (self.freq + self.beta * error).clamp(-self.freq_limit, self.freq_limit);
        let phase = wrap(self.phase + self.alpha * error);
        (Self { phase, freq, ..self }, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SPS: usize = 20;

    /// Run the loop on a BPSK stream rotating at `offset` rad/sample.
    fn run(offset: f32, phase0: f32, symbols: usize) -> CostasLoop {
        let mut carrier = CostasLoop::new(PI / 100.0, SPS as f32, 0.06);
        let mut n = 0usize;
        for k in 0..symbols {
            let bit = if (k * 7919) % 13 < 6 { 1.0 } else { -1.0 };
            for s in 0..SPS {
                let x = Complex::from_polar(bit, phase0 + offset * n as f32);
                let y = carrier.derotate(x);
                carrier = carrier.advance();
                if s == SPS - 1 {
                    carrier = carrier.track(y).0;
                }
                n += 1;
            }
        }
        carrier
    }

    #[test]
    fn test_loop_gains() {
        let (alpha, beta) = loop_gains(PI / 100.0, DAMPING);
        assert_relative_eq!(alpha, 0.08497, epsilon = 1e-4);
        assert_relative_eq!(beta, 0.003776, epsilon = 1e-5);
    }

    #[test]
    fn test_phase_error_folds_bpsk() {
        let e1 = CostasLoop::phase_error(Complex::from_polar(1.0, 0.2));
        let e2 = CostasLoop::phase_error(Complex::from_polar(1.0, 0.2 + PI));
        assert_relative_eq!(e1, 0.2f32.sin(), epsilon = 1e-6);
        assert_relative_eq!(e1, e2, epsilon = 1e-5);
        assert_eq!(CostasLoop::phase_error(Complex::new(0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_locks_to_static_phase() {
        let carrier = run(0.0, 1.0, 800);
        // either 1.0 or 1.0 - π is a valid BPSK lock point
        let residual = wrap(2.0 * (carrier.phase() - 1.0));
        assert!(residual.abs() < 0.01, "phase {}", carrier.phase());
        assert!(carrier.freq().abs() < 1e-3);
    }

    #[test]
    fn test_tracks_frequency_offset() {
        let offset = 0.002;
        let carrier = run(offset, 0.0, 1000);
        assert_relative_eq!(carrier.freq(), offset, epsilon = 2e-4);
    }

    #[test]
    fn test_frequency_saturates() {
        let mut carrier = CostasLoop::new(0.5, 1.0, 0.06);
        for _ in 0..10_000 {
            carrier = carrier.track(Complex::new(1.0, 1.0)).0;
        }
        assert_relative_eq!(carrier.freq(), 0.06);
        assert!(carrier.phase().is_finite());
        assert!(carrier.phase() >= -PI && carrier.phase() <= PI);
    }

    #[test]
    fn test_garbage_input_stays_bounded() {
        let mut carrier = CostasLoop::new(PI / 100.0, 20.0, 0.06);
        for k in 0..5000 {
            let x = Complex::new((k as f32 * 12.9898).sin() * 1e6, (k as f32 * 78.233).cos());
            carrier = carrier.track(x).0.advance();
        }
        assert!(carrier.freq().abs() <= 0.06);
        assert!(carrier.phase().is_finite());
    }
}
