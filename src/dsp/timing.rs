//! Symbol timing recovery.
//!
//! Mueller-and-Muller timing error detector driving a fractional
//! resampling strobe. [`MuellerMuller`] is a pure value type: it is fed
//! the interpolated symbol at each strobe and answers with the distance,
//! in input samples, to the next strobe. The interpolation itself is a
//! 4-point cubic Lagrange polynomial ([`interpolate_cubic`]).
//!
//! The loop gains are expressed as fractions of the nominal symbol
//! period, so the same constants work at any sample rate:
//!
//! ```text
//! e      = clip(Re[(p0 − p2)·c1* − (c0 − c2)·p1*], ±1)
//! ω      = ω_nom + clip(ω + g_ω·ω_nom·e − ω_nom, ±ω_rel·ω_nom)
//! next   = ω + g_μ·ω_nom·e
//! ```
//!
//! where `p` are the last three interpolated symbols and `c` their hard
//! BPSK decisions.
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::timing::{MuellerMuller, TimingGains};
//! use num_complex::Complex;
//!
//! let clock = MuellerMuller::new(20.0, TimingGains::default());
//! let (clock, interval) = clock.step(Complex::new(1.0, 0.0));
//! assert_eq!(interval, 20.0);
//! assert_eq!(clock.omega(), 20.0);
//! ```

use num_complex::Complex;

/// Loop gains, relative to the nominal samples per symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingGains {
    /// Strobe phase correction per unit error
    pub mu: f32,
    /// Symbol period correction per unit error
    pub omega: f32,
    /// Largest relative deviation of the symbol period
    pub omega_limit: f32,
}

impl Default for TimingGains {
    fn default() -> Self {
        Self {
            mu: 0.05,
            omega: 0.001,
            omega_limit: 0.005,
        }
    }
}

/// Cubic Lagrange interpolation between `points[1]` (`mu = 0`) and
/// `points[2]` (`mu = 1`). Points are ordered oldest first.
pub fn interpolate_cubic(points: &[Complex<f32>; 4], mu: f32) -> Complex<f32> {
    let m1 = mu + 1.0;
    let m_1 = mu - 1.0;
    let m_2 = mu - 2.0;
    let weights = [
        -mu * m_1 * m_2 / 6.0,
        m1 * m_1 * m_2 / 2.0,
        -m1 * mu * m_2 / 2.0,
        m1 * mu * m_1 / 6.0,
    ];
    points
        .iter()
        .zip(weights)
        .fold(Complex::new(0.0, 0.0), |acc, (&p, w)| acc + p * w)
}

/// Hard BPSK decision on the real axis
#[inline]
pub fn decision(symbol: Complex<f32>) -> Complex<f32> {
    Complex::new(if symbol.re >= 0.0 { 1.0 } else { -1.0 }, 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuellerMuller {
    omega: f32,
    omega_mid: f32,
    omega_limit: f32,
    gain_mu: f32,
    gain_omega: f32,
    /// Last three interpolated symbols, newest first
    p: [Complex<f32>; 3],
    /// Decisions matching `p`
    c: [Complex<f32>; 3],
}

impl MuellerMuller {
    pub fn new(samples_per_symbol: f32, gains: TimingGains) -> Self {
        let zero = Complex::new(0.0, 0.0);
        Self {
            omega: samples_per_symbol,
            omega_mid: samples_per_symbol,
            omega_limit: gains.omega_limit * samples_per_symbol,
            gain_mu: gains.mu * samples_per_symbol,
            gain_omega: gains.omega * samples_per_symbol,
            p: [zero; 3],
            c: [zero; 3],
        }
    }

    /// Current symbol period estimate in input samples
    pub fn omega(&self) -> f32 {
        self.omega
    }

    /// Nominal symbol period in input samples
    pub fn omega_mid(&self) -> f32 {
        self.omega_mid
    }

    /// Timing error of the last three symbols, clipped to ±1.
    fn error(&self) -> f32 {
        let x = (self.c[0] - self.c[2]) * self.p[1].conj();
        let y = (self.p[0] - self.p[2]) * self.c[1].conj();
        let e = (y - x).re;
        if e.is_finite() { e.clamp(-1.0, 1.0) } else { 0.0 }
    }

    /// Feed the symbol interpolated at the current strobe.
    ///
    /// Returns the next state and the number of input samples until the
    /// next strobe.
    pub fn step(self, symbol: Complex<f32>) -> (Self, f32) {
        let mut next = Self {
            p: [symbol, self.p[0], self.p[1]],
            c: [decision(symbol), self.c[0], self.c[1]],
            ..self
        };
        let e = next.error();
        let omega = next.omega + next.gain_omega * e;
        next.omega = next.omega_mid
            + (omega - next.omega_mid).clamp(-next.omega_limit, next.omega_limit);
        let interval = next.omega + next.gain_mu * e;
        (next, interval)
    }
}
