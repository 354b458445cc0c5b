//! FIR tap design.
//!
//! Windowed-sinc low-pass design and root-raised-cosine pulse shaping.
//! Tap counts follow the usual window-method estimate
//! `N = A·fs / (22·Δf)` where `A` is the window's stopband attenuation in
//! dB, rounded down and forced odd so every filter has an integer group
//! delay of `(N-1)/2` samples.
//!
//! All arithmetic is carried out in `f64`, taps are returned as `f32`.
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::firdes::{low_pass, Window};
//!
//! // L+R low-pass at 192 kHz
//! let taps = low_pass(1.0, 192_000.0, 17_000.0, 3_000.0, Window::Hamming);
//! assert_eq!(taps.len(), 155);
//! ```

use std::f64::consts::PI;

/// Window applied to the ideal sinc response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    /// Hamming window, about 53 dB stopband attenuation
    Hamming,
}

impl Window {
    /// Stopband attenuation used to size the filter
    pub fn attenuation_db(self) -> f64 {
        match self {
            Window::Hamming => 53.0,
        }
    }

    /// Window coefficients for `ntaps` taps
    pub fn coefficients(self, ntaps: usize) -> Vec<f64> {
        if ntaps == 1 {
            return vec![1.0];
        }
        let m = (ntaps - 1) as f64;
        match self {
            Window::Hamming => (0..ntaps)
                .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / m).cos())
                .collect(),
        }
    }
}

/// Number of taps needed for the given transition width, always odd.
pub fn tap_count(sample_rate: f64, transition: f64, window: Window) -> usize {
    let n = (window.attenuation_db() * sample_rate / (22.0 * transition)) as usize;
    n.max(1) | 1
}

/// Design a low-pass filter.
///
/// # Arguments
///
/// * `gain` - DC gain of the filter (taps sum to this value)
/// * `sample_rate` - Sample rate in Hz
/// * `cutoff` - Cutoff (centre of the transition band) in Hz
/// * `transition` - Transition band width in Hz
/// * `window` - Window type
///
/// # Panics
///
/// Panics if the cutoff is not within `(0, sample_rate/2)` or the
/// transition width is not positive.
pub fn low_pass(
    gain: f64,
    sample_rate: f64,
    cutoff: f64,
    transition: f64,
    window: Window,
) -> Vec<f32> {
    assert!(sample_rate > 0.0, "Sample rate must be greater than 0");
    assert!(
        cutoff > 0.0 && cutoff < sample_rate / 2.0,
        "Cutoff must lie between 0 and Nyquist"
    );
    assert!(transition > 0.0, "Transition width must be greater than 0");

    let ntaps = tap_count(sample_rate, transition, window);
    let w = window.coefficients(ntaps);
    let mid = (ntaps / 2) as isize;
    let fw_t0 = 2.0 * PI * cutoff / sample_rate;

    let taps: Vec<f64> = (0..ntaps)
        .map(|i| {
            let n = i as isize - mid;
            let sinc = if n == 0 {
                fw_t0 / PI
            } else {
                (n as f64 * fw_t0).sin() / (n as f64 * PI)
            };
            sinc * w[i]
        })
        .collect();

    normalize(taps, gain)
}

/// Root-raised-cosine impulse response at `x` symbol periods from the peak.
pub fn rrc_pulse(x: f64, alpha: f64) -> f64 {
    if x.abs() < 1e-12 {
        return 1.0 - alpha + 4.0 * alpha / PI;
    }
    let four_ax = 4.0 * alpha * x;
    if alpha > 0.0 && (1.0 - four_ax * four_ax).abs() < 1e-9 {
        let arg = PI / (4.0 * alpha);
        return alpha / 2f64.sqrt()
            * ((1.0 + 2.0 / PI) * arg.sin() + (1.0 - 2.0 / PI) * arg.cos());
    }
    ((PI * x * (1.0 - alpha)).sin() + four_ax * (PI * x * (1.0 + alpha)).cos())
        / (PI * x * (1.0 - four_ax * four_ax))
}

/// Design a root-raised-cosine matched filter.
///
/// `ntaps` is forced odd; taps are scaled so that they sum to `gain`.
pub fn root_raised_cosine(
    gain: f64,
    sample_rate: f64,
    symbol_rate: f64,
    alpha: f64,
    ntaps: usize,
) -> Vec<f32> {
    assert!(symbol_rate > 0.0, "Symbol rate must be greater than 0");
    let ntaps = ntaps | 1;
    let samples_per_symbol = sample_rate / symbol_rate;
    let mid = (ntaps / 2) as f64;
    let taps = (0..ntaps)
        .map(|i| rrc_pulse((i as f64 - mid) / samples_per_symbol, alpha))
        .collect();
    normalize(taps, gain)
}

fn normalize(taps: Vec<f64>, gain: f64) -> Vec<f32> {
    let sum: f64 = taps.iter().sum();
    let scale = if sum.abs() > f64::EPSILON {
        gain / sum
    } else {
        gain
    };
    taps.into_iter().map(|t| (t * scale) as f32).collect()
}

/// Magnitude of the frequency response of `taps` at `freq` Hz.
pub fn magnitude_response(taps: &[f32], freq: f64, sample_rate: f64) -> f64 {
    let w = 2.0 * PI * freq / sample_rate;
    let (re, im) = taps
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(re, im), (n, &t)| {
            let phase = w * n as f64;
            (re + t as f64 * phase.cos(), im - t as f64 * phase.sin())
        });
    (re * re + im * im).sqrt()
}
