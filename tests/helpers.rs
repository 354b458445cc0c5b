//! Test helper utilities for generating synthetic MPX signals

#![allow(dead_code)]

use std::f64::consts::PI;

use mpxrx::dsp::firdes::rrc_pulse;

pub const PILOT_FREQ: f64 = 19_000.0;
pub const PILOT_LEVEL: f64 = 0.09;
pub const RDS_CARRIER: f64 = 57_000.0;
pub const CHIP_RATE: f64 = 2_375.0;

/// Generate a stereo multiplex signal
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz
/// * `num_samples` - Number of samples to generate
/// * `left`, `right` - Channel signals as functions of time in seconds
///
/// # Returns
/// `(L+R) + (L−R)·cos(2·ω_pilot·t) + pilot`, with the 38 kHz subcarrier
/// phase-locked to the pilot
pub fn stereo_mpx<L, R>(sample_rate: u32, num_samples: usize, left: L, right: R) -> Vec<f32>
where
    L: Fn(f64) -> f64,
    R: Fn(f64) -> f64,
{
    let fs = sample_rate as f64;
    (0..num_samples)
        .map(|n| {
            let t = n as f64 / fs;
            let (l, r) = (left(t), right(t));
            let subcarrier = (2.0 * PI * 2.0 * PILOT_FREQ * t).cos();
            let pilot = PILOT_LEVEL * (2.0 * PI * PILOT_FREQ * t).cos();
            ((l + r) + (l - r) * subcarrier + pilot) as f32
        })
        .collect()
}

/// A sine tone as a function of time
pub fn tone(freq: f64, amplitude: f64) -> impl Fn(f64) -> f64 {
    move |t| amplitude * (2.0 * PI * freq * t).sin()
}

pub fn silence(_t: f64) -> f64 {
    0.0
}

/// Deterministic pseudo-random bits (xorshift)
pub fn random_bits(count: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 7) as u8 & 1
        })
        .collect()
}

/// Differentially encode data bits, then map each bit to two biphase
/// chips `(s, −s)` with `s = ±1`.
pub fn biphase_chips(bits: &[u8]) -> Vec<f64> {
    let mut previous = 0u8;
    let mut chips = Vec::with_capacity(2 * bits.len());
    for &bit in bits {
        previous ^= bit & 1;
        let s = if previous == 1 { 1.0 } else { -1.0 };
        chips.push(s);
        chips.push(-s);
    }
    chips
}

/// RDS subcarrier carrying `bits`, added to an optional stereo signal.
///
/// The chips are shaped with root-raised-cosine pulses (roll-off 1.0) at
/// 2375 Hz and modulate a 57 kHz carrier with phase `phase` and peak
/// level `level`. `carrier_offset_hz` shifts the carrier and `chip_ppm`
/// scales the chip rate, as a transmitter with an off-nominal clock would.
pub fn rds_mpx(
    sample_rate: u32,
    bits: &[u8],
    phase: f64,
    level: f64,
    carrier_offset_hz: f64,
    chip_ppm: f64,
) -> Vec<f32> {
    let fs = sample_rate as f64;
    let chip_rate = CHIP_RATE * (1.0 + chip_ppm * 1e-6);
    let carrier_freq = RDS_CARRIER + carrier_offset_hz;
    let chips = biphase_chips(bits);
    let num_samples = (chips.len() as f64 * fs / chip_rate) as usize;
    let mono = tone(1_000.0, 0.3);

    (0..num_samples)
        .map(|n| {
            let t = n as f64 / fs;
            let x = t * chip_rate;
            let centre = x.round() as i64;
            let baseband: f64 = (centre - 4..=centre + 4)
                .filter(|&m| m >= 0 && (m as usize) < chips.len())
                .map(|m| chips[m as usize] * rrc_pulse(x - m as f64, 1.0))
                .sum();
            let carrier = (2.0 * PI * carrier_freq * t + phase).cos();
            let pilot = PILOT_LEVEL * (2.0 * PI * PILOT_FREQ * t).cos();
            (level * baseband * carrier + pilot + 2.0 * mono(t)) as f32
        })
        .collect()
}

/// Amplitude of the component at `freq` over whole cycles of `x`
pub fn tone_amplitude(x: &[f32], freq: f64, sample_rate: f64) -> f64 {
    let cycles = (x.len() as f64 * freq / sample_rate).floor();
    let n = ((cycles * sample_rate / freq).round() as usize).min(x.len());
    let (mut re, mut im) = (0.0, 0.0);
    for (i, &v) in x[..n].iter().enumerate() {
        let phase = 2.0 * PI * freq * i as f64 / sample_rate;
        re += v as f64 * phase.cos();
        im -= v as f64 * phase.sin();
    }
    2.0 * (re * re + im * im).sqrt() / n as f64
}

/// Search `found` for a run matching `expected[start..start + len]` at a
/// small offset; returns the offset.
pub fn find_alignment(found: &[u8], expected: &[u8], start: usize, len: usize) -> Option<isize> {
    (-20isize..=20).find(|&offset| {
        let from = start as isize + offset;
        if from < 0 || from as usize + len > expected.len() || start + len > found.len() {
            return false;
        }
        found[start..start + len] == expected[from as usize..from as usize + len]
    })
}
