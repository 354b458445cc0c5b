//! RDS bit recovery.
//!
//! The RDS subcarrier sits at three times the pilot frequency and carries
//! differentially encoded biphase data at 1187.5 bit/s, i.e. a BPSK chip
//! stream at 2375 Hz. The chain is:
//!
//! 1. translate 57 kHz to baseband, low-pass and decimate by 4
//! 2. root-raised-cosine matched filter at the chip rate
//! 3. amplitude normalization ([`Agc`])
//! 4. [`SymbolRecovery`]: carrier derotation ([`CostasLoop`]) and strobe
//!    timing ([`MuellerMuller`]), one complex sample per chip
//! 5. binary slicer, keep one chip in two, differential decoder
//!
//! Both halves of a biphase bit carry the same information with opposite
//! sign and the differential decoder only looks at transitions, so
//! neither the BPSK phase ambiguity nor the choice of half matters once
//! the loops are locked.
//!
//! Nothing here validates the bits. When the loops are unlocked the chain
//! keeps producing (mostly wrong) bits at the nominal rate and leaves
//! error detection to the group decoder downstream. [`SyncStatus`] reports
//! a lock estimate for display but never gates the output.

use std::f32::consts::PI;

use num_complex::Complex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::Config;
use crate::dsp::agc::Agc;
use crate::dsp::costas::CostasLoop;
use crate::dsp::filters::Fir;
use crate::dsp::firdes;
use crate::dsp::stereo::PILOT_FREQ;
use crate::dsp::timing::{MuellerMuller, TimingGains, interpolate_cubic};
use crate::dsp::translate::{FreqXlatingFir, XlatingDesign};
use crate::dsp::{DspBlock, Reconfigure};
use crate::error::Result;

/// RDS subcarrier frequency in Hz
pub const RDS_CARRIER: f64 = 3.0 * PILOT_FREQ;

/// Biphase chip rate in Hz
pub const CHIP_RATE: f64 = 2_375.0;

/// Data rate after biphase and differential decoding
pub const BIT_RATE: f64 = CHIP_RATE / 2.0;

pub const RDS_DECIMATION: usize = 4;

const RDS_DESIGN: XlatingDesign = XlatingDesign {
    center_freq: RDS_CARRIER,
    cutoff: 2_400.0,
    transition: 2_000.0,
    decimation: RDS_DECIMATION,
};

const RRC_ROLLOFF: f64 = 1.0;
const RRC_TAPS: usize = 100;

/// Lock detector smoothing and hysteresis thresholds
const LOCK_ALPHA: f32 = 0.02;
const LOCK_ON: f32 = 0.7;
const LOCK_OFF: f32 = 0.4;

/// Tuning constants of the RDS loops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RdsParams {
    /// Costas loop bandwidth, normalized to the chip rate
    pub carrier_bandwidth: f32,
    /// Carrier frequency search range in radians per decimated sample
    pub carrier_limit: f32,
    pub timing: TimingGains,
    pub agc_bandwidth: f32,
}

impl Default for RdsParams {
    fn default() -> Self {
        Self {
            carrier_bandwidth: PI / 100.0,
            carrier_limit: 0.06,
            timing: TimingGains::default(),
            agc_bandwidth: 1e-3,
        }
    }
}

/// Lock estimate of the RDS loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncStatus {
    pub locked: bool,
    /// Smoothed cos(2φ) of the strobed chips, 1.0 when they sit on the
    /// real axis
    pub quality: f32,
    /// Residual carrier offset tracked by the Costas loop, in Hz
    pub carrier_offset_hz: f32,
    /// Current chip period in decimated samples
    pub samples_per_chip: f32,
}

/// Carrier and timing recovery on the matched-filter output.
///
/// Every input sample is derotated by the carrier estimate and pushed into
/// a four sample history. When the strobe falls between the two middle
/// samples the chip is interpolated and both loops are updated with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolRecovery {
    carrier: CostasLoop,
    clock: MuellerMuller,
    /// Derotated samples, oldest first
    history: [Complex<f32>; 4],
    /// Position of the next strobe relative to the newest sample
    next_strobe: f32,
}

impl SymbolRecovery {
    pub fn new(samples_per_symbol: f32, params: &RdsParams) -> Self {
        Self {
            carrier: CostasLoop::new(
                params.carrier_bandwidth,
                samples_per_symbol,
                params.carrier_limit,
            ),
            clock: MuellerMuller::new(samples_per_symbol, params.timing),
            history: [Complex::new(0.0, 0.0); 4],
            next_strobe: 0.0,
        }
    }

    pub fn carrier(&self) -> &CostasLoop {
        &self.carrier
    }

    pub fn clock(&self) -> &MuellerMuller {
        &self.clock
    }

    /// Feed one sample; returns the next state and the strobed symbol, if
    /// this sample completed one.
    pub fn step(self, sample: Complex<f32>) -> (Self, Option<Complex<f32>>) {
        let derotated = self.carrier.derotate(sample);
        let mut next = Self {
            carrier: self.carrier.advance(),
            history: [self.history[1], self.history[2], self.history[3], derotated],
            next_strobe: self.next_strobe - 1.0,
            ..self
        };
        if next.next_strobe > -1.0 {
            return (next, None);
        }

        // strobe lies between history[1] (t = -2) and history[2] (t = -1)
        let mu = (next.next_strobe + 2.0).clamp(0.0, 1.0);
        let symbol = interpolate_cubic(&next.history, mu);

        let (clock, interval) = next.clock.step(symbol);
        let (carrier, _) = next.carrier.track(symbol);
        next.clock = clock;
        next.carrier = carrier;
        next.next_strobe += interval.max(1.0);
        (next, Some(symbol))
    }
}

/// Hysteresis lock estimate from the chip constellation
#[derive(Debug, Clone, Copy, PartialEq)]
struct LockDetector {
    metric: f32,
    locked: bool,
}

impl LockDetector {
    fn new() -> Self {
        Self {
            metric: 0.0,
            locked: false,
        }
    }

    fn update(self, symbol: Complex<f32>) -> Self {
        let power = symbol.norm_sqr();
        let cos2 = if power > 1e-12 && power.is_finite() {
            (symbol.re * symbol.re - symbol.im * symbol.im) / power
        } else {
            0.0
        };
        let metric = self.metric + LOCK_ALPHA * (cos2 - self.metric);
        let locked = if self.locked {
            metric > LOCK_OFF
        } else {
            metric > LOCK_ON
        };
        Self { metric, locked }
    }
}

/// Binary slicer: 1 for a non-negative real part
#[inline]
pub fn slice(symbol: Complex<f32>) -> u8 {
    u8::from(symbol.re >= 0.0)
}

/// Keeps one item out of every `n`, starting with the `n`-th.
#[derive(Debug, Clone)]
pub struct KeepOneInN {
    n: usize,
    count: usize,
}

impl KeepOneInN {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "Keep ratio must be greater than 0");
        Self { n, count: 0 }
    }

    pub fn push<T>(&mut self, item: T) -> Option<T> {
        self.count += 1;
        if self.count == self.n {
            self.count = 0;
            Some(item)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Differential decoder: output is the XOR of the current and previous
/// input bit.
#[derive(Debug, Clone, Default)]
pub struct DiffDecoder {
    prev: u8,
}

impl DiffDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bit: u8) -> u8 {
        let out = (bit ^ self.prev) & 1;
        self.prev = bit & 1;
        out
    }

    pub fn reset(&mut self) {
        self.prev = 0;
    }
}

pub struct RdsDemodulator {
    sample_rate: u32,
    params: RdsParams,
    xlate: FreqXlatingFir,
    matched: Fir<Complex<f32>>,
    agc: Agc,
    recovery: SymbolRecovery,
    lock: LockDetector,
    keep: KeepOneInN,
    diff: DiffDecoder,
}

impl RdsDemodulator {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_params(sample_rate, RdsParams::default())
    }

    pub fn with_params(sample_rate: u32, params: RdsParams) -> Self {
        let xlate = FreqXlatingFir::new(RDS_DESIGN, sample_rate);
        let baseband_rate = xlate.output_rate();
        let matched = firdes::root_raised_cosine(
            1.0,
            baseband_rate,
            CHIP_RATE,
            RRC_ROLLOFF,
            RRC_TAPS,
        );
        let samples_per_chip = (baseband_rate / CHIP_RATE) as f32;
        debug!(
            "[RDS] {} Hz: {} Hz baseband, xlate {} taps, RRC {} taps, {:.3} samples/chip",
            sample_rate,
            baseband_rate,
            xlate.taps().len(),
            matched.len(),
            samples_per_chip
        );
        Self {
            sample_rate,
            params,
            xlate,
            matched: Fir::new(matched),
            agc: Agc::new(params.agc_bandwidth),
            recovery: SymbolRecovery::new(samples_per_chip, &params),
            lock: LockDetector::new(),
            keep: KeepOneInN::new(2),
            diff: DiffDecoder::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decimated baseband rate in Hz
    pub fn baseband_rate(&self) -> f64 {
        self.xlate.output_rate()
    }

    pub fn xlate_taps(&self) -> &[f32] {
        self.xlate.taps()
    }

    pub fn matched_taps(&self) -> &[f32] {
        self.matched.taps()
    }

    pub fn samples_per_chip(&self) -> f32 {
        self.recovery.clock().omega_mid()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.locked
    }

    pub fn sync_status(&self) -> SyncStatus {
        let freq = self.recovery.carrier().freq();
        SyncStatus {
            locked: self.lock.locked,
            quality: self.lock.metric,
            carrier_offset_hz: freq * self.baseband_rate() as f32 / (2.0 * PI),
            samples_per_chip: self.recovery.clock().omega(),
        }
    }

    /// Push one MPX sample; returns a decoded bit when one completes.
    pub fn push(&mut self, x: f32) -> Option<u8> {
        let baseband = self.xlate.push(x)?;
        let normalized = self.agc.execute(self.matched.push(baseband));

        let (recovery, symbol) = self.recovery.step(normalized);
        self.recovery = recovery;
        let symbol = symbol?;

        self.track_lock(symbol);
        let chip = self.keep.push(slice(symbol))?;
        Some(self.diff.decode(chip))
    }

    fn track_lock(&mut self, symbol: Complex<f32>) {
        let was_locked = self.lock.locked;
        self.lock = self.lock.update(symbol);
        if self.lock.locked != was_locked {
            let status = self.sync_status();
            if status.locked {
                debug!(
                    "[RDS] Lock acquired: quality {:.2}, carrier offset {:+.1} Hz",
                    status.quality, status.carrier_offset_hz
                );
            } else {
                debug!("[RDS] Lock lost: quality {:.2}", status.quality);
            }
        }
    }

    pub fn reset(&mut self) {
        self.xlate.reset();
        self.matched.reset();
        self.agc.reset();
        self.recovery = SymbolRecovery::new(self.samples_per_chip(), &self.params);
        self.lock = LockDetector::new();
        self.keep.reset();
        self.diff.reset();
    }
}

impl DspBlock<f32, u8> for RdsDemodulator {
    fn process(&mut self, data: &[f32]) -> Vec<u8> {
        let bits: Vec<u8> = data.iter().filter_map(|&x| self.push(x)).collect();
        trace!(
            "[RDS] {} samples -> {} bits, locked: {}",
            data.len(),
            bits.len(),
            self.lock.locked
        );
        bits
    }
}

impl Reconfigure for RdsDemodulator {
    fn reconfigure(&mut self, config: &Config) -> Result<()> {
        if config.mpx_rate == self.sample_rate {
            return Ok(());
        }
        *self = RdsDemodulator::with_params(config.mpx_rate, self.params);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// BPSK chips with RRC pulses at `sps` samples per chip, rotated by a
    /// constant phase and a small frequency offset.
    fn baseband(chips: &[f32], sps: f64, phase: f32, offset: f32) -> Vec<Complex<f32>> {
        let n = (chips.len() as f64 * sps) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / sps;
                let centre = t.round() as i64;
                let value: f64 = (centre - 4..=centre + 4)
                    .filter(|&m| m >= 0 && (m as usize) < chips.len())
                    .map(|m| chips[m as usize] as f64 * firdes::rrc_pulse(t - m as f64, 1.0))
                    .sum();
                Complex::from_polar(value as f32, phase + offset * i as f32)
            })
            .collect()
    }

    fn chips(n: usize) -> Vec<f32> {
        let mut state = 0x1234_5678u32;
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                if state & 1 == 1 { 1.0 } else { -1.0 }
            })
            .collect()
    }

    #[test]
    fn test_slicer() {
        assert_eq!(slice(Complex::new(0.3, -2.0)), 1);
        assert_eq!(slice(Complex::new(0.0, 0.0)), 1);
        assert_eq!(slice(Complex::new(-1e-6, 5.0)), 0);
    }

    #[test]
    fn test_keep_one_in_two() {
        let mut keep = KeepOneInN::new(2);
        let kept: Vec<u32> = (0..7).filter_map(|i| keep.push(i)).collect();
        assert_eq!(kept, vec![1, 3, 5]);
    }

    #[test]
    fn test_diff_decoder() {
        let mut diff = DiffDecoder::new();
        let out: Vec<u8> = [1, 1, 0, 0, 1].iter().map(|&b| diff.decode(b)).collect();
        assert_eq!(out, vec![1, 0, 1, 0, 1]);

        // inverted input decodes identically after the first bit
        let mut diff = DiffDecoder::new();
        let inv: Vec<u8> = [0, 0, 1, 1, 0].iter().map(|&b| diff.decode(b)).collect();
        assert_eq!(&inv[1..], &out[1..]);
    }

    #[test]
    fn test_lock_detector_hysteresis() {
        let mut lock = LockDetector::new();
        for _ in 0..200 {
            lock = lock.update(Complex::new(1.0, 0.0));
        }
        assert!(lock.locked);
        // cos 2φ = 0.5 keeps the lock but cannot acquire it
        let half = Complex::from_polar(1.0, PI / 6.0);
        for _ in 0..500 {
            lock = lock.update(half);
        }
        assert!(lock.locked);
        let mut fresh = LockDetector::new();
        for _ in 0..500 {
            fresh = fresh.update(half);
        }
        assert!(!fresh.locked);
        for _ in 0..500 {
            lock = lock.update(Complex::new(0.0, 1.0));
        }
        assert!(!lock.locked);
    }

    #[test]
    fn test_filter_design() {
        let rds = RdsDemodulator::new(192_000);
        assert_eq!(rds.xlate_taps().len(), 231);
        assert_eq!(rds.matched_taps().len(), 101);
        assert_relative_eq!(rds.baseband_rate(), 48_000.0);
        assert_relative_eq!(rds.samples_per_chip(), 20.210_526, epsilon = 1e-4);
    }

    #[test]
    fn test_symbol_recovery_locks_on_baseband() {
        let sps = 48_000.0 / CHIP_RATE;
        let data = chips(1200);
        let params = RdsParams::default();
        let taps = firdes::root_raised_cosine(1.0, 48_000.0, CHIP_RATE, 1.0, 100);
        let mut matched = Fir::<Complex<f32>>::new(taps);
        let mut agc = Agc::new(params.agc_bandwidth);
        let mut recovery = SymbolRecovery::new(sps as f32, &params);

        let mut decisions = Vec::new();
        for x in baseband(&data, sps, 0.8, 2.0 * PI * 3.0 / 48_000.0) {
            let (next, symbol) = recovery.step(agc.execute(matched.push(x)));
            recovery = next;
            if let Some(s) = symbol {
                decisions.push(if s.re >= 0.0 { 1.0 } else { -1.0 });
            }
        }
        assert!((decisions.len() as i64 - 1200).abs() < 10);

        // compare the last 600 chips, allowing for latency and BPSK sign
        let tail = &decisions[decisions.len() - 600..];
        let found = (0..20).any(|lag| {
            let start = decisions.len() - 600 - lag;
            if start + 600 > data.len() {
                return false;
            }
            let reference = &data[start..start + 600];
            let same = tail.iter().zip(reference).all(|(a, b)| a == b);
            let flipped = tail.iter().zip(reference).all(|(a, b)| *a == -b);
            same || flipped
        });
        assert!(found, "recovered chips do not match the transmitted ones");
        assert_relative_eq!(recovery.carrier().freq(), 2.0 * PI * 3.0 / 48_000.0, epsilon = 2e-4);
    }

    #[test]
    fn test_silence_keeps_bit_rate() {
        let mut rds = RdsDemodulator::new(192_000);
        let bits = rds.process(&vec![0.0; 192_000]);
        assert!((bits.len() as i64 - 1187).abs() <= 3, "{} bits", bits.len());
        assert!(bits.iter().all(|&b| b <= 1));
        assert!(!rds.is_locked());
    }

    #[test]
    fn test_garbage_input_stays_bounded() {
        let mut rds = RdsDemodulator::new(176_400);
        let noise: Vec<f32> = (0..100_000)
            .map(|i| ((i as f32 * 12.9898).sin() * 43_758.547).fract() * 2.0 - 1.0)
            .collect();
        let bits = rds.process(&noise);
        assert!(!bits.is_empty());
        let status = rds.sync_status();
        assert!(status.carrier_offset_hz.abs() <= 0.06 * 44_100.0 / (2.0 * PI) + 0.01);
        assert!(status.samples_per_chip.is_finite());
    }

    #[test]
    fn test_reconfigure_rebuilds_for_new_rate() {
        let mut rds = RdsDemodulator::new(192_000);
        rds.process(&[0.1; 1000]);
        rds.reconfigure(&Config::default().with_mpx_rate(176_400)).unwrap();
        assert_eq!(rds.sample_rate(), 176_400);
        assert_relative_eq!(rds.baseband_rate(), 44_100.0);
        assert_relative_eq!(rds.samples_per_chip(), 18.568_42, epsilon = 1e-4);
        let expected = firdes::root_raised_cosine(1.0, 44_100.0, CHIP_RATE, 1.0, 100);
        assert_eq!(rds.matched_taps(), expected.as_slice());
    }
}
