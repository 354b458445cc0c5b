//! Streaming FIR filters.
//!
//! - [`DelayLine`]: newest-first history of the last `n` samples
//! - [`Fir`]: FIR filter whose delay line persists across blocks
//! - [`Interpolator`]: polyphase interpolation by an integer factor
//! - [`Delay`]: pure integer sample delay, used to align parallel paths
//!
//! Filters are generic over the sample type so the same code runs on real
//! (`f32`) and complex (`Complex<f32>`) streams; taps are always real.
//!
//! # Example
//!
//! ```
//! use mpxrx::dsp::filters::Fir;
//!
//! let mut fir = Fir::<f32>::new(vec![0.25, 0.5, 0.25]);
//! assert_eq!(fir.push(1.0), 0.25);
//! assert_eq!(fir.push(0.0), 0.5);
//! assert_eq!(fir.push(0.0), 0.25);
//! ```

use std::ops::{Add, Mul};

use crate::dsp::DspBlock;

/// Sample types a real-tap filter can run on
pub trait Sample: Copy + Default + Add<Output = Self> + Mul<f32, Output = Self> {}

impl<T> Sample for T where T: Copy + Default + Add<Output = T> + Mul<f32, Output = T> {}

/// Fixed-length sample history.
///
/// Every sample is written twice so that the most recent `len` samples are
/// always available as one contiguous newest-first slice.
#[derive(Debug, Clone)]
pub struct DelayLine<T> {
    buffer: Vec<T>,
    pos: usize,
    len: usize,
}

impl<T: Sample> DelayLine<T> {
    /// # Panics
    ///
    /// Panics if `len` is 0.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "Delay line length must be greater than 0");
        Self {
            buffer: vec![T::default(); 2 * len],
            pos: 0,
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub fn push(&mut self, sample: T) {
        self.pos = if self.pos == 0 { self.len - 1 } else { self.pos - 1 };
        self.buffer[self.pos] = sample;
        self.buffer[self.pos + self.len] = sample;
    }

    /// History, newest sample first
    pub fn history(&self) -> &[T] {
        &self.buffer[self.pos..self.pos + self.len]
    }

    /// Sample pushed `age` calls ago (0 is the newest)
    pub fn get(&self, age: usize) -> T {
        self.history()[age]
    }

    /// Sum of `taps[j] * history[j]`, truncated to the shorter of the two.
    pub fn dot<'a, I>(&self, taps: I) -> T
    where
        I: IntoIterator<Item = &'a f32>,
    {
        taps.into_iter()
            .zip(self.history())
            .fold(T::default(), |acc, (&t, &x)| acc + x * t)
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = T::default());
        self.pos = 0;
    }
}

/// FIR filter with persistent state.
#[derive(Debug, Clone)]
pub struct Fir<T> {
    taps: Vec<f32>,
    line: DelayLine<T>,
}

impl<T: Sample> Fir<T> {
    /// # Panics
    ///
    /// Panics if `taps` is empty.
    pub fn new(taps: Vec<f32>) -> Self {
        assert!(!taps.is_empty(), "Number of taps must be greater than 0");
        let line = DelayLine::new(taps.len());
        Self { taps, line }
    }

    /// Push one sample and return one filtered sample.
    pub fn push(&mut self, sample: T) -> T {
        self.line.push(sample);
        self.line.dot(&self.taps)
    }

    /// Push one sample without computing an output (for decimation).
    pub fn feed(&mut self, sample: T) {
        self.line.push(sample);
    }

    /// Filter output for the samples pushed so far.
    pub fn output(&self) -> T {
        self.line.dot(&self.taps)
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    /// Group delay in samples (taps are symmetric and odd-length)
    pub fn delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Replace the taps; the history is cleared.
    pub fn set_taps(&mut self, taps: Vec<f32>) {
        assert!(!taps.is_empty(), "Number of taps must be greater than 0");
        self.line = DelayLine::new(taps.len());
        self.taps = taps;
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

impl<T: Sample> DspBlock<T, T> for Fir<T> {
    fn process(&mut self, data: &[T]) -> Vec<T> {
        data.iter().map(|&x| self.push(x)).collect()
    }
}

/// Integer-factor polyphase interpolator.
///
/// Equivalent to zero-stuffing by `factor` and filtering with `taps` at the
/// high rate, without evaluating the stuffed zeros. With a symmetric
/// prototype the group delay is `(taps.len() - 1) / 2` output samples.
#[derive(Debug, Clone)]
pub struct Interpolator<T> {
    factor: usize,
    taps: Vec<f32>,
    line: DelayLine<T>,
}

impl<T: Sample> Interpolator<T> {
    /// # Panics
    ///
    /// Panics if `factor` is 0 or `taps` is empty.
    pub fn new(factor: usize, taps: Vec<f32>) -> Self {
        assert!(factor > 0, "Interpolation factor must be greater than 0");
        assert!(!taps.is_empty(), "Number of taps must be greater than 0");
        let line = DelayLine::new(taps.len().div_ceil(factor));
        Self { factor, taps, line }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub fn delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Push one low-rate sample, appending `factor` high-rate samples.
    pub fn push(&mut self, sample: T, out: &mut Vec<T>) {
        self.line.push(sample);
        for phase in 0..self.factor {
            let branch = self.taps.iter().skip(phase).step_by(self.factor);
            out.push(self.line.dot(branch));
        }
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

impl<T: Sample> DspBlock<T, T> for Interpolator<T> {
    fn process(&mut self, data: &[T]) -> Vec<T> {
        let mut out = Vec::with_capacity(data.len() * self.factor);
        for &x in data {
            self.push(x, &mut out);
        }
        out
    }
}

/// Integer sample delay.
#[derive(Debug, Clone)]
pub struct Delay<T> {
    line: DelayLine<T>,
}

impl<T: Sample> Delay<T> {
    pub fn new(samples: usize) -> Self {
        Self {
            line: DelayLine::new(samples + 1),
        }
    }

    pub fn delay(&self) -> usize {
        self.line.len() - 1
    }

    /// Push one sample, get back the sample pushed `delay` calls earlier.
    pub fn push(&mut self, sample: T) -> T {
        self.line.push(sample);
        self.line.get(self.line.len() - 1)
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::firdes::{self, Window};
    use approx::assert_relative_eq;
    use num_complex::Complex;

    #[test]
    fn test_delay_line_order() {
        let mut line = DelayLine::<f32>::new(3);
        for x in [1.0, 2.0, 3.0, 4.0] {
            line.push(x);
        }
        assert_eq!(line.history(), &[4.0, 3.0, 2.0]);
        assert_eq!(line.get(2), 2.0);
    }

    #[test]
    fn test_fir_impulse_response_equals_taps() {
        let taps = vec![0.1, 0.2, 0.4, 0.2, 0.1];
        let mut fir = Fir::<f32>::new(taps.clone());
        let mut impulse = vec![0.0f32; 8];
        impulse[0] = 1.0;
        let out = fir.process(&impulse);
        for (o, t) in out.iter().zip(taps.iter()) {
            assert_relative_eq!(*o, *t);
        }
        assert_relative_eq!(out[6], 0.0);
    }

    #[test]
    fn test_fir_block_boundaries() {
        let taps = vec![0.5, -0.25, 0.125, 0.0625];
        let input: Vec<f32> = (0..50).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut whole = Fir::<f32>::new(taps.clone());
        let expected = whole.process(&input);

        let mut split = Fir::<f32>::new(taps);
        let mut got = split.process(&input[..17]);
        got.extend(split.process(&input[17..]));

        for (a, b) in got.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_fir_complex_samples() {
        let mut fir = Fir::<Complex<f32>>::new(vec![0.5, 0.5]);
        let out = fir.process(&[Complex::new(1.0, 2.0), Complex::new(3.0, -2.0)]);
        assert_eq!(out[0], Complex::new(0.5, 1.0));
        assert_eq!(out[1], Complex::new(2.0, 0.0));
    }

    #[test]
    fn test_set_taps_clears_history() {
        let mut fir = Fir::<f32>::new(vec![1.0, 1.0]);
        fir.push(5.0);
        fir.set_taps(vec![1.0, 1.0, 1.0]);
        assert_eq!(fir.push(1.0), 1.0);
        assert_eq!(fir.delay(), 1);
    }

    #[test]
    fn test_delay() {
        let mut delay = Delay::<f32>::new(2);
        let out: Vec<f32> = [1.0, 2.0, 3.0, 4.0].iter().map(|&x| delay.push(x)).collect();
        assert_eq!(out, vec![0.0, 0.0, 1.0, 2.0]);

        let mut none = Delay::<f32>::new(0);
        assert_eq!(none.push(7.0f32), 7.0);
    }

    #[test]
    fn test_interpolator_impulse_response_equals_taps() {
        let taps: Vec<f32> = (1..=7).map(|i| i as f32).collect();
        let mut interp = Interpolator::<f32>::new(3, taps.clone());
        let out = interp.process(&[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[..7], taps.as_slice());
        assert!(out[7..].iter().all(|&v| v == 0.0));
        assert_eq!(interp.delay(), 3);
    }

    #[test]
    fn test_interpolator_keeps_tone_level() {
        let taps = firdes::low_pass(4.0, 192_000.0, 24_000.0, 6_000.0, Window::Hamming);
        let mut interp = Interpolator::<f32>::new(4, taps);
        let input: Vec<f32> = (0..4_800)
            .map(|i| (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / 48_000.0).sin())
            .collect();
        let out = interp.process(&input);
        assert_eq!(out.len(), 19_200);
        let peak = out[400..].iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        assert_relative_eq!(peak, 1.0, epsilon = 0.01);
    }

    #[test]
    #[should_panic(expected = "Number of taps must be greater than 0")]
    fn test_fir_zero_taps() {
        let _ = Fir::<f32>::new(vec![]);
    }
}
