/// Digital Signal Processing (DSP) module.
///
/// Building blocks for the FM multiplex receiver. Every streaming stage
/// keeps its filter state across calls, so a stream may be cut into blocks
/// of any size without changing the output.
///
/// # Modules
/// - `firdes`: FIR tap design (windowed sinc, root raised cosine).
/// - `filters`: streaming FIR filters, interpolator and delay lines.
/// - `translate`: frequency-translating decimating FIR.
/// - `deemphasis`: single-pole de-emphasis.
/// - `stereo`: L+R / L−R recovery and matrixing.
/// - `audio`: de-emphasis, resampling (`rubato`) and gain for both channels.
/// - `agc`: amplitude normalization ahead of the RDS loops.
/// - `costas`: carrier phase/frequency tracking state.
/// - `timing`: Mueller-and-Muller symbol timing state and interpolator.
/// - `rds`: complete RDS bit recovery chain.
///
/// # Traits
/// - [`DspBlock`]: a stage that turns one block of samples into another.
/// - [`Reconfigure`]: a stage whose coefficients derive from [`Config`].
use crate::config::Config;
use crate::error::Result;

pub mod agc;
pub mod audio;
pub mod costas;
pub mod deemphasis;
pub mod filters;
pub mod firdes;
pub mod rds;
pub mod stereo;
pub mod timing;
pub mod translate;

pub trait DspBlock<I, O> {
    fn process(&mut self, data: &[I]) -> Vec<O>;
}

/// Recompute coefficients derived from the configuration.
///
/// Implementations are idempotent: when the parameters a stage depends on
/// are unchanged the call does nothing and the stage keeps its state.
/// Otherwise the taps are rebuilt and the stage state is reset before the
/// next sample is processed. On error the stage is left untouched.
pub trait Reconfigure {
    fn reconfigure(&mut self, config: &Config) -> Result<()>;
}
