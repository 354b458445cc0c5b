//! Receiver configuration
//!
//! The configuration is the only state shared across the stereo, audio and
//! RDS paths. It is passed by reference to every stage's
//! [`Reconfigure`](crate::dsp::Reconfigure) operation; stages never keep a
//! pointer to it.
//!
//! ```
//! use mpxrx::config::{Config, Volume};
//!
//! let config = Config::default()
//!     .with_mpx_rate(176_400)
//!     .with_volume(Volume::Percent(50.0));
//! assert!(config.validate().is_ok());
//! assert_eq!(config.resample_ratio(), (80, 147));
//! ```

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest accepted MPX rate. The `L−R` channel is decimated by 4, and its
/// interpolator is only flat up to about a tenth of the MPX rate: below
/// 160 kHz the upper audio band loses its stereo separation.
pub const MIN_MPX_RATE: u32 = 160_000;

/// Highest accepted MPX rate; filter lengths grow linearly with the rate.
pub const MAX_MPX_RATE: u32 = 1_000_000;

/// Largest term of the reduced `audio_rate / mpx_rate` ratio. The
/// resampler works on chunks that are a multiple of it.
pub const MAX_RATIO_TERM: u32 = 10_000;

/// Output volume, either logarithmic or as a percentage of unity gain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volume {
    /// Volume in dB, converted with 10^(dB/10)
    Decibels(f32),
    /// Volume in percent, 100 is unity gain
    Percent(f32),
}

impl Volume {
    /// Linear gain applied to both audio channels
    pub fn linear(self) -> f32 {
        match self {
            Volume::Decibels(db) => 10f32.powf(db / 10.0),
            Volume::Percent(pct) => pct / 100.0,
        }
    }

    fn validate(self) -> Result<()> {
        match self {
            Volume::Decibels(db) if !db.is_finite() => {
                Err(Error::config(format!("volume {db} dB is not finite")))
            }
            Volume::Percent(pct) if !pct.is_finite() || pct < 0.0 => Err(Error::config(
                format!("volume {pct}% must be a non-negative number"),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Volume {
    fn default() -> Self {
        Volume::Decibels(-3.0)
    }
}

/// De-emphasis time constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deemphasis {
    /// Europe and most of the world: 50 µs
    #[default]
    Eu,
    /// North America, South Korea: 75 µs
    Us,
    /// No de-emphasis
    Off,
}

impl Deemphasis {
    /// Time constant in seconds, `None` when disabled
    pub fn tau(self) -> Option<f32> {
        match self {
            Deemphasis::Eu => Some(50e-6),
            Deemphasis::Us => Some(75e-6),
            Deemphasis::Off => None,
        }
    }
}

impl FromStr for Deemphasis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eu" | "world" | "50" => Ok(Deemphasis::Eu),
            "us" | "75" => Ok(Deemphasis::Us),
            "off" | "none" => Ok(Deemphasis::Off),
            other => Err(Error::config(format!("unknown de-emphasis '{other}'"))),
        }
    }
}

/// Process-wide rate and gain parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MPX input sample rate in Hz
    pub mpx_rate: u32,
    /// Audio output sample rate in Hz
    pub audio_rate: u32,
    /// Output volume
    pub volume: Volume,
    /// De-emphasis time constant
    pub deemphasis: Deemphasis,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mpx_rate: 192_000,
            audio_rate: 96_000,
            volume: Volume::default(),
            deemphasis: Deemphasis::default(),
        }
    }
}

impl Config {
    pub fn with_mpx_rate(mut self, mpx_rate: u32) -> Self {
        self.mpx_rate = mpx_rate;
        self
    }

    pub fn with_audio_rate(mut self, audio_rate: u32) -> Self {
        self.audio_rate = audio_rate;
        self
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_deemphasis(mut self, deemphasis: Deemphasis) -> Self {
        self.deemphasis = deemphasis;
        self
    }

    /// Check every parameter, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.mpx_rate < MIN_MPX_RATE {
            return Err(Error::config(format!(
                "MPX rate {} Hz is below the {} Hz minimum",
                self.mpx_rate, MIN_MPX_RATE
            )));
        }
        if self.mpx_rate > MAX_MPX_RATE {
            return Err(Error::config(format!(
                "MPX rate {} Hz is above the {} Hz maximum",
                self.mpx_rate, MAX_MPX_RATE
            )));
        }
        if self.audio_rate == 0 {
            return Err(Error::config("audio rate must be positive"));
        }
        if self.audio_rate > self.mpx_rate {
            return Err(Error::config(format!(
                "audio rate {} Hz exceeds MPX rate {} Hz",
                self.audio_rate, self.mpx_rate
            )));
        }
        let (up, down) = self.resample_ratio();
        if up.max(down) > MAX_RATIO_TERM {
            return Err(Error::config(format!(
                "audio rate {} Hz and MPX rate {} Hz reduce to {}/{}, terms above {} are not supported",
                self.audio_rate, self.mpx_rate, up, down, MAX_RATIO_TERM
            )));
        }
        self.volume.validate()
    }

    /// Resampling ratio (interpolation, decimation) reduced to lowest terms
    pub fn resample_ratio(&self) -> (u32, u32) {
        let g = gcd(self.audio_rate, self.mpx_rate).max(1);
        (self.audio_rate / g, self.mpx_rate / g)
    }

    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = crate::mpxread::expanduser(path.as_ref().to_path_buf());
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
