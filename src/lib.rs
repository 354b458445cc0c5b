#![doc = include_str!("../readme.md")]

use std::{
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};

use futures::Stream;

pub mod config;
pub mod dsp;
pub mod error;
pub mod mpxread;
pub mod pipeline;

pub use config::{Config, Deemphasis, Volume};
pub use error::{Error, Result};
pub use pipeline::{AudioBuffer, Frame, Receiver, RunSummary, SharedReceiver};

/**
 * MPX Sample Format
 */
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MpxFormat {
    /// 32-bit float, little-endian
    F32,
    /// Signed 16-bit, little-endian, scaled by 1/32768
    S16,
}

impl FromStr for MpxFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float" => Ok(MpxFormat::F32),
            "s16" | "i16" => Ok(MpxFormat::S16),
            other => Err(Error::format(format!("unknown sample format '{other}'"))),
        }
    }
}

/**
 * Synchronous MPX Data Source (iterable)
 */
pub enum MpxSource {
    /// File-based MPX source
    MpxFile(mpxread::MpxRead<std::io::BufReader<std::fs::File>>),
}

impl Iterator for MpxSource {
    type Item = std::result::Result<Vec<f32>, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            MpxSource::MpxFile(source) => source.next(),
        }
    }
}

impl MpxSource {
    /// Create a new file-based MPX source
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> std::result::Result<Self, std::io::Error> {
        let source = mpxread::MpxRead::from_file(path, sample_rate, chunk_size, format)?;
        Ok(MpxSource::MpxFile(source))
    }
}

/**
 * Asynchronous MPX Data Source (streamable)
 */
pub enum MpxAsyncSource {
    /// File-based MPX source
    MpxAsyncFile(mpxread::MpxAsyncRead<tokio::io::BufReader<tokio::fs::File>>),
    /// Stdin-based MPX source
    MpxAsyncStdin(mpxread::MpxAsyncRead<tokio::io::BufReader<tokio::io::Stdin>>),
    /// TCP-based MPX source
    MpxAsyncTcp(mpxread::MpxAsyncRead<tokio::io::BufReader<tokio::net::TcpStream>>),
}

impl MpxAsyncSource {
    /// Create a new file-based asynchronous MPX source
    pub async fn from_file<P: AsRef<std::path::Path>>(
        path: P,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> std::result::Result<Self, std::io::Error> {
        let source =
            mpxread::MpxAsyncRead::from_file(path, sample_rate, chunk_size, format).await?;
        Ok(MpxAsyncSource::MpxAsyncFile(source))
    }

    /// Create a new stdin-based asynchronous MPX source
    pub fn from_stdin(sample_rate: u32, chunk_size: usize, format: MpxFormat) -> Self {
        let source = mpxread::MpxAsyncRead::from_stdin(sample_rate, chunk_size, format);
        MpxAsyncSource::MpxAsyncStdin(source)
    }

    /// Create a new TCP-based asynchronous MPX source
    pub async fn from_tcp(
        addr: &str,
        port: u16,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> std::result::Result<Self, std::io::Error> {
        let source =
            mpxread::MpxAsyncRead::from_tcp(addr, port, sample_rate, chunk_size, format).await?;
        Ok(MpxAsyncSource::MpxAsyncTcp(source))
    }
}

impl Stream for MpxAsyncSource {
    type Item = std::result::Result<Vec<f32>, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            MpxAsyncSource::MpxAsyncFile(source) => Pin::new(source).poll_next(cx),
            MpxAsyncSource::MpxAsyncStdin(source) => Pin::new(source).poll_next(cx),
            MpxAsyncSource::MpxAsyncTcp(source) => Pin::new(source).poll_next(cx),
        }
    }
}

fn convert_bytes_to_samples(format: MpxFormat, buffer: &[u8]) -> Vec<f32> {
    match format {
        MpxFormat::S16 => buffer
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect(),
        MpxFormat::F32 => buffer
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}
