//! MPX Data Reading Module
//!
//! Reads real-valued multiplex samples from files, standard input and TCP
//! streams, in either little-endian `f32` or `s16` format. Both a
//! synchronous [`Iterator`] and an asynchronous [`Stream`] interface are
//! provided. Every item is one chunk of samples; the last chunk of a
//! stream may be shorter, and trailing bytes that do not form a whole
//! sample are dropped.
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

use crate::MpxFormat;

/**
 * MPX Data Source Configuration
 */
#[derive(Debug, Clone, Copy)]
pub struct MpxConfig {
    pub format: MpxFormat,
    pub sample_rate: u32,
    pub chunk_size: usize,
}

impl MpxConfig {
    pub fn new(sample_rate: u32, chunk_size: usize, format: MpxFormat) -> Self {
        Self {
            format,
            sample_rate,
            chunk_size: chunk_size.max(1),
        }
    }

    fn chunk_bytes(&self) -> usize {
        self.chunk_size * self.format.bytes_per_sample()
    }
}

/**
 * Synchronous MPX Reader
 */
pub struct MpxRead<R: Read> {
    config: MpxConfig,
    reader: R,
    done: bool,
}

impl<R: Read> MpxRead<R> {
    pub fn new(reader: R, config: MpxConfig) -> Self {
        Self {
            config,
            reader,
            done: false,
        }
    }

    pub fn config(&self) -> &MpxConfig {
        &self.config
    }

    /// Fill one chunk; returns fewer bytes only at end of stream.
    fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.config.chunk_bytes()];
        let mut total_read = 0;
        while total_read < buffer.len() {
            match self.reader.read(&mut buffer[total_read..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => total_read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buffer.truncate(total_read);
        Ok(buffer)
    }
}

impl MpxRead<std::io::BufReader<std::fs::File>> {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> Result<Self, std::io::Error> {
        let path = expanduser(path.as_ref().to_path_buf());
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = MpxConfig::new(sample_rate, chunk_size, format);
        Ok(Self::new(reader, config))
    }
}

impl<R: Read> Iterator for MpxRead<R> {
    type Item = Result<Vec<f32>, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(bytes) => {
                let samples = crate::convert_bytes_to_samples(self.config.format, &bytes);
                if samples.is_empty() {
                    self.done = true;
                    None
                } else {
                    Some(Ok(samples))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/**
 * Asynchronous MPX Reader
 *
 * Partially filled chunks survive a `Poll::Pending`, so a slow socket
 * never loses samples.
 */
pub struct MpxAsyncRead<R: AsyncBufRead + Unpin> {
    config: MpxConfig,
    reader: R,
    buffer: Vec<u8>,
    filled: usize,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> MpxAsyncRead<R> {
    pub fn new(reader: R, config: MpxConfig) -> Self {
        Self {
            buffer: vec![0u8; config.chunk_bytes()],
            config,
            reader,
            filled: 0,
            done: false,
        }
    }

    pub fn config(&self) -> &MpxConfig {
        &self.config
    }

    /// Convert the whole samples gathered so far and start a new chunk.
    fn take_chunk(&mut self) -> Vec<f32> {
        let samples =
            crate::convert_bytes_to_samples(self.config.format, &self.buffer[..self.filled]);
        self.filled = 0;
        samples
    }
}

impl MpxAsyncRead<tokio::io::BufReader<tokio::fs::File>> {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> impl std::future::Future<
        Output = Result<MpxAsyncRead<tokio::io::BufReader<tokio::fs::File>>, std::io::Error>,
    > {
        let path = expanduser(path.as_ref().to_path_buf());
        async move {
            let file = tokio::fs::File::open(path).await?;
            let reader = tokio::io::BufReader::new(file);
            let config = MpxConfig::new(sample_rate, chunk_size, format);
            Ok(MpxAsyncRead::new(reader, config))
        }
    }
}

impl MpxAsyncRead<tokio::io::BufReader<tokio::io::Stdin>> {
    pub fn from_stdin(sample_rate: u32, chunk_size: usize, format: MpxFormat) -> Self {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        let config = MpxConfig::new(sample_rate, chunk_size, format);
        Self::new(reader, config)
    }
}

impl MpxAsyncRead<tokio::io::BufReader<tokio::net::TcpStream>> {
    pub async fn from_tcp(
        address: &str,
        port: u16,
        sample_rate: u32,
        chunk_size: usize,
        format: MpxFormat,
    ) -> Result<Self, std::io::Error> {
        let stream = tokio::net::TcpStream::connect((address, port)).await?;
        let reader = tokio::io::BufReader::new(stream);
        let config = MpxConfig::new(sample_rate, chunk_size, format);
        Ok(Self::new(reader, config))
    }
}

impl<R: AsyncBufRead + Unpin> Stream for MpxAsyncRead<R> {
    type Item = Result<Vec<f32>, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        while this.filled < this.buffer.len() {
            let mut read_buf = ReadBuf::new(&mut this.buffer[this.filled..]);
            match AsyncRead::poll_read(Pin::new(&mut this.reader), cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        this.done = true;
                        break;
                    }
                    this.filled += n;
                }
                Poll::Ready(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    this.done = true;
                    break;
                }
                Poll::Ready(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        let samples = this.take_chunk();
        if samples.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Ready(Some(Ok(samples)))
        }
    }
}

impl MpxFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            MpxFormat::S16 => 2,
            MpxFormat::F32 => 4,
        }
    }
}

pub(crate) fn expanduser(path: PathBuf) -> PathBuf {
    if let Some(stripped) = path.to_str().and_then(|p| p.strip_prefix("~"))
        && let Some(home_dir) = dirs::home_dir()
    {
        return home_dir.join(stripped.trim_start_matches('/'));
    }
    path
}
