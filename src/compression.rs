//! Payload compression
//!
//! Every stored payload starts with a one-byte method tag followed by the
//! method's body:
//! - payloads above the size threshold use the configured generic method
//!   (LZ4 by default, Zstd selectable)
//! - payloads at or below it use a byte run-length coder
//! - if the result is not smaller than `min_ratio` of the input, the bytes
//!   are stored as-is under [`CompressionMethod::None`]

use crate::error::{ContainerError, Result};
use serde::{Deserialize, Serialize};

/// Compression method tag stored in front of each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// `(count, byte)` run-length pairs
    Rle = 1,
    /// LZ4 block compression (fast, moderate ratio)
    Lz4 = 2,
    /// Zstd compression (slower, better ratio)
    Zstd = 3,
}

impl CompressionMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Rle),
            2 => Some(CompressionMethod::Lz4),
            3 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

const ZSTD_LEVEL: i32 = 3;

/// Compression configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Method for payloads above `threshold`
    pub method: CompressionMethod,

    /// Payloads of at most this many bytes use run-length coding
    pub threshold: usize,

    /// Store uncompressed unless compressed_size < min_ratio * original_size
    pub min_ratio: f32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            method: CompressionMethod::Lz4,
            threshold: 1024,
            min_ratio: 1.0,
        }
    }
}

impl CompressionConfig {
    /// Create config that stores every payload uncompressed
    pub fn none() -> Self {
        CompressionConfig {
            method: CompressionMethod::None,
            threshold: 0,
            min_ratio: 0.0,
        }
    }

    /// Create config with LZ4 compression
    pub fn lz4() -> Self {
        Self::default()
    }

    /// Create config with Zstd compression
    pub fn zstd() -> Self {
        CompressionConfig {
            method: CompressionMethod::Zstd,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_ratio) {
            return Err(ContainerError::InvalidConfig(format!(
                "compression.min_ratio must be within 0.0..=1.0, got {}",
                self.min_ratio
            )));
        }
        Ok(())
    }
}

/// Compress data using the specified method
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Rle => Ok(rle_compress(data)),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress(data)),
        CompressionMethod::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
            .map_err(|e| ContainerError::Compression(format!("Zstd compression failed: {}", e))),
    }
}

/// Decompress data produced by [`compress`]
///
/// `expected_len` is the original size recorded in the metadata; output of
/// any other length is an error.
pub fn decompress(data: &[u8], method: CompressionMethod, expected_len: usize) -> Result<Vec<u8>> {
    let decompressed = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Rle => rle_decompress(data, expected_len)?,
        CompressionMethod::Lz4 => lz4_flex::decompress(data, expected_len).map_err(|e| {
            ContainerError::Compression(format!("LZ4 decompression failed: {}", e))
        })?,
        CompressionMethod::Zstd => zstd::bulk::decompress(data, expected_len).map_err(|e| {
            ContainerError::Compression(format!("Zstd decompression failed: {}", e))
        })?,
    };

    if decompressed.len() != expected_len {
        return Err(ContainerError::Compression(format!(
            "{:?} payload decoded to {} bytes, expected {}",
            method,
            decompressed.len(),
            expected_len
        )));
    }

    Ok(decompressed)
}

/// Compress data if beneficial, returns (data, method_used)
pub fn compress_if_beneficial(
    data: &[u8],
    config: &CompressionConfig,
) -> Result<(Vec<u8>, CompressionMethod)> {
    let method = if data.len() > config.threshold {
        config.method
    } else {
        CompressionMethod::Rle
    };

    if matches!(method, CompressionMethod::None) || data.is_empty() {
        return Ok((data.to_vec(), CompressionMethod::None));
    }

    let compressed = compress(data, method)?;

    let ratio = compressed.len() as f32 / data.len() as f32;
    if ratio < config.min_ratio {
        Ok((compressed, method))
    } else {
        Ok((data.to_vec(), CompressionMethod::None))
    }
}

/// Build a stored payload: method tag followed by the body
pub fn encode(data: &[u8], config: &CompressionConfig) -> Result<Vec<u8>> {
    let (body, method) = compress_if_beneficial(data, config)?;

    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(method as u8);
    payload.extend_from_slice(&body);

    Ok(payload)
}

/// Inverse of [`encode`]
pub fn decode(payload: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let (&tag, body) = payload
        .split_first()
        .ok_or_else(|| ContainerError::Compression("payload has no method tag".to_string()))?;
    let method = CompressionMethod::from_u8(tag)
        .ok_or_else(|| ContainerError::Compression(format!("unknown method tag {}", tag)))?;

    decompress(body, method, expected_len)
}

fn rle_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter().copied().peekable();

    while let Some(byte) = iter.next() {
        let mut run = 1u8;
        while run < u8::MAX && iter.peek() == Some(&byte) {
            iter.next();
            run += 1;
        }
        out.push(run);
        out.push(byte);
    }

    out
}

fn rle_decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(ContainerError::Compression(format!(
            "RLE body has odd length {}",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(expected_len);
    for pair in data.chunks_exact(2) {
        let (count, byte) = (pair[0], pair[1]);
        if count == 0 {
            return Err(ContainerError::Compression("RLE run of length 0".to_string()));
        }
        if out.len() + usize::from(count) > expected_len {
            return Err(ContainerError::Compression(format!(
                "RLE body expands past {} bytes",
                expected_len
            )));
        }
        out.resize(out.len() + usize::from(count), byte);
    }

    Ok(out)
}
