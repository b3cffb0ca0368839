//! Message compression and `grpc-encoding` negotiation.
//!
//! A [`CompressorRegistry`] is built once at configuration time and shared
//! read-only by every call. Decompression is always bounded: a payload that
//! inflates past the configured message limit fails with
//! [`GrpcWireError::MessageTooLarge`] instead of allocating without bound.
//!
//! # Example
//!
//! ```
//! use grpc_wire::codec::CompressorRegistry;
//!
//! let registry = CompressorRegistry::with_defaults();
//! let gzip = registry.get("gzip").unwrap();
//!
//! let packed = gzip.compress(b"hello hello hello").unwrap();
//! let plain = gzip.decompress(&packed, 1024).unwrap();
//! assert_eq!(&plain[..], b"hello hello hello");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use crate::error::{GrpcWireError, Result};
use crate::protocol::IDENTITY;

/// `grpc-encoding` header name.
pub const GRPC_ENCODING: &str = "grpc-encoding";

/// `grpc-accept-encoding` header name.
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";

/// A message compression algorithm.
pub trait Compressor: Send + Sync + 'static {
    /// Name used in `grpc-encoding`.
    fn encoding(&self) -> &str;

    /// Compress a whole message.
    fn compress(&self, data: &[u8]) -> Result<Bytes>;

    /// Decompress a whole message, failing once the output passes `max_len`.
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes>;
}

/// Read at most `max_len + 1` bytes so an oversized payload is detected
/// without inflating all of it.
fn read_bounded<R: Read>(reader: R, max_len: usize) -> Result<Bytes> {
    let mut out = Vec::new();
    reader.take(max_len as u64 + 1).read_to_end(&mut out)?;
    if out.len() > max_len {
        return Err(GrpcWireError::MessageTooLarge {
            size: out.len(),
            limit: max_len,
        });
    }
    Ok(Bytes::from(out))
}

/// No-op compressor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Compressor for Identity {
    fn encoding(&self) -> &str {
        IDENTITY
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        if data.len() > max_len {
            return Err(GrpcWireError::MessageTooLarge {
                size: data.len(),
                limit: max_len,
            });
        }
        Ok(Bytes::copy_from_slice(data))
    }
}

/// `gzip` via flate2.
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: Compression,
}

impl Gzip {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for Gzip {
    fn encoding(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        read_bounded(GzDecoder::new(data), max_len)
    }
}

/// `deflate` (zlib-wrapped, as gRPC defines it) via flate2.
#[derive(Debug, Clone, Copy)]
pub struct Deflate {
    level: Compression,
}

impl Deflate {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for Deflate {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for Deflate {
    fn encoding(&self) -> &str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> Result<Bytes> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Bytes> {
        read_bounded(ZlibDecoder::new(data), max_len)
    }
}

/// Compressors keyed by encoding name.
///
/// `identity` is always present. Registration order is the order advertised in
/// `grpc-accept-encoding`.
#[derive(Clone)]
pub struct CompressorRegistry {
    by_name: HashMap<String, Arc<dyn Compressor>>,
    order: Vec<String>,
}

impl CompressorRegistry {
    /// Registry containing only `identity`.
    pub fn new() -> Self {
        let mut registry = Self {
            by_name: HashMap::new(),
            order: Vec::new(),
        };
        registry.register(Arc::new(Identity));
        registry
    }

    /// Registry with `identity`, `gzip` and `deflate`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Gzip::default()));
        registry.register(Arc::new(Deflate::default()));
        registry
    }

    /// Add or replace a compressor.
    pub fn register(&mut self, compressor: Arc<dyn Compressor>) {
        let name = compressor.encoding().to_ascii_lowercase();
        if !self.by_name.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.by_name.insert(name, compressor);
    }

    /// Look up a compressor by encoding name (case-insensitive).
    pub fn get(&self, encoding: &str) -> Option<Arc<dyn Compressor>> {
        self.by_name
            .get(&encoding.trim().to_ascii_lowercase())
            .cloned()
    }

    /// Whether `encoding` is supported.
    pub fn supports(&self, encoding: &str) -> bool {
        self.get(encoding).is_some()
    }

    /// Value for `grpc-accept-encoding`.
    pub fn accept_encoding_header(&self) -> String {
        self.order.join(",")
    }

    /// Pick the response compressor from the peer's `grpc-accept-encoding`.
    ///
    /// Returns the first non-identity encoding the peer lists that is also
    /// registered here, or `None` to send uncompressed.
    pub fn negotiate(&self, accept_encoding: Option<&str>) -> Option<Arc<dyn Compressor>> {
        accept_encoding?
            .split(',')
            .map(str::trim)
            .filter(|name| !name.eq_ignore_ascii_case(IDENTITY))
            .find_map(|name| self.get(name))
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CompressorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressorRegistry")
            .field("encodings", &self.order)
            .finish()
    }
}
