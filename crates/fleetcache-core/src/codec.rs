//! Size-gated gzip codec for cached payloads.
//!
//! Values written through the compressing cache operations are stored as
//! standard single-member gzip streams, but only when it pays off:
//!
//! - inputs shorter than [`MIN_LEN_TO_COMPRESS`] are stored raw
//! - compressed output that saves less than [`MIN_REDUCTION_TO_ACCEPT`] bytes
//!   is discarded and the raw input is stored instead
//!
//! Reads can therefore call [`CompressionCodec::decompress`] unconditionally:
//! anything that does not start with the gzip magic is returned untouched.
//! Multi-member streams written by other gzip tools decode to the
//! concatenation of their members.
//!
//! ## Pooling
//!
//! Deflate/inflate state is large to allocate, so the codec keeps free-lists
//! of `flate2::Compress` and `flate2::Decompress` instances. A checkout is
//! reset before use and handed back when its guard drops, so a panicking
//! caller does not leak it. The gzip framing is written and checked here
//! because `GzEncoder`/`GzDecoder` own their deflate state and cannot
//! borrow a pooled one.

use std::borrow::Cow;

use flate2::{
    Compress, CompressError, Compression, Crc, Decompress, DecompressError, FlushCompress,
    FlushDecompress, Status,
};
use parking_lot::Mutex;

/// Inputs shorter than this are never compressed.
pub const MIN_LEN_TO_COMPRESS: usize = 1024;

/// Compressed output must be at least this much smaller than the input.
pub const MIN_REDUCTION_TO_ACCEPT: usize = 128;

/// `force_compress` uses the maximum level below this input size.
pub const MAXIMUM_LEVEL_THRESHOLD: usize = 100_000;

/// Anything shorter cannot be a gzip stream we produced.
const MIN_LEN_TO_DECOMPRESS: usize = 20;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 8;
const GZIP_HEADER_LEN: usize = 10;
const GZIP_TRAILER_LEN: usize = 8;
const GZIP_OS_UNKNOWN: u8 = 0xff;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

const DEFAULT_LEVEL: u32 = 5;
const MAXIMUM_LEVEL: u32 = 9;

const CHUNK: usize = 8 * 1024;

/// Idle instances kept per pool; extra returns are dropped.
const MAX_POOLED: usize = 64;

/// Errors raised while decoding a gzip stream.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("input is not a gzip stream")]
    NotGzip,

    #[error("gzip stream is truncated")]
    Truncated,

    #[error("unsupported gzip compression method {0}")]
    UnsupportedMethod(u8),

    #[error("gzip CRC32 mismatch")]
    ChecksumMismatch,

    #[error("gzip length mismatch")]
    LengthMismatch,

    #[error("deflate error: {0}")]
    Compress(#[from] CompressError),

    #[error("inflate error: {0}")]
    Decompress(#[from] DecompressError),
}

/// Concurrency-safe free-list of reusable codec states.
struct Pool<T> {
    free: Mutex<Vec<T>>,
    make: fn() -> T,
}

impl<T> Pool<T> {
    fn new(make: fn() -> T) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            make,
        }
    }

    /// Run `f` with an instance checked out of the pool.
    ///
    /// The instance goes back to the free-list however `f` exits, panics
    /// included; the lock is only held for the pop and the push.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let popped = self.free.lock().pop();
        let mut checkout = Checkout {
            pool: self,
            item: popped,
        };
        f(checkout.item.get_or_insert_with(self.make))
    }

    fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// A pooled instance on loan; dropping it returns the instance.
struct Checkout<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            let mut free = self.pool.free.lock();
            if free.len() < MAX_POOLED {
                free.push(item);
            }
        }
    }
}

fn default_compressor() -> Compress {
    Compress::new(Compression::new(DEFAULT_LEVEL), false)
}

fn maximum_compressor() -> Compress {
    Compress::new(Compression::new(MAXIMUM_LEVEL), false)
}

fn raw_decompressor() -> Decompress {
    Decompress::new(false)
}

/// Adaptive gzip codec with pooled compressor and decompressor state.
///
/// One instance is meant to be shared (behind an `Arc`) by every cache
/// client in the process.
pub struct CompressionCodec {
    default_compressors: Pool<Compress>,
    maximum_compressors: Pool<Compress>,
    decompressors: Pool<Decompress>,
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionCodec {
    pub fn new() -> Self {
        Self {
            default_compressors: Pool::new(default_compressor),
            maximum_compressors: Pool::new(maximum_compressor),
            decompressors: Pool::new(raw_decompressor),
        }
    }

    /// Compress `value` if it is large enough and compression saves enough.
    ///
    /// Returns the input unchanged (borrowed) otherwise.
    pub fn compress<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]> {
        if value.len() < MIN_LEN_TO_COMPRESS {
            return Cow::Borrowed(value);
        }

        let encoded = self
            .default_compressors
            .with(|compressor| encode(compressor, DEFAULT_LEVEL, value));
        match encoded {
            Ok(compressed)
                if value.len().saturating_sub(compressed.len()) >= MIN_REDUCTION_TO_ACCEPT =>
            {
                Cow::Owned(compressed)
            }
            Ok(_) => Cow::Borrowed(value),
            Err(e) => {
                tracing::warn!(error = %e, len = value.len(), "compression failed, storing raw value");
                Cow::Borrowed(value)
            }
        }
    }

    /// Always compress `value`.
    ///
    /// Uses the maximum level when `force_maximum` is set or the input is
    /// below [`MAXIMUM_LEVEL_THRESHOLD`], and the default level otherwise.
    pub fn force_compress(&self, value: &[u8], force_maximum: bool) -> Vec<u8> {
        let (pool, level) = if force_maximum || value.len() < MAXIMUM_LEVEL_THRESHOLD {
            (&self.maximum_compressors, MAXIMUM_LEVEL)
        } else {
            (&self.default_compressors, DEFAULT_LEVEL)
        };

        match pool.with(|compressor| encode(compressor, level, value)) {
            Ok(compressed) => compressed,
            Err(e) => {
                tracing::warn!(error = %e, len = value.len(), "forced compression failed, returning raw value");
                value.to_vec()
            }
        }
    }

    /// Decompress `value` if it looks like a gzip stream.
    ///
    /// Short or non-gzip input is returned unchanged. A corrupt stream yields
    /// an empty result and a warning; this never panics.
    pub fn decompress<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]> {
        if !is_gzip(value) {
            return Cow::Borrowed(value);
        }

        match self.decompressors.with(|decompressor| decode(decompressor, value)) {
            Ok(plain) => Cow::Owned(plain),
            Err(e) => {
                tracing::warn!(error = %e, len = value.len(), "cannot decompress cached value");
                Cow::Owned(Vec::new())
            }
        }
    }

    /// Strict variant of [`decompress`](Self::decompress) that reports errors.
    pub fn try_decompress<'a>(&self, value: &'a [u8]) -> Result<Cow<'a, [u8]>, CodecError> {
        if !is_gzip(value) {
            return Ok(Cow::Borrowed(value));
        }
        self.decompressors
            .with(|decompressor| decode(decompressor, value))
            .map(Cow::Owned)
    }

    /// Number of idle pooled states: (default compressors, maximum compressors, decompressors).
    pub fn pooled(&self) -> (usize, usize, usize) {
        (
            self.default_compressors.idle(),
            self.maximum_compressors.idle(),
            self.decompressors.idle(),
        )
    }
}

/// True when `value` is long enough and starts with the gzip magic number.
pub fn is_gzip(value: &[u8]) -> bool {
    value.len() >= MIN_LEN_TO_DECOMPRESS && value[..2] == GZIP_MAGIC
}

fn gzip_header(level: u32) -> [u8; GZIP_HEADER_LEN] {
    let extra_flags = match level {
        MAXIMUM_LEVEL => 2,
        1 => 4,
        _ => 0,
    };
    [
        GZIP_MAGIC[0],
        GZIP_MAGIC[1],
        GZIP_METHOD_DEFLATE,
        0,
        0,
        0,
        0,
        0,
        extra_flags,
        GZIP_OS_UNKNOWN,
    ]
}

fn encode(compressor: &mut Compress, level: u32, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    compressor.reset();

    let mut out = Vec::with_capacity(GZIP_HEADER_LEN + input.len() / 2 + GZIP_TRAILER_LEN + CHUNK);
    out.extend_from_slice(&gzip_header(level));

    loop {
        if out.capacity() - out.len() < CHUNK {
            out.reserve(CHUNK);
        }
        let consumed = compressor.total_in() as usize;
        let status = compressor.compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)?;
        if status == Status::StreamEnd {
            break;
        }
    }

    let mut crc = Crc::new();
    crc.update(input);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    // ISIZE is the input length modulo 2^32
    out.extend_from_slice(&(input.len() as u32).to_le_bytes());
    Ok(out)
}

/// Inflate every gzip member of `input`, concatenating their contents.
fn decode(decompressor: &mut Decompress, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(input.len().saturating_mul(4).min(16 * 1024 * 1024));
    let mut rest = input;
    loop {
        let spanned = decode_member(decompressor, rest, &mut out)?;
        rest = &rest[spanned..];
        if rest.is_empty() {
            return Ok(out);
        }
    }
}

/// Inflate one member onto `out` and return how many input bytes it spans.
fn decode_member(decompressor: &mut Decompress, input: &[u8], out: &mut Vec<u8>) -> Result<usize, CodecError> {
    let body_start = parse_header(input)?;
    if input.len() < body_start + GZIP_TRAILER_LEN {
        return Err(CodecError::Truncated);
    }
    let body = &input[body_start..];
    let member_start = out.len();

    decompressor.reset(false);
    loop {
        if out.capacity() - out.len() < CHUNK {
            out.reserve(CHUNK);
        }
        let consumed = decompressor.total_in() as usize;
        let produced = decompressor.total_out();
        let status = decompressor.decompress_vec(&body[consumed..], out, FlushDecompress::None)?;
        if status == Status::StreamEnd {
            break;
        }
        if decompressor.total_in() as usize == consumed && decompressor.total_out() == produced {
            return Err(CodecError::Truncated);
        }
    }

    let trailer_start = body_start + decompressor.total_in() as usize;
    let trailer = input
        .get(trailer_start..trailer_start + GZIP_TRAILER_LEN)
        .ok_or(CodecError::Truncated)?;

    let member = &out[member_start..];
    let mut crc = Crc::new();
    crc.update(member);
    if read_u32_le(&trailer[..4]) != crc.sum() {
        return Err(CodecError::ChecksumMismatch);
    }
    if read_u32_le(&trailer[4..]) != member.len() as u32 {
        return Err(CodecError::LengthMismatch);
    }
    Ok(trailer_start + GZIP_TRAILER_LEN)
}

/// Validate the gzip member header and return the offset of the deflate body.
fn parse_header(input: &[u8]) -> Result<usize, CodecError> {
    if input.len() < GZIP_HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    if input[..2] != GZIP_MAGIC {
        return Err(CodecError::NotGzip);
    }
    if input[2] != GZIP_METHOD_DEFLATE {
        return Err(CodecError::UnsupportedMethod(input[2]));
    }

    let flags = input[3];
    let mut pos = GZIP_HEADER_LEN;

    if flags & FEXTRA != 0 {
        let len = input.get(pos..pos + 2).ok_or(CodecError::Truncated)?;
        pos += 2 + u16::from_le_bytes([len[0], len[1]]) as usize;
    }
    if flags & FNAME != 0 {
        pos = skip_zero_terminated(input, pos)?;
    }
    if flags & FCOMMENT != 0 {
        pos = skip_zero_terminated(input, pos)?;
    }
    if flags & FHCRC != 0 {
        pos += 2;
    }

    if pos > input.len() {
        return Err(CodecError::Truncated);
    }
    Ok(pos)
}

fn skip_zero_terminated(input: &[u8], pos: usize) -> Result<usize, CodecError> {
    input
        .get(pos..)
        .and_then(|rest| rest.iter().position(|&b| b == 0))
        .map(|nul| pos + nul + 1)
        .ok_or(CodecError::Truncated)
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
