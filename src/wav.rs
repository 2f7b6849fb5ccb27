//! Bit-exact mono float32 WAV encode/decode.
//!
//! Pure functions over byte buffers — no filesystem access here, so the
//! format can be exercised directly in tests. [`crate::clip`] owns the
//! file I/O.

use std::fmt;

const RIFF: [u8; 4] = *b"RIFF";
const WAVE: [u8; 4] = *b"WAVE";
const FMT: [u8; 4] = *b"fmt ";
const DATA: [u8; 4] = *b"data";

const FMT_CHUNK_SIZE: u32 = 16;
const AUDIO_FORMAT_FLOAT: u16 = 3;
const CHANNEL_COUNT: u16 = 1;
const BITS_PER_SAMPLE: u16 = 32;
const BLOCK_ALIGN: u16 = 4;
const HEADER_SIZE: usize = 44;

/// A decoded mono float32 WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct WavData {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Errors decoding or encoding a WAV container.
#[derive(Debug)]
pub enum WavError {
    /// The byte stream was truncated before a required field.
    Truncated,
    /// A fixed tag (`RIFF`, `WAVE`, `fmt `, `data`) did not match.
    BadTag(&'static str),
    /// A field that must take a fixed value did not (format tag, channel
    /// count, bits per sample, fmt chunk size, or a derived byte rate /
    /// block align that doesn't match the fixed format).
    BadFormat(String),
    /// `data` chunk size was not a multiple of the sample width.
    MisalignedData,
}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavError::Truncated => write!(f, "truncated WAV data"),
            WavError::BadTag(tag) => write!(f, "expected '{tag}' tag"),
            WavError::BadFormat(msg) => write!(f, "unsupported WAV format: {msg}"),
            WavError::MisalignedData => write!(f, "data chunk size not a multiple of 4"),
        }
    }
}

impl std::error::Error for WavError {}

/// Encode mono float32 samples into a bit-exact RIFF/WAVE byte buffer.
///
/// Chunk layout, little-endian throughout: `RIFF` header (size = 36 +
/// data_size), `WAVE` tag, a 16-byte `fmt ` sub-chunk (audio format 3,
/// 1 channel, 32 bits per sample), then the `data` sub-chunk.
pub fn encode(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let data_size = samples.len() as u32 * BLOCK_ALIGN as u32;
    let mut out = Vec::with_capacity(HEADER_SIZE + data_size as usize);

    out.extend_from_slice(&RIFF);
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(&WAVE);

    out.extend_from_slice(&FMT);
    out.extend_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
    out.extend_from_slice(&AUDIO_FORMAT_FLOAT.to_le_bytes());
    out.extend_from_slice(&CHANNEL_COUNT.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * BLOCK_ALIGN as u32;
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&BLOCK_ALIGN.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(&DATA);
    out.extend_from_slice(&data_size.to_le_bytes());
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }

    out
}

/// Decode a bit-exact mono float32 RIFF/WAVE byte buffer.
///
/// Rejects anything that isn't exactly the fixed format this engine
/// produces: audio format tag 3 (IEEE float), 1 channel, 32 bits per
/// sample, a 16-byte `fmt ` chunk, and a `data` chunk whose size is a
/// multiple of 4.
pub fn decode(bytes: &[u8]) -> Result<WavData, WavError> {
    let mut cursor = Cursor::new(bytes);

    let riff = cursor.take4()?;
    if riff != RIFF {
        return Err(WavError::BadTag("RIFF"));
    }
    let _chunk_size = cursor.take_u32()?;
    let wave = cursor.take4()?;
    if wave != WAVE {
        return Err(WavError::BadTag("WAVE"));
    }

    let fmt_tag = cursor.take4()?;
    if fmt_tag != FMT {
        return Err(WavError::BadTag("fmt "));
    }
    let fmt_chunk_size = cursor.take_u32()?;
    if fmt_chunk_size != FMT_CHUNK_SIZE {
        return Err(WavError::BadFormat(format!(
            "expected fmt chunk size {FMT_CHUNK_SIZE}, got {fmt_chunk_size}"
        )));
    }
    let audio_format = cursor.take_u16()?;
    let channel_count = cursor.take_u16()?;
    let sample_rate = cursor.take_u32()?;
    let byte_rate = cursor.take_u32()?;
    let block_align = cursor.take_u16()?;
    let bits_per_sample = cursor.take_u16()?;

    if audio_format != AUDIO_FORMAT_FLOAT {
        return Err(WavError::BadFormat(format!(
            "expected IEEE float (format 3), got {audio_format}"
        )));
    }
    if channel_count != CHANNEL_COUNT {
        return Err(WavError::BadFormat(format!(
            "expected mono (1 channel), got {channel_count}"
        )));
    }
    if bits_per_sample != BITS_PER_SAMPLE {
        return Err(WavError::BadFormat(format!(
            "expected 32 bits per sample, got {bits_per_sample}"
        )));
    }
    let expected_byte_rate = channel_count as u32 * sample_rate * bits_per_sample as u32 / 8;
    if byte_rate != expected_byte_rate {
        return Err(WavError::BadFormat("byte_rate does not match format".into()));
    }
    let expected_block_align = channel_count * bits_per_sample / 8;
    if block_align != expected_block_align {
        return Err(WavError::BadFormat("block_align does not match format".into()));
    }

    let data_tag = cursor.take4()?;
    if data_tag != DATA {
        return Err(WavError::BadTag("data"));
    }
    let data_size = cursor.take_u32()?;

    if data_size % (BLOCK_ALIGN as u32) != 0 {
        return Err(WavError::MisalignedData);
    }

    let sample_count = (data_size / BLOCK_ALIGN as u32) as usize;
    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        samples.push(f32::from_le_bytes(cursor.take4()?));
    }

    Ok(WavData {
        sample_rate,
        samples,
    })
}

/// Tiny forward-only byte cursor, kept local since the format is small and
/// fixed — no need to pull in a binary-parsing crate for this.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take4(&mut self) -> Result<[u8; 4], WavError> {
        let end = self.pos + 4;
        let slice = self.bytes.get(self.pos..end).ok_or(WavError::Truncated)?;
        self.pos = end;
        Ok(slice.try_into().expect("slice is exactly 4 bytes"))
    }

    fn take_u16(&mut self) -> Result<u16, WavError> {
        let end = self.pos + 2;
        let slice = self.bytes.get(self.pos..end).ok_or(WavError::Truncated)?;
        self.pos = end;
        Ok(u16::from_le_bytes(slice.try_into().expect("slice is exactly 2 bytes")))
    }

    fn take_u32(&mut self) -> Result<u32, WavError> {
        Ok(u32::from_le_bytes(self.take4()?))
    }
}
