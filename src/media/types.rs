//! Packet data model for the video pipeline
//!
//! Frames exist in three forms: network (textual fragments, base64
//! payloads), encoded (binary bitstream packets) and image (decoded
//! pixels). The wire records serialize with stable field names:
//! metadata `{codec_name, data}`, frame `{id: {i1, i2}, t, chunk,
//! chunks, data}` with `t` in milliseconds since the epoch.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// Upper bound on the textual payload of a single network fragment.
pub const MAX_PAYLOAD_SIZE: usize = 65_000;

/// Raw bytes per fragment such that its base64 text stays within
/// `MAX_PAYLOAD_SIZE`.
const MAX_CHUNK_BYTES: usize = MAX_PAYLOAD_SIZE / 4 * 3;

/// Frame id is an integer interval `[i1, i2)` over source bytes; one of
/// the sources is a packet protocol, hence a range instead of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId {
    pub i1: i64,
    pub i2: i64,
}

impl FrameId {
    pub fn new(i1: i64, i2: i64) -> Self {
        FrameId { i1, i2 }
    }

    /// Whether this id directly follows `prev` within one source.
    pub fn follows(&self, prev: &FrameId) -> bool {
        self.i1 == prev.i2 + 1
    }
}

/// Network form of codec parameters; binary data travels base64-encoded
/// because the pub/sub service carries only textual records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub codec_name: String,
    #[serde(rename = "data")]
    pub base64_data: String,
}

impl NetworkMetadata {
    pub fn decode(&self) -> StreamResult<EncodedMetadata> {
        let codec_data = BASE64.decode(&self.base64_data).map_err(|error| {
            StreamError::FrameGeneration(format!("bad metadata payload: {}", error))
        })?;
        Ok(EncodedMetadata {
            codec_name: self.codec_name.clone(),
            codec_data,
        })
    }
}

/// One textual fragment of an encoded frame. A frame whose base64 form
/// exceeds the payload cap is split into `chunks` fragments sharing one
/// id; `chunks = 1, chunk = 1` is self-contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFrame {
    #[serde(rename = "data")]
    pub base64_data: String,
    pub id: FrameId,
    #[serde(rename = "t", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub chunk: u32,
    pub chunks: u32,
}

/// Network packets as they flow through channels and replay files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkPacket {
    Metadata(NetworkMetadata),
    Frame(NetworkFrame),
}

/// Codec parameters required to decode encoded frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMetadata {
    pub codec_name: String,
    pub codec_data: Vec<u8>,
}

impl EncodedMetadata {
    /// Textual wire form, codec data base64-encoded.
    pub fn to_network(&self) -> NetworkMetadata {
        NetworkMetadata {
            codec_name: self.codec_name.clone(),
            base64_data: BASE64.encode(&self.codec_data),
        }
    }
}

/// A single encoded video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub id: FrameId,
    pub creation_time: DateTime<Utc>,
    pub key_frame: bool,
}

impl EncodedFrame {
    /// Split into 1..N fragments whose base64 text each stays within the
    /// payload cap, `chunk` ascending from 1, all stamped with `t`.
    pub fn to_network(&self, t: DateTime<Utc>) -> Vec<NetworkFrame> {
        let chunks = if self.data.is_empty() {
            1
        } else {
            self.data.len().div_ceil(MAX_CHUNK_BYTES)
        };
        let mut fragments = Vec::with_capacity(chunks);
        for index in 0..chunks {
            let begin = index * MAX_CHUNK_BYTES;
            let end = ((index + 1) * MAX_CHUNK_BYTES).min(self.data.len());
            fragments.push(NetworkFrame {
                base64_data: BASE64.encode(&self.data[begin..end]),
                id: self.id,
                timestamp: t,
                chunk: (index + 1) as u32,
                chunks: chunks as u32,
            });
        }
        fragments
    }
}

/// Encoded packets flowing between sources, the decode stage and sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedPacket {
    Metadata(EncodedMetadata),
    Frame(EncodedFrame),
}

/// Pixel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb0,
    Bgr,
    PackedYuv422,
    PlanarYuv420,
}

impl PixelFormat {
    /// Packed layouts carry everything in one plane, planar layouts one
    /// plane per component.
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Rgb0 | PixelFormat::Bgr | PixelFormat::PackedYuv422 => 1,
            PixelFormat::PlanarYuv420 => 3,
        }
    }

    pub fn is_planar(&self) -> bool {
        self.plane_count() > 1
    }
}

/// Decoded image frame. `plane_data[p]` holds plane `p`, `plane_strides[p]`
/// its row stride including alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub id: FrameId,
    pub pixel_format: PixelFormat,
    pub width: u16,
    pub height: u16,
    pub plane_data: Vec<Vec<u8>>,
    pub plane_strides: Vec<u32>,
}

// TODO: carry FPS once a source reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {}

/// Image packets produced by the pixel decode stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePacket {
    Metadata(ImageMetadata),
    Frame(ImageFrame),
}
