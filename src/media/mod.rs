//! Media packet types and the network reassembly stage

pub mod chunk;
pub mod types;

pub use chunk::{decode_network_stream, FrameReassembler};
pub use types::{
    EncodedFrame, EncodedMetadata, EncodedPacket, FrameId, ImageFrame, ImageMetadata,
    ImagePacket, NetworkFrame, NetworkMetadata, NetworkPacket, PixelFormat, MAX_PAYLOAD_SIZE,
};
