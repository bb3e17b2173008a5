//! Fragment reassembly and the network decode stage
//!
//! The inverse of `EncodedFrame::to_network`: fragments are buffered by
//! frame id, a frame is emitted once every chunk has arrived (any
//! order), and stale partial frames are discarded once the pending table
//! grows past its cap.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use super::types::{EncodedFrame, EncodedPacket, FrameId, NetworkFrame, NetworkPacket};
use crate::error::{StreamError, StreamResult};
use crate::stream::{combinators, constructors, Op};

/// How many distinct frame ids may sit half-assembled before the oldest
/// partials are dropped.
const MAX_PENDING_FRAMES: usize = 16;

struct PendingFrame {
    fragments: Vec<Option<String>>,
    received: u32,
    chunks: u32,
    timestamp: DateTime<Utc>,
    arrival: u64,
}

/// Buffers network fragments keyed by frame id and yields each frame
/// once its chunk set is complete.
pub struct FrameReassembler {
    pending: HashMap<FrameId, PendingFrame>,
    arrivals: u64,
}

impl FrameReassembler {
    pub fn new() -> Self {
        FrameReassembler {
            pending: HashMap::new(),
            arrivals: 0,
        }
    }

    /// Feed one fragment. `Ok(Some(frame))` once the frame is whole,
    /// `Ok(None)` while chunks are still outstanding.
    pub fn push(&mut self, fragment: NetworkFrame) -> StreamResult<Option<EncodedFrame>> {
        if fragment.id.i1 >= fragment.id.i2 {
            return Err(StreamError::FrameGeneration(format!(
                "invalid frame id [{}, {})",
                fragment.id.i1, fragment.id.i2
            )));
        }
        if fragment.chunks == 0 || fragment.chunk == 0 || fragment.chunk > fragment.chunks {
            return Err(StreamError::FrameGeneration(format!(
                "invalid fragment index {}/{} for frame [{}, {})",
                fragment.chunk, fragment.chunks, fragment.id.i1, fragment.id.i2
            )));
        }

        if fragment.chunks == 1 {
            let data = decode_payload(&fragment.base64_data)?;
            return Ok(Some(EncodedFrame {
                data,
                id: fragment.id,
                creation_time: fragment.timestamp,
                key_frame: false,
            }));
        }

        if let Some(entry) = self.pending.get(&fragment.id) {
            if entry.chunks != fragment.chunks {
                let chunks = entry.chunks;
                self.pending.remove(&fragment.id);
                return Err(StreamError::FrameGeneration(format!(
                    "fragment count changed from {} to {} for frame [{}, {})",
                    chunks, fragment.chunks, fragment.id.i1, fragment.id.i2
                )));
            }
        }

        self.arrivals += 1;
        let arrival = self.arrivals;
        let entry = self.pending.entry(fragment.id).or_insert_with(|| PendingFrame {
            fragments: vec![None; fragment.chunks as usize],
            received: 0,
            chunks: fragment.chunks,
            timestamp: fragment.timestamp,
            arrival,
        });
        let slot = &mut entry.fragments[(fragment.chunk - 1) as usize];
        if slot.is_some() {
            log::debug!(
                "duplicate fragment {}/{} for frame [{}, {}), ignoring",
                fragment.chunk,
                fragment.chunks,
                fragment.id.i1,
                fragment.id.i2
            );
            return Ok(None);
        }
        *slot = Some(fragment.base64_data);
        entry.received += 1;
        let whole = entry.received == entry.chunks;

        if whole {
            if let Some(complete) = self.pending.remove(&fragment.id) {
                let mut data = Vec::new();
                for payload in complete.fragments.into_iter().flatten() {
                    data.extend_from_slice(&decode_payload(&payload)?);
                }
                return Ok(Some(EncodedFrame {
                    data,
                    id: fragment.id,
                    creation_time: complete.timestamp,
                    key_frame: false,
                }));
            }
            return Ok(None);
        }

        self.prune();
        Ok(None)
    }

    /// Ids still waiting for fragments.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    fn prune(&mut self) {
        while self.pending.len() > MAX_PENDING_FRAMES {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|(_, entry)| entry.arrival)
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    log::debug!(
                        "dropping stale partial frame [{}, {})",
                        id.i1,
                        id.i2
                    );
                    self.pending.remove(&id);
                }
                None => break,
            }
        }
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        FrameReassembler::new()
    }
}

fn decode_payload(payload: &str) -> StreamResult<Vec<u8>> {
    BASE64
        .decode(payload)
        .map_err(|error| StreamError::FrameGeneration(format!("bad frame payload: {}", error)))
}

/// Reassemble a network packet stream into encoded packets. Fragments
/// that complete nothing yet produce no output; malformed records
/// terminate the pipeline.
pub fn decode_network_stream() -> Op<NetworkPacket, EncodedPacket> {
    let mut reassembler = FrameReassembler::new();
    combinators::flat_map(move |packet: NetworkPacket| match packet {
        NetworkPacket::Metadata(metadata) => match metadata.decode() {
            Ok(decoded) => constructors::of(vec![EncodedPacket::Metadata(decoded)]),
            Err(error) => constructors::error(error),
        },
        NetworkPacket::Frame(fragment) => match reassembler.push(fragment) {
            Ok(Some(frame)) => constructors::of(vec![EncodedPacket::Frame(frame)]),
            Ok(None) => constructors::empty(),
            Err(error) => constructors::error(error),
        },
    })
}
