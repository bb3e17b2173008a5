//! Stream sources: recorded streams, replay files and pub/sub channels
//!
//! Recorded inputs are json-lines captures of network packets. Files are
//! opened lazily on first demand, the way a decoder context is; an open
//! failure surfaces as `StreamInitialization` through the stream instead
//! of a panic at construction time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::connectors::pubsub::{
    ChannelCallbacks, ChannelData, PubSubClient, SubscriptionHandle,
};
use crate::error::{StreamError, StreamResult};
use crate::media::chunk::decode_network_stream;
use crate::media::types::{EncodedPacket, NetworkPacket};
use crate::metrics;
use crate::reactor::Reactor;
use crate::stream::{generators, rate, BoxPublisher, Observer, PublisherExt};

/// Nominal pacing when the input reports no frame rate.
pub const DEFAULT_FPS: u32 = 25;

fn frame_period() -> Duration {
    Duration::from_millis(1000 / DEFAULT_FPS as u64)
}

struct ReplayState {
    path: PathBuf,
    loop_input: bool,
    reader: Option<BufReader<File>>,
    packets: metrics::Counter,
}

impl ReplayState {
    fn new(path: PathBuf, loop_input: bool) -> Self {
        ReplayState {
            path,
            loop_input,
            reader: None,
            packets: metrics::counter("source.replay.packets"),
        }
    }

    fn open(&mut self) -> StreamResult<()> {
        let file = File::open(&self.path).map_err(|error| {
            StreamError::StreamInitialization(format!("{}: {}", self.path.display(), error))
        })?;
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    fn generate(&mut self, n: u64, observer: &mut dyn Observer<NetworkPacket>) {
        if self.reader.is_none() {
            if let Err(error) = self.open() {
                observer.on_error(error);
                return;
            }
            log::info!("opened replay file {}", self.path.display());
        }
        let mut produced = 0;
        while produced < n {
            let mut line = String::new();
            let read = match self.reader.as_mut() {
                Some(reader) => reader.read_line(&mut line),
                None => return,
            };
            match read {
                Ok(0) => {
                    if self.loop_input {
                        log::debug!("restarting {}", self.path.display());
                        if let Err(error) = self.open() {
                            observer.on_error(error);
                            return;
                        }
                        continue;
                    }
                    log::debug!("eof in {}", self.path.display());
                    observer.on_complete();
                    return;
                }
                Ok(_) => {
                    let record = line.trim();
                    if record.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<NetworkPacket>(record) {
                        Ok(packet) => {
                            self.packets.inc();
                            observer.on_next(packet);
                            produced += 1;
                        }
                        Err(error) => {
                            observer.on_error(StreamError::FrameGeneration(format!(
                                "bad replay record: {}",
                                error
                            )));
                            return;
                        }
                    }
                }
                Err(error) => {
                    observer.on_error(StreamError::Io(error.to_string()));
                    return;
                }
            }
        }
    }
}

fn replay_publisher(path: PathBuf, loop_input: bool) -> BoxPublisher<NetworkPacket> {
    generators::stateful(
        move || ReplayState::new(path, loop_input),
        |state: &mut ReplayState, n: u64, observer: &mut dyn Observer<NetworkPacket>| {
            state.generate(n, observer)
        },
    )
}

/// Replay a json-lines capture of network packets. Batch mode reads as
/// fast as demand allows; live mode paces packets at the nominal frame
/// rate through the reactor.
pub fn replay_source(
    reactor: &Reactor,
    path: impl Into<PathBuf>,
    batch: bool,
) -> BoxPublisher<NetworkPacket> {
    let publisher = replay_publisher(path.into(), false);
    if batch {
        publisher
    } else {
        publisher.pipe(rate::interval(reactor, frame_period()))
    }
}

/// A recorded stream as encoded packets: replay plus reassembly. `loop_input`
/// restarts the capture at EOF instead of completing.
pub fn file_source(
    reactor: &Reactor,
    path: impl Into<PathBuf>,
    loop_input: bool,
    batch: bool,
) -> BoxPublisher<EncodedPacket> {
    let publisher = replay_publisher(path.into(), loop_input).pipe(decode_network_stream());
    if batch {
        publisher
    } else {
        publisher.pipe(rate::interval(reactor, frame_period()))
    }
}

struct PacketCallbacks {
    observer: generators::AsyncObserver<NetworkPacket>,
    packets: metrics::Counter,
}

impl ChannelCallbacks for PacketCallbacks {
    fn on_data(&mut self, data: ChannelData) {
        match serde_json::from_value::<NetworkPacket>(data.payload) {
            Ok(packet) => {
                self.packets.inc();
                self.observer.on_next(packet);
            }
            Err(error) => self.observer.on_error(StreamError::FrameGeneration(format!(
                "bad channel record on {}: {}",
                data.channel, error
            ))),
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.observer.on_error(error);
    }
}

fn unsubscribe_on_cancel(
    client: Arc<dyn PubSubClient>,
) -> impl FnOnce(Option<SubscriptionHandle>) + Send {
    move |handle| {
        if let Some(handle) = handle {
            if let Err(error) = client.unsubscribe(&handle) {
                log::warn!("unsubscribe failed: {}", error);
            }
        }
    }
}

/// Subscribe to a channel of network packets. The producer is driven by
/// the client's callbacks; cancellation unsubscribes.
pub fn pubsub_source(
    client: Arc<dyn PubSubClient>,
    channel: &str,
) -> BoxPublisher<NetworkPacket> {
    let channel = channel.to_string();
    let subscribe_client = Arc::clone(&client);
    generators::async_source(
        move |observer| {
            let callbacks = Box::new(PacketCallbacks {
                observer: observer.clone(),
                packets: metrics::counter("source.pubsub.packets"),
            });
            match subscribe_client.subscribe(&channel, callbacks) {
                Ok(handle) => Some(handle),
                Err(error) => {
                    observer.on_error(error);
                    None
                }
            }
        },
        unsubscribe_on_cancel(client),
    )
}

struct RawCallbacks {
    observer: generators::AsyncObserver<Value>,
}

impl ChannelCallbacks for RawCallbacks {
    fn on_data(&mut self, data: ChannelData) {
        self.observer.on_next(data.payload);
    }

    fn on_error(&mut self, error: StreamError) {
        self.observer.on_error(error);
    }
}

/// Raw channel payloads, used for the control channel.
pub fn pubsub_channel(client: Arc<dyn PubSubClient>, channel: &str) -> BoxPublisher<Value> {
    let channel = channel.to_string();
    let subscribe_client = Arc::clone(&client);
    generators::async_source(
        move |observer| {
            let callbacks = Box::new(RawCallbacks {
                observer: observer.clone(),
            });
            match subscribe_client.subscribe(&channel, callbacks) {
                Ok(handle) => Some(handle),
                Err(error) => {
                    observer.on_error(error);
                    None
                }
            }
        },
        unsubscribe_on_cancel(client),
    )
}
