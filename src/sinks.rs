//! Stream sinks: pub/sub publishing and json-lines writers
//!
//! The pub/sub sink is a true subscriber: it requests one packet at a
//! time and posts one publish task per network record onto the reactor.
//! Bot message sinks are plain destinations fed by the runtime as the
//! bot emits output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::connectors::pubsub::PubSubClient;
use crate::error::{StreamError, StreamResult};
use crate::media::types::EncodedPacket;
use crate::metrics;
use crate::reactor::Reactor;
use crate::stream::{Observer, Subscriber, Subscription};

/// Channel suffix carrying decoder parameters.
pub const METADATA_CHANNEL_SUFFIX: &str = "/metadata";
/// Channel suffix carrying bot analysis output.
pub const ANALYSIS_CHANNEL_SUFFIX: &str = "/analysis";
/// Channel suffix carrying bot debug output.
pub const DEBUG_CHANNEL_SUFFIX: &str = "/debug";
/// Shared bidirectional control channel suffix.
pub const CONTROL_CHANNEL_SUFFIX: &str = "/control";

/// Publish on the reactor thread. A failing transport is fatal by
/// policy: the orchestrator restarts the process rather than letting it
/// limp along.
fn post_publish(reactor: &Reactor, client: Arc<dyn PubSubClient>, channel: String, payload: Value) {
    reactor.post(move || {
        if let Err(error) = client.publish(&channel, payload) {
            log::error!("pub/sub publish to {} failed: {}", channel, error);
            std::process::abort();
        }
    });
}

/// Subscriber that publishes encoded packets: metadata onto
/// `<channel>/metadata`, frame fragments onto `<channel>`.
pub struct PubSubSink {
    client: Arc<dyn PubSubClient>,
    reactor: Reactor,
    frames_channel: String,
    metadata_channel: String,
    subscription: Option<Arc<dyn Subscription>>,
    frames_published: u64,
    frames_counter: metrics::Counter,
    publish_delay_ms: metrics::Counter,
}

impl PubSubSink {
    pub fn new(client: Arc<dyn PubSubClient>, reactor: &Reactor, channel: &str) -> Self {
        PubSubSink {
            client,
            reactor: reactor.clone(),
            frames_channel: channel.to_string(),
            metadata_channel: format!("{}{}", channel, METADATA_CHANNEL_SUFFIX),
            subscription: None,
            frames_published: 0,
            frames_counter: metrics::counter("sink.frames_published"),
            publish_delay_ms: metrics::counter("sink.publish_delay_ms_total"),
        }
    }
}

impl Observer<EncodedPacket> for PubSubSink {
    fn on_next(&mut self, packet: EncodedPacket) {
        match packet {
            EncodedPacket::Metadata(metadata) => {
                match serde_json::to_value(metadata.to_network()) {
                    Ok(payload) => post_publish(
                        &self.reactor,
                        Arc::clone(&self.client),
                        self.metadata_channel.clone(),
                        payload,
                    ),
                    Err(error) => log::error!("can't serialize metadata: {}", error),
                }
            }
            EncodedPacket::Frame(frame) => {
                let now = Utc::now();
                let delay = now.signed_duration_since(frame.creation_time);
                self.publish_delay_ms
                    .add(delay.num_milliseconds().max(0) as u64);
                for fragment in frame.to_network(now) {
                    match serde_json::to_value(&fragment) {
                        Ok(payload) => post_publish(
                            &self.reactor,
                            Arc::clone(&self.client),
                            self.frames_channel.clone(),
                            payload,
                        ),
                        Err(error) => log::error!("can't serialize frame: {}", error),
                    }
                }
                self.frames_published += 1;
                self.frames_counter.inc();
                if self.frames_published % 100 == 0 {
                    log::info!(
                        "published {} frames to {}",
                        self.frames_published,
                        self.frames_channel
                    );
                }
            }
        }
        if let Some(subscription) = &self.subscription {
            subscription.request(1);
        }
    }

    fn on_complete(&mut self) {
        log::info!("sink for {} completed", self.frames_channel);
    }

    fn on_error(&mut self, error: StreamError) {
        log::error!("pub/sub sink error: {}", error);
        std::process::abort();
    }
}

impl Subscriber<EncodedPacket> for PubSubSink {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.subscription = Some(Arc::clone(&subscription));
        subscription.request(1);
    }
}

/// Destination for bot output messages, one structured record per call.
pub trait MessageSink: Send {
    fn send(&mut self, message: Value);
    fn flush(&mut self);
}

/// Writes one json record per line to any writer.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    label: String,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, label: &str) -> Self {
        JsonLinesSink {
            writer,
            label: label.to_string(),
        }
    }
}

impl<W: Write + Send> MessageSink for JsonLinesSink<W> {
    fn send(&mut self, message: Value) {
        if let Err(error) = writeln!(self.writer, "{}", message) {
            log::error!("can't write {} message: {}", self.label, error);
        }
    }

    fn flush(&mut self) {
        if let Err(error) = self.writer.flush() {
            log::error!("can't flush {} sink: {}", self.label, error);
        }
    }
}

impl<W: Write + Send> Drop for JsonLinesSink<W> {
    fn drop(&mut self) {
        MessageSink::flush(self);
    }
}

/// File-backed json-lines sink, flushed when dropped at process exit.
pub fn file_sink(path: &Path, label: &str) -> StreamResult<JsonLinesSink<BufWriter<File>>> {
    let file = File::create(path).map_err(|error| {
        StreamError::StreamInitialization(format!("{}: {}", path.display(), error))
    })?;
    Ok(JsonLinesSink::new(BufWriter::new(file), label))
}

/// Publishes bot messages onto a pub/sub channel via the reactor.
pub struct ChannelMessageSink {
    client: Arc<dyn PubSubClient>,
    reactor: Reactor,
    channel: String,
}

impl ChannelMessageSink {
    pub fn new(client: Arc<dyn PubSubClient>, reactor: &Reactor, channel: String) -> Self {
        ChannelMessageSink {
            client,
            reactor: reactor.clone(),
            channel,
        }
    }
}

impl MessageSink for ChannelMessageSink {
    fn send(&mut self, message: Value) {
        post_publish(
            &self.reactor,
            Arc::clone(&self.client),
            self.channel.clone(),
            message,
        );
    }

    fn flush(&mut self) {}
}
