//! Bot environment: source, worker, breaker, bot and sinks wired together
//!
//! Frames flow through one demand-driven pipeline; control messages
//! reach the same bot instance through a second pipeline off the control
//! channel (the frame stream is typically infinite, so the two are not
//! concatenated). Signals break the frame pipeline gracefully and leave
//! a shutdown note on the control channel first.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde_json::json;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};

use crate::connectors::pubsub::PubSubClient;
use crate::error::{StreamError, StreamResult};
use crate::media::chunk::decode_network_stream;
use crate::media::types::EncodedPacket;
use crate::metrics;
use crate::reactor::Reactor;
use crate::sinks::{
    file_sink, ChannelMessageSink, JsonLinesSink, MessageSink, ANALYSIS_CHANNEL_SUFFIX,
    CONTROL_CHANNEL_SUFFIX, DEBUG_CHANNEL_SUFFIX,
};
use crate::sources::{file_source, pubsub_channel, pubsub_source};
use crate::stream::{
    combinators, constructors, signal, worker, BoxPublisher, PublisherExt,
};

use super::bot::{BotContext, BotDescriptor, BotInput, BotMessageKind, ExecutionMode};
use super::config::RuntimeConfig;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One running bot plus its output destinations. Shared between the
/// frame pipeline and the control pipeline.
struct BotInstance {
    handler: super::bot::BotHandler,
    context: BotContext,
    analysis: Box<dyn MessageSink>,
    debug: Box<dyn MessageSink>,
    control: Box<dyn MessageSink>,
}

impl BotInstance {
    fn run(&mut self, input: BotInput) {
        let messages = (self.handler)(&mut self.context, input);
        for message in messages {
            match message.kind {
                BotMessageKind::Analysis => self.analysis.send(message.data),
                BotMessageKind::Debug => self.debug.send(message.data),
                BotMessageKind::Control => self.control.send(message.data),
            }
        }
    }

    fn flush(&mut self) {
        self.analysis.flush();
        self.debug.flush();
        self.control.flush();
    }
}

pub struct BotEnvironment {
    descriptor: BotDescriptor,
}

impl BotEnvironment {
    pub fn new(descriptor: BotDescriptor) -> Self {
        BotEnvironment { descriptor }
    }

    /// Run the bot until its input completes, a signal arrives, or the
    /// pipeline fails. Returns once every queued publish has been
    /// flushed through the reactor.
    pub fn run(
        self,
        config: RuntimeConfig,
        client: Option<Arc<dyn PubSubClient>>,
    ) -> StreamResult<()> {
        config.validate()?;
        let bot_config = config.bot_config()?;
        let mode = config.execution_mode();

        let reactor = Reactor::new();

        if let Some(client) = &client {
            client.start()?;
        }

        let source: BoxPublisher<EncodedPacket> = if let Some(path) = &config.input_video_file {
            file_source(&reactor, path.clone(), config.loop_input, config.batch)
        } else if let (Some(client), Some(channel)) = (&client, &config.channel) {
            pubsub_source(Arc::clone(client), channel).pipe(decode_network_stream())
        } else {
            return Err(StreamError::StreamInitialization(
                "no input configured".to_string(),
            ));
        };

        let source = if mode == ExecutionMode::Live {
            source.pipe(worker::threaded_worker("processing-worker"))
        } else {
            source
        };

        let control_channel = config
            .channel
            .as_ref()
            .map(|channel| format!("{}{}", channel, CONTROL_CHANNEL_SUFFIX));

        let shutdown_note = match (&client, &control_channel) {
            (Some(client), Some(channel)) => install_shutdown_note(
                &reactor,
                Arc::clone(client),
                channel.clone(),
                config.id.clone(),
            ),
            _ => None,
        };

        let analysis = select_sink(
            &config.analysis_file,
            &client,
            &reactor,
            &config.channel,
            ANALYSIS_CHANNEL_SUFFIX,
            "analysis",
            false,
        )?;
        let debug = select_sink(
            &config.debug_file,
            &client,
            &reactor,
            &config.channel,
            DEBUG_CHANNEL_SUFFIX,
            "debug",
            true,
        )?;
        let control: Box<dyn MessageSink> = match (&client, &control_channel) {
            (Some(client), Some(channel)) => Box::new(ChannelMessageSink::new(
                Arc::clone(client),
                &reactor,
                channel.clone(),
            )),
            _ => Box::new(JsonLinesSink::new(io::stdout(), "control")),
        };

        let instance = Arc::new(Mutex::new(BotInstance {
            handler: self.descriptor.handler,
            context: BotContext {
                id: config.id.clone(),
                config: bot_config,
                mode,
            },
            analysis,
            debug,
            control,
        }));

        // Control messages run the same bot from a second pipeline; the
        // frame stream is typically infinite so the two cannot be
        // concatenated.
        let control_instance = Arc::clone(&instance);
        let control_source = match (&client, &control_channel) {
            (Some(client), Some(channel)) => pubsub_channel(Arc::clone(client), channel),
            _ => constructors::empty(),
        };
        let _control_done = control_source
            .process(move |value| lock(&control_instance).run(BotInput::Control(value)));

        let guard = reactor.work();
        let finish_reactor = reactor.clone();
        let finish_client = client.clone();
        let packets = metrics::counter("runtime.packets");

        let frame_instance = Arc::clone(&instance);
        let done = source
            .pipe(signal::signal_breaker(&[SIGINT, SIGTERM, SIGQUIT]))
            .map(move |packet| {
                packets.inc();
                let count = packets.value();
                if count % 100 == 0 {
                    log::info!("processed {} packets", count);
                }
                packet
            })
            .pipe(combinators::do_finally(move || {
                finish_reactor.post(move || {
                    if let Some(client) = finish_client {
                        match client.stop() {
                            Ok(()) => log::info!("pub/sub client stopped"),
                            Err(error) => {
                                log::error!("error stopping pub/sub client: {}", error)
                            }
                        }
                    }
                    drop(guard);
                });
            }))
            .process(move |packet| lock(&frame_instance).run(BotInput::Packet(packet)));

        log::info!("entering reactor loop");
        let handlers = reactor.run();
        log::info!("reactor loop exited, executed {} handlers", handlers);

        let outcome = done.wait();
        lock(&instance).flush();
        for (name, value) in metrics::snapshot() {
            log::debug!("counter {} = {}", name, value);
        }

        if let Some((handle, listener)) = shutdown_note {
            handle.close();
            if listener.thread().id() != thread::current().id() {
                let _ = listener.join();
            }
        }

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                log::error!("pipeline failed: {}", error);
                Err(error)
            }
            Err(error) => Err(error),
        }
    }
}

/// Publish `{bot_id, note}` on the control channel when a shutdown
/// signal lands, ahead of the breaker stopping the client.
fn install_shutdown_note(
    reactor: &Reactor,
    client: Arc<dyn PubSubClient>,
    channel: String,
    bot_id: String,
) -> Option<(Handle, JoinHandle<()>)> {
    let mut signals = match Signals::new([SIGINT, SIGTERM, SIGQUIT]) {
        Ok(signals) => signals,
        Err(error) => {
            log::warn!("can't install shutdown handler: {}", error);
            return None;
        }
    };
    let handle = signals.handle();
    let reactor = reactor.clone();
    let listener = thread::Builder::new()
        .name("shutdown-note".to_string())
        .spawn(move || {
            if signals.forever().next().is_some() {
                let note = json!({ "bot_id": bot_id, "note": "shutting down" });
                reactor.post(move || {
                    if let Err(error) = client.publish(&channel, note) {
                        log::error!("can't publish shutdown note: {}", error);
                    }
                });
            }
        });
    match listener {
        Ok(listener) => Some((handle, listener)),
        Err(error) => {
            log::warn!("can't install shutdown handler: {}", error);
            None
        }
    }
}

fn select_sink(
    file: &Option<PathBuf>,
    client: &Option<Arc<dyn PubSubClient>>,
    reactor: &Reactor,
    channel: &Option<String>,
    suffix: &str,
    label: &str,
    fallback_stderr: bool,
) -> StreamResult<Box<dyn MessageSink>> {
    if let Some(path) = file {
        log::info!("saving {} output to {}", label, path.display());
        return Ok(Box::new(file_sink(path, label)?));
    }
    if let (Some(client), Some(channel)) = (client, channel) {
        return Ok(Box::new(ChannelMessageSink::new(
            Arc::clone(client),
            reactor,
            format!("{}{}", channel, suffix),
        )));
    }
    Ok(if fallback_stderr {
        Box::new(JsonLinesSink::new(io::stderr(), label))
    } else {
        Box::new(JsonLinesSink::new(io::stdout(), label))
    })
}
