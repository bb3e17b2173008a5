use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use clap::Parser;
use serde_json::json;
use tempfile::NamedTempFile;

use framepipe::connectors::pubsub::{LoopbackClient, PubSubClient};
use framepipe::error::StreamError;
use framepipe::media::{EncodedFrame, EncodedMetadata, EncodedPacket, FrameId, NetworkPacket};
use framepipe::reactor::Reactor;
use framepipe::runtime::{BotDescriptor, BotInput, BotMessage, RuntimeConfig};
use framepipe::sinks::PubSubSink;
use framepipe::sources::{pubsub_channel, pubsub_source, replay_source};
use framepipe::stream::{of, Publisher, PublisherExt};

fn write_replay_file(frames: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let metadata = EncodedMetadata {
        codec_name: "h264".to_string(),
        codec_data: vec![1, 2, 3],
    };
    let record = NetworkPacket::Metadata(metadata.to_network());
    writeln!(file, "{}", serde_json::to_string(&record).unwrap()).unwrap();

    let t = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
    let mut position = 0i64;
    for i in 0..frames {
        let frame = EncodedFrame {
            data: vec![i as u8; 64],
            id: FrameId::new(position, position + 63),
            creation_time: t,
            key_frame: i == 0,
        };
        position += 64;
        for fragment in frame.to_network(t) {
            let record = NetworkPacket::Frame(fragment);
            writeln!(file, "{}", serde_json::to_string(&record).unwrap()).unwrap();
        }
    }
    file.flush().unwrap();
    file
}

fn base_config() -> RuntimeConfig {
    RuntimeConfig::try_parse_from(["bot", "--channel", "cam", "--batch"]).unwrap()
}

#[test]
fn config_parses_operator_flags() {
    let config = RuntimeConfig::try_parse_from([
        "bot",
        "--id",
        "counter-1",
        "--channel",
        "cam",
        "--input-video-file",
        "capture.jsonl",
        "--loop",
        "--batch",
        "--analysis-file",
        "out.jsonl",
    ])
    .unwrap();
    assert_eq!(config.id, "counter-1");
    assert_eq!(config.channel.as_deref(), Some("cam"));
    assert!(config.loop_input);
    assert!(config.batch);
    assert!(config.validate().is_ok());
}

#[test]
fn config_rejects_conflicting_bot_configs() {
    let mut config = base_config();
    config.config = Some("{}".to_string());
    config.config_file = Some("cfg.json".into());
    assert!(matches!(
        config.validate(),
        Err(StreamError::StreamInitialization(_))
    ));
}

#[test]
fn config_requires_an_input() {
    let mut config = base_config();
    config.channel = None;
    assert!(matches!(
        config.validate(),
        Err(StreamError::StreamInitialization(_))
    ));
}

#[test]
fn batch_run_feeds_bot_and_publishes_analysis() {
    let replay = write_replay_file(3);
    let client = LoopbackClient::new();

    let mut config = base_config();
    config.id = "counter".to_string();
    config.config = Some(r#"{"threshold": 2}"#.to_string());
    config.input_video_file = Some(replay.path().to_path_buf());

    let frames_seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frames_seen);
    let descriptor = BotDescriptor::new(move |context, input| {
        assert_eq!(context.id, "counter");
        assert_eq!(
            context.config.as_ref().and_then(|c| c.get("threshold")),
            Some(&json!(2))
        );
        match input {
            BotInput::Packet(EncodedPacket::Frame(frame)) => {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                vec![
                    BotMessage::analysis(json!({"frame": n, "bytes": frame.data.len()})),
                    BotMessage::debug(json!({"id": {"i1": frame.id.i1, "i2": frame.id.i2}})),
                ]
            }
            BotInput::Packet(EncodedPacket::Metadata(metadata)) => {
                vec![BotMessage::debug(json!({"codec": metadata.codec_name}))]
            }
            BotInput::Control(_) => Vec::new(),
        }
    });

    let env = framepipe::runtime::BotEnvironment::new(descriptor);
    let outcome = env.run(config, Some(client.clone() as Arc<dyn PubSubClient>));
    assert!(outcome.is_ok());

    assert_eq!(frames_seen.load(Ordering::SeqCst), 3);
    let analysis = client.published_on("cam/analysis");
    assert_eq!(analysis.len(), 3);
    assert_eq!(analysis[0].get("frame"), Some(&json!(1)));
    assert_eq!(client.published_on("cam/debug").len(), 4);
}

#[test]
fn missing_replay_file_fails_the_run() {
    let mut config = base_config();
    config.input_video_file = Some("/nonexistent/capture.jsonl".into());
    let descriptor = BotDescriptor::new(|_context, _input| Vec::new());
    let env = framepipe::runtime::BotEnvironment::new(descriptor);
    let outcome = env.run(config, None);
    assert!(matches!(
        outcome,
        Err(StreamError::StreamInitialization(_))
    ));
}

#[test]
fn analysis_file_sink_writes_json_lines() {
    let replay = write_replay_file(2);
    let analysis_file = NamedTempFile::new().unwrap();

    let mut config = base_config();
    config.channel = None;
    config.input_video_file = Some(replay.path().to_path_buf());
    config.analysis_file = Some(analysis_file.path().to_path_buf());

    let descriptor = BotDescriptor::new(|_context, input| match input {
        BotInput::Packet(EncodedPacket::Frame(_)) => {
            vec![BotMessage::analysis(json!({"seen": true}))]
        }
        _ => Vec::new(),
    });
    let env = framepipe::runtime::BotEnvironment::new(descriptor);
    env.run(config, None).unwrap();

    let contents = std::fs::read_to_string(analysis_file.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value, json!({"seen": true}));
    }
}

#[test]
fn replay_source_reads_network_packets_in_batch_mode() {
    let replay = write_replay_file(2);
    let reactor = Reactor::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let done = replay_source(&reactor, replay.path(), true)
        .process(move |packet| sink.lock().unwrap().push(packet));
    assert_eq!(done.wait().and_then(|outcome| outcome), Ok(()));

    let received = received.lock().unwrap();
    // one metadata record plus one fragment per frame
    assert_eq!(received.len(), 3);
    assert!(matches!(received[0], NetworkPacket::Metadata(_)));
    assert!(matches!(received[1], NetworkPacket::Frame(_)));
}

#[test]
fn pubsub_source_delivers_channel_records() {
    let client = LoopbackClient::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let source = pubsub_source(client.clone() as Arc<dyn PubSubClient>, "in");
    let _done = source.process(move |packet| sink.lock().unwrap().push(packet));

    let metadata = EncodedMetadata {
        codec_name: "h264".to_string(),
        codec_data: vec![9],
    };
    client
        .publish("in", serde_json::to_value(metadata.to_network()).unwrap())
        .unwrap();

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], NetworkPacket::Metadata(_)));
}

#[test]
fn pubsub_channel_delivers_raw_payloads() {
    let client = LoopbackClient::new();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let source = pubsub_channel(client.clone() as Arc<dyn PubSubClient>, "cam/control");
    let _done = source.process(move |value| sink.lock().unwrap().push(value));

    client
        .publish("cam/control", json!({"command": "tune", "value": 3}))
        .unwrap();
    assert_eq!(
        received.lock().unwrap().clone(),
        vec![json!({"command": "tune", "value": 3})]
    );
}

#[test]
fn pubsub_sink_routes_metadata_and_fragments() {
    let client = LoopbackClient::new();
    let reactor = Reactor::new();

    let metadata = EncodedMetadata {
        codec_name: "h264".to_string(),
        codec_data: vec![1],
    };
    let frame = EncodedFrame {
        data: vec![3u8; 100_000], // splits into multiple fragments
        id: FrameId::new(0, 100),
        creation_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        key_frame: true,
    };
    let packets = vec![
        EncodedPacket::Metadata(metadata),
        EncodedPacket::Frame(frame),
    ];

    of(packets).subscribe(Box::new(PubSubSink::new(
        client.clone() as Arc<dyn PubSubClient>,
        &reactor,
        "out",
    )));
    reactor.run();

    assert_eq!(client.published_on("out/metadata").len(), 1);
    let fragments = client.published_on("out");
    assert_eq!(fragments.len(), 3);
    for (index, fragment) in fragments.iter().enumerate() {
        assert_eq!(fragment.get("chunk"), Some(&json!(index + 1)));
        assert_eq!(fragment.get("chunks"), Some(&json!(3)));
    }
    // the client records every publish, channels included
    assert_eq!(
        client
            .published()
            .iter()
            .filter(|data| data.channel == "out")
            .count(),
        3
    );
}
