//! Runtime configuration
//!
//! The command line surface mirrors what operators deploy behind a
//! container orchestrator: channel or file input, batch/live execution,
//! optional file destinations for analysis and debug output.

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

use crate::error::{StreamError, StreamResult};

use super::bot::ExecutionMode;

#[derive(Debug, Clone, Parser)]
#[command(name = "framepipe-bot", about = "Video analytics bot runtime")]
pub struct RuntimeConfig {
    /// Bot id attached to the context and the shutdown note
    #[arg(long, default_value = "")]
    pub id: String,

    /// Inline (json) bot config
    #[arg(long)]
    pub config: Option<String>,

    /// (json) bot config file
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// Pub/sub channel carrying the video stream
    #[arg(long)]
    pub channel: Option<String>,

    /// Recorded stream to read instead of a channel
    #[arg(long = "input-video-file")]
    pub input_video_file: Option<PathBuf>,

    /// Restart the recorded stream at EOF
    #[arg(long = "loop")]
    pub loop_input: bool,

    /// Consume input as fast as possible: no pacing, no worker thread
    #[arg(long)]
    pub batch: bool,

    /// Save analysis messages to a file instead of a channel
    #[arg(long = "analysis-file")]
    pub analysis_file: Option<PathBuf>,

    /// Save debug messages to a file instead of a channel
    #[arg(long = "debug-file")]
    pub debug_file: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn validate(&self) -> StreamResult<()> {
        if self.config.is_some() && self.config_file.is_some() {
            return Err(StreamError::StreamInitialization(
                "--config and --config-file options are mutually exclusive".to_string(),
            ));
        }
        if self.channel.is_none() && self.input_video_file.is_none() {
            return Err(StreamError::StreamInitialization(
                "either --channel or --input-video-file is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Materialize the bot config from the inline argument or the file.
    pub fn bot_config(&self) -> StreamResult<Option<Value>> {
        if let Some(arg) = &self.config {
            return serde_json::from_str(arg).map(Some).map_err(|error| {
                StreamError::StreamInitialization(format!("can't parse config: {}", error))
            });
        }
        if let Some(path) = &self.config_file {
            let text = std::fs::read_to_string(path).map_err(|error| {
                StreamError::StreamInitialization(format!(
                    "can't read config file {}: {}",
                    path.display(),
                    error
                ))
            })?;
            return serde_json::from_str(&text).map(Some).map_err(|error| {
                StreamError::StreamInitialization(format!(
                    "can't parse config file {}: {}",
                    path.display(),
                    error
                ))
            });
        }
        Ok(None)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.batch {
            ExecutionMode::Batch
        } else {
            ExecutionMode::Live
        }
    }
}
