//! Bot API boundary
//!
//! Bots are registered explicitly: a descriptor travels through `main`
//! into the environment instead of living in hidden static state.

use serde_json::Value;

use crate::media::types::EncodedPacket;

/// Kind of message a bot emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMessageKind {
    Analysis,
    Debug,
    Control,
}

/// One structured record produced by the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct BotMessage {
    pub kind: BotMessageKind,
    pub data: Value,
}

impl BotMessage {
    pub fn analysis(data: Value) -> Self {
        BotMessage {
            kind: BotMessageKind::Analysis,
            data,
        }
    }

    pub fn debug(data: Value) -> Self {
        BotMessage {
            kind: BotMessageKind::Debug,
            data,
        }
    }

    pub fn control(data: Value) -> Self {
        BotMessage {
            kind: BotMessageKind::Control,
            data,
        }
    }
}

/// Input fed to a bot: video packets merged with control messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BotInput {
    Control(Value),
    Packet(EncodedPacket),
}

/// Live keeps source pacing and the processing worker; batch consumes
/// the input as fast as possible on one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Batch,
}

/// Per-run bot context.
pub struct BotContext {
    pub id: String,
    pub config: Option<Value>,
    pub mode: ExecutionMode,
}

/// The processing function of a bot.
pub type BotHandler = Box<dyn FnMut(&mut BotContext, BotInput) -> Vec<BotMessage> + Send>;

/// Explicit bot registration handed to the environment.
pub struct BotDescriptor {
    pub handler: BotHandler,
}

impl BotDescriptor {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&mut BotContext, BotInput) -> Vec<BotMessage> + Send + 'static,
    {
        BotDescriptor {
            handler: Box::new(handler),
        }
    }
}
