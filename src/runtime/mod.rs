//! Bot runtime: descriptor, configuration and environment wiring

pub mod bot;
pub mod config;
pub mod environment;

pub use bot::{
    BotContext, BotDescriptor, BotHandler, BotInput, BotMessage, BotMessageKind, ExecutionMode,
};
pub use config::RuntimeConfig;
pub use environment::BotEnvironment;
