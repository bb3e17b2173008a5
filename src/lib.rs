//! framepipe - a video analytics bot runtime on demand-driven streams
//!
//! Encoded video flows from a source (recorded stream, replay file or
//! pub/sub channel) through a reactive pipeline with explicit
//! backpressure into a user-supplied bot, whose analysis, debug and
//! control output is published back to channels or local files. The
//! stream engine underneath is general: publishers, subscribers and a
//! small set of combinators governed by one demand-driven contract.

pub mod connectors;
pub mod deferred;
pub mod error;
pub mod media;
pub mod metrics;
pub mod queue;
pub mod reactor;
pub mod runtime;
pub mod sinks;
pub mod sources;
pub mod stream;

// Re-export the stream engine at the crate root
pub use stream::*;
