//! Demand-driven stream engine
//!
//! Publishers emit only against downstream credit (`request(n)`), exactly
//! one terminal event closes every subscription, and cancellation
//! propagates upstream through every combinator. Scheduling is
//! single-threaded cooperative per subscription; `threaded_worker` is the
//! one deliberate thread boundary.

pub mod combinators;
pub mod constructors;
pub mod core;
pub mod generators;
pub mod rate;
pub mod signal;
pub mod worker;

mod serial;

// Re-export the protocol
pub use self::core::{BoxPublisher, Observer, Op, Publisher, PublisherExt, Subscriber, Subscription};

// Re-export constructors
pub use constructors::{empty, error, of, range};

// Re-export combinators
pub use combinators::{do_finally, flat_map, head, lift, map, merge, take, take_while};

// Re-export generators
pub use generators::{async_source, stateful, AsyncObserver};

// Re-export the reactor bridge, worker and breaker
pub use rate::interval;
pub use signal::signal_breaker;
pub use worker::threaded_worker;
