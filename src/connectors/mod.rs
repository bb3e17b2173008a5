//! External service boundaries

pub mod pubsub;

pub use pubsub::{ChannelCallbacks, ChannelData, LoopbackClient, PubSubClient, SubscriptionHandle};
