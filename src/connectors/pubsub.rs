//! Pub/sub client boundary
//!
//! The transport itself is an external collaborator; this module pins
//! down the surface the runtime depends on and ships an in-process
//! loopback client used by tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use uuid::Uuid;

use crate::error::{StreamError, StreamResult};

/// A single message observed on a channel.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub channel: String,
    pub payload: Value,
}

/// Callbacks installed by a channel subscription.
pub trait ChannelCallbacks: Send {
    fn on_data(&mut self, data: ChannelData);
    fn on_error(&mut self, error: StreamError);
}

/// Opaque handle for an installed channel subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

/// Minimal pub/sub client surface the bot runtime depends on.
pub trait PubSubClient: Send + Sync {
    fn start(&self) -> StreamResult<()>;
    fn stop(&self) -> StreamResult<()>;
    fn publish(&self, channel: &str, payload: Value) -> StreamResult<()>;
    fn subscribe(
        &self,
        channel: &str,
        callbacks: Box<dyn ChannelCallbacks>,
    ) -> StreamResult<SubscriptionHandle>;
    /// Idempotent; unknown handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> StreamResult<()>;
}

type Registration = (SubscriptionHandle, Arc<Mutex<Box<dyn ChannelCallbacks>>>);

/// In-process client: publishes synchronously to local subscribers and
/// records every message for later inspection.
pub struct LoopbackClient {
    channels: Mutex<HashMap<String, Vec<Registration>>>,
    published: Mutex<Vec<ChannelData>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl LoopbackClient {
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackClient {
            channels: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        })
    }

    /// Every payload published so far on `channel`, in order.
    pub fn published_on(&self, channel: &str) -> Vec<Value> {
        lock(&self.published)
            .iter()
            .filter(|data| data.channel == channel)
            .map(|data| data.payload.clone())
            .collect()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<ChannelData> {
        lock(&self.published).clone()
    }
}

impl PubSubClient for LoopbackClient {
    fn start(&self) -> StreamResult<()> {
        Ok(())
    }

    fn stop(&self) -> StreamResult<()> {
        Ok(())
    }

    fn publish(&self, channel: &str, payload: Value) -> StreamResult<()> {
        lock(&self.published).push(ChannelData {
            channel: channel.to_string(),
            payload: payload.clone(),
        });
        // dispatch outside the registry lock so a callback may publish
        let targets: Vec<Arc<Mutex<Box<dyn ChannelCallbacks>>>> = lock(&self.channels)
            .get(channel)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|(_, callbacks)| Arc::clone(callbacks))
                    .collect()
            })
            .unwrap_or_default();
        for callbacks in targets {
            lock(&callbacks).on_data(ChannelData {
                channel: channel.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn subscribe(
        &self,
        channel: &str,
        callbacks: Box<dyn ChannelCallbacks>,
    ) -> StreamResult<SubscriptionHandle> {
        let handle = SubscriptionHandle(Uuid::new_v4());
        lock(&self.channels)
            .entry(channel.to_string())
            .or_default()
            .push((handle.clone(), Arc::new(Mutex::new(callbacks))));
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> StreamResult<()> {
        for registrations in lock(&self.channels).values_mut() {
            registrations.retain(|(id, _)| id != handle);
        }
        Ok(())
    }
}
