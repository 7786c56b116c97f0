//! Response correlation for in-flight RPC calls.
//!
//! Bowler has no correlation id on the wire; a response is matched to its
//! call purely by the `"<method>:<namespace>#<rpc>"` event key. Each key
//! owns a FIFO queue of one-shot listeners, so overlapping identical
//! calls resolve in call order.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::Instant,
};

use crate::{Device, Error, Method, RpcValueMap};

/// The event key a call's response arrives under.
pub fn event_key(method: Method, namespace: &str, rpc: &str) -> String {
    format!("{method}:{namespace}#{rpc}")
}

/// A fully decoded inbound RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    values: RpcValueMap,
    method: Method,
    namespace: String,
    rpc: String,
}

impl Reply {
    pub(crate) fn new(values: RpcValueMap, method: Method, namespace: &str, rpc: &str) -> Self {
        Self {
            values,
            method,
            namespace: namespace.to_owned(),
            rpc: rpc.to_owned(),
        }
    }

    /// The parsed body fields.
    pub fn values(&self) -> &RpcValueMap {
        &self.values
    }

    /// The method the response arrived with.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The namespace the response belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The RPC name the response belongs to.
    pub fn rpc(&self) -> &str {
        &self.rpc
    }

    /// The event key this reply fires.
    pub fn key(&self) -> String {
        event_key(self.method, &self.namespace, &self.rpc)
    }
}

/// A one-shot callback resolving a correlated call.
///
/// The continuation receives the device so a step can immediately issue
/// its next call; every continuation fires exactly once, with the reply
/// or with the error that ended the call.
pub type Continuation = Box<dyn FnOnce(&mut Device, Result<Reply, Error>)>;

/// A persistent observer of one event key.
pub type Watcher = Box<dyn FnMut(&Reply)>;

struct PendingCall {
    continuation: Continuation,
    deadline: Instant,
}

/// Per-key listener queues and watchers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    pending: HashMap<String, VecDeque<PendingCall>>,
    watchers: HashMap<String, Vec<Watcher>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot listener for `key`.
    pub(crate) fn register(&mut self, key: String, continuation: Continuation, deadline: Instant) {
        self.pending.entry(key).or_default().push_back(PendingCall {
            continuation,
            deadline,
        });
    }

    /// Remove and return the oldest listener for `key`.
    pub(crate) fn take_next(&mut self, key: &str) -> Option<Continuation> {
        let queue = self.pending.get_mut(key)?;
        let call = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(key);
        }
        call.map(|c| c.continuation)
    }

    /// Remove every listener for `key`, returning how many were dropped.
    pub(crate) fn cancel(&mut self, key: &str) -> usize {
        self.pending.remove(key).map_or(0, |q| q.len())
    }

    /// Remove and return every listener, oldest first per key. Used when
    /// the transport dies.
    pub(crate) fn drain_all(&mut self) -> Vec<Continuation> {
        self.pending
            .drain()
            .flat_map(|(_, q)| q.into_iter().map(|c| c.continuation))
            .collect()
    }

    /// Remove and return the listeners whose deadline has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<(String, Continuation)> {
        let mut expired = Vec::new();
        for (key, queue) in &mut self.pending {
            while queue
                .front()
                .is_some_and(|c| c.deadline <= now)
            {
                let call = queue.pop_front().expect("front was Some");
                expired.push((key.clone(), call.continuation));
            }
        }
        self.pending.retain(|_, q| !q.is_empty());
        expired
    }

    /// Whether any listener is queued for `key`.
    pub(crate) fn has_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// The total number of queued listeners.
    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Attach a persistent watcher to `key`.
    pub(crate) fn watch(&mut self, key: String, watcher: Watcher) {
        self.watchers.entry(key).or_default().push(watcher);
    }

    /// Whether any watcher observes `key`.
    pub(crate) fn has_watchers(&self, key: &str) -> bool {
        self.watchers.get(key).is_some_and(|w| !w.is_empty())
    }

    /// Hand `reply` to every watcher of its key.
    pub(crate) fn notify_watchers(&mut self, key: &str, reply: &Reply) {
        if let Some(watchers) = self.watchers.get_mut(key) {
            for w in watchers {
                w(reply);
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending_calls", &self.pending_calls())
            .field("watched_keys", &self.watchers.len())
            .finish()
    }
}
