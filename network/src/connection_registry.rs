//! Connection registry: open-connection counts and at most one live stream
//! handle per [`ConnectionKey`].
//!
//! Shared between the transport event pump (which records opens and closes)
//! and anything that needs to write to a peer. One internal lock guards all
//! maps so a count and its stream never disagree. When several links share
//! a key, the newest is attached and the others are kept as fallbacks.

use std::collections::HashMap;

use nebula_types::ConnectionKey;
use parking_lot::Mutex;

use crate::NetworkError;

struct Entries<S> {
    counts: HashMap<ConnectionKey, usize>,
    streams: HashMap<ConnectionKey, S>,
    /// Every open link per key, oldest first.
    links: HashMap<ConnectionKey, Vec<S>>,
}

impl<S> Entries<S> {
    fn forget(&mut self, key: &ConnectionKey) {
        self.counts.remove(key);
        self.streams.remove(key);
        self.links.remove(key);
    }
}

pub struct ConnectionRegistry<S> {
    inner: Mutex<Entries<S>>,
}

impl<S: Clone> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Entries {
                counts: HashMap::new(),
                streams: HashMap::new(),
                links: HashMap::new(),
            }),
        }
    }

    /// Count one more open connection for `key`. Returns the new count.
    pub fn on_connection_opened(&self, key: &ConnectionKey) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Count one connection closed. At zero the entry and any stream are
    /// dropped. Unknown keys are ignored. Returns the remaining count.
    pub fn on_connection_closed(&self, key: &ConnectionKey) -> usize {
        let mut inner = self.inner.lock();
        let Some(count) = inner.counts.get_mut(key) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            inner.forget(key);
        }
        remaining
    }

    /// Attach the live stream for `key`, replacing any previous one. Fails if
    /// no connection is open for the key.
    pub fn set_stream(&self, key: &ConnectionKey, stream: S) -> Result<Option<S>, NetworkError> {
        let mut inner = self.inner.lock();
        if !inner.counts.contains_key(key) {
            return Err(NetworkError::InvalidState(format!(
                "no open connection for {key}"
            )));
        }
        Ok(inner.streams.insert(key.clone(), stream))
    }

    pub fn get_stream(&self, key: &ConnectionKey) -> Option<S> {
        self.inner.lock().streams.get(key).cloned()
    }

    pub fn clear_stream(&self, key: &ConnectionKey) -> Option<S> {
        self.inner.lock().streams.remove(key)
    }

    pub fn connection_count(&self, key: &ConnectionKey) -> usize {
        self.inner.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Keys with at least one open connection.
    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.inner.lock().counts.keys().cloned().collect()
    }

    /// Every attached stream with its key.
    pub fn streams(&self) -> Vec<(ConnectionKey, S)> {
        self.inner
            .lock()
            .streams
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Clone + PartialEq> ConnectionRegistry<S> {
    /// Count a new link for `key` and attach it as the key's stream.
    /// Returns the new count.
    pub fn on_stream_opened(&self, key: &ConnectionKey, stream: S) -> usize {
        let mut inner = self.inner.lock();
        let count = {
            let count = inner.counts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        inner.links.entry(key.clone()).or_default().push(stream.clone());
        inner.streams.insert(key.clone(), stream);
        count
    }

    /// Count `stream` closed. If it was the attached stream, the newest
    /// surviving link for the key takes its place. Returns the remaining
    /// count; unknown keys are ignored.
    pub fn on_stream_closed(&self, key: &ConnectionKey, stream: &S) -> usize {
        let mut inner = self.inner.lock();
        let Some(count) = inner.counts.get_mut(key) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            inner.forget(key);
            return 0;
        }

        let survivor = inner.links.get_mut(key).and_then(|links| {
            links.retain(|s| s != stream);
            links.last().cloned()
        });
        if inner.streams.get(key) == Some(stream) {
            match survivor {
                Some(next) => {
                    inner.streams.insert(key.clone(), next);
                }
                None => {
                    inner.streams.remove(key);
                }
            }
        }
        remaining
    }
}

impl<S: Clone> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
