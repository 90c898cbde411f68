//! Thought-Signature Cache (C8): caches Gemini reasoning-continuity
//! artifacts so a follow-up request that replays a prior `tool_use` can
//! carry its signature back out via the OpenAI-compatibility
//! `extra_body.google.thought_signature` convention.
//!
//! Background eviction is the same shape as the credential-unavailable
//! recovery queue: a min-heap of deadlines driving a `tokio::spawn` loop
//! that sleeps until the next one, woken early by `Notify` on insert.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use wireloom_transform::middleware::thought_signature::ThoughtSignatureStore;

#[derive(Debug, Clone)]
struct Entry {
    signatures: HashMap<String, JsonValue>,
    tool_call_ids: HashSet<String>,
    conversation_id: Option<String>,
    inserted_at: Instant,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<u64, Entry>,
    by_tool_call: HashMap<String, Vec<u64>>,
    by_conversation: HashMap<String, Vec<u64>>,
    next_id: u64,
}

impl Inner {
    fn insert(&mut self, entry: Entry) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        for tool_call_id in &entry.tool_call_ids {
            self.by_tool_call.entry(tool_call_id.clone()).or_default().push(id);
        }
        if let Some(conversation_id) = &entry.conversation_id {
            self.by_conversation.entry(conversation_id.clone()).or_default().push(id);
        }
        self.entries.insert(id, entry);
        id
    }

    fn remove(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            for tool_call_id in &entry.tool_call_ids {
                if let Some(ids) = self.by_tool_call.get_mut(tool_call_id) {
                    ids.retain(|&existing| existing != id);
                }
            }
            if let Some(conversation_id) = &entry.conversation_id {
                if let Some(ids) = self.by_conversation.get_mut(conversation_id) {
                    ids.retain(|&existing| existing != id);
                }
            }
        }
    }

    /// Evicts the oldest ~10% of entries by insertion time.
    fn evict_oldest_tenth(&mut self) {
        let evict_count = (self.entries.len() / 10).max(1);
        let mut ids: Vec<u64> = self.entries.keys().copied().collect();
        ids.sort_by_key(|id| self.entries[id].inserted_at);
        for id in ids.into_iter().take(evict_count) {
            self.remove(id);
        }
    }
}

pub struct ThoughtSignatureCache {
    inner: Mutex<Inner>,
    heap: Mutex<BinaryHeap<Reverse<(Instant, u64)>>>,
    notify: Notify,
    ttl: std::time::Duration,
    max_entries: usize,
}

impl ThoughtSignatureCache {
    pub fn new(ttl: std::time::Duration, max_entries: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            ttl,
            max_entries,
        })
    }

    /// Spawns the background task that evicts entries once their TTL
    /// elapses, independent of the capacity-triggered eviction in `record`.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                let next_deadline = { cache.heap.lock().expect("poisoned").peek().map(|Reverse((t, _))| *t) };

                match next_deadline {
                    None => cache.notify.notified().await,
                    Some(deadline) => sleep_until(deadline).await,
                }

                let now = Instant::now();
                let due: Vec<u64> = {
                    let mut heap = cache.heap.lock().expect("poisoned");
                    let mut due = Vec::new();
                    while let Some(Reverse((t, id))) = heap.peek().copied() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push(id);
                    }
                    due
                };

                if due.is_empty() {
                    continue;
                }

                let mut inner = cache.inner.lock().expect("poisoned");
                for id in due {
                    let expired = inner.entries.get(&id).is_some_and(|e| e.expires_at <= now);
                    if expired {
                        inner.remove(id);
                    }
                }
            }
        });
    }
}

impl ThoughtSignatureStore for ThoughtSignatureCache {
    fn retrieve(
        &self,
        tool_call_ids: &[String],
        conversation_id: Option<&str>,
    ) -> Option<HashMap<String, JsonValue>> {
        let inner = self.inner.lock().expect("poisoned");

        let query: HashSet<&str> = tool_call_ids.iter().map(String::as_str).collect();
        let mut candidates: HashSet<u64> = HashSet::new();
        for id in tool_call_ids {
            if let Some(ids) = inner.by_tool_call.get(id) {
                candidates.extend(ids.iter().copied());
            }
        }

        if let Some(conversation_id) = conversation_id {
            let conv_ids: HashSet<u64> = inner
                .by_conversation
                .get(conversation_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            candidates.retain(|id| conv_ids.contains(id));
        }

        candidates
            .into_iter()
            .filter_map(|id| inner.entries.get(&id).map(|entry| (id, entry)))
            .max_by_key(|(_, entry)| {
                let overlap = entry.tool_call_ids.iter().filter(|id| query.contains(id.as_str())).count();
                (overlap, entry.inserted_at)
            })
            .map(|(_, entry)| entry.signatures.clone())
    }

    fn record(&self, signatures: HashMap<String, JsonValue>, conversation_id: Option<&str>) {
        if signatures.is_empty() {
            return;
        }

        let now = Instant::now();
        let expires_at = now + self.ttl;
        let entry = Entry {
            tool_call_ids: signatures.keys().cloned().collect(),
            signatures,
            conversation_id: conversation_id.map(str::to_string),
            inserted_at: now,
            expires_at,
        };

        let id = {
            let mut inner = self.inner.lock().expect("poisoned");
            let id = inner.insert(entry);
            if inner.entries.len() > self.max_entries {
                inner.evict_oldest_tenth();
            }
            id
        };

        self.heap.lock().expect("poisoned").push(Reverse((expires_at, id)));
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sigs(pairs: &[(&str, &str)]) -> HashMap<String, JsonValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), JsonValue::String(v.to_string())))
            .collect()
    }

    #[test]
    fn retrieve_returns_entry_with_greatest_overlap() {
        let cache = ThoughtSignatureCache::new(Duration::from_secs(3600), 100);
        cache.record(sigs(&[("a", "sig-a")]), None);
        cache.record(sigs(&[("a", "sig-a2"), ("b", "sig-b")]), None);

        let result = cache
            .retrieve(&["a".to_string(), "b".to_string()], None)
            .unwrap();
        assert_eq!(result.get("b").unwrap(), &JsonValue::String("sig-b".to_string()));
    }

    #[test]
    fn retrieve_scopes_by_conversation_when_given() {
        let cache = ThoughtSignatureCache::new(Duration::from_secs(3600), 100);
        cache.record(sigs(&[("a", "conv1-sig")]), Some("conv1"));
        cache.record(sigs(&[("a", "conv2-sig")]), Some("conv2"));

        let result = cache.retrieve(&["a".to_string()], Some("conv2")).unwrap();
        assert_eq!(result.get("a").unwrap(), &JsonValue::String("conv2-sig".to_string()));
    }

    #[test]
    fn retrieve_with_no_candidates_is_none() {
        let cache = ThoughtSignatureCache::new(Duration::from_secs(3600), 100);
        assert!(cache.retrieve(&["missing".to_string()], None).is_none());
    }

    #[test]
    fn capacity_eviction_drops_oldest_entries() {
        let cache = ThoughtSignatureCache::new(Duration::from_secs(3600), 10);
        for i in 0..12 {
            cache.record(sigs(&[(&format!("id{i}"), "sig")]), None);
        }
        let inner = cache.inner.lock().unwrap();
        assert!(inner.entries.len() <= 11);
    }
}
