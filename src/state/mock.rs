// src/state/mock.rs
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

use super::traits::{RateLimitOptions, SetMode, StateBackend, StateKey};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Number(i64),
    Text(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
}

/// In-memory state backend for tests and local runs.
///
/// Keys are stored by their hex form. Cardinality is exact and TTLs are
/// ignored.
#[derive(Debug, Default)]
pub struct MockStateBackend {
    db: Mutex<HashMap<String, Entry>>,
    calls: Mutex<Vec<String>>,
}

impl MockStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations performed so far, e.g. `increment ["count","Count",["1.2.3.4"]]` (for assertions).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.db.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.lock().is_empty()
    }

    fn record(&self, op: &str, key: &StateKey) {
        self.calls.lock().push(format!("{} {}", op, key));
    }
}

#[async_trait]
impl StateBackend for MockStateBackend {
    async fn rate_limit_fetch(&self, key: &StateKey, opts: &RateLimitOptions) -> anyhow::Result<i64> {
        self.record("rate_limit_fetch", key);
        let mut db = self.db.lock();
        let entry = db
            .entry(key.to_hex())
            .or_insert(Entry::Number(opts.max_amount));

        match entry {
            Entry::Number(available) => {
                let before = *available;
                *available = (before - opts.take).max(0);
                Ok(before)
            }
            _ => bail!("WRONGTYPE rate limit on non-numeric key {}", key),
        }
    }

    async fn increment(&self, key: &StateKey) -> anyhow::Result<i64> {
        self.record("increment", key);
        let mut db = self.db.lock();
        let entry = db.entry(key.to_hex()).or_insert(Entry::Number(0));

        let next = match entry {
            Entry::Number(n) => *n + 1,
            Entry::Text(text) => match text.parse::<i64>() {
                Ok(n) => n + 1,
                Err(_) => bail!("value at {} is not an integer", key),
            },
            _ => bail!("WRONGTYPE increment on {}", key),
        };
        *entry = Entry::Number(next);
        Ok(next)
    }

    async fn get(&self, key: &StateKey) -> anyhow::Result<Option<String>> {
        match self.db.lock().get(&key.to_hex()) {
            None => Ok(None),
            Some(Entry::Number(n)) => Ok(Some(n.to_string())),
            Some(Entry::Text(text)) => Ok(Some(text.clone())),
            Some(_) => bail!("WRONGTYPE get on {}", key),
        }
    }

    async fn del(&self, keys: &[StateKey]) -> anyhow::Result<usize> {
        let mut db = self.db.lock();
        Ok(keys
            .iter()
            .filter(|key| db.remove(&key.to_hex()).is_some())
            .count())
    }

    async fn set(&self, key: &StateKey, value: &str, mode: SetMode) -> anyhow::Result<bool> {
        self.record("set", key);
        let mut db = self.db.lock();
        let exists = db.contains_key(&key.to_hex());

        match (mode, exists) {
            (SetMode::IfPresent, false) | (SetMode::IfAbsent, true) => Ok(false),
            _ => {
                db.insert(key.to_hex(), Entry::Text(value.to_string()));
                Ok(true)
            }
        }
    }

    async fn mget_numbers(&self, keys: &[StateKey]) -> anyhow::Result<Vec<Option<i64>>> {
        let db = self.db.lock();
        Ok(keys
            .iter()
            .map(|key| match db.get(&key.to_hex()) {
                Some(Entry::Number(n)) => Some(*n),
                Some(Entry::Text(text)) => text.parse().ok(),
                _ => None,
            })
            .collect())
    }

    async fn get_list(&self, key: &StateKey) -> anyhow::Result<Vec<String>> {
        match self.db.lock().get(&key.to_hex()) {
            None => Ok(Vec::new()),
            Some(Entry::List(values)) => Ok(values.clone()),
            Some(_) => bail!("Expected list at {}", key),
        }
    }

    async fn list_push(&self, key: &StateKey, values: &[String]) -> anyhow::Result<()> {
        self.record("list_push", key);
        let mut db = self.db.lock();
        match db.entry(key.to_hex()).or_insert_with(|| Entry::List(Vec::new())) {
            Entry::List(list) => {
                list.extend(values.iter().cloned());
                Ok(())
            }
            _ => bail!("Expected list at {}", key),
        }
    }

    async fn pfadd(&self, key: &StateKey, values: &[String]) -> anyhow::Result<()> {
        self.record("pfadd", key);
        let mut db = self.db.lock();
        match db.entry(key.to_hex()).or_insert_with(|| Entry::Set(BTreeSet::new())) {
            Entry::Set(set) => {
                set.extend(values.iter().cloned());
                Ok(())
            }
            _ => bail!("WRONGTYPE pfadd on {}", key),
        }
    }

    async fn pfcount(&self, keys: &[StateKey]) -> anyhow::Result<u64> {
        let db = self.db.lock();
        let mut union: BTreeSet<&String> = BTreeSet::new();
        for key in keys {
            if let Some(Entry::Set(set)) = db.get(&key.to_hex()) {
                union.extend(set.iter());
            }
        }
        Ok(union.len() as u64)
    }

    async fn expire(&self, _key: &StateKey, _seconds: u64) -> anyhow::Result<()> {
        Ok(())
    }
}
