//! In-memory key-value store implementation.
//!
//! Useful for testing and single-process deployments. Expiry uses the tokio
//! clock so tests can drive TTLs with `tokio::time::pause`.

use super::KvStore;
use crate::error::{Result, TldwError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map and drop expired entries.
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| TldwError::KeyValue(format!("Failed to acquire lock: {}", e)))?;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries)
    }

    fn wrong_type(key: &str) -> TldwError {
        TldwError::KeyValue(format!("Operation against a key holding the wrong kind of value: {}", key))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries()?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries()?;
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries()?;
        Ok(entries.contains_key(key))
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        let mut entries = self.entries()?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Text("0".to_string()), ttl));

        let Value::Text(text) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };
        let next = text
            .parse::<i64>()
            .map_err(|_| TldwError::KeyValue(format!("Value at {} is not an integer", key)))?
            + 1;
        *text = next.to_string();
        Ok(next)
    }

    async fn push_back(&self, list: &str, value: &str) -> Result<()> {
        let mut entries = self.entries()?;
        let entry = entries
            .entry(list.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), None));
        match &mut entry.value {
            Value::List(items) => {
                items.push_back(value.to_string());
                Ok(())
            }
            _ => Err(Self::wrong_type(list)),
        }
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>> {
        let mut entries = self.entries()?;
        let popped = match entries.get_mut(list).map(|e| &mut e.value) {
            None => return Ok(None),
            Some(Value::List(items)) => items.pop_front(),
            Some(_) => return Err(Self::wrong_type(list)),
        };
        if matches!(entries.get(list).map(|e| &e.value), Some(Value::List(items)) if items.is_empty()) {
            entries.remove(list);
        }
        Ok(popped)
    }

    async fn list_remove(&self, list: &str, value: &str) -> Result<usize> {
        let mut entries = self.entries()?;
        match entries.get_mut(list).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::List(items)) => {
                let before = items.len();
                items.retain(|item| item != value);
                Ok(before - items.len())
            }
            Some(_) => Err(Self::wrong_type(list)),
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let entries = self.entries()?;
        match entries.get(list).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len()),
            Some(_) => Err(Self::wrong_type(list)),
        }
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let mut entries = self.entries()?;
        let entry = entries
            .entry(set.to_string())
            .or_insert_with(|| Entry::new(Value::Sorted(HashMap::new()), None));
        match &mut entry.value {
            Value::Sorted(members) => {
                members.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(Self::wrong_type(set)),
        }
    }

    async fn zrem(&self, set: &str, member: &str) -> Result<bool> {
        let mut entries = self.entries()?;
        match entries.get_mut(set).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::Sorted(members)) => Ok(members.remove(member).is_some()),
            Some(_) => Err(Self::wrong_type(set)),
        }
    }

    async fn zrange_by_score(&self, set: &str, max: i64, limit: usize) -> Result<Vec<String>> {
        let entries = self.entries()?;
        match entries.get(set).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Sorted(members)) => {
                let ordered: BTreeSet<(i64, &String)> = members
                    .iter()
                    .filter(|(_, score)| **score <= max)
                    .map(|(member, score)| (*score, member))
                    .collect();
                Ok(ordered
                    .into_iter()
                    .take(limit)
                    .map(|(_, member)| member.clone())
                    .collect())
            }
            Some(_) => Err(Self::wrong_type(set)),
        }
    }

    async fn zcard(&self, set: &str) -> Result<usize> {
        let entries = self.entries()?;
        match entries.get(set).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Sorted(members)) => Ok(members.len()),
            Some(_) => Err(Self::wrong_type(set)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.entries().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_ttl() {
        let store = MemoryStore::new();

        assert!(store.set_nx("k", "a", Some(Duration::from_secs(30))).await.unwrap());
        assert!(!store.set_nx("k", "b", Some(Duration::from_secs(30))).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.set_nx("k", "b", Some(Duration::from_secs(30))).await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_and_lists() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("c", None).await.unwrap(), 1);
        assert_eq!(store.incr("c", None).await.unwrap(), 2);

        store.push_back("l", "a").await.unwrap();
        store.push_back("l", "b").await.unwrap();
        store.push_back("l", "a").await.unwrap();
        assert_eq!(store.list_remove("l", "a").await.unwrap(), 2);
        assert_eq!(store.list_len("l").await.unwrap(), 1);
        assert_eq!(store.pop_front("l").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_front("l").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sorted_set_range() {
        let store = MemoryStore::new();
        store.zadd("z", "late", 300).await.unwrap();
        store.zadd("z", "early", 100).await.unwrap();
        store.zadd("z", "middle", 200).await.unwrap();

        let due = store.zrange_by_score("z", 250, 10).await.unwrap();
        assert_eq!(due, vec!["early".to_string(), "middle".to_string()]);

        assert!(store.zrem("z", "early").await.unwrap());
        assert!(!store.zrem("z", "early").await.unwrap());
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(store.push_back("k", "x").await.is_err());
    }
}
