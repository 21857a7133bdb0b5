use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::pdk::{ConfigError, ModuleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgvCacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl ArgvCacheConfig {
    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        let default = Self::default();
        let capacity = config.with_default("capacity", default.capacity)?;
        let ttl_secs = config.with_default("ttl_secs", default.ttl.as_secs())?;
        if capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: capacity.to_string(),
                err: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            capacity,
            ttl: Duration::from_secs(ttl_secs),
        })
    }
}

impl Default for ArgvCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 8192,
            ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Entry {
    argv: String,
    inserted: Instant,
}

/// Last command line seen for every pid.
///
/// Exec events fill it; events that only know a pid (socket owners for
/// example) read it back.
#[derive(Debug)]
pub struct ArgvCache {
    config: ArgvCacheConfig,
    entries: Mutex<HashMap<u32, Entry>>,
}

impl ArgvCache {
    pub fn new(config: ArgvCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, pid: u32, argv: String) {
        self.insert_at(pid, argv, Instant::now())
    }

    pub fn insert_at(&self, pid: u32, argv: String, now: Instant) {
        let mut entries = self.lock();
        if !entries.contains_key(&pid) && entries.len() >= self.config.capacity {
            let ttl = self.config.ttl;
            entries.retain(|_, entry| now.saturating_duration_since(entry.inserted) < ttl);
            if entries.len() >= self.config.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted)
                    .map(|(pid, _)| *pid);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(pid, Entry { argv, inserted: now });
    }

    pub fn get(&self, pid: u32) -> Option<String> {
        self.get_at(pid, Instant::now())
    }

    pub fn get_at(&self, pid: u32, now: Instant) -> Option<String> {
        let mut entries = self.lock();
        match entries.get(&pid) {
            Some(entry) if now.saturating_duration_since(entry.inserted) < self.config.ttl => {
                Some(entry.argv.clone())
            }
            Some(_) => {
                entries.remove(&pid);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ArgvCache {
    fn default() -> Self {
        Self::new(ArgvCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl_secs: u64) -> ArgvCache {
        ArgvCache::new(ArgvCacheConfig {
            capacity,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn insert_and_get() {
        let c = ArgvCache::default();
        assert_eq!(c.get(42), None);
        c.insert(42, "nc -lvp 4444".to_string());
        assert_eq!(c.get(42).as_deref(), Some("nc -lvp 4444"));
        c.insert(42, "bash -i".to_string());
        assert_eq!(c.get(42).as_deref(), Some("bash -i"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn entries_expire() {
        let c = cache(16, 10);
        let start = Instant::now();
        c.insert_at(1, "sleep 100".to_string(), start);
        assert!(c.get_at(1, start + Duration::from_secs(9)).is_some());
        assert!(c.get_at(1, start + Duration::from_secs(10)).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        let c = cache(3, 600);
        let start = Instant::now();
        for pid in 0..10u32 {
            c.insert_at(pid, format!("cmd {pid}"), start + Duration::from_millis(pid as u64));
            assert!(c.len() <= 3);
        }
        assert!(c.get_at(0, start).is_none());
        assert_eq!(c.get_at(9, start).as_deref(), Some("cmd 9"));
    }

    #[test]
    fn full_cache_drops_expired_first() {
        let c = cache(2, 10);
        let start = Instant::now();
        c.insert_at(1, "old".to_string(), start);
        c.insert_at(2, "recent".to_string(), start + Duration::from_secs(8));
        c.insert_at(3, "new".to_string(), start + Duration::from_secs(11));
        let now = start + Duration::from_secs(11);
        assert!(c.get_at(1, now).is_none());
        assert_eq!(c.get_at(2, now).as_deref(), Some("recent"));
        assert_eq!(c.get_at(3, now).as_deref(), Some("new"));
    }
}
