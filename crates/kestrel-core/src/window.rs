//! Per-key noise suppression.
//!
//! Every key gets a fixed window: its first hit opens a window of `period`,
//! inside which at most `max_hits` hits pass. Once the window elapses, the
//! next hit opens a new one. The number of tracked keys never exceeds
//! `capacity`: inserting into a full map first drops elapsed windows, then
//! the oldest one.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::pdk::{ConfigError, ModuleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_hits: u32,
    pub period: Duration,
    pub capacity: usize,
}

impl WindowConfig {
    pub const EXE: WindowConfig = WindowConfig {
        max_hits: 10,
        period: Duration::from_secs(60),
        capacity: 4096,
    };

    pub const ARGV: WindowConfig = WindowConfig {
        max_hits: 5,
        period: Duration::from_secs(60),
        capacity: 8192,
    };

    pub const DNS: WindowConfig = WindowConfig {
        max_hits: 20,
        period: Duration::from_secs(60),
        capacity: 2048,
    };

    /// Read `max_hits`, `period_secs` and `capacity`, falling back on `default`
    /// for missing fields.
    pub fn from_config(config: &ModuleConfig, default: WindowConfig) -> Result<Self, ConfigError> {
        let max_hits = config.with_default("max_hits", default.max_hits)?;
        let period_secs = config.with_default("period_secs", default.period.as_secs())?;
        let capacity = config.with_default("capacity", default.capacity)?;
        if max_hits == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_hits".to_string(),
                value: max_hits.to_string(),
                err: "must be at least 1".to_string(),
            });
        }
        if capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: capacity.to_string(),
                err: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            max_hits,
            period: Duration::from_secs(period_secs),
            capacity,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Instant,
    hits: u32,
}

#[derive(Debug)]
pub struct WindowFilter {
    config: WindowConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl WindowFilter {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key`. Returns `true` when the event should proceed.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.lock();
        if let Some(window) = windows.get_mut(key) {
            if now.saturating_duration_since(window.start) >= self.config.period {
                *window = Window { start: now, hits: 1 };
                return true;
            }
            if window.hits < self.config.max_hits {
                window.hits += 1;
                return true;
            }
            return false;
        }

        if windows.len() >= self.config.capacity {
            let period = self.config.period;
            windows.retain(|_, window| now.saturating_duration_since(window.start) < period);
            if windows.len() >= self.config.capacity {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, window)| window.start)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                }
            }
        }
        windows.insert(key.to_string(), Window { start: now, hits: 1 });
        true
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave a window half updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The filters shared by every decode of the same event class.
#[derive(Debug)]
pub struct WindowFilters {
    pub exe: WindowFilter,
    pub argv: WindowFilter,
    pub dns: WindowFilter,
}

impl WindowFilters {
    pub fn new(exe: WindowConfig, argv: WindowConfig, dns: WindowConfig) -> Self {
        Self {
            exe: WindowFilter::new(exe),
            argv: WindowFilter::new(argv),
            dns: WindowFilter::new(dns),
        }
    }
}

impl Default for WindowFilters {
    fn default() -> Self {
        Self::new(WindowConfig::EXE, WindowConfig::ARGV, WindowConfig::DNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(max_hits: u32, period_secs: u64, capacity: usize) -> WindowFilter {
        WindowFilter::new(WindowConfig {
            max_hits,
            period: Duration::from_secs(period_secs),
            capacity,
        })
    }

    #[test]
    fn first_hit_passes() {
        let f = filter(1, 60, 16);
        assert!(f.check("/usr/bin/cat"));
        assert!(f.check("/usr/bin/ls"));
    }

    #[test]
    fn suppressed_after_max_hits() {
        let f = filter(3, 60, 16);
        let now = Instant::now();
        let results: Vec<bool> = (0..6).map(|_| f.check_at("k", now)).collect();
        assert_eq!(results, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn new_window_after_period() {
        let f = filter(1, 60, 16);
        let start = Instant::now();
        assert!(f.check_at("k", start));
        assert!(!f.check_at("k", start + Duration::from_secs(59)));
        assert!(f.check_at("k", start + Duration::from_secs(60)));
        assert!(!f.check_at("k", start + Duration::from_secs(61)));
    }

    #[test]
    fn capacity_is_bounded() {
        let f = filter(1, 60, 4);
        let start = Instant::now();
        for i in 0..100 {
            f.check_at(&format!("key-{i}"), start + Duration::from_millis(i));
            assert!(f.len() <= 4);
        }
        // the most recent keys survive the eviction
        assert!(!f.check_at("key-99", start + Duration::from_millis(100)));
    }

    #[test]
    fn full_map_purges_expired_windows_first() {
        let f = filter(1, 10, 2);
        let start = Instant::now();
        assert!(f.check_at("old", start));
        assert!(f.check_at("recent", start + Duration::from_secs(9)));
        // "old" elapsed, "recent" did not
        assert!(f.check_at("new", start + Duration::from_secs(12)));
        assert_eq!(f.len(), 2);
        assert!(!f.check_at("recent", start + Duration::from_secs(12)));
    }

    #[test]
    fn evicted_key_passes_again() {
        let f = filter(1, 60, 1);
        let start = Instant::now();
        assert!(f.check_at("a", start));
        assert!(f.check_at("b", start));
        assert!(f.check_at("a", start));
    }

    #[test]
    fn config_defaults_and_overrides() {
        let mut config = ModuleConfig::default();
        assert_eq!(
            WindowConfig::from_config(&config, WindowConfig::DNS).unwrap(),
            WindowConfig::DNS
        );
        config.insert("max_hits".to_string(), "2".to_string());
        config.insert("period_secs".to_string(), "5".to_string());
        let parsed = WindowConfig::from_config(&config, WindowConfig::EXE).unwrap();
        assert_eq!(parsed.max_hits, 2);
        assert_eq!(parsed.period, Duration::from_secs(5));
        assert_eq!(parsed.capacity, WindowConfig::EXE.capacity);

        config.insert("max_hits".to_string(), "0".to_string());
        assert!(WindowConfig::from_config(&config, WindowConfig::EXE).is_err());
    }
}
