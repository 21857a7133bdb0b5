use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bpf_common::parsing::kallsyms::KALLSYMS_PATH;
use kestrel_core::{
    bus::BUFFER_SIZE,
    cache::ArgvCacheConfig,
    pdk::ModuleConfig,
    window::{WindowConfig, WindowFilters},
};

const DEFAULT_CONFIG_FILE: &str = "/etc/kestrel/kestrel.ini";

/// General configuration section for settings shared by the whole agent.
pub const GENERAL_CONFIG: &str = "kestrel";

/// Agent configuration, one [`ModuleConfig`] per `INI` section.
#[derive(Debug, Clone, Default)]
pub struct KestrelConfig {
    configs: HashMap<String, ModuleConfig>,
}

impl KestrelConfig {
    /// Load the default file. A missing file means default values.
    pub fn new() -> Result<Self> {
        let config_file = Path::new(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            log::debug!("{DEFAULT_CONFIG_FILE} not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_config_file(config_file)
    }

    /// Load a custom file, which must exist.
    pub fn with_custom_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: &Path) -> Result<Self> {
        let conf = ini::Ini::load_from_file(config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        Ok(Self::from_ini(&conf))
    }

    pub fn from_ini_str(content: &str) -> Result<Self> {
        let conf = ini::Ini::load_from_str(content).context("Error parsing configuration")?;
        Ok(Self::from_ini(&conf))
    }

    fn from_ini(conf: &ini::Ini) -> Self {
        let mut configs: HashMap<String, ModuleConfig> = HashMap::new();
        for (section, prop) in conf {
            if let Some(section) = section {
                let section_config = configs.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }
        Self { configs }
    }

    /// Configuration of a section, empty if missing.
    pub fn get_module_config(&self, section: &str) -> ModuleConfig {
        self.configs.get(section).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line
    Json,
    /// Human readable, one line per event
    Plain,
}

/// Typed view of [`KestrelConfig`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub kallsyms_path: PathBuf,
    pub bus_capacity: usize,
    pub output: OutputFormat,
    pub exe_window: WindowConfig,
    pub argv_window: WindowConfig,
    pub dns_window: WindowConfig,
    pub argv_cache: ArgvCacheConfig,
    pub scheduler_enabled: bool,
}

impl AgentSettings {
    pub fn from_config(config: &KestrelConfig) -> Result<Self> {
        let general = config.get_module_config(GENERAL_CONFIG);
        let kallsyms_path = general.with_default("kallsyms_path", PathBuf::from(KALLSYMS_PATH))?;
        let bus_capacity = general.with_default("bus_capacity", BUFFER_SIZE)?;
        if bus_capacity == 0 {
            bail!("'bus_capacity' must be greater than zero");
        }
        let output = match general
            .with_default("output", "json".to_string())?
            .as_str()
        {
            "json" => OutputFormat::Json,
            "plain" => OutputFormat::Plain,
            x => bail!("'output' has invalid value {x:?}. The valid values are 'json' and 'plain'"),
        };

        let window = |section: &str, default: WindowConfig| {
            WindowConfig::from_config(&config.get_module_config(section), default)
                .with_context(|| format!("Invalid [{section}] configuration"))
        };
        let argv_cache = ArgvCacheConfig::from_config(&config.get_module_config("argv-cache"))
            .context("Invalid [argv-cache] configuration")?;
        let scheduler_enabled = config
            .get_module_config("scheduler")
            .with_default("enabled", true)?;

        Ok(Self {
            kallsyms_path,
            bus_capacity,
            output,
            exe_window: window("window.exe", WindowConfig::EXE)?,
            argv_window: window("window.argv", WindowConfig::ARGV)?,
            dns_window: window("window.dns", WindowConfig::DNS)?,
            argv_cache,
            scheduler_enabled,
        })
    }

    pub fn window_filters(&self) -> WindowFilters {
        WindowFilters::new(self.exe_window, self.argv_window, self.dns_window)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_without_file() {
        let settings = AgentSettings::from_config(&KestrelConfig::default()).unwrap();
        assert_eq!(settings.kallsyms_path, PathBuf::from("/proc/kallsyms"));
        assert_eq!(settings.output, OutputFormat::Json);
        assert_eq!(settings.exe_window, WindowConfig::EXE);
        assert_eq!(settings.argv_cache, ArgvCacheConfig::default());
        assert!(settings.scheduler_enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let config = KestrelConfig::from_ini_str(
            "\
[kestrel]
kallsyms_path = /tmp/kallsyms
output = plain

[window.dns]
max_hits = 3
period_secs = 30

[argv-cache]
ttl_secs = 60

[scheduler]
enabled = false
",
        )
        .unwrap();
        let settings = AgentSettings::from_config(&config).unwrap();
        assert_eq!(settings.kallsyms_path, PathBuf::from("/tmp/kallsyms"));
        assert_eq!(settings.output, OutputFormat::Plain);
        assert_eq!(settings.dns_window.max_hits, 3);
        assert_eq!(settings.dns_window.period, Duration::from_secs(30));
        assert_eq!(settings.dns_window.capacity, WindowConfig::DNS.capacity);
        assert_eq!(settings.argv_cache.ttl, Duration::from_secs(60));
        assert!(!settings.scheduler_enabled);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = KestrelConfig::from_ini_str("[window.exe]\nmax_hits = many\n").unwrap();
        assert!(AgentSettings::from_config(&config).is_err());
        let config = KestrelConfig::from_ini_str("[kestrel]\noutput = xml\n").unwrap();
        assert!(AgentSettings::from_config(&config).is_err());
    }

    #[test]
    fn missing_custom_file() {
        assert!(KestrelConfig::with_custom_file(Path::new("/nonexistent/kestrel.ini")).is_err());
    }
}
