//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::scenario::ScenarioSettings;
use crate::domain::worker::{Backoff, WorkerTiming};

/// Environment variable that overrides the config directory
pub const CONFIG_DIR_ENV: &str = "DEADLOCK_LAB_CONFIG_DIR";

/// Deadlock Lab configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seconds each resource is held
    pub hold_time_secs: f64,
    /// Seconds before the detector declares deadlock
    pub deadlock_timeout_secs: f64,
    /// Limit on the retry policy's second acquisition
    pub retry_timeout_secs: f64,
    pub workers: usize,
    /// Fixed part of the retry backoff; half the hold time when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_secs: Option<f64>,
    /// Upper bound of the random part; half the hold time when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_jitter_secs: Option<f64>,
    /// Linear growth per additional retry
    pub backoff_step_secs: f64,
    pub telemetry: bool,
    pub show_progress: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            hold_time_secs: 0.8,
            deadlock_timeout_secs: 5.0,
            retry_timeout_secs: 1.0,
            workers: 2,
            backoff_base_secs: None,
            backoff_jitter_secs: None,
            backoff_step_secs: 0.0,
            telemetry: true,
            show_progress: false,
        }
    }
}

impl SimulationConfig {
    pub fn hold_time(&self) -> Duration {
        Duration::from_secs_f64(self.hold_time_secs)
    }

    pub fn deadlock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.deadlock_timeout_secs)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.retry_timeout_secs)
    }

    /// Backoff with unset parts derived from the hold time
    pub fn backoff(&self) -> Backoff {
        let half_hold = self.hold_time() / 2;
        let base = self.backoff_base_secs.map(Duration::from_secs_f64).unwrap_or(half_hold);
        let jitter = self.backoff_jitter_secs.map(Duration::from_secs_f64).unwrap_or(half_hold);
        Backoff::fixed(base, jitter).with_step(Duration::from_secs_f64(self.backoff_step_secs))
    }

    pub fn timing(&self) -> WorkerTiming {
        WorkerTiming::new(self.hold_time(), self.retry_timeout()).with_backoff(self.backoff())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (key, value) in [
            ("hold_time_secs", self.hold_time_secs),
            ("deadlock_timeout_secs", self.deadlock_timeout_secs),
            ("retry_timeout_secs", self.retry_timeout_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("simulation.{} must be a positive number of seconds", key));
            }
        }
        if self.workers == 0 {
            return Err(anyhow!("simulation.workers must be at least 1"));
        }
        if !self.backoff_step_secs.is_finite() || self.backoff_step_secs < 0.0 {
            return Err(anyhow!("simulation.backoff_step_secs must not be negative"));
        }
        for (key, value) in [
            ("backoff_base_secs", self.backoff_base_secs),
            ("backoff_jitter_secs", self.backoff_jitter_secs),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(anyhow!("simulation.{} must not be negative", key));
                }
            }
        }
        // A retry worker that never waits keeps colliding with its peer
        if self.backoff().ceiling().is_zero() {
            return Err(anyhow!("retry backoff must not be zero"));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("deadlock-lab")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.simulation.validate()
    }

    /// Settings for one scenario run
    pub fn scenario_settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            workers: self.simulation.workers,
            timing: self.simulation.timing(),
            deadlock_timeout: self.simulation.deadlock_timeout(),
            telemetry: self.simulation.telemetry,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let sim = &self.simulation;
        match key {
            "simulation.hold_time_secs" => Ok(sim.hold_time_secs.to_string()),
            "simulation.deadlock_timeout_secs" => Ok(sim.deadlock_timeout_secs.to_string()),
            "simulation.retry_timeout_secs" => Ok(sim.retry_timeout_secs.to_string()),
            "simulation.workers" => Ok(sim.workers.to_string()),
            "simulation.backoff_base_secs" => Ok(optional(sim.backoff_base_secs)),
            "simulation.backoff_jitter_secs" => Ok(optional(sim.backoff_jitter_secs)),
            "simulation.backoff_step_secs" => Ok(sim.backoff_step_secs.to_string()),
            "simulation.telemetry" => Ok(sim.telemetry.to_string()),
            "simulation.show_progress" => Ok(sim.show_progress.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `deadlock-lab config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The change is validated before it is kept.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut sim = self.simulation.clone();
        match key {
            "simulation.hold_time_secs" => sim.hold_time_secs = parse_secs(key, value)?,
            "simulation.deadlock_timeout_secs" => sim.deadlock_timeout_secs = parse_secs(key, value)?,
            "simulation.retry_timeout_secs" => sim.retry_timeout_secs = parse_secs(key, value)?,
            "simulation.workers" => {
                sim.workers = value
                    .parse()
                    .with_context(|| format!("Invalid workers value: {}", value))?;
            }
            "simulation.backoff_base_secs" => sim.backoff_base_secs = parse_optional(key, value)?,
            "simulation.backoff_jitter_secs" => sim.backoff_jitter_secs = parse_optional(key, value)?,
            "simulation.backoff_step_secs" => sim.backoff_step_secs = parse_secs(key, value)?,
            "simulation.telemetry" => sim.telemetry = parse_bool(key, value)?,
            "simulation.show_progress" => sim.show_progress = parse_bool(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `deadlock-lab config list` to see available keys.",
                    key
                ));
            }
        }
        sim.validate()?;
        self.simulation = sim;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "simulation.hold_time_secs",
            "simulation.deadlock_timeout_secs",
            "simulation.retry_timeout_secs",
            "simulation.workers",
            "simulation.backoff_base_secs",
            "simulation.backoff_jitter_secs",
            "simulation.backoff_step_secs",
            "simulation.telemetry",
            "simulation.show_progress",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn optional(value: Option<f64>) -> String {
    value.map_or_else(|| "auto".to_string(), |v| v.to_string())
}

fn parse_secs(key: &str, value: &str) -> anyhow::Result<f64> {
    value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

fn parse_optional(key: &str, value: &str) -> anyhow::Result<Option<f64>> {
    match value {
        "auto" | "" => Ok(None),
        _ => parse_secs(key, value).map(Some),
    }
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid {} value: {} (expected true or false)", key, value)),
    }
}
