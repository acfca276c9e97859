//! Configuration management for the mining node
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON) with validation and defaults.

use crate::difficulty::{MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::node::NodeSettings;
use crate::types::MinerId;
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Plain,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete configuration for the mining node
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "powchain",
    version = env!("CARGO_PKG_VERSION"),
    about = "Proof-of-work mining node",
    long_about = "Seals pooled transactions into a hash-linked chain of proof-of-work blocks"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(default, skip_serializing)]
    pub info: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default, skip_serializing)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(default, skip_serializing)]
    pub config_file: Option<PathBuf>,

    /// Initial difficulty (1-255, leading zero bits of the target)
    #[arg(short = 'd', long, env = "POWCHAIN_DIFFICULTY", default_value = "16")]
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    /// Number of search threads (0 = one per CPU)
    #[arg(short = 'c', long, default_value = "4")]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Time budget for a single block search (e.g. "30s", "2m")
    #[arg(long, default_value = "30s")]
    #[serde(default = "default_mining_timeout")]
    pub mining_timeout: String,

    /// Pause between mining attempts
    #[arg(long, default_value = "2s")]
    #[serde(default = "default_block_interval")]
    pub block_interval: String,

    /// Expected time per block when retargeting
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_target_block_time")]
    pub target_block_time: String,

    /// Adjust difficulty after every sealed block
    #[arg(long)]
    #[serde(default)]
    pub retarget: bool,

    /// Lower difficulty by one after a search timeout
    #[arg(long)]
    #[serde(default)]
    pub relax_on_timeout: bool,

    /// Miner identifier recorded in sealed blocks
    #[arg(short = 'm', long, env = "POWCHAIN_MINER")]
    pub miner: Option<String>,

    /// Directory for the JSON block store (in-memory if unset)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Synthetic transactions submitted per tick (0 disables)
    #[arg(long, default_value = "0")]
    #[serde(default)]
    pub demo_transactions: usize,

    /// Stop after sealing this many blocks
    #[arg(long)]
    pub max_blocks: Option<u64>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Config {
    /// Parse the command line, merge the config file if given, and validate
    pub async fn load() -> Result<Self> {
        let mut config = Self::parse();

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config
    ///
    /// Optional fields set on the command line win. Defaulted fields take the
    /// file's value unless the command line moved them off their default.
    pub fn merge_with_file(mut self, file: Self) -> Self {
        if self.miner.is_none() {
            self.miner = file.miner;
        }
        if self.data_dir.is_none() {
            self.data_dir = file.data_dir;
        }
        if self.max_blocks.is_none() {
            self.max_blocks = file.max_blocks;
        }

        if self.difficulty == default_difficulty() {
            self.difficulty = file.difficulty;
        }
        if self.workers == default_workers() {
            self.workers = file.workers;
        }
        if self.mining_timeout == default_mining_timeout() {
            self.mining_timeout = file.mining_timeout;
        }
        if self.block_interval == default_block_interval() {
            self.block_interval = file.block_interval;
        }
        if self.target_block_time == default_target_block_time() {
            self.target_block_time = file.target_block_time;
        }
        if self.demo_transactions == 0 {
            self.demo_transactions = file.demo_transactions;
        }
        if self.log_level == default_log_level() {
            self.log_level = file.log_level;
        }
        if self.log_format == default_log_format() {
            self.log_format = file.log_format;
        }
        self.retarget |= file.retarget;
        self.relax_on_timeout |= file.relax_on_timeout;

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(Error::config(format!(
                "difficulty must be {}-{}, got {}",
                MIN_DIFFICULTY, MAX_DIFFICULTY, self.difficulty
            )));
        }

        let timeout = self.mining_timeout_duration()?;
        if timeout.is_zero() {
            return Err(Error::config("mining timeout must be greater than 0"));
        }
        self.block_interval_duration()?;
        if self.target_block_time_duration()?.is_zero() {
            return Err(Error::config("target block time must be greater than 0"));
        }

        self.miner_id()?;

        if self.max_blocks == Some(0) {
            return Err(Error::config("max blocks must be greater than 0"));
        }

        Ok(())
    }

    /// Get mining timeout duration
    pub fn mining_timeout_duration(&self) -> Result<Duration> {
        parse_duration("mining timeout", &self.mining_timeout)
    }

    /// Get block interval duration
    pub fn block_interval_duration(&self) -> Result<Duration> {
        parse_duration("block interval", &self.block_interval)
    }

    /// Get target block time duration
    pub fn target_block_time_duration(&self) -> Result<Duration> {
        parse_duration("target block time", &self.target_block_time)
    }

    /// Configured miner id, or the anonymous one
    pub fn miner_id(&self) -> Result<MinerId> {
        match &self.miner {
            Some(id) => MinerId::new(id.clone()),
            None => Ok(MinerId::anonymous()),
        }
    }

    /// Settings for the mining loop
    pub fn node_settings(&self) -> Result<NodeSettings> {
        Ok(NodeSettings {
            difficulty: self.difficulty,
            mining_timeout: self.mining_timeout_duration()?,
            block_interval: self.block_interval_duration()?,
            target_block_time: self.target_block_time_duration()?,
            retarget: self.retarget,
            relax_on_timeout: self.relax_on_timeout,
            demo_transactions: self.demo_transactions,
            max_blocks: self.max_blocks,
        })
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("invalid {} '{}': {}", name, value, e)))
}

// Default value functions for serde
fn default_difficulty() -> u32 { 16 }
fn default_workers() -> usize { crate::worker::DEFAULT_WORKERS }
fn default_mining_timeout() -> String { "30s".to_string() }
fn default_block_interval() -> String { "2s".to_string() }
fn default_target_block_time() -> String { "10s".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
