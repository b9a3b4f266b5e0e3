//! Extension pour intégrer le lecteur live dans pmoconfig
//!
//! This module provides the `LiveConfigExt` trait, which adds the `stream.*`
//! settings to `pmoconfig::Config`:
//!
//! - Channel page resolved into a stream
//! - Resolver and player programs
//! - Retry policy
//!
//! Getters persist their default value when the key is missing, so a fresh
//! `config.yaml` documents every setting.
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmolive::LiveConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! println!("Channel: {}", config.get_live_channel_url()?);
//! config.set_live_max_retries(5)?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::player::{
    DEFAULT_CHANNEL_URL, DEFAULT_FORMAT_SELECTOR, DEFAULT_PLAYER_PROGRAM,
    DEFAULT_RESOLVER_PROGRAM, PlayerSettings,
};
use crate::retry::{
    DEFAULT_BASE_DELAY_SECS, DEFAULT_INCREMENT_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_STABLE_AFTER_SECS, RetryPolicy,
};

const CHANNEL_URL: &[&str] = &["stream", "channel_url"];
const RESOLVER_PROGRAM: &[&str] = &["stream", "resolver", "program"];
const RESOLVER_FORMAT: &[&str] = &["stream", "resolver", "format"];
const PLAYER_PROGRAM: &[&str] = &["stream", "player", "program"];
const PLAYER_EXTRA_ARGS: &[&str] = &["stream", "player", "extra_args"];
const RETRY_MAX: &[&str] = &["stream", "retry", "max_retries"];
const RETRY_BASE_DELAY: &[&str] = &["stream", "retry", "base_delay_secs"];
const RETRY_INCREMENT: &[&str] = &["stream", "retry", "increment_secs"];
const RETRY_STABLE_AFTER: &[&str] = &["stream", "retry", "stable_after_secs"];

/// Trait d'extension pour gérer la configuration du flux live dans pmoconfig
pub trait LiveConfigExt {
    // ========================================================================
    // Stream source
    // ========================================================================

    /// Channel page handed to the resolver
    fn get_live_channel_url(&self) -> Result<String>;
    fn set_live_channel_url(&self, url: &str) -> Result<()>;

    /// Resolver binary (default: `yt-dlp`)
    fn get_live_resolver_program(&self) -> Result<String>;
    fn set_live_resolver_program(&self, program: &str) -> Result<()>;

    /// Resolver format selector (default: `ba/b`)
    fn get_live_resolver_format(&self) -> Result<String>;
    fn set_live_resolver_format(&self, format: &str) -> Result<()>;

    // ========================================================================
    // Player
    // ========================================================================

    /// Player binary (default: `mpv`)
    fn get_live_player_program(&self) -> Result<String>;
    fn set_live_player_program(&self, program: &str) -> Result<()>;

    /// Arguments appended after the fixed player flags
    fn get_live_player_extra_args(&self) -> Result<Vec<String>>;
    fn set_live_player_extra_args(&self, args: &[String]) -> Result<()>;

    // ========================================================================
    // Retry policy
    // ========================================================================

    fn get_live_max_retries(&self) -> Result<u32>;
    fn set_live_max_retries(&self, retries: u32) -> Result<()>;

    fn get_live_retry_base_delay_secs(&self) -> Result<u64>;
    fn set_live_retry_base_delay_secs(&self, secs: u64) -> Result<()>;

    fn get_live_retry_increment_secs(&self) -> Result<u64>;
    fn set_live_retry_increment_secs(&self, secs: u64) -> Result<()>;

    fn get_live_retry_stable_after_secs(&self) -> Result<u64>;
    fn set_live_retry_stable_after_secs(&self, secs: u64) -> Result<()>;

    // ========================================================================
    // Aggregates
    // ========================================================================

    fn get_player_settings(&self) -> Result<PlayerSettings> {
        Ok(PlayerSettings {
            channel_url: self.get_live_channel_url()?,
            resolver_program: self.get_live_resolver_program()?,
            format_selector: self.get_live_resolver_format()?,
            player_program: self.get_live_player_program()?,
            player_extra_args: self.get_live_player_extra_args()?,
        })
    }

    fn get_retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.get_live_max_retries()?,
            base_delay: Duration::from_secs(self.get_live_retry_base_delay_secs()?),
            increment: Duration::from_secs(self.get_live_retry_increment_secs()?),
            stable_after: Duration::from_secs(self.get_live_retry_stable_after_secs()?),
        })
    }
}

fn get_string(config: &Config, path: &[&str], default: &str) -> Result<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => {
            config.set_value(path, Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}

fn get_u64(config: &Config, path: &[&str], default: u64) -> Result<u64> {
    match config.get_value(path) {
        Ok(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64().unwrap_or(default)),
        _ => {
            set_u64(config, path, default)?;
            Ok(default)
        }
    }
}

fn set_u64(config: &Config, path: &[&str], value: u64) -> Result<()> {
    config.set_value(path, Value::Number(Number::from(value)))
}

impl LiveConfigExt for Config {
    fn get_live_channel_url(&self) -> Result<String> {
        get_string(self, CHANNEL_URL, DEFAULT_CHANNEL_URL)
    }

    fn set_live_channel_url(&self, url: &str) -> Result<()> {
        self.set_value(CHANNEL_URL, Value::String(url.to_string()))
    }

    fn get_live_resolver_program(&self) -> Result<String> {
        get_string(self, RESOLVER_PROGRAM, DEFAULT_RESOLVER_PROGRAM)
    }

    fn set_live_resolver_program(&self, program: &str) -> Result<()> {
        self.set_value(RESOLVER_PROGRAM, Value::String(program.to_string()))
    }

    fn get_live_resolver_format(&self) -> Result<String> {
        get_string(self, RESOLVER_FORMAT, DEFAULT_FORMAT_SELECTOR)
    }

    fn set_live_resolver_format(&self, format: &str) -> Result<()> {
        self.set_value(RESOLVER_FORMAT, Value::String(format.to_string()))
    }

    fn get_live_player_program(&self) -> Result<String> {
        get_string(self, PLAYER_PROGRAM, DEFAULT_PLAYER_PROGRAM)
    }

    fn set_live_player_program(&self, program: &str) -> Result<()> {
        self.set_value(PLAYER_PROGRAM, Value::String(program.to_string()))
    }

    fn get_live_player_extra_args(&self) -> Result<Vec<String>> {
        match self.get_value(PLAYER_EXTRA_ARGS) {
            Ok(Value::Sequence(items)) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect()),
            _ => {
                self.set_live_player_extra_args(&[])?;
                Ok(Vec::new())
            }
        }
    }

    fn set_live_player_extra_args(&self, args: &[String]) -> Result<()> {
        let items = args.iter().cloned().map(Value::String).collect();
        self.set_value(PLAYER_EXTRA_ARGS, Value::Sequence(items))
    }

    fn get_live_max_retries(&self) -> Result<u32> {
        let retries = get_u64(self, RETRY_MAX, DEFAULT_MAX_RETRIES as u64)?;
        Ok(u32::try_from(retries).unwrap_or(u32::MAX))
    }

    fn set_live_max_retries(&self, retries: u32) -> Result<()> {
        set_u64(self, RETRY_MAX, retries as u64)
    }

    fn get_live_retry_base_delay_secs(&self) -> Result<u64> {
        get_u64(self, RETRY_BASE_DELAY, DEFAULT_BASE_DELAY_SECS)
    }

    fn set_live_retry_base_delay_secs(&self, secs: u64) -> Result<()> {
        set_u64(self, RETRY_BASE_DELAY, secs)
    }

    fn get_live_retry_increment_secs(&self) -> Result<u64> {
        get_u64(self, RETRY_INCREMENT, DEFAULT_INCREMENT_SECS)
    }

    fn set_live_retry_increment_secs(&self, secs: u64) -> Result<()> {
        set_u64(self, RETRY_INCREMENT, secs)
    }

    fn get_live_retry_stable_after_secs(&self) -> Result<u64> {
        get_u64(self, RETRY_STABLE_AFTER, DEFAULT_STABLE_AFTER_SECS)
    }

    fn set_live_retry_stable_after_secs(&self, secs: u64) -> Result<()> {
        set_u64(self, RETRY_STABLE_AFTER, secs)
    }
}
