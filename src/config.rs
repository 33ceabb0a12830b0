use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};
use crate::image_processor::CompressOptions;
use crate::security::InputValidator;

const APP_DIR_NAME: &str = "photo-uploader";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upload_endpoint: String,
    pub max_width: u32,
    pub max_height: u32,
    pub quality: f32,
    pub request_timeout_secs: u64,
    pub chunk_size_bytes: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_endpoint: "http://localhost:3333/uploads".to_string(),
            max_width: 1000,
            max_height: 1000,
            quality: 0.8,
            request_timeout_secs: 120,
            chunk_size_bytes: 64 * 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn compress_options(&self) -> CompressOptions {
        CompressOptions {
            max_width: self.max_width,
            max_height: self.max_height,
            quality: self.quality,
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Load the user config, writing defaults on first run.
pub fn load_config() -> AppResult<Config> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        load_config_from(&config_path)
    } else {
        let default_config = Config::default();
        save_config_to(&default_config, &config_path)?;
        Ok(default_config)
    }
}

pub fn load_config_from(config_path: &Path) -> AppResult<Config> {
    if !config_path.exists() {
        log::debug!("No config at {}, using defaults", config_path.display());
        return Ok(Config::default());
    }

    let config_str = fs::read_to_string(config_path)?;
    let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        log::warn!("Failed to parse config file: {}. Using defaults.", e);
        Config::default()
    });

    // Not validated here: callers merge overrides first, then call validate_config
    Ok(config)
}

pub fn save_config(config: &Config) -> AppResult<()> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &Config, config_path: &Path) -> AppResult<()> {
    validate_config(config)?;

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.upload_endpoint)?;
    InputValidator::validate_compression_settings(config.max_width, config.max_height, config.quality)?;

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be at least 1 second"));
    }

    if config.chunk_size_bytes < 1024 {
        return Err(AppError::validation("chunk_size_bytes", "Must be at least 1024 bytes"));
    }

    // Validate log level
    let valid_log_levels = ["off", "error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}
