//! Session configuration: parses `motionbus.toml` (or an override path)
//! into a [`MotionConfig`], clamping out-of-range values to the documented
//! defaults rather than failing a session over a bad config file.

use serde::Deserialize;
use std::{fs, path::PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct MotionFile {
    #[serde(default = "MotionFile::default_max_r2")]
    pub max_r2: f32,
    #[serde(default = "MotionFile::default_min_z")]
    pub min_z: f32,
    #[serde(default = "MotionFile::default_max_z")]
    pub max_z: f32,
    #[serde(default = "MotionFile::default_max_exec_time")]
    pub max_exec_time: f32,
}

impl MotionFile {
    const fn default_max_r2() -> f32 {
        10000.0
    }
    const fn default_min_z() -> f32 {
        0.0
    }
    const fn default_max_z() -> f32 {
        300.0
    }
    const fn default_max_exec_time() -> f32 {
        1.0
    }
}

impl Default for MotionFile {
    fn default() -> Self {
        Self {
            max_r2: Self::default_max_r2(),
            min_z: Self::default_min_z(),
            max_z: Self::default_max_z(),
            max_exec_time: Self::default_max_exec_time(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct LinkFile {
    #[serde(default = "LinkFile::default_recv_buffer_capacity")]
    pub recv_buffer_capacity: usize,
}

impl LinkFile {
    const fn default_recv_buffer_capacity() -> usize {
        512
    }
}

impl Default for LinkFile {
    fn default() -> Self {
        Self {
            recv_buffer_capacity: Self::default_recv_buffer_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingFile {
    #[serde(default = "LoggingFile::default_level")]
    pub level: String,
}

impl LoggingFile {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub motion: MotionFile,
    #[serde(default)]
    pub link: LinkFile,
    #[serde(default)]
    pub logging: LoggingFile,
}

/// Effective, already-clamped session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    pub raw: Option<String>,
    pub max_r2: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub max_exec_time: f32,
    pub recv_buffer_capacity: usize,
    pub log_level: String,
}

impl Default for MotionConfig {
    fn default() -> Self {
        let motion = MotionFile::default();
        let link = LinkFile::default();
        let logging = LoggingFile::default();
        Self {
            raw: None,
            max_r2: motion.max_r2,
            min_z: motion.min_z,
            max_z: motion.max_z,
            max_exec_time: motion.max_exec_time,
            recv_buffer_capacity: link.recv_buffer_capacity,
            log_level: logging.level,
        }
    }
}

/// Best-effort config path: current working directory first, then the
/// platform config dir, falling back to a relative filename if neither
/// resolves.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("motionbus.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("motionbus").join("motionbus.toml");
    }
    PathBuf::from("motionbus.toml")
}

pub fn load_from(path: Option<PathBuf>) -> MotionConfig {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return MotionConfig::default();
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => apply_defaults(file, Some(content)),
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
            MotionConfig::default()
        }
    }
}

/// Clamp a parsed `ConfigFile` into an effective `MotionConfig`, logging
/// any correction instead of silently dropping it or aborting the session.
pub fn apply_defaults(file: ConfigFile, raw: Option<String>) -> MotionConfig {
    let defaults = MotionFile::default();
    let link_defaults = LinkFile::default();

    let max_exec_time = if file.motion.max_exec_time > 0.0 {
        file.motion.max_exec_time
    } else {
        warn!(
            target: "config",
            parsed = file.motion.max_exec_time,
            corrected = defaults.max_exec_time,
            "max_exec_time_not_positive_using_default"
        );
        defaults.max_exec_time
    };

    let recv_buffer_capacity = if file.link.recv_buffer_capacity >= 512 {
        file.link.recv_buffer_capacity
    } else {
        warn!(
            target: "config",
            parsed = file.link.recv_buffer_capacity,
            corrected = link_defaults.recv_buffer_capacity,
            "recv_buffer_capacity_below_minimum_using_default"
        );
        link_defaults.recv_buffer_capacity
    };

    MotionConfig {
        raw,
        max_r2: file.motion.max_r2,
        min_z: file.motion.min_z,
        max_z: file.motion.max_z,
        max_exec_time,
        recv_buffer_capacity,
        log_level: file.logging.level,
    }
}
