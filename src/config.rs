use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::audio::codec::StreamParams;
use crate::audio::rate::RateAdapterKind;
use crate::audio::volume::MUTE_DB;
use crate::rtp::jitter::{JitterBufferConfig, MAX_CAPACITY as MAX_BUFFER_FRAMES};
use crate::session::SessionConfig;

/// ALAC parameters most senders announce
pub const DEFAULT_FMTP: &str = "96 352 0 16 40 10 14 2 255 0 0 44100";

/// Where decoded audio goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Raw s16le on stdout
    Stdout,
    File(PathBuf),
    /// Discard at real-time pace
    Null,
}

impl OutputTarget {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "-" => OutputTarget::Stdout,
            "null" | "none" => OutputTarget::Null,
            path => OutputTarget::File(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Local data port for audio packets
    pub port: u16,

    // Sender's control channel (host:port), where resend requests go
    pub control_addr: String,

    // Jitter buffer sizing, in packets
    pub buffer_frames: usize,
    pub start_fill: usize,

    // Stream format as announced by the sender
    pub fmtp: String,

    // Drift correction
    pub rate_adapter: RateAdapterKind,
    pub max_rate_deviation: f64,

    // Initial volume in AirPlay dB (0 = full, -144 = mute)
    pub volume_db: f64,

    pub output: OutputTarget,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            port: get("AIRDAC_PORT")
                .unwrap_or_else(|| "6000".to_string())
                .parse()
                .context("AIRDAC_PORT must be a valid port number")?,

            control_addr: get("AIRDAC_CONTROL_ADDR")
                .filter(|s| !s.trim().is_empty())
                .context("AIRDAC_CONTROL_ADDR not set")?,

            buffer_frames: get("AIRDAC_BUFFER_FRAMES")
                .unwrap_or_else(|| "512".to_string())
                .parse()
                .context("AIRDAC_BUFFER_FRAMES must be a number")?,
            start_fill: get("AIRDAC_START_FILL")
                .unwrap_or_else(|| "220".to_string())
                .parse()
                .context("AIRDAC_START_FILL must be a number")?,

            fmtp: get("AIRDAC_FMTP").unwrap_or_else(|| DEFAULT_FMTP.to_string()),

            rate_adapter: match get("AIRDAC_RATE_ADAPTER") {
                Some(s) => s.parse::<RateAdapterKind>().context("AIRDAC_RATE_ADAPTER must be 'stuffing' or 'resample'")?,
                None => RateAdapterKind::default(),
            },
            max_rate_deviation: get("AIRDAC_MAX_RATE_DEVIATION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.02),

            volume_db: get("AIRDAC_VOLUME_DB")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),

            output: get("AIRDAC_OUTPUT")
                .map(|s| OutputTarget::parse(&s))
                .unwrap_or(OutputTarget::Stdout),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.control_socket_addr().is_err() {
            errors.push(format!(
                "Cannot resolve AIRDAC_CONTROL_ADDR '{}'. Expected host:port.",
                self.control_addr
            ));
        }

        if !self.buffer_frames.is_power_of_two() || self.buffer_frames > MAX_BUFFER_FRAMES {
            errors.push(format!(
                "AIRDAC_BUFFER_FRAMES={} must be a power of two no larger than {}.",
                self.buffer_frames, MAX_BUFFER_FRAMES
            ));
        }

        if self.start_fill == 0 {
            errors.push("AIRDAC_START_FILL must be greater than 0.".to_string());
        } else if self.start_fill > self.buffer_frames {
            errors.push(format!(
                "AIRDAC_START_FILL={} exceeds AIRDAC_BUFFER_FRAMES={}.",
                self.start_fill, self.buffer_frames
            ));
        }

        if let Err(e) = StreamParams::from_fmtp(&self.fmtp) {
            errors.push(format!("AIRDAC_FMTP '{}' rejected: {}.", self.fmtp, e));
        }

        if !(self.max_rate_deviation > 0.0 && self.max_rate_deviation <= 0.1) {
            errors.push(format!(
                "AIRDAC_MAX_RATE_DEVIATION={} must be in (0, 0.1].",
                self.max_rate_deviation
            ));
        }

        if !(MUTE_DB..=0.0).contains(&self.volume_db) {
            errors.push(format!(
                "AIRDAC_VOLUME_DB={} must be between {} and 0.",
                self.volume_db, MUTE_DB
            ));
        }

        if let OutputTarget::File(path) = &self.output {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            if parent.is_some_and(|p| !p.is_dir()) {
                errors.push(format!(
                    "AIRDAC_OUTPUT directory for '{}' does not exist.",
                    path.display()
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Resolve the sender's control channel
    pub fn control_socket_addr(&self) -> Result<SocketAddr> {
        self.control_addr
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve control address {}", self.control_addr))?
            .next()
            .with_context(|| format!("No address for {}", self.control_addr))
    }

    /// Everything a session needs at start
    pub fn session_config(&self) -> Result<SessionConfig> {
        let params = StreamParams::from_fmtp(&self.fmtp)
            .with_context(|| format!("Invalid AIRDAC_FMTP '{}'", self.fmtp))?;
        Ok(SessionConfig {
            buffer: JitterBufferConfig {
                capacity: self.buffer_frames,
                start_fill: self.start_fill,
                params,
            },
            rate_adapter: self.rate_adapter,
            max_rate_deviation: self.max_rate_deviation,
        })
    }
}
