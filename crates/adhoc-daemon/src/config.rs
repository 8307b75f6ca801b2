//! The static key/value configuration block. No external format is implied by the protocol this
//! daemon speaks, so the loader is a hand-rolled `KEY=VALUE` line parser rather than a pull in of
//! a generic format crate.

use std::{
    collections::HashMap,
    net::IpAddr,
    path::Path,
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected KEY=VALUE, got {content:?}")]
    MalformedLine { line: usize, content: String },
    #[error("missing required key {0}")]
    MissingKey(&'static str),
    #[error("key {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Validated daemon configuration. Every field here corresponds to one recognized config key.
#[derive(Debug, Clone)]
pub struct Config {
    pub physical_iface: String,
    pub tun_iface: String,
    pub tun_ipv4: Option<IpAddr>,
    pub tun_ipv6: Option<IpAddr>,

    pub hello_interval: Duration,
    pub neighbor_ttl: Duration,

    pub alpha: f32,
    pub tau: f32,
    pub v_init: f32,

    pub arq_retry_interval: Duration,
    pub arq_max_retries: u32,
    pub arq_fail_reward: f32,

    pub reward_wait: Duration,
    pub hop_reward_timeout: f32,

    pub pending_queue_max: usize,
    pub rreq_deadline: Duration,

    pub forward_progress_reward: f32,
    pub ack_reward: f32,

    pub ipc_socket_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            physical_iface: "wlan0".to_owned(),
            tun_iface: "adhoc0".to_owned(),
            tun_ipv4: None,
            tun_ipv6: None,
            hello_interval: Duration::from_secs(2),
            neighbor_ttl: Duration::from_secs(6),
            alpha: 0.3,
            tau: 0.5,
            v_init: 0.0,
            arq_retry_interval: Duration::from_millis(500),
            arq_max_retries: 5,
            arq_fail_reward: -5.0,
            reward_wait: Duration::from_secs(2),
            hop_reward_timeout: -0.2,
            pending_queue_max: 64,
            rreq_deadline: Duration::from_secs(3),
            forward_progress_reward: 0.5,
            ack_reward: 1.0,
            ipc_socket_path: "/run/adhocd.sock".to_owned(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut raw = HashMap::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::MalformedLine {
                line: idx + 1,
                content: line.to_owned(),
            })?;
            raw.insert(key.trim().to_owned(), value.trim().to_owned());
        }

        let mut config = Config::default();

        if let Some(v) = raw.get("PHYSICAL_IFACE") {
            config.physical_iface = v.clone();
        } else {
            return Err(ConfigError::MissingKey("PHYSICAL_IFACE"));
        }
        if let Some(v) = raw.get("TUN_IFACE") {
            config.tun_iface = v.clone();
        }
        if let Some(v) = raw.get("TUN_IPV4") {
            config.tun_ipv4 = Some(parse_value("TUN_IPV4", v, |s| s.parse::<IpAddr>().ok())?);
        }
        if let Some(v) = raw.get("TUN_IPV6") {
            config.tun_ipv6 = Some(parse_value("TUN_IPV6", v, |s| s.parse::<IpAddr>().ok())?);
        }
        if let Some(v) = raw.get("HELLO_INTERVAL") {
            config.hello_interval = Duration::from_secs_f32(parse_value("HELLO_INTERVAL", v, |s| s.parse().ok())?);
        }
        if let Some(v) = raw.get("NEIGHBOR_TTL") {
            config.neighbor_ttl = Duration::from_secs_f32(parse_value("NEIGHBOR_TTL", v, |s| s.parse().ok())?);
        }
        if let Some(v) = raw.get("ALPHA") {
            config.alpha = parse_range("ALPHA", v, 0.0, 1.0)?;
        }
        if let Some(v) = raw.get("TAU") {
            let tau: f32 = parse_value("TAU", v, |s| s.parse().ok())?;
            if tau <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "TAU",
                    value: v.clone(),
                    reason: "must be > 0".to_owned(),
                });
            }
            config.tau = tau;
        }
        if let Some(v) = raw.get("V_INIT") {
            config.v_init = parse_value("V_INIT", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("ARQ_RETRY_INTERVAL") {
            config.arq_retry_interval = Duration::from_secs_f32(parse_value("ARQ_RETRY_INTERVAL", v, |s| s.parse().ok())?);
        }
        if let Some(v) = raw.get("ARQ_MAX_RETRIES") {
            config.arq_max_retries = parse_value("ARQ_MAX_RETRIES", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("ARQ_FAIL_REWARD") {
            config.arq_fail_reward = parse_value("ARQ_FAIL_REWARD", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("REWARD_WAIT") {
            config.reward_wait = Duration::from_secs_f32(parse_value("REWARD_WAIT", v, |s| s.parse().ok())?);
        }
        if let Some(v) = raw.get("HOP_REWARD_TIMEOUT") {
            config.hop_reward_timeout = parse_value("HOP_REWARD_TIMEOUT", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("PENDING_QUEUE_MAX") {
            config.pending_queue_max = parse_value("PENDING_QUEUE_MAX", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("RREQ_DEADLINE") {
            config.rreq_deadline = Duration::from_secs_f32(parse_value("RREQ_DEADLINE", v, |s| s.parse().ok())?);
        }
        if let Some(v) = raw.get("FORWARD_PROGRESS_REWARD") {
            config.forward_progress_reward = parse_value("FORWARD_PROGRESS_REWARD", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("ACK_REWARD") {
            config.ack_reward = parse_value("ACK_REWARD", v, |s| s.parse().ok())?;
        }
        if let Some(v) = raw.get("IPC_SOCKET_PATH") {
            config.ipc_socket_path = v.clone();
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &'static str, value: &str, f: impl Fn(&str) -> Option<T>) -> Result<T, ConfigError> {
    f(value).ok_or_else(|| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: "could not parse".to_owned(),
    })
}

fn parse_range(key: &'static str, value: &str, min: f32, max: f32) -> Result<f32, ConfigError> {
    let parsed: f32 = parse_value(key, value, |s| s.parse().ok())?;
    if parsed < min || parsed > max {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: format!("must be within [{min}, {max}]"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = Config::parse("PHYSICAL_IFACE=wlan0\n").unwrap();
        assert_eq!(config.physical_iface, "wlan0");
        assert_eq!(config.tun_iface, "adhoc0");
    }

    #[test]
    fn rejects_missing_physical_iface() {
        assert!(matches!(Config::parse(""), Err(ConfigError::MissingKey("PHYSICAL_IFACE"))));
    }

    #[test]
    fn rejects_alpha_out_of_range() {
        let err = Config::parse("PHYSICAL_IFACE=wlan0\nALPHA=1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ALPHA", .. }));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let config = Config::parse("# a comment\n\nPHYSICAL_IFACE=wlan0\n").unwrap();
        assert_eq!(config.physical_iface, "wlan0");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(matches!(Config::parse("not-a-pair"), Err(ConfigError::MalformedLine { line: 1, .. })));
    }
}
