//! Configuration types.

use super::ConfigError;
use coupler_component::Params;
use coupler_types::{ComponentId, Rank};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default deadlock detection interval.
pub const DEFAULT_DEADLOCK_TIMEOUT_MS: u64 = 5_000;

/// Default watchdog polling interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default number of connection attempts per peer.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 50;

/// Default pause between connection attempts.
pub const DEFAULT_CONNECT_BACKOFF_MS: u64 = 100;

/// Execution back end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One thread per component in this process.
    #[default]
    Local,
    /// Components partitioned across cooperating processes.
    Distributed,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "threaded" => Ok(Self::Local),
            "distributed" | "mpi" => Ok(Self::Distributed),
            other => Err(format!("expected local or distributed, got '{other}'")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Distributed => f.write_str("distributed"),
        }
    }
}

/// Run-wide settings from the global section.
///
/// The raw key/value pairs are kept as well: they are what components see
/// through the `general` capability, including keys the runtime itself
/// does not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSettings {
    /// Execution back end.
    pub mode: Mode,
    /// Default clobber policy; a component's own `clobber` parameter wins.
    pub clobber: bool,
    /// Stall interval after which blocked runners are declared deadlocked.
    pub deadlock_timeout: Duration,
    /// Dispatcher polling interval.
    pub poll_interval: Duration,
    /// Listener address of every process, indexed by rank.
    pub peers: Vec<String>,
    /// Connection attempts per peer before giving up.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub connect_backoff: Duration,
    params: Params,
}

impl GlobalSettings {
    /// Interprets the raw global section.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidGlobal`] for any malformed known key.
    pub fn from_params(params: Params) -> Result<Self, ConfigError> {
        let mode = params
            .get("mode")
            .map(str::parse::<Mode>)
            .transpose()
            .map_err(|e| ConfigError::invalid_global("mode", e))?
            .unwrap_or_default();
        let clobber = params
            .get_bool("clobber")
            .map_err(|e| ConfigError::invalid_global("clobber", e.to_string()))?
            .unwrap_or(true);
        let deadlock_timeout_ms =
            millis(&params, "deadlock_timeout_ms", DEFAULT_DEADLOCK_TIMEOUT_MS)?;
        let poll_interval_ms = millis(&params, "poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::invalid_global(
                "poll_interval_ms",
                "must be greater than zero",
            ));
        }
        let connect_attempts = params
            .get_u64("connect_attempts")
            .map_err(|e| ConfigError::invalid_global("connect_attempts", e.to_string()))?
            .map_or(Ok(DEFAULT_CONNECT_ATTEMPTS), u32::try_from)
            .map_err(|e| ConfigError::invalid_global("connect_attempts", e.to_string()))?
            .max(1);
        let connect_backoff_ms =
            millis(&params, "connect_backoff_ms", DEFAULT_CONNECT_BACKOFF_MS)?;

        Ok(Self {
            mode,
            clobber,
            deadlock_timeout: Duration::from_millis(deadlock_timeout_ms),
            poll_interval: Duration::from_millis(poll_interval_ms),
            peers: params.get_list("peers"),
            connect_attempts,
            connect_backoff: Duration::from_millis(connect_backoff_ms),
            params,
        })
    }

    /// The raw global section.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Payload of the `general` capability: the raw section as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Value::Object(object)
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            clobber: true,
            deadlock_timeout: Duration::from_millis(DEFAULT_DEADLOCK_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            peers: Vec::new(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: Duration::from_millis(DEFAULT_CONNECT_BACKOFF_MS),
            params: Params::new(),
        }
    }
}

fn millis(params: &Params, key: &str, default: u64) -> Result<u64, ConfigError> {
    params
        .get_u64(key)
        .map(|v| v.unwrap_or(default))
        .map_err(|e| ConfigError::invalid_global(key, e.to_string()))
}

/// One component section.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSection {
    pub id: ComponentId,
    pub params: Params,
}

impl ComponentSection {
    pub fn new(section: &str, params: Params) -> Self {
        Self {
            id: ComponentId::from_section(section),
            params,
        }
    }
}

/// A parsed run: global settings plus components in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub global: GlobalSettings,
    pub components: Vec<ComponentSection>,
}

impl RunConfig {
    /// Number of cooperating processes.
    ///
    /// Always 1 in local mode; in distributed mode, the number of peers.
    #[must_use]
    pub fn world_size(&self) -> usize {
        match self.global.mode {
            Mode::Local => 1,
            Mode::Distributed => self.global.peers.len(),
        }
    }

    /// Places every component on a process.
    ///
    /// A component's `rank` parameter pins it; otherwise components are dealt
    /// round-robin in configuration order. Every process computes the same
    /// assignment from the same file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidGlobal`] in distributed mode without peers
    /// - [`ConfigError::InvalidAssignment`] for an unusable `rank` parameter
    pub fn assign(&self) -> Result<Vec<(Rank, &ComponentSection)>, ConfigError> {
        let world = self.world_size();
        if world == 0 {
            return Err(ConfigError::invalid_global(
                "peers",
                "distributed mode needs at least one peer address",
            ));
        }
        self.components
            .iter()
            .enumerate()
            .map(|(i, section)| {
                let rank = match section.params.get("rank") {
                    Some(raw) if self.global.mode == Mode::Distributed => {
                        let rank: usize =
                            raw.trim()
                                .parse()
                                .map_err(|_| ConfigError::InvalidAssignment {
                                    component: section.id.to_string(),
                                    message: format!("rank '{raw}' is not a process index"),
                                })?;
                        if rank >= world {
                            return Err(ConfigError::InvalidAssignment {
                                component: section.id.to_string(),
                                message: format!("rank {rank} but only {world} processes"),
                            });
                        }
                        rank
                    }
                    _ => i % world,
                };
                Ok((Rank(rank), section))
            })
            .collect()
    }

    /// Components hosted by `rank`.
    pub fn components_on(&self, rank: Rank) -> Result<Vec<&ComponentSection>, ConfigError> {
        Ok(self
            .assign()?
            .into_iter()
            .filter(|(r, _)| *r == rank)
            .map(|(_, section)| section)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().copied().collect()
    }

    #[test]
    fn defaults() {
        let global = GlobalSettings::from_params(Params::new()).expect("empty section is valid");
        assert_eq!(global.mode, Mode::Local);
        assert!(global.clobber);
        assert_eq!(global.deadlock_timeout, Duration::from_secs(5));
        assert_eq!(global, GlobalSettings::default());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Distributed".parse::<Mode>(), Ok(Mode::Distributed));
        assert_eq!(" local ".parse::<Mode>(), Ok(Mode::Local));
        assert!("cluster".parse::<Mode>().is_err());
    }

    #[test]
    fn invalid_global_values() {
        let err = GlobalSettings::from_params(params(&[("mode", "cluster")]))
            .expect_err("unknown mode");
        assert!(matches!(err, ConfigError::InvalidGlobal { ref key, .. } if key == "mode"));

        let err = GlobalSettings::from_params(params(&[("poll_interval_ms", "0")]))
            .expect_err("zero poll");
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn general_payload_keeps_unknown_keys() {
        let global =
            GlobalSettings::from_params(params(&[("clobber", "no"), ("inputdir", "/data")]))
                .expect("valid");
        assert!(!global.clobber);
        let json = global.to_json();
        assert_eq!(json["inputdir"], "/data");
        assert_eq!(json["clobber"], "no");
    }

    fn distributed(peers: &str, sections: &[(&str, &[(&str, &str)])]) -> RunConfig {
        RunConfig {
            global: GlobalSettings::from_params(params(&[
                ("mode", "distributed"),
                ("peers", peers),
            ]))
            .expect("valid"),
            components: sections
                .iter()
                .map(|(name, p)| ComponentSection::new(name, params(p)))
                .collect(),
        }
    }

    #[test]
    fn round_robin_assignment() {
        let config = distributed("a:1, b:2", &[("A", &[]), ("B", &[]), ("C", &[])]);
        let ranks: Vec<usize> = config
            .assign()
            .expect("valid")
            .iter()
            .map(|(r, _)| r.index())
            .collect();
        assert_eq!(ranks, vec![0, 1, 0]);
    }

    #[test]
    fn rank_parameter_pins_component() {
        let config = distributed("a:1, b:2", &[("A", &[("rank", "1")]), ("B", &[])]);
        let on_one: Vec<String> = config
            .components_on(Rank(1))
            .expect("valid")
            .iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(on_one, vec!["A", "B"]);
    }

    #[test]
    fn rank_out_of_range() {
        let config = distributed("a:1", &[("A", &[("rank", "3")])]);
        assert!(matches!(
            config.assign(),
            Err(ConfigError::InvalidAssignment { .. })
        ));
    }

    #[test]
    fn distributed_without_peers() {
        let config = distributed("", &[("A", &[])]);
        assert!(matches!(
            config.assign(),
            Err(ConfigError::InvalidGlobal { .. })
        ));
    }

    #[test]
    fn local_mode_ignores_rank() {
        let config = RunConfig {
            global: GlobalSettings::default(),
            components: vec![ComponentSection::new("A", params(&[("rank", "7")]))],
        };
        let assigned = config.assign().expect("local ignores rank");
        assert_eq!(assigned[0].0, Rank::COORDINATOR);
    }
}
