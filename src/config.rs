use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::cluster::MemberId;
use crate::error::{AgentError, Result};
use crate::keyring::Key;

/// Real-time length of one logical tick. All protocol timers are counted in
/// these ticks, so configured durations are rounded up to the next multiple.
pub(crate) const TICK_PERIOD: Duration = Duration::from_millis(100);

const TICK_MS: u128 = TICK_PERIOD.as_millis();

/// Process-facing configuration, fed from CLI flags and/or environment
/// variables. Use [`Environment::into_config`] to obtain the validated
/// [`AgentConfig`] the agent actually runs on.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Environment {
    /// --host or HOST=
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// --port or -p or PORT=
    #[arg(short, long, env = "PORT", default_value_t = 7946)]
    pub port: u16,

    /// Hex-encoded 32-octet cluster keys, active key first. Repeatable.
    #[arg(long = "key", env = "CLUSTER_KEYS", value_delimiter = ',', required = true)]
    pub keys: Vec<String>,

    /// Cluster-wide associated data, agreed out of band by all members.
    #[arg(long, env = "CLUSTER_AAD")]
    pub aad: String,

    #[arg(long, env = "PROTOCOL_PERIOD_MS", default_value_t = 1_000)]
    pub protocol_period_ms: u64,

    #[arg(long, env = "ACK_TIMEOUT_MS", default_value_t = 300)]
    pub ack_timeout_ms: u64,

    /// Fan-out for indirect probes after a direct probe stays silent.
    #[arg(long, env = "NUM_PROXIES", default_value_t = 3)]
    pub num_proxies: usize,
}

impl Environment {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AgentError::Config(format!("invalid bind address: {e}")))
    }

    pub fn into_config(self) -> Result<AgentConfig> {
        let bind_addr = self.bind_addr()?;
        let keys = self
            .keys
            .iter()
            .map(|hex| decode_key(hex))
            .collect::<Result<Vec<_>>>()?;

        let config = AgentConfig {
            local_id: MemberId::from(bind_addr),
            bind_addr,
            protocol_period: Duration::from_millis(self.protocol_period_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            num_proxies: self.num_proxies,
            initial_sequence: 0,
            keys,
            aad: self.aad.into_bytes(),
        };
        config.validate()?;
        Ok(config)
    }
}

fn decode_key(hex: &str) -> Result<Key> {
    let hex = hex.trim();
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err(AgentError::Config(format!(
            "key must be an even-length hex string, got {:?}",
            hex
        )));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        let byte = u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|e| AgentError::Config(format!("key is not valid hex: {e}")))?;
        bytes.push(byte);
    }
    Key::from_slice(&bytes)
}

/// Validated agent configuration.
#[derive(Debug)]
pub struct AgentConfig {
    /// Identity of the local member. Must be unique in the cluster.
    pub local_id: MemberId,
    pub bind_addr: SocketAddr,
    /// Interval between successive direct probes.
    pub protocol_period: Duration,
    /// How long a probe waits for an ack. Strictly less than the period.
    pub ack_timeout: Duration,
    pub num_proxies: usize,
    /// Starting value for the probe sequence counter; non-zero only when
    /// restarting with persisted state.
    pub initial_sequence: u32,
    /// Cluster keys, active key first.
    pub keys: Vec<Key>,
    /// Cluster-wide associated data bound into every sealed datagram.
    pub aad: Vec<u8>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.protocol_period.is_zero() {
            return Err(AgentError::Config(
                "protocol_period must be positive".into(),
            ));
        }
        if self.ack_timeout.is_zero() {
            return Err(AgentError::Config("ack_timeout must be positive".into()));
        }
        if self.ack_timeout >= self.protocol_period {
            return Err(AgentError::Config(format!(
                "ack_timeout ({:?}) must be strictly less than protocol_period ({:?})",
                self.ack_timeout, self.protocol_period
            )));
        }
        if self.num_proxies == 0 {
            return Err(AgentError::Config("num_proxies must be positive".into()));
        }
        if self.keys.is_empty() {
            return Err(AgentError::EmptyKeyring);
        }
        let timing = self.timing();
        if timing.ack_timeout_ticks >= timing.protocol_period_ticks {
            return Err(AgentError::Config(format!(
                "ack_timeout and protocol_period collapse to the same {TICK_PERIOD:?} tick boundary"
            )));
        }
        Ok(())
    }

    pub(crate) fn timing(&self) -> DetectorTiming {
        DetectorTiming {
            protocol_period_ticks: to_ticks(self.protocol_period),
            ack_timeout_ticks: to_ticks(self.ack_timeout),
            num_proxies: self.num_proxies,
            initial_sequence: self.initial_sequence,
        }
    }
}

fn to_ticks(duration: Duration) -> u32 {
    (duration.as_millis().div_ceil(TICK_MS) as u32).max(1)
}

/// Tick-denominated knobs the detector state machine runs on.
#[derive(Debug, Clone)]
pub(crate) struct DetectorTiming {
    pub protocol_period_ticks: u32,
    pub ack_timeout_ticks: u32,
    pub num_proxies: usize,
    pub initial_sequence: u32,
}

#[cfg(test)]
impl Default for DetectorTiming {
    fn default() -> Self {
        Self {
            protocol_period_ticks: 10,
            ack_timeout_ticks: 3,
            num_proxies: 3,
            initial_sequence: 0,
        }
    }
}
