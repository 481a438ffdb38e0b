//! Palisade: a SWIM-style cluster membership agent.
//!
//! Every node runs one [`Agent`]. It probes one peer per protocol period,
//! escalates silent peers through suspicion to faulty, disseminates
//! membership changes by piggybacking them on probe traffic, and seals every
//! datagram with AES-256-GCM under a rotating ring of shared keys.
//!
//! Internally the agent is three tasks around one sans-io state machine: a
//! scheduling task that turns real time into logical ticks, a transport task
//! that owns the UDP socket and the keyring framing, and the detector actor
//! that owns all protocol state behind a single mailbox.

mod cluster;
mod config;
mod error;
mod keyring;
mod schedulers;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cluster::actor::DetectorActor;
use crate::cluster::messages::DetectorCommand;
use crate::cluster::transport::TransportLayer;
use crate::schedulers::actor::run_scheduling_actor;

pub use crate::cluster::{MemberId, MemberRecord, MemberStatus, MembershipEvent, TransportStats};
pub use crate::config::{AgentConfig, Environment};
pub use crate::error::{AgentError, Result};
pub use crate::keyring::{Key, Keyring};

const CHANNEL_DEPTH: usize = 256;

/// Handle to a running membership agent.
///
/// Dropping the handle does not stop the agent; call [`Agent::shutdown`]
/// for an orderly exit.
#[derive(Debug)]
pub struct Agent {
    local_id: MemberId,
    local_addr: SocketAddr,
    command_tx: mpsc::Sender<DetectorCommand>,
    transport_stats: Arc<TransportStats>,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Validate `config`, bind the transport, and start the protocol tasks.
    ///
    /// Membership events are delivered to `events` at least once; consumers
    /// must be idempotent. This is the only place configuration errors can
    /// surface — after spawn the agent never raises.
    pub async fn spawn(
        config: AgentConfig,
        events: mpsc::UnboundedSender<MembershipEvent>,
    ) -> Result<Agent> {
        config.validate()?;
        let timing = config.timing();
        let keyring = Arc::new(Keyring::new(config.keys, config.aad)?);

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (timer_tx, timer_rx) = mpsc::channel(CHANNEL_DEPTH);

        let transport =
            TransportLayer::bind(config.bind_addr, keyring, command_tx.clone(), outbound_rx)
                .await?;
        let transport_stats = transport.stats();
        // With port 0 the socket decides; the table must carry the real one.
        let local_addr = transport.local_addr()?;

        let actor = DetectorActor::new(
            config.local_id.clone(),
            local_addr,
            timing.clone(),
            command_rx,
            outbound_tx,
            timer_tx,
            events,
        );

        let tasks = vec![
            tokio::spawn(run_scheduling_actor(
                crate::config::TICK_PERIOD,
                timing.protocol_period_ticks,
                command_tx.clone(),
                timer_rx,
            )),
            tokio::spawn(actor.run()),
            tokio::spawn(transport.run()),
        ];

        tracing::info!(local = %config.local_id, %local_addr, "membership agent started");

        Ok(Agent {
            local_id: config.local_id,
            local_addr,
            command_tx,
            transport_stats,
            tasks,
        })
    }

    /// The configured identity of this node.
    pub fn local_member(&self) -> &MemberId {
        &self.local_id
    }

    /// The address the transport actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of all known non-local members.
    pub async fn members(&self) -> Result<Vec<MemberRecord>> {
        let (reply, answer) = oneshot::channel();
        self.command_tx
            .send(DetectorCommand::Members { reply })
            .await
            .map_err(|_| AgentError::Terminated)?;
        answer.await.map_err(|_| AgentError::Terminated)
    }

    /// Inject an external alive report, e.g. from a bootstrap oracle.
    pub async fn report_alive(
        &self,
        member: MemberId,
        addr: SocketAddr,
        incarnation: u64,
    ) -> Result<()> {
        self.command_tx
            .send(DetectorCommand::ReportAlive {
                member,
                addr,
                incarnation,
            })
            .await
            .map_err(|_| AgentError::Terminated)
    }

    /// Datagram drop counters maintained by the transport.
    pub fn transport_stats(&self) -> &TransportStats {
        &self.transport_stats
    }

    /// Cooperative shutdown: stop probing, drop outstanding timers, close
    /// the socket, and discard the keyring.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(DetectorCommand::Shutdown).await;
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        tracing::info!(local = %self.local_id, "membership agent stopped");
    }
}
