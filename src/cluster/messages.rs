use std::net::SocketAddr;

use bincode::{Decode, Encode};
use tokio::sync::oneshot;

use crate::cluster::member::{MemberId, MemberRecord};
use crate::schedulers::timer::ProtocolTimer;

/// The wire format: what a datagram contains once the keyring has opened it.
/// Variant order is the tag and must stay stable across the cluster.
#[derive(Clone, Debug, Encode, Decode)]
pub(crate) enum Packet {
    Ping {
        seq: u32,
        origin: MemberId,
        origin_incarnation: u64,
        /// The incarnation the prober believes the target holds.
        target_incarnation: u64,
        gossip: Vec<MemberRecord>,
    },
    Ack {
        seq: u32,
        origin: MemberId,
        incarnation: u64,
        gossip: Vec<MemberRecord>,
    },
    PingReq {
        seq: u32,
        origin: MemberId,
        origin_incarnation: u64,
        target: MemberId,
        target_addr: SocketAddr,
        gossip: Vec<MemberRecord>,
    },
    /// A proxy's relayed probe timed out. Advisory only.
    Nack { seq: u32 },
}

impl Packet {
    pub(crate) fn gossip(&self) -> &[MemberRecord] {
        match self {
            Packet::Ping { gossip, .. }
            | Packet::Ack { gossip, .. }
            | Packet::PingReq { gossip, .. } => gossip,
            Packet::Nack { .. } => &[],
        }
    }
}

/// Everything that can land in the detector actor's mailbox.
#[derive(Debug)]
pub(crate) enum DetectorCommand {
    /// From the transport.
    PacketReceived { src: SocketAddr, packet: Packet },
    /// From the scheduling actor.
    Timeout(TimeoutEvent),
    /// External alive report, e.g. from a bootstrap oracle.
    ReportAlive {
        member: MemberId,
        addr: SocketAddr,
        incarnation: u64,
    },
    /// Membership snapshot query.
    Members {
        reply: oneshot::Sender<Vec<MemberRecord>>,
    },
    /// Cooperative shutdown; the actor drains and exits.
    Shutdown,
}

impl From<TimeoutEvent> for DetectorCommand {
    fn from(event: TimeoutEvent) -> Self {
        DetectorCommand::Timeout(event)
    }
}

/// Timer callbacks delivered back to the detector.
#[derive(Debug, Default)]
pub(crate) enum TimeoutEvent {
    #[default]
    ProtocolPeriodElapsed,
    TimerExpired {
        id: u32,
        phase: ProbePhase,
        member: Option<MemberId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbePhase {
    /// Waiting for a direct ack; expiry fans out ping-reqs.
    DirectAck,
    /// Waiting for the ack of a probe relayed on someone else's behalf;
    /// expiry sends a nack back to the origin.
    RelayAck,
    /// The suspicion window; expiry promotes the suspect to faulty.
    Suspicion,
    /// Grace period after faulty; expiry evicts the member.
    Eviction,
}

/// Outbound command from the state machine to the transport.
#[derive(Debug)]
pub(crate) struct OutboundPacket {
    pub target: SocketAddr,
    packet: Packet,
}

impl OutboundPacket {
    pub(crate) fn new(target: SocketAddr, packet: Packet) -> Self {
        OutboundPacket { target, packet }
    }

    pub(crate) fn packet(&self) -> &Packet {
        &self.packet
    }
}

/// One armed countdown in the timer wheel.
#[derive(Debug)]
pub(crate) struct ProbeTimer {
    member: Option<MemberId>,
    phase: ProbePhase,
    ticks_remaining: u32,
}

impl ProtocolTimer for ProbeTimer {
    type Callback = TimeoutEvent;

    fn tick(&mut self) -> u32 {
        self.ticks_remaining -= 1;
        self.ticks_remaining
    }

    fn expire(self, id: u32) -> TimeoutEvent {
        TimeoutEvent::TimerExpired {
            id,
            phase: self.phase,
            member: self.member,
        }
    }
}

impl ProbeTimer {
    pub(crate) fn direct_ack(target: MemberId, ticks: u32) -> Self {
        Self {
            member: Some(target),
            phase: ProbePhase::DirectAck,
            ticks_remaining: ticks,
        }
    }

    pub(crate) fn relay_ack(ticks: u32) -> Self {
        Self {
            member: None,
            phase: ProbePhase::RelayAck,
            ticks_remaining: ticks,
        }
    }

    pub(crate) fn suspicion(member: MemberId, ticks: u32) -> Self {
        Self {
            member: Some(member),
            phase: ProbePhase::Suspicion,
            ticks_remaining: ticks,
        }
    }

    pub(crate) fn eviction(member: MemberId, ticks: u32) -> Self {
        Self {
            member: Some(member),
            phase: ProbePhase::Eviction,
            ticks_remaining: ticks,
        }
    }
}
