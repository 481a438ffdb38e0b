use std::collections::HashMap;
use std::net::SocketAddr;

use crate::cluster::gossip_buffer::GossipBuffer;
use crate::cluster::member::{MemberId, MemberRecord, MemberStatus};
use crate::cluster::membership::{suspicion_ticks, MembershipEvent, MembershipTable};
use crate::cluster::messages::{OutboundPacket, Packet, ProbePhase, ProbeTimer, TimeoutEvent};
use crate::cluster::probe_schedule::ProbeSchedule;
use crate::config::DetectorTiming;
use crate::schedulers::TimerCommand;

/// The failure-detector state machine. No sockets, no clocks, no channels.
///
/// Driven by two kinds of input:
///   - `step(src, packet)`     — a packet arrived from the network
///   - `handle_timeout(event)` — a callback from the logical timer wheel
///
/// All output is buffered: outbound packets in `pending_outbound`, timer
/// commands in `pending_timers`, membership events in `pending_events`.
/// The actor drains them after every input.
///
/// ```text
///   ProtocolPeriodElapsed
///   ├─ 1. previous probe still open?  → suspect the target (lazy verdict)
///   └─ 2. pop the shuffled round queue → send Ping, arm the ack timer
///             │
///             │  Ack with matching seq within ack_timeout
///             │  └─ alive(target, inc), probe closed
///             │
///             │  DirectAck timer expires
///             │  └─ PingReq fanned out to the proxies picked at probe time
///             │     (no second timer: silence resolves at the next tick)
///             ▼
///          Suspect ──(suspicion window expires)──► Faulty
///             │                                       │
///             │ alive@higher-inc gossip (refutation)  │ one period grace
///             ▼                                       ▼
///           Alive                                  evicted
/// ```
pub(crate) struct Detector {
    timing: DetectorTiming,
    table: MembershipTable,
    schedule: ProbeSchedule,
    gossip: GossipBuffer,

    sequence: u32,
    current_probe: Option<CurrentProbe>,
    // Probes relayed on behalf of other nodes, keyed by their wire seq.
    relays: HashMap<u32, Relay>,
    // One armed suspicion countdown per suspect.
    suspicion_timers: HashMap<MemberId, u32>,
    stale_acks: u64,

    pending_outbound: Vec<OutboundPacket>,
    pending_timers: Vec<TimerCommand<ProbeTimer>>,
    pending_events: Vec<MembershipEvent>,
}

#[derive(Debug)]
struct CurrentProbe {
    target: MemberId,
    seq: u32,
    // Picked from the shuffled round at probe time, used only if the
    // direct ack never shows up.
    proxies: Vec<MemberId>,
    indirect_started: bool,
}

#[derive(Debug)]
struct Relay {
    origin: SocketAddr,
    target: MemberId,
    timer_id: u32,
}

impl Detector {
    pub(crate) fn new(local_id: MemberId, local_addr: SocketAddr, timing: DetectorTiming) -> Self {
        Self {
            sequence: timing.initial_sequence,
            timing,
            table: MembershipTable::new(local_id, local_addr),
            schedule: ProbeSchedule::new(),
            gossip: GossipBuffer::default(),
            current_probe: None,
            relays: HashMap::new(),
            suspicion_timers: HashMap::new(),
            stale_acks: 0,
            pending_outbound: Vec::new(),
            pending_timers: Vec::new(),
            pending_events: Vec::new(),
        }
    }

    pub(crate) fn members(&self) -> Vec<MemberRecord> {
        self.table.members()
    }

    /// External alive report, e.g. from a bootstrap oracle.
    pub(crate) fn report_alive(&mut self, member: MemberId, addr: SocketAddr, incarnation: u64) {
        if &member == self.table.local_id() {
            return;
        }
        let events = self.table.apply(MemberRecord {
            member,
            addr,
            status: MemberStatus::Alive,
            incarnation,
        });
        self.absorb(events);
    }

    // -----------------------------------------------------------------------
    // Timer-driven protocol logic
    // -----------------------------------------------------------------------

    pub(crate) fn handle_timeout(&mut self, event: TimeoutEvent) {
        match event {
            TimeoutEvent::ProtocolPeriodElapsed => self.on_protocol_period(),
            TimeoutEvent::TimerExpired { id, phase, member } => match (phase, member) {
                (ProbePhase::DirectAck, Some(target)) => self.on_direct_timeout(target, id),
                (ProbePhase::RelayAck, _) => self.on_relay_timeout(id),
                (ProbePhase::Suspicion, Some(member)) => self.on_suspicion_expired(member),
                (ProbePhase::Eviction, Some(member)) => self.on_eviction_due(member),
                _ => {}
            },
        }
    }

    fn on_protocol_period(&mut self) {
        // Resolve the previous period first: a probe still open here went a
        // whole period without any ack, direct or relayed.
        if let Some(probe) = self.current_probe.take() {
            self.pending_timers
                .push(TimerCommand::Cancel { id: probe.seq });
            tracing::debug!(target = %probe.target, seq = probe.seq,
                "probe period ended in silence, suspecting");
            let events = self.table.escalate(&probe.target, MemberStatus::Suspect);
            self.absorb(events);
        }
        self.start_probe();
    }

    fn start_probe(&mut self) {
        if self.schedule.is_empty() {
            self.schedule.refill(self.table.probe_candidates());
        }

        let (target, target_addr) = loop {
            let Some(candidate) = self.schedule.pop() else {
                // Nobody else in the cluster; this period is a no-op.
                return;
            };
            // Queued entries can have gone faulty or been evicted mid-round.
            let probeable = self
                .table
                .status_of(&candidate.member)
                .is_some_and(|status| status != MemberStatus::Faulty);
            if !probeable {
                continue;
            }
            match self.table.addr_of(&candidate.member) {
                Some(addr) => break (candidate, addr),
                None => continue,
            }
        };

        let seq = self.next_seq();
        let proxies = self
            .schedule
            .proxies(self.timing.num_proxies, &target.member);

        let ping = Packet::Ping {
            seq,
            origin: self.table.local_id().clone(),
            origin_incarnation: self.table.local_incarnation(),
            target_incarnation: target.incarnation,
            gossip: self.gossip.collect(),
        };
        self.pending_outbound
            .push(OutboundPacket::new(target_addr, ping));
        self.pending_timers.push(TimerCommand::Arm {
            id: seq,
            timer: ProbeTimer::direct_ack(target.member.clone(), self.timing.ack_timeout_ticks),
        });
        self.current_probe = Some(CurrentProbe {
            target: target.member,
            seq,
            proxies,
            indirect_started: false,
        });
    }

    fn on_direct_timeout(&mut self, target: MemberId, seq: u32) {
        // A late-firing timer from some earlier period must be a no-op.
        let proxies = match &mut self.current_probe {
            Some(probe)
                if probe.seq == seq && probe.target == target && !probe.indirect_started =>
            {
                probe.indirect_started = true;
                probe.proxies.clone()
            }
            _ => return,
        };

        let Some(target_addr) = self.table.addr_of(&target) else {
            return;
        };

        let mut fanned_out = 0usize;
        for proxy in proxies {
            if self
                .table
                .status_of(&proxy)
                .is_some_and(|status| status == MemberStatus::Faulty)
            {
                continue;
            }
            let Some(proxy_addr) = self.table.addr_of(&proxy) else {
                continue;
            };
            let packet = Packet::PingReq {
                seq,
                origin: self.table.local_id().clone(),
                origin_incarnation: self.table.local_incarnation(),
                target: target.clone(),
                target_addr,
                gossip: self.gossip.collect(),
            };
            self.pending_outbound
                .push(OutboundPacket::new(proxy_addr, packet));
            fanned_out += 1;
        }

        if fanned_out == 0 {
            tracing::debug!(%target, "no proxies available for indirect probe");
        }
        // No second timer: a probe still silent at the next protocol tick
        // resolves to suspect there, never inside a timer callback.
    }

    fn on_relay_timeout(&mut self, timer_id: u32) {
        let seq = self
            .relays
            .iter()
            .find_map(|(seq, relay)| (relay.timer_id == timer_id).then_some(*seq));
        let Some(seq) = seq else { return };
        if let Some(relay) = self.relays.remove(&seq) {
            tracing::debug!(seq, target = %relay.target, "relayed probe timed out, nacking origin");
            self.pending_outbound
                .push(OutboundPacket::new(relay.origin, Packet::Nack { seq }));
        }
    }

    fn on_suspicion_expired(&mut self, member: MemberId) {
        self.suspicion_timers.remove(&member);
        // Refuted in the meantime? Then this countdown is moot.
        if self.table.status_of(&member) != Some(MemberStatus::Suspect) {
            return;
        }
        let events = self.table.escalate(&member, MemberStatus::Faulty);
        self.absorb(events);
    }

    fn on_eviction_due(&mut self, member: MemberId) {
        let events = self.table.evict(&member);
        self.absorb(events);
    }

    // -----------------------------------------------------------------------
    // Packet-driven protocol logic
    // -----------------------------------------------------------------------

    pub(crate) fn step(&mut self, src: SocketAddr, packet: Packet) {
        // Piggybacked rumors first, so replies we build below already
        // reflect them.
        for record in packet.gossip().to_vec() {
            let events = self.table.apply(record);
            self.absorb(events);
        }

        match packet {
            Packet::Ping {
                seq,
                origin,
                origin_incarnation,
                ..
            } => {
                self.observe_contact(&origin, src, origin_incarnation);
                let ack = Packet::Ack {
                    seq,
                    origin: self.table.local_id().clone(),
                    incarnation: self.table.local_incarnation(),
                    gossip: self.gossip.collect(),
                };
                self.pending_outbound.push(OutboundPacket::new(src, ack));
            }

            Packet::Ack {
                seq,
                origin,
                incarnation,
                ..
            } => self.on_ack(src, seq, origin, incarnation),

            Packet::PingReq {
                seq,
                origin,
                origin_incarnation,
                target,
                target_addr,
                ..
            } => {
                self.observe_contact(&origin, src, origin_incarnation);
                self.relay_probe(src, seq, target, target_addr);
            }

            Packet::Nack { seq } => {
                if let Some(probe) = &self.current_probe {
                    if probe.seq == seq {
                        // Advisory: a proxy could not reach the target. The
                        // verdict still falls at the next protocol tick.
                        tracing::debug!(seq, target = %probe.target,
                            "proxy reported the probe target unreachable");
                    }
                }
            }
        }
    }

    fn on_ack(&mut self, src: SocketAddr, seq: u32, origin: MemberId, incarnation: u64) {
        // Acks for probes we relayed on someone else's behalf go back to
        // the origin that asked.
        if self
            .relays
            .get(&seq)
            .is_some_and(|relay| relay.target == origin)
        {
            if let Some(relay) = self.relays.remove(&seq) {
                self.pending_timers
                    .push(TimerCommand::Cancel { id: relay.timer_id });
                let forward = Packet::Ack {
                    seq,
                    origin: origin.clone(),
                    incarnation,
                    gossip: self.gossip.collect(),
                };
                self.pending_outbound
                    .push(OutboundPacket::new(relay.origin, forward));
            }
            self.observe_contact(&origin, src, incarnation);
            return;
        }

        match &self.current_probe {
            Some(probe) if probe.seq == seq && probe.target == origin => {
                self.current_probe = None;
                self.pending_timers.push(TimerCommand::Cancel { id: seq });
                // An indirect ack arrives from the proxy, so trust the
                // table's address for the target over the datagram source.
                let addr = self.table.addr_of(&origin).unwrap_or(src);
                let events = self.table.apply(MemberRecord {
                    member: origin,
                    addr,
                    status: MemberStatus::Alive,
                    incarnation,
                });
                self.absorb(events);
            }
            _ => {
                self.stale_acks += 1;
                tracing::debug!(seq, %origin, "discarding ack for a non-current sequence");
            }
        }
    }

    fn relay_probe(
        &mut self,
        origin_addr: SocketAddr,
        seq: u32,
        target: MemberId,
        target_addr: SocketAddr,
    ) {
        let timer_id = self.next_seq();
        let target_incarnation = self.table.incarnation_of(&target).unwrap_or(0);
        self.relays.insert(
            seq,
            Relay {
                origin: origin_addr,
                target: target.clone(),
                timer_id,
            },
        );

        let ping = Packet::Ping {
            seq,
            origin: self.table.local_id().clone(),
            origin_incarnation: self.table.local_incarnation(),
            target_incarnation,
            gossip: self.gossip.collect(),
        };
        self.pending_outbound
            .push(OutboundPacket::new(target_addr, ping));
        self.pending_timers.push(TimerCommand::Arm {
            id: timer_id,
            timer: ProbeTimer::relay_ack(self.timing.ack_timeout_ticks),
        });
    }

    /// A packet received directly from `member` is evidence it is alive at
    /// its advertised incarnation; merge through the normal table rules.
    fn observe_contact(&mut self, member: &MemberId, addr: SocketAddr, incarnation: u64) {
        if member == self.table.local_id() {
            return;
        }
        let events = self.table.apply(MemberRecord {
            member: member.clone(),
            addr,
            status: MemberStatus::Alive,
            incarnation,
        });
        self.absorb(events);
    }

    // -----------------------------------------------------------------------
    // Event plumbing
    // -----------------------------------------------------------------------

    /// Fold table events into the detector: queue the rumor, keep the
    /// suspicion/eviction timers in sync, and stage the event for consumers.
    fn absorb(&mut self, events: Vec<MembershipEvent>) {
        for event in events {
            match &event {
                MembershipEvent::Joined(record)
                | MembershipEvent::StatusChanged { record, .. } => {
                    let record = record.clone();
                    self.gossip.enqueue(record.clone(), self.table.cluster_size());
                    self.sync_timers(&record);
                }
                MembershipEvent::Evicted(member) => {
                    if let Some(id) = self.suspicion_timers.remove(member) {
                        self.pending_timers.push(TimerCommand::Cancel { id });
                    }
                }
                MembershipEvent::Refuted { .. } => {
                    let record = self.table.local_record();
                    self.gossip.enqueue(record, self.table.cluster_size());
                }
            }
            self.pending_events.push(event);
        }
    }

    fn sync_timers(&mut self, record: &MemberRecord) {
        match record.status {
            MemberStatus::Alive => {
                if let Some(id) = self.suspicion_timers.remove(&record.member) {
                    self.pending_timers.push(TimerCommand::Cancel { id });
                }
            }
            MemberStatus::Suspect => {
                if !self.suspicion_timers.contains_key(&record.member) {
                    let id = self.next_seq();
                    let ticks = suspicion_ticks(
                        self.timing.protocol_period_ticks,
                        self.table.cluster_size(),
                    );
                    self.suspicion_timers.insert(record.member.clone(), id);
                    self.pending_timers.push(TimerCommand::Arm {
                        id,
                        timer: ProbeTimer::suspicion(record.member.clone(), ticks),
                    });
                }
            }
            MemberStatus::Faulty => {
                if let Some(id) = self.suspicion_timers.remove(&record.member) {
                    self.pending_timers.push(TimerCommand::Cancel { id });
                }
                let id = self.next_seq();
                self.pending_timers.push(TimerCommand::Arm {
                    id,
                    timer: ProbeTimer::eviction(
                        record.member.clone(),
                        self.timing.protocol_period_ticks,
                    ),
                });
            }
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Drain all outbound packets buffered since the last call.
    pub(crate) fn take_outbound(&mut self) -> Vec<OutboundPacket> {
        std::mem::take(&mut self.pending_outbound)
    }

    /// Drain all timer commands buffered since the last call.
    pub(crate) fn take_timer_commands(&mut self) -> Vec<TimerCommand<ProbeTimer>> {
        std::mem::take(&mut self.pending_timers)
    }

    /// Drain all membership events buffered since the last call.
    pub(crate) fn take_events(&mut self) -> Vec<MembershipEvent> {
        std::mem::take(&mut self.pending_events)
    }

    #[cfg(test)]
    fn status_of(&self, member: &MemberId) -> Option<MemberStatus> {
        self.table.status_of(member)
    }

    #[cfg(test)]
    fn current_target(&self) -> Option<&MemberId> {
        self.current_probe.as_ref().map(|probe| &probe.target)
    }

    #[cfg(test)]
    fn stale_acks(&self) -> u64 {
        self.stale_acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedulers::ticker::Ticker;

    const PERIOD_TICKS: u32 = 10;
    const ACK_TICKS: u32 = 3;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn record(id: &str, port: u16, status: MemberStatus, incarnation: u64) -> MemberRecord {
        MemberRecord {
            member: MemberId::new(id),
            addr: addr(port),
            status,
            incarnation,
        }
    }

    fn ping(seq: u32, from: &str, inc: u64, gossip: Vec<MemberRecord>) -> Packet {
        Packet::Ping {
            seq,
            origin: MemberId::new(from),
            origin_incarnation: inc,
            target_incarnation: 0,
            gossip,
        }
    }

    fn ack(seq: u32, from: &str, inc: u64) -> Packet {
        Packet::Ack {
            seq,
            origin: MemberId::new(from),
            incarnation: inc,
            gossip: vec![],
        }
    }

    /// Coordinates the sans-io detector with the logical timer wheel,
    /// mirroring what the actor does in production.
    struct TestHarness {
        detector: Detector,
        ticker: Ticker<ProbeTimer>,
        outbound: Vec<OutboundPacket>,
        events: Vec<MembershipEvent>,
    }

    impl TestHarness {
        fn new(local: &str, port: u16) -> Self {
            Self::with_timing(local, port, DetectorTiming::default())
        }

        fn with_timing(local: &str, port: u16, timing: DetectorTiming) -> Self {
            let period = timing.protocol_period_ticks;
            Self {
                detector: Detector::new(MemberId::new(local), addr(port), timing),
                ticker: Ticker::new(period),
                outbound: Vec::new(),
                events: Vec::new(),
            }
        }

        fn drain(&mut self) {
            for cmd in self.detector.take_timer_commands() {
                self.ticker.apply(cmd);
            }
            self.outbound.extend(self.detector.take_outbound());
            self.events.extend(self.detector.take_events());
        }

        fn tick(&mut self) {
            for event in self.ticker.advance_clock() {
                self.detector.handle_timeout(event);
                self.drain();
            }
        }

        fn step(&mut self, src: SocketAddr, packet: Packet) {
            self.detector.step(src, packet);
            self.drain();
        }

        fn add_peer(&mut self, id: &str, port: u16, incarnation: u64) {
            self.detector
                .report_alive(MemberId::new(id), addr(port), incarnation);
            self.drain();
            self.outbound.clear();
        }

        fn take_outbound(&mut self) -> Vec<OutboundPacket> {
            std::mem::take(&mut self.outbound)
        }

        fn take_events(&mut self) -> Vec<MembershipEvent> {
            std::mem::take(&mut self.events)
        }

        /// Tick until a direct Ping leaves, returning (seq, target member,
        /// datagram target address).
        fn tick_until_ping(&mut self, max_ticks: u32) -> (u32, MemberId, SocketAddr) {
            for _ in 0..max_ticks {
                self.tick();
                for pkt in self.take_outbound() {
                    if let Packet::Ping { seq, .. } = pkt.packet() {
                        let target = self
                            .detector
                            .current_target()
                            .expect("an outbound probe implies a current target")
                            .clone();
                        return (*seq, target, pkt.target);
                    }
                }
            }
            panic!("no ping emitted within {max_ticks} ticks");
        }
    }

    // -----------------------------------------------------------------------
    // Inbound handling
    // -----------------------------------------------------------------------

    #[test]
    fn ping_from_unknown_peer_is_acked_and_joins() {
        let mut h = TestHarness::new("local", 8000);
        let sender = addr(9000);

        h.step(sender, ping(7, "node-b", 0, vec![]));

        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Alive)
        );

        let out = h.take_outbound();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, sender);
        assert!(matches!(out[0].packet(), Packet::Ack { seq: 7, .. }));

        let events = h.take_events();
        assert!(matches!(&events[0], MembershipEvent::Joined(r) if *r.member == *"node-b"));
    }

    #[test]
    fn gossip_is_applied_before_the_ack_is_built() {
        let mut h = TestHarness::new("local", 8000);

        let rumor = record("node-c", 9002, MemberStatus::Faulty, 4);
        h.step(addr(9000), ping(1, "node-b", 0, vec![rumor]));

        let out = h.take_outbound();
        match out[0].packet() {
            Packet::Ack { gossip, .. } => {
                assert!(
                    gossip.iter().any(|r| *r.member == *"node-c"),
                    "ack gossip should already carry the rumor applied this step"
                );
            }
            other => panic!("expected Ack, got {other:?}"),
        }
    }

    #[test]
    fn suspect_rumor_about_local_is_refuted_in_the_ack() {
        let mut h = TestHarness::new("local", 8000);

        let lie = record("local", 8000, MemberStatus::Suspect, 0);
        h.step(addr(9000), ping(3, "node-b", 0, vec![lie]));

        let out = h.take_outbound();
        match out[0].packet() {
            Packet::Ack {
                incarnation,
                gossip,
                ..
            } => {
                assert_eq!(*incarnation, 1, "refutation must bump the incarnation");
                assert!(
                    gossip
                        .iter()
                        .any(|r| *r.member == *"local" && r.incarnation == 1),
                    "the refutation itself must be queued for dissemination"
                );
            }
            other => panic!("expected Ack, got {other:?}"),
        }

        let events = h.take_events();
        assert!(events.contains(&MembershipEvent::Refuted { incarnation: 1 }));
    }

    // -----------------------------------------------------------------------
    // The probe cycle
    // -----------------------------------------------------------------------

    #[test]
    fn happy_probe_resolves_alive() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        let (seq, target, target_addr) = h.tick_until_ping(2 * PERIOD_TICKS);
        assert_eq!(target, MemberId::new("node-b"));
        assert_eq!(target_addr, addr(9001));

        // Ack inside the ack window.
        h.step(addr(9001), ack(seq, "node-b", 0));

        assert!(h.detector.current_target().is_none(), "probe must be closed");
        assert!(!h.ticker.has_timer(seq), "ack timer must be cancelled");

        // The next period must not suspect node-b.
        for _ in 0..PERIOD_TICKS {
            h.tick();
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Alive)
        );
    }

    #[test]
    fn silent_direct_probe_fans_out_ping_reqs() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);
        h.add_peer("node-c", 9002, 0);

        let (seq, target, _) = h.tick_until_ping(2 * PERIOD_TICKS);

        // Let the direct ack window lapse.
        for _ in 0..ACK_TICKS {
            h.tick();
        }

        let out = h.take_outbound();
        let ping_reqs: Vec<_> = out
            .iter()
            .filter(|p| matches!(p.packet(), Packet::PingReq { .. }))
            .collect();
        assert_eq!(ping_reqs.len(), 1, "one other peer can proxy");
        match ping_reqs[0].packet() {
            Packet::PingReq {
                seq: req_seq,
                target: req_target,
                ..
            } => {
                assert_eq!(*req_seq, seq);
                assert_eq!(req_target, &target);
            }
            _ => unreachable!(),
        }

        // The proxy relays the target's ack back to us: probe succeeds.
        h.step(addr(9009), ack(seq, &target, 0));
        assert!(h.detector.current_target().is_none());
        assert_eq!(
            h.detector.status_of(&target),
            Some(MemberStatus::Alive)
        );
    }

    #[test]
    fn fully_silent_probe_is_suspected_at_the_next_tick() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        let (seq, _, _) = h.tick_until_ping(2 * PERIOD_TICKS);

        // Silence through the rest of the period. The suspect verdict must
        // not land before the period boundary.
        for _ in 0..PERIOD_TICKS - 1 {
            h.tick();
            if h.detector.current_target().is_some() {
                assert_eq!(
                    h.detector.status_of(&MemberId::new("node-b")),
                    Some(MemberStatus::Alive),
                    "no suspect verdict inside the period"
                );
            }
        }
        h.tick();

        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Suspect)
        );
        assert!(!h.ticker.has_timer(seq));
    }

    #[test]
    fn suspect_expires_to_faulty_and_is_evicted_one_period_later() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        h.tick_until_ping(2 * PERIOD_TICKS);
        for _ in 0..PERIOD_TICKS {
            h.tick();
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Suspect)
        );

        // Two-node cluster: suspicion window = 10 × ⌈log₂3⌉ × 3 = 60 ticks.
        let window = suspicion_ticks(PERIOD_TICKS, 2);
        for _ in 0..window {
            h.tick();
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Faulty)
        );

        let events = h.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            MembershipEvent::StatusChanged { record, .. } if record.status == MemberStatus::Faulty
        )));

        // One more protocol period: evicted and gone.
        for _ in 0..PERIOD_TICKS {
            h.tick();
        }
        assert!(h.detector.members().is_empty());
        let events = h.take_events();
        assert!(events.contains(&MembershipEvent::Evicted(MemberId::new("node-b"))));

        // And a faulty, evicted member is never probed again.
        h.take_outbound();
        for _ in 0..2 * PERIOD_TICKS {
            h.tick();
        }
        assert!(h.take_outbound().is_empty());
    }

    #[test]
    fn refutation_cancels_the_suspicion_countdown() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        h.tick_until_ping(2 * PERIOD_TICKS);
        for _ in 0..PERIOD_TICKS {
            h.tick();
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Suspect)
        );

        // node-b refutes with a higher incarnation via gossip.
        let refutation = record("node-b", 9001, MemberStatus::Alive, 1);
        h.step(addr(9001), ping(99, "node-b", 1, vec![refutation]));
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Alive)
        );

        // Run far past the old suspicion window: no stale countdown may
        // declare node-b faulty. (It keeps getting probed and must keep
        // acking to stay alive.)
        let window = suspicion_ticks(PERIOD_TICKS, 2);
        for _ in 0..window + PERIOD_TICKS {
            h.tick();
            let pings: Vec<u32> = h
                .take_outbound()
                .iter()
                .filter_map(|p| match p.packet() {
                    Packet::Ping { seq, .. } => Some(*seq),
                    _ => None,
                })
                .collect();
            for seq in pings {
                h.step(addr(9001), ack(seq, "node-b", 1));
            }
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Alive)
        );
    }

    #[test]
    fn same_incarnation_ack_does_not_refute_a_suspect() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 1);

        let (seq, _, _) = h.tick_until_ping(2 * PERIOD_TICKS);
        for _ in 0..PERIOD_TICKS {
            h.tick();
        }
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Suspect)
        );

        // A very late ack at the same incarnation is stale on both counts:
        // its sequence is closed and alive@1 cannot override suspect@1.
        h.step(addr(9001), ack(seq, "node-b", 1));
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Suspect)
        );
    }

    #[test]
    fn stale_ack_is_discarded() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        let (seq, _, _) = h.tick_until_ping(2 * PERIOD_TICKS);

        h.step(addr(9001), ack(seq + 100, "node-b", 0));
        assert_eq!(h.detector.stale_acks(), 1);
        assert!(
            h.detector.current_target().is_some(),
            "the open probe must be unaffected"
        );
    }

    #[test]
    fn one_ping_per_sequence_number() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);
        h.add_peer("node-c", 9002, 0);

        let mut seqs = Vec::new();
        for _ in 0..5 * PERIOD_TICKS {
            h.tick();
            for pkt in h.take_outbound() {
                if let Packet::Ping { seq, .. } = pkt.packet() {
                    seqs.push(*seq);
                    // Answer everything so probes stay direct.
                    if let Some(target) = h.detector.current_target().cloned() {
                        let port = if *target == *"node-b" { 9001 } else { 9002 };
                        h.step(addr(port), ack(*seq, &target, 0));
                    }
                }
            }
        }

        let mut deduped = seqs.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(seqs.len(), deduped.len(), "a sequence number was reused");
    }

    #[test]
    fn every_member_is_probed_once_per_round() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);
        h.add_peer("node-c", 9002, 0);
        h.add_peer("node-d", 9003, 0);

        let mut counts: HashMap<MemberId, usize> = HashMap::new();
        // Three members, three rounds → nine periods.
        for _ in 0..9 * PERIOD_TICKS {
            h.tick();
            for pkt in h.take_outbound() {
                if let Packet::Ping { seq, .. } = pkt.packet() {
                    if let Some(target) = h.detector.current_target().cloned() {
                        *counts.entry(target.clone()).or_default() += 1;
                        let port = match &*target {
                            "node-b" => 9001,
                            "node-c" => 9002,
                            _ => 9003,
                        };
                        h.step(addr(port), ack(*seq, &target, 0));
                    }
                }
            }
        }

        assert_eq!(counts.len(), 3, "{counts:?}");
        assert!(
            counts.values().all(|&n| n == 3),
            "uniform coverage violated: {counts:?}"
        );
    }

    #[test]
    fn mid_round_joiner_waits_for_the_next_refill() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);
        h.add_peer("node-c", 9002, 0);

        // First probe of the round.
        let (seq, first_target, first_addr) = h.tick_until_ping(2 * PERIOD_TICKS);
        h.step(first_addr, ack(seq, &first_target, 0));

        // node-d joins mid-round.
        h.add_peer("node-d", 9003, 0);

        // The second probe of this round must still come from the old
        // shuffle, so it cannot be node-d.
        let (_, second_target, _) = h.tick_until_ping(2 * PERIOD_TICKS);
        assert_ne!(second_target, MemberId::new("node-d"));
        assert_ne!(second_target, first_target);
    }

    #[test]
    fn initial_sequence_is_respected() {
        let timing = DetectorTiming {
            initial_sequence: 41,
            ..DetectorTiming::default()
        };
        let mut h = TestHarness::with_timing("local", 8000, timing);
        h.add_peer("node-b", 9001, 0);

        let (seq, _, _) = h.tick_until_ping(2 * PERIOD_TICKS);
        assert_eq!(seq, 42);
    }

    // -----------------------------------------------------------------------
    // Relaying probes for other nodes
    // -----------------------------------------------------------------------

    #[test]
    fn ping_req_relays_a_ping_and_forwards_the_ack() {
        let mut h = TestHarness::new("local", 8000);
        let origin = addr(9000);
        let target_addr = addr(9005);

        h.step(
            origin,
            Packet::PingReq {
                seq: 77,
                origin: MemberId::new("node-b"),
                origin_incarnation: 0,
                target: MemberId::new("node-t"),
                target_addr,
                gossip: vec![],
            },
        );

        let out = h.take_outbound();
        assert!(out
            .iter()
            .any(|p| p.target == target_addr && matches!(p.packet(), Packet::Ping { seq: 77, .. })));

        // Target acks us; we forward to the origin with the same seq.
        h.step(target_addr, ack(77, "node-t", 2));
        let out = h.take_outbound();
        assert!(out
            .iter()
            .any(|p| p.target == origin && matches!(p.packet(), Packet::Ack { seq: 77, .. })));
    }

    #[test]
    fn relayed_probe_timeout_nacks_the_origin() {
        let mut h = TestHarness::new("local", 8000);
        let origin = addr(9000);

        h.step(
            origin,
            Packet::PingReq {
                seq: 77,
                origin: MemberId::new("node-b"),
                origin_incarnation: 0,
                target: MemberId::new("node-t"),
                target_addr: addr(9005),
                gossip: vec![],
            },
        );
        h.take_outbound();

        for _ in 0..ACK_TICKS {
            h.tick();
        }

        let out = h.take_outbound();
        assert!(out
            .iter()
            .any(|p| p.target == origin && matches!(p.packet(), Packet::Nack { seq: 77 })));
    }

    #[test]
    fn nack_leaves_the_probe_open() {
        let mut h = TestHarness::new("local", 8000);
        h.add_peer("node-b", 9001, 0);

        let (seq, _, _) = h.tick_until_ping(2 * PERIOD_TICKS);
        h.step(addr(9002), Packet::Nack { seq });

        assert!(h.detector.current_target().is_some());
        assert_eq!(
            h.detector.status_of(&MemberId::new("node-b")),
            Some(MemberStatus::Alive),
            "a nack alone never changes membership"
        );
    }
}
