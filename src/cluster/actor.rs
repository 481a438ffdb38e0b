use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::cluster::detector::Detector;
use crate::cluster::member::MemberId;
use crate::cluster::membership::MembershipEvent;
use crate::cluster::messages::{DetectorCommand, OutboundPacket, ProbeTimer};
use crate::config::DetectorTiming;
use crate::schedulers::TimerCommand;

/// Owns the detector state machine and serializes every input to it:
/// inbound packets, timer callbacks, and external queries all flow through
/// one mailbox, so the membership table never needs a lock.
pub(crate) struct DetectorActor {
    mailbox: mpsc::Receiver<DetectorCommand>,
    transport_tx: mpsc::Sender<OutboundPacket>,
    timer_tx: mpsc::Sender<TimerCommand<ProbeTimer>>,
    event_tx: mpsc::UnboundedSender<MembershipEvent>,
    state: Detector,
}

impl DetectorActor {
    pub(crate) fn new(
        local_id: MemberId,
        local_addr: SocketAddr,
        timing: DetectorTiming,
        mailbox: mpsc::Receiver<DetectorCommand>,
        transport_tx: mpsc::Sender<OutboundPacket>,
        timer_tx: mpsc::Sender<TimerCommand<ProbeTimer>>,
        event_tx: mpsc::UnboundedSender<MembershipEvent>,
    ) -> Self {
        Self {
            mailbox,
            transport_tx,
            timer_tx,
            event_tx,
            state: Detector::new(local_id, local_addr, timing),
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!("detector actor started");

        while let Some(command) = self.mailbox.recv().await {
            match command {
                DetectorCommand::PacketReceived { src, packet } => {
                    self.state.step(src, packet);
                }
                DetectorCommand::Timeout(event) => {
                    self.state.handle_timeout(event);
                }
                DetectorCommand::ReportAlive {
                    member,
                    addr,
                    incarnation,
                } => {
                    self.state.report_alive(member, addr, incarnation);
                }
                DetectorCommand::Members { reply } => {
                    let _ = reply.send(self.state.members());
                }
                DetectorCommand::Shutdown => {
                    tracing::debug!("detector actor shutting down");
                    return;
                }
            }
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        for cmd in self.state.take_timer_commands() {
            let _ = self.timer_tx.send(cmd).await;
        }
        for pkt in self.state.take_outbound() {
            let _ = self.transport_tx.send(pkt).await;
        }
        for event in self.state.take_events() {
            // A gone consumer is not our problem; events are advisory.
            let _ = self.event_tx.send(event);
        }
    }
}
