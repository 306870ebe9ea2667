//! Outbound side of the session: turns round events into packets
//!
//! The session never touches sockets. It hands [`GameMessage`]s to the
//! network sender task through an unbounded channel, so a state transition
//! never waits on I/O and a send that fails for one player affects nobody
//! else.

use crate::roster::Roster;
use log::error;
use shared::{GameInfo, Packet};
use tokio::sync::mpsc;

/// Messages sent from the session to the network sender task
#[derive(Debug, Clone, PartialEq)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        client_id: u32,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<GameMessage>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self { tx }
    }

    fn queue(&self, message: GameMessage) {
        if let Err(e) = self.tx.send(message) {
            error!("Failed to queue outbound message: {}", e);
        }
    }

    pub fn send(&self, client_id: u32, packet: Packet) {
        self.queue(GameMessage::SendPacket { packet, client_id });
    }

    pub fn broadcast(&self, packet: Packet) {
        self.queue(GameMessage::BroadcastPacket {
            packet,
            exclude: None,
        });
    }

    pub fn game_info(&self, target: Option<u32>, info: &GameInfo) {
        let packet = Packet::GameInfo { info: info.clone() };
        match target {
            Some(client_id) => self.send(client_id, packet),
            None => self.broadcast(packet),
        }
    }

    pub fn in_progress(&self, client_id: u32, info: &GameInfo) {
        self.send(client_id, Packet::InProgress { info: info.clone() });
    }

    pub fn countdown(&self, seconds: u32, infected_count: u32) {
        self.broadcast(Packet::Countdown {
            seconds,
            infected_count,
        });
    }

    /// Each player learns their own flag and who is infected. Uninfected
    /// ids are never sent.
    pub fn round_start(&self, roster: &Roster) {
        let infected_ids = roster.infected_ids();
        for record in roster.records() {
            self.send(
                record.id,
                Packet::RoundStart {
                    is_infected: infected_ids.contains(&record.id),
                    infected_ids: infected_ids.clone(),
                },
            );
        }
    }

    pub fn tag(&self, roster: &Roster, tagged_id: u32, remaining: u32, disconnected: bool) {
        for id in roster.ids() {
            self.send(
                id,
                Packet::Tag {
                    is_you: id == tagged_id,
                    tagged_id,
                    remaining,
                    disconnected,
                },
            );
        }
    }

    pub fn round_end(&self, roster: &Roster, winner: Option<u32>) {
        for id in roster.ids() {
            self.send(
                id,
                Packet::RoundEnd {
                    winner,
                    is_you: winner == Some(id),
                },
            );
        }
    }
}
