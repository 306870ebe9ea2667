//! Wire protocol shared between the tag server and its clients.
//!
//! Every message on the socket is one bincode-encoded [`Packet`]. Area and
//! transition names never travel on the wire; the server resolves them into
//! dense indices against its world index before sending.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    /// Sent by a player who has just been hit by an infected player.
    Tagged,
    /// Keeps an otherwise idle client from timing out.
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
    },
    GameInfo {
        info: GameInfo,
    },
    /// Game info for a player who joined while a round is running.
    InProgress {
        info: GameInfo,
    },
    Countdown {
        seconds: u32,
        infected_count: u32,
    },
    RoundStart {
        is_infected: bool,
        infected_ids: Vec<u32>,
    },
    Tag {
        is_you: bool,
        tagged_id: u32,
        remaining: u32,
        disconnected: bool,
    },
    RoundEnd {
        winner: Option<u32>,
        is_you: bool,
    },
    Disconnected {
        reason: String,
    },
}

/// Area index plus entry point index within that area.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct WarpTarget {
    pub area: u16,
    pub entry: u16,
}

/// Exits of one area that players may not leave through.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Restriction {
    pub area: u16,
    pub exits: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Loadout {
    pub skin: String,
    #[serde(default)]
    pub abilities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LoadoutPair {
    pub infected: Loadout,
    pub uninfected: Loadout,
}

/// Everything a client needs to set up the play area.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub warp: Option<WarpTarget>,
    pub restrictions: Vec<Restriction>,
    pub loadouts: LoadoutPair,
}

impl GameInfo {
    /// Forbidden exits for an area, if that area has any.
    pub fn forbidden_exits(&self, area: u16) -> Option<&[u16]> {
        self.restrictions
            .iter()
            .find(|r| r.area == area)
            .map(|r| r.exits.as_slice())
    }
}
