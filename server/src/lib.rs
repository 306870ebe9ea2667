//! # Infection Tag Server Library
//!
//! This library coordinates rounds of infection tag for a networked game.
//! Clients own movement and collision; the server owns who is infected,
//! when rounds start and end, and which play area (preset) is in use.
//!
//! ## Core Responsibilities
//!
//! ### Round Orchestration
//! A round goes through a countdown, assigns the initial infected players,
//! spreads the infection as players report being tagged, and ends the
//! moment one or no uninfected players remain. The last uninfected player
//! standing wins.
//!
//! ### Automation
//! With automation on, rounds cycle by themselves: cooldown, optional
//! rotation to a fresh preset with a warp delay, countdown, play, and a
//! hard round time limit.
//!
//! ### Play Area Presets
//! Presets come from a JSON document that is watched for changes. Area and
//! exit names are resolved to indices against a world index before they
//! reach clients.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! Every state change happens on one loop that owns the
//! [`session::Session`]. Packets, client timeouts, operator commands and
//! timer firings are queued as messages and applied one at a time, so a
//! tag and a disconnect for the same player can never interleave.
//!
//! ### Generation-checked Timers
//! At most one round timer is pending. Timers fire by posting a message
//! back into the loop, and a firing that belongs to a replaced or
//! cancelled timer is recognised and ignored.
//!
//! ## Module Organization
//!
//! - `client_manager`: connected clients, addresses and timeouts
//! - `command`: operator console parsing and dispatch
//! - `error`: configuration errors
//! - `network`: UDP tasks and the event loop
//! - `notifier`: round events to outbound packets
//! - `preset`: preset registry, hot reload and selection
//! - `roster`: infection states and initial infected selection
//! - `session`: the round state machine and automation
//! - `settings`: persisted game settings
//! - `timer`: cancellable one-shot timers
//! - `world`: area and transition name resolution
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::preset::PresetRegistry;
//! use server::settings::{JsonSettingsFile, SettingsHandle};
//! use server::world::WorldIndex;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SettingsHandle::load(Box::new(JsonSettingsFile::new("settings.json")));
//!     let presets = PresetRegistry::from_path("presets.json");
//!     let world = WorldIndex::load_or_empty("world.json");
//!
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         32,
//!         Duration::from_secs(30),
//!         settings,
//!         presets,
//!         Box::new(world),
//!     )
//!     .await?;
//!
//!     server.spawn_console_reader();
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod command;
pub mod error;
pub mod network;
pub mod notifier;
pub mod preset;
pub mod roster;
pub mod session;
pub mod settings;
pub mod timer;
pub mod world;
