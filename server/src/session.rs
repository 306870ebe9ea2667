//! Round orchestration for infection tag
//!
//! [`Session`] owns everything that changes during play: the round state,
//! the roster, the one pending timer and the automation bookkeeping. It is
//! driven purely by method calls from a single owner (the server event
//! loop), so every check-then-act sequence on the roster runs without any
//! other event interleaving. Timer firings come back through the same queue
//! as [`TimerFired`] messages and are checked against the pending timer
//! before they are allowed to touch anything.
//!
//! ## Round lifecycle
//!
//! ```text
//! PreGame -> Countdown -> InGame -> PreGame            (manual)
//! WaitingForPlayers -> PreGame (warp) -> Countdown -> InGame -> PostGame -> ...
//!                                                               (automatic)
//! ```

use crate::notifier::Notifier;
use crate::preset::{Preset, PresetRegistry};
use crate::roster::{select_initial_infected, InfectionState, Roster};
use crate::settings::{SettingKey, Settings, SettingsHandle};
use crate::timer::{TimerFired, TimerSlot};
use crate::world::TransitionIndex;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{GameInfo, Packet};
use std::collections::BTreeSet;
use std::fmt;
use tokio::sync::mpsc;

/// Fewest connected players a round can start with
pub const MIN_PLAYERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// Automation is on but there are too few players.
    WaitingForPlayers,
    PreGame,
    Countdown,
    InGame,
    /// Automation cooldown between rounds.
    PostGame,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundState::WaitingForPlayers => "waiting for players",
            RoundState::PreGame => "pre-game",
            RoundState::Countdown => "countdown",
            RoundState::InGame => "in game",
            RoundState::PostGame => "post-game",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTimer {
    CountdownExpired,
    RoundTimeLimit,
    CooldownElapsed,
    WarpDelayElapsed,
}

/// Number of players that start infected for a round of `population`
/// players, or the reason no round can start.
///
/// A `requested` count of zero means "derive it": `population / divisor`,
/// but at least one. Every round needs at least one infected player and
/// at least two uninfected ones.
pub fn check_start(population: usize, requested: usize, divisor: u32) -> Result<usize, String> {
    if population < MIN_PLAYERS {
        return Err(format!(
            "Need at least {} players to start a round, have {}",
            MIN_PLAYERS, population
        ));
    }

    let count = if requested == 0 {
        (population / divisor.max(1) as usize).max(1)
    } else {
        requested
    };

    if count + 1 >= population {
        return Err(format!(
            "Cannot start with {} infected out of {} players",
            count, population
        ));
    }
    Ok(count)
}

#[derive(Debug, Clone)]
struct ActivePreset {
    name: String,
    info: GameInfo,
}

pub struct Session {
    settings: SettingsHandle,
    presets: PresetRegistry,
    world: Box<dyn TransitionIndex + Send + Sync>,
    notifier: Notifier,
    timer: TimerSlot<RoundTimer>,
    rng: StdRng,

    state: RoundState,
    connected: BTreeSet<u32>,
    roster: Roster,
    last_initial_infected: BTreeSet<u32>,
    /// Infected count asked for by the last accepted start, zero if derived.
    requested_infected: usize,
    current: Option<ActivePreset>,
    games_on_preset: u32,
}

impl Session {
    pub fn new(
        settings: SettingsHandle,
        presets: PresetRegistry,
        world: Box<dyn TransitionIndex + Send + Sync>,
        notifier: Notifier,
        timers: mpsc::UnboundedSender<TimerFired<RoundTimer>>,
    ) -> Self {
        let state = if settings.get().auto_enabled {
            RoundState::WaitingForPlayers
        } else {
            RoundState::PreGame
        };

        Self {
            settings,
            presets,
            world,
            notifier,
            timer: TimerSlot::new(timers),
            rng: StdRng::from_entropy(),
            state,
            connected: BTreeSet::new(),
            roster: Roster::new(),
            last_initial_infected: BTreeSet::new(),
            requested_infected: 0,
            current: None,
            games_on_preset: 0,
        }
    }

    /// Replaces the entropy-seeded generator with a deterministic one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn population(&self) -> usize {
        self.connected.len()
    }

    pub fn settings(&self) -> &Settings {
        self.settings.get()
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.name.as_str())
    }

    pub fn games_on_preset(&self) -> u32 {
        self.games_on_preset
    }

    pub fn last_initial_infected(&self) -> &BTreeSet<u32> {
        &self.last_initial_infected
    }

    pub fn pending_timer(&self) -> Option<RoundTimer> {
        self.timer.pending()
    }

    fn auto_enabled(&self) -> bool {
        self.settings.get().auto_enabled
    }

    fn round_active(&self) -> bool {
        matches!(self.state, RoundState::Countdown | RoundState::InGame)
    }

    /// Game info for the active preset, or just the default loadouts when
    /// no preset has been chosen.
    pub fn game_info(&self) -> GameInfo {
        match &self.current {
            Some(active) => active.info.clone(),
            None => GameInfo {
                loadouts: self.presets.default_loadouts().clone(),
                ..GameInfo::default()
            },
        }
    }

    fn reject(&self, reason: impl Into<String>) -> String {
        let reason = reason.into();
        info!("Rejected: {}", reason);
        reason
    }

    pub fn player_connected(&mut self, id: u32) {
        if !self.connected.insert(id) {
            debug!("Player {} connected twice", id);
        }

        let info = self.game_info();
        if self.state == RoundState::InGame {
            // Late joiners start infected and so can never win this round.
            self.roster.insert(id, InfectionState::Infected);
            self.notifier.in_progress(id, &info);
            info!("Player {} joined mid-round as infected", id);
        } else {
            self.notifier.game_info(Some(id), &info);
        }

        if self.state == RoundState::WaitingForPlayers {
            self.attempt_automatic_start();
        }
    }

    pub fn player_disconnected(&mut self, id: u32) {
        self.connected.remove(&id);

        if self.state != RoundState::InGame {
            return;
        }

        match self.roster.state(id) {
            Some(InfectionState::Uninfected) => {
                self.tag(id, true);
                self.roster.remove(id);
            }
            Some(InfectionState::Infected) => {
                let infected_before = self.roster.infected_count();
                self.roster.remove(id);
                if infected_before <= 1 {
                    info!("Last infected player {} left", id);
                    self.end_round(None);
                }
            }
            None => {}
        }
    }

    pub fn player_tagged(&mut self, id: u32) {
        self.tag(id, false);
    }

    /// Infects a player. The round ends the moment one or no uninfected
    /// players remain; the single survivor, if any, wins.
    pub fn tag(&mut self, id: u32, disconnected: bool) {
        if self.state != RoundState::InGame {
            debug!("Ignoring tag of player {} while {}", id, self.state);
            return;
        }
        if !self.roster.infect(id) {
            debug!("Player {} is already infected or not in the round", id);
            return;
        }

        let remaining = self.roster.uninfected_count();
        info!("Player {} infected, {} uninfected left", id, remaining);

        match remaining {
            0 => self.end_round(None),
            1 => {
                let winner = self.roster.uninfected_ids().first().copied();
                self.end_round(winner);
            }
            n => self.notifier.tag(&self.roster, id, n as u32, disconnected),
        }
    }

    /// Operator entry point for starting a round.
    pub fn request_start(&mut self, infected: usize) -> String {
        self.start_round(infected, false)
    }

    fn start_round(&mut self, requested: usize, automated: bool) -> String {
        if self.auto_enabled() && !automated {
            return self.reject("Automation is on, turn it off with `auto` to start rounds manually");
        }
        if self.round_active() {
            return self.reject("A round is already running");
        }

        let population = self.population();
        let count = match check_start(population, requested, self.settings.get().infected_divisor) {
            Ok(count) => count,
            Err(reason) => {
                if automated {
                    self.timer.cancel();
                    self.state = RoundState::WaitingForPlayers;
                }
                return self.reject(reason);
            }
        };

        self.requested_infected = requested;
        self.state = RoundState::Countdown;

        let seconds = self.settings.get().countdown_seconds;
        self.notifier.countdown(seconds, count as u32);
        self.timer
            .start(self.settings.get().countdown(), RoundTimer::CountdownExpired);

        info!(
            "Countdown started: {} players, {} infected, {}s",
            population, count, seconds
        );
        format!("Round starting in {}s with {} infected", seconds, count)
    }

    /// Countdown finished: build the roster and release the players.
    fn begin_round(&mut self) {
        let population = self.population();
        let divisor = self.settings.get().infected_divisor;

        let count = match check_start(population, self.requested_infected, divisor) {
            Ok(count) => count,
            Err(reason) => {
                info!("Round aborted after countdown: {}", reason);
                self.state = RoundState::PreGame;
                self.notifier.broadcast(Packet::RoundEnd {
                    winner: None,
                    is_you: false,
                });
                // Falls back to waiting only if the population is short.
                self.attempt_automatic_start();
                return;
            }
        };

        let ids: Vec<u32> = self.connected.iter().copied().collect();
        let infected =
            select_initial_infected(&ids, count, &self.last_initial_infected, &mut self.rng);

        self.roster = Roster::with_infected(&ids, &infected);
        self.last_initial_infected = infected.iter().copied().collect();
        self.state = RoundState::InGame;
        self.notifier.round_start(&self.roster);

        if self.auto_enabled() {
            self.timer
                .start(self.settings.get().max_round(), RoundTimer::RoundTimeLimit);
        }

        info!(
            "Round started with {} players, initial infected {:?}",
            ids.len(),
            infected
        );
    }

    fn end_round(&mut self, winner: Option<u32>) {
        self.timer.cancel();
        self.notifier.round_end(&self.roster, winner);
        self.roster.clear();

        match winner {
            Some(id) => info!("Round over, player {} wins", id),
            None => info!("Round over with no winner"),
        }

        if self.auto_enabled() {
            self.games_on_preset += 1;
            self.enter_cooldown();
        } else {
            self.state = RoundState::PreGame;
        }
    }

    fn enter_cooldown(&mut self) {
        self.state = RoundState::PostGame;
        self.timer
            .start(self.settings.get().cooldown(), RoundTimer::CooldownElapsed);
    }

    pub fn stop(&mut self) -> String {
        match self.state {
            RoundState::Countdown => {
                self.timer.cancel();
                self.notifier.broadcast(Packet::RoundEnd {
                    winner: None,
                    is_you: false,
                });
                if self.auto_enabled() {
                    self.enter_cooldown();
                } else {
                    self.state = RoundState::PreGame;
                }
                info!("Countdown cancelled by operator");
                "Countdown cancelled".to_string()
            }
            RoundState::InGame => {
                info!("Round stopped by operator");
                self.end_round(None);
                "Round stopped".to_string()
            }
            _ => self.reject("No round is running"),
        }
    }

    pub fn handle_timer(&mut self, fired: TimerFired<RoundTimer>) {
        let Some(kind) = self.timer.accept(fired) else {
            debug!("Ignoring stale {:?} timer", fired.kind);
            return;
        };

        match kind {
            RoundTimer::CountdownExpired => {
                if self.expect_state(RoundState::Countdown, kind) {
                    self.begin_round();
                }
            }
            RoundTimer::RoundTimeLimit => {
                if self.expect_state(RoundState::InGame, kind) {
                    info!("Round time limit reached");
                    self.end_round(None);
                }
            }
            RoundTimer::CooldownElapsed => self.attempt_automatic_start(),
            RoundTimer::WarpDelayElapsed => {
                self.start_round(0, true);
            }
        }
    }

    fn expect_state(&self, expected: RoundState, kind: RoundTimer) -> bool {
        let ok = self.state == expected;
        debug_assert!(ok, "{:?} fired while {}", kind, self.state);
        if !ok {
            warn!("{:?} fired while {}, ignoring", kind, self.state);
        }
        ok
    }

    /// Starts the next automatic round if automation is on and enough
    /// players are around, rotating to a new preset first when due.
    pub fn attempt_automatic_start(&mut self) {
        if !self.auto_enabled() || self.round_active() {
            return;
        }

        let population = self.population();
        if let Err(reason) = check_start(population, 0, self.settings.get().infected_divisor) {
            if self.state != RoundState::WaitingForPlayers {
                info!("Waiting for players: {}", reason);
            }
            self.timer.cancel();
            self.state = RoundState::WaitingForPlayers;
            return;
        }

        let rotate = self.current.is_none()
            || self.games_on_preset >= self.settings.get().max_games_per_preset;

        if rotate {
            let current = self.current.as_ref().map(|c| c.name.clone());
            match self
                .presets
                .select_random(current.as_deref(), population, &mut self.rng)
            {
                Some(preset) => {
                    self.activate_preset(&preset);
                    self.state = RoundState::PreGame;
                    self.timer
                        .start(self.settings.get().warp_delay(), RoundTimer::WarpDelayElapsed);
                    return;
                }
                None if self.current.is_none() => {
                    warn!("No preset fits {} players, starting without a warp", population);
                }
                None => debug!("No other preset fits {} players, staying", population),
            }
        }

        self.start_round(0, true);
    }

    fn activate_preset(&mut self, preset: &Preset) {
        let info = self.presets.resolve(preset, &*self.world);
        self.notifier.game_info(None, &info);
        self.current = Some(ActivePreset {
            name: preset.name.clone(),
            info,
        });
        self.games_on_preset = 0;
        info!("Active preset is now {}", preset.name);
    }

    pub fn toggle_auto(&mut self) -> String {
        let enabled = !self.auto_enabled();
        let saved = self.settings.update(|s| s.auto_enabled = enabled);

        let mut feedback = if enabled {
            if self.round_active() {
                "Automation on, it takes over when this round ends".to_string()
            } else {
                self.attempt_automatic_start();
                if self.state == RoundState::WaitingForPlayers {
                    "Automation on, waiting for players".to_string()
                } else {
                    "Automation on".to_string()
                }
            }
        } else {
            match self.state {
                RoundState::Countdown => {
                    "Automation off, the countdown continues".to_string()
                }
                RoundState::InGame => {
                    if self.timer.pending() == Some(RoundTimer::RoundTimeLimit) {
                        self.timer.cancel();
                    }
                    "Automation off, the current round finishes normally".to_string()
                }
                _ => {
                    self.timer.cancel();
                    self.state = RoundState::PreGame;
                    "Automation off".to_string()
                }
            }
        };

        info!("{}", feedback);
        if let Err(e) = saved {
            warn!("Failed to save settings: {}", e);
            feedback.push_str(&format!(" (settings not saved: {})", e));
        }
        feedback
    }

    pub fn select_preset(&mut self, name: &str) -> String {
        if self.round_active() {
            return self.reject("Cannot change preset while a round is running");
        }

        self.presets.reload_if_dirty();
        let Some(preset) = self.presets.get(name).cloned() else {
            return self.reject(format!("Unknown preset `{}`", name));
        };

        self.activate_preset(&preset);
        format!("Switched to preset {}", preset.name)
    }

    pub fn reload_presets(&mut self) -> String {
        if self.round_active() {
            return self.reject("Cannot reload presets while a round is running");
        }

        match self.presets.reload() {
            Ok(summary) if summary.skipped.is_empty() => {
                format!("Reloaded {} presets", summary.added)
            }
            Ok(summary) => format!(
                "Reloaded {} presets, skipped duplicates: {}",
                summary.added,
                summary.skipped.join(", ")
            ),
            Err(e) => {
                warn!("Preset reload failed: {}", e);
                format!("Reload failed, keeping previous presets: {}", e)
            }
        }
    }

    pub fn get_setting(&self, key: SettingKey) -> String {
        format!("{} = {}", key.name(), key.get(self.settings.get()))
    }

    pub fn set_setting(&mut self, key: SettingKey, raw: &str) -> String {
        let value = match key.parse(raw) {
            Ok(value) => value,
            Err(reason) => return self.reject(reason),
        };

        match self.settings.update(|s| key.set(s, value)) {
            Ok(()) => {
                info!("Setting {} changed to {}", key.name(), value);
                format!("{} set to {}", key.name(), value)
            }
            Err(e) => {
                warn!("Failed to save settings: {}", e);
                format!("{} set to {} (settings not saved: {})", key.name(), value, e)
            }
        }
    }

    pub fn status(&self) -> String {
        format!(
            "{}; {} players connected; {} infected, {} uninfected; preset {} (round {} of {}); automation {}",
            self.state,
            self.population(),
            self.roster.infected_count(),
            self.roster.uninfected_count(),
            self.current_preset().unwrap_or("none"),
            self.games_on_preset,
            self.settings.get().max_games_per_preset,
            if self.auto_enabled() { "on" } else { "off" }
        )
    }

    pub fn list_presets(&self) -> String {
        if self.presets.is_empty() {
            return "No presets loaded".to_string();
        }
        self.presets
            .iter()
            .map(|p| {
                let marker = if Some(p.name.as_str()) == self.current_preset() {
                    "* "
                } else {
                    "  "
                };
                format!("{}{}", marker, p.describe())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
