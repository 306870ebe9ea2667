//! Integration tests for the tag server
//!
//! These tests drive the public library API across module boundaries: full
//! sessions on a paused clock with presets and settings on disk, and a real
//! UDP server talking to real sockets.

use bincode::{deserialize, serialize};
use server::network::{Server, ServerMessage};
use server::notifier::{GameMessage, Notifier};
use server::preset::PresetRegistry;
use server::session::{RoundState, RoundTimer, Session};
use server::settings::{JsonSettingsFile, MemorySettingsStore, Settings, SettingsHandle};
use server::timer::TimerFired;
use server::world::WorldIndex;
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::assert_err;

fn temp_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tag-it-{}-{}.json", label, std::process::id()))
}

const WORLD: &str = r#"{
    "areas": [
        { "name": "Town", "transitions": ["left1", "right1", "door1"] },
        { "name": "Mines", "transitions": ["top1", "bot1"] }
    ]
}"#;

struct Fixture {
    session: Session,
    out: mpsc::UnboundedReceiver<GameMessage>,
    timers: mpsc::UnboundedReceiver<TimerFired<RoundTimer>>,
}

impl Fixture {
    fn new(settings: SettingsHandle, presets: PresetRegistry, world: WorldIndex) -> Self {
        let (out_tx, out) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let session = Session::new(settings, presets, Box::new(world), Notifier::new(out_tx), timer_tx)
            .with_seed(5);
        Self {
            session,
            out,
            timers,
        }
    }

    fn in_memory(settings: Settings) -> Self {
        Self::new(
            SettingsHandle::load(Box::new(MemorySettingsStore::with(settings))),
            PresetRegistry::new(),
            WorldIndex::default(),
        )
    }

    async fn fire_next(&mut self) -> RoundTimer {
        let fired = self.timers.recv().await.unwrap();
        self.session.handle_timer(fired);
        fired.kind
    }

    fn drain(&mut self) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.out.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// SESSION SCENARIO TESTS
mod session_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn late_joiner_cannot_win() {
        let mut fx = Fixture::in_memory(Settings::default());
        for id in 1..=3 {
            fx.session.player_connected(id);
        }

        fx.session.request_start(1);
        assert_eq!(fx.fire_next().await, RoundTimer::CountdownExpired);

        fx.session.player_connected(4);
        let uninfected = fx.session.roster().uninfected_ids();
        assert_eq!(uninfected.len(), 2);
        assert!(!uninfected.contains(&4));

        fx.drain();
        fx.session.player_tagged(uninfected[0]);

        let winners: Vec<Option<u32>> = fx
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                GameMessage::SendPacket {
                    packet: Packet::RoundEnd { winner, .. },
                    ..
                } => Some(winner),
                _ => None,
            })
            .collect();
        assert_eq!(winners, vec![Some(uninfected[1]); 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_countdown_ignores_the_cancelled_one() {
        let mut fx = Fixture::in_memory(Settings::default());
        for id in 1..=4 {
            fx.session.player_connected(id);
        }

        fx.session.request_start(1);
        sleep(Duration::from_secs(3)).await;
        fx.session.stop();
        fx.session.request_start(1);

        // Past the first deadline, short of the second.
        sleep(Duration::from_millis(2500)).await;
        assert_err!(fx.timers.try_recv());
        assert_eq!(fx.session.state(), RoundState::Countdown);

        assert_eq!(fx.fire_next().await, RoundTimer::CountdownExpired);
        assert_eq!(fx.session.state(), RoundState::InGame);
    }

    #[tokio::test(start_paused = true)]
    async fn every_disconnect_ends_round_cleanly() {
        let mut fx = Fixture::in_memory(Settings::default());
        for id in 1..=6 {
            fx.session.player_connected(id);
        }
        fx.session.request_start(2);
        fx.fire_next().await;

        for id in 1..=6 {
            fx.session.player_disconnected(id);
            if fx.session.state() != RoundState::InGame {
                break;
            }
            let roster = fx.session.roster();
            assert!(roster.infected_count() >= 1);
            assert!(roster.uninfected_count() >= 2);
        }

        assert_eq!(fx.session.state(), RoundState::PreGame);
        assert!(fx.session.roster().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn automation_with_files_on_disk() {
        let settings_path = temp_path("auto-settings");
        let presets_path = temp_path("auto-presets");
        let _ = std::fs::remove_file(&settings_path);

        std::fs::write(
            &presets_path,
            r#"{
                "default_loadouts": {
                    "infected": { "skin": "husk", "abilities": ["dash"] },
                    "uninfected": { "skin": "knight" }
                },
                "presets": [
                    { "name": "First", "warp": { "area": "Town", "entry": "door1" },
                      "restrictions": { "Town": ["left1", "right1"] } }
                ]
            }"#,
        )
        .unwrap();

        let world_path = temp_path("auto-world");
        std::fs::write(&world_path, WORLD).unwrap();

        let settings = SettingsHandle::load(Box::new(JsonSettingsFile::new(&settings_path)));
        let presets = PresetRegistry::from_path(&presets_path);
        let watcher = presets.watch(Duration::from_millis(100)).unwrap();
        let mut fx = Fixture::new(settings, presets, WorldIndex::load_or_empty(&world_path));

        fx.session.set_setting(server::settings::SettingKey::MaxGamesPerPreset, "1");
        fx.session.toggle_auto();
        let saved: Settings =
            serde_json::from_str(&std::fs::read_to_string(&settings_path).unwrap()).unwrap();
        assert!(saved.auto_enabled);
        assert_eq!(saved.max_games_per_preset, 1);

        for id in 1..=3 {
            fx.session.player_connected(id);
        }
        assert_eq!(fx.session.current_preset(), Some("First"));

        let info = fx.session.game_info();
        assert_eq!(info.warp.map(|w| (w.area, w.entry)), Some((0, 2)));
        assert_eq!(info.forbidden_exits(0), Some(&[0, 1][..]));
        assert_eq!(info.loadouts.infected.abilities, vec!["dash".to_string()]);

        assert_eq!(fx.fire_next().await, RoundTimer::WarpDelayElapsed);
        assert_eq!(fx.fire_next().await, RoundTimer::CountdownExpired);
        assert_eq!(fx.session.state(), RoundState::InGame);

        // Edit the presets mid-round; nothing changes until the next pick.
        std::fs::write(
            &presets_path,
            r#"{ "presets": [
                { "name": "First", "warp": { "area": "Town", "entry": "door1" } },
                { "name": "Second", "warp": { "area": "Mines", "entry": "top1" } }
            ] }"#,
        )
        .unwrap();
        sleep(Duration::from_millis(300)).await;
        assert!(fx.session.presets().is_dirty());
        assert_eq!(fx.session.presets().len(), 1);

        assert_eq!(fx.fire_next().await, RoundTimer::RoundTimeLimit);
        assert_eq!(fx.session.state(), RoundState::PostGame);

        assert_eq!(fx.fire_next().await, RoundTimer::CooldownElapsed);
        assert_eq!(fx.session.current_preset(), Some("Second"));
        assert_eq!(fx.session.presets().len(), 2);
        assert_eq!(
            fx.session.game_info().warp.map(|w| (w.area, w.entry)),
            Some((1, 0))
        );

        watcher.abort();
        for path in [settings_path, presets_path, world_path] {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// UDP SERVER TESTS
mod server_tests {
    use super::*;

    async fn start_server(settings: Settings) -> (SocketAddr, mpsc::UnboundedSender<ServerMessage>) {
        let mut server = Server::new(
            "127.0.0.1:0",
            16,
            Duration::from_secs(30),
            SettingsHandle::load(Box::new(MemorySettingsStore::with(settings))),
            PresetRegistry::new(),
            Box::new(WorldIndex::default()),
        )
        .await
        .unwrap();

        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                panic!("server failed: {}", e);
            }
        });
        (addr, handle)
    }

    async fn send(socket: &UdpSocket, server: SocketAddr, packet: &Packet) {
        socket
            .send_to(&serialize(packet).unwrap(), server)
            .await
            .unwrap();
    }

    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        deserialize(&buf[..len]).unwrap()
    }

    async fn join(server: SocketAddr) -> (UdpSocket, u32) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        send(&socket, server, &Packet::Connect { client_version: PROTOCOL_VERSION }).await;

        let Packet::Connected { client_id } = recv(&socket).await else {
            panic!("expected Connected");
        };
        assert!(matches!(recv(&socket).await, Packet::GameInfo { .. }));
        (socket, client_id)
    }

    /// Three players over UDP: start from the console, one tag, one winner.
    #[tokio::test]
    async fn three_player_round_over_udp() {
        let (server, handle) = start_server(Settings {
            countdown_seconds: 0,
            ..Settings::default()
        })
        .await;

        let mut players = Vec::new();
        for _ in 0..3 {
            players.push(join(server).await);
        }

        handle
            .send(ServerMessage::OperatorCommand {
                line: "start 1".to_string(),
            })
            .unwrap();

        let mut uninfected = Vec::new();
        for (socket, id) in &players {
            assert_eq!(
                recv(socket).await,
                Packet::Countdown {
                    seconds: 0,
                    infected_count: 1
                }
            );
            match recv(socket).await {
                Packet::RoundStart {
                    is_infected,
                    infected_ids,
                } => {
                    assert_eq!(infected_ids.len(), 1);
                    assert_eq!(is_infected, infected_ids.contains(id));
                    if !is_infected {
                        uninfected.push(*id);
                    }
                }
                other => panic!("expected RoundStart, got {:?}", other),
            }
        }
        assert_eq!(uninfected.len(), 2);

        let (tagged_socket, _) = players
            .iter()
            .find(|(_, id)| *id == uninfected[0])
            .unwrap();
        send(tagged_socket, server, &Packet::Tagged).await;

        for (socket, id) in &players {
            assert_eq!(
                recv(socket).await,
                Packet::RoundEnd {
                    winner: Some(uninfected[1]),
                    is_you: *id == uninfected[1],
                }
            );
        }

        handle.send(ServerMessage::Shutdown).unwrap();
    }

    #[tokio::test]
    async fn disconnect_packet_counts_as_tag() {
        let (server, handle) = start_server(Settings {
            countdown_seconds: 0,
            ..Settings::default()
        })
        .await;

        let mut players = Vec::new();
        for _ in 0..3 {
            players.push(join(server).await);
        }
        handle
            .send(ServerMessage::OperatorCommand {
                line: "start".to_string(),
            })
            .unwrap();

        let mut uninfected = Vec::new();
        for (socket, id) in &players {
            recv(socket).await;
            if let Packet::RoundStart { is_infected: false, .. } = recv(socket).await {
                uninfected.push(*id);
            }
        }

        let (leaver, _) = players
            .iter()
            .find(|(_, id)| *id == uninfected[0])
            .unwrap();
        send(leaver, server, &Packet::Disconnect).await;

        for (socket, id) in players.iter().filter(|(_, id)| *id != uninfected[0]) {
            assert_eq!(
                recv(socket).await,
                Packet::RoundEnd {
                    winner: Some(uninfected[1]),
                    is_you: *id == uninfected[1],
                }
            );
        }
    }

    #[tokio::test]
    async fn garbage_datagrams_are_ignored() {
        let (server, _handle) = start_server(Settings::default()).await;
        let noisy = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        noisy.send_to(&[0xff, 0x00, 0x13], server).await.unwrap();

        // The server is still serving afterwards.
        let (_socket, id) = join(server).await;
        assert_eq!(id, 1);
    }
}
