//! Server network layer: UDP communication and the session event loop
//!
//! A handful of background tasks feed one loop. The loop is the only owner
//! of the [`Session`], so packets, timeouts, operator commands and timer
//! firings are applied strictly one after another.

use crate::client_manager::ClientManager;
use crate::command;
use crate::notifier::{GameMessage, Notifier};
use crate::preset::PresetRegistry;
use crate::session::{RoundTimer, Session};
use crate::settings::SettingsHandle;
use crate::timer::TimerFired;
use crate::world::TransitionIndex;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from background tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    /// One line typed at the operator console.
    OperatorCommand {
        line: String,
    },
    Shutdown,
}

/// Main server coordinating networking and the game session
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    session: Session,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired<RoundTimer>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        client_timeout: Duration,
        settings: SettingsHandle,
        presets: PresetRegistry,
        world: Box<dyn TransitionIndex + Send + Sync>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let session = Session::new(settings, presets, world, Notifier::new(game_tx), timer_tx);

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, client_timeout))),
            session,
            server_tx,
            server_rx,
            game_rx: Some(game_rx),
            timer_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for injecting messages into the main loop, e.g. operator
    /// commands or a shutdown request.
    pub fn handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue. A failed send
    /// is logged and skipped; it never holds up the other recipients.
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            warn!("Network sender already running");
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, client_id } => {
                        let addr = clients.read().await.addr_of(client_id);
                        let Some(addr) = addr else {
                            debug!("Client {} is gone, dropping {:?}", client_id, packet);
                            continue;
                        };
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send to client {}: {}", client_id, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = clients.read().await.get_client_addrs();

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts();

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    /// Spawns task that reads operator commands from standard input
    pub fn spawn_console_reader(&self) {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if server_tx.send(ServerMessage::OperatorCommand { line }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Console closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Sends straight to an address, for handshake replies to peers that
    /// have no client id.
    async fn send_direct(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = Self::send_packet_impl(socket, packet, addr).await {
            error!("Failed to send packet to {}: {}", addr, e);
        }
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => self.handle_connect(client_version, addr).await,

            Packet::Tagged => {
                let client_id = self.clients.write().await.touch(addr);
                match client_id {
                    Some(client_id) => self.session.player_tagged(client_id),
                    None => debug!("Tag from unknown address {}", addr),
                }
            }

            Packet::Heartbeat => {
                self.clients.write().await.touch(addr);
            }

            Packet::Disconnect => {
                let client_id = self.clients.read().await.find_client_by_addr(addr);

                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    self.session.player_disconnected(client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            warn!(
                "Rejecting {}: protocol version {} (server speaks {})",
                addr, client_version, PROTOCOL_VERSION
            );
            let response = Packet::Disconnected {
                reason: "Protocol version mismatch".to_string(),
            };
            Self::send_direct(&self.socket, &response, addr).await;
            return;
        }

        // A reconnect from the same address replaces the old client.
        let existing_client_id = self.clients.read().await.find_client_by_addr(addr);
        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            self.clients.write().await.remove_client(&existing_id);
            self.session.player_disconnected(existing_id);
        }

        let client_id = self.clients.write().await.add_client(addr);
        match client_id {
            Some(client_id) => {
                Self::send_direct(&self.socket, &Packet::Connected { client_id }, addr).await;
                self.session.player_connected(client_id);
            }
            None => {
                let response = Packet::Disconnected {
                    reason: "Server full".to_string(),
                };
                Self::send_direct(&self.socket, &response, addr).await;
            }
        }
    }

    fn handle_command(&mut self, line: &str) {
        if let Some(feedback) = command::run_line(&mut self.session, line) {
            println!("{}", feedback);
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        }
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.session.player_disconnected(client_id);
                        }
                        Some(ServerMessage::OperatorCommand { line }) => {
                            self.handle_command(&line);
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                Some(fired) = self.timer_rx.recv() => {
                    self.session.handle_timer(fired);
                }
            }
        }

        Ok(())
    }
}
