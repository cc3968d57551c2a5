//! Authoritative node network layer handling UDP communications and the
//! flush/shutdown loop.

use crate::accumulator::SessionAccumulator;
use log::{debug, error, info, warn};
use shared::{
    afk, epoch_seconds, AfkActions, AfkMessage, Envelope, TimeMessage, CHANNEL_AFK, CHANNEL_TIME,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    EnvelopeReceived {
        envelope: Envelope,
        addr: SocketAddr,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outgoing envelopes queued by the main loop for the sender task
#[derive(Debug)]
pub enum NetMessage {
    SendEnvelope {
        envelope: Envelope,
        addr: SocketAddr,
    },
}

/// Authoritative node: owns the session accumulator and answers dependent
/// nodes over a UDP socket.
pub struct Server {
    socket: Arc<UdpSocket>,
    accumulator: Arc<SessionAccumulator>,
    afk_actions: Arc<dyn AfkActions>,
    flush_interval: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    net_tx: mpsc::UnboundedSender<NetMessage>,
    net_rx: Option<mpsc::UnboundedReceiver<NetMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        accumulator: Arc<SessionAccumulator>,
        afk_actions: Arc<dyn AfkActions>,
        flush_interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Authoritative node listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            accumulator,
            afk_actions,
            flush_interval,
            server_tx,
            server_rx,
            net_tx,
            net_rx: Some(net_rx),
        })
    }

    /// The bound address, useful when the node was started on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    pub fn accumulator(&self) -> &Arc<SessionAccumulator> {
        &self.accumulator
    }

    /// Host hook: a player connected to this node at `now`.
    pub async fn handle_connect(&self, player: shared::PlayerId, now: u64) {
        self.accumulator.start_accumulating(player, now).await;
    }

    /// Host hook: a player disconnected from this node at `now`. Storage
    /// failures are logged; the session stays recoverable in memory.
    pub async fn handle_disconnect(&self, player: shared::PlayerId, now: u64) {
        if let Err(e) = self
            .accumulator
            .stop_accumulating_and_save(player, now)
            .await
        {
            error!("Failed to persist session for {}: {}", player, e);
        }
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Envelope::decode(&buffer[..len]) {
                        Ok(envelope) => {
                            if server_tx
                                .send(ServerMessage::EnvelopeReceived { envelope, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Discarding malformed frame from {}: {}", addr, e);
                        }
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing envelope queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut net_rx) = self.net_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(NetMessage::SendEnvelope { envelope, addr }) = net_rx.recv().await {
                // Encode failure means nothing is sent; never a partial frame
                match envelope.encode() {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, addr).await {
                            error!("Failed to send to {}: {}", addr, e);
                        }
                    }
                    Err(e) => {
                        error!("Dropping outbound message on {}: {}", envelope.channel, e);
                    }
                }
            }
        });
    }

    fn queue_envelope(&self, envelope: Envelope, addr: SocketAddr) {
        if self
            .net_tx
            .send(NetMessage::SendEnvelope { envelope, addr })
            .is_err()
        {
            error!("Failed to queue envelope for sending");
        }
    }

    /// Processes one received envelope, routing by channel.
    async fn handle_envelope(&self, envelope: Envelope, addr: SocketAddr) {
        match envelope.channel.as_str() {
            CHANNEL_TIME => match TimeMessage::decode(&envelope.payload) {
                Ok(message) => self.handle_time_message(message, addr).await,
                Err(e) => warn!("Discarding malformed time message from {}: {}", addr, e),
            },
            CHANNEL_AFK => match AfkMessage::decode(&envelope.payload) {
                Ok(message) => self.handle_afk_message(message).await,
                Err(e) => afk::log_malformed(&e),
            },
            other => {
                warn!("Envelope on unknown channel {:?} from {}", other, addr);
            }
        }
    }

    async fn handle_time_message(&self, message: TimeMessage, addr: SocketAddr) {
        match message {
            TimeMessage::Get { player } => {
                let now = epoch_seconds();
                let seconds = match self.accumulator.live_total(player, now).await {
                    Ok(total) => total.unwrap_or(0),
                    Err(e) => {
                        error!("Failed to read total for {}: {}", player, e);
                        return;
                    }
                };
                let response = TimeMessage::Send { player, seconds };
                match response.encode() {
                    Ok(payload) => {
                        self.queue_envelope(Envelope::new(CHANNEL_TIME, payload), addr);
                    }
                    Err(e) => error!("Failed to encode time response: {}", e),
                }
            }
            TimeMessage::Add { player, seconds } => {
                // Fire-and-forget from the sender's side; log-only on failure
                if let Err(e) = self.accumulator.store().add_time(player, seconds).await {
                    error!("Forwarded addition for {} failed: {}", player, e);
                }
            }
            TimeMessage::Send { .. } => {
                warn!("Unexpected time response from {}", addr);
            }
        }
    }

    async fn handle_afk_message(&self, message: AfkMessage) {
        let player = match &message {
            AfkMessage::Afk { player, .. } | AfkMessage::Resume { player } => *player,
        };
        let present = self.accumulator.is_accumulating(player).await;
        if !afk::dispatch(&message, present, self.afk_actions.as_ref()) {
            debug!("AFK message for {} not dispatched", player);
        }
    }

    /// Main server loop coordinating network handling, periodic flushes,
    /// and ctrl-c shutdown. Returns once the accumulator has been flushed
    /// and the store closed.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut flush_ticker = interval(self.flush_interval);
        // First tick fires immediately; skip it
        flush_ticker.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        info!("Authoritative node started");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::EnvelopeReceived { envelope, addr }) => {
                            self.handle_envelope(envelope, addr).await;
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Authoritative node shutting down");
                            break;
                        }
                    }
                }

                _ = flush_ticker.tick() => {
                    if let Err(e) = self.accumulator.flush_online_time_cache(epoch_seconds()).await {
                        error!("Periodic flush failed: {}", e);
                    }
                }

                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    break;
                }
            }
        }

        // Flush then close, in that order, so no open interval is lost
        match self.accumulator.close(epoch_seconds()).await {
            Ok(()) => info!("All sessions flushed, store closed"),
            Err(e) => error!("Final flush failed: {}", e),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PlayerId;

    #[test]
    fn test_server_message_creation() {
        let envelope = Envelope::new(CHANNEL_TIME, vec![1, 2, 3]);
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        let msg = ServerMessage::EnvelopeReceived {
            envelope: envelope.clone(),
            addr,
        };

        match msg {
            ServerMessage::EnvelopeReceived {
                envelope: e,
                addr: a,
            } => {
                assert_eq!(a, addr);
                assert_eq!(e, envelope);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_net_message_carries_destination() {
        let addr: SocketAddr = "192.168.1.1:9090".parse().unwrap();
        let payload = TimeMessage::Get {
            player: PlayerId::new(5),
        }
        .encode()
        .unwrap();

        let msg = NetMessage::SendEnvelope {
            envelope: Envelope::new(CHANNEL_TIME, payload),
            addr,
        };

        match msg {
            NetMessage::SendEnvelope { envelope, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(envelope.channel, CHANNEL_TIME);
            }
        }
    }
}
