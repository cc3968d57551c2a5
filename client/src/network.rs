//! Dependent node network layer: UDP plumbing between the local cache and
//! the authoritative node, plus local AFK detection.

use crate::cache::TimeCache;
use log::{debug, error, info, warn};
use shared::{
    afk, epoch_seconds, AfkActions, AfkMessage, AfkMonitor, Envelope, PlayerId, Scheduler,
    TaskHandle, TimeMessage, CHANNEL_AFK, CHANNEL_TIME,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// How often locally connected players are swept for idle transitions.
const AFK_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Dependent node: mirrors authoritative time for local players, detects
/// AFK transitions, and relays both over the wire. Holds no durable state.
pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    cache: Arc<TimeCache>,
    afk_actions: Arc<dyn AfkActions>,
    afk_monitor: Arc<Mutex<AfkMonitor>>,
    afk_sweep: StdMutex<Option<TaskHandle>>,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        afk_actions: Arc<dyn AfkActions>,
        scheduler: Scheduler,
        poll_interval: Duration,
        afk_threshold: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr: SocketAddr = server_addr.parse()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(TimeCache::new(outbound_tx.clone(), scheduler));
        cache.start_polling(poll_interval);

        let afk_monitor = Arc::new(Mutex::new(AfkMonitor::new(afk_threshold)));
        let afk_sweep = {
            let monitor = Arc::clone(&afk_monitor);
            let outbound = outbound_tx.clone();
            scheduler.run_repeating(AFK_SWEEP_INTERVAL, AFK_SWEEP_INTERVAL, move || {
                let monitor = Arc::clone(&monitor);
                let outbound = outbound.clone();
                async move {
                    let transitions = monitor.lock().await.check(epoch_seconds());
                    for transition in transitions {
                        send_afk(&outbound, &transition.to_message());
                    }
                }
            })
        };

        let client = Client {
            socket,
            server_addr,
            cache,
            afk_actions,
            afk_monitor,
            afk_sweep: StdMutex::new(Some(afk_sweep)),
            outbound_tx,
        };
        client.spawn_outbound_sender(outbound_rx);

        info!("Dependent node ready, authoritative node at {}", server_addr);
        Ok(client)
    }

    /// Host hook: a player joined this node. Seeds the time cache and
    /// starts watching for idleness.
    pub async fn handle_join(&self, player: PlayerId) {
        self.cache.handle_join(player).await;
        self.afk_monitor.lock().await.track(player, epoch_seconds());
    }

    /// Host hook: a player left this node.
    pub async fn handle_leave(&self, player: PlayerId) {
        self.cache.handle_leave(player).await;
        self.afk_monitor.lock().await.remove(player);
    }

    /// Host hook: a player did something. A player returning from AFK has
    /// the resume transition broadcast immediately.
    pub async fn handle_activity(&self, player: PlayerId) {
        let transition = self
            .afk_monitor
            .lock()
            .await
            .record_activity(player, epoch_seconds());
        if let Some(transition) = transition {
            self.send_afk_message(&transition.to_message());
        }
    }

    /// The cache is the host-facing read surface: cached totals and
    /// forwarded additions go through it.
    pub fn cache(&self) -> &Arc<TimeCache> {
        &self.cache
    }

    /// Broadcasts an AFK transition to the authoritative node. Encode
    /// failure aborts the send.
    pub fn send_afk_message(&self, message: &AfkMessage) {
        send_afk(&self.outbound_tx, message);
    }

    /// Spawns task that drains outbound envelopes toward the authoritative
    /// node. Frames that fail to encode are dropped whole.
    fn spawn_outbound_sender(&self, mut outbound_rx: mpsc::UnboundedReceiver<Envelope>) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;

        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                match envelope.encode() {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, server_addr).await {
                            error!("Failed to send to authoritative node: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Dropping outbound message on {}: {}", envelope.channel, e);
                    }
                }
            }
        });
    }

    async fn handle_envelope(&self, envelope: Envelope, addr: SocketAddr) {
        match envelope.channel.as_str() {
            CHANNEL_TIME => match TimeMessage::decode(&envelope.payload) {
                Ok(TimeMessage::Send { player, seconds }) => {
                    self.cache.handle_send(player, seconds).await;
                }
                Ok(other) => {
                    warn!("Unexpected time message {:?} from {}", other, addr);
                }
                Err(e) => warn!("Discarding malformed time message from {}: {}", addr, e),
            },
            CHANNEL_AFK => match AfkMessage::decode(&envelope.payload) {
                Ok(message) => {
                    let player = match &message {
                        AfkMessage::Afk { player, .. } | AfkMessage::Resume { player } => *player,
                    };
                    let present = self.cache.contains(player).await;
                    if !afk::dispatch(&message, present, self.afk_actions.as_ref()) {
                        debug!("AFK message for {} not dispatched", player);
                    }
                }
                Err(e) => afk::log_malformed(&e),
            },
            other => {
                warn!("Envelope on unknown channel {:?} from {}", other, addr);
            }
        }
    }

    /// Receive loop. Runs until ctrl-c, then cancels the poll and AFK
    /// sweep tasks. Nothing is flushed: the cache holds no authoritative
    /// data.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut buffer = [0u8; 2048];

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => match Envelope::decode(&buffer[..len]) {
                            Ok(envelope) => self.handle_envelope(envelope, addr).await,
                            Err(e) => warn!("Discarding malformed frame from {}: {}", addr, e),
                        },
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Cancels the periodic tasks this node owns.
    pub fn shutdown(&self) {
        let mut slot = self.afk_sweep.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.cancel();
        }
        self.cache.close();
    }
}

fn send_afk(outbound: &mpsc::UnboundedSender<Envelope>, message: &AfkMessage) {
    match message.encode() {
        Ok(payload) => {
            let _ = outbound.send(Envelope::new(CHANNEL_AFK, payload));
        }
        Err(e) => error!("Failed to encode AFK message: {}", e),
    }
}
