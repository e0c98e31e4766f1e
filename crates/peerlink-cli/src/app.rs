//! Peerlink application: arbiter wiring, command handling and the chat relay

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use peerlink_core::{
    ArbiterError, ChannelListener, EstablishedChannel, PeerHandle, RoleArbiter, TransportAdapter,
};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::lan::LanTransport;
use crate::presenter::TerminalPresenter;

/// Arbiter outcome, forwarded from worker tasks to the command loop
#[derive(Debug)]
pub enum Notice {
    Channel(EstablishedChannel),
    /// `connection` is false when the failure was not an accept or connect
    Failure { reason: String, connection: bool },
    PeerDiscovered(PeerHandle),
    DiscoveryFinished,
}

/// Channel listener that forwards everything to the command loop
struct NoticeForwarder {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelListener for NoticeForwarder {
    fn on_channel_established(&self, channel: EstablishedChannel) {
        if self.tx.send(Notice::Channel(channel)).is_err() {
            warn!("Channel established after the command loop ended; dropping it");
        }
    }

    fn on_connection_failure(&self, error: &ArbiterError) {
        let _ = self.tx.send(Notice::Failure {
            reason: error.to_string(),
            connection: error.is_connection_failure(),
        });
    }

    fn on_peer_discovered(&self, peer: &PeerHandle) {
        let _ = self.tx.send(Notice::PeerDiscovered(peer.clone()));
    }

    fn on_discovery_finished(&self) {
        let _ = self.tx.send(Notice::DiscoveryFinished);
    }
}

/// Peers reported during one discovery session
///
/// The arbiter clears its discovery set before announcing the end of a
/// session, so the count is kept from the notices themselves.
#[derive(Debug, Default)]
pub struct ScanTally {
    found: usize,
}

impl ScanTally {
    pub fn observe(&mut self, notice: &Notice) {
        if let Notice::PeerDiscovered(_) = notice {
            self.found += 1;
        }
    }

    pub fn found(&self) -> usize {
        self.found
    }

    pub fn reset(&mut self) {
        self.found = 0;
    }

    /// What to tell the user when the session ends
    ///
    /// The listing is gone once the session ends, so picking needs a rescan.
    pub fn finished_message(&self) -> String {
        match self.found {
            0 => "No peers found. Press r to rescan, q to quit.".to_string(),
            1 => "Scan finished after finding 1 peer. Press r to rescan, q to quit.".to_string(),
            n => format!("Scan finished after finding {} peers. Press r to rescan, q to quit.", n),
        }
    }
}

/// What the user typed while peers were listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionInput {
    Choose(usize),
    Rescan,
    Quit,
    Unknown,
}

impl SelectionInput {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "q" | "quit" => Self::Quit,
            "r" | "rescan" => Self::Rescan,
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 => Self::Choose(n - 1),
                _ => Self::Unknown,
            },
        }
    }
}

/// Main application
pub struct PeerlinkApp {
    config: AppConfig,
    arbiter: RoleArbiter,
    notices: mpsc::UnboundedReceiver<Notice>,
    input: Lines<BufReader<Stdin>>,
}

impl PeerlinkApp {
    /// Create the application over the LAN transport
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let arbiter_config = config.arbiter_config();
        let transport: Arc<dyn TransportAdapter> =
            Arc::new(LanTransport::new(config.lan_config(), arbiter_config.service_id));
        Ok(Self::with_transport(config, transport))
    }

    /// Create the application over any transport
    pub fn with_transport(config: AppConfig, transport: Arc<dyn TransportAdapter>) -> Self {
        let (tx, notices) = mpsc::unbounded_channel();
        let arbiter = RoleArbiter::with_current_runtime(transport, config.arbiter_config());
        arbiter.set_channel_listener(Some(Arc::new(NoticeForwarder { tx })));
        arbiter.set_presenter(Some(Arc::new(TerminalPresenter::new())));

        Self {
            config,
            arbiter,
            notices,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub fn arbiter(&self) -> &RoleArbiter {
        &self.arbiter
    }

    /// Run one command to completion
    pub async fn run(mut self, command: Commands) -> Result<()> {
        let result = match command {
            Commands::Listen => self.listen().await,
            Commands::Scan => self.scan().await,
            Commands::Connect { address } => self.connect(address).await,
            Commands::Config => {
                print!("{}", self.config.to_toml()?);
                Ok(())
            }
        };
        self.arbiter.shutdown();
        result
    }

    async fn listen(&mut self) -> Result<()> {
        info!(
            "Waiting for a peer as '{}' on port {}",
            self.config.device.name, self.config.lan.listen_port
        );
        self.arbiter.start_accepting();
        loop {
            match self.notices.recv().await {
                Some(Notice::Channel(channel)) => return self.chat(channel).await,
                Some(Notice::Failure { reason, .. }) => return Err(CliError::Connection(reason)),
                Some(other) => debug!("Ignoring {:?} while listening", other),
                None => return Ok(()),
            }
        }
    }

    async fn connect(&mut self, address: String) -> Result<()> {
        info!("Connecting to {}", address);
        self.arbiter.attempt_connect(PeerHandle::new(address.as_str()));
        loop {
            match self.notices.recv().await {
                Some(Notice::Channel(channel)) => return self.chat(channel).await,
                Some(Notice::Failure { reason, .. }) => return Err(CliError::Connection(reason)),
                Some(other) => debug!("Ignoring {:?} while connecting", other),
                None => return Ok(()),
            }
        }
    }

    async fn scan(&mut self) -> Result<()> {
        let mut tally = ScanTally::default();
        println!("Scanning for peers...");
        self.arbiter.start_discovery();
        loop {
            tokio::select! {
                notice = self.notices.recv() => {
                    let Some(notice) = notice else { return Ok(()) };
                    tally.observe(&notice);
                    match notice {
                        Notice::Channel(channel) => return self.chat(channel).await,
                        Notice::Failure { reason, connection: true } => {
                            println!("Connection failed: {}. Press r to rescan.", reason);
                        }
                        Notice::Failure { reason, connection: false } => {
                            println!("{}. Press r to retry, q to quit.", reason);
                        }
                        Notice::PeerDiscovered(peer) => debug!("Discovered {}", peer.address),
                        Notice::DiscoveryFinished => println!("{}", tally.finished_message()),
                    }
                }
                line = self.input.next_line() => {
                    let Some(line) = line? else { return Ok(()) };
                    match SelectionInput::parse(&line) {
                        SelectionInput::Choose(index) => match self.arbiter.choose_peer(index) {
                            Ok(peer) => println!("Connecting to {}...", peer.display_name()),
                            Err(e) => println!("{}", e),
                        },
                        SelectionInput::Rescan => {
                            tally.reset();
                            println!("Scanning for peers...");
                            self.arbiter.start_discovery();
                        }
                        SelectionInput::Quit => return Ok(()),
                        SelectionInput::Unknown => {
                            println!("Type a peer number, r to rescan or q to quit.");
                        }
                    }
                }
            }
        }
    }

    /// Relay lines between the terminal and the channel until either side ends
    async fn chat(&mut self, channel: EstablishedChannel) -> Result<()> {
        let peer = channel
            .remote()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "peer".to_string());
        match channel.signal_strength() {
            Some(rssi) => println!("Connected ({}) to {} at {}", channel.direction(), peer, rssi),
            None => println!("Connected ({}) to {}", channel.direction(), peer),
        }
        println!("Type messages and press enter; /quit to leave.");

        let (reader, mut writer) = tokio::io::split(channel.into_stream());
        let mut remote_lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                incoming = remote_lines.next_line() => match incoming? {
                    Some(text) => println!("{}> {}", peer, text),
                    None => {
                        println!("{} disconnected", peer);
                        return Ok(());
                    }
                },
                line = self.input.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim() == "/quit" {
                        break;
                    }
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                }
            }
        }

        writer.shutdown().await?;
        Ok(())
    }
}
