//! Terminal rendering of discovered peers

use std::io::Write;

use parking_lot::Mutex;
use peerlink_core::{DeviceSelectionPresenter, PeerHandle};

/// Prints the discovery set as a numbered list
///
/// Entries are numbered from 1; `choose_peer` takes the number minus one.
#[derive(Default)]
pub struct TerminalPresenter {
    shown: Mutex<usize>,
}

impl TerminalPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numbered listing of `peers`, one per line
    pub fn render(peers: &[PeerHandle]) -> String {
        peers
            .iter()
            .enumerate()
            .map(|(i, peer)| format!("  [{}] {} ({})\n", i + 1, peer, peer.address))
            .collect()
    }
}

impl DeviceSelectionPresenter for TerminalPresenter {
    fn present(&self, peers: &[PeerHandle]) {
        let mut shown = self.shown.lock();
        // Only the newest entries; earlier ones are still on screen
        let fresh = &peers[(*shown).min(peers.len())..];
        if *shown == 0 && !fresh.is_empty() {
            println!("Nearby peers (type a number to connect, r to rescan, q to quit):");
        }
        let rendered: String = Self::render(peers)
            .lines()
            .skip(*shown)
            .map(|line| format!("{}\n", line))
            .collect();
        print!("{}", rendered);
        let _ = std::io::stdout().flush();
        *shown = peers.len();
    }

    fn dismiss(&self) {
        *self.shown.lock() = 0;
    }
}
