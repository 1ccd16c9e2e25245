//! Host-side view of every client's download.

use std::collections::BTreeMap;

use colonylink_protocol::{PeerId, SyncProgress};

use crate::progress_bar;

/// Width of the per-client bar in [`SyncBoard::render`].
pub const BOARD_BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSync {
    pub name: String,
    pub file_id: String,
    pub received_chunks: i32,
    pub total_chunks: i32,
    pub percent: u8,
}

/// Latest reported progress per client, fed by `SyncProgress` packets.
#[derive(Debug, Default)]
pub struct SyncBoard {
    clients: BTreeMap<PeerId, ClientSync>,
    announced: bool,
}

impl SyncBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a report. Returns `true` the first time every tracked client
    /// reaches 100%.
    pub fn update(&mut self, report: &SyncProgress) -> bool {
        tracing::debug!(
            client = %report.client,
            percent = report.percent,
            received = report.received_chunks,
            total = report.total_chunks,
            "sync progress"
        );
        self.clients.insert(
            report.client,
            ClientSync {
                name: report.client_name.clone(),
                file_id: report.file_id.clone(),
                received_chunks: report.received_chunks,
                total_chunks: report.total_chunks,
                percent: report.percent,
            },
        );

        if !self.all_complete() {
            self.announced = false;
            return false;
        }
        if self.announced {
            return false;
        }
        self.announced = true;
        tracing::info!(clients = self.clients.len(), "all clients synchronized");
        true
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<ClientSync> {
        self.clients.remove(&peer)
    }

    pub fn get(&self, peer: PeerId) -> Option<&ClientSync> {
        self.clients.get(&peer)
    }

    /// At least one client is tracked and all are at 100%.
    pub fn all_complete(&self) -> bool {
        !self.clients.is_empty() && self.clients.values().all(|c| c.percent >= 100)
    }

    /// One line per client: name, bar, chunk counts.
    pub fn render(&self) -> Vec<String> {
        self.clients
            .values()
            .map(|c| {
                format!(
                    "{:<27} {} ({}/{})",
                    c.name,
                    progress_bar(c.percent, BOARD_BAR_WIDTH),
                    c.received_chunks,
                    c.total_chunks
                )
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
        self.announced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(client: u64, percent: u8) -> SyncProgress {
        SyncProgress {
            client: PeerId(client),
            client_name: format!("client-{client}"),
            file_id: "w.sav".into(),
            received_chunks: i32::from(percent) / 10,
            total_chunks: 10,
            percent,
        }
    }

    #[test]
    fn test_update_announces_completion_once() {
        let mut board = SyncBoard::new();
        assert!(!board.update(&report(1, 50)));
        assert!(!board.update(&report(2, 100)));
        assert!(board.update(&report(1, 100)));
        assert!(!board.update(&report(2, 100)));
    }

    #[test]
    fn test_remove_incomplete_client_completes_board() {
        let mut board = SyncBoard::new();
        board.update(&report(1, 100));
        board.update(&report(2, 30));
        board.remove(PeerId(2));
        assert!(board.all_complete());
    }

    #[test]
    fn test_all_complete_empty_board_is_false() {
        assert!(!SyncBoard::new().all_complete());
    }

    #[test]
    fn test_render_uses_twenty_char_bar() {
        let mut board = SyncBoard::new();
        board.update(&report(7, 50));
        let lines = board.render();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("client-7"));
        assert!(lines[0].contains("[==========----------] 50% (5/10)"));
    }
}
