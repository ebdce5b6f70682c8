use tracing::{debug, info, warn};

use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Reachability of the remote inference service. Status only moves
/// through probe results and remote-call outcomes, never from UI code.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    status: ConnectionStatus,
    probing: bool,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Claims the single probe slot. False means a probe is already out
    /// and this request is dropped.
    pub fn begin_probe(&mut self) -> bool {
        if self.probing {
            debug!("probe already in flight, ignoring request");
            return false;
        }
        self.probing = true;
        true
    }

    pub fn finish_probe(&mut self, result: Result<(), RemoteError>) {
        self.probing = false;
        match result {
            Ok(()) => self.set(ConnectionStatus::Online),
            Err(e) => {
                warn!("health probe failed: {}", e);
                self.set(ConnectionStatus::Offline);
            }
        }
    }

    /// Gives the slot back without a result, for a probe whose turn was
    /// abandoned before it answered.
    pub fn release_probe(&mut self) {
        self.probing = false;
    }

    pub fn mark_unreachable(&mut self) {
        self.set(ConnectionStatus::Offline);
    }

    fn set(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(from = ?self.status, to = ?status, "connection status changed");
            self.status = status;
        }
    }
}
