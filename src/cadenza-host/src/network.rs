use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the machine can currently reach the network.
pub trait NetworkMonitor: Send + Sync {
    fn has_connectivity(&self) -> bool;
}

/// Assumes the network is always reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkMonitor for AlwaysOnline {
    fn has_connectivity(&self) -> bool {
        true
    }
}

/// Connectivity flag set by whoever observes the network.
#[derive(Debug)]
pub struct ManualNetwork {
    connected: AtomicBool,
}

impl ManualNetwork {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

impl NetworkMonitor for ManualNetwork {
    fn has_connectivity(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
