//! Discovery engine
//!
//! The radio is a process-wide singleton, so at most one scan runs at a time
//! across all sessions. [`ScanCoordinator`] owns that scan: starting a new one
//! stops the previous one whoever owns it, and `connect` from any session stops
//! whatever is running.
//!
//! A scan runs in its own task, blocked inside the provider's `scan` call.
//! Stopping is advisory, so a superseded scan is first muted (its callback stops
//! pushing), then asked to stop, and aborted if it has not returned within the
//! grace period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::{BleAdapter, ScanCallback};
use crate::filter::matches_any;
use crate::protocol::{Message, DID_DISCOVER_PERIPHERAL};
use crate::session::SessionId;
use crate::transport::Outbound;
use crate::types::{Advertisement, DiscoverFilter};

// ----------------------------------------------------------------------------
// Active Scan
// ----------------------------------------------------------------------------

struct ActiveScan {
    owner: SessionId,
    live: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Scan Coordinator
// ----------------------------------------------------------------------------

/// Serializes scan start/stop across every session sharing an adapter
pub struct ScanCoordinator<A: BleAdapter> {
    adapter: Arc<A>,
    active: Mutex<Option<ActiveScan>>,
    stop_grace: Duration,
}

impl<A: BleAdapter> ScanCoordinator<A> {
    pub fn new(adapter: Arc<A>, stop_grace: Duration) -> Self {
        Self {
            adapter,
            active: Mutex::new(None),
            stop_grace,
        }
    }

    /// Replace any running scan with a new one owned by `owner`
    ///
    /// Returns as soon as the scan task is spawned; matching advertisements
    /// are pushed to `outbound` as `didDiscoverPeripheral`.
    pub async fn start(&self, owner: SessionId, filters: Vec<DiscoverFilter>, outbound: Outbound) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.halt(previous).await;
        }

        let live = Arc::new(AtomicBool::new(true));
        let callback = discovery_callback(filters, outbound, live.clone());
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = adapter.scan(callback).await {
                warn!("Scan for session {} failed: {}", owner, e);
            }
            debug!("Scan for session {} returned", owner);
        });

        info!("Session {} started scanning", owner);
        *active = Some(ActiveScan { owner, live, task });
    }

    /// Stop the running scan, whichever session owns it
    pub async fn stop(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(scan) => {
                self.halt(scan).await;
                true
            }
            None => false,
        }
    }

    /// Stop the running scan only if `owner` started it
    pub async fn stop_owned(&self, owner: SessionId) -> bool {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|scan| scan.owner) != Some(owner) {
            return false;
        }
        match active.take() {
            Some(scan) => {
                self.halt(scan).await;
                true
            }
            None => false,
        }
    }

    /// Session owning the running scan, if any
    pub async fn owner(&self) -> Option<SessionId> {
        self.active.lock().await.as_ref().map(|scan| scan.owner)
    }

    async fn halt(&self, scan: ActiveScan) {
        scan.live.store(false, Ordering::Release);

        let mut task = scan.task;
        if task.is_finished() {
            return;
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan for session {}: {}", scan.owner, e);
        }

        if tokio::time::timeout(self.stop_grace, &mut task).await.is_err() {
            warn!(
                "Scan for session {} still running after {:?}, aborting",
                scan.owner, self.stop_grace
            );
            task.abort();
        }
        info!("Stopped scan for session {}", scan.owner);
    }
}

fn discovery_callback(
    filters: Vec<DiscoverFilter>,
    outbound: Outbound,
    live: Arc<AtomicBool>,
) -> ScanCallback {
    Arc::new(move |advertisement: Advertisement| {
        if !live.load(Ordering::Acquire) {
            return;
        }

        trace!(
            "Advertisement {} {:?} rssi {}",
            advertisement.address,
            advertisement.local_name,
            advertisement.rssi
        );

        if !matches_any(&filters, &advertisement) {
            return;
        }

        outbound.push(Message::new_push(
            DID_DISCOVER_PERIPHERAL,
            advertisement.to_device(),
        ));
    })
}
