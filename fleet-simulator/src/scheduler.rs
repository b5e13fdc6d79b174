//! Concurrent publish loop supervision
//!
//! One supervised tokio task per device, all sharing the single
//! `ConnectionManager`. A loop that panics is logged and restarted so the
//! fleet survives the misbehavior of a single simulated device; shutdown is
//! cooperative with a bounded per-loop grace period.

use crate::connection::ConnectionManager;
use crate::device::Device;
use crate::errors::DeviceLoopError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Pause before restarting a crashed device loop.
const RESTART_PAUSE: Duration = Duration::from_millis(500);

/// Launches and supervises the per-device publish loops.
pub struct PublishScheduler {
    cancel_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
    grace: Duration,
}

impl PublishScheduler {
    pub fn new(grace: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            cancel_tx,
            handles: Vec::new(),
            grace,
        }
    }

    /// Start one independent supervised loop per device. All loops share the
    /// same connection; none blocks another.
    pub fn start(&mut self, devices: Vec<Device>, connection: Arc<ConnectionManager>) {
        for device in devices {
            let device_id = device.identity().device_id.clone();
            let cancel = self.cancel_tx.subscribe();
            let connection = connection.clone();
            info!("Starting publish loop for '{}'", device_id);
            let handle = tokio::spawn(supervise_device(device, connection, cancel));
            self.handles.push((device_id, handle));
        }
    }

    /// Signal cancellation and wait for every loop to exit, each under the
    /// grace period. Best effort: a loop that does not come back in time is
    /// abandoned with a warning.
    pub async fn stop(mut self) {
        info!("Stopping {} device loops", self.handles.len());
        let _ = self.cancel_tx.send(true);
        for (device_id, mut handle) in self.handles.drain(..) {
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        "Device loop '{}' did not stop within {:?}, abandoning it",
                        device_id, self.grace
                    );
                    handle.abort();
                }
            }
        }
        info!("All device loops stopped");
    }
}

async fn supervise_device(
    device: Device,
    connection: Arc<ConnectionManager>,
    cancel: watch::Receiver<bool>,
) {
    let device_id = device.identity().device_id.clone();
    let loop_cancel = cancel.clone();
    run_supervised(device_id, cancel, move || {
        let device = device.clone();
        let connection = connection.clone();
        let cancel = loop_cancel.clone();
        async move { device.run_loop(connection, cancel).await }
    })
    .await;
}

/// Run `make_loop` as a task, restarting it whenever it dies without having
/// been cancelled. A clean return means the loop observed cancellation.
async fn run_supervised<F, Fut>(device_id: String, cancel: watch::Receiver<bool>, make_loop: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let task = tokio::spawn(make_loop());
        match task.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                let crash = DeviceLoopError {
                    device_id: device_id.clone(),
                    reason: format!("{e}"),
                };
                error!("{}; restarting after {:?}", crash, RESTART_PAUSE);
                tokio::time::sleep(RESTART_PAUSE).await;
                if *cancel.borrow() {
                    break;
                }
            }
            // Task aborted: scheduler shutdown already in progress.
            Err(_) => break,
        }
    }
}
