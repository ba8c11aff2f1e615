use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::bus::BusTable;
use crate::dispatch::Dispatcher;
use crate::error::ConnectionError;
use crate::queue::FrameQueue;
use crate::traits::ConnectionBackend;
use crate::types::{
    BusConfig, ConnectionKind, ConnectionOptions, ConnectionStatus, FilterRule, Frame,
    FrameVerdict, StatusCell,
};
use crate::Result;

/// State reachable from both the facade and the owning thread.
struct Shared {
    buses: BusTable,
    status: StatusCell,
    capture_suspended: AtomicBool,
    queue: FrameQueue,
    started: AtomicBool,
}

/// Receive-path handle given to a backend when its connection starts.
///
/// Cheap to clone; a backend typically stores one and, for every inbound
/// frame, either calls [`deliver`](Self::deliver) or runs
/// [`evaluate`](Self::evaluate) and pushes to the queue itself.
#[derive(Clone)]
pub struct ReceiveContext {
    shared: Arc<Shared>,
}

impl ReceiveContext {
    /// Decides whether a frame seen on `bus` is kept and whether it should
    /// be flagged for notification.
    pub fn evaluate(&self, bus: usize, frame_id: u32) -> FrameVerdict {
        self.shared.buses.evaluate(bus, frame_id)
    }

    /// Evaluates a frame and, when it is kept and capture is not
    /// suspended, enqueues it. Returns the notify flag when the frame was
    /// enqueued, `None` when it was dropped (filtered out, suspended, or
    /// queue full).
    pub fn deliver(&self, frame: Frame) -> Option<bool> {
        let verdict = self.shared.buses.evaluate(frame.bus, frame.id);
        if verdict.discard || self.is_capture_suspended() {
            return None;
        }
        if self.shared.queue.push(frame) {
            Some(verdict.notify)
        } else {
            None
        }
    }

    pub fn queue(&self) -> FrameQueue {
        self.shared.queue.clone()
    }

    pub fn is_capture_suspended(&self) -> bool {
        self.shared.capture_suspended.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.load()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.shared.status.store(status);
    }
}

/// Thread-safe facade over one multi-bus CAN adapter.
///
/// All hardware-touching operations are marshalled onto the connection's
/// owning execution context — a dedicated thread in threaded mode, the
/// caller's own thread otherwise — and block until that context has
/// completed them. Bookkeeping accessors (`bus_config` and friends) and
/// the status register never dispatch.
pub struct CanConnection {
    port: String,
    kind: ConnectionKind,
    backend: Arc<dyn ConnectionBackend>,
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
}

impl CanConnection {
    pub fn new(backend: Arc<dyn ConnectionBackend>, options: ConnectionOptions) -> Result<Self> {
        if options.buses == 0 {
            return Err(ConnectionError::InvalidOptions("bus count must be at least 1"));
        }
        if options.queue_capacity == 0 {
            return Err(ConnectionError::InvalidOptions(
                "queue capacity must be at least 1",
            ));
        }
        Ok(Self {
            port: options.port,
            kind: options.kind,
            backend,
            shared: Arc::new(Shared {
                buses: BusTable::new(options.buses),
                status: StatusCell::new(),
                capture_suspended: AtomicBool::new(false),
                queue: FrameQueue::with_capacity(options.queue_capacity),
                started: AtomicBool::new(false),
            }),
            dispatcher: Dispatcher::new(options.threaded),
        })
    }

    /// Starts the connection.
    ///
    /// In threaded mode this launches the owning thread and returns
    /// immediately; the rest of startup (setting the started flag and
    /// invoking the backend's startup hook) runs as the first job on that
    /// thread. In direct mode startup completes synchronously. Starting an
    /// already-started connection is a no-op.
    pub fn start(&self) {
        if self.dispatcher.is_threaded() {
            let shared = Arc::clone(&self.shared);
            let backend = Arc::clone(&self.backend);
            let startup = Box::new(move || {
                shared.started.store(true, Ordering::SeqCst);
                let ctx = ReceiveContext {
                    shared: Arc::clone(&shared),
                };
                backend.on_started(ctx);
            });
            if self.dispatcher.launch(&format!("can-conn-{}", self.port), startup) {
                debug!(port = %self.port, "connection starting on owning thread");
            }
            return;
        }
        if self.is_started() {
            return;
        }
        self.shared.started.store(true, Ordering::SeqCst);
        self.backend.on_started(self.receive_context());
        debug!(port = %self.port, "connection started");
    }

    /// Suspends or resumes the device, on the owning context.
    pub fn suspend(&self, suspend: bool) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        self.dispatcher.call(move || {
            backend.on_suspend(suspend);
            Ok(())
        })
    }

    /// Stops the connection.
    ///
    /// While the owning thread is running and the connection was started,
    /// the stop hook is dispatched onto that thread, after which the
    /// thread is asked to exit and joined; the caller blocks until it has
    /// fully terminated. A later call finds the thread already finished
    /// and does nothing, so the stop hook runs at most once down this
    /// path. With no running owning thread the hook is invoked directly.
    pub fn stop(&self) -> Result<()> {
        if self.dispatcher.is_running() && self.is_started() && !self.dispatcher.on_owner_thread() {
            let backend = Arc::clone(&self.backend);
            self.dispatcher.call(move || {
                backend.on_stop();
                Ok(())
            })?;
            self.dispatcher.shutdown();
            debug!(port = %self.port, "connection stopped");
            return Ok(());
        }
        if self.dispatcher.is_finished() {
            return Ok(());
        }
        self.backend.on_stop();
        debug!(port = %self.port, "connection stopped");
        Ok(())
    }

    /// Sends one frame, on the owning context.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        self.dispatcher.call(move || backend.send_frame(&frame))
    }

    /// Sends frames in order, stopping at the first failure.
    pub fn send_frames(&self, frames: Vec<Frame>) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        self.dispatcher.call(move || backend.send_frames(&frames))
    }

    /// Reads the live settings of one bus from the device.
    pub fn bus_settings(&self, bus: usize) -> Result<BusConfig> {
        let backend = Arc::clone(&self.backend);
        self.dispatcher.call(move || backend.bus_settings(bus))
    }

    /// Programs one bus of the device.
    pub fn set_bus_settings(&self, bus: usize, config: BusConfig) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        self.dispatcher
            .call(move || backend.set_bus_settings(bus, config))
    }

    /// Replaces the filter rules and exclude-unmatched flag of one bus.
    ///
    /// Runs on the owning context because, when `exclude_unmatched` is
    /// set, matching is additionally offloaded to the backend's hardware
    /// filter hook.
    pub fn set_filters(
        &self,
        bus: usize,
        rules: Vec<FilterRule>,
        exclude_unmatched: bool,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        self.dispatcher.call(move || {
            shared
                .buses
                .replace_filters(bus, &rules, exclude_unmatched)?;
            if exclude_unmatched {
                backend.set_hardware_filters(bus, &rules);
            }
            Ok(())
        })
    }

    /// Decides the disposition of an inbound frame on `bus`.
    pub fn evaluate_frame(&self, bus: usize, frame_id: u32) -> FrameVerdict {
        self.shared.buses.evaluate(bus, frame_id)
    }

    pub fn is_configured(&self, bus: usize) -> bool {
        self.shared.buses.is_configured(bus)
    }

    pub fn set_configured(&self, bus: usize, configured: bool) -> Result<()> {
        self.shared.buses.set_configured(bus, configured)
    }

    /// Returns the locally stored configuration of a bus, failing when the
    /// index is invalid or the bus was never configured.
    pub fn bus_config(&self, bus: usize) -> Result<BusConfig> {
        self.shared.buses.config(bus)
    }

    /// Stores a bus configuration locally and marks the bus configured.
    pub fn set_bus_config(&self, bus: usize, config: BusConfig) -> Result<()> {
        self.shared.buses.set_config(bus, config)
    }

    pub fn bus_count(&self) -> usize {
        self.shared.buses.len()
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.load()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.shared.status.store(status);
    }

    pub fn is_capture_suspended(&self) -> bool {
        self.shared.capture_suspended.load(Ordering::Relaxed)
    }

    pub fn set_capture_suspended(&self, suspended: bool) {
        self.shared
            .capture_suspended
            .store(suspended, Ordering::Relaxed);
    }

    /// Handle to the inbound frame queue, consumable from any thread.
    pub fn queue(&self) -> FrameQueue {
        self.shared.queue.clone()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// A fresh receive-path handle, as passed to the backend at startup.
    pub fn receive_context(&self) -> ReceiveContext {
        ReceiveContext {
            shared: Arc::clone(&self.shared),
        }
    }
}
