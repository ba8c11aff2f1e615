use crate::connection::ReceiveContext;
use crate::types::{BusConfig, FilterRule, Frame};
use crate::Result;

/// Primitive operations a concrete adapter backend must supply.
///
/// Every method is invoked on the connection's owning execution context;
/// the facade routes all calls through its dispatcher, so implementations
/// never need to check which thread they are on. Methods take `&self` — a
/// backend that mutates internal state keeps it behind its own lock.
pub trait ConnectionBackend: Send + Sync {
    /// Called once the owning context is active. The backend keeps the
    /// [`ReceiveContext`] and uses it to evaluate and enqueue inbound
    /// frames.
    fn on_started(&self, ctx: ReceiveContext);

    /// Called exactly once when the connection is stopped.
    fn on_stop(&self);

    /// Suspend or resume capture on the device.
    fn on_suspend(&self, suspend: bool);

    /// Send a single frame to the wire.
    fn send_frame(&self, frame: &Frame) -> Result<()>;

    /// Send a batch of frames in order, stopping at the first failure.
    /// Frames already sent are not rolled back. Backends with a bulk
    /// primitive may override this.
    fn send_frames(&self, frames: &[Frame]) -> Result<()> {
        for frame in frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Read the live settings of one bus from the device.
    fn bus_settings(&self, bus: usize) -> Result<BusConfig>;

    /// Program one bus of the device.
    fn set_bus_settings(&self, bus: usize, config: BusConfig) -> Result<()>;

    /// Offload the given acceptance rules to silicon, if the adapter
    /// supports hardware filtering. The default does nothing.
    fn set_hardware_filters(&self, bus: usize, rules: &[FilterRule]) {
        let _ = (bus, rules);
    }
}
