use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use time::OffsetDateTime;

use crate::connection::ReceiveContext;
use crate::error::ConnectionError;
use crate::traits::ConnectionBackend;
use crate::types::{BusConfig, FilterRule, Frame, Timestamp};
use crate::Result;

/// One recorded hook invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MockCall {
    Started,
    Stop,
    Suspend(bool),
    SendFrame(u32),
    BusSettings(usize),
    SetBusSettings(usize),
    /// Bus index and number of rules handed to the hardware filter hook.
    HardwareFilters(usize, usize),
}

/// In-process backend double.
///
/// Records every hook invocation together with the thread it ran on, so
/// tests can assert both call counts and owning-thread affinity. Send
/// results can be scripted, and frames can be injected through the stored
/// [`ReceiveContext`] as if the adapter had received them.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Vec<(MockCall, ThreadId)>>,
    ctx: Mutex<Option<ReceiveContext>>,
    stop_calls: AtomicUsize,
    send_script: Mutex<VecDeque<bool>>,
    settings: Mutex<HashMap<usize, BusConfig>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcomes of upcoming `send_frame` calls, oldest first.
    /// Once the script is exhausted, sends succeed.
    pub fn script_send(&self, outcomes: &[bool]) {
        lock(&self.send_script).extend(outcomes.iter().copied());
    }

    /// Feeds a frame into the receive path, stamping it with the current
    /// time. Returns the notify flag when the frame was enqueued. Only
    /// valid once the connection has started.
    pub fn inject(&self, mut frame: Frame) -> Option<bool> {
        let ctx = lock(&self.ctx).clone()?;
        frame.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        ctx.deliver(frame)
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<(MockCall, ThreadId)> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|(c, _)| pred(c)).count()
    }

    /// Thread the first call matching `pred` ran on.
    pub fn thread_of(&self, pred: impl Fn(&MockCall) -> bool) -> Option<ThreadId> {
        lock(&self.calls)
            .iter()
            .find(|(c, _)| pred(c))
            .map(|(_, id)| *id)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: MockCall) {
        lock(&self.calls).push((call, thread::current().id()));
    }
}

impl ConnectionBackend for MockBackend {
    fn on_started(&self, ctx: ReceiveContext) {
        self.record(MockCall::Started);
        *lock(&self.ctx) = Some(ctx);
    }

    fn on_stop(&self) {
        self.record(MockCall::Stop);
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_suspend(&self, suspend: bool) {
        self.record(MockCall::Suspend(suspend));
    }

    fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.record(MockCall::SendFrame(frame.id));
        let ok = lock(&self.send_script).pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(ConnectionError::Backend(format!(
                "send of frame {frame} rejected by script"
            )))
        }
    }

    fn bus_settings(&self, bus: usize) -> Result<BusConfig> {
        self.record(MockCall::BusSettings(bus));
        lock(&self.settings)
            .get(&bus)
            .copied()
            .ok_or_else(|| ConnectionError::Backend(format!("no settings stored for bus {bus}")))
    }

    fn set_bus_settings(&self, bus: usize, config: BusConfig) -> Result<()> {
        self.record(MockCall::SetBusSettings(bus));
        lock(&self.settings).insert(bus, config);
        Ok(())
    }

    fn set_hardware_filters(&self, bus: usize, rules: &[FilterRule]) {
        self.record(MockCall::HardwareFilters(bus, rules.len()));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_script_exhaustion_defaults_to_ok() {
        let backend = MockBackend::new();
        backend.script_send(&[false]);
        let frame = Frame::new(0x1, &[]).unwrap();
        assert!(backend.send_frame(&frame).is_err());
        assert!(backend.send_frame(&frame).is_ok());
    }

    #[test]
    fn test_settings_round_trip_through_hooks() {
        let backend = MockBackend::new();
        assert!(backend.bus_settings(0).is_err());
        backend.set_bus_settings(0, BusConfig::default()).unwrap();
        assert_eq!(backend.bus_settings(0).unwrap(), BusConfig::default());
    }

    #[test]
    fn test_inject_before_start_is_dropped() {
        let backend = MockBackend::new();
        assert_eq!(backend.inject(Frame::new(0x1, &[]).unwrap()), None);
    }
}
