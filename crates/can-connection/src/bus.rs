use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ConnectionError;
use crate::types::{BusConfig, FilterRule, FrameVerdict};
use crate::Result;

/// State of one logical bus.
struct BusSlot {
    config: BusConfig,
    configured: bool,
    filters: Vec<FilterRule>,
    exclude_unmatched: bool,
}

impl BusSlot {
    fn new() -> Self {
        Self {
            config: BusConfig::default(),
            configured: false,
            filters: Vec::new(),
            exclude_unmatched: false,
        }
    }
}

/// Fixed-size table of per-bus configuration and filter state.
///
/// The length is set at construction and never changes; every operation
/// validates its bus index and leaves the table untouched on a bad one.
/// The filter list and exclude-unmatched flag of a bus are only ever
/// replaced together under the table lock, so the receive path never sees
/// them half-updated.
pub(crate) struct BusTable {
    slots: Mutex<Vec<BusSlot>>,
    count: usize,
}

impl BusTable {
    pub fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, BusSlot::new);
        Self {
            slots: Mutex::new(slots),
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_configured(&self, bus: usize) -> bool {
        self.slots().get(bus).is_some_and(|slot| slot.configured)
    }

    pub fn set_configured(&self, bus: usize, configured: bool) -> Result<()> {
        let mut slots = self.slots();
        let slot = slots.get_mut(bus).ok_or(ConnectionError::InvalidBus(bus))?;
        slot.configured = configured;
        Ok(())
    }

    pub fn config(&self, bus: usize) -> Result<BusConfig> {
        let slots = self.slots();
        let slot = slots.get(bus).ok_or(ConnectionError::InvalidBus(bus))?;
        if !slot.configured {
            return Err(ConnectionError::NotConfigured(bus));
        }
        Ok(slot.config)
    }

    /// Stores a configuration and marks the bus configured.
    pub fn set_config(&self, bus: usize, config: BusConfig) -> Result<()> {
        let mut slots = self.slots();
        let slot = slots.get_mut(bus).ok_or(ConnectionError::InvalidBus(bus))?;
        slot.config = config;
        slot.configured = true;
        Ok(())
    }

    /// Replaces the filter list and exclude-unmatched flag wholesale.
    pub fn replace_filters(
        &self,
        bus: usize,
        rules: &[FilterRule],
        exclude_unmatched: bool,
    ) -> Result<()> {
        let mut slots = self.slots();
        let slot = slots.get_mut(bus).ok_or(ConnectionError::InvalidBus(bus))?;
        slot.filters = rules.to_vec();
        slot.exclude_unmatched = exclude_unmatched;
        Ok(())
    }

    /// Decides the disposition of an inbound frame.
    ///
    /// An invalid bus index discards the frame. The first rule whose masked
    /// id equals the masked frame id keeps the frame unconditionally and
    /// carries its notify flag. A frame matching no rule follows the bus's
    /// exclude-unmatched flag.
    pub fn evaluate(&self, bus: usize, frame_id: u32) -> FrameVerdict {
        let slots = self.slots();
        let Some(slot) = slots.get(bus) else {
            return FrameVerdict {
                discard: true,
                notify: false,
            };
        };
        for rule in &slot.filters {
            if rule.id & rule.mask == frame_id & rule.mask {
                return FrameVerdict {
                    discard: false,
                    notify: rule.notify,
                };
            }
        }
        FrameVerdict {
            discard: slot.exclude_unmatched,
            notify: false,
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<BusSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: u32, mask: u32, notify: bool) -> FilterRule {
        FilterRule { id, mask, notify }
    }

    #[test]
    fn test_config_round_trip() {
        let table = BusTable::new(2);
        let config = BusConfig {
            bitrate: 500_000,
            active: true,
            ..BusConfig::default()
        };
        assert!(!table.is_configured(0));
        table.set_config(0, config).unwrap();
        assert!(table.is_configured(0));
        assert_eq!(table.config(0).unwrap(), config);
    }

    #[test]
    fn test_config_unset_bus_fails() {
        let table = BusTable::new(2);
        assert!(matches!(
            table.config(1),
            Err(ConnectionError::NotConfigured(1))
        ));
    }

    #[test]
    fn test_invalid_index_rejected_without_side_effects() {
        let table = BusTable::new(1);
        assert!(!table.is_configured(1));
        assert!(matches!(
            table.config(1),
            Err(ConnectionError::InvalidBus(1))
        ));
        assert!(matches!(
            table.set_config(1, BusConfig::default()),
            Err(ConnectionError::InvalidBus(1))
        ));
        assert!(matches!(
            table.set_configured(1, true),
            Err(ConnectionError::InvalidBus(1))
        ));
        assert!(matches!(
            table.replace_filters(1, &[], true),
            Err(ConnectionError::InvalidBus(1))
        ));
        // Bus 0 was never touched by any of the failed calls.
        assert!(!table.is_configured(0));
        assert!(!table.evaluate(0, 0x123).discard);
    }

    #[test]
    fn test_unconfigure_keeps_stored_config_hidden() {
        let table = BusTable::new(1);
        table.set_config(0, BusConfig::default()).unwrap();
        table.set_configured(0, false).unwrap();
        assert!(matches!(
            table.config(0),
            Err(ConnectionError::NotConfigured(0))
        ));
    }

    #[test]
    fn test_evaluate_no_filters_keeps_all() {
        let table = BusTable::new(1);
        table.replace_filters(0, &[], false).unwrap();
        for id in [0u32, 0x123, 0x1FFF_FFFF] {
            let verdict = table.evaluate(0, id);
            assert!(!verdict.discard);
            assert!(!verdict.notify);
        }
    }

    #[test]
    fn test_evaluate_exclude_unmatched_drops_all() {
        let table = BusTable::new(1);
        table.replace_filters(0, &[], true).unwrap();
        for id in [0u32, 0x123, 0x1FFF_FFFF] {
            let verdict = table.evaluate(0, id);
            assert!(verdict.discard);
            assert!(!verdict.notify);
        }
    }

    #[test]
    fn test_evaluate_matching_rule_keeps_and_notifies() {
        let table = BusTable::new(1);
        table
            .replace_filters(0, &[rule(0x100, 0xFFF, true)], true)
            .unwrap();
        let hit = table.evaluate(0, 0x100);
        assert!(!hit.discard);
        assert!(hit.notify);
        let miss = table.evaluate(0, 0x200);
        assert!(miss.discard);
        assert!(!miss.notify);
    }

    #[test]
    fn test_evaluate_first_match_wins() {
        let table = BusTable::new(1);
        table
            .replace_filters(
                0,
                &[rule(0x100, 0xF00, false), rule(0x100, 0xFFF, true)],
                false,
            )
            .unwrap();
        // 0x100 matches both rules; the first one decides the notify flag.
        let verdict = table.evaluate(0, 0x100);
        assert!(!verdict.discard);
        assert!(!verdict.notify);
    }

    #[test]
    fn test_evaluate_invalid_bus_discards() {
        let table = BusTable::new(1);
        let verdict = table.evaluate(3, 0x42);
        assert!(verdict.discard);
        assert!(!verdict.notify);
    }
}
