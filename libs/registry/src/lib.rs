//! # xtap-registry
//!
//! The unit-indexed tap registry and the control-channel address plan.
//!
//! Every tap instance is identified by a small integer unit index. The unit
//! doubles as the instance's control-channel address (unit plus a fixed base
//! offset), so the address space bounds how many taps can exist. The
//! registry is a fixed-capacity arena of nullable slots: a unit resolves to
//! its instance exactly while the instance is registered.
//!
//! # Invariants
//!
//! - `lookup(u)` is `Some` iff unit `u` is between a successful `register`
//!   and the matching `unregister`.
//! - Capacity is validated at construction; an oversized capacity is a
//!   configuration error, never a runtime one.

use thiserror::Error;

/// First channel address available to tap units.
pub const CHANNEL_BASE: u32 = 17;

/// Size of the control-channel address space.
pub const MAX_LINKS: u32 = 32;

/// Upper bound on the number of tap units.
pub const MAX_UNITS: u32 = MAX_LINKS - CHANNEL_BASE;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Requested capacity exceeds the channel address space.
    #[error("{requested} tap units requested, address space allows {max}")]
    TooManyUnits { requested: u32, max: u32 },

    /// Unit index outside the registry's capacity.
    #[error("unit {unit} out of range (capacity {capacity})")]
    UnitOutOfRange { unit: u32, capacity: u32 },

    /// Unit already has a registered instance.
    #[error("unit {unit} already registered")]
    SlotOccupied { unit: u32 },
}

/// A control-channel address.
///
/// Addresses and unit indexes are related by the fixed [`CHANNEL_BASE`]
/// offset; addresses below the base do not belong to any tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelAddress(u32);

impl ChannelAddress {
    /// The address assigned to a unit index.
    pub const fn from_unit(unit: u32) -> Self {
        Self(unit + CHANNEL_BASE)
    }

    /// The raw address value.
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The unit index this address belongs to, if any.
    pub const fn unit(&self) -> Option<u32> {
        if self.0 >= CHANNEL_BASE {
            Some(self.0 - CHANNEL_BASE)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-capacity arena mapping unit indexes to registered instances.
#[derive(Debug)]
pub struct TapRegistry<T> {
    slots: Vec<Option<T>>,
}

impl<T> TapRegistry<T> {
    /// Create a registry for `capacity` units.
    ///
    /// Fails when `capacity` exceeds what the channel address space can
    /// accommodate.
    pub fn new(capacity: u32) -> Result<Self, RegistryError> {
        if capacity > MAX_UNITS {
            return Err(RegistryError::TooManyUnits {
                requested: capacity,
                max: MAX_UNITS,
            });
        }

        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        Ok(Self { slots })
    }

    /// Registry capacity in units.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Bind `unit` to `value`.
    pub fn register(&mut self, unit: u32, value: T) -> Result<(), RegistryError> {
        let capacity = self.slots.len() as u32;
        let slot = self
            .slots
            .get_mut(unit as usize)
            .ok_or(RegistryError::UnitOutOfRange { unit, capacity })?;

        if slot.is_some() {
            return Err(RegistryError::SlotOccupied { unit });
        }

        *slot = Some(value);
        Ok(())
    }

    /// Resolve a unit to its registered instance.
    pub fn lookup(&self, unit: u32) -> Option<&T> {
        self.slots.get(unit as usize).and_then(Option::as_ref)
    }

    /// Clear a unit's slot, returning what was registered there.
    pub fn unregister(&mut self, unit: u32) -> Option<T> {
        self.slots.get_mut(unit as usize).and_then(Option::take)
    }

    /// Number of currently registered units.
    pub fn registered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether no unit is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Tear down the registry: yields `(unit, instance)` for every
    /// registered unit, clearing each slot before its value is handed back.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(unit, slot)| slot.take().map(|value| (unit as u32, value)))
    }
}
