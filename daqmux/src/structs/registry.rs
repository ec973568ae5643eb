//! Slot registry
//!
//! Maps each owning module to the slots it declared. A module entry exists
//! only while it owns at least one slot.

use std::collections::HashMap;

use log::{debug, trace};

use crate::structs::slot::{DataType, EventSlot, ModuleId, SlotId};
use crate::utils::errors::RegistryError;

#[derive(Debug, Default)]
pub struct SlotRegistry {
    modules: HashMap<ModuleId, Vec<EventSlot>>,
    next_id: u32,
}

impl SlotRegistry {
    /// Declares a new slot for `owner`.
    ///
    /// Names are unique per owner; registering an existing name is rejected
    /// so that [`get_event_slot`](Self::get_event_slot) never has two answers.
    pub fn register_slot(
        &mut self,
        owner: ModuleId,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<EventSlot, RegistryError> {
        let name = name.into();
        let slots = self.modules.entry(owner).or_default();

        if slots.iter().any(|slot| slot.name() == name) {
            return Err(RegistryError::DuplicateSlot {
                owner: owner.0,
                name,
            });
        }

        let slot = EventSlot::new(SlotId(self.next_id), owner, name, data_type);
        self.next_id += 1;

        trace!("Registered slot {slot}");
        slots.push(slot.clone());
        Ok(slot)
    }

    /// Looks up a slot by owner and name.
    pub fn get_event_slot(&self, owner: ModuleId, name: &str) -> Option<&EventSlot> {
        self.modules
            .get(&owner)?
            .iter()
            .find(|slot| slot.name() == name)
    }

    /// All slots of `owner` in registration order.
    pub fn get_event_slots(&self, owner: ModuleId) -> Option<&[EventSlot]> {
        self.modules.get(&owner).map(Vec::as_slice)
    }

    pub fn slot(&self, id: SlotId) -> Option<&EventSlot> {
        self.modules
            .values()
            .flat_map(|slots| slots.iter())
            .find(|slot| slot.id() == id)
    }

    /// Removes a slot, dropping the module entry when it was the last one.
    pub fn destroy_event_slot(&mut self, id: SlotId) -> Result<EventSlot, RegistryError> {
        let owner = self
            .slot(id)
            .map(EventSlot::owner)
            .ok_or(RegistryError::UnknownSlot(id.0))?;

        let slots = self
            .modules
            .get_mut(&owner)
            .ok_or(RegistryError::UnknownSlot(id.0))?;
        let index = slots
            .iter()
            .position(|slot| slot.id() == id)
            .ok_or(RegistryError::UnknownSlot(id.0))?;
        let removed = slots.remove(index);

        if slots.is_empty() {
            self.modules.remove(&owner);
            debug!("Removed last slot of {owner}, dropping module entry");
        }

        Ok(removed)
    }

    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.modules.keys().copied()
    }

    pub fn slot_count(&self) -> usize {
        self.modules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_owner_and_name() -> anyhow::Result<()> {
        let mut registry = SlotRegistry::default();
        let qdc = ModuleId(1);
        let adc = ModuleId(2);

        let a = registry.register_slot(qdc, "out0", DataType::UInt)?;
        let b = registry.register_slot(adc, "out0", DataType::UInt)?;

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.get_event_slot(qdc, "out0"), Some(&a));
        assert_eq!(registry.get_event_slot(adc, "out0"), Some(&b));
        assert_eq!(registry.get_event_slot(qdc, "out1"), None);
        assert_eq!(registry.get_event_slot(ModuleId(9), "out0"), None);
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> anyhow::Result<()> {
        let mut registry = SlotRegistry::default();
        let owner = ModuleId(3);

        let first = registry.register_slot(owner, "energy", DataType::Double)?;
        let second = registry.register_slot(owner, "energy", DataType::UInt);

        assert_eq!(
            second,
            Err(RegistryError::DuplicateSlot {
                owner: 3,
                name: "energy".to_string()
            })
        );
        assert_eq!(registry.get_event_slots(owner).map(<[_]>::len), Some(1));
        assert_eq!(registry.get_event_slot(owner, "energy"), Some(&first));
        Ok(())
    }

    #[test]
    fn module_entry_follows_slot_set() -> anyhow::Result<()> {
        let mut registry = SlotRegistry::default();
        let owner = ModuleId(4);

        let a = registry.register_slot(owner, "raw", DataType::UIntVec)?;
        let b = registry.register_slot(owner, "trace", DataType::UIntVec)?;
        assert_eq!(registry.modules().count(), 1);

        registry.destroy_event_slot(a.id())?;
        assert!(registry.get_event_slots(owner).is_some());

        registry.destroy_event_slot(b.id())?;
        assert!(registry.get_event_slots(owner).is_none());
        assert!(registry.is_empty());

        assert_eq!(
            registry.destroy_event_slot(b.id()),
            Err(RegistryError::UnknownSlot(b.id().0))
        );
        Ok(())
    }

    #[test]
    fn ids_are_not_reused() -> anyhow::Result<()> {
        let mut registry = SlotRegistry::default();
        let owner = ModuleId(5);

        let a = registry.register_slot(owner, "a", DataType::UInt)?;
        registry.destroy_event_slot(a.id())?;
        let b = registry.register_slot(owner, "a", DataType::UInt)?;

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.slot(b.id()), Some(&b));
        assert_eq!(registry.slot(a.id()), None);
        Ok(())
    }
}
