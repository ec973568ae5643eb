//! Decoded events
//!
//! An [`Event`] holds the measurements of one hardware trigger, addressed by
//! [`SlotId`]. Slots that were never written, or were written with
//! [`Value::Null`], are unoccupied.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::structs::slot::{DataType, SlotId};

static NULL: Value = Value::Null;

/// Identifies the event buffer an event was created by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferId(pub u64);

/// A decoded measurement.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    UInt(u32),
    Int(i64),
    Double(f64),
    UIntVec(Vec<u32>),
    DoubleVec(Vec<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type tag of the held value, `None` for [`Value::Null`].
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::UInt(_) => Some(DataType::UInt),
            Value::Int(_) => Some(DataType::Int),
            Value::Double(_) => Some(DataType::Double),
            Value::UIntVec(_) => Some(DataType::UIntVec),
            Value::DoubleVec(_) => Some(DataType::DoubleVec),
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint_slice(&self) -> Option<&[u32]> {
        match self {
            Value::UIntVec(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double_slice(&self) -> Option<&[f64]> {
        match self {
            Value::DoubleVec(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Vec<u32>> for Value {
    fn from(value: Vec<u32>) -> Self {
        Value::UIntVec(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::DoubleVec(value)
    }
}

/// Sparse slot → value record for one trigger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    buffer: Option<BufferId>,
    trigger: Option<u32>,
    data: BTreeMap<SlotId, Value>,
}

impl Event {
    /// Creates a detached event. Buffers use [`Event::for_buffer`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_buffer(buffer: BufferId) -> Self {
        Self {
            buffer: Some(buffer),
            ..Self::default()
        }
    }

    /// Stores `value` in `slot`, replacing any earlier value.
    pub fn put(&mut self, slot: SlotId, value: impl Into<Value>) {
        self.data.insert(slot, value.into());
    }

    /// Value held in `slot`, or [`Value::Null`] when nothing was written.
    pub fn get(&self, slot: SlotId) -> &Value {
        self.data.get(&slot).unwrap_or(&NULL)
    }

    pub fn is_occupied(&self, slot: SlotId) -> bool {
        !self.get(slot).is_null()
    }

    pub fn occupied_slots(&self) -> BTreeSet<SlotId> {
        self.data
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Occupied slots with their values, ordered by slot id.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Value)> {
        self.data
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(slot, value)| (*slot, value))
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Hardware event counter, when the module reports one.
    pub fn trigger(&self) -> Option<u32> {
        self.trigger
    }

    pub fn set_trigger(&mut self, trigger: u32) {
        self.trigger = Some(trigger);
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(Value::is_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let mut ev = Event::new();
        ev.put(SlotId(0), 1234u32);
        ev.put(SlotId(1), vec![1u32, 2, 3]);
        ev.put(SlotId(2), vec![-1.5f64]);

        assert_eq!(ev.get(SlotId(0)), &Value::UInt(1234));
        assert_eq!(ev.get(SlotId(1)).as_uint_slice(), Some(&[1u32, 2, 3][..]));
        assert_eq!(ev.get(SlotId(2)).as_double_slice(), Some(&[-1.5][..]));
        assert!(ev.get(SlotId(7)).is_null());
    }

    #[test]
    fn null_values_are_unoccupied() {
        let mut ev = Event::new();
        ev.put(SlotId(3), Value::Null);
        ev.put(SlotId(5), 0u32);

        assert!(!ev.is_occupied(SlotId(3)));
        assert!(ev.is_occupied(SlotId(5)));
        assert_eq!(ev.occupied_slots(), BTreeSet::from([SlotId(5)]));
        assert_eq!(ev.occupied_slots(), ev.occupied_slots());
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut ev = Event::new();
        ev.put(SlotId(0), 1u32);
        ev.put(SlotId(0), 2u32);
        assert_eq!(ev.get(SlotId(0)).as_uint(), Some(2));
        assert_eq!(ev.iter().count(), 1);
    }

    #[test]
    fn value_type_tags() {
        assert_eq!(Value::Null.data_type(), None);
        assert_eq!(Value::from(3i64).data_type(), Some(DataType::Int));
        assert_eq!(Value::from(0.5).data_type(), Some(DataType::Double));
        assert!(Event::new().is_empty());
    }
}
