//! Slot descriptors
//!
//! A slot is a named, typed channel of decoded data owned by one module.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stable identifier of the module owning a set of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl Display for ModuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Registry-assigned slot index. Never reused within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl Display for SlotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Kind of value a slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt,
    Int,
    Double,
    UIntVec,
    DoubleVec,
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::UInt => "uint",
            DataType::Int => "int",
            DataType::Double => "double",
            DataType::UIntVec => "uint[]",
            DataType::DoubleVec => "double[]",
        };
        f.write_str(name)
    }
}

/// Immutable slot descriptor handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventSlot {
    id: SlotId,
    owner: ModuleId,
    name: String,
    data_type: DataType,
}

impl EventSlot {
    pub(crate) fn new(id: SlotId, owner: ModuleId, name: String, data_type: DataType) -> Self {
        Self {
            id,
            owner,
            name,
            data_type,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl Display for EventSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({}, {})",
            self.owner, self.name, self.data_type, self.id
        )
    }
}
