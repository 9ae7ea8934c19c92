use super::types::Type;

/// Where a value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// An lvalue at this address of the target.
    Memory(u64),
    /// A value that only exists in the inspector: a literal, `&x` or a cast.
    Immediate(u64),
}

/// A typed handle on a value of the inspected process.
///
/// Handles never own target memory; they are only valid while the target
/// stays halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub location: Location,
    pub ty: Type,
}

impl Value {
    pub fn at(address: u64, ty: Type) -> Self {
        Self {
            location: Location::Memory(address),
            ty,
        }
    }

    pub fn immediate(raw: u64, ty: Type) -> Self {
        Self {
            location: Location::Immediate(raw),
            ty,
        }
    }

    /// The address of an lvalue.
    pub fn address(&self) -> Option<u64> {
        match self.location {
            Location::Memory(address) => Some(address),
            Location::Immediate(_) => None,
        }
    }
}
