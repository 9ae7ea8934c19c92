//! The inspected process as seen by the printers: memory, type metadata and
//! symbols behind the three capabilities the formatting core relies on.

use crate::memory::Memory;
use crate::prelude::*;
use crate::symbols::SymbolTable;
use std::collections::HashMap;

pub mod debug_info;
mod expr;
pub mod types;
mod value;

pub use types::{Field, RecordLayout, Scalar, Type, TypeRegistry};
pub use value::{Location, Value};

/// Largest value read from the target in one piece.
pub const MAX_VALUE_SIZE: u64 = 64 * 1024;

pub struct Target {
    memory: Box<dyn Memory>,
    types: TypeRegistry,
    symbols: SymbolTable,
    symbol_types: HashMap<String, Type>,
}

impl Target {
    pub fn new<M: Memory + 'static>(memory: M, types: TypeRegistry) -> Self {
        Self {
            memory: Box::new(memory),
            types,
            symbols: SymbolTable::new(),
            symbol_types: HashMap::new(),
        }
    }

    /// Attach a symbol table. Symbols listed in `symbol_types` evaluate to
    /// values of that type, the others to untyped (`void`) lvalues.
    pub fn with_symbols(mut self, symbols: SymbolTable, symbol_types: HashMap<String, Type>) -> Self {
        self.symbols = symbols;
        self.symbol_types = symbol_types;
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn describe(&self) -> String {
        self.memory.describe()
    }

    pub fn resolve_type(&self, name: &str) -> InspectResult<Type> {
        self.types.resolve(name)
    }

    pub fn evaluate(&self, expression: &str) -> InspectResult<Value> {
        expr::evaluate(self, expression)
    }

    /// Size of a value of type `ty`, refused above [`MAX_VALUE_SIZE`].
    pub fn value_size(&self, ty: &Type) -> InspectResult<u64> {
        let size = self.types.size_of(ty)?;
        if size > MAX_VALUE_SIZE {
            return Err(InspectError::evaluation(
                ty.to_string(),
                format!("value requires {size} bytes, more than the {MAX_VALUE_SIZE} bytes limit"),
            ));
        }
        Ok(size)
    }

    /// View `count` consecutive elements of `element_type` starting at
    /// `address`. Every element must be readable.
    pub fn read_array(&self, address: u64, element_type: &Type, count: u64) -> InspectResult<Vec<Value>> {
        let size = self.value_size(element_type)?;
        let mut buf = vec![0u8; size as usize];
        (0..count)
            .map(|index| {
                let element = index
                    .checked_mul(size)
                    .and_then(|offset| address.checked_add(offset))
                    .ok_or_else(|| InspectError::out_of_bounds(address, count.saturating_mul(size)))?;
                self.memory.read(element, &mut buf)?;
                Ok(Value::at(element, element_type.clone()))
            })
            .collect()
    }

    pub(crate) fn symbol(&self, name: &str) -> Option<Value> {
        let address = self.symbols.address_of(name)?;
        let ty = self.symbol_types.get(name).cloned().unwrap_or(Type::Void);
        Some(Value::at(address, ty))
    }

    /// The member `name` of a record lvalue.
    pub fn field(&self, value: &Value, name: &str) -> InspectResult<Value> {
        let Type::Record(record) = &value.ty else {
            return Err(InspectError::type_resolution(format!("{}.{name}", value.ty)));
        };
        let layout = self.types.record(record)?;
        let field = layout
            .field(name)
            .ok_or_else(|| InspectError::type_resolution(format!("{record}.{name}")))?;
        let address = value
            .address()
            .ok_or_else(|| InspectError::type_resolution(format!("{record}.{name}")))?;
        Ok(Value::at(address + field.offset, field.ty.clone()))
    }

    pub fn read_bytes(&self, value: &Value) -> InspectResult<Vec<u8>> {
        let size = self.value_size(&value.ty)?;
        match value.location {
            Location::Memory(address) => {
                let mut buf = vec![0u8; size as usize];
                self.memory.read(address, &mut buf)?;
                Ok(buf)
            }
            Location::Immediate(raw) => Ok(raw.to_le_bytes()[..size.min(8) as usize].to_vec()),
        }
    }

    /// Raw bits of a scalar or pointer, zero extended.
    pub fn read_raw(&self, value: &Value) -> InspectResult<u64> {
        let size = match &value.ty {
            Type::Scalar(scalar) => scalar.size(),
            Type::Pointer(_) => types::POINTER_SIZE,
            other => {
                return Err(InspectError::evaluation(
                    other.to_string(),
                    "value is not a scalar or a pointer",
                ));
            }
        };
        let bytes = self.read_bytes(value)?;
        let mut raw = [0u8; 8];
        raw[..size as usize].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Integer value of a scalar, sign extended when the type is signed.
    pub fn read_integer(&self, value: &Value) -> InspectResult<i128> {
        let raw = self.read_raw(value)?;
        let Type::Scalar(scalar) = &value.ty else {
            return Ok(raw as i128);
        };
        if !scalar.is_signed() {
            return Ok(raw as i128);
        }
        let shift = 64 - scalar.size() * 8;
        Ok((((raw << shift) as i64) >> shift) as i128)
    }

    /// Follow a pointer to the lvalue it points to.
    pub fn dereference(&self, pointer: &Value) -> InspectResult<Value> {
        let Some(pointee) = pointer.ty.pointee() else {
            return Err(InspectError::evaluation(
                pointer.ty.to_string(),
                "attempt to take contents of a non-pointer value",
            ));
        };
        let address = self.read_raw(pointer)?;
        Ok(Value::at(address, pointee.clone()))
    }
}
