use crate::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Size of a pointer and of a `long` on the targets we inspect (LP64).
pub const POINTER_SIZE: u64 = 8;

/// `SELVA_NODE_ID_SIZE`
pub const NODE_ID_SIZE: u64 = 10;

pub const HIERARCHY_NODE_TYPE: &str = "SelvaHierarchyNode";
pub const SVECTOR_TYPE: &str = "SVector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl Scalar {
    pub fn size(self) -> u64 {
        match self {
            Scalar::Bool | Scalar::Char | Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 => 4,
            Scalar::I64 | Scalar::U64 => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Scalar::Char | Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64
        )
    }

    /// Canonical C spelling, used when printing types back to the user.
    pub fn c_name(self) -> &'static str {
        match self {
            Scalar::Bool => "_Bool",
            Scalar::Char => "char",
            Scalar::I8 => "int8_t",
            Scalar::U8 => "unsigned char",
            Scalar::I16 => "short",
            Scalar::U16 => "unsigned short",
            Scalar::I32 => "int",
            Scalar::U32 => "unsigned int",
            Scalar::I64 => "long",
            Scalar::U64 => "unsigned long",
        }
    }

    /// The integer scalar of `size` bytes.
    pub fn integer(size: u64, signed: bool) -> Option<Self> {
        let scalar = match (size, signed) {
            (1, true) => Scalar::I8,
            (1, false) => Scalar::U8,
            (2, true) => Scalar::I16,
            (2, false) => Scalar::U16,
            (4, true) => Scalar::I32,
            (4, false) => Scalar::U32,
            (8, true) => Scalar::I64,
            (8, false) => Scalar::U64,
            _ => return None,
        };
        Some(scalar)
    }

    pub(crate) fn from_c_name(name: &str) -> Option<Self> {
        let scalar = match name {
            "_Bool" | "bool" => Scalar::Bool,
            "char" => Scalar::Char,
            "signed char" | "int8_t" => Scalar::I8,
            "unsigned char" | "uint8_t" => Scalar::U8,
            "short" | "short int" | "signed short" | "int16_t" => Scalar::I16,
            "unsigned short" | "unsigned short int" | "uint16_t" => Scalar::U16,
            "int" | "signed" | "signed int" | "int32_t" => Scalar::I32,
            "unsigned" | "unsigned int" | "uint32_t" => Scalar::U32,
            "long" | "long int" | "signed long" | "long long" | "long long int" | "int64_t"
            | "ssize_t" | "intptr_t" | "ptrdiff_t" | "time_t" | "off_t" => Scalar::I64,
            "unsigned long" | "unsigned long int" | "unsigned long long"
            | "unsigned long long int" | "uint64_t" | "size_t" | "uintptr_t" => Scalar::U64,
            _ => return None,
        };
        Some(scalar)
    }
}

/// Type metadata of a value in the target.
///
/// Records are referenced by name and looked up in the [`TypeRegistry`], which
/// lets layouts refer to each other (a node holds vectors of node pointers).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(Scalar),
    Pointer(Box<Type>),
    Array(Box<Type>, u64),
    Record(String),
}

impl Type {
    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn record_name(&self) -> Option<&str> {
        match self {
            Type::Record(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(scalar) => write!(f, "{}", scalar.c_name()),
            Type::Pointer(inner) if inner.is_pointer() => write!(f, "{inner}*"),
            Type::Pointer(inner) => write!(f, "{inner} *"),
            Type::Array(elem, len) => write!(f, "{elem} [{len}]"),
            Type::Record(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub offset: u64,
    pub ty: Type,
}

impl Field {
    pub fn new(name: &str, offset: u64, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            offset,
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: String,
    pub size: u64,
    pub fields: Vec<Field>,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Record layouts and typedefs known for the inspected binary.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    records: HashMap<String, RecordLayout>,
    typedefs: HashMap<String, Type>,
}

impl TypeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compact layouts of the hierarchy types, used when the inspected binary
    /// carries no debug info.
    ///
    /// These offsets do not follow any particular Selva build: a real node also
    /// holds flags, an object and metadata before its vectors. Layouts read
    /// from DWARF (see [`super::debug_info`]) or from the configuration file
    /// replace them.
    pub fn selva() -> Self {
        let mut registry = Self::empty();
        let long = Type::Scalar(Scalar::I64);
        let size_t = Type::Scalar(Scalar::U64);
        let node_ptr = Type::Record(HIERARCHY_NODE_TYPE.to_string()).pointer_to();

        registry.add_typedef(
            "Selva_NodeId",
            Type::Array(Box::new(Type::Scalar(Scalar::Char)), NODE_ID_SIZE),
        );
        registry.add_record(RecordLayout {
            name: "trx".to_string(),
            size: 16,
            fields: vec![
                Field::new("tv_sec", 0, long.clone()),
                Field::new("tv_nsec", 8, long),
            ],
        });
        registry.add_record(RecordLayout {
            name: SVECTOR_TYPE.to_string(),
            size: 48,
            fields: vec![
                Field::new("vec_mode", 0, Type::Scalar(Scalar::U32)),
                Field::new("vec_arr_len", 8, size_t.clone()),
                Field::new("vec_last", 16, size_t.clone()),
                Field::new("vec_arr_shift_index", 24, size_t),
                Field::new("vec_compar", 32, Type::Void.pointer_to()),
                Field::new("vec_arr", 40, Type::Void.pointer_to().pointer_to()),
            ],
        });
        registry.add_record(RecordLayout {
            name: HIERARCHY_NODE_TYPE.to_string(),
            size: 128,
            fields: vec![
                Field::new(
                    "id",
                    0,
                    Type::Array(Box::new(Type::Scalar(Scalar::Char)), NODE_ID_SIZE),
                ),
                Field::new("visit_stamp", 16, Type::Record("trx".to_string())),
                Field::new("parents", 32, Type::Record(SVECTOR_TYPE.to_string())),
                Field::new("children", 80, Type::Record(SVECTOR_TYPE.to_string())),
            ],
        });
        registry.add_typedef("SelvaHierarchyNodePtr", node_ptr);

        registry
    }

    pub fn add_record(&mut self, layout: RecordLayout) {
        self.records.insert(layout.name.clone(), layout);
    }

    pub fn add_typedef(&mut self, name: &str, ty: Type) {
        self.typedefs.insert(name.to_string(), ty);
    }

    pub fn record(&self, name: &str) -> InspectResult<&RecordLayout> {
        self.records
            .get(name)
            .ok_or_else(|| InspectError::type_resolution(name))
    }

    pub fn has_record(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn has_typedef(&self, name: &str) -> bool {
        self.typedefs.contains_key(name)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Parse a C type name such as `unsigned long`, `struct SVector *` or
    /// `char [10]` into a [`Type`].
    pub fn resolve(&self, name: &str) -> InspectResult<Type> {
        let mut rest = name.trim();
        let mut array_len = None;

        if let Some(open) = rest.strip_suffix(']').and_then(|r| r.rfind('[')) {
            let len = rest[open + 1..rest.len() - 1].trim();
            let len = parse_integer(len).ok_or_else(|| InspectError::type_resolution(name))?;
            array_len = Some(len);
            rest = rest[..open].trim_end();
        }

        let mut depth = 0;
        while let Some(stripped) = rest.strip_suffix('*') {
            depth += 1;
            rest = stripped.trim_end();
        }

        let base = self.resolve_base(rest).ok_or_else(|| InspectError::type_resolution(name))?;
        let ty = (0..depth).fold(base, |ty, _| ty.pointer_to());

        Ok(match array_len {
            Some(len) => Type::Array(Box::new(ty), len),
            None => ty,
        })
    }

    fn resolve_base(&self, base: &str) -> Option<Type> {
        let words = base
            .split_whitespace()
            .filter(|w| !matches!(*w, "const" | "volatile"))
            .collect::<Vec<_>>();
        let (is_tagged, words) = match words.split_first() {
            Some((&("struct" | "union" | "enum"), rest)) => (true, rest),
            _ => (false, &words[..]),
        };
        let base = words.join(" ");
        if base.is_empty() {
            return None;
        }

        if !is_tagged {
            if base == "void" {
                return Some(Type::Void);
            }
            if let Some(scalar) = Scalar::from_c_name(&base) {
                return Some(Type::Scalar(scalar));
            }
            if let Some(ty) = self.typedefs.get(&base) {
                return Some(ty.clone());
            }
        }

        self.records
            .contains_key(&base)
            .then(|| Type::Record(base))
    }

    pub fn size_of(&self, ty: &Type) -> InspectResult<u64> {
        match ty {
            Type::Void => Ok(1),
            Type::Scalar(scalar) => Ok(scalar.size()),
            Type::Pointer(_) => Ok(POINTER_SIZE),
            Type::Array(elem, len) => self
                .size_of(elem)?
                .checked_mul(*len)
                .ok_or_else(|| InspectError::evaluation(ty.to_string(), "type is too large")),
            Type::Record(name) => Ok(self.record(name)?.size),
        }
    }
}

pub(crate) fn parse_integer(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}
