use super::Printers;
use crate::prelude::*;
use crate::target::{Scalar, Target, Type, TypeRegistry, Value};

/// Read-only view of an `SVector`: `vec_last` element slots starting at
/// `vec_arr`. The capacity of the vector is irrelevant for display.
pub struct VectorView<'t> {
    target: &'t Target,
    value: Value,
}

impl<'t> VectorView<'t> {
    /// View `value` as a vector. Pointers to a vector are followed first.
    pub fn new(target: &'t Target, value: Value) -> InspectResult<Self> {
        let value = match &value.ty {
            Type::Pointer(pointee) if matches!(**pointee, Type::Record(_)) => target.dereference(&value)?,
            _ => value,
        };
        let Type::Record(record) = &value.ty else {
            return Err(InspectError::type_resolution(format!("{}.vec_arr", value.ty)));
        };
        let layout = target.types().record(record)?;
        for field in ["vec_arr", "vec_last"] {
            if layout.field(field).is_none() {
                return Err(InspectError::type_resolution(format!("{record}.{field}")));
            }
        }
        Ok(Self { target, value })
    }

    pub fn data_pointer(&self) -> InspectResult<u64> {
        let vec_arr = self.target.field(&self.value, "vec_arr")?;
        self.target.read_raw(&vec_arr)
    }

    pub fn len(&self) -> InspectResult<u64> {
        let vec_last = self.target.field(&self.value, "vec_last")?;
        self.target.read_raw(&vec_last)
    }

    /// The element slots, typed as pointers to `pointee`.
    pub fn slots(&self, pointee: &Type) -> InspectResult<Vec<Value>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(Vec::new());
        }
        let data = self.data_pointer()?;
        self.target.read_array(data, &pointee.clone().pointer_to(), len)
    }
}

/// What the elements of a vector point to, as far as rendering goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    /// A record with an `id` member, e.g. a hierarchy node.
    RecordWithId { record: String },
    Scalar(Scalar),
    /// Anything else, shown in its native form.
    Native(Type),
}

impl ElementKind {
    pub fn classify(types: &TypeRegistry, pointee: &Type) -> Self {
        match pointee {
            Type::Record(record)
                if types
                    .record(record)
                    .is_ok_and(|layout| layout.field("id").is_some()) =>
            {
                ElementKind::RecordWithId {
                    record: record.clone(),
                }
            }
            Type::Scalar(scalar) => ElementKind::Scalar(*scalar),
            other => ElementKind::Native(other.clone()),
        }
    }

    fn render(&self, printers: &Printers, target: &Target, pointee: &Value) -> InspectResult<String> {
        match self {
            ElementKind::Scalar(scalar) => printers.scalar(target, pointee, *scalar),
            ElementKind::RecordWithId { .. } | ElementKind::Native(_) => printers.display(target, pointee),
        }
    }
}

/// Render the ids of the records a vector points to: `{ }` when empty,
/// `{ a, b, }` otherwise.
///
/// `element_type` is the type of the slots, a pointer to a record with an `id`
/// member.
pub fn render_ids(printers: &Printers, vector: &VectorView, element_type: &Type) -> InspectResult<String> {
    let target = vector.target;
    let pointee = element_type
        .pointee()
        .ok_or_else(|| InspectError::type_resolution(format!("{element_type}.id")))?;
    if !matches!(ElementKind::classify(target.types(), pointee), ElementKind::RecordWithId { .. }) {
        return Err(InspectError::type_resolution(format!("{pointee}.id")));
    }

    let mut rendered = String::from("{ ");
    for slot in vector.slots(pointee)? {
        let record = target.dereference(&slot)?;
        let id = target.field(&record, "id")?;
        rendered.push_str(&printers.display(target, &id)?);
        // The separator after the last id is part of the format
        rendered.push_str(", ");
    }
    rendered.push('}');

    Ok(rendered)
}

/// Call `emit` with the index and rendering of every element the vector
/// points to, in order. `element_type_name` names the pointee type.
///
/// Elements emitted before a read failure stand; the failure ends the dump.
pub fn dump_elements<F>(
    printers: &Printers,
    vector: &VectorView,
    element_type_name: &str,
    mut emit: F,
) -> InspectResult<()>
where
    F: FnMut(u64, &str),
{
    let target = vector.target;
    let pointee = target
        .resolve_type(element_type_name)
        .and_then(|pointee| target.value_size(&pointee).map(|_| pointee))
        .map_err(|error| InspectError::InvalidArgument {
            position: 2,
            which: "element type",
            reason: error.to_string(),
        })?;
    let kind = ElementKind::classify(target.types(), &pointee);
    debug!("Dumping vector of {pointee} ({kind:?})");

    for (index, slot) in vector.slots(&pointee)?.iter().enumerate() {
        let element = target.dereference(slot)?;
        let rendered = kind.render(printers, target, &element)?;
        emit(index as u64, &rendered);
    }

    Ok(())
}
