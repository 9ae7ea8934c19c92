//! Type layouts read from the DWARF of the inspected binary.
//!
//! Every complete `struct`/`union` becomes a [`RecordLayout`] with its member
//! offsets, every named `typedef` and base type becomes a name the
//! [`TypeRegistry`] resolves. Anonymous records take the name of the typedef
//! that names them.

use super::types::{Field, RecordLayout, Scalar, Type, TypeRegistry};
use crate::prelude::*;
use object::{Object, ObjectSection};
use std::collections::HashMap;
use std::path::Path;

type EndianRcSlice = gimli::EndianRcSlice<gimli::RunTimeEndian>;
type UnitOffset = gimli::UnitOffset<usize>;
type Entry<'abbrev, 'unit, R> = gimli::DebuggingInformationEntry<'abbrev, 'unit, R, usize>;

fn load_dwarf(object: &object::File) -> Result<gimli::Dwarf<EndianRcSlice>> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice, gimli::Error> {
        let data = object
            .section_by_name(id.name())
            .and_then(|s| s.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[]));
        Ok(EndianRcSlice::new(std::rc::Rc::from(data.as_ref()), endian))
    };

    Ok(gimli::Dwarf::load(load_section)?)
}

/// Read the type layouts of `binary` from its debug info.
pub fn load_type_registry<P: AsRef<Path>>(binary: P) -> Result<TypeRegistry> {
    let path = binary.as_ref();
    let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let object = object::File::parse(&*content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let dwarf = load_dwarf(&object).context("Failed to load DWARF sections")?;
    let types = type_registry_from_dwarf(&dwarf)
        .with_context(|| format!("Invalid debug info in {}", path.display()))?;
    if types.record_count() == 0 {
        bail!("No type information in {}", path.display());
    }

    debug!(
        "Loaded {} record layout(s) from the debug info of {}",
        types.record_count(),
        path.display()
    );
    Ok(types)
}

pub fn type_registry_from_dwarf<R>(dwarf: &gimli::Dwarf<R>) -> Result<TypeRegistry>
where
    R: gimli::Reader<Offset = usize>,
{
    let mut types = TypeRegistry::empty();
    let mut headers = dwarf.units();
    let mut index = 0;
    while let Some(header) = headers.next()? {
        let unit = dwarf.unit(header)?;
        UnitTypes::new(dwarf, &unit, index)?.collect(&mut types)?;
        index += 1;
    }
    Ok(types)
}

fn udata<R: gimli::Reader<Offset = usize>>(entry: &Entry<'_, '_, R>, name: gimli::DwAt) -> Result<Option<u64>> {
    Ok(entry.attr_value(name)?.and_then(|value| value.udata_value()))
}

fn is_record(tag: gimli::DwTag) -> bool {
    matches!(
        tag,
        gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type | gimli::DW_TAG_class_type
    )
}

/// Scalar for a `DW_TAG_base_type`. Base types that are not integers are
/// kept as opaque bytes.
fn base_type(name: &str, size: u64, encoding: Option<gimli::DwAte>) -> Type {
    if let Some(scalar) = Scalar::from_c_name(name).filter(|scalar| scalar.size() == size) {
        return Type::Scalar(scalar);
    }
    let scalar = match encoding {
        Some(gimli::DW_ATE_boolean) if size == 1 => Some(Scalar::Bool),
        Some(gimli::DW_ATE_signed_char) if size == 1 => Some(Scalar::Char),
        Some(gimli::DW_ATE_signed) => Scalar::integer(size, true),
        Some(gimli::DW_ATE_unsigned | gimli::DW_ATE_unsigned_char | gimli::DW_ATE_boolean) => {
            Scalar::integer(size, false)
        }
        _ => None,
    };
    scalar
        .map(Type::Scalar)
        .unwrap_or_else(|| Type::Array(Box::new(Type::Scalar(Scalar::U8)), size))
}

/// Type resolution within one compilation unit.
struct UnitTypes<'a, R: gimli::Reader<Offset = usize>> {
    dwarf: &'a gimli::Dwarf<R>,
    unit: &'a gimli::Unit<R>,
    index: usize,
    /// Anonymous records named by a typedef
    typedef_names: HashMap<UnitOffset, String>,
    cache: HashMap<UnitOffset, Type>,
}

impl<'a, R: gimli::Reader<Offset = usize>> UnitTypes<'a, R> {
    fn new(dwarf: &'a gimli::Dwarf<R>, unit: &'a gimli::Unit<R>, index: usize) -> Result<Self> {
        let mut unit_types = Self {
            dwarf,
            unit,
            index,
            typedef_names: HashMap::new(),
            cache: HashMap::new(),
        };

        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            if entry.tag() != gimli::DW_TAG_typedef {
                continue;
            }
            let Some(gimli::AttributeValue::UnitRef(target)) = entry.attr_value(gimli::DW_AT_type)? else {
                continue;
            };
            let Some(name) = unit_types.name(entry)? else {
                continue;
            };
            let record = unit.entry(target)?;
            if is_record(record.tag()) && record.attr_value(gimli::DW_AT_name)?.is_none() {
                unit_types.typedef_names.entry(target).or_insert(name);
            }
        }

        Ok(unit_types)
    }

    fn collect(&mut self, types: &mut TypeRegistry) -> Result<()> {
        let unit = self.unit;
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs()? {
            match entry.tag() {
                tag if is_record(tag) => {
                    if entry.attr_value(gimli::DW_AT_declaration)?.is_some() {
                        continue;
                    }
                    let layout = self.record_layout(entry)?;
                    if !types.has_record(&layout.name) {
                        types.add_record(layout);
                    }
                }
                gimli::DW_TAG_typedef => {
                    let Some(name) = self.name(entry)? else {
                        continue;
                    };
                    if !types.has_typedef(&name) {
                        let ty = self.resolve(entry.offset())?;
                        types.add_typedef(&name, ty);
                    }
                }
                gimli::DW_TAG_base_type => {
                    // Spellings such as `long unsigned int`
                    let Some(name) = self.name(entry)? else {
                        continue;
                    };
                    if Scalar::from_c_name(&name).is_none() && !types.has_typedef(&name) {
                        let ty = self.resolve(entry.offset())?;
                        types.add_typedef(&name, ty);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn name(&self, entry: &Entry<'_, '_, R>) -> Result<Option<String>> {
        let Some(value) = entry.attr_value(gimli::DW_AT_name)? else {
            return Ok(None);
        };
        let name = self.dwarf.attr_string(self.unit, value)?;
        Ok(Some(name.to_string_lossy()?.into_owned()))
    }

    fn record_name(&self, entry: &Entry<'_, '_, R>) -> Result<String> {
        if let Some(name) = self.name(entry)? {
            return Ok(name);
        }
        Ok(self
            .typedef_names
            .get(&entry.offset())
            .cloned()
            .unwrap_or_else(|| format!("<anonymous {}:{:#x}>", self.index, entry.offset().0)))
    }

    /// The type an entry refers to through `DW_AT_type`.
    fn type_of(&mut self, entry: &Entry<'_, '_, R>) -> Result<Option<Type>> {
        match entry.attr_value(gimli::DW_AT_type)? {
            Some(gimli::AttributeValue::UnitRef(offset)) => Ok(Some(self.resolve(offset)?)),
            // References into other units are not followed
            Some(_) => Ok(Some(Type::Void)),
            None => Ok(None),
        }
    }

    fn resolve(&mut self, offset: UnitOffset) -> Result<Type> {
        if let Some(ty) = self.cache.get(&offset) {
            return Ok(ty.clone());
        }

        let unit = self.unit;
        let entry = unit.entry(offset)?;
        let ty = match entry.tag() {
            gimli::DW_TAG_base_type => {
                let name = self.name(&entry)?.unwrap_or_default();
                let size = udata(&entry, gimli::DW_AT_byte_size)?.unwrap_or(0);
                let encoding = match entry.attr_value(gimli::DW_AT_encoding)? {
                    Some(gimli::AttributeValue::Encoding(encoding)) => Some(encoding),
                    _ => None,
                };
                base_type(&name, size, encoding)
            }
            gimli::DW_TAG_pointer_type | gimli::DW_TAG_reference_type => {
                self.type_of(&entry)?.unwrap_or(Type::Void).pointer_to()
            }
            gimli::DW_TAG_typedef
            | gimli::DW_TAG_const_type
            | gimli::DW_TAG_volatile_type
            | gimli::DW_TAG_restrict_type
            | gimli::DW_TAG_atomic_type => self.type_of(&entry)?.unwrap_or(Type::Void),
            tag if is_record(tag) => Type::Record(self.record_name(&entry)?),
            gimli::DW_TAG_enumeration_type => match self.type_of(&entry)? {
                Some(underlying) => underlying,
                None => {
                    let size = udata(&entry, gimli::DW_AT_byte_size)?.unwrap_or(4);
                    Scalar::integer(size, false)
                        .map(Type::Scalar)
                        .unwrap_or(Type::Scalar(Scalar::U32))
                }
            },
            gimli::DW_TAG_array_type => self.array(&entry)?,
            _ => Type::Void,
        };

        self.cache.insert(offset, ty.clone());
        Ok(ty)
    }

    fn array(&mut self, entry: &Entry<'_, '_, R>) -> Result<Type> {
        let element = self.type_of(entry)?.unwrap_or(Type::Void);

        let unit = self.unit;
        let mut lengths = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let mut children = tree.root()?.children();
        while let Some(child) = children.next()? {
            let subrange = child.entry();
            if subrange.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            let len = match udata(subrange, gimli::DW_AT_count)? {
                Some(count) => count,
                // Flexible array members have no bound
                None => udata(subrange, gimli::DW_AT_upper_bound)?.map_or(0, |upper| upper + 1),
            };
            lengths.push(len);
        }

        Ok(lengths
            .into_iter()
            .rev()
            .fold(element, |ty, len| Type::Array(Box::new(ty), len)))
    }

    fn member_offset(&self, entry: &Entry<'_, '_, R>) -> Result<u64> {
        match entry.attr_value(gimli::DW_AT_data_member_location)? {
            Some(gimli::AttributeValue::Exprloc(expression)) => {
                let mut operations = expression.operations(self.unit.encoding());
                match operations.next()? {
                    Some(gimli::Operation::PlusConstant { value }) => Ok(value),
                    other => bail!("Unsupported member location {other:?}"),
                }
            }
            Some(value) => Ok(value.udata_value().unwrap_or(0)),
            // Union members
            None => Ok(0),
        }
    }

    fn record_layout(&mut self, entry: &Entry<'_, '_, R>) -> Result<RecordLayout> {
        let name = self.record_name(entry)?;
        let size = udata(entry, gimli::DW_AT_byte_size)?.unwrap_or(0);

        let unit = self.unit;
        let mut members = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let mut children = tree.root()?.children();
        while let Some(child) = children.next()? {
            let member = child.entry();
            if member.tag() != gimli::DW_TAG_member {
                continue;
            }
            // Bit fields have no byte address
            if member.attr_value(gimli::DW_AT_bit_size)?.is_some() {
                continue;
            }
            let Some(member_name) = self.name(member)? else {
                continue;
            };
            let offset = self.member_offset(member)?;
            let ty = self.type_of(member)?.unwrap_or(Type::Void);
            members.push(Field::new(&member_name, offset, ty));
        }
        trace!("{name}: {size} bytes, {} member(s)", members.len());

        Ok(RecordLayout {
            name,
            size,
            fields: members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SnapshotMemory;
    use crate::printers::Printers;
    use crate::target::{Target, Value};
    use gimli::write::{self, AttributeValue, DwarfUnit, EndianVec, Sections, UnitEntryId};

    const NODE_SIZE: u64 = 200;

    struct Builder {
        dwarf: DwarfUnit,
    }

    impl Builder {
        fn new() -> Self {
            let encoding = gimli::Encoding {
                format: gimli::Format::Dwarf32,
                version: 4,
                address_size: 8,
            };
            Self {
                dwarf: DwarfUnit::new(encoding),
            }
        }

        fn add(
            &mut self,
            parent: Option<UnitEntryId>,
            tag: gimli::DwTag,
            attrs: Vec<(gimli::DwAt, AttributeValue)>,
        ) -> UnitEntryId {
            let parent = parent.unwrap_or_else(|| self.dwarf.unit.root());
            let id = self.dwarf.unit.add(parent, tag);
            let entry = self.dwarf.unit.get_mut(id);
            for (name, value) in attrs {
                entry.set(name, value);
            }
            id
        }

        fn base(&mut self, name: &str, size: u64, encoding: gimli::DwAte) -> UnitEntryId {
            self.add(
                None,
                gimli::DW_TAG_base_type,
                vec![
                    (gimli::DW_AT_name, AttributeValue::String(name.into())),
                    (gimli::DW_AT_byte_size, AttributeValue::Udata(size)),
                    (gimli::DW_AT_encoding, AttributeValue::Encoding(encoding)),
                ],
            )
        }

        fn typedef(&mut self, name: &str, ty: UnitEntryId) -> UnitEntryId {
            self.add(
                None,
                gimli::DW_TAG_typedef,
                vec![
                    (gimli::DW_AT_name, AttributeValue::String(name.into())),
                    (gimli::DW_AT_type, AttributeValue::UnitRef(ty)),
                ],
            )
        }

        fn pointer(&mut self, ty: Option<UnitEntryId>) -> UnitEntryId {
            let mut attrs = vec![(gimli::DW_AT_byte_size, AttributeValue::Udata(8))];
            if let Some(ty) = ty {
                attrs.push((gimli::DW_AT_type, AttributeValue::UnitRef(ty)));
            }
            self.add(None, gimli::DW_TAG_pointer_type, attrs)
        }

        fn structure(
            &mut self,
            name: Option<&str>,
            size: u64,
            members: &[(&str, u64, UnitEntryId)],
        ) -> UnitEntryId {
            let mut attrs = vec![(gimli::DW_AT_byte_size, AttributeValue::Udata(size))];
            if let Some(name) = name {
                attrs.push((gimli::DW_AT_name, AttributeValue::String(name.into())));
            }
            let record = self.add(None, gimli::DW_TAG_structure_type, attrs);
            for (name, offset, ty) in members {
                self.add(
                    Some(record),
                    gimli::DW_TAG_member,
                    vec![
                        (gimli::DW_AT_name, AttributeValue::String((*name).into())),
                        (gimli::DW_AT_data_member_location, AttributeValue::Udata(*offset)),
                        (gimli::DW_AT_type, AttributeValue::UnitRef(*ty)),
                    ],
                );
            }
            record
        }

        fn array(&mut self, element: UnitEntryId, count: u64) -> UnitEntryId {
            let array = self.add(
                None,
                gimli::DW_TAG_array_type,
                vec![(gimli::DW_AT_type, AttributeValue::UnitRef(element))],
            );
            self.add(
                Some(array),
                gimli::DW_TAG_subrange_type,
                vec![(gimli::DW_AT_count, AttributeValue::Udata(count))],
            );
            array
        }

        fn registry(mut self) -> TypeRegistry {
            let mut sections = Sections::new(EndianVec::new(gimli::RunTimeEndian::Little));
            self.dwarf.write(&mut sections).unwrap();

            let mut data = HashMap::new();
            sections
                .for_each(|id, section| -> write::Result<()> {
                    data.insert(id, section.slice().to_vec());
                    Ok(())
                })
                .unwrap();

            let dwarf = gimli::Dwarf::load(|id| -> Result<_, gimli::Error> {
                let bytes: &[u8] = data.get(&id).map(Vec::as_slice).unwrap_or(&[]);
                Ok(gimli::EndianSlice::new(bytes, gimli::LittleEndian))
            })
            .unwrap();
            type_registry_from_dwarf(&dwarf).unwrap()
        }
    }

    /// The hierarchy types laid out the way selvad declares them: flags and a
    /// `struct trx` label precede an embedded object before the vectors.
    fn selvad_types() -> TypeRegistry {
        let mut b = Builder::new();
        let char_ = b.base("char", 1, gimli::DW_ATE_signed_char);
        let ulong = b.base("long unsigned int", 8, gimli::DW_ATE_unsigned);
        let uchar = b.base("unsigned char", 1, gimli::DW_ATE_unsigned_char);

        let trxid = b.typedef("trxid_t", ulong);
        let trx = b.structure(Some("trx"), 16, &[("id", 0, trxid), ("cl", 8, trxid)]);

        let id_array = b.array(char_, 16);
        let node_id = b.typedef("Selva_NodeId", id_array);

        let void_ptr = b.pointer(None);
        let void_ptr_ptr = b.pointer(Some(void_ptr));
        let size_t = b.typedef("size_t", ulong);
        let svector = b.structure(
            Some("SVector"),
            48,
            &[("vec_last", 16, size_t), ("vec_arr", 40, void_ptr_ptr)],
        );
        b.typedef("SVector", svector);

        let object_data = b.array(uchar, 40);
        let node = b.structure(
            Some("SelvaHierarchyNode"),
            NODE_SIZE,
            &[
                ("id", 0, node_id),
                ("flags", 16, uchar),
                ("trx_label", 24, trx),
                ("_obj_data", 40, object_data),
                ("parents", 80, svector),
                ("children", 128, svector),
            ],
        );
        b.typedef("SelvaHierarchyNode", node);

        let anonymous = b.structure(None, 8, &[("value", 0, ulong)]);
        b.typedef("anonymous_t", anonymous);

        b.registry()
    }

    #[test]
    fn test_record_layouts_from_dwarf() {
        let types = selvad_types();

        let node = types.record("SelvaHierarchyNode").unwrap();
        assert_eq!(node.size, NODE_SIZE);
        assert_eq!(node.field("parents").unwrap().offset, 80);
        assert_eq!(node.field("children").unwrap().offset, 128);
        assert_eq!(
            node.field("children").unwrap().ty,
            Type::Record("SVector".into())
        );
        assert_eq!(
            types.resolve("Selva_NodeId").unwrap(),
            Type::Array(Box::new(Type::Scalar(Scalar::Char)), 16)
        );
        assert_eq!(types.resolve("trxid_t").unwrap(), Type::Scalar(Scalar::U64));
        assert_eq!(
            types.resolve("long unsigned int").unwrap(),
            Type::Scalar(Scalar::U64)
        );
        assert_eq!(
            types.record("SVector").unwrap().field("vec_arr").unwrap().ty,
            Type::Void.pointer_to().pointer_to()
        );
        assert_eq!(
            types.resolve("anonymous_t").unwrap(),
            Type::Record("anonymous_t".into())
        );
        assert!(types.resolve("struct tv").is_err());
    }

    #[test]
    fn test_render_node_with_dwarf_layout() {
        let types = selvad_types();
        let (root, child, slots) = (0x1000, 0x1100, 0x1200);
        let mut memory = SnapshotMemory::new();
        memory
            .map(0x1000, 0x1000)
            .write(root, b"root")
            .write_u64(root + 24, 0x2)
            .write_u64(root + 32, 0xa3)
            .write_u64(root + 128 + 16, 1)
            .write_u64(root + 128 + 40, slots)
            .write_u64(slots, child)
            .write(child, b"ma01");
        let target = Target::new(memory, types);

        let node = Value::at(root, Type::Record("SelvaHierarchyNode".into()));
        insta::assert_snapshot!(
            Printers::selva().display(&target, &node).unwrap(),
            @r#"{id: "root", visit_stamp: 2a3, parents: { }, children: { "ma01", }}"#
        );
    }

    #[test]
    fn test_binary_without_debug_info() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"\x7fELF not really").unwrap();
        assert!(load_type_registry(file.path()).is_err());
    }
}
