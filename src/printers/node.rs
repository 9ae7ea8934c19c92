use super::vector::{VectorView, render_ids};
use super::{Printers, ValuePrinter};
use crate::prelude::*;
use crate::target::types::HIERARCHY_NODE_TYPE;
use crate::target::{Target, Type, Value};
use std::fmt;

/// Member holding the traversal marker, by generation of the node layout.
const STAMP_MEMBERS: [&str; 2] = ["visit_stamp", "trx_label"];

/// Components of the marker: a `timespec` or a transaction `{id, cl}` pair.
const STAMP_COMPONENTS: [(&str, &str); 2] = [("tv_sec", "tv_nsec"), ("id", "cl")];

/// Traversal marker of a node, shown as `{seconds, nanoseconds}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitStamp {
    pub seconds: i128,
    pub nanoseconds: i128,
}

fn write_hex(f: &mut fmt::Formatter<'_>, value: i128) -> fmt::Result {
    if value < 0 {
        write!(f, "-{:x}", value.unsigned_abs())
    } else {
        write!(f, "{value:x}")
    }
}

/// Both components in lowercase hex, back to back: `{255, 16}` is `ff10`.
impl fmt::Display for VisitStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, self.seconds)?;
        write_hex(f, self.nanoseconds)
    }
}

/// Read-only view of a `SelvaHierarchyNode`, possibly at the null address.
pub struct NodeView<'t> {
    target: &'t Target,
    value: Value,
}

impl<'t> NodeView<'t> {
    pub fn new(target: &'t Target, value: Value) -> InspectResult<Self> {
        let value = match &value.ty {
            Type::Pointer(pointee) if pointee.record_name() == Some(HIERARCHY_NODE_TYPE) => {
                target.dereference(&value)?
            }
            _ => value,
        };
        if value.ty.record_name() != Some(HIERARCHY_NODE_TYPE) {
            return Err(InspectError::type_resolution(HIERARCHY_NODE_TYPE));
        }
        if value.address().is_none() {
            return Err(InspectError::evaluation(
                value.ty.to_string(),
                "node is not located in memory",
            ));
        }
        Ok(Self { target, value })
    }

    pub fn is_null(&self) -> bool {
        self.value.address() == Some(0)
    }

    pub fn id(&self) -> InspectResult<Value> {
        self.target.field(&self.value, "id")
    }

    pub fn visit_stamp(&self) -> InspectResult<VisitStamp> {
        let stamp = STAMP_MEMBERS
            .iter()
            .find_map(|member| self.target.field(&self.value, member).ok())
            .ok_or_else(|| InspectError::type_resolution(format!("{HIERARCHY_NODE_TYPE}.visit_stamp")))?;
        let (seconds, nanoseconds) = STAMP_COMPONENTS
            .iter()
            .find_map(|(first, second)| {
                let first = self.target.field(&stamp, first).ok()?;
                let second = self.target.field(&stamp, second).ok()?;
                Some((first, second))
            })
            .ok_or_else(|| InspectError::type_resolution(format!("{}.tv_sec", stamp.ty)))?;
        Ok(VisitStamp {
            seconds: self.target.read_integer(&seconds)?,
            nanoseconds: self.target.read_integer(&nanoseconds)?,
        })
    }

    pub fn parents(&self) -> InspectResult<VectorView<'t>> {
        VectorView::new(self.target, self.target.field(&self.value, "parents")?)
    }

    pub fn children(&self) -> InspectResult<VectorView<'t>> {
        VectorView::new(self.target, self.target.field(&self.value, "children")?)
    }
}

/// `{id: <id>, visit_stamp: <stamp>, parents: { .. }, children: { .. }}`, or
/// `NULL` for the null node.
pub fn render(printers: &Printers, node: &NodeView) -> InspectResult<String> {
    if node.is_null() {
        return Ok("NULL".to_string());
    }

    let target = node.target;
    let id = printers.display(target, &node.id()?)?;
    let visit_stamp = node.visit_stamp()?;
    let element_type = target.resolve_type(&format!("{HIERARCHY_NODE_TYPE} *"))?;
    let parents = render_ids(printers, &node.parents()?, &element_type)?;
    let children = render_ids(printers, &node.children()?, &element_type)?;

    Ok(format!(
        "{{id: {id}, visit_stamp: {visit_stamp}, parents: {parents}, children: {children}}}"
    ))
}

pub struct NodePrinter;

impl ValuePrinter for NodePrinter {
    fn to_string(&self, printers: &Printers, target: &Target, value: &Value) -> InspectResult<String> {
        render(printers, &NodeView::new(target, value.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SnapshotMemory;
    use crate::target::{Field, RecordLayout, Scalar, TypeRegistry};

    const NODE_SIZE: u64 = 128;

    /// Selva layouts with plain integer node ids.
    fn int_id_types() -> TypeRegistry {
        let mut types = TypeRegistry::selva();
        let mut node = types.record(HIERARCHY_NODE_TYPE).unwrap().clone();
        node.fields[0] = Field::new("id", 0, Type::Scalar(Scalar::I64));
        types.add_record(node);
        types
    }

    struct NodeFixture {
        address: u64,
        id: i64,
        stamp: (i64, i64),
        parents: Vec<u64>,
        children: Vec<u64>,
    }

    fn write_vector(memory: &mut SnapshotMemory, vector: u64, slots: u64, nodes: &[u64]) {
        memory
            .write_u64(vector + 16, nodes.len() as u64)
            .write_u64(vector + 40, slots);
        for (i, node) in nodes.iter().enumerate() {
            memory.write_u64(slots + 8 * i as u64, *node);
        }
    }

    fn write_node(memory: &mut SnapshotMemory, fixture: &NodeFixture) {
        let address = fixture.address;
        memory
            .write_i64(address, fixture.id)
            .write_i64(address + 16, fixture.stamp.0)
            .write_i64(address + 24, fixture.stamp.1);
        // Slot arrays live right after the node
        write_vector(memory, address + 32, address + NODE_SIZE, &fixture.parents);
        write_vector(memory, address + 80, address + NODE_SIZE + 0x40, &fixture.children);
    }

    fn target(nodes: &[NodeFixture]) -> Target {
        let mut memory = SnapshotMemory::new();
        memory.map(0x10000, 0x10000);
        for node in nodes {
            write_node(&mut memory, node);
        }
        Target::new(memory, int_id_types())
    }

    fn node(address: u64, id: i64) -> NodeFixture {
        NodeFixture {
            address,
            id,
            stamp: (0, 0),
            parents: vec![],
            children: vec![],
        }
    }

    fn render_at(target: &Target, address: u64) -> InspectResult<String> {
        let value = Value::at(address, Type::Record(HIERARCHY_NODE_TYPE.into()));
        Printers::selva().display(target, &value)
    }

    #[test]
    fn test_render_node_with_children() {
        let target = target(&[
            NodeFixture {
                children: vec![0x11000, 0x12000],
                ..node(0x10000, 42)
            },
            node(0x11000, 7),
            node(0x12000, 9),
        ]);
        insta::assert_snapshot!(
            render_at(&target, 0x10000).unwrap(),
            @"{id: 42, visit_stamp: 00, parents: { }, children: { 7, 9, }}"
        );
    }

    #[test]
    fn test_render_is_idempotent() {
        let target = target(&[
            NodeFixture {
                parents: vec![0x11000],
                stamp: (0x6543_21ab, 999),
                ..node(0x10000, 1)
            },
            node(0x11000, 2),
        ]);
        let first = render_at(&target, 0x10000).unwrap();
        assert_eq!(first, render_at(&target, 0x10000).unwrap());
        assert_eq!(
            first,
            "{id: 1, visit_stamp: 654321ab3e7, parents: { 2, }, children: { }}"
        );
    }

    #[test]
    fn test_null_node_reads_nothing() {
        // Nothing is mapped at all
        let target = Target::new(SnapshotMemory::new(), int_id_types());
        assert_eq!(render_at(&target, 0).unwrap(), "NULL");
    }

    #[test]
    fn test_null_node_pointer() {
        let target = target(&[node(0x10000, 1)]);
        let pointer = Value::immediate(0, target.resolve_type("SelvaHierarchyNode *").unwrap());
        assert_eq!(Printers::selva().display(&target, &pointer).unwrap(), "NULL");
    }

    #[test]
    fn test_visit_stamp_hex() {
        let stamp = VisitStamp {
            seconds: 255,
            nanoseconds: 16,
        };
        assert_eq!(stamp.to_string(), "ff10");
        let negative = VisitStamp {
            seconds: -1,
            nanoseconds: 0xabc,
        };
        assert_eq!(negative.to_string(), "-1abc");
    }

    #[test]
    fn test_broken_adjacency_is_an_error() {
        let target = target(&[NodeFixture {
            children: vec![0x11000, 0xdead_0000],
            ..node(0x10000, 42)
        }]);
        assert_eq!(
            render_at(&target, 0x10000),
            Err(InspectError::OutOfBoundsRead {
                address: 0xdead_0000,
                len: 8
            })
        );
    }

    #[test]
    fn test_selva_node_ids_are_strings() {
        let mut memory = SnapshotMemory::new();
        memory
            .map(0x10000, 0x1000)
            .write(0x10000, b"root\0\0\0\0\0\0")
            .write_i64(0x10010, 255)
            .write_i64(0x10018, 16);
        let target = Target::new(memory, TypeRegistry::selva());
        insta::assert_snapshot!(
            render_at(&target, 0x10000).unwrap(),
            @r#"{id: "root", visit_stamp: ff10, parents: { }, children: { }}"#
        );
    }

    #[test]
    fn test_node_with_transaction_label() {
        let mut types = TypeRegistry::selva();
        types.add_record(RecordLayout {
            name: "trx".into(),
            size: 16,
            fields: vec![
                Field::new("id", 0, Type::Scalar(Scalar::U64)),
                Field::new("cl", 8, Type::Scalar(Scalar::U64)),
            ],
        });
        let mut node = types.record(HIERARCHY_NODE_TYPE).unwrap().clone();
        node.fields[1] = Field::new("trx_label", 16, Type::Record("trx".into()));
        types.add_record(node);

        let mut memory = SnapshotMemory::new();
        memory
            .map(0x10000, 0x1000)
            .write(0x10000, b"ma02")
            .write_u64(0x10010, 0x1f)
            .write_u64(0x10018, 0x4);
        let target = Target::new(memory, types);
        insta::assert_snapshot!(
            render_at(&target, 0x10000).unwrap(),
            @r#"{id: "ma02", visit_stamp: 1f4, parents: { }, children: { }}"#
        );
    }

    #[test]
    fn test_node_without_stamp_member() {
        let mut types = TypeRegistry::selva();
        let mut node = types.record(HIERARCHY_NODE_TYPE).unwrap().clone();
        node.fields.retain(|field| field.name != "visit_stamp");
        types.add_record(node);
        let mut memory = SnapshotMemory::new();
        memory.map(0x10000, 0x1000);
        let target = Target::new(memory, types);
        assert_eq!(
            render_at(&target, 0x10000),
            Err(InspectError::TypeResolution {
                name: "SelvaHierarchyNode.visit_stamp".into()
            })
        );
    }

    #[test]
    fn test_node_view_rejects_other_types() {
        let target = target(&[node(0x10000, 1)]);
        let vector = Value::at(0x10000, Type::Record("SVector".into()));
        assert!(NodeView::new(&target, vector).is_err());
    }
}
