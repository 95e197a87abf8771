//! The versioned graph store — one of the two copies the engine coordinates.
//!
//! Vertices, edges and attributes live in arenas with slot reuse; attribute
//! values sit in a table keyed by (attribute, element). Every observable
//! mutation increments the modification counter exactly once and, while a
//! write transaction is attached, records a forward/inverse op pair into it.
//!
//! Replaying a recorded op sequence onto a store with identical content
//! reproduces identical arena layout — that is what keeps the two engine
//! copies interchangeable after each synchronization point.

use hashbrown::HashMap;

use crate::edit::{Edit, EditOp};
use crate::error::{GraphError, GraphResult};
use crate::value::{AttributeId, EdgeId, ElementKind, KeyRepr, Value, VertexId};

/// What the store is currently doing with incoming operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    /// Normal mutation; records into the attached edit, if any
    Execute,
    /// Replaying inverse records
    Undo,
    /// Replaying forward records
    Redo,
}

/// A registered attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub kind: ElementKind,
    /// Part of its element kind's primary key
    pub key: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct VertexSlot {
    /// Incident edges in insertion order
    edges: Vec<EdgeId>,
}

#[derive(Debug, Clone, PartialEq)]
struct EdgeSlot {
    source: VertexId,
    target: VertexId,
}

/// A single mutable graph/table structure.
///
/// The engine owns two of these; callers only ever see one through a read
/// or write handle.
#[derive(Debug)]
pub struct GraphStore {
    vertices: Vec<Option<VertexSlot>>,
    vertex_free: Vec<u32>,
    vertex_count: usize,

    edges: Vec<Option<EdgeSlot>>,
    edge_free: Vec<u32>,
    edge_count: usize,

    attributes: Vec<Option<Attribute>>,
    attribute_free: Vec<u32>,

    values: HashMap<(u32, u32), Value>,

    counter: u64,
    mode: OperationMode,
    pub(crate) edit: Option<Edit>,
}

impl GraphStore {
    pub(crate) fn fresh(capacity: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(capacity),
            vertex_free: Vec::new(),
            vertex_count: 0,
            edges: Vec::with_capacity(capacity),
            edge_free: Vec::new(),
            edge_count: 0,
            attributes: Vec::new(),
            attribute_free: Vec::new(),
            values: HashMap::new(),
            counter: 0,
            mode: OperationMode::Execute,
            edit: None,
        }
    }

    // -----------------------------------------------------------------
    // Counters and modes
    // -----------------------------------------------------------------

    /// Monotonic version stamp; strictly increases on every mutation.
    pub fn modification_counter(&self) -> u64 {
        self.counter
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.mode
    }

    pub(crate) fn begin_replay(&mut self, mode: OperationMode) {
        self.mode = mode;
    }

    pub(crate) fn end_replay(&mut self) {
        self.mode = OperationMode::Execute;
    }

    /// Count the mutation and, in `Execute` mode with a transaction
    /// attached, record its forward/inverse pair.
    fn bump(&mut self, forward: EditOp, inverse: EditOp) {
        self.counter += 1;
        if self.mode == OperationMode::Execute {
            if let Some(edit) = self.edit.as_mut() {
                edit.push_record(forward, inverse);
            }
        }
    }

    // -----------------------------------------------------------------
    // Vertices
    // -----------------------------------------------------------------

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn has_vertex(&self, v: VertexId) -> bool {
        self.vertices
            .get(v.0 as usize)
            .map_or(false, |slot| slot.is_some())
    }

    fn require_vertex(&self, v: VertexId) -> GraphResult<()> {
        if self.has_vertex(v) {
            Ok(())
        } else {
            Err(GraphError::UnknownElement { kind: ElementKind::Vertex, id: v.0 })
        }
    }

    fn next_vertex_id(&self) -> VertexId {
        match self.vertex_free.last() {
            Some(&slot) => VertexId(slot),
            None => VertexId(self.vertices.len() as u32),
        }
    }

    fn occupy_vertex(&mut self, v: VertexId) {
        let i = v.0 as usize;
        if i >= self.vertices.len() {
            for gap in self.vertices.len()..i {
                self.vertex_free.push(gap as u32);
            }
            self.vertices.resize_with(i + 1, || None);
        }
        if let Some(pos) = self.vertex_free.iter().position(|&f| f == v.0) {
            self.vertex_free.swap_remove(pos);
        }
        debug_assert!(self.vertices[i].is_none(), "vertex slot {} already occupied", v.0);
        self.vertices[i] = Some(VertexSlot::default());
        self.vertex_count += 1;
    }

    fn free_vertex(&mut self, v: VertexId) {
        let slot = self.vertices[v.0 as usize].take();
        debug_assert!(
            slot.map_or(false, |s| s.edges.is_empty()),
            "vertex {} freed with incident edges",
            v.0
        );
        self.vertex_free.push(v.0);
        self.vertex_count -= 1;
    }

    /// Add a vertex, reusing the most recently freed slot if any.
    pub fn add_vertex(&mut self) -> VertexId {
        let id = self.next_vertex_id();
        self.occupy_vertex(id);
        self.bump(
            EditOp::AddVertex { vertex: id },
            EditOp::RemoveVertex { vertex: id },
        );
        id
    }

    /// Remove a vertex. Incident edges and attribute values are removed
    /// first, each recorded as its own op, so undo restores everything.
    pub fn remove_vertex(&mut self, v: VertexId) -> GraphResult<()> {
        self.require_vertex(v)?;

        let incident: Vec<EdgeId> = self.vertices[v.0 as usize]
            .as_ref()
            .map(|slot| slot.edges.clone())
            .unwrap_or_default();
        for e in incident {
            self.remove_edge(e)?;
        }

        for (attribute, _) in self.values_for(ElementKind::Vertex, v.0) {
            self.set_value_raw(attribute, v.0, None)?;
        }

        self.free_vertex(v);
        self.bump(
            EditOp::RemoveVertex { vertex: v },
            EditOp::AddVertex { vertex: v },
        );
        Ok(())
    }

    /// Live vertex ids in ascending order.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| VertexId(i as u32))
    }

    // -----------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn has_edge(&self, e: EdgeId) -> bool {
        self.edges
            .get(e.0 as usize)
            .map_or(false, |slot| slot.is_some())
    }

    fn require_edge(&self, e: EdgeId) -> GraphResult<()> {
        if self.has_edge(e) {
            Ok(())
        } else {
            Err(GraphError::UnknownElement { kind: ElementKind::Edge, id: e.0 })
        }
    }

    fn next_edge_id(&self) -> EdgeId {
        match self.edge_free.last() {
            Some(&slot) => EdgeId(slot),
            None => EdgeId(self.edges.len() as u32),
        }
    }

    fn occupy_edge(&mut self, e: EdgeId, source: VertexId, target: VertexId) {
        let i = e.0 as usize;
        if i >= self.edges.len() {
            for gap in self.edges.len()..i {
                self.edge_free.push(gap as u32);
            }
            self.edges.resize_with(i + 1, || None);
        }
        if let Some(pos) = self.edge_free.iter().position(|&f| f == e.0) {
            self.edge_free.swap_remove(pos);
        }
        debug_assert!(self.edges[i].is_none(), "edge slot {} already occupied", e.0);
        self.edges[i] = Some(EdgeSlot { source, target });
        self.edge_count += 1;

        if let Some(slot) = self.vertices[source.0 as usize].as_mut() {
            slot.edges.push(e);
        }
        if source != target {
            if let Some(slot) = self.vertices[target.0 as usize].as_mut() {
                slot.edges.push(e);
            }
        }
    }

    fn free_edge(&mut self, e: EdgeId) {
        let slot = self.edges[e.0 as usize].take().expect("freeing vacant edge slot");
        if let Some(v) = self.vertices[slot.source.0 as usize].as_mut() {
            v.edges.retain(|&x| x != e);
        }
        if slot.source != slot.target {
            if let Some(v) = self.vertices[slot.target.0 as usize].as_mut() {
                v.edges.retain(|&x| x != e);
            }
        }
        self.edge_free.push(e.0);
        self.edge_count -= 1;
    }

    /// Add a directed edge between two live vertices. Self-loops allowed.
    pub fn add_edge(&mut self, source: VertexId, target: VertexId) -> GraphResult<EdgeId> {
        self.require_vertex(source)?;
        self.require_vertex(target)?;
        let id = self.next_edge_id();
        self.occupy_edge(id, source, target);
        self.bump(
            EditOp::AddEdge { edge: id, source, target },
            EditOp::RemoveEdge { edge: id, source, target },
        );
        Ok(id)
    }

    /// Remove an edge after clearing its attribute values.
    pub fn remove_edge(&mut self, e: EdgeId) -> GraphResult<()> {
        self.require_edge(e)?;

        for (attribute, _) in self.values_for(ElementKind::Edge, e.0) {
            self.set_value_raw(attribute, e.0, None)?;
        }

        let slot = self.edges[e.0 as usize].clone().expect("edge checked above");
        self.free_edge(e);
        self.bump(
            EditOp::RemoveEdge { edge: e, source: slot.source, target: slot.target },
            EditOp::AddEdge { edge: e, source: slot.source, target: slot.target },
        );
        Ok(())
    }

    pub fn edge_endpoints(&self, e: EdgeId) -> GraphResult<(VertexId, VertexId)> {
        self.require_edge(e)?;
        let slot = self.edges[e.0 as usize].as_ref().expect("edge checked above");
        Ok((slot.source, slot.target))
    }

    /// Incident edges of a vertex in insertion order.
    pub fn vertex_edges(&self, v: VertexId) -> GraphResult<&[EdgeId]> {
        self.require_vertex(v)?;
        Ok(&self.vertices[v.0 as usize].as_ref().expect("vertex checked above").edges)
    }

    /// Live edge ids in ascending order.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| EdgeId(i as u32))
    }

    // -----------------------------------------------------------------
    // Attributes and values
    // -----------------------------------------------------------------

    pub fn attribute(&self, a: AttributeId) -> Option<&Attribute> {
        self.attributes.get(a.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn attribute_by_name(&self, kind: ElementKind, name: &str) -> Option<AttributeId> {
        self.attributes.iter().enumerate().find_map(|(i, slot)| match slot {
            Some(attr) if attr.kind == kind && attr.name == name => Some(AttributeId(i as u32)),
            _ => None,
        })
    }

    /// Registered attributes in id order.
    pub fn attributes(&self) -> impl Iterator<Item = (AttributeId, &Attribute)> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|a| (AttributeId(i as u32), a)))
    }

    fn occupy_attribute(&mut self, a: AttributeId, attr: Attribute) {
        let i = a.0 as usize;
        if i >= self.attributes.len() {
            for gap in self.attributes.len()..i {
                self.attribute_free.push(gap as u32);
            }
            self.attributes.resize_with(i + 1, || None);
        }
        if let Some(pos) = self.attribute_free.iter().position(|&f| f == a.0) {
            self.attribute_free.swap_remove(pos);
        }
        debug_assert!(self.attributes[i].is_none(), "attribute slot {} already occupied", a.0);
        self.attributes[i] = Some(attr);
    }

    fn free_attribute(&mut self, a: AttributeId) {
        self.attributes[a.0 as usize] = None;
        self.attribute_free.push(a.0);
    }

    /// Register an attribute; names are unique per element kind.
    pub fn add_attribute(&mut self, name: &str, kind: ElementKind, key: bool) -> GraphResult<AttributeId> {
        if self.attribute_by_name(kind, name).is_some() {
            return Err(GraphError::AttributeExists { kind, name: name.to_string() });
        }
        let id = match self.attribute_free.last() {
            Some(&slot) => AttributeId(slot),
            None => AttributeId(self.attributes.len() as u32),
        };
        self.occupy_attribute(id, Attribute { name: name.to_string(), kind, key });
        self.bump(
            EditOp::AddAttribute { attribute: id, name: name.to_string(), kind, key },
            EditOp::RemoveAttribute { attribute: id, name: name.to_string(), kind, key },
        );
        Ok(id)
    }

    /// Unregister an attribute, clearing all its values first.
    pub fn remove_attribute(&mut self, a: AttributeId) -> GraphResult<()> {
        let attr = self
            .attribute(a)
            .cloned()
            .ok_or(GraphError::UnknownAttribute { id: a.0 })?;

        let holders: Vec<u32> = self
            .values
            .keys()
            .filter(|(attr_id, _)| *attr_id == a.0)
            .map(|(_, element)| *element)
            .collect();
        for element in holders {
            self.set_value_raw(a, element, None)?;
        }

        self.free_attribute(a);
        self.bump(
            EditOp::RemoveAttribute {
                attribute: a,
                name: attr.name.clone(),
                kind: attr.kind,
                key: attr.key,
            },
            EditOp::AddAttribute { attribute: a, name: attr.name, kind: attr.kind, key: attr.key },
        );
        Ok(())
    }

    fn set_value_raw(&mut self, a: AttributeId, element: u32, value: Option<Value>) -> GraphResult<()> {
        let old = self.values.get(&(a.0, element)).cloned();
        if old == value {
            // An unchanged value is not an observable mutation.
            return Ok(());
        }
        match &value {
            Some(v) => {
                self.values.insert((a.0, element), v.clone());
            }
            None => {
                self.values.remove(&(a.0, element));
            }
        }
        self.bump(
            EditOp::SetValue { attribute: a, element, value },
            EditOp::SetValue { attribute: a, element, value: old },
        );
        Ok(())
    }

    fn checked_attribute(&self, a: AttributeId, expected: ElementKind) -> GraphResult<&Attribute> {
        let attr = self.attribute(a).ok_or(GraphError::UnknownAttribute { id: a.0 })?;
        if attr.kind != expected {
            return Err(GraphError::KindMismatch {
                attribute: attr.name.clone(),
                expected: attr.kind,
                actual: expected,
            });
        }
        Ok(attr)
    }

    /// Set (or clear, with `None`) a vertex attribute value.
    pub fn set_vertex_value(
        &mut self,
        a: AttributeId,
        v: VertexId,
        value: Option<Value>,
    ) -> GraphResult<()> {
        self.checked_attribute(a, ElementKind::Vertex)?;
        self.require_vertex(v)?;
        self.set_value_raw(a, v.0, value)
    }

    /// Set (or clear, with `None`) an edge attribute value.
    pub fn set_edge_value(
        &mut self,
        a: AttributeId,
        e: EdgeId,
        value: Option<Value>,
    ) -> GraphResult<()> {
        self.checked_attribute(a, ElementKind::Edge)?;
        self.require_edge(e)?;
        self.set_value_raw(a, e.0, value)
    }

    pub fn vertex_value(&self, a: AttributeId, v: VertexId) -> GraphResult<Option<&Value>> {
        self.checked_attribute(a, ElementKind::Vertex)?;
        self.require_vertex(v)?;
        Ok(self.values.get(&(a.0, v.0)))
    }

    pub fn edge_value(&self, a: AttributeId, e: EdgeId) -> GraphResult<Option<&Value>> {
        self.checked_attribute(a, ElementKind::Edge)?;
        self.require_edge(e)?;
        Ok(self.values.get(&(a.0, e.0)))
    }

    fn values_for(&self, kind: ElementKind, element: u32) -> Vec<(AttributeId, Value)> {
        self.values
            .iter()
            .filter(|((attr_id, el), _)| {
                *el == element
                    && self
                        .attribute(AttributeId(*attr_id))
                        .map_or(false, |a| a.kind == kind)
            })
            .map(|((attr_id, _), value)| (AttributeId(*attr_id), value.clone()))
            .collect()
    }

    // -----------------------------------------------------------------
    // Validation and replay
    // -----------------------------------------------------------------

    /// Check primary-key uniqueness for both element kinds.
    pub fn validate_keys(&self) -> GraphResult<()> {
        self.validate_keys_for(ElementKind::Vertex)?;
        self.validate_keys_for(ElementKind::Edge)
    }

    fn validate_keys_for(&self, kind: ElementKind) -> GraphResult<()> {
        let key_attrs: Vec<(AttributeId, String)> = self
            .attributes()
            .filter(|(_, a)| a.kind == kind && a.key)
            .map(|(id, a)| (id, a.name.clone()))
            .collect();
        if key_attrs.is_empty() {
            return Ok(());
        }

        let element_ids: Vec<u32> = match kind {
            ElementKind::Vertex => self.vertex_ids().map(|v| v.0).collect(),
            ElementKind::Edge => self.edge_ids().map(|e| e.0).collect(),
        };

        let mut seen: HashMap<Vec<Option<KeyRepr>>, u32> = HashMap::with_capacity(element_ids.len());
        for element in element_ids {
            let tuple: Vec<Option<KeyRepr>> = key_attrs
                .iter()
                .map(|(a, _)| self.values.get(&(a.0, element)).map(Value::key_repr))
                .collect();
            if let Some(&first) = seen.get(&tuple) {
                return Err(GraphError::DuplicateKey {
                    kind,
                    attributes: key_attrs.iter().map(|(_, n)| n.clone()).collect(),
                    first,
                    second: element,
                });
            }
            seen.insert(tuple, element);
        }
        Ok(())
    }

    /// Replay a recorded op with its recorded ids. Does not record.
    pub(crate) fn apply(&mut self, op: &EditOp) {
        match op {
            EditOp::AddVertex { vertex } => self.occupy_vertex(*vertex),
            EditOp::RemoveVertex { vertex } => self.free_vertex(*vertex),
            EditOp::AddEdge { edge, source, target } => self.occupy_edge(*edge, *source, *target),
            EditOp::RemoveEdge { edge, .. } => self.free_edge(*edge),
            EditOp::AddAttribute { attribute, name, kind, key } => self.occupy_attribute(
                *attribute,
                Attribute { name: name.clone(), kind: *kind, key: *key },
            ),
            EditOp::RemoveAttribute { attribute, .. } => self.free_attribute(*attribute),
            EditOp::SetValue { attribute, element, value } => match value {
                Some(v) => {
                    self.values.insert((attribute.0, *element), v.clone());
                }
                None => {
                    self.values.remove(&(attribute.0, *element));
                }
            },
        }
        self.counter += 1;
    }

    /// Structural equality of graph content, ignoring the counter.
    pub fn content_eq(&self, other: &GraphStore) -> bool {
        self.vertices == other.vertices
            && self.edges == other.edges
            && self.attributes == other.attributes
            && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GraphStore {
        GraphStore::fresh(16)
    }

    #[test]
    fn test_add_remove_vertex() {
        let mut g = store();
        let v = g.add_vertex();
        assert_eq!(v, VertexId(0));
        assert_eq!(g.vertex_count(), 1);
        assert!(g.has_vertex(v));

        g.remove_vertex(v).unwrap();
        assert_eq!(g.vertex_count(), 0);
        assert!(!g.has_vertex(v));
    }

    #[test]
    fn test_slot_reuse_after_removal() {
        let mut g = store();
        let a = g.add_vertex();
        let _b = g.add_vertex();
        g.remove_vertex(a).unwrap();
        let c = g.add_vertex();
        assert_eq!(c, a, "freed slot should be reused");
        assert_eq!(g.vertex_count(), 2);
    }

    #[test]
    fn test_counter_strictly_increases() {
        let mut g = store();
        let before = g.modification_counter();
        let v = g.add_vertex();
        let mid = g.modification_counter();
        assert!(mid > before);
        g.remove_vertex(v).unwrap();
        assert!(g.modification_counter() > mid);
    }

    #[test]
    fn test_unchanged_value_does_not_count() {
        let mut g = store();
        let v = g.add_vertex();
        let a = g.add_attribute("label", ElementKind::Vertex, false).unwrap();
        g.set_vertex_value(a, v, Some(Value::Integer(5))).unwrap();
        let counter = g.modification_counter();
        g.set_vertex_value(a, v, Some(Value::Integer(5))).unwrap();
        assert_eq!(g.modification_counter(), counter);
    }

    #[test]
    fn test_remove_vertex_cascades_edges() {
        let mut g = store();
        let a = g.add_vertex();
        let b = g.add_vertex();
        let e = g.add_edge(a, b).unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.vertex_edges(b).unwrap(), &[e]);

        g.remove_vertex(a).unwrap();
        assert_eq!(g.edge_count(), 0);
        assert!(g.vertex_edges(b).unwrap().is_empty());
    }

    #[test]
    fn test_self_loop_edges() {
        let mut g = store();
        let a = g.add_vertex();
        let e = g.add_edge(a, a).unwrap();
        assert_eq!(g.vertex_edges(a).unwrap(), &[e]);
        g.remove_edge(e).unwrap();
        assert!(g.vertex_edges(a).unwrap().is_empty());
    }

    #[test]
    fn test_edge_requires_live_vertices() {
        let mut g = store();
        let a = g.add_vertex();
        assert!(matches!(
            g.add_edge(a, VertexId(9)),
            Err(GraphError::UnknownElement { kind: ElementKind::Vertex, id: 9 })
        ));
    }

    #[test]
    fn test_attribute_name_unique_per_kind() {
        let mut g = store();
        g.add_attribute("name", ElementKind::Vertex, true).unwrap();
        assert!(matches!(
            g.add_attribute("name", ElementKind::Vertex, false),
            Err(GraphError::AttributeExists { .. })
        ));
        // Same name on the other kind is fine.
        assert!(g.add_attribute("name", ElementKind::Edge, false).is_ok());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut g = store();
        let v = g.add_vertex();
        let _ = v;
        let a = g.add_attribute("weight", ElementKind::Edge, false).unwrap();
        assert!(matches!(
            g.set_vertex_value(a, VertexId(0), Some(Value::Real(1.0))),
            Err(GraphError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_keys_detects_duplicates() {
        let mut g = store();
        let a = g.add_attribute("name", ElementKind::Vertex, true).unwrap();
        let v1 = g.add_vertex();
        let v2 = g.add_vertex();
        g.set_vertex_value(a, v1, Some(Value::Text("n1".into()))).unwrap();
        g.set_vertex_value(a, v2, Some(Value::Text("n1".into()))).unwrap();

        match g.validate_keys() {
            Err(GraphError::DuplicateKey { kind, first, second, .. }) => {
                assert_eq!(kind, ElementKind::Vertex);
                assert_eq!((first, second), (v1.0, v2.0));
            }
            other => panic!("expected DuplicateKey, got {:?}", other),
        }

        g.set_vertex_value(a, v2, Some(Value::Text("n2".into()))).unwrap();
        assert!(g.validate_keys().is_ok());
    }

    #[test]
    fn test_validate_keys_ignores_kinds_without_keys() {
        let mut g = store();
        g.add_attribute("label", ElementKind::Vertex, false).unwrap();
        let _v1 = g.add_vertex();
        let _v2 = g.add_vertex();
        // Two vertices with no key attributes at all must not collide.
        assert!(g.validate_keys().is_ok());
    }

    #[test]
    fn test_recorded_ops_replay_identically() {
        let mut g = store();
        g.edit = Some(Edit::new("build", true, "test", g.modification_counter()));

        let a = g.add_attribute("label", ElementKind::Vertex, false).unwrap();
        let v1 = g.add_vertex();
        let v2 = g.add_vertex();
        let _e = g.add_edge(v1, v2).unwrap();
        g.set_vertex_value(a, v1, Some(Value::Text("first".into()))).unwrap();
        g.remove_vertex(v2).unwrap();

        let edit = g.edit.take().unwrap();
        let mut twin = GraphStore::fresh(16);
        edit.replay_forward(&mut twin, OperationMode::Execute);

        assert!(g.content_eq(&twin));
        assert_eq!(g.modification_counter(), twin.modification_counter());
    }

    #[test]
    fn test_undo_replay_restores_content() {
        let mut g = store();
        let a = g.add_attribute("label", ElementKind::Vertex, false).unwrap();
        let v0 = g.add_vertex();
        g.set_vertex_value(a, v0, Some(Value::Integer(1))).unwrap();

        let mut reference = GraphStore::fresh(16);
        reference.add_attribute("label", ElementKind::Vertex, false).unwrap();
        let r0 = reference.add_vertex();
        reference.set_vertex_value(a, r0, Some(Value::Integer(1))).unwrap();

        g.edit = Some(Edit::new("mutate", true, "test", g.modification_counter()));
        let v1 = g.add_vertex();
        g.add_edge(v0, v1).unwrap();
        g.set_vertex_value(a, v0, Some(Value::Integer(2))).unwrap();

        let edit = g.edit.take().unwrap();
        edit.replay_inverse(&mut g);

        assert!(g.content_eq(&reference));
    }
}
