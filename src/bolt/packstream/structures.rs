//! Graph and spatial structures carried inside PackStream values.

use std::collections::HashMap;

use super::types::ValueMap;
use super::PackStreamError;

/// A node: id, labels and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: ValueMap,
}

impl Node {
    pub fn new(id: i64, labels: Vec<String>, properties: ValueMap) -> Self {
        Self {
            id,
            labels,
            properties,
        }
    }
}

/// A relationship with both endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: ValueMap,
}

impl Relationship {
    pub fn new(
        id: i64,
        start_node_id: i64,
        end_node_id: i64,
        rel_type: impl Into<String>,
        properties: ValueMap,
    ) -> Self {
        Self {
            id,
            start_node_id,
            end_node_id,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// Drop the endpoints, as used inside a path.
    pub fn unbind(&self) -> UnboundRelationship {
        UnboundRelationship {
            id: self.id,
            rel_type: self.rel_type.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// A relationship without endpoints. Only appears inside paths, where the
/// endpoints follow from the traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: ValueMap,
}

impl UnboundRelationship {
    pub fn bind(&self, start_node_id: i64, end_node_id: i64) -> Relationship {
        Relationship {
            id: self.id,
            start_node_id,
            end_node_id,
            rel_type: self.rel_type.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// A path in traversal order.
///
/// `nodes` holds every node visited (one more than `relationships`, and may
/// revisit nodes); `relationships[i]` connects `nodes[i]` and `nodes[i + 1]`
/// in either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

/// Compact wire layout of a [`Path`]: distinct nodes, distinct unbound
/// relationships and the traversal index sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PathLayout<'a> {
    pub nodes: Vec<&'a Node>,
    pub relationships: Vec<UnboundRelationship>,
    pub indices: Vec<i64>,
}

impl Path {
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    /// A zero-length path holding a single node.
    pub fn single(node: Node) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn end(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Number of relationships traversed.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    /// Build the deduplicated wire layout.
    ///
    /// Nodes get 0-based indices and relationships 1-based indices, both in
    /// first-seen order. Each step emits the relationship index (negative
    /// when traversed against its direction) followed by the index of the
    /// node reached; the start node is implicit.
    pub fn layout(&self) -> Result<PathLayout<'_>, PackStreamError> {
        if self.nodes.is_empty() {
            return Err(PackStreamError::InvalidPath("path has no nodes".into()));
        }
        if self.nodes.len() != self.relationships.len() + 1 {
            return Err(PackStreamError::InvalidPath(format!(
                "{} nodes cannot be joined by {} relationships",
                self.nodes.len(),
                self.relationships.len()
            )));
        }

        let mut node_index: HashMap<i64, usize> = HashMap::new();
        let mut nodes = Vec::new();
        for node in &self.nodes {
            node_index.entry(node.id).or_insert_with(|| {
                nodes.push(node);
                nodes.len() - 1
            });
        }

        let mut rel_index: HashMap<i64, usize> = HashMap::new();
        let mut relationships = Vec::new();
        let mut indices = Vec::with_capacity(self.relationships.len() * 2);

        for (step, rel) in self.relationships.iter().enumerate() {
            let prev = &self.nodes[step];
            let next = &self.nodes[step + 1];

            let position = *rel_index.entry(rel.id).or_insert_with(|| {
                relationships.push(rel.unbind());
                relationships.len()
            }) as i64;

            let signed = if rel.start_node_id == prev.id && rel.end_node_id == next.id {
                position
            } else if rel.start_node_id == next.id && rel.end_node_id == prev.id {
                -position
            } else {
                return Err(PackStreamError::InvalidPath(format!(
                    "relationship {} does not connect nodes {} and {}",
                    rel.id, prev.id, next.id
                )));
            };

            indices.push(signed);
            indices.push(node_index[&next.id] as i64);
        }

        Ok(PathLayout {
            nodes,
            relationships,
            indices,
        })
    }

    /// Rebuild a path from its wire layout.
    pub fn from_layout(
        nodes: Vec<Node>,
        relationships: Vec<UnboundRelationship>,
        indices: &[i64],
    ) -> Result<Self, PackStreamError> {
        let start = nodes
            .first()
            .cloned()
            .ok_or_else(|| PackStreamError::InvalidPath("path has no nodes".into()))?;
        if indices.len() % 2 != 0 {
            return Err(PackStreamError::InvalidPath(format!(
                "index sequence has odd length {}",
                indices.len()
            )));
        }

        let mut sequence = Vec::with_capacity(indices.len() / 2 + 1);
        let mut traversed = Vec::with_capacity(indices.len() / 2);
        sequence.push(start);

        for pair in indices.chunks_exact(2) {
            let (rel_idx, node_idx) = (pair[0], pair[1]);
            let unbound = match rel_idx.unsigned_abs() as usize {
                0 => None,
                n => relationships.get(n - 1),
            }
            .ok_or_else(|| {
                PackStreamError::InvalidPath(format!("relationship index {rel_idx} out of range"))
            })?;
            let next = usize::try_from(node_idx)
                .ok()
                .and_then(|i| nodes.get(i))
                .ok_or_else(|| {
                    PackStreamError::InvalidPath(format!("node index {node_idx} out of range"))
                })?;

            let prev_id = sequence[sequence.len() - 1].id;
            let rel = if rel_idx > 0 {
                unbound.bind(prev_id, next.id)
            } else {
                unbound.bind(next.id, prev_id)
            };
            traversed.push(rel);
            sequence.push(next.clone());
        }

        Ok(Self {
            nodes: sequence,
            relationships: traversed,
        })
    }
}

/// A spatial point in two or three dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn new_2d(srid: i64, x: f64, y: f64) -> Self {
        Self { srid, x, y, z: None }
    }

    pub fn new_3d(srid: i64, x: f64, y: f64, z: f64) -> Self {
        Self {
            srid,
            x,
            y,
            z: Some(z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> Node {
        Node::new(id, vec!["N".into()], ValueMap::new())
    }

    fn rel(id: i64, start: i64, end: i64) -> Relationship {
        Relationship::new(id, start, end, "KNOWS", ValueMap::new())
    }

    #[test]
    fn test_single_node_layout() {
        let path = Path::single(node(7));
        let layout = path.layout().unwrap();
        assert_eq!(layout.nodes.len(), 1);
        assert!(layout.relationships.is_empty());
        assert!(layout.indices.is_empty());
    }

    #[test]
    fn test_layout_signs_follow_direction() {
        // (1)-[10]->(2)<-[11]-(3)
        let path = Path::new(
            vec![node(1), node(2), node(3)],
            vec![rel(10, 1, 2), rel(11, 3, 2)],
        );
        let layout = path.layout().unwrap();
        assert_eq!(layout.indices, vec![1, 1, -2, 2]);
    }

    #[test]
    fn test_layout_deduplicates_revisits() {
        // (1)-[10]->(2)-[11]->(1)-[10]->(2)
        let path = Path::new(
            vec![node(1), node(2), node(1), node(2)],
            vec![rel(10, 1, 2), rel(11, 2, 1), rel(10, 1, 2)],
        );
        let layout = path.layout().unwrap();
        assert_eq!(layout.nodes.len(), 2);
        assert_eq!(layout.relationships.len(), 2);
        assert_eq!(layout.indices, vec![1, 1, 2, 0, 1, 1]);
    }

    #[test]
    fn test_layout_rejects_disconnected_relationship() {
        let path = Path::new(vec![node(1), node(2)], vec![rel(10, 5, 6)]);
        assert!(matches!(
            path.layout(),
            Err(PackStreamError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_layout_rejects_length_mismatch() {
        let path = Path::new(vec![node(1)], vec![rel(10, 1, 1)]);
        assert!(path.layout().is_err());
    }

    #[test]
    fn test_from_layout_restores_endpoints() {
        let nodes = vec![node(1), node(2)];
        let rels = vec![rel(10, 0, 0).unbind()];
        let path = Path::from_layout(nodes, rels, &[-1, 1]).unwrap();
        assert_eq!(path.nodes.len(), 2);
        assert_eq!(path.relationships[0].start_node_id, 2);
        assert_eq!(path.relationships[0].end_node_id, 1);
    }

    #[test]
    fn test_from_layout_rejects_bad_indices() {
        let nodes = vec![node(1), node(2)];
        let rels = vec![rel(10, 1, 2).unbind()];
        assert!(Path::from_layout(nodes.clone(), rels.clone(), &[0, 1]).is_err());
        assert!(Path::from_layout(nodes.clone(), rels.clone(), &[2, 1]).is_err());
        assert!(Path::from_layout(nodes.clone(), rels.clone(), &[1, 5]).is_err());
        assert!(Path::from_layout(nodes, rels, &[1]).is_err());
        assert!(Path::from_layout(vec![], vec![], &[]).is_err());
    }

    #[test]
    fn test_self_loop() {
        let path = Path::new(vec![node(1), node(1)], vec![rel(10, 1, 1)]);
        let layout = path.layout().unwrap();
        assert_eq!(layout.indices, vec![1, 0]);
        let owned: Vec<Node> = layout.nodes.into_iter().cloned().collect();
        let back = Path::from_layout(owned, layout.relationships, &layout.indices).unwrap();
        assert_eq!(back, path);
    }
}
