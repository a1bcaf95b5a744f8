use crate::error::{Error, Result};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::convert::TryFrom;

pub type VertexId = usize;
pub type EdgeId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: VertexId,
    pub target: VertexId,
    pub length: f64,
    pub breakable: bool,
    /// Number of VSS boundaries the edge may host. Zero for unbreakable edges.
    pub max_vss: usize,
    /// The edge going the opposite way between the same two vertices, if any.
    #[serde(skip)]
    pub reverse: Option<EdgeId>,
}

/// Directed track graph. Built once, then only read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "NetworkFile", into = "NetworkFile")]
pub struct Network {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    successors: Vec<BTreeSet<EdgeId>>,
    vertex_names: HashMap<String, VertexId>,
    edge_lookup: HashMap<(VertexId, VertexId), EdgeId>,
}

#[derive(Serialize, Deserialize)]
struct NetworkFile {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    successors: Vec<Vec<EdgeId>>,
}

impl TryFrom<NetworkFile> for Network {
    type Error = Error;

    fn try_from(file: NetworkFile) -> Result<Self> {
        let mut network = Network::default();
        for vertex in file.vertices {
            network.add_vertex(&vertex.name)?;
        }
        for edge in file.edges {
            network.add_edge(
                edge.source,
                edge.target,
                edge.length,
                edge.breakable,
                edge.max_vss,
            )?;
        }
        for (edge, nexts) in file.successors.into_iter().enumerate() {
            for next in nexts {
                network.add_successor(edge, next)?;
            }
        }
        Ok(network)
    }
}

impl From<Network> for NetworkFile {
    fn from(network: Network) -> Self {
        NetworkFile {
            vertices: network.vertices,
            edges: network.edges,
            successors: network
                .successors
                .into_iter()
                .map(|s| s.into_iter().collect())
                .collect(),
        }
    }
}

impl Network {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_vertex(&mut self, name: &str) -> Result<VertexId> {
        if self.vertex_names.contains_key(name) {
            return Err(Error::InvalidTopology(format!(
                "vertex {} already exists",
                name
            )));
        }
        let id = self.vertices.len();
        self.vertices.push(Vertex {
            name: name.to_string(),
        });
        self.vertex_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Adds a directed edge. If the opposite edge already exists, both are
    /// linked as each other's reverse.
    pub fn add_edge(
        &mut self,
        source: VertexId,
        target: VertexId,
        length: f64,
        breakable: bool,
        max_vss: usize,
    ) -> Result<EdgeId> {
        if !self.has_vertex(source) {
            return Err(Error::not_found("vertex", source));
        }
        if !self.has_vertex(target) {
            return Err(Error::not_found("vertex", target));
        }
        if source == target {
            return Err(Error::InvalidTopology(format!(
                "edge from {} to itself",
                self.vertices[source].name
            )));
        }
        if self.edge_lookup.contains_key(&(source, target)) {
            return Err(Error::InvalidTopology(format!(
                "edge {} -> {} already exists",
                self.vertices[source].name, self.vertices[target].name
            )));
        }
        if !(length.is_finite() && length > 0.0) {
            return Err(Error::Inconsistency(format!(
                "edge length {} is not positive",
                length
            )));
        }
        if !breakable && max_vss > 0 {
            return Err(Error::Inconsistency(format!(
                "unbreakable edge {} -> {} cannot host {} VSS",
                self.vertices[source].name, self.vertices[target].name, max_vss
            )));
        }

        let reverse = self.edge_lookup.get(&(target, source)).copied();
        if let Some(r) = reverse {
            if self.edges[r].length != length {
                return Err(Error::Inconsistency(format!(
                    "edge {} -> {} has length {} but its reverse has length {}",
                    self.vertices[source].name,
                    self.vertices[target].name,
                    length,
                    self.edges[r].length
                )));
            }
        }

        let id = self.edges.len();
        self.edges.push(Edge {
            source,
            target,
            length,
            breakable,
            max_vss,
            reverse,
        });
        self.successors.push(BTreeSet::new());
        self.edge_lookup.insert((source, target), id);
        if let Some(r) = reverse {
            self.edges[r].reverse = Some(id);
        }
        trace!(
            "Added edge {} {} -> {} (reverse {:?})",
            id,
            self.vertices[source].name,
            self.vertices[target].name,
            reverse
        );
        Ok(id)
    }

    pub fn add_edge_by_names(
        &mut self,
        source: &str,
        target: &str,
        length: f64,
        breakable: bool,
        max_vss: usize,
    ) -> Result<EdgeId> {
        let source = self.get_vertex_index(source)?;
        let target = self.get_vertex_index(target)?;
        self.add_edge(source, target, length, breakable, max_vss)
    }

    /// Allows `next` to be traversed directly after `edge`.
    pub fn add_successor(&mut self, edge: EdgeId, next: EdgeId) -> Result<()> {
        let e = self.get_edge(edge)?;
        let n = self.get_edge(next)?;
        if e.target != n.source {
            return Err(Error::InvalidTopology(format!(
                "edge {} does not end where edge {} starts",
                edge, next
            )));
        }
        if e.reverse == Some(next) {
            return Err(Error::InvalidTopology(format!(
                "edge {} cannot continue onto its own reverse {}",
                edge, next
            )));
        }
        self.successors[edge].insert(next);
        Ok(())
    }

    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn number_of_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn has_vertex(&self, vertex: VertexId) -> bool {
        vertex < self.vertices.len()
    }

    pub fn get_vertex(&self, vertex: VertexId) -> Result<&Vertex> {
        self.vertices
            .get(vertex)
            .ok_or_else(|| Error::not_found("vertex", vertex))
    }

    pub fn get_vertex_index(&self, name: &str) -> Result<VertexId> {
        self.vertex_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("vertex", name))
    }

    pub fn has_edge(&self, edge: EdgeId) -> bool {
        edge < self.edges.len()
    }

    pub fn has_edge_between(&self, source: VertexId, target: VertexId) -> bool {
        self.edge_lookup.contains_key(&(source, target))
    }

    pub fn get_edge(&self, edge: EdgeId) -> Result<&Edge> {
        self.edges
            .get(edge)
            .ok_or_else(|| Error::not_found("edge", edge))
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate()
    }

    pub fn get_edge_index(&self, source: VertexId, target: VertexId) -> Result<EdgeId> {
        self.edge_lookup
            .get(&(source, target))
            .copied()
            .ok_or_else(|| Error::not_found("edge", format!("{} -> {}", source, target)))
    }

    pub fn get_edge_index_by_names(&self, source: &str, target: &str) -> Result<EdgeId> {
        let s = self.get_vertex_index(source)?;
        let t = self.get_vertex_index(target)?;
        self.edge_lookup
            .get(&(s, t))
            .copied()
            .ok_or_else(|| Error::not_found("edge", format!("{} -> {}", source, target)))
    }

    /// Vertex names of an edge's endpoints.
    pub fn edge_names(&self, edge: EdgeId) -> Result<(&str, &str)> {
        let e = self.get_edge(edge)?;
        Ok((
            self.vertices[e.source].name.as_str(),
            self.vertices[e.target].name.as_str(),
        ))
    }

    /// The only legality gate for traversing `edge` and then `next`.
    pub fn is_valid_successor(&self, edge: EdgeId, next: EdgeId) -> bool {
        match (self.edges.get(edge), self.edges.get(next)) {
            (Some(e), Some(n)) => e.target == n.source && self.successors[edge].contains(&next),
            _ => false,
        }
    }

    pub fn get_successors(&self, edge: EdgeId) -> Result<&BTreeSet<EdgeId>> {
        self.successors
            .get(edge)
            .ok_or_else(|| Error::not_found("edge", edge))
    }

    pub fn get_reverse_edge_index(&self, edge: EdgeId) -> Result<Option<EdgeId>> {
        Ok(self.get_edge(edge)?.reverse)
    }

    pub fn max_vss_on_edge(&self, edge: EdgeId) -> Result<usize> {
        let e = self.get_edge(edge)?;
        Ok(if e.breakable { e.max_vss } else { 0 })
    }

    pub fn breakable_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.breakable)
            .map(|(i, _)| i)
    }

    pub fn out_edges(&self, vertex: VertexId) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.source == vertex)
            .map(|(i, _)| i)
    }

    /// All vertices reachable from `start` along directed edges, `start` included.
    pub fn reachable_from(&self, start: VertexId) -> HashSet<VertexId> {
        let mut visited = HashSet::new();
        if !self.has_vertex(start) {
            return visited;
        }
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back(start);
        while let Some(v) = queue.pop_front() {
            for e in self.out_edges(v) {
                let target = self.edges[e].target;
                if visited.insert(target) {
                    queue.push_back(target);
                }
            }
        }
        visited
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two stations A and C joined through B, double track between B and C.
    pub fn small_network() -> Network {
        let mut n = Network::new();
        let a = n.add_vertex("A").unwrap();
        let b = n.add_vertex("B").unwrap();
        let c = n.add_vertex("C").unwrap();
        let ab = n.add_edge(a, b, 500.0, true, 1).unwrap();
        let bc = n.add_edge(b, c, 500.0, true, 2).unwrap();
        let cb = n.add_edge(c, b, 500.0, true, 2).unwrap();
        let ba = n.add_edge(b, a, 500.0, true, 1).unwrap();
        n.add_successor(ab, bc).unwrap();
        n.add_successor(cb, ba).unwrap();
        n
    }

    #[test]
    fn reverse_edges_are_linked_both_ways() {
        let n = small_network();
        assert_eq!(n.get_reverse_edge_index(0).unwrap(), Some(3));
        assert_eq!(n.get_reverse_edge_index(3).unwrap(), Some(0));
        assert_eq!(n.get_reverse_edge_index(1).unwrap(), Some(2));
        assert!(matches!(
            n.get_reverse_edge_index(17),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn successor_relation() {
        let n = small_network();
        assert!(n.is_valid_successor(0, 1));
        assert!(!n.is_valid_successor(1, 0));
        assert!(!n.is_valid_successor(0, 2));
        assert!(!n.is_valid_successor(0, 99));
    }

    #[test]
    fn successor_must_connect() {
        let mut n = small_network();
        assert!(matches!(
            n.add_successor(0, 2),
            Err(Error::InvalidTopology(_))
        ));
        // B->A continuing onto A->B is a reversal
        assert!(matches!(
            n.add_successor(3, 0),
            Err(Error::InvalidTopology(_))
        ));
    }

    #[test]
    fn rejects_bad_edges() {
        let mut n = small_network();
        assert!(matches!(
            n.add_edge(0, 1, 10.0, false, 0),
            Err(Error::InvalidTopology(_))
        ));
        assert!(matches!(
            n.add_edge(0, 0, 10.0, false, 0),
            Err(Error::InvalidTopology(_))
        ));
        let d = n.add_vertex("D").unwrap();
        assert!(matches!(
            n.add_edge(2, d, -1.0, false, 0),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            n.add_edge(2, d, 10.0, false, 3),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            n.add_edge(2, 42, 10.0, false, 0),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(n.number_of_edges(), 4);
    }

    #[test]
    fn name_lookups() {
        let n = small_network();
        assert_eq!(n.get_edge_index_by_names("B", "C").unwrap(), 1);
        assert_eq!(n.edge_names(2).unwrap(), ("C", "B"));
        assert!(n.has_edge_between(0, 1));
        assert!(!n.has_edge_between(0, 2));
        assert!(matches!(
            n.get_edge_index_by_names("A", "C"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            n.get_vertex_index("X"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn reachability() {
        let mut n = small_network();
        let d = n.add_vertex("D").unwrap();
        let reach = n.reachable_from(0);
        assert!(reach.contains(&2));
        assert!(!reach.contains(&d));
    }

    #[test]
    fn json_restores_reverse_links_and_successors() {
        let n = small_network();
        let json = serde_json::to_string(&n).unwrap();
        let m: Network = serde_json::from_str(&json).unwrap();
        assert_eq!(m.number_of_edges(), 4);
        assert_eq!(m.get_reverse_edge_index(1).unwrap(), Some(2));
        assert!(m.is_valid_successor(2, 3));
        assert_eq!(m.max_vss_on_edge(1).unwrap(), 2);
    }
}
