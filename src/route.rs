use crate::error::{create_dir, read_json, write_json, Error, Result};
use crate::network::{EdgeId, Network};
use crate::trains::TrainList;
use log::*;
use std::collections::BTreeMap;
use std::path::Path;

/// Edge sequence of one train. Every adjacent pair of edges is a legal
/// successor pair of the network after each mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    edges: Vec<EdgeId>,
}

impl Route {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push_back_edge(&mut self, edge: EdgeId, network: &Network) -> Result<()> {
        if !network.has_edge(edge) {
            return Err(Error::InvalidTopology(format!("edge {} does not exist", edge)));
        }
        if let Some(last) = self.edges.last() {
            if !network.is_valid_successor(*last, edge) {
                return Err(Error::InvalidTopology(format!(
                    "edge {} is not a valid successor of edge {}",
                    edge, last
                )));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn push_front_edge(&mut self, edge: EdgeId, network: &Network) -> Result<()> {
        if !network.has_edge(edge) {
            return Err(Error::InvalidTopology(format!("edge {} does not exist", edge)));
        }
        if let Some(first) = self.edges.first() {
            if !network.is_valid_successor(edge, *first) {
                return Err(Error::InvalidTopology(format!(
                    "edge {} is not a valid predecessor of edge {}",
                    edge, first
                )));
            }
        }
        self.edges.insert(0, edge);
        Ok(())
    }

    pub fn push_back_edge_by_names(
        &mut self,
        source: &str,
        target: &str,
        network: &Network,
    ) -> Result<()> {
        let edge = resolve_edge(source, target, network)?;
        self.push_back_edge(edge, network)
    }

    pub fn push_front_edge_by_names(
        &mut self,
        source: &str,
        target: &str,
        network: &Network,
    ) -> Result<()> {
        let edge = resolve_edge(source, target, network)?;
        self.push_front_edge(edge, network)
    }

    pub fn remove_first_edge(&mut self) -> Result<EdgeId> {
        if self.edges.is_empty() {
            return Err(Error::OutOfRange("route is empty".to_string()));
        }
        Ok(self.edges.remove(0))
    }

    pub fn remove_last_edge(&mut self) -> Result<EdgeId> {
        self.edges
            .pop()
            .ok_or_else(|| Error::OutOfRange("route is empty".to_string()))
    }

    pub fn get_edge(&self, index: usize) -> Result<EdgeId> {
        self.edges.get(index).copied().ok_or_else(|| {
            Error::OutOfRange(format!(
                "index {} on route with {} edges",
                index,
                self.edges.len()
            ))
        })
    }

    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn length(&self, network: &Network) -> Result<f64> {
        self.edges
            .iter()
            .map(|e| network.get_edge(*e).map(|e| e.length))
            .sum()
    }

    pub fn check_consistency(&self, network: &Network) -> bool {
        self.edges.iter().all(|e| network.has_edge(*e))
            && self
                .edges
                .windows(2)
                .all(|w| network.is_valid_successor(w[0], w[1]))
    }
}

fn resolve_edge(source: &str, target: &str, network: &Network) -> Result<EdgeId> {
    network
        .get_edge_index_by_names(source, target)
        .map_err(|_| Error::InvalidTopology(format!("edge {} -> {} does not exist", source, target)))
}

/// Routes keyed by train name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMap {
    routes: BTreeMap<String, Route>,
}

type RoutesFile = BTreeMap<String, Vec<(String, String)>>;

impl RouteMap {
    pub fn add_empty_route(&mut self, train: &str, trains: &TrainList) -> Result<()> {
        if !trains.has_train_named(train) {
            return Err(Error::not_found("train", train));
        }
        if self.routes.contains_key(train) {
            return Err(Error::Inconsistency(format!(
                "train {} already has a route",
                train
            )));
        }
        self.routes.insert(train.to_string(), Route::new());
        Ok(())
    }

    pub fn push_back_edge(&mut self, train: &str, edge: EdgeId, network: &Network) -> Result<()> {
        self.get_route_mut(train)?.push_back_edge(edge, network)
    }

    pub fn push_front_edge(&mut self, train: &str, edge: EdgeId, network: &Network) -> Result<()> {
        self.get_route_mut(train)?.push_front_edge(edge, network)
    }

    pub fn has_route(&self, train: &str) -> bool {
        self.routes.contains_key(train)
    }

    pub fn get_route(&self, train: &str) -> Result<&Route> {
        self.routes
            .get(train)
            .ok_or_else(|| Error::not_found("route", train))
    }

    fn get_route_mut(&mut self, train: &str) -> Result<&mut Route> {
        self.routes
            .get_mut(train)
            .ok_or_else(|| Error::not_found("route", train))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Route)> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn reset(&mut self) {
        self.routes.clear();
    }

    pub fn check_consistency(&self, network: &Network) -> bool {
        self.routes.iter().all(|(train, route)| {
            let ok = route.check_consistency(network);
            if !ok {
                debug!("Route of train {} is not a legal edge sequence", train);
            }
            ok
        })
    }

    /// Writes `routes.json` into `dir`, referring to edges by vertex names.
    pub fn export_routes(&self, dir: &Path, network: &Network) -> Result<()> {
        create_dir(dir)?;
        let mut file = RoutesFile::new();
        for (train, route) in self.routes.iter() {
            let edges = route
                .edges()
                .iter()
                .map(|e| {
                    network
                        .edge_names(*e)
                        .map(|(s, t)| (s.to_string(), t.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            file.insert(train.clone(), edges);
        }
        write_json(&dir.join("routes.json"), &file)
    }

    pub fn import_routes(dir: &Path, network: &Network) -> Result<RouteMap> {
        let file: RoutesFile = read_json(&dir.join("routes.json"))?;
        let mut routes = RouteMap::default();
        for (train, edges) in file {
            let mut route = Route::new();
            for (source, target) in edges.iter() {
                route.push_back_edge_by_names(source, target, network)?;
            }
            trace!("Imported route of train {} with {} edges", train, route.len());
            routes.routes.insert(train, route);
        }
        Ok(routes)
    }
}
