use crate::error::{create_dir, read_json, write_json, Error, Result};
use crate::network::{EdgeId, Network};
use crate::route::RouteMap;
use crate::timetable::Timetable;
use crate::trains::TrainId;
use log::*;
use std::path::Path;

/// A VSS generation problem: the network, the timetable to run on it, and
/// (possibly empty) routes for the trains.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    network: Network,
    timetable: Timetable,
    routes: RouteMap,
}

impl Instance {
    pub fn new(network: Network, timetable: Timetable, routes: RouteMap) -> Self {
        Instance {
            network,
            timetable,
            routes,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn timetable(&self) -> &Timetable {
        &self.timetable
    }

    pub fn routes(&self) -> &RouteMap {
        &self.routes
    }

    pub fn set_routes(&mut self, routes: RouteMap) {
        self.routes = routes;
    }

    pub fn reset_routes(&mut self) {
        self.routes.reset();
    }

    pub fn add_empty_route(&mut self, train: &str) -> Result<()> {
        self.routes
            .add_empty_route(train, self.timetable.get_train_list())
    }

    pub fn push_back_edge_to_route(&mut self, train: &str, edge: EdgeId) -> Result<()> {
        self.routes.push_back_edge(train, edge, &self.network)
    }

    pub fn time_index_interval(
        &self,
        train: TrainId,
        dt: i64,
        tn_inclusive: bool,
    ) -> Result<(i64, i64)> {
        self.timetable.time_index_interval(train, dt, tn_inclusive)
    }

    pub fn check_consistency(&self, every_train_must_have_route: bool) -> bool {
        if !self.timetable.check_consistency(&self.network) {
            return false;
        }
        if !self.routes.check_consistency(&self.network) {
            return false;
        }

        let trains = self.timetable.get_train_list();
        for (name, route) in self.routes.iter() {
            let train = match trains.get_train_index(name) {
                Ok(train) => train,
                Err(_) => {
                    debug!("Route for unknown train {}", name);
                    return false;
                }
            };
            let (first, last) = match (route.edges().first(), route.edges().last()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => continue,
            };
            let schedule = match self.timetable.get_schedule(train) {
                Ok(s) => s,
                Err(_) => return false,
            };
            let starts = self.network.get_edge(first).map_or(false, |e| e.source == schedule.entry);
            let ends = self.network.get_edge(last).map_or(false, |e| e.target == schedule.exit);
            if !(starts && ends) {
                debug!("Route of train {} does not run from entry to exit", name);
                return false;
            }
        }

        if every_train_must_have_route {
            if let Some((_, train)) = trains.iter().find(|(_, t)| !self.routes.has_route(&t.name)) {
                debug!("Train {} has no route", train.name);
                return false;
            }
        }

        true
    }

    /// Writes `network.json`, `timetable.json` and `routes/routes.json` into `dir`.
    pub fn export_instance(&self, dir: &Path) -> Result<()> {
        create_dir(dir)?;
        write_json(&dir.join("network.json"), &self.network)?;
        write_json(&dir.join("timetable.json"), &self.timetable)?;
        self.routes.export_routes(&dir.join("routes"), &self.network)?;
        info!("Exported instance to {}", dir.display());
        Ok(())
    }

    pub fn import_instance(dir: &Path) -> Result<Instance> {
        if !dir.is_dir() {
            return Err(Error::ImportExport(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let network: Network = read_json(&dir.join("network.json"))?;
        let timetable: Timetable = read_json(&dir.join("timetable.json"))?;
        let routes = RouteMap::import_routes(&dir.join("routes"), &network)?;
        trace!(
            "Imported instance with {} edges, {} trains and {} routes",
            network.number_of_edges(),
            timetable.get_train_list().len(),
            routes.len()
        );
        Ok(Instance::new(network, timetable, routes))
    }
}
