use super::{SolutionStatus, VssSolution};
use crate::error::{create_dir, read_json, write_json, Error, Result};
use crate::instance::Instance;
use crate::route::RouteMap;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct SolutionData {
    dt: i64,
    status: i32,
    obj: f64,
    mip_obj: f64,
    postprocessed: bool,
}

type VssFile = BTreeMap<String, Vec<f64>>;
type TrajectoryFile = BTreeMap<String, BTreeMap<i64, f64>>;

fn edge_key(source: &str, target: &str) -> String {
    format!("('{}', '{}')", source, target)
}

fn parse_edge_key(key: &str) -> Option<(&str, &str)> {
    key.trim()
        .strip_prefix("('")?
        .strip_suffix("')")?
        .split_once("', '")
}

impl VssSolution {
    /// Writes the solution into `dir`:
    ///  - `instance/` with the full instance, or only `instance/routes/`
    ///    when `export_instance` is false,
    ///  - `solution/data.json` with dt, status and objectives,
    ///  - `solution/vss_pos.json` keyed by edge vertex names,
    ///  - `solution/train_pos.json` and `solution/train_speed.json` keyed by
    ///    train name and absolute time.
    ///
    /// Nothing is written if the solution is not consistent.
    pub fn export_solution(&self, dir: &Path, export_instance: bool) -> Result<()> {
        if !self.check_consistency() {
            return Err(Error::Inconsistency(
                "cannot export inconsistent solution".to_string(),
            ));
        }

        let solution_dir = dir.join("solution");
        create_dir(&solution_dir)?;

        let network = self.instance.network();
        if export_instance {
            self.instance.export_instance(&dir.join("instance"))?;
        } else {
            self.instance
                .routes()
                .export_routes(&dir.join("instance").join("routes"), network)?;
        }

        write_json(
            &solution_dir.join("data.json"),
            &SolutionData {
                dt: self.dt,
                status: self.status.code(),
                obj: self.obj,
                mip_obj: self.mip_obj,
                postprocessed: self.postprocessed,
            },
        )?;

        let mut vss = VssFile::new();
        for (edge, positions) in self.vss_pos.iter().enumerate() {
            let (source, target) = network.edge_names(edge)?;
            vss.insert(edge_key(source, target), positions.clone());
        }
        write_json(&solution_dir.join("vss_pos.json"), &vss)?;

        let mut positions = TrajectoryFile::new();
        let mut speeds = TrajectoryFile::new();
        for (train_id, train) in self.instance.timetable().get_train_list().iter() {
            let (first, _) = self.instance.time_index_interval(train_id, self.dt, true)?;
            let times = (0..).map(|idx: i64| (first + idx) * self.dt);
            positions.insert(
                train.name.clone(),
                times.clone().zip(self.train_pos[train_id].iter().copied()).collect(),
            );
            speeds.insert(
                train.name.clone(),
                times.zip(self.train_speed[train_id].iter().copied()).collect(),
            );
        }
        write_json(&solution_dir.join("train_pos.json"), &positions)?;
        write_json(&solution_dir.join("train_speed.json"), &speeds)?;

        info!("Exported solution to {}", dir.display());
        Ok(())
    }

    /// Reads a solution written by `export_solution`. If `instance` is given,
    /// only the routes are read from `dir` and attached to it.
    pub fn import_solution(dir: &Path, instance: Option<Instance>) -> Result<VssSolution> {
        if !dir.exists() {
            return Err(Error::ImportExport(format!(
                "{} does not exist",
                dir.display()
            )));
        }
        if !dir.is_dir() {
            return Err(Error::ImportExport(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let instance = match instance {
            Some(mut instance) => {
                let routes =
                    RouteMap::import_routes(&dir.join("instance").join("routes"), instance.network())?;
                instance.set_routes(routes);
                instance
            }
            None => Instance::import_instance(&dir.join("instance"))?,
        };
        if !instance.check_consistency(true) {
            return Err(Error::Inconsistency(
                "imported instance is not consistent".to_string(),
            ));
        }

        let solution_dir = dir.join("solution");
        let data: SolutionData = read_json(&solution_dir.join("data.json"))?;
        let status = SolutionStatus::from_code(data.status).ok_or_else(|| {
            Error::ImportExport(format!("unknown solution status code {}", data.status))
        })?;

        let mut solution = VssSolution::new(instance, data.dt)?;
        solution.status = status;
        solution.obj = data.obj;
        solution.mip_obj = data.mip_obj;
        solution.postprocessed = data.postprocessed;

        let vss: VssFile = read_json(&solution_dir.join("vss_pos.json"))?;
        for (key, positions) in vss {
            let (source, target) = parse_edge_key(&key)
                .ok_or_else(|| Error::ImportExport(format!("malformed edge key {}", key)))?;
            let edge = solution
                .instance
                .network()
                .get_edge_index_by_names(source, target)?;
            solution.set_vss_pos(edge, positions)?;
        }

        let positions: TrajectoryFile = read_json(&solution_dir.join("train_pos.json"))?;
        for (name, samples) in positions {
            let train = solution.instance.timetable().get_train_list().get_train_index(&name)?;
            for (time, pos) in samples {
                solution.add_train_pos(train, time, pos)?;
            }
        }

        let speeds: TrajectoryFile = read_json(&solution_dir.join("train_speed.json"))?;
        for (name, samples) in speeds {
            let train = solution.instance.timetable().get_train_list().get_train_index(&name)?;
            for (time, speed) in samples {
                solution.add_train_speed(train, time, speed)?;
            }
        }

        if !solution.check_consistency() {
            return Err(Error::Inconsistency(
                "imported solution is not consistent".to_string(),
            ));
        }
        debug!("Imported solution:\n{}", solution.summary());
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::small_instance;
    use crate::solution::tests::solved_solution;

    #[test]
    fn edge_keys() {
        assert_eq!(edge_key("A", "B"), "('A', 'B')");
        assert_eq!(parse_edge_key("('A', 'B')"), Some(("A", "B")));
        assert_eq!(parse_edge_key("A-B"), None);
    }

    #[test]
    fn export_and_import_with_instance() {
        let mut sol = solved_solution();
        sol.add_vss_pos(1, 120.0, true).unwrap();
        sol.set_obj(1.0);
        sol.set_postprocessed(true);

        let dir = tempfile::tempdir().unwrap();
        sol.export_solution(dir.path(), true).unwrap();
        assert!(dir.path().join("instance").join("network.json").is_file());

        let imported = VssSolution::import_solution(dir.path(), None).unwrap();
        assert_eq!(imported.status(), SolutionStatus::Optimal);
        assert_eq!(imported.obj(), 1.0);
        assert!(imported.postprocessed());
        assert_eq!(imported.get_vss_pos(1).unwrap(), &[120.0]);
        assert_eq!(imported.get_vss_pos(2).unwrap(), &[380.0]);
        let (a, b) = (
            imported.get_train_pos(0, 25.0).unwrap(),
            sol.get_train_pos(0, 25.0).unwrap(),
        );
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn export_routes_only() {
        let sol = solved_solution();
        let dir = tempfile::tempdir().unwrap();
        sol.export_solution(dir.path(), false).unwrap();
        assert!(!dir.path().join("instance").join("network.json").exists());

        let imported = VssSolution::import_solution(dir.path(), Some(small_instance(false))).unwrap();
        assert_eq!(imported.instance().routes(), sol.instance().routes());
        assert!(VssSolution::import_solution(dir.path(), None).is_err());
    }

    #[test]
    fn unknown_status_is_not_exported() {
        let mut sol = solved_solution();
        sol.set_status(SolutionStatus::Unknown);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        assert!(matches!(
            sol.export_solution(&target, true),
            Err(Error::Inconsistency(_))
        ));
        assert!(!target.exists());
    }

    #[test]
    fn import_rejects_missing_or_non_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = VssSolution::import_solution(&dir.path().join("missing"), None).unwrap_err();
        assert!(matches!(err, Error::ImportExport(_)));

        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let err = VssSolution::import_solution(&file, None).unwrap_err();
        assert!(matches!(err, Error::ImportExport(_)));
    }

    #[test]
    fn import_rejects_edited_solution() {
        let sol = solved_solution();
        let dir = tempfile::tempdir().unwrap();
        sol.export_solution(dir.path(), true).unwrap();

        let speed_file = dir.path().join("solution").join("train_speed.json");
        let edited = std::fs::read_to_string(&speed_file)
            .unwrap()
            .replacen("\"0\": 0.0", "\"0\": 99.0", 1);
        std::fs::write(&speed_file, edited).unwrap();

        assert!(matches!(
            VssSolution::import_solution(dir.path(), None),
            Err(Error::Inconsistency(_))
        ));
    }
}
