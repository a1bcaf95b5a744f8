use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::network::EdgeId;
use crate::trains::TrainId;
use log::*;
use std::fmt;

mod export;

/// Relative tolerance when checking that two grid samples describe uniform
/// acceleration.
const INTERPOLATION_TOLERANCE: f64 = 1e-6;

/// Marks a trajectory sample that has not been written yet.
const UNSET: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionStatus {
    Unknown,
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
}

impl SolutionStatus {
    pub fn code(self) -> i32 {
        match self {
            SolutionStatus::Unknown => -1,
            SolutionStatus::Optimal => 0,
            SolutionStatus::Feasible => 1,
            SolutionStatus::Infeasible => 2,
            SolutionStatus::Timeout => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(SolutionStatus::Unknown),
            0 => Some(SolutionStatus::Optimal),
            1 => Some(SolutionStatus::Feasible),
            2 => Some(SolutionStatus::Infeasible),
            3 => Some(SolutionStatus::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolutionStatus::Unknown => write!(f, "Unknown"),
            SolutionStatus::Optimal => write!(f, "Optimal"),
            SolutionStatus::Feasible => write!(f, "Feasible (optimality unknown)"),
            SolutionStatus::Infeasible => write!(f, "Infeasible"),
            SolutionStatus::Timeout => write!(f, "Timeout (feasibility unknown)"),
        }
    }
}

/// Where a query time falls relative to the discretization grid.
enum Sample {
    Exact(usize),
    Between { x1: f64, v1: f64, a: f64, tau: f64 },
}

/// A VSS layout and a discretized train trajectory for one problem instance.
///
/// The solution owns a copy of its instance, so it can be exported and
/// re-imported without the optimizer session it came from.
#[derive(Debug, Clone)]
pub struct VssSolution {
    instance: Instance,
    dt: i64,
    status: SolutionStatus,
    obj: f64,
    mip_obj: f64,
    postprocessed: bool,
    vss_pos: Vec<Vec<f64>>,
    train_pos: Vec<Vec<f64>>,
    train_speed: Vec<Vec<f64>>,
}

impl VssSolution {
    pub fn new(instance: Instance, dt: i64) -> Result<Self> {
        if dt <= 0 {
            return Err(Error::Inconsistency(format!("dt = {} is not positive", dt)));
        }
        let mut train_pos = Vec::new();
        let mut train_speed = Vec::new();
        for (train, _) in instance.timetable().get_train_list().iter() {
            let (first, last) = instance.time_index_interval(train, dt, true)?;
            let samples = usize::try_from(last - first + 1)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::Inconsistency(format!(
                        "train {} has an empty time grid [{}, {}]",
                        train, first, last
                    ))
                })?;
            train_pos.push(vec![UNSET; samples]);
            train_speed.push(vec![UNSET; samples]);
        }
        Ok(VssSolution {
            vss_pos: vec![Vec::new(); instance.network().number_of_edges()],
            instance,
            dt,
            status: SolutionStatus::Unknown,
            obj: 0.0,
            mip_obj: 0.0,
            postprocessed: false,
            train_pos,
            train_speed,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn dt(&self) -> i64 {
        self.dt
    }

    pub fn status(&self) -> SolutionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SolutionStatus) {
        self.status = status;
    }

    pub fn obj(&self) -> f64 {
        self.obj
    }

    pub fn set_obj(&mut self, obj: f64) {
        self.obj = obj;
    }

    pub fn mip_obj(&self) -> f64 {
        self.mip_obj
    }

    pub fn set_mip_obj(&mut self, mip_obj: f64) {
        self.mip_obj = mip_obj;
    }

    pub fn postprocessed(&self) -> bool {
        self.postprocessed
    }

    pub fn set_postprocessed(&mut self, postprocessed: bool) {
        self.postprocessed = postprocessed;
    }

    pub fn reset_routes(&mut self) {
        self.instance.reset_routes();
    }

    pub fn add_empty_route(&mut self, train: &str) -> Result<()> {
        self.instance.add_empty_route(train)
    }

    pub fn push_back_edge_to_route(&mut self, train: &str, edge: EdgeId) -> Result<()> {
        self.instance.push_back_edge_to_route(train, edge)
    }

    /// First grid index of the train, after checking that it is scheduled at `time`.
    fn scheduled_at(&self, train: TrainId, time: f64) -> Result<i64> {
        self.instance.timetable().get_train_list().get_train(train)?;
        let (first, last) = self.instance.time_index_interval(train, self.dt, true)?;
        if !time.is_finite()
            || time < (first * self.dt) as f64
            || time > (last * self.dt) as f64
        {
            return Err(Error::OutOfRange(format!(
                "train {} is not scheduled at time {}",
                train, time
            )));
        }
        Ok(first)
    }

    fn sample(&self, train: TrainId, time: f64) -> Result<Sample> {
        let first = self.scheduled_at(train, time)?;
        let dt = self.dt as f64;
        let steps = time / dt;
        if steps.fract() == 0.0 {
            return Ok(Sample::Exact((steps as i64 - first) as usize));
        }

        let t1 = steps.floor() as i64 - first;
        let bracket = |samples: &[f64]| -> Option<(f64, f64)> {
            let i1 = usize::try_from(t1).ok()?;
            Some((*samples.get(i1)?, *samples.get(i1 + 1)?))
        };
        let ((x1, x2), (v1, v2)) = bracket(&self.train_pos[train])
            .zip(bracket(&self.train_speed[train]))
            .ok_or_else(|| {
                Error::OutOfRange(format!("time {} is off the grid of train {}", time, train))
            })?;
        if [x1, x2, v1, v2].iter().any(|x| *x < 0.0) {
            return Err(Error::Inconsistency(format!(
                "train {} has no samples around time {}",
                train, time
            )));
        }
        if !approx_equal(x2 - x1, 0.5 * dt * (v1 + v2)) {
            return Err(Error::Inconsistency(format!(
                "train {} cannot be interpolated at time {}: moved {} but speeds {} and {} imply {}",
                train,
                time,
                x2 - x1,
                v1,
                v2,
                0.5 * dt * (v1 + v2)
            )));
        }

        Ok(Sample::Between {
            x1,
            v1,
            a: (v2 - v1) / dt,
            tau: time - ((first + t1) * self.dt) as f64,
        })
    }

    /// Position of the train's front at `time`, which may lie between grid
    /// points if the neighbouring samples describe uniform acceleration.
    pub fn get_train_pos(&self, train: TrainId, time: f64) -> Result<f64> {
        Ok(match self.sample(train, time)? {
            Sample::Exact(idx) => self.train_pos[train][idx],
            Sample::Between { x1, v1, a, tau } => x1 + v1 * tau + 0.5 * a * tau * tau,
        })
    }

    pub fn get_train_speed(&self, train: TrainId, time: f64) -> Result<f64> {
        Ok(match self.sample(train, time)? {
            Sample::Exact(idx) => self.train_speed[train][idx],
            Sample::Between { v1, a, tau, .. } => v1 + a * tau,
        })
    }

    /// Grid index of an exact sample time.
    fn grid_index(&self, train: TrainId, time: i64) -> Result<usize> {
        let first = self.scheduled_at(train, time as f64)?;
        if time % self.dt != 0 {
            return Err(Error::Inconsistency(format!(
                "time {} is not a multiple of dt = {}",
                time, self.dt
            )));
        }
        Ok((time / self.dt - first) as usize)
    }

    pub fn add_train_pos(&mut self, train: TrainId, time: i64, pos: f64) -> Result<()> {
        if !(pos >= 0.0) {
            return Err(Error::Inconsistency(format!(
                "train position {} is negative",
                pos
            )));
        }
        let idx = self.grid_index(train, time)?;
        self.train_pos[train][idx] = pos;
        Ok(())
    }

    pub fn add_train_speed(&mut self, train: TrainId, time: i64, speed: f64) -> Result<()> {
        let max_speed = self
            .instance
            .timetable()
            .get_train_list()
            .get_train(train)?
            .max_speed;
        if !(speed >= 0.0) {
            return Err(Error::Inconsistency(format!(
                "train speed {} is negative",
                speed
            )));
        }
        if speed > max_speed {
            return Err(Error::Inconsistency(format!(
                "train speed {} is greater than the maximum speed {} of train {}",
                speed, max_speed, train
            )));
        }
        let idx = self.grid_index(train, time)?;
        self.train_speed[train][idx] = speed;
        Ok(())
    }

    /// Adds a VSS strictly inside the edge, and at the mirrored position on
    /// the reverse edge if `reverse_edge` is set.
    pub fn add_vss_pos(&mut self, edge: EdgeId, pos: f64, reverse_edge: bool) -> Result<()> {
        let e = self.instance.network().get_edge(edge)?;
        let (length, reverse) = (e.length, e.reverse);
        if !(pos > 0.0 && pos < length) {
            return Err(Error::Inconsistency(format!(
                "VSS position {} is not on edge {} of length {}",
                pos, edge, length
            )));
        }

        insert_sorted(&mut self.vss_pos[edge], pos);
        if reverse_edge {
            if let Some(r) = reverse {
                insert_sorted(&mut self.vss_pos[r], length - pos);
            }
        }
        trace!("Added VSS at {} on edge {}", pos, edge);
        Ok(())
    }

    /// Replaces the VSS list of an edge. Positions on the edge boundary are accepted.
    pub fn set_vss_pos(&mut self, edge: EdgeId, mut positions: Vec<f64>) -> Result<()> {
        let length = self.instance.network().get_edge(edge)?.length;
        if let Some(p) = positions.iter().find(|p| !(**p >= 0.0 && **p <= length)) {
            return Err(Error::Inconsistency(format!(
                "VSS position {} is not on edge {} of length {}",
                p, edge, length
            )));
        }
        positions.sort_by(|a, b| a.total_cmp(b));
        self.vss_pos[edge] = positions;
        Ok(())
    }

    pub fn reset_vss_pos(&mut self, edge: EdgeId) -> Result<()> {
        self.instance.network().get_edge(edge)?;
        self.vss_pos[edge].clear();
        Ok(())
    }

    pub fn get_vss_pos(&self, edge: EdgeId) -> Result<&[f64]> {
        self.vss_pos
            .get(edge)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::not_found("edge", edge))
    }

    /// Whether the recorded front positions of a train never move backwards.
    pub fn is_position_monotonic(&self, train: TrainId) -> Result<bool> {
        let samples = self
            .train_pos
            .get(train)
            .ok_or_else(|| Error::not_found("train", train))?;
        Ok(samples
            .windows(2)
            .all(|w| w[1] >= w[0] - INTERPOLATION_TOLERANCE))
    }

    pub fn check_consistency(&self) -> bool {
        if self.status == SolutionStatus::Unknown {
            debug!("Solution status is unknown");
            return false;
        }
        if self.obj < 0.0 || self.dt <= 0 {
            debug!("Negative objective or dt");
            return false;
        }
        if !self.instance.check_consistency(true) {
            return false;
        }
        if self.train_pos.iter().flatten().any(|p| !(*p >= 0.0)) {
            debug!("Solution has negative or unset train positions");
            return false;
        }
        let trains = self.instance.timetable().get_train_list();
        for (train, speeds) in self.train_speed.iter().enumerate() {
            let max_speed = match trains.get_train(train) {
                Ok(t) => t.max_speed,
                Err(_) => return false,
            };
            if speeds.iter().any(|v| !(*v >= 0.0 && *v <= max_speed)) {
                debug!("Train {} has speeds outside [0, {}]", train, max_speed);
                return false;
            }
        }
        for (edge, e) in self.instance.network().edges() {
            if self.vss_pos[edge].iter().any(|p| !(*p >= 0.0 && *p <= e.length)) {
                debug!("Edge {} has VSS outside the edge", edge);
                return false;
            }
        }
        true
    }

    /// Human-readable dump of the VSS layout and trajectories.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!(
            "Status {}, objective {} (optimizer {}), dt {}{}\n",
            self.status,
            self.obj,
            self.mip_obj,
            self.dt,
            if self.postprocessed { ", postprocessed" } else { "" }
        ));
        let network = self.instance.network();
        for (edge, positions) in self.vss_pos.iter().enumerate() {
            if positions.is_empty() {
                continue;
            }
            if let Ok((s, t)) = network.edge_names(edge) {
                summary.push_str(&format!("  VSS {:>8} -> {:<8} {:?}\n", s, t, positions));
            }
        }
        for (train_id, train) in self.instance.timetable().get_train_list().iter() {
            let first = self.instance.time_index_interval(train_id, self.dt, true).map_or(0, |i| i.0);
            summary.push_str(&format!("  Train {}\n", train.name));
            for (idx, (x, v)) in self.train_pos[train_id]
                .iter()
                .zip(self.train_speed[train_id].iter())
                .enumerate()
            {
                summary.push_str(&format!(
                    "    t={:<6} x={:<10.3} v={:.3}\n",
                    (first + idx as i64) * self.dt,
                    x,
                    v
                ));
            }
        }
        summary
    }
}

fn approx_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= INTERPOLATION_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn insert_sorted(positions: &mut Vec<f64>, pos: f64) {
    positions.push(pos);
    positions.sort_by(|a, b| a.total_cmp(b));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::instance::tests::small_instance;

    /// Accelerates at 0.3 m/s^2 for 50 s, then brakes at 0.3 m/s^2 until t = 100.
    pub fn kinematic_sample(t: f64) -> (f64, f64) {
        let a = 0.3;
        if t <= 50.0 {
            (0.5 * a * t * t, a * t)
        } else {
            let tau = t - 50.0;
            (375.0 + 15.0 * tau - 0.5 * a * tau * tau, 15.0 - a * tau)
        }
    }

    pub fn solved_solution() -> VssSolution {
        let mut sol = VssSolution::new(small_instance(true), 10).unwrap();
        for t in (0..=100).step_by(10) {
            let (x, v) = kinematic_sample(t as f64);
            sol.add_train_pos(0, t, x).unwrap();
            sol.add_train_speed(0, t, v).unwrap();
        }
        sol.set_status(SolutionStatus::Optimal);
        sol
    }

    #[test]
    fn samples_start_unset() {
        let sol = VssSolution::new(small_instance(true), 10).unwrap();
        assert_eq!(sol.get_train_pos(0, 30.0).unwrap(), -1.0);
        assert!(sol.get_vss_pos(0).unwrap().is_empty());
        assert!(matches!(
            VssSolution::new(small_instance(true), 0),
            Err(Error::Inconsistency(_))
        ));
    }

    #[test]
    fn reversed_schedule_is_rejected() {
        let network = crate::network::tests::small_network();
        let mut timetable = crate::timetable::Timetable::default();
        timetable
            .add_train(
                crate::timetable::tests::train("T"),
                crate::timetable::Schedule::new(100, 0.0, 0, 0, 0.0, 2),
                &network,
            )
            .unwrap();
        let instance = Instance::new(network, timetable, Default::default());
        assert!(matches!(
            VssSolution::new(instance, 10),
            Err(Error::Inconsistency(_))
        ));
    }

    #[test]
    fn non_finite_query_time_is_out_of_range() {
        let sol = solved_solution();
        for time in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                sol.get_train_pos(0, time),
                Err(Error::OutOfRange(_))
            ));
            assert!(matches!(
                sol.get_train_speed(0, time),
                Err(Error::OutOfRange(_))
            ));
        }
    }

    #[test]
    fn grid_points_return_stored_samples() {
        let sol = solved_solution();
        for t in (0..=100).step_by(10) {
            let (x, v) = kinematic_sample(t as f64);
            assert_eq!(sol.get_train_pos(0, t as f64).unwrap(), x);
            assert_eq!(sol.get_train_speed(0, t as f64).unwrap(), v);
        }
    }

    #[test]
    fn interpolates_uniform_acceleration() {
        let sol = solved_solution();
        for t in [25.0, 5.0, 55.0, 73.5, 99.0] {
            let (x, v) = kinematic_sample(t);
            assert!((sol.get_train_pos(0, t).unwrap() - x).abs() < 1e-6);
            assert!((sol.get_train_speed(0, t).unwrap() - v).abs() < 1e-6);
        }
    }

    #[test]
    fn midpoint_follows_taylor_expansion() {
        let mut sol = VssSolution::new(small_instance(true), 10).unwrap();
        let (x1, v1, v2) = (100.0, 4.0, 10.0);
        sol.add_train_pos(0, 20, x1).unwrap();
        sol.add_train_speed(0, 20, v1).unwrap();
        sol.add_train_pos(0, 30, x1 + 0.5 * (v1 + v2) * 10.0).unwrap();
        sol.add_train_speed(0, 30, v2).unwrap();
        let a = (v2 - v1) / 10.0;
        let tau = 5.0;
        assert_eq!(
            sol.get_train_pos(0, 25.0).unwrap(),
            x1 + v1 * tau + 0.5 * a * tau * tau
        );
        assert_eq!(sol.get_train_speed(0, 25.0).unwrap(), v1 + a * tau);
    }

    #[test]
    fn refuses_to_interpolate_inconsistent_samples() {
        let mut sol = solved_solution();
        sol.add_train_pos(0, 30, 200.0).unwrap();
        assert!(matches!(
            sol.get_train_pos(0, 25.0),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.get_train_speed(0, 22.0),
            Err(Error::Inconsistency(_))
        ));
        // Exact grid points are still answered.
        assert_eq!(sol.get_train_pos(0, 30.0).unwrap(), 200.0);
    }

    #[test]
    fn queries_outside_schedule_fail() {
        let sol = solved_solution();
        assert!(matches!(
            sol.get_train_pos(0, 101.0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            sol.get_train_speed(0, -5.0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            sol.get_train_pos(4, 10.0),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn samples_only_on_grid() {
        let mut sol = solved_solution();
        assert!(matches!(
            sol.add_train_pos(0, 15, 10.0),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.add_train_pos(0, 110, 10.0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            sol.add_train_pos(0, 10, -1.0),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.add_train_speed(0, 10, -0.5),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.add_train_speed(0, 10, 30.5),
            Err(Error::Inconsistency(_))
        ));
        assert_eq!(sol.get_train_pos(0, 10.0).unwrap(), kinematic_sample(10.0).0);
    }

    #[test]
    fn vss_placement_is_sorted_and_mirrored() {
        let mut sol = solved_solution();
        sol.add_vss_pos(1, 300.0, true).unwrap();
        sol.add_vss_pos(1, 100.0, false).unwrap();
        assert_eq!(sol.get_vss_pos(1).unwrap(), &[100.0, 300.0]);
        assert_eq!(sol.get_vss_pos(2).unwrap(), &[200.0]);

        assert!(matches!(
            sol.add_vss_pos(1, 0.0, true),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.add_vss_pos(1, 500.0, true),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            sol.add_vss_pos(9, 10.0, true),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(sol.get_vss_pos(1).unwrap().len(), 2);
    }

    #[test]
    fn add_then_reset_restores_empty_list() {
        let mut sol = solved_solution();
        sol.add_vss_pos(0, 250.0, false).unwrap();
        sol.reset_vss_pos(0).unwrap();
        assert!(sol.get_vss_pos(0).unwrap().is_empty());
    }

    #[test]
    fn bulk_setter_accepts_closed_interval() {
        let mut sol = solved_solution();
        sol.set_vss_pos(0, vec![500.0, 0.0, 200.0]).unwrap();
        assert_eq!(sol.get_vss_pos(0).unwrap(), &[0.0, 200.0, 500.0]);
        assert!(matches!(
            sol.set_vss_pos(0, vec![100.0, 501.0]),
            Err(Error::Inconsistency(_))
        ));
        assert_eq!(sol.get_vss_pos(0).unwrap().len(), 3);
    }

    #[test]
    fn consistency() {
        let mut sol = solved_solution();
        assert!(sol.check_consistency());
        assert!(sol.is_position_monotonic(0).unwrap());

        sol.set_status(SolutionStatus::Unknown);
        assert!(!sol.check_consistency());
        sol.set_status(SolutionStatus::Feasible);

        sol.set_obj(-1.0);
        assert!(!sol.check_consistency());
        sol.set_obj(0.0);

        // Only the achieved objective is checked, the optimizer's may be anything.
        sol.set_mip_obj(-3.0);
        assert!(sol.check_consistency());

        let unset = VssSolution::new(small_instance(true), 10).unwrap();
        assert!(!unset.check_consistency());
        assert!(!VssSolution::new(small_instance(false), 10)
            .map(|mut s| {
                s.set_status(SolutionStatus::Optimal);
                s
            })
            .unwrap()
            .check_consistency());
    }

    #[test]
    fn monotonicity_is_derived() {
        let mut sol = solved_solution();
        sol.add_train_pos(0, 50, 10.0).unwrap();
        assert!(!sol.is_position_monotonic(0).unwrap());
    }

    #[test]
    fn status_codes() {
        for status in [
            SolutionStatus::Unknown,
            SolutionStatus::Optimal,
            SolutionStatus::Feasible,
            SolutionStatus::Infeasible,
            SolutionStatus::Timeout,
        ] {
            assert_eq!(SolutionStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(SolutionStatus::from_code(7), None);
    }
}
