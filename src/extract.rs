use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::network::{EdgeId, Network};
use crate::solution::{SolutionStatus, VssSolution};
use crate::trains::TrainId;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use velcro::iter;

/// Termination state reported by an optimizer back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawStatus {
    Optimal,
    Infeasible,
    TimeLimit,
    Other(i32),
}

/// Resolved decision for one potential VSS slot on an edge. `position` is
/// only meaningful when `used` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotUsage {
    pub used: bool,
    pub position: f64,
}

/// Decides whether a VSS slot is in use, from however the back end encodes it.
pub trait SlotUsageResolver {
    fn is_used(&self, edge: EdgeId, slot: usize) -> bool;
}

/// The finished result of one optimizer run. Time arguments are grid
/// indices, i.e. absolute time divided by `dt`.
pub trait OptimizerSession {
    fn status(&self) -> RawStatus;
    fn solution_count(&self) -> usize;
    fn objective(&self) -> Result<f64>;
    fn slot_usage(&self, edge: EdgeId, slot: usize) -> Result<SlotUsage>;
    /// Whether the front or the rear of the train is at the boundary that
    /// `slot` creates on `edge`.
    fn boundary_used(&self, train: TrainId, t: i64, edge: EdgeId, slot: usize) -> Result<bool>;
    fn train_on_edge(&self, train: TrainId, t: i64, edge: EdgeId) -> Result<bool>;
    fn train_pos(&self, train: TrainId, t: i64) -> Result<f64>;
    fn train_speed(&self, train: TrainId, t: i64) -> Result<f64>;
}

#[derive(Clone, Copy, Debug)]
pub struct ExtractionSettings {
    /// Drop VSS slots that no train ever uses as a boundary.
    pub postprocess: bool,
    /// Routes were inputs to the optimizer. Otherwise they are rebuilt from
    /// the edge occupation of each train.
    pub fixed_routes: bool,
}

pub fn map_status(status: RawStatus, solution_count: usize) -> Result<SolutionStatus> {
    match status {
        RawStatus::Optimal => Ok(SolutionStatus::Optimal),
        RawStatus::Infeasible => Ok(SolutionStatus::Infeasible),
        RawStatus::TimeLimit if solution_count >= 1 => Ok(SolutionStatus::Feasible),
        RawStatus::TimeLimit => Ok(SolutionStatus::Timeout),
        RawStatus::Other(code) => Err(Error::Inconsistency(format!(
            "optimizer status code {} unknown",
            code
        ))),
    }
}

/// Turns an optimizer session into a solution for `instance`.
///
/// Used VSS slots are placed on both directions of an edge pair, and the
/// number of placed slots becomes the objective. Train samples are read for
/// every grid point up to one step past each train's moving interval.
pub fn extract_solution<S: OptimizerSession>(
    session: &S,
    instance: &Instance,
    dt: i64,
    settings: ExtractionSettings,
) -> Result<VssSolution> {
    let _h = hprof::enter("extract solution");
    let mut solution = VssSolution::new(instance.clone(), dt)?;

    let status = map_status(session.status(), session.solution_count())?;
    info!("Solution status: {}", status);
    solution.set_status(status);

    if session.solution_count() == 0 {
        return Ok(solution);
    }

    let mip_obj = session.objective()?.round();
    debug!("Optimizer objective: {}", mip_obj);
    solution.set_mip_obj(mip_obj);

    let intervals = instance
        .timetable()
        .get_train_list()
        .iter()
        .map(|(train, _)| instance.time_index_interval(train, dt, false))
        .collect::<Result<Vec<_>>>()?;

    let obj = extract_vss(session, instance.network(), &mut solution, &intervals, settings.postprocess)?;
    solution.set_obj(obj as f64);
    solution.set_postprocessed(settings.postprocess);

    if !settings.fixed_routes {
        extract_routes(session, instance, &mut solution, &intervals)?;
    }

    let _h = hprof::enter("extract trajectories");
    for (train, (first, last)) in intervals.iter().copied().enumerate() {
        for t in first..=(last + 1) {
            solution.add_train_speed(train, t * dt, session.train_speed(train, t)?)?;
            solution.add_train_pos(train, t * dt, session.train_pos(train, t)?)?;
        }
    }

    debug!("Summary:\n{}", solution.summary());
    Ok(solution)
}

/// Edges whose VSS slots are decided by the session. Of two edges that are
/// each other's reverse, only the lower index is listed.
fn relevant_edges(network: &Network) -> Vec<(EdgeId, Option<EdgeId>)> {
    network
        .breakable_edges()
        .filter_map(|e| {
            let reverse = network.get_reverse_edge_index(e).ok()?;
            let covered_by_reverse = reverse.map_or(false, |r| {
                r < e && network.get_edge(r).map_or(false, |r| r.breakable)
            });
            (!covered_by_reverse).then(|| (e, reverse))
        })
        .collect()
}

fn extract_vss<S: OptimizerSession>(
    session: &S,
    network: &Network,
    solution: &mut VssSolution,
    intervals: &[(i64, i64)],
    postprocess: bool,
) -> Result<usize> {
    let _h = hprof::enter("extract vss");
    let mut obj = 0;
    for (edge, reverse) in relevant_edges(network) {
        let (source, target) = network.edge_names(edge)?;
        let directions: Vec<EdgeId> = iter![edge, ..reverse].collect();
        for slot in 0..network.max_vss_on_edge(edge)? {
            let usage = session.slot_usage(edge, slot)?;
            let mut used = usage.used;

            if postprocess && used {
                used = boundary_exercised(session, intervals, &directions, slot)?;
                if !used {
                    debug!(
                        "Postprocessing removed unused VSS slot {} on {} -> {}",
                        slot, source, target
                    );
                }
            }

            if !used {
                continue;
            }

            trace!("Add VSS at {} on {} -> {}", usage.position, source, target);
            solution.add_vss_pos(edge, usage.position, true)?;
            obj += 1;
        }
    }
    Ok(obj)
}

/// Whether any train, at any step of its moving interval, has its front or
/// rear at `slot` on one of `directions`.
fn boundary_exercised<S: OptimizerSession>(
    session: &S,
    intervals: &[(i64, i64)],
    directions: &[EdgeId],
    slot: usize,
) -> Result<bool> {
    for (train, (first, last)) in intervals.iter().copied().enumerate() {
        for t in first..=last {
            for edge in directions {
                if session.boundary_used(train, t, *edge, slot)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Rebuilds each train's route by walking from its entry vertex through the
/// edges it occupies, step by step. Fails if two occupied edges leave the
/// current vertex at the same step.
fn extract_routes<S: OptimizerSession>(
    session: &S,
    instance: &Instance,
    solution: &mut VssSolution,
    intervals: &[(i64, i64)],
) -> Result<()> {
    let _h = hprof::enter("extract routes");
    let network = instance.network();
    let timetable = instance.timetable();
    solution.reset_routes();

    for (train_id, train) in timetable.get_train_list().iter() {
        solution.add_empty_route(&train.name)?;
        let mut frontier = timetable.get_schedule(train_id)?.entry;
        let (first, last) = intervals[train_id];

        for t in first..=last {
            let mut candidates = BTreeSet::new();
            for edge in 0..network.number_of_edges() {
                if session.train_on_edge(train_id, t, edge)? {
                    candidates.insert(edge);
                }
            }

            loop {
                let next = {
                    let mut leaving = candidates
                        .iter()
                        .copied()
                        .filter(|e| network.get_edge(*e).map_or(false, |e| e.source == frontier));
                    match (leaving.next(), leaving.next()) {
                        (None, _) => break,
                        (Some(e), None) => e,
                        (Some(a), Some(b)) => {
                            return Err(Error::Inconsistency(format!(
                                "route of train {} is ambiguous at step {}: edges {} and {} both leave vertex {}",
                                train.name, t, a, b, network.get_vertex(frontier)?.name
                            )))
                        }
                    }
                };
                trace!("Train {} continues on edge {} at step {}", train.name, next, t);
                solution.push_back_edge_to_route(&train.name, next)?;
                frontier = network.get_edge(next)?.target;
                candidates.remove(&next);
            }
        }
    }
    Ok(())
}
