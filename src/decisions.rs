//! Optimizer decisions read from a JSON file, for back ends that run
//! out of process and dump their variable values.

use crate::error::{read_json, Error, Result};
use crate::extract::{OptimizerSession, RawStatus, SlotUsage, SlotUsageResolver};
use crate::network::EdgeId;
use crate::trains::TrainId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One binary "slot is used" indicator per slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinaryIndicator {
    pub used: BTreeMap<EdgeId, Vec<f64>>,
}

impl SlotUsageResolver for BinaryIndicator {
    fn is_used(&self, edge: EdgeId, slot: usize) -> bool {
        self.used
            .get(&edge)
            .and_then(|v| v.get(slot))
            .map_or(false, |x| *x > 0.5)
    }
}

/// Number of VSS segments per edge. Slot `k` is used when the edge is split
/// into more than `k + 1` segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentCount {
    pub segments: BTreeMap<EdgeId, f64>,
}

impl SlotUsageResolver for SegmentCount {
    fn is_used(&self, edge: EdgeId, slot: usize) -> bool {
        self.segments
            .get(&edge)
            .map_or(false, |n| *n > slot as f64 + 1.5)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VssEncoding {
    Binary(BinaryIndicator),
    Count(SegmentCount),
}

impl SlotUsageResolver for VssEncoding {
    fn is_used(&self, edge: EdgeId, slot: usize) -> bool {
        match self {
            VssEncoding::Binary(b) => b.is_used(edge, slot),
            VssEncoding::Count(c) => c.is_used(edge, slot),
        }
    }
}

/// Variable values for one train. Every vector is indexed by grid step
/// relative to `first_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainDecisions {
    pub first_step: i64,
    pub position: Vec<f64>,
    pub speed: Vec<f64>,
    /// `(edge, slot)` boundaries that the front or rear of the train is at.
    /// Only needed for postprocessing.
    #[serde(default)]
    pub boundaries: Option<Vec<Vec<(EdgeId, usize)>>>,
    /// Edges occupied by the train. Only needed when routes were left free.
    #[serde(default)]
    pub occupied: Option<Vec<Vec<EdgeId>>>,
}

impl TrainDecisions {
    fn step(&self, t: i64) -> Option<usize> {
        usize::try_from(t - self.first_step).ok()
    }

    fn value(values: &[f64], step: Option<usize>, what: &str, t: i64) -> Result<f64> {
        step.and_then(|s| values.get(s))
            .copied()
            .ok_or_else(|| Error::OutOfRange(format!("no {} decision at step {}", what, t)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTable {
    pub status: RawStatus,
    pub solution_count: usize,
    #[serde(default)]
    pub objective: Option<f64>,
    pub vss_encoding: VssEncoding,
    /// Continuous VSS positions, per edge and slot.
    #[serde(default)]
    pub vss_position: BTreeMap<EdgeId, Vec<f64>>,
    pub trains: Vec<TrainDecisions>,
}

impl DecisionTable {
    pub fn load(path: &Path) -> Result<DecisionTable> {
        read_json(path)
    }

    fn train(&self, train: TrainId) -> Result<&TrainDecisions> {
        self.trains
            .get(train)
            .ok_or_else(|| Error::not_found("train decisions", train))
    }
}

impl OptimizerSession for DecisionTable {
    fn status(&self) -> RawStatus {
        self.status
    }

    fn solution_count(&self) -> usize {
        self.solution_count
    }

    fn objective(&self) -> Result<f64> {
        self.objective
            .ok_or_else(|| Error::Inconsistency("decision table has no objective".to_string()))
    }

    fn slot_usage(&self, edge: EdgeId, slot: usize) -> Result<SlotUsage> {
        if !self.vss_encoding.is_used(edge, slot) {
            return Ok(SlotUsage {
                used: false,
                position: 0.0,
            });
        }
        let position = self
            .vss_position
            .get(&edge)
            .and_then(|v| v.get(slot))
            .copied()
            .ok_or_else(|| {
                Error::OutOfRange(format!("no position for used VSS slot {} on edge {}", slot, edge))
            })?;
        Ok(SlotUsage {
            used: true,
            position,
        })
    }

    fn boundary_used(&self, train: TrainId, t: i64, edge: EdgeId, slot: usize) -> Result<bool> {
        let decisions = self.train(train)?;
        let boundaries = decisions.boundaries.as_ref().ok_or_else(|| {
            Error::Inconsistency(format!("no boundary usage recorded for train {}", train))
        })?;
        let at_step = decisions
            .step(t)
            .and_then(|s| boundaries.get(s))
            .ok_or_else(|| {
                Error::Inconsistency(format!(
                    "no boundary usage recorded for train {} at step {}",
                    train, t
                ))
            })?;
        Ok(at_step.contains(&(edge, slot)))
    }

    fn train_on_edge(&self, train: TrainId, t: i64, edge: EdgeId) -> Result<bool> {
        let decisions = self.train(train)?;
        let occupied = decisions.occupied.as_ref().ok_or_else(|| {
            Error::Inconsistency(format!("no edge occupation recorded for train {}", train))
        })?;
        Ok(decisions
            .step(t)
            .and_then(|s| occupied.get(s))
            .map_or(false, |edges| edges.contains(&edge)))
    }

    fn train_pos(&self, train: TrainId, t: i64) -> Result<f64> {
        let d = self.train(train)?;
        TrainDecisions::value(&d.position, d.step(t), "position", t)
    }

    fn train_speed(&self, train: TrainId, t: i64) -> Result<f64> {
        let d = self.train(train)?;
        TrainDecisions::value(&d.speed, d.step(t), "speed", t)
    }
}
