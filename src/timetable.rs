use crate::error::{Error, Result};
use crate::network::{EdgeId, Network, VertexId};
use crate::trains::{Train, TrainId, TrainList};
use log::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;

pub type StationId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub tracks: BTreeSet<EdgeId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Station>", into = "Vec<Station>")]
pub struct StationList {
    stations: Vec<Station>,
    name_to_index: HashMap<String, StationId>,
}

impl TryFrom<Vec<Station>> for StationList {
    type Error = Error;

    fn try_from(stations: Vec<Station>) -> Result<Self> {
        let mut list = StationList::default();
        for station in stations {
            let id = list.add_station(&station.name)?;
            list.stations[id].tracks = station.tracks;
        }
        Ok(list)
    }
}

impl From<StationList> for Vec<Station> {
    fn from(list: StationList) -> Self {
        list.stations
    }
}

impl StationList {
    pub fn add_station(&mut self, name: &str) -> Result<StationId> {
        if self.name_to_index.contains_key(name) {
            return Err(Error::Inconsistency(format!(
                "station {} already exists",
                name
            )));
        }
        let id = self.stations.len();
        self.stations.push(Station {
            name: name.to_string(),
            tracks: BTreeSet::new(),
        });
        self.name_to_index.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get_station_index(&self, name: &str) -> Result<StationId> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("station", name))
    }

    pub fn get_station(&self, station: StationId) -> Result<&Station> {
        self.stations
            .get(station)
            .ok_or_else(|| Error::not_found("station", station))
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StationId, &Station)> {
        self.stations.iter().enumerate()
    }
}

/// A train must occupy `station` for the whole interval `[begin, end]`.
///
/// Stops are ordered by non-overlap: a stop is less than another if it ends
/// before (or exactly when) the other begins. Two overlapping stops with
/// different intervals are incomparable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub begin: i64,
    pub end: i64,
    pub station: StationId,
}

impl PartialEq for ScheduledStop {
    fn eq(&self, other: &Self) -> bool {
        self.begin == other.begin && self.end == other.end
    }
}

impl PartialOrd for ScheduledStop {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.end <= other.begin {
            Some(Ordering::Less)
        } else if self.begin >= other.end {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Entry time in seconds.
    pub t0: i64,
    /// Entry speed in m/s.
    pub v0: f64,
    pub entry: VertexId,
    /// Exit time in seconds.
    pub tn: i64,
    /// Target exit speed in m/s.
    pub vn: f64,
    pub exit: VertexId,
    #[serde(default)]
    pub stops: Vec<ScheduledStop>,
}

impl Schedule {
    pub fn new(t0: i64, v0: f64, entry: VertexId, tn: i64, vn: f64, exit: VertexId) -> Self {
        Schedule {
            t0,
            v0,
            entry,
            tn,
            vn,
            exit,
            stops: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timetable {
    stations: StationList,
    trains: TrainList,
    schedules: Vec<Schedule>,
}

impl Timetable {
    pub fn add_train(
        &mut self,
        train: Train,
        schedule: Schedule,
        network: &Network,
    ) -> Result<TrainId> {
        network.get_vertex(schedule.entry)?;
        network.get_vertex(schedule.exit)?;
        let id = self.trains.add_train(train)?;
        self.schedules.push(schedule);
        Ok(id)
    }

    pub fn add_station(&mut self, name: &str) -> Result<StationId> {
        self.stations.add_station(name)
    }

    pub fn add_track_to_station(
        &mut self,
        station: StationId,
        track: EdgeId,
        network: &Network,
    ) -> Result<()> {
        network.get_edge(track)?;
        let station = self
            .stations
            .stations
            .get_mut(station)
            .ok_or_else(|| Error::not_found("station", station))?;
        station.tracks.insert(track);
        Ok(())
    }

    /// Adds a stop to a train's schedule. With `sort`, the stops are re-sorted
    /// right away; otherwise the caller is expected to call `sort_stops` later.
    pub fn add_stop(
        &mut self,
        train: TrainId,
        station: StationId,
        begin: i64,
        end: i64,
        sort: bool,
    ) -> Result<()> {
        self.stations.get_station(station)?;
        if begin >= end {
            return Err(Error::Inconsistency(format!(
                "stop begins at {} but ends at {}",
                begin, end
            )));
        }
        let schedule = self
            .schedules
            .get_mut(train)
            .ok_or_else(|| Error::not_found("train", train))?;
        schedule.stops.push(ScheduledStop {
            begin,
            end,
            station,
        });
        if sort {
            sort_schedule_stops(schedule);
        }
        Ok(())
    }

    pub fn sort_stops(&mut self) {
        for schedule in self.schedules.iter_mut() {
            sort_schedule_stops(schedule);
        }
    }

    pub fn get_train_list(&self) -> &TrainList {
        &self.trains
    }

    pub fn get_station_list(&self) -> &StationList {
        &self.stations
    }

    pub fn get_schedule(&self, train: TrainId) -> Result<&Schedule> {
        self.schedules
            .get(train)
            .ok_or_else(|| Error::not_found("train", train))
    }

    pub fn time_interval(&self, train: TrainId) -> Result<(i64, i64)> {
        let s = self.get_schedule(train)?;
        Ok((s.t0, s.tn))
    }

    /// Grid indices (multiples of `dt`) covering a train's schedule. The last
    /// index is rounded up, and excluded again when `tn_inclusive` is false.
    pub fn time_index_interval(
        &self,
        train: TrainId,
        dt: i64,
        tn_inclusive: bool,
    ) -> Result<(i64, i64)> {
        if dt <= 0 {
            return Err(Error::Inconsistency(format!("dt = {} is not positive", dt)));
        }
        let (t0, tn) = self.time_interval(train)?;
        let first = t0.div_euclid(dt);
        let mut last = tn.div_euclid(dt) + if tn.rem_euclid(dt) == 0 { 0 } else { 1 };
        if !tn_inclusive {
            last -= 1;
        }
        Ok((first, last))
    }

    pub fn check_consistency(&self, network: &Network) -> bool {
        match self.find_inconsistency(network) {
            Some(reason) => {
                debug!("Timetable is inconsistent: {}", reason);
                false
            }
            None => true,
        }
    }

    fn find_inconsistency(&self, network: &Network) -> Option<String> {
        if self.schedules.len() != self.trains.len() {
            return Some(format!(
                "{} schedules for {} trains",
                self.schedules.len(),
                self.trains.len()
            ));
        }

        for (_, station) in self.stations.iter() {
            if let Some(track) = station.tracks.iter().find(|t| !network.has_edge(**t)) {
                return Some(format!("station {} has unknown track {}", station.name, track));
            }
        }

        for (train_id, train) in self.trains.iter() {
            let s = &self.schedules[train_id];
            if s.t0 < 0 || s.t0 >= s.tn {
                return Some(format!(
                    "train {} runs from {} to {}",
                    train.name, s.t0, s.tn
                ));
            }
            for v in [s.v0, s.vn] {
                if v < 0.0 || v > train.max_speed {
                    return Some(format!(
                        "train {} has boundary speed {} outside [0, {}]",
                        train.name, v, train.max_speed
                    ));
                }
            }
            if !network.has_vertex(s.entry) || !network.has_vertex(s.exit) {
                return Some(format!("train {} has unknown entry or exit", train.name));
            }
            let from_entry = network.reachable_from(s.entry);
            if !from_entry.contains(&s.exit) {
                return Some(format!(
                    "train {} cannot reach its exit from its entry",
                    train.name
                ));
            }

            for stop in s.stops.iter() {
                if stop.begin >= stop.end || stop.begin < s.t0 || stop.end > s.tn {
                    return Some(format!(
                        "train {} has stop [{}, {}] outside [{}, {}]",
                        train.name, stop.begin, stop.end, s.t0, s.tn
                    ));
                }
                let station = match self.stations.get_station(stop.station) {
                    Ok(station) => station,
                    Err(_) => {
                        return Some(format!(
                            "train {} stops at unknown station {}",
                            train.name, stop.station
                        ))
                    }
                };
                let usable = station.tracks.iter().any(|t| {
                    network.get_edge(*t).map_or(false, |e| {
                        from_entry.contains(&e.source)
                            && network.reachable_from(e.target).contains(&s.exit)
                    })
                });
                if !usable {
                    return Some(format!(
                        "train {} cannot use any track of station {}",
                        train.name, station.name
                    ));
                }
            }

            for pair in s.stops.windows(2) {
                if pair[0].partial_cmp(&pair[1]) != Some(Ordering::Less) {
                    return Some(format!(
                        "train {} has overlapping or unsorted stops [{}, {}] and [{}, {}]",
                        train.name, pair[0].begin, pair[0].end, pair[1].begin, pair[1].end
                    ));
                }
            }
        }

        None
    }
}

fn sort_schedule_stops(schedule: &mut Schedule) {
    schedule.stops.sort_by_key(|s| (s.begin, s.end));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::network::tests::small_network;

    pub fn train(name: &str) -> Train {
        Train {
            name: name.to_string(),
            length: 100.0,
            max_speed: 30.0,
            acceleration: 0.5,
            deceleration: 0.5,
        }
    }

    /// One train from A to C, with station "S" on the track B -> C.
    pub fn small_timetable(network: &Network) -> Timetable {
        let mut tt = Timetable::default();
        let a = network.get_vertex_index("A").unwrap();
        let c = network.get_vertex_index("C").unwrap();
        tt.add_train(train("T"), Schedule::new(0, 0.0, a, 100, 0.0, c), network)
            .unwrap();
        let s = tt.add_station("S").unwrap();
        let bc = network.get_edge_index_by_names("B", "C").unwrap();
        tt.add_track_to_station(s, bc, network).unwrap();
        tt
    }

    #[test]
    fn stop_ordering() {
        let s = |begin, end| ScheduledStop {
            begin,
            end,
            station: 0,
        };
        assert!(s(0, 10) < s(10, 20));
        assert!(s(30, 40) > s(10, 20));
        assert!(s(0, 10) == s(0, 10));
        assert_eq!(s(0, 15).partial_cmp(&s(10, 20)), None);
    }

    #[test]
    fn stops_are_sorted_unless_deferred() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        tt.add_stop(0, 0, 60, 70, true).unwrap();
        tt.add_stop(0, 0, 20, 30, true).unwrap();
        let begins: Vec<_> = tt.get_schedule(0).unwrap().stops.iter().map(|s| s.begin).collect();
        assert_eq!(begins, vec![20, 60]);

        tt.add_stop(0, 0, 5, 10, false).unwrap();
        assert_eq!(tt.get_schedule(0).unwrap().stops[2].begin, 5);
        tt.sort_stops();
        assert_eq!(tt.get_schedule(0).unwrap().stops[0].begin, 5);
        assert!(tt.check_consistency(&n));
    }

    #[test]
    fn sorting_tolerates_malformed_stops() {
        let n = small_network();
        let json = serde_json::to_string(&small_timetable(&n)).unwrap();
        let mut tt: Timetable = serde_json::from_str(&json).unwrap();
        for (begin, end) in [(50, 10), (20, 30), (40, 40), (90, 5), (0, 60), (25, 15)] {
            tt.schedules[0].stops.push(ScheduledStop {
                begin,
                end,
                station: 0,
            });
        }
        tt.sort_stops();
        let begins: Vec<_> = tt.get_schedule(0).unwrap().stops.iter().map(|s| s.begin).collect();
        assert_eq!(begins, vec![0, 20, 25, 40, 50, 90]);
        assert!(!tt.check_consistency(&n));
    }

    #[test]
    fn add_stop_rejects_bad_input() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        assert!(matches!(
            tt.add_stop(0, 0, 30, 30, true),
            Err(Error::Inconsistency(_))
        ));
        assert!(matches!(
            tt.add_stop(0, 5, 10, 20, true),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            tt.add_stop(3, 0, 10, 20, true),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn overlapping_stops_are_inconsistent() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        tt.add_stop(0, 0, 20, 40, true).unwrap();
        tt.add_stop(0, 0, 30, 50, true).unwrap();
        assert!(!tt.check_consistency(&n));
    }

    #[test]
    fn stop_outside_schedule_is_inconsistent() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        tt.add_stop(0, 0, 90, 120, true).unwrap();
        assert!(!tt.check_consistency(&n));
    }

    #[test]
    fn station_must_be_on_the_way() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        let behind = tt.add_station("Behind").unwrap();
        let ba = n.get_edge_index_by_names("B", "A").unwrap();
        tt.add_track_to_station(behind, ba, &n).unwrap();
        // B -> A ends at A, from where C is still reachable.
        tt.add_stop(0, behind, 10, 20, true).unwrap();
        assert!(tt.check_consistency(&n));

        let empty = tt.add_station("Empty").unwrap();
        tt.add_stop(0, empty, 30, 40, true).unwrap();
        assert!(!tt.check_consistency(&n));
    }

    #[test]
    fn boundary_speed_above_max_is_inconsistent() {
        let n = small_network();
        let mut tt = Timetable::default();
        tt.add_train(train("fast"), Schedule::new(0, 31.0, 0, 100, 0.0, 2), &n)
            .unwrap();
        assert!(!tt.check_consistency(&n));
    }

    #[test]
    fn time_index_interval_rounds_outwards() {
        let n = small_network();
        let mut tt = small_timetable(&n);
        assert_eq!(tt.time_index_interval(0, 10, true).unwrap(), (0, 10));
        assert_eq!(tt.time_index_interval(0, 10, false).unwrap(), (0, 9));
        tt.add_train(train("U"), Schedule::new(15, 0.0, 0, 95, 0.0, 2), &n)
            .unwrap();
        assert_eq!(tt.time_index_interval(1, 10, true).unwrap(), (1, 10));
        assert!(matches!(
            tt.time_index_interval(1, 0, true),
            Err(Error::Inconsistency(_))
        ));
    }
}
