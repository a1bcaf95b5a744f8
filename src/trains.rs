use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;

pub type TrainId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Train {
    pub name: String,
    /// Length in meters.
    pub length: f64,
    /// Maximum speed in m/s.
    pub max_speed: f64,
    /// Acceleration in m/s^2.
    pub acceleration: f64,
    /// Deceleration in m/s^2.
    pub deceleration: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Train>", into = "Vec<Train>")]
pub struct TrainList {
    trains: Vec<Train>,
    name_to_index: HashMap<String, TrainId>,
}

impl TryFrom<Vec<Train>> for TrainList {
    type Error = Error;

    fn try_from(trains: Vec<Train>) -> Result<Self> {
        let mut list = TrainList::default();
        for train in trains {
            list.add_train(train)?;
        }
        Ok(list)
    }
}

impl From<TrainList> for Vec<Train> {
    fn from(list: TrainList) -> Self {
        list.trains
    }
}

impl TrainList {
    pub fn add_train(&mut self, train: Train) -> Result<TrainId> {
        if self.name_to_index.contains_key(&train.name) {
            return Err(Error::Inconsistency(format!(
                "train {} already exists",
                train.name
            )));
        }
        let positive = [
            train.length,
            train.max_speed,
            train.acceleration,
            train.deceleration,
        ]
        .iter()
        .all(|x| x.is_finite() && *x > 0.0);
        if !positive {
            return Err(Error::Inconsistency(format!(
                "train {} must have positive length, speed and acceleration",
                train.name
            )));
        }
        let id = self.trains.len();
        self.name_to_index.insert(train.name.clone(), id);
        self.trains.push(train);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.trains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
    }

    pub fn has_train(&self, train: TrainId) -> bool {
        train < self.trains.len()
    }

    pub fn has_train_named(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn get_train_index(&self, name: &str) -> Result<TrainId> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("train", name))
    }

    pub fn get_train(&self, train: TrainId) -> Result<&Train> {
        self.trains
            .get(train)
            .ok_or_else(|| Error::not_found("train", train))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrainId, &Train)> {
        self.trains.iter().enumerate()
    }
}
