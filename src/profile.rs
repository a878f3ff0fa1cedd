use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{error::PreprocessError, network::RawWay};

/// Which directions a way may be travelled in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TravelDirection {
    Both,
    Forward,
    Backward,
}

/// Speed and access rules applied to ways during extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Free-flow speed in km/h per `highway` class. Unlisted classes are not
    /// routable.
    pub speeds: FxHashMap<String, f64>,
    #[serde(default = "default_true")]
    pub obey_oneway: bool,
    /// Upper bound in km/h applied to `maxspeed` tags.
    #[serde(default)]
    pub max_speed: Option<f64>,
    /// `access` values that make a way unusable.
    #[serde(default)]
    pub denied_access: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Profile {
    pub fn car() -> Self {
        let speeds = [
            ("motorway", 90.0),
            ("motorway_link", 45.0),
            ("trunk", 85.0),
            ("trunk_link", 40.0),
            ("primary", 65.0),
            ("primary_link", 30.0),
            ("secondary", 55.0),
            ("secondary_link", 25.0),
            ("tertiary", 40.0),
            ("tertiary_link", 20.0),
            ("unclassified", 25.0),
            ("residential", 25.0),
            ("living_street", 10.0),
            ("service", 15.0),
        ]
        .into_iter()
        .map(|(class, speed)| (class.to_string(), speed))
        .collect();

        Self {
            name: "car".into(),
            speeds,
            obey_oneway: true,
            max_speed: Some(130.0),
            denied_access: vec!["no".into(), "private".into()],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let path = path.as_ref();
        let malformed = |reason: String| PreprocessError::MalformedProfile {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
        let profile: Profile =
            serde_json::from_str(&text).map_err(|err| malformed(err.to_string()))?;

        if let Some((class, speed)) = profile.speeds.iter().find(|(_, speed)| !(**speed > 0.0)) {
            return Err(malformed(format!("speed for {class} must be positive, got {speed}")));
        }

        Ok(profile)
    }

    /// Speed in km/h for `way`, or `None` if the way is not routable.
    pub fn way_speed(&self, way: &RawWay) -> Option<f64> {
        let class_speed = *self.speeds.get(way.tag("highway")?)?;

        if way
            .tag("access")
            .is_some_and(|access| self.denied_access.iter().any(|denied| denied == access))
        {
            return None;
        }

        let speed = way
            .tag("maxspeed")
            .and_then(parse_maxspeed)
            .unwrap_or(class_speed);

        Some(match self.max_speed {
            Some(cap) => speed.min(cap),
            None => speed,
        })
    }

    pub fn direction(&self, way: &RawWay) -> TravelDirection {
        if !self.obey_oneway {
            return TravelDirection::Both;
        }

        match way.tag("oneway") {
            Some("yes" | "true" | "1") => TravelDirection::Forward,
            Some("-1" | "reverse") => TravelDirection::Backward,
            Some(_) => TravelDirection::Both,
            None if way.tag("junction") == Some("roundabout") => TravelDirection::Forward,
            None if way.tag("highway") == Some("motorway") => TravelDirection::Forward,
            None => TravelDirection::Both,
        }
    }
}

fn parse_maxspeed(value: &str) -> Option<f64> {
    let value = value.trim();

    let (number, factor) = match value.strip_suffix("mph") {
        Some(number) => (number.trim(), 1.609344),
        None => (value.strip_suffix("km/h").unwrap_or(value).trim(), 1.0),
    };

    number
        .parse::<f64>()
        .ok()
        .filter(|speed| *speed > 0.0)
        .map(|speed| speed * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn way(tags: &[(&str, &str)]) -> RawWay {
        RawWay {
            id: 1,
            nodes: vec![1, 2],
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn speeds_follow_highway_class_and_maxspeed() {
        let car = Profile::car();

        assert_eq!(car.way_speed(&way(&[("highway", "residential")])), Some(25.0));
        assert_eq!(car.way_speed(&way(&[("highway", "footway")])), None);
        assert_eq!(car.way_speed(&way(&[("name", "Rue Grimaldi")])), None);
        assert_eq!(
            car.way_speed(&way(&[("highway", "primary"), ("maxspeed", "50")])),
            Some(50.0)
        );
        assert_eq!(
            car.way_speed(&way(&[("highway", "motorway"), ("maxspeed", "none")])),
            Some(90.0)
        );
        assert_eq!(
            car.way_speed(&way(&[("highway", "primary"), ("maxspeed", "200")])),
            Some(130.0)
        );
        assert_eq!(
            car.way_speed(&way(&[("highway", "service"), ("access", "private")])),
            None
        );
    }

    #[test]
    fn maxspeed_units() {
        assert_eq!(parse_maxspeed("30 mph"), Some(30.0 * 1.609344));
        assert_eq!(parse_maxspeed("70 km/h"), Some(70.0));
        assert_eq!(parse_maxspeed("walk"), None);
    }

    #[test]
    fn oneway_handling() {
        let car = Profile::car();

        assert_eq!(
            car.direction(&way(&[("highway", "primary"), ("oneway", "yes")])),
            TravelDirection::Forward
        );
        assert_eq!(
            car.direction(&way(&[("highway", "primary"), ("oneway", "-1")])),
            TravelDirection::Backward
        );
        assert_eq!(
            car.direction(&way(&[("highway", "primary"), ("junction", "roundabout")])),
            TravelDirection::Forward
        );
        assert_eq!(
            car.direction(&way(&[("highway", "motorway"), ("oneway", "no")])),
            TravelDirection::Both
        );

        let ignoring = Profile {
            obey_oneway: false,
            ..Profile::car()
        };
        assert_eq!(
            ignoring.direction(&way(&[("highway", "primary"), ("oneway", "yes")])),
            TravelDirection::Both
        );
    }
}
