//! Response documents.
//!
//! A document is a closed union of JSON-like values. Objects keep their keys
//! in insertion order so serialized responses are stable.

use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serialize, Serializer,
};

use crate::{coordinate::Coordinate, error::RouteError, query::RouteResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Coordinate> for Value {
    fn from(coordinate: Coordinate) -> Self {
        Value::Array(vec![coordinate.lon().into(), coordinate.lat().into()])
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
            Value::Object(object) => object.serialize(serializer),
        }
    }
}

/// An order-preserving string-keyed map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    entries: Vec<(String, Value)>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its original position if it was already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key)?.as_array()
    }

    pub fn get_object(&self, key: &str) -> Option<&Object> {
        self.get(key)?.as_object()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub document: Object,
}

impl Response {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.document)
    }
}

/// Converts route results into documents.
pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn build(result: &RouteResult) -> Response {
        match result {
            Ok(set) => {
                let routes = set
                    .routes
                    .iter()
                    .map(|route| {
                        let legs = route
                            .legs
                            .iter()
                            .map(|leg| {
                                Object::new()
                                    .with("distance", round(leg.distance))
                                    .with("duration", round(leg.duration))
                                    .into()
                            })
                            .collect::<Vec<Value>>();

                        let mut object = Object::new()
                            .with("distance", round(route.distance))
                            .with("duration", round(route.duration))
                            .with("legs", legs);
                        if let Some(geometry) = &route.geometry {
                            object.insert(
                                "geometry",
                                geometry.iter().copied().map(Value::from).collect::<Vec<_>>(),
                            );
                        }
                        object.into()
                    })
                    .collect::<Vec<Value>>();

                let waypoints = set
                    .waypoints
                    .iter()
                    .map(|waypoint| {
                        Object::new()
                            .with("location", waypoint.location)
                            .with("distance", round(waypoint.distance))
                            .into()
                    })
                    .collect::<Vec<Value>>();

                Response {
                    status: Status::Ok,
                    document: Object::new()
                        .with("code", "Ok")
                        .with("routes", routes)
                        .with("waypoints", waypoints),
                }
            }
            Err(err) => Self::error(err),
        }
    }

    pub fn error(err: &RouteError) -> Response {
        Response {
            status: Status::Error,
            document: Object::new()
                .with("code", err.code())
                .with("message", err.message()),
        }
    }
}

/// Distances and durations are reported with one decimal.
fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Route, RouteLeg, RouteSet, Waypoint};

    fn result() -> RouteResult {
        let a = Coordinate::new(7.419758, 43.731142).unwrap();
        let b = Coordinate::new(7.419505, 43.736825).unwrap();
        Ok(RouteSet {
            routes: vec![Route {
                distance: 812.345,
                duration: 93.06,
                legs: vec![RouteLeg {
                    distance: 812.345,
                    duration: 93.06,
                }],
                geometry: Some(vec![a, b]),
            }],
            waypoints: vec![
                Waypoint {
                    node: 0,
                    location: a,
                    distance: 1.25,
                },
                Waypoint {
                    node: 1,
                    location: b,
                    distance: 0.0,
                },
            ],
        })
    }

    #[test]
    fn ok_document() {
        let response = ResponseBuilder::build(&result());
        assert_eq!(response.status, Status::Ok);

        let document = &response.document;
        assert_eq!(document.keys().collect::<Vec<_>>(), ["code", "routes", "waypoints"]);
        assert_eq!(document.get_str("code"), Some("Ok"));

        let route = document.get_array("routes").unwrap()[0].as_object().unwrap();
        assert_eq!(route.get_number("distance"), Some(812.3));
        assert_eq!(route.get_number("duration"), Some(93.1));
        assert_eq!(route.get_array("legs").unwrap().len(), 1);
        assert_eq!(route.get_array("geometry").unwrap().len(), 2);

        let json = response.to_json().unwrap();
        assert!(json.starts_with(r#"{"code":"Ok","routes":[{"distance":812.3,"duration":93.1,"legs""#));
        assert!(json.contains(r#""location":[7.419758,43.731142]"#));
    }

    #[test]
    fn error_document() {
        let response =
            ResponseBuilder::build(&Err(RouteError::NoSegment("coordinate 0 is off the map".into())));

        assert_eq!(response.status, Status::Error);
        assert_eq!(
            response.to_json().unwrap(),
            r#"{"code":"NoSegment","message":"coordinate 0 is off the map"}"#
        );
        assert_eq!(response.document.get_number("code"), None);
        assert_eq!(response.document.get_object("missing"), None);
    }

    #[test]
    fn insert_keeps_position() {
        let mut object = Object::new().with("a", 1u32).with("b", true);
        object.insert("a", Value::Null);

        assert_eq!(object.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(object.get("a"), Some(&Value::Null));
        assert_eq!(object.get("b").and_then(Value::as_bool), Some(true));
        assert_eq!(Value::from(None::<f64>), Value::Null);
    }

    #[test]
    fn documents_are_idempotent() {
        assert_eq!(
            ResponseBuilder::build(&result()),
            ResponseBuilder::build(&result())
        );
    }
}
