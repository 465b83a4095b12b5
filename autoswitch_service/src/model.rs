//! Core data types for the station auto-switch service.
//!
//! This module defines the shared domain model imported by all other modules:
//! the validated `Device` record, the validity filter applied to raw endpoint
//! records, and the fetch error taxonomy. It does no I/O.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Record field names
// ---------------------------------------------------------------------------

/// Name fields in priority order; the first non-empty one wins.
pub const NAME_FIELDS: [&str; 3] = ["name", "device_name", "station_name"];

pub const FIELD_ID: &str = "id";
pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";

/// GeoJSON-ordered `[longitude, latitude]` pair, as the map layer stores it.
pub const FIELD_COORDINATES: &str = "coordinates";

// ---------------------------------------------------------------------------
// Device types
// ---------------------------------------------------------------------------

/// Identity of a device within one fetch cycle.
///
/// The backend emits integer primary keys, but older station tables use
/// string codes, so both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum DeviceId {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceId::Int(id) => write!(f, "{}", id),
            DeviceId::Text(id) => write!(f, "{}", id),
        }
    }
}

/// WGS84 position of a station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A validated monitoring station.
///
/// Only records that pass [`Device::from_record`] become a `Device`: every
/// instance has a non-empty name and a finite coordinate pair. All fields the
/// controller does not interpret (status, water level, basin, ...) are kept
/// in `attributes` and handed to the focus sink untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: Option<DeviceId>,
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// Why a raw record was dropped by the validity filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no non-empty name, device_name or station_name")]
    MissingName,
    #[error("record has neither latitude/longitude nor a coordinates pair")]
    MissingCoordinates,
}

impl Device {
    /// Validates one raw endpoint record.
    ///
    /// A record is valid iff it has a non-empty name (first of `name`,
    /// `device_name`, `station_name`) and a coordinate pair, either as
    /// `latitude`/`longitude` or as a `coordinates` array in
    /// `[longitude, latitude]` order. Numeric strings are accepted because
    /// the backend serializes decimal columns as strings.
    pub fn from_record(record: &Value) -> Result<Device, Rejection> {
        let object = record.as_object().ok_or(Rejection::NotAnObject)?;

        let name = NAME_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|name| !name.is_empty())
            .ok_or(Rejection::MissingName)?
            .to_string();

        let coordinates = coordinates_of(object).ok_or(Rejection::MissingCoordinates)?;

        let id = object.get(FIELD_ID).and_then(device_id_of);

        let attributes = object
            .iter()
            .filter(|(key, _)| !is_consumed_field(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Device {
            id,
            name,
            coordinates,
            attributes,
        })
    }
}

/// Applies the validity filter to a raw record list, preserving arrival order.
pub fn filter_valid(records: &[Value]) -> Vec<Device> {
    records
        .iter()
        .filter_map(|record| Device::from_record(record).ok())
        .collect()
}

/// Returns `true` when both lists have the same length and the same ordered
/// id sequence. Used to decide whether a refreshed list is worth publishing.
///
/// A device without an id is identified by its name and coordinates instead.
pub fn same_id_sequence(a: &[Device], b: &[Device]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_identity(y))
}

impl Device {
    fn same_identity(&self, other: &Device) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name && self.coordinates == other.coordinates,
        }
    }
}

fn coordinates_of(object: &Map<String, Value>) -> Option<Coordinates> {
    let pair = match (
        number_of(object.get(FIELD_LATITUDE)),
        number_of(object.get(FIELD_LONGITUDE)),
    ) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };

    pair.or_else(|| {
        let items = object.get(FIELD_COORDINATES)?.as_array()?;
        let longitude = number_of(items.first())?;
        let latitude = number_of(items.get(1))?;
        Some(Coordinates { latitude, longitude })
    })
}

fn number_of(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn device_id_of(value: &Value) -> Option<DeviceId> {
    match value {
        Value::Number(n) => n.as_i64().map(DeviceId::Int),
        Value::String(s) if !s.trim().is_empty() => Some(DeviceId::Text(s.trim().to_string())),
        _ => None,
    }
}

fn is_consumed_field(key: &str) -> bool {
    key == FIELD_ID
        || key == FIELD_LATITUDE
        || key == FIELD_LONGITUDE
        || key == FIELD_COORDINATES
        || NAME_FIELDS.contains(&key)
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while fetching the device list.
///
/// `Http`, `Transport` and `InvalidShape` are transient failures of a single
/// attempt. `NoValidDevices` is also retried. `Exhausted` is terminal for one
/// fetch cycle and is what callers see after the retry policy gives up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Non-2xx response from the device endpoint.
    #[error("HTTP error: {0}")]
    Http(u16),
    /// The request never produced a response (connect, TLS, timeout, body read).
    #[error("Request failed: {0}")]
    Transport(String),
    /// The body was not a device array or a `{ "data": [...] }` envelope.
    #[error("Invalid device payload: {0}")]
    InvalidShape(String),
    /// The payload was well-formed but no record passed the validity filter.
    #[error("No valid devices found ({received} records received)")]
    NoValidDevices { received: usize },
    /// Every attempt allowed by the retry policy failed.
    #[error("Device fetch failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Whether the retry policy should try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Exhausted { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_with_lat_long_is_valid() {
        let device = Device::from_record(&json!({
            "id": 7,
            "name": "Pos Duga Air Katulampa",
            "latitude": -6.6337,
            "longitude": 106.8378,
            "status": "siaga"
        }))
        .expect("record with name and lat/long should be valid");

        assert_eq!(device.id, Some(DeviceId::Int(7)));
        assert_eq!(device.name, "Pos Duga Air Katulampa");
        assert_eq!(device.coordinates.latitude, -6.6337);
        assert_eq!(device.attributes.get("status"), Some(&json!("siaga")));
        assert!(!device.attributes.contains_key("latitude"));
    }

    #[test]
    fn test_coordinates_array_is_longitude_first() {
        let device = Device::from_record(&json!({
            "id": "ARR-02",
            "station_name": "Manggarai",
            "coordinates": [106.8497, -6.2088]
        }))
        .expect("coordinates pair should satisfy the location requirement");

        assert_eq!(device.id, Some(DeviceId::Text("ARR-02".to_string())));
        assert_eq!(device.coordinates.longitude, 106.8497);
        assert_eq!(device.coordinates.latitude, -6.2088);
    }

    #[test]
    fn test_numeric_strings_are_accepted_as_coordinates() {
        let device = Device::from_record(&json!({
            "device_name": "Depok",
            "latitude": "-6.4025",
            "longitude": " 106.7942 "
        }))
        .expect("decimal strings from the backend should parse");

        assert_eq!(device.coordinates.latitude, -6.4025);
        assert_eq!(device.coordinates.longitude, 106.7942);
        assert_eq!(device.id, None);
    }

    #[test]
    fn test_first_non_empty_name_wins() {
        let device = Device::from_record(&json!({
            "name": "   ",
            "device_name": "",
            "station_name": "Sunter Hulu",
            "latitude": 1.0,
            "longitude": 2.0
        }))
        .expect("station_name should be used when earlier fields are blank");
        assert_eq!(device.name, "Sunter Hulu");
    }

    #[test]
    fn test_rejections_are_classified() {
        assert_eq!(
            Device::from_record(&json!([1, 2])),
            Err(Rejection::NotAnObject)
        );
        assert_eq!(
            Device::from_record(&json!({ "latitude": 1.0, "longitude": 2.0 })),
            Err(Rejection::MissingName)
        );
        assert_eq!(
            Device::from_record(&json!({ "name": "A", "latitude": 1.0 })),
            Err(Rejection::MissingCoordinates)
        );
        assert_eq!(
            Device::from_record(&json!({ "name": "A", "coordinates": [106.0] })),
            Err(Rejection::MissingCoordinates)
        );
        assert_eq!(
            Device::from_record(&json!({ "name": "A", "latitude": "n/a", "longitude": 2.0 })),
            Err(Rejection::MissingCoordinates)
        );
    }

    #[test]
    fn test_filter_keeps_exactly_the_valid_records() {
        // Every combination of name present/absent and location
        // present/absent/malformed, mixed with non-object junk.
        let names = [json!("Station"), json!(""), Value::Null];
        let locations = [
            json!({ "latitude": -6.1, "longitude": 106.8 }),
            json!({ "coordinates": [106.8, -6.1] }),
            json!({ "coordinates": "106.8,-6.1" }),
            json!({ "latitude": -6.1 }),
            json!({}),
        ];

        let mut records = vec![json!(null), json!(42), json!("device")];
        let mut expected = 0;
        for (i, name) in names.iter().enumerate() {
            for (j, location) in locations.iter().enumerate() {
                let mut record = location.as_object().cloned().unwrap_or_default();
                record.insert("id".to_string(), json!(i * 10 + j));
                if !name.is_null() {
                    record.insert("name".to_string(), name.clone());
                }
                if i == 0 && j < 2 {
                    expected += 1;
                }
                records.push(Value::Object(record));
            }
        }

        let valid = filter_valid(&records);
        assert_eq!(valid.len(), expected);
        assert!(valid.iter().all(|d| !d.name.is_empty()));
        assert_eq!(
            valid.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
            vec![Some(DeviceId::Int(0)), Some(DeviceId::Int(1))],
            "arrival order must be preserved"
        );
    }

    #[test]
    fn test_same_id_sequence_compares_order_and_length() {
        let a = filter_valid(&[
            json!({ "id": 1, "name": "A", "latitude": 0.5, "longitude": 0.5 }),
            json!({ "id": 2, "name": "B", "latitude": 0.5, "longitude": 0.5 }),
        ]);
        let mut reversed = a.clone();
        reversed.reverse();

        assert!(same_id_sequence(&a, &a.clone()));
        assert!(!same_id_sequence(&a, &reversed));
        assert!(!same_id_sequence(&a, &a[..1]));
    }

    #[test]
    fn test_devices_without_id_compare_by_name_and_location() {
        let old = filter_valid(&[
            json!({ "name": "Katulampa", "latitude": -6.63, "longitude": 106.83 }),
            json!({ "name": "Depok", "latitude": -6.40, "longitude": 106.79 }),
        ]);
        let renamed = filter_valid(&[
            json!({ "name": "Manggarai", "latitude": -6.21, "longitude": 106.85 }),
            json!({ "name": "Depok", "latitude": -6.40, "longitude": 106.79 }),
        ]);
        let moved = filter_valid(&[
            json!({ "name": "Katulampa", "latitude": -6.64, "longitude": 106.83 }),
            json!({ "name": "Depok", "latitude": -6.40, "longitude": 106.79 }),
        ]);

        assert!(same_id_sequence(&old, &old.clone()));
        assert!(!same_id_sequence(&old, &renamed));
        assert!(!same_id_sequence(&old, &moved));
    }

    #[test]
    fn test_exhausted_is_not_retryable() {
        assert!(FetchError::Http(502).is_retryable());
        assert!(FetchError::NoValidDevices { received: 3 }.is_retryable());
        let exhausted = FetchError::Exhausted {
            attempts: 4,
            last: Box::new(FetchError::Http(502)),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(
            exhausted.to_string(),
            "Device fetch failed after 4 attempts: HTTP error: 502"
        );
    }
}
