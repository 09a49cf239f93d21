//! # REST Collaborators
//!
//! A thin asynchronous client over the fleet backend's request/response
//! endpoints, built on `reqwest` with exponential-backoff retry middleware.
//! Response envelopes are inconsistent across endpoints (`alerts`, `data`,
//! `speed_data`, `gps_data`, or a bare array), so extraction is defensive
//! and centralized here.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::SyncError;
use crate::model::{self, Alert, IgnitionState, Vehicle};

/// One entry of a per-serial speed history.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedEntry {
    /// Epoch seconds.
    pub time: i64,
    /// Speed in km/h.
    pub speed: f64,
}

/// One entry of a per-serial GPS history.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsEntry {
    /// Epoch seconds.
    pub time: i64,
    /// Latitude of the fix.
    pub latitude: f64,
    /// Longitude of the fix.
    pub longitude: f64,
}

/// Asynchronous client for the fleet backend's REST endpoints.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with a 10s request timeout and a 3-attempt
    /// exponential-backoff retry policy for transient failures.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("fleet-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self {
            inner,
            base_url,
            auth_token,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, SyncError> {
        let url = self.base_url.join(path)?;
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let response = self.inner.get(url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::ApiStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Fetches the authenticated user's fleet listing.
    pub async fn fetch_vehicles_by_user(&self, user_id: &str) -> Result<Vec<Vehicle>, SyncError> {
        let body = self.get_json(&format!("customers/vehicles/{user_id}")).await?;
        let vehicles = extract_array(&body, &["vehicles", "data"])
            .iter()
            .filter_map(parse_vehicle)
            .collect();
        Ok(vehicles)
    }

    /// Fetches the alert list for one device serial.
    pub async fn fetch_alerts_by_serial(&self, serial: &str) -> Result<Vec<Alert>, SyncError> {
        let body = self.get_json(&format!("customers/alerts/{serial}")).await?;
        let alerts = extract_array(&body, &["alerts", "data"])
            .iter()
            .enumerate()
            .map(|(index, record)| model::parse_alert(record, index))
            .collect();
        Ok(alerts)
    }

    /// Fetches the speed history for one device serial.
    pub async fn fetch_speed_by_serial(&self, serial: &str) -> Result<Vec<SpeedEntry>, SyncError> {
        let body = self.get_json(&format!("customers/speed/{serial}")).await?;
        let entries = extract_array(&body, &["speed_data", "data"])
            .iter()
            .filter_map(|record| {
                Some(SpeedEntry {
                    time: record.get("time").map(model::parse_epoch).unwrap_or(0),
                    speed: model::speed_of(record.get("speed"))?,
                })
            })
            .collect();
        Ok(entries)
    }

    /// Fetches the GPS history for one device serial.
    pub async fn fetch_gps_by_serial(&self, serial: &str) -> Result<Vec<GpsEntry>, SyncError> {
        let body = self.get_json(&format!("customers/gps/{serial}")).await?;
        let entries = extract_array(&body, &["gps_data", "data"])
            .iter()
            .filter_map(|record| {
                Some(GpsEntry {
                    time: record.get("time").map(model::parse_epoch).unwrap_or(0),
                    latitude: model::number_of(record.get("latitude"))?,
                    longitude: model::number_of(record.get("longitude"))?,
                })
            })
            .collect();
        Ok(entries)
    }

    /// Fetches the latest ignition verdict for one device serial.
    pub async fn fetch_ignition_by_serial(&self, serial: &str) -> Result<IgnitionState, SyncError> {
        let body = self.get_json(&format!("customers/ignition/{serial}")).await?;
        let entries = extract_array(&body, &["ignition_data", "data"]);
        let latest = latest_by_time(&entries);
        Ok(IgnitionState::normalize(latest.and_then(|r| r.get("ignition_status"))))
    }

    /// Bootstraps the fleet: loads the vehicle listing, then seeds each
    /// vehicle with its latest known speed and GPS fix. Per-vehicle seed
    /// errors degrade that vehicle to parked/no-fix instead of aborting.
    pub async fn load_fleet(&self, user_id: &str) -> Result<Vec<Arc<Vehicle>>, SyncError> {
        let mut fleet = self.fetch_vehicles_by_user(user_id).await?;
        for vehicle in &mut fleet {
            if vehicle.serial.is_empty() {
                continue;
            }
            match self.fetch_speed_by_serial(&vehicle.serial).await {
                Ok(entries) => {
                    if let Some(latest) = entries.iter().max_by_key(|e| e.time) {
                        vehicle.speed = latest.speed;
                    }
                }
                Err(e) => log::warn!("Speed seed failed for {}: {e}", vehicle.serial),
            }
            match self.fetch_gps_by_serial(&vehicle.serial).await {
                Ok(entries) => {
                    if let Some(latest) = entries.iter().max_by_key(|e| e.time) {
                        vehicle.latitude = Some(latest.latitude);
                        vehicle.longitude = Some(latest.longitude);
                    }
                }
                Err(e) => log::warn!("GPS seed failed for {}: {e}", vehicle.serial),
            }
        }
        Ok(fleet.into_iter().map(Arc::new).collect())
    }
}

/// Pulls the payload array out of an inconsistent envelope: named keys are
/// tried in order, then the body itself as a bare array, then empty.
pub fn extract_array(body: &Value, keys: &[&str]) -> Vec<Value> {
    for key in keys {
        if let Some(array) = body.get(key).and_then(Value::as_array) {
            return array.clone();
        }
    }
    body.as_array().cloned().unwrap_or_default()
}

fn latest_by_time(entries: &[Value]) -> Option<&Value> {
    entries
        .iter()
        .max_by_key(|record| record.get("time").map(model::parse_epoch).unwrap_or(0))
}

fn parse_vehicle(record: &Value) -> Option<Vehicle> {
    let id = match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };
    let text = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Some(Vehicle::new(
        id,
        text("vehicle_model"),
        text("vehicle_plate"),
        text("device_serial"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_extraction_precedence() {
        let named = json!({"alerts": [{"a": 1}], "data": [{"b": 2}]});
        assert_eq!(extract_array(&named, &["alerts", "data"]), vec![json!({"a": 1})]);

        let fallback = json!({"data": [{"b": 2}]});
        assert_eq!(extract_array(&fallback, &["alerts", "data"]), vec![json!({"b": 2})]);

        let bare = json!([{"c": 3}]);
        assert_eq!(extract_array(&bare, &["alerts", "data"]), vec![json!({"c": 3})]);

        let empty = json!({"message": "no content"});
        assert!(extract_array(&empty, &["alerts", "data"]).is_empty());
    }

    #[test]
    fn latest_entry_wins_regardless_of_order() {
        let entries = extract_array(
            &json!({"speed_data": [
                {"time": "1700000100", "speed": 0},
                {"time": "1700000300", "speed": 42},
                {"time": "1700000200", "speed": 17}
            ]}),
            &["speed_data"],
        );
        let latest = latest_by_time(&entries).unwrap();
        assert_eq!(model::number_of(latest.get("speed")), Some(42.0));
    }

    #[test]
    fn vehicle_records_parse_from_fleet_listing() {
        let record = json!({
            "id": 7,
            "vehicle_model": "BMW X3",
            "vehicle_plate": "CA 1234",
            "device_serial": "ABC1"
        });
        let vehicle = parse_vehicle(&record).unwrap();
        assert_eq!(vehicle.id, "7");
        assert_eq!(vehicle.name, "BMW X3");
        assert_eq!(vehicle.serial, "ABC1");
        assert_eq!(vehicle.latitude, None);

        assert!(parse_vehicle(&json!({"vehicle_model": "no id"})).is_none());
    }

    #[test]
    fn client_rejects_a_relative_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", None),
            Err(SyncError::InvalidBaseUrl(_))
        ));
    }
}
