//! # Domain Model & Wire Parse Boundary
//!
//! Canonical in-memory types for vehicles, telemetry and alerts, plus the
//! defensive parsing layer that turns the server's loosely shaped JSON frames
//! into one canonical representation.
//!
//! The telemetry backend is observed to be inconsistent about field names
//! (`alert` vs `alertType`, `time` vs `timestamp`), value types (numbers,
//! numeric strings, booleans for the same field) and envelope shapes. All of
//! that tolerance lives here, at the boundary, so the rest of the crate only
//! ever sees one shape per concept.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Protocol version advertised in the register frame.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Normalized ignition state. The wire sends `1`, `"1"`, `"on"`, `"true"`,
/// `"yes"` (any casing) for On; everything else, including an absent field,
/// is Off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnitionState {
    /// Engine ignition is on.
    On,
    /// Engine ignition is off (also the fallback for unrecognized input).
    Off,
}

impl IgnitionState {
    /// Normalizes a raw wire value into an ignition state.
    pub fn normalize(raw: Option<&Value>) -> Self {
        let Some(value) = raw else {
            return IgnitionState::Off;
        };
        let text = match value {
            Value::String(s) => s.trim().to_lowercase(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return IgnitionState::Off,
        };
        match text.as_str() {
            "1" | "on" | "true" | "yes" => IgnitionState::On,
            _ => IgnitionState::Off,
        }
    }
}

/// Motion status, always derived from speed and never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionStatus {
    /// Speed is strictly positive.
    Moving,
    /// Speed is zero (or the vehicle has never reported speed).
    Parked,
}

/// One tracked vehicle. Identity comes from the fleet listing; telemetry
/// frames only ever update vehicles that already exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    /// Backend vehicle id.
    pub id: String,
    /// Display name (vehicle model in the fleet listing).
    pub name: String,
    /// License plate.
    pub plate: String,
    /// Device serial, the join key for all telemetry and alerts.
    pub serial: String,
    /// Latest latitude, None until the first GPS fix.
    pub latitude: Option<f64>,
    /// Latest longitude, None until the first GPS fix.
    pub longitude: Option<f64>,
    /// Latest instantaneous speed in km/h.
    pub speed: f64,
    /// Normalized ignition state.
    pub ignition: IgnitionState,
}

impl Vehicle {
    /// Creates a vehicle in its pre-telemetry state: no fix, parked, off.
    pub fn new(id: impl Into<String>, name: impl Into<String>, plate: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plate: plate.into(),
            serial: serial.into(),
            latitude: None,
            longitude: None,
            speed: 0.0,
            ignition: IgnitionState::Off,
        }
    }

    /// Derived motion status: Moving iff speed is strictly positive.
    pub fn motion(&self) -> MotionStatus {
        if self.speed > 0.0 {
            MotionStatus::Moving
        } else {
            MotionStatus::Parked
        }
    }
}

/// One normalized alert. Alerts are immutable on the client; freshness is
/// handled through cache invalidation, never by mutating records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Server-assigned id, or the `{serial}-{time}` composite when omitted.
    pub id: String,
    /// Device serial; None for orphaned alerts, which are still displayed.
    pub device_serial: Option<String>,
    /// Free-text alert classification, e.g. "Remote Jamming Detected".
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Epoch seconds; 0 when the server sent an unparseable timestamp.
    pub time: i64,
    /// The raw timestamp representation, kept for display when parsing fails.
    pub time_raw: String,
}

/// One canonical per-device telemetry update. Only the fields named by the
/// originating frame kind are populated; the reconciler applies whatever is
/// present.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryUpdate {
    /// Device serial this update is addressed to.
    pub device_serial: String,
    /// New latitude (gps_update frames).
    pub latitude: Option<f64>,
    /// New longitude (gps_update frames).
    pub longitude: Option<f64>,
    /// New speed in km/h (gps_update and speed_update frames).
    pub speed: Option<f64>,
    /// New ignition state (engine_update frames).
    pub ignition: Option<IgnitionState>,
}

impl TelemetryUpdate {
    fn empty(device_serial: String) -> Self {
        Self {
            device_serial,
            latitude: None,
            longitude: None,
            speed: None,
            ignition: None,
        }
    }
}

/// Tagged union of every inbound frame kind the client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `gps_update`: position fixes, optionally with speed.
    Gps(Vec<TelemetryUpdate>),
    /// `speed_update`: instantaneous speed per device.
    Speed(Vec<TelemetryUpdate>),
    /// `engine_update`: ignition transitions per device.
    Engine(Vec<TelemetryUpdate>),
    /// `alert_update`: one alert or a batch of alerts.
    Alerts(Vec<Alert>),
    /// `all_tickets_update`: classified but not consumed.
    AllTickets,
    /// `all_alerts_update`: classified but not consumed.
    AllAlerts,
    /// `all_risks_update`: classified but not consumed.
    AllRisks,
    /// `pong`: heartbeat reply.
    Pong,
}

/// Parses one raw text frame into the canonical tagged union.
///
/// Malformed JSON, a missing `type` field and an unknown `type` are three
/// distinct errors so the dispatcher can log them apart. None of them affects
/// connection health.
pub fn classify_frame(raw: &str) -> Result<InboundFrame, SyncError> {
    let body: Value = serde_json::from_str(raw)?;
    let kind = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SyncError::MissingFrameType)?;

    let frame = match kind {
        "gps_update" => InboundFrame::Gps(parse_gps_batch(body.get("data"))),
        "speed_update" => InboundFrame::Speed(parse_speed_batch(body.get("data"))),
        "engine_update" => InboundFrame::Engine(parse_engine_batch(body.get("data"))),
        "alert_update" => InboundFrame::Alerts(parse_alert_batch(body.get("data"))),
        "all_tickets_update" => InboundFrame::AllTickets,
        "all_alerts_update" => InboundFrame::AllAlerts,
        "all_risks_update" => InboundFrame::AllRisks,
        "pong" => InboundFrame::Pong,
        other => return Err(SyncError::UnknownFrameType(other.to_string())),
    };
    Ok(frame)
}

/// Builds the outbound heartbeat frame.
pub fn ping_frame() -> String {
    serde_json::json!({ "type": "ping" }).to_string()
}

/// Builds the one-time registration frame carrying the push-routing token and
/// basic client metadata.
pub fn register_frame(token: &str, device_serial: Option<&str>) -> String {
    serde_json::json!({
        "type": "register",
        "token": token,
        "platform": std::env::consts::OS,
        "version": PROTOCOL_VERSION,
        "device_serial": device_serial,
    })
    .to_string()
}

// --- per-variant normalization -------------------------------------------

fn records_of(data: Option<&Value>) -> Vec<&Value> {
    match data {
        Some(Value::Array(items)) => items.iter().collect(),
        // The server occasionally sends a lone object instead of a batch.
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

fn serial_of(record: &Value) -> Option<String> {
    record
        .get("device_serial")
        .or_else(|| record.get("serial"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_gps_batch(data: Option<&Value>) -> Vec<TelemetryUpdate> {
    records_of(data)
        .into_iter()
        .filter_map(|record| {
            let mut update = TelemetryUpdate::empty(serial_of(record)?);
            update.latitude = number_of(record.get("latitude"));
            update.longitude = number_of(record.get("longitude"));
            update.speed = speed_of(record.get("speed"));
            Some(update)
        })
        .collect()
}

fn parse_speed_batch(data: Option<&Value>) -> Vec<TelemetryUpdate> {
    records_of(data)
        .into_iter()
        .filter_map(|record| {
            let mut update = TelemetryUpdate::empty(serial_of(record)?);
            update.speed = speed_of(record.get("speed"));
            Some(update)
        })
        .collect()
}

fn parse_engine_batch(data: Option<&Value>) -> Vec<TelemetryUpdate> {
    records_of(data)
        .into_iter()
        .filter_map(|record| {
            let mut update = TelemetryUpdate::empty(serial_of(record)?);
            // An engine_update always carries an ignition verdict; a missing
            // field normalizes to Off, matching the backend contract.
            update.ignition = Some(IgnitionState::normalize(record.get("ignition_status")));
            Some(update)
        })
        .collect()
}

fn parse_alert_batch(data: Option<&Value>) -> Vec<Alert> {
    records_of(data)
        .into_iter()
        .enumerate()
        .map(|(index, record)| parse_alert(record, index))
        .collect()
}

/// Normalizes one alert record across the server's inconsistent shapes.
pub fn parse_alert(record: &Value, index: usize) -> Alert {
    let device_serial = serial_of(record);
    let kind = record
        .get("alert")
        .or_else(|| record.get("alertType"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let message = record
        .get("alertMessage")
        .or_else(|| record.get("message"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(&kind)
        .to_string();

    let raw_time = record
        .get("time")
        .or_else(|| record.get("timestamp"))
        .or_else(|| record.get("timeStamp"));
    let time = raw_time.map(parse_epoch).unwrap_or(0);
    let time_raw = match raw_time {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    let id = match record.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            let serial = device_serial.as_deref().unwrap_or("unknown");
            if time_raw.is_empty() {
                format!("{serial}-{index}")
            } else {
                format!("{serial}-{time_raw}")
            }
        }
    };

    Alert {
        id,
        device_serial,
        kind,
        message,
        time,
        time_raw,
    }
}

/// Defensive epoch-seconds parser: accepts numbers and numeric strings, and
/// falls back to 0 for pre-formatted date strings (the raw value is kept
/// separately for display).
pub fn parse_epoch(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// Defensive number parser: accepts numbers and numeric strings.
pub fn number_of(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Speed parser: `number_of` with negative wire values clamped to zero, since
/// speed is non-negative everywhere past this boundary.
pub fn speed_of(value: Option<&Value>) -> Option<f64> {
    number_of(value).map(|speed| speed.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ignition_truth_table() {
        let on = [json!(1), json!("1"), json!("On"), json!("ON"), json!("true"), json!("Yes"), json!(" on ")];
        for v in &on {
            assert_eq!(IgnitionState::normalize(Some(v)), IgnitionState::On, "input: {v}");
        }
        let off = [json!(0), json!("0"), json!(null), json!("weird"), json!(""), json!(2)];
        for v in &off {
            assert_eq!(IgnitionState::normalize(Some(v)), IgnitionState::Off, "input: {v}");
        }
        assert_eq!(IgnitionState::normalize(None), IgnitionState::Off);
    }

    #[test]
    fn motion_tracks_speed() {
        let mut v = Vehicle::new("1", "BMW X3", "CA 1234", "ABC1");
        assert_eq!(v.motion(), MotionStatus::Parked);
        v.speed = 42.0;
        assert_eq!(v.motion(), MotionStatus::Moving);
        v.speed = 0.0;
        assert_eq!(v.motion(), MotionStatus::Parked);
    }

    #[test]
    fn classifies_speed_frame() {
        let frame = classify_frame(r#"{"type":"speed_update","data":[{"device_serial":"ABC1","speed":42}]}"#).unwrap();
        match frame {
            InboundFrame::Speed(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].device_serial, "ABC1");
                assert_eq!(updates[0].speed, Some(42.0));
                assert_eq!(updates[0].ignition, None);
            }
            other => panic!("expected speed frame, got {other:?}"),
        }
    }

    #[test]
    fn gps_frame_carries_position_and_speed() {
        let frame = classify_frame(
            r#"{"type":"gps_update","data":[{"device_serial":"ABC1","latitude":-33.9,"longitude":18.4,"speed":"17.5"}]}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Gps(updates) => {
                assert_eq!(updates[0].latitude, Some(-33.9));
                assert_eq!(updates[0].longitude, Some(18.4));
                assert_eq!(updates[0].speed, Some(17.5));
            }
            other => panic!("expected gps frame, got {other:?}"),
        }
    }

    #[test]
    fn negative_wire_speed_clamps_to_zero() {
        let frame = classify_frame(r#"{"type":"speed_update","data":[{"device_serial":"ABC1","speed":-3}]}"#).unwrap();
        match frame {
            InboundFrame::Speed(updates) => assert_eq!(updates[0].speed, Some(0.0)),
            other => panic!("expected speed frame, got {other:?}"),
        }

        let frame = classify_frame(
            r#"{"type":"gps_update","data":[{"device_serial":"ABC1","latitude":-33.9,"longitude":18.4,"speed":"-7.5"}]}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Gps(updates) => {
                // Coordinates stay signed; only speed is clamped.
                assert_eq!(updates[0].latitude, Some(-33.9));
                assert_eq!(updates[0].speed, Some(0.0));
            }
            other => panic!("expected gps frame, got {other:?}"),
        }
    }

    #[test]
    fn malformed_and_unknown_frames_are_distinct_errors() {
        assert!(matches!(classify_frame("{not json"), Err(SyncError::MalformedFrame(_))));
        assert!(matches!(classify_frame(r#"{"data":[]}"#), Err(SyncError::MissingFrameType)));
        assert!(matches!(
            classify_frame(r#"{"type":"weather_update","data":[]}"#),
            Err(SyncError::UnknownFrameType(k)) if k == "weather_update"
        ));
    }

    #[test]
    fn pong_and_bulk_frames_classify() {
        assert_eq!(classify_frame(r#"{"type":"pong"}"#).unwrap(), InboundFrame::Pong);
        assert_eq!(
            classify_frame(r#"{"type":"all_tickets_update","data":[]}"#).unwrap(),
            InboundFrame::AllTickets
        );
        assert_eq!(
            classify_frame(r#"{"type":"all_risks_update","data":[]}"#).unwrap(),
            InboundFrame::AllRisks
        );
    }

    #[test]
    fn alert_field_fallback_chains() {
        // alertType fallback for the kind, message fallback to the kind,
        // numeric-string time.
        let alert = parse_alert(
            &json!({"alertType": "Door Open", "device_serial": "X123", "time": "1700000001"}),
            0,
        );
        assert_eq!(alert.kind, "Door Open");
        assert_eq!(alert.message, "Door Open");
        assert_eq!(alert.time, 1_700_000_001);
        assert_eq!(alert.id, "X123-1700000001");

        // Pre-formatted timestamp string: unparseable as epoch, raw kept.
        let alert = parse_alert(
            &json!({"alert": "Ignition On", "timestamp": "2024-06-01 08:30", "device_serial": "X123"}),
            3,
        );
        assert_eq!(alert.time, 0);
        assert_eq!(alert.time_raw, "2024-06-01 08:30");

        // Orphan alert without a serial is still produced.
        let alert = parse_alert(&json!({"alert": "Smash and Grab Detected"}), 7);
        assert_eq!(alert.device_serial, None);
        assert_eq!(alert.id, "unknown-7");
    }

    #[test]
    fn single_alert_object_is_accepted_as_batch() {
        let frame = classify_frame(
            r#"{"type":"alert_update","data":{"device_serial":"ABC1","alert":"Remote Jamming Detected","time":1700000000}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Alerts(alerts) => {
                assert_eq!(alerts.len(), 1);
                assert_eq!(alerts[0].kind, "Remote Jamming Detected");
                assert_eq!(alerts[0].device_serial.as_deref(), Some("ABC1"));
            }
            other => panic!("expected alert frame, got {other:?}"),
        }
    }

    #[test]
    fn register_frame_carries_metadata() {
        let frame: Value = serde_json::from_str(&register_frame("tok-1", Some("ABC1"))).unwrap();
        assert_eq!(frame["type"], "register");
        assert_eq!(frame["token"], "tok-1");
        assert_eq!(frame["device_serial"], "ABC1");
        assert!(frame["platform"].is_string());
        assert!(frame["version"].is_string());
    }
}
