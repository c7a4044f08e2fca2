use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{commands::Bridge, devices::DeviceStore, speech::SpeechPipeline};

pub const INVALID_STATE: &str = "Invalid state. Must be \"on\" or \"off\"";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    #[default]
    Off,
}

impl Switch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Switch::On => "on",
            Switch::Off => "off",
        }
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Switch {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            _ => Err(ValidationError::new("switch").with_message(INVALID_STATE.into())),
        }
    }
}

/// Everything the bridge knows about the attached device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub motor: Switch,
    pub led: Switch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_brightness: Option<u8>,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    Status(DeviceState),
}

impl WsMessage {
    /// Serialises the message into a websocket text frame.
    pub fn encode(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}

fn validate_switch(value: &str) -> Result<(), ValidationError> {
    value.parse::<Switch>().map(|_| ())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MotorRequest {
    #[validate(
        required(message = "Invalid state. Must be \"on\" or \"off\""),
        custom(function = "validate_switch")
    )]
    #[schema(value_type = Switch)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LedRequest {
    #[validate(
        required(message = "Invalid state. Must be \"on\" or \"off\""),
        custom(function = "validate_switch")
    )]
    #[schema(value_type = Switch)]
    pub state: Option<String>,
    #[validate(range(max = 255, message = "Invalid brightness. Must be between 0 and 255"))]
    pub brightness: Option<u16>,
}

/// Reads a validated `state` field.
pub fn parse_state(state: Option<&str>) -> Result<Switch, ValidationError> {
    state
        .ok_or_else(|| ValidationError::new("required").with_message(INVALID_STATE.into()))?
        .parse()
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ControlResponse {
    pub success: bool,
    pub state: Switch,
    /// Whether the device echoed an acknowledgment within the grace period.
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub connected: bool,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SpeechResponse {
    pub success: bool,
    pub transcript: String,
    pub command: Option<Switch>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

pub struct AppState {
    pub store: Arc<DeviceStore>,
    pub bridge: Arc<Bridge>,
    pub speech: SpeechPipeline,
    pub serial_path: String,
    pub max_upload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_state_uses_wire_field_names() {
        let state = DeviceState {
            motor: Switch::On,
            led: Switch::Off,
            led_brightness: Some(128),
            connected: true,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"motor": "on", "led": "off", "ledBrightness": 128, "connected": true})
        );
        assert_eq!(
            serde_json::to_value(DeviceState::default()).unwrap(),
            json!({"motor": "off", "led": "off", "connected": false})
        );
    }

    #[test]
    fn status_envelope_wraps_state() {
        let msg = WsMessage::Status(DeviceState::default());
        let frame = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["connected"], false);
    }

    #[test]
    fn motor_request_validation() {
        let ok = MotorRequest { state: Some("on".into()) };
        assert!(ok.validate().is_ok());

        let missing = MotorRequest { state: None };
        assert!(missing.validate().is_err());

        let bogus = MotorRequest { state: Some("ON".into()) };
        assert!(bogus.validate().is_err());
    }

    #[test]
    fn led_brightness_is_range_checked() {
        let dim = LedRequest { state: Some("on".into()), brightness: Some(40) };
        assert!(dim.validate().is_ok());

        let too_bright = LedRequest { state: Some("on".into()), brightness: Some(300) };
        assert!(too_bright.validate().is_err());
    }

    #[test]
    fn parse_state_rejects_unknown_values() {
        assert_eq!(parse_state(Some("off")).unwrap(), Switch::Off);
        assert!(parse_state(Some("maybe")).is_err());
        assert!(parse_state(None).is_err());
    }
}
