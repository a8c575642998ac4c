//! Opcode-tagged message envelope for reader/scanner links
//!
//! One JSON object per WebSocket text frame, tagged by `opcode`. The
//! scanner process answers `is_connected` with a bare `{connected: ...}`
//! object (no opcode); `Message::parse` folds that into `connection_status`.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Detailed hardware-link status reported by a reader process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetailedStatus {
    Connected,
    Disconnected,
    NoResponse,
    NetworkUnreachable,
}

impl DetailedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailedStatus::Connected => "connected",
            DetailedStatus::Disconnected => "disconnected",
            DetailedStatus::NoResponse => "no-response",
            DetailedStatus::NetworkUnreachable => "network-unreachable",
        }
    }
}

/// A selectable device as reported by `available_devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub text: String,
}

/// Wire message, one per frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum Message {
    /// Poll hardware-link status
    IsConnected,
    /// Request hardware connection on a serial port
    Open {
        port: String,
        raceid: i64,
        loggingpath: String,
    },
    /// Request hardware disconnection
    Close,
    /// Notify the process that the active race changed
    Raceid { raceid: i64 },
    /// Push the full parameter set
    Params {
        port: String,
        raceid: i64,
        outputdir: String,
        logdir: String,
    },
    /// Keepalive
    Ping,
    /// Keepalive reply, consumed by the link supervisor
    Pong,
    /// Request available serial/Bluetooth ports
    GetComports { bluetoothdevices: Vec<String> },
    /// Device-type to device-list mapping
    AvailableDevices {
        devices: FxHashMap<String, Vec<DeviceEntry>>,
    },
    /// Hardware-link status reply
    ConnectionStatus {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detailedstatus: Option<DetailedStatus>,
    },
}

/// Bare `is_connected` reply shape sent without an opcode
#[derive(Debug, Deserialize)]
struct BareStatusReply {
    connected: bool,
    #[serde(default)]
    detailedstatus: Option<DetailedStatus>,
}

/// Frame decode failure
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("unrecognized opcode: {0}")]
    UnknownOpcode(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Message {
    /// Opcode string as it appears on the wire
    pub fn opcode(&self) -> &'static str {
        match self {
            Message::IsConnected => "is_connected",
            Message::Open { .. } => "open",
            Message::Close => "close",
            Message::Raceid { .. } => "raceid",
            Message::Params { .. } => "params",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::GetComports { .. } => "get_comports",
            Message::AvailableDevices { .. } => "available_devices",
            Message::ConnectionStatus { .. } => "connection_status",
        }
    }

    /// Parse one frame.
    ///
    /// Tagged decode first; a bare `{connected: ...}` object is accepted as
    /// a `connection_status` reply. Unknown opcodes are reported with the
    /// offending tag so the caller can log and drop the frame.
    pub fn parse(raw: &str) -> Result<Message, MessageError> {
        match serde_json::from_str::<Message>(raw) {
            Ok(msg) => Ok(msg),
            Err(tagged_err) => {
                if let Ok(bare) = serde_json::from_str::<BareStatusReply>(raw) {
                    return Ok(Message::ConnectionStatus {
                        connected: bare.connected,
                        detailedstatus: bare.detailedstatus,
                    });
                }
                // Pull the opcode out of the raw object so the log line can
                // name what was rejected.
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
                    if let Some(opcode) = value.get("opcode").and_then(|v| v.as_str()) {
                        return Err(MessageError::UnknownOpcode(opcode.to_string()));
                    }
                }
                Err(MessageError::Malformed(tagged_err))
            }
        }
    }

    /// Serialize to the wire form
    pub fn encode(&self) -> String {
        // The envelope contains only JSON-representable fields
        serde_json::to_string(self).expect("message serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_connected() {
        let msg = Message::IsConnected;
        assert_eq!(msg.encode(), r#"{"opcode":"is_connected"}"#);
    }

    #[test]
    fn test_parse_open() {
        let msg = Message::parse(
            r#"{"opcode": "open", "port": "COM3", "raceid": 42, "loggingpath": ""}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::Open {
                port: "COM3".to_string(),
                raceid: 42,
                loggingpath: String::new(),
            }
        );
        assert_eq!(msg.opcode(), "open");
    }

    #[test]
    fn test_parse_pong() {
        let msg = Message::parse(r#"{"opcode": "pong"}"#).unwrap();
        assert_eq!(msg, Message::Pong);
    }

    #[test]
    fn test_parse_connection_status() {
        let msg = Message::parse(
            r#"{"opcode": "connection_status", "connected": false, "detailedstatus": "no-response"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::ConnectionStatus {
                connected: false,
                detailedstatus: Some(DetailedStatus::NoResponse),
            }
        );
    }

    #[test]
    fn test_parse_bare_status_reply() {
        // Scanner process replies without an opcode tag
        let msg = Message::parse(r#"{"connected": true}"#).unwrap();
        assert_eq!(
            msg,
            Message::ConnectionStatus { connected: true, detailedstatus: None }
        );
    }

    #[test]
    fn test_parse_available_devices() {
        let msg = Message::parse(
            r#"{"opcode": "available_devices", "devices": {"comport": [{"id": "COM3", "text": "COM3 - USB Serial"}]}}"#,
        )
        .unwrap();
        match msg {
            Message::AvailableDevices { devices } => {
                assert_eq!(devices["comport"].len(), 1);
                assert_eq!(devices["comport"][0].id, "COM3");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_opcode() {
        let err = Message::parse(r#"{"opcode": "warp_drive"}"#).unwrap_err();
        match err {
            MessageError::UnknownOpcode(op) => assert_eq!(op, "warp_drive"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            Message::parse("not json"),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn test_detailed_status_wire_form() {
        let json = serde_json::to_string(&DetailedStatus::NetworkUnreachable).unwrap();
        assert_eq!(json, r#""network-unreachable""#);
        assert_eq!(DetailedStatus::NoResponse.as_str(), "no-response");
    }
}
