//! Bus wire format: a tagged-union envelope and the `<tag> <json>\n` framing
//! used by both [`crate::bus`] listeners.
//!
//! All messages derive `serde::Serialize`/`Deserialize` with `#[serde(tag =
//! "msg_type")]` so JSON carries an explicit discriminator, the same pattern
//! `certificate::PrimalityCertificate` uses for its proof-method variants.

use serde::{Deserialize, Serialize};

use crate::address::Address;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "msg_type")]
pub enum Message {
    HubConnectInd {
        address: Address,
    },
    ApRegisterReq {
        address: Address,
        auid: String,
        hub_auid: String,
        heartbeat_seconds: u64,
        azimuth_deg: u32,
        hub_lat_deg: f64,
        hub_lon_deg: f64,
    },
    ApRegisterRsp {
        address: Address,
        success: bool,
        registered_at: String,
    },
    RtRegisterReq {
        address: Address,
        auid: String,
        ap_auid: String,
        heartbeat_seconds: u64,
        ap_lat_deg: f64,
        ap_lon_deg: f64,
    },
    RtRegisterRsp {
        address: Address,
        success: bool,
        registered_at: String,
    },
    StartHeartbeatReq {
        address: Address,
    },
    HeartbeatStatsReq {
        address: Address,
        #[serde(default)]
        reset: bool,
    },
    HeartbeatStatsRsp {
        address: Address,
        success: u64,
        failure: u64,
    },
}

impl Message {
    pub fn address(&self) -> &Address {
        match self {
            Message::HubConnectInd { address }
            | Message::ApRegisterReq { address, .. }
            | Message::ApRegisterRsp { address, .. }
            | Message::RtRegisterReq { address, .. }
            | Message::RtRegisterRsp { address, .. }
            | Message::StartHeartbeatReq { address }
            | Message::HeartbeatStatsReq { address, .. }
            | Message::HeartbeatStatsRsp { address, .. } => address,
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            Message::HubConnectInd { .. } => "HUB_CONNECT_IND",
            Message::ApRegisterReq { .. } => "AP_REGISTER_REQ",
            Message::ApRegisterRsp { .. } => "AP_REGISTER_RSP",
            Message::RtRegisterReq { .. } => "RT_REGISTER_REQ",
            Message::RtRegisterRsp { .. } => "RT_REGISTER_RSP",
            Message::StartHeartbeatReq { .. } => "START_HEARTBEAT_REQ",
            Message::HeartbeatStatsReq { .. } => "HEARTBEAT_STATS_REQ",
            Message::HeartbeatStatsRsp { .. } => "HEARTBEAT_STATS_RSP",
        }
    }

    /// Frames the message as `<tag> <json>`, without a trailing newline.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{} {}", self.address().tag(), json))
    }

    /// Parses a `<tag> <json>` frame. The leading tag is redundant with the
    /// envelope's own address and is not round-tripped back out separately;
    /// it exists purely so a transport can filter on it without parsing JSON.
    pub fn decode(frame: &str) -> Result<Message, DecodeError> {
        let (_tag, json) = frame
            .split_once(' ')
            .ok_or_else(|| DecodeError("missing tag separator".into()))?;
        serde_json::from_str(json).map_err(|e| DecodeError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed bus frame: {}", self.0)
    }
}
impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        let addr_hub = Address::hub(0, 0);
        let addr_ap = Address::ap(0, 0, 1);
        let addr_rt = Address::rt(0, 0, 1, 2);
        vec![
            Message::HubConnectInd {
                address: addr_hub.clone(),
            },
            Message::ApRegisterReq {
                address: addr_ap.clone(),
                auid: "T-abc".into(),
                hub_auid: "T-hub".into(),
                heartbeat_seconds: 30,
                azimuth_deg: 90,
                hub_lat_deg: 51.5,
                hub_lon_deg: 0.1,
            },
            Message::ApRegisterRsp {
                address: addr_ap.clone(),
                success: true,
                registered_at: "2026-01-01T00:00:00Z".into(),
            },
            Message::RtRegisterReq {
                address: addr_rt.clone(),
                auid: "T-rt".into(),
                ap_auid: "T-ap".into(),
                heartbeat_seconds: 30,
                ap_lat_deg: 51.5,
                ap_lon_deg: 0.1,
            },
            Message::RtRegisterRsp {
                address: addr_rt.clone(),
                success: false,
                registered_at: "2026-01-01T00:00:00Z".into(),
            },
            Message::StartHeartbeatReq {
                address: addr_ap.clone(),
            },
            Message::HeartbeatStatsReq {
                address: addr_ap.clone(),
                reset: true,
            },
            Message::HeartbeatStatsRsp {
                address: addr_ap,
                success: 10,
                failure: 1,
            },
        ]
    }

    #[test]
    fn encode_decode_round_trips_every_variant() {
        for msg in sample_messages() {
            let frame = msg.encode().unwrap();
            let back = Message::decode(&frame).unwrap();
            assert_eq!(msg, back);
        }
    }

    #[test]
    fn frame_tag_matches_address() {
        let msg = Message::HubConnectInd {
            address: Address::hub(2, 5),
        };
        let frame = msg.encode().unwrap();
        assert!(frame.starts_with("N02H05 "));
    }

    #[test]
    fn decode_rejects_missing_separator() {
        assert!(Message::decode("nospaceatall").is_err());
    }

    #[test]
    fn decode_rejects_unknown_discriminator() {
        let frame = format!("N00 {}", serde_json::json!({"msg_type": "BOGUS", "address": {"net": 0}}));
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn split_on_first_space_preserves_json_with_spaces() {
        let msg = Message::ApRegisterRsp {
            address: Address::ap(0, 0, 0),
            success: true,
            registered_at: "2026-01-01T00:00:00Z".into(),
        };
        let frame = msg.encode().unwrap();
        let (tag, json) = frame.split_once(' ').unwrap();
        assert_eq!(tag, "N00H00A00");
        let back: Message = serde_json::from_str(json).unwrap();
        assert_eq!(back, msg);
    }
}
