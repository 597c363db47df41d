//! APRS payload codec
//!
//! An APRS payload is the information field of a UI frame with PID 0xF0;
//! its first byte is a data-type identifier (APRS 1.0.1 page 17). This
//! module decodes the identifier and the message wire format
//! `:AAAAAAAAA:TEXT[{MSGID[}ACKID]]` along with `ack`/`rej` responses and
//! the APRS 1.1 reply-ack extension. Position, status and MIC-E payloads
//! are handled by [`crate::position`] and [`crate::mic_e`].

use std::fmt;
use std::str::FromStr;

use crate::callsign::Callsign;
use crate::error::AprsError;
use crate::mic_e::MicEReport;
use crate::position::{PositionReport, StatusReport};

/// APRS data-type identifiers, less unused and reserved codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AprsDataType {
    MicEBeta0,
    MicEOldBeta0,
    Position,
    PeetBrosWx1,
    RawGprsUlt2k,
    AgreloDfjr,
    MicEOld,
    Item,
    PeetBrosWx2,
    TestData,
    PositionTimestamp,
    Message,
    Object,
    StationCapability,
    PositionMessaging,
    Status,
    Query,
    PositionTimestampMessaging,
    Telemetry,
    Maidenhead,
    Weather,
    MicE,
    UserDefined,
    ThirdParty,
}

impl AprsDataType {
    /// Classify the first byte of a payload
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x1C => Some(Self::MicEBeta0),
            0x1D => Some(Self::MicEOldBeta0),
            b'!' => Some(Self::Position),
            b'#' => Some(Self::PeetBrosWx1),
            b'$' => Some(Self::RawGprsUlt2k),
            b'%' => Some(Self::AgreloDfjr),
            b'\'' => Some(Self::MicEOld),
            b')' => Some(Self::Item),
            b'*' => Some(Self::PeetBrosWx2),
            b',' => Some(Self::TestData),
            b'/' => Some(Self::PositionTimestamp),
            b':' => Some(Self::Message),
            b';' => Some(Self::Object),
            b'<' => Some(Self::StationCapability),
            b'=' => Some(Self::PositionMessaging),
            b'>' => Some(Self::Status),
            b'?' => Some(Self::Query),
            b'@' => Some(Self::PositionTimestampMessaging),
            b'T' => Some(Self::Telemetry),
            b'[' => Some(Self::Maidenhead),
            b'_' => Some(Self::Weather),
            b'`' => Some(Self::MicE),
            b'{' => Some(Self::UserDefined),
            b'}' => Some(Self::ThirdParty),
            _ => None,
        }
    }
}

/// Reply-ack field of an outgoing or incoming message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReplyAck {
    /// No reply-ack field
    #[default]
    None,
    /// Trailing `}`: the sender understands reply-ack
    Capable,
    /// `}MSGID`: this message also acknowledges MSGID
    Replying(String),
}

/// A decoded APRS message payload
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AprsMessage {
    pub addressee: Callsign,
    pub text: String,
    pub msgid: Option<String>,
    pub replyack: ReplyAck,
}

impl AprsMessage {
    /// Encode to `:AAAAAAAAA:TEXT[{MSGID[}[ACKID]]]`
    ///
    /// `}` is only emitted when reply-ack was requested. Text is capped at
    /// the 67 characters the specification allows.
    pub fn encode(&self) -> Result<Vec<u8>, AprsError> {
        let text: String = self.text.chars().take(67).collect();
        let mut out = format!(":{:<9}:{}", self.addressee.to_string(), text);
        if let Some(msgid) = &self.msgid {
            validate_msgid(msgid)?;
            out.push('{');
            out.push_str(msgid);
            match &self.replyack {
                ReplyAck::None => {}
                ReplyAck::Capable => out.push('}'),
                ReplyAck::Replying(ackid) => {
                    validate_msgid(ackid)?;
                    out.push('}');
                    out.push_str(ackid);
                }
            }
        }
        Ok(out.into_bytes())
    }
}

impl fmt::Display for AprsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msgid {
            Some(msgid) => write!(f, "{}: {} {{{}}}", self.addressee, self.text, msgid),
            None => write!(f, "{}: {}", self.addressee, self.text),
        }
    }
}

/// An `ackN` response payload
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AprsAck {
    pub addressee: Callsign,
    pub msgid: String,
    /// Message id this ack additionally acknowledges (reply-ack suffix)
    pub replyack: Option<String>,
}

impl AprsAck {
    pub fn encode(&self) -> Result<Vec<u8>, AprsError> {
        encode_ackrej("ack", &self.addressee, &self.msgid, self.replyack.as_deref())
    }
}

/// A `rejN` response payload
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AprsReject {
    pub addressee: Callsign,
    pub msgid: String,
    pub replyack: Option<String>,
}

impl AprsReject {
    pub fn encode(&self) -> Result<Vec<u8>, AprsError> {
        encode_ackrej("rej", &self.addressee, &self.msgid, self.replyack.as_deref())
    }
}

fn validate_msgid(msgid: &str) -> Result<(), AprsError> {
    if msgid.is_empty() || msgid.len() > 5 || !msgid.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AprsError::MalformedPayload(format!(
            "invalid message id {:?}",
            msgid
        )));
    }
    Ok(())
}

fn encode_ackrej(
    verb: &str,
    addressee: &Callsign,
    msgid: &str,
    replyack: Option<&str>,
) -> Result<Vec<u8>, AprsError> {
    validate_msgid(msgid)?;
    let mut out = format!(":{:<9}:{}{}", addressee.to_string(), verb, msgid);
    if let Some(ackid) = replyack {
        validate_msgid(ackid)?;
        out.push('}');
        out.push_str(ackid);
    }
    Ok(out.into_bytes())
}

/// A decoded APRS payload
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AprsPayload {
    Message(AprsMessage),
    Ack(AprsAck),
    Reject(AprsReject),
    Position(PositionReport),
    Status(StatusReport),
    MicE(MicEReport),
    /// Recognized-but-unparsed or unknown data type; payload kept verbatim
    Other {
        data_type: Option<AprsDataType>,
        data: Vec<u8>,
    },
}

impl AprsPayload {
    /// Decode a UI payload. The destination address is needed for MIC-E,
    /// which encodes half the position there.
    ///
    /// Data types without a structured decoder come back as
    /// [`AprsPayload::Other`]; a payload that claims a structured type but
    /// fails its grammar is an error, which callers are expected to log and
    /// pass through raw.
    pub fn decode(destination: &Callsign, payload: &[u8]) -> Result<Self, AprsError> {
        let Some(&first) = payload.first() else {
            return Ok(Self::Other {
                data_type: None,
                data: Vec::new(),
            });
        };
        let data_type = AprsDataType::from_byte(first);

        match data_type {
            Some(AprsDataType::Message) => decode_message(payload),
            Some(
                AprsDataType::Position
                | AprsDataType::PositionMessaging
                | AprsDataType::PositionTimestamp
                | AprsDataType::PositionTimestampMessaging,
            ) => Ok(Self::Position(PositionReport::decode(payload)?)),
            Some(AprsDataType::Status) => Ok(Self::Status(StatusReport::decode(payload)?)),
            Some(
                AprsDataType::MicE
                | AprsDataType::MicEOld
                | AprsDataType::MicEBeta0
                | AprsDataType::MicEOldBeta0,
            ) => Ok(Self::MicE(MicEReport::decode(destination, payload)?)),
            other => Ok(Self::Other {
                data_type: other,
                data: payload.to_vec(),
            }),
        }
    }
}

fn decode_message(payload: &[u8]) -> Result<AprsPayload, AprsError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| AprsError::MalformedPayload("message is not ASCII".into()))?;

    // ":AAAAAAAAA:" header: addressee is exactly nine octets, space padded
    let bytes = text.as_bytes();
    if bytes.len() < 11 || bytes[0] != b':' || bytes[10] != b':' {
        return Err(AprsError::MalformedPayload(
            "missing addressee delimiter".into(),
        ));
    }
    let (addressee_field, body) = match (text.get(1..10), text.get(11..)) {
        (Some(addressee), Some(body)) => (addressee, body),
        _ => {
            return Err(AprsError::MalformedPayload(
                "addressee is not ASCII".into(),
            ))
        }
    };
    let addressee = Callsign::from_str(addressee_field.trim_end())
        .map_err(|e| AprsError::MalformedPayload(format!("bad addressee: {}", e)))?;

    let body = body.trim_end_matches('\r');

    if let Some((verb, rest)) = split_ackrej(body) {
        let (msgid, replyack) = match rest.split_once('}') {
            Some((msgid, ackid)) if is_msgid(msgid) && is_msgid(ackid) => {
                (msgid.to_string(), Some(ackid.to_string()))
            }
            None if is_msgid(rest) => (rest.to_string(), None),
            _ => {
                // Not the ack/rej grammar after all; fall through to a
                // plain message below
                return Ok(AprsPayload::Message(parse_message_body(addressee, body)));
            }
        };
        return Ok(match verb {
            "ack" => AprsPayload::Ack(AprsAck {
                addressee,
                msgid,
                replyack,
            }),
            _ => AprsPayload::Reject(AprsReject {
                addressee,
                msgid,
                replyack,
            }),
        });
    }

    Ok(AprsPayload::Message(parse_message_body(addressee, body)))
}

fn split_ackrej(body: &str) -> Option<(&str, &str)> {
    let verb = body.get(..3)?;
    if verb == "ack" || verb == "rej" {
        Some((verb, &body[3..]))
    } else {
        None
    }
}

fn is_msgid(s: &str) -> bool {
    !s.is_empty() && s.len() <= 5 && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Split `TEXT[{MSGID[}[ACKID]]]`. An unparseable brace suffix is treated
/// as ordinary text, matching the reference behaviour.
fn parse_message_body(addressee: Callsign, body: &str) -> AprsMessage {
    if let Some((text, brace)) = body.rsplit_once('{') {
        let (msgid, replyack) = match brace.split_once('}') {
            Some((msgid, "")) => (msgid, ReplyAck::Capable),
            Some((msgid, ackid)) if is_msgid(ackid) => (msgid, ReplyAck::Replying(ackid.into())),
            Some(_) => ("", ReplyAck::None),
            None => (brace, ReplyAck::None),
        };
        if is_msgid(msgid) {
            return AprsMessage {
                addressee,
                text: text.to_string(),
                msgid: Some(msgid.to_string()),
                replyack,
            };
        }
    }

    AprsMessage {
        addressee,
        text: body.to_string(),
        msgid: None,
        replyack: ReplyAck::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &[u8]) -> AprsPayload {
        let dest: Callsign = "APZAIO".parse().unwrap();
        AprsPayload::decode(&dest, payload).unwrap()
    }

    #[test]
    fn test_plain_message() {
        let AprsPayload::Message(msg) = decode(b":VK4MSL-9 :Hello there") else {
            panic!("expected message");
        };
        assert_eq!(msg.addressee, "VK4MSL-9".parse().unwrap());
        assert_eq!(msg.text, "Hello there");
        assert_eq!(msg.msgid, None);
        assert_eq!(msg.replyack, ReplyAck::None);
    }

    #[test]
    fn test_message_with_msgid() {
        let AprsPayload::Message(msg) = decode(b":VK4MSL-9 :Hi{23") else {
            panic!("expected message");
        };
        assert_eq!(msg.text, "Hi");
        assert_eq!(msg.msgid.as_deref(), Some("23"));
        assert_eq!(msg.replyack, ReplyAck::None);
    }

    #[test]
    fn test_message_replyack_capable() {
        let AprsPayload::Message(msg) = decode(b":VK4MSL-9 :Hi{23}") else {
            panic!("expected message");
        };
        assert_eq!(msg.msgid.as_deref(), Some("23"));
        assert_eq!(msg.replyack, ReplyAck::Capable);
    }

    #[test]
    fn test_message_replyack_with_id() {
        let AprsPayload::Message(msg) = decode(b":VK4MSL-9 :Hi{23}45") else {
            panic!("expected message");
        };
        assert_eq!(msg.msgid.as_deref(), Some("23"));
        assert_eq!(msg.replyack, ReplyAck::Replying("45".into()));
    }

    #[test]
    fn test_ack_and_rej() {
        let AprsPayload::Ack(ack) = decode(b":VK4MSL-9 :ack23") else {
            panic!("expected ack");
        };
        assert_eq!(ack.msgid, "23");
        assert_eq!(ack.replyack, None);

        let AprsPayload::Reject(rej) = decode(b":VK4MSL-9 :rej23}45") else {
            panic!("expected rej");
        };
        assert_eq!(rej.msgid, "23");
        assert_eq!(rej.replyack.as_deref(), Some("45"));
    }

    #[test]
    fn test_ack_prefix_text_is_a_message() {
        // "acknowledged" is not an ack payload
        let AprsPayload::Message(msg) = decode(b":VK4MSL-9 :acknowledged") else {
            panic!("expected message");
        };
        assert_eq!(msg.text, "acknowledged");
    }

    #[test]
    fn test_message_encode_round_trip() {
        let msg = AprsMessage {
            addressee: "VK4MSL-9".parse().unwrap(),
            text: "Testing 1 2 3".into(),
            msgid: Some("42".into()),
            replyack: ReplyAck::None,
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded, b":VK4MSL-9 :Testing 1 2 3{42");
        assert_eq!(decode(&encoded), AprsPayload::Message(msg));
    }

    #[test]
    fn test_encode_never_emits_brace_without_replyack() {
        let msg = AprsMessage {
            addressee: "VK4MSL".parse().unwrap(),
            text: "x".into(),
            msgid: Some("1".into()),
            replyack: ReplyAck::None,
        };
        assert!(!msg.encode().unwrap().contains(&b'}'));

        let capable = AprsMessage {
            replyack: ReplyAck::Capable,
            ..msg
        };
        assert_eq!(capable.encode().unwrap(), b":VK4MSL   :x{1}");
    }

    #[test]
    fn test_ack_encode() {
        let ack = AprsAck {
            addressee: "VK4ABC".parse().unwrap(),
            msgid: "7".into(),
            replyack: None,
        };
        assert_eq!(ack.encode().unwrap(), b":VK4ABC   :ack7");
    }

    #[test]
    fn test_msgid_too_long_rejected() {
        let msg = AprsMessage {
            addressee: "VK4MSL".parse().unwrap(),
            text: "x".into(),
            msgid: Some("123456".into()),
            replyack: ReplyAck::None,
        };
        assert!(msg.encode().is_err());
    }

    #[test]
    fn test_malformed_addressee() {
        let dest: Callsign = "APZAIO".parse().unwrap();
        assert!(AprsPayload::decode(&dest, b":SHORT:oops").is_err());
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let AprsPayload::Other { data_type, data } = decode(b"_12345678c000s000") else {
            panic!("expected passthrough");
        };
        assert_eq!(data_type, Some(AprsDataType::Weather));
        assert_eq!(data, b"_12345678c000s000");
    }

    #[test]
    fn test_data_type_classification() {
        assert_eq!(AprsDataType::from_byte(b':'), Some(AprsDataType::Message));
        assert_eq!(AprsDataType::from_byte(b'`'), Some(AprsDataType::MicE));
        assert_eq!(AprsDataType::from_byte(b'T'), Some(AprsDataType::Telemetry));
        assert_eq!(AprsDataType::from_byte(b'('), None);
    }
}
