//! Sync Protocol Messages
//!
//! Packets are small JSON datagrams modeled on OSC: an addressed message
//! carries typed arguments, a bundle carries a time tag and nested packets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Timestamp;
use crate::election::NodeId;

/// Election announcements
pub const ELECT_ADDRESS: &str = "/elect";

/// Master position broadcasts
pub const SYNC_ADDRESS: &str = "/sync";

/// Largest `/sync` time tag magnitude, about 36,000 years either side of
/// the epoch. Keeps clock arithmetic on accepted tags clear of overflow.
const MAX_TIME_TAG_MICROS: i64 = 1 << 60;

/// Errors decoding a datagram
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed packet: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors interpreting the arguments of a known address
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("{address}: expected {expected} arguments, got {actual}")]
    ArgCount {
        address: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{address}: argument {index} has the wrong type")]
    ArgType { address: &'static str, index: usize },

    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("{address}: time tag {time} out of range")]
    TimeOutOfRange {
        address: &'static str,
        time: Timestamp,
    },
}

/// A typed message argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Arg {
    #[serde(rename = "s")]
    Str(String),
    #[serde(rename = "f")]
    Float(f64),
    /// Time tag in master-clock terms
    #[serde(rename = "t")]
    Time(Timestamp),
}

/// An addressed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}

/// A group of packets that must not be delivered before `time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub time: Timestamp,
    pub packets: Vec<Packet>,
}

/// Anything that can travel in a datagram.
///
/// A packet with an address is a message, one without is a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Packet::Message(message)
    }
}

impl From<Bundle> for Packet {
    fn from(bundle: Bundle) -> Self {
        Packet::Bundle(bundle)
    }
}

/// `/elect`: a node announcing its candidacy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectAnnouncement {
    pub id: NodeId,
}

impl From<ElectAnnouncement> for Message {
    fn from(announcement: ElectAnnouncement) -> Self {
        Message::new(ELECT_ADDRESS, vec![Arg::Str(announcement.id.to_string())])
    }
}

impl TryFrom<&[Arg]> for ElectAnnouncement {
    type Error = ProtocolError;

    fn try_from(args: &[Arg]) -> Result<Self, Self::Error> {
        expect_count(ELECT_ADDRESS, args, 1)?;
        match &args[0] {
            Arg::Str(id) => Ok(Self { id: id.parse()? }),
            _ => Err(ProtocolError::ArgType {
                address: ELECT_ADDRESS,
                index: 0,
            }),
        }
    }
}

/// `/sync`: the master's playback position at a master-clock instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionBroadcast {
    pub seconds: f64,
    pub time: Timestamp,
}

impl From<PositionBroadcast> for Message {
    fn from(broadcast: PositionBroadcast) -> Self {
        Message::new(
            SYNC_ADDRESS,
            vec![Arg::Float(broadcast.seconds), Arg::Time(broadcast.time)],
        )
    }
}

impl TryFrom<&[Arg]> for PositionBroadcast {
    type Error = ProtocolError;

    fn try_from(args: &[Arg]) -> Result<Self, Self::Error> {
        expect_count(SYNC_ADDRESS, args, 2)?;
        let seconds = match &args[0] {
            Arg::Float(seconds) => *seconds,
            _ => {
                return Err(ProtocolError::ArgType {
                    address: SYNC_ADDRESS,
                    index: 0,
                })
            }
        };
        let time = match &args[1] {
            Arg::Time(time) => *time,
            _ => {
                return Err(ProtocolError::ArgType {
                    address: SYNC_ADDRESS,
                    index: 1,
                })
            }
        };
        if time.as_micros().unsigned_abs() > MAX_TIME_TAG_MICROS as u64 {
            return Err(ProtocolError::TimeOutOfRange {
                address: SYNC_ADDRESS,
                time,
            });
        }
        Ok(Self { seconds, time })
    }
}

fn expect_count(address: &'static str, args: &[Arg], expected: usize) -> Result<(), ProtocolError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::ArgCount {
            address,
            expected,
            actual: args.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let message = Message::from(PositionBroadcast {
            seconds: 12.5,
            time: Timestamp::from_micros(1_700_000_000_000_000),
        });
        let json = serde_json::to_value(Packet::from(message)).unwrap();

        assert_eq!(json["address"], "/sync");
        assert_eq!(json["args"][0]["type"], "f");
        assert_eq!(json["args"][0]["value"], 12.5);
        assert_eq!(json["args"][1]["type"], "t");
        assert_eq!(json["args"][1]["value"], 1_700_000_000_000_000_i64);
    }

    #[test]
    fn test_decode_distinguishes_bundles_from_messages() {
        let raw = br#"{
            "time": 42,
            "packets": [
                {"address": "/elect", "args": [{"type": "s", "value": "00000000000000000000000000000001"}]},
                {"time": 43, "packets": []}
            ]
        }"#;

        match Packet::decode(raw).unwrap() {
            Packet::Bundle(bundle) => {
                assert_eq!(bundle.time, Timestamp::from_micros(42));
                assert!(matches!(&bundle.packets[0], Packet::Message(m) if m.address == ELECT_ADDRESS));
                assert!(matches!(&bundle.packets[1], Packet::Bundle(b) if b.packets.is_empty()));
            }
            other => panic!("expected bundle, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Packet::decode(b"not json").is_err());
        assert!(Packet::decode(br#"{"args": []}"#).is_err());
    }

    #[test]
    fn test_integer_float_argument_is_accepted() {
        let raw = br#"{"address": "/sync", "args": [{"type": "f", "value": 3}, {"type": "t", "value": 7}]}"#;
        let Packet::Message(message) = Packet::decode(raw).unwrap() else {
            panic!("expected message");
        };
        let broadcast = PositionBroadcast::try_from(message.args.as_slice()).unwrap();
        assert_eq!(broadcast.seconds, 3.0);
        assert_eq!(broadcast.time, Timestamp::from_micros(7));
    }

    #[test]
    fn test_sync_argument_errors() {
        let too_few = [Arg::Float(1.0)];
        assert_eq!(
            PositionBroadcast::try_from(&too_few[..]),
            Err(ProtocolError::ArgCount {
                address: SYNC_ADDRESS,
                expected: 2,
                actual: 1
            })
        );

        let swapped = [Arg::Time(Timestamp::from_micros(1)), Arg::Float(1.0)];
        assert_eq!(
            PositionBroadcast::try_from(&swapped[..]),
            Err(ProtocolError::ArgType {
                address: SYNC_ADDRESS,
                index: 0
            })
        );
    }

    #[test]
    fn test_sync_rejects_extreme_time_tag() {
        for micros in [i64::MIN, i64::MAX, (1 << 60) + 1] {
            let args = [Arg::Float(10.0), Arg::Time(Timestamp::from_micros(micros))];
            assert!(matches!(
                PositionBroadcast::try_from(&args[..]),
                Err(ProtocolError::TimeOutOfRange { .. })
            ));
        }

        let args = [Arg::Float(10.0), Arg::Time(Timestamp::from_micros(-(1 << 60)))];
        assert!(PositionBroadcast::try_from(&args[..]).is_ok());
    }

    #[test]
    fn test_elect_rejects_bad_identity() {
        let args = [Arg::Str("not-hex".to_string())];
        assert!(matches!(
            ElectAnnouncement::try_from(&args[..]),
            Err(ProtocolError::InvalidNodeId(_))
        ));
    }
}
