//! Per-channel message schemas and the transport envelope.
//!
//! Two logical channels exist: time synchronization (get/send/add) and AFK
//! propagation (true/false). The opcode strings and field orders here are
//! the protocol contract; every node in a deployment must agree on them.

use crate::codec::{self, CodecError, WireReader, WireValue};
use crate::id::PlayerId;

/// Channel carrying time queries, responses, and forwarded additions.
pub const CHANNEL_TIME: &str = "playtime:time";
/// Channel carrying AFK/resume transitions.
pub const CHANNEL_AFK: &str = "playtime:afk";

const OP_GET: &str = "get";
const OP_SEND: &str = "send";
const OP_ADD: &str = "add";
const OP_AFK: &str = "true";
const OP_RESUME: &str = "false";

/// Durations travel as i64 on the wire; stored values are u64 seconds.
fn seconds_to_long(seconds: u64) -> i64 {
    seconds.min(i64::MAX as u64) as i64
}

fn long_to_seconds(raw: i64) -> u64 {
    raw.max(0) as u64
}

/// Messages on [`CHANNEL_TIME`].
///
/// Schema per opcode: `Get` = identity, "get"; `Send` = identity, "send",
/// long; `Add` = identity, "add", long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeMessage {
    /// Dependent node asks the authoritative node for a player's total.
    Get { player: PlayerId },
    /// Authoritative node answers a `Get` with the current total.
    Send { player: PlayerId, seconds: u64 },
    /// Dependent node forwards an addition; fire-and-forget, no reply.
    Add { player: PlayerId, seconds: u64 },
}

impl TimeMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            TimeMessage::Get { player } => codec::encode(&[
                WireValue::Id(*player),
                WireValue::Text(OP_GET.to_string()),
            ]),
            TimeMessage::Send { player, seconds } => codec::encode(&[
                WireValue::Id(*player),
                WireValue::Text(OP_SEND.to_string()),
                WireValue::Long(seconds_to_long(*seconds)),
            ]),
            TimeMessage::Add { player, seconds } => codec::encode(&[
                WireValue::Id(*player),
                WireValue::Text(OP_ADD.to_string()),
                WireValue::Long(seconds_to_long(*seconds)),
            ]),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(buf);
        let player = reader.read_id()?;
        let opcode = reader.read_text()?;
        match opcode.as_str() {
            OP_GET => Ok(TimeMessage::Get { player }),
            OP_SEND => Ok(TimeMessage::Send {
                player,
                seconds: long_to_seconds(reader.read_long()?),
            }),
            OP_ADD => Ok(TimeMessage::Add {
                player,
                seconds: long_to_seconds(reader.read_long()?),
            }),
            _ => Err(CodecError::UnknownOpcode(opcode)),
        }
    }
}

/// Messages on [`CHANNEL_AFK`].
///
/// Schema per opcode: `Afk` = identity, "true", long; `Resume` = identity,
/// "false". The idle duration on `Afk` is the already-elapsed window the
/// receiver should retroactively exclude from the player's counted time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfkMessage {
    Afk { player: PlayerId, idle_seconds: u64 },
    Resume { player: PlayerId },
}

impl AfkMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            AfkMessage::Afk {
                player,
                idle_seconds,
            } => codec::encode(&[
                WireValue::Id(*player),
                WireValue::Text(OP_AFK.to_string()),
                WireValue::Long(seconds_to_long(*idle_seconds)),
            ]),
            AfkMessage::Resume { player } => codec::encode(&[
                WireValue::Id(*player),
                WireValue::Text(OP_RESUME.to_string()),
            ]),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(buf);
        let player = reader.read_id()?;
        let opcode = reader.read_text()?;
        match opcode.as_str() {
            OP_AFK => Ok(AfkMessage::Afk {
                player,
                idle_seconds: long_to_seconds(reader.read_long()?),
            }),
            OP_RESUME => Ok(AfkMessage::Resume { player }),
            _ => Err(CodecError::UnknownOpcode(opcode)),
        }
    }
}

/// Transport frame: channel identifier followed by the raw channel payload.
///
/// This is the unit handed to the datagram transport. The channel name uses
/// the codec text rule; the payload is passed through untouched so each
/// channel keeps full control over its own schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Envelope {
            channel: channel.into(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(2 + self.channel.len() + self.payload.len());
        codec::write_text(&mut buf, &self.channel)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(buf);
        let channel = reader.read_text()?;
        Ok(Envelope {
            channel,
            payload: reader.rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> PlayerId {
        PlayerId::from_parts(0x1111, 0x2222)
    }

    #[test]
    fn test_time_message_round_trips() {
        let messages = vec![
            TimeMessage::Get { player: player() },
            TimeMessage::Send {
                player: player(),
                seconds: 42,
            },
            TimeMessage::Add {
                player: player(),
                seconds: 500,
            },
        ];

        for message in messages {
            let buf = message.encode().unwrap();
            assert_eq!(TimeMessage::decode(&buf).unwrap(), message);
        }
    }

    #[test]
    fn test_get_round_trip_is_byte_identical() {
        let message = TimeMessage::Get { player: player() };
        let first = message.encode().unwrap();
        let reencoded = TimeMessage::decode(&first).unwrap().encode().unwrap();
        assert_eq!(first, reencoded);
    }

    #[test]
    fn test_unknown_time_opcode_is_rejected() {
        let buf = codec::encode(&[
            WireValue::Id(player()),
            WireValue::Text("reset".to_string()),
        ])
        .unwrap();
        assert_eq!(
            TimeMessage::decode(&buf),
            Err(CodecError::UnknownOpcode("reset".to_string()))
        );
    }

    #[test]
    fn test_truncated_time_message_is_rejected() {
        let buf = TimeMessage::Send {
            player: player(),
            seconds: 9,
        }
        .encode()
        .unwrap();
        assert!(matches!(
            TimeMessage::decode(&buf[..buf.len() - 3]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_afk_message_round_trips() {
        let afk = AfkMessage::Afk {
            player: player(),
            idle_seconds: 7,
        };
        let resume = AfkMessage::Resume { player: player() };

        assert_eq!(AfkMessage::decode(&afk.encode().unwrap()).unwrap(), afk);
        assert_eq!(
            AfkMessage::decode(&resume.encode().unwrap()).unwrap(),
            resume
        );
    }

    #[test]
    fn test_negative_wire_duration_clamps_to_zero() {
        let buf = codec::encode(&[
            WireValue::Id(player()),
            WireValue::Text("send".to_string()),
            WireValue::Long(-30),
        ])
        .unwrap();
        assert_eq!(
            TimeMessage::decode(&buf).unwrap(),
            TimeMessage::Send {
                player: player(),
                seconds: 0
            }
        );
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::new(CHANNEL_TIME, vec![1, 2, 3]);
        let buf = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&buf).unwrap(), envelope);
    }

    #[test]
    fn test_envelope_with_empty_payload() {
        let envelope = Envelope::new(CHANNEL_AFK, Vec::new());
        let buf = envelope.encode().unwrap();
        let decoded = Envelope::decode(&buf).unwrap();
        assert_eq!(decoded.channel, CHANNEL_AFK);
        assert!(decoded.payload.is_empty());
    }
}
