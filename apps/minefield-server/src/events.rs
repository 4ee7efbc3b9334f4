use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Fingerprint;
use crate::transport::{ChatRef, MessageId, UserRef};

/// Inbound traffic from the chat platform, as posted to `/updates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Command {
        chat: ChatRef,
        from: UserRef,
        message_id: MessageId,
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A keyboard button was pressed. `message_id` is the keyboard message.
    Tap {
        id: String,
        chat: ChatRef,
        from: UserRef,
        message_id: MessageId,
        data: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Command { .. } => "command",
            InboundEvent::Tap { .. } => "tap",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TapParseError {
    #[error("expected 3 or 4 fields, got {0}")]
    FieldCount(usize),
    #[error("field {0:?} is not a number")]
    NotANumber(String),
    #[error("token {0} is out of range")]
    TokenRange(u64),
}

/// Button payload `"{fingerprint} {row} {col} {token}"`. Keyboards rendered
/// before tokens existed omit the token, which then reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapPayload {
    pub fingerprint: Fingerprint,
    pub row: usize,
    pub col: usize,
    pub token: u8,
}

impl FromStr for TapPayload {
    type Err = TapParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(' ').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(TapParseError::FieldCount(fields.len()));
        }
        let number = |field: &str| -> Result<u64, TapParseError> {
            field
                .parse()
                .map_err(|_| TapParseError::NotANumber(field.to_string()))
        };
        let fingerprint = Fingerprint(number(fields[0])?);
        let row = number(fields[1])? as usize;
        let col = number(fields[2])? as usize;
        let token = match fields.get(3) {
            Some(&field) => number(field)?,
            None => 0,
        };
        if token > 100 {
            return Err(TapParseError::TokenRange(token));
        }
        Ok(Self {
            fingerprint,
            row,
            col,
            token: token as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn parses_current_and_legacy_payloads() {
        assert_eq!(
            "77 1 2 42".parse::<TapPayload>(),
            Ok(TapPayload {
                fingerprint: Fingerprint(77),
                row: 1,
                col: 2,
                token: 42
            })
        );
        assert_eq!("77 1 2".parse::<TapPayload>().map(|p| p.token), Ok(0));
    }

    #[test_timeout::timeout]
    fn rejects_malformed_payloads() {
        assert_eq!(
            "77 1".parse::<TapPayload>(),
            Err(TapParseError::FieldCount(2))
        );
        assert_eq!(
            "77 1 x 3".parse::<TapPayload>(),
            Err(TapParseError::NotANumber("x".into()))
        );
        assert_eq!(
            "77 1 2 101".parse::<TapPayload>(),
            Err(TapParseError::TokenRange(101))
        );
        assert!("77 -1 2 3".parse::<TapPayload>().is_err());
        assert!("dist 1 2".parse::<TapPayload>().is_err());
    }

    #[test_timeout::timeout]
    fn events_decode_from_tagged_json() {
        let raw = r#"{
            "type": "tap",
            "id": "cb-1",
            "chat": {"id": -1001, "kind": "supergroup"},
            "from": {"id": 5, "first_name": "Ada"},
            "message_id": 9,
            "data": "1 0 0 0"
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), "tap");

        let raw = r#"{
            "type": "command",
            "chat": {"id": 3, "kind": "private"},
            "from": {"id": 5, "first_name": "Ada"},
            "message_id": 2,
            "name": "mine"
        }"#;
        let InboundEvent::Command { args, .. } = serde_json::from_str::<InboundEvent>(raw).unwrap() else {
            panic!("expected a command");
        };
        assert!(args.is_empty());
    }
}
