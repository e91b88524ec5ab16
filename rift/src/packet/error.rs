//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// RIFT packet decoding errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidVersion(u8),
    UnknownContentType(u8),
    UnknownTieType(u8),
    UnknownDirection(u8),
    InvalidPrefix,
    InvalidStringEncoding,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "incomplete packet")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid protocol major version: {version}")
            }
            DecodeError::UnknownContentType(content_type) => {
                write!(f, "unknown packet content type: {content_type}")
            }
            DecodeError::UnknownTieType(tie_type) => {
                write!(f, "unknown TIE type: {tie_type}")
            }
            DecodeError::UnknownDirection(direction) => {
                write!(f, "unknown TIE direction: {direction}")
            }
            DecodeError::InvalidPrefix => {
                write!(f, "invalid IP prefix")
            }
            DecodeError::InvalidStringEncoding => {
                write!(f, "string field isn't valid UTF-8")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompletePacket
    }
}
