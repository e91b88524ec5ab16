//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use tracing::{error, warn, warn_span};

use crate::collections::InterfaceId;
use crate::packet::error::DecodeError;

// RIFT errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    InterfaceIdNotFound(InterfaceId),
    InterfaceNameNotFound(String),
    // Packet input
    PacketInputError(String, SocketAddr, PacketInputError),
    // Other
    InterfaceStartError(String, Box<Error>),
}

// RIFT I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(std::net::Ipv4Addr, std::io::Error),
    RecvError(std::io::Error),
    SendError(std::io::Error),
}

// Errors that cause a received packet to be dropped.
#[derive(Debug)]
pub enum PacketInputError {
    DecodeError(DecodeError),
    // A LIE arrived on the flood port, or flooding content on the LIE port.
    WrongPort(&'static str),
}

// Reasons for rejecting a received LIE.
//
// Most rejections still forward an offer to the ZTP state machine, which
// retains it as a removed offer for diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LieRejectError {
    InvalidSystemId,
    SelfLoop,
    MtuMismatch,
    RemoteLevelUndefined,
    MyLevelUndefined,
    PodMismatch,
    LevelMismatch,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self);
            }
            Error::InterfaceNameNotFound(name) => {
                warn!(%name, "{}", self);
            }
            Error::PacketInputError(ifname, source, error) => {
                warn_span!("interface", name = %ifname, %source).in_scope(
                    || {
                        error.log();
                    },
                )
            }
            Error::InterfaceStartError(name, error) => {
                error!(%name, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::InterfaceIdNotFound(..) => {
                write!(f, "interface ID not found")
            }
            Error::InterfaceNameNotFound(..) => {
                write!(f, "interface name not found")
            }
            Error::PacketInputError(..) => {
                write!(f, "failed to process received packet")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::InterfaceStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::MulticastJoinError(addr, error) => {
                warn!(?addr, error = %with_source(error), "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive packet")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
        }
    }
}

// ===== impl PacketInputError =====

impl PacketInputError {
    fn log(&self) {
        match self {
            PacketInputError::DecodeError(error) => {
                warn!("{}", error);
            }
            PacketInputError::WrongPort(content_type) => {
                warn!(%content_type, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for PacketInputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketInputError::DecodeError(error) => error.fmt(f),
            PacketInputError::WrongPort(..) => {
                write!(f, "packet received on wrong port")
            }
        }
    }
}

impl From<DecodeError> for PacketInputError {
    fn from(error: DecodeError) -> PacketInputError {
        PacketInputError::DecodeError(error)
    }
}

// ===== impl LieRejectError =====

impl LieRejectError {
    // Whether the rejected LIE is still forwarded to ZTP as an offer.
    pub(crate) const fn offer_to_ztp(&self) -> bool {
        match self {
            LieRejectError::InvalidSystemId
            | LieRejectError::SelfLoop
            | LieRejectError::MtuMismatch => false,
            LieRejectError::RemoteLevelUndefined
            | LieRejectError::MyLevelUndefined
            | LieRejectError::PodMismatch
            | LieRejectError::LevelMismatch => true,
        }
    }

    // Whether the rejection is logged as a warning rather than plain info.
    pub(crate) const fn warning(&self) -> bool {
        match self {
            LieRejectError::InvalidSystemId
            | LieRejectError::MtuMismatch
            | LieRejectError::PodMismatch
            | LieRejectError::LevelMismatch => true,
            LieRejectError::SelfLoop
            | LieRejectError::RemoteLevelUndefined
            | LieRejectError::MyLevelUndefined => false,
        }
    }
}

impl std::fmt::Display for LieRejectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LieRejectError::InvalidSystemId => {
                write!(f, "invalid system ID")
            }
            LieRejectError::SelfLoop => {
                write!(f, "remote system ID is same as local system ID (loop)")
            }
            LieRejectError::MtuMismatch => {
                write!(f, "MTU mismatch")
            }
            LieRejectError::RemoteLevelUndefined => {
                write!(f, "remote level is undefined")
            }
            LieRejectError::MyLevelUndefined => {
                write!(f, "my level is undefined")
            }
            LieRejectError::PodMismatch => {
                write!(f, "PoD mismatch")
            }
            LieRejectError::LevelMismatch => {
                write!(f, "level mismatch")
            }
        }
    }
}

impl std::error::Error for LieRejectError {}

// ===== helper functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
