//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod consts;
pub mod error;
pub mod pdu;

use std::collections::{BTreeMap, BTreeSet};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{LEAF_LEVEL, TOP_OF_FABRIC_LEVEL};
use crate::packet::error::{DecodeError, DecodeResult};

// Represents a RIFT System ID.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SystemId(u64);

// Represents a RIFT level value.
//
// The level of a node may be undefined while ZTP converges, which is
// modeled as `Option<Level>`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Level(u8);

// Direction of a TIE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Direction {
    South = 1,
    North = 2,
}

// Direction of an adjacency relative to this node's level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LinkDirection {
    South,
    North,
    EastWest,
}

// Type of a TIE.
//
// The discriminants match the wire encoding.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum TieType {
    Node = 2,
    Prefix = 3,
    PositiveDisagg = 4,
    NegativeDisagg = 5,
    PolicyGuided = 6,
    KeyValue = 7,
}

// Represents a RIFT TIE ID.
//
// The derived ordering (direction, originator, type, number) is the total
// order assumed by TIDE range processing.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct TieId {
    pub direction: Direction,
    pub originator: SystemId,
    pub tie_type: TieType,
    pub tie_nr: u32,
}

// Represents a RIFT TIE header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TieHeader {
    pub tie_id: TieId,
    pub seq_nr: u64,
    pub remaining_lifetime: u32,
    // Carried opaquely. Never participates in TIE age comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origination_time: Option<u64>,
}

// Container for storing separate values for the south and north directions.
#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct Directions<T> {
    pub south: T,
    pub north: T,
}

// ===== impl SystemId =====

impl SystemId {
    // The all-zeroes System ID is reserved as illegal.
    pub const ILLEGAL: SystemId = SystemId(0);

    pub const MIN: SystemId = SystemId(0);
    pub const MAX: SystemId = SystemId(u64::MAX);

    pub const fn get(&self) -> u64 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        Ok(SystemId(buf.try_get_u64()?))
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.0);
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for SystemId {
    fn from(id: u64) -> SystemId {
        SystemId(id)
    }
}

// ===== impl Level =====

impl Level {
    pub const LEAF: Level = Level(LEAF_LEVEL);
    pub const TOP_OF_FABRIC: Level = Level(TOP_OF_FABRIC_LEVEL);

    pub const fn get(&self) -> u8 {
        self.0
    }

    pub const fn is_leaf(&self) -> bool {
        self.0 == LEAF_LEVEL
    }

    // Level used by nodes one level below the given one (never below leaf).
    pub const fn predecessor(&self) -> Level {
        Level(self.0.saturating_sub(1))
    }

    // Absolute difference between two levels.
    pub const fn difference(&self, other: Level) -> u8 {
        self.0.abs_diff(other.0)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Level {
    fn from(level: u8) -> Level {
        Level(level)
    }
}

// Formats an optional level the way the operational surface displays it.
pub fn level_str(level: Option<Level>) -> String {
    match level {
        Some(level) => level.to_string(),
        None => "undefined".to_owned(),
    }
}

// ===== impl Direction =====

impl Direction {
    pub const fn reverse(&self) -> Direction {
        match self {
            Direction::South => Direction::North,
            Direction::North => Direction::South,
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        match buf.try_get_u8()? {
            1 => Ok(Direction::South),
            2 => Ok(Direction::North),
            direction => Err(DecodeError::UnknownDirection(direction)),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::South => write!(f, "South"),
            Direction::North => write!(f, "North"),
        }
    }
}

// ===== impl LinkDirection =====

impl std::fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkDirection::South => write!(f, "South"),
            LinkDirection::North => write!(f, "North"),
            LinkDirection::EastWest => write!(f, "East-West"),
        }
    }
}

// ===== impl TieType =====

impl TieType {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        match buf.try_get_u8()? {
            2 => Ok(TieType::Node),
            3 => Ok(TieType::Prefix),
            4 => Ok(TieType::PositiveDisagg),
            5 => Ok(TieType::NegativeDisagg),
            6 => Ok(TieType::PolicyGuided),
            7 => Ok(TieType::KeyValue),
            tie_type => Err(DecodeError::UnknownTieType(tie_type)),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }
}

impl std::fmt::Display for TieType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TieType::Node => write!(f, "Node"),
            TieType::Prefix => write!(f, "Prefix"),
            TieType::PositiveDisagg => write!(f, "Pos-Dis-Prefix"),
            TieType::NegativeDisagg => write!(f, "Neg-Dis-Prefix"),
            TieType::PolicyGuided => write!(f, "PG-Prefix"),
            TieType::KeyValue => write!(f, "Key-Value"),
        }
    }
}

// ===== impl TieId =====

impl TieId {
    // Sentinels covering the entire TIE-ID space, used as TIDE range bounds.
    pub const MIN: TieId = TieId {
        direction: Direction::South,
        originator: SystemId::MIN,
        tie_type: TieType::Node,
        tie_nr: 0,
    };
    pub const MAX: TieId = TieId {
        direction: Direction::North,
        originator: SystemId::MAX,
        tie_type: TieType::KeyValue,
        tie_nr: u32::MAX,
    };

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let direction = Direction::decode(buf)?;
        let originator = SystemId::decode(buf)?;
        let tie_type = TieType::decode(buf)?;
        let tie_nr = buf.try_get_u32()?;
        Ok(TieId {
            direction,
            originator,
            tie_type,
            tie_nr,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.direction.encode(buf);
        self.originator.encode(buf);
        self.tie_type.encode(buf);
        buf.put_u32(self.tie_nr);
    }
}

impl std::fmt::Display for TieId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.direction, self.originator, self.tie_type, self.tie_nr
        )
    }
}

// ===== impl TieHeader =====

impl TieHeader {
    // Header used to request a missing TIE in a TIRE.
    //
    // Requests are encoded with a zero sequence number and zero remaining
    // lifetime (the ISO 10589 convention).
    pub fn request(tie_id: TieId) -> TieHeader {
        TieHeader {
            tie_id,
            seq_nr: 0,
            remaining_lifetime: 0,
            origination_time: None,
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let tie_id = TieId::decode(buf)?;
        let seq_nr = buf.try_get_u64()?;
        let remaining_lifetime = buf.try_get_u32()?;
        let origination_time = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_u64()?),
        };
        Ok(TieHeader {
            tie_id,
            seq_nr,
            remaining_lifetime,
            origination_time,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.tie_id.encode(buf);
        buf.put_u64(self.seq_nr);
        buf.put_u32(self.remaining_lifetime);
        match self.origination_time {
            Some(time) => {
                buf.put_u8(1);
                buf.put_u64(time);
            }
            None => buf.put_u8(0),
        }
    }
}

// ===== impl Directions =====

impl<T> Directions<T> {
    pub fn get(&self, direction: Direction) -> &T {
        match direction {
            Direction::South => &self.south,
            Direction::North => &self.north,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::South => &mut self.south,
            Direction::North => &mut self.north,
        }
    }
}

// ===== helper functions =====

pub(crate) fn decode_prefix(buf: &mut Bytes) -> DecodeResult<IpNetwork> {
    let (addr, prefix_len) = match buf.try_get_u8()? {
        4 => {
            let addr = std::net::Ipv4Addr::from(buf.try_get_u32()?);
            (std::net::IpAddr::V4(addr), buf.try_get_u8()?)
        }
        6 => {
            let addr = std::net::Ipv6Addr::from(buf.try_get_u128()?);
            (std::net::IpAddr::V6(addr), buf.try_get_u8()?)
        }
        _ => return Err(DecodeError::InvalidPrefix),
    };
    IpNetwork::new(addr, prefix_len).map_err(|_| DecodeError::InvalidPrefix)
}

pub(crate) fn encode_prefix(buf: &mut BytesMut, prefix: &IpNetwork) {
    match prefix {
        IpNetwork::V4(prefix) => {
            buf.put_u8(4);
            buf.put_u32((*prefix).ip().into());
            buf.put_u8(prefix.prefix());
        }
        IpNetwork::V6(prefix) => {
            buf.put_u8(6);
            buf.put_u128((*prefix).ip().into());
            buf.put_u8(prefix.prefix());
        }
    }
}

pub(crate) fn decode_string(buf: &mut Bytes) -> DecodeResult<String> {
    let len = buf.try_get_u16()? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::IncompletePacket);
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DecodeError::InvalidStringEncoding)
}

pub(crate) fn encode_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

// Used by BTreeSet/BTreeMap collections of tags and link-id pairs.
pub type Tags = BTreeSet<u64>;

// A (local, remote) link-id pair describing one parallel link to a neighbor.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LinkIdPair {
    pub local_id: u32,
    pub remote_id: u32,
}

impl LinkIdPair {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let local_id = buf.try_get_u32()?;
        let remote_id = buf.try_get_u32()?;
        Ok(LinkIdPair {
            local_id,
            remote_id,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.local_id);
        buf.put_u32(self.remote_id);
    }

    pub const fn reverse(&self) -> LinkIdPair {
        LinkIdPair {
            local_id: self.remote_id,
            remote_id: self.local_id,
        }
    }
}

// Attributes attached to an advertised prefix.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PrefixAttrs {
    pub metric: u32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: Tags,
}

pub type PrefixMap = BTreeMap<IpNetwork, PrefixAttrs>;
