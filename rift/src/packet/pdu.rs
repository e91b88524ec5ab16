//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::consts::VERSION;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{
    Level, LinkIdPair, PrefixAttrs, PrefixMap, SystemId, TieHeader, TieId,
    decode_prefix, decode_string, encode_prefix, encode_string,
};

// RIFT protocol packet.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Packet {
    pub hdr: Header,
    pub content: Content,
}

// RIFT packet common header.
#[derive(Clone, Copy, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Header {
    pub major_version: u8,
    pub sender: SystemId,
    pub level: Option<Level>,
}

// RIFT packet content.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Content {
    Lie(LiePacket),
    Tide(TidePacket),
    Tire(TirePacket),
    Tie(TiePacket),
}

// RIFT Link Information Element.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LiePacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub local_id: u32,
    pub flood_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_mtu_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbor: Option<LieNeighbor>,
    pub pod: u32,
    pub nonce: u64,
    pub capabilities: NodeCapabilities,
    pub holdtime: u16,
    pub not_a_ztp_offer: bool,
    pub you_are_flood_repeater: bool,
}

// Reflection of the neighbor last seen on the link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LieNeighbor {
    pub originator: SystemId,
    pub remote_id: u32,
}

// Capabilities advertised in LIEs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeCapabilities {
    pub leaf_2_leaf: bool,
    pub flood_reduction: bool,
}

// RIFT TIE Description Element: a summary of a contiguous range of the
// TIE-ID space with the covered TIE headers sorted in ascending order.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TidePacket {
    pub start_range: TieId,
    pub end_range: TieId,
    pub headers: Vec<TieHeader>,
}

// RIFT TIE Request Element: a list of requested or acknowledged headers.
#[derive(Clone, Debug, Default, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TirePacket {
    pub headers: Vec<TieHeader>,
}

// RIFT Topology Information Element.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TiePacket {
    pub header: TieHeader,
    pub element: TieElement,
}

// Typed TIE contents.
//
// The policy-guided and negative-disaggregation kinds are carried opaquely:
// they re-encode byte-identically so they can be flooded without being
// interpreted.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TieElement {
    Node(NodeElement),
    Prefix(PrefixElement),
    PositiveDisagg(PrefixElement),
    NegativeDisagg(Bytes),
    PolicyGuided(Bytes),
    KeyValue(KeyValueElement),
}

// Contents of a Node TIE.
#[derive(Clone, Debug, Default, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub level: Option<Level>,
    pub neighbors: BTreeMap<SystemId, NodeNeighbor>,
    pub flags: NodeFlags,
}

// One neighbor entry in a Node TIE. Parallel links to the same neighbor are
// collapsed into a single entry with multiple link-id pairs.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeNeighbor {
    pub level: Level,
    pub cost: u32,
    pub link_ids: std::collections::BTreeSet<LinkIdPair>,
    pub bandwidth: u32,
}

bitflags! {
    // Node TIE flags field.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct NodeFlags: u8 {
        const OVERLOAD = 0x01;
    }
}

// Contents of a Prefix TIE.
#[derive(Clone, Debug, Default, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PrefixElement {
    pub prefixes: PrefixMap,
}

// Contents of a Key-Value TIE.
pub type KeyValueElement = BTreeMap<u32, Bytes>;

// ===== impl Packet =====

impl Packet {
    // Decodes a RIFT packet from a bytes buffer.
    pub fn decode(mut buf: Bytes) -> DecodeResult<Self> {
        let hdr = Header::decode(&mut buf)?;
        let content = match buf.try_get_u8()? {
            1 => Content::Lie(LiePacket::decode(&mut buf)?),
            2 => Content::Tide(TidePacket::decode(&mut buf)?),
            3 => Content::Tire(TirePacket::decode(&mut buf)?),
            4 => Content::Tie(TiePacket::decode(&mut buf)?),
            content_type => {
                return Err(DecodeError::UnknownContentType(content_type));
            }
        };
        Ok(Packet { hdr, content })
    }

    // Encodes a RIFT packet into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        self.hdr.encode(&mut buf);
        match &self.content {
            Content::Lie(lie) => {
                buf.put_u8(1);
                lie.encode(&mut buf);
            }
            Content::Tide(tide) => {
                buf.put_u8(2);
                tide.encode(&mut buf);
            }
            Content::Tire(tire) => {
                buf.put_u8(3);
                tire.encode(&mut buf);
            }
            Content::Tie(tie) => {
                buf.put_u8(4);
                tie.encode(&mut buf);
            }
        }
        buf.freeze()
    }

    pub const fn content_type(&self) -> &'static str {
        match &self.content {
            Content::Lie(..) => "LIE",
            Content::Tide(..) => "TIDE",
            Content::Tire(..) => "TIRE",
            Content::Tie(..) => "TIE",
        }
    }
}

// ===== impl Header =====

impl Header {
    pub fn new(sender: SystemId, level: Option<Level>) -> Header {
        Header {
            major_version: VERSION,
            sender,
            level,
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let major_version = buf.try_get_u8()?;
        if major_version != VERSION {
            return Err(DecodeError::InvalidVersion(major_version));
        }
        let sender = SystemId::decode(buf)?;
        let level = decode_level(buf)?;
        Ok(Header {
            major_version,
            sender,
            level,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.major_version);
        self.sender.encode(buf);
        encode_level(buf, self.level);
    }
}

// ===== impl LiePacket =====

impl LiePacket {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let name = match buf.try_get_u8()? {
            0 => None,
            _ => Some(decode_string(buf)?),
        };
        let local_id = buf.try_get_u32()?;
        let flood_port = buf.try_get_u16()?;
        let link_mtu_size = match buf.try_get_u8()? {
            0 => None,
            _ => Some(buf.try_get_u32()?),
        };
        let neighbor = match buf.try_get_u8()? {
            0 => None,
            _ => {
                let originator = SystemId::decode(buf)?;
                let remote_id = buf.try_get_u32()?;
                Some(LieNeighbor {
                    originator,
                    remote_id,
                })
            }
        };
        let pod = buf.try_get_u32()?;
        let nonce = buf.try_get_u64()?;
        let capabilities = NodeCapabilities {
            leaf_2_leaf: buf.try_get_u8()? != 0,
            flood_reduction: buf.try_get_u8()? != 0,
        };
        let holdtime = buf.try_get_u16()?;
        let not_a_ztp_offer = buf.try_get_u8()? != 0;
        let you_are_flood_repeater = buf.try_get_u8()? != 0;
        Ok(LiePacket {
            name,
            local_id,
            flood_port,
            link_mtu_size,
            neighbor,
            pod,
            nonce,
            capabilities,
            holdtime,
            not_a_ztp_offer,
            you_are_flood_repeater,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        match &self.name {
            Some(name) => {
                buf.put_u8(1);
                encode_string(buf, name);
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(self.local_id);
        buf.put_u16(self.flood_port);
        match self.link_mtu_size {
            Some(mtu) => {
                buf.put_u8(1);
                buf.put_u32(mtu);
            }
            None => buf.put_u8(0),
        }
        match &self.neighbor {
            Some(neighbor) => {
                buf.put_u8(1);
                neighbor.originator.encode(buf);
                buf.put_u32(neighbor.remote_id);
            }
            None => buf.put_u8(0),
        }
        buf.put_u32(self.pod);
        buf.put_u64(self.nonce);
        buf.put_u8(self.capabilities.leaf_2_leaf as u8);
        buf.put_u8(self.capabilities.flood_reduction as u8);
        buf.put_u16(self.holdtime);
        buf.put_u8(self.not_a_ztp_offer as u8);
        buf.put_u8(self.you_are_flood_repeater as u8);
    }
}

// ===== impl TidePacket =====

impl TidePacket {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let start_range = TieId::decode(buf)?;
        let end_range = TieId::decode(buf)?;
        let headers = decode_headers(buf)?;
        Ok(TidePacket {
            start_range,
            end_range,
            headers,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        self.start_range.encode(buf);
        self.end_range.encode(buf);
        encode_headers(buf, &self.headers);
    }
}

// ===== impl TirePacket =====

impl TirePacket {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let headers = decode_headers(buf)?;
        Ok(TirePacket { headers })
    }

    fn encode(&self, buf: &mut BytesMut) {
        encode_headers(buf, &self.headers);
    }
}

// ===== impl TiePacket =====

impl TiePacket {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let header = TieHeader::decode(buf)?;
        let element = TieElement::decode(buf)?;
        Ok(TiePacket { header, element })
    }

    fn encode(&self, buf: &mut BytesMut) {
        self.header.encode(buf);
        self.element.encode(buf);
    }
}

// ===== impl TieElement =====

impl TieElement {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        match buf.try_get_u8()? {
            2 => Ok(TieElement::Node(NodeElement::decode(buf)?)),
            3 => Ok(TieElement::Prefix(PrefixElement::decode(buf)?)),
            4 => Ok(TieElement::PositiveDisagg(PrefixElement::decode(buf)?)),
            5 => Ok(TieElement::NegativeDisagg(decode_opaque(buf)?)),
            6 => Ok(TieElement::PolicyGuided(decode_opaque(buf)?)),
            7 => {
                let count = buf.try_get_u16()?;
                let mut keyvalues = BTreeMap::new();
                for _ in 0..count {
                    let key = buf.try_get_u32()?;
                    let value = decode_opaque(buf)?;
                    keyvalues.insert(key, value);
                }
                Ok(TieElement::KeyValue(keyvalues))
            }
            tie_type => Err(DecodeError::UnknownTieType(tie_type)),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            TieElement::Node(node) => {
                buf.put_u8(2);
                node.encode(buf);
            }
            TieElement::Prefix(prefixes) => {
                buf.put_u8(3);
                prefixes.encode(buf);
            }
            TieElement::PositiveDisagg(prefixes) => {
                buf.put_u8(4);
                prefixes.encode(buf);
            }
            TieElement::NegativeDisagg(payload) => {
                buf.put_u8(5);
                encode_opaque(buf, payload);
            }
            TieElement::PolicyGuided(payload) => {
                buf.put_u8(6);
                encode_opaque(buf, payload);
            }
            TieElement::KeyValue(keyvalues) => {
                buf.put_u8(7);
                buf.put_u16(keyvalues.len() as u16);
                for (key, value) in keyvalues {
                    buf.put_u32(*key);
                    encode_opaque(buf, value);
                }
            }
        }
    }
}

// ===== impl NodeElement =====

impl NodeElement {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let name = match buf.try_get_u8()? {
            0 => None,
            _ => Some(decode_string(buf)?),
        };
        let level = decode_level(buf)?;
        let flags = NodeFlags::from_bits_truncate(buf.try_get_u8()?);
        let count = buf.try_get_u16()?;
        let mut neighbors = BTreeMap::new();
        for _ in 0..count {
            let system_id = SystemId::decode(buf)?;
            let neighbor = NodeNeighbor::decode(buf)?;
            neighbors.insert(system_id, neighbor);
        }
        Ok(NodeElement {
            name,
            level,
            neighbors,
            flags,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        match &self.name {
            Some(name) => {
                buf.put_u8(1);
                encode_string(buf, name);
            }
            None => buf.put_u8(0),
        }
        encode_level(buf, self.level);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.neighbors.len() as u16);
        for (system_id, neighbor) in &self.neighbors {
            system_id.encode(buf);
            neighbor.encode(buf);
        }
    }
}

// ===== impl NodeNeighbor =====

impl NodeNeighbor {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let level = Level::from(buf.try_get_u8()?);
        let cost = buf.try_get_u32()?;
        let count = buf.try_get_u16()?;
        let mut link_ids = std::collections::BTreeSet::new();
        for _ in 0..count {
            link_ids.insert(LinkIdPair::decode(buf)?);
        }
        let bandwidth = buf.try_get_u32()?;
        Ok(NodeNeighbor {
            level,
            cost,
            link_ids,
            bandwidth,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.level.get());
        buf.put_u32(self.cost);
        buf.put_u16(self.link_ids.len() as u16);
        for link_id_pair in &self.link_ids {
            link_id_pair.encode(buf);
        }
        buf.put_u32(self.bandwidth);
    }
}

// ===== impl PrefixElement =====

impl PrefixElement {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let count = buf.try_get_u16()?;
        let mut prefixes = PrefixMap::new();
        for _ in 0..count {
            let prefix = decode_prefix(buf)?;
            let metric = buf.try_get_u32()?;
            let tag_count = buf.try_get_u16()?;
            let mut tags = crate::packet::Tags::new();
            for _ in 0..tag_count {
                tags.insert(buf.try_get_u64()?);
            }
            prefixes.insert(prefix, PrefixAttrs { metric, tags });
        }
        Ok(PrefixElement { prefixes })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.prefixes.len() as u16);
        for (prefix, attrs) in &self.prefixes {
            encode_prefix(buf, prefix);
            buf.put_u32(attrs.metric);
            buf.put_u16(attrs.tags.len() as u16);
            for tag in &attrs.tags {
                buf.put_u64(*tag);
            }
        }
    }
}

// ===== helper functions =====

fn decode_level(buf: &mut Bytes) -> DecodeResult<Option<Level>> {
    match buf.try_get_u8()? {
        0 => Ok(None),
        _ => Ok(Some(Level::from(buf.try_get_u8()?))),
    }
}

fn encode_level(buf: &mut BytesMut, level: Option<Level>) {
    match level {
        Some(level) => {
            buf.put_u8(1);
            buf.put_u8(level.get());
        }
        None => buf.put_u8(0),
    }
}

fn decode_headers(buf: &mut Bytes) -> DecodeResult<Vec<TieHeader>> {
    let count = buf.try_get_u16()?;
    let mut headers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        headers.push(TieHeader::decode(buf)?);
    }
    Ok(headers)
}

fn encode_headers(buf: &mut BytesMut, headers: &[TieHeader]) {
    buf.put_u16(headers.len() as u16);
    for header in headers {
        header.encode(buf);
    }
}

fn decode_opaque(buf: &mut Bytes) -> DecodeResult<Bytes> {
    let len = buf.try_get_u32()? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::IncompletePacket);
    }
    Ok(buf.split_to(len))
}

fn encode_opaque(buf: &mut BytesMut, payload: &Bytes) {
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}
