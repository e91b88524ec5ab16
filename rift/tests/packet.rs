//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;
use maplit::btreemap;
use rift::packet::consts::VERSION;
use rift::packet::error::DecodeError;
use rift::packet::pdu::{
    Content, Header, LieNeighbor, LiePacket, NodeCapabilities, NodeElement,
    NodeFlags, NodeNeighbor, Packet, PrefixElement, TidePacket, TiePacket,
    TirePacket, TieElement,
};
use rift::packet::{
    Direction, Level, LinkIdPair, PrefixAttrs, SystemId, TieHeader, TieId,
    TieType,
};

fn header(sender: u64, level: Option<u8>) -> Header {
    Header::new(SystemId::from(sender), level.map(Level::from))
}

fn tie_header(originator: u64, tie_type: TieType, seq_nr: u64) -> TieHeader {
    TieHeader {
        tie_id: TieId {
            direction: Direction::South,
            originator: SystemId::from(originator),
            tie_type,
            tie_nr: 1,
        },
        seq_nr,
        remaining_lifetime: 604800,
        origination_time: None,
    }
}

fn assert_roundtrip(packet: Packet) {
    let encoded = packet.encode();
    let decoded = Packet::decode(encoded).expect("decode failed");
    assert_eq!(packet, decoded);
}

#[test]
fn lie_roundtrip() {
    assert_roundtrip(Packet {
        hdr: header(0x1111, Some(2)),
        content: Content::Lie(LiePacket {
            name: Some("node1-if1".to_owned()),
            local_id: 7,
            flood_port: 10001,
            link_mtu_size: Some(1400),
            neighbor: Some(LieNeighbor {
                originator: SystemId::from(0x2222),
                remote_id: 3,
            }),
            pod: 0,
            nonce: 0x1234_5678_9abc_def0 >> 1,
            capabilities: NodeCapabilities {
                leaf_2_leaf: true,
                flood_reduction: true,
            },
            holdtime: 3,
            not_a_ztp_offer: true,
            you_are_flood_repeater: true,
        }),
    });
}

#[test]
fn lie_roundtrip_minimal() {
    assert_roundtrip(Packet {
        hdr: header(0x1111, None),
        content: Content::Lie(LiePacket {
            name: None,
            local_id: 1,
            flood_port: 915,
            link_mtu_size: None,
            neighbor: None,
            pod: 0,
            nonce: 1,
            capabilities: NodeCapabilities::default(),
            holdtime: 3,
            not_a_ztp_offer: false,
            you_are_flood_repeater: false,
        }),
    });
}

#[test]
fn tide_roundtrip() {
    assert_roundtrip(Packet {
        hdr: header(0x1111, Some(24)),
        content: Content::Tide(TidePacket {
            start_range: TieId::MIN,
            end_range: TieId::MAX,
            headers: vec![
                tie_header(0x1111, TieType::Node, 4),
                tie_header(0x1111, TieType::Prefix, 2),
            ],
        }),
    });
}

#[test]
fn tire_roundtrip() {
    assert_roundtrip(Packet {
        hdr: header(0x2222, Some(0)),
        content: Content::Tire(TirePacket {
            headers: vec![TieHeader::request(
                tie_header(0x1111, TieType::Prefix, 0).tie_id,
            )],
        }),
    });
}

#[test]
fn node_tie_roundtrip() {
    let neighbors = btreemap! {
        SystemId::from(0x2222) => NodeNeighbor {
            level: Level::from(0),
            cost: 1,
            link_ids: [
                LinkIdPair { local_id: 1, remote_id: 2 },
                LinkIdPair { local_id: 3, remote_id: 4 },
            ]
            .into(),
            bandwidth: 100,
        },
    };
    assert_roundtrip(Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tie(TiePacket {
            header: tie_header(0x1111, TieType::Node, 9),
            element: TieElement::Node(NodeElement {
                name: Some("node1".to_owned()),
                level: Some(Level::from(1)),
                neighbors,
                flags: NodeFlags::OVERLOAD,
            }),
        }),
    });
}

#[test]
fn prefix_tie_roundtrip() {
    let prefixes = btreemap! {
        "0.0.0.0/0".parse().unwrap() => PrefixAttrs {
            metric: 1,
            tags: Default::default(),
        },
        "10.1.0.0/16".parse().unwrap() => PrefixAttrs {
            metric: 10,
            tags: [1, 2].into(),
        },
        "2001:db8::/32".parse().unwrap() => PrefixAttrs {
            metric: 100,
            tags: Default::default(),
        },
    };
    assert_roundtrip(Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tie(TiePacket {
            header: tie_header(0x1111, TieType::Prefix, 3),
            element: TieElement::Prefix(PrefixElement { prefixes }),
        }),
    });
}

#[test]
fn opaque_elements_reencode_identically() {
    // Policy-guided and negative-disaggregation elements are carried
    // opaquely and must survive a decode/encode cycle byte-for-byte.
    let packet = Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tie(TiePacket {
            header: tie_header(0x1111, TieType::PolicyGuided, 1),
            element: TieElement::PolicyGuided(Bytes::from_static(&[
                0xde, 0xad, 0xbe, 0xef,
            ])),
        }),
    };
    let encoded = packet.encode();
    let decoded = Packet::decode(encoded.clone()).unwrap();
    assert_eq!(encoded, decoded.encode());
}

#[test]
fn keyvalue_tie_roundtrip() {
    assert_roundtrip(Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tie(TiePacket {
            header: tie_header(0x1111, TieType::KeyValue, 1),
            element: TieElement::KeyValue(btreemap! {
                1 => Bytes::from_static(b"value"),
                7 => Bytes::new(),
            }),
        }),
    });
}

#[test]
fn decode_version_mismatch() {
    let packet = Packet {
        hdr: Header {
            major_version: VERSION + 1,
            sender: SystemId::from(1),
            level: None,
        },
        content: Content::Tire(TirePacket::default()),
    };
    let encoded = packet.encode();
    assert_eq!(
        Packet::decode(encoded),
        Err(DecodeError::InvalidVersion(VERSION + 1))
    );
}

#[test]
fn decode_truncated() {
    let packet = Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tide(TidePacket {
            start_range: TieId::MIN,
            end_range: TieId::MAX,
            headers: vec![tie_header(0x1111, TieType::Node, 1)],
        }),
    };
    let encoded = packet.encode();
    for len in 0..encoded.len() {
        let truncated = encoded.slice(0..len);
        assert_eq!(
            Packet::decode(truncated),
            Err(DecodeError::IncompletePacket),
            "truncation at {len} bytes"
        );
    }
}

#[test]
fn decode_unknown_content_type() {
    let packet = Packet {
        hdr: header(0x1111, Some(1)),
        content: Content::Tire(TirePacket::default()),
    };
    let mut encoded = packet.encode().to_vec();
    // The content discriminant follows the 11-byte header.
    encoded[11] = 0xff;
    assert_eq!(
        Packet::decode(Bytes::from(encoded)),
        Err(DecodeError::UnknownContentType(0xff))
    );
}
