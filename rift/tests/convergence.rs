//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! End-to-end tests wiring instances back-to-back through the testing
//! stubs: packets captured from one node's output are injected into its
//! peer's input channels, and timers are driven explicitly.

use std::net::{Ipv4Addr, SocketAddr};

use rift::adjacency::LieState;
use rift::collections::InterfaceKey;
use rift::instance::{Instance, InstanceCfg};
use rift::interface::{FailureMode, InterfaceCfg};
use rift::packet::pdu::{
    Content, Header, Packet, PrefixElement, TiePacket, TieElement,
};
use rift::packet::{
    Direction, Level, PrefixAttrs, SystemId, TieHeader, TieId, TieType,
};
use rift::route::Owner;
use rift::tasks::messages::input::{
    ProtocolMsg, SpfDeferExpiryMsg, ServiceQueuesMsg, TimerTickMsg,
    UdpRxPacketMsg,
};
use rift::ztp::LevelSymbol;

// A bidirectional link between two (node index, interface name) endpoints.
struct Link {
    a: (usize, &'static str),
    b: (usize, &'static str),
}

struct Net {
    nodes: Vec<Instance>,
    links: Vec<Link>,
}

impl Net {
    fn new(nodes: Vec<Instance>, links: Vec<Link>) -> Net {
        let mut net = Net { nodes, links };
        for node in &mut net.nodes {
            node.start();
            node.process_queued();
        }
        net
    }

    // Finds the peer endpoint of the given endpoint, if it is linked.
    fn peer_of(&self, endpoint: (usize, &str)) -> Option<(usize, String)> {
        for link in &self.links {
            if link.a.0 == endpoint.0 && link.a.1 == endpoint.1 {
                return Some((link.b.0, link.b.1.to_owned()));
            }
            if link.b.0 == endpoint.0 && link.b.1 == endpoint.1 {
                return Some((link.a.0, link.a.1.to_owned()));
            }
        }
        None
    }

    // Moves every captured output packet across its link. Returns the
    // number of packets delivered.
    fn exchange_once(&mut self) -> usize {
        let mut deliveries = vec![];
        for index in 0..self.nodes.len() {
            let mut outputs = vec![];
            while let Ok(msg) = self.nodes[index].output_rx.try_recv() {
                outputs.push(msg);
            }
            for msg in outputs {
                let src_addr = self.nodes[index]
                    .arenas
                    .interfaces
                    .get_by_name(&msg.ifname)
                    .map(|iface| iface.config.address)
                    .unwrap_or(Ipv4Addr::LOCALHOST);
                let Some((peer, peer_ifname)) =
                    self.peer_of((index, &msg.ifname))
                else {
                    continue;
                };
                deliveries.push((
                    peer,
                    UdpRxPacketMsg {
                        iface_key: InterfaceKey::Value(peer_ifname),
                        flood: msg.flood,
                        src: SocketAddr::new(
                            src_addr.into(),
                            9000 + index as u16,
                        ),
                        packet: Ok(msg.packet),
                    },
                ));
            }
        }
        let count = deliveries.len();
        for (peer, msg) in deliveries {
            self.nodes[peer].process_protocol_msg(ProtocolMsg::UdpRxPacket(msg));
        }
        for node in &mut self.nodes {
            node.process_queued();
        }
        count
    }

    // Fires the flooding queue-service tick on every interface.
    fn tick_service_queues(&mut self) {
        for node in &mut self.nodes {
            let ifnames: Vec<_> = node
                .arenas
                .interfaces
                .iter()
                .map(|iface| iface.name.clone())
                .collect();
            for ifname in ifnames {
                node.process_protocol_msg(ProtocolMsg::ServiceQueues(
                    ServiceQueuesMsg {
                        iface_key: InterfaceKey::Value(ifname),
                    },
                ));
            }
            node.process_queued();
        }
    }

    // Fires the per-interface one-second tick on every interface.
    fn tick_timers(&mut self) {
        for node in &mut self.nodes {
            let ifnames: Vec<_> = node
                .arenas
                .interfaces
                .iter()
                .map(|iface| iface.name.clone())
                .collect();
            for ifname in ifnames {
                node.process_protocol_msg(ProtocolMsg::TimerTick(
                    TimerTickMsg {
                        iface_key: InterfaceKey::Value(ifname),
                    },
                ));
            }
            node.process_queued();
        }
    }

    // Expires the SPF minimum-interval timers so that coalesced triggers
    // run.
    fn settle_spf(&mut self) {
        for _ in 0..2 {
            for node in &mut self.nodes {
                node.process_protocol_msg(ProtocolMsg::SpfDeferExpiry(
                    SpfDeferExpiryMsg {},
                ));
                node.process_queued();
            }
        }
    }

    // Runs message exchange and queue servicing until the fabric settles.
    fn converge(&mut self) {
        for _ in 0..50 {
            let delivered = self.exchange_once();
            self.tick_service_queues();
            if delivered == 0 && self.exchange_once() == 0 {
                break;
            }
        }
        self.settle_spf();
    }

    fn lie_state(&self, node: usize, ifname: &str) -> LieState {
        self.nodes[node]
            .arenas
            .interfaces
            .get_by_name(ifname)
            .unwrap()
            .state
            .fsm
            .state()
    }
}

fn make_node(
    name: &str,
    system_id: u64,
    level: LevelSymbol,
    interfaces: &[(&str, Ipv4Addr)],
    v4prefixes: &[(&str, u32)],
) -> Instance {
    let config = InstanceCfg {
        system_id: SystemId::from(system_id),
        level,
        passive: false,
        overload: false,
        tx_src_addr: None,
        v4prefixes: v4prefixes
            .iter()
            .map(|(prefix, metric)| {
                (
                    prefix.parse().unwrap(),
                    PrefixAttrs {
                        metric: *metric,
                        tags: Default::default(),
                    },
                )
            })
            .collect(),
        v6prefixes: Default::default(),
        kernel_route_table: None,
    };
    let interface_configs = interfaces
        .iter()
        .map(|(ifname, address)| InterfaceCfg::new(ifname, *address))
        .collect();
    Instance::new(name.to_owned(), config, interface_configs)
}

fn addr(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

fn default_v4() -> ipnetwork::IpNetwork {
    "0.0.0.0/0".parse().unwrap()
}

fn my_tie_id(
    system_id: u64,
    direction: Direction,
    tie_type: TieType,
) -> TieId {
    TieId {
        direction,
        originator: SystemId::from(system_id),
        tie_type,
        tie_nr: 1,
    }
}

#[tokio::test]
async fn leaf_spine_convergence() {
    let leaf = make_node(
        "leaf",
        1,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 0, 1))],
        &[("10.1.1.0/24", 10)],
    );
    let spine = make_node(
        "spine",
        2,
        LevelSymbol::Value(1),
        &[("if1", addr(10, 0, 0, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![leaf, spine],
        vec![Link {
            a: (0, "if1"),
            b: (1, "if1"),
        }],
    );
    net.converge();

    // Both sides reach the three-way state.
    assert_eq!(net.lie_state(0, "if1"), LieState::ThreeWay);
    assert_eq!(net.lie_state(1, "if1"), LieState::ThreeWay);

    // The spine originates a southbound default with metric 1 and the
    // leaf received it.
    let leaf_state = net.nodes[0].state.as_ref().unwrap();
    let spine_default = leaf_state
        .tiedb
        .get(&my_tie_id(2, Direction::South, TieType::Prefix))
        .expect("missing spine south prefix TIE");
    let TieElement::Prefix(element) = &spine_default.element else {
        panic!("south prefix TIE has wrong element");
    };
    assert_eq!(element.prefixes.get(&default_v4()).unwrap().metric, 1);

    // The leaf's RIB contains a default route via the spine.
    let route = leaf_state
        .rib
        .v4
        .get_route(&default_v4())
        .expect("missing default route");
    assert_eq!(route.owner, Owner::NorthSpf);
    let next_hop = route.next_hops.first().unwrap();
    assert_eq!(next_hop.interface.as_deref(), Some("if1"));
    assert_eq!(next_hop.address, Some(addr(10, 0, 0, 2).into()));

    // The spine's RIB contains the leaf's prefix.
    let spine_state = net.nodes[1].state.as_ref().unwrap();
    let route = spine_state
        .rib
        .v4
        .get_route(&"10.1.1.0/24".parse().unwrap())
        .expect("missing leaf prefix route");
    assert_eq!(route.owner, Owner::SouthSpf);
}

#[tokio::test]
async fn two_leaves_stall_one_way() {
    let l1 = make_node(
        "leaf1",
        1,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 0, 1))],
        &[],
    );
    let l2 = make_node(
        "leaf2",
        2,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 0, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![l1, l2],
        vec![Link {
            a: (0, "if1"),
            b: (1, "if1"),
        }],
    );
    net.converge();

    assert_eq!(net.lie_state(0, "if1"), LieState::OneWay);
    assert_eq!(net.lie_state(1, "if1"), LieState::OneWay);
    let outcome = net.nodes[0]
        .arenas
        .interfaces
        .get_by_name("if1")
        .unwrap()
        .state
        .last_lie_outcome
        .clone()
        .unwrap();
    assert!(outcome.contains("level mismatch"), "outcome: {outcome}");
}

#[tokio::test]
async fn ztp_level_derivation() {
    let tof = make_node(
        "tof",
        1,
        LevelSymbol::TopOfFabric,
        &[("if1", addr(10, 0, 1, 1))],
        &[],
    );
    let middle = make_node(
        "middle",
        2,
        LevelSymbol::Undefined,
        &[("if1", addr(10, 0, 1, 2)), ("if2", addr(10, 0, 2, 1))],
        &[],
    );
    let leaf = make_node(
        "leaf",
        3,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 2, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![tof, middle, leaf],
        vec![
            Link {
                a: (0, "if1"),
                b: (1, "if1"),
            },
            Link {
                a: (1, "if2"),
                b: (2, "if1"),
            },
        ],
    );
    net.converge();

    // The middle node derives its level from the top-of-fabric's offer.
    let (view, _) = net.nodes[1].as_up().unwrap();
    assert_eq!(view.level_value(), Some(Level::from(23)));
    assert_eq!(view.state.hal, Some(Level::from(24)));

    // Poison reverse: the middle node marks its offers back to its level
    // provider as not-a-ZTP-offer, so the top-of-fabric derives nothing.
    let (view, _) = net.nodes[0].as_up().unwrap();
    assert_eq!(view.state.hal, None);

    // All adjacencies converge to three-way.
    assert_eq!(net.lie_state(0, "if1"), LieState::ThreeWay);
    assert_eq!(net.lie_state(1, "if1"), LieState::ThreeWay);
    assert_eq!(net.lie_state(1, "if2"), LieState::ThreeWay);
    assert_eq!(net.lie_state(2, "if1"), LieState::ThreeWay);
}

#[tokio::test]
async fn foreign_self_originated_tie_is_flushed() {
    let leaf = make_node(
        "leaf",
        1,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 0, 1))],
        &[],
    );
    let spine = make_node(
        "spine",
        2,
        LevelSymbol::Value(1),
        &[("if1", addr(10, 0, 0, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![leaf, spine],
        vec![Link {
            a: (0, "if1"),
            b: (1, "if1"),
        }],
    );
    net.converge();

    // Inject a TIE claiming to be originated by the spine, which the
    // spine doesn't have in its database.
    let stale_tie_id = TieId {
        direction: Direction::South,
        originator: SystemId::from(2),
        tie_type: TieType::Prefix,
        tie_nr: 9,
    };
    let stale = Packet {
        hdr: Header::new(SystemId::from(1), Some(Level::from(0))),
        content: Content::Tie(TiePacket {
            header: TieHeader {
                tie_id: stale_tie_id,
                seq_nr: 7,
                remaining_lifetime: 3600,
                origination_time: None,
            },
            element: TieElement::Prefix(PrefixElement {
                prefixes: [(
                    "192.0.2.0/24".parse().unwrap(),
                    PrefixAttrs {
                        metric: 1,
                        tags: Default::default(),
                    },
                )]
                .into(),
            }),
        }),
    };
    net.nodes[1].process_protocol_msg(ProtocolMsg::UdpRxPacket(
        UdpRxPacketMsg {
            iface_key: InterfaceKey::Value("if1".to_owned()),
            flood: true,
            src: SocketAddr::new(addr(10, 0, 0, 1).into(), 9000),
            packet: Ok(stale),
        },
    ));
    net.nodes[1].process_queued();

    // The spine re-originates the TIE empty, with a bumped sequence
    // number and a short lifetime.
    let spine_state = net.nodes[1].state.as_ref().unwrap();
    let flushed = spine_state
        .tiedb
        .get(&stale_tie_id)
        .expect("flushing TIE not originated");
    assert_eq!(flushed.header.seq_nr, 8);
    assert_eq!(flushed.header.remaining_lifetime, 60);
    let TieElement::Prefix(element) = &flushed.element else {
        panic!("flushing TIE has wrong element");
    };
    assert!(element.prefixes.is_empty());
}

#[tokio::test]
async fn link_failure_tears_down_adjacency_and_routes() {
    let leaf = make_node(
        "leaf",
        1,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 0, 1))],
        &[("10.1.1.0/24", 10)],
    );
    let spine = make_node(
        "spine",
        2,
        LevelSymbol::Value(1),
        &[("if1", addr(10, 0, 0, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![leaf, spine],
        vec![Link {
            a: (0, "if1"),
            b: (1, "if1"),
        }],
    );
    net.converge();
    assert_eq!(net.lie_state(0, "if1"), LieState::ThreeWay);
    assert!(
        net.nodes[0]
            .state
            .as_ref()
            .unwrap()
            .rib
            .v4
            .get_route(&default_v4())
            .is_some()
    );

    // Sever the link.
    net.nodes[0]
        .set_interface_failure("if1", FailureMode::Failed)
        .unwrap();
    net.nodes[1]
        .set_interface_failure("if1", FailureMode::Failed)
        .unwrap();

    // Within holdtime + 1 ticks both sides fall back to one-way.
    for _ in 0..4 {
        net.tick_timers();
        net.exchange_once();
    }
    assert_eq!(net.lie_state(0, "if1"), LieState::OneWay);
    assert_eq!(net.lie_state(1, "if1"), LieState::OneWay);

    // The flooding queues were cleared atomically.
    let iface = net.nodes[0]
        .arenas
        .interfaces
        .get_by_name("if1")
        .unwrap();
    assert!(iface.state.queues.tx.is_empty());
    assert!(iface.state.queues.rtx.is_empty());
    assert!(iface.state.queues.req.is_empty());
    assert!(iface.state.queues.ack.is_empty());

    // Node TIEs regenerate without the lost neighbor.
    let spine_state = net.nodes[1].state.as_ref().unwrap();
    let node_tie = spine_state
        .tiedb
        .get(&my_tie_id(2, Direction::South, TieType::Node))
        .unwrap();
    let TieElement::Node(element) = &node_tie.element else {
        panic!("node TIE has wrong element");
    };
    assert!(element.neighbors.is_empty());

    // The spine withdraws its southbound default by originating an empty
    // South Prefix TIE with a higher sequence number.
    let south_prefix = spine_state
        .tiedb
        .get(&my_tie_id(2, Direction::South, TieType::Prefix))
        .unwrap();
    assert!(south_prefix.header.seq_nr > 1);
    let TieElement::Prefix(element) = &south_prefix.element else {
        panic!("south prefix TIE has wrong element");
    };
    assert!(element.prefixes.is_empty());

    // After the coalesced SPF runs, the leaf's default route is gone.
    net.settle_spf();
    assert!(
        net.nodes[0]
            .state
            .as_ref()
            .unwrap()
            .rib
            .v4
            .get_route(&default_v4())
            .is_none()
    );
}

#[tokio::test]
async fn parallel_links_collapse_and_ecmp() {
    let leaf = make_node(
        "leaf",
        1,
        LevelSymbol::Leaf,
        &[("if1", addr(10, 0, 1, 1)), ("if2", addr(10, 0, 2, 1))],
        &[],
    );
    let spine = make_node(
        "spine",
        2,
        LevelSymbol::Value(1),
        &[("if1", addr(10, 0, 1, 2)), ("if2", addr(10, 0, 2, 2))],
        &[],
    );
    let mut net = Net::new(
        vec![leaf, spine],
        vec![
            Link {
                a: (0, "if1"),
                b: (1, "if1"),
            },
            Link {
                a: (0, "if2"),
                b: (1, "if2"),
            },
        ],
    );
    net.converge();

    for ifname in ["if1", "if2"] {
        assert_eq!(net.lie_state(0, ifname), LieState::ThreeWay);
        assert_eq!(net.lie_state(1, ifname), LieState::ThreeWay);
    }

    // The spine's node TIE carries a single entry for the leaf with both
    // link-id pairs.
    let spine_state = net.nodes[1].state.as_ref().unwrap();
    let node_tie = spine_state
        .tiedb
        .get(&my_tie_id(2, Direction::South, TieType::Node))
        .unwrap();
    let TieElement::Node(element) = &node_tie.element else {
        panic!("node TIE has wrong element");
    };
    assert_eq!(element.neighbors.len(), 1);
    let entry = element.neighbors.get(&SystemId::from(1)).unwrap();
    assert_eq!(entry.link_ids.len(), 2);

    // The leaf's default route has one next hop per parallel link.
    let leaf_state = net.nodes[0].state.as_ref().unwrap();
    let route = leaf_state.rib.v4.get_route(&default_v4()).unwrap();
    assert_eq!(route.owner, Owner::NorthSpf);
    assert_eq!(route.next_hops.len(), 2);
}
