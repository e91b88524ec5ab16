//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use tracing::debug;

use crate::debug::Debug;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::packet::consts::{
    DEFAULT_LIFETIME, FLUSH_LIFETIME, LIFETIME_DIFF2IGNORE, MY_TIE_NR,
};
use crate::packet::pdu::{
    Content, NodeElement, NodeFlags, NodeNeighbor, PrefixElement, TidePacket,
    TiePacket, TirePacket, TieElement,
};
use crate::packet::{
    Direction, Level, LinkDirection, LinkIdPair, PrefixAttrs, SystemId,
    TieHeader, TieId, TieType,
};
use crate::adjacency::LieState;
use crate::spf;

// Ordered map of all TIEs known to a node, keyed by TIE-ID.
#[derive(Debug, Default)]
pub struct TieDb {
    ties: BTreeMap<TieId, TiePacket>,
}

// Outcome of processing one received TIDE.
#[derive(Debug, Default)]
pub struct TideResult {
    // TIEs to request from the peer.
    pub request: Vec<TieHeader>,
    // TIEs to start sending to the peer.
    pub start_sending: Vec<TieHeader>,
    // TIEs the peer already has; stop sending them.
    pub stop_sending: Vec<TieHeader>,
}

// Outcome of processing one received TIRE.
#[derive(Debug, Default)]
pub struct TireResult {
    pub request: Vec<TieHeader>,
    pub start_sending: Vec<TieHeader>,
    pub acked: Vec<TieHeader>,
}

// ===== impl TieDb =====

impl TieDb {
    pub fn get(&self, tie_id: &TieId) -> Option<&TiePacket> {
        self.ties.get(tie_id)
    }

    pub(crate) fn get_mut(&mut self, tie_id: &TieId) -> Option<&mut TiePacket> {
        self.ties.get_mut(tie_id)
    }

    pub(crate) fn insert(&mut self, tie: TiePacket) -> Option<TiePacket> {
        self.ties.insert(tie.header.tie_id, tie)
    }

    pub(crate) fn remove(&mut self, tie_id: &TieId) -> Option<TiePacket> {
        self.ties.remove(tie_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TiePacket> {
        self.ties.values()
    }

    pub fn len(&self) -> usize {
        self.ties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ties.is_empty()
    }

    // Returns all TIE headers within the given range, in TIE-ID order.
    pub(crate) fn headers_in_range(
        &self,
        start: Bound<TieId>,
        end: Bound<TieId>,
    ) -> impl Iterator<Item = TieHeader> + '_ {
        self.ties.range((start, end)).map(|(_, tie)| tie.header)
    }

    // Returns all TIEs of the given type originated by the given node in
    // the given direction, in TIE-ID order.
    pub(crate) fn ties_of_type(
        &self,
        direction: Direction,
        originator: SystemId,
        tie_type: TieType,
    ) -> impl Iterator<Item = &TiePacket> {
        let start = TieId {
            direction,
            originator,
            tie_type,
            tie_nr: 0,
        };
        let end = TieId {
            direction,
            originator,
            tie_type,
            tie_nr: u32::MAX,
        };
        self.ties.range(start..=end).map(|(_, tie)| tie)
    }

    // Level of the originator of a Node TIE, as recorded in the database.
    pub(crate) fn tie_originator_level(
        &self,
        header: &TieHeader,
    ) -> Option<Level> {
        self.get(&header.tie_id).and_then(|tie| match &tie.element {
            TieElement::Node(node) => node.level,
            _ => None,
        })
    }
}

// ===== global functions =====

// Compares the age of two headers describing the same TIE.
//
// Higher sequence number wins. A zero remaining lifetime marks a request
// and loses against any live copy. Lifetime differences within
// `LIFETIME_DIFF2IGNORE` are considered equal age. The origination time is
// never consulted.
pub fn compare_tie_header_age(a: &TieHeader, b: &TieHeader) -> Ordering {
    debug_assert_eq!(a.tie_id, b.tie_id);

    let cmp = a.seq_nr.cmp(&b.seq_nr);
    if cmp != Ordering::Equal {
        return cmp;
    }
    match (a.remaining_lifetime, b.remaining_lifetime) {
        (0, 0) => Ordering::Equal,
        (0, _) => Ordering::Less,
        (_, 0) => Ordering::Greater,
        (lt_a, lt_b) if lt_a.abs_diff(lt_b) > LIFETIME_DIFF2IGNORE => {
            lt_a.cmp(&lt_b)
        }
        _ => Ordering::Equal,
    }
}

// Whether replacing `old` with `new` could affect the SPF result.
fn ties_differ_enough_for_spf(old: &TiePacket, new: &TiePacket) -> bool {
    debug_assert_eq!(old.header.tie_id, new.header.tie_id);

    if old.header.seq_nr != new.header.seq_nr {
        return true;
    }
    // All non-zero remaining lifetimes are equivalent for SPF purposes.
    if (old.header.remaining_lifetime == 0)
        != (new.header.remaining_lifetime == 0)
    {
        return true;
    }
    old.element != new.element
}

// Stores a TIE, triggering an SPF run when the change is relevant.
pub(crate) fn store_tie(instance: &mut InstanceUpView<'_>, tie: TiePacket) {
    Debug::TieInstall(&tie).log();

    let tie_id = tie.header.tie_id;
    let trigger = match instance.state.tiedb.get(&tie_id) {
        Some(old_tie) => ties_differ_enough_for_spf(old_tie, &tie),
        None => true,
    };
    instance.state.tiedb.insert(tie);
    if trigger {
        spf::trigger(instance, format!("TIE {tie_id} changed"));
    }
}

// Removes a TIE. Removing a TIE that isn't in the database is not an error.
pub(crate) fn remove_tie(instance: &mut InstanceUpView<'_>, tie_id: &TieId) {
    if instance.state.tiedb.remove(tie_id).is_some() {
        Debug::TieRemove(tie_id).log();
        spf::trigger(instance, format!("TIE {tie_id} removed"));
    }
}

// Ages every stored TIE by one second, flushing the ones whose remaining
// lifetime reached zero. Returns the number of expired TIEs.
pub(crate) fn age_ties(instance: &mut InstanceUpView<'_>) -> usize {
    let mut expired = vec![];
    for tie in instance.state.tiedb.ties.values_mut() {
        tie.header.remaining_lifetime =
            tie.header.remaining_lifetime.saturating_sub(1);
        if tie.header.remaining_lifetime == 0 {
            expired.push(tie.header.tie_id);
        }
    }
    for tie_id in &expired {
        Debug::TieExpire(tie_id).log();
        remove_tie(instance, tie_id);
    }
    expired.len()
}

// ===== self-origination =====

// TIE-ID of one of this node's self-originated TIEs.
pub(crate) fn my_tie_id(
    instance: &InstanceUpView<'_>,
    direction: Direction,
    tie_type: TieType,
) -> TieId {
    TieId {
        direction,
        originator: instance.config.system_id,
        tie_type,
        tie_nr: MY_TIE_NR,
    }
}

fn make_tie_header(tie_id: TieId, seq_nr: u64) -> TieHeader {
    TieHeader {
        tie_id,
        seq_nr,
        remaining_lifetime: DEFAULT_LIFETIME,
        origination_time: None,
    }
}

// Regenerates the self-originated Node TIEs for both directions.
//
// The neighbor set reflects exactly the interfaces currently in the
// three-way state, with parallel links to the same neighbor collapsed into
// a single entry carrying all link-id pairs.
pub(crate) fn regenerate_node_ties(
    instance: &mut InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let my_level = instance.level_value();

    let mut neighbors: BTreeMap<SystemId, NodeNeighbor> = BTreeMap::new();
    for iface in arenas
        .interfaces
        .iter()
        .filter(|iface| iface.state.fsm.state() == LieState::ThreeWay)
    {
        let Some(neighbor) = &iface.state.neighbor else {
            continue;
        };
        let link_id_pair = LinkIdPair {
            local_id: iface.id,
            remote_id: neighbor.remote_id,
        };
        neighbors
            .entry(neighbor.system_id)
            .and_modify(|entry| {
                entry.link_ids.insert(link_id_pair);
                entry.cost = entry.cost.min(iface.config.metric);
            })
            .or_insert_with(|| NodeNeighbor {
                level: neighbor.level,
                cost: iface.config.metric,
                link_ids: [link_id_pair].into(),
                bandwidth: 100,
            });
    }

    let mut flags = NodeFlags::default();
    if instance.config.overload {
        flags.insert(NodeFlags::OVERLOAD);
    }
    let element = NodeElement {
        name: Some(instance.name.to_owned()),
        level: my_level,
        neighbors,
        flags,
    };

    for direction in [Direction::South, Direction::North] {
        let seq_nr = instance.state.node_tie_seq_nrs.get_mut(direction);
        *seq_nr += 1;
        let seq_nr = *seq_nr;
        let tie = TiePacket {
            header: make_tie_header(
                my_tie_id(instance, direction, TieType::Node),
                seq_nr,
            ),
            element: TieElement::Node(element.clone()),
        };
        Debug::TieOriginate(&tie).log();
        store_tie(instance, tie);
    }
}

// Regenerates the self-originated North Prefix TIE from the configured
// prefixes. When no prefixes are configured the TIE is withdrawn.
pub(crate) fn regenerate_north_prefix_tie(instance: &mut InstanceUpView<'_>) {
    let tie_id = my_tie_id(instance, Direction::North, TieType::Prefix);

    let mut prefixes = instance.config.v4prefixes.clone();
    prefixes.extend(
        instance
            .config
            .v6prefixes
            .iter()
            .map(|(prefix, attrs)| (*prefix, attrs.clone())),
    );
    if prefixes.is_empty() {
        remove_tie(instance, &tie_id);
        return;
    }

    instance.state.north_prefix_seq_nr += 1;
    let tie = TiePacket {
        header: make_tie_header(tie_id, instance.state.north_prefix_seq_nr),
        element: TieElement::Prefix(PrefixElement { prefixes }),
    };
    Debug::TieOriginate(&tie).log();
    store_tie(instance, tie);
}

// Node TIE elements of the other nodes at this node's level.
fn other_nodes_at_my_level<'a>(
    instance: &'a InstanceUpView<'_>,
) -> impl Iterator<Item = &'a NodeElement> {
    let my_level = instance.level_value();
    let my_system_id = instance.config.system_id;
    instance
        .state
        .tiedb
        .iter()
        .filter(move |tie| tie.header.tie_id.originator != my_system_id)
        .filter_map(|tie| match &tie.element {
            TieElement::Node(node) => Some(node),
            _ => None,
        })
        .filter(move |node| node.level.is_some() && node.level == my_level)
}

// Whether this node has at least one southbound or east-west three-way
// adjacency.
fn have_s_or_ew_adjacency(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) -> bool {
    arenas
        .interfaces
        .iter()
        .filter(|iface| iface.state.fsm.state() == LieState::ThreeWay)
        .filter_map(|iface| iface.neighbor_direction(instance))
        .any(|direction| {
            matches!(direction, LinkDirection::South | LinkDirection::EastWest)
        })
}

// Regenerates (or withdraws) the self-originated South Prefix TIE carrying
// the default route.
//
// Once a South Prefix TIE has been originated, a transition of the policy
// to false originates an *empty* South Prefix TIE with a higher sequence
// number, so the stale default drains from the fabric.
pub(crate) fn regenerate_south_prefix_tie(
    instance: &mut InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let (originate, reason) = south_default_decision(instance, arenas);

    // If no default is wanted now and none was ever originated, there is
    // nothing to do.
    if !originate && instance.state.south_prefix_seq_nr.is_none() {
        debug!("don't originate south prefix TIE: {reason}");
        return;
    }
    if originate == instance.state.originating_default
        && instance.state.south_prefix_seq_nr.is_some()
    {
        return;
    }

    let seq_nr = instance.state.south_prefix_seq_nr.unwrap_or(0) + 1;
    instance.state.south_prefix_seq_nr = Some(seq_nr);
    instance.state.originating_default = originate;

    let mut prefixes = BTreeMap::new();
    if originate {
        // The metric of the originated default. The protocol doesn't
        // specify one; 1 interoperates with existing implementations.
        let attrs = PrefixAttrs {
            metric: 1,
            tags: Default::default(),
        };
        prefixes.insert("0.0.0.0/0".parse().unwrap(), attrs.clone());
        prefixes.insert("::/0".parse().unwrap(), attrs);
    }
    let tie = TiePacket {
        header: make_tie_header(
            my_tie_id(instance, Direction::South, TieType::Prefix),
            seq_nr,
        ),
        element: TieElement::Prefix(PrefixElement { prefixes }),
    };
    debug!(%originate, "regenerated south prefix TIE: {reason}");
    Debug::TieOriginate(&tie).log();
    store_tie(instance, tie);
}

// The southbound default-route origination policy.
fn south_default_decision(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) -> (bool, &'static str) {
    if instance.config.overload {
        return (false, "this node is overloaded");
    }
    if !have_s_or_ew_adjacency(instance, arenas) {
        return (false, "this node has no south-bound or east-west adjacency");
    }
    let mut others = other_nodes_at_my_level(instance).peekable();
    if others.peek().is_none() {
        return (true, "there are no other nodes at this level");
    }
    let others: Vec<_> = others.collect();
    if others
        .iter()
        .all(|node| node.flags.contains(NodeFlags::OVERLOAD))
    {
        return (true, "all other nodes at this level are overloaded");
    }
    let my_level = instance.level_value();
    if others.iter().all(|node| {
        node.neighbors
            .values()
            .all(|neighbor| Some(neighbor.level) <= my_level)
    }) {
        return (
            true,
            "all other nodes at this level have no north-bound adjacencies",
        );
    }
    if instance.state.rib.has_north_spf_default() {
        return (true, "reachability to a default route computed by N-SPF");
    }
    (false, "no north-bound default route")
}

// ===== flushing =====

// Synthesizes an empty TIE with the same TIE-ID as the received header, a
// higher sequence number, and a short remaining lifetime, so the stale TIE
// drains from the fabric.
fn make_according_empty_tie(
    instance: &InstanceUpView<'_>,
    rx_header: &TieHeader,
) -> TiePacket {
    let header = TieHeader {
        tie_id: rx_header.tie_id,
        seq_nr: rx_header.seq_nr + 1,
        remaining_lifetime: FLUSH_LIFETIME,
        origination_time: None,
    };
    let element = match rx_header.tie_id.tie_type {
        TieType::Node => {
            // Reuse the contents of the node TIE this node actually
            // originates, but without any neighbors.
            let real_id = TieId {
                tie_nr: MY_TIE_NR,
                ..rx_header.tie_id
            };
            let mut element = match instance
                .state
                .tiedb
                .get(&real_id)
                .map(|tie| &tie.element)
            {
                Some(TieElement::Node(node)) => node.clone(),
                _ => NodeElement {
                    name: Some(instance.name.to_owned()),
                    level: instance.level_value(),
                    ..Default::default()
                },
            };
            element.neighbors.clear();
            TieElement::Node(element)
        }
        TieType::Prefix => TieElement::Prefix(Default::default()),
        TieType::PositiveDisagg => {
            TieElement::PositiveDisagg(Default::default())
        }
        TieType::NegativeDisagg => TieElement::NegativeDisagg(Bytes::new()),
        TieType::PolicyGuided => TieElement::PolicyGuided(Bytes::new()),
        TieType::KeyValue => TieElement::KeyValue(Default::default()),
    };
    TiePacket { header, element }
}

// Keeps the self-origination sequence counters ahead of any sequence
// number observed in the fabric for our own TIEs.
fn note_own_seq_nr(instance: &mut InstanceUpView<'_>, header: &TieHeader) {
    let tie_id = header.tie_id;
    if tie_id.originator != instance.config.system_id
        || tie_id.tie_nr != MY_TIE_NR
    {
        return;
    }
    let state = &mut *instance.state;
    match (tie_id.tie_type, tie_id.direction) {
        (TieType::Node, direction) => {
            let seq_nr = state.node_tie_seq_nrs.get_mut(direction);
            *seq_nr = (*seq_nr).max(header.seq_nr);
        }
        (TieType::Prefix, Direction::North) => {
            state.north_prefix_seq_nr =
                state.north_prefix_seq_nr.max(header.seq_nr);
        }
        (TieType::Prefix, Direction::South) => {
            state.south_prefix_seq_nr = Some(
                state.south_prefix_seq_nr.unwrap_or(0).max(header.seq_nr),
            );
        }
        _ => (),
    }
}

// A version of one of this node's own TIEs was seen in the fabric that is
// newer than (or absent from) the local database: re-originate it with a
// higher sequence number, or synthesize an empty flushing TIE.
pub(crate) fn bump_own_tie(
    instance: &mut InstanceUpView<'_>,
    rx_header: &TieHeader,
) -> TieHeader {
    let header =
        match instance.state.tiedb.get_mut(&rx_header.tie_id) {
            Some(db_tie) => {
                db_tie.header.seq_nr = rx_header.seq_nr + 1;
                db_tie.header
            }
            None => {
                let tie = make_according_empty_tie(instance, rx_header);
                let header = tie.header;
                Debug::TieFlush(&tie).log();
                store_tie(instance, tie);
                header
            }
        };
    note_own_seq_nr(instance, &header);
    header
}

// ===== receive processing =====

// Compares a received TIE against the local database.
//
// Returns the header to start sending (if any) and the header to
// acknowledge (if any).
pub(crate) fn process_received_tie(
    instance: &mut InstanceUpView<'_>,
    rx_tie: &TiePacket,
) -> (Option<TieHeader>, Option<TieHeader>) {
    let rx_header = rx_tie.header;
    let rx_tie_id = rx_header.tie_id;
    let self_originated = rx_tie_id.originator == instance.config.system_id;

    match instance.state.tiedb.get(&rx_tie_id) {
        None => {
            if self_originated {
                // An apparently-own TIE this node doesn't have: flush it.
                (Some(bump_own_tie(instance, &rx_header)), None)
            } else {
                store_tie(instance, rx_tie.clone());
                (None, Some(rx_header))
            }
        }
        Some(db_tie) => match compare_tie_header_age(&db_tie.header, &rx_header)
        {
            Ordering::Less => {
                if self_originated {
                    (Some(bump_own_tie(instance, &rx_header)), None)
                } else {
                    store_tie(instance, rx_tie.clone());
                    (None, Some(rx_header))
                }
            }
            Ordering::Greater => (Some(db_tie.header), None),
            Ordering::Equal => (None, Some(db_tie.header)),
        },
    }
}

// Processes a received TIDE: fills gaps from the local database, requests
// newer TIEs, and schedules retransmissions of newer local copies.
//
// TIDEs are assumed to advance monotonically through the TIE-ID space;
// a start of range below the end of the previously received TIDE means the
// neighbor wrapped around.
pub(crate) fn process_received_tide(
    instance: &mut InstanceUpView<'_>,
    last_tide_end: &mut TieId,
    tide: &TidePacket,
) -> TideResult {
    let mut result = TideResult::default();

    // Wrap detection.
    if tide.start_range < *last_tide_end {
        *last_tide_end = TieId::MIN;
    }
    // Start sending any database TIEs that fall in the gap between the end
    // of the previous TIDE and the start of this one.
    if tide.start_range > *last_tide_end {
        result.start_sending.extend(instance.state.tiedb.headers_in_range(
            Bound::Included(*last_tide_end),
            Bound::Excluded(tide.start_range),
        ));
    }
    *last_tide_end = tide.end_range;

    // Process the covered range, filling the gaps between the headers.
    let mut gap_start = Bound::Included(tide.start_range);
    for rx_header in &tide.headers {
        result.start_sending.extend(instance.state.tiedb.headers_in_range(
            gap_start,
            Bound::Excluded(rx_header.tie_id),
        ));
        gap_start = Bound::Excluded(rx_header.tie_id);

        let self_originated =
            rx_header.tie_id.originator == instance.config.system_id;
        match instance.state.tiedb.get(&rx_header.tie_id) {
            None => {
                if self_originated {
                    result
                        .start_sending
                        .push(bump_own_tie(instance, rx_header));
                } else {
                    // Request the missing TIE with a zero sequence number
                    // and zero lifetime.
                    result.request.push(TieHeader::request(rx_header.tie_id));
                }
            }
            Some(db_tie) => {
                match compare_tie_header_age(&db_tie.header, rx_header) {
                    Ordering::Less => {
                        if self_originated {
                            result
                                .start_sending
                                .push(bump_own_tie(instance, rx_header));
                        } else {
                            result.request.push(*rx_header);
                        }
                    }
                    Ordering::Greater => {
                        result.start_sending.push(db_tie.header);
                    }
                    Ordering::Equal => {
                        result.stop_sending.push(db_tie.header);
                    }
                }
            }
        }
    }

    // End-of-range gap.
    result.start_sending.extend(
        instance
            .state
            .tiedb
            .headers_in_range(gap_start, Bound::Included(tide.end_range)),
    );

    result
}

// Processes a received TIRE: headers newer than the local copy become
// requests, older ones trigger a send, and equal ones are acknowledgments.
pub(crate) fn process_received_tire(
    instance: &mut InstanceUpView<'_>,
    tire: &TirePacket,
) -> TireResult {
    let mut result = TireResult::default();
    for rx_header in &tire.headers {
        let Some(db_tie) = instance.state.tiedb.get(&rx_header.tie_id) else {
            continue;
        };
        match compare_tie_header_age(&db_tie.header, rx_header) {
            Ordering::Less => result.request.push(*rx_header),
            Ordering::Greater => result.start_sending.push(db_tie.header),
            Ordering::Equal => result.acked.push(db_tie.header),
        }
    }
    result
}

// ===== flooding scopes =====

// The flooding scope rule matrix: whether a TIE may be flooded from a node
// to a neighbor in the given direction.
pub(crate) fn is_flood_allowed(
    db: &TieDb,
    header: &TieHeader,
    to_node_direction: Option<LinkDirection>,
    to_node_system_id: SystemId,
    from_node_system_id: SystemId,
    from_node_level: Option<Level>,
    from_node_is_top_of_fabric: bool,
) -> bool {
    let tie_id = header.tie_id;
    match (tie_id.direction, tie_id.tie_type) {
        (Direction::South, TieType::Node) => match to_node_direction {
            // Node S-TIE to S: flood if the level of the originator is the
            // same as the level of this node.
            Some(LinkDirection::South) => {
                let originator_level = db.tie_originator_level(header);
                originator_level.is_some()
                    && originator_level == from_node_level
            }
            // Node S-TIE to N: flood if the level of the originator is
            // higher than the level of this node.
            Some(LinkDirection::North) => {
                match (db.tie_originator_level(header), from_node_level) {
                    (Some(originator_level), Some(from_level)) => {
                        originator_level > from_level
                    }
                    _ => false,
                }
            }
            // Node S-TIE to EW: flood only if this node is not top of
            // fabric.
            Some(LinkDirection::EastWest) => !from_node_is_top_of_fabric,
            None => false,
        },
        (Direction::South, _) => match to_node_direction {
            // Non-node S-TIE to S: flood self-originated only.
            Some(LinkDirection::South) => {
                tie_id.originator == from_node_system_id
            }
            // Non-node S-TIE to N: flood only if the neighbor is the
            // originator of the TIE.
            Some(LinkDirection::North) => {
                tie_id.originator == to_node_system_id
            }
            // Non-node S-TIE to EW: flood only if self-originated and this
            // node is not top of fabric.
            Some(LinkDirection::EastWest) => {
                !from_node_is_top_of_fabric
                    && tie_id.originator == from_node_system_id
            }
            None => false,
        },
        (Direction::North, _) => match to_node_direction {
            // N-TIE to S: never flood.
            Some(LinkDirection::South) => false,
            // N-TIE to N: always flood.
            Some(LinkDirection::North) => true,
            // N-TIE to EW: flood only if this node is top of fabric.
            Some(LinkDirection::EastWest) => from_node_is_top_of_fabric,
            None => false,
        },
    }
}

pub(crate) fn flood_allowed_from_node_to_nbr(
    db: &TieDb,
    header: &TieHeader,
    neighbor_direction: Option<LinkDirection>,
    neighbor_system_id: SystemId,
    node_system_id: SystemId,
    node_level: Option<Level>,
    node_is_top_of_fabric: bool,
) -> bool {
    is_flood_allowed(
        db,
        header,
        neighbor_direction,
        neighbor_system_id,
        node_system_id,
        node_level,
        node_is_top_of_fabric,
    )
}

// Whether the neighbor would be allowed to flood the TIE to this node:
// the same matrix, applied from the neighbor's perspective.
pub(crate) fn flood_allowed_from_nbr_to_node(
    db: &TieDb,
    header: &TieHeader,
    neighbor_direction: Option<LinkDirection>,
    neighbor_system_id: SystemId,
    neighbor_level: Option<Level>,
    neighbor_is_top_of_fabric: bool,
    node_system_id: SystemId,
) -> bool {
    let neighbor_reverse_direction = match neighbor_direction {
        Some(LinkDirection::South) => Some(LinkDirection::North),
        Some(LinkDirection::North) => Some(LinkDirection::South),
        other => other,
    };
    is_flood_allowed(
        db,
        header,
        neighbor_reverse_direction,
        node_system_id,
        neighbor_system_id,
        neighbor_level,
        neighbor_is_top_of_fabric,
    )
}

// ===== TIDE generation =====

// Builds the TIDE advertised to one particular neighbor.
//
// A single TIDE covers the entire TIE-ID space. A header is listed if this
// node may flood the TIE to the neighbor, or if the neighbor may flood it
// to us (so it learns that we already have it).
pub(crate) fn generate_tide(
    instance: &InstanceUpView<'_>,
    neighbor_direction: Option<LinkDirection>,
    neighbor_system_id: SystemId,
    neighbor_level: Option<Level>,
    neighbor_is_top_of_fabric: bool,
) -> TidePacket {
    let db = &instance.state.tiedb;
    let my_system_id = instance.config.system_id;
    let my_level = instance.level_value();
    let i_am_top_of_fabric = instance.is_top_of_fabric();

    let headers = db
        .iter()
        .map(|tie| tie.header)
        .filter(|header| {
            flood_allowed_from_node_to_nbr(
                db,
                header,
                neighbor_direction,
                neighbor_system_id,
                my_system_id,
                my_level,
                i_am_top_of_fabric,
            ) || flood_allowed_from_nbr_to_node(
                db,
                header,
                neighbor_direction,
                neighbor_system_id,
                neighbor_level,
                neighbor_is_top_of_fabric,
                my_system_id,
            )
        })
        .collect();

    TidePacket {
        start_range: TieId::MIN,
        end_range: TieId::MAX,
        headers,
    }
}

// Generates and sends a TIDE on the given interface, if its adjacency is
// in the three-way state.
pub(crate) fn send_tide_on_interface(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
) {
    if iface.state.fsm.state() != LieState::ThreeWay {
        return;
    }
    let Some(neighbor) = iface.state.neighbor.clone() else {
        return;
    };
    let tide = generate_tide(
        instance,
        iface.neighbor_direction(instance),
        neighbor.system_id,
        Some(neighbor.level),
        neighbor.is_top_of_fabric(),
    );
    iface.send_packet(instance, Content::Tide(tide), true);
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn tie_id(
        direction: Direction,
        originator: u64,
        tie_type: TieType,
        tie_nr: u32,
    ) -> TieId {
        TieId {
            direction,
            originator: SystemId::from(originator),
            tie_type,
            tie_nr,
        }
    }

    fn header(tie_id: TieId, seq_nr: u64, lifetime: u32) -> TieHeader {
        TieHeader {
            tie_id,
            seq_nr,
            remaining_lifetime: lifetime,
            origination_time: None,
        }
    }

    fn node_tie(
        direction: Direction,
        originator: u64,
        level: u8,
    ) -> TiePacket {
        TiePacket {
            header: header(
                tie_id(direction, originator, TieType::Node, 1),
                1,
                604800,
            ),
            element: TieElement::Node(NodeElement {
                name: None,
                level: Some(Level::from(level)),
                neighbors: Default::default(),
                flags: Default::default(),
            }),
        }
    }

    #[test]
    fn tie_age_seq_nr_dominates() {
        let id = tie_id(Direction::South, 1, TieType::Node, 1);
        let a = header(id, 2, 100);
        let b = header(id, 1, 604800);
        assert_eq!(compare_tie_header_age(&a, &b), Ordering::Greater);
        assert_eq!(compare_tie_header_age(&b, &a), Ordering::Less);
    }

    #[test]
    fn tie_age_zero_lifetime_is_a_request() {
        let id = tie_id(Direction::South, 1, TieType::Node, 1);
        let live = header(id, 5, 1);
        let request = header(id, 5, 0);
        assert_eq!(
            compare_tie_header_age(&live, &request),
            Ordering::Greater
        );
        assert_eq!(compare_tie_header_age(&request, &live), Ordering::Less);
        assert_eq!(
            compare_tie_header_age(&request, &request),
            Ordering::Equal
        );
    }

    #[test]
    fn tie_age_lifetime_difference_boundary() {
        let id = tie_id(Direction::South, 1, TieType::Node, 1);
        // Within the ignore threshold: equal age.
        let a = header(id, 5, 1000);
        let b = header(id, 5, 1000 + LIFETIME_DIFF2IGNORE);
        assert_eq!(compare_tie_header_age(&a, &b), Ordering::Equal);
        assert_eq!(compare_tie_header_age(&b, &a), Ordering::Equal);
        // Beyond the threshold: longer lifetime is newer.
        let c = header(id, 5, 1000 + LIFETIME_DIFF2IGNORE + 1);
        assert_eq!(compare_tie_header_age(&a, &c), Ordering::Less);
        assert_eq!(compare_tie_header_age(&c, &a), Ordering::Greater);
    }

    #[test]
    fn tie_age_antisymmetry() {
        let id = tie_id(Direction::North, 9, TieType::Prefix, 1);
        let headers = [
            header(id, 1, 0),
            header(id, 1, 100),
            header(id, 1, 604800),
            header(id, 2, 0),
            header(id, 2, 604800),
        ];
        for a in &headers {
            for b in &headers {
                assert_eq!(
                    compare_tie_header_age(a, b),
                    compare_tie_header_age(b, a).reverse()
                );
            }
        }
    }

    #[test]
    fn flood_scope_node_south_tie() {
        let mut db = TieDb::default();
        // Originator at level 2.
        db.insert(node_tie(Direction::South, 10, 2));
        let hdr = header(tie_id(Direction::South, 10, TieType::Node, 1), 1, 100);
        let me = SystemId::from(1);
        let nbr = SystemId::from(2);

        // To south: only if the originator level equals the sender level.
        assert!(is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::South),
            nbr,
            me,
            Some(Level::from(2)),
            false,
        ));
        assert!(!is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::South),
            nbr,
            me,
            Some(Level::from(1)),
            false,
        ));

        // To north: only if the originator level is higher than the sender
        // level.
        assert!(is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::North),
            nbr,
            me,
            Some(Level::from(1)),
            false,
        ));
        assert!(!is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::North),
            nbr,
            me,
            Some(Level::from(2)),
            false,
        ));

        // To east-west: only if the sender is not top of fabric.
        assert!(is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::EastWest),
            nbr,
            me,
            Some(Level::from(2)),
            false,
        ));
        assert!(!is_flood_allowed(
            &db,
            &hdr,
            Some(LinkDirection::EastWest),
            nbr,
            me,
            Some(Level::from(24)),
            true,
        ));
    }

    #[test]
    fn flood_scope_non_node_south_tie() {
        let db = TieDb::default();
        let me = SystemId::from(1);
        let nbr = SystemId::from(2);
        let mine = header(tie_id(Direction::South, 1, TieType::Prefix, 1), 1, 100);
        let theirs =
            header(tie_id(Direction::South, 2, TieType::Prefix, 1), 1, 100);

        // To south: self-originated only.
        assert!(is_flood_allowed(
            &db, &mine, Some(LinkDirection::South), nbr, me, None, false
        ));
        assert!(!is_flood_allowed(
            &db, &theirs, Some(LinkDirection::South), nbr, me, None, false
        ));

        // To north: only if the neighbor is the originator.
        assert!(is_flood_allowed(
            &db, &theirs, Some(LinkDirection::North), nbr, me, None, false
        ));
        assert!(!is_flood_allowed(
            &db, &mine, Some(LinkDirection::North), nbr, me, None, false
        ));

        // To east-west: self-originated and not top of fabric.
        assert!(is_flood_allowed(
            &db, &mine, Some(LinkDirection::EastWest), nbr, me, None, false
        ));
        assert!(!is_flood_allowed(
            &db, &mine, Some(LinkDirection::EastWest), nbr, me, None, true
        ));
    }

    #[test]
    fn flood_scope_north_tie() {
        let db = TieDb::default();
        let me = SystemId::from(1);
        let nbr = SystemId::from(2);
        let hdr = header(tie_id(Direction::North, 2, TieType::Prefix, 1), 1, 100);

        assert!(!is_flood_allowed(
            &db, &hdr, Some(LinkDirection::South), nbr, me, None, false
        ));
        assert!(is_flood_allowed(
            &db, &hdr, Some(LinkDirection::North), nbr, me, None, false
        ));
        assert!(is_flood_allowed(
            &db, &hdr, Some(LinkDirection::EastWest), nbr, me, None, true
        ));
        assert!(!is_flood_allowed(
            &db, &hdr, Some(LinkDirection::EastWest), nbr, me, None, false
        ));
    }

    #[test]
    fn flood_scope_request_symmetry() {
        // If A may flood a TIE to B, then B may request that TIE from A.
        let mut db = TieDb::default();
        db.insert(node_tie(Direction::South, 10, 2));
        let a = SystemId::from(1);
        let b = SystemId::from(2);
        let headers = [
            header(tie_id(Direction::South, 10, TieType::Node, 1), 1, 100),
            header(tie_id(Direction::South, 1, TieType::Prefix, 1), 1, 100),
            header(tie_id(Direction::North, 1, TieType::Prefix, 1), 1, 100),
            header(tie_id(Direction::North, 2, TieType::Node, 1), 1, 100),
        ];
        // A at level 2, B south of A at level 1.
        for hdr in &headers {
            let a_to_b = flood_allowed_from_node_to_nbr(
                &db,
                hdr,
                Some(LinkDirection::South),
                b,
                a,
                Some(Level::from(2)),
                false,
            );
            // From B's perspective, A is a northbound neighbor.
            let b_requests_from_a = flood_allowed_from_nbr_to_node(
                &db,
                hdr,
                Some(LinkDirection::North),
                a,
                Some(Level::from(2)),
                false,
                b,
            );
            assert_eq!(a_to_b, b_requests_from_a, "header {:?}", hdr.tie_id);
        }
    }
}
