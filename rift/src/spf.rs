//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ipnetwork::IpNetwork;
use rift_utils::task::TimeoutTask;

use crate::debug::Debug;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::packet::pdu::{NodeNeighbor, TieElement};
use crate::packet::{Direction, SystemId, Tags, TieType};
use crate::route::NextHop;
use crate::{route, tasks};

// Minimum interval between consecutive SPF runs, in seconds.
pub const SPF_MIN_INTERVAL: u64 = 1;
// Maximum number of retained trigger reasons.
const SPF_TRIGGER_HISTORY_LENGTH: usize = 10;

// Unique identifier of an SPF destination: a node or an attached prefix.
//
// The derived ordering processes node destinations before prefixes.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum SpfDestKey {
    Node(SystemId),
    Prefix(IpNetwork),
}

// One destination computed by SPF.
#[derive(Clone, Debug)]
pub struct SpfDest {
    pub key: SpfDestKey,
    // Name of the node, taken from its Node TIE.
    pub name: Option<String>,
    // Best known path cost so far.
    pub cost: u32,
    // Whether the best path has been definitely determined.
    pub best: bool,
    // System IDs of the predecessor nodes (multiple with ECMP).
    pub predecessors: Vec<SystemId>,
    // Union of the tags of the contributing prefix advertisements.
    pub tags: Tags,
    pub next_hops: BTreeSet<NextHop>,
}

// Scheduling state of the SPF computation.
//
// Triggers are coalesced: the first trigger runs immediately and starts
// the minimum-interval timer; triggers arriving while the timer runs set a
// pending flag that causes exactly one re-run on expiry.
#[derive(Debug, Default)]
pub struct SpfScheduler {
    pub defer_timer: Option<TimeoutTask>,
    pub pending: bool,
    pub runs: u64,
    pub triggers: u64,
    pub deferred: u64,
    pub trigger_history: VecDeque<String>,
}

// ===== impl SpfDest =====

impl SpfDest {
    fn new(key: SpfDestKey, cost: u32) -> SpfDest {
        SpfDest {
            key,
            name: None,
            cost,
            best: false,
            predecessors: vec![],
            tags: Default::default(),
            next_hops: Default::default(),
        }
    }
}

// ===== global functions =====

// Requests an SPF run, coalescing triggers through the minimum-interval
// timer.
pub(crate) fn trigger(instance: &mut InstanceUpView<'_>, reason: String) {
    Debug::SpfTrigger(&reason).log();

    let sched = &mut instance.state.spf_sched;
    sched.triggers += 1;
    sched.trigger_history.push_front(reason);
    sched.trigger_history.truncate(SPF_TRIGGER_HISTORY_LENGTH);

    if sched.defer_timer.is_none() {
        sched.pending = false;
        sched.defer_timer = Some(tasks::spf_defer_timer(
            &instance.tx.protocol_input.spf_defer,
        ));
        let _ = instance.tx.protocol_input.spf_run.send(
            tasks::messages::input::SpfRunMsg {},
        );
    } else {
        sched.pending = true;
        sched.deferred += 1;
    }
}

// Handles the expiry of the minimum-interval timer: re-runs SPF once if
// any trigger arrived while the timer was running.
pub(crate) fn defer_timer_expired(
    instance: &mut InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    instance.state.spf_sched.defer_timer = None;
    if instance.state.spf_sched.pending {
        instance.state.spf_sched.pending = false;
        instance.state.spf_sched.defer_timer = Some(tasks::spf_defer_timer(
            &instance.tx.protocol_input.spf_defer,
        ));
        run(instance, arenas);
    }
}

// Runs SPF in both directions and installs the results into the RIB.
pub(crate) fn run(
    instance: &mut InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    instance.state.spf_sched.runs += 1;
    for direction in [Direction::South, Direction::North] {
        run_direction(instance, arenas, direction);
    }
}

// Computes the shortest path to every reachable destination in the given
// direction, using the Dijkstra algorithm, and installs the resulting
// routes.
fn run_direction(
    instance: &mut InstanceUpView<'_>,
    arenas: &InstanceArenas,
    direction: Direction,
) {
    Debug::SpfStart(direction).log();

    let my_system_id = instance.config.system_id;
    let mut dest_table: BTreeMap<SpfDestKey, SpfDest> = BTreeMap::new();

    // Initially the only known destination is this node, at cost zero.
    let self_key = SpfDestKey::Node(my_system_id);
    let mut self_dest = SpfDest::new(self_key, 0);
    self_dest.name = Some(instance.name.to_owned());
    dest_table.insert(self_key, self_dest);

    // Candidate list ordered by (cost, key); the cheapest entry is settled
    // first. Improving the cost of a candidate removes and re-inserts its
    // key (decrease-key).
    let mut candidates: BTreeMap<(u32, SpfDestKey), ()> = BTreeMap::new();
    candidates.insert((0, self_key), ());

    while let Some(((cost, key), ())) = candidates.pop_first() {
        let dest = dest_table.get_mut(&key).unwrap();
        if dest.best {
            continue;
        }
        dest.best = true;

        // Only node destinations contribute further candidates.
        if let SpfDestKey::Node(system_id) = key {
            add_candidates_from_node(
                instance,
                arenas,
                direction,
                system_id,
                cost,
                &mut dest_table,
                &mut candidates,
            );
        }
    }

    Debug::SpfFinish(direction, dest_table.len()).log();

    // Install the computed routes into the RIB.
    route::install_spf_routes(instance, direction, &dest_table);

    // Keep the destination table around for inspection.
    *instance.state.spf_destinations.get_mut(direction) = dest_table;
}

// Expands one settled node: its neighbors in the direction of the SPF and
// its attached prefixes become candidates.
fn add_candidates_from_node(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    direction: Direction,
    node_system_id: SystemId,
    node_cost: u32,
    dest_table: &mut BTreeMap<SpfDestKey, SpfDest>,
    candidates: &mut BTreeMap<(u32, SpfDestKey), ()>,
) {
    let db = &instance.state.tiedb;
    let use_direction =
        use_tie_direction(instance.config.system_id, node_system_id, direction);

    // Update the name of the node from its first Node TIE.
    if let Some(name) = db
        .ties_of_type(use_direction, node_system_id, TieType::Node)
        .find_map(|tie| match &tie.element {
            TieElement::Node(node) => node.name.clone(),
            _ => None,
        })
        && let Some(dest) = dest_table.get_mut(&SpfDestKey::Node(node_system_id))
    {
        dest.name = Some(name);
    }

    // Consider each neighbor of the settled node in the SPF direction.
    for (nbr_system_id, nbr) in
        node_neighbors(instance, use_direction, node_system_id, direction)
    {
        // Only bidirectional adjacencies are used.
        if !is_neighbor_bidirectional(
            instance,
            node_system_id,
            nbr_system_id,
            &nbr,
            direction,
        ) {
            continue;
        }

        let cost = node_cost.saturating_add(nbr.cost);
        let dest = SpfDest::new(SpfDestKey::Node(nbr_system_id), cost);
        consider_candidate(
            instance,
            arenas,
            dest,
            Some(&nbr),
            node_system_id,
            dest_table,
            candidates,
        );
    }

    // Consider each prefix attached to the settled node.
    for tie in db.ties_of_type(use_direction, node_system_id, TieType::Prefix)
    {
        let TieElement::Prefix(element) = &tie.element else {
            continue;
        };
        for (prefix, attrs) in &element.prefixes {
            let cost = node_cost.saturating_add(attrs.metric);
            let mut dest = SpfDest::new(SpfDestKey::Prefix(*prefix), cost);
            dest.tags = attrs.tags.clone();
            consider_candidate(
                instance,
                arenas,
                dest,
                None,
                node_system_id,
                dest_table,
                candidates,
            );
        }
    }
}

// Relaxation: a strictly cheaper path replaces the destination, an
// equal-cost path merges into it (ECMP), a costlier path is ignored.
fn consider_candidate(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    mut dest: SpfDest,
    nbr: Option<&NodeNeighbor>,
    predecessor: SystemId,
    dest_table: &mut BTreeMap<SpfDestKey, SpfDest>,
    candidates: &mut BTreeMap<(u32, SpfDestKey), ()>,
) {
    let key = dest.key;
    match dest_table.get(&key).map(|old_dest| old_dest.cost) {
        None => {
            set_predecessor(
                instance, arenas, &mut dest, nbr, predecessor, dest_table,
            );
            candidates.insert((dest.cost, key), ());
            dest_table.insert(key, dest);
        }
        Some(old_cost) if dest.cost < old_cost => {
            // Strictly better path: replace, updating the candidate key.
            candidates.remove(&(old_cost, key));
            set_predecessor(
                instance, arenas, &mut dest, nbr, predecessor, dest_table,
            );
            candidates.insert((dest.cost, key), ());
            dest_table.insert(key, dest);
        }
        Some(old_cost) if dest.cost == old_cost => {
            // Equal-cost path: merge as ECMP.
            let inherited = dest_table
                .get(&SpfDestKey::Node(predecessor))
                .map(|pred_dest| pred_dest.next_hops.clone())
                .unwrap_or_default();
            let old_dest = dest_table.get_mut(&key).unwrap();
            if !old_dest.predecessors.contains(&predecessor) {
                old_dest.predecessors.push(predecessor);
            }
            old_dest.tags.extend(dest.tags.iter().copied());
            old_dest.next_hops.extend(inherited);
        }
        Some(..) => (),
    }
}

// Records the predecessor and derives the next hops: directly attached
// neighbors resolve each link-id pair to an outgoing interface and the
// neighbor's address, everything else inherits from the predecessor.
fn set_predecessor(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    dest: &mut SpfDest,
    nbr: Option<&NodeNeighbor>,
    predecessor: SystemId,
    dest_table: &BTreeMap<SpfDestKey, SpfDest>,
) {
    dest.predecessors = vec![predecessor];
    if let Some(nbr) = nbr
        && predecessor == instance.config.system_id
    {
        for link_id_pair in &nbr.link_ids {
            dest.next_hops
                .insert(interface_id_to_next_hop(arenas, link_id_pair.local_id));
        }
    } else if let Some(pred_dest) =
        dest_table.get(&SpfDestKey::Node(predecessor))
    {
        dest.next_hops = pred_dest.next_hops.clone();
    }
}

fn interface_id_to_next_hop(
    arenas: &InstanceArenas,
    interface_id: u32,
) -> NextHop {
    match arenas.interfaces.get_by_id(interface_id) {
        Ok(iface) => NextHop {
            interface: Some(iface.name.clone()),
            address: iface
                .state
                .neighbor
                .as_ref()
                .map(|neighbor| neighbor.address.ip()),
        },
        Err(..) => NextHop {
            interface: None,
            address: None,
        },
    }
}

// Which TIE direction to read when expanding the given node.
//
// The south SPF reads North TIEs and the north SPF reads South TIEs,
// except that this node's own TIEs are always read from the north side:
// leaves do not originate South Node TIEs, and the self-originated North
// Prefix TIE must not mask a received default route.
fn use_tie_direction(
    my_system_id: SystemId,
    visit_system_id: SystemId,
    spf_direction: Direction,
) -> Direction {
    match spf_direction {
        Direction::South => Direction::North,
        Direction::North if visit_system_id != my_system_id => {
            Direction::South
        }
        Direction::North => Direction::North,
    }
}

// Yields the neighbors of the given node that lie in the SPF direction:
// strictly lower level for the south SPF, strictly higher for the north.
fn node_neighbors<'a>(
    instance: &'a InstanceUpView<'_>,
    use_direction: Direction,
    node_system_id: SystemId,
    spf_direction: Direction,
) -> impl Iterator<Item = (SystemId, NodeNeighbor)> + 'a {
    instance
        .state
        .tiedb
        .ties_of_type(use_direction, node_system_id, TieType::Node)
        .filter_map(|tie| match &tie.element {
            TieElement::Node(node) => Some(node),
            _ => None,
        })
        .flat_map(move |node| {
            node.neighbors
                .iter()
                .filter(move |(_, nbr)| match (node.level, spf_direction) {
                    (Some(node_level), Direction::South) => {
                        nbr.level < node_level
                    }
                    (Some(node_level), Direction::North) => {
                        nbr.level > node_level
                    }
                    (None, _) => false,
                })
                .map(|(system_id, nbr)| (*system_id, nbr.clone()))
        })
}

// Checks that the neighbor's Node TIE reports the visited node as its own
// neighbor, with a matching (reversed) link-id pair.
fn is_neighbor_bidirectional(
    instance: &InstanceUpView<'_>,
    visit_system_id: SystemId,
    nbr_system_id: SystemId,
    nbr: &NodeNeighbor,
    spf_direction: Direction,
) -> bool {
    let reverse_direction = spf_direction.reverse();
    node_neighbors(
        instance,
        reverse_direction,
        nbr_system_id,
        reverse_direction,
    )
    .filter(|(nbr_nbr_system_id, _)| *nbr_nbr_system_id == visit_system_id)
    .any(|(_, nbr_nbr)| {
        nbr.link_ids
            .iter()
            .any(|pair| nbr_nbr.link_ids.contains(&pair.reverse()))
    })
}
