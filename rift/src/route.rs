//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::packet::Direction;
use crate::spf::{SpfDest, SpfDestKey};

// Owner of a RIB entry.
//
// The derived ordering doubles as the owner preference: when multiple
// owners install a route for the same prefix, the highest owner wins.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Owner {
    NorthSpf,
    SouthSpf,
}

// Route next hop: outgoing interface and neighbor address.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NextHop {
    pub interface: Option<String>,
    pub address: Option<IpAddr>,
}

// Routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub prefix: IpNetwork,
    pub owner: Owner,
    pub next_hops: BTreeSet<NextHop>,
    pub stale: bool,
}

// Routing information base for one address family.
//
// Each prefix holds one route per owner; the route of the highest owner is
// the one offered to the FIB.
#[derive(Debug, Default)]
pub struct Rib {
    routes: BTreeMap<IpNetwork, BTreeMap<Owner, Route>>,
}

// The IPv4 and IPv6 RIBs, maintained independently.
#[derive(Debug, Default)]
pub struct Ribs {
    pub v4: Rib,
    pub v6: Rib,
}

// Hook for programming routes into the kernel (or any other forwarding
// plane). Route resolution and actual installation live outside this
// crate.
pub trait RouteInstaller: Send {
    fn install_route(&mut self, route: &Route);
    fn uninstall_route(&mut self, prefix: &IpNetwork, owner: Owner);
}

// Installer that programs nothing.
#[derive(Debug, Default)]
pub struct NullInstaller();

// ===== impl Owner =====

impl Owner {
    pub const fn from_direction(direction: Direction) -> Owner {
        match direction {
            Direction::South => Owner::SouthSpf,
            Direction::North => Owner::NorthSpf,
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Owner::NorthSpf => write!(f, "north-spf"),
            Owner::SouthSpf => write!(f, "south-spf"),
        }
    }
}

// ===== impl Rib =====

impl Rib {
    // Marks all routes of the given owner as stale. Routes that are not
    // re-installed before the stale sweep are deleted.
    pub(crate) fn mark_owner_routes_stale(&mut self, owner: Owner) {
        for routes in self.routes.values_mut() {
            if let Some(route) = routes.get_mut(&owner) {
                route.stale = true;
            }
        }
    }

    // Adds or replaces a route.
    pub(crate) fn put_route(
        &mut self,
        route: Route,
        installer: &mut dyn RouteInstaller,
    ) {
        Debug::RouteInstall(&route).log();
        installer.install_route(&route);
        self.routes
            .entry(route.prefix)
            .or_default()
            .insert(route.owner, route);
    }

    // Deletes all routes still marked stale.
    pub(crate) fn del_stale_routes(
        &mut self,
        installer: &mut dyn RouteInstaller,
    ) {
        self.routes.retain(|prefix, routes| {
            routes.retain(|owner, route| {
                if route.stale {
                    Debug::RouteUninstall(route).log();
                    installer.uninstall_route(prefix, *owner);
                }
                !route.stale
            });
            !routes.is_empty()
        });
    }

    // Returns the route installed by the given owner, if any.
    pub fn get_owner_route(
        &self,
        prefix: &IpNetwork,
        owner: Owner,
    ) -> Option<&Route> {
        self.routes.get(prefix)?.get(&owner)
    }

    // Returns the preferred route for the given prefix.
    pub fn get_route(&self, prefix: &IpNetwork) -> Option<&Route> {
        self.routes
            .get(prefix)?
            .iter()
            .max_by_key(|(owner, _)| **owner)
            .map(|(_, route)| route)
    }

    // Returns an iterator visiting all routes, by prefix and owner.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flat_map(|routes| routes.values())
    }

    // Returns the FIB view: the preferred route of every prefix.
    pub fn fib(&self) -> impl Iterator<Item = &Route> {
        self.routes.keys().filter_map(|prefix| self.get_route(prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ===== impl Ribs =====

impl Ribs {
    pub(crate) fn get_mut(&mut self, prefix: &IpNetwork) -> &mut Rib {
        match prefix {
            IpNetwork::V4(..) => &mut self.v4,
            IpNetwork::V6(..) => &mut self.v6,
        }
    }

    // Whether the north SPF computed reachability to a default route.
    pub(crate) fn has_north_spf_default(&self) -> bool {
        let v4_default: IpNetwork = "0.0.0.0/0".parse().unwrap();
        let v6_default: IpNetwork = "::/0".parse().unwrap();
        self.v4
            .get_owner_route(&v4_default, Owner::NorthSpf)
            .is_some()
            || self
                .v6
                .get_owner_route(&v6_default, Owner::NorthSpf)
                .is_some()
    }
}

// ===== impl NextHop =====

impl std::fmt::Display for NextHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.interface, &self.address) {
            (Some(interface), Some(address)) => {
                write!(f, "{interface} {address}")
            }
            (Some(interface), None) => write!(f, "{interface}"),
            _ => write!(f, "(unresolved)"),
        }
    }
}

// ===== impl NullInstaller =====

impl RouteInstaller for NullInstaller {
    fn install_route(&mut self, _route: &Route) {}

    fn uninstall_route(&mut self, _prefix: &IpNetwork, _owner: Owner) {}
}

// ===== global functions =====

// Installs the prefix destinations computed by one SPF run into the RIB.
//
// Routes owned by the run's direction are first marked stale; destinations
// whose predecessor set is empty or just this node (local prefixes) are
// skipped; whatever remains stale afterwards is swept.
pub(crate) fn install_spf_routes(
    instance: &mut InstanceUpView<'_>,
    direction: Direction,
    dest_table: &BTreeMap<SpfDestKey, SpfDest>,
) {
    let owner = Owner::from_direction(direction);
    let my_system_id = instance.config.system_id;
    let state = &mut *instance.state;
    let installer = &mut *state.route_installer;

    state.rib.v4.mark_owner_routes_stale(owner);
    state.rib.v6.mark_owner_routes_stale(owner);

    for dest in dest_table.values() {
        let SpfDestKey::Prefix(prefix) = dest.key else {
            continue;
        };
        // Local destinations aren't installed as a result of SPF.
        if dest.predecessors.is_empty()
            || dest.predecessors == [my_system_id]
        {
            continue;
        }
        let route = Route {
            prefix,
            owner,
            next_hops: dest.next_hops.clone(),
            stale: false,
        };
        state.rib.get_mut(&prefix).put_route(route, installer);
    }

    state.rib.v4.del_stale_routes(installer);
    state.rib.v6.del_stale_routes(installer);
}
