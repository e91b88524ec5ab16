//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use tracing::{debug, debug_span};

use crate::adjacency::LieState;
use crate::interface::FailureMode;
use crate::packet::pdu::{Packet, TiePacket};
use crate::packet::{Direction, TieId};
use crate::route::Route;
use crate::ztp::ZtpState;

// RIFT debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceCreate,
    InstanceDelete,
    InstanceStart,
    InstanceStop,
    // Interfaces
    InterfaceCreate(&'a str),
    InterfaceDelete(&'a str),
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    InterfaceFailureInject(&'a str, FailureMode),
    // State machines
    LieFsmTransition(&'a str, LieState, &'a str, LieState),
    ZtpFsmTransition(ZtpState, &'a str, ZtpState),
    // Network
    PacketRx(&'a str, &'a SocketAddr, &'a Packet),
    PacketTx(&'a str, &'a SocketAddr, &'a Packet),
    // TIE database
    TieInstall(&'a TiePacket),
    TieOriginate(&'a TiePacket),
    TieFlush(&'a TiePacket),
    TieExpire(&'a TieId),
    TieRemove(&'a TieId),
    // SPF
    SpfTrigger(&'a str),
    SpfStart(Direction),
    SpfFinish(Direction, usize),
    // RIB
    RouteInstall(&'a Route),
    RouteUninstall(&'a Route),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate
            | Debug::InstanceDelete
            | Debug::InstanceStart
            | Debug::InstanceStop => {
                // Parent span(s): rift-instance
                debug!("{}", self);
            }
            Debug::InterfaceCreate(name)
            | Debug::InterfaceDelete(name)
            | Debug::InterfaceStart(name)
            | Debug::InterfaceStop(name) => {
                // Parent span(s): rift-instance
                debug_span!("interface", %name).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::InterfaceFailureInject(name, mode) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%mode, "{}", self);
                })
            }
            Debug::LieFsmTransition(name, from, event, to) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?from, %event, ?to, "{}", self);
                })
            }
            Debug::ZtpFsmTransition(from, event, to) => {
                debug!(?from, %event, ?to, "{}", self);
            }
            Debug::PacketRx(ifname, src, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&packet).unwrap();
                        debug!(interface = %ifname, %src, %data, "{}", self);
                    })
                })
            }
            Debug::PacketTx(ifname, dst, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&packet).unwrap();
                        debug!(interface = %ifname, %dst, %data, "{}", self);
                    })
                })
            }
            Debug::TieInstall(tie)
            | Debug::TieOriginate(tie)
            | Debug::TieFlush(tie) => {
                debug!(
                    tie_id = %tie.header.tie_id,
                    seq_nr = %tie.header.seq_nr,
                    lifetime = %tie.header.remaining_lifetime,
                    "{}", self
                );
            }
            Debug::TieExpire(tie_id) | Debug::TieRemove(tie_id) => {
                debug!(%tie_id, "{}", self);
            }
            Debug::SpfTrigger(reason) => {
                // Parent span(s): rift-instance:spf
                debug!(%reason, "{}", self);
            }
            Debug::SpfStart(direction) => {
                debug_span!("spf", %direction).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::SpfFinish(direction, destinations) => {
                debug_span!("spf", %direction).in_scope(|| {
                    debug!(%destinations, "{}", self);
                })
            }
            Debug::RouteInstall(route) => {
                debug!(prefix = %route.prefix, owner = %route.owner, "{}", self);
            }
            Debug::RouteUninstall(route) => {
                debug!(prefix = %route.prefix, owner = %route.owner, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceDelete => {
                write!(f, "instance deleted")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::InterfaceCreate(..) => {
                write!(f, "interface created")
            }
            Debug::InterfaceDelete(..) => {
                write!(f, "interface deleted")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::InterfaceFailureInject(..) => {
                write!(f, "injected failure mode")
            }
            Debug::LieFsmTransition(..) => {
                write!(f, "LIE FSM state transition")
            }
            Debug::ZtpFsmTransition(..) => {
                write!(f, "ZTP FSM state transition")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::TieInstall(..) => {
                write!(f, "installing TIE")
            }
            Debug::TieOriginate(..) => {
                write!(f, "originating TIE")
            }
            Debug::TieFlush(..) => {
                write!(f, "flushing TIE")
            }
            Debug::TieExpire(..) => {
                write!(f, "TIE lifetime expired")
            }
            Debug::TieRemove(..) => {
                write!(f, "removing TIE")
            }
            Debug::SpfTrigger(..) => {
                write!(f, "SPF triggered")
            }
            Debug::SpfStart(..) => {
                write!(f, "starting SPF computation")
            }
            Debug::SpfFinish(..) => {
                write!(f, "SPF computation finished")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
        }
    }
}
