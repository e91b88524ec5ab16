//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, SocketAddr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adjacency::{
    LieAction, LieEvent, LieFsm, LieInput, LieState, Neighbor,
    check_lie_acceptance,
};
use crate::collections::{InterfaceId, InterfaceIndex, TieQueue};
use crate::debug::Debug;
use crate::error::Error;
use crate::fsm::Fsm;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::packet::consts::{
    DEFAULT_LIE_HOLDTIME, DEFAULT_LIE_MCAST_ADDR, DEFAULT_LIE_PORT,
    DEFAULT_TIE_PORT,
};
use crate::packet::pdu::{
    Content, Header, LieNeighbor, LiePacket, Packet, TirePacket,
};
use crate::packet::{LinkDirection, TieHeader, TieId};
use crate::tasks::messages::output::UdpTxPacketMsg;
use crate::ztp::{Offer, TxOffer, ZtpEvent};
use crate::{instance, network, tasks, tiedb, ztp};

#[derive(Debug)]
pub struct Interface {
    pub index: InterfaceIndex,
    // Interface ID, also advertised as the local link ID in LIEs.
    pub id: InterfaceId,
    pub name: String,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

// Interface configuration.
#[derive(Clone, Debug)]
pub struct InterfaceCfg {
    pub name: String,
    // Interface IPv4 address, used as the source of all packets and as the
    // destination of the neighbor's flooding traffic.
    pub address: Ipv4Addr,
    pub metric: u32,
    pub pod: u32,
    pub mtu: u32,
    pub rx_lie_port: u16,
    pub tx_lie_port: u16,
    pub rx_tie_port: u16,
    pub rx_lie_mcast_addr: Ipv4Addr,
    pub tx_lie_mcast_addr: Ipv4Addr,
}

#[derive(Debug)]
pub struct InterfaceState {
    pub active: bool,
    pub fsm: Fsm<LieFsm>,
    pub neighbor: Option<Neighbor>,
    // Ticks since the last accepted LIE. `None` means the hold timer isn't
    // running.
    pub ticks_since_lie: Option<u16>,
    // Outcome of the last LIE acceptance check, for inspection.
    pub last_lie_outcome: Option<String>,
    // Simulated failure mode.
    pub failure: FailureMode,
    // End of the range of the last TIDE received from the neighbor.
    pub last_tide_end: TieId,
    pub queues: FloodQueues,
    pub net: Option<InterfaceNet>,
    pub flood_net: Option<InterfaceNet>,
    pub tasks: InterfaceTasks,
}

impl Default for InterfaceState {
    fn default() -> InterfaceState {
        InterfaceState {
            active: false,
            fsm: Fsm::new(),
            neighbor: None,
            ticks_since_lie: None,
            last_lie_outcome: None,
            failure: FailureMode::Ok,
            last_tide_end: TieId::MIN,
            queues: Default::default(),
            net: None,
            flood_net: None,
            tasks: Default::default(),
        }
    }
}

// The four per-neighbor flooding queues.
#[derive(Debug, Default)]
pub struct FloodQueues {
    // TIEs to send.
    pub tx: TieQueue,
    // TIEs awaiting an acknowledgment, re-sent periodically.
    pub rtx: TieQueue,
    // TIEs to request from the neighbor.
    pub req: TieQueue,
    // TIEs to acknowledge to the neighbor.
    pub ack: TieQueue,
}

// Sockets and I/O tasks of one UDP send/receive pair.
#[derive(Debug)]
pub struct InterfaceNet {
    pub udp_tx_packetp: rift_utils::UnboundedSender<UdpTxPacketMsg>,
    _udp_rx_task: rift_utils::task::Task<()>,
    _udp_tx_task: rift_utils::task::Task<()>,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub timer_tick: Option<rift_utils::task::IntervalTask>,
    pub service_queues: Option<rift_utils::task::IntervalTask>,
}

// Simulated interface failure modes, for testing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FailureMode {
    #[default]
    Ok,
    TxFailed,
    RxFailed,
    Failed,
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        index: InterfaceIndex,
        id: InterfaceId,
        config: InterfaceCfg,
    ) -> Interface {
        Debug::InterfaceCreate(&config.name).log();

        Interface {
            index,
            id,
            name: config.name.clone(),
            config,
            state: InterfaceState::default(),
        }
    }

    // Starts the interface: opens the LIE sockets and starts the one-second
    // tick driving LIE transmission and the hold timer.
    pub(crate) fn start(
        &mut self,
        instance: &mut InstanceUpView<'_>,
    ) -> Result<(), Error> {
        Debug::InterfaceStart(&self.name).log();

        self.state.net =
            Some(network::lie_sockets(self, instance).map_err(|error| {
                Error::InterfaceStartError(
                    self.name.clone(),
                    Box::new(Error::IoError(error)),
                )
            })?);
        self.state.tasks.timer_tick = Some(tasks::timer_tick_interval(
            self.id,
            &instance.tx.protocol_input.timer_tick,
        ));
        self.state.active = true;

        Ok(())
    }

    pub(crate) fn stop(&mut self, _instance: &mut InstanceUpView<'_>) {
        if !self.state.active {
            return;
        }

        Debug::InterfaceStop(&self.name).log();

        self.stop_flooding();
        self.state.neighbor = None;
        self.state.ticks_since_lie = None;
        self.state.net = None;
        self.state.tasks.timer_tick = None;
        self.state.active = false;
    }

    // Name advertised in LIEs: node name and interface name combined.
    pub(crate) fn advertised_name(
        &self,
        instance: &InstanceUpView<'_>,
    ) -> String {
        format!("{}-{}", instance.name, self.name)
    }

    // Direction of the current neighbor relative to this node's level.
    pub(crate) fn neighbor_direction(
        &self,
        instance: &InstanceUpView<'_>,
    ) -> Option<LinkDirection> {
        let neighbor = self.state.neighbor.as_ref()?;
        let my_level = instance.level_value()?;
        Some(neighbor.direction(my_level))
    }

    // Sends a protocol packet on the LIE or flooding socket.
    pub(crate) fn send_packet(
        &self,
        instance: &InstanceUpView<'_>,
        content: Content,
        flood: bool,
    ) {
        let packet = Packet {
            hdr: Header::new(instance.config.system_id, instance.level_value()),
            content,
        };

        // Resolve the destination.
        let dst = if flood {
            let Some(neighbor) = &self.state.neighbor else {
                return;
            };
            SocketAddr::new(neighbor.address.ip(), neighbor.flood_port)
        } else {
            SocketAddr::new(
                self.config.tx_lie_mcast_addr.into(),
                self.config.tx_lie_port,
            )
        };

        // Simulated failure modes drop the packet here.
        if matches!(
            self.state.failure,
            FailureMode::TxFailed | FailureMode::Failed
        ) {
            debug!(interface = %self.name, %dst, "simulated send failure");
            return;
        }

        Debug::PacketTx(&self.name, &dst, &packet).log();

        #[cfg(feature = "testing")]
        {
            let msg = UdpTxPacketMsg {
                ifname: self.name.clone(),
                flood,
                dst,
                packet,
            };
            let _ = instance.tx.protocol_output.send(msg);
        }
        #[cfg(not(feature = "testing"))]
        {
            let net = if flood {
                self.state.flood_net.as_ref()
            } else {
                self.state.net.as_ref()
            };
            if let Some(net) = net {
                let msg = UdpTxPacketMsg {
                    ifname: self.name.clone(),
                    flood,
                    dst,
                    packet,
                };
                let _ = net.udp_tx_packetp.send(msg);
            }
        }
    }

    // Builds and sends a LIE, and records the advertised offer.
    fn send_lie(&mut self, instance: &mut InstanceUpView<'_>) {
        let level = instance.level_value();
        let neighbor =
            self.state.neighbor.as_ref().map(|neighbor| LieNeighbor {
                originator: neighbor.system_id,
                remote_id: neighbor.remote_id,
            });
        let not_a_ztp_offer =
            ztp::send_not_a_ztp_offer_on_intf(instance, &self.name);
        let lie = LiePacket {
            name: Some(self.advertised_name(instance)),
            local_id: self.id,
            flood_port: self.config.rx_tie_port,
            link_mtu_size: Some(self.config.mtu),
            neighbor,
            pod: self.config.pod,
            // 63-bit nonce from a cryptographic-quality source.
            nonce: rand::rng().random::<u64>() >> 1,
            capabilities: crate::packet::pdu::NodeCapabilities {
                leaf_2_leaf: instance.config.level.leaf_2_leaf(),
                flood_reduction: true,
            },
            holdtime: DEFAULT_LIE_HOLDTIME,
            not_a_ztp_offer,
            you_are_flood_repeater: true,
        };
        self.send_packet(instance, Content::Lie(lie), false);

        let tx_offer = TxOffer {
            interface: self.name.clone(),
            system_id: instance.config.system_id,
            level,
            not_a_ztp_offer,
            state: self.state.fsm.state(),
        };
        instance
            .state
            .tx_offers
            .insert(self.name.clone(), tx_offer);
    }

    // Implements the LIE processing procedure: acceptance rules, neighbor
    // capture, change detection, and the three-way check.
    fn process_lie(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        input: &LieInput,
    ) {
        let ctx = instance.lie_acceptance_ctx();
        match check_lie_acceptance(
            &ctx,
            self.config.mtu,
            self.config.pod,
            &input.hdr,
            &input.lie,
        ) {
            Err(reject) => {
                self.state.last_lie_outcome =
                    Some(format!("Rejected: {reject}"));
                if reject.warning() {
                    warn!(
                        interface = %self.name,
                        "received LIE packet rejected: {reject}"
                    );
                } else {
                    info!(
                        interface = %self.name,
                        "received LIE packet rejected: {reject}"
                    );
                }
                // A rejection resets the adjacency, whether or not the
                // offer is still forwarded to ZTP.
                self.state.neighbor = None;
                if reject.offer_to_ztp() {
                    self.send_offer_to_ztp(instance, input);
                }
                self.state.fsm.push(LieEvent::UnacceptableHeader);
            }
            Ok(reason) => {
                self.state.last_lie_outcome =
                    Some(format!("Accepted: {reason}"));
                self.state.ticks_since_lie = Some(0);
                self.send_offer_to_ztp(instance, input);

                let new_neighbor = Neighbor::new(input);
                match &self.state.neighbor {
                    None => {
                        info!(
                            interface = %self.name,
                            system_id = %new_neighbor.system_id,
                            "new neighbor detected"
                        );
                        self.state.neighbor = Some(new_neighbor);
                        self.state.fsm.push(LieEvent::NewNeighbor);
                        self.check_three_way(ctx.system_id);
                    }
                    Some(curr) if curr.system_id != new_neighbor.system_id => {
                        self.state.fsm.push(LieEvent::MultipleNeighbors);
                    }
                    Some(curr) if curr.level != new_neighbor.level => {
                        self.state.fsm.push(LieEvent::NeighborChangedLevel);
                    }
                    Some(curr)
                        if curr.address.ip() != new_neighbor.address.ip() =>
                    {
                        self.state.fsm.push(LieEvent::NeighborChangedAddress);
                    }
                    Some(curr) => {
                        if curr.flood_port != new_neighbor.flood_port
                            || curr.name != new_neighbor.name
                            || curr.remote_id != new_neighbor.remote_id
                        {
                            self.state
                                .fsm
                                .push(LieEvent::NeighborChangedMinorFields);
                        }
                        self.state.neighbor = Some(new_neighbor);
                        self.check_three_way(ctx.system_id);
                    }
                }
            }
        }
    }

    // Sends the offer carried by the received LIE to the ZTP state machine.
    fn send_offer_to_ztp(
        &self,
        instance: &mut InstanceUpView<'_>,
        input: &LieInput,
    ) {
        let offer = Offer {
            interface: self.name.clone(),
            system_id: input.hdr.sender,
            level: input.hdr.level,
            not_a_ztp_offer: input.lie.not_a_ztp_offer,
            state: self.state.fsm.state(),
            removed: false,
            removed_reason: None,
            best: false,
            best_three_way: false,
        };
        instance.state.ztp_fsm.push(ZtpEvent::NeighborOffer(offer));
    }

    // Checks whether the neighbor's LIE reflects this node and this link,
    // and pushes the corresponding three-way handshake event.
    fn check_three_way(&mut self, my_system_id: crate::packet::SystemId) {
        let Some(neighbor) = &self.state.neighbor else {
            return;
        };
        let valid_reflection = |reflected: &LieNeighbor, iface: &Interface| {
            reflected.originator == my_system_id
                && reflected.remote_id == iface.id
        };
        match self.state.fsm.state() {
            LieState::OneWay => (),
            LieState::TwoWay => match neighbor.reflected {
                None => (),
                Some(reflected) if valid_reflection(&reflected, self) => {
                    self.state.fsm.push(LieEvent::ValidReflection);
                }
                Some(..) => {
                    self.state.fsm.push(LieEvent::MultipleNeighbors);
                }
            },
            LieState::ThreeWay => match neighbor.reflected {
                None => {
                    self.state.fsm.push(LieEvent::NeighborDroppedReflection);
                }
                Some(reflected) if valid_reflection(&reflected, self) => (),
                Some(..) => {
                    self.state.fsm.push(LieEvent::MultipleNeighbors);
                }
            },
        }
    }

    // Advances the hold timer and fires expiry when the neighbor's
    // advertised hold time elapses without an accepted LIE.
    fn check_hold_time(&mut self) {
        let Some(ticks) = self.state.ticks_since_lie else {
            return;
        };
        let ticks = ticks.saturating_add(1);
        let holdtime = self
            .state
            .neighbor
            .as_ref()
            .map(|neighbor| neighbor.holdtime)
            .filter(|holdtime| *holdtime != 0)
            .unwrap_or(DEFAULT_LIE_HOLDTIME);
        if ticks >= holdtime {
            self.state.ticks_since_lie = None;
            self.state.fsm.push(LieEvent::HoldTimeExpired);
        } else {
            self.state.ticks_since_lie = Some(ticks);
        }
    }

    // Opens the flooding sockets and starts the queue-service timer.
    fn start_flooding(
        &mut self,
        instance: &mut InstanceUpView<'_>,
    ) -> Result<(), Error> {
        let Some(neighbor) = &self.state.neighbor else {
            return Ok(());
        };
        info!(
            interface = %self.name,
            rx_port = %self.config.rx_tie_port,
            tx_port = %neighbor.flood_port,
            "start flooding"
        );
        self.state.flood_net =
            Some(network::flood_sockets(self, instance).map_err(|error| {
                Error::InterfaceStartError(
                    self.name.clone(),
                    Box::new(Error::IoError(error)),
                )
            })?);
        self.state.tasks.service_queues =
            Some(tasks::service_queues_interval(
                self.id,
                &instance.tx.protocol_input.service_queues,
            ));
        Ok(())
    }

    // Stops flooding: stops the queue-service timer, clears all four
    // queues, and closes the flooding sockets.
    fn stop_flooding(&mut self) {
        if self.state.flood_net.is_none() {
            return;
        }
        info!(interface = %self.name, "stop flooding");
        self.state.tasks.service_queues = None;
        self.state.queues.tx.clear();
        self.state.queues.rtx.clear();
        self.state.queues.req.clear();
        self.state.queues.ack.clear();
        self.state.flood_net = None;
    }

    // ===== flooding queue operations =====

    // Whether this node may flood the given TIE to the neighbor.
    pub(crate) fn is_flood_allowed(
        &self,
        instance: &InstanceUpView<'_>,
        header: &TieHeader,
    ) -> bool {
        let Some(neighbor) = &self.state.neighbor else {
            return false;
        };
        tiedb::flood_allowed_from_node_to_nbr(
            &instance.state.tiedb,
            header,
            self.neighbor_direction(instance),
            neighbor.system_id,
            instance.config.system_id,
            instance.level_value(),
            instance.is_top_of_fabric(),
        )
    }

    // Whether this node may request the given TIE from the neighbor: the
    // request is allowed iff the neighbor would be allowed to flood the TIE
    // to us under the same scope rules.
    pub(crate) fn is_request_allowed(
        &self,
        instance: &InstanceUpView<'_>,
        header: &TieHeader,
    ) -> bool {
        let Some(neighbor) = &self.state.neighbor else {
            return false;
        };
        tiedb::flood_allowed_from_nbr_to_node(
            &instance.state.tiedb,
            header,
            self.neighbor_direction(instance),
            neighbor.system_id,
            Some(neighbor.level),
            neighbor.is_top_of_fabric(),
            instance.config.system_id,
        )
    }

    // Queues a TIE for transmission if the flooding scope allows it.
    pub(crate) fn try_to_transmit_tie(
        &mut self,
        instance: &InstanceUpView<'_>,
        header: &TieHeader,
    ) {
        if !self.is_flood_allowed(instance, header) {
            debug!(
                interface = %self.name, tie_id = %header.tie_id,
                "transmit TIE filtered by flooding scope"
            );
            return;
        }
        self.state.queues.rtx.remove(&header.tie_id);
        if let Some(ack) = self.state.queues.ack.get(&header.tie_id) {
            if ack.seq_nr >= header.seq_nr {
                // An ack for the same or a newer version is pending; don't
                // send the older TIE.
                return;
            }
            self.state.queues.ack.remove(&header.tie_id);
        }
        self.add_to_ties_tx(instance, header);
    }

    // Adds a TIE to the TX queue. New or newer entries are additionally
    // transmitted immediately, without waiting for the next service tick.
    fn add_to_ties_tx(
        &mut self,
        instance: &InstanceUpView<'_>,
        header: &TieHeader,
    ) {
        let send_now = match self.state.queues.tx.get(&header.tie_id) {
            None => true,
            Some(queued) => header.seq_nr > queued.seq_nr,
        };
        self.state.queues.tx.insert(*header);
        if send_now
            && let Some(tie) = instance.state.tiedb.get(&header.tie_id)
        {
            self.send_packet(instance, Content::Tie(tie.clone()), true);
        }
    }

    // Moves a TIE to the ACK queue, removing it from all other queues.
    pub(crate) fn ack_tie(&mut self, header: &TieHeader) {
        self.remove_from_all_queues(&header.tie_id);
        self.state.queues.ack.insert(*header);
    }

    // The neighbor acknowledged the TIE: no queue should retain it.
    pub(crate) fn tie_been_acked(&mut self, tie_id: &TieId) {
        self.remove_from_all_queues(tie_id);
    }

    pub(crate) fn remove_from_all_queues(&mut self, tie_id: &TieId) {
        self.state.queues.tx.remove(tie_id);
        self.state.queues.rtx.remove(tie_id);
        self.state.queues.req.remove(tie_id);
        self.state.queues.ack.remove(tie_id);
    }

    // Queues a request for a TIE if the scope rules allow requesting it.
    pub(crate) fn request_tie(
        &mut self,
        instance: &InstanceUpView<'_>,
        header: &TieHeader,
    ) {
        if !self.is_request_allowed(instance, header) {
            debug!(
                interface = %self.name, tie_id = %header.tie_id,
                "request TIE filtered by flooding scope"
            );
            return;
        }
        self.remove_from_all_queues(&header.tie_id);
        self.state.queues.req.insert(*header);
    }

    // Services the four flooding queues. Called once per second while the
    // adjacency is in the three-way state.
    pub(crate) fn service_queues(&mut self, instance: &InstanceUpView<'_>) {
        // Acknowledge every TIE on the ACK queue.
        if !self.state.queues.ack.is_empty() {
            let tire = TirePacket {
                headers: self.state.queues.ack.iter().copied().collect(),
            };
            self.send_packet(instance, Content::Tire(tire), true);
        }

        // Request the TIEs on the REQ queue, re-checking the scope rules,
        // which may have changed since the request was queued.
        if !self.state.queues.req.is_empty() {
            let headers: Vec<_> = self
                .state
                .queues
                .req
                .iter()
                .filter(|header| self.is_request_allowed(instance, header))
                .copied()
                .collect();
            if !headers.is_empty() {
                let tire = TirePacket { headers };
                self.send_packet(instance, Content::Tire(tire), true);
            }
        }

        // Transmit the TIEs on the TX and RTX queues. Only the TIE-ID is
        // significant: if the database holds a newer version than the one
        // queued, the newer version is sent.
        let tie_ids: Vec<_> = self
            .state
            .queues
            .tx
            .iter()
            .chain(self.state.queues.rtx.iter())
            .map(|header| header.tie_id)
            .collect();
        for tie_id in &tie_ids {
            if let Some(tie) = instance.state.tiedb.get(tie_id) {
                self.send_packet(instance, Content::Tie(tie.clone()), true);
            }
        }

        // Serviced TX entries await their ack on the RTX queue, from where
        // they are re-sent every tick until acknowledged.
        let tx_headers: Vec<_> =
            self.state.queues.tx.iter().copied().collect();
        for header in tx_headers {
            self.state.queues.tx.remove(&header.tie_id);
            self.state.queues.rtx.insert(header);
        }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        Debug::InterfaceDelete(&self.name).log();
    }
}

// ===== impl InterfaceNet =====

impl InterfaceNet {
    pub(crate) fn new(
        udp_tx_packetp: rift_utils::UnboundedSender<UdpTxPacketMsg>,
        udp_rx_task: rift_utils::task::Task<()>,
        udp_tx_task: rift_utils::task::Task<()>,
    ) -> InterfaceNet {
        InterfaceNet {
            udp_tx_packetp,
            _udp_rx_task: udp_rx_task,
            _udp_tx_task: udp_tx_task,
        }
    }
}

// ===== impl InterfaceCfg =====

impl InterfaceCfg {
    pub fn new(name: &str, address: Ipv4Addr) -> InterfaceCfg {
        InterfaceCfg {
            name: name.to_owned(),
            address,
            metric: 1,
            pod: 0,
            mtu: 1400,
            rx_lie_port: DEFAULT_LIE_PORT,
            tx_lie_port: DEFAULT_LIE_PORT,
            rx_tie_port: DEFAULT_TIE_PORT,
            rx_lie_mcast_addr: DEFAULT_LIE_MCAST_ADDR,
            tx_lie_mcast_addr: DEFAULT_LIE_MCAST_ADDR,
        }
    }
}

// ===== impl FailureMode =====

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureMode::Ok => write!(f, "ok"),
            FailureMode::TxFailed => write!(f, "tx-failed"),
            FailureMode::RxFailed => write!(f, "rx-failed"),
            FailureMode::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for FailureMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(FailureMode::Ok),
            "tx-failed" => Ok(FailureMode::TxFailed),
            "rx-failed" => Ok(FailureMode::RxFailed),
            "failed" => Ok(FailureMode::Failed),
            _ => Err(()),
        }
    }
}

// ===== global functions =====

// Pushes an event into the interface's LIE FSM and drains the queue,
// dispatching the resolved actions.
pub(crate) fn dispatch_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    event: LieEvent,
) {
    arenas.interfaces[iface_idx].state.fsm.push(event);
    process_queued_events(instance, arenas, iface_idx);
}

// Drains the interface's LIE FSM event queue.
pub(crate) fn process_queued_events(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
) {
    loop {
        let step = {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.state.fsm.step()
        };
        let Some(step) = step else {
            break;
        };
        if step.from != step.to {
            let iface = &arenas.interfaces[iface_idx];
            Debug::LieFsmTransition(
                &iface.name,
                step.from,
                <LieFsm as crate::fsm::StateMachine>::event_name(&step.event),
                step.to,
            )
            .log();
        }
        for action in &step.actions {
            run_action(instance, arenas, iface_idx, *action, &step.event);
        }
    }
}

// Dispatches one LIE FSM action.
fn run_action(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    action: LieAction,
    event: &LieEvent,
) {
    match action {
        LieAction::UpdateLevel | LieAction::StoreHal
        | LieAction::StoreHat
        | LieAction::StoreHals => {
            // Level, HAL, and HAT are node-scoped; the events exist to
            // drive the adjacency resets encoded in the transition table.
        }
        LieAction::ProcessLie => {
            if let LieEvent::LieReceived(input) = event {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.process_lie(instance, input);
            }
            // Offers produced as a side effect of LIE processing feed the
            // ZTP state machine.
            instance::process_ztp_queue(instance, arenas);
        }
        LieAction::SendLie => {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.send_lie(instance);
        }
        LieAction::Cleanup => {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.state.neighbor = None;
            iface.state.ticks_since_lie = None;
        }
        LieAction::CheckHoldTime => {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.check_hold_time();
        }
        LieAction::ExpireOffer => {
            let ifname = arenas.interfaces[iface_idx].name.clone();
            ztp::expire_offer(instance, &ifname);
            instance::process_ztp_queue(instance, arenas);
        }
        LieAction::StartFlooding => {
            let iface = &mut arenas.interfaces[iface_idx];
            if let Err(error) = iface.start_flooding(instance) {
                error.log();
            }
            // The new adjacency changes this node's topology view.
            tiedb::regenerate_node_ties(instance, arenas);
            tiedb::regenerate_south_prefix_tie(instance, arenas);
            // Describe the database to the neighbor right away; it will
            // request whatever it is missing.
            tiedb::send_tide_on_interface(instance, &mut arenas.interfaces[iface_idx]);
        }
        LieAction::StopFlooding => {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.stop_flooding();
            tiedb::regenerate_node_ties(instance, arenas);
            tiedb::regenerate_south_prefix_tie(instance, arenas);
        }
    }
}
