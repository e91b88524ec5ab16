//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use rift_utils::task::{IntervalTask, TimeoutTask};
use rift_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::adjacency::{LieAcceptanceCtx, LieEvent};
use crate::collections::Interfaces;
use crate::debug::Debug;
use crate::error::Error;
use crate::fsm::{Fsm, StateMachine};
use crate::interface::{FailureMode, InterfaceCfg};
use crate::packet::{Directions, Level, PrefixMap, SystemId};
use crate::route::{NullInstaller, RouteInstaller, Ribs};
use crate::spf::{SpfDest, SpfDestKey, SpfScheduler};
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    AgeTiesMsg, SendTidesMsg, ServiceQueuesMsg, SpfDeferExpiryMsg, SpfRunMsg,
    TimerTickMsg, UdpRxPacketMsg, ZtpHoldDownExpiryMsg,
};
#[cfg(feature = "testing")]
use crate::tasks::messages::output::UdpTxPacketMsg;
use crate::tiedb::TieDb;
use crate::ztp::{
    LevelSymbol, Offer, TxOffer, ZtpAction, ZtpEvent, ZtpFsm,
};
use crate::{events, interface, tasks, tiedb, ztp};

pub struct Instance {
    // Node name.
    pub name: String,
    // Node configuration data.
    pub config: InstanceCfg,
    // Node state data; present while the node runs.
    pub state: Option<InstanceState>,
    // Node arenas.
    pub arenas: InstanceArenas,
    // Node Tx channels.
    pub tx: InstanceChannelsTx,
    // Node Rx channels, taken by the event loop.
    pub rx: Option<ProtocolInputChannelsRx>,
    // Captured output packets, for testing.
    #[cfg(feature = "testing")]
    pub output_rx: UnboundedReceiver<UdpTxPacketMsg>,
}

// Node configuration.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    pub system_id: SystemId,
    pub level: LevelSymbol,
    // Passive nodes hold configuration but don't run the protocol.
    pub passive: bool,
    pub overload: bool,
    // Source address override for transmitted packets.
    pub tx_src_addr: Option<Ipv4Addr>,
    pub v4prefixes: PrefixMap,
    pub v6prefixes: PrefixMap,
    // Kernel route table bound to this node; installation itself is
    // delegated through the route installer hook.
    pub kernel_route_table: Option<String>,
}

pub struct InstanceState {
    // ZTP level election.
    pub ztp_fsm: Fsm<ZtpFsm>,
    pub rx_offers: BTreeMap<String, Offer>,
    pub tx_offers: BTreeMap<String, TxOffer>,
    pub hal: Option<Level>,
    pub hat: Option<Level>,
    pub derived_level: Option<Level>,
    // TIE database.
    pub tiedb: TieDb,
    pub node_tie_seq_nrs: Directions<u64>,
    pub north_prefix_seq_nr: u64,
    // `None` means no South Prefix TIE was ever originated.
    pub south_prefix_seq_nr: Option<u64>,
    pub originating_default: bool,
    // SPF.
    pub spf_sched: SpfScheduler,
    pub spf_destinations: Directions<BTreeMap<SpfDestKey, SpfDest>>,
    // Routing tables.
    pub rib: Ribs,
    pub route_installer: Box<dyn RouteInstaller>,
    // Node-level timers.
    pub tasks: InstanceTasks,
}

#[derive(Default)]
pub struct InstanceArenas {
    pub interfaces: Interfaces,
}

#[derive(Debug, Default)]
pub struct InstanceTasks {
    pub tide_interval: Option<IntervalTask>,
    pub aging_interval: Option<IntervalTask>,
    pub ztp_holddown: Option<TimeoutTask>,
}

pub struct InstanceChannelsTx {
    pub protocol_input: ProtocolInputChannelsTx,
    #[cfg(feature = "testing")]
    pub protocol_output: UnboundedSender<UdpTxPacketMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    pub udp_packet_rx: UnboundedSender<UdpRxPacketMsg>,
    pub timer_tick: UnboundedSender<TimerTickMsg>,
    pub service_queues: UnboundedSender<ServiceQueuesMsg>,
    pub send_tides: UnboundedSender<SendTidesMsg>,
    pub age_ties: UnboundedSender<AgeTiesMsg>,
    pub spf_run: UnboundedSender<SpfRunMsg>,
    pub spf_defer: UnboundedSender<SpfDeferExpiryMsg>,
    pub ztp_holddown: UnboundedSender<ZtpHoldDownExpiryMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub udp_packet_rx: UnboundedReceiver<UdpRxPacketMsg>,
    pub timer_tick: UnboundedReceiver<TimerTickMsg>,
    pub service_queues: UnboundedReceiver<ServiceQueuesMsg>,
    pub send_tides: UnboundedReceiver<SendTidesMsg>,
    pub age_ties: UnboundedReceiver<AgeTiesMsg>,
    pub spf_run: UnboundedReceiver<SpfRunMsg>,
    pub spf_defer: UnboundedReceiver<SpfDeferExpiryMsg>,
    pub ztp_holddown: UnboundedReceiver<ZtpHoldDownExpiryMsg>,
}

// Operational view of a running node, borrowing the state alongside the
// configuration. Interfaces are borrowed separately through the arenas.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
}

// ===== impl Instance =====

impl Instance {
    pub fn new(
        name: String,
        config: InstanceCfg,
        interface_configs: Vec<InterfaceCfg>,
    ) -> Instance {
        Debug::InstanceCreate.log();

        let (tx, rx) = protocol_input_channels();
        #[cfg(feature = "testing")]
        let (protocol_output, output_rx) = mpsc::unbounded_channel();

        let mut arenas = InstanceArenas::default();
        for interface_config in interface_configs {
            arenas.interfaces.insert(interface_config);
        }

        Instance {
            name,
            config,
            state: None,
            arenas,
            tx: InstanceChannelsTx {
                protocol_input: tx,
                #[cfg(feature = "testing")]
                protocol_output,
            },
            rx: Some(rx),
            #[cfg(feature = "testing")]
            output_rx,
        }
    }

    // Starts the node: initializes the state, runs the ZTP state machine
    // to its first level computation, originates the initial TIEs, and
    // starts the interfaces and node-level timers.
    pub fn start(&mut self) {
        if self.is_active() || self.config.passive {
            return;
        }
        Debug::InstanceStart.log();

        self.state = Some(InstanceState::new());
        let (mut instance, arenas) = self.as_up().unwrap();

        // Run the entry actions of the initial ZTP state.
        for action in instance.state.ztp_fsm.begin() {
            run_ztp_action(&mut instance, arenas, *action, None);
        }
        process_ztp_queue(&mut instance, arenas);

        // Originate the initial TIEs.
        tiedb::regenerate_node_ties(&mut instance, arenas);
        tiedb::regenerate_north_prefix_tie(&mut instance);
        tiedb::regenerate_south_prefix_tie(&mut instance, arenas);

        // Start interfaces.
        for iface_idx in arenas.interfaces.indexes().collect::<Vec<_>>() {
            if let Err(error) =
                arenas.interfaces[iface_idx].start(&mut instance)
            {
                error.log();
                continue;
            }
            // The entry actions of the initial one-way state transmit the
            // first LIE.
            interface::dispatch_event(
                &mut instance,
                arenas,
                iface_idx,
                LieEvent::SendLie,
            );
        }

        // Start node-level timers.
        instance.state.tasks.tide_interval = Some(tasks::tide_interval(
            &instance.tx.protocol_input.send_tides,
        ));
        instance.state.tasks.aging_interval = Some(tasks::aging_interval(
            &instance.tx.protocol_input.age_ties,
        ));
    }

    // Stops the node, withdrawing all routes and releasing all resources.
    pub fn stop(&mut self) {
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };
        Debug::InstanceStop.log();

        // Uninstall all routes.
        let state = &mut *instance.state;
        let installer = &mut *state.route_installer;
        for rib in [&state.rib.v4, &state.rib.v6] {
            for route in rib.iter() {
                installer.uninstall_route(&route.prefix, route.owner);
            }
        }

        // Stop interfaces.
        for iface in arenas.interfaces.iter_mut() {
            iface.stop(&mut instance);
        }

        // Clear node state.
        self.state = None;
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    // Returns a view struct for the node if it's running.
    pub fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                name: &self.name,
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }

    // Processes one protocol input message.
    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        // Ignore event if the node isn't active.
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };
        if let Err(error) =
            events::process_protocol_msg(&mut instance, arenas, msg)
        {
            error.log();
        }
    }

    // Processes all currently queued protocol input messages without
    // blocking.
    pub fn process_queued(&mut self) {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return;
            };
            let Some(msg) = rx.try_recv() else {
                return;
            };
            self.process_protocol_msg(msg);
        }
    }

    // Runs the node's event loop until all input channels close.
    pub async fn run(mut self) {
        self.start();
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        while let Some(msg) = rx.recv().await {
            self.process_protocol_msg(msg);
        }
        self.stop();
    }

    // Injects a simulated failure mode into an interface.
    pub fn set_interface_failure(
        &mut self,
        ifname: &str,
        mode: FailureMode,
    ) -> Result<(), Error> {
        let iface = self
            .arenas
            .interfaces
            .get_mut_by_name(ifname)
            .ok_or_else(|| Error::InterfaceNameNotFound(ifname.to_owned()))?;
        iface.state.failure = mode;
        Debug::InterfaceFailureInject(ifname, mode).log();
        Ok(())
    }

    // Applies a new configured level and lets ZTP re-derive the level.
    pub fn change_configured_level(&mut self, level: LevelSymbol) {
        self.config.level = level;
        let Some((mut instance, arenas)) = self.as_up() else {
            return;
        };
        dispatch_ztp_event(
            &mut instance,
            arenas,
            ZtpEvent::ChangeLocalConfiguredLevel(level),
        );
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        Debug::InstanceDelete.log();
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new() -> InstanceState {
        InstanceState {
            ztp_fsm: Fsm::new(),
            rx_offers: Default::default(),
            tx_offers: Default::default(),
            hal: None,
            hat: None,
            derived_level: None,
            tiedb: Default::default(),
            node_tie_seq_nrs: Default::default(),
            north_prefix_seq_nr: 0,
            south_prefix_seq_nr: None,
            originating_default: false,
            spf_sched: Default::default(),
            spf_destinations: Default::default(),
            rib: Default::default(),
            route_installer: Box::new(NullInstaller::default()),
            tasks: Default::default(),
        }
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    // Receives the next protocol input message.
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.udp_packet_rx.recv() => {
                msg.map(ProtocolInputMsg::UdpRxPacket)
            }
            msg = self.timer_tick.recv() => {
                msg.map(ProtocolInputMsg::TimerTick)
            }
            msg = self.service_queues.recv() => {
                msg.map(ProtocolInputMsg::ServiceQueues)
            }
            msg = self.send_tides.recv() => {
                msg.map(ProtocolInputMsg::SendTides)
            }
            msg = self.age_ties.recv() => {
                msg.map(ProtocolInputMsg::AgeTies)
            }
            msg = self.spf_run.recv() => {
                msg.map(ProtocolInputMsg::SpfRun)
            }
            msg = self.spf_defer.recv() => {
                msg.map(ProtocolInputMsg::SpfDeferExpiry)
            }
            msg = self.ztp_holddown.recv() => {
                msg.map(ProtocolInputMsg::ZtpHoldDownExpiry)
            }
        }
    }

    // Receives the next queued protocol input message, if any.
    pub fn try_recv(&mut self) -> Option<ProtocolInputMsg> {
        if let Ok(msg) = self.udp_packet_rx.try_recv() {
            return Some(ProtocolInputMsg::UdpRxPacket(msg));
        }
        if let Ok(msg) = self.timer_tick.try_recv() {
            return Some(ProtocolInputMsg::TimerTick(msg));
        }
        if let Ok(msg) = self.service_queues.try_recv() {
            return Some(ProtocolInputMsg::ServiceQueues(msg));
        }
        if let Ok(msg) = self.send_tides.try_recv() {
            return Some(ProtocolInputMsg::SendTides(msg));
        }
        if let Ok(msg) = self.age_ties.try_recv() {
            return Some(ProtocolInputMsg::AgeTies(msg));
        }
        if let Ok(msg) = self.spf_run.try_recv() {
            return Some(ProtocolInputMsg::SpfRun(msg));
        }
        if let Ok(msg) = self.spf_defer.try_recv() {
            return Some(ProtocolInputMsg::SpfDeferExpiry(msg));
        }
        if let Ok(msg) = self.ztp_holddown.try_recv() {
            return Some(ProtocolInputMsg::ZtpHoldDownExpiry(msg));
        }
        None
    }
}

// ===== impl InstanceUpView =====

impl InstanceUpView<'_> {
    // This node's level: the configured level wins; otherwise the level
    // derived by ZTP (which may still be undefined).
    pub fn level_value(&self) -> Option<Level> {
        match self.config.level {
            LevelSymbol::Value(level) => Some(Level::from(level)),
            LevelSymbol::TopOfFabric => Some(Level::TOP_OF_FABRIC),
            LevelSymbol::Leaf | LevelSymbol::LeafToLeaf => Some(Level::LEAF),
            LevelSymbol::Undefined => self.state.derived_level,
        }
    }

    pub fn is_top_of_fabric(&self) -> bool {
        self.level_value() == Some(Level::TOP_OF_FABRIC)
    }

    pub(crate) fn lie_acceptance_ctx(&self) -> LieAcceptanceCtx {
        LieAcceptanceCtx {
            system_id: self.config.system_id,
            level: self.level_value(),
            hat: self.state.hat,
            leaf_2_leaf: self.config.level.leaf_2_leaf(),
        }
    }
}

// ===== global functions =====

fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (udp_packet_rxp, udp_packet_rxc) = mpsc::unbounded_channel();
    let (timer_tickp, timer_tickc) = mpsc::unbounded_channel();
    let (service_queuesp, service_queuesc) = mpsc::unbounded_channel();
    let (send_tidesp, send_tidesc) = mpsc::unbounded_channel();
    let (age_tiesp, age_tiesc) = mpsc::unbounded_channel();
    let (spf_runp, spf_runc) = mpsc::unbounded_channel();
    let (spf_deferp, spf_deferc) = mpsc::unbounded_channel();
    let (ztp_holddownp, ztp_holddownc) = mpsc::unbounded_channel();

    let tx = ProtocolInputChannelsTx {
        udp_packet_rx: udp_packet_rxp,
        timer_tick: timer_tickp,
        service_queues: service_queuesp,
        send_tides: send_tidesp,
        age_ties: age_tiesp,
        spf_run: spf_runp,
        spf_defer: spf_deferp,
        ztp_holddown: ztp_holddownp,
    };
    let rx = ProtocolInputChannelsRx {
        udp_packet_rx: udp_packet_rxc,
        timer_tick: timer_tickc,
        service_queues: service_queuesc,
        send_tides: send_tidesc,
        age_ties: age_tiesc,
        spf_run: spf_runc,
        spf_defer: spf_deferc,
        ztp_holddown: ztp_holddownc,
    };

    (tx, rx)
}

// Pushes an event into the ZTP FSM and drains its queue.
pub(crate) fn dispatch_ztp_event(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    event: ZtpEvent,
) {
    instance.state.ztp_fsm.push(event);
    process_ztp_queue(instance, arenas);
}

// Drains the ZTP FSM event queue, dispatching the resolved actions.
pub(crate) fn process_ztp_queue(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    while let Some(step) = instance.state.ztp_fsm.step() {
        if step.from != step.to {
            Debug::ZtpFsmTransition(
                step.from,
                <ZtpFsm as StateMachine>::event_name(&step.event),
                step.to,
            )
            .log();
        }
        for action in &step.actions {
            run_ztp_action(instance, arenas, *action, Some(&step.event));
        }
    }
}

// Dispatches one ZTP FSM action.
fn run_ztp_action(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    action: ZtpAction,
    event: Option<&ZtpEvent>,
) {
    match action {
        ZtpAction::StoreLevel => {
            // The configured level is already stored by the caller that
            // fired the event.
        }
        ZtpAction::UpdateOrRemoveOffer => {
            if let Some(ZtpEvent::NeighborOffer(offer)) = event {
                ztp::update_or_remove_offer(instance, offer.clone());
            }
        }
        ZtpAction::LevelCompute => {
            ztp::level_compute(instance);
        }
        ZtpAction::StartHoldDownTimer => {
            if ztp::any_southbound_adjacencies(instance) {
                instance.state.tasks.ztp_holddown =
                    Some(tasks::ztp_holddown_timer(
                        &instance.tx.protocol_input.ztp_holddown,
                    ));
            } else {
                instance.state.ztp_fsm.push(ZtpEvent::HoldDownExpired);
            }
        }
        ZtpAction::StopHoldDownTimer => {
            instance.state.tasks.ztp_holddown = None;
        }
        ZtpAction::PurgeOffers => {
            ztp::purge_offers(instance);
        }
        ZtpAction::UpdateAllLieFsms => {
            update_all_lie_fsms(instance, arenas);
        }
    }
}

// Re-derives this node's level and re-advertises it: every LIE FSM learns
// about the change (resetting adjacencies where the tables say so) and the
// self-originated TIEs are regenerated with the new level.
fn update_all_lie_fsms(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let old_level = instance.level_value();
    instance.state.derived_level = ztp::derive_level(instance.state.hal);
    let new_level = instance.level_value();
    if old_level == new_level {
        return;
    }

    for iface_idx in arenas.interfaces.indexes().collect::<Vec<_>>() {
        interface::dispatch_event(
            instance,
            arenas,
            iface_idx,
            LieEvent::LevelChanged(new_level),
        );
    }
    tiedb::regenerate_node_ties(instance, arenas);
    tiedb::regenerate_south_prefix_tie(instance, arenas);
}
