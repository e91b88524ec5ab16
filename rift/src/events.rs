//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::adjacency::{LieEvent, LieInput, LieState};
use crate::collections::{InterfaceIndex, InterfaceKey};
use crate::debug::Debug;
use crate::error::{Error, PacketInputError};
use crate::instance::{self, InstanceArenas, InstanceUpView};
use crate::interface::{self, FailureMode};
use crate::packet::error::DecodeError;
use crate::packet::pdu::{Content, Packet, TidePacket, TiePacket, TirePacket};
use crate::packet::TieType;
use crate::tasks::messages::input::ProtocolMsg;
use crate::ztp::ZtpEvent;
use crate::{spf, tiedb};

// ===== Message dispatch =====

pub(crate) fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolMsg,
) -> Result<(), Error> {
    match msg {
        // Received UDP packet.
        ProtocolMsg::UdpRxPacket(msg) => {
            process_udp_packet(
                instance,
                arenas,
                msg.iface_key,
                msg.flood,
                msg.src,
                msg.packet,
            )?;
        }
        // Per-interface one-second tick.
        ProtocolMsg::TimerTick(msg) => {
            process_timer_tick(instance, arenas, msg.iface_key)?;
        }
        // Per-interface flooding queue service.
        ProtocolMsg::ServiceQueues(msg) => {
            process_service_queues(instance, arenas, msg.iface_key)?;
        }
        // Periodic TIDE emission.
        ProtocolMsg::SendTides(_msg) => {
            process_send_tides(instance, arenas);
        }
        // One-second TIE aging tick.
        ProtocolMsg::AgeTies(_msg) => {
            process_age_tick(instance, arenas);
        }
        // SPF run request.
        ProtocolMsg::SpfRun(_msg) => {
            spf::run(instance, arenas);
        }
        // SPF minimum-interval timer expiry.
        ProtocolMsg::SpfDeferExpiry(_msg) => {
            spf::defer_timer_expired(instance, arenas);
        }
        // ZTP hold-down timer expiry.
        ProtocolMsg::ZtpHoldDownExpiry(_msg) => {
            instance::dispatch_ztp_event(
                instance,
                arenas,
                ZtpEvent::HoldDownExpired,
            );
        }
    }

    Ok(())
}

// ===== UDP packet receipt =====

pub(crate) fn process_udp_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
    flood: bool,
    src: SocketAddr,
    packet: Result<Packet, DecodeError>,
) -> Result<(), Error> {
    // Lookup interface.
    let iface = arenas.interfaces.get_mut_by_key(&iface_key)?;
    let iface_idx = iface.index;

    // Ignore packets received on inactive interfaces.
    if !iface.state.active {
        return Ok(());
    }

    // Simulated failure modes drop the packet here.
    if matches!(
        iface.state.failure,
        FailureMode::RxFailed | FailureMode::Failed
    ) {
        debug!(interface = %iface.name, %src, "simulated receive failure");
        return Ok(());
    }

    // Check if the packet was decoded successfully.
    let packet = packet.map_err(|error| {
        Error::PacketInputError(iface.name.clone(), src, error.into())
    })?;

    // Packets whose sender equals this node are dropped as self-echoes of
    // the LIE multicast.
    if packet.hdr.sender == instance.config.system_id {
        debug!(interface = %iface.name, %src, "looped receive");
        return Ok(());
    }

    Debug::PacketRx(&iface.name, &src, &packet).log();

    match (flood, packet.content) {
        (false, Content::Lie(lie)) => {
            let input = LieInput {
                hdr: packet.hdr,
                lie,
                src,
            };
            interface::dispatch_event(
                instance,
                arenas,
                iface_idx,
                LieEvent::LieReceived(Box::new(input)),
            );
            Ok(())
        }
        (true, Content::Tie(tie)) => {
            process_rx_tie(instance, arenas, iface_idx, &tie);
            Ok(())
        }
        (true, Content::Tide(tide)) => {
            process_rx_tide(instance, arenas, iface_idx, &tide)
        }
        (true, Content::Tire(tire)) => {
            process_rx_tire(instance, arenas, iface_idx, &tire);
            Ok(())
        }
        // Content received on the wrong port is dropped with a warning.
        (false, content) => {
            let content_type = match content {
                Content::Tide(..) => "TIDE",
                Content::Tire(..) => "TIRE",
                _ => "TIE",
            };
            let iface = &arenas.interfaces[iface_idx];
            Err(Error::PacketInputError(
                iface.name.clone(),
                src,
                PacketInputError::WrongPort(content_type),
            ))
        }
        (true, Content::Lie(..)) => {
            let iface = &arenas.interfaces[iface_idx];
            Err(Error::PacketInputError(
                iface.name.clone(),
                src,
                PacketInputError::WrongPort("LIE"),
            ))
        }
    }
}

fn process_rx_tie(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    rx_tie: &TiePacket,
) {
    let (start_sending, ack) = tiedb::process_received_tie(instance, rx_tie);

    let iface = &mut arenas.interfaces[iface_idx];
    if let Some(header) = start_sending {
        iface.try_to_transmit_tie(instance, &header);
    }
    if let Some(header) = ack {
        iface.ack_tie(&header);
    }

    // A node TIE from another node may change the southbound
    // default-origination policy.
    let tie_id = rx_tie.header.tie_id;
    if tie_id.tie_type == TieType::Node
        && tie_id.originator != instance.config.system_id
    {
        tiedb::regenerate_south_prefix_tie(instance, arenas);
    }
}

fn process_rx_tide(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    tide: &TidePacket,
) -> Result<(), Error> {
    // The headers of a TIDE must be strictly sorted in ascending TIE-ID
    // order and lie within the advertised range; violations drop the
    // packet.
    let sorted = tide
        .headers
        .windows(2)
        .all(|pair| pair[0].tie_id < pair[1].tie_id);
    let in_range = tide.start_range <= tide.end_range
        && tide.headers.iter().all(|header| {
            header.tie_id >= tide.start_range
                && header.tie_id <= tide.end_range
        });
    if !sorted || !in_range {
        debug_assert!(false, "malformed TIDE");
        warn!("received TIDE with out-of-order or out-of-range headers");
        return Ok(());
    }

    let iface = &mut arenas.interfaces[iface_idx];
    let mut last_tide_end = iface.state.last_tide_end;
    let result =
        tiedb::process_received_tide(instance, &mut last_tide_end, tide);
    let iface = &mut arenas.interfaces[iface_idx];
    iface.state.last_tide_end = last_tide_end;

    for header in &result.start_sending {
        iface.try_to_transmit_tie(instance, header);
    }
    for header in &result.request {
        iface.request_tie(instance, header);
    }
    for header in &result.stop_sending {
        iface.remove_from_all_queues(&header.tie_id);
    }

    Ok(())
}

fn process_rx_tire(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_idx: InterfaceIndex,
    tire: &TirePacket,
) {
    let result = tiedb::process_received_tire(instance, tire);

    let iface = &mut arenas.interfaces[iface_idx];
    for header in &result.start_sending {
        iface.try_to_transmit_tie(instance, header);
    }
    for header in &result.request {
        iface.request_tie(instance, header);
    }
    for header in &result.acked {
        iface.tie_been_acked(&header.tie_id);
    }
}

// ===== Timer events =====

pub(crate) fn process_timer_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
) -> Result<(), Error> {
    let iface = arenas.interfaces.get_by_key(&iface_key)?;
    let iface_idx = iface.index;
    interface::dispatch_event(
        instance,
        arenas,
        iface_idx,
        LieEvent::TimerTick,
    );
    Ok(())
}

pub(crate) fn process_service_queues(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    iface_key: InterfaceKey,
) -> Result<(), Error> {
    let iface = arenas.interfaces.get_mut_by_key(&iface_key)?;
    if iface.state.fsm.state() == LieState::ThreeWay {
        iface.service_queues(instance);
    }
    Ok(())
}

pub(crate) fn process_send_tides(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    let indexes: Vec<_> = arenas.interfaces.indexes().collect();
    for iface_idx in indexes {
        tiedb::send_tide_on_interface(
            instance,
            &mut arenas.interfaces[iface_idx],
        );
    }
}

pub(crate) fn process_age_tick(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    // A flushed TIE may have been a foreign node TIE feeding the
    // southbound default-origination policy.
    if tiedb::age_ties(instance) != 0 {
        tiedb::regenerate_south_prefix_tie(instance, arenas);
    }
}
