//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::Bytes;
use rift_utils::socket::{UdpSocket, UdpSocketExt};
use rift_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;

use crate::collections::InterfaceId;
use crate::error::IoError;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceNet};
use crate::packet::pdu::Packet;
use crate::tasks::messages::input::UdpRxPacketMsg;
use crate::tasks::messages::output::UdpTxPacketMsg;
use crate::tasks;

// Creates the LIE socket pair of an interface and spawns its I/O tasks.
//
// The receive socket joins the configured LIE multicast group on the
// interface address; the transmit socket sends to the group through the
// same interface, with multicast loopback enabled so that nodes sharing a
// host (as in simulated topologies) can hear each other.
pub(crate) fn lie_sockets(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> Result<InterfaceNet, IoError> {
    // Receive socket.
    let rx_socket = UdpSocket::bind_reuseaddr(rift_utils::socket::wildcard_v4(
        iface.config.rx_lie_port,
    ))
    .map_err(IoError::SocketError)?;
    rx_socket
        .join_multicast_ifaddr_v4(
            &iface.config.rx_lie_mcast_addr,
            &iface.config.address,
        )
        .map_err(|error| {
            IoError::MulticastJoinError(iface.config.rx_lie_mcast_addr, error)
        })?;

    // Transmit socket.
    let src_addr = instance
        .config
        .tx_src_addr
        .unwrap_or(iface.config.address);
    let tx_socket =
        UdpSocket::bind_reuseaddr(SocketAddr::V4(SocketAddrV4::new(
            src_addr, 0,
        )))
        .map_err(IoError::SocketError)?;
    tx_socket
        .set_multicast_if_v4(&iface.config.address)
        .map_err(IoError::SocketError)?;
    tx_socket
        .set_multicast_loop_v4(true)
        .map_err(IoError::SocketError)?;

    Ok(spawn_io_tasks(iface, instance, rx_socket, tx_socket, false))
}

// Creates the flooding socket pair of an interface and spawns its I/O
// tasks. The receive socket listens on the local TIE port advertised to
// the neighbor; transmission goes to the neighbor's advertised flood port.
pub(crate) fn flood_sockets(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> Result<InterfaceNet, IoError> {
    let rx_socket = UdpSocket::bind_reuseaddr(rift_utils::socket::wildcard_v4(
        iface.config.rx_tie_port,
    ))
    .map_err(IoError::SocketError)?;

    let tx_socket =
        UdpSocket::bind_reuseaddr(SocketAddr::V4(SocketAddrV4::new(
            iface.config.address,
            0,
        )))
        .map_err(IoError::SocketError)?;

    Ok(spawn_io_tasks(iface, instance, rx_socket, tx_socket, true))
}

fn spawn_io_tasks(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    rx_socket: UdpSocket,
    tx_socket: UdpSocket,
    flood: bool,
) -> InterfaceNet {
    let (udp_tx_packetp, udp_tx_packetc) = mpsc::unbounded_channel();
    let rx_task = tasks::udp_rx(
        Arc::new(rx_socket),
        iface.id,
        flood,
        &instance.tx.protocol_input.udp_packet_rx,
    );
    let tx_task = tasks::udp_tx(Arc::new(tx_socket), udp_tx_packetc);
    InterfaceNet::new(udp_tx_packetp, rx_task, tx_task)
}

// ===== global functions =====

pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    iface_id: InterfaceId,
    flood: bool,
    udp_packet_rxp: UnboundedSender<UdpRxPacketMsg>,
) {
    let mut buf = [0; 65535];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((num_bytes, src)) => {
                // Decode the packet; errors are handled by the instance,
                // which logs them alongside the interface context.
                let bytes = Bytes::copy_from_slice(&buf[..num_bytes]);
                let packet = Packet::decode(bytes);
                let msg = UdpRxPacketMsg {
                    iface_key: iface_id.into(),
                    flood,
                    src,
                    packet,
                };
                if udp_packet_rxp.send(msg).is_err() {
                    return;
                }
            }
            Err(error)
                if error.kind() == std::io::ErrorKind::Interrupted =>
            {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::RecvError(error).log();
            }
        }
    }
}

pub(crate) async fn write_loop(
    socket: Arc<UdpSocket>,
    mut udp_packet_txc: UnboundedReceiver<UdpTxPacketMsg>,
) {
    while let Some(UdpTxPacketMsg { dst, packet, .. }) =
        udp_packet_txc.recv().await
    {
        let buf = packet.encode();
        if let Err(error) = socket.send_to(&buf, dst).await {
            IoError::SendError(error).log();
        }
    }
}
