//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use rift_utils::socket::UdpSocket;
use rift_utils::task::{IntervalTask, Task, TimeoutTask};
use rift_utils::{UnboundedReceiver, UnboundedSender};

use crate::collections::InterfaceId;
use crate::network;
use crate::spf::SPF_MIN_INTERVAL;
use crate::ztp::HOLD_DOWN_TIME;

// Interval between TIDE transmissions, in seconds.
const TIDE_INTERVAL: u64 = 2;
// Interval between flooding queue services, in seconds.
const SERVICE_QUEUES_INTERVAL: u64 = 1;

//
// RIFT tasks diagram:
//                                     +--------------+
//                      udp_rx (Nx) -> |              | -> (Nx) udp_tx
//                  timer_tick (Nx) -> |              |
//              service_queues (Nx) -> |              |
//                  send_tides (1x) -> |   instance   |
//                    age_ties (1x) -> |              |
//     spf_run / spf_defer (1x each) -> |              |
//                ztp_holddown (1x) -> |              |
//                                     +--------------+
//

// RIFT inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;
    pub type ProtocolOutputMsg = output::UdpTxPacketMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::net::SocketAddr;

        use super::*;
        use crate::collections::InterfaceKey;
        use crate::packet::error::DecodeError;
        use crate::packet::pdu::Packet;

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub enum ProtocolMsg {
            UdpRxPacket(UdpRxPacketMsg),
            TimerTick(TimerTickMsg),
            ServiceQueues(ServiceQueuesMsg),
            SendTides(SendTidesMsg),
            AgeTies(AgeTiesMsg),
            SpfRun(SpfRunMsg),
            SpfDeferExpiry(SpfDeferExpiryMsg),
            ZtpHoldDownExpiry(ZtpHoldDownExpiryMsg),
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct UdpRxPacketMsg {
            pub iface_key: InterfaceKey,
            // Whether the packet arrived on the flooding port.
            pub flood: bool,
            pub src: SocketAddr,
            pub packet: Result<Packet, DecodeError>,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct TimerTickMsg {
            pub iface_key: InterfaceKey,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct ServiceQueuesMsg {
            pub iface_key: InterfaceKey,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SendTidesMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct AgeTiesMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SpfRunMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SpfDeferExpiryMsg {}

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct ZtpHoldDownExpiryMsg {}
    }

    // Output messages (main task -> child task).
    pub mod output {
        use std::net::SocketAddr;

        use super::*;
        use crate::packet::pdu::Packet;

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct UdpTxPacketMsg {
            pub ifname: String,
            pub flood: bool,
            pub dst: SocketAddr,
            pub packet: Packet,
        }
    }
}

// ===== RIFT tasks =====

// UDP receive task.
pub(crate) fn udp_rx(
    socket: Arc<UdpSocket>,
    iface_id: InterfaceId,
    flood: bool,
    udp_packet_rxp: &UnboundedSender<messages::input::UdpRxPacketMsg>,
) -> Task<()> {
    let udp_packet_rxp = udp_packet_rxp.clone();
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let udp_packet_rxp = udp_packet_rxp.clone();
        async move {
            network::read_loop(socket, iface_id, flood, udp_packet_rxp).await;
        }
    })
}

// UDP transmit task.
pub(crate) fn udp_tx(
    socket: Arc<UdpSocket>,
    udp_packet_txc: UnboundedReceiver<messages::output::UdpTxPacketMsg>,
) -> Task<()> {
    Task::spawn(async move {
        network::write_loop(socket, udp_packet_txc).await;
    })
}

// Per-interface one-second tick, driving LIE transmission and the
// adjacency hold timer.
pub(crate) fn timer_tick_interval(
    iface_id: InterfaceId,
    timer_tickp: &UnboundedSender<messages::input::TimerTickMsg>,
) -> IntervalTask {
    let timer_tickp = timer_tickp.clone();
    IntervalTask::new(Duration::from_secs(1), false, move || {
        let timer_tickp = timer_tickp.clone();
        async move {
            let msg = messages::input::TimerTickMsg {
                iface_key: iface_id.into(),
            };
            let _ = timer_tickp.send(msg);
        }
    })
}

// Per-interface flooding queue service tick.
pub(crate) fn service_queues_interval(
    iface_id: InterfaceId,
    service_queuesp: &UnboundedSender<messages::input::ServiceQueuesMsg>,
) -> IntervalTask {
    let service_queuesp = service_queuesp.clone();
    IntervalTask::new(
        Duration::from_secs(SERVICE_QUEUES_INTERVAL),
        false,
        move || {
            let service_queuesp = service_queuesp.clone();
            async move {
                let msg = messages::input::ServiceQueuesMsg {
                    iface_key: iface_id.into(),
                };
                let _ = service_queuesp.send(msg);
            }
        },
    )
}

// Periodic TIDE emission.
pub(crate) fn tide_interval(
    send_tidesp: &UnboundedSender<messages::input::SendTidesMsg>,
) -> IntervalTask {
    let send_tidesp = send_tidesp.clone();
    IntervalTask::new(Duration::from_secs(TIDE_INTERVAL), false, move || {
        let send_tidesp = send_tidesp.clone();
        async move {
            let _ = send_tidesp.send(messages::input::SendTidesMsg {});
        }
    })
}

// One-second TIE aging tick.
pub(crate) fn aging_interval(
    age_tiesp: &UnboundedSender<messages::input::AgeTiesMsg>,
) -> IntervalTask {
    let age_tiesp = age_tiesp.clone();
    IntervalTask::new(Duration::from_secs(1), false, move || {
        let age_tiesp = age_tiesp.clone();
        async move {
            let _ = age_tiesp.send(messages::input::AgeTiesMsg {});
        }
    })
}

// SPF minimum-interval timer.
pub(crate) fn spf_defer_timer(
    spf_deferp: &UnboundedSender<messages::input::SpfDeferExpiryMsg>,
) -> TimeoutTask {
    let spf_deferp = spf_deferp.clone();
    TimeoutTask::new(Duration::from_secs(SPF_MIN_INTERVAL), move || async move {
        let _ = spf_deferp.send(messages::input::SpfDeferExpiryMsg {});
    })
}

// ZTP hold-down timer.
pub(crate) fn ztp_holddown_timer(
    ztp_holddownp: &UnboundedSender<messages::input::ZtpHoldDownExpiryMsg>,
) -> TimeoutTask {
    let ztp_holddownp = ztp_holddownp.clone();
    TimeoutTask::new(Duration::from_secs(HOLD_DOWN_TIME), move || async move {
        let _ = ztp_holddownp.send(messages::input::ZtpHoldDownExpiryMsg {});
    })
}
