//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::Result;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use tokio::net::UdpSocket;

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::socket::mock::UdpSocket;

// Extension methods for UdpSocket.
//
// All options are set through `socket2`, either on the owned socket before
// it is registered with the reactor, or through a borrowed `SockRef`
// afterwards.
pub trait UdpSocketExt {
    // Creates an IPv4 UDP socket bound to the given address.
    //
    // This is the same as [`UdpSocket::bind`], except that the
    // `SO_REUSEADDR` option is set before binding.
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket>;

    // Sets the interface used for outgoing multicast packets.
    fn set_multicast_if_v4(&self, ifaddr: &Ipv4Addr) -> Result<()>;

    // Joins the given multicast group on the given local interface.
    fn join_multicast_ifaddr_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifaddr: &Ipv4Addr,
    ) -> Result<()>;

    // Leaves the given multicast group.
    fn leave_multicast_ifaddr_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifaddr: &Ipv4Addr,
    ) -> Result<()>;

    // Sets the value of the IP_MULTICAST_LOOP option for this socket.
    fn set_multicast_loop_v4(&self, enable: bool) -> Result<()>;

    // Sets the value of the IP_MULTICAST_TTL option for this socket.
    fn set_multicast_ttl_v4(&self, ttl: u32) -> Result<()>;
}

#[cfg(not(feature = "testing"))]
impl UdpSocketExt for UdpSocket {
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    }

    fn set_multicast_if_v4(&self, ifaddr: &Ipv4Addr) -> Result<()> {
        let socket = socket2::SockRef::from(self);
        socket.set_multicast_if_v4(ifaddr)
    }

    fn join_multicast_ifaddr_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifaddr: &Ipv4Addr,
    ) -> Result<()> {
        let socket = socket2::SockRef::from(self);
        socket.join_multicast_v4(multiaddr, ifaddr)
    }

    fn leave_multicast_ifaddr_v4(
        &self,
        multiaddr: &Ipv4Addr,
        ifaddr: &Ipv4Addr,
    ) -> Result<()> {
        let socket = socket2::SockRef::from(self);
        socket.leave_multicast_v4(multiaddr, ifaddr)
    }

    fn set_multicast_loop_v4(&self, enable: bool) -> Result<()> {
        let socket = socket2::SockRef::from(self);
        socket.set_multicast_loop_v4(enable)
    }

    fn set_multicast_ttl_v4(&self, ttl: u32) -> Result<()> {
        let socket = socket2::SockRef::from(self);
        socket.set_multicast_ttl_v4(ttl)
    }
}

#[cfg(feature = "testing")]
impl UdpSocketExt for UdpSocket {
    fn bind_reuseaddr(_addr: SocketAddr) -> Result<UdpSocket> {
        Ok(UdpSocket())
    }

    fn set_multicast_if_v4(&self, _ifaddr: &Ipv4Addr) -> Result<()> {
        Ok(())
    }

    fn join_multicast_ifaddr_v4(
        &self,
        _multiaddr: &Ipv4Addr,
        _ifaddr: &Ipv4Addr,
    ) -> Result<()> {
        Ok(())
    }

    fn leave_multicast_ifaddr_v4(
        &self,
        _multiaddr: &Ipv4Addr,
        _ifaddr: &Ipv4Addr,
    ) -> Result<()> {
        Ok(())
    }

    fn set_multicast_loop_v4(&self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn set_multicast_ttl_v4(&self, _ttl: u32) -> Result<()> {
        Ok(())
    }
}

// Returns the wildcard IPv4 socket address for the given port.
pub fn wildcard_v4(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(feature = "testing")]
pub mod mock {
    use std::net::SocketAddr;

    #[derive(Debug)]
    pub struct UdpSocket();

    impl UdpSocket {
        pub async fn recv_from(
            &self,
            _buf: &mut [u8],
        ) -> std::io::Result<(usize, SocketAddr)> {
            std::future::pending().await
        }

        pub async fn send_to(
            &self,
            buf: &[u8],
            _target: SocketAddr,
        ) -> std::io::Result<usize> {
            Ok(buf.len())
        }
    }
}
