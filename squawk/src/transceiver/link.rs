//! UDP multicast link.
//!
//! Bridges the datagram socket to the transceiver's two queues: arrivals
//! are timestamped and offered to the receive queue without blocking
//! (dropped on overflow), and the transmit loop forwards queued payloads to
//! the multicast group. The link terminates on socket error or when the
//! transmit queue closes.

use crate::transceiver::{Link, ReceivedDatagram};
use chrono::Utc;
use log::{debug, error};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const MAX_DATAGRAM: usize = 2048;

pub struct IpMulticast {
    socket: UdpSocket,
    group: Ipv4Addr,
    port: u16,
    receive: mpsc::Sender<ReceivedDatagram>,
    transmit: mpsc::Receiver<Vec<u8>>,
}

impl IpMulticast {
    /// Open a reusable UDP socket bound to the group's port and join the
    /// group on all interfaces.
    pub fn bind(
        group: Ipv4Addr,
        port: u16,
        receive: mpsc::Sender<ReceivedDatagram>,
        transmit: mpsc::Receiver<Vec<u8>>,
    ) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self {
            socket,
            group,
            port,
            receive,
            transmit,
        })
    }
}

impl Link for IpMulticast {
    async fn run(mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, addr) = received?;
                    let tomr = Utc::now();
                    debug!("received UDP datagram from {addr} at {tomr}");
                    if self.receive.try_send((tomr, buf[..len].to_vec())).is_err() {
                        error!("receive queue full - message from {addr} dropped");
                    }
                }
                outbound = self.transmit.recv() => {
                    match outbound {
                        Some(data) => {
                            self.socket.send_to(&data, (self.group, self.port)).await?;
                        }
                        // Transmit queue closed: external shutdown.
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}
