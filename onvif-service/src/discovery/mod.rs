//! WS-Discovery responder on `239.255.255.250:3702`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use uuid::Uuid;

use crate::model::OnvifDiscovery;
use crate::onvif::DEVICE_SERVICE;
use crate::Result;

mod message;

pub use message::{scope_matches, Announcement, Request};

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const PORT: u16 = 3702;
const MAX_REPLY_DELAY_MS: u64 = 500;

/// Addresses announced in XAddrs and reported by GetNetworkInterfaces.
pub fn interface_addresses(config: &OnvifDiscovery) -> Vec<Ipv4Addr> {
    if !config.network_interfaces.is_empty() {
        return config.network_interfaces.clone();
    }
    if let Ok(ip) = config.ipv4_address.parse::<Ipv4Addr>() {
        if !ip.is_loopback() && !ip.is_unspecified() {
            return vec![ip];
        }
    }

    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::debug!("failed to list network interfaces: {}", e);
            match local_ip_address::local_ip() {
                Ok(IpAddr::V4(v4)) => vec![v4],
                _ => Vec::new(),
            }
        }
    }
}

pub fn xaddrs(config: &OnvifDiscovery, addresses: &[Ipv4Addr]) -> Vec<String> {
    if addresses.is_empty() {
        return vec![format!("http://{}:{}{}", config.ipv4_address, config.http_port, DEVICE_SERVICE)];
    }
    addresses
        .iter()
        .map(|a| format!("http://{}:{}{}", a, config.http_port, DEVICE_SERVICE))
        .collect()
}

fn bind_multicast(interfaces: &[Ipv4Addr]) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PORT));
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    let socket: std::net::UdpSocket = socket.into();
    if interfaces.is_empty() {
        socket.join_multicast_v4(&MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    }
    for iface in interfaces {
        if let Err(e) = socket.join_multicast_v4(&MULTICAST_ADDR, iface) {
            tracing::debug!("join {} on {} failed: {}", MULTICAST_ADDR, iface, e);
        }
    }
    socket.set_multicast_loop_v4(true)?;
    let _ = socket.set_multicast_ttl_v4(1);
    socket.set_nonblocking(true)?;
    Ok(socket)
}

pub struct Discovery {
    socket: UdpSocket,
    announcement: Announcement,
    message_number: AtomicU64,
}

impl Discovery {
    pub fn new(config: &OnvifDiscovery) -> Result<Discovery> {
        let interfaces = interface_addresses(config);
        let endpoint = config
            .endpoint_id
            .clone()
            .unwrap_or_else(|| format!("urn:uuid:{}", Uuid::new_v4()));

        let socket = UdpSocket::from_std(bind_multicast(&interfaces)?)?;

        Ok(Discovery {
            socket,
            announcement: Announcement {
                endpoint,
                types: config.types.clone(),
                scopes: config.scopes.clone(),
                xaddrs: xaddrs(config, &interfaces),
                metadata_version: config.metadata_version,
                instance_id: chrono::Utc::now().timestamp().max(0) as u64,
            },
            message_number: AtomicU64::new(1),
        })
    }

    pub fn announcement(&self) -> &Announcement {
        &self.announcement
    }

    fn next_message(&self) -> (String, u64) {
        (
            format!("urn:uuid:{}", Uuid::new_v4()),
            self.message_number.fetch_add(1, Ordering::Relaxed),
        )
    }

    async fn multicast(&self, xml: String) -> Result<()> {
        let target = SocketAddr::V4(SocketAddrV4::new(MULTICAST_ADDR, PORT));
        self.socket.send_to(xml.as_bytes(), target).await?;
        Ok(())
    }

    pub async fn hello(&self) -> Result<()> {
        let (id, number) = self.next_message();
        tracing::info!("discovery hello as {}", self.announcement.endpoint);
        self.multicast(self.announcement.hello(&id, number)).await
    }

    pub async fn bye(&self) -> Result<()> {
        let (id, number) = self.next_message();
        tracing::info!("discovery bye");
        self.multicast(self.announcement.bye(&id, number)).await
    }

    /// Answers probes and resolves until the socket fails.
    pub async fn run(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("discovery socket failed: {}", e);
                    break;
                }
            };

            let request = match std::str::from_utf8(&buf[..len]).ok().and_then(Request::parse) {
                Some(r) => r,
                None => continue,
            };
            if !self.announcement.matches(&request) {
                continue;
            }

            tracing::debug!("discovery request from {}: {:?}", from, request);
            let discovery = self.clone();
            tokio::spawn(async move {
                let delay = rand::thread_rng().gen_range(0..=MAX_REPLY_DELAY_MS);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let (id, number) = discovery.next_message();
                let reply = discovery.announcement.reply(&request, &id, number);
                if let Err(e) = discovery.socket.send_to(reply.as_bytes(), from).await {
                    tracing::warn!("discovery reply to {} failed: {}", from, e);
                }
            });
        }
    }
}

/// Binds the responder, announces Hello and serves requests in the
/// background. Returns `None` when discovery is disabled.
pub async fn start(config: &OnvifDiscovery) -> Result<Option<Arc<Discovery>>> {
    if !config.enabled {
        tracing::info!("discovery disabled");
        return Ok(None);
    }

    let discovery = Arc::new(Discovery::new(config)?);
    if let Err(e) = discovery.hello().await {
        tracing::warn!("discovery hello failed: {}", e);
    }
    tokio::spawn(discovery.clone().run());
    Ok(Some(discovery))
}
