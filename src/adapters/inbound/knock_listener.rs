//! Knock Listener Adapter
//!
//! Binds the configured TCP/UDP ports and turns every inbound connection
//! or datagram into a dispatched access evaluation for its source address.
//! No payload is ever read from or written to the client.

use crate::adapters::inbound::Dispatcher;
use crate::domain::entities::ListenerProfile;
use crate::domain::value_objects::Protocol;
use crate::infrastructure::ShutdownController;
use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

/// Datagram content is ignored; this only needs to hold the first bytes.
const DATAGRAM_BUFFER_SIZE: usize = 64;

enum Socket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// A single bound listener.
///
/// This adapter:
/// 1. Accepts a connection (TCP) or receives a datagram (UDP)
/// 2. Takes the peer address and closes the connection without reading
/// 3. Dispatches an evaluation for the peer address
pub struct KnockListener {
    profile: Arc<ListenerProfile>,
    socket: Socket,
}

impl KnockListener {
    /// Bind the listener's port on `bind_ip`.
    pub async fn bind(profile: ListenerProfile, bind_ip: IpAddr) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(bind_ip, profile.port);
        let socket = match profile.protocol {
            Protocol::Tcp => Socket::Tcp(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("listener {}: cannot bind TCP {}", profile.name, addr))?,
            ),
            Protocol::Udp => Socket::Udp(
                UdpSocket::bind(addr)
                    .await
                    .with_context(|| format!("listener {}: cannot bind UDP {}", profile.name, addr))?,
            ),
        };

        Ok(Self {
            profile: Arc::new(profile),
            socket,
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.socket {
            Socket::Tcp(l) => l.local_addr(),
            Socket::Udp(s) => s.local_addr(),
        }
    }

    fn profile(&self) -> &ListenerProfile {
        &self.profile
    }

    /// Run until shutdown is signalled.
    ///
    /// Accept and receive errors are logged and never end the loop.
    pub async fn run(self, dispatcher: Dispatcher, shutdown: ShutdownController) {
        let mut stop = shutdown.subscribe();
        if *stop.borrow_and_update() {
            return;
        }

        let profile = self.profile;
        match self.socket {
            Socket::Tcp(listener) => loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            drop(stream);
                            Self::knock(&dispatcher, &profile, peer);
                        }
                        Err(e) => {
                            tracing::error!(listener = %profile.name, "error accepting connection: {}", e);
                        }
                    },
                }
            },
            Socket::Udp(socket) => {
                let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];
                loop {
                    tokio::select! {
                        _ = stop.changed() => break,
                        received = socket.recv_from(&mut buf) => match received {
                            Ok((_, peer)) => Self::knock(&dispatcher, &profile, peer),
                            Err(e) => {
                                tracing::error!(listener = %profile.name, "error reading datagram: {}", e);
                            }
                        },
                    }
                }
            }
        }

        tracing::info!(listener = %profile.name, "listener stopped");
    }

    fn knock(dispatcher: &Dispatcher, profile: &Arc<ListenerProfile>, peer: SocketAddr) {
        // v4 clients on a dual-stack socket show up as ::ffff:a.b.c.d
        let ip = peer.ip().to_canonical();
        tracing::info!(
            ip = %ip,
            port = peer.port(),
            listener = %profile.name,
            "knock on {}/{}",
            profile.protocol,
            profile.port
        );
        dispatcher.dispatch(profile.clone(), ip);
    }
}

/// Owns every configured listener.
///
/// All sockets are bound up front so a bind failure aborts startup before
/// any listener begins accepting.
pub struct ListenerManager {
    listeners: Vec<KnockListener>,
}

impl ListenerManager {
    /// Bind every profile on `bind_ip`, failing on the first bind error.
    pub async fn bind_all(profiles: Vec<ListenerProfile>, bind_ip: IpAddr) -> anyhow::Result<Self> {
        let mut listeners = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let listener = KnockListener::bind(profile, bind_ip).await?;
            tracing::info!(
                listener = %listener.profile().name,
                "listening on {}/{}",
                listener.profile().protocol,
                listener.local_addr()?
            );
            listeners.push(listener);
        }
        Ok(Self { listeners })
    }

    /// Bound addresses, by listener name.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok().map(|a| (l.profile().name.clone(), a)))
            .collect()
    }

    /// Spawn one task per listener.
    pub fn spawn(self, dispatcher: Dispatcher, shutdown: ShutdownController) -> Vec<JoinHandle<()>> {
        self.listeners
            .into_iter()
            .map(|listener| tokio::spawn(listener.run(dispatcher.clone(), shutdown.clone())))
            .collect()
    }
}
