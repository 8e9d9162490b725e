//!
//! `DhsServer` accepts TCP connections and hands each one out as a [`DhsConnection`].
//!

use std::net::SocketAddr;

use anyhow::Context;
use log::info;
use log::warn;
use tokio::net::TcpListener;

use super::conn::DhsConnection;
use crate::peer::Peer;

pub struct DhsServer {
    listener: TcpListener,
    max_frame_size: usize,
    next_id: u64,
}

impl DhsServer {
    pub async fn bind(bind_addr: SocketAddr, max_frame_size: usize) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("binding {bind_addr}"))?;
        info!("DhsServer listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            max_frame_size,
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next client.
    pub async fn accept(&mut self) -> anyhow::Result<DhsConnection> {
        let (stream, remote_addr) = self.listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!("{remote_addr}: failed to set TCP_NODELAY: {err}");
        }
        let id = self.next_id;
        self.next_id += 1;
        info!("[P{id}] accepted connection from {remote_addr}");
        Ok(DhsConnection::new(
            id,
            Peer::spawn(stream, remote_addr, self.max_frame_size),
        ))
    }
}
