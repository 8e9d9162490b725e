//!
//! Peer
//!
//! Turns a byte stream (a `TcpStream` or an in-memory duplex pipe) into a stream of frames,
//! and vice versa.
//!
//! Every frame is prefixed with its length as a big-endian `u32`. Reading and writing happen on
//! two background tasks, so neither a slow client nor a large frame ever blocks the owner of the
//! [`Peer`].
//!

use std::io;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use log::debug;
use log::trace;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;

/// Frames that may wait for the writer before `send` starts to wait as well.
const OUTBOUND_QUEUE: usize = 64;
/// Frames the reader may run ahead of its owner.
const INBOUND_QUEUE: usize = 16;
const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {
    #[error("Peer closed the connection")]
    PeerClosed,
    #[error("Frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Connection tasks have stopped")]
    ControllerClosed,
}

/// One end of a framed connection.
#[derive(Debug)]
pub struct Peer {
    remote_addr: SocketAddr,
    max_frame_size: usize,
    send: mpsc::Sender<Vec<u8>>,
    recv: mpsc::Receiver<Result<Vec<u8>, PeerError>>,
}

impl Peer {
    /// Spawns the reader and writer tasks for `stream`.
    pub fn spawn<S>(stream: S, remote_addr: SocketAddr, max_frame_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (send_tx, send_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (recv_tx, recv_rx) = mpsc::channel(INBOUND_QUEUE);

        tokio::spawn(run_reader(reader, recv_tx, remote_addr, max_frame_size));
        tokio::spawn(run_writer(writer, send_rx, remote_addr));

        Self {
            remote_addr,
            max_frame_size,
            send: send_tx,
            recv: recv_rx,
        }
    }

    /// Creates two connected peers backed by an in-memory pipe.
    #[must_use]
    pub fn pair(max_frame_size: usize) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(MEMORY_PIPE_CAPACITY);
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        (
            Self::spawn(left, addr, max_frame_size),
            Self::spawn(right, addr, max_frame_size),
        )
    }

    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Queues a frame for sending. Waits while the outbound queue is full.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), PeerError> {
        if frame.len() > self.max_frame_size {
            return Err(PeerError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_frame_size,
            });
        }
        self.send
            .send(frame)
            .await
            .map_err(|_closed| PeerError::ControllerClosed)
    }

    /// Receives the next complete frame.
    ///
    /// If this fails, the peer is disconnected.
    pub async fn recv(&mut self) -> Result<Vec<u8>, PeerError> {
        match self.recv.recv().await {
            Some(result) => result,
            None => Err(PeerError::ControllerClosed),
        }
    }
}

async fn run_reader<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    frames: mpsc::Sender<Result<Vec<u8>, PeerError>>,
    remote_addr: SocketAddr,
    max_frame_size: usize,
) {
    loop {
        let result = read_frame(&mut reader, max_frame_size).await;
        let stop = result.is_err();
        if let Err(err) = &result {
            debug!("{remote_addr}: reader stopped: {err}");
        }
        if frames.send(result).await.is_err() || stop {
            break;
        }
    }
}

async fn read_frame<S: AsyncRead>(
    reader: &mut ReadHalf<S>,
    max_frame_size: usize,
) -> Result<Vec<u8>, PeerError> {
    let length = match reader.read_u32().await {
        Ok(length) => length,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Err(PeerError::PeerClosed),
        Err(err) => return Err(err.into()),
    };
    let size = usize::try_from(length).unwrap_or(usize::MAX);
    if size > max_frame_size {
        return Err(PeerError::FrameTooLarge {
            size,
            limit: max_frame_size,
        });
    }
    let mut frame = vec![0; size];
    reader.read_exact(&mut frame).await?;
    trace!("received frame of {size} bytes");
    Ok(frame)
}

async fn run_writer<S: AsyncWrite>(
    mut writer: WriteHalf<S>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    remote_addr: SocketAddr,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(err) = write_frame(&mut writer, &frame).await {
            debug!("{remote_addr}: writer stopped: {err}");
            return;
        }
    }
    // the owner dropped the peer; flush what's left and signal EOF
    if let Err(err) = writer.shutdown().await {
        trace!("{remote_addr}: shutdown failed: {err}");
    }
}

async fn write_frame<S: AsyncWrite>(
    writer: &mut WriteHalf<S>,
    frame: &[u8],
) -> Result<(), PeerError> {
    let length = u32::try_from(frame.len()).map_err(|_overflow| PeerError::FrameTooLarge {
        size: frame.len(),
        limit: usize::try_from(u32::MAX).unwrap_or(usize::MAX),
    })?;
    writer.write_u32(length).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::RngCore;
    use rand::rng;

    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (left, mut right) = Peer::pair(DEFAULT_MAX_FRAME_SIZE);
        let mut rng = rng();
        let mut sent = Vec::new();
        for _ in 0..50 {
            let mut frame = vec![0_u8; rng.random_range(0..2000)];
            rng.fill_bytes(&mut frame);
            sent.push(frame.clone());
            left.send(frame).await.unwrap();
        }
        for expected in sent {
            assert_eq!(right.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn large_frames_pass_the_memory_pipe() {
        let (left, mut right) = Peer::pair(DEFAULT_MAX_FRAME_SIZE);
        let frame = vec![0xAB; 3 * MEMORY_PIPE_CAPACITY + 17];
        left.send(frame.clone()).await.unwrap();
        assert_eq!(right.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn oversized_frames() {
        let (left, _right) = Peer::pair(100);
        assert!(matches!(
            left.send(vec![0; 101]).await,
            Err(PeerError::FrameTooLarge {
                size: 101,
                limit: 100
            })
        ));

        // an announced length above the limit ends the connection
        let (client, server) = tokio::io::duplex(1024);
        let mut peer = Peer::spawn(server, SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), 100);
        let (_client_read, mut client_write) = tokio::io::split(client);
        client_write.write_u32(5000).await.unwrap();
        assert!(matches!(
            peer.recv().await,
            Err(PeerError::FrameTooLarge { size: 5000, .. })
        ));
    }

    #[tokio::test]
    async fn dropping_one_side_closes_the_other() {
        let (left, mut right) = Peer::pair(DEFAULT_MAX_FRAME_SIZE);
        left.send(vec![1, 2, 3]).await.unwrap();
        drop(left);
        assert_eq!(right.recv().await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(right.recv().await, Err(PeerError::PeerClosed)));
    }
}
