use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::bail;
use log::debug;
use tokio::net::TcpStream;

use crate::commands::client_to_server::HelloSpec;
use crate::commands::client_to_server::ToServerCommand;
use crate::commands::deserialize_frame;
use crate::commands::serialize_frame;
use crate::commands::server_to_client::LodDataBody;
use crate::commands::server_to_client::LodDataChunkSpec;
use crate::commands::server_to_client::ToClientCommand;
use crate::commands::server_to_client::WelcomeSpec;
use crate::compat::SUPPORTED_PROTOCOL_VERSIONS;
use crate::peer::Peer;
use crate::types::Capabilities;

/// The client mod's end of a connection.
///
/// Reassembles chunked transfers: [`Self::recv`] never yields `LodDataChunk`, and every
/// `LodData` it yields carries its payload inline.
pub struct DhsClient {
    server: Peer,
    max_payload: usize,
    buffers: HashMap<u32, Vec<u8>>,
}

impl DhsClient {
    pub async fn connect(server_address: SocketAddr, max_frame_size: usize) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(server_address).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(Peer::spawn(stream, server_address, max_frame_size)))
    }

    #[must_use]
    pub fn new(server: Peer) -> Self {
        let max_payload = server.max_frame_size();
        Self {
            server,
            max_payload,
            buffers: HashMap::new(),
        }
    }

    /// Sends `Hello` for the full supported range and waits for the answer.
    ///
    /// Returns the server's `Welcome`, or fails with whatever else the server sent instead.
    pub async fn handshake(&mut self, capabilities: Capabilities) -> anyhow::Result<WelcomeSpec> {
        self.send(
            HelloSpec {
                min_protocol_version: *SUPPORTED_PROTOCOL_VERSIONS.start(),
                max_protocol_version: *SUPPORTED_PROTOCOL_VERSIONS.end(),
                capabilities,
            }
            .into(),
        )
        .await?;
        match self.recv().await? {
            ToClientCommand::Welcome(welcome) => Ok(*welcome),
            other => bail!("handshake failed: {other:?}"),
        }
    }

    /// If this fails, the client has disconnected.
    pub async fn recv(&mut self) -> anyhow::Result<ToClientCommand> {
        loop {
            let frame = self.server.recv().await?;
            match deserialize_frame::<ToClientCommand>(&frame)? {
                ToClientCommand::LodDataChunk(chunk) => self.append_chunk(*chunk)?,
                ToClientCommand::LodData(mut data) => {
                    if let LodDataBody::Buffered(buffer_id) = data.body {
                        let Some(payload) = self.buffers.remove(&buffer_id) else {
                            bail!("LodData refers to unknown buffer {buffer_id}");
                        };
                        data.body = LodDataBody::Inline(payload);
                    }
                    return Ok(ToClientCommand::LodData(data));
                }
                command => return Ok(command),
            }
        }
    }

    /// If this fails, the client has disconnected.
    pub async fn send(&mut self, command: ToServerCommand) -> anyhow::Result<()> {
        self.server.send(serialize_frame(&command)?).await?;
        Ok(())
    }

    fn append_chunk(&mut self, chunk: LodDataChunkSpec) -> anyhow::Result<()> {
        let LodDataChunkSpec {
            buffer_id,
            is_first,
            data,
        } = chunk;
        if is_first {
            debug!("starting buffer {buffer_id}");
            self.buffers.insert(buffer_id, data);
            return Ok(());
        }
        let Some(buffer) = self.buffers.get_mut(&buffer_id) else {
            bail!("chunk for buffer {buffer_id} arrived before its first chunk");
        };
        if buffer.len() + data.len() > self.max_payload {
            bail!("buffer {buffer_id} exceeds {} bytes", self.max_payload);
        }
        buffer.extend_from_slice(&data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::server_to_client::LodDataSpec;
    use crate::peer::DEFAULT_MAX_FRAME_SIZE;

    async fn send(peer: &Peer, command: ToClientCommand) {
        peer.send(serialize_frame(&command).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn reassembles_chunks() {
        let (server, client) = Peer::pair(DEFAULT_MAX_FRAME_SIZE);
        let mut client = DhsClient::new(client);
        let payload: Vec<u8> = (0..=255).cycle().take(1000).collect();
        for (index, part) in payload.chunks(300).enumerate() {
            let chunk = LodDataChunkSpec {
                buffer_id: 4,
                is_first: index == 0,
                data: part.to_vec(),
            };
            send(&server, chunk.into()).await;
        }
        let data = LodDataSpec {
            request_id: 11,
            body: LodDataBody::Buffered(4),
        };
        send(&server, data.into()).await;

        let ToClientCommand::LodData(data) = client.recv().await.unwrap() else {
            panic!("expected LodData");
        };
        assert_eq!(data.request_id, 11);
        assert_eq!(data.body, LodDataBody::Inline(payload));
        assert!(client.buffers.is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_buffer() {
        let (server, client) = Peer::pair(DEFAULT_MAX_FRAME_SIZE);
        let mut client = DhsClient::new(client);
        let data = LodDataSpec {
            request_id: 1,
            body: LodDataBody::Buffered(9),
        };
        send(&server, data.into()).await;
        assert!(client.recv().await.is_err());
    }
}
