//! `DhsConnection`
//!
//! The server's end of a client connection: deserializes inbound commands and serializes
//! outbound ones.

use std::fmt::Debug;
use std::net::SocketAddr;

use log::trace;
use log::warn;

use crate::commands::CommandDirection;
use crate::commands::CommandProperties;
use crate::commands::client_to_server::ToServerCommand;
use crate::commands::deserialize_frame;
use crate::commands::serialize_frame;
use crate::commands::server_to_client::ToClientCommand;
use crate::peer::Peer;
use crate::peer::PeerError;

/// This is owned by the session driving the connection
#[derive(Debug)]
pub struct DhsConnection {
    id: u64,
    peer: Peer,
    verbosity: u8,
}

impl DhsConnection {
    #[must_use]
    pub fn new(id: u64, peer: Peer) -> Self {
        Self {
            id,
            peer,
            verbosity: 0,
        }
    }

    /// Controls how much of each command is traced: 0 nothing, 1 names, 2 contents.
    #[must_use]
    pub fn with_frame_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.peer.remote_addr()
    }

    /// The largest frame the peer accepts, in bytes.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.peer.max_frame_size()
    }

    /// Send a command to the client
    pub async fn send(&self, command: ToClientCommand) -> anyhow::Result<()> {
        show_command(self.id, self.verbosity, &command, is_bulk(&command));
        let frame = serialize_frame(&command)?;
        self.peer.send(frame).await?;
        Ok(())
    }

    /// Await a command from the client.
    ///
    /// Frames that fail to deserialize are logged and skipped. Only transport failures are
    /// returned, after which the connection is gone.
    pub async fn recv(&mut self) -> Result<ToServerCommand, PeerError> {
        loop {
            let frame = self.peer.recv().await?;
            match deserialize_frame::<ToServerCommand>(&frame) {
                Ok(command) => {
                    show_command(self.id, self.verbosity, &command, false);
                    return Ok(command);
                }
                Err(err) => warn!(
                    "[P{}] dropping malformed frame of {} bytes: {err:#}",
                    self.id,
                    frame.len()
                ),
            }
        }
    }
}

fn is_bulk(command: &ToClientCommand) -> bool {
    matches!(
        command,
        ToClientCommand::LodData(_) | ToClientCommand::LodDataChunk(_)
    )
}

/// Traces a command according to `verbosity`.
pub fn show_command<C>(id: u64, mut verbosity: u8, command: &C, bulk: bool)
where
    C: CommandProperties + Debug,
{
    let dir = match command.direction() {
        CommandDirection::ToClient => "S->C",
        CommandDirection::ToServer => "C->S",
    };
    if verbosity == 2 && bulk {
        // payload dumps are huge; stick to the name
        verbosity = 1;
    }
    match verbosity {
        0 => (),
        1 => trace!("[P{id}] {dir} {}", command.command_name()),
        2.. => trace!("[P{id}] {dir} {command:#?}"),
    }
}
