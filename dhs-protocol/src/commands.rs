//! The command set exchanged between the bridge and the client mod.
//!
//! Every frame carries exactly one command: a single id byte followed by the command's fields.

#[macro_use]
mod macros;
pub mod client_to_server;
pub mod server_to_client;

use client_to_server::ToServerCommand;
use server_to_client::ToClientCommand;

use crate::wire::deser::Deserialize;
use crate::wire::deser::DeserializeResult;
use crate::wire::deser::Deserializer;
use crate::wire::ser::Serialize;
use crate::wire::ser::SerializeResult;
use crate::wire::ser::Serializer;
use crate::wire::ser::VecSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDirection {
    ToServer,
    ToClient,
}

pub trait CommandProperties {
    fn direction(&self) -> CommandDirection;
    fn command_id(&self) -> u8;
    fn command_name(&self) -> &'static str;
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    ToServer(ToServerCommand),
    ToClient(ToClientCommand),
}

impl CommandProperties for Command {
    fn direction(&self) -> CommandDirection {
        match self {
            Command::ToServer(_) => CommandDirection::ToServer,
            Command::ToClient(_) => CommandDirection::ToClient,
        }
    }

    fn command_id(&self) -> u8 {
        match self {
            Command::ToServer(command) => command.command_id(),
            Command::ToClient(command) => command.command_id(),
        }
    }

    fn command_name(&self) -> &'static str {
        match self {
            Command::ToServer(command) => command.command_name(),
            Command::ToClient(command) => command.command_name(),
        }
    }
}

impl Serialize for Command {
    type Input = Self;
    fn serialize<S: Serializer>(value: &Self::Input, ser: &mut S) -> SerializeResult {
        match value {
            Command::ToServer(command) => ToServerCommand::serialize(command, ser),
            Command::ToClient(command) => ToClientCommand::serialize(command, ser),
        }
    }
}

/// Serializes a command into a frame body.
pub fn serialize_frame<C: Serialize<Input = C>>(command: &C) -> anyhow::Result<Vec<u8>> {
    let mut ser = VecSerializer::new(64);
    C::serialize(command, &mut ser)?;
    Ok(ser.take())
}

/// Deserializes a single command from a complete frame body.
pub fn deserialize_frame<C: Deserialize>(frame: &[u8]) -> DeserializeResult<C::Output> {
    let mut deser = Deserializer::new(frame);
    C::deserialize(&mut deser)
}

#[cfg(test)]
mod tests {
    use dhs_core::DetailLevel;
    use dhs_core::DimensionId;
    use dhs_core::LodChunkKey;
    use dhs_core::SectionPos;

    use super::client_to_server::*;
    use super::server_to_client::*;
    use super::*;
    use crate::codec::Compression;
    use crate::compat::FormatVariant;
    use crate::types::Capabilities;

    fn round_trip_to_server(command: ToServerCommand) -> ToServerCommand {
        let frame = serialize_frame(&command).unwrap();
        assert_eq!(frame.first(), Some(&command.command_id()));
        deserialize_frame::<ToServerCommand>(&frame).unwrap()
    }

    fn round_trip_to_client(command: ToClientCommand) -> ToClientCommand {
        let frame = serialize_frame(&command).unwrap();
        assert_eq!(frame.first(), Some(&command.command_id()));
        deserialize_frame::<ToClientCommand>(&frame).unwrap()
    }

    #[test]
    fn hello_layout() {
        let command: ToServerCommand = HelloSpec {
            min_protocol_version: 8,
            max_protocol_version: 10,
            capabilities: Capabilities::ZSTD | Capabilities::CHUNKED_TRANSFER,
        }
        .into();
        let frame = serialize_frame(&command).unwrap();
        assert_eq!(frame, vec![0x01, 0, 8, 0, 10, 0, 0, 0, 6]);
        assert_eq!(round_trip_to_server(command.clone()), command);
    }

    #[test]
    fn lod_request_with_and_without_timestamp() {
        let section = SectionPos::new(DetailLevel::new(3).unwrap(), 4, -2).unwrap();
        let key = LodChunkKey::new(DimensionId(0), section);
        for client_timestamp in [None, Some(1_700_000_000)] {
            let command: ToServerCommand = LodRequestSpec::new(7, key, client_timestamp).into();
            let decoded = round_trip_to_server(command.clone());
            assert_eq!(decoded, command);
            let ToServerCommand::LodRequest(spec) = decoded else {
                panic!("unexpected command: {decoded:?}");
            };
            assert_eq!(spec.key().unwrap(), key);
        }
    }

    #[test]
    fn server_commands() {
        let commands: Vec<ToClientCommand> = vec![
            WelcomeSpec {
                protocol_version: 10,
                variant: FormatVariant::ForgeByte,
                compression: Compression::Zlib,
                config: RemoteSessionConfig {
                    max_outstanding_requests: 16,
                    min_detail_level: 0,
                    max_detail_level: 10,
                    distant_generation_enabled: true,
                    border: Some(WorldBorder {
                        center_x: 0,
                        center_z: -100,
                        radius: 5000,
                    }),
                },
            }
            .into(),
            LodDataSpec {
                request_id: 1,
                body: LodDataBody::Inline(vec![1, 2, 3]),
            }
            .into(),
            LodDataSpec {
                request_id: 2,
                body: LodDataBody::Buffered(99),
            }
            .into(),
            LodDataChunkSpec {
                buffer_id: 99,
                is_first: true,
                data: vec![0; 300],
            }
            .into(),
            LodUnavailableSpec {
                request_id: 3,
                reason: UnavailableReason::OutsideBorder,
            }
            .into(),
            BackpressureSpec { request_id: 4 }.into(),
            LodUpToDateSpec { request_id: 5 }.into(),
            UnsupportedVersionSpec {
                min_supported: 8,
                max_supported: 10,
            }
            .into(),
            CloseReasonSpec {
                reason: "idle".into(),
            }
            .into(),
        ];
        for command in commands {
            assert_eq!(round_trip_to_client(command.clone()), command);
        }
    }

    #[test]
    fn lod_frames_stay_within_overhead() {
        let data = vec![7; 1000];
        let commands: Vec<ToClientCommand> = vec![
            LodDataSpec {
                request_id: u32::MAX,
                body: LodDataBody::Inline(data.clone()),
            }
            .into(),
            LodDataChunkSpec {
                buffer_id: u32::MAX,
                is_first: false,
                data: data.clone(),
            }
            .into(),
        ];
        for command in commands {
            let frame = serialize_frame(&command).unwrap();
            assert!(frame.len() <= data.len() + LOD_FRAME_OVERHEAD);
        }
    }

    #[test]
    fn rejects_unknown_command_id() {
        assert!(deserialize_frame::<ToServerCommand>(&[0x7F]).is_err());
        // server commands are not accepted in the client direction
        assert!(deserialize_frame::<ToServerCommand>(&[0x85, 0, 0, 0, 1]).is_err());
        assert!(deserialize_frame::<ToServerCommand>(&[]).is_err());
    }
}
