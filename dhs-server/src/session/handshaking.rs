use std::ops::RangeInclusive;

use anyhow::Result;
use dhs_protocol::Compression;
use dhs_protocol::DhsConnection;
use dhs_protocol::FormatVariant;
use dhs_protocol::commands::CommandProperties;
use dhs_protocol::commands::client_to_server::HelloSpec;
use dhs_protocol::commands::client_to_server::ToServerCommand;
use dhs_protocol::commands::server_to_client::CloseReasonSpec;
use dhs_protocol::commands::server_to_client::RemoteSessionConfig;
use dhs_protocol::commands::server_to_client::UnsupportedVersionSpec;
use dhs_protocol::commands::server_to_client::WelcomeSpec;
use dhs_protocol::compat::CompatibilityTable;
use dhs_protocol::compat::SUPPORTED_PROTOCOL_VERSIONS;
use dhs_protocol::types::Capabilities;
use log::debug;
use log::info;
use log::warn;

use super::SessionContext;
use crate::config::BridgeConfig;

/// Everything fixed for the lifetime of a session once the handshake succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub(crate) protocol_version: u16,
    pub(crate) variant: FormatVariant,
    pub(crate) compression: Compression,
    pub(crate) capabilities: Capabilities,
}

pub(super) enum Handshake {
    /// still waiting for `Hello`
    Pending,
    Negotiated(Negotiated),
    /// the client has been told why; the session ends
    Rejected,
}

/// The state right after connecting. Waits for the client's `Hello`.
pub(super) struct HandshakingState;

impl HandshakingState {
    pub(super) async fn handle_message(
        message: ToServerCommand,
        connection: &DhsConnection,
        context: &SessionContext,
    ) -> Result<Handshake> {
        let id = connection.id();
        let hello = match message {
            ToServerCommand::Hello(hello) => hello,
            unexpected => {
                warn!(
                    "[P{id}] handshaking: ignoring unexpected client message: {message_name}",
                    message_name = unexpected.command_name()
                );
                return Ok(Handshake::Pending);
            }
        };

        debug!(
            "[P{id}] client protocol versions: {}..={}, capabilities: {:?}",
            hello.min_protocol_version, hello.max_protocol_version, hello.capabilities
        );

        match negotiate(&hello, &context.config, &context.compat) {
            Ok(negotiated) => {
                info!(
                    "[P{id}] negotiated protocol {} ({:?}, {}) for {}",
                    negotiated.protocol_version,
                    negotiated.variant,
                    negotiated.compression,
                    context.config.server_version
                );
                connection
                    .send(
                        WelcomeSpec {
                            protocol_version: negotiated.protocol_version,
                            variant: negotiated.variant,
                            compression: negotiated.compression,
                            config: remote_config(&context.config),
                        }
                        .into(),
                    )
                    .await?;
                Ok(Handshake::Negotiated(negotiated))
            }
            Err(supported) => {
                info!(
                    "[P{id}] no common protocol: client speaks {}..={}, {} supports {}..={}",
                    hello.min_protocol_version,
                    hello.max_protocol_version,
                    context.config.server_version,
                    supported.start(),
                    supported.end()
                );
                connection
                    .send(
                        UnsupportedVersionSpec {
                            min_supported: *supported.start(),
                            max_supported: *supported.end(),
                        }
                        .into(),
                    )
                    .await?;
                connection
                    .send(
                        CloseReasonSpec {
                            reason: "unsupported protocol version".to_owned(),
                        }
                        .into(),
                    )
                    .await?;
                Ok(Handshake::Rejected)
            }
        }
    }
}

/// Picks the highest protocol version both sides speak and the table resolves for this server.
///
/// On failure, returns the protocol range this server could have offered.
pub(crate) fn negotiate(
    hello: &HelloSpec,
    config: &BridgeConfig,
    table: &CompatibilityTable,
) -> Result<Negotiated, RangeInclusive<u16>> {
    let server = &config.server_version;
    let offered = table
        .protocol_range(server)
        .map(|range| {
            (*range.start()).max(*SUPPORTED_PROTOCOL_VERSIONS.start())
                ..=(*range.end()).min(*SUPPORTED_PROTOCOL_VERSIONS.end())
        })
        .filter(|range| !range.is_empty())
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS);

    // intersect version ranges
    let min_version = (*SUPPORTED_PROTOCOL_VERSIONS.start()).max(hello.min_protocol_version);
    let max_version = (*SUPPORTED_PROTOCOL_VERSIONS.end()).min(hello.max_protocol_version);

    let (protocol_version, variant) = (min_version..=max_version)
        .rev()
        .find_map(|version| {
            table
                .resolve(server, version)
                .ok()
                .map(|variant| (version, variant))
        })
        .ok_or(offered)?;

    let compression = config
        .compression
        .iter()
        .copied()
        .find(|compression| {
            compression.is_available() && hello.capabilities.supports(*compression)
        })
        .unwrap_or(Compression::None);

    Ok(Negotiated {
        protocol_version,
        variant,
        compression,
        capabilities: hello.capabilities,
    })
}

fn remote_config(config: &BridgeConfig) -> RemoteSessionConfig {
    RemoteSessionConfig {
        max_outstanding_requests: config.max_outstanding_requests,
        min_detail_level: config.min_detail_level.value(),
        max_detail_level: config.max_detail_level.value(),
        distant_generation_enabled: config.world_defaults.distant_generation_enabled,
        border: config.world_defaults.border.clone(),
    }
}

#[cfg(test)]
mod tests {
    use dhs_protocol::compat::CompatEntry;
    use dhs_protocol::compat::McVersion;
    use dhs_protocol::compat::Platform;
    use dhs_protocol::compat::ServerVersion;

    use super::*;

    fn hello(range: RangeInclusive<u16>, capabilities: Capabilities) -> HelloSpec {
        HelloSpec {
            min_protocol_version: *range.start(),
            max_protocol_version: *range.end(),
            capabilities,
        }
    }

    fn config_for(platform: Platform, minecraft: McVersion) -> BridgeConfig {
        BridgeConfig {
            server_version: ServerVersion::new(platform, minecraft),
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn highest_common_version_wins() {
        let config = config_for(Platform::Paper, McVersion::new(1, 21, 1));
        let table = CompatibilityTable::default();
        let negotiated = negotiate(&hello(1..=99, Capabilities::ZLIB), &config, &table).unwrap();
        assert_eq!(negotiated.protocol_version, 10);
        assert_eq!(negotiated.variant, FormatVariant::Standard);
        assert_eq!(negotiated.compression, Compression::Zlib);

        let negotiated = negotiate(&hello(8..=9, Capabilities::NONE), &config, &table).unwrap();
        assert_eq!(negotiated.protocol_version, 9);
        assert_eq!(negotiated.compression, Compression::None);
    }

    #[test]
    fn walks_down_to_a_resolvable_version() {
        // 1.17 servers stop at protocol 9
        let config = config_for(Platform::Spigot, McVersion::new(1, 17, 1));
        let table = CompatibilityTable::default();
        let negotiated = negotiate(&hello(8..=10, Capabilities::ZSTD), &config, &table).unwrap();
        assert_eq!(negotiated.protocol_version, 9);

        let config = config_for(Platform::ForgeHybrid, McVersion::new(1, 19, 2));
        let negotiated = negotiate(&hello(8..=10, Capabilities::ZSTD), &config, &table).unwrap();
        assert_eq!(negotiated.variant, FormatVariant::ForgeByte);
    }

    #[test]
    fn unsupported_combinations() {
        let config = config_for(Platform::ForgeHybrid, McVersion::new(1, 20, 6));
        let table = CompatibilityTable::default();
        assert_eq!(
            negotiate(&hello(8..=8, Capabilities::NONE), &config, &table),
            Err(9..=10)
        );
        assert_eq!(
            negotiate(&hello(11..=12, Capabilities::NONE), &config, &table),
            Err(9..=10)
        );
        // an empty client range
        assert!(negotiate(&hello(10..=9, Capabilities::NONE), &config, &table).is_err());
    }

    #[test]
    fn appended_rows_extend_support() {
        let config = config_for(Platform::Paper, McVersion::new(1, 16, 5));
        let table = CompatibilityTable::default().with_entry(CompatEntry {
            platform: Platform::Paper,
            minecraft_from: None,
            minecraft_until: None,
            protocols: 10..=10,
            variant: FormatVariant::ForgeByte,
        });
        let negotiated = negotiate(&hello(8..=10, Capabilities::NONE), &config, &table).unwrap();
        assert_eq!(negotiated.protocol_version, 10);
        assert_eq!(negotiated.variant, FormatVariant::ForgeByte);
    }
}
