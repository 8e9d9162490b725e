//! Typed bridge configuration, extracted from a [`ConfigFile`](config_file::ConfigFile).

pub mod config_file;

use std::collections::HashMap;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use config_file::Config;
use config_file::ConfigValue;
use dhs_core::DetailLevel;
use dhs_core::SectionPos;
use dhs_protocol::Compression;
use dhs_protocol::codec::DEFAULT_COMPRESSION_THRESHOLD;
use dhs_protocol::commands::server_to_client::LOD_FRAME_OVERHEAD;
use dhs_protocol::commands::server_to_client::WorldBorder;
use dhs_protocol::compat::McVersion;
use dhs_protocol::compat::Platform;
use dhs_protocol::compat::ServerVersion;
use dhs_protocol::peer::DEFAULT_MAX_FRAME_SIZE;
use flexstr::SharedStr;
use log::warn;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 25580;


#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {value:?} ({reason})")]
    InvalidValue {
        key: SharedStr,
        value: String,
        reason: String,
    },
    #[error("`{0}` must be a plain value")]
    ExpectedValue(SharedStr),
    #[error("`{0}` must be a group")]
    ExpectedGroup(SharedStr),
    #[error("{0}")]
    Inconsistent(String),
}

/// Settings that may differ per world.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSettings {
    pub distant_generation_enabled: bool,
    pub border: Option<WorldBorder>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            distant_generation_enabled: true,
            border: None,
        }
    }
}

impl WorldSettings {
    /// Applies the keys present in `config` on top of `self`.
    fn overridden_by(&self, config: &Config) -> Result<Self, ConfigError> {
        let distant_generation_enabled = parse_or(
            config,
            "distant_generation_enabled",
            self.distant_generation_enabled,
        )?;

        let inherited = self.border.as_ref();
        let radius =
            parse_opt::<u32>(config, "border_radius")?.or(inherited.map(|border| border.radius));
        let border = match radius {
            Some(radius) => Some(WorldBorder {
                center_x: parse_or(
                    config,
                    "border_center_x",
                    inherited.map_or(0, |border| border.center_x),
                )?,
                center_z: parse_or(
                    config,
                    "border_center_z",
                    inherited.map_or(0, |border| border.center_z),
                )?,
                radius,
            }),
            None => None,
        };

        Ok(Self {
            distant_generation_enabled,
            border,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub bind: SocketAddr,
    pub server_version: ServerVersion,
    /// upper bound of in-flight requests per session
    pub max_outstanding_requests: u16,
    pub idle_timeout: Duration,
    pub scheduler_threads: usize,
    pub region_owners: usize,
    pub region_shift: u8,
    pub auto_assign_regions: bool,
    pub scheduler_queue_capacity: usize,
    /// in order of preference; `None` is always acceptable and needn't be listed
    pub compression: Vec<Compression>,
    pub compression_threshold: usize,
    /// payloads larger than this are sent as chunks to clients that support it
    pub chunk_size: usize,
    pub min_detail_level: DetailLevel,
    pub max_detail_level: DetailLevel,
    pub max_frame_size: usize,
    pub frame_verbosity: u8,
    /// sections kept in memory after they've been built, 0 disables the cache
    pub lod_cache_capacity: usize,
    /// applies to all worlds without an entry in `worlds`
    pub world_defaults: WorldSettings,
    pub worlds: HashMap<SharedStr, WorldSettings>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            server_version: ServerVersion::new(Platform::Paper, McVersion::new(1, 21, 1)),
            max_outstanding_requests: 16,
            idle_timeout: Duration::from_secs(300),
            scheduler_threads: 4,
            region_owners: 4,
            region_shift: 3,
            auto_assign_regions: true,
            scheduler_queue_capacity: 256,
            compression: vec![Compression::Zstd, Compression::Zlib, Compression::None],
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            chunk_size: 16 * 1024,
            min_detail_level: DetailLevel::MIN,
            max_detail_level: DetailLevel::MAX,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            frame_verbosity: 0,
            lod_cache_capacity: 256,
            world_defaults: WorldSettings::default(),
            worlds: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Reads all known keys from `config`, falling back to the defaults for missing ones.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let platform = parse_or(config, "platform", defaults.server_version.platform)?;
        let minecraft = parse_or(
            config,
            "minecraft_version",
            defaults.server_version.minecraft,
        )?;

        let compression = match string(config, "compression")? {
            Some(list) => parse_compression_list(list)?,
            None => defaults.compression,
        };

        let world_defaults = defaults.world_defaults.overridden_by(config)?;
        let mut worlds = HashMap::new();
        if let Some(value) = config.get("worlds") {
            let Some(group) = value.as_group() else {
                return Err(ConfigError::ExpectedGroup(SharedStr::from_borrowed("worlds")));
            };
            for (name, value) in group.entries() {
                let Some(world) = value.as_group() else {
                    return Err(ConfigError::ExpectedGroup(name.clone()));
                };
                worlds.insert(name.clone(), world_defaults.overridden_by(world)?);
            }
        }

        let result = Self {
            bind: parse_or(config, "bind", defaults.bind)?,
            server_version: ServerVersion::new(platform, minecraft),
            max_outstanding_requests: parse_or(
                config,
                "max_outstanding_requests",
                defaults.max_outstanding_requests,
            )?,
            idle_timeout: Duration::from_secs(parse_or(
                config,
                "idle_timeout_secs",
                defaults.idle_timeout.as_secs(),
            )?),
            scheduler_threads: parse_or(config, "scheduler_threads", defaults.scheduler_threads)?,
            region_owners: parse_or(config, "region_owners", defaults.region_owners)?,
            region_shift: parse_or(config, "region_shift", defaults.region_shift)?,
            auto_assign_regions: parse_or(
                config,
                "auto_assign_regions",
                defaults.auto_assign_regions,
            )?,
            scheduler_queue_capacity: parse_or(
                config,
                "scheduler_queue_capacity",
                defaults.scheduler_queue_capacity,
            )?,
            compression,
            compression_threshold: parse_or(
                config,
                "compression_threshold",
                defaults.compression_threshold,
            )?,
            chunk_size: parse_or(config, "chunk_size", defaults.chunk_size)?,
            min_detail_level: parse_detail(config, "min_detail_level", defaults.min_detail_level)?,
            max_detail_level: parse_detail(config, "max_detail_level", defaults.max_detail_level)?,
            max_frame_size: parse_or(config, "max_frame_size", defaults.max_frame_size)?,
            frame_verbosity: parse_or(config, "frame_verbosity", defaults.frame_verbosity)?,
            lod_cache_capacity: parse_or(
                config,
                "lod_cache_capacity",
                defaults.lod_cache_capacity,
            )?,
            world_defaults,
            worlds,
        };
        result.validate()?;
        Ok(result)
    }

    /// Checks that the settings are consistent with each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_outstanding_requests", usize::from(self.max_outstanding_requests)),
            ("scheduler_threads", self.scheduler_threads),
            ("region_owners", self.region_owners),
            ("scheduler_queue_capacity", self.scheduler_queue_capacity),
            ("chunk_size", self.chunk_size),
        ];
        if let Some((key, _value)) = positive.iter().find(|(_key, value)| *value == 0) {
            return Err(ConfigError::Inconsistent(format!("`{key}` must not be 0")));
        }
        if self.min_detail_level > self.max_detail_level {
            return Err(ConfigError::Inconsistent(format!(
                "min_detail_level ({}) exceeds max_detail_level ({})",
                self.min_detail_level.value(),
                self.max_detail_level.value()
            )));
        }
        if self.chunk_size + LOD_FRAME_OVERHEAD > self.max_frame_size {
            return Err(ConfigError::Inconsistent(format!(
                "chunk_size ({}) does not fit into max_frame_size ({})",
                self.chunk_size, self.max_frame_size
            )));
        }
        if u32::from(self.region_shift) > SectionPos::COORD_BITS {
            return Err(ConfigError::Inconsistent(format!(
                "region_shift ({}) is too large",
                self.region_shift
            )));
        }
        Ok(())
    }

    /// The settings of the world with the given name.
    #[must_use]
    pub fn world_settings(&self, name: &str) -> &WorldSettings {
        self.worlds.get(name).unwrap_or(&self.world_defaults)
    }
}

fn string<'config>(
    config: &'config Config,
    key: &'static str,
) -> Result<Option<&'config str>, ConfigError> {
    match config.get(key) {
        None => Ok(None),
        Some(ConfigValue::String(value)) => Ok(Some(&**value)),
        Some(ConfigValue::Group(_)) => {
            Err(ConfigError::ExpectedValue(SharedStr::from_borrowed(key)))
        }
    }
}

fn parse_opt<T>(config: &Config, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = string(config, key)? else {
        return Ok(None);
    };
    match value.parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => Err(ConfigError::InvalidValue {
            key: SharedStr::from_borrowed(key),
            value: value.to_owned(),
            reason: err.to_string(),
        }),
    }
}

fn parse_or<T>(config: &Config, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(config, key)?.unwrap_or(default))
}

fn parse_detail(
    config: &Config,
    key: &'static str,
    default: DetailLevel,
) -> Result<DetailLevel, ConfigError> {
    let value: u8 = parse_or(config, key, default.value())?;
    DetailLevel::new(value).map_err(|err| ConfigError::InvalidValue {
        key: SharedStr::from_borrowed(key),
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn parse_compression_list(list: &str) -> Result<Vec<Compression>, ConfigError> {
    let mut result = Vec::new();
    for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let compression: Compression =
            name.parse().map_err(|reason| ConfigError::InvalidValue {
                key: SharedStr::from_borrowed("compression"),
                value: list.to_owned(),
                reason,
            })?;
        if !compression.is_available() {
            warn!("compression {compression} is not available in this build; ignoring it");
        } else if !result.contains(&compression) {
            result.push(compression);
        }
    }
    Ok(result)
}
