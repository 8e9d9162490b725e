//! Maps a server platform, its Minecraft release and a client protocol version to the payload
//! format variant both sides have to use.

use std::fmt::{self, Display};
use std::ops::RangeInclusive;
use std::str::FromStr;

use thiserror::Error;

/// The server software family the bridge is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Spigot,
    Paper,
    Folia,
    /// Forge servers that also load Bukkit plugins
    ForgeHybrid,
}

/// How the host schedules work that touches world data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingModel {
    /// Any worker may read any region.
    Pooled,
    /// Each region is owned by exactly one thread at a time.
    Regionized,
}

impl Platform {
    #[must_use]
    pub const fn threading_model(self) -> ThreadingModel {
        match self {
            Self::Folia => ThreadingModel::Regionized,
            Self::Spigot | Self::Paper | Self::ForgeHybrid => ThreadingModel::Pooled,
        }
    }
}

impl Display for Platform {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Spigot => "spigot",
            Self::Paper => "paper",
            Self::Folia => "folia",
            Self::ForgeHybrid => "forge-hybrid",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("invalid Minecraft version: {0}")]
    InvalidMinecraftVersion(String),
}

impl FromStr for Platform {
    type Err = VersionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spigot" | "bukkit" => Ok(Self::Spigot),
            "paper" => Ok(Self::Paper),
            "folia" => Ok(Self::Folia),
            "forge" | "forge-hybrid" | "forgehybrid" => Ok(Self::ForgeHybrid),
            _ => Err(VersionParseError::UnknownPlatform(value.to_owned())),
        }
    }
}

/// A Minecraft release like `1.20.6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct McVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl McVersion {
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for McVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for McVersion {
    type Err = VersionParseError;

    /// Accepts `major.minor` and `major.minor.patch`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError::InvalidMinecraftVersion(value.to_owned());
        let mut parts = value.trim().split('.');
        let mut next = |required: bool| -> Result<u16, VersionParseError> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_err| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(true)?, next(false)?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// Platform and Minecraft release of the running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerVersion {
    pub platform: Platform,
    pub minecraft: McVersion,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(platform: Platform, minecraft: McVersion) -> Self {
        Self {
            platform,
            minecraft,
        }
    }
}

impl Display for ServerVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.platform, self.minecraft)
    }
}

/// Payload layouts known to the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVariant {
    /// Format version tag written as `u16`.
    Standard,
    /// Format version tag written as a single byte, as Forge hybrids read it.
    ForgeByte,
}

impl FormatVariant {
    #[must_use]
    pub const fn wire_id(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::ForgeByte => 1,
        }
    }

    #[must_use]
    pub const fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Standard),
            1 => Some(Self::ForgeByte),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no payload format for protocol version {protocol} on {server}")]
pub struct UnsupportedCombination {
    pub server: ServerVersion,
    pub protocol: u16,
}

/// One row of the compatibility table.
///
/// `minecraft_from` is inclusive, `minecraft_until` exclusive. `None` leaves that side open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatEntry {
    pub platform: Platform,
    pub minecraft_from: Option<McVersion>,
    pub minecraft_until: Option<McVersion>,
    pub protocols: RangeInclusive<u16>,
    pub variant: FormatVariant,
}

impl CompatEntry {
    fn matches_server(&self, server: &ServerVersion) -> bool {
        self.platform == server.platform
            && self
                .minecraft_from
                .is_none_or(|from| server.minecraft >= from)
            && self
                .minecraft_until
                .is_none_or(|until| server.minecraft < until)
    }

    fn matches(&self, server: &ServerVersion, protocol: u16) -> bool {
        self.matches_server(server) && self.protocols.contains(&protocol)
    }
}

/// Lowest and highest protocol version of the default table.
pub const SUPPORTED_PROTOCOL_VERSIONS: RangeInclusive<u16> = 8..=10;

const MC_1_16_5: McVersion = McVersion::new(1, 16, 5);
const MC_1_18: McVersion = McVersion::new(1, 18, 0);
const MC_1_20_6: McVersion = McVersion::new(1, 20, 6);

const fn row(
    platform: Platform,
    minecraft_from: Option<McVersion>,
    minecraft_until: Option<McVersion>,
    protocols: RangeInclusive<u16>,
    variant: FormatVariant,
) -> CompatEntry {
    CompatEntry {
        platform,
        minecraft_from,
        minecraft_until,
        protocols,
        variant,
    }
}

const DEFAULT_ENTRIES: [CompatEntry; 8] = [
    row(Platform::Spigot, Some(MC_1_16_5), Some(MC_1_18), 8..=9, FormatVariant::Standard),
    row(Platform::Paper, Some(MC_1_16_5), Some(MC_1_18), 8..=9, FormatVariant::Standard),
    row(Platform::Folia, Some(MC_1_16_5), Some(MC_1_18), 8..=9, FormatVariant::Standard),
    row(Platform::Spigot, Some(MC_1_18), None, 8..=10, FormatVariant::Standard),
    row(Platform::Paper, Some(MC_1_18), None, 8..=10, FormatVariant::Standard),
    row(Platform::Folia, Some(MC_1_18), None, 8..=10, FormatVariant::Standard),
    row(Platform::ForgeHybrid, None, Some(MC_1_20_6), 8..=10, FormatVariant::ForgeByte),
    row(Platform::ForgeHybrid, Some(MC_1_20_6), None, 9..=10, FormatVariant::Standard),
];

/// Resolves which payload format a client may receive.
///
/// Later rows take precedence over earlier ones, so appended rows can override the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityTable {
    entries: Vec<CompatEntry>,
}

impl Default for CompatibilityTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ENTRIES.to_vec(),
        }
    }
}

impl CompatibilityTable {
    /// A table without any rows. Every lookup fails.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_entry(mut self, entry: CompatEntry) -> Self {
        self.entries.push(entry);
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[CompatEntry] {
        &self.entries
    }

    /// Returns the format variant for the given server and client protocol version.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedCombination`] if no row covers the combination.
    pub fn resolve(
        &self,
        server: &ServerVersion,
        protocol: u16,
    ) -> Result<FormatVariant, UnsupportedCombination> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.matches(server, protocol))
            .map(|entry| entry.variant)
            .ok_or(UnsupportedCombination {
                server: *server,
                protocol,
            })
    }

    /// Protocol versions the rows for the given server span, if any row applies at all.
    #[must_use]
    pub fn protocol_range(&self, server: &ServerVersion) -> Option<RangeInclusive<u16>> {
        self.entries
            .iter()
            .filter(|entry| entry.matches_server(server))
            .map(|entry| entry.protocols.clone())
            .reduce(|left, right| {
                (*left.start()).min(*right.start())..=(*left.end()).max(*right.end())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(platform: Platform, minecraft: &str) -> ServerVersion {
        ServerVersion::new(platform, minecraft.parse().unwrap())
    }

    #[test]
    fn parse_versions() {
        assert_eq!("1.20.6".parse::<McVersion>(), Ok(McVersion::new(1, 20, 6)));
        assert_eq!("1.18".parse::<McVersion>(), Ok(McVersion::new(1, 18, 0)));
        assert!("1".parse::<McVersion>().is_err());
        assert!("1.20.6.1".parse::<McVersion>().is_err());
        assert!("1.x".parse::<McVersion>().is_err());
        assert_eq!("Folia".parse::<Platform>(), Ok(Platform::Folia));
        assert!("sponge".parse::<Platform>().is_err());
    }

    #[test]
    fn default_table() {
        let table = CompatibilityTable::default();
        let paper_old = server(Platform::Paper, "1.17.1");
        assert_eq!(table.resolve(&paper_old, 9), Ok(FormatVariant::Standard));
        assert!(table.resolve(&paper_old, 10).is_err());

        let paper_new = server(Platform::Paper, "1.21");
        assert_eq!(table.resolve(&paper_new, 10), Ok(FormatVariant::Standard));
        assert!(table.resolve(&paper_new, 7).is_err());

        let forge_old = server(Platform::ForgeHybrid, "1.20.4");
        assert_eq!(table.resolve(&forge_old, 8), Ok(FormatVariant::ForgeByte));

        let forge_new = server(Platform::ForgeHybrid, "1.20.6");
        assert_eq!(table.resolve(&forge_new, 10), Ok(FormatVariant::Standard));
        assert_eq!(
            table.resolve(&forge_new, 8),
            Err(UnsupportedCombination {
                server: forge_new,
                protocol: 8
            })
        );

        let too_old = server(Platform::Spigot, "1.16.4");
        assert!(table.resolve(&too_old, 8).is_err());
    }

    #[test]
    fn appended_rows_take_precedence() {
        let forge = server(Platform::ForgeHybrid, "1.19.2");
        let table = CompatibilityTable::default().with_entry(CompatEntry {
            platform: Platform::ForgeHybrid,
            minecraft_from: Some(McVersion::new(1, 19, 0)),
            minecraft_until: Some(McVersion::new(1, 20, 0)),
            protocols: 10..=11,
            variant: FormatVariant::Standard,
        });
        assert_eq!(table.resolve(&forge, 10), Ok(FormatVariant::Standard));
        assert_eq!(table.resolve(&forge, 11), Ok(FormatVariant::Standard));
        assert_eq!(table.resolve(&forge, 9), Ok(FormatVariant::ForgeByte));
    }

    #[test]
    fn protocol_ranges() {
        let table = CompatibilityTable::default();
        assert_eq!(
            table.protocol_range(&server(Platform::Spigot, "1.17")),
            Some(8..=9)
        );
        assert_eq!(
            table.protocol_range(&server(Platform::Folia, "1.20.1")),
            Some(SUPPORTED_PROTOCOL_VERSIONS)
        );
        assert_eq!(
            CompatibilityTable::empty().protocol_range(&server(Platform::Paper, "1.20")),
            None
        );
    }

    #[test]
    fn threading_models() {
        assert_eq!(Platform::Folia.threading_model(), ThreadingModel::Regionized);
        assert_eq!(Platform::Paper.threading_model(), ThreadingModel::Pooled);
        assert_eq!(Platform::ForgeHybrid.threading_model(), ThreadingModel::Pooled);
    }
}
