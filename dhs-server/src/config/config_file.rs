//! Parser for `key = value` configuration files with nested `{ }` groups.
//!
//! ```text
//! # comments and blank lines are kept as the prelude of the following item
//! bind = 0.0.0.0:25580
//! motd = """
//! first line
//! second line
//! """
//! worlds = {
//!     world_nether = {
//!         distant_generation_enabled = false
//!     }
//! }
//! ```
//!
//! Values are kept as strings; interpretation is up to the caller.

use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::BufRead;
use std::io::BufReader;
use std::mem;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use anyhow::bail;
use flexstr::SharedStr;

const GROUP_START: &str = "{";
const GROUP_END: &str = "}";
const MULTILINE_TAG: &str = r#"""""#;

#[derive(Debug, Default)]
pub struct ConfigFile {
    path: Option<PathBuf>,
    config: Config,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = fs::File::open(path)?;
        let reader = BufReader::new(reader);

        let mut config_builder = ConfigBuilder::default();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if let Err(err) = config_builder.parse_line(&line) {
                bail!("{}:{}: {err}", path.display(), index + 1);
            }
        }
        let config = config_builder.finish()?;

        Ok(Self {
            path: Some(path.to_owned()),
            config,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config_builder = ConfigBuilder::default();
        for line in text.lines() {
            config_builder.parse_line(line)?;
        }
        Ok(Self {
            path: None,
            config: config_builder.finish()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[derive(Default)]
struct ConfigBuilder {
    config: Config,
    prelude: Vec<String>,
    state: ConfigBuilderState,
    termination_tag: Option<SharedStr>,
}

#[derive(Default)]
enum ConfigBuilderState {
    #[default]
    Default,
    Section {
        key: SharedStr,
        builder: Box<ConfigBuilder>,
    },
    Multiline {
        key: SharedStr,
        multiline: String,
    },
    Complete,
}

impl ConfigBuilder {
    fn new_group(depth: u32) -> Self {
        Self {
            config: Config::new(depth),
            prelude: Vec::new(),
            state: ConfigBuilderState::Default,
            termination_tag: Some(SharedStr::from_borrowed(GROUP_END)),
        }
    }

    /// Returns `true` once this builder's termination tag has been consumed.
    fn parse_line(&mut self, line: &str) -> Result<bool> {
        let trimmed = line.trim();

        self.state = match mem::take(&mut self.state) {
            ConfigBuilderState::Default => {
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    self.prelude.push(line.to_owned());
                    ConfigBuilderState::Default
                } else if self.termination_tag.as_deref() == Some(trimmed) {
                    if !self.prelude.is_empty() {
                        let item = ConfigItem {
                            prelude: mem::take(&mut self.prelude),
                            key_value: None,
                        };
                        self.config.items.push(item);
                    }
                    ConfigBuilderState::Complete
                } else {
                    let Some((key, value)) = trimmed.split_once('=') else {
                        bail!("Invalid config line: {line}");
                    };
                    let key = key.trim();
                    let value = value.trim();
                    if key.is_empty() {
                        bail!("Missing key: {line}");
                    }

                    if value == GROUP_START {
                        ConfigBuilderState::Section {
                            key: key.to_owned().into(),
                            builder: Box::new(Self::new_group(self.config.depth + 1)),
                        }
                    } else if value == MULTILINE_TAG {
                        ConfigBuilderState::Multiline {
                            key: key.to_owned().into(),
                            multiline: String::new(),
                        }
                    } else {
                        self.push_value(
                            key.to_owned().into(),
                            ConfigValue::String(value.to_owned().into()),
                        );
                        ConfigBuilderState::Default
                    }
                }
            }
            ConfigBuilderState::Section { key, mut builder } => {
                if builder.parse_line(line)? {
                    self.push_value(key, ConfigValue::Group(builder.finish()?));
                    ConfigBuilderState::Default
                } else {
                    ConfigBuilderState::Section { key, builder }
                }
            }
            ConfigBuilderState::Multiline { key, mut multiline } => {
                if trimmed == MULTILINE_TAG {
                    self.push_value(key, ConfigValue::String(multiline.into()));
                    ConfigBuilderState::Default
                } else {
                    if !multiline.is_empty() {
                        multiline.push('\n');
                    }
                    multiline.push_str(line);
                    ConfigBuilderState::Multiline { key, multiline }
                }
            }
            ConfigBuilderState::Complete => {
                bail!("Unexpected line after completion");
            }
        };

        Ok(matches!(self.state, ConfigBuilderState::Complete))
    }

    fn push_value(&mut self, key: SharedStr, value: ConfigValue) {
        let item = ConfigItem {
            prelude: mem::take(&mut self.prelude),
            key_value: Some((key, value)),
        };
        self.config.items.push(item);
    }

    fn finish(mut self) -> Result<Config> {
        match self.state {
            ConfigBuilderState::Default => {
                if let Some(tag) = self.termination_tag {
                    bail!("missing termination tag for group: '{tag}'");
                }
                if !self.prelude.is_empty() {
                    let item = ConfigItem {
                        prelude: mem::take(&mut self.prelude),
                        key_value: None,
                    };
                    self.config.items.push(item);
                }
            }
            ConfigBuilderState::Section { key, builder } => {
                bail!(
                    "missing termination tag for group value of `{key}`: '{}'",
                    builder.termination_tag.unwrap_or_default()
                );
            }
            ConfigBuilderState::Multiline { key, .. } => {
                bail!(r#"missing termination tag for multiline value of `{key}`: '"""'"#);
            }
            ConfigBuilderState::Complete => {}
        }

        Ok(self.config)
    }
}

/// A parsed file or group, in file order.
#[derive(Debug, Default)]
pub struct Config {
    items: Vec<ConfigItem>,
    depth: u32,
}

impl Config {
    fn new(depth: u32) -> Self {
        Self {
            items: Vec::new(),
            depth,
        }
    }

    /// Looks up a key. If a key occurs more than once, the last occurrence wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries()
            .filter(|&(item_key, _value)| **item_key == *key)
            .map(|(_key, value)| value)
            .last()
    }

    /// All key/value pairs, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&SharedStr, &ConfigValue)> {
        self.items
            .iter()
            .filter_map(|item| item.key_value.as_ref().map(|(key, value)| (key, value)))
    }
}

impl Display for Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            item.write_indented(formatter, self.depth)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ConfigItem {
    prelude: Vec<String>,
    key_value: Option<(SharedStr, ConfigValue)>,
}

impl ConfigItem {
    fn write_indented(
        &self,
        formatter: &mut fmt::Formatter<'_>,
        depth: u32,
    ) -> fmt::Result {
        for line in &self.prelude {
            writeln!(formatter, "{line}")?;
        }
        let Some((key, value)) = &self.key_value else {
            return Ok(());
        };
        let indent = usize::try_from(depth).unwrap_or_default() * 4;
        write!(formatter, "{:indent$}{key} = ", "")?;
        match value {
            ConfigValue::String(str) if str.contains('\n') => {
                writeln!(formatter, "{MULTILINE_TAG}\n{str}\n{MULTILINE_TAG}")
            }
            ConfigValue::String(str) => writeln!(formatter, "{str}"),
            ConfigValue::Group(group) => {
                writeln!(formatter, "{GROUP_START}")?;
                for item in &group.items {
                    item.write_indented(formatter, group.depth)?;
                }
                writeln!(formatter, "{:indent$}{GROUP_END}", "")
            }
        }
    }
}

#[derive(Debug)]
pub enum ConfigValue {
    String(SharedStr),
    Group(Config),
}

impl ConfigValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(value) => Some(&**value),
            ConfigValue::Group(_) => None,
        }
    }

    #[must_use]
    pub fn as_group(&self) -> Option<&Config> {
        match self {
            ConfigValue::String(_) => None,
            ConfigValue::Group(group) => Some(group),
        }
    }
}
