//! Gamedata offset table
//!
//! Virtual function offsets differ between game builds and platforms, so they
//! are loaded from a gamedata file deployed next to the plugin instead of being
//! compiled in. Updating an offset never requires a rebuild.
//!
//! Offsets are vtable slot indices, keyed by game, symbol and platform.
//! Every value is validated when the file is loaded; a table that loaded
//! successfully only ever hands out offsets that were explicitly configured.

pub mod keyvalues;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use keyvalues::KvPair;

/// Game section whose entries apply to every game
pub const DEFAULT_GAME: &str = "#default";

/// Errors that can occur when loading or querying gamedata
#[derive(Debug, Error)]
pub enum GamedataError {
    #[error("Gamedata file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read gamedata file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse gamedata JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gamedata parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid gamedata entry: {0}")]
    InvalidEntry(String),

    #[error("No offset for '{symbol}' (game '{game}', platform {platform})")]
    UnknownSymbol {
        game: String,
        symbol: String,
        platform: Platform,
    },
}

impl GamedataError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        GamedataError::Parse {
            line,
            message: message.into(),
        }
    }
}

/// Target platform of the game binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Linux,
    Mac,
}

impl Platform {
    /// Platform this crate was compiled for
    ///
    /// Returns `None` on platforms Source servers don't ship for.
    pub const fn current() -> Option<Platform> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Platform::Mac)
        } else {
            None
        }
    }

    /// Key used for this platform in gamedata files
    pub const fn key(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
        }
    }

    fn from_key(key: &str) -> Option<Platform> {
        match key.to_ascii_lowercase().as_str() {
            "windows" => Some(Platform::Windows),
            "linux" => Some(Platform::Linux),
            "mac" => Some(Platform::Mac),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single resolved offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetEntry {
    pub game_id: String,
    pub symbol: String,
    pub platform: Platform,
    pub offset: u32,
}

/// On-disk encoding of a gamedata file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamedataFormat {
    KeyValues,
    Json,
}

impl GamedataFormat {
    /// Pick the format from a file extension, defaulting to KeyValues
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => GamedataFormat::Json,
            _ => GamedataFormat::KeyValues,
        }
    }
}

/// Immutable table of vtable offsets
#[derive(Debug, Default, Clone)]
pub struct OffsetTable {
    offsets: HashMap<(String, String, Platform), u32>,
}

impl OffsetTable {
    /// Load an offset table from a gamedata file
    ///
    /// A missing file is reported as [`GamedataError::Missing`] so callers can
    /// disable the feature instead of hooking with bogus offsets.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GamedataError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GamedataError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let table = Self::load_from_str(&content, GamedataFormat::from_path(path))?;
        tracing::info!(
            "Loaded gamedata from {}: {} offsets",
            path.display(),
            table.len()
        );
        Ok(table)
    }

    /// Parse an offset table from a string
    pub fn load_from_str(content: &str, format: GamedataFormat) -> Result<Self, GamedataError> {
        let root = match format {
            GamedataFormat::KeyValues => keyvalues::parse(content)?,
            GamedataFormat::Json => {
                let value: serde_json::Value = serde_json::from_str(content)?;
                keyvalues::from_json(&value)?
            }
        };

        let mut table = OffsetTable::default();

        for games in root.iter().filter(|p| p.key.eq_ignore_ascii_case("Games")) {
            let Some(games) = games.section() else {
                continue;
            };
            for game in games {
                let Some(sections) = game.section() else {
                    continue;
                };
                for offsets in sections
                    .iter()
                    .filter(|p| p.key.eq_ignore_ascii_case("Offsets"))
                {
                    for symbol in offsets.section().unwrap_or_default() {
                        table.insert_symbol(&game.key, symbol)?;
                    }
                }
            }
        }

        Ok(table)
    }

    fn insert_symbol(&mut self, game: &str, symbol: &KvPair) -> Result<(), GamedataError> {
        let Some(platforms) = symbol.section() else {
            // A bare value has no platform to key it by
            tracing::debug!("Ignoring offset '{}' without platform keys", symbol.key);
            return Ok(());
        };

        for entry in platforms {
            let Some(platform) = Platform::from_key(&entry.key) else {
                continue;
            };

            let raw = entry.as_str().ok_or_else(|| {
                invalid(entry, format!("'{}' for '{}' must be a value", platform, symbol.key))
            })?;
            let offset = parse_offset(raw).ok_or_else(|| {
                invalid(
                    entry,
                    format!(
                        "offset '{}' for '{}' ({}) is not a non-negative integer",
                        raw, symbol.key, platform
                    ),
                )
            })?;

            self.offsets
                .insert((game.to_string(), symbol.key.clone(), platform), offset);
        }

        Ok(())
    }

    /// Look up the offset for a symbol
    ///
    /// Falls back to the `#default` game section when the game itself has no
    /// entry for this symbol and platform.
    pub fn lookup(&self, game_id: &str, symbol: &str, platform: Platform) -> Result<u32, GamedataError> {
        let key = (game_id.to_string(), symbol.to_string(), platform);
        if let Some(offset) = self.offsets.get(&key) {
            return Ok(*offset);
        }

        let default_key = (DEFAULT_GAME.to_string(), symbol.to_string(), platform);
        self.offsets
            .get(&default_key)
            .copied()
            .ok_or_else(|| GamedataError::UnknownSymbol {
                game: game_id.to_string(),
                symbol: symbol.to_string(),
                platform,
            })
    }

    /// All entries, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = OffsetEntry> + '_ {
        self.offsets
            .iter()
            .map(|((game_id, symbol, platform), offset)| OffsetEntry {
                game_id: game_id.clone(),
                symbol: symbol.clone(),
                platform: *platform,
                offset: *offset,
            })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn invalid(entry: &KvPair, message: String) -> GamedataError {
    match entry.line {
        Some(line) => GamedataError::parse(line, message),
        None => GamedataError::InvalidEntry(message),
    }
}

/// Parse a decimal or `0x`-prefixed hex offset
fn parse_offset(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GAMEDATA: &str = r##"
        "Games"
        {
            "#default"
            {
                "Offsets"
                {
                    "Spawn"
                    {
                        "windows"   "22"
                        "linux"     "23"
                    }
                }
            }
            "csgo"
            {
                "Signatures"
                {
                    "Unrelated" { "library" "server" }
                }
                "Offsets"
                {
                    "OnDamagedByExplosion"
                    {
                        "windows"   "335"
                        "linux"     "336"
                        "linux64"   "999"
                    }
                    "Spawn"
                    {
                        "linux"     "0x19"
                    }
                }
            }
        }
    "##;

    #[test]
    fn test_lookup_configured_offsets() {
        let table = OffsetTable::load_from_str(GAMEDATA, GamedataFormat::KeyValues).unwrap();
        assert_eq!(
            table
                .lookup("csgo", "OnDamagedByExplosion", Platform::Windows)
                .unwrap(),
            335
        );
        assert_eq!(
            table
                .lookup("csgo", "OnDamagedByExplosion", Platform::Linux)
                .unwrap(),
            336
        );
    }

    #[test]
    fn test_missing_platform_is_unknown_symbol() {
        let table = OffsetTable::load_from_str(GAMEDATA, GamedataFormat::KeyValues).unwrap();
        let err = table
            .lookup("csgo", "OnDamagedByExplosion", Platform::Mac)
            .unwrap_err();
        assert!(matches!(err, GamedataError::UnknownSymbol { .. }));
        assert!(table.lookup("tf", "OnDamagedByExplosion", Platform::Linux).is_err());
    }

    #[test]
    fn test_default_section_fallback() {
        let table = OffsetTable::load_from_str(GAMEDATA, GamedataFormat::KeyValues).unwrap();
        // Game-specific entry wins
        assert_eq!(table.lookup("csgo", "Spawn", Platform::Linux).unwrap(), 0x19);
        // Falls back to #default
        assert_eq!(table.lookup("csgo", "Spawn", Platform::Windows).unwrap(), 22);
        assert_eq!(table.lookup("tf", "Spawn", Platform::Linux).unwrap(), 23);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let table = OffsetTable::load_from_str(GAMEDATA, GamedataFormat::KeyValues).unwrap();
        // "linux64" and the Signatures section don't produce entries
        assert_eq!(table.len(), 5);
        assert!(table.entries().all(|e| e.offset != 999));
    }

    #[test]
    fn test_json_scenario() {
        let json = r#"{"Games": {"gameA": {"Offsets": {"Func1": {"linux": 100}}}}}"#;
        let table = OffsetTable::load_from_str(json, GamedataFormat::Json).unwrap();
        assert_eq!(table.lookup("gameA", "Func1", Platform::Linux).unwrap(), 100);
        assert!(matches!(
            table.lookup("gameA", "Func1", Platform::Mac),
            Err(GamedataError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_json_with_list_sections_loads() {
        let json = r#"{
            "Games": {
                "csgo": {
                    "Addresses": {
                        "GameRules": {
                            "signature": "GameRulesPtr",
                            "read": [4, 8]
                        }
                    },
                    "Offsets": {
                        "OnDamagedByExplosion": {"windows": 335, "linux": 336}
                    }
                }
            }
        }"#;
        let table = OffsetTable::load_from_str(json, GamedataFormat::Json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup("csgo", "OnDamagedByExplosion", Platform::Linux).unwrap(),
            336
        );
    }

    #[test]
    fn test_json_list_as_offset_rejected() {
        let json = r#"{"Games": {"csgo": {"Offsets": {"Func1": {"linux": [336]}}}}}"#;
        assert!(matches!(
            OffsetTable::load_from_str(json, GamedataFormat::Json),
            Err(GamedataError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_negative_offset_rejected() {
        let doc = "\"Games\" { \"csgo\" { \"Offsets\" { \"Func\" {\n\"linux\" \"-4\" } } } }";
        let err = OffsetTable::load_from_str(doc, GamedataFormat::KeyValues).unwrap_err();
        assert!(matches!(err, GamedataError::Parse { line: 2, .. }));

        let json = r#"{"Games": {"gameA": {"Offsets": {"Func1": {"linux": 1.5}}}}}"#;
        assert!(matches!(
            OffsetTable::load_from_str(json, GamedataFormat::Json),
            Err(GamedataError::InvalidEntry(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.games.txt");
        assert!(matches!(
            OffsetTable::load(&path),
            Err(GamedataError::Missing(p)) if p == path
        ));
    }

    #[test]
    fn test_load_from_file_picks_format() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"Games": {{"gameA": {{"Offsets": {{"Func1": {{"windows": "7"}}}}}}}}}}"#
        )
        .unwrap();

        let table = OffsetTable::load(file.path()).unwrap();
        assert_eq!(table.lookup("gameA", "Func1", Platform::Windows).unwrap(), 7);
    }
}
