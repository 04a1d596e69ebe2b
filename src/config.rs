use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub opds: OpdsConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where sessions and remembered clients are persisted. Empty
    /// disables persistence.
    #[serde(default)]
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Master switch for HTTP Basic authentication.
    #[serde(default)]
    pub use_http_auth: bool,
    /// Remember clients by fingerprint after a successful login.
    #[serde(default = "default_true")]
    pub remember_clients: bool,
    /// Serve 403 to addresses that keep failing authentication.
    #[serde(default)]
    pub ban_clients: bool,
    /// Failed attempts before an address is banned.
    #[serde(default = "default_wrong_attempts")]
    pub wrong_attempts_count: u32,
    /// `user:password` pairs, compared case-sensitively.
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Comma-joined fingerprints seeded into the remember-me list.
    #[serde(default)]
    pub authorized_clients: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpdsConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Path prefix for Atom (OPDS) clients.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,
    /// Path prefix for browser (HTML) clients.
    #[serde(default = "default_http_prefix")]
    pub http_prefix: String,
    /// Emit absolute hrefs using the request Host header.
    #[serde(default)]
    pub use_absolute_uri: bool,
    #[serde(default = "default_items_per_opds_page")]
    pub items_per_opds_page: usize,
    #[serde(default = "default_items_per_web_page")]
    pub items_per_web_page: usize,
    /// Buckets holding at least this many names drill down one more
    /// letter instead of listing.
    #[serde(default = "default_split_items")]
    pub split_items: usize,
    /// Menu gate string: `newdate:1;genres:0;…`.
    #[serde(default)]
    pub structure: String,
    /// Cyrillic shelf before the Latin one in indexes.
    #[serde(default)]
    pub cyrillic_first: bool,
    /// User-Agent substrings of clients that read FB2 natively.
    #[serde(default = "default_fb2_clients")]
    pub fb2_clients: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub root_path: PathBuf,
    /// Catalog JSON produced by the external indexer.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertConfig {
    /// Use the built-in FB2→EPUB converter.
    #[serde(default = "default_true")]
    pub use_native: bool,
    /// External FB2→EPUB converter binary, invoked as
    /// `converter <input.fb2> <output.epub>` when the built-in
    /// converter is disabled.
    #[serde(default)]
    pub converter_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_language")]
    pub language: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }

    /// Parsed `user:password` pairs.
    pub fn credentials(&self) -> Vec<(String, String)> {
        self.auth
            .credentials
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once(':')
                    .map(|(u, p)| (u.to_string(), p.to_string()))
            })
            .collect()
    }

    /// Parsed menu gate string.
    pub fn menu(&self) -> MenuStructure {
        MenuStructure::parse(&self.opds.structure)
    }
}

/// Visibility gates for the top-level catalog sections.
///
/// Encoded as semicolon-joined `key:0|1` pairs. Unknown keys are
/// ignored; missing keys default to enabled.
#[derive(Debug, Clone, Default)]
pub struct MenuStructure {
    gates: HashMap<String, bool>,
}

/// The endpoints a gate can address.
pub const MENU_KEYS: [&str; 10] = [
    "newdate",
    "newtitle",
    "authorsindex",
    "author-details",
    "author-series",
    "author-no-series",
    "author-alphabetic",
    "author-by-date",
    "sequencesindex",
    "genres",
];

impl MenuStructure {
    pub fn parse(encoded: &str) -> Self {
        let mut gates = HashMap::new();
        for pair in encoded.split(';') {
            let Some((key, value)) = pair.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if !MENU_KEYS.contains(&key) {
                continue;
            }
            gates.insert(key.to_string(), value.trim() != "0");
        }
        Self { gates }
    }

    pub fn enabled(&self, key: &str) -> bool {
        self.gates.get(key).copied().unwrap_or(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// Default value functions

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_wrong_attempts() -> u32 {
    3
}

fn default_server_name() -> String {
    "TinyOPDS".to_string()
}

fn default_root_prefix() -> String {
    "opds".to_string()
}

fn default_http_prefix() -> String {
    "web".to_string()
}

fn default_items_per_opds_page() -> usize {
    30
}

fn default_items_per_web_page() -> usize {
    15
}

fn default_split_items() -> usize {
    100
}

fn default_fb2_clients() -> Vec<String> {
    vec!["FBReader", "AlReader", "CoolReader", "PocketBook"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
            log_level: default_log_level(),
            state_path: PathBuf::new(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            use_http_auth: false,
            remember_clients: default_true(),
            ban_clients: false,
            wrong_attempts_count: default_wrong_attempts(),
            credentials: Vec::new(),
            authorized_clients: String::new(),
        }
    }
}

impl Default for OpdsConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            root_prefix: default_root_prefix(),
            http_prefix: default_http_prefix(),
            use_absolute_uri: false,
            items_per_opds_page: default_items_per_opds_page(),
            items_per_web_page: default_items_per_web_page(),
            split_items: default_split_items(),
            structure: String::new(),
            cyrillic_first: false,
            fb2_clients: default_fb2_clients(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::new(),
            catalog_path: default_catalog_path(),
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            use_native: true,
            converter_path: PathBuf::new(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.interface, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(!config.auth.use_http_auth);
        assert_eq!(config.auth.wrong_attempts_count, 3);
        assert_eq!(config.opds.server_name, "TinyOPDS");
        assert_eq!(config.opds.root_prefix, "opds");
        assert_eq!(config.opds.http_prefix, "web");
        assert_eq!(config.opds.items_per_opds_page, 30);
        assert_eq!(config.opds.items_per_web_page, 15);
        assert_eq!(config.library.catalog_path, PathBuf::from("catalog.json"));
        assert!(config.convert.use_native);
        assert!(config.convert.converter_path.as_os_str().is_empty());
        assert_eq!(config.web.language, "en");
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
interface = "127.0.0.1"
port = 9090
log_level = "debug"
state_path = "/var/lib/tinyopds/state.json"

[auth]
use_http_auth = true
remember_clients = false
ban_clients = true
wrong_attempts_count = 5
credentials = ["admin:secret", "reader:books"]
authorized_clients = "fp-1,fp-2"

[opds]
server_name = "My Library"
root_prefix = "catalog"
http_prefix = "browse"
use_absolute_uri = true
items_per_opds_page = 50
items_per_web_page = 20
structure = "genres:0;newdate:1"
cyrillic_first = true

[library]
root_path = "/media/books"
catalog_path = "/media/books/catalog.json"

[convert]
use_native = false
converter_path = "/usr/bin/fb2epub"

[web]
language = "ru"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(!config.convert.use_native);
        assert_eq!(
            config.convert.converter_path,
            PathBuf::from("/usr/bin/fb2epub")
        );
        assert!(config.auth.use_http_auth);
        assert!(config.auth.ban_clients);
        assert_eq!(config.auth.wrong_attempts_count, 5);
        assert_eq!(
            config.credentials(),
            vec![
                ("admin".to_string(), "secret".to_string()),
                ("reader".to_string(), "books".to_string()),
            ]
        );
        assert_eq!(config.opds.root_prefix, "catalog");
        assert!(config.opds.use_absolute_uri);
        assert!(config.opds.cyrillic_first);
        assert_eq!(config.web.language, "ru");

        let menu = config.menu();
        assert!(!menu.enabled("genres"));
        assert!(menu.enabled("newdate"));
        assert!(menu.enabled("sequencesindex"));
    }

    #[test]
    fn test_menu_structure_gate_string() {
        let menu = MenuStructure::parse(
            "newdate:1;newtitle:1;authorsindex:1;author-details:0;genres:0;bogus:0;broken",
        );
        assert!(menu.enabled("newdate"));
        assert!(!menu.enabled("author-details"));
        assert!(!menu.enabled("genres"));
        // Unknown keys are ignored, missing keys default to enabled.
        assert!(menu.enabled("bogus"));
        assert!(menu.enabled("author-series"));
        assert!(menu.enabled("sequencesindex"));
    }

    #[test]
    fn test_malformed_credentials_skipped() {
        let config: Config = toml::from_str(
            "[auth]\ncredentials = [\"good:pass\", \"nopassword\"]\n",
        )
        .unwrap();
        assert_eq!(config.credentials().len(), 1);
    }
}
