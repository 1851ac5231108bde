use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;
use toml::Value;

use super::server_config::ServerConfig;

/// Build a `ServerConfig` from a TOML string
pub fn from_toml_str(toml_str: &str) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    // Reject anything we would otherwise silently ignore
    if !root.extra.is_empty() {
        return Err(format!("Unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }

    let mut cfg = ServerConfig::default();
    if let Some(server) = root.server {
        if !server.extra.is_empty() {
            return Err(format!("Unrecognized fields in server config: {:?}", sorted_keys(&server.extra)).into());
        }
        if let Some(v) = server.bind {
            cfg.bind = v;
        }
        if let Some(v) = server.port {
            cfg.port = v;
        }
        if let Some(v) = server.max_extensions {
            if v == 0 {
                return Err("max_extensions must be at least 1".into());
            }
            cfg.max_extensions = v;
        }
        cfg.debug_log = server.debug_log;
    }

    Ok(cfg)
}

/// Build a `ServerConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(reader);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build a `ServerConfig` from a TOML file on disk.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    from_reader(file)
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

#[derive(Debug, Deserialize)]
struct TomlConfigRoot {
    server: Option<ServerDto>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ServerDto {
    bind: Option<String>,
    port: Option<u16>,
    max_extensions: Option<usize>,
    debug_log: Option<String>,

    #[serde(flatten)]
    extra: HashMap<String, Value>,
}
