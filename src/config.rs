//! Binding configuration, read once at startup from YCSB-style properties.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

pub const RAVENDB_URL: &str = "ravendb.url";
pub const RAVENDB_DATABASE: &str = "ravendb.database";
pub const RAVENDB_CERTIFICATE: &str = "ravendb.certificate";
pub const RAVENDB_CREATE_DATABASE: &str = "ravendb.createdatabase";
pub const RAVENDB_TIMEOUT: &str = "ravendb.timeout";
pub const BATCH_SIZE: &str = "batchsize";

#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    /// Parse `key=value` lines. Blank lines and lines starting with `#` or
    /// `!` are ignored; `:` is accepted as a separator too.
    pub fn parse(text: &str) -> Result<Self> {
        let mut properties = Self::default();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            properties
                .set_pair(line)
                .with_context(|| format!("line {}", number + 1))?;
        }
        Ok(properties)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read properties file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Apply a single `key=value` override
    pub fn set_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once(['=', ':'])
            .ok_or_else(|| anyhow!("expected key=value, got {:?}", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("empty property name in {:?}", pair));
        }
        self.values.insert(key.to_string(), value.trim().to_string());
        Ok(())
    }

    /// Later properties win.
    pub fn merge(&mut self, other: Properties) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid value {:?} for {}", raw, key)),
            None => Ok(default),
        }
    }
}

/// Settings the RavenDB binding reads at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub urls: Vec<String>,
    pub database: String,
    pub certificate: Option<PathBuf>,
    pub create_database: bool,
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Settings {
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let urls: Vec<String> = properties
            .get_or(RAVENDB_URL, "http://localhost:8080")
            .split(',')
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(anyhow!("{} must name at least one node", RAVENDB_URL));
        }

        let batch_size: usize = properties.parse_or(BATCH_SIZE, 1)?;
        if batch_size == 0 {
            return Err(anyhow!("{} must be at least 1", BATCH_SIZE));
        }

        Ok(Self {
            urls,
            database: properties.get_or(RAVENDB_DATABASE, "ycsb").to_string(),
            certificate: properties
                .get(RAVENDB_CERTIFICATE)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            create_database: properties.parse_or(RAVENDB_CREATE_DATABASE, true)?,
            timeout_ms: properties.parse_or(RAVENDB_TIMEOUT, 30_000)?,
            batch_size,
        })
    }
}
