//! Sidecar alias files.
//!
//! `invoice.pdf` is paired with `invoice.alias.yaml` in the same directory,
//! a flat mapping from coordinate key to alias:
//!
//! ```yaml
//! x100y200_p0: customer_name
//! x100y180_p0: invoice_date
//! ```

use crate::error::{Error, Result};
use crate::pdf::key::CoordinateKey;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Location of the sidecar for a PDF.
pub fn sidecar_path(pdf: &Path) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    pdf.with_file_name(format!("{}.alias.yaml", stem))
}

/// Bidirectional alias ⇄ key table. Every alias and every key appears once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasMap {
    by_alias: BTreeMap<String, CoordinateKey>,
    by_key: HashMap<CoordinateKey, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a sidecar file. A missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(malformed(path, format!("read failed: {}", e))),
        };
        Self::parse(&text, path)
    }

    /// Parse sidecar YAML; `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let entries: Option<BTreeMap<String, String>> =
            serde_yaml::from_str(text).map_err(|e| malformed(path, e.to_string()))?;
        Self::from_entries(entries.unwrap_or_default(), path)
    }

    /// Build from `key string -> alias` pairs, enforcing uniqueness.
    pub fn from_entries(entries: BTreeMap<String, String>, path: &Path) -> Result<Self> {
        let mut map = Self::new();
        for (raw_key, alias) in entries {
            let key = CoordinateKey::decode(&raw_key).map_err(|e| malformed(path, e.to_string()))?;
            let alias = alias.trim().to_string();
            if alias.is_empty() {
                return Err(malformed(path, format!("empty alias for key {}", raw_key)));
            }
            if let Some(other) = map.by_alias.get(&alias) {
                return Err(malformed(
                    path,
                    format!("alias {:?} is used for both {} and {}", alias, other, key),
                ));
            }
            if map.by_key.contains_key(&key) {
                return Err(malformed(path, format!("key {} is listed twice", key)));
            }
            map.by_key.insert(key.clone(), alias.clone());
            map.by_alias.insert(alias, key);
        }
        Ok(map)
    }

    pub fn key_for(&self, alias: &str) -> Option<&CoordinateKey> {
        self.by_alias.get(alias)
    }

    pub fn alias_for(&self, key: &CoordinateKey) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    /// Aliases in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CoordinateKey)> {
        self.by_alias.iter().map(|(a, k)| (a.as_str(), k))
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

fn malformed(path: &Path, reason: String) -> Error {
    Error::MalformedAliasFile {
        path: path.display().to_string(),
        reason,
    }
}
