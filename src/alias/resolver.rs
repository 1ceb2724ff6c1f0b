//! Resolving caller-supplied names to scanned fields.
//!
//! A batch entry is looked up as an alias first and only then decoded as a
//! raw coordinate key. Entries that match neither are skipped, never fatal.

use crate::alias::sidecar::AliasMap;
use crate::pdf::key::CoordinateKey;
use crate::pdf::scanner::{ScanResult, TemplateField};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Alias whose key is absent from the current scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct StaleAlias {
    pub alias: String,
    pub key: String,
}

/// Aliases matched against one scan.
#[derive(Debug)]
pub struct AliasIndex<'a> {
    pub by_alias: BTreeMap<String, &'a TemplateField>,
    pub stale: Vec<StaleAlias>,
}

/// Match every alias in `map` to a scanned field.
pub fn resolve<'a>(map: &AliasMap, scan: &'a ScanResult) -> AliasIndex<'a> {
    let mut by_alias = BTreeMap::new();
    let mut stale = Vec::new();
    for (alias, key) in map.iter() {
        match scan.get(key) {
            Some(field) => {
                by_alias.insert(alias.to_string(), field);
            }
            None => stale.push(StaleAlias {
                alias: alias.to_string(),
                key: key.to_string(),
            }),
        }
    }
    AliasIndex { by_alias, stale }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
pub enum SkipReason {
    /// Neither a known alias nor the key of a scanned field
    UnknownField,
    /// Looks like a coordinate key but does not parse
    MalformedKey,
    /// Another entry already targets the same field
    DuplicateTarget,
    /// The field is drawn by a form XObject that is painted more than once
    NotEditable,
}

/// A batch entry that will not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct SkippedEntry {
    pub entry: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// A batch entry bound to its field.
#[derive(Debug, Clone)]
pub struct ResolvedEntry<'a> {
    pub entry: String,
    pub alias: Option<String>,
    pub field: &'a TemplateField,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct BatchResolution<'a> {
    pub resolved: Vec<ResolvedEntry<'a>>,
    pub skipped: Vec<SkippedEntry>,
}

/// Bind every `alias_or_key -> value` entry to a field.
pub fn resolve_batch<'a>(
    index: &AliasIndex<'a>,
    map: &AliasMap,
    scan: &'a ScanResult,
    batch: &BTreeMap<String, String>,
) -> BatchResolution<'a> {
    let mut out = BatchResolution::default();
    let mut targeted: HashSet<&CoordinateKey> = HashSet::new();

    for (entry, value) in batch {
        let skip = |reason, detail: String| SkippedEntry {
            entry: entry.clone(),
            reason,
            detail,
        };

        let (field, alias) = if let Some(field) = index.by_alias.get(entry) {
            (*field, Some(entry.clone()))
        } else {
            match CoordinateKey::decode(entry) {
                Ok(key) => match scan.get(&key) {
                    Some(field) => (field, map.alias_for(&key).map(str::to_string)),
                    None => {
                        out.skipped
                            .push(skip(SkipReason::UnknownField, format!("no field at {}", key)));
                        continue;
                    }
                },
                Err(e) if looks_like_key(entry) => {
                    out.skipped.push(skip(SkipReason::MalformedKey, e.to_string()));
                    continue;
                }
                Err(_) => {
                    let detail = if map.key_for(entry).is_some() {
                        "alias refers to a field that is no longer in the document".to_string()
                    } else {
                        "not a known alias or coordinate key".to_string()
                    };
                    out.skipped.push(skip(SkipReason::UnknownField, detail));
                    continue;
                }
            }
        };

        if !field.editable {
            out.skipped.push(skip(SkipReason::NotEditable, shared_form_detail(field)));
            continue;
        }

        if !targeted.insert(&field.key) {
            out.skipped.push(skip(
                SkipReason::DuplicateTarget,
                format!("field {} is already set by another entry", field.key),
            ));
            continue;
        }

        out.resolved.push(ResolvedEntry {
            entry: entry.clone(),
            alias,
            field,
            value: value.clone(),
        });
    }

    out
}

/// Bind every scanned field to the empty value, erasing it.
///
/// Entries are named by alias where one exists.
pub fn erase_all<'a>(map: &AliasMap, scan: &'a ScanResult) -> BatchResolution<'a> {
    let mut out = BatchResolution::default();
    for field in &scan.fields {
        let alias = map.alias_for(&field.key).map(str::to_string);
        let entry = alias.clone().unwrap_or_else(|| field.key.to_string());
        if !field.editable {
            out.skipped.push(SkippedEntry {
                entry,
                reason: SkipReason::NotEditable,
                detail: shared_form_detail(field),
            });
            continue;
        }
        out.resolved.push(ResolvedEntry {
            entry,
            alias,
            field,
            value: String::new(),
        });
    }
    out
}

fn shared_form_detail(field: &TemplateField) -> String {
    format!("field {} is drawn by a form used more than once", field.key)
}

/// `x` followed by a digit or sign: meant as a key, not an alias.
fn looks_like_key(entry: &str) -> bool {
    let mut chars = entry.chars();
    chars.next() == Some('x') && chars.next().is_some_and(|c| c.is_ascii_digit() || c == '-')
}
