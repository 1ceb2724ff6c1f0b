//! Listing and editing template fields of PDFs on disk.
//!
//! Every call opens its document, works on it, and drops it before returning;
//! the editor itself only keeps configuration, the per-path lock registry and
//! the committer.

use crate::alias::{self, sidecar_path, AliasMap, BatchResolution, SkippedEntry};
use crate::error::{Error, Result};
use crate::pdf::replace::{self, Edit, EditWarning, FieldOverflow};
use crate::pdf::scanner::{self, ScanWarning, TemplateField};
use crate::pdf::TemplateDocument;
use crate::server::ServerConfig;
use crate::source::{resolve_path, validate_path_access, Access, AtomicCommitter, Committer, PathLocks};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Non-fatal finding attached to a report.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Diagnostic {
    /// Stable name, e.g. `StaleAlias` or `FontFallback`
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub message: String,
}

/// Document-level failure.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.client_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FieldInfo {
    /// Coordinate key
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Current text of the field
    pub text: String,
    /// Zero-based page index
    pub page: u32,
    /// `[x0, y0, x1, y1]` in page user space
    pub bbox: [f64; 4],
    pub font: String,
    pub font_size: f64,
    /// `#rrggbb`
    pub color: String,
    /// False when the field is drawn by a form XObject painted more than once
    pub editable: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListFieldsReport {
    pub pdf_path: String,
    /// Sidecar the aliases were read from (present or not)
    pub alias_file: String,
    pub fields: Vec<FieldInfo>,
    pub total_count: u32,
    pub warnings: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ListFieldsReport {
    pub fn failed(pdf_path: &str, error: &Error) -> Self {
        Self {
            pdf_path: pdf_path.to_string(),
            alias_file: sidecar_path(Path::new(pdf_path)).display().to_string(),
            fields: vec![],
            total_count: 0,
            warnings: vec![],
            message: None,
            error: Some(error.into()),
        }
    }

    /// `alias_or_key: text` per field, in listing order.
    ///
    /// An alias that spells another field's key, or repeats an earlier name,
    /// is listed under the raw key instead.
    pub fn to_yaml_listing(&self) -> String {
        let keys: HashSet<&str> = self.fields.iter().map(|f| f.key.as_str()).collect();
        let mut mapping = serde_yaml::Mapping::new();
        for field in &self.fields {
            let name = match &field.alias {
                Some(alias)
                    if !keys.contains(alias.as_str())
                        && !mapping.contains_key(&serde_yaml::Value::String(alias.clone())) =>
                {
                    alias.clone()
                }
                _ => field.key.clone(),
            };
            mapping.insert(
                serde_yaml::Value::String(name),
                serde_yaml::Value::String(field.text.clone()),
            );
        }
        serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AppliedField {
    /// Batch entry as given by the caller
    pub entry: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub previous_text: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SetFieldsReport {
    pub pdf_path: String,
    pub applied: Vec<AppliedField>,
    pub skipped: Vec<SkippedEntry>,
    pub overflowed: Vec<FieldOverflow>,
    pub warnings: Vec<Diagnostic>,
    /// Whether the file on disk was replaced
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl SetFieldsReport {
    fn new(pdf_path: &str) -> Self {
        Self {
            pdf_path: pdf_path.to_string(),
            applied: vec![],
            skipped: vec![],
            overflowed: vec![],
            warnings: vec![],
            committed: false,
            error: None,
        }
    }

    pub fn failed(pdf_path: &str, error: &Error) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(pdf_path)
        }
    }
}

/// Entry point for listing and setting fields.
#[derive(Clone)]
pub struct TemplateEditor {
    config: Arc<ServerConfig>,
    locks: Arc<PathLocks>,
    committer: Arc<dyn Committer>,
}

impl TemplateEditor {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_committer(config, Arc::new(AtomicCommitter))
    }

    pub fn with_committer(config: ServerConfig, committer: Arc<dyn Committer>) -> Self {
        Self {
            config: Arc::new(config),
            locks: Arc::new(PathLocks::new()),
            committer,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn checked_path(&self, pdf_path: &str, access: Access) -> Result<PathBuf> {
        let path = validate_path_access(pdf_path, &self.config.resource_dirs)?;
        resolve_path(&path, access)
    }

    /// Scan a PDF and describe its fields with their aliases.
    pub fn list_fields(&self, pdf_path: &str) -> Result<ListFieldsReport> {
        let path = self.checked_path(pdf_path, Access::Read)?;
        let doc = TemplateDocument::open(&path)?;
        let scan = scanner::scan(&doc, &self.config.scan)?;
        drop(doc);

        let alias_file = sidecar_path(&path);
        let (map, mut warnings) = load_aliases(&alias_file);
        let index = alias::resolve(&map, &scan);
        warnings.extend(stale_diagnostics(&index));
        warnings.extend(scan.warnings.iter().map(scan_diagnostic));

        let fields: Vec<FieldInfo> = scan
            .fields
            .iter()
            .map(|f| field_info(f, map.alias_for(&f.key)))
            .collect();

        tracing::info!(path = %path.display(), fields = fields.len(), "Listed template fields");

        Ok(ListFieldsReport {
            pdf_path: pdf_path.to_string(),
            alias_file: alias_file.display().to_string(),
            total_count: fields.len() as u32,
            fields,
            warnings,
            message: scan.message().map(str::to_string),
            error: None,
        })
    }

    /// Replace field values and commit the document in one atomic write.
    ///
    /// Entries that match no field are reported as skipped and do not stop
    /// the others. Document-level failures leave the file untouched.
    pub fn set_fields(&self, pdf_path: &str, fields: &BTreeMap<String, String>) -> Result<SetFieldsReport> {
        if fields.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let path = self.checked_path(pdf_path, Access::ReadWrite)?;
        let _guard = self.locks.lock(&path);

        let mut doc = TemplateDocument::open(&path)?;
        let scan = scanner::scan(&doc, &self.config.scan)?;

        let (map, mut warnings) = load_aliases(&sidecar_path(&path));
        let index = alias::resolve(&map, &scan);
        warnings.extend(stale_diagnostics(&index));
        warnings.extend(scan.warnings.iter().map(scan_diagnostic));

        let batch = alias::resolve_batch(&index, &map, &scan, fields);
        let report = self.commit_batch(pdf_path, &path, &mut doc, batch, warnings)?;
        tracing::info!(
            path = %path.display(),
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            overflowed = report.overflowed.len(),
            "Template fields set"
        );
        Ok(report)
    }

    /// Erase every template field and commit the document in one atomic write.
    ///
    /// Fields that cannot be edited are reported as skipped. A document
    /// without fields is left untouched.
    pub fn clear_fields(&self, pdf_path: &str) -> Result<SetFieldsReport> {
        let path = self.checked_path(pdf_path, Access::ReadWrite)?;
        let _guard = self.locks.lock(&path);

        let mut doc = TemplateDocument::open(&path)?;
        let scan = scanner::scan(&doc, &self.config.scan)?;

        let (map, mut warnings) = load_aliases(&sidecar_path(&path));
        warnings.extend(stale_diagnostics(&alias::resolve(&map, &scan)));
        warnings.extend(scan.warnings.iter().map(scan_diagnostic));

        let batch = alias::erase_all(&map, &scan);
        let report = self.commit_batch(pdf_path, &path, &mut doc, batch, warnings)?;
        tracing::info!(
            path = %path.display(),
            cleared = report.applied.len(),
            skipped = report.skipped.len(),
            "Template fields cleared"
        );
        Ok(report)
    }

    /// Apply resolved entries to `doc` and commit it, unless nothing resolved.
    fn commit_batch(
        &self,
        pdf_path: &str,
        path: &Path,
        doc: &mut TemplateDocument,
        batch: BatchResolution<'_>,
        mut warnings: Vec<Diagnostic>,
    ) -> Result<SetFieldsReport> {
        let mut report = SetFieldsReport::new(pdf_path);
        report.skipped = batch.skipped;
        for skip in &report.skipped {
            tracing::debug!(entry = %skip.entry, reason = ?skip.reason, "Batch entry skipped");
        }

        if batch.resolved.is_empty() {
            report.warnings = warnings;
            tracing::info!(path = %path.display(), skipped = report.skipped.len(), "Nothing to apply");
            return Ok(report);
        }

        let edits: Vec<Edit<'_>> = batch
            .resolved
            .iter()
            .map(|r| Edit {
                field: r.field,
                value: &r.value,
            })
            .collect();
        let outcomes = replace::apply(doc, &edits, &self.config.replace)?;
        let bytes = doc.save_to_bytes()?;

        self.committer.commit(path, &bytes)?;

        for (entry, outcome) in batch.resolved.iter().zip(outcomes) {
            report.overflowed.extend(outcome.overflow);
            warnings.extend(outcome.warnings.iter().map(edit_diagnostic));
            report.applied.push(AppliedField {
                entry: entry.entry.clone(),
                key: outcome.key,
                alias: entry.alias.clone(),
                previous_text: entry.field.original_text.clone(),
                value: entry.value.clone(),
            });
        }
        report.warnings = warnings;
        report.committed = true;
        Ok(report)
    }
}

fn load_aliases(alias_file: &Path) -> (AliasMap, Vec<Diagnostic>) {
    match AliasMap::load(alias_file) {
        Ok(map) => (map, vec![]),
        Err(e) => {
            tracing::warn!(error = %e, "Alias file ignored, falling back to raw keys");
            let diagnostic = Diagnostic {
                kind: e.kind().to_string(),
                key: None,
                message: e.client_message(),
            };
            (AliasMap::new(), vec![diagnostic])
        }
    }
}

fn stale_diagnostics(index: &alias::AliasIndex<'_>) -> Vec<Diagnostic> {
    index
        .stale
        .iter()
        .map(|s| Diagnostic {
            kind: "StaleAlias".to_string(),
            key: Some(s.key.clone()),
            message: format!("alias {:?} points to {}, which is not in the document", s.alias, s.key),
        })
        .collect()
}

fn scan_diagnostic(warning: &ScanWarning) -> Diagnostic {
    match warning {
        ScanWarning::DuplicateKey { key, text } => Diagnostic {
            kind: "DuplicateKey".to_string(),
            key: Some(key.clone()),
            message: format!("second field at {} ({:?}) ignored", key, text),
        },
    }
}

fn edit_diagnostic(warning: &EditWarning) -> Diagnostic {
    match warning {
        EditWarning::FontFallback { key, font } => Diagnostic {
            kind: "FontFallback".to_string(),
            key: Some(key.clone()),
            message: format!("value not encodable in {}; drawn with Helvetica", font),
        },
        EditWarning::UnencodableCharacters { key, characters } => Diagnostic {
            kind: "UnencodableCharacters".to_string(),
            key: Some(key.clone()),
            message: format!("characters {:?} replaced with '?'", characters),
        },
    }
}

fn field_info(field: &TemplateField, alias: Option<&str>) -> FieldInfo {
    let round = |v: f64| (v * 100.0).round() / 100.0;
    FieldInfo {
        key: field.key.to_string(),
        alias: alias.map(str::to_string),
        text: field.original_text.clone(),
        page: field.page,
        bbox: [
            round(field.bbox.x0),
            round(field.bbox.y0),
            round(field.bbox.x1),
            round(field.bbox.y1),
        ],
        font: field.font_name.clone(),
        font_size: round(field.font_size),
        color: field.color.to_hex(),
        editable: field.editable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{form_pdf, red_text, template_pdf, IDENTITY};
    use pretty_assertions::assert_eq;

    struct FailingCommitter;

    impl Committer for FailingCommitter {
        fn commit(&self, path: &Path, _data: &[u8]) -> Result<()> {
            Err(Error::WriteFailure {
                path: path.display().to_string(),
                reason: "simulated".to_string(),
            })
        }
    }

    fn write_pdf(dir: &Path, content: &str) -> String {
        let path = dir.join("form.pdf");
        std::fs::write(&path, template_pdf(&[content])).unwrap();
        path.to_string_lossy().to_string()
    }

    fn batch(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_list_fields_with_alias() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &red_text(100, 200, "PLACEHOLDER"));
        std::fs::write(dir.path().join("form.alias.yaml"), "x100y200_p0: customer_name\n").unwrap();

        let report = TemplateEditor::new(ServerConfig::default())
            .list_fields(&pdf)
            .unwrap();
        assert_eq!(report.total_count, 1);
        assert_eq!(report.fields[0].alias.as_deref(), Some("customer_name"));
        assert_eq!(report.fields[0].color, "#ff0000");
        assert_eq!(report.to_yaml_listing(), "customer_name: PLACEHOLDER\n");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_list_fields_empty_document_message() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), "");
        let report = TemplateEditor::new(ServerConfig::default())
            .list_fields(&pdf)
            .unwrap();
        assert_eq!(report.total_count, 0);
        assert!(report.message.is_some());
        assert!(report.error.is_none());
    }

    #[test]
    fn test_malformed_alias_file_degrades_to_raw_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &red_text(100, 200, "PLACEHOLDER"));
        std::fs::write(dir.path().join("form.alias.yaml"), "x1y1_p0: a\nx2y2_p0: a\n").unwrap();

        let editor = TemplateEditor::new(ServerConfig::default());
        let report = editor.set_fields(&pdf, &batch(&[("x100y200_p0", "Set")])).unwrap();
        assert!(report.committed);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.warnings[0].kind, "MalformedAliasFile");
    }

    #[test]
    fn test_empty_batch_rejected() {
        let editor = TemplateEditor::new(ServerConfig::default());
        let result = editor.set_fields("/whatever.pdf", &BTreeMap::new());
        assert!(matches!(result, Err(Error::EmptyBatch)));
    }

    #[test]
    fn test_all_entries_skipped_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &red_text(100, 200, "PLACEHOLDER"));
        let before = std::fs::read(&pdf).unwrap();

        let report = TemplateEditor::new(ServerConfig::default())
            .set_fields(&pdf, &batch(&[("nobody", "x")]))
            .unwrap();
        assert!(!report.committed);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(std::fs::read(&pdf).unwrap(), before);
    }

    #[test]
    fn test_commit_failure_leaves_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &red_text(100, 200, "PLACEHOLDER"));
        let before = std::fs::read(&pdf).unwrap();

        let editor = TemplateEditor::with_committer(ServerConfig::default(), Arc::new(FailingCommitter));
        let result = editor.set_fields(&pdf, &batch(&[("x100y200_p0", "John Doe")]));

        assert!(matches!(result, Err(Error::WriteFailure { .. })));
        assert_eq!(std::fs::read(&pdf).unwrap(), before);
    }

    #[test]
    fn test_failed_report_carries_kind() {
        let report = SetFieldsReport::failed("a.pdf", &Error::PdfNotFound { path: "a.pdf".into() });
        let error = report.error.unwrap();
        assert_eq!(error.kind, "PdfNotFound");
        assert!(!report.committed);
    }

    #[test]
    fn test_listing_alias_spelling_another_key_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}{}", red_text(100, 200, "NAME"), red_text(100, 180, "DATE"));
        let pdf = write_pdf(dir.path(), &content);
        std::fs::write(dir.path().join("form.alias.yaml"), "x100y180_p0: x100y200_p0\n").unwrap();

        let report = TemplateEditor::new(ServerConfig::default())
            .list_fields(&pdf)
            .unwrap();
        assert_eq!(report.fields[1].alias.as_deref(), Some("x100y200_p0"));
        assert_eq!(report.to_yaml_listing(), "x100y200_p0: NAME\nx100y180_p0: DATE\n");
    }

    #[test]
    fn test_set_fields_reports_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}{}", red_text(100, 200, "One"), red_text(100, 200, "Two"));
        let pdf = write_pdf(dir.path(), &content);

        let report = TemplateEditor::new(ServerConfig::default())
            .set_fields(&pdf, &batch(&[("x100y200_p0", "Set")]))
            .unwrap();
        assert!(report.committed);
        let kinds: Vec<&str> = report.warnings.iter().map(|w| w.kind.as_str()).collect();
        assert_eq!(kinds, vec!["DuplicateKey"]);
        assert_eq!(report.warnings[0].key.as_deref(), Some("x100y200_p0"));
    }

    #[test]
    fn test_clear_fields_erases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let content = format!("{}{}", red_text(100, 200, "NAME"), red_text(100, 180, "DATE"));
        let pdf = write_pdf(dir.path(), &content);
        std::fs::write(dir.path().join("form.alias.yaml"), "x100y180_p0: date\n").unwrap();

        let editor = TemplateEditor::new(ServerConfig::default());
        let report = editor.clear_fields(&pdf).unwrap();
        assert!(report.committed);
        let cleared: Vec<(&str, &str, &str)> = report
            .applied
            .iter()
            .map(|a| (a.entry.as_str(), a.previous_text.as_str(), a.value.as_str()))
            .collect();
        assert_eq!(cleared, vec![("x100y200_p0", "NAME", ""), ("date", "DATE", "")]);

        assert_eq!(editor.list_fields(&pdf).unwrap().total_count, 0);
    }

    #[test]
    fn test_clear_fields_without_fields_leaves_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), "");
        let before = std::fs::read(&pdf).unwrap();

        let report = TemplateEditor::new(ServerConfig::default())
            .clear_fields(&pdf)
            .unwrap();
        assert!(!report.committed);
        assert!(report.applied.is_empty());
        assert_eq!(std::fs::read(&pdf).unwrap(), before);
    }

    #[test]
    fn test_clear_fields_commit_failure_leaves_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &red_text(100, 200, "PLACEHOLDER"));
        let before = std::fs::read(&pdf).unwrap();

        let editor = TemplateEditor::with_committer(ServerConfig::default(), Arc::new(FailingCommitter));
        assert!(matches!(editor.clear_fields(&pdf), Err(Error::WriteFailure { .. })));
        assert_eq!(std::fs::read(&pdf).unwrap(), before);
    }

    #[test]
    fn test_shared_form_field_listed_as_not_editable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.pdf");
        let page = "q /Fm1 Do Q q 1 0 0 1 0 100 cm /Fm1 Do Q";
        std::fs::write(&path, form_pdf(page, &red_text(100, 200, "Shared"), IDENTITY)).unwrap();
        let pdf = path.to_string_lossy().to_string();

        let editor = TemplateEditor::new(ServerConfig::default());
        let listing = editor.list_fields(&pdf).unwrap();
        assert_eq!(listing.total_count, 2);
        assert!(listing.fields.iter().all(|f| !f.editable));

        let report = editor.clear_fields(&pdf).unwrap();
        assert!(!report.committed);
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == alias::SkipReason::NotEditable));
    }
}
