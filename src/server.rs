//! MCP Server implementation using rmcp

use crate::editor::{ListFieldsReport, SetFieldsReport, TemplateEditor};
use crate::pdf::{ReplaceOptions, ScanOptions};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "PDF_TEMPLATE_CONFIG";
/// Environment variable overriding `resource_dirs` (OS path-list syntax)
pub const RESOURCE_DIRS_ENV: &str = "PDF_TEMPLATE_RESOURCE_DIRS";

/// Configuration for the PDF Template MCP Server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directories PDFs may be read from and written to; empty allows all
    pub resource_dirs: Vec<String>,
    /// Field detection
    pub scan: ScanOptions,
    /// Value replacement
    pub replace: ReplaceOptions,
}

impl ServerConfig {
    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build from an optional config file and an optional resource dir list.
    pub fn from_sources(file: Option<&Path>, resource_dirs: Option<OsString>) -> crate::error::Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(dirs) = resource_dirs {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().to_string())
                .collect();
        }
        Ok(config)
    }

    /// Configuration from `PDF_TEMPLATE_CONFIG` and `PDF_TEMPLATE_RESOURCE_DIRS`.
    pub fn from_env() -> crate::error::Result<Self> {
        let file = std::env::var_os(CONFIG_ENV).map(std::path::PathBuf::from);
        Self::from_sources(file.as_deref(), std::env::var_os(RESOURCE_DIRS_ENV))
    }
}

/// PDF Template MCP Server
#[derive(Clone)]
pub struct PdfTemplateServer {
    editor: TemplateEditor,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPdfFieldsParams {
    /// Path to the PDF file
    pub pdf_path: String,
    /// Output format: "json" (default) or "yaml" for an `alias_or_key: text` listing
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetPdfFieldsParams {
    /// Path to the PDF file; it is modified in place
    pub pdf_path: String,
    /// Mapping of alias or coordinate key (e.g. "x100y200_p0") to the new value
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClearPdfFieldsParams {
    /// Path to the PDF file; it is modified in place
    pub pdf_path: String,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl PdfTemplateServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server with specified resource directories
    pub fn with_resource_dirs(dirs: Vec<String>) -> Self {
        Self::with_config(ServerConfig {
            resource_dirs: dirs,
            ..ServerConfig::default()
        })
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_editor(TemplateEditor::new(config))
    }

    pub fn with_editor(editor: TemplateEditor) -> Self {
        Self {
            editor,
            tool_router: Self::tool_router(),
        }
    }

    /// List template fields of a PDF
    #[tool(
        description = "List the template fields of a PDF: color-marked text runs addressable by coordinate key (x<int>y<int>_p<page>) or by alias from the sidecar <name>.alias.yaml file.

Returns each field's key, alias, current text, page, bounding box, font, size and color. Use format=\"yaml\" for a compact `alias_or_key: text` listing."
    )]
    async fn list_pdf_fields(&self, Parameters(params): Parameters<ListPdfFieldsParams>) -> String {
        let report = self
            .process_list_pdf_fields(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %params.pdf_path, "list_pdf_fields failed");
                ListFieldsReport::failed(&params.pdf_path, &e)
            });

        let yaml = params
            .format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("yaml"));
        if yaml && report.error.is_none() {
            return report.to_yaml_listing();
        }
        serde_json::to_string_pretty(&report).unwrap_or_default()
    }

    /// Replace template field values in a PDF
    #[tool(
        description = "Set template field values in a PDF, in place. Keys of `fields` are aliases from the sidecar file or raw coordinate keys; aliases take precedence.

The old text is erased and the new value drawn with the field's font, size and color. All edits are written in one atomic save. Returns applied entries, skipped entries (UnknownField, MalformedKey, DuplicateTarget, NotEditable), overflowed fields and warnings."
    )]
    async fn set_pdf_fields(&self, Parameters(params): Parameters<SetPdfFieldsParams>) -> String {
        let report = self
            .process_set_pdf_fields(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %params.pdf_path, "set_pdf_fields failed");
                SetFieldsReport::failed(&params.pdf_path, &e)
            });

        serde_json::to_string_pretty(&report).unwrap_or_default()
    }

    /// Erase every template field of a PDF
    #[tool(
        description = "Erase the value of every template field in a PDF, in place, leaving blank fields ready to be filled. All erasures are written in one atomic save. Fields drawn by a shared form XObject are skipped as NotEditable."
    )]
    async fn clear_pdf_fields(&self, Parameters(params): Parameters<ClearPdfFieldsParams>) -> String {
        let report = self
            .process_clear_pdf_fields(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %params.pdf_path, "clear_pdf_fields failed");
                SetFieldsReport::failed(&params.pdf_path, &e)
            });

        serde_json::to_string_pretty(&report).unwrap_or_default()
    }
}

impl PdfTemplateServer {
    pub async fn process_list_pdf_fields(
        &self,
        params: &ListPdfFieldsParams,
    ) -> crate::error::Result<ListFieldsReport> {
        let editor = self.editor.clone();
        let path = params.pdf_path.clone();

        // CPU-bound lopdf work
        tokio::task::spawn_blocking(move || editor.list_fields(&path))
            .await
            .map_err(join_error)?
    }

    pub async fn process_set_pdf_fields(
        &self,
        params: &SetPdfFieldsParams,
    ) -> crate::error::Result<SetFieldsReport> {
        let editor = self.editor.clone();
        let path = params.pdf_path.clone();
        let fields = params.fields.clone();

        // blocks on the per-path lock as well as on lopdf
        tokio::task::spawn_blocking(move || editor.set_fields(&path, &fields))
            .await
            .map_err(join_error)?
    }

    pub async fn process_clear_pdf_fields(
        &self,
        params: &ClearPdfFieldsParams,
    ) -> crate::error::Result<SetFieldsReport> {
        let editor = self.editor.clone();
        let path = params.pdf_path.clone();

        tokio::task::spawn_blocking(move || editor.clear_fields(&path))
            .await
            .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::other(format!("Task join error: {}", e)))
}

impl Default for PdfTemplateServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for PdfTemplateServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF Template MCP Server finds template fields (red-marked text) in PDFs and \
                 replaces their values in place. Call list_pdf_fields first, then \
                 set_pdf_fields with aliases or coordinate keys. clear_pdf_fields blanks \
                 every field."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with specified resource directories
pub async fn run_server_with_dirs(resource_dirs: Vec<String>) -> Result<()> {
    run_server_with_config(ServerConfig {
        resource_dirs,
        ..ServerConfig::default()
    })
    .await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = ?config.resource_dirs,
        "PDF Template MCP Server ready, waiting for connections..."
    );

    let server = PdfTemplateServer::with_config(config);
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{red_text, template_pdf};
    use crate::pdf::OverflowPolicy;
    use std::path::PathBuf;

    fn write_template(dir: &Path) -> PathBuf {
        let path = dir.join("invoice.pdf");
        std::fs::write(&path, template_pdf(&[&red_text(100, 200, "PLACEHOLDER")])).unwrap();
        path
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.resource_dirs.is_empty());
        assert_eq!(config.scan.coalesce_gap, 3.0);
        assert_eq!(config.replace.overflow, OverflowPolicy::Shrink { min_scale: 0.5 });
    }

    #[test]
    fn test_server_config_partial_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"scan": {"key_space": "display"}, "replace": {"overflow": {"mode": "allow"}}}"#,
        )
        .unwrap();
        assert_eq!(config.scan.key_space, crate::pdf::KeySpace::Display);
        assert_eq!(config.scan.baseline_tolerance, 0.5);
        assert_eq!(config.replace.overflow, OverflowPolicy::Allow);
        assert!(config.replace.mask_color.is_some());
    }

    #[test]
    fn test_server_config_from_sources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(&file, r#"{"resource_dirs": ["/from/file"]}"#).unwrap();

        let config = ServerConfig::from_sources(Some(&file), None).unwrap();
        assert_eq!(config.resource_dirs, vec!["/from/file".to_string()]);

        let joined = std::env::join_paths(["/a", "/b"]).unwrap();
        let config = ServerConfig::from_sources(Some(&file), Some(joined)).unwrap();
        assert_eq!(config.resource_dirs, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_server_config_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(&file, "{not json").unwrap();
        assert!(matches!(
            ServerConfig::from_sources(Some(&file), None),
            Err(crate::error::Error::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pdf_fields_json() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_template(dir.path());
        let server = PdfTemplateServer::new();

        let output = server
            .list_pdf_fields(Parameters(ListPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                format: None,
            }))
            .await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["total_count"], 1);
        assert_eq!(json["fields"][0]["key"], "x100y200_p0");
        assert_eq!(json["fields"][0]["text"], "PLACEHOLDER");
    }

    #[tokio::test]
    async fn test_list_pdf_fields_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_template(dir.path());
        let server = PdfTemplateServer::new();

        let output = server
            .list_pdf_fields(Parameters(ListPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                format: Some("yaml".to_string()),
            }))
            .await;
        assert_eq!(output, "x100y200_p0: PLACEHOLDER\n");
    }

    #[tokio::test]
    async fn test_list_pdf_fields_not_found() {
        let server = PdfTemplateServer::new();
        let output = server
            .list_pdf_fields(Parameters(ListPdfFieldsParams {
                pdf_path: "/nonexistent/file.pdf".to_string(),
                format: Some("yaml".to_string()),
            }))
            .await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["error"]["kind"], "PdfNotFound");
    }

    #[tokio::test]
    async fn test_set_pdf_fields_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_template(dir.path());
        let server = PdfTemplateServer::new();

        let mut fields = BTreeMap::new();
        fields.insert("x100y200_p0".to_string(), "ACME Corp".to_string());
        let output = server
            .set_pdf_fields(Parameters(SetPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                fields,
            }))
            .await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["committed"], true);
        assert_eq!(json["applied"][0]["previous_text"], "PLACEHOLDER");

        let listed = server
            .process_list_pdf_fields(&ListPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                format: None,
            })
            .await
            .unwrap();
        assert_eq!(listed.fields[0].text, "ACME Corp");
    }

    #[tokio::test]
    async fn test_set_pdf_fields_empty_batch() {
        let server = PdfTemplateServer::new();
        let output = server
            .set_pdf_fields(Parameters(SetPdfFieldsParams {
                pdf_path: "/any.pdf".to_string(),
                fields: BTreeMap::new(),
            }))
            .await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["error"]["kind"], "EmptyBatch");
        assert_eq!(json["committed"], false);
    }

    #[tokio::test]
    async fn test_sandbox_denies_outside_path() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let pdf = write_template(other.path());
        let server =
            PdfTemplateServer::with_resource_dirs(vec![allowed.path().to_string_lossy().to_string()]);

        let result = server
            .process_list_pdf_fields(&ListPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                format: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(crate::error::Error::PathAccessDenied { .. })
        ));
    }

    #[test]
    fn test_get_info_enables_tools() {
        let info = PdfTemplateServer::new().get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("list_pdf_fields"));
    }

    #[tokio::test]
    async fn test_clear_pdf_fields_blanks_template() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_template(dir.path());
        let server = PdfTemplateServer::new();

        let output = server
            .clear_pdf_fields(Parameters(ClearPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
            }))
            .await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["committed"], true);
        assert_eq!(json["applied"][0]["key"], "x100y200_p0");
        assert_eq!(json["applied"][0]["value"], "");

        let listed = server
            .process_list_pdf_fields(&ListPdfFieldsParams {
                pdf_path: pdf.to_string_lossy().to_string(),
                format: None,
            })
            .await
            .unwrap();
        assert_eq!(listed.total_count, 0);
    }
}
