//! PDF Template MCP Server Library
//!
//! Treats red-marked text in a PDF as template fields and exposes two MCP tools:
//! - `list_pdf_fields`: List fields with their coordinate keys, aliases and current text
//! - `set_pdf_fields`: Replace field values in place, addressed by alias or key
//!
//! Fields are addressed by keys of the form `x<int>y<int>_p<page>[_<label>]`;
//! human-readable aliases live in a `<name>.alias.yaml` file next to the PDF.

pub mod alias;
pub mod editor;
pub mod error;
pub mod pdf;
pub mod server;
pub mod source;

pub use editor::{
    AppliedField, Diagnostic, ErrorInfo, FieldInfo, ListFieldsReport, SetFieldsReport, TemplateEditor,
};
pub use error::{Error, Result};
pub use pdf::CoordinateKey;
pub use server::{
    run_server, run_server_with_config, run_server_with_dirs, ListPdfFieldsParams, PdfTemplateServer,
    ServerConfig, SetPdfFieldsParams,
};
