//! PDF processing layer
//!
//! Content interpretation, field scanning and in-place replacement on top of
//! lopdf.

pub mod content;
pub mod document;
pub mod fonts;
pub mod key;
pub mod marking;
pub mod replace;
pub mod scanner;

#[cfg(test)]
pub(crate) mod fixtures;

pub use content::{ContentSource, Matrix, Rect, RgbColor, TextRun};
pub use document::TemplateDocument;
pub use key::{CoordinateKey, KeySpace};
pub use marking::{
    BracketMarking, ColorSetMarking, FontMarking, Marked, MarkingConfig, MarkingPredicate,
    RedMarking,
};
pub use replace::{
    apply, Edit, EditOutcome, EditWarning, FieldOverflow, OverflowAction, OverflowPolicy,
    ReplaceOptions,
};
pub use scanner::{scan, scan_with, ScanOptions, ScanResult, ScanWarning, TemplateField};
