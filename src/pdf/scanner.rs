//! Field scanner: turns page content into addressable template fields.

use crate::error::Result;
use crate::pdf::content::{
    page_text, ContentSource, Matrix, Rect, RgbColor, ShowOperator, TextRun, TextState,
};
use crate::pdf::document::TemplateDocument;
use crate::pdf::fonts::page_resources;
use crate::pdf::key::{CoordinateKey, KeySpace};
use crate::pdf::marking::{MarkingConfig, MarkingPredicate};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Scanner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Which runs count as fields
    pub marking: MarkingConfig,
    /// Largest gap (device units) between runs that still belong to one field
    pub coalesce_gap: f64,
    /// Largest baseline offset between runs that still belong to one field
    pub baseline_tolerance: f64,
    /// Coordinate space keys are expressed in
    pub key_space: KeySpace,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            marking: MarkingConfig::default(),
            coalesce_gap: 3.0,
            baseline_tolerance: 0.5,
            key_space: KeySpace::User,
        }
    }
}

/// One show operator that contributes glyphs to a field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSegment {
    pub op_index: usize,
    pub operator: ShowOperator,
    /// Advance in text space, used to keep following text in place
    pub advance: f64,
    pub state: TextState,
}

/// A detected template field. Immutable; a new scan produces new values.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateField {
    pub key: CoordinateKey,
    pub page: u32,
    /// Device-space box from font descent to ascent
    pub bbox: Rect,
    /// Base font name (`/BaseFont`)
    pub font_name: String,
    /// Font resource name used by `Tf`
    pub font_resource: String,
    /// Rendered font size
    pub font_size: f64,
    pub color: RgbColor,
    pub original_text: String,
    /// Baseline origin in user space
    pub origin: (f64, f64),
    /// Length of the field along its baseline in user space
    pub width: f64,
    /// Text state of the first run
    pub state: TextState,
    /// Text rendering matrix at the field origin
    pub matrix: Matrix,
    pub segments: Vec<FieldSegment>,
    /// Content stream holding the field's show operators
    pub source: ContentSource,
    /// Maps the space of `source` to page user space
    pub placement: Matrix,
    /// False for fields inside a form XObject drawn more than once, where
    /// rewriting the form would change every copy
    pub editable: bool,
}

/// Non-fatal findings of a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ScanWarning {
    /// A second field produced an already-used key and was dropped
    DuplicateKey { key: String, text: String },
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub fields: Vec<TemplateField>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &CoordinateKey) -> Option<&TemplateField> {
        self.fields.iter().find(|f| &f.key == key)
    }

    /// Informational message for the empty result.
    pub fn message(&self) -> Option<&'static str> {
        self.is_empty().then_some("No template fields found in document")
    }
}

/// Scan every page with the configured marking predicate.
pub fn scan(doc: &TemplateDocument, options: &ScanOptions) -> Result<ScanResult> {
    let predicate = options.marking.build();
    scan_with(doc, predicate.as_ref(), options)
}

/// Scan every page with an explicit predicate.
pub fn scan_with(
    doc: &TemplateDocument,
    predicate: &dyn MarkingPredicate,
    options: &ScanOptions,
) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut seen = HashSet::new();
    let mut form_uses: HashMap<_, u32> = HashMap::new();

    for page in 0..doc.page_count() {
        let page_id = doc.page_id(page)?;
        let operations = doc.page_operations(page)?;
        let text = page_text(doc.inner(), &operations, page_resources(doc.inner(), page_id));
        for (form, uses) in text.form_uses {
            *form_uses.entry(form).or_default() += uses;
        }
        let runs = text.runs;

        let to_key_space = match options.key_space {
            KeySpace::User => Matrix::IDENTITY,
            KeySpace::Display => doc.display_matrix(page),
        };

        for group in coalesce(&runs, predicate, options) {
            let field = build_field(page, &group, &to_key_space, options);
            if seen.insert(field.key.clone()) {
                result.fields.push(field);
            } else {
                tracing::debug!(key = %field.key, "Duplicate field key dropped");
                result.warnings.push(ScanWarning::DuplicateKey {
                    key: field.key.to_string(),
                    text: field.original_text,
                });
            }
        }
    }

    for field in &mut result.fields {
        if let ContentSource::Form(id) = field.source {
            field.editable = form_uses.get(&id).copied() == Some(1);
        }
    }

    // stable: ties keep content order
    result
        .fields
        .sort_by_key(|f| (f.page, Reverse(f.key.y), f.key.x));
    Ok(result)
}

struct Group<'a> {
    runs: Vec<&'a TextRun>,
    label: String,
    text: String,
}

/// Group consecutive marked runs that continue each other on one baseline.
fn coalesce<'a>(
    runs: &'a [TextRun],
    predicate: &dyn MarkingPredicate,
    options: &ScanOptions,
) -> Vec<Group<'a>> {
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut open = false;

    for run in runs {
        // position-only runs (e.g. a bare `TJ [-500]`) carry no glyphs
        if run.text.is_empty() {
            continue;
        }
        let Some(marked) = predicate.classify(run) else {
            // whitespace between fields does not break a group
            if !run.text.trim().is_empty() {
                open = false;
            }
            continue;
        };

        if open {
            if let Some(group) = groups.last_mut() {
                let prev = group.runs[group.runs.len() - 1];
                if let Some(gap) = continuation_gap(prev, run, options) {
                    if gap > 0.2 * run.rendered_size()
                        && !group.text.ends_with(' ')
                        && !run.text.starts_with(' ')
                    {
                        group.text.push(' ');
                    }
                    group.text.push_str(&run.text);
                    group.runs.push(run);
                    continue;
                }
            }
        }

        if run.text.trim().is_empty() {
            open = false;
            continue;
        }
        groups.push(Group {
            runs: vec![run],
            label: marked.label,
            text: run.text.clone(),
        });
        open = true;
    }

    for group in &mut groups {
        group.text = group.text.trim_end().to_string();
    }
    groups
}

/// Gap along the baseline when `next` continues `prev`, `None` otherwise.
fn continuation_gap(prev: &TextRun, next: &TextRun, options: &ScanOptions) -> Option<f64> {
    if prev.source != next.source
        || prev.placement != next.placement
        || prev.state.font != next.state.font
        || (prev.rendered_size() - next.rendered_size()).abs() > 0.01
        || prev.color.distance(&next.color) > 1e-3
    {
        return None;
    }

    let scale = prev.matrix.scale_x();
    if scale <= f64::EPSILON {
        return None;
    }
    let (ux, uy) = (prev.matrix.a / scale, prev.matrix.b / scale);
    let (dx, dy) = (next.origin.0 - prev.end.0, next.origin.1 - prev.end.1);
    let along = dx * ux + dy * uy;
    let across = -dx * uy + dy * ux;

    (across.abs() <= options.baseline_tolerance && along.abs() <= options.coalesce_gap)
        .then_some(along)
}

fn build_field(page: u32, group: &Group<'_>, to_key_space: &Matrix, options: &ScanOptions) -> TemplateField {
    let first = group.runs[0];
    let last = group.runs[group.runs.len() - 1];

    let bbox = group
        .runs
        .iter()
        .skip(1)
        .fold(first.bbox, |acc, r| acc.union(&r.bbox));
    let width = ((last.end.0 - first.origin.0).powi(2) + (last.end.1 - first.origin.1).powi(2)).sqrt();

    let (kx, ky) = match options.key_space {
        KeySpace::User => first.origin,
        KeySpace::Display => to_key_space.apply(first.origin.0, first.origin.1),
    };

    TemplateField {
        key: CoordinateKey::encode(kx, ky, page, &group.label),
        page,
        bbox,
        font_name: first.base_font.clone(),
        font_resource: first.state.font.clone(),
        font_size: first.rendered_size(),
        color: first.color,
        original_text: group.text.clone(),
        origin: first.origin,
        width,
        state: first.state.clone(),
        matrix: first.matrix,
        segments: group
            .runs
            .iter()
            .map(|r| FieldSegment {
                op_index: r.op_index,
                operator: r.operator,
                advance: r.advance,
                state: r.state.clone(),
            })
            .collect(),
        source: first.source,
        placement: first.placement,
        editable: true,
    }
}
