//! Replacement engine: swaps field values inside page content streams.
//!
//! Fields drawn through a form XObject are edited inside that form's stream,
//! in the form's own coordinate space.
//!
//! For every edited field the glyph-showing operators are replaced by
//! position-only `TJ` adjustments, so the old value leaves the content stream
//! while the text that follows it on the line keeps its place. The original
//! content is then wrapped in `q … Q`, and for each field an opaque mask and
//! the new value are drawn on top with the field's own font, size, colour and
//! text matrix.
//!
//! All edits are applied to the in-memory [`TemplateDocument`]; nothing here
//! touches the filesystem.

use crate::error::{Error, Result};
use crate::pdf::content::{ContentSource, Matrix, Rect, RgbColor, ShowOperator};
use crate::pdf::document::TemplateDocument;
use crate::pdf::fonts::{page_resources, resolve, winansi_byte, FontInfo, FontSet};
use crate::pdf::scanner::{FieldSegment, TemplateField};
use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Object, StringFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What to do when a new value is wider than the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reduce the font size, down to `min_scale` × the original size
    Shrink {
        #[serde(default = "default_min_scale")]
        min_scale: f64,
    },
    /// Draw at full size, clipped to the field box
    Clip,
    /// Draw at full size past the field box
    Allow,
}

fn default_min_scale() -> f64 {
    0.5
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Shrink {
            min_scale: default_min_scale(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaceOptions {
    pub overflow: OverflowPolicy,
    /// Fill drawn over the old value; `None` draws no mask
    pub mask_color: Option<RgbColor>,
    /// Colour for new values; `None` keeps the field colour
    pub text_color: Option<RgbColor>,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::default(),
            mask_color: Some(RgbColor::WHITE),
            text_color: None,
        }
    }
}

/// How an overflowing value was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverflowAction {
    /// Font size reduced until the value fit
    Shrunk,
    /// Font size reduced to the minimum and the value still overflows
    ShrunkToMinimum,
    Clipped,
    Allowed,
}

/// A value rendered wider than its field.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FieldOverflow {
    pub key: String,
    pub natural_width: f64,
    pub available_width: f64,
    pub action: OverflowAction,
    pub font_size: f64,
}

/// Non-fatal notes about one edit.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum EditWarning {
    /// The field font cannot encode the value; Helvetica was used instead
    FontFallback { key: String, font: String },
    /// Characters replaced by `?`
    UnencodableCharacters { key: String, characters: String },
}

/// One field and its new value.
#[derive(Debug, Clone, Copy)]
pub struct Edit<'a> {
    pub field: &'a TemplateField,
    pub value: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub key: String,
    pub overflow: Option<FieldOverflow>,
    pub warnings: Vec<EditWarning>,
}

/// Apply all edits to the document in memory.
///
/// Fails without partial effect on the caller's file; on error the document
/// handle itself may hold a half-edited state and should be dropped.
pub fn apply(doc: &mut TemplateDocument, edits: &[Edit<'_>], options: &ReplaceOptions) -> Result<Vec<EditOutcome>> {
    let mut by_stream: BTreeMap<(u32, ContentSource), Vec<usize>> = BTreeMap::new();
    for (i, edit) in edits.iter().enumerate() {
        if !edit.field.editable {
            return Err(Error::Edit {
                reason: format!("field {} is drawn by a form used more than once", edit.field.key),
            });
        }
        by_stream
            .entry((edit.field.page, edit.field.source))
            .or_default()
            .push(i);
    }

    let mut outcomes: Vec<Option<EditOutcome>> = vec![None; edits.len()];
    for ((page, source), indices) in by_stream {
        let stream_edits: Vec<Edit<'_>> = indices.iter().map(|&i| edits[i]).collect();
        let stream_outcomes = apply_stream(doc, page, source, &stream_edits, options)?;
        for (i, outcome) in indices.into_iter().zip(stream_outcomes) {
            outcomes[i] = Some(outcome);
        }
    }

    Ok(outcomes.into_iter().flatten().collect())
}

/// Field geometry in the space of its content stream.
struct LocalGeometry {
    matrix: Matrix,
    bbox: Rect,
}

fn local_geometry(field: &TemplateField) -> Result<LocalGeometry> {
    let to_local = field.placement.inverse().ok_or_else(|| Error::Edit {
        reason: format!("field {} is drawn through a singular matrix", field.key),
    })?;
    Ok(LocalGeometry {
        matrix: field.matrix.then(&to_local),
        bbox: to_local.apply_rect(&field.bbox),
    })
}

fn apply_stream(
    doc: &mut TemplateDocument,
    page: u32,
    source: ContentSource,
    edits: &[Edit<'_>],
    options: &ReplaceOptions,
) -> Result<Vec<EditOutcome>> {
    let page_id = doc.page_id(page)?;
    let (operations, fonts, place) = match source {
        ContentSource::Page => (
            doc.page_operations(page)?,
            FontSet::for_page(doc.inner(), page_id),
            format!("page {}", page),
        ),
        ContentSource::Form(id) => (
            doc.form_operations(id)?,
            match doc.form_resources(id) {
                Some(resources) => FontSet::from_resources(doc.inner(), resources),
                None => FontSet::for_page(doc.inner(), page_id),
            },
            format!("form {} {} on page {}", id.0, id.1, page),
        ),
    };

    let mut substitutes: HashMap<usize, Vec<Operation>> = HashMap::new();
    for edit in edits {
        for segment in &edit.field.segments {
            let original = operations.get(segment.op_index).ok_or_else(|| Error::Edit {
                reason: format!("field {} refers past the end of {}", edit.field.key, place),
            })?;
            if original.operator != operator_name(segment.operator) {
                return Err(Error::Edit {
                    reason: format!("field {} no longer matches {} content", edit.field.key, place),
                });
            }
            substitutes
                .entry(segment.op_index)
                .or_insert_with(|| neutralize(segment, original));
        }
    }

    let mut rebuilt = Vec::with_capacity(operations.len() + 2 + edits.len() * 16);
    rebuilt.push(Operation::new("q", vec![]));
    for (i, op) in operations.into_iter().enumerate() {
        match substitutes.remove(&i) {
            Some(ops) => rebuilt.extend(ops),
            None => rebuilt.push(op),
        }
    }
    rebuilt.push(Operation::new("Q", vec![]));

    let mut fallback_resource: Option<String> = None;
    let mut outcomes = Vec::with_capacity(edits.len());
    for edit in edits {
        let field = edit.field;
        let key = field.key.to_string();
        let local = local_geometry(field)?;
        let mut warnings = Vec::new();

        if let Some(mask) = options.mask_color {
            rebuilt.extend(mask_ops(&local.bbox, mask));
        }

        let value = sanitize(edit.value);
        if value.trim().is_empty() {
            tracing::debug!(key = %key, "Field erased");
            outcomes.push(EditOutcome {
                key,
                overflow: None,
                warnings,
            });
            continue;
        }

        let font = fonts
            .get(&field.font_resource)
            .cloned()
            .unwrap_or_else(FontInfo::helvetica);
        let (resource, font, bytes) = match font.encode(&value) {
            Some(bytes) => (field.font_resource.clone(), font, bytes),
            None => {
                let resource = match &fallback_resource {
                    Some(name) => name.clone(),
                    None => {
                        let name = add_fallback_font(doc, page, source)?;
                        fallback_resource = Some(name.clone());
                        name
                    }
                };
                warnings.push(EditWarning::FontFallback {
                    key: key.clone(),
                    font: field.font_name.clone(),
                });
                let (bytes, missing) = encode_winansi_lossy(&value);
                if !missing.is_empty() {
                    warnings.push(EditWarning::UnencodableCharacters {
                        key: key.clone(),
                        characters: missing,
                    });
                }
                (resource, FontInfo::helvetica(), bytes)
            }
        };

        let layout = fit(field, &font, &bytes, &options.overflow);
        if let Some(overflow) = &layout.overflow {
            tracing::info!(
                key = %key,
                natural_width = overflow.natural_width,
                available_width = overflow.available_width,
                action = ?overflow.action,
                "Field value overflows"
            );
        }

        let color = options.text_color.unwrap_or(field.color);
        let clip = layout.clip.then_some(local.bbox);
        rebuilt.extend(draw_ops(field, &local.matrix, &resource, layout.font_size, color, bytes, clip));
        outcomes.push(EditOutcome {
            key,
            overflow: layout.overflow,
            warnings,
        });
    }

    match source {
        ContentSource::Page => doc.set_page_operations(page, rebuilt)?,
        ContentSource::Form(id) => doc.set_form_operations(id, rebuilt)?,
    }
    Ok(outcomes)
}

fn operator_name(operator: ShowOperator) -> &'static str {
    match operator {
        ShowOperator::Show => "Tj",
        ShowOperator::ShowArray => "TJ",
        ShowOperator::NextLineShow => "'",
        ShowOperator::SpacedNextLineShow => "\"",
    }
}

/// Operators that move the text position exactly like `original` without
/// painting anything.
fn neutralize(segment: &FieldSegment, original: &Operation) -> Vec<Operation> {
    let scale = segment.state.size * segment.state.horizontal_scale;
    let adjustment = if scale.abs() > f64::EPSILON {
        -segment.advance * 1000.0 / scale
    } else {
        0.0
    };
    let shift = Operation::new("TJ", vec![Object::Array(vec![real(adjustment)])]);

    match segment.operator {
        ShowOperator::Show | ShowOperator::ShowArray => vec![shift],
        ShowOperator::NextLineShow => vec![Operation::new("T*", vec![]), shift],
        ShowOperator::SpacedNextLineShow => {
            let mut ops = Vec::with_capacity(4);
            if let [aw, ac, ..] = &original.operands[..] {
                ops.push(Operation::new("Tw", vec![aw.clone()]));
                ops.push(Operation::new("Tc", vec![ac.clone()]));
            }
            ops.push(Operation::new("T*", vec![]));
            ops.push(shift);
            ops
        }
    }
}

fn mask_ops(bbox: &Rect, color: RgbColor) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new("rg", color_operands(color)),
        Operation::new("re", rect_operands(bbox)),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ]
}

struct Layout {
    font_size: f64,
    /// Draw inside the field box only
    clip: bool,
    overflow: Option<FieldOverflow>,
}

/// Choose the drawing size for a value according to the overflow policy.
fn fit(field: &TemplateField, font: &FontInfo, bytes: &[u8], policy: &OverflowPolicy) -> Layout {
    let state = &field.state;
    let size = state.size;
    let device_scale = field.matrix.scale_x() * state.horizontal_scale;

    let glyph_em = font.measure(bytes, 0.0, 0.0);
    let spacing: f64 = font
        .decode(bytes)
        .iter()
        .map(|g| state.char_spacing + if g.is_word_space { state.word_spacing } else { 0.0 })
        .sum();
    let width_at = |s: f64| (glyph_em * s + spacing) * device_scale;

    let natural = width_at(size);
    let available = field.width;
    let mut layout = Layout {
        font_size: size,
        clip: false,
        overflow: None,
    };
    if natural <= available + 0.01 {
        return layout;
    }

    let action = match *policy {
        OverflowPolicy::Shrink { min_scale } => {
            let min_size = size * min_scale.clamp(0.0, 1.0);
            let fitting = if glyph_em > 0.0 && device_scale > 0.0 {
                (available / device_scale - spacing) / glyph_em
            } else {
                0.0
            };
            if fitting >= min_size {
                layout.font_size = fitting.min(size);
                OverflowAction::Shrunk
            } else {
                layout.font_size = min_size;
                OverflowAction::ShrunkToMinimum
            }
        }
        OverflowPolicy::Clip => {
            layout.clip = true;
            OverflowAction::Clipped
        }
        OverflowPolicy::Allow => OverflowAction::Allowed,
    };

    let rendered_ratio = if size.abs() > f64::EPSILON {
        field.font_size / size
    } else {
        1.0
    };
    layout.overflow = Some(FieldOverflow {
        key: field.key.to_string(),
        natural_width: natural,
        available_width: available,
        action,
        font_size: layout.font_size * rendered_ratio,
    });
    layout
}

fn draw_ops(
    field: &TemplateField,
    matrix: &Matrix,
    resource: &str,
    font_size: f64,
    color: RgbColor,
    bytes: Vec<u8>,
    clip: Option<Rect>,
) -> Vec<Operation> {
    let state = &field.state;
    let Matrix { a, b, c, d, e, f } = *matrix;

    let mut ops = vec![Operation::new("q", vec![])];
    if let Some(rect) = clip {
        ops.push(Operation::new("re", rect_operands(&rect)));
        ops.push(Operation::new("W", vec![]));
        ops.push(Operation::new("n", vec![]));
    }
    ops.extend([
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(resource.as_bytes().to_vec()), real(font_size)]),
        Operation::new("rg", color_operands(color)),
        Operation::new("Tc", vec![real(state.char_spacing)]),
        Operation::new("Tw", vec![real(state.word_spacing)]),
        Operation::new("Tz", vec![real(state.horizontal_scale * 100.0)]),
        Operation::new("Ts", vec![real(state.rise)]),
        Operation::new("Tm", vec![real(a), real(b), real(c), real(d), real(e), real(f)]),
        Operation::new("Tj", vec![Object::String(bytes, StringFormat::Hexadecimal)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]);
    ops
}

/// Add a Helvetica resource to the content stream's resources and return
/// its name.
fn add_fallback_font(doc: &mut TemplateDocument, page: u32, source: ContentSource) -> Result<String> {
    let page_id = doc.page_id(page)?;
    let inner = doc.inner();
    let current = match source {
        ContentSource::Page => page_resources(inner, page_id),
        // a form without resources draws with its page's
        ContentSource::Form(id) => doc.form_resources(id).or_else(|| page_resources(inner, page_id)),
    };
    let mut resources = current.cloned().unwrap_or_default();
    let mut fonts: Dictionary = resources
        .get(b"Font")
        .ok()
        .and_then(|o| resolve(inner, o).as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut name = "FTpl".to_string();
    let mut n = 0;
    while fonts.has(name.as_bytes()) {
        n += 1;
        name = format!("FTpl{}", n);
    }

    let font_id = doc.inner_mut().add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    fonts.set(name.clone(), Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let owner = match source {
        ContentSource::Page => doc
            .inner_mut()
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| Error::Edit {
                reason: format!("page {} dictionary: {}", page, e),
            })?,
        ContentSource::Form(id) => &mut doc.form_stream_mut(id)?.dict,
    };
    owner.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Control characters become spaces.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// WinAnsi bytes with `?` for unmappable characters, and those characters.
fn encode_winansi_lossy(value: &str) -> (Vec<u8>, String) {
    let mut missing = String::new();
    let bytes = value
        .chars()
        .map(|ch| {
            winansi_byte(ch).unwrap_or_else(|| {
                if !missing.contains(ch) {
                    missing.push(ch);
                }
                b'?'
            })
        })
        .collect();
    (bytes, missing)
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}

fn color_operands(color: RgbColor) -> Vec<Object> {
    vec![
        Object::Real(color.r),
        Object::Real(color.g),
        Object::Real(color.b),
    ]
}

fn rect_operands(rect: &Rect) -> Vec<Object> {
    vec![
        real(rect.x0),
        real(rect.y0),
        real(rect.width()),
        real(rect.height()),
    ]
}
