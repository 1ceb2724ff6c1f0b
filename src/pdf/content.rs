//! Content stream interpretation.
//!
//! Walks page operators tracking the graphics and text state, and emits one
//! [`TextRun`] per text-showing operator with its position, style and extent
//! in device space. Form XObjects invoked with `Do` are followed, so text a
//! page draws through a form is reported like the page's own text.

use crate::pdf::fonts::{number, resolve, FontInfo, FontSet};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deepest chain of nested forms that is followed.
pub const MAX_FORM_DEPTH: usize = 8;

/// 2D affine matrix `[a b c d e f]` (row-vector convention, as in PDF).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Inverse transform, `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 {
            return None;
        }
        Some(Matrix {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    /// Bounding box of `rect` after the transform.
    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        Rect::from_points(&[
            self.apply(rect.x0, rect.y0),
            self.apply(rect.x1, rect.y0),
            self.apply(rect.x0, rect.y1),
            self.apply(rect.x1, rect.y1),
        ])
    }

    /// Length of the transformed unit x vector.
    pub fn scale_x(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Length of the transformed unit y vector.
    pub fn scale_y(&self) -> f64 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        let v: Vec<f64> = operands.iter().take(6).filter_map(number).collect();
        (v.len() == 6).then(|| Self::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }
}

/// Device RGB colour with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor::new(0.0, 0.0, 0.0);
    pub const WHITE: RgbColor = RgbColor::new(1.0, 1.0, 1.0);
    pub const RED: RgbColor = RgbColor::new(1.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn gray(v: f32) -> Self {
        Self::new(v, v, v)
    }

    pub fn from_cmyk(c: f32, m: f32, y: f32, k: f32) -> Self {
        Self::new((1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k))
    }

    /// Colour from 1 (gray), 3 (RGB) or 4 (CMYK) components.
    pub fn from_components(v: &[f32]) -> Option<Self> {
        match *v {
            [g] => Some(Self::gray(g)),
            [r, g, b] => Some(Self::new(r, g, b)),
            [c, m, y, k] => Some(Self::from_cmyk(c, m, y, k)),
            _ => None,
        }
    }

    /// Largest per-channel difference.
    pub fn distance(&self, other: &RgbColor) -> f32 {
        (self.r - other.r)
            .abs()
            .max((self.g - other.g).abs())
            .max((self.b - other.b).abs())
    }

    /// `#rrggbb`
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }
}

/// Axis-aligned rectangle in device space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let mut r = Rect {
            x0: f64::INFINITY,
            y0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y1: f64::NEG_INFINITY,
        };
        for &(x, y) in points {
            r.x0 = r.x0.min(x);
            r.y0 = r.y0.min(y);
            r.x1 = r.x1.max(x);
            r.y1 = r.y1.max(y);
        }
        r
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Text state parameters (part of the graphics state).
#[derive(Debug, Clone, PartialEq)]
pub struct TextState {
    /// Font resource name as used by `Tf`
    pub font: String,
    pub size: f64,
    pub char_spacing: f64,
    pub word_spacing: f64,
    /// `Tz / 100`
    pub horizontal_scale: f64,
    pub leading: f64,
    pub rise: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: String::new(),
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill: RgbColor,
    text: TextState,
}

/// Which operator showed a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOperator {
    /// `Tj`
    Show,
    /// `TJ`
    ShowArray,
    /// `'`
    NextLineShow,
    /// `"`
    SpacedNextLineShow,
}

/// Content stream an operator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentSource {
    /// The page's own content streams
    Page,
    /// A form XObject drawn from the page, directly or through other forms
    Form(ObjectId),
}

/// One text-showing operator, fully positioned.
#[derive(Debug, Clone)]
pub struct TextRun {
    pub source: ContentSource,
    /// Index of the operator in the decoded operation list of `source`
    pub op_index: usize,
    /// Maps the space of `source` to page user space
    pub placement: Matrix,
    pub operator: ShowOperator,
    pub text: String,
    pub base_font: String,
    /// Text state at the moment of showing (after `"` applied its spacing)
    pub state: TextState,
    pub color: RgbColor,
    /// Text space to device space at the run start (`Tm × CTM`)
    pub matrix: Matrix,
    /// Horizontal advance in unscaled text space units
    pub advance: f64,
    /// Device-space start and end of the run on its baseline
    pub origin: (f64, f64),
    pub end: (f64, f64),
    pub bbox: Rect,
}

impl TextRun {
    /// Font size as rendered on the page.
    pub fn rendered_size(&self) -> f64 {
        self.state.size * self.matrix.scale_y()
    }
}

/// Text runs of a page together with how often each form XObject was drawn.
#[derive(Debug, Default)]
pub struct PageText {
    pub runs: Vec<TextRun>,
    pub form_uses: HashMap<ObjectId, u32>,
}

/// Interpret operations without following XObjects, returning every text
/// run in content order.
pub fn text_runs(operations: &[Operation], fonts: &FontSet) -> Vec<TextRun> {
    let mut interpreter = Interpreter {
        doc: None,
        out: PageText::default(),
    };
    interpreter.run(operations, fonts, None, ContentSource::Page, GraphicsState::initial(), 0);
    interpreter.out.runs
}

/// Interpret a page's operations, descending into form XObjects found in
/// `resources`.
pub fn page_text(doc: &Document, operations: &[Operation], resources: Option<&Dictionary>) -> PageText {
    let fonts = resources
        .map(|r| FontSet::from_resources(doc, r))
        .unwrap_or_default();
    let mut interpreter = Interpreter {
        doc: Some(doc),
        out: PageText::default(),
    };
    interpreter.run(operations, &fonts, resources, ContentSource::Page, GraphicsState::initial(), 0);
    interpreter.out
}

impl GraphicsState {
    fn initial() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            fill: RgbColor::BLACK,
            text: TextState::default(),
        }
    }
}

/// A form XObject ready to be interpreted.
struct FormXObject<'d> {
    id: ObjectId,
    matrix: Matrix,
    resources: Option<&'d Dictionary>,
    operations: Vec<Operation>,
}

fn form_xobject<'d>(doc: &'d Document, resources: Option<&'d Dictionary>, name: &[u8]) -> Option<FormXObject<'d>> {
    let xobjects = resolve(doc, resources?.get(b"XObject").ok()?).as_dict().ok()?;
    let id = match xobjects.get(name).ok()? {
        Object::Reference(id) => *id,
        _ => return None,
    };
    let stream = doc.get_object(id).ok()?.as_stream().ok()?;
    if stream.dict.get(b"Subtype").and_then(Object::as_name).ok()? != b"Form".as_slice() {
        return None;
    }
    let matrix = stream
        .dict
        .get(b"Matrix")
        .ok()
        .and_then(|m| resolve(doc, m).as_array().ok())
        .and_then(|a| Matrix::from_operands(a))
        .unwrap_or(Matrix::IDENTITY);
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let operations = Content::decode(&data).ok()?.operations;
    let resources = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|r| resolve(doc, r).as_dict().ok());
    Some(FormXObject {
        id,
        matrix,
        resources,
        operations,
    })
}

struct Interpreter<'d> {
    doc: Option<&'d Document>,
    out: PageText,
}

impl<'d> Interpreter<'d> {
    fn run(
        &mut self,
        operations: &[Operation],
        fonts: &FontSet,
        resources: Option<&'d Dictionary>,
        source: ContentSource,
        initial: GraphicsState,
        depth: usize,
    ) {
        let fallback = FontInfo::helvetica();
        let placement = initial.ctm;
        let mut gs = initial;
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut lm = Matrix::IDENTITY;
        let mut in_text = false;

        for (op_index, op) in operations.iter().enumerate() {
            let nums: Vec<f64> = op.operands.iter().filter_map(number).collect();
            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(&op.operands) {
                        gs.ctm = m.then(&gs.ctm);
                    }
                }
                "g" | "rg" | "k" | "sc" | "scn" => {
                    let comps: Vec<f32> = nums.iter().map(|v| *v as f32).collect();
                    if let Some(color) = RgbColor::from_components(&comps) {
                        gs.fill = color;
                    }
                }
                "BT" => {
                    in_text = true;
                    tm = Matrix::IDENTITY;
                    lm = Matrix::IDENTITY;
                }
                "ET" => in_text = false,
                "Tf" => {
                    if let Some(Ok(name)) = op.operands.first().map(Object::as_name) {
                        gs.text.font = String::from_utf8_lossy(name).to_string();
                    }
                    if let Some(size) = op.operands.get(1).and_then(number) {
                        gs.text.size = size;
                    }
                }
                "Tc" => gs.text.char_spacing = nums.first().copied().unwrap_or(0.0),
                "Tw" => gs.text.word_spacing = nums.first().copied().unwrap_or(0.0),
                "Tz" => gs.text.horizontal_scale = nums.first().copied().unwrap_or(100.0) / 100.0,
                "TL" => gs.text.leading = nums.first().copied().unwrap_or(0.0),
                "Ts" => gs.text.rise = nums.first().copied().unwrap_or(0.0),
                "Td" | "TD" => {
                    if let [tx, ty, ..] = nums[..] {
                        if op.operator == "TD" {
                            gs.text.leading = -ty;
                        }
                        lm = Matrix::translate(tx, ty).then(&lm);
                        tm = lm;
                    }
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(&op.operands) {
                        lm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    lm = Matrix::translate(0.0, -gs.text.leading).then(&lm);
                    tm = lm;
                }
                "Tj" | "TJ" | "'" | "\"" if in_text => {
                    let operator = match op.operator.as_str() {
                        "Tj" => ShowOperator::Show,
                        "TJ" => ShowOperator::ShowArray,
                        "'" => ShowOperator::NextLineShow,
                        _ => ShowOperator::SpacedNextLineShow,
                    };
                    if operator == ShowOperator::SpacedNextLineShow {
                        if let [aw, ac, ..] = nums[..] {
                            gs.text.word_spacing = aw;
                            gs.text.char_spacing = ac;
                        }
                    }
                    if matches!(
                        operator,
                        ShowOperator::NextLineShow | ShowOperator::SpacedNextLineShow
                    ) {
                        lm = Matrix::translate(0.0, -gs.text.leading).then(&lm);
                        tm = lm;
                    }

                    let font = fonts.get(&gs.text.font).unwrap_or(&fallback);
                    let (text, advance) = show(op, operator, font, &gs.text);
                    let matrix = tm.then(&gs.ctm);
                    let rise = gs.text.rise;
                    let (lo, hi) = (
                        rise + font.descent * gs.text.size,
                        rise + font.ascent * gs.text.size,
                    );
                    let bbox = Rect::from_points(&[
                        matrix.apply(0.0, lo),
                        matrix.apply(advance, lo),
                        matrix.apply(0.0, hi),
                        matrix.apply(advance, hi),
                    ]);

                    self.out.runs.push(TextRun {
                        source,
                        op_index,
                        placement,
                        operator,
                        text,
                        base_font: font.base_font.clone(),
                        state: gs.text.clone(),
                        color: gs.fill,
                        matrix,
                        advance,
                        origin: matrix.apply(0.0, rise),
                        end: matrix.apply(advance, rise),
                        bbox,
                    });

                    tm = Matrix::translate(advance, 0.0).then(&tm);
                }
                "Do" => {
                    if let Some(Ok(name)) = op.operands.first().map(Object::as_name) {
                        self.draw_form(name, fonts, resources, &gs, depth);
                    }
                }
                _ => {}
            }
        }
    }

    fn draw_form(
        &mut self,
        name: &[u8],
        fonts: &FontSet,
        resources: Option<&'d Dictionary>,
        gs: &GraphicsState,
        depth: usize,
    ) {
        let Some(doc) = self.doc else { return };
        let Some(form) = form_xobject(doc, resources, name) else {
            return;
        };
        if depth >= MAX_FORM_DEPTH {
            tracing::debug!(form = ?form.id, depth, "Form nesting too deep, not followed");
            return;
        }
        *self.out.form_uses.entry(form.id).or_default() += 1;

        // a form without resources uses those of its caller
        let form_fonts;
        let fonts = match form.resources {
            Some(r) => {
                form_fonts = FontSet::from_resources(doc, r);
                &form_fonts
            }
            None => fonts,
        };
        let mut inner = gs.clone();
        inner.ctm = form.matrix.then(&gs.ctm);
        self.run(
            &form.operations,
            fonts,
            form.resources.or(resources),
            ContentSource::Form(form.id),
            inner,
            depth + 1,
        );
    }
}

/// Decode the shown strings and compute the horizontal advance.
fn show(op: &Operation, operator: ShowOperator, font: &FontInfo, ts: &TextState) -> (String, f64) {
    let string_operand = match operator {
        ShowOperator::SpacedNextLineShow => op.operands.get(2),
        _ => op.operands.first(),
    };
    let mut text = String::new();
    let mut advance = 0.0;

    let show_bytes = |bytes: &[u8], text: &mut String, advance: &mut f64| {
        for glyph in font.decode(bytes) {
            text.push_str(&glyph.text);
            let mut w = glyph.width * ts.size + ts.char_spacing;
            if glyph.is_word_space {
                w += ts.word_spacing;
            }
            *advance += w * ts.horizontal_scale;
        }
    };

    match (operator, string_operand) {
        (ShowOperator::ShowArray, Some(Object::Array(items))) => {
            for item in items {
                match item {
                    Object::String(bytes, _) => show_bytes(bytes, &mut text, &mut advance),
                    other => {
                        if let Some(n) = number(other) {
                            advance -= n / 1000.0 * ts.size * ts.horizontal_scale;
                            if n < -250.0 && !text.is_empty() && !text.ends_with(' ') {
                                text.push(' ');
                            }
                        }
                    }
                }
            }
        }
        (_, Some(Object::String(bytes, _))) => show_bytes(bytes, &mut text, &mut advance),
        _ => {}
    }

    (text, advance)
}
