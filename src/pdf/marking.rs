//! Marking predicates decide which text runs are template fields.
//!
//! The scanner only sees the [`MarkingPredicate`] trait, so new conventions
//! (a colour palette, a dedicated font, bracket syntax) plug in without
//! touching the scan algorithm. [`MarkingConfig`] is the serializable form
//! used by the server configuration.

use crate::pdf::content::{RgbColor, TextRun};
use crate::pdf::key::is_valid_label;
use serde::{Deserialize, Serialize};

/// Result of classifying a run as a field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Marked {
    /// Label to embed in the coordinate key (empty for none)
    pub label: String,
}

/// Capability: given a text run's style and content, decide field-or-not.
pub trait MarkingPredicate: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// `Some` when the run is part of a template field.
    fn classify(&self, run: &TextRun) -> Option<Marked>;
}

/// Fill colour close to pure red.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedMarking {
    pub min_red: f32,
    pub max_green: f32,
    pub max_blue: f32,
}

impl Default for RedMarking {
    fn default() -> Self {
        Self {
            min_red: 0.5,
            max_green: 0.3,
            max_blue: 0.3,
        }
    }
}

impl MarkingPredicate for RedMarking {
    fn name(&self) -> &'static str {
        "red"
    }

    fn classify(&self, run: &TextRun) -> Option<Marked> {
        let c = run.color;
        (c.r > self.min_red && c.g < self.max_green && c.b < self.max_blue)
            .then(Marked::default)
    }
}

/// Fill colour within `tolerance` (per channel) of any listed colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSetMarking {
    pub colors: Vec<RgbColor>,
    #[serde(default = "default_color_tolerance")]
    pub tolerance: f32,
}

fn default_color_tolerance() -> f32 {
    0.05
}

impl MarkingPredicate for ColorSetMarking {
    fn name(&self) -> &'static str {
        "color_set"
    }

    fn classify(&self, run: &TextRun) -> Option<Marked> {
        self.colors
            .iter()
            .any(|c| c.distance(&run.color) <= self.tolerance)
            .then(Marked::default)
    }
}

/// Base font name contains one of the listed fragments (case-insensitive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontMarking {
    pub fonts: Vec<String>,
}

impl MarkingPredicate for FontMarking {
    fn name(&self) -> &'static str {
        "font"
    }

    fn classify(&self, run: &TextRun) -> Option<Marked> {
        let base = run.base_font.to_ascii_lowercase();
        self.fonts
            .iter()
            .any(|f| base.contains(&f.to_ascii_lowercase()))
            .then(Marked::default)
    }
}

/// Text written as `{{label}}`; the inner token becomes the key label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BracketMarking;

impl MarkingPredicate for BracketMarking {
    fn name(&self) -> &'static str {
        "bracket"
    }

    fn classify(&self, run: &TextRun) -> Option<Marked> {
        let inner = run
            .text
            .trim()
            .strip_prefix("{{")?
            .strip_suffix("}}")?
            .trim();
        let label = if is_valid_label(inner) {
            inner.to_string()
        } else {
            String::new()
        };
        Some(Marked { label })
    }
}

/// Serializable choice of marking predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkingConfig {
    Red(RedMarking),
    ColorSet(ColorSetMarking),
    Font(FontMarking),
    Bracket,
}

impl Default for MarkingConfig {
    fn default() -> Self {
        MarkingConfig::Red(RedMarking::default())
    }
}

impl MarkingConfig {
    pub fn build(&self) -> Box<dyn MarkingPredicate> {
        match self {
            MarkingConfig::Red(m) => Box::new(*m),
            MarkingConfig::ColorSet(m) => Box::new(m.clone()),
            MarkingConfig::Font(m) => Box::new(m.clone()),
            MarkingConfig::Bracket => Box::new(BracketMarking),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::content::{ContentSource, Matrix, Rect, ShowOperator, TextState};

    fn run(text: &str, color: RgbColor, base_font: &str) -> TextRun {
        TextRun {
            source: ContentSource::Page,
            op_index: 0,
            placement: Matrix::IDENTITY,
            operator: ShowOperator::Show,
            text: text.to_string(),
            base_font: base_font.to_string(),
            state: TextState::default(),
            color,
            matrix: Matrix::IDENTITY,
            advance: 0.0,
            origin: (0.0, 0.0),
            end: (0.0, 0.0),
            bbox: Rect {
                x0: 0.0,
                y0: 0.0,
                x1: 0.0,
                y1: 0.0,
            },
        }
    }

    #[test]
    fn test_red_thresholds() {
        let red = RedMarking::default();
        assert!(red.classify(&run("x", RgbColor::RED, "Helvetica")).is_some());
        assert!(red
            .classify(&run("x", RgbColor::new(0.8, 0.1, 0.2), "Helvetica"))
            .is_some());
        assert!(red.classify(&run("x", RgbColor::BLACK, "Helvetica")).is_none());
        // orange is not red
        assert!(red
            .classify(&run("x", RgbColor::new(1.0, 0.5, 0.0), "Helvetica"))
            .is_none());
    }

    #[test]
    fn test_color_set_tolerance() {
        let blue = RgbColor::new(0.0, 0.0, 1.0);
        let marking = ColorSetMarking {
            colors: vec![blue],
            tolerance: 0.1,
        };
        assert!(marking
            .classify(&run("x", RgbColor::new(0.05, 0.0, 0.95), "F"))
            .is_some());
        assert!(marking.classify(&run("x", RgbColor::RED, "F")).is_none());
    }

    #[test]
    fn test_font_marking_case_insensitive() {
        let marking = FontMarking {
            fonts: vec!["courier".to_string()],
        };
        assert!(marking
            .classify(&run("x", RgbColor::BLACK, "ABCDEF+Courier-Bold"))
            .is_some());
        assert!(marking
            .classify(&run("x", RgbColor::BLACK, "Helvetica"))
            .is_none());
    }

    #[test]
    fn test_bracket_marking_label() {
        let marked = BracketMarking
            .classify(&run("{{ customer_name }}", RgbColor::BLACK, "F"))
            .unwrap();
        assert_eq!(marked.label, "customer_name");

        let unlabeled = BracketMarking
            .classify(&run("{{two words}}", RgbColor::BLACK, "F"))
            .unwrap();
        assert_eq!(unlabeled.label, "");

        assert!(BracketMarking
            .classify(&run("plain", RgbColor::BLACK, "F"))
            .is_none());
    }

    #[test]
    fn test_marking_config_from_json() {
        let config: MarkingConfig = serde_json::from_str(r#"{"kind": "bracket"}"#).unwrap();
        assert_eq!(config.build().name(), "bracket");

        let config: MarkingConfig = serde_json::from_str(
            r#"{"kind": "color_set", "colors": [{"r": 0.0, "g": 0.0, "b": 1.0}]}"#,
        )
        .unwrap();
        assert_eq!(config.build().name(), "color_set");

        assert_eq!(MarkingConfig::default().build().name(), "red");
    }
}
