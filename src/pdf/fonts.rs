//! Font resources: glyph widths, byte decoding and re-encoding.
//!
//! Simple fonts are read as single-byte WinAnsi; composite (Type0) fonts as
//! two-byte codes mapped through their ToUnicode CMap. When a font carries no
//! width table the standard Helvetica/Courier metrics are used.

use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;

/// One decoded glyph of a shown string.
#[derive(Debug, Clone)]
pub struct Glyph {
    /// Unicode text for the glyph (may be empty for unmapped codes)
    pub text: String,
    /// Advance width in em units (1.0 = font size)
    pub width: f64,
    /// Single-byte code 32, which receives word spacing
    pub is_word_space: bool,
}

/// Metrics and codec for one font resource.
#[derive(Debug, Clone)]
pub struct FontInfo {
    pub base_font: String,
    composite: bool,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: HashMap<u32, f64>,
    default_width: f64,
    /// Ascent/descent in em units
    pub ascent: f64,
    pub descent: f64,
    to_unicode: Option<ToUnicodeMap>,
}

impl FontInfo {
    /// Built-in Helvetica with WinAnsi encoding.
    pub fn helvetica() -> Self {
        Self {
            base_font: "Helvetica".to_string(),
            composite: false,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: HashMap::new(),
            default_width: 0.0,
            ascent: 0.718,
            descent: -0.207,
            to_unicode: None,
        }
    }

    /// Read a font dictionary, following references through `doc`.
    pub fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let base_font = dict
            .get(b"BaseFont")
            .ok()
            .and_then(|o| resolve(doc, o).as_name().ok())
            .map(|n| String::from_utf8_lossy(n).to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let subtype = dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .unwrap_or_default();
        let composite = subtype == b"Type0";

        let to_unicode = dict
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| resolve(doc, o).as_stream().ok())
            .and_then(|s| s.decompressed_content().ok().or_else(|| Some(s.content.clone())))
            .and_then(|bytes| ToUnicodeMap::parse(&bytes));

        let mut info = Self {
            base_font,
            composite,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: HashMap::new(),
            default_width: 0.0,
            ascent: 0.718,
            descent: -0.207,
            to_unicode,
        };

        if composite {
            let descendant = dict
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|a| a.first())
                .and_then(|o| resolve(doc, o).as_dict().ok());
            if let Some(cid_font) = descendant {
                info.default_width = cid_font
                    .get(b"DW")
                    .ok()
                    .and_then(|o| number(resolve(doc, o)))
                    .unwrap_or(1000.0)
                    / 1000.0;
                if let Ok(w) = cid_font.get(b"W") {
                    if let Ok(array) = resolve(doc, w).as_array() {
                        info.cid_widths = parse_cid_widths(doc, array);
                    }
                }
                info.read_descriptor(doc, cid_font);
            } else {
                info.default_width = 1.0;
            }
        } else {
            info.first_char = dict
                .get(b"FirstChar")
                .ok()
                .and_then(|o| number(resolve(doc, o)))
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(0);
            if let Ok(w) = dict.get(b"Widths") {
                if let Ok(array) = resolve(doc, w).as_array() {
                    info.widths = array
                        .iter()
                        .map(|o| number(resolve(doc, o)).unwrap_or(0.0) / 1000.0)
                        .collect();
                }
            }
            info.read_descriptor(doc, dict);
        }

        info
    }

    fn read_descriptor(&mut self, doc: &Document, dict: &Dictionary) {
        let Some(descriptor) = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
        else {
            return;
        };
        let field = |name: &[u8]| {
            descriptor
                .get(name)
                .ok()
                .and_then(|o| number(resolve(doc, o)))
        };
        if let Some(ascent) = field(b"Ascent").filter(|a| *a > 0.0) {
            self.ascent = ascent / 1000.0;
        }
        if let Some(descent) = field(b"Descent").filter(|d| *d < 0.0) {
            self.descent = descent / 1000.0;
        }
        if !self.composite {
            if let Some(missing) = field(b"MissingWidth").filter(|m| *m > 0.0) {
                self.default_width = missing / 1000.0;
            }
        }
    }

    /// Whether codes are two bytes wide.
    pub fn is_composite(&self) -> bool {
        self.composite
    }

    /// Split a shown string into glyphs.
    pub fn decode(&self, bytes: &[u8]) -> Vec<Glyph> {
        if self.composite {
            bytes
                .chunks(2)
                .map(|pair| {
                    let code = pair.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                    Glyph {
                        text: self
                            .to_unicode
                            .as_ref()
                            .and_then(|m| m.get(code))
                            .unwrap_or_default(),
                        width: self
                            .cid_widths
                            .get(&code)
                            .copied()
                            .unwrap_or(self.default_width),
                        is_word_space: false,
                    }
                })
                .collect()
        } else {
            bytes
                .iter()
                .map(|&b| {
                    let code = u32::from(b);
                    let text = self
                        .to_unicode
                        .as_ref()
                        .and_then(|m| m.get(code))
                        .unwrap_or_else(|| winansi_char(b).map(String::from).unwrap_or_default());
                    Glyph {
                        text,
                        width: self.simple_width(code),
                        is_word_space: b == b' ',
                    }
                })
                .collect()
        }
    }

    fn simple_width(&self, code: u32) -> f64 {
        code.checked_sub(self.first_char)
            .and_then(|i| self.widths.get(i as usize))
            .copied()
            .filter(|w| *w > 0.0)
            .unwrap_or_else(|| {
                if self.default_width > 0.0 && !self.widths.is_empty() {
                    self.default_width
                } else {
                    standard_width(&self.base_font, code)
                }
            })
    }

    /// Encode text as string bytes for this font. Returns `None` when some
    /// character has no code in the font.
    pub fn encode(&self, text: &str) -> Option<Vec<u8>> {
        if let Some(map) = &self.to_unicode {
            let mut out = Vec::new();
            for ch in text.chars() {
                let code = map.code_for(ch)?;
                if self.composite {
                    out.extend_from_slice(&(code as u16).to_be_bytes());
                } else {
                    out.push(u8::try_from(code).ok()?);
                }
            }
            return Some(out);
        }
        if self.composite {
            return None;
        }
        text.chars().map(winansi_byte).collect()
    }

    /// Width of encoded bytes in em units, including spacing parameters
    /// expressed per em (`char_spacing` and `word_spacing` divided by size).
    pub fn measure(&self, bytes: &[u8], char_spacing_em: f64, word_spacing_em: f64) -> f64 {
        self.decode(bytes)
            .iter()
            .map(|g| {
                g.width + char_spacing_em + if g.is_word_space { word_spacing_em } else { 0.0 }
            })
            .sum()
    }
}

/// Font resources of one content stream, keyed by resource name.
#[derive(Debug, Clone, Default)]
pub struct FontSet {
    fonts: HashMap<String, FontInfo>,
}

impl FontSet {
    /// Collect the fonts visible to a page (own or inherited resources).
    pub fn for_page(doc: &Document, page_id: ObjectId) -> Self {
        page_resources(doc, page_id)
            .map(|r| Self::from_resources(doc, r))
            .unwrap_or_default()
    }

    /// Collect the `/Font` entries of a resource dictionary.
    pub fn from_resources(doc: &Document, resources: &Dictionary) -> Self {
        let mut fonts = HashMap::new();
        if let Some(font_dict) = resources
            .get(b"Font")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
        {
            for (name, value) in font_dict.iter() {
                if let Ok(dict) = resolve(doc, value).as_dict() {
                    fonts.insert(
                        String::from_utf8_lossy(name).to_string(),
                        FontInfo::from_dict(doc, dict),
                    );
                }
            }
        }
        Self { fonts }
    }

    pub fn get(&self, name: &str) -> Option<&FontInfo> {
        self.fonts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fonts.contains_key(name)
    }

    pub fn insert(&mut self, name: String, info: FontInfo) {
        self.fonts.insert(name, info);
    }
}

/// Follow indirect references until a direct object is reached.
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..16 {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(next) => obj = next,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// Numeric value of an integer or real object.
pub fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// The resource dictionary of a page, walking up `/Parent` for inherited resources.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..32 {
        if let Ok(res) = node.get(b"Resources") {
            return resolve(doc, res).as_dict().ok();
        }
        node = resolve(doc, node.get(b"Parent").ok()?).as_dict().ok()?;
    }
    None
}

fn parse_cid_widths(doc: &Document, array: &[Object]) -> HashMap<u32, f64> {
    let mut widths = HashMap::new();
    let mut i = 0;
    while i < array.len() {
        let Some(first) = number(resolve(doc, &array[i])) else {
            break;
        };
        let first = first as u32;
        match array.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    if let Some(w) = number(resolve(doc, w)) {
                        if let Some(code) = first.checked_add(offset as u32) {
                            widths.insert(code, w / 1000.0);
                        }
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (
                    number(last),
                    array.get(i + 2).and_then(|o| number(resolve(doc, o))),
                ) else {
                    break;
                };
                for code in first..=(last as u32).min(first.saturating_add(0xFFFF)) {
                    widths.insert(code, w / 1000.0);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

/// Code ⇄ Unicode mapping parsed from a ToUnicode CMap (`bfchar`/`bfrange`).
#[derive(Debug, Clone, Default)]
pub struct ToUnicodeMap {
    chars: HashMap<u32, String>,
    reverse: HashMap<char, u32>,
}

impl ToUnicodeMap {
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut map = Self::default();

        for section in sections(&text, "beginbfchar", "endbfchar") {
            let tokens = tokenize(section);
            for pair in tokens.chunks(2) {
                if let [CMapToken::Hex(src), CMapToken::Hex(dst)] = pair {
                    map.insert(hex_code(src), utf16_hex(dst));
                }
            }
        }

        for section in sections(&text, "beginbfrange", "endbfrange") {
            let tokens = tokenize(section);
            let mut i = 0;
            while i + 2 < tokens.len() {
                match (&tokens[i], &tokens[i + 1], &tokens[i + 2]) {
                    (CMapToken::Hex(lo), CMapToken::Hex(hi), CMapToken::Hex(dst)) => {
                        let (lo, hi) = (hex_code(lo), hex_code(hi));
                        let base = utf16_hex(dst);
                        if let Some(first) = base.chars().next() {
                            let prefix: String = base.chars().take(base.chars().count() - 1).collect();
                            let last = base.chars().last().unwrap_or(first);
                            for (n, code) in (lo..=hi.min(lo.saturating_add(0xFFFF))).enumerate() {
                                let ch = (last as u32).checked_add(n as u32).and_then(char::from_u32);
                                if let Some(ch) = ch {
                                    map.insert(code, format!("{}{}", prefix, ch));
                                }
                            }
                        }
                    }
                    (CMapToken::Hex(lo), CMapToken::Hex(_), CMapToken::Array(dsts)) => {
                        let lo = hex_code(lo);
                        for (n, dst) in dsts.iter().enumerate() {
                            if let Some(code) = lo.checked_add(n as u32) {
                                map.insert(code, utf16_hex(dst));
                            }
                        }
                    }
                    _ => {}
                }
                i += 3;
            }
        }

        if map.chars.is_empty() {
            None
        } else {
            Some(map)
        }
    }

    fn insert(&mut self, code: u32, text: String) {
        let mut chars = text.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            self.reverse.entry(ch).or_insert(code);
        }
        self.chars.insert(code, text);
    }

    pub fn get(&self, code: u32) -> Option<String> {
        self.chars.get(&code).cloned()
    }

    pub fn code_for(&self, ch: char) -> Option<u32> {
        self.reverse.get(&ch).copied()
    }
}

enum CMapToken {
    Hex(String),
    Array(Vec<String>),
}

fn sections<'a>(text: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(start) = text[pos..].find(begin) {
        let body_start = pos + start + begin.len();
        let Some(len) = text[body_start..].find(end) else {
            break;
        };
        out.push(&text[body_start..body_start + len]);
        pos = body_start + len + end.len();
    }
    out
}

fn tokenize(section: &str) -> Vec<CMapToken> {
    let mut tokens = Vec::new();
    let mut array: Option<Vec<String>> = None;
    let mut chars = section.chars();
    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let hex: String = chars.by_ref().take_while(|&c| c != '>').collect();
                let hex: String = hex.chars().filter(|c| c.is_ascii_hexdigit()).collect();
                match array.as_mut() {
                    Some(items) => items.push(hex),
                    None => tokens.push(CMapToken::Hex(hex)),
                }
            }
            '[' => array = Some(Vec::new()),
            ']' => {
                if let Some(items) = array.take() {
                    tokens.push(CMapToken::Array(items));
                }
            }
            _ => {}
        }
    }
    tokens
}

fn hex_code(hex: &str) -> u32 {
    u32::from_str_radix(hex, 16).unwrap_or(0)
}

fn utf16_hex(hex: &str) -> String {
    let units: Vec<u16> = hex
        .as_bytes()
        .chunks(4)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .filter_map(|s| u16::from_str_radix(s, 16).ok())
        .collect();
    String::from_utf16_lossy(&units)
}

const WINANSI_HIGH: [Option<char>; 32] = [
    Some('€'), None, Some('‚'), Some('ƒ'), Some('„'), Some('…'), Some('†'), Some('‡'),
    Some('ˆ'), Some('‰'), Some('Š'), Some('‹'), Some('Œ'), None, Some('Ž'), None,
    None, Some('‘'), Some('’'), Some('“'), Some('”'), Some('•'), Some('–'), Some('—'),
    Some('˜'), Some('™'), Some('š'), Some('›'), Some('œ'), None, Some('ž'), Some('Ÿ'),
];

/// WinAnsiEncoding byte to char.
pub fn winansi_char(b: u8) -> Option<char> {
    match b {
        0x80..=0x9F => WINANSI_HIGH[usize::from(b - 0x80)],
        0x20..=0x7E | 0xA0..=0xFF => Some(char::from(b)),
        _ => None,
    }
}

/// Char to WinAnsiEncoding byte.
pub fn winansi_byte(ch: char) -> Option<u8> {
    match u32::from(ch) {
        c @ (0x20..=0x7E | 0xA0..=0xFF) => Some(c as u8),
        _ => WINANSI_HIGH
            .iter()
            .position(|&c| c == Some(ch))
            .map(|i| 0x80 + i as u8),
    }
}

// Helvetica AFM widths for 0x20..=0x7E
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

fn standard_width(base_font: &str, code: u32) -> f64 {
    if base_font.contains("Courier") {
        return 0.6;
    }
    let w = match code {
        0x20..=0x7E => HELVETICA_ASCII[(code - 0x20) as usize],
        _ => 556,
    };
    f64::from(w) / 1000.0
}
