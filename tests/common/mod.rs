//! Shared fixtures: template PDFs generated with lopdf.

#![allow(dead_code)]

use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};

/// Builder for small template PDFs. Every page sees Helvetica as `/F1`.
#[derive(Default)]
pub struct TemplateBuilder {
    pages: Vec<String>,
    rotate: Option<i64>,
    form: Option<(String, [i64; 6])>,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, content: impl Into<String>) -> Self {
        self.pages.push(content.into());
        self
    }

    pub fn rotate(mut self, degrees: i64) -> Self {
        self.rotate = Some(degrees);
        self
    }

    /// Add a form XObject `/Fm1` that pages can paint with `/Fm1 Do`.
    pub fn form(mut self, content: impl Into<String>, matrix: [i64; 6]) -> Self {
        self.form = Some((content.into(), matrix));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };
        if let Some((content, matrix)) = &self.form {
            let mut form = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Matrix" => matrix.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
                    "Resources" => dictionary! {
                        "Font" => dictionary! { "F1" => font_id },
                    },
                },
                content.as_bytes().to_vec(),
            );
            let _ = form.compress();
            let form_id = doc.add_object(form);
            resources.set("XObject", dictionary! { "Fm1" => form_id });
        }

        let mut kids = Vec::new();
        for content in &self.pages {
            let mut stream = Stream::new(dictionary! {}, content.as_bytes().to_vec());
            let _ = stream.compress();
            let content_id = doc.add_object(stream);
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if let Some(rotate) = self.rotate {
                page.set("Rotate", Object::Integer(rotate));
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => Object::Integer(kids.len() as i64),
                "Kids" => kids,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
                "Resources" => resources,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("Failed to serialize fixture PDF");
        buffer
    }

    /// Write the PDF to `dir/name` and return its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("Failed to write fixture PDF");
        path
    }
}

/// Red 12pt Helvetica text with its baseline origin at `(x, y)`.
pub fn red_text(x: i64, y: i64, text: &str) -> String {
    format!("BT /F1 12 Tf 1 0 0 rg {} {} Td ({}) Tj ET\n", x, y, text)
}

pub fn black_text(x: i64, y: i64, text: &str) -> String {
    format!("BT /F1 12 Tf 0 g {} {} Td ({}) Tj ET\n", x, y, text)
}

/// A page with `n` red fields in a column, keyed `x72y<750 - 20i>_p0`.
pub fn form_page(n: usize) -> String {
    let mut content = black_text(72, 770, "Invoice");
    for i in 0..n {
        content.push_str(&red_text(72, 750 - 20 * i as i64, &format!("FIELD{}", i)));
    }
    content
}

pub fn write_alias(pdf: &Path, yaml: &str) {
    let stem = pdf.file_stem().unwrap().to_string_lossy().to_string();
    std::fs::write(pdf.with_file_name(format!("{}.alias.yaml", stem)), yaml)
        .expect("Failed to write alias file");
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
