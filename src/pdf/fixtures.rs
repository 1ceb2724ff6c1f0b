//! Small template PDFs built in memory for unit tests.

use lopdf::{dictionary, Document, Object, Stream};

/// A PDF with one page per content string. Every page sees a Helvetica
/// font resource named `F1`, inherited from the page tree.
pub(crate) fn template_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for content in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
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
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture PDF serializes");
    buffer
}

/// Content drawing `text` in red 12pt Helvetica with its baseline origin at `(x, y)`.
pub(crate) fn red_text(x: i64, y: i64, text: &str) -> String {
    format!("BT /F1 12 Tf 1 0 0 rg {} {} Td ({}) Tj ET\n", x, y, text)
}

/// Same as [`red_text`] but in black.
pub(crate) fn black_text(x: i64, y: i64, text: &str) -> String {
    format!("BT /F1 12 Tf 0 g {} {} Td ({}) Tj ET\n", x, y, text)
}

/// A one-page PDF whose page content can paint the form XObject `/Fm1`.
/// The form carries its own `F1` Helvetica resource and the given `/Matrix`.
pub(crate) fn form_pdf(page_content: &str, form_content: &str, matrix: [i64; 6]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Matrix" => matrix.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        },
        form_content.as_bytes().to_vec(),
    ));
    let content_id = doc.add_object(Stream::new(dictionary! {}, page_content.as_bytes().to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Fm1" => form_id },
        },
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![Object::Reference(page_id)],
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("fixture PDF serializes");
    buffer
}

/// The identity form `/Matrix`.
pub(crate) const IDENTITY: [i64; 6] = [1, 0, 0, 1, 0, 0];
