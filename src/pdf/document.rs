//! Scoped PDF document handle backed by lopdf.
//!
//! A [`TemplateDocument`] is opened per operation and dropped when the
//! operation ends; nothing about a document outlives the call that opened it.

use crate::error::{Error, Result};
use crate::pdf::content::Matrix;
use crate::pdf::fonts::{number, resolve};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// An opened PDF, with pages indexed from zero.
pub struct TemplateDocument {
    inner: Document,
    page_ids: Vec<ObjectId>,
}

impl std::fmt::Debug for TemplateDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateDocument")
            .field("page_count", &self.page_ids.len())
            .finish_non_exhaustive()
    }
}

impl TemplateDocument {
    /// Open a PDF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::PdfNotFound {
                path: path.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied {
                path: path.display().to_string(),
                access: "read",
            },
            _ => Error::Io(e),
        })?;
        Self::open_bytes(&data)
    }

    /// Open a PDF from memory.
    pub fn open_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 5 || &data[0..5] != b"%PDF-" {
            return Err(Error::UnreadablePdf {
                reason: "Missing %PDF- header".to_string(),
            });
        }

        let inner = Document::load_mem(data)?;
        if inner.is_encrypted() {
            return Err(Error::UnreadablePdf {
                reason: "PDF is encrypted".to_string(),
            });
        }

        let page_ids: Vec<ObjectId> = inner.get_pages().into_values().collect();
        Ok(Self { inner, page_ids })
    }

    pub fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    pub fn page_id(&self, page: u32) -> Result<ObjectId> {
        self.page_ids
            .get(page as usize)
            .copied()
            .ok_or_else(|| Error::Edit {
                reason: format!("page {} out of range ({} pages)", page, self.page_ids.len()),
            })
    }

    pub fn inner(&self) -> &Document {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Document {
        &mut self.inner
    }

    /// Decoded operators of a page (all content streams concatenated).
    pub fn page_operations(&self, page: u32) -> Result<Vec<Operation>> {
        let page_id = self.page_id(page)?;
        let data = self.inner.get_page_content(page_id)?;
        let content = Content::decode(&data)?;
        Ok(content.operations)
    }

    /// Replace the content of a page with a single new stream.
    pub fn set_page_operations(&mut self, page: u32, operations: Vec<Operation>) -> Result<()> {
        let page_id = self.page_id(page)?;
        let encoded = Content { operations }
            .encode()
            .map_err(|e| Error::Edit {
                reason: format!("encode content for page {}: {}", page, e),
            })?;
        let mut stream = Stream::new(Dictionary::new(), encoded);
        // compression is best-effort; an uncompressed stream is still valid
        let _ = stream.compress();
        let stream_id = self.inner.add_object(stream);

        let page_dict = self
            .inner
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| Error::Edit {
                reason: format!("page {} dictionary: {}", page, e),
            })?;
        page_dict.set("Contents", Object::Reference(stream_id));
        Ok(())
    }

    fn form_stream(&self, form_id: ObjectId) -> Result<&Stream> {
        self.inner
            .get_object(form_id)
            .and_then(Object::as_stream)
            .map_err(|e| Error::Edit {
                reason: format!("form {:?}: {}", form_id, e),
            })
    }

    /// Decoded operators of a form XObject.
    pub fn form_operations(&self, form_id: ObjectId) -> Result<Vec<Operation>> {
        let stream = self.form_stream(form_id)?;
        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        Ok(Content::decode(&data)?.operations)
    }

    /// The form's own `/Resources`, if it has any.
    pub fn form_resources(&self, form_id: ObjectId) -> Option<&Dictionary> {
        let stream = self.form_stream(form_id).ok()?;
        let resources = stream.dict.get(b"Resources").ok()?;
        resolve(&self.inner, resources).as_dict().ok()
    }

    /// Replace the content of a form XObject, keeping its dictionary.
    pub fn set_form_operations(&mut self, form_id: ObjectId, operations: Vec<Operation>) -> Result<()> {
        let encoded = Content { operations }
            .encode()
            .map_err(|e| Error::Edit {
                reason: format!("encode content for form {:?}: {}", form_id, e),
            })?;
        let stream = self.form_stream_mut(form_id)?;
        stream.set_plain_content(encoded);
        let _ = stream.compress();
        Ok(())
    }

    pub fn form_stream_mut(&mut self, form_id: ObjectId) -> Result<&mut Stream> {
        self.inner
            .get_object_mut(form_id)
            .and_then(Object::as_stream_mut)
            .map_err(|e| Error::Edit {
                reason: format!("form {:?}: {}", form_id, e),
            })
    }

    /// Page rotation in degrees, normalized to 0, 90, 180 or 270.
    pub fn page_rotation(&self, page: u32) -> i64 {
        let Ok(page_id) = self.page_id(page) else {
            return 0;
        };
        let mut node = self
            .inner
            .get_object(page_id)
            .and_then(Object::as_dict)
            .ok();
        for _ in 0..32 {
            let Some(dict) = node else { break };
            if let Ok(rotate) = dict.get(b"Rotate") {
                let degrees = number(resolve(&self.inner, rotate)).unwrap_or(0.0) as i64;
                return degrees.rem_euclid(360) / 90 * 90;
            }
            node = dict
                .get(b"Parent")
                .ok()
                .and_then(|p| resolve(&self.inner, p).as_dict().ok());
        }
        0
    }

    /// Page MediaBox `[x0 y0 x1 y1]`, US Letter when absent.
    pub fn media_box(&self, page: u32) -> [f64; 4] {
        let default = [0.0, 0.0, 612.0, 792.0];
        let Ok(page_id) = self.page_id(page) else {
            return default;
        };
        let mut node = self
            .inner
            .get_object(page_id)
            .and_then(Object::as_dict)
            .ok();
        for _ in 0..32 {
            let Some(dict) = node else { break };
            if let Ok(media) = dict.get(b"MediaBox") {
                if let Ok(values) = resolve(&self.inner, media).as_array() {
                    let v: Vec<f64> = values
                        .iter()
                        .filter_map(|o| number(resolve(&self.inner, o)))
                        .collect();
                    if let [x0, y0, x1, y1] = v[..] {
                        return [x0, y0, x1, y1];
                    }
                }
                return default;
            }
            node = dict
                .get(b"Parent")
                .ok()
                .and_then(|p| resolve(&self.inner, p).as_dict().ok());
        }
        default
    }

    /// Transform from user space to the rotated (display) space of a page.
    pub fn display_matrix(&self, page: u32) -> Matrix {
        let [x0, y0, x1, y1] = self.media_box(page);
        let (w, h) = (x1 - x0, y1 - y0);
        let shift = Matrix::translate(-x0, -y0);
        let rotate = match self.page_rotation(page) {
            90 => Matrix::new(0.0, -1.0, 1.0, 0.0, 0.0, w),
            180 => Matrix::new(-1.0, 0.0, 0.0, -1.0, w, h),
            270 => Matrix::new(0.0, 1.0, -1.0, 0.0, h, 0.0),
            _ => Matrix::IDENTITY,
        };
        shift.then(&rotate)
    }

    /// Serialize the (possibly edited) document.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.inner
            .save_to(&mut buffer)
            .map_err(|e| Error::Edit {
                reason: format!("serialize document: {}", e),
            })?;
        Ok(buffer)
    }
}
