use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::{WatermarkError, Watermarker};

/// Resource name the overlay font is registered under on every page.
const FONT_KEY: &str = "WmLabel";

/// Guard against `Parent` cycles in malformed page trees.
const MAX_TREE_DEPTH: usize = 32;

/// Stamps a "Licensed to" line onto the bottom of every page.
pub struct PdfWatermarker {
    font_size: i64,
}

impl PdfWatermarker {
    pub fn new() -> Self {
        Self { font_size: 10 }
    }

    pub fn with_font_size(font_size: i64) -> Self {
        Self { font_size }
    }
}

impl Default for PdfWatermarker {
    fn default() -> Self {
        Self::new()
    }
}

impl Watermarker for PdfWatermarker {
    fn apply(&self, input: &Path, output: &Path, label: &str) -> Result<(), WatermarkError> {
        let _span = tracing::info_span!("watermark.pdf").entered();

        let mut doc = Document::load(input).map_err(|e| {
            WatermarkError::Pdf(format!(
                "Failed to load '{}': {}",
                crate::sanitize::redact_path(input),
                e
            ))
        })?;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(WatermarkError::Pdf("Document has no pages".to_string()));
        }

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let text = format!("Licensed to: {}", label);

        for page_id in &pages {
            register_font(&mut doc, *page_id, font_id)?;
            append_overlay(&mut doc, *page_id, &text, self.font_size)?;
        }

        doc.save(output).map_err(|e| {
            WatermarkError::Pdf(format!("Failed to write '{}': {}", output.display(), e))
        })?;

        log::debug!("Watermarked {} page(s)", pages.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

fn pdf_err(e: lopdf::Error) -> WatermarkError {
    WatermarkError::Pdf(e.to_string())
}

fn dict_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary, WatermarkError> {
    doc.get_object_mut(id)
        .and_then(Object::as_dict_mut)
        .map_err(pdf_err)
}

/// Resources a page inherits from its ancestors in the page tree.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Option<Object> {
    let mut current = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .ok()?
        .get(b"Parent")
        .and_then(Object::as_reference)
        .ok()?;

    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_object(current).and_then(Object::as_dict).ok()?;
        if let Ok(resources) = node.get(b"Resources") {
            return Some(resources.clone());
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// The page's own resources dictionary. Inherited resources are copied onto
/// the page first so adding an entry never hides the ones it inherited.
fn page_resources(doc: &mut Document, page_id: ObjectId) -> Result<&mut Dictionary, WatermarkError> {
    let own = dict_mut(doc, page_id)?.get(b"Resources").ok().cloned();
    let resources = match own {
        Some(resources) => resources,
        None => {
            let resources = inherited_resources(doc, page_id)
                .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
            dict_mut(doc, page_id)?.set("Resources", resources.clone());
            resources
        }
    };

    match resources {
        Object::Reference(id) => dict_mut(doc, id),
        _ => dict_mut(doc, page_id)?
            .get_mut(b"Resources")
            .and_then(Object::as_dict_mut)
            .map_err(pdf_err),
    }
}

fn register_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) -> Result<(), WatermarkError> {
    let fonts = page_resources(doc, page_id)?.get(b"Font").ok().cloned();
    match fonts {
        Some(Object::Reference(id)) => {
            dict_mut(doc, id)?.set(FONT_KEY, font_id);
        }
        Some(Object::Dictionary(mut fonts)) => {
            fonts.set(FONT_KEY, font_id);
            page_resources(doc, page_id)?.set("Font", fonts);
        }
        _ => {
            page_resources(doc, page_id)?.set("Font", dictionary! { FONT_KEY => font_id });
        }
    }
    Ok(())
}

fn overlay_content(text: &str, font_size: i64) -> Content {
    Content {
        operations: vec![
            // Closes the `q` pushed in front of the original content.
            Operation::new("Q", vec![]),
            Operation::new("q", vec![]),
            Operation::new("g", vec![Object::Real(0.5)]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(FONT_KEY.as_bytes().to_vec()),
                    Object::Integer(font_size),
                ],
            ),
            Operation::new("Td", vec![Object::Integer(36), Object::Integer(24)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ],
    }
}

/// Wraps the page's existing content in `q`/`Q` and appends the overlay
/// stream after it.
fn append_overlay(doc: &mut Document, page_id: ObjectId, text: &str, font_size: i64) -> Result<(), WatermarkError> {
    let existing = dict_mut(doc, page_id)?.get(b"Contents").ok().cloned();
    let mut streams = match existing {
        None => Vec::new(),
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(id)],
        },
        Some(other) => vec![other],
    };

    let overlay = overlay_content(text, font_size).encode().map_err(pdf_err)?;
    let save_id = doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
    let overlay_id = doc.add_object(Stream::new(dictionary! {}, overlay));

    streams.insert(0, Object::Reference(save_id));
    streams.push(Object::Reference(overlay_id));
    dict_mut(doc, page_id)?.set("Contents", streams);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Two-page document. The first page carries its own resources; the
    /// second inherits them from the page tree.
    fn write_sample_pdf(path: &Path) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.new_object_id();
        let resources_id = doc.new_object_id();

        doc.objects.insert(
            font_id,
            Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Courier",
            }),
        );
        doc.objects.insert(
            resources_id,
            Object::Dictionary(dictionary! {
                "Font" => dictionary! {
                    "F1" => font_id,
                },
            }),
        );

        let mut kids: Vec<Object> = Vec::new();
        for (n, own_resources) in [(1, true), (2, false)] {
            let content = format!("BT /F1 12 Tf 50 700 Td (Page {}) Tj ET", n);
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
            };
            if own_resources {
                page.set("Resources", resources_id);
            }
            kids.push(doc.add_object(page).into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => 2,
                "Resources" => resources_id,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_label_is_stamped_on_every_page() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        let output = dir.path().join("u1_a.pdf");
        write_sample_pdf(&input);

        PdfWatermarker::new()
            .apply(&input, &output, "u1 (u1@example.com)")
            .unwrap();

        let doc = Document::load(&output).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        for (n, page_id) in pages {
            let content = doc.get_page_content(page_id).unwrap();
            let content = String::from_utf8_lossy(&content);
            assert!(content.contains("Licensed to: u1 (u1@example.com)"));
            assert!(content.contains(&format!("(Page {})", n)));
        }
    }

    #[test]
    fn test_font_registered_alongside_existing_fonts() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        let output = dir.path().join("out.pdf");
        write_sample_pdf(&input);

        PdfWatermarker::new().apply(&input, &output, "u2").unwrap();

        let doc = Document::load(&output).unwrap();
        for page_id in doc.get_pages().into_values() {
            let page = doc.get_object(page_id).and_then(Object::as_dict).unwrap();
            let resources = match page.get(b"Resources").unwrap() {
                Object::Reference(id) => doc.get_object(*id).and_then(Object::as_dict).unwrap(),
                other => other.as_dict().unwrap(),
            };
            let fonts = resources.get(b"Font").and_then(Object::as_dict).unwrap();
            assert!(fonts.has(b"F1"));
            assert!(fonts.has(FONT_KEY.as_bytes()));
        }
    }

    #[test]
    fn test_input_is_left_untouched() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        write_sample_pdf(&input);
        let before = std::fs::read(&input).unwrap();

        PdfWatermarker::new()
            .apply(&input, &dir.path().join("out.pdf"), "u1")
            .unwrap();

        assert_eq!(std::fs::read(&input).unwrap(), before);
    }

    #[test]
    fn test_not_a_pdf() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("a.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"not a valid pdf content").unwrap();

        let result = PdfWatermarker::new().apply(&input, &output, "u1");
        assert!(matches!(result, Err(WatermarkError::Pdf(_))));
        assert!(!output.exists());
    }
}
