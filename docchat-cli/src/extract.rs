//! Text extraction for ingested files.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Text pulled out of a file, plus its page count for PDFs.
#[derive(Debug)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Option<usize>,
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Read `path` and extract its text. `.pdf` files go through `pdf-extract`;
/// everything else must be UTF-8.
pub async fn read_text(path: &Path) -> Result<ExtractedText> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let extracted = if is_pdf(path) {
        tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .context("PDF extraction task failed")?
    } else {
        plain_text(bytes)
    }
    .with_context(|| format!("failed to extract text from {}", path.display()))?;

    if extracted.text.trim().is_empty() {
        warn!(path = %path.display(), "no text extracted");
    }
    Ok(extracted)
}

fn plain_text(bytes: Vec<u8>) -> Result<ExtractedText> {
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("not UTF-8 text"))?;
    Ok(ExtractedText { text, pages: None })
}

fn pdf_text(bytes: &[u8]) -> Result<ExtractedText> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| anyhow!("invalid PDF: {e}"))?;
    let pages = lopdf::Document::load_mem(bytes).ok().map(|doc| doc.get_pages().len());
    debug!(chars = text.len(), ?pages, "extracted PDF text");
    Ok(ExtractedText { text, pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    fn hello_pdf() -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 48.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("Hello World!")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf(Path::new("report.PDF")));
        assert!(is_pdf(Path::new("dir/report.pdf")));
        assert!(!is_pdf(Path::new("notes.md")));
        assert!(!is_pdf(Path::new("pdf")));
    }

    #[test]
    fn extracts_text_and_page_count_from_pdf() {
        let extracted = pdf_text(&hello_pdf()).unwrap();
        assert!(extracted.text.contains("Hello World!"));
        assert_eq!(extracted.pages, Some(1));
    }

    #[test]
    fn rejects_bytes_that_are_not_a_pdf() {
        assert!(pdf_text(b"plain text pretending").is_err());
    }

    #[test]
    fn plain_text_must_be_utf8() {
        assert_eq!(plain_text(b"hello".to_vec()).unwrap().text, "hello");
        assert!(plain_text(vec![0xff, 0xfe, 0x00]).is_err());
    }
}
