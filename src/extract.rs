//! Page-aware text extraction for uploaded documents.
//!
//! Turns a file into an ordered list of [`PageText`]s. PDFs keep their own
//! pagination, PowerPoint decks get one page per slide, and everything else
//! (DOCX, plain text, Markdown) is a single page numbered 1.
//!
//! Every page is cleaned (control characters removed, whitespace runs
//! collapsed to one space) and pages of [`MIN_PAGE_CHARS`] characters or
//! fewer are dropped as noise.

use std::io::Read;
use std::path::Path;

use crate::error::IngestError;
use crate::models::PageText;

/// Pages whose cleaned text is this long or shorter are discarded.
pub const MIN_PAGE_CHARS: usize = 10;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Formats the extractor understands, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Text,
}

impl DocumentFormat {
    /// Resolve the format from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, IngestError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "pptx" => Ok(Self::Pptx),
            "txt" | "md" | "markdown" => Ok(Self::Text),
            "" => Err(IngestError::UnsupportedFormat("(no extension)".to_string())),
            other => Err(IngestError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    pub fn is_supported(filename: &str) -> bool {
        Self::from_filename(filename).is_ok()
    }
}

/// Read `path` and extract its pages. The format comes from `filename`,
/// which may differ from the on-disk name.
///
/// Blocking; callers on the async runtime should use `spawn_blocking`.
pub fn extract_pages(path: &Path, filename: &str) -> Result<Vec<PageText>, IngestError> {
    let format = DocumentFormat::from_filename(filename)?;
    let bytes = std::fs::read(path).map_err(|e| failure(filename, e))?;
    extract_pages_from_bytes(&bytes, format, filename)
}

pub fn extract_pages_from_bytes(
    bytes: &[u8],
    format: DocumentFormat,
    filename: &str,
) -> Result<Vec<PageText>, IngestError> {
    let raw_pages: Vec<(String, u32)> = match format {
        DocumentFormat::Pdf => extract_pdf(bytes).map_err(|e| failure(filename, e))?,
        DocumentFormat::Docx => vec![(extract_docx(bytes).map_err(|e| failure(filename, e))?, 1)],
        DocumentFormat::Pptx => extract_pptx(bytes).map_err(|e| failure(filename, e))?,
        DocumentFormat::Text => vec![(String::from_utf8_lossy(bytes).into_owned(), 1)],
    };

    Ok(raw_pages
        .into_iter()
        .filter_map(|(raw, page)| {
            let text = clean_text(&raw);
            (text.chars().count() > MIN_PAGE_CHARS).then_some(PageText { text, page })
        })
        .collect())
}

/// Strip control characters and collapse whitespace runs to single spaces.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

fn failure(filename: &str, err: impl std::fmt::Display) -> IngestError {
    IngestError::ExtractionFailure {
        filename: filename.to_string(),
        reason: err.to_string(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<(String, u32)>, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (text, i as u32 + 1))
        .collect())
}

type ZipReader<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(archive: &mut ZipReader<'_>, name: &str) -> Result<Vec<u8>, String> {
    read_zip_entry_limited(archive, name, MAX_XML_ENTRY_BYTES)
}

/// Read at most `limit` bytes of an entry; one byte more is an error.
fn read_zip_entry_limited(
    archive: &mut ZipReader<'_>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 > limit {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, limit
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, Some(b"p"))
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<(String, u32)>, String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    slides.sort_by_key(|(num, _)| *num);

    let mut pages = Vec::with_capacity(slides.len());
    for (position, (_, name)) in slides.into_iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        pages.push((collect_text_runs(&xml, Some(b"p"))?, position as u32 + 1));
    }
    Ok(pages)
}

/// Concatenate the contents of every `<*:t>` element. When `break_on` is
/// set, a newline is emitted at the end of each element with that local name.
fn collect_text_runs(xml: &[u8], break_on: Option<&[u8]>) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if break_on == Some(name.as_ref()) {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    /// A PDF with one Courier text line per page (`""` gives an empty page).
    fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in texts {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn pdf_pages_keep_source_numbers() {
        let bytes = pdf_with_pages(&[
            "First page about refunds.",
            "",
            "Third page about leave policy.",
        ]);
        let pages = extract_pages_from_bytes(&bytes, DocumentFormat::Pdf, "policy.pdf").unwrap();
        let numbers: Vec<_> = pages.iter().map(|p| p.page).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert!(pages[0].text.contains("refunds"));
        assert!(pages[1].text.contains("leave policy"));
    }

    #[test]
    fn zip_entry_limit_is_inclusive() {
        let bytes = zip_with(&[("word/document.xml", "x".repeat(64))]);
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice())).unwrap();
        let out = read_zip_entry_limited(&mut archive, "word/document.xml", 64).unwrap();
        assert_eq!(out.len(), 64);
        let err = read_zip_entry_limited(&mut archive, "word/document.xml", 63).unwrap_err();
        assert!(err.contains("exceeds size limit"));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_filename("a.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("notes.md").unwrap(), DocumentFormat::Text);
        assert!(matches!(
            DocumentFormat::from_filename("image.png"),
            Err(IngestError::UnsupportedFormat(ext)) if ext == ".png"
        ));
        assert!(DocumentFormat::from_filename("README").is_err());
    }

    #[test]
    fn clean_collapses_whitespace_and_strips_controls() {
        assert_eq!(clean_text("  a\n\n b\t\tc\u{0}d \r\n"), "a b cd");
        assert_eq!(clean_text("\u{7}\u{1b}"), "");
    }

    #[test]
    fn text_is_one_page() {
        let pages = extract_pages_from_bytes(
            b"Hello   there,\nthis is a plain text file.",
            DocumentFormat::Text,
            "a.txt",
        )
        .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].text, "Hello there, this is a plain text file.");
    }

    #[test]
    fn short_pages_are_dropped() {
        let pages = extract_pages_from_bytes(b"  tiny   ", DocumentFormat::Text, "a.txt").unwrap();
        assert!(pages.is_empty());
        // exactly ten characters is still noise
        let pages = extract_pages_from_bytes(b"0123456789", DocumentFormat::Text, "a.txt").unwrap();
        assert!(pages.is_empty());
        let pages = extract_pages_from_bytes(b"0123456789a", DocumentFormat::Text, "a.txt").unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn docx_paragraphs_are_joined() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"w\"><w:body>\
            <w:p><w:r><w:t>First paragraph</w:t></w:r></w:p>\
            <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph</w:t></w:r></w:p>\
            </w:body></w:document>"
            .to_string();
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let pages = extract_pages_from_bytes(&bytes, DocumentFormat::Docx, "a.docx").unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "First paragraph Second paragraph");
    }

    #[test]
    fn pptx_slides_become_pages_in_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:a=\"a\" xmlns:p=\"p\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", slide("Tenth slide with words")),
            ("ppt/slides/slide2.xml", slide("Second slide with words")),
            ("ppt/slides/slide1.xml", slide("First slide with words")),
        ]);
        let pages = extract_pages_from_bytes(&bytes, DocumentFormat::Pptx, "deck.pptx").unwrap();
        let got: Vec<_> = pages.iter().map(|p| (p.page, p.text.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (1, "First slide with words"),
                (2, "Second slide with words"),
                (3, "Tenth slide with words"),
            ]
        );
    }

    #[test]
    fn corrupt_inputs_fail_with_extraction_failure() {
        let err = extract_pages_from_bytes(b"not a pdf", DocumentFormat::Pdf, "a.pdf").unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailure { .. }));
        let err =
            extract_pages_from_bytes(b"not a zip", DocumentFormat::Docx, "a.docx").unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailure { .. }));
    }

    #[test]
    fn missing_file_is_extraction_failure() {
        let err = extract_pages(Path::new("/nonexistent/a.txt"), "a.txt").unwrap_err();
        assert!(matches!(err, IngestError::ExtractionFailure { .. }));
    }
}
