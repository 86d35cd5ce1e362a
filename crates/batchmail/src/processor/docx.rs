use std::io::{Cursor, Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ProcessError;

/// Extracts the plain text body of a DOCX file.
///
/// Paragraphs are trimmed, empty ones dropped, and the rest joined with `\n`.
pub fn extract_plain_text(bytes: &[u8]) -> Result<String, ProcessError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to open DOCX: {}", e)))?;

    let paragraphs = extract_docx_paragraphs(&mut archive)?;

    let text = paragraphs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(text.trim().to_string())
}

fn extract_docx_paragraphs<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, ProcessError> {
    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to find document.xml: {}", e)))?;

    let mut xml_content = String::new();
    document_xml
        .read_to_string(&mut xml_content)
        .map_err(|e| ProcessError::DocxProcessing(format!("Failed to read document.xml: {}", e)))?;

    parse_docx_xml(&xml_content)
}

/// Collects the text of each top-level `w:p`, honouring `w:tab` and `w:br`
/// inside runs. Paragraphs inside tables and text boxes are skipped.
fn parse_docx_xml(xml: &str) -> Result<Vec<String>, ProcessError> {
    // Whitespace inside w:t is significant (xml:space="preserve"), so no trim_text
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_element = false;
    let mut in_paragraph = false;
    // Depth inside w:tbl / w:txbxContent
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"tbl" | b"txbxContent" => skip_depth += 1,
                _ if skip_depth > 0 => {}
                b"t" => in_text_element = true,
                b"p" => {
                    in_paragraph = true;
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if skip_depth == 0 => match e.local_name().as_ref() {
                b"tab" if in_paragraph => current.push('\t'),
                b"br" | b"cr" if in_paragraph => current.push('\n'),
                // Self-closing paragraph is an empty one
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"tbl" | b"txbxContent" => skip_depth = skip_depth.saturating_sub(1),
                _ if skip_depth > 0 => {}
                b"t" => in_text_element = false,
                b"p" if in_paragraph => {
                    paragraphs.push(std::mem::take(&mut current));
                    in_paragraph = false;
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element && skip_depth == 0 {
                    let decoded = e.decode().map_err(|err| {
                        ProcessError::DocxProcessing(format!("Invalid text in document.xml: {}", err))
                    })?;
                    current.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text_element && skip_depth == 0 {
                    if let Ok(Some(ch)) = e.resolve_char_ref() {
                        current.push(ch);
                    } else if let Ok(name) = e.decode() {
                        if let Some(resolved) = quick_xml::escape::resolve_xml_entity(&name) {
                            current.push_str(resolved);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProcessError::DocxProcessing(format!(
                    "XML parsing error: {}",
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(paragraphs)
}
