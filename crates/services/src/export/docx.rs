use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::{Block, TranscriptionDocument, layout};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_OPEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_CLOSE: &str = "<w:sectPr/></w:body></w:document>";

/// Builds a minimal WordprocessingML package.
pub fn render(doc: &TranscriptionDocument) -> anyhow::Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(CONTENT_TYPES.as_bytes())?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(ROOT_RELS.as_bytes())?;

    zip.start_file("word/document.xml", options)?;
    zip.write_all(document_xml(doc).as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

fn document_xml(doc: &TranscriptionDocument) -> String {
    let mut xml = String::from(DOCUMENT_OPEN);
    for block in layout(doc) {
        match block {
            Block::Title(text) => paragraph(&mut xml, &text, Some(32)),
            Block::Heading(text) => paragraph(&mut xml, &text, Some(26)),
            Block::Body(text) => paragraph(&mut xml, &text, None),
            Block::Blank => xml.push_str("<w:p/>"),
        }
    }
    xml.push_str(DOCUMENT_CLOSE);
    xml
}

/// `bold_half_points` renders the run bold at that size.
fn paragraph(xml: &mut String, text: &str, bold_half_points: Option<u32>) {
    xml.push_str("<w:p><w:r>");
    if let Some(size) = bold_half_points {
        xml.push_str(&format!("<w:rPr><w:b/><w:sz w:val=\"{}\"/></w:rPr>", size));
    }
    xml.push_str("<w:t xml:space=\"preserve\">");
    xml.push_str(&escape_xml(text));
    xml.push_str("</w:t></w:r></w:p>");
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // XML 1.0 forbids most control characters
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}
