use std::io::{self, Write};

use super::{Block, TranscriptionDocument, layout};

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 50.0;
const LINE_HEIGHT_FACTOR: f64 = 1.4;
/// Rough Helvetica advance width as a fraction of the font size.
const AVG_CHAR_WIDTH: f64 = 0.5;

pub fn render(doc: &TranscriptionDocument) -> io::Result<Vec<u8>> {
    let mut pdf = SimplePdf::new();
    for block in layout(doc) {
        match block {
            Block::Title(text) => pdf.add_text(&text, 16.0, true),
            Block::Heading(text) => pdf.add_text(&text, 12.0, true),
            Block::Body(text) => pdf.add_text(&text, 10.0, false),
            Block::Blank => pdf.add_text("", 10.0, false),
        }
    }
    pdf.render()
}

/// Minimal PDF 1.4 writer using the built-in Helvetica fonts.
/// Wraps long lines and breaks onto new Letter pages as needed.
struct SimplePdf {
    lines: Vec<PdfLine>,
}

struct PdfLine {
    text: String,
    font_size: f64,
    bold: bool,
}

impl SimplePdf {
    fn new() -> Self {
        Self { lines: Vec::new() }
    }

    fn add_text(&mut self, text: &str, font_size: f64, bold: bool) {
        // Base-14 fonts only cover ASCII reliably
        let printable: String = text
            .chars()
            .filter(|c| c.is_ascii() && !c.is_ascii_control())
            .collect();
        let max_chars = ((PAGE_WIDTH - 2.0 * MARGIN) / (font_size * AVG_CHAR_WIDTH)) as usize;
        let mut wrapped = wrap(&printable, max_chars.max(1));
        if wrapped.is_empty() {
            wrapped.push(String::new());
        }
        for line in wrapped {
            self.lines.push(PdfLine {
                text: Self::escape_pdf_string(&line),
                font_size,
                bold,
            });
        }
    }

    fn escape_pdf_string(s: &str) -> String {
        s.replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)")
    }

    /// Splits lines into per-page content streams.
    fn paginate(&self) -> Vec<String> {
        let mut pages = Vec::new();
        let mut stream = String::from("BT\n");
        let mut y = PAGE_HEIGHT - MARGIN;

        for line in &self.lines {
            let advance = line.font_size * LINE_HEIGHT_FACTOR;
            if y - advance < MARGIN {
                stream.push_str("ET\n");
                pages.push(std::mem::replace(&mut stream, String::from("BT\n")));
                y = PAGE_HEIGHT - MARGIN;
            }
            y -= advance;
            if line.text.is_empty() {
                continue;
            }
            let font_ref = if line.bold { "/F2" } else { "/F1" };
            stream.push_str(&format!("{} {} Tf\n", font_ref, line.font_size));
            stream.push_str(&format!("1 0 0 1 {} {:.2} Tm\n", MARGIN, y));
            stream.push_str(&format!("({}) Tj\n", line.text));
        }

        stream.push_str("ET\n");
        pages.push(stream);
        pages
    }

    fn render(&self) -> io::Result<Vec<u8>> {
        let pages = self.paginate();
        let mut buf = Vec::new();
        let mut offsets: Vec<usize> = Vec::new();

        write!(buf, "%PDF-1.4\n")?;
        buf.extend_from_slice(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n']);

        // 1: catalog, 2: page tree, 3-4: fonts, then a page/content pair per page
        let page_obj = |i: usize| 5 + 2 * i;
        let kids: Vec<String> = (0..pages.len())
            .map(|i| format!("{} 0 R", page_obj(i)))
            .collect();

        offsets.push(buf.len());
        write!(buf, "1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n")?;

        offsets.push(buf.len());
        write!(
            buf,
            "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
            kids.join(" "),
            pages.len()
        )?;

        offsets.push(buf.len());
        write!(
            buf,
            "3 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>\nendobj\n"
        )?;

        offsets.push(buf.len());
        write!(
            buf,
            "4 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>\nendobj\n"
        )?;

        for (i, stream) in pages.iter().enumerate() {
            let page = page_obj(i);
            let content = page + 1;

            offsets.push(buf.len());
            write!(
                buf,
                "{} 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Contents {} 0 R /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> >>\nendobj\n",
                page, PAGE_WIDTH, PAGE_HEIGHT, content
            )?;

            offsets.push(buf.len());
            write!(
                buf,
                "{} 0 obj\n<< /Length {} >>\nstream\n",
                content,
                stream.len()
            )?;
            buf.extend_from_slice(stream.as_bytes());
            write!(buf, "\nendstream\nendobj\n")?;
        }

        let xref_start = buf.len();
        write!(buf, "xref\n0 {}\n", offsets.len() + 1)?;
        write!(buf, "0000000000 65535 f \n")?;
        for offset in &offsets {
            write!(buf, "{:010} 00000 n \n", offset)?;
        }

        write!(
            buf,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )?;

        Ok(buf)
    }
}

/// Greedy word wrap; words longer than a line are hard-split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word;
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let (head, tail) = word.split_at(max_chars);
            lines.push(head.to_string());
            word = tail;
        }
        if word.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
