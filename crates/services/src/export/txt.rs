use super::{Block, TranscriptionDocument, layout};

pub fn render(doc: &TranscriptionDocument) -> String {
    let mut out = String::new();
    for block in layout(doc) {
        match block {
            Block::Title(text) | Block::Heading(text) | Block::Body(text) => {
                out.push_str(&text);
                out.push('\n');
            }
            Block::Blank => out.push('\n'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::sample;

    #[test]
    fn plain_text_layout() {
        let text = render(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Transcription Result");
        assert_eq!(lines[2], "Hello world. How are you?");
        assert!(lines.contains(&"Segments Timeline"));
        assert!(lines.contains(&"(Start time ~ End time)"));
        assert_eq!(*lines.last().unwrap(), "(1.50 ~ 2.00) how are you");
    }
}
