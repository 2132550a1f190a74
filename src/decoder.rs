//! Undo the two quoted-printable artifacts that break pattern matching.
//!
//! This is deliberately not a quoted-printable decoder: soft line breaks are
//! rejoined and `=3D` becomes `=`, every other escape is left as it is.

use regex::Regex;

const HTML_OPEN: &str = "<html>";
const HTML_CLOSE: &str = "</html>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Message body has no {0} marker")]
    MissingHtmlMarkers(&'static str),
}

pub struct BodyDecoder {
    soft_break_regex: Regex,
}

impl Default for BodyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyDecoder {
    pub fn new() -> Self {
        Self {
            // Escaped CRLF, or a trailing '=' before a real CRLF/LF
            soft_break_regex: Regex::new(r"=0D=0A|=\r?\n").unwrap(),
        }
    }

    pub fn decode(&self, raw: &str) -> Result<String, DecodeError> {
        let html = Self::isolate_html(raw)?;
        let joined = self.soft_break_regex.replace_all(html, "");
        Ok(joined.replace("=3D", "="))
    }

    /// Text between the first `<html>` and the first `</html>` after it.
    fn isolate_html(raw: &str) -> Result<&str, DecodeError> {
        let start = raw
            .find(HTML_OPEN)
            .ok_or(DecodeError::MissingHtmlMarkers(HTML_OPEN))?
            + HTML_OPEN.len();
        let len = raw[start..]
            .find(HTML_CLOSE)
            .ok_or(DecodeError::MissingHtmlMarkers(HTML_CLOSE))?;
        Ok(&raw[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_input_is_unchanged() {
        let decoder = BodyDecoder::new();
        let inner = "<body>Dear Sam, <a href=\"https://511.org\">link</a></body>";
        let raw = format!("Subject: hi\r\n\r\n<html>{inner}</html>");
        assert_eq!(decoder.decode(&raw).unwrap(), inner);
    }

    #[test]
    fn test_soft_breaks_and_escaped_equals() {
        let decoder = BodyDecoder::new();
        let raw = "<html><a href=3D\"https://511.org/request-verify?verification-to=\r\nken=3D83a32338-20e6=0D=0A-4182\">x</a>=\nend</html>";
        assert_eq!(
            decoder.decode(raw).unwrap(),
            "<a href=\"https://511.org/request-verify?verification-token=83a32338-20e6-4182\">x</a>end"
        );
    }

    #[test]
    fn test_other_escapes_are_left_alone() {
        let decoder = BodyDecoder::new();
        let decoded = decoder.decode("<html>caf=C3=A9 =20</html>").unwrap();
        assert_eq!(decoded, "caf=C3=A9 =20");
    }

    #[test]
    fn test_only_first_html_block_is_used() {
        let decoder = BodyDecoder::new();
        let raw = "preamble <html>first</html> middle <html>second</html>";
        assert_eq!(decoder.decode(raw).unwrap(), "first");
    }

    #[test]
    fn test_missing_markers() {
        let decoder = BodyDecoder::new();
        assert_eq!(
            decoder.decode("plain text only"),
            Err(DecodeError::MissingHtmlMarkers("<html>"))
        );
        assert_eq!(
            decoder.decode("<html><body>never closed"),
            Err(DecodeError::MissingHtmlMarkers("</html>"))
        );
        // A close marker before the open marker does not count
        assert_eq!(
            decoder.decode("</html> then <html> open"),
            Err(DecodeError::MissingHtmlMarkers("</html>"))
        );
    }
}
