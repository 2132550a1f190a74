use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;

/// One inbound email, alive for a single pipeline invocation.
#[derive(Debug, Default, Clone)]
pub struct InboundMessage {
    pub from: String, // Envelope sender
    pub to: String,   // Envelope recipient the identity is keyed by
    /// Header names are lowercased; repeated headers are joined with a space
    pub headers: HashMap<String, String>,
    /// Complete message text, headers included
    pub raw: String,
}

impl InboundMessage {
    /// Build a message from a raw RFC 5322 text.
    ///
    /// Envelope addresses are taken from the arguments when given, otherwise
    /// from `Return-Path`/`From` and `Delivered-To`/`To`.
    pub fn parse(raw: &str, from: Option<&str>, to: Option<&str>) -> Self {
        let headers = parse_headers(raw);

        let from = from
            .map(str::to_string)
            .or_else(|| headers.get("return-path").and_then(|v| extract_email_from_header(v)))
            .or_else(|| headers.get("from").and_then(|v| extract_email_from_header(v)))
            .unwrap_or_default();
        let to = to
            .map(str::to_string)
            .or_else(|| headers.get("delivered-to").and_then(|v| extract_email_from_header(v)))
            .or_else(|| headers.get("to").and_then(|v| extract_email_from_header(v)))
            .map(|address| normalize_address(&address))
            .unwrap_or_default();

        Self {
            from,
            to,
            headers,
            raw: raw.to_string(),
        }
    }

    /// Build a message from pieces collected over an SMTP transaction.
    pub fn from_parts(from: &str, to: &str, headers: Vec<(String, String)>, body: &str) -> Self {
        let mut raw = String::new();
        let mut map: HashMap<String, String> = HashMap::new();

        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
            let key = name.to_lowercase();
            match map.get_mut(&key) {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(&value);
                }
                None => {
                    map.insert(key, value);
                }
            }
        }
        raw.push_str("\r\n");
        raw.push_str(body);

        let to = extract_email_from_header(to).unwrap_or_else(|| to.to_string());
        Self {
            from: extract_email_from_header(from).unwrap_or_else(|| from.to_string()),
            to: normalize_address(&to),
            headers: map,
            raw,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Subject with RFC 2047 encoded words decoded.
    pub fn subject(&self) -> Option<String> {
        self.header("subject").map(decode_mime_header)
    }
}

fn parse_headers(raw: &str) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last_header_key: Option<String> = None;

    for line in raw.lines() {
        if line.trim().is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header
            if let Some(existing) = last_header_key.as_ref().and_then(|k| headers.get_mut(k)) {
                existing.push(' ');
                existing.push_str(line.trim());
            }
            continue;
        }

        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim();
            last_header_key = Some(key.clone());

            match headers.get_mut(&key) {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(value);
                }
                None => {
                    headers.insert(key, value.to_string());
                }
            }
        }
    }

    headers
}

/// Bare address out of `Name <user@host>`, `<user@host>` or `user@host`.
pub fn extract_email_from_header(value: &str) -> Option<String> {
    let value = value.trim();
    let address = match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    };
    let address = address.trim();

    if address.contains('@') && !address.contains(char::is_whitespace) {
        Some(address.to_string())
    } else {
        None
    }
}

/// Lowercase the domain part; identities are keyed by the normalized form.
pub fn normalize_address(address: &str) -> String {
    match address.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => address.to_string(),
    }
}

/// Decode RFC 2047 encoded words (`=?charset?B|Q?text?=`).
///
/// Only UTF-8 and ASCII-compatible charsets are handled; anything that
/// fails to decode is kept verbatim.
pub fn decode_mime_header(value: &str) -> String {
    let mut result = String::new();
    let mut rest = value;
    let mut previous_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let Some(decoded_len) = decode_encoded_word(&rest[start..]) else {
            result.push_str(&rest[..start + 2]);
            rest = &rest[start + 2..];
            previous_was_encoded = false;
            continue;
        };
        let (decoded, consumed) = decoded_len;

        let between = &rest[..start];
        // Whitespace between two adjacent encoded words is dropped
        if !(previous_was_encoded && between.trim().is_empty()) {
            result.push_str(between);
        }
        result.push_str(&decoded);
        rest = &rest[start + consumed..];
        previous_was_encoded = true;
    }

    result.push_str(rest);
    result
}

/// Decode one encoded word at the start of `input`, returning the text and
/// the number of bytes consumed.
fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let body = input.strip_prefix("=?")?;
    let mut parts = body.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let remainder = parts.next()?;
    let end = remainder.find("?=")?;
    let text = &remainder[..end];

    let charset = charset.to_lowercase();
    if !matches!(charset.as_str(), "utf-8" | "us-ascii" | "iso-8859-1") {
        return None;
    }

    let bytes = match encoding.to_uppercase().as_str() {
        "B" => general_purpose::STANDARD.decode(text).ok()?,
        "Q" => decode_q(text)?,
        _ => return None,
    };

    let decoded = if charset == "iso-8859-1" {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        String::from_utf8(bytes).ok()?
    };

    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decoded, consumed))
}

fn decode_q(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = text.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "Return-Path: <no-reply@511.org>\r\n\
Delivered-To: zettabyte-numerous-afternoon@transitrid.ing\r\n\
From: 511 SF Bay <no-reply@511.org>\r\n\
To: zettabyte-numerous-afternoon@transitrid.ing\r\n\
Subject: 511 SF Bay:\r\n Developer Token Request\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body>hi</body></html>\r\n";

    #[test]
    fn test_parse_headers_and_envelope() {
        let message = InboundMessage::parse(RAW, None, None);
        assert_eq!(message.from, "no-reply@511.org");
        assert_eq!(message.to, "zettabyte-numerous-afternoon@transitrid.ing");
        assert_eq!(
            message.subject().as_deref(),
            Some("511 SF Bay: Developer Token Request")
        );
        assert_eq!(message.header("CONTENT-TYPE"), Some("text/html; charset=utf-8"));
        assert_eq!(message.raw, RAW);
    }

    #[test]
    fn test_explicit_envelope_wins() {
        let message = InboundMessage::parse(RAW, Some("a@b.test"), Some("c@d.test"));
        assert_eq!(message.from, "a@b.test");
        assert_eq!(message.to, "c@d.test");
    }

    #[test]
    fn test_from_parts_rebuilds_raw() {
        let message = InboundMessage::from_parts(
            "<no-reply@511.org>",
            "<x-y-z@transitrid.ing>",
            vec![
                ("Subject".to_string(), "511 SF Bay: Welcome to Open APIs".to_string()),
                ("Received".to_string(), "one".to_string()),
                ("Received".to_string(), "two".to_string()),
            ],
            "<html>body</html>",
        );
        assert_eq!(message.from, "no-reply@511.org");
        assert_eq!(message.to, "x-y-z@transitrid.ing");
        assert_eq!(message.header("received"), Some("one two"));
        assert!(message.raw.starts_with("Subject: 511 SF Bay: Welcome to Open APIs\r\n"));
        assert!(message.raw.ends_with("\r\n\r\n<html>body</html>"));
    }

    #[test]
    fn test_recipient_domain_is_lowercased() {
        let message = InboundMessage::from_parts(
            "<no-reply@511.org>",
            "<Zettabyte-numerous-afternoon@Transitrid.ING>",
            Vec::new(),
            "",
        );
        // Local part is left alone
        assert_eq!(message.to, "Zettabyte-numerous-afternoon@transitrid.ing");

        let message = InboundMessage::parse(RAW, None, Some("a-b-c@TRANSITRID.ing"));
        assert_eq!(message.to, "a-b-c@transitrid.ing");

        assert_eq!(normalize_address("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_extract_email_from_header() {
        assert_eq!(
            extract_email_from_header("Terry S <terry@aol.com>"),
            Some("terry@aol.com".to_string())
        );
        assert_eq!(
            extract_email_from_header("plain@example.com"),
            Some("plain@example.com".to_string())
        );
        assert_eq!(extract_email_from_header("<>"), None);
        assert_eq!(extract_email_from_header("undisclosed recipients"), None);
    }

    #[test]
    fn test_decode_mime_header() {
        // "511 SF Bay: Welcome to Open APIs"
        assert_eq!(
            decode_mime_header("=?utf-8?B?NTExIFNGIEJheTogV2VsY29tZSB0byBPcGVuIEFQSXM=?="),
            "511 SF Bay: Welcome to Open APIs"
        );
        assert_eq!(
            decode_mime_header("=?UTF-8?Q?511_SF_Bay:_Developer_Token_Request?="),
            "511 SF Bay: Developer Token Request"
        );
        assert_eq!(
            decode_mime_header("Re: =?utf-8?Q?caf=C3=A9?= =?utf-8?Q?_au_lait?= now"),
            "Re: café au lait now"
        );
        assert_eq!(decode_mime_header("no encoding here"), "no encoding here");
        assert_eq!(decode_mime_header("broken =?utf-8?X?abc?="), "broken =?utf-8?X?abc?=");
    }
}
