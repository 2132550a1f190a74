use regex::Regex;

/// Leftover of an `=3D` escape that survived decoding.
const ESCAPE_REMNANT: &str = "3D";

pub struct LinkExtractor {
    base_url: String,
    anchored_regex: Regex,
    generic_regex: Regex,
}

impl LinkExtractor {
    /// `base_url` is the verification URL up to and including
    /// `verification-token=`; the token is appended as is.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            anchored_regex: Regex::new(r"(?i)verification-token=([A-Za-z0-9]+(?:-[A-Za-z0-9]+)+)")
                .unwrap(),
            generic_regex: Regex::new(r"(?i)=([A-Za-z0-9]+(?:-[A-Za-z0-9]+)+)").unwrap(),
        }
    }

    /// Dash-grouped token following the first matching `=`, with a leading
    /// `3D` remnant removed.
    pub fn extract_token(&self, decoded_body: &str) -> Option<String> {
        let captured = self
            .anchored_regex
            .captures(decoded_body)
            .or_else(|| self.generic_regex.captures(decoded_body))
            .and_then(|caps| caps.get(1))?
            .as_str();

        let token = captured.strip_prefix(ESCAPE_REMNANT).unwrap_or(captured);
        Some(token.to_string())
    }

    pub fn extract(&self, decoded_body: &str) -> Option<String> {
        match self.extract_token(decoded_body) {
            Some(token) => {
                let url = format!("{}{}", self.base_url, token);
                log::info!("Extracted verification link: {url}");
                Some(url)
            }
            None => {
                log::warn!("No verification token found in message body");
                None
            }
        }
    }
}
