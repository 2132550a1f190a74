use regex::Regex;

pub struct TokenExtractor {
    token_regex: Regex,
}

impl Default for TokenExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenExtractor {
    pub fn new() -> Self {
        Self {
            token_regex: Regex::new(r"(?i)Here is your token:\s*<br\s*/?>\s*([\w-]+)").unwrap(),
        }
    }

    /// Issued API token from a decoded welcome mail.
    pub fn extract(&self, decoded_body: &str) -> Option<String> {
        let token = self
            .token_regex
            .captures(decoded_body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        if token.is_none() {
            log::warn!("Token not found in the email body");
        }
        token
    }
}
