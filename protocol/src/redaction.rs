use regex::Regex;
use sha2::{Digest, Sha256};

/// Scrubs obvious credentials from terminal output before it is shipped to
/// the remote side. Matching is best-effort; the digest of the raw text lets
/// the caller prove what was scrubbed without retaining it.
pub struct Redactor {
    assignment: Regex,
    bearer: Regex,
    opaque_token: Regex,
    extra: Vec<Regex>,
}

const MASK: &str = "***REDACTED***";

impl Redactor {
    pub fn new(extra_patterns: &[String]) -> anyhow::Result<Self> {
        let assignment = Regex::new(
            r#"(?ix)
            \b(api[_-]?key|access[_-]?key|token|password|passwd|secret|authorization)\b
            \s*[:=]\s*
            ([^\s'"]+|"[^"]*"|'[^']*')
        "#,
        )?;
        let bearer = Regex::new(r"(?i)\bAuthorization\s*:\s*(Bearer|Basic)\s+\S+")?;
        let opaque_token = Regex::new(r"[A-Za-z0-9+/=_-]{40,}")?;

        let mut extra = Vec::with_capacity(extra_patterns.len());
        for pat in extra_patterns {
            extra.push(Regex::new(pat)?);
        }

        Ok(Self {
            assignment,
            bearer,
            opaque_token,
            extra,
        })
    }

    pub fn redact(&self, raw: &str) -> String {
        let mut text = self
            .assignment
            .replace_all(raw, format!("$1={MASK}"))
            .into_owned();
        text = self
            .bearer
            .replace_all(&text, format!("Authorization: $1 {MASK}"))
            .into_owned();
        for pat in &self.extra {
            text = pat.replace_all(&text, MASK).into_owned();
        }
        self.opaque_token.replace_all(&text, MASK).into_owned()
    }
}

pub fn sha256_hex(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_key_value_assignments() {
        let r = Redactor::new(&[]).unwrap();
        let out = r.redact("export API_KEY=sk-live-1234 and password: hunter2");
        assert!(!out.contains("sk-live-1234"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains(MASK));
    }

    #[test]
    fn masks_bearer_headers_and_long_tokens() {
        let r = Redactor::new(&[]).unwrap();
        let out = r.redact(
            "Authorization: Bearer abc.def\nblob=0123456789abcdef0123456789abcdef01234567",
        );
        assert!(!out.contains("abc.def"));
        assert!(!out.contains("0123456789abcdef0123456789abcdef01234567"));
    }

    #[test]
    fn extra_patterns_apply() {
        let r = Redactor::new(&["ghp_[A-Za-z0-9]+".to_string()]).unwrap();
        let out = r.redact("pushed with ghp_abc123");
        assert!(!out.contains("ghp_abc123"));
    }

    #[test]
    fn plain_output_is_untouched() {
        let r = Redactor::new(&[]).unwrap();
        let text = "compiling 3 crates, 0 warnings";
        assert_eq!(r.redact(text), text);
    }
}
