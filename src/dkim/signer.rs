//! RSA-SHA256 DKIM signing with relaxed/relaxed canonicalization
//! (RFC 6376 §3.4.2/§3.4.4), extending the donor's simple/simple signer.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Key material returned by a `DkimKeySource` lookup.
#[derive(Clone)]
pub struct KeyMaterial {
    pub private_key_pem: String,
    pub selector: String,
    pub domain: String,
}

/// §6 plug-in contract: `lookupKeys(domain) -> KeyMaterial | None`.
#[async_trait::async_trait]
pub trait DkimKeySource: Send + Sync {
    async fn lookup_keys(&self, domain: &str) -> Option<KeyMaterial>;
}

/// A key source backed by a single statically-configured domain/selector,
/// matching the donor's single-tenant `config.dkim` shape.
pub struct StaticKeySource {
    material: Option<KeyMaterial>,
}

impl StaticKeySource {
    pub fn new(material: Option<KeyMaterial>) -> Self {
        StaticKeySource { material }
    }
}

#[async_trait::async_trait]
impl DkimKeySource for StaticKeySource {
    async fn lookup_keys(&self, domain: &str) -> Option<KeyMaterial> {
        self.material
            .as_ref()
            .filter(|m| m.domain.eq_ignore_ascii_case(domain))
            .cloned()
    }
}

pub struct DkimSigner<K: DkimKeySource> {
    key_source: K,
    headers_to_sign: Vec<String>,
}

impl<K: DkimKeySource> DkimSigner<K> {
    pub fn new(key_source: K, headers_to_sign: Vec<String>) -> Self {
        DkimSigner {
            key_source,
            headers_to_sign,
        }
    }

    /// Signs `raw` if a key is available for `domain`; on any failure the
    /// bytes are returned unmodified (signer never fails a send).
    pub async fn sign(&self, raw: &[u8], domain: &str) -> Vec<u8> {
        let Some(material) = self.key_source.lookup_keys(domain).await else {
            debug!(domain, "no DKIM key material available, leaving message unsigned");
            return raw.to_vec();
        };

        match self.try_sign(raw, &material) {
            Ok(signed) => signed,
            Err(e) => {
                warn!(domain, error = %e, "DKIM signing failed, sending unsigned");
                raw.to_vec()
            }
        }
    }

    fn try_sign(&self, raw: &[u8], material: &KeyMaterial) -> Result<Vec<u8>, String> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(&material.private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&material.private_key_pem))
            .map_err(|e| format!("invalid DKIM private key: {e}"))?;

        let (headers, body) = split_message(raw);
        let canon_body = canonicalize_body_relaxed(&body);
        let body_hash = BASE64.encode(Sha256::digest(canon_body.as_bytes()));

        let signed_headers = self
            .headers_to_sign
            .iter()
            .filter(|h| find_header(&headers, h).is_some())
            .cloned()
            .collect::<Vec<_>>();

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let header_template = format!(
            "v=1; a=rsa-sha256; c=relaxed/relaxed; d={}; s={}; t={}; bh={}; h={}; b=",
            material.domain,
            material.selector,
            timestamp,
            body_hash,
            signed_headers.join(":")
        );

        let mut signing_input = String::new();
        for name in &signed_headers {
            if let Some(value) = find_header(&headers, name) {
                signing_input.push_str(&canonicalize_header_relaxed(name, &value));
                signing_input.push_str("\r\n");
            }
        }
        signing_input.push_str(&format!("dkim-signature:{}", fold_relaxed_value(&header_template)));

        let mut hasher = Sha256::new();
        hasher.update(signing_input.as_bytes());
        let digest = hasher.finalize();

        let padding = Pkcs1v15Sign::new::<Sha256>();
        let mut rng = rand::thread_rng();
        let signature = private_key
            .sign_with_rng(&mut rng, padding, &digest)
            .map_err(|e| format!("RSA signing failed: {e}"))?;
        let signature_b64 = BASE64.encode(signature);

        let dkim_header = format!("DKIM-Signature: {header_template}{signature_b64}\r\n");

        let mut out = Vec::with_capacity(raw.len() + dkim_header.len());
        out.extend_from_slice(dkim_header.as_bytes());
        out.extend_from_slice(raw);
        Ok(out)
    }
}

fn split_message(raw: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(raw);
    if let Some(pos) = text.find("\r\n\r\n") {
        (text[..pos].to_string(), text[pos + 4..].to_string())
    } else {
        (text.to_string(), String::new())
    }
}

fn find_header(headers: &str, name: &str) -> Option<String> {
    let prefix = format!("{name}:");
    headers
        .lines()
        .find(|line| line.to_lowercase().starts_with(&prefix.to_lowercase()))
        .map(|line| line[prefix.len()..].trim().to_string())
}

/// RFC 6376 §3.4.2: unfold, collapse whitespace runs to a single space,
/// trim, lowercase the header name.
fn canonicalize_header_relaxed(name: &str, value: &str) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}:{}", name.to_lowercase(), collapsed.trim())
}

fn fold_relaxed_value(template: &str) -> String {
    template.to_string()
}

/// RFC 6376 §3.4.4: collapse whitespace within lines, remove trailing
/// whitespace, remove trailing empty lines, ensure a single trailing CRLF.
fn canonicalize_body_relaxed(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = normalized
        .split('\n')
        .map(|line| {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            collapsed
        })
        .collect();

    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }

    if lines.is_empty() {
        "\r\n".to_string()
    } else {
        format!("{}\r\n", lines.join("\r\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/dkim_test_key.pem");

    #[tokio::test]
    async fn unsigned_when_no_key_available() {
        let source = StaticKeySource::new(None);
        let signer = DkimSigner::new(source, vec!["from".to_string()]);
        let raw = b"From: a@x.test\r\n\r\nhi";
        let out = signer.sign(raw, "x.test").await;
        assert_eq!(out, raw.to_vec());
    }

    #[tokio::test]
    async fn signs_with_relaxed_canonicalization_header() {
        let material = KeyMaterial {
            private_key_pem: TEST_PRIVATE_KEY.to_string(),
            selector: "default".to_string(),
            domain: "x.test".to_string(),
        };
        let source = StaticKeySource::new(Some(material));
        let signer = DkimSigner::new(
            source,
            vec!["from".to_string(), "subject".to_string()],
        );
        let raw = b"From: a@x.test\r\nSubject: hi\r\n\r\nhello world\r\n";
        let out = signer.sign(raw, "x.test").await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("DKIM-Signature:"));
        assert!(text.contains("c=relaxed/relaxed"));
        assert!(text.contains("d=x.test"));
        assert!(text.contains("bh="));
    }

    #[test]
    fn body_canonicalization_strips_trailing_blank_lines() {
        let canon = canonicalize_body_relaxed("hello   world  \n\n\n");
        assert_eq!(canon, "hello world\r\n");
    }

    #[test]
    fn header_canonicalization_collapses_whitespace() {
        let canon = canonicalize_header_relaxed("Subject", "  hi    there  ");
        assert_eq!(canon, "subject:hi there");
    }
}
