//! Score→action mapping and `X-Spam-*` header injection (§4.8).

use crate::config::SpamConfig;

use super::client::{Verdict, VerdictAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    AcceptClean,
    AcceptWithHeaders,
    Greylist,
    Reject,
}

/// Maps a scanner verdict onto a delivery decision using configured
/// thresholds. An explicit `action` from the scanner wins outright;
/// otherwise the score is compared against the thresholds in descending
/// severity.
pub fn classify(verdict: &Verdict, config: &SpamConfig) -> PolicyAction {
    if verdict.action == Some(VerdictAction::Reject) {
        return PolicyAction::Reject;
    }
    if verdict.action == Some(VerdictAction::Greylist) {
        return PolicyAction::Greylist;
    }

    if verdict.score >= config.reject_threshold {
        PolicyAction::Reject
    } else if verdict.score >= config.greylist_threshold {
        PolicyAction::Greylist
    } else if verdict.score >= config.add_header_threshold {
        PolicyAction::AcceptWithHeaders
    } else {
        PolicyAction::AcceptClean
    }
}

/// Builds the `X-Spam-*` headers to prepend when `add-header` applies.
pub fn build_headers(verdict: &Verdict, config: &SpamConfig) -> String {
    let status = if verdict.score >= config.reject_threshold {
        "Yes"
    } else {
        "No"
    };
    let stars = "*".repeat((verdict.score.max(0.0) as usize).min(50));
    let symbols = if verdict.symbols.is_empty() {
        "none".to_string()
    } else {
        verdict.symbols.join(",")
    };

    format!(
        "X-Spam-Status: {status}, score={:.2} required={:.2}\r\n\
         X-Spam-Score: {:.2}\r\n\
         X-Spam-Level: {stars}\r\n\
         X-Spam-Action: add-header\r\n\
         X-Spam-Symbols: {symbols}\r\n",
        verdict.score, verdict.required_score, verdict.score
    )
}

/// Prepends headers to the front of a raw RFC 5322 message (before the
/// first header, not inside the body).
pub fn prepend_headers(raw: &[u8], headers: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + headers.len());
    out.extend_from_slice(headers.as_bytes());
    out.extend_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpamConfig {
        SpamConfig {
            enabled: true,
            inbound_enabled: true,
            outbound_enabled: false,
            host: "127.0.0.1".to_string(),
            port: 11333,
            timeout_secs: 10,
            reject_threshold: 15.0,
            greylist_threshold: 6.0,
            add_header_threshold: 4.0,
        }
    }

    fn verdict(score: f64) -> Verdict {
        Verdict {
            action: None,
            score,
            required_score: 5.0,
            symbols: vec!["BAYES_SPAM".to_string()],
            messages: vec![],
        }
    }

    #[test]
    fn scores_map_to_the_right_tier() {
        let cfg = config();
        assert_eq!(classify(&verdict(20.0), &cfg), PolicyAction::Reject);
        assert_eq!(classify(&verdict(7.0), &cfg), PolicyAction::Greylist);
        assert_eq!(classify(&verdict(4.5), &cfg), PolicyAction::AcceptWithHeaders);
        assert_eq!(classify(&verdict(1.0), &cfg), PolicyAction::AcceptClean);
    }

    #[test]
    fn explicit_reject_action_overrides_score() {
        let cfg = config();
        let mut v = verdict(0.0);
        v.action = Some(VerdictAction::Reject);
        assert_eq!(classify(&v, &cfg), PolicyAction::Reject);
    }

    #[test]
    fn stars_are_capped_at_fifty() {
        let cfg = config();
        let headers = build_headers(&verdict(200.0), &cfg);
        let stars_line = headers.lines().find(|l| l.starts_with("X-Spam-Level")).unwrap();
        let stars = stars_line.trim_start_matches("X-Spam-Level: ");
        assert_eq!(stars.len(), 50);
    }
}
