//! SEARCH/SORT/THREAD criteria parsing and evaluation (RFC 3501 §6.4.4,
//! §6.4.5, RFC 5256).
//!
//! The grammar is small enough to hand-parse as a recursive-descent
//! tokenizer over whitespace-separated atoms, with `NOT`/`OR` and
//! parenthesized groups as the only structural forms.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{MailError, Result};
use crate::mailstore::model::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchCriteria {
    All,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Draft,
    Undraft,
    Flagged,
    Unflagged,
    Seen,
    Unseen,
    New,
    Old,
    Recent,
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Subject(String),
    Body(String),
    Text(String),
    Header(String, String),
    Keyword(String),
    Unkeyword(String),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Larger(usize),
    Smaller(usize),
    Uid(String),
    SequenceSet(String),
    Not(Box<SearchCriteria>),
    Or(Box<SearchCriteria>, Box<SearchCriteria>),
    And(Vec<SearchCriteria>),
}

impl SearchCriteria {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input);
        let mut pos = 0;
        let mut terms = Vec::new();
        while pos < tokens.len() {
            let (term, next) = parse_term(&tokens, pos)?;
            terms.push(term);
            pos = next;
        }
        if terms.is_empty() {
            return Err(MailError::SyntaxError("empty SEARCH criteria".to_string()));
        }
        Ok(if terms.len() == 1 {
            terms.into_iter().next().unwrap()
        } else {
            SearchCriteria::And(terms)
        })
    }

    /// Evaluates this criterion against one message in its snapshot
    /// position (1-based sequence number).
    pub fn matches(&self, msg: &Message, seq: usize, is_first_unseen: bool) -> bool {
        let flags = msg.flags();
        match self {
            SearchCriteria::All => true,
            SearchCriteria::Answered => flags.answered,
            SearchCriteria::Unanswered => !flags.answered,
            SearchCriteria::Deleted => flags.deleted,
            SearchCriteria::Undeleted => !flags.deleted,
            SearchCriteria::Draft => flags.draft,
            SearchCriteria::Undraft => !flags.draft,
            SearchCriteria::Flagged => flags.flagged,
            SearchCriteria::Unflagged => !flags.flagged,
            SearchCriteria::Seen => flags.seen,
            SearchCriteria::Unseen => !flags.seen,
            SearchCriteria::New => flags.recent && !flags.seen,
            SearchCriteria::Old => !flags.recent,
            SearchCriteria::Recent => flags.recent,
            SearchCriteria::From(needle) => contains_ci(msg.from_addr.as_deref().unwrap_or(""), needle),
            SearchCriteria::To(needle) => msg.to_addrs().iter().any(|a| contains_ci(a, needle)),
            SearchCriteria::Cc(_needle) | SearchCriteria::Bcc(_needle) => false,
            SearchCriteria::Subject(needle) => contains_ci(msg.subject.as_deref().unwrap_or(""), needle),
            SearchCriteria::Body(needle) => {
                contains_ci(msg.text_body.as_deref().unwrap_or(""), needle)
                    || contains_ci(msg.html_body.as_deref().unwrap_or(""), needle)
            }
            SearchCriteria::Text(needle) => {
                contains_ci(&String::from_utf8_lossy(&msg.raw), needle)
            }
            SearchCriteria::Header(name, value) => header_contains(&msg.raw, name, value),
            SearchCriteria::Keyword(name) => flags.keywords.iter().any(|k| k.eq_ignore_ascii_case(name)),
            SearchCriteria::Unkeyword(name) => !flags.keywords.iter().any(|k| k.eq_ignore_ascii_case(name)),
            SearchCriteria::Before(date) => msg.internal_date.date_naive() < *date,
            SearchCriteria::On(date) => msg.internal_date.date_naive() == *date,
            SearchCriteria::Since(date) => msg.internal_date.date_naive() >= *date,
            SearchCriteria::SentBefore(date) => header_date(&msg.raw) < Some(*date),
            SearchCriteria::SentOn(date) => header_date(&msg.raw) == Some(*date),
            SearchCriteria::SentSince(date) => header_date(&msg.raw) >= Some(*date),
            SearchCriteria::Larger(n) => msg.size() > *n,
            SearchCriteria::Smaller(n) => msg.size() < *n,
            SearchCriteria::Uid(set) => matches_sequence_set(set, msg.uid as usize),
            SearchCriteria::SequenceSet(set) => matches_sequence_set(set, seq),
            SearchCriteria::Not(inner) => !inner.matches(msg, seq, is_first_unseen),
            SearchCriteria::Or(a, b) => a.matches(msg, seq, is_first_unseen) || b.matches(msg, seq, is_first_unseen),
            SearchCriteria::And(terms) => terms.iter().all(|t| t.matches(msg, seq, is_first_unseen)),
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn header_contains(raw: &[u8], name: &str, value: &str) -> bool {
    let text = String::from_utf8_lossy(raw);
    let header_block = text.split("\r\n\r\n").next().unwrap_or("");
    header_block
        .lines()
        .any(|line| {
            line.split_once(':')
                .map(|(k, v)| k.trim().eq_ignore_ascii_case(name) && contains_ci(v.trim(), value))
                .unwrap_or(false)
        })
}

fn header_date(raw: &[u8]) -> Option<NaiveDate> {
    let text = String::from_utf8_lossy(raw);
    let header_block = text.split("\r\n\r\n").next().unwrap_or("");
    let date_line = header_block
        .lines()
        .find(|line| line.split_once(':').map(|(k, _)| k.trim().eq_ignore_ascii_case("Date")).unwrap_or(false))?;
    let value = date_line.split_once(':')?.1.trim();
    DateTime::parse_from_rfc2822(value).ok().map(|d| d.naive_utc().date())
}

/// Evaluates a single IMAP sequence-set expression (`N`, `N:M`, `N:*`)
/// against one number. `*` is interpreted as "unbounded" here since the
/// caller already knows the set is being matched one item at a time.
pub fn matches_sequence_set(spec: &str, n: usize) -> bool {
    for part in spec.split(',') {
        if let Some((lo, hi)) = part.split_once(':') {
            let lo = parse_seq_bound(lo, 1);
            let hi = parse_seq_bound(hi, usize::MAX);
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if n >= lo && n <= hi {
                return true;
            }
        } else if part == "*" {
            return true;
        } else if let Ok(v) = part.parse::<usize>() {
            if v == n {
                return true;
            }
        }
    }
    false
}

fn parse_seq_bound(s: &str, star_value: usize) -> usize {
    if s == "*" {
        star_value
    } else {
        s.parse().unwrap_or(star_value)
    }
}

/// Expands a sequence-set expression to the full sorted, deduped list of
/// matching numbers within `1..=max`.
pub fn expand_sequence_set(spec: &str, max: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for n in 1..=max {
        if matches_sequence_set(spec, n) {
            out.push(n);
        }
    }
    out
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut s = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                s.push(c);
            }
            tokens.push(s);
            continue;
        }
        let mut s = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            s.push(c);
            chars.next();
        }
        tokens.push(s);
    }
    tokens
}

fn parse_term(tokens: &[String], pos: usize) -> Result<(SearchCriteria, usize)> {
    let tok = tokens
        .get(pos)
        .ok_or_else(|| MailError::SyntaxError("unexpected end of SEARCH criteria".to_string()))?;

    if tok == "(" {
        let mut inner_terms = Vec::new();
        let mut cursor = pos + 1;
        while tokens.get(cursor).map(String::as_str) != Some(")") {
            let (term, next) = parse_term(tokens, cursor)?;
            inner_terms.push(term);
            cursor = next;
            if cursor >= tokens.len() {
                return Err(MailError::SyntaxError("unterminated SEARCH group".to_string()));
            }
        }
        let combined = if inner_terms.len() == 1 {
            inner_terms.into_iter().next().unwrap()
        } else {
            SearchCriteria::And(inner_terms)
        };
        return Ok((combined, cursor + 1));
    }

    let upper = tok.to_uppercase();
    match upper.as_str() {
        "NOT" => {
            let (inner, next) = parse_term(tokens, pos + 1)?;
            Ok((SearchCriteria::Not(Box::new(inner)), next))
        }
        "OR" => {
            let (a, next) = parse_term(tokens, pos + 1)?;
            let (b, next2) = parse_term(tokens, next)?;
            Ok((SearchCriteria::Or(Box::new(a), Box::new(b)), next2))
        }
        "ALL" => Ok((SearchCriteria::All, pos + 1)),
        "ANSWERED" => Ok((SearchCriteria::Answered, pos + 1)),
        "UNANSWERED" => Ok((SearchCriteria::Unanswered, pos + 1)),
        "DELETED" => Ok((SearchCriteria::Deleted, pos + 1)),
        "UNDELETED" => Ok((SearchCriteria::Undeleted, pos + 1)),
        "DRAFT" => Ok((SearchCriteria::Draft, pos + 1)),
        "UNDRAFT" => Ok((SearchCriteria::Undraft, pos + 1)),
        "FLAGGED" => Ok((SearchCriteria::Flagged, pos + 1)),
        "UNFLAGGED" => Ok((SearchCriteria::Unflagged, pos + 1)),
        "SEEN" => Ok((SearchCriteria::Seen, pos + 1)),
        "UNSEEN" => Ok((SearchCriteria::Unseen, pos + 1)),
        "NEW" => Ok((SearchCriteria::New, pos + 1)),
        "OLD" => Ok((SearchCriteria::Old, pos + 1)),
        "RECENT" => Ok((SearchCriteria::Recent, pos + 1)),
        "FROM" => with_arg(tokens, pos, SearchCriteria::From),
        "TO" => with_arg(tokens, pos, SearchCriteria::To),
        "CC" => with_arg(tokens, pos, SearchCriteria::Cc),
        "BCC" => with_arg(tokens, pos, SearchCriteria::Bcc),
        "SUBJECT" => with_arg(tokens, pos, SearchCriteria::Subject),
        "BODY" => with_arg(tokens, pos, SearchCriteria::Body),
        "TEXT" => with_arg(tokens, pos, SearchCriteria::Text),
        "KEYWORD" => with_arg(tokens, pos, SearchCriteria::Keyword),
        "UNKEYWORD" => with_arg(tokens, pos, SearchCriteria::Unkeyword),
        "UID" => with_arg(tokens, pos, SearchCriteria::Uid),
        "HEADER" => {
            let name = tokens
                .get(pos + 1)
                .ok_or_else(|| MailError::SyntaxError("HEADER requires a field name".to_string()))?
                .clone();
            let value = tokens.get(pos + 2).cloned().unwrap_or_default();
            Ok((SearchCriteria::Header(name, value), pos + 3))
        }
        "BEFORE" => with_date(tokens, pos, SearchCriteria::Before),
        "ON" => with_date(tokens, pos, SearchCriteria::On),
        "SINCE" => with_date(tokens, pos, SearchCriteria::Since),
        "SENTBEFORE" => with_date(tokens, pos, SearchCriteria::SentBefore),
        "SENTON" => with_date(tokens, pos, SearchCriteria::SentOn),
        "SENTSINCE" => with_date(tokens, pos, SearchCriteria::SentSince),
        "LARGER" => with_size(tokens, pos, SearchCriteria::Larger),
        "SMALLER" => with_size(tokens, pos, SearchCriteria::Smaller),
        _ => Ok((SearchCriteria::SequenceSet(tok.clone()), pos + 1)),
    }
}

fn with_arg(
    tokens: &[String],
    pos: usize,
    ctor: impl FnOnce(String) -> SearchCriteria,
) -> Result<(SearchCriteria, usize)> {
    let arg = tokens
        .get(pos + 1)
        .ok_or_else(|| MailError::SyntaxError(format!("{} requires an argument", tokens[pos])))?
        .clone();
    Ok((ctor(arg), pos + 2))
}

fn with_date(
    tokens: &[String],
    pos: usize,
    ctor: impl FnOnce(NaiveDate) -> SearchCriteria,
) -> Result<(SearchCriteria, usize)> {
    let arg = tokens
        .get(pos + 1)
        .ok_or_else(|| MailError::SyntaxError(format!("{} requires a date", tokens[pos])))?;
    let date = NaiveDate::parse_from_str(arg, "%d-%b-%Y")
        .map_err(|_| MailError::SyntaxError(format!("invalid IMAP date: {arg}")))?;
    Ok((ctor(date), pos + 2))
}

fn with_size(
    tokens: &[String],
    pos: usize,
    ctor: impl FnOnce(usize) -> SearchCriteria,
) -> Result<(SearchCriteria, usize)> {
    let arg = tokens
        .get(pos + 1)
        .ok_or_else(|| MailError::SyntaxError(format!("{} requires a size", tokens[pos])))?;
    let size = arg
        .parse::<usize>()
        .map_err(|_| MailError::SyntaxError(format!("invalid size: {arg}")))?;
    Ok((ctor(size), pos + 2))
}

/// Normalizes a subject for SORT/THREAD by stripping one or more leading
/// `Re:`/`Fwd:` tags and surrounding whitespace (RFC 5256 §3).
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        if let Some(rest) = lower.strip_prefix("re:") {
            s = s[s.len() - rest.len()..].trim_start();
        } else if let Some(rest) = lower.strip_prefix("fwd:") {
            s = s[s.len() - rest.len()..].trim_start();
        } else {
            break;
        }
    }
    s.to_lowercase()
}

/// Orders a folder snapshot by the given SORT keys (RFC 5256 §3). Each
/// key's `reverse` flag negates only that key's contribution; ties fall
/// through to the next key and finally to UID ascending.
pub fn sort_messages(messages: &[Message], keys: &[String], reverse: &[bool]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..messages.len()).collect();
    indices.sort_by(|&a, &b| {
        for (key, &rev) in keys.iter().zip(reverse.iter()) {
            let ordering = compare_by_key(&messages[a], &messages[b], key);
            let ordering = if rev { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        messages[a].uid.cmp(&messages[b].uid)
    });
    indices
}

fn compare_by_key(a: &Message, b: &Message, key: &str) -> std::cmp::Ordering {
    match key {
        "ARRIVAL" => a.internal_date.cmp(&b.internal_date),
        "DATE" => header_date(&a.raw).cmp(&header_date(&b.raw)),
        "FROM" => a.from_addr.as_deref().unwrap_or("").cmp(b.from_addr.as_deref().unwrap_or("")),
        "SIZE" => a.size().cmp(&b.size()),
        "SUBJECT" => normalize_subject(a.subject.as_deref().unwrap_or(""))
            .cmp(&normalize_subject(b.subject.as_deref().unwrap_or(""))),
        "TO" => {
            let at = a.to_addrs().first().cloned().unwrap_or_default();
            let bt = b.to_addrs().first().cloned().unwrap_or_default();
            at.cmp(&bt)
        }
        _ => std::cmp::Ordering::Equal,
    }
}

/// Groups a folder snapshot into threads by normalized subject (RFC 5256
/// ORDEREDSUBJECT): messages with the same stripped subject form one
/// thread, threads ordered by their earliest message.
pub fn thread_by_subject(messages: &[Message]) -> Vec<Vec<usize>> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        let subject = normalize_subject(msg.subject.as_deref().unwrap_or(""));
        if let Some(group) = groups.iter_mut().find(|(s, _)| *s == subject) {
            group.1.push(idx);
        } else {
            groups.push((subject, vec![idx]));
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

/// Groups by References/In-Reply-To ancestry (RFC 5256 REFERENCES):
/// messages sharing any Message-ID in their reference chain join one
/// thread. Falls back to one singleton thread per otherwise-unlinked
/// message.
pub fn thread_by_references(messages: &[Message]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        let mut refs = msg.references();
        if let Some(parent) = &msg.in_reply_to {
            refs.push(parent.clone());
        }
        let joined = groups.iter_mut().find(|group| {
            group.iter().any(|&member| {
                let m = &messages[member];
                m.message_id
                    .as_ref()
                    .map(|id| refs.iter().any(|r| r == id))
                    .unwrap_or(false)
                    || m.references().iter().any(|r| {
                        msg.message_id.as_ref().map(|id| id == r).unwrap_or(false)
                    })
            })
        });
        match joined {
            Some(group) => group.push(idx),
            None => groups.push(vec![idx]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_all() {
        assert_eq!(SearchCriteria::parse("ALL").unwrap(), SearchCriteria::All);
    }

    #[test]
    fn parses_subject_with_quotes() {
        let parsed = SearchCriteria::parse(r#"SUBJECT "hello world""#).unwrap();
        assert_eq!(parsed, SearchCriteria::Subject("hello world".to_string()));
    }

    #[test]
    fn parses_or_and_not() {
        let parsed = SearchCriteria::parse("OR SEEN NOT FLAGGED").unwrap();
        assert_eq!(
            parsed,
            SearchCriteria::Or(Box::new(SearchCriteria::Seen), Box::new(SearchCriteria::Not(Box::new(SearchCriteria::Flagged))))
        );
    }

    #[test]
    fn parses_parenthesized_group_as_and() {
        let parsed = SearchCriteria::parse("(SEEN FLAGGED)").unwrap();
        assert_eq!(parsed, SearchCriteria::And(vec![SearchCriteria::Seen, SearchCriteria::Flagged]));
    }

    #[test]
    fn sequence_set_matches_ranges_and_stars() {
        assert!(matches_sequence_set("1:3", 2));
        assert!(matches_sequence_set("5,7:9", 8));
        assert!(matches_sequence_set("10:*", 999));
        assert!(!matches_sequence_set("1:3", 4));
    }

    #[test]
    fn normalizes_nested_re_and_fwd() {
        assert_eq!(normalize_subject("Re: Fwd: Re: hello"), "hello");
    }
}
