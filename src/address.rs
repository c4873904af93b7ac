//! Sender address canonicalization.
//!
//! Mail relays rewrite envelope senders for bounce handling (SRS, PRVS,
//! bounce tags) and many automated systems generate throwaway local-parts.
//! The functions here undo those rewrites so that one logical sender maps
//! to one grouping key. Every function is total: malformed input is never
//! an error, just a no-op with `matched = false`, and re-applying any of
//! them to an already-canonical address changes nothing.

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder local-part substituted for machine-generated senders.
pub const ENTROPY_PLACEHOLDER: &str = "#entropy#";

const EMAIL_STRIP_CHARS: &[char] = &[
    ' ', '\t', '\r', '\n', ',', ';', '<', '>', '"', '\'', '(', ')',
];

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+@(?:\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*)$",
        )
        .unwrap()
    })
}

/// Display name and bare address extracted from a free-form header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailParts {
    pub display_name: String,
    pub email_address: String,
}

/// Locate the last top-level `<...>` pair, ignoring brackets inside quoted
/// display names and backslash escapes.
fn find_angle_pair_outside_quotes(s: &str) -> (Option<usize>, Option<usize>) {
    let mut in_quotes = false;
    let mut escape = false;
    let mut lt = None;
    let mut gt = None;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => {
                lt = Some(i);
                gt = None;
            }
            '>' if !in_quotes && lt.is_some() => gt = Some(i),
            _ => {}
        }
    }

    (lt, gt)
}

fn unescape_quoted_display(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some(&next @ ('\\' | '"')) => {
                    out.push(next);
                    chars.next();
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Fallback when angle brackets are absent or unusable: take the token
/// ending at the last `@`, everything before it is the display name.
fn fallback_parse_last_at_token(s: &str) -> (String, String) {
    let at = match s.rfind('@') {
        Some(at) => at,
        None => return (s.to_string(), String::new()),
    };
    match s[..at].rfind(char::is_whitespace) {
        Some(j) => {
            // the separator may be a multi-byte whitespace char
            let after = j + s[j..].chars().next().map_or(1, char::len_utf8);
            (s[..j].trim().to_string(), s[after..].trim().to_string())
        }
        None => (String::new(), s.to_string()),
    }
}

/// Parse a free-form `Display Name <addr>` header value into its parts.
///
/// Prefers a properly bracketed address with a quoted or escaped display
/// name; falls back to the last-`@` token otherwise. The extracted address
/// is validated against an address grammar and dropped (empty) when it
/// does not conform. Never fails.
pub fn parse_email_details(raw: &str) -> EmailParts {
    let s = raw.trim();
    if s.is_empty() {
        return EmailParts::default();
    }

    let (mut display, mut email) = match find_angle_pair_outside_quotes(s) {
        (Some(lt), Some(gt)) if lt < gt => {
            let candidate = s[lt + 1..gt].trim().trim_matches(EMAIL_STRIP_CHARS);
            if email_re().is_match(candidate) {
                (s[..lt].trim().to_string(), candidate.to_string())
            } else {
                fallback_parse_last_at_token(s)
            }
        }
        _ => fallback_parse_last_at_token(s),
    };

    email = email.trim().trim_matches(EMAIL_STRIP_CHARS).to_string();
    if !email.is_empty() && !email_re().is_match(&email) {
        email = String::new();
    }

    display = display.trim().trim_end_matches(',').trim().to_string();
    if display.len() >= 2 && display.starts_with('"') && display.ends_with('"') {
        display = unescape_quoted_display(&display[1..display.len() - 1])
            .trim()
            .to_string();
    }

    EmailParts {
        display_name: display,
        email_address: email,
    }
}

/// Reverse a Sender Rewriting Scheme address back to its original form.
///
/// Matches `[prefix+]srsN=h1=h2=origDomain=origLocal@relay`, requiring the
/// `srs` marker at position 0 or directly after a `+`, and at least four
/// `=`-separated fields after it. Returns the input unchanged when the
/// shape does not match or the recovered parts are empty.
pub fn decode_srs(addr: &str) -> (String, bool) {
    let unchanged = || (addr.to_string(), false);

    let at = match addr.find('@') {
        Some(at) => at,
        None => return unchanged(),
    };
    let local = &addr[..at];

    let p = match local.find("srs") {
        Some(p) => p,
        None => return unchanged(),
    };
    if p != 0 && local.as_bytes()[p - 1] != b'+' {
        return unchanged();
    }

    let eq = match local[p..].find('=') {
        Some(off) => p + off,
        None => return unchanged(),
    };

    let parts: Vec<&str> = local[eq + 1..].split('=').collect();
    if parts.len() < 4 {
        return unchanged();
    }

    let orig_domain = parts[2];
    let orig_local = parts[3];
    if orig_domain.is_empty() || orig_local.is_empty() {
        return unchanged();
    }

    (format!("{orig_local}@{orig_domain}"), true)
}

/// Strip a PRVS bounce-verification tag from the local-part.
///
/// The local-part must start with `prvs` or `msprvs` and contain two `=`
/// characters; the remainder after the second `=` is the restored
/// local-part, rejected when empty or itself starting with `=`.
pub fn remove_prvs(addr: &str) -> (String, bool) {
    let unchanged = || (addr.to_string(), false);

    let at = match addr.find('@') {
        Some(at) => at,
        None => return unchanged(),
    };
    let (local, rest) = addr.split_at(at);

    if !local.starts_with("prvs") && !local.starts_with("msprvs") {
        return unchanged();
    }

    let first = match local.find('=') {
        Some(i) => i,
        None => return unchanged(),
    };
    let second = match local[first + 1..].find('=') {
        Some(off) => first + 1 + off,
        None => return unchanged(),
    };

    let restored = &local[second + 1..];
    if restored.is_empty() || restored.starts_with('=') {
        return unchanged();
    }

    (format!("{restored}{rest}"), true)
}

/// Collapse a tagged bounce address (`bounce+tag@`, `bounces-tag@`) to its
/// bare `bounce`/`bounces` local-part.
pub fn normalize_bounce(addr: &str) -> (String, bool) {
    let unchanged = || (addr.to_string(), false);

    let at = match addr.find('@') {
        Some(at) if at > 0 => at,
        _ => return unchanged(),
    };
    let (local, rest) = addr.split_at(at);

    let base = if local.starts_with("bounces") {
        "bounces"
    } else if local.starts_with("bounce") {
        "bounce"
    } else {
        return unchanged();
    };

    match local.as_bytes().get(base.len()) {
        Some(b'+') | Some(b'-') => (format!("{base}{rest}"), true),
        _ => unchanged(),
    }
}

/// Count overlapping two-character windows of the local-part that look
/// like a hex byte: digit+hexletter, hexletter+digit or digit+digit.
fn hex_pair_count(local: &str) -> usize {
    let b = local.as_bytes();
    if b.len() < 2 {
        return 0;
    }
    let is_hex_alpha = |c: u8| matches!(c.to_ascii_lowercase(), b'a'..=b'f');
    b.windows(2)
        .filter(|w| {
            let (a, c) = (w[0], w[1]);
            (a.is_ascii_digit() && is_hex_alpha(c))
                || (is_hex_alpha(a) && c.is_ascii_digit())
                || (a.is_ascii_digit() && c.is_ascii_digit())
        })
        .count()
}

/// Detect a likely machine-generated local-part and replace it with a
/// fixed placeholder so visually distinct random senders share one key.
///
/// The weighted score is `(2*hexPairs + 1.5*digits + 1.5*symbols) / len`;
/// the address is rewritten only when both the score and the raw hex-pair
/// count clear their thresholds.
pub fn score_entropy(addr: &str, entropy_threshold: f64, hex_pair_threshold: usize) -> (String, bool) {
    let unchanged = || (addr.to_string(), false);

    let mut parts = addr.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(l), Some(d), None) if !l.is_empty() => (l, d),
        _ => return unchanged(),
    };

    let digits = local.chars().filter(|c| c.is_ascii_digit()).count();
    let symbols = local
        .chars()
        .filter(|c| matches!(c, '-' | '+' | '=' | '_' | '.'))
        .count();
    let hex_pairs = hex_pair_count(local);

    let weighted = (2.0 * hex_pairs as f64 + 1.5 * digits as f64 + 1.5 * symbols as f64)
        / local.chars().count() as f64;

    if weighted >= entropy_threshold && hex_pairs >= hex_pair_threshold {
        (format!("{ENTROPY_PLACEHOLDER}@{domain}"), true)
    } else {
        unchanged()
    }
}
