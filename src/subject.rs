//! Subject-line template extraction.
//!
//! Automated senders reuse one subject skeleton and vary only the volatile
//! parts: dates, times, counters, generated identifiers. Collapsing those
//! tokens into fixed placeholders turns every instance of a campaign into
//! the same template string, which is what the per-sender aggregation
//! counts. The scan is a single left-to-right pass over whitespace
//! tokens with at most three tokens of lookahead, and is deterministic
//! and total over any input.
//!
//! Placeholders: `{r}` reply/forward prefix, `{d}` date, `{t}` date+time
//! or relative time, `{tm}` time of day, `{m}` standalone month, `{i}`
//! integer, `{#}` identifier-like token.

use std::collections::HashSet;

const MONTHS: &[&str] = &[
    "jan", "january", "feb", "february", "mar", "march", "apr", "april", "may", "jun", "june",
    "jul", "july", "aug", "august", "sep", "sept", "september", "oct", "october", "nov",
    "november", "dec", "december",
];

const DAYS_OF_WEEK: &[&str] = &[
    "mon", "monday", "tue", "tues", "tuesday", "wed", "wednesday", "thu", "thur", "thurs",
    "thursday", "fri", "friday", "sat", "saturday", "sun", "sunday",
];

const TIMEZONES: &[&str] = &[
    "utc", "gmt", "est", "edt", "cst", "cdt", "mst", "mdt", "pst", "pdt",
];

const RELATIVE_TIME_UNITS: &[&str] = &[
    "second", "seconds", "sec", "secs", "minute", "minutes", "min", "mins", "hour", "hours",
    "hr", "hrs", "day", "days", "week", "weeks", "month", "months", "year", "years", "yr", "yrs",
];

/// Reply, forward and calendar/notification prefixes across the locales
/// seen in production mail logs.
const PREFIX_WORDS: &[&str] = &[
    // reply
    "re", "aw", "sv", "vs", "odp", "ynt", "ré",
    // forward
    "fw", "fwd", "wg", "tr", "rv", "reenv", "enc", "inoltro", "pd", "vb", "vl", "iletilen",
    "转发", "전달",
    // calendar verbs
    "accepted", "declined", "tentative", "canceled", "cancelled", "angenommen", "abgelehnt",
    "aktualisiert", "actualizado", "actualizada", "aggiornato", "aggiornata",
    // notification noise
    "updated", "invitation", "reminder", "notification", "alert", "notice",
];

const WRAP_CHARS: &[char] = &[
    '[', ']', '(', ')', '{', '}', '<', '>', ',', '.', ';', '!', '"', '\'', '`', '*', '~', '^',
];
const TAIL_PUNCT: &[char] = &[',', '.', ';', '!', '?'];
// Wrapping set without the decorative extras, used for label heads
const LABEL_STRIP: &[char] = &[
    '[', ']', '(', ')', '{', '}', '<', '>', ',', '.', ';', '!', '"', '\'',
];

const IDENT_MARKS: &[char] = &[
    '-', '_', '/', '\\', ':', '+', '@', '=', '#', '%', '&', '?', '~', '.',
];

fn is_edge_dirty(c: char) -> bool {
    WRAP_CHARS.contains(&c) || TAIL_PUNCT.contains(&c)
}

/// Strip wrapping punctuation from a token's edges. Clean edges take the
/// fast path and skip all stripping work.
fn strip_token(t: &str) -> String {
    let mut chars = t.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return String::new(),
    };
    let last = chars.last().unwrap_or(first);
    if !is_edge_dirty(first) && !is_edge_dirty(last) {
        return t.to_string();
    }
    t.trim_matches(WRAP_CHARS)
        .trim_end_matches(TAIL_PUNCT)
        .trim_matches(WRAP_CHARS)
        .to_string()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Day-of-month token, allowing an ordinal suffix ("11th", "1st").
fn day_number(tok: &str) -> Option<u32> {
    let b = tok.as_bytes();
    if b.is_empty() || !b[0].is_ascii_digit() || !tok.is_ascii() {
        return None;
    }
    let num = if tok.len() >= 3 && matches!(&tok[tok.len() - 2..], "st" | "nd" | "rd" | "th") {
        &tok[..tok.len() - 2]
    } else {
        tok
    };
    if !all_digits(num) {
        return None;
    }
    let d: u32 = num.parse().ok()?;
    (1..=31).contains(&d).then_some(d)
}

fn is_year_token(tok: &str) -> bool {
    all_digits(tok) && (tok.len() == 2 || tok.len() == 4)
}

fn valid_ymd(y: u64, m: u64, d: u64) -> bool {
    y <= 9999
        && (1..=12).contains(&m)
        && (1..=31).contains(&d)
        && !(matches!(m, 4 | 6 | 9 | 11) && d > 30)
        && !(m == 2 && d > 29)
}

fn parse_num(s: &str) -> Option<u64> {
    s.parse().ok()
}

/// Single-token calendar date: ISO with a uniform separator, numeric
/// month/day/year (either order), or compact YYYYMMDD.
fn is_single_token_date(s: &str) -> bool {
    if !s.is_ascii() {
        return false;
    }
    let b = s.as_bytes();

    if b.len() == 10 && matches!(b[4], b'-' | b'/' | b'.') && b[7] == b[4] {
        if all_digits(&s[0..4]) && all_digits(&s[5..7]) && all_digits(&s[8..10]) {
            let (y, m, d) = (
                parse_num(&s[0..4]).unwrap(),
                parse_num(&s[5..7]).unwrap(),
                parse_num(&s[8..10]).unwrap(),
            );
            if valid_ymd(y, m, d) {
                return true;
            }
        }
    }

    if let Some(sep) = s.chars().find(|c| matches!(c, '/' | '-' | '.')) {
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() == 3 && parts.iter().all(|p| all_digits(p)) {
            if let (Some(a), Some(b2), Some(y)) = (
                parse_num(parts[0]),
                parse_num(parts[1]),
                parse_num(parts[2]),
            ) {
                if valid_ymd(y, a, b2) || valid_ymd(y, b2, a) {
                    return true;
                }
            }
        }
    }

    if b.len() == 8 && all_digits(s) {
        let (y, m, d) = (
            parse_num(&s[0..4]).unwrap(),
            parse_num(&s[4..6]).unwrap(),
            parse_num(&s[6..8]).unwrap(),
        );
        if valid_ymd(y, m, d) {
            return true;
        }
    }

    false
}

/// Time-of-day token: `H[:MM[:SS]]` with optional am/pm suffix, or a bare
/// 1-12 hour with the suffix. Expects lowercase input.
fn is_time_token(t: &str) -> bool {
    if t.is_empty() || !t.is_ascii() {
        return false;
    }
    let (body, has_suffix) = match t.strip_suffix("am").or_else(|| t.strip_suffix("pm")) {
        Some(b) => {
            if b.is_empty() {
                return false;
            }
            (b, true)
        }
        None => (t, false),
    };

    let c1 = match body.find(':') {
        None => {
            return has_suffix && all_digits(body) && matches!(body.parse::<u32>(), Ok(1..=12));
        }
        Some(0) => return false,
        Some(c1) => c1,
    };

    let hh = &body[..c1];
    let rest = &body[c1 + 1..];
    if hh.len() > 2 || !all_digits(hh) {
        return false;
    }
    if rest.len() < 2 || !all_digits(&rest[..2]) {
        return false;
    }
    let mm: u32 = rest[..2].parse().unwrap();
    if rest.len() > 2 {
        if rest.len() != 5 || rest.as_bytes()[2] != b':' || !all_digits(&rest[3..5]) {
            return false;
        }
        let ss: u32 = rest[3..5].parse().unwrap();
        if ss > 59 {
            return false;
        }
    }
    let h: u32 = hh.parse().unwrap();
    if has_suffix {
        if !(1..=12).contains(&h) {
            return false;
        }
    } else if h > 23 {
        return false;
    }
    mm <= 59
}

/// A time token, or two of them joined by a dash inside one token.
fn is_time_or_range(sl: &str, s: &str) -> bool {
    if let Some(dash) = s.find('-') {
        if dash > 0 && dash < s.len() - 1 {
            let a = s[..dash].trim().to_lowercase();
            let b = s[dash + 1..].trim().to_lowercase();
            if is_time_token(&a) && is_time_token(&b) {
                return true;
            }
        }
    }
    is_time_token(sl)
}

/// Identifier-like token: letters mixed with digits, or marker punctuation
/// combined with any letter or digit.
fn looks_identifier(s: &str) -> bool {
    if s.chars().all(|c| c.is_alphabetic()) {
        return false;
    }
    let mut any_alpha = false;
    let mut any_digit = false;
    let mut has_mark = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            any_alpha = true;
        } else if c.is_ascii_digit() {
            any_digit = true;
        } else if IDENT_MARKS.contains(&c) {
            has_mark = true;
        }
        if has_mark && (any_alpha || any_digit) {
            break;
        }
    }
    (any_alpha && any_digit) || (has_mark && (any_alpha || any_digit))
}

/// ISO-8601-like single token carrying both a date and a time.
fn is_iso_datetime_token(s: &str) -> bool {
    if !s.is_ascii() || s.len() < 16 {
        return false;
    }
    let b = s.as_bytes();
    if !b[0].is_ascii_digit() {
        return false;
    }
    if !(matches!(b[4], b'-' | b'/' | b'.') && b[7] == b[4]) {
        return false;
    }
    if !(all_digits(&s[0..4]) && all_digits(&s[5..7]) && all_digits(&s[8..10])) {
        return false;
    }
    let (y, m, d) = (
        parse_num(&s[0..4]).unwrap(),
        parse_num(&s[5..7]).unwrap(),
        parse_num(&s[8..10]).unwrap(),
    );
    if !valid_ymd(y, m, d) {
        return false;
    }
    if !matches!(b[10], b'T' | b' ') {
        return false;
    }
    is_time_token(&s[11..])
}

pub struct SubjectNormalizer {
    months: HashSet<&'static str>,
    dow: HashSet<&'static str>,
    tz: HashSet<&'static str>,
    rel_units: HashSet<&'static str>,
    prefix_words: HashSet<&'static str>,
}

impl SubjectNormalizer {
    pub fn new() -> Self {
        Self {
            months: MONTHS.iter().copied().collect(),
            dow: DAYS_OF_WEEK.iter().copied().collect(),
            tz: TIMEZONES.iter().copied().collect(),
            rel_units: RELATIVE_TIME_UNITS.iter().copied().collect(),
            prefix_words: PREFIX_WORDS.iter().copied().collect(),
        }
    }

    /// Reduce a subject line to its template signature.
    ///
    /// Returns the space-joined sequence of placeholders and lowercased
    /// words, plus whether a leading reply/forward marker was found.
    pub fn normalize(&self, subject: &str) -> (String, bool) {
        if subject.is_empty() {
            return (String::new(), false);
        }

        let mut tokens: Vec<String> = subject.split_whitespace().map(str::to_string).collect();
        let n = tokens.len();
        let mut stripped: Vec<String> = Vec::with_capacity(n);
        let mut lower: Vec<String> = Vec::with_capacity(n);
        for t in &tokens {
            let s = strip_token(t);
            lower.push(s.to_lowercase());
            stripped.push(s);
        }

        let mut has_prefix = false;
        let mut i = 0usize;

        // Leading reply/forward markers, possibly chained, possibly glued
        // to the rest of the subject inside one token ("Re:Invoice").
        while i < n {
            let sl = lower[i].as_str();

            if self.prefix_words.contains(sl) && i + 1 < n && lower[i + 1] == ":" {
                has_prefix = true;
                i += 2;
                continue;
            }
            if let Some(head) = sl.strip_suffix(':') {
                if self.prefix_words.contains(head) {
                    has_prefix = true;
                    i += 1;
                    continue;
                }
            }
            if sl.contains(':') {
                let parts: Vec<&str> = sl.split(':').collect();
                let mut prefix_count = 0usize;
                for p in &parts {
                    if !p.is_empty() && self.prefix_words.contains(*p) {
                        prefix_count += 1;
                    } else {
                        break;
                    }
                }
                if prefix_count > 0 {
                    has_prefix = true;
                    let remaining_sl = parts[prefix_count..].join(":");
                    if remaining_sl.is_empty() {
                        i += 1;
                        continue;
                    }
                    let tok_parts: Vec<&str> = tokens[i].split(':').collect();
                    let remaining_tok = if tok_parts.len() == parts.len() {
                        tok_parts[prefix_count..].join(":")
                    } else {
                        remaining_sl
                    };
                    let s = strip_token(&remaining_tok);
                    lower[i] = s.to_lowercase();
                    stripped[i] = s;
                    tokens[i] = remaining_tok;
                    break;
                }
            }
            break;
        }

        let is_response = has_prefix;
        let mut out: Vec<String> = Vec::new();
        if has_prefix {
            out.push("{r}".to_string());
        }

        while i < n {
            let s = stripped[i].as_str();
            let sl = lower[i].as_str();

            // Standalone month, unless it is part of a written-out date
            if self.months.contains(sl) && s.len() >= 3 {
                let next_is_day = i + 1 < n && day_number(&lower[i + 1]).is_some();
                let prev_is_day = i > 0 && day_number(&lower[i - 1]).is_some();
                if !next_is_day && !prev_is_day {
                    out.push("{m}".to_string());
                    i += 1;
                    continue;
                }
            }

            if is_iso_datetime_token(s) {
                out.push("{t}".to_string());
                i += 1;
                continue;
            }

            // Date run: optional day-of-week, then one of the date shapes,
            // then optionally a time run that upgrades {d} to {t}.
            {
                let mut j = i;
                if self.dow.contains(lower[j].as_str()) {
                    j += 1;
                }
                if j < n {
                    let a_s = stripped[j].as_str();
                    let a_sl = lower[j].as_str();
                    let mut consumed = 0usize;

                    if is_single_token_date(a_s) {
                        consumed = 1;
                    } else if self.months.contains(a_sl)
                        && j + 1 < n
                        && day_number(&lower[j + 1]).is_some()
                    {
                        consumed = if j + 2 < n && is_year_token(&lower[j + 2]) { 3 } else { 2 };
                    } else if day_number(a_sl).is_some()
                        && j + 1 < n
                        && self.months.contains(lower[j + 1].as_str())
                    {
                        consumed = if j + 2 < n && is_year_token(&lower[j + 2]) { 3 } else { 2 };
                    }

                    if consumed > 0 {
                        let k = j + consumed;
                        let t_end = self.consume_datetime_after_date(&stripped, &lower, k, n);
                        if t_end > k {
                            out.push("{t}".to_string());
                            i = t_end;
                        } else {
                            out.push("{d}".to_string());
                            i = k;
                        }
                        continue;
                    }
                }
            }

            // Pure punctuation tokens are dropped
            if s.is_empty() || !s.chars().any(char::is_alphanumeric) {
                i += 1;
                continue;
            }

            if is_time_or_range(sl, s) {
                let mut base_j = i + 1;
                if base_j < n && matches!(lower[base_j].as_str(), "am" | "pm") {
                    base_j += 1;
                }
                let mut dow_j = base_j;
                if dow_j < n && self.dow.contains(lower[dow_j].as_str()) {
                    dow_j += 1;
                }
                let k = self.consume_date_after_time(&stripped, &lower, dow_j, n);
                if k > dow_j {
                    out.push("{t}".to_string());
                    i = k;
                    continue;
                }
                out.push("{tm}".to_string());
                i = base_j;
                if i < n && self.tz.contains(lower[i].as_str()) {
                    i += 1;
                }
                continue;
            }

            // Meridiem split across tokens: "3 pm", "3:15 PM"
            if i + 1 < n && matches!(lower[i + 1].as_str(), "am" | "pm") {
                let glued = format!("{}{}", sl, lower[i + 1]);
                if is_time_token(&glued) {
                    out.push("{tm}".to_string());
                    i += 2;
                    if i < n && self.tz.contains(lower[i].as_str()) {
                        i += 1;
                    }
                    continue;
                }
            }

            // Bare duration: "24 hours", "3 days"
            if i + 1 < n && all_digits(s) && self.rel_units.contains(lower[i + 1].as_str()) {
                out.push("{t}".to_string());
                i += 2;
                continue;
            }

            if all_digits(s) {
                out.push("{i}".to_string());
                i += 1;
                continue;
            }

            // Single-word label with a trailing colon is kept verbatim
            if let Some(head) = tokens[i].strip_suffix(':') {
                let head = head.trim_matches(LABEL_STRIP);
                if !head.is_empty() && head.chars().all(char::is_alphabetic) {
                    out.push(format!("{}:", head.to_lowercase()));
                    i += 1;
                    continue;
                }
            }

            if looks_identifier(s) {
                out.push("{#}".to_string());
                i += 1;
                continue;
            }

            out.push(tokens[i].to_lowercase());
            i += 1;
        }

        (out.join(" "), is_response)
    }

    /// From a consumed date at `i`, consume a following time or time range
    /// with optional meridiem and timezone tokens. Returns the index past
    /// the run, or `i` unchanged when no time follows. A literal "at"
    /// keeps the date and time as separate placeholders.
    fn consume_datetime_after_date(
        &self,
        stripped: &[String],
        lower: &[String],
        i: usize,
        n: usize,
    ) -> usize {
        if i >= n || lower[i] == "at" {
            return i;
        }

        let t0_s = stripped[i].as_str();
        let t0_sl = lower[i].as_str();
        let mut j;
        if is_time_or_range(t0_sl, t0_s) {
            j = i + 1;
        } else if i + 1 < n
            && matches!(lower[i + 1].as_str(), "am" | "pm")
            && (t0_sl.contains(':') || all_digits(t0_sl))
        {
            let glued = format!("{}{}", t0_sl, lower[i + 1]);
            if is_time_token(&glued) {
                j = i + 2;
            } else {
                return i;
            }
        } else {
            return i;
        }

        if j < n && matches!(lower[j].as_str(), "am" | "pm") {
            j += 1;
        }
        if j < n && self.tz.contains(lower[j].as_str()) {
            j += 1;
        }

        // Range continuation across tokens: "14:00 - 15:30"
        if j < n && stripped[j] == "-" {
            if j + 1 >= n {
                return i;
            }
            let t1_s = stripped[j + 1].as_str();
            let t1_sl = lower[j + 1].as_str();
            if is_time_or_range(t1_sl, t1_s) {
                j += 2;
            } else if j + 2 < n
                && matches!(lower[j + 2].as_str(), "am" | "pm")
                && (t1_sl.contains(':') || all_digits(t1_sl))
            {
                let glued = format!("{}{}", t1_sl, lower[j + 2]);
                if is_time_token(&glued) {
                    j += 3;
                } else {
                    return i;
                }
            } else {
                return i;
            }
            if j < n && matches!(lower[j].as_str(), "am" | "pm") {
                j += 1;
            }
            if j < n && self.tz.contains(lower[j].as_str()) {
                j += 1;
            }
        }

        if j < n && self.tz.contains(lower[j].as_str()) {
            j += 1;
        }
        j
    }

    /// Date shapes after a time token, for "2:30pm Dec 11 2025" style
    /// subjects. Returns the index past the date, or `i` unchanged.
    fn consume_date_after_time(
        &self,
        stripped: &[String],
        lower: &[String],
        i: usize,
        n: usize,
    ) -> usize {
        let date_start = i;
        let mut j = i;
        if j < n && self.dow.contains(lower[j].as_str()) {
            j += 1;
        }
        if j >= n {
            return date_start;
        }

        let a_s = stripped[j].as_str();
        let a_sl = lower[j].as_str();

        if is_single_token_date(a_s) {
            return j + 1;
        }
        if self.months.contains(a_sl) && j + 1 < n && day_number(&lower[j + 1]).is_some() {
            if j + 2 < n && is_year_token(&lower[j + 2]) {
                return j + 3;
            }
            return j + 2;
        }
        if day_number(a_sl).is_some() && j + 1 < n && self.months.contains(lower[j + 1].as_str()) {
            if j + 2 < n && is_year_token(&lower[j + 2]) {
                return j + 3;
            }
            return j + 2;
        }

        date_start
    }
}

impl Default for SubjectNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
