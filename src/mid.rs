//! Message-ID decomposition.
//!
//! The right-hand side of a Message-ID names the host that minted it,
//! which is often the clearest fingerprint of the sending application.
//! This parser extracts that host with an RFC 5322-shaped grammar and
//! splits it into infrastructure components with the suffix trie.

use regex::Regex;
use std::sync::Arc;

use crate::suffix_trie::SuffixTrie;

/// Message-IDs longer than this are noise, not identifiers.
const DEFAULT_MAX_LEN: usize = 512;

/// Host components extracted from one Message-ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdParts {
    /// Whether the value matched the Message-ID grammar at all.
    pub rfc: bool,
    pub host: String,
    pub host_label: String,
    pub subdomain: String,
    pub domain: String,
}

pub struct MessageIdParser {
    trie: Arc<SuffixTrie>,
    msg_id_re: Regex,
    ipv4_re: Regex,
    ipv6_re: Regex,
    max_len: usize,
}

impl MessageIdParser {
    pub fn new(trie: Arc<SuffixTrie>) -> Self {
        // RFC 5322 shapes, with ',' tolerated in atoms since real mail
        // software emits it
        let atext = r"[A-Za-z0-9!#$%&'*+\-/=?^_`{|}~,]";
        let dot_atom = format!(r"{atext}+(?:\.{atext}+)*");
        let qtext = r#"[\x21\x23-\x5B\x5D-\x7E]"#;
        let qpair = r"\\[\x00-\x09\x0B\x0C\x0E-\x7F]";
        let quoted = format!(r#""(?:{qtext}|{qpair})*""#);
        let id_left = format!(r"(?:{dot_atom}|{quoted})");
        let dtext = r"[\x21-\x5A\x5E-\x7E]";
        let dlit = format!(r"\[(?:{dtext}|{qpair})*\]");
        let id_right = format!(r"(?:{dot_atom}|{dlit})");

        MessageIdParser {
            trie,
            msg_id_re: Regex::new(&format!(r"^\s*<?(?:{id_left})@({id_right})>?\s*$")).unwrap(),
            ipv4_re: Regex::new(r"^(?:25[0-5]|2[0-4]\d|1?\d?\d)(?:\.(?:25[0-5]|2[0-4]\d|1?\d?\d)){3}$")
                .unwrap(),
            ipv6_re: Regex::new(r"^[0-9a-fA-F:]{2,}$").unwrap(),
            max_len: DEFAULT_MAX_LEN,
        }
    }

    /// Decompose a raw Message-ID header value. Total: anything that does
    /// not look like a Message-ID yields the default (non-RFC) parts.
    pub fn parse(&self, mid: &str) -> MessageIdParts {
        let mut out = MessageIdParts::default();

        if !mid.contains('@') || mid.len() >= self.max_len {
            return out;
        }

        let rhs = match self.msg_id_re.captures(mid) {
            Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(""),
            None => return out,
        };
        out.rfc = true;

        let mut host = rhs.trim().trim_end_matches('.').to_lowercase();

        // Unbox domain literals: [127.0.0.1], [IPv6:...]
        if host.starts_with('[') && host.ends_with(']') && host.len() >= 2 {
            host = host[1..host.len() - 1].to_string();
        }
        if let Some(rest) = host.strip_prefix("ipv6:") {
            host = rest.to_string();
        }

        out.host = host.clone();
        if host.is_empty() {
            return out;
        }

        let has_dot = host.contains('.');
        let has_colon = host.contains(':');
        let is_ip = (has_dot && self.ipv4_re.is_match(&host))
            || (has_colon && self.ipv6_re.is_match(&host));

        if has_dot && !is_ip {
            let split = self.trie.split_extended(&host);
            out.host_label = split.host_label;
            out.subdomain = split.subdomain;
            out.domain = split.registrable;
            return out;
        }

        // Single-label hosts and IPs stand for themselves
        out.host_label = host.clone();
        out.domain = host;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> MessageIdParser {
        let trie = SuffixTrie::from_rules(["com", "net", "co.uk"].into_iter()).unwrap();
        MessageIdParser::new(Arc::new(trie))
    }

    #[test]
    fn test_parse_plain_message_id() {
        let p = parser();
        let parts = p.parse("<abc.123@mail.example.com>");
        assert!(parts.rfc);
        assert_eq!(parts.host, "mail.example.com");
        assert_eq!(parts.host_label, "mail");
        assert_eq!(parts.subdomain, "");
        assert_eq!(parts.domain, "example.com");
    }

    #[test]
    fn test_parse_deep_host() {
        let p = parser();
        let parts = p.parse("<x@a.b.relay.example.co.uk>");
        assert_eq!(parts.host_label, "a");
        assert_eq!(parts.subdomain, "b.relay");
        assert_eq!(parts.domain, "example.co.uk");
    }

    #[test]
    fn test_parse_without_angle_brackets() {
        let p = parser();
        let parts = p.parse("abc@example.com");
        assert!(parts.rfc);
        assert_eq!(parts.domain, "example.com");
    }

    #[test]
    fn test_parse_domain_literal() {
        let p = parser();
        let parts = p.parse("<x@[127.0.0.1]>");
        assert!(parts.rfc);
        assert_eq!(parts.host, "127.0.0.1");
        assert_eq!(parts.host_label, "127.0.0.1");
        assert_eq!(parts.domain, "127.0.0.1");
        assert_eq!(parts.subdomain, "");

        let parts = p.parse("<x@[IPv6:2001:db8::1]>");
        assert_eq!(parts.host, "2001:db8::1");
        assert_eq!(parts.host_label, "2001:db8::1");
    }

    #[test]
    fn test_parse_single_label_host() {
        let p = parser();
        let parts = p.parse("<x@localhost>");
        assert!(parts.rfc);
        assert_eq!(parts.host_label, "localhost");
        assert_eq!(parts.domain, "localhost");
        assert_eq!(parts.subdomain, "");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let p = parser();
        assert!(!p.parse("").rfc);
        assert!(!p.parse("no-at-sign").rfc);
        assert!(!p.parse("spaces in@here bad").rfc);
        let long = format!("<{}@example.com>", "a".repeat(600));
        assert!(!p.parse(&long).rfc);
    }

    #[test]
    fn test_parse_normalizes_case_and_dots() {
        let p = parser();
        let parts = p.parse("<ID@Mail.Example.COM.>");
        assert_eq!(parts.host, "mail.example.com");
        assert_eq!(parts.domain, "example.com");
    }
}
