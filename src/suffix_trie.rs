use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Core decomposition of a hostname against the public-suffix rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSplit {
    pub subdomain: String,
    pub registrable: String,
    pub suffix: String,
}

/// Extended decomposition that also separates the immediate owning label
/// from any deeper subdomain chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSplitExt {
    pub host_label: String,
    pub subdomain: String,
    pub registrable: String,
    pub suffix: String,
}

#[derive(Debug, Clone)]
struct Node {
    children: HashMap<String, usize>,
    is_rule: bool,
    has_wildcard: bool,
    is_exception: bool,
}

impl Node {
    fn empty() -> Self {
        Node {
            children: HashMap::new(),
            is_rule: false,
            has_wildcard: false,
            is_exception: false,
        }
    }
}

/// Serialized trie node as stored in a rule-set JSON file: a flat list of
/// records, each with a children map (`c`, label -> node index), a rule flag
/// (`r`) and an exception flag (`e`). Index 0 is the root.
#[derive(Debug, Deserialize)]
struct RawNode {
    c: HashMap<String, usize>,
    #[serde(default)]
    r: bool,
    #[serde(default)]
    e: bool,
}

/// Public-suffix label trie.
///
/// Built once at startup and immutable afterwards; `split` performs no
/// allocation beyond the returned strings and is safe for unsynchronized
/// concurrent reads.
pub struct SuffixTrie {
    nodes: Vec<Node>,
}

impl SuffixTrie {
    /// Load a pre-built trie from its JSON node-list form.
    ///
    /// A structurally invalid rule set (not a list of records with a
    /// children map, or a child index out of range) is a fatal load error.
    pub fn load(source: &str) -> Result<Self> {
        let raw: Vec<RawNode> =
            serde_json::from_str(source).context("suffix rule set is not a list of trie nodes")?;
        if raw.is_empty() {
            bail!("suffix rule set is empty");
        }

        let n = raw.len();
        let mut nodes = Vec::with_capacity(n);
        for (idx, r) in raw.into_iter().enumerate() {
            for (label, child) in &r.c {
                if *child >= n {
                    bail!("suffix rule node {idx}: child {label:?} points past node list");
                }
            }
            let has_wildcard = r.c.contains_key("*");
            nodes.push(Node {
                children: r.c,
                is_rule: r.r,
                has_wildcard,
                is_exception: r.e,
            });
        }

        Ok(SuffixTrie { nodes })
    }

    /// Build a trie from public-suffix rules in the standard text format:
    /// one rule per line, `//` comments, `*.` wildcard labels and `!`
    /// exception rules.
    pub fn from_rules<'a, I>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut nodes = vec![Node::empty()];
        let mut rule_count = 0usize;

        for line in rules {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            // Only the first token of a line is significant
            let rule = line.split_whitespace().next().unwrap_or("");
            if rule.is_empty() {
                continue;
            }

            let (rule, is_exception) = match rule.strip_prefix('!') {
                Some(rest) => (rest, true),
                None => (rule, false),
            };

            let mut cur = 0usize;
            for label in rule.to_lowercase().split('.').rev() {
                if label.is_empty() {
                    continue;
                }
                let next = match nodes[cur].children.get(label).copied() {
                    Some(idx) => idx,
                    None => {
                        let idx = nodes.len();
                        nodes.push(Node::empty());
                        if label == "*" {
                            nodes[cur].has_wildcard = true;
                        }
                        nodes[cur].children.insert(label.to_string(), idx);
                        idx
                    }
                };
                cur = next;
            }
            if is_exception {
                nodes[cur].is_exception = true;
            } else {
                nodes[cur].is_rule = true;
            }
            rule_count += 1;
        }

        if rule_count == 0 {
            bail!("suffix rule source contains no rules");
        }
        Ok(SuffixTrie { nodes })
    }

    /// Trie built from the rule snapshot shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_rules(include_str!("../data/public_suffix_seed.dat").lines())
            .expect("embedded suffix rule snapshot is valid")
    }

    /// Longest matching suffix length in labels for an already-normalized,
    /// dotted hostname. Defaults to 1: the last label is always treated as
    /// a suffix even when no rule matches.
    fn best_suffix_len(&self, labels: &[&str]) -> usize {
        let mut best_len = 1usize;
        let mut cur = 0usize;
        let mut matched_depth = 0usize;

        for lab in labels.iter().rev() {
            let node = &self.nodes[cur];
            let next = match node.children.get(*lab) {
                Some(&idx) => idx,
                None => {
                    if node.has_wildcard {
                        best_len = best_len.max(matched_depth + 1);
                    }
                    break;
                }
            };

            cur = next;
            matched_depth += 1;
            let node = &self.nodes[cur];

            if node.is_exception {
                // The exception carves this name out of its wildcard parent:
                // the suffix boundary sits one label shorter.
                best_len = best_len.max(matched_depth - 1);
                break;
            }
            if node.is_rule {
                best_len = best_len.max(matched_depth);
            }
            if node.has_wildcard {
                best_len = best_len.max(matched_depth + 1);
            }
        }

        best_len
    }

    /// Split a hostname into (subdomain, registrable domain, public suffix).
    ///
    /// Input is normalized first (trim, strip trailing dots, lowercase).
    /// An empty or dotless host yields an identity split with the host as
    /// the registrable part and empty suffix.
    pub fn split(&self, host: &str) -> HostSplit {
        let h = host.trim().trim_end_matches('.').to_lowercase();

        if h.is_empty() || !h.contains('.') {
            return HostSplit {
                subdomain: String::new(),
                registrable: h,
                suffix: String::new(),
            };
        }

        let labels: Vec<&str> = h.split('.').collect();
        let n = labels.len();
        let best_len = self.best_suffix_len(&labels);

        if best_len >= n {
            // The host as a whole is a public suffix
            return HostSplit {
                subdomain: String::new(),
                registrable: h.clone(),
                suffix: h,
            };
        }

        HostSplit {
            subdomain: labels[..n - (best_len + 1)].join("."),
            registrable: labels[n - (best_len + 1)..].join("."),
            suffix: labels[n - best_len..].join("."),
        }
    }

    /// Like `split`, additionally separating the first subdomain label (the
    /// immediate owning host) from the rest of the subdomain chain.
    pub fn split_extended(&self, host: &str) -> HostSplitExt {
        let core = self.split(host);

        if core.subdomain.is_empty() {
            return HostSplitExt {
                host_label: String::new(),
                subdomain: String::new(),
                registrable: core.registrable,
                suffix: core.suffix,
            };
        }

        let (host_label, rest) = match core.subdomain.split_once('.') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (core.subdomain.clone(), String::new()),
        };

        HostSplitExt {
            host_label,
            subdomain: rest,
            registrable: core.registrable,
            suffix: core.suffix,
        }
    }
}
