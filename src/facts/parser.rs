//! Label-driven parsing of a raw fact block.
//!
//! Each label has one rule: where to find its value, what to fall back to, and how to
//! post-process it. A rule that finds nothing writes its default and parsing continues.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;
use crate::facts::script::{extract_block, Dialect};
use crate::inventory::types::{HostFacts, MountPoint, NasMount};

const UNKNOWN: &str = "Unknown";

type Apply = fn(Option<&str>, Dialect, &mut HostFacts);

struct FieldRule {
    label: &'static str,
    apply: Apply,
}

const FIELD_RULES: &[FieldRule] = &[
    FieldRule { label: "OS", apply: apply_os },
    FieldRule { label: "HOSTNAME", apply: apply_hostname },
    FieldRule { label: "SWAP", apply: apply_swap },
    FieldRule { label: "Mount Point", apply: apply_mount_points },
    FieldRule { label: "NAS", apply: apply_nas },
    FieldRule { label: "IPs", apply: apply_ips },
];

/// Parse raw session output into `(key_ip, facts)`.
pub fn parse(raw: &str, dialect: Dialect) -> Result<(String, HostFacts), ParseError> {
    let block = extract_block(raw, dialect)?;
    parse_block(block, dialect)
}

/// Parse an already extracted block (the text between the markers).
pub fn parse_block(block: &str, dialect: Dialect) -> Result<(String, HostFacts), ParseError> {
    let mut facts = HostFacts {
        os: UNKNOWN.to_string(),
        hostname: UNKNOWN.to_string(),
        swap: String::new(),
        mount_points: Vec::new(),
        nas_size: 0,
        nas_mounts: Vec::new(),
        ips: Vec::new(),
    };

    for rule in FIELD_RULES {
        (rule.apply)(label_value(block, rule.label), dialect, &mut facts);
    }

    let key = facts.ips.first().cloned().ok_or(ParseError::NoPrivateIp)?;
    Ok((key, facts))
}

/// Value of the first line starting with `<label>:`, trimmed. Blank values count as absent.
fn label_value<'a>(block: &'a str, label: &str) -> Option<&'a str> {
    block
        .lines()
        .map(|line| line.trim_start_matches('\r'))
        .find_map(|line| line.strip_prefix(label)?.strip_prefix(':'))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn apply_os(value: Option<&str>, _: Dialect, facts: &mut HostFacts) {
    facts.os = value.unwrap_or(UNKNOWN).to_string();
}

fn apply_hostname(value: Option<&str>, _: Dialect, facts: &mut HostFacts) {
    facts.hostname = value.unwrap_or(UNKNOWN).to_string();
}

// Zero swap is reported as an empty cell, not "0".
fn apply_swap(value: Option<&str>, _: Dialect, facts: &mut HostFacts) {
    facts.swap = match value {
        Some("0") | None => String::new(),
        Some(v) => v.to_string(),
    };
}

fn apply_mount_points(value: Option<&str>, dialect: Dialect, facts: &mut HostFacts) {
    let Some(line) = value else {
        return;
    };
    facts.mount_points = match dialect {
        Dialect::Posix => posix_mount_regex()
            .find_iter(line)
            .filter_map(|m| {
                let mut parts = m.as_str().split_whitespace();
                Some(MountPoint {
                    device: parts.next()?.to_string(),
                    path: parts.next()?.to_string(),
                    size: parts.next()?.to_string(),
                })
            })
            .collect(),
        Dialect::PowerShell => drive_regex()
            .captures_iter(line)
            .map(|c| {
                let root = c[1].to_string();
                MountPoint {
                    device: root.trim_end_matches('\\').to_string(),
                    path: root,
                    size: c.get(2).map_or("", |m| m.as_str()).to_string(),
                }
            })
            .collect(),
    };
}

/// Every whitespace-separated numeric token is summed into `nas_size`; `<size> <path>`
/// pairs are also kept individually.
fn apply_nas(value: Option<&str>, _: Dialect, facts: &mut HostFacts) {
    let Some(line) = value else {
        return;
    };
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let total: f64 = tokens.iter().filter_map(|t| t.parse::<f64>().ok()).sum();
    facts.nas_size = total.floor() as u64;

    let mut mounts = Vec::new();
    for pair in tokens.windows(2) {
        if let (Ok(size), Err(_)) = (pair[0].parse::<f64>(), pair[1].parse::<f64>()) {
            mounts.push(NasMount {
                path: pair[1].to_string(),
                size_gb: size.floor() as u64,
            });
        }
    }
    facts.nas_mounts = mounts;
}

fn apply_ips(value: Option<&str>, _: Dialect, facts: &mut HostFacts) {
    facts.ips = value
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
}

fn posix_mount_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+\s+/\S+\s+\S+").expect("valid mount regex"))
}

fn drive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Z]:\\+)\s(\S*)").expect("valid drive regex"))
}
