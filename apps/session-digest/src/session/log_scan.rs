use super::{RetentionPolicy, TransportMode};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLogSummary {
    pub transport_mode: Option<TransportMode>,
    pub datastores: Vec<String>,
    pub proxies: Vec<String>,
    pub guest_proxies: Vec<String>,
}

struct LogPatterns {
    san: Regex,
    nbd: Regex,
    hotadd: Regex,
    datastore: Regex,
    proxy: Regex,
    guest_proxy: Regex,
}

fn log_patterns() -> &'static LogPatterns {
    static PATTERNS: OnceLock<LogPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LogPatterns {
        san: compile(r"\[san\]"),
        nbd: compile(r"\[nbd\]"),
        hotadd: compile(r"\[hotadd\]"),
        datastore: compile(r"Saving \[([.a-zA-Z0-9_-]*)\] "),
        proxy: compile(r"Using backup proxy ([. a-zA-Z0-9_-]*) for"),
        guest_proxy: compile(r"Using guest interaction proxy ([. a-zA-Z0-9_-]*)"),
    })
}

fn element_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"<([A-Za-z_][A-Za-z0-9_]*)>\s*([^<]*?)\s*</[A-Za-z_][A-Za-z0-9_]*>"))
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static session log pattern")
}

/// Scrapes the transport mode, datastores and proxies out of a session log.
pub fn scan_session_log(log: &str) -> SessionLogSummary {
    let patterns = log_patterns();

    let transport_mode = if patterns.hotadd.is_match(log) {
        Some(TransportMode::Hotadd)
    } else if patterns.nbd.is_match(log) {
        Some(TransportMode::Nbd)
    } else if patterns.san.is_match(log) {
        Some(TransportMode::San)
    } else {
        None
    };

    SessionLogSummary {
        transport_mode,
        datastores: distinct_captures(&patterns.datastore, log),
        proxies: distinct_captures(&patterns.proxy, log),
        guest_proxies: distinct_captures(&patterns.guest_proxy, log),
    }
}

fn distinct_captures(pattern: &Regex, haystack: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(haystack) {
        let Some(value) = captures.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if !values.iter().any(|existing| existing == value) {
            values.push(value.to_string());
        }
    }
    values
}

/// Reads the retention settings out of a job options document.
pub fn parse_job_options(options: &str) -> RetentionPolicy {
    let mut elements: HashMap<&str, &str> = HashMap::new();
    for captures in element_pattern().captures_iter(options) {
        if let (Some(name), Some(value)) = (captures.get(1), captures.get(2)) {
            elements.entry(name.as_str()).or_insert(value.as_str());
        }
    }

    let maintenance_enabled = elements
        .get("EnableDeletedVmDataRetention")
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let retain_days = if maintenance_enabled {
        int_element(&elements, "RetainDays")
    } else {
        None
    };

    let retain_cycles =
        int_element(&elements, "RetainDaysToKeep").or_else(|| int_element(&elements, "RetainCycles"));

    RetentionPolicy {
        retain_days,
        retain_cycles,
        maintenance_enabled,
    }
}

fn int_element(elements: &HashMap<&str, &str>, name: &str) -> Option<i32> {
    let raw = elements.get(name)?;
    match raw.parse::<i32>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(element = name, value = %raw, error = %err, "ignoring non-numeric job option");
            None
        }
    }
}
