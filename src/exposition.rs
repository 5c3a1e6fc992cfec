//! In-memory metric model and the text exposition codec.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;

use crate::error::ScrapeError;

/// Content type of a merged scrape response.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Label injected by the rewrite shim to identify which backend produced a
/// sample. Backends may not set it themselves.
pub const EXPORTED_INSTANCE_LABEL: &str = "exported_instance";

/// Label name/value pairs of one sample, ordered by name.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sample line. Histogram and summary series keep their full line name
/// (`foo_bucket`, `foo_sum`, `foo_count`) while living under the `foo` family.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: LabelSet,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub help: Option<String>,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Untyped,
            help: None,
            samples: Vec::new(),
        }
    }
}

pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Decode a text exposition byte stream into metric families. Families appear
/// in first-seen order; samples keep the order the backend emitted them.
pub fn decode(input: &[u8]) -> Result<Vec<MetricFamily>, ScrapeError> {
    let text = std::str::from_utf8(input)
        .map_err(|err| decode_error(format!("input is not valid utf-8: {err}")))?;

    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (number, raw) in text.lines().enumerate() {
        let number = number + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let comment = comment.trim_start();
            if let Some(meta) = comment.strip_prefix("HELP ") {
                let (name, help) = meta
                    .trim_start()
                    .split_once(char::is_whitespace)
                    .unwrap_or((meta.trim_start(), ""));
                if !is_valid_metric_name(name) {
                    return Err(decode_error(format!(
                        "line {number}: invalid metric name {name:?} in HELP comment"
                    )));
                }
                let at = family_entry(&mut families, &mut index, name);
                if families[at].help.is_none() {
                    families[at].help = Some(unescape_help(help.trim_start()));
                }
            } else if let Some(meta) = comment.strip_prefix("TYPE ") {
                let Some((name, kind)) = meta.trim_start().split_once(char::is_whitespace) else {
                    return Err(decode_error(format!(
                        "line {number}: malformed TYPE comment"
                    )));
                };
                if !is_valid_metric_name(name) {
                    return Err(decode_error(format!(
                        "line {number}: invalid metric name {name:?} in TYPE comment"
                    )));
                }
                let kind = kind.trim();
                let kind = MetricKind::parse(kind).ok_or_else(|| {
                    decode_error(format!("line {number}: unknown metric type {kind:?}"))
                })?;
                let at = family_entry(&mut families, &mut index, name);
                families[at].kind = kind;
            }
            // Other comment lines are ignored.
            continue;
        }

        let sample = parse_sample(line, number)?;
        let at = owning_family(&mut families, &mut index, &sample.name);
        families[at].samples.push(sample);
    }

    Ok(families)
}

fn family_entry(
    families: &mut Vec<MetricFamily>,
    index: &mut HashMap<String, usize>,
    name: &str,
) -> usize {
    if let Some(&at) = index.get(name) {
        return at;
    }
    index.insert(name.to_string(), families.len());
    families.push(MetricFamily::untyped(name));
    families.len() - 1
}

/// Find the family a sample line belongs to. `_bucket`/`_sum`/`_count` lines
/// attach to a previously declared histogram or summary family.
fn owning_family(
    families: &mut Vec<MetricFamily>,
    index: &mut HashMap<String, usize>,
    sample_name: &str,
) -> usize {
    if let Some(&at) = index.get(sample_name) {
        return at;
    }
    for suffix in ["_bucket", "_sum", "_count"] {
        if let Some(base) = sample_name.strip_suffix(suffix) {
            if let Some(&at) = index.get(base) {
                if matches!(families[at].kind, MetricKind::Histogram | MetricKind::Summary) {
                    return at;
                }
            }
        }
    }
    family_entry(families, index, sample_name)
}

fn parse_sample(line: &str, number: usize) -> Result<Sample, ScrapeError> {
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return Err(decode_error(format!(
            "line {number}: expected a metric name"
        )));
    }

    let mut rest = line[name_end..].trim_start();
    let mut labels = LabelSet::new();
    if let Some(inner) = rest.strip_prefix('{') {
        let (parsed, remainder) = parse_labels(inner, number)?;
        labels = parsed;
        rest = remainder.trim_start();
    }

    let mut tokens = rest.split_whitespace();
    let value = match tokens.next() {
        Some(token) => token.parse::<f64>().map_err(|_| {
            decode_error(format!("line {number}: invalid sample value {token:?}"))
        })?,
        None => return Err(decode_error(format!("line {number}: missing sample value"))),
    };
    let timestamp_ms = match tokens.next() {
        Some(token) => Some(token.parse::<i64>().map_err(|_| {
            decode_error(format!("line {number}: invalid timestamp {token:?}"))
        })?),
        None => None,
    };
    if tokens.next().is_some() {
        return Err(decode_error(format!(
            "line {number}: trailing data after sample"
        )));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parse a label set body. `input` starts just after `{`; returns the labels
/// and the remainder of the line after the closing `}`.
fn parse_labels<'a>(input: &'a str, number: usize) -> Result<(LabelSet, &'a str), ScrapeError> {
    let mut labels = LabelSet::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let name_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if !is_valid_label_name(name) {
            return Err(decode_error(format!(
                "line {number}: invalid label name {name:?}"
            )));
        }

        rest = rest[name_end..].trim_start();
        rest = rest.strip_prefix('=').ok_or_else(|| {
            decode_error(format!("line {number}: expected '=' after label {name}"))
        })?;
        rest = rest.trim_start();
        rest = rest.strip_prefix('"').ok_or_else(|| {
            decode_error(format!(
                "line {number}: expected a quoted value for label {name}"
            ))
        })?;

        let (value, after_value) = parse_quoted(rest, number)?;
        labels.insert(name.to_string(), value);

        rest = after_value.trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
            continue;
        }
        if !rest.starts_with('}') {
            return Err(decode_error(format!(
                "line {number}: expected ',' or '}}' in label set"
            )));
        }
    }
}

/// Consume an escaped label value up to its closing quote.
fn parse_quoted<'a>(input: &'a str, number: usize) -> Result<(String, &'a str), ScrapeError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[at + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((_, 'n')) => value.push('\n'),
                Some((_, other)) => {
                    return Err(decode_error(format!(
                        "line {number}: unsupported escape \\{other}"
                    )));
                }
                None => {
                    return Err(decode_error(format!("line {number}: unterminated escape")));
                }
            },
            other => value.push(other),
        }
    }
    Err(decode_error(format!(
        "line {number}: unterminated label value"
    )))
}

fn decode_error(message: String) -> ScrapeError {
    ScrapeError::Decode { message }
}

/// Encode metric families as exposition text. Families and samples are
/// emitted in the order given; the encoder never deduplicates.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut out = String::new();
    for family in families {
        if let Some(help) = &family.help {
            let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(help));
        }
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);
        for sample in &family.samples {
            out.push_str(&sample.name);
            if !sample.labels.is_empty() {
                out.push('{');
                for (at, (name, value)) in sample.labels.iter().enumerate() {
                    if at > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{name}=\"{}\"", escape_label_value(value));
                }
                out.push('}');
            }
            let _ = write!(out, " {}", format_value(sample.value));
            if let Some(timestamp) = sample.timestamp_ms {
                let _ = write!(out, " {timestamp}");
            }
            out.push('\n');
        }
    }
    out
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_help(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_help(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}
