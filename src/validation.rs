//! Parsing of tab-separated cross-validation records.

use std::io::BufRead;

use regex::Regex;

use crate::config::SamplerConfig;
use crate::constants::validation::{FIELD_SEPARATOR, LEADING_COLUMNS, STRUCTURE_KEY_LEN};
use crate::errors::SamplerError;
use crate::fingerprint::{Fingerprint, ProbabilityFingerprint};
use crate::types::{RecordId, StructureKey};

/// One upstream prediction with its ground truth.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationRecord {
    /// Record identifier.
    pub id: RecordId,
    /// Structure key, truncated to the configured prefix.
    pub key: StructureKey,
    /// Ground-truth fingerprint.
    pub truth: Fingerprint,
    /// Upstream prediction.
    pub predicted: ProbabilityFingerprint,
}

/// Include/exclude filter over record ids.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl RecordFilter {
    /// Compile the include and exclude patterns of `config`.
    pub fn from_config(config: &SamplerConfig) -> Result<Self, SamplerError> {
        Ok(Self {
            include: compile(config.include.as_deref())?,
            exclude: compile(config.exclude.as_deref())?,
        })
    }

    /// Whether a record id passes both patterns.
    pub fn accepts(&self, id: &str) -> bool {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(id)) {
            return false;
        }
        self.include.as_ref().is_none_or(|re| re.is_match(id))
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>, SamplerError> {
    pattern
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| {
                SamplerError::Configuration(format!("invalid record pattern '{pattern}': {err}"))
            })
        })
        .transpose()
}

/// Structure key used to group duplicates: the first block of the key.
pub fn structure_key(raw: &str) -> StructureKey {
    raw.chars().take(STRUCTURE_KEY_LEN).collect()
}

/// Parse one record line (1-based `line` for error reporting).
pub fn parse_record(
    text: &str,
    line: usize,
    schema_len: usize,
) -> Result<ValidationRecord, SamplerError> {
    let malformed = |reason: String| SamplerError::MalformedRecord { line, reason };
    let columns: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    let expected = LEADING_COLUMNS + schema_len;
    if columns.len() != expected {
        return Err(malformed(format!(
            "expected {expected} columns, found {}",
            columns.len()
        )));
    }
    let truth = Fingerprint::parse_bits(columns[2])
        .ok_or_else(|| malformed(format!("ground truth '{}' is not a 0/1 string", columns[2])))?;
    if truth.len() != schema_len {
        return Err(malformed(format!(
            "ground truth has {} bits, schema has {schema_len}",
            truth.len()
        )));
    }
    let values = columns[LEADING_COLUMNS..]
        .iter()
        .enumerate()
        .map(|(offset, raw)| {
            raw.trim()
                .parse::<f64>()
                .map_err(|err| malformed(format!("probability {offset} '{raw}': {err}")))
        })
        .collect::<Result<Vec<f64>, SamplerError>>()?;
    let predicted =
        ProbabilityFingerprint::new(values).map_err(|err| malformed(err.to_string()))?;
    Ok(ValidationRecord {
        id: columns[0].to_string(),
        key: structure_key(columns[1]),
        truth,
        predicted,
    })
}

/// Read every accepted record. Blank lines are skipped; any malformed line aborts.
pub fn read_records<R: BufRead>(
    reader: R,
    schema_len: usize,
    filter: &RecordFilter,
) -> Result<Vec<ValidationRecord>, SamplerError> {
    let mut records = Vec::new();
    for (offset, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            continue;
        }
        let id = text.split(FIELD_SEPARATOR).next().unwrap_or_default();
        if !filter.accepts(id) {
            continue;
        }
        records.push(parse_record(text, offset + 1, schema_len)?);
    }
    Ok(records)
}
