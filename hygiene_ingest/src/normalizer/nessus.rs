//! Nessus host and vulnerability documents

use super::coerce::{coerce_string, FieldReader};
use super::error::{NormalizeError, NormalizeWarning};
use super::{read_protocol, read_service, ENVELOPE_FIELDS};
use crate::types::{HostObservation, RecordBody, Severity, VulnerabilityFinding};
use chrono::{DateTime, Utc};
use hygiene_core::config::compile_time::documents::{
    MAX_CVE_ENTRIES, MAX_EXTRA_FIELDS, MAX_PLUGIN_OUTPUT_LENGTH,
};
use hygiene_core::config::NormalizerPreferences;
use regex::Regex;
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::sync::OnceLock;

const VULNERABILITY_FIELDS: &[&str] = &[
    "protocol",
    "port",
    "service",
    "plugin_id",
    "plugin_name",
    "plugin_family",
    "plugin_type",
    "fname",
    "cve",
    "cvss_base_score",
    "cvss_vector",
    "severity",
    "risk_factor",
    "synopsis",
    "description",
    "solution",
    "plugin_output",
    "plugin_publication_date",
    "plugin_modification_date",
    "vuln_publication_date",
    "patch_publication_date",
];

static CVE_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn cve_pattern() -> Result<&'static Regex, NormalizeError> {
    CVE_PATTERN
        .get_or_init(|| Regex::new(r"^CVE-\d{4}-\d{4,}$"))
        .as_ref()
        .map_err(|e| NormalizeError::invalid("cve", e.to_string()))
}

/// Nessus hosts are observed at the scan's start time
pub(super) fn host_time(fields: &FieldReader<'_>) -> Result<DateTime<Utc>, NormalizeError> {
    match fields.datetime("start_time")? {
        Some(start) => Ok(start),
        None => fields
            .datetime("time")?
            .ok_or_else(|| NormalizeError::missing("start_time")),
    }
}

pub(super) fn host_body(fields: &FieldReader<'_>) -> Result<RecordBody, NormalizeError> {
    Ok(RecordBody::Host(HostObservation {
        name: fields.string("name")?,
        operating_system: fields.string("operating_system")?,
        host_fqdn: fields.string("host_fqdn")?,
        system_type: fields.string("system_type")?,
        end_time: fields.datetime("end_time")?,
        ..Default::default()
    }))
}

pub(super) fn vulnerability_body(
    fields: &FieldReader<'_>,
    preferences: &NormalizerPreferences,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<RecordBody, NormalizeError> {
    let protocol = read_protocol(fields)?;
    let port = fields.required_integer("port", 0..=65535)? as u16;
    let plugin_id = fields.required_integer("plugin_id", 0..=i64::MAX)? as u64;

    let level = fields.required_integer("severity", 0..=4)? as u8;
    let severity = Severity::from_level(level)
        .ok_or_else(|| NormalizeError::invalid("severity", format!("{} is outside 0-4", level)))?;

    let mut finding = VulnerabilityFinding::new(protocol, port, plugin_id, severity);
    finding.service = read_service(fields)?;
    finding.cvss_base_score = fields.float("cvss_base_score", 0.0..=10.0)?.unwrap_or(0.0);
    finding.cve = read_cves(fields, warnings)?;
    finding.plugin_output = read_plugin_output(fields, preferences, warnings)?;

    finding.plugin_name = fields.string("plugin_name")?;
    finding.plugin_family = fields.string("plugin_family")?;
    finding.plugin_type = fields.string("plugin_type")?;
    finding.fname = fields.string("fname")?;
    finding.cvss_vector = fields.string("cvss_vector")?;
    finding.risk_factor = fields.string("risk_factor")?;
    finding.synopsis = fields.string("synopsis")?;
    finding.description = fields.string("description")?;
    finding.solution = fields.string("solution")?;

    finding.plugin_publication_date = fields.datetime("plugin_publication_date")?;
    finding.plugin_modification_date = fields.datetime("plugin_modification_date")?;
    finding.vuln_publication_date = fields.datetime("vuln_publication_date")?;
    finding.patch_publication_date = fields.datetime("patch_publication_date")?;

    if preferences.keep_unknown_fields {
        let known: Vec<&str> = ENVELOPE_FIELDS
            .iter()
            .chain(VULNERABILITY_FIELDS)
            .copied()
            .collect();
        let remaining = fields.remaining(&known);

        if remaining.len() > MAX_EXTRA_FIELDS {
            warnings.push(NormalizeWarning::ExtraFieldsDropped {
                dropped: remaining.len() - MAX_EXTRA_FIELDS,
                limit: MAX_EXTRA_FIELDS,
            });
        }
        for (key, value) in remaining.into_iter().take(MAX_EXTRA_FIELDS) {
            match finding.extra.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(slot) => warnings.push(NormalizeWarning::ExtraKeyCollision {
                    key: slot.key().clone(),
                }),
            }
        }
    }

    Ok(RecordBody::Vulnerability(finding))
}

/// CVE ids from a string (comma or whitespace separated) or a list of strings
fn read_cves(
    fields: &FieldReader<'_>,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<Vec<String>, NormalizeError> {
    let raw: Vec<String> = match fields.get("cve") {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                coerce_string(item)
                    .ok_or_else(|| NormalizeError::invalid("cve", "expected a list of strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(value) => vec![coerce_string(value)
            .ok_or_else(|| NormalizeError::invalid("cve", "expected a string"))?],
    };

    let pattern = cve_pattern()?;
    let mut cves: Vec<String> = Vec::new();

    for entry in raw
        .iter()
        .flat_map(|text| text.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|entry| !entry.is_empty())
    {
        let id = entry.to_uppercase();
        if !pattern.is_match(&id) {
            return Err(NormalizeError::invalid(
                "cve",
                format!("'{}' is not a CVE identifier", entry),
            ));
        }
        if !cves.contains(&id) {
            cves.push(id);
        }
    }

    if cves.len() > MAX_CVE_ENTRIES {
        warnings.push(NormalizeWarning::FieldTruncated {
            field: "cve".to_string(),
            original_len: cves.len(),
            limit: MAX_CVE_ENTRIES,
        });
        cves.truncate(MAX_CVE_ENTRIES);
    }

    Ok(cves)
}

fn read_plugin_output(
    fields: &FieldReader<'_>,
    preferences: &NormalizerPreferences,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<Option<String>, NormalizeError> {
    let Some(mut output) = fields.string("plugin_output")? else {
        return Ok(None);
    };

    if output.len() > MAX_PLUGIN_OUTPUT_LENGTH {
        if !preferences.truncate_plugin_output {
            return Err(NormalizeError::invalid(
                "plugin_output",
                format!(
                    "{} bytes exceeds the {} byte limit",
                    output.len(),
                    MAX_PLUGIN_OUTPUT_LENGTH
                ),
            ));
        }

        let original_len = output.len();
        let mut end = MAX_PLUGIN_OUTPUT_LENGTH;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        output.truncate(end);

        warnings.push(NormalizeWarning::FieldTruncated {
            field: "plugin_output".to_string(),
            original_len,
            limit: MAX_PLUGIN_OUTPUT_LENGTH,
        });
    }

    Ok(Some(output))
}
