//! Compact range strings for sorted integer lists (`1-5,7,9-10`)
//!
//! Used to summarize port sets.

use std::ops::RangeInclusive;

/// Most values a range string may expand to; one per TCP/UDP port.
pub const MAX_RANGE_VALUES: u64 = 65_536;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("Invalid number '{0}' in range string")]
    InvalidNumber(String),

    #[error("Range '{start}-{end}' is reversed")]
    Reversed { start: u64, end: u64 },

    #[error("Range string expands past {limit} values")]
    TooLarge { limit: u64 },
}

/// Collapse runs of consecutive values into inclusive ranges.
///
/// Input must be sorted ascending; duplicates start a new run.
pub fn ranges(sorted: &[u64]) -> Vec<RangeInclusive<u64>> {
    let mut result: Vec<RangeInclusive<u64>> = Vec::new();

    for &value in sorted {
        match result.last_mut() {
            Some(run) if run.end().checked_add(1) == Some(value) => {
                *run = *run.start()..=value;
            }
            _ => result.push(value..=value),
        }
    }

    result
}

pub fn list_to_range_string(sorted: &[u64]) -> String {
    ranges(sorted)
        .into_iter()
        .map(|run| {
            if run.start() == run.end() {
                run.start().to_string()
            } else {
                format!("{}-{}", run.start(), run.end())
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn range_string_to_list(range_string: &str) -> Result<Vec<u64>, RangeError> {
    if range_string.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut output = Vec::new();
    for part in range_string.split(',') {
        let part = part.trim();
        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_number(start)?, parse_number(end)?),
            None => {
                let value = parse_number(part)?;
                (value, value)
            }
        };
        if end < start {
            return Err(RangeError::Reversed { start, end });
        }
        // Width is checked before expanding so huge spans never allocate.
        let width = end - start;
        if width >= MAX_RANGE_VALUES || output.len() as u64 + width >= MAX_RANGE_VALUES {
            return Err(RangeError::TooLarge {
                limit: MAX_RANGE_VALUES,
            });
        }
        output.extend(start..=end);
    }

    Ok(output)
}

fn parse_number(text: &str) -> Result<u64, RangeError> {
    text.trim()
        .parse()
        .map_err(|_| RangeError::InvalidNumber(text.to_string()))
}
