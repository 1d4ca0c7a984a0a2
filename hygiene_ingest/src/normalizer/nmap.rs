//! Nmap port and host documents

use super::coerce::FieldReader;
use super::error::{NormalizeError, NormalizeWarning};
use super::{read_protocol, read_service, read_string_list};
use crate::types::{HostObservation, OsClass, PortObservation, PortState, RecordBody};
use hygiene_core::config::compile_time::documents::MAX_OS_CLASSES;
use serde_json::Value;

pub(super) fn port_body(fields: &FieldReader<'_>) -> Result<RecordBody, NormalizeError> {
    let protocol = read_protocol(fields)?;
    let port = fields.required_integer("port", 0..=65535)? as u16;

    let state_text = fields.required_string("state")?;
    let state = PortState::parse(&state_text).ok_or_else(|| {
        NormalizeError::invalid("state", format!("unknown port state '{}'", state_text))
    })?;

    let mut observation = PortObservation::new(protocol, port, state);
    observation.reason = fields.string("reason")?;
    observation.service = read_service(fields)?;

    Ok(RecordBody::Port(observation))
}

pub(super) fn host_body(
    fields: &FieldReader<'_>,
    warnings: &mut Vec<NormalizeWarning>,
) -> Result<RecordBody, NormalizeError> {
    let mut classes = match fields.get("classes") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(os_class)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(NormalizeError::invalid("classes", "expected an array")),
    };

    if classes.len() > MAX_OS_CLASSES {
        warnings.push(NormalizeWarning::FieldTruncated {
            field: "classes".to_string(),
            original_len: classes.len(),
            limit: MAX_OS_CLASSES,
        });
        classes.truncate(MAX_OS_CLASSES);
    }

    Ok(RecordBody::Host(HostObservation {
        name: fields.string("name")?,
        accuracy: fields.integer("accuracy", 0..=100)?.map(|a| a as u8),
        classes,
        line: fields.integer("line", 0..=i64::MAX)?.map(|l| l as u64),
        ..Default::default()
    }))
}

fn os_class(value: &Value) -> Result<OsClass, NormalizeError> {
    let map = value
        .as_object()
        .ok_or_else(|| NormalizeError::invalid("classes", "expected an array of objects"))?;
    let class = FieldReader::new(map);

    Ok(OsClass {
        vendor: class.string("vendor")?,
        osfamily: class.string("osfamily")?,
        osgen: class.string("osgen")?,
        os_type: class.string("type")?,
        accuracy: class.integer("accuracy", 0..=100)?.map(|a| a as u8),
        cpe: read_string_list(&class, "cpe")?,
    })
}
