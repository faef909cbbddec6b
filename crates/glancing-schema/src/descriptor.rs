//! StratusLab marketplace descriptor parsing.
//!
//! Descriptors are RDF property bags, served either as RDF/JSON (subject →
//! predicate → list of `{"value": ...}`) or as RDF/XML. Only a fixed set of
//! predicates is extracted into a [`MetadataRecord`]; everything else is
//! ignored.

use crate::digest::{Algorithm, ChecksumSource};
use crate::record::{Compression, MetadataRecord};
use crate::types::MarketplaceId;
use crate::version::Version;
use crate::SchemaError;
use std::path::Path;
use tracing::{debug, warn};

const SLTERMS: &str = "http://mp.stratuslab.eu/slterms#";
const SLREQ: &str = "http://mp.stratuslab.eu/slreq#";
const DCTERMS: &str = "http://purl.org/dc/terms/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Json,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Location,
    Compression,
    Format,
    Os,
    OsArch,
    OsVersion,
    Bytes,
    Title,
    Version,
    Identifier,
}

fn field_for(predicate: &str) -> Option<Field> {
    if let Some(term) = predicate.strip_prefix(SLTERMS) {
        return match term {
            "location" => Some(Field::Location),
            "os" => Some(Field::Os),
            "os-arch" => Some(Field::OsArch),
            "os-version" => Some(Field::OsVersion),
            "version" => Some(Field::Version),
            _ => None,
        };
    }
    if let Some(term) = predicate.strip_prefix(DCTERMS) {
        return match term {
            "compression" => Some(Field::Compression),
            "format" => Some(Field::Format),
            "title" => Some(Field::Title),
            "identifier" => Some(Field::Identifier),
            _ => None,
        };
    }
    if predicate == format!("{SLREQ}bytes") {
        return Some(Field::Bytes);
    }
    None
}

fn apply(record: &mut MetadataRecord, field: Field, value: &str) -> Result<(), SchemaError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }
    let owned = || Some(value.to_owned());
    match field {
        Field::Location => record.location = owned(),
        Field::Compression => record.compression = Compression::parse(value)?,
        Field::Format => record.disk_format = owned(),
        Field::Os => record.os = owned(),
        Field::OsArch => record.os_arch = owned(),
        Field::OsVersion => record.os_version = owned(),
        Field::Bytes => {
            let size = value
                .parse::<u64>()
                .map_err(|_| SchemaError::InvalidSize(value.to_owned()))?;
            record.bytes = Some(size);
        }
        Field::Title => record.title = owned(),
        Field::Version => record.version = Some(Version::new(value)),
        Field::Identifier => record.marketplace_id = Some(MarketplaceId::new(value)),
    }
    Ok(())
}

fn add_checksum(
    record: &mut MetadataRecord,
    algorithm: &str,
    digest: &str,
) -> Result<(), SchemaError> {
    let algorithm = match Algorithm::from_name(algorithm) {
        Ok(a) => a,
        Err(e) => {
            warn!("ignoring checksum: {e}");
            return Ok(());
        }
    };
    record
        .checksums
        .insert(algorithm, digest.trim(), ChecksumSource::Metadata)?;
    Ok(())
}

fn finish(record: MetadataRecord) -> Result<MetadataRecord, SchemaError> {
    if record.is_empty() {
        return Err(SchemaError::Empty);
    }
    debug!(
        "descriptor: title={:?} version={:?} checksums={}",
        record.title,
        record.version.as_ref().map(Version::as_str),
        record.checksums.len()
    );
    Ok(record)
}

/// Parse an RDF/JSON descriptor.
pub fn parse_json(data: &[u8]) -> Result<MetadataRecord, SchemaError> {
    let doc: serde_json::Value = serde_json::from_slice(data)?;
    let subjects = doc.as_object().ok_or(SchemaError::NotAnObject)?;
    if let Some(err) = subjects.get("error") {
        return Err(SchemaError::ErrorPayload(json_text(err)));
    }

    let first_value = |list: &serde_json::Value| -> Option<String> {
        list.get(0).and_then(|v| v.get("value")).map(json_text)
    };

    let mut record = MetadataRecord::default();
    for predicates in subjects.values() {
        let Some(predicates) = predicates.as_object() else {
            continue;
        };
        for (predicate, values) in predicates {
            let Some(value) = first_value(values) else {
                continue;
            };
            if let Some(field) = field_for(predicate) {
                apply(&mut record, field, &value)?;
            } else if *predicate == format!("{SLREQ}algorithm") {
                let digest = predicates
                    .get(&format!("{SLREQ}value"))
                    .and_then(first_value);
                match digest {
                    Some(digest) => add_checksum(&mut record, &value, &digest)?,
                    None => warn!("checksum algorithm {value} has no value"),
                }
            }
        }
    }
    finish(record)
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expanded_name(node: roxmltree::Node<'_, '_>) -> String {
    let tag = node.tag_name();
    format!("{}{}", tag.namespace().unwrap_or(""), tag.name())
}

/// Parse an RDF/XML descriptor.
pub fn parse_xml(text: &str) -> Result<MetadataRecord, SchemaError> {
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();
    match root.tag_name().name().to_lowercase().as_str() {
        "error" => {
            let msg: String = root
                .descendants()
                .filter_map(|n| n.text())
                .collect::<Vec<_>>()
                .join(" ");
            return Err(SchemaError::ErrorPayload(msg.trim().to_owned()));
        }
        "html" => {
            return Err(SchemaError::ErrorPayload(
                "unexpected HTML document".to_owned(),
            ))
        }
        _ => {}
    }

    let checksum_tag = format!("{SLREQ}checksum");
    let algorithm_tag = format!("{SLREQ}algorithm");
    let value_tag = format!("{SLREQ}value");

    let mut record = MetadataRecord::default();
    for node in doc.descendants().filter(roxmltree::Node::is_element) {
        let name = expanded_name(node);
        if name == checksum_tag {
            let child_text = |tag: &str| {
                node.children()
                    .find(|c| c.is_element() && expanded_name(*c) == tag)
                    .and_then(|c| c.text())
            };
            match (child_text(&algorithm_tag), child_text(&value_tag)) {
                (Some(algorithm), Some(digest)) => add_checksum(&mut record, algorithm, digest)?,
                _ => warn!("incomplete checksum element in descriptor"),
            }
        } else if let Some(field) = field_for(&name) {
            if let Some(text) = node.text() {
                apply(&mut record, field, text)?;
            }
        }
    }
    finish(record)
}

/// Parse a descriptor stored in a local file.
pub fn parse_descriptor_file(
    path: impl AsRef<Path>,
    format: DescriptorFormat,
) -> Result<MetadataRecord, SchemaError> {
    let data = std::fs::read(path)?;
    match format {
        DescriptorFormat::Json => parse_json(&data),
        DescriptorFormat::Xml => parse_xml(&String::from_utf8_lossy(&data)),
    }
}
