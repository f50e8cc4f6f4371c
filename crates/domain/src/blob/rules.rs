//! Blob validation rules.
//!
//! Struct rules run first (required fields, lengths, allowed services), then
//! the scope rules that bound size and extension per service and blob type.

use common::{Service, ValidationError};

use super::Blob;

const MIB: i64 = 1024 * 1024;

const NAME_MAX: usize = 512;
const EXTENSION_MAX: usize = 8;
const URL_MAX: usize = 2048;

/// Size and format limits for one service/blob type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRule {
    pub max_size: i64,
    pub max_label: &'static str,
    pub extensions: &'static [&'static str],
}

const PORTRAIT: ScopeRule = ScopeRule {
    max_size: 10 * MIB,
    max_label: "10 MB",
    extensions: &["jpeg"],
};

const DOCUMENT: ScopeRule = ScopeRule {
    max_size: 25 * MIB,
    max_label: "25 MB",
    extensions: &["pdf"],
};

const AUDIO: ScopeRule = ScopeRule {
    max_size: 256 * MIB,
    max_label: "256 MB",
    extensions: &["mpeg", "vorbis", "aac", "mp4", "ogg"],
};

const VIDEO: ScopeRule = ScopeRule {
    max_size: 8192 * MIB,
    max_label: "8 GB",
    extensions: &["h264", "mp4", "mpeg", "ogg"],
};

/// Looks up the rule for a scope, failing for media types with no rule.
pub fn scope_rule(service: Service, blob_type: &str) -> Result<ScopeRule, ValidationError> {
    match service {
        Service::User | Service::Author => Ok(PORTRAIT),
        Service::Media => match blob_type {
            "application" => Ok(DOCUMENT),
            "audio" => Ok(AUDIO),
            "video" => Ok(VIDEO),
            _ => Err(ValidationError::format("file", "application, audio or video")),
        },
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 {
        return Err(ValidationError::required(field));
    }
    if len > max {
        return Err(ValidationError::range(field, "1", max.to_string()));
    }
    Ok(())
}

/// Validates a canonical blob.
pub fn validate_blob(blob: &Blob) -> Result<(), ValidationError> {
    if blob.id.is_blank() {
        return Err(ValidationError::required("id"));
    }
    if blob.service.trim().is_empty() {
        return Err(ValidationError::required("service"));
    }
    let service = Service::from_name(&blob.service)
        .ok_or_else(|| ValidationError::format("service", "[media author user]"))?;
    check_length("name", &blob.name, NAME_MAX)?;
    if blob.blob_type.trim().is_empty() {
        return Err(ValidationError::required("blob_type"));
    }
    check_length("extension", &blob.extension, EXTENSION_MAX)?;
    if blob.url.chars().count() > URL_MAX {
        return Err(ValidationError::range("url", "1", URL_MAX.to_string()));
    }
    if blob.size <= 0 {
        return Err(ValidationError::range("size", "1", "n"));
    }

    let rule = scope_rule(service, &blob.blob_type)?;
    if blob.size > rule.max_size {
        return Err(ValidationError::range("file", "1 B", rule.max_label));
    }
    if !rule.extensions.contains(&blob.extension.as_str()) {
        return Err(ValidationError::format("file", rule.extensions.join(", ")));
    }

    Ok(())
}
