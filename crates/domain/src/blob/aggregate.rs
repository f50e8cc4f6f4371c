use common::ValidationError;
use serde::{Deserialize, Serialize};

use super::{Blob, StorageLocation};

/// Raw blob input as it arrives from a transport boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobAggregate {
    pub root_id: String,
    pub service: String,
    pub blob_type: String,
    pub extension: String,
    /// Payload size in bytes, as sent by the client.
    pub size: String,
}

impl BlobAggregate {
    /// Parses and validates the raw input into a canonical blob.
    ///
    /// Runs before any store call; on error nothing has been written.
    pub fn into_blob(self, location: &StorageLocation) -> Result<Blob, ValidationError> {
        for (field, value) in [
            ("root_id", &self.root_id),
            ("service", &self.service),
            ("blob_type", &self.blob_type),
            ("extension", &self.extension),
            ("size", &self.size),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::required(field));
            }
        }

        let size: i64 = self
            .size
            .trim()
            .parse()
            .map_err(|_| ValidationError::format("size", "int64"))?;
        if size <= 0 {
            return Err(ValidationError::range("size", "1", "n"));
        }

        let blob = Blob::new(
            self.root_id.trim(),
            self.service.trim(),
            self.blob_type.trim(),
            self.extension.trim(),
            size,
            location,
        );
        super::rules::validate_blob(&blob)?;
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(size: &str) -> BlobAggregate {
        BlobAggregate {
            root_id: "abc".into(),
            service: "media".into(),
            blob_type: "video".into(),
            extension: "mp4".into(),
            size: size.into(),
        }
    }

    #[test]
    fn parses_valid_input() {
        let blob = raw("1000000").into_blob(&StorageLocation::default()).unwrap();
        assert_eq!(blob.size, 1_000_000);
        assert_eq!(blob.id.as_str(), "0003abc");
    }

    #[test]
    fn size_must_be_an_integer() {
        let err = raw("12kb").into_blob(&StorageLocation::default()).unwrap_err();
        assert_eq!(err, ValidationError::format("size", "int64"));
    }

    #[test]
    fn size_must_be_positive() {
        let err = raw("-5").into_blob(&StorageLocation::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFieldRange { .. }));
    }

    #[test]
    fn blank_fields_are_required() {
        let mut input = raw("10");
        input.blob_type = "  ".into();
        let err = input.into_blob(&StorageLocation::default()).unwrap_err();
        assert_eq!(err, ValidationError::required("blob_type"));
    }
}
