use std::fmt;
use tracing::warn;

/// Separator used by the persisted `"<bucket>,<key>"` form
pub const LOCATOR_SEPARATOR: char = ',';

/// Bucket and key of an object in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    pub bucket: String,
    pub key: String,
}

impl StorageLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Legacy persisted form, `"<bucket>,<key>"`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.bucket, LOCATOR_SEPARATOR, self.key)
    }

    /// Parse the persisted form, splitting on the first separator only.
    ///
    /// A value without a separator yields `None`. Such values are logged,
    /// since they point at a record written by something other than this
    /// service.
    pub fn decode(value: &str) -> Option<Self> {
        match value.split_once(LOCATOR_SEPARATOR) {
            Some((bucket, key)) => Some(Self::new(bucket, key)),
            None => {
                warn!(value = %value, "Stored video locator has no bucket separator");
                None
            }
        }
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}
