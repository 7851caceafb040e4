//! Encoding file layout

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quant::EncodingRecord;

/// Current encoding file version
pub const ENCODING_FILE_VERSION: &str = "0.6.1";

/// Encodings of a whole graph, keyed by tensor name
///
/// Each tensor maps to one record, or one per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingFile {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub activation_encodings: BTreeMap<String, Vec<EncodingRecord>>,

    #[serde(default)]
    pub param_encodings: BTreeMap<String, Vec<EncodingRecord>>,
}

impl EncodingFile {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            activation_encodings: BTreeMap::new(),
            param_encodings: BTreeMap::new(),
        }
    }

    /// Total number of tensors in the file
    pub fn len(&self) -> usize {
        self.activation_encodings.len() + self.param_encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EncodingFile {
    fn default() -> Self {
        Self::new()
    }
}

fn default_version() -> String {
    ENCODING_FILE_VERSION.to_string()
}
