//! Quantizer registry
//!
//! Owns every [`Quantizer`] of a simulated graph. Quantizers are addressed by a
//! [`QuantizerId`] handed out at registration; names are only used for lookup
//! and for the encoding file.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::io::EncodingFile;
use crate::quant::{Encoding, OpMode, Quantizer};
use crate::{Error, Result};

/// Index of a registered quantizer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuantizerId(usize);

impl QuantizerId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for QuantizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which section of the encoding file a quantizer belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorKind {
    Activation,
    Param,
}

#[derive(Debug)]
struct Entry {
    name: String,
    kind: TensorKind,
    quantizer: Quantizer,
}

/// Indexed ownership of the quantizers of one graph
#[derive(Debug, Default)]
pub struct QuantizerRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, QuantizerId>,
}

impl QuantizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a quantizer
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if the name is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: TensorKind,
        quantizer: Quantizer,
    ) -> Result<QuantizerId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::InvalidConfiguration(format!(
                "quantizer '{name}' is already registered"
            )));
        }

        let id = QuantizerId(self.entries.len());
        self.by_name.insert(name.clone(), id);
        self.entries.push(Entry {
            name,
            kind,
            quantizer,
        });
        Ok(id)
    }

    pub fn get(&self, id: QuantizerId) -> Option<&Quantizer> {
        self.entries.get(id.0).map(|e| &e.quantizer)
    }

    pub fn id_of(&self, name: &str) -> Option<QuantizerId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: QuantizerId) -> Option<&str> {
        self.entries.get(id.0).map(|e| e.name.as_str())
    }

    pub fn kind_of(&self, id: QuantizerId) -> Option<TensorKind> {
        self.entries.get(id.0).map(|e| e.kind)
    }

    /// Run one invocation of a registered quantizer
    ///
    /// # Errors
    ///
    /// `UnknownQuantizer` for an id this registry never issued, otherwise
    /// whatever [`Quantizer::compute`] returns.
    pub fn compute(&self, id: QuantizerId, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.get(id)
            .ok_or_else(|| Error::UnknownQuantizer(id.to_string()))?
            .compute(input, output)
    }

    pub fn set_op_mode_all(&self, op_mode: OpMode) {
        for entry in &self.entries {
            entry.quantizer.set_op_mode(op_mode);
        }
    }

    /// Freeze encodings for every quantizer that saw calibration data
    ///
    /// Returns the number of quantizers that received an encoding. Quantizers
    /// without data keep their previous state.
    pub fn compute_encodings_all(&self) -> Result<usize> {
        let mut frozen = 0;
        for entry in &self.entries {
            match entry.quantizer.compute_encodings() {
                Ok(_) => frozen += 1,
                Err(Error::NotCalibrated) => {
                    warn!(name = %entry.name, "no calibration data, encoding not computed");
                }
                Err(e) => return Err(e),
            }
        }
        info!(frozen, total = self.entries.len(), "computed encodings");
        Ok(frozen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered quantizers in registration order
    pub fn iter(&self) -> impl Iterator<Item = (QuantizerId, &str, &Quantizer)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (QuantizerId(i), e.name.as_str(), &e.quantizer))
    }

    /// Collect every frozen encoding into a file
    pub fn export_encodings(&self) -> EncodingFile {
        let mut file = EncodingFile::new();
        for entry in &self.entries {
            let Some(encoding) = entry.quantizer.encoding() else {
                continue;
            };
            let section = match entry.kind {
                TensorKind::Activation => &mut file.activation_encodings,
                TensorKind::Param => &mut file.param_encodings,
            };
            section.insert(entry.name.clone(), vec![encoding.to_record()]);
        }
        file
    }

    /// Install encodings from a file; returns how many were installed
    ///
    /// # Errors
    ///
    /// - `UnknownQuantizer` for a name that is not registered
    /// - `InvalidConfiguration` for a record that fails validation, a tensor
    ///   listed in the wrong section, or a tensor without exactly one record
    /// - `InvalidConfiguration` for an encoding whose grid kind differs from
    ///   the target quantizer's; records without `is_symmetric` take the
    ///   target's kind
    pub fn import_encodings(&self, file: &EncodingFile) -> Result<usize> {
        let sections = [
            (TensorKind::Activation, &file.activation_encodings),
            (TensorKind::Param, &file.param_encodings),
        ];

        // validate everything before touching any quantizer
        let mut pending = Vec::new();
        for (kind, section) in sections {
            for (name, records) in section {
                let id = self
                    .id_of(name)
                    .ok_or_else(|| Error::UnknownQuantizer(name.clone()))?;
                let entry = &self.entries[id.0];
                if entry.kind != kind {
                    return Err(Error::InvalidConfiguration(format!(
                        "'{name}' is registered as {:?}, found under {kind:?} encodings",
                        entry.kind
                    )));
                }
                let [record] = records.as_slice() else {
                    return Err(Error::InvalidConfiguration(format!(
                        "'{name}' needs exactly one encoding, file has {}",
                        records.len()
                    )));
                };
                let symmetric = entry.quantizer.is_symmetric();
                let encoding = Encoding::try_from(record.assume_symmetric(symmetric))?;
                encoding.grid(symmetric)?;
                pending.push((entry, encoding));
            }
        }

        for (entry, encoding) in &pending {
            entry.quantizer.set_encoding(*encoding)?;
        }
        info!(imported = pending.len(), "imported encodings");
        Ok(pending.len())
    }
}
