//! `ParameterSet`: spec §3. A name -> value mapping, keys unique, insertion
//! order irrelevant — backed by a `BTreeMap` so iteration is always
//! lexicographically sorted, which doubles as the canonical order hashing
//! needs.

use super::definition::ParameterDefinition;
use super::value::ParamValue;
use crate::errors::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet(BTreeMap<String, ParamValue>);

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates every required parameter is present and every value is
    /// in-range and step-aligned, per spec §3/§4.1.
    pub fn validate(&self, defs: &[ParameterDefinition]) -> Result<(), CoreError> {
        let mut errors = Vec::new();
        for def in defs {
            if let Err(e) = def.validate_value(self.0.get(&def.name)) {
                errors.extend(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidArgument(errors.join("; ")))
        }
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(String, ParamValue)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
