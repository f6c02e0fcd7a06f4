//! Free-form strategy parameter bags.
//!
//! Strategies are configured through an opaque map so the engine never needs
//! per-strategy config structs. Each strategy reads the keys it knows about
//! and falls back to its own defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Ordered string-keyed parameter bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams(BTreeMap<String, ParamValue>);

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: ParamValue) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn set_int(self, name: &str, value: i64) -> Self {
        self.set(name, ParamValue::Int(value))
    }

    pub fn set_float(self, name: &str, value: f64) -> Self {
        self.set(name, ParamValue::Float(value))
    }

    /// In-place insert for an already-built bag.
    pub fn insert(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Integer parameter as a window length; non-integer values fall back.
    pub fn period(&self, name: &str, default: usize) -> usize {
        match self.0.get(name) {
            Some(ParamValue::Int(v)) if *v > 0 => *v as usize,
            _ => default,
        }
    }

    pub fn float(&self, name: &str, default: f64) -> f64 {
        match self.0.get(name) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f64,
            _ => default,
        }
    }

    pub fn bool(&self, name: &str, default: bool) -> bool {
        match self.0.get(name) {
            Some(ParamValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
