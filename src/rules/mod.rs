//! Masking rules and the shared per-table rule store.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod store;

pub use store::RuleStore;

/// Strategy used to obscure a column's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MaskingType {
    FullMask,
    PartialMask,
    Replace,
    Hash,
    Randomize,
}

impl MaskingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullMask => "FULL_MASK",
            Self::PartialMask => "PARTIAL_MASK",
            Self::Replace => "REPLACE",
            Self::Hash => "HASH",
            Self::Randomize => "RANDOMIZE",
        }
    }
}

impl FromStr for MaskingType {
    type Err = RuleError;

    /// Accepts `FULL_MASK`, `fullMask`, `full-mask` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "fullmask" | "mask" => Ok(Self::FullMask),
            "partialmask" | "partial" => Ok(Self::PartialMask),
            "replace" => Ok(Self::Replace),
            "hash" => Ok(Self::Hash),
            "randomize" | "random" => Ok(Self::Randomize),
            _ => Err(RuleError::UnknownMaskingType(s.to_string())),
        }
    }
}

impl TryFrom<String> for MaskingType {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaskingType> for String {
    fn from(value: MaskingType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MaskingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column masking rule. Rules are immutable values; the store
/// replaces a table's list wholesale instead of patching entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingRule {
    pub table: String,
    pub column: String,
    pub masking_type: MaskingType,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl MaskingRule {
    /// Create an active rule
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        masking_type: MaskingType,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            masking_type,
            active: true,
        }
    }

    /// Same rule with `active` switched off
    pub fn inactive(self) -> Self {
        Self {
            active: false,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.table.trim().is_empty() {
            return Err(RuleError::EmptyField("table"));
        }
        if self.column.trim().is_empty() {
            return Err(RuleError::EmptyField("column"));
        }
        Ok(())
    }

    /// Whether this rule should be applied to queries against `table`.
    pub fn applies_to(&self, table: &str) -> bool {
        self.active && self.table.eq_ignore_ascii_case(table)
    }
}
