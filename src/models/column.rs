//! Column definition models shared by the DDL layer and the registry

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

/// Referential action for ON DELETE / ON UPDATE
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Restrict,
    Cascade,
    SetNull,
    NoAction,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl std::fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

impl FromStr for ReferentialAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace(&['_', '-'][..], " ");
        match normalized.as_str() {
            "RESTRICT" => Ok(ReferentialAction::Restrict),
            "CASCADE" => Ok(ReferentialAction::Cascade),
            "SET NULL" => Ok(ReferentialAction::SetNull),
            "NO ACTION" => Ok(ReferentialAction::NoAction),
            "SET DEFAULT" => Ok(ReferentialAction::SetDefault),
            _ => Err(format!("Unknown referential action: {}", s)),
        }
    }
}

/// Foreign key target of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<String>,
}

/// Operator-supplied column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    #[validate(length(min = 1, max = 63, message = "Column name must be between 1 and 63 characters"))]
    pub name: String,

    /// Abstract type name (text, integer, decimal, ...)
    #[serde(rename = "type")]
    pub data_type: String,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default)]
    pub is_primary_key: bool,

    #[serde(default)]
    pub is_unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnSpec {
    /// Nullable column of the given abstract type with no constraints
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            is_primary_key: false,
            is_unique: false,
            default_value: None,
            max_length: None,
            references: None,
            comment: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ColumnReference {
            table: table.into(),
            column: column.into(),
            on_delete: None,
            on_update: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_action_parsing() {
        assert_eq!("cascade".parse::<ReferentialAction>().unwrap(), ReferentialAction::Cascade);
        assert_eq!("set_null".parse::<ReferentialAction>().unwrap(), ReferentialAction::SetNull);
        assert_eq!("No Action".parse::<ReferentialAction>().unwrap(), ReferentialAction::NoAction);
        assert!("explode".parse::<ReferentialAction>().is_err());
    }

    #[test]
    fn test_column_spec_deserializes_with_defaults() {
        let spec: ColumnSpec =
            serde_json::from_str(r#"{"name": "Total Price!", "type": "decimal"}"#).unwrap();
        assert_eq!(spec.data_type, "decimal");
        assert!(!spec.nullable);
        assert!(!spec.is_primary_key);
        assert!(spec.references.is_none());
    }

    #[test]
    fn test_column_name_length_matches_identifier_limit() {
        assert!(ColumnSpec::new("a".repeat(63), "text").validate().is_ok());
        assert!(ColumnSpec::new("a".repeat(64), "text").validate().is_err());
        assert!(ColumnSpec::new("", "text").validate().is_err());
    }
}
