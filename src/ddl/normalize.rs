//! Identifier and type normalization
//!
//! Pure functions that turn operator-supplied names and abstract column
//! types into something the backing PostgreSQL store accepts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Used when nothing usable survives sanitization
pub const FALLBACK_IDENTIFIER: &str = "unnamed";

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").expect("valid regex"));
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").expect("valid regex"));

/// Sanitize a raw name into a storage identifier.
///
/// Lower-cases, replaces anything outside `[a-z0-9_]` with `_`, collapses
/// underscore runs, trims edge underscores, prefixes a leading digit with
/// `_` and truncates to [`MAX_IDENTIFIER_LEN`]. Idempotent.
pub fn sanitize_identifier(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = DISALLOWED.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        return FALLBACK_IDENTIFIER.to_string();
    }

    let mut ident = if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    };

    // Everything left is ASCII, so byte truncation is char-safe
    ident.truncate(MAX_IDENTIFIER_LEN);
    let end = ident.trim_end_matches('_').len();
    ident.truncate(end);
    ident
}

/// Abstract column types offered to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    String,
    Integer,
    Bigint,
    Decimal,
    Float,
    Double,
    Boolean,
    Date,
    Timestamp,
    Time,
    Uuid,
    Json,
    Array,
}

impl ColumnType {
    /// Parse an abstract type name. Returns `None` for anything unknown.
    pub fn parse(raw: &str) -> Option<Self> {
        let ty = match raw.trim().to_lowercase().as_str() {
            "text" => Self::Text,
            "string" | "varchar" => Self::String,
            "integer" | "int" | "int4" => Self::Integer,
            "bigint" | "int8" => Self::Bigint,
            "decimal" | "numeric" | "money" => Self::Decimal,
            "float" | "real" | "float4" => Self::Float,
            "double" | "float8" | "double precision" => Self::Double,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "timestamp" | "timestamptz" | "datetime" => Self::Timestamp,
            "time" => Self::Time,
            "uuid" => Self::Uuid,
            "json" | "jsonb" | "object" => Self::Json,
            "array" | "text[]" => Self::Array,
            _ => return None,
        };
        Some(ty)
    }

    /// Native PostgreSQL type for this abstract type
    pub fn native(self, max_length: Option<u32>) -> String {
        match self {
            Self::Text | Self::String => match max_length {
                Some(n) if n > 0 => format!("varchar({})", n),
                _ => "text".to_string(),
            },
            Self::Integer => "integer".to_string(),
            Self::Bigint => "bigint".to_string(),
            Self::Decimal => "decimal(10,2)".to_string(),
            Self::Float => "real".to_string(),
            Self::Double => "double precision".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Date => "date".to_string(),
            Self::Timestamp => "timestamptz".to_string(),
            Self::Time => "time".to_string(),
            Self::Uuid => "uuid".to_string(),
            Self::Json => "jsonb".to_string(),
            Self::Array => "text[]".to_string(),
        }
    }
}

/// Map an abstract type to its native type, degrading unknown input to `text`
pub fn map_type(abstract_type: &str, max_length: Option<u32>) -> String {
    match ColumnType::parse(abstract_type) {
        Some(ty) => ty.native(max_length),
        None => {
            tracing::debug!("Unknown column type '{}', falling back to text", abstract_type);
            ColumnType::Text.native(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looks_sane(ident: &str) -> bool {
        let re = Regex::new(r"^([a-z][a-z0-9_]*|_[0-9][a-z0-9_]*)$").unwrap();
        re.is_match(ident) && ident.len() <= MAX_IDENTIFIER_LEN && !ident.ends_with('_')
    }

    #[test]
    fn test_sanitize_basic_names() {
        assert_eq!(sanitize_identifier("Orders"), "orders");
        assert_eq!(sanitize_identifier("Total Price!"), "total_price");
        assert_eq!(sanitize_identifier("  first--name  "), "first_name");
        assert_eq!(sanitize_identifier("__already_ok__"), "already_ok");
    }

    #[test]
    fn test_sanitize_leading_digit() {
        assert_eq!(sanitize_identifier("2024 sales"), "_2024_sales");
        assert_eq!(sanitize_identifier("_2024_sales"), "_2024_sales");
    }

    #[test]
    fn test_sanitize_never_empty() {
        assert_eq!(sanitize_identifier(""), FALLBACK_IDENTIFIER);
        assert_eq!(sanitize_identifier("!!!"), FALLBACK_IDENTIFIER);
        assert_eq!(sanitize_identifier("日本"), FALLBACK_IDENTIFIER);
    }

    #[test]
    fn test_sanitize_truncates_without_trailing_underscore() {
        let raw = format!("{}_tail", "a".repeat(62));
        let out = sanitize_identifier(&raw);
        assert_eq!(out, "a".repeat(62));
        assert!(out.len() <= MAX_IDENTIFIER_LEN);
    }

    #[test]
    fn test_sanitize_is_idempotent_and_well_formed() {
        let inputs = [
            "Orders",
            "Total Price!",
            "123",
            "9 lives",
            "ÉCOLE Ünïcode",
            "a__b___c",
            "___",
            "MiXeD-Case.Name/With\\Slashes",
            "x y z 1 2 3",
            &"Long Name ".repeat(20),
            &format!("1{}", "b".repeat(80)),
        ];
        for raw in inputs {
            let once = sanitize_identifier(raw);
            let twice = sanitize_identifier(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
            assert!(looks_sane(&once), "malformed identifier {:?} from {:?}", once, raw);
        }
    }

    #[test]
    fn test_map_type_known_types() {
        assert_eq!(map_type("text", None), "text");
        assert_eq!(map_type("string", Some(120)), "varchar(120)");
        assert_eq!(map_type("string", None), "text");
        assert_eq!(map_type("integer", None), "integer");
        assert_eq!(map_type("bigint", None), "bigint");
        assert_eq!(map_type("decimal", None), "decimal(10,2)");
        assert_eq!(map_type("float", None), "real");
        assert_eq!(map_type("double", None), "double precision");
        assert_eq!(map_type("boolean", None), "boolean");
        assert_eq!(map_type("date", None), "date");
        assert_eq!(map_type("timestamp", None), "timestamptz");
        assert_eq!(map_type("time", None), "time");
        assert_eq!(map_type("uuid", None), "uuid");
        assert_eq!(map_type("json", None), "jsonb");
        assert_eq!(map_type("array", None), "text[]");
    }

    #[test]
    fn test_map_type_is_case_insensitive() {
        assert_eq!(map_type("  Decimal ", None), "decimal(10,2)");
        assert_eq!(map_type("BOOLEAN", None), "boolean");
    }

    #[test]
    fn test_map_type_unknown_defaults_to_text() {
        assert_eq!(map_type("geometry", None), "text");
        assert_eq!(map_type("", Some(10)), "text");
    }
}
