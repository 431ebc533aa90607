//! Witness data helpers
//!
//! Witness files are JSON objects mapping a witness name to
//! `{"value": "<literal>", "type": "<type>"}`. Empty text is an empty object.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static WITNESS_READ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bwitness::([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static UNSIGNED_TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^u(\d+)$").unwrap());

/// Parsed witness object, key order preserved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WitnessFile {
    entries: Map<String, Value>,
}

impl WitnessFile {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Literal value of `name`, whether stored as an entry object or bare
    pub fn value_of(&self, name: &str) -> Option<String> {
        match self.entries.get(name)? {
            Value::Object(entry) => entry.get("value").map(scalar_text),
            other => Some(scalar_text(other)),
        }
    }

    /// Add or replace an entry
    pub fn insert(&mut self, name: &str, value: &str, ty: &str) {
        let mut entry = Map::new();
        entry.insert("value".into(), Value::String(value.to_string()));
        entry.insert("type".into(), Value::String(ty.to_string()));
        self.entries.insert(name.to_string(), Value::Object(entry));
    }

    /// Replace the value of `name`, keeping its declared type
    pub fn set_value(&mut self, name: &str, value: &str) {
        match self.entries.get_mut(name) {
            Some(Value::Object(entry)) => {
                entry.insert("value".into(), Value::String(value.to_string()));
            }
            Some(other) => *other = Value::String(value.to_string()),
            None => {
                let mut entry = Map::new();
                entry.insert("value".into(), Value::String(value.to_string()));
                self.entries.insert(name.to_string(), Value::Object(entry));
            }
        }
    }

    /// Change the declared type of an existing entry
    pub fn set_type(&mut self, name: &str, ty: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(Value::Object(entry)) => {
                entry.insert("type".into(), Value::String(ty.to_string()));
                true
            }
            _ => false,
        }
    }

    pub fn render(&self) -> String {
        format!("{:#}", Value::Object(self.entries.clone()))
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Witness names read by `source`, in order of first use
pub fn witness_reads(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in WITNESS_READ.captures_iter(source) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Declared type of the `let` that reads `witness::name`, if any
pub fn witness_type(source: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r"let\s+(?:mut\s+)?[A-Za-z_][A-Za-z0-9_]*\s*:\s*([^=;]+?)\s*=\s*witness::{}\b",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(source).map(|caps| caps[1].trim().to_string())
}

/// Placeholder literal for `ty`
pub fn default_value(ty: &str) -> &'static str {
    if UNSIGNED_TYPE.is_match(ty) {
        "0"
    } else if ty == "bool" {
        "false"
    } else {
        "0x00"
    }
}

/// Bit width of an unsigned integer type (`u32` → 32)
pub fn unsigned_width(ty: &str) -> Option<u32> {
    UNSIGNED_TYPE
        .captures(ty.trim())
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"fn main() {
    let a: u32 = witness::A;
    let flag: bool = witness::FLAG;
    let sig: Signature = witness::SIG;
    assert!(jet::eq_32(a, witness::A));
}"#;

    #[test]
    fn test_empty_text_is_empty_object() {
        let witness = WitnessFile::parse("  ").unwrap();
        assert!(witness.is_empty());
        assert_eq!(witness.render(), "{}");
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(WitnessFile::parse("[1, 2]").is_err());
        assert!(WitnessFile::parse("{not json").is_err());
    }

    #[test]
    fn test_reads_in_first_use_order() {
        assert_eq!(witness_reads(SOURCE), vec!["A", "FLAG", "SIG"]);
    }

    #[test]
    fn test_types_and_defaults() {
        assert_eq!(witness_type(SOURCE, "A").as_deref(), Some("u32"));
        assert_eq!(witness_type(SOURCE, "SIG").as_deref(), Some("Signature"));
        assert_eq!(witness_type(SOURCE, "NOPE"), None);
        assert_eq!(default_value("u32"), "0");
        assert_eq!(default_value("bool"), "false");
        assert_eq!(default_value("Signature"), "0x00");
        assert_eq!(unsigned_width("u256"), Some(256));
        assert_eq!(unsigned_width("bool"), None);
    }

    #[test]
    fn test_insert_and_set_value_round_trip() {
        let mut witness = WitnessFile::parse(r#"{"A": {"value": "5", "type": "u32"}}"#).unwrap();
        witness.insert("B", "0", "u8");
        witness.set_value("A", "20");
        assert!(witness.set_type("A", "u64"));

        let reparsed = WitnessFile::parse(&witness.render()).unwrap();
        assert_eq!(reparsed.names(), vec!["A", "B"]);
        assert_eq!(reparsed.value_of("A").as_deref(), Some("20"));
        assert_eq!(reparsed.value_of("B").as_deref(), Some("0"));
        assert_eq!(reparsed, witness);
    }
}
