//! Structured metadata attached to items, edges and tracking records
//!
//! Metadata is an ordinary JSON object in memory. It is serialized to a TEXT
//! column only when it crosses the SQLite boundary.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Read a string array, skipping non-string elements
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl ToSql for Metadata {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let json = serde_json::to_string(&self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(json))
    }
}

impl FromSql for Metadata {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Metadata(map)),
            Ok(_) => Err(FromSqlError::Other("metadata is not a JSON object".into())),
            Err(e) => Err(FromSqlError::Other(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let meta = Metadata::new()
            .with("language", "rust")
            .with("lines", 42)
            .with("generated", true)
            .with("tags", serde_json::json!(["auth", 7, "login"]));

        assert_eq!(meta.get_str("language"), Some("rust"));
        assert_eq!(meta.get_i64("lines"), Some(42));
        assert_eq!(meta.get_bool("generated"), Some(true));
        assert_eq!(meta.get_strings("tags"), vec!["auth", "login"]);
        assert_eq!(meta.get_str("missing"), None);
    }

    #[test]
    fn test_sql_boundary_roundtrip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (m TEXT)", []).unwrap();

        let meta = Metadata::new().with("weight", 0.5);
        conn.execute("INSERT INTO t (m) VALUES (?1)", [&meta]).unwrap();

        let loaded: Metadata = conn.query_row("SELECT m FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(loaded, meta);
    }

    #[test]
    fn test_rejects_non_object_json() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let result: rusqlite::Result<Metadata> = conn.query_row("SELECT '[1,2]'", [], |row| row.get(0));
        assert!(result.is_err());
    }
}
