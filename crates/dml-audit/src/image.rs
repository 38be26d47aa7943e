// image.rs — Before/after row images.
//
// A RowImage maps every tracked column to its value as a JSON value, in
// descriptor order. Types survive the trip: integers stay integers, reals
// stay reals, text stays text, NULL stays null, booleans stay booleans.
// Nothing is stringified. A value with no JSON representation (a BLOB, a
// NaN) is an error, and the mutation that produced it must fail rather than
// be logged incompletely.
//
// The SQL triggers build the same image with `json_object(...)`; the
// functions here are the in-process equivalent plus the decoder both paths
// share.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::AuditError;
use crate::table::{ColumnType, TrackedTable};

/// A single column value as handed to the capture path.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Json(Value),
    Blob(Vec<u8>),
}

impl ColumnValue {
    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Integer(_) => "integer",
            ColumnValue::Real(_) => "real",
            ColumnValue::Text(_) => "text",
            ColumnValue::Boolean(_) => "boolean",
            ColumnValue::Json(_) => "json",
            ColumnValue::Blob(_) => "blob",
        }
    }

    /// Convert to the JSON value stored in an image.
    ///
    /// The column type only matters where SQLite's storage differs from the
    /// image: booleans stored as 0/1 and JSON stored as text.
    fn to_image_value(&self, column_type: ColumnType) -> Result<Value, &'static str> {
        let value = match (self, column_type) {
            (ColumnValue::Null, _) => Value::Null,
            (ColumnValue::Integer(i), ColumnType::Boolean) => Value::Bool(*i != 0),
            (ColumnValue::Integer(i), _) => Value::from(*i),
            (ColumnValue::Real(r), _) => {
                Value::Number(Number::from_f64(*r).ok_or("non-finite real")?)
            }
            (ColumnValue::Text(s), ColumnType::Json) => {
                serde_json::from_str(s).map_err(|_| "malformed json")?
            }
            (ColumnValue::Text(s), _) => Value::String(s.clone()),
            (ColumnValue::Boolean(b), _) => Value::Bool(*b),
            (ColumnValue::Json(v), _) => v.clone(),
            (ColumnValue::Blob(_), _) => return Err("blob"),
        };
        Ok(value)
    }

    /// Recover a typed value from its image representation.
    pub fn from_image_value(value: &Value) -> Self {
        match value {
            Value::Null => ColumnValue::Null,
            Value::Bool(b) => ColumnValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ColumnValue::Integer(i),
                None => ColumnValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ColumnValue::Text(s.clone()),
            other => ColumnValue::Json(other.clone()),
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Integer(i64::from(value))
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Real(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Boolean(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ColumnValue::Null, Into::into)
    }
}

impl From<rusqlite::types::Value> for ColumnValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value as Sql;
        match value {
            Sql::Null => ColumnValue::Null,
            Sql::Integer(i) => ColumnValue::Integer(i),
            Sql::Real(r) => ColumnValue::Real(r),
            Sql::Text(s) => ColumnValue::Text(s),
            Sql::Blob(b) => ColumnValue::Blob(b),
        }
    }
}

/// A row as seen by the in-process capture path: column name → value.
///
/// Column lookups are case-insensitive, like SQLite's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, ColumnValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value and return self (builder pattern).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column value, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<ColumnValue>) {
        let column = column.into();
        let value = value.into();
        match self
            .values
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }
}

impl<K: Into<String>, V: Into<ColumnValue>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

/// Structured snapshot of a row: every tracked column, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowImage(Map<String, Value>);

impl RowImage {
    /// Capture the tracked columns of `row`.
    ///
    /// Every tracked column must be present; extra columns in `row` are
    /// ignored, just as a trigger ignores columns it wasn't generated for.
    pub fn capture(table: &TrackedTable, row: &Row) -> Result<Self, AuditError> {
        let mut map = Map::with_capacity(table.columns.len());
        for column in &table.columns {
            let value = row.get(&column.name).ok_or_else(|| AuditError::MissingColumn {
                table: table.name.clone(),
                column: column.name.clone(),
            })?;
            let json = value
                .to_image_value(column.column_type)
                .map_err(|kind| AuditError::UnsupportedValue {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    kind,
                })?;
            map.insert(column.name.clone(), json);
        }
        Ok(Self(map))
    }

    /// Parse the JSON text stored in `old_values` / `new_values`.
    pub fn from_json_str(text: &str) -> Result<Self, AuditError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_string(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Typed value of a column, if the image holds it.
    pub fn get(&self, column: &str) -> Option<ColumnValue> {
        self.0.get(column).map(ColumnValue::from_image_value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Columns whose value differs between two images (in this image's order).
    pub fn changed_columns<'a>(&'a self, other: &'a RowImage) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|(name, value)| other.0.get(name.as_str()) != Some(*value))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl From<Map<String, Value>> for RowImage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> TrackedTable {
        TrackedTable::new("t")
            .column("id", ColumnType::Integer)
            .column("name", ColumnType::Text)
            .column("score", ColumnType::Real)
            .column("active", ColumnType::Boolean)
            .column("meta", ColumnType::Json)
            .column("note", ColumnType::Any)
            .with_identity("id")
    }

    fn row() -> Row {
        Row::new()
            .with("id", 1)
            .with("name", "A")
            .with("score", 2.5)
            .with("active", 1)
            .with("meta", r#"{"k":[1,2]}"#)
            .with("note", ColumnValue::Null)
    }

    #[test]
    fn capture_keeps_column_order_and_types() {
        let image = RowImage::capture(&table(), &row()).unwrap();
        assert_eq!(
            image.columns().collect::<Vec<_>>(),
            vec!["id", "name", "score", "active", "meta", "note"]
        );
        assert_eq!(
            serde_json::to_value(&image).unwrap(),
            json!({"id": 1, "name": "A", "score": 2.5, "active": true, "meta": {"k": [1, 2]}, "note": null})
        );
    }

    #[test]
    fn decoding_recovers_value_types() {
        let image = RowImage::capture(&table(), &row()).unwrap();
        let text = image.to_json_string().unwrap();
        let decoded = RowImage::from_json_str(&text).unwrap();

        assert_eq!(decoded.get("id"), Some(ColumnValue::Integer(1)));
        assert_eq!(decoded.get("name"), Some(ColumnValue::Text("A".into())));
        assert_eq!(decoded.get("score"), Some(ColumnValue::Real(2.5)));
        assert_eq!(decoded.get("active"), Some(ColumnValue::Boolean(true)));
        assert_eq!(decoded.get("note"), Some(ColumnValue::Null));
        assert_eq!(decoded.get("meta"), Some(ColumnValue::Json(json!({"k": [1, 2]}))));
    }

    #[test]
    fn numeric_looking_text_stays_text() {
        let table = TrackedTable::new("t").column("code", ColumnType::Text);
        let image = RowImage::capture(&table, &Row::new().with("code", "007")).unwrap();
        assert_eq!(image.get("code"), Some(ColumnValue::Text("007".into())));
    }

    #[test]
    fn missing_tracked_column_is_an_error() {
        let row = Row::new().with("id", 1);
        let err = RowImage::capture(&table(), &row).unwrap_err();
        assert!(matches!(err, AuditError::MissingColumn { ref column, .. } if column == "name"));
    }

    #[test]
    fn untracked_columns_are_ignored() {
        let table = TrackedTable::new("t").column("id", ColumnType::Integer);
        let row = Row::new().with("id", 1).with("extra", "x");
        let image = RowImage::capture(&table, &row).unwrap();
        assert_eq!(image.len(), 1);
    }

    #[test]
    fn blob_values_cannot_be_serialized() {
        let table = TrackedTable::new("t").column("data", ColumnType::Any);
        let row = Row::new().with("data", ColumnValue::Blob(vec![1, 2, 3]));
        let err = RowImage::capture(&table, &row).unwrap_err();
        assert!(matches!(err, AuditError::UnsupportedValue { kind: "blob", .. }));
    }

    #[test]
    fn non_finite_reals_cannot_be_serialized() {
        let table = TrackedTable::new("t").column("x", ColumnType::Real);
        let row = Row::new().with("x", f64::NAN);
        assert!(RowImage::capture(&table, &row).is_err());
    }

    #[test]
    fn row_lookup_is_case_insensitive() {
        let mut row = Row::new().with("Name", "A");
        row.set("NAME", "B");
        assert_eq!(row.get("name"), Some(&ColumnValue::Text("B".into())));
    }

    #[test]
    fn changed_columns_lists_differences() {
        let t = TrackedTable::new("t")
            .column("id", ColumnType::Integer)
            .column("name", ColumnType::Text);
        let before = RowImage::capture(&t, &Row::new().with("id", 1).with("name", "A")).unwrap();
        let after = RowImage::capture(&t, &Row::new().with("id", 1).with("name", "B")).unwrap();
        assert_eq!(before.changed_columns(&after), vec!["name"]);
        assert!(before.changed_columns(&before).is_empty());
    }
}
