//! SQL value types for database-agnostic row handling.

use chrono::NaiveDateTime;

/// SQL value enum covering the column types the metadata store uses.
///
/// Values are owned: the rekeying engine copies each row exactly once and
/// the remap cache, not zero-copy buffers, is its memory-control mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (covers integer and bigint columns).
    Int(i64),

    /// 64-bit floating point. Not part of the store's declared column
    /// types, but drivers can encounter it when reading arbitrary rows.
    Float(f64),

    /// Text/string data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Get the integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// A materialized query result: column names plus rows of values.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column names, in select order.
    pub columns: Vec<String>,

    /// Rows, each with one value per column.
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Create a result set from column names and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result set has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows as [`RowView`]s.
    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |values| RowView {
            columns: &self.columns,
            values,
        })
    }
}

/// A borrowed view of one row, with access by column name.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    values: &'a [SqlValue],
}

impl<'a> RowView<'a> {
    /// Create a view from parallel column/value slices.
    pub fn new(columns: &'a [String], values: &'a [SqlValue]) -> Self {
        Self { columns, values }
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&'a SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Get a value by column name, cloned, erroring on an unknown column.
    pub fn require(&self, column: &str) -> crate::error::Result<SqlValue> {
        self.get(column).cloned().ok_or_else(|| {
            crate::error::StoreError::Integrity(format!("row has no column '{}'", column))
        })
    }

    /// Get a non-null integer by column name.
    pub fn require_int(&self, column: &str) -> crate::error::Result<i64> {
        match self.get(column) {
            Some(SqlValue::Int(v)) => Ok(*v),
            Some(other) => Err(crate::error::StoreError::Integrity(format!(
                "column '{}' is not an integer (got {:?})",
                column, other
            ))),
            None => Err(crate::error::StoreError::Integrity(format!(
                "row has no column '{}'",
                column
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int(42).is_null());
    }

    #[test]
    fn test_from_implementations() {
        let v: SqlValue = 42i64.into();
        assert_eq!(v, SqlValue::Int(42));

        let v: SqlValue = "hello".into();
        assert_eq!(v, SqlValue::Text("hello".to_string()));

        let v: SqlValue = Option::<i64>::None.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_row_view_access() {
        let columns = vec!["uid".to_string(), "name".to_string()];
        let values = vec![SqlValue::Int(7), SqlValue::Text("vm1".to_string())];
        let row = RowView::new(&columns, &values);

        assert_eq!(row.require_int("uid").unwrap(), 7);
        assert_eq!(row.get("name").unwrap().as_text(), Some("vm1"));
        assert!(row.get("missing").is_none());
        assert!(row.require_int("name").is_err());
    }

    #[test]
    fn test_result_set_iter() {
        let rs = ResultSet::new(
            vec!["uid".to_string()],
            vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
        );
        let uids: Vec<i64> = rs.iter().map(|r| r.require_int("uid").unwrap()).collect();
        assert_eq!(uids, vec![1, 2]);
        assert_eq!(rs.len(), 2);
        assert!(!rs.is_empty());
    }
}
