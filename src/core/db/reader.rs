/// Row Reader Module
///
/// Forward-only cursors over query results and typed, null-aware access to
/// the columns of the current row.
use crate::core::db::params::DATETIME_FORMAT;
use crate::core::{DbError, ExecutionKind, Result};
use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;
use rusqlite::types::{FromSqlError, Value, ValueRef};
use rusqlite::{Row, Rows};
use std::str::FromStr;
use uuid::Uuid;

/// Text layouts accepted when reading a date-time column.
const DATETIME_READ_FORMATS: [&str; 3] = [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// Conversion from a non-NULL column value.
///
/// NULL never reaches an implementation: the [`Record`] readers substitute
/// a default (or `None`) before calling it.
pub trait FromColumn: Sized {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError>;
}

fn other<E>(err: E) -> FromSqlError
where
    E: std::error::Error + Send + Sync + 'static,
{
    FromSqlError::Other(Box::new(err))
}

fn text(value: ValueRef<'_>) -> std::result::Result<&str, FromSqlError> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).map_err(other),
        _ => Err(FromSqlError::InvalidType),
    }
}

fn integer(value: ValueRef<'_>) -> std::result::Result<i64, FromSqlError> {
    match value {
        ValueRef::Integer(i) => Ok(i),
        _ => Err(FromSqlError::InvalidType),
    }
}

impl FromColumn for String {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        text(value).map(str::to_string)
    }
}

impl FromColumn for char {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        let s = text(value)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for bool {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        integer(value).map(|i| i != 0)
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl FromColumn for $ty {
                fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
                    let i = integer(value)?;
                    <$ty>::try_from(i).map_err(|_| FromSqlError::OutOfRange(i))
                }
            }
        )*
    };
}

impl_from_integer!(u8, i16, i32, i64);

impl FromColumn for f64 {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        match value {
            ValueRef::Real(f) => Ok(f),
            ValueRef::Integer(i) => Ok(i as f64),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for f32 {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        f64::from_column(value).map(|f| f as f32)
    }
}

impl FromColumn for Decimal {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        match value {
            ValueRef::Text(_) => Decimal::from_str(text(value)?).map_err(other),
            ValueRef::Integer(i) => Ok(Decimal::from(i)),
            ValueRef::Real(f) => Decimal::try_from(f).map_err(other),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for Uuid {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        match value {
            ValueRef::Text(_) => Uuid::parse_str(text(value)?).map_err(other),
            ValueRef::Blob(bytes) => Uuid::from_slice(bytes).map_err(other),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for NaiveDateTime {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        match value {
            ValueRef::Text(_) => {
                let s = text(value)?;
                DATETIME_READ_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
                    .ok_or(FromSqlError::InvalidType)
            }
            ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or(FromSqlError::OutOfRange(secs)),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        match value {
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl FromColumn for Value {
    fn from_column(value: ValueRef<'_>) -> std::result::Result<Self, FromSqlError> {
        Ok(Value::from(value))
    }
}

/// A column address: a name or a zero-based ordinal.
pub trait Field {
    fn ordinal(&self, row: &Row<'_>) -> Result<usize>;
    fn label(&self) -> String;
}

impl Field for &str {
    fn ordinal(&self, row: &Row<'_>) -> Result<usize> {
        row.as_ref()
            .column_index(self)
            .map_err(|_| DbError::FieldNotFound(self.to_string()))
    }

    fn label(&self) -> String {
        self.to_string()
    }
}

impl Field for usize {
    fn ordinal(&self, row: &Row<'_>) -> Result<usize> {
        if *self < row.as_ref().column_count() {
            Ok(*self)
        } else {
            Err(DbError::FieldNotFound(self.to_string()))
        }
    }

    fn label(&self) -> String {
        format!("#{}", self)
    }
}

/// The current row of a cursor.
pub struct Record<'a, 'stmt> {
    row: &'a Row<'stmt>,
}

macro_rules! typed_readers {
    ($($read:ident, $read_nullable:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Reads a `", stringify!($ty), "`, or its default when the column is NULL.")]
            pub fn $read(&self, field: impl Field) -> Result<$ty> {
                self.read(field)
            }

            #[doc = concat!("Reads a `", stringify!($ty), "`, or `None` when the column is NULL.")]
            pub fn $read_nullable(&self, field: impl Field) -> Result<Option<$ty>> {
                self.read_nullable(field)
            }
        )*
    };
}

impl<'a, 'stmt> Record<'a, 'stmt> {
    pub(crate) fn new(row: &'a Row<'stmt>) -> Self {
        Record { row }
    }

    pub fn column_count(&self) -> usize {
        self.row.as_ref().column_count()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.row.as_ref().column_names()
    }

    /// Resolves a column name to its ordinal.
    pub fn ordinal(&self, field: impl Field) -> Result<usize> {
        field.ordinal(self.row)
    }

    fn value_ref(&self, field: &impl Field) -> Result<ValueRef<'_>> {
        let index = field.ordinal(self.row)?;
        self.row
            .get_ref(index)
            .map_err(|_| DbError::FieldNotFound(field.label()))
    }

    pub fn is_null(&self, field: impl Field) -> Result<bool> {
        Ok(matches!(self.value_ref(&field)?, ValueRef::Null))
    }

    /// The raw column value, NULL included.
    pub fn value(&self, field: impl Field) -> Result<Value> {
        self.value_ref(&field).map(Value::from)
    }

    /// Reads a column, substituting `T::default()` for NULL.
    pub fn read<T: FromColumn + Default>(&self, field: impl Field) -> Result<T> {
        self.read_nullable(field).map(Option::unwrap_or_default)
    }

    /// Reads a column, returning `None` for NULL.
    pub fn read_nullable<T: FromColumn>(&self, field: impl Field) -> Result<Option<T>> {
        match self.value_ref(&field)? {
            ValueRef::Null => Ok(None),
            value => T::from_column(value)
                .map(Some)
                .map_err(|source| DbError::CouldNotCastValue {
                    field: field.label(),
                    source,
                }),
        }
    }

    typed_readers! {
        read_string, read_nullable_string => String;
        read_char, read_nullable_char => char;
        read_bool, read_nullable_bool => bool;
        read_byte, read_nullable_byte => u8;
        read_i16, read_nullable_i16 => i16;
        read_i32, read_nullable_i32 => i32;
        read_i64, read_nullable_i64 => i64;
        read_decimal, read_nullable_decimal => Decimal;
        read_f64, read_nullable_f64 => f64;
        read_f32, read_nullable_f32 => f32;
        read_guid, read_nullable_guid => Uuid;
        read_datetime, read_nullable_datetime => NaiveDateTime;
        read_bytes, read_nullable_bytes => Vec<u8>;
    }
}

/// A forward-only cursor over the rows of one query.
///
/// The cursor borrows the command that produced it, so it cannot outlive the
/// command, nor the batch behind it.
pub struct RowCursor<'stmt> {
    rows: Rows<'stmt>,
    sql: &'stmt str,
}

impl<'stmt> RowCursor<'stmt> {
    pub(crate) fn new(rows: Rows<'stmt>, sql: &'stmt str) -> Self {
        RowCursor { rows, sql }
    }

    pub fn sql(&self) -> &str {
        self.sql
    }

    /// Moves to the next row; `None` once the results are exhausted.
    pub fn advance(&mut self) -> Result<Option<Record<'_, 'stmt>>> {
        match self.rows.next() {
            Ok(Some(row)) => Ok(Some(Record::new(row))),
            Ok(None) => Ok(None),
            Err(e) => Err(DbError::execution(ExecutionKind::Reader, self.sql, e)),
        }
    }

    /// Applies `map` to every remaining row, in order.
    pub fn map<T, F>(mut self, mut map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Record<'_, '_>) -> Result<T>,
    {
        let mut records = Vec::new();
        while let Some(record) = self.advance()? {
            records.push(map(&record)?);
        }
        Ok(records)
    }

    /// Applies `map` to the next row only.
    pub fn map_first<T, F>(mut self, map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Record<'_, '_>) -> Result<T>,
    {
        match self.advance()? {
            Some(record) => map(&record).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn with_record<F>(sql: &str, check: F)
    where
        F: FnOnce(&Record<'_, '_>),
    {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let mut rows = stmt.raw_query();
        let row = rows.next().unwrap().unwrap();
        check(&Record::new(row));
    }

    #[test]
    fn test_null_defaults_and_absent_marker() {
        with_record("SELECT NULL AS n", |r| {
            assert_eq!(r.read_i32("n").unwrap(), 0);
            assert_eq!(r.read_string("n").unwrap(), "");
            assert_eq!(r.read_bytes("n").unwrap(), Vec::<u8>::new());
            assert_eq!(r.read_nullable_i32("n").unwrap(), None);
            assert_eq!(r.read_nullable_guid("n").unwrap(), None);
            assert!(r.is_null("n").unwrap());
        });
    }

    #[test]
    fn test_typed_reads() {
        with_record(
            "SELECT 'abc' AS s, 'z' AS c, 1 AS b, 300 AS i, 2.5 AS f, '12.75' AS d, \
             '00000000-0000-0000-0000-000000000001' AS g, '2024-01-02 03:04:05.25' AS t, X'0102' AS x",
            |r| {
                assert_eq!(r.read_string("s").unwrap(), "abc");
                assert_eq!(r.read_char("c").unwrap(), 'z');
                assert!(r.read_bool("b").unwrap());
                assert_eq!(r.read_i16("i").unwrap(), 300);
                assert_eq!(r.read_f64("f").unwrap(), 2.5);
                assert_eq!(r.read_f32("f").unwrap(), 2.5f32);
                assert_eq!(r.read_decimal("d").unwrap(), Decimal::new(1275, 2));
                assert_eq!(r.read_guid("g").unwrap(), Uuid::from_u128(1));
                assert_eq!(
                    r.read_datetime("t").unwrap(),
                    NaiveDateTime::parse_from_str("2024-01-02 03:04:05.25", DATETIME_FORMAT).unwrap()
                );
                assert_eq!(r.read_bytes("x").unwrap(), vec![1, 2]);
                assert_eq!(r.read_i64(3usize).unwrap(), 300);
            },
        );
    }

    #[test]
    fn test_cast_failure_names_field() {
        with_record("SELECT 'text' AS s, 300 AS big", |r| {
            match r.read_i32("s").unwrap_err() {
                DbError::CouldNotCastValue { field, .. } => assert_eq!(field, "s"),
                other => panic!("Expected cast error, got {:?}", other),
            }
            match r.read_byte("big").unwrap_err() {
                DbError::CouldNotCastValue {
                    source: FromSqlError::OutOfRange(300),
                    ..
                } => {}
                other => panic!("Expected out of range, got {:?}", other),
            }
        });
    }

    #[test]
    fn test_unknown_field() {
        with_record("SELECT 1 AS a", |r| {
            assert!(matches!(r.read_i32("missing"), Err(DbError::FieldNotFound(_))));
            assert!(matches!(r.read_i32(5usize), Err(DbError::FieldNotFound(_))));
        });
    }

    #[test]
    fn test_cursor_map_preserves_order_and_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        let sql = "SELECT 'a' AS v UNION ALL SELECT 'b' UNION ALL SELECT 'a'";
        let mut stmt = conn.prepare(sql).unwrap();
        let cursor = RowCursor::new(stmt.raw_query(), sql);

        let values = cursor.map(|r| r.read_string("v")).unwrap();
        assert_eq!(values, vec!["a", "b", "a"]);
    }
}
