//! Runtime values the evaluator works on.

use crate::entity::EntityRef;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A value bound to an alias or parameter, or produced by an expression.
///
/// Integers and decimals compare and hash by numeric value, so `1` and
/// `1.0` are equal. Entities are equal when they are the same object or
/// share a type name and a non-null identity.
#[derive(Clone)]
pub enum Value {
    /// SQL null.
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(BigDecimal),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    /// A live entity object.
    Entity(EntityRef),
    /// A collection, as produced by collection-valued paths and subselects.
    Collection(Vec<Value>),
    /// One projected row of a multi-path subselect.
    Tuple(Vec<Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an entity.
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Numeric value as a decimal.
    pub fn to_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Integer(i) => Some(BigDecimal::from(*i)),
            Value::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Decimal(_))
    }

    /// Elements of a collection, or the value itself; null yields nothing.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::Collection(items) => items,
            other => vec![other],
        }
    }

    /// Collapse path results: empty to null, singleton to its element.
    pub fn collapse(mut items: Vec<Value>) -> Value {
        match items.len() {
            0 => Value::Null,
            1 => items.remove(0),
            _ => Value::Collection(items),
        }
    }

    /// Try to compare two values.
    ///
    /// Returns `None` for null operands and for values of unrelated types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.to_decimal()?.partial_cmp(&b.to_decimal()?)
            }
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => a.partial_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Timestamp(b)) => a.and_hms_opt(0, 0, 0)?.partial_cmp(b),
            (Value::Timestamp(a), Value::Date(b)) => a.partial_cmp(&b.and_hms_opt(0, 0, 0)?),
            _ => None,
        }
    }

    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::Entity(e) => e.entity_name(),
            Value::Collection(_) => "collection",
            Value::Tuple(_) => "tuple",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => a.to_decimal() == b.to_decimal(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Entity(a), Value::Entity(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                match (a.identity(), b.identity()) {
                    (Some(x), Some(y)) => {
                        a.entity_name() == b.entity_name() && !x.is_null() && x == y
                    }
                    _ => false,
                }
            }
            (Value::Collection(a), Value::Collection(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // Integers hash like the equal decimal.
            Value::Integer(i) => {
                2u8.hash(state);
                BigDecimal::from(*i).normalized().hash(state);
            }
            Value::Decimal(d) => {
                2u8.hash(state);
                d.normalized().hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Date(d) => {
                4u8.hash(state);
                d.hash(state);
            }
            Value::Time(t) => {
                5u8.hash(state);
                t.hash(state);
            }
            Value::Timestamp(t) => {
                6u8.hash(state);
                t.hash(state);
            }
            Value::Entity(e) => {
                7u8.hash(state);
                e.entity_name().hash(state);
                match e.identity() {
                    Some(id) if !id.is_null() => id.hash(state),
                    _ => (Arc::as_ptr(e) as *const () as usize).hash(state),
                }
            }
            Value::Collection(items) => {
                8u8.hash(state);
                items.hash(state);
            }
            Value::Tuple(items) => {
                9u8.hash(state);
                items.hash(state);
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Decimal(d) => write!(f, "Decimal({})", d),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Date(d) => write!(f, "Date({})", d),
            Value::Time(t) => write!(f, "Time({})", t),
            Value::Timestamp(t) => write!(f, "Timestamp({})", t),
            // Entity graphs may be cyclic; never recurse into properties.
            Value::Entity(_) => write!(f, "Entity({})", self),
            Value::Collection(items) => f.debug_tuple("Collection").field(items).finish(),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::Entity(e) => match e.identity() {
                Some(id) if !id.is_null() => write!(f, "{}#{}", e.entity_name(), id),
                _ => write!(f, "{}@{:p}", e.entity_name(), Arc::as_ptr(e) as *const ()),
            },
            Value::Collection(items) | Value::Tuple(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Value::Timestamp(t)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Value::Entity(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Collection(items)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
