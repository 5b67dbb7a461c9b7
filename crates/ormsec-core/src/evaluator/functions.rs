//! Arithmetic, string functions and LIKE pattern translation.

use super::Evaluated;
use crate::error::{Error, Result};
use crate::value::Value;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use ormsec_lang::{NodeKind, TrimSpec};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Significant digits kept by decimal arithmetic.
const PRECISION: u64 = 100;

fn round(value: BigDecimal) -> BigDecimal {
    match NonZeroU64::new(PRECISION) {
        Some(precision) => value.with_precision_round(precision, RoundingMode::HalfUp),
        None => value,
    }
}

fn is_zero(value: &BigDecimal) -> bool {
    *value == BigDecimal::from(0)
}

fn numeric(value: &Value, operation: &str) -> Result<BigDecimal> {
    value.to_decimal().ok_or_else(|| {
        Error::InvariantViolation(format!(
            "{} expects numeric operands, found {}",
            operation,
            value.type_name()
        ))
    })
}

/// Binary `+ - * /`. Null operands give null; division by zero is undefined.
pub(crate) fn arithmetic(kind: &NodeKind, left: &Value, right: &Value) -> Result<Evaluated> {
    if left.is_null() || right.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let exact = match kind {
            NodeKind::Add => a.checked_add(*b),
            NodeKind::Subtract => a.checked_sub(*b),
            NodeKind::Multiply => a.checked_mul(*b),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Evaluated::Value(Value::Integer(result)));
        }
    }

    let a = numeric(left, "arithmetic")?;
    let b = numeric(right, "arithmetic")?;
    let result = match kind {
        NodeKind::Add => a + b,
        NodeKind::Subtract => a - b,
        NodeKind::Multiply => a * b,
        NodeKind::Divide => {
            if is_zero(&b) {
                return Ok(Evaluated::Undefined);
            }
            a / b
        }
        other => {
            return Err(Error::InvariantViolation(format!(
                "{:?} is not an arithmetic operator",
                other
            )))
        }
    };
    Ok(Evaluated::Value(Value::Decimal(round(result))))
}

pub(crate) fn negate(value: &Value) -> Result<Evaluated> {
    Ok(Evaluated::Value(match value {
        Value::Null => Value::Null,
        Value::Integer(i) => match i.checked_neg() {
            Some(n) => Value::Integer(n),
            None => Value::Decimal(-BigDecimal::from(*i)),
        },
        other => Value::Decimal(-numeric(other, "negation")?),
    }))
}

pub(crate) fn modulo(left: &Value, right: &Value) -> Result<Evaluated> {
    if left.is_null() || right.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        return Ok(match a.checked_rem(*b) {
            Some(result) => Evaluated::Value(Value::Integer(result)),
            None if *b == 0 => Evaluated::Undefined,
            // i64::MIN % -1
            None => Evaluated::Value(Value::Integer(0)),
        });
    }
    let a = numeric(left, "MOD")?;
    let b = numeric(right, "MOD")?;
    if is_zero(&b) {
        return Ok(Evaluated::Undefined);
    }
    Ok(Evaluated::Value(Value::Decimal(round(a % b))))
}

pub(crate) fn abs(value: &Value) -> Result<Evaluated> {
    Ok(Evaluated::Value(match value {
        Value::Null => Value::Null,
        Value::Integer(i) => match i.checked_abs() {
            Some(a) => Value::Integer(a),
            None => Value::Decimal(BigDecimal::from(*i).abs()),
        },
        other => Value::Decimal(numeric(other, "ABS")?.abs()),
    }))
}

pub(crate) fn sqrt(value: &Value) -> Result<Evaluated> {
    if value.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    Ok(match numeric(value, "SQRT")?.sqrt() {
        Some(root) => Evaluated::Value(Value::Decimal(round(root))),
        None => Evaluated::Undefined,
    })
}

pub(crate) fn size(value: &Value) -> Evaluated {
    let size = match value {
        Value::Null => 0,
        Value::Collection(items) => items.len() as i64,
        _ => 1,
    };
    Evaluated::Value(Value::Integer(size))
}

fn text(value: &Value, function: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Collection(_) | Value::Tuple(_) | Value::Entity(_) => {
            Err(Error::InvariantViolation(format!(
                "{} expects string operands, found {}",
                function,
                value.type_name()
            )))
        }
        other => Ok(other.to_string()),
    }
}

fn integer(value: &Value, function: &str) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Decimal(d) => d.to_i64().ok_or_else(|| {
            Error::InvariantViolation(format!("{} argument {} is out of range", function, d))
        }),
        other => Err(Error::InvariantViolation(format!(
            "{} expects an integer, found {}",
            function,
            other.type_name()
        ))),
    }
}

fn single_char(value: &Value, function: &str) -> Result<char> {
    let text = text(value, function)?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::InvariantViolation(format!(
            "{} expects a single character, found '{}'",
            function, text
        ))),
    }
}

fn string(value: String) -> Evaluated {
    Evaluated::Value(Value::String(value))
}

pub(crate) fn concat(values: &[Value]) -> Result<Evaluated> {
    if values.iter().any(Value::is_null) {
        return Ok(Evaluated::Value(Value::Null));
    }
    let mut result = String::new();
    for value in values {
        result.push_str(&text(value, "CONCAT")?);
    }
    Ok(string(result))
}

/// SUBSTRING with 1-based start and optional length.
pub(crate) fn substring(value: &Value, start: &Value, length: Option<&Value>) -> Result<Evaluated> {
    if value.is_null() || start.is_null() || length.is_some_and(Value::is_null) {
        return Ok(Evaluated::Value(Value::Null));
    }
    let text = text(value, "SUBSTRING")?;
    let start = integer(start, "SUBSTRING")?.max(1);
    let skip = usize::try_from(start - 1).unwrap_or(usize::MAX);
    let chars = text.chars().skip(skip);
    let result: String = match length {
        Some(length) => {
            let take = usize::try_from(integer(length, "SUBSTRING")?).unwrap_or(0);
            chars.take(take).collect()
        }
        None => chars.collect(),
    };
    Ok(string(result))
}

pub(crate) fn trim(spec: Option<TrimSpec>, character: Option<&Value>, value: &Value) -> Result<Evaluated> {
    if value.is_null() || character.is_some_and(Value::is_null) {
        return Ok(Evaluated::Value(Value::Null));
    }
    let c = match character {
        Some(character) => single_char(character, "TRIM")?,
        None => ' ',
    };
    let text = text(value, "TRIM")?;
    let trimmed = match spec.unwrap_or_default() {
        TrimSpec::Leading => text.trim_start_matches(c),
        TrimSpec::Trailing => text.trim_end_matches(c),
        TrimSpec::Both => text.trim_matches(c),
    };
    Ok(string(trimmed.to_string()))
}

pub(crate) fn upper(value: &Value) -> Result<Evaluated> {
    if value.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    Ok(string(text(value, "UPPER")?.to_uppercase()))
}

pub(crate) fn lower(value: &Value) -> Result<Evaluated> {
    if value.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    Ok(string(text(value, "LOWER")?.to_lowercase()))
}

pub(crate) fn length(value: &Value) -> Result<Evaluated> {
    if value.is_null() {
        return Ok(Evaluated::Value(Value::Null));
    }
    let length = text(value, "LENGTH")?.chars().count() as i64;
    Ok(Evaluated::Value(Value::Integer(length)))
}

/// LOCATE: 1-based position of `search` in `value` from `start`, 0 when absent.
pub(crate) fn locate(search: &Value, value: &Value, start: Option<&Value>) -> Result<Evaluated> {
    if search.is_null() || value.is_null() || start.is_some_and(Value::is_null) {
        return Ok(Evaluated::Value(Value::Null));
    }
    let search = text(search, "LOCATE")?;
    let text = text(value, "LOCATE")?;
    let start = match start {
        Some(start) => integer(start, "LOCATE")?.max(1),
        None => 1,
    };
    let skip = usize::try_from(start - 1).unwrap_or(usize::MAX);

    let offset = if skip == 0 {
        Some(0)
    } else {
        text.char_indices()
            .nth(skip)
            .map(|(i, _)| i)
            .or_else(|| (skip == text.chars().count()).then_some(text.len()))
    };
    let position = offset
        .and_then(|offset| text[offset..].find(&search).map(|found| offset + found))
        .map(|byte| text[..byte].chars().count() as i64 + 1)
        .unwrap_or(0);
    Ok(Evaluated::Value(Value::Integer(position)))
}

/// Translate a LIKE pattern into an anchored regular expression.
///
/// `%` matches any sequence, `_` any single character. The escape
/// character only quotes a following `%` or `_`; anywhere else it is
/// an ordinary character.
pub(crate) fn like_regex(pattern: &str, escape: char) -> Result<Regex> {
    let mut regex = String::from("(?s)^");
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.peek() {
                Some(&next) if next == '%' || next == '_' => {
                    literal.push(next);
                    chars.next();
                }
                _ => literal.push(c),
            }
        } else if c == '%' || c == '_' {
            regex.push_str(&regex::escape(&literal));
            literal.clear();
            regex.push_str(if c == '%' { ".*" } else { "." });
        } else {
            literal.push(c);
        }
    }
    regex.push_str(&regex::escape(&literal));
    regex.push('$');
    Regex::new(&regex)
        .map_err(|e| Error::InvariantViolation(format!("invalid LIKE pattern '{}': {}", pattern, e)))
}

struct CachedPattern {
    regex: Regex,
    hits: AtomicU64,
}

/// Compiled LIKE patterns, bounded to `max_entries`.
///
/// Patterns may come from parameter values, so the least used entry is
/// evicted once the cache is full.
pub(crate) struct LikePatternCache {
    patterns: RwLock<HashMap<(String, char), CachedPattern>>,
    max_entries: usize,
    evictions: AtomicU64,
}

impl LikePatternCache {
    pub(crate) fn new(max_entries: usize) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            max_entries,
            evictions: AtomicU64::new(0),
        }
    }

    pub(crate) fn get_or_compile(&self, pattern: String, escape: char) -> Result<Regex> {
        let key = (pattern, escape);
        if let Some(cached) = self.patterns.read().get(&key) {
            cached.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.regex.clone());
        }
        let regex = like_regex(&key.0, escape)?;
        if self.max_entries == 0 {
            return Ok(regex);
        }

        let mut patterns = self.patterns.write();
        if patterns.len() >= self.max_entries && !patterns.contains_key(&key) {
            let least_used = patterns
                .iter()
                .min_by_key(|(_, cached)| cached.hits.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            if let Some(evicted) = least_used {
                patterns.remove(&evicted);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        patterns.insert(
            key,
            CachedPattern {
                regex: regex.clone(),
                hits: AtomicU64::new(0),
            },
        );
        Ok(regex)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.patterns.read().len()
    }

    #[cfg(test)]
    pub(crate) fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

pub(crate) fn escape_char(value: &Value) -> Result<char> {
    single_char(value, "ESCAPE")
}
