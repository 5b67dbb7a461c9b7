//! In-memory evaluation of query and rule conditions.
//!
//! The evaluator interprets condition trees against an
//! [`EvaluationParameters`] environment using three-valued logic: a result
//! is either [`Evaluated::Undefined`] or a value, and `NULL` is a value,
//! not the absence of one.
//!
//! - `AND` is `FALSE` as soon as one operand is `FALSE`, `OR` is `TRUE` as
//!   soon as one operand is `TRUE`; otherwise an undefined operand makes
//!   the result undefined.
//! - Subselects are delegated to the registered [`SubselectEvaluator`]
//!   strategies in order; a strategy that cannot decide returns
//!   [`Error::NotEvaluatable`] and the next one is tried. When none
//!   succeeds the subselect is undefined.

mod functions;
mod parameters;
pub mod session;
pub mod simple;

pub use parameters::EvaluationParameters;
pub use session::{QueryExecutor, SessionSubselectEvaluator};
pub use simple::SimpleSubselectEvaluator;

use functions::LikePatternCache;

use crate::error::{Error, Result};
use crate::mapping::MappingInformation;
use crate::path::PathEvaluator;
use crate::value::Value;
use bigdecimal::BigDecimal;
use ormsec_lang::{CompileErrorKind, CompiledStatement, Compiler, Node, NodeKind};
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

/// Default LIKE escape character.
const DEFAULT_ESCAPE: char = '\\';

/// Compiled LIKE patterns kept per evaluator.
const LIKE_PATTERN_CAPACITY: usize = 256;

/// Outcome of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    /// The evaluator cannot decide the value.
    Undefined,
    Value(Value),
}

impl Evaluated {
    pub fn boolean(value: bool) -> Self {
        Evaluated::Value(Value::Boolean(value))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Evaluated::Value(Value::Boolean(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Evaluated::Value(Value::Boolean(false)))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Evaluated::Undefined)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Evaluated::Value(v) => Some(v),
            Evaluated::Undefined => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Evaluated::Value(v) => Some(v),
            Evaluated::Undefined => None,
        }
    }
}

impl From<Value> for Evaluated {
    fn from(value: Value) -> Self {
        Evaluated::Value(value)
    }
}

/// A strategy for evaluating subselects in memory.
pub trait SubselectEvaluator: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Evaluate `subselect` in the outer environment `params`, returning
    /// its projected rows, or [`Error::NotEvaluatable`] to pass.
    fn evaluate(
        &self,
        evaluator: &QueryEvaluator,
        subselect: &CompiledStatement,
        params: &EvaluationParameters<'_>,
    ) -> Result<Vec<Value>>;
}

/// Three-valued interpreter over condition trees.
#[derive(Clone)]
pub struct QueryEvaluator {
    mapping: Arc<MappingInformation>,
    strategies: Vec<Arc<dyn SubselectEvaluator>>,
    like_patterns: Arc<LikePatternCache>,
}

/// Evaluate a child, returning early with `Undefined` if it is undefined.
macro_rules! defined {
    ($e:expr) => {
        match $e? {
            Evaluated::Value(v) => v,
            Evaluated::Undefined => return Ok(Evaluated::Undefined),
        }
    };
}

impl QueryEvaluator {
    /// An evaluator without subselect strategies.
    pub fn new(mapping: Arc<MappingInformation>) -> Self {
        Self {
            mapping,
            strategies: Vec::new(),
            like_patterns: Arc::new(LikePatternCache::new(LIKE_PATTERN_CAPACITY)),
        }
    }

    /// Append a subselect strategy.
    pub fn with_strategy(mut self, strategy: impl SubselectEvaluator + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn SubselectEvaluator>>) -> Self {
        self.strategies.extend(strategies);
        self
    }

    pub fn mapping(&self) -> &MappingInformation {
        &self.mapping
    }

    pub fn path_evaluator(&self) -> PathEvaluator<'_> {
        PathEvaluator::new(&self.mapping)
    }

    /// Evaluate a condition; `NULL` counts as undefined.
    pub fn evaluate_condition(
        &self,
        node: &Node,
        params: &EvaluationParameters<'_>,
    ) -> Result<Evaluated> {
        Ok(match truth(self.evaluate(node, params)?)? {
            Some(b) => Evaluated::boolean(b),
            None => Evaluated::Undefined,
        })
    }

    /// Evaluate an expression.
    pub fn evaluate(&self, node: &Node, params: &EvaluationParameters<'_>) -> Result<Evaluated> {
        match &node.kind {
            NodeKind::WhereClause | NodeKind::HavingClause | NodeKind::Brackets => {
                arity(node, 1, 1)?;
                self.evaluate(&node.children[0], params)
            }

            NodeKind::Or => {
                arity(node, 1, usize::MAX)?;
                let mut undefined = false;
                for child in &node.children {
                    match truth(self.evaluate(child, params)?)? {
                        Some(true) => return Ok(Evaluated::boolean(true)),
                        Some(false) => {}
                        None => undefined = true,
                    }
                }
                Ok(if undefined {
                    Evaluated::Undefined
                } else {
                    Evaluated::boolean(false)
                })
            }
            NodeKind::And => {
                arity(node, 1, usize::MAX)?;
                let mut undefined = false;
                for child in &node.children {
                    match truth(self.evaluate(child, params)?)? {
                        Some(false) => return Ok(Evaluated::boolean(false)),
                        Some(true) => {}
                        None => undefined = true,
                    }
                }
                Ok(if undefined {
                    Evaluated::Undefined
                } else {
                    Evaluated::boolean(true)
                })
            }
            NodeKind::Not => {
                arity(node, 1, 1)?;
                Ok(match truth(self.evaluate(&node.children[0], params)?)? {
                    Some(b) => Evaluated::boolean(!b),
                    None => Evaluated::Undefined,
                })
            }

            NodeKind::Equals => {
                arity(node, 2, 2)?;
                // a null left operand decides before the right side is looked at
                let left = defined!(self.evaluate(&node.children[0], params));
                if left.is_null() {
                    return Ok(Evaluated::boolean(false));
                }
                let right = defined!(self.evaluate(&node.children[1], params));
                if right.is_null() {
                    return Ok(Evaluated::boolean(false));
                }
                Ok(Evaluated::boolean(left == right))
            }
            NodeKind::NotEquals => {
                arity(node, 2, 2)?;
                let left = defined!(self.evaluate(&node.children[0], params));
                let right = defined!(self.evaluate(&node.children[1], params));
                if left.is_null() || right.is_null() {
                    return Ok(Evaluated::Undefined);
                }
                Ok(Evaluated::boolean(left != right))
            }
            NodeKind::LessThan
            | NodeKind::LessOrEqual
            | NodeKind::GreaterThan
            | NodeKind::GreaterOrEqual => {
                arity(node, 2, 2)?;
                let left = defined!(self.evaluate(&node.children[0], params));
                let right = defined!(self.evaluate(&node.children[1], params));
                let Some(ordering) = left.compare(&right) else {
                    return Ok(Evaluated::Undefined);
                };
                Ok(Evaluated::boolean(match node.kind {
                    NodeKind::LessThan => ordering == Ordering::Less,
                    NodeKind::LessOrEqual => ordering != Ordering::Greater,
                    NodeKind::GreaterThan => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            NodeKind::Between => self.evaluate_between(node, params),
            NodeKind::In => self.evaluate_in(node, params),
            NodeKind::Like => self.evaluate_like(node, params),
            NodeKind::IsNull => {
                arity(node, 1, 1)?;
                let value = defined!(self.evaluate(&node.children[0], params));
                Ok(Evaluated::boolean(value.is_null()))
            }
            NodeKind::IsEmpty => {
                arity(node, 1, 1)?;
                let value = defined!(self.evaluate(&node.children[0], params));
                Ok(Evaluated::boolean(match value {
                    Value::Null => true,
                    Value::Collection(items) => items.is_empty(),
                    _ => false,
                }))
            }
            NodeKind::MemberOf => {
                arity(node, 2, 2)?;
                let value = defined!(self.evaluate(&node.children[0], params));
                let collection = defined!(self.evaluate(&node.children[1], params));
                if value.is_null() {
                    return Ok(Evaluated::boolean(false));
                }
                Ok(Evaluated::boolean(match collection {
                    Value::Null => false,
                    Value::Collection(items) => items.contains(&value),
                    single => single == value,
                }))
            }
            NodeKind::Exists => {
                arity(node, 1, 1)?;
                let rows = defined!(self.evaluate(&node.children[0], params));
                Ok(Evaluated::boolean(!rows.into_items().is_empty()))
            }
            NodeKind::Subselect => self.evaluate_subselect(node, params),

            NodeKind::Add | NodeKind::Subtract | NodeKind::Multiply | NodeKind::Divide => {
                arity(node, 2, 2)?;
                let left = defined!(self.evaluate(&node.children[0], params));
                let right = defined!(self.evaluate(&node.children[1], params));
                functions::arithmetic(&node.kind, &left, &right)
            }
            NodeKind::Negative => {
                arity(node, 1, 1)?;
                let value = defined!(self.evaluate(&node.children[0], params));
                functions::negate(&value)
            }
            NodeKind::Mod => {
                arity(node, 2, 2)?;
                let left = defined!(self.evaluate(&node.children[0], params));
                let right = defined!(self.evaluate(&node.children[1], params));
                functions::modulo(&left, &right)
            }
            NodeKind::Abs => {
                arity(node, 1, 1)?;
                functions::abs(&defined!(self.evaluate(&node.children[0], params)))
            }
            NodeKind::Sqrt => {
                arity(node, 1, 1)?;
                functions::sqrt(&defined!(self.evaluate(&node.children[0], params)))
            }
            NodeKind::Size => {
                arity(node, 1, 1)?;
                Ok(functions::size(&defined!(self.evaluate(&node.children[0], params))))
            }

            NodeKind::Concat => {
                arity(node, 2, usize::MAX)?;
                let mut values = Vec::with_capacity(node.children.len());
                for child in &node.children {
                    values.push(defined!(self.evaluate(child, params)));
                }
                functions::concat(&values)
            }
            NodeKind::Substring => {
                arity(node, 2, 3)?;
                let text = defined!(self.evaluate(&node.children[0], params));
                let start = defined!(self.evaluate(&node.children[1], params));
                let length = match node.child(2) {
                    Some(child) => Some(defined!(self.evaluate(child, params))),
                    None => None,
                };
                functions::substring(&text, &start, length.as_ref())
            }
            NodeKind::Trim { spec } => {
                arity(node, 1, 2)?;
                let (character, text) = match node.children.as_slice() {
                    [character, text] => (Some(character), text),
                    [text] => (None, text),
                    _ => return Err(Error::InvariantViolation("TRIM has no operand".into())),
                };
                let character = match character {
                    Some(child) => Some(defined!(self.evaluate(child, params))),
                    None => None,
                };
                let text = defined!(self.evaluate(text, params));
                functions::trim(*spec, character.as_ref(), &text)
            }
            NodeKind::Upper => {
                arity(node, 1, 1)?;
                functions::upper(&defined!(self.evaluate(&node.children[0], params)))
            }
            NodeKind::Lower => {
                arity(node, 1, 1)?;
                functions::lower(&defined!(self.evaluate(&node.children[0], params)))
            }
            NodeKind::Length => {
                arity(node, 1, 1)?;
                functions::length(&defined!(self.evaluate(&node.children[0], params)))
            }
            NodeKind::Locate => {
                arity(node, 2, 3)?;
                let search = defined!(self.evaluate(&node.children[0], params));
                let text = defined!(self.evaluate(&node.children[1], params));
                let start = match node.child(2) {
                    Some(child) => Some(defined!(self.evaluate(child, params))),
                    None => None,
                };
                functions::locate(&search, &text, start.as_ref())
            }

            NodeKind::CurrentDate => Ok(Value::Date(params.now().date()).into()),
            NodeKind::CurrentTime => Ok(Value::Time(params.now().time()).into()),
            NodeKind::CurrentTimestamp => Ok(Value::Timestamp(params.now()).into()),
            NodeKind::CurrentPrincipal => Ok(match params.context() {
                Some(context) => context.principal_value().into(),
                None => Evaluated::Undefined,
            }),
            NodeKind::CurrentRoles => Ok(match params.context() {
                Some(context) => context.roles_value().into(),
                None => Evaluated::Undefined,
            }),
            NodeKind::CurrentTenant => Ok(match params.context() {
                Some(context) => context.tenant_value().into(),
                None => Evaluated::Undefined,
            }),

            NodeKind::Identifier(alias) => Ok(match params.alias(alias) {
                Some(value) => value.clone().into(),
                None => Evaluated::Undefined,
            }),
            NodeKind::Path => self.evaluate_path(node, params),
            NodeKind::NamedParameter(name) => Ok(match params.named(name) {
                Some(value) => value.clone().into(),
                None => Evaluated::Undefined,
            }),
            NodeKind::PositionalParameter(index) => Ok(match params.positional(*index) {
                Some(value) => value.clone().into(),
                None => Evaluated::Undefined,
            }),
            NodeKind::StringLiteral(_) => Ok(Value::String(node.string_value().unwrap_or_default()).into()),
            NodeKind::IntegerLiteral(text) => Ok(integer_literal(text)?.into()),
            NodeKind::DecimalLiteral(text) => Ok(Value::Decimal(decimal_literal(text)?).into()),
            NodeKind::BooleanLiteral(b) => Ok(Value::Boolean(*b).into()),
            NodeKind::Null => Ok(Value::Null.into()),

            NodeKind::Aggregate { .. } | NodeKind::Constructor(_) => Err(Error::NotEvaluatable(
                format!("{:?} cannot be evaluated in memory", node.kind),
            )),
            other => Err(Error::InvariantViolation(format!(
                "cannot evaluate {:?} as an expression",
                other
            ))),
        }
    }

    fn evaluate_path(&self, node: &Node, params: &EvaluationParameters<'_>) -> Result<Evaluated> {
        let Some(root) = node.children.first() else {
            return Err(Error::InvariantViolation("empty path".into()));
        };
        let root = defined!(self.evaluate(root, params));
        if root.is_null() {
            return Ok(Value::Null.into());
        }
        let segments = node.path_segments().join(".");
        let values = self.path_evaluator().evaluate_all(&[root], &segments)?;
        Ok(Value::collapse(values).into())
    }

    fn evaluate_between(&self, node: &Node, params: &EvaluationParameters<'_>) -> Result<Evaluated> {
        arity(node, 3, 3)?;
        let value = defined!(self.evaluate(&node.children[0], params));
        if value.is_null() {
            return Ok(Evaluated::Undefined);
        }
        let lower = self.evaluate(&node.children[1], params)?;
        let upper = self.evaluate(&node.children[2], params)?;

        let mut undefined = false;
        for (bound, outside) in [(lower, Ordering::Less), (upper, Ordering::Greater)] {
            match bound.value().and_then(|b| value.compare(b)) {
                Some(ordering) if ordering == outside => return Ok(Evaluated::boolean(false)),
                Some(_) => {}
                None => undefined = true,
            }
        }
        Ok(if undefined {
            Evaluated::Undefined
        } else {
            Evaluated::boolean(true)
        })
    }

    fn evaluate_in(&self, node: &Node, params: &EvaluationParameters<'_>) -> Result<Evaluated> {
        arity(node, 2, usize::MAX)?;
        let value = defined!(self.evaluate(&node.children[0], params));
        if value.is_null() {
            return Ok(Evaluated::Undefined);
        }
        let mut undefined = false;
        for item in &node.children[1..] {
            match self.evaluate(item, params)? {
                Evaluated::Undefined => undefined = true,
                Evaluated::Value(candidates) => {
                    if candidates.into_items().contains(&value) {
                        return Ok(Evaluated::boolean(true));
                    }
                }
            }
        }
        Ok(if undefined {
            Evaluated::Undefined
        } else {
            Evaluated::boolean(false)
        })
    }

    fn evaluate_like(&self, node: &Node, params: &EvaluationParameters<'_>) -> Result<Evaluated> {
        arity(node, 2, 3)?;
        let value = defined!(self.evaluate(&node.children[0], params));
        let pattern = defined!(self.evaluate(&node.children[1], params));
        let escape = match node.child(2) {
            Some(child) => match defined!(self.evaluate(child, params)) {
                Value::Null => return Ok(Evaluated::Undefined),
                escape => functions::escape_char(&escape)?,
            },
            None => DEFAULT_ESCAPE,
        };
        let (Value::String(value), Value::String(pattern)) = (value, pattern) else {
            return Ok(Evaluated::Undefined);
        };

        let regex = self.like_patterns.get_or_compile(pattern, escape)?;
        Ok(Evaluated::boolean(regex.is_match(&value)))
    }

    /// Evaluate a subselect node through the registered strategies.
    pub fn evaluate_subselect(
        &self,
        node: &Node,
        params: &EvaluationParameters<'_>,
    ) -> Result<Evaluated> {
        let compiled = match Compiler::with_model(self.mapping.as_ref())
            .compile_subselect(node, &params.scope())
        {
            Ok(compiled) => compiled,
            // An outer alias is not bound in this environment.
            Err(e) if e.kind == CompileErrorKind::UnresolvedAlias => {
                tracing::trace!(error = %e, "subselect refers to an unbound alias");
                return Ok(Evaluated::Undefined);
            }
            Err(e) => return Err(e.into()),
        };

        for strategy in &self.strategies {
            match strategy.evaluate(self, &compiled, params) {
                Ok(rows) => return Ok(Value::Collection(rows).into()),
                Err(Error::NotEvaluatable(reason)) => {
                    tracing::trace!(
                        strategy = strategy.name(),
                        reason = %reason,
                        "subselect strategy passed"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Evaluated::Undefined)
    }
}

/// Truth value of a condition result; `None` for undefined and `NULL`.
fn truth(result: Evaluated) -> Result<Option<bool>> {
    match result {
        Evaluated::Undefined | Evaluated::Value(Value::Null) => Ok(None),
        Evaluated::Value(Value::Boolean(b)) => Ok(Some(b)),
        Evaluated::Value(other) => Err(Error::InvariantViolation(format!(
            "expected a condition, found a {} value",
            other.type_name()
        ))),
    }
}

fn arity(node: &Node, min: usize, max: usize) -> Result<()> {
    let count = node.children.len();
    if count < min || count > max {
        return Err(Error::InvariantViolation(format!(
            "{:?} has {} operands",
            node.kind, count
        )));
    }
    Ok(())
}

fn integer_literal(text: &str) -> Result<Value> {
    match text.parse::<i64>() {
        Ok(i) => Ok(Value::Integer(i)),
        Err(_) => Ok(Value::Decimal(decimal_literal(text)?)),
    }
}

fn decimal_literal(text: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(text)
        .map_err(|e| Error::InvariantViolation(format!("invalid numeric literal '{}': {}", text, e)))
}
