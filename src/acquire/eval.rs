//! Per-register value transformation.
//!
//! A register may declare an arithmetic expression that rewrites the decoded
//! value before it enters a row; `value` is bound to the decoded number.
//! The fallback policy is explicit: any evaluation problem keeps the
//! original value and the row is still emitted.

use evalexpr::{eval_with_context, ContextWithMutableVariables, EvalexprError, HashMapContext};

use crate::plc::Value;

/// What happened to a value on its way through [`apply_expression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    /// No expression, or the value is not numeric; untouched.
    Passthrough,
    /// The expression result replaced the value.
    Replaced,
    /// Evaluation failed; the original value was kept.
    KeptOriginal,
}

/// Apply a register's expression to a decoded value.
///
/// Pass-through cases: an empty/whitespace expression, or a non-numeric
/// value (booleans and strings are never evaluated). On evaluation failure
/// the original value is returned unchanged and a warning is logged; the
/// caller decides whether to count that as an error.
pub fn apply_expression(expression: Option<&str>, value: &Value) -> (Value, EvalOutcome) {
    let Some(expression) = expression.map(str::trim).filter(|e| !e.is_empty()) else {
        return (value.clone(), EvalOutcome::Passthrough);
    };
    if !value.is_numeric() {
        return (value.clone(), EvalOutcome::Passthrough);
    }
    let Some(input) = value.as_f64() else {
        return (value.clone(), EvalOutcome::Passthrough);
    };

    match evaluate(expression, input) {
        Ok(result) => (result, EvalOutcome::Replaced),
        Err(e) => {
            tracing::warn!(expression, %value, error = %e, "Expression failed, keeping original value");
            (value.clone(), EvalOutcome::KeptOriginal)
        }
    }
}

fn evaluate(expression: &str, input: f64) -> Result<Value, EvalexprError> {
    let mut context = HashMapContext::new();
    context.set_value("value".to_string(), evalexpr::Value::Float(input))?;

    match eval_with_context(expression, &context)? {
        evalexpr::Value::Float(f) => Ok(Value::F64(f)),
        evalexpr::Value::Int(i) => Ok(Value::I64(i)),
        evalexpr::Value::Boolean(b) => Ok(Value::Bool(b)),
        other => Err(EvalexprError::CustomMessage(format!(
            "expression produced non-scalar result: {other:?}"
        ))),
    }
}
