//! Tagged argument intake shared by the send and machine-creation surfaces.
//!
//! Call sites pass an ordered sequence of tagged arguments instead of the C
//! varargs `(status, value)` convention. One argument becomes the payload
//! directly; several are packed into a tuple of the callee's declared payload
//! type.

use value_model::{Value, ValueType};

use crate::fault::RuntimeError;

/// One tagged argument at an intake site.
#[derive(Debug)]
pub enum Arg<'a> {
    /// Pass a deep copy; the caller keeps its value.
    Clone(&'a Value),
    /// Take ownership, leaving null in the caller's slot.
    Move(&'a mut Value),
    /// Reserved status; every operation rejects it.
    Swap(&'a mut Value),
}

impl Arg<'_> {
    fn collect(self, operation: &'static str) -> Result<Value, RuntimeError> {
        match self {
            Self::Clone(value) => Ok(value.deep_clone()),
            Self::Move(slot) => Ok(slot.take()),
            Self::Swap(_) => Err(RuntimeError::IllegalParamStatus { operation }),
        }
    }
}

/// Collects tagged arguments into a single payload value.
///
/// Zero arguments produce a fresh null, a single argument becomes the payload
/// directly, and multiple arguments are packed into a tuple of
/// `payload_type`.
pub(crate) fn collect_payload(
    operation: &'static str,
    payload_type: &ValueType,
    args: Vec<Arg<'_>>,
) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Ok(Value::null());
    }

    let mut collected = Vec::with_capacity(args.len());
    for arg in args {
        collected.push(arg.collect(operation)?);
    }

    if collected.len() == 1 {
        return Ok(collected.remove(0));
    }

    Value::tuple_of(payload_type, collected).map_err(|err| RuntimeError::InvalidProgramTable {
        reason: format!("payload packing failed: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use value_model::{Value, ValueType};

    use super::{collect_payload, Arg};
    use crate::fault::ErrorCode;

    #[test]
    fn zero_arguments_become_null() {
        let payload = collect_payload("send", &ValueType::Any, Vec::new()).expect("null payload");
        assert_eq!(payload, Value::Null);
    }

    #[test]
    fn single_clone_argument_keeps_the_source() {
        let source = Value::Int(7);
        let payload =
            collect_payload("send", &ValueType::Any, vec![Arg::Clone(&source)]).expect("payload");
        assert_eq!(payload, Value::Int(7));
        assert_eq!(source, Value::Int(7));
    }

    #[test]
    fn single_move_argument_nulls_the_source() {
        let mut source = Value::Int(7);
        let payload =
            collect_payload("send", &ValueType::Any, vec![Arg::Move(&mut source)]).expect("payload");
        assert_eq!(payload, Value::Int(7));
        assert_eq!(source, Value::Null);
    }

    #[test]
    fn swap_is_rejected_everywhere() {
        let mut source = Value::Int(7);
        let err = collect_payload("send", &ValueType::Any, vec![Arg::Swap(&mut source)])
            .expect_err("swap must be rejected");
        assert_eq!(err.code(), ErrorCode::IllegalParamStatus);
    }

    #[test]
    fn multiple_arguments_pack_into_the_declared_tuple_type() {
        let a = Value::Int(1);
        let mut b = Value::Text("x".into());
        let ty = ValueType::Tuple(vec![ValueType::Int, ValueType::Text]);
        let payload = collect_payload("send", &ty, vec![Arg::Clone(&a), Arg::Move(&mut b)])
            .expect("packed payload");
        assert_eq!(
            payload,
            Value::Tuple(vec![Value::Int(1), Value::Text("x".into())])
        );
        assert_eq!(b, Value::Null);
    }

    #[test]
    fn packing_mismatch_is_a_program_table_error() {
        let a = Value::Int(1);
        let b = Value::Int(2);
        let ty = ValueType::Tuple(vec![ValueType::Int]);
        let err = collect_payload("send", &ty, vec![Arg::Clone(&a), Arg::Clone(&b)])
            .expect_err("arity mismatch");
        assert_eq!(err.code(), ErrorCode::InvalidProgramTable);
    }
}
