//! Messages between the profiling parent and the child running the call.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{JitError, JitResult};
use crate::value::{DType, DenseArray, Output, Scalar, Value};

/// One step of the parent/child handshake.
#[derive(Debug, Serialize, Deserialize)]
pub enum Message {
    /// Child to parent: the process to attach to.
    Ready { pid: u32 },
    /// Parent to child: the profiler is recording.
    Start,
    /// Child to parent: the call's outcome.
    Finished(Result<TransferOutput, String>),
}

/// A result value copied out of the child.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum TransferValue {
    Scalar(Scalar),
    Dense {
        dtype: DType,
        shape: Vec<u64>,
        elements: Vec<Scalar>,
    },
}

/// [`Output`] in a form that survives the process boundary.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum TransferOutput {
    None,
    Single(TransferValue),
    Tuple(Vec<TransferValue>),
}

fn capture_value(value: &Value) -> Result<TransferValue, String> {
    match value {
        Value::Scalar(scalar) => Ok(TransferValue::Scalar(*scalar)),
        Value::Dense(array) => Ok(TransferValue::Dense {
            dtype: array.dtype(),
            shape: array.shape().to_vec(),
            elements: array.to_scalars(),
        }),
        other => Err(format!(
            "a {} refers to memory of the profiled process",
            other.kind_name()
        )),
    }
}

fn restore_value(value: TransferValue) -> JitResult<Value> {
    match value {
        TransferValue::Scalar(scalar) => Ok(Value::Scalar(scalar)),
        TransferValue::Dense {
            dtype,
            shape,
            elements,
        } => DenseArray::from_scalars(dtype, &elements, shape).map(Value::Dense),
    }
}

impl TransferOutput {
    /// Copy `output` for transfer. Process-local values are refused.
    pub fn capture(output: &Output) -> Result<Self, String> {
        Ok(match output {
            Output::None => Self::None,
            Output::Single(value) => Self::Single(capture_value(value)?),
            Output::Tuple(values) => Self::Tuple(
                values
                    .iter()
                    .map(capture_value)
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Rebuild host values in this process. Arrays become host-owned.
    pub fn restore(self) -> JitResult<Output> {
        Ok(match self {
            Self::None => Output::None,
            Self::Single(value) => Output::Single(restore_value(value)?),
            Self::Tuple(values) => Output::Tuple(
                values
                    .into_iter()
                    .map(restore_value)
                    .collect::<JitResult<_>>()?,
            ),
        })
    }
}

fn channel_error(name: &str, e: &bincode::Error) -> JitError {
    JitError::ProfileTransfer {
        name: name.to_string(),
        reason: format!("channel to the profiled process failed: {e}"),
    }
}

/// Write one message. `name` identifies the profiled function in errors.
pub fn send(stream: &mut impl Write, name: &str, message: &Message) -> JitResult<()> {
    bincode::serialize_into(&mut *stream, message).map_err(|e| channel_error(name, &e))?;
    stream
        .flush()
        .map_err(JitError::io("flushing the profiling channel"))
}

/// Block until one message arrives.
pub fn recv(stream: &mut impl Read, name: &str) -> JitResult<Message> {
    bincode::deserialize_from(stream).map_err(|e| channel_error(name, &e))
}
