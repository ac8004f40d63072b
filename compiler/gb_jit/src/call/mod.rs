//! Foreign calls into compiled code through libffi.
//!
//! A [`NativeFunction`] pairs an entry address with the function's
//! [`FunctionAbi`] and a prepared libffi call interface. Arguments are
//! encoded into native fields, each field gets its own 8-byte slot, and the
//! result comes back either in registers (scalars), as a returned record
//! (one dense result) or through out-pointer slots (multi-value wrappers).

use std::ffi::c_void;

use libffi::middle::{Cif, CodePtr, Type};

use crate::abi::{FunctionAbi, NativeKind, NativeValue, Passing, Scratch};
use crate::error::JitResult;
use crate::value::{Output, Value};

/// How the native function hands back its result.
#[derive(Clone, Debug, PartialEq)]
enum ReturnShape {
    Void,
    Field(NativeKind),
    Record,
}

/// A resolved, callable entry point.
pub struct NativeFunction {
    name: String,
    address: usize,
    abi: FunctionAbi,
    cif: Cif,
    ret: ReturnShape,
}

fn ffi_type(kind: NativeKind) -> Type {
    match kind {
        NativeKind::Int {
            bytes: 1,
            signed: false,
        } => Type::u8(),
        NativeKind::Int { bytes: 1, .. } => Type::i8(),
        NativeKind::Int { bytes: 2, .. } => Type::i16(),
        NativeKind::Int { bytes: 4, .. } => Type::i32(),
        NativeKind::Int { signed: false, .. } => Type::u64(),
        NativeKind::Int { .. } => Type::i64(),
        NativeKind::Float { bytes: 4 } => Type::f32(),
        NativeKind::Float { .. } => Type::f64(),
        NativeKind::Pointer => Type::pointer(),
    }
}

impl NativeFunction {
    /// Prepare calls to the function at `address`.
    ///
    /// For a multi-result function `address` is the bridge wrapper, which
    /// takes one out-pointer per result ahead of the arguments.
    pub fn new(name: impl Into<String>, address: usize, abi: FunctionAbi) -> Self {
        let mut params: Vec<Type> = Vec::new();
        if abi.uses_out_pointers() {
            params.extend(abi.results.iter().map(|_| Type::pointer()));
        }
        for arg in &abi.args {
            params.extend(arg.fields().iter().map(|&kind| ffi_type(kind)));
        }

        let (ret, ret_type) = match abi.results.as_slice() {
            [result] if result.passing() == Passing::Direct => match result.fields() {
                [kind] => (ReturnShape::Field(*kind), ffi_type(*kind)),
                fields => (
                    ReturnShape::Record,
                    Type::structure(fields.iter().map(|&kind| ffi_type(kind))),
                ),
            },
            _ => (ReturnShape::Void, Type::void()),
        };

        Self {
            name: name.into(),
            address,
            cif: Cif::new(params, ret_type),
            abi,
            ret,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &FunctionAbi {
        &self.abi
    }

    /// Encode `args` without calling, surfacing any mismatch.
    pub fn check_arguments(&self, args: &[Value]) -> JitResult<()> {
        let mut scratch = Scratch::new();
        for (arg, descriptor) in args.iter().zip(&self.abi.args) {
            descriptor.encode(arg, &mut scratch)?;
        }
        Ok(())
    }

    /// Encode `args`, call, and decode the results.
    ///
    /// Encoding fails before native code runs. Arity is the caller's
    /// responsibility.
    ///
    /// # Safety
    ///
    /// The address must point to compiled code whose native signature
    /// matches the ABI this function was prepared with.
    #[tracing::instrument(level = "trace", skip_all, fields(name = %self.name))]
    pub unsafe fn invoke(&self, args: &[Value]) -> JitResult<Output> {
        let mut scratch = Scratch::new();

        let out_slots: Vec<*mut u8> = if self.abi.uses_out_pointers() {
            self.abi
                .results
                .iter()
                .map(|result| scratch.alloc(result.layout().size()))
                .collect()
        } else {
            Vec::new()
        };

        let mut fields: Vec<NativeValue> = out_slots
            .iter()
            .map(|&slot| NativeValue::Ptr(slot.cast::<c_void>()))
            .collect();
        for (arg, descriptor) in args.iter().zip(&self.abi.args) {
            fields.extend(descriptor.encode(arg, &mut scratch)?);
        }

        let mut slots = vec![0u64; fields.len()];
        for (field, slot) in fields.iter().zip(slots.iter_mut()) {
            // SAFETY: every native field is at most 8 bytes.
            unsafe { field.write_to(std::ptr::from_mut(slot).cast::<u8>()) };
        }
        let mut arg_ptrs: Vec<*mut c_void> = slots
            .iter_mut()
            .map(|slot| std::ptr::from_mut(slot).cast::<c_void>())
            .collect();

        let ret_bytes = match &self.ret {
            ReturnShape::Record => self.abi.results[0].layout().size(),
            ReturnShape::Void | ReturnShape::Field(_) => 8,
        };
        let mut ret = vec![0u64; ret_bytes.div_ceil(8).max(2)];

        let code = CodePtr(self.address as *mut c_void);
        tracing::trace!(fields = fields.len(), "calling compiled code");
        // SAFETY: the interface was prepared from the same ABI that produced
        // `fields`; the return buffer is large enough for the return shape.
        unsafe {
            libffi::raw::ffi_call(
                self.cif.as_raw_ptr(),
                Some(*code.as_fun()),
                ret.as_mut_ptr().cast::<c_void>(),
                arg_ptrs.as_mut_ptr(),
            );
        }

        let ret_ptr = ret.as_ptr().cast::<u8>();
        // SAFETY: the callee wrote the return buffer and out slots according
        // to the result descriptors.
        unsafe {
            match &self.ret {
                ReturnShape::Field(kind) => {
                    let field = read_returned_field(*kind, ret[0], ret_ptr);
                    self.abi.results[0].decode(&[field], args).map(Output::Single)
                }
                ReturnShape::Record => self.abi.results[0]
                    .decode_record(ret_ptr, args)
                    .map(Output::Single),
                ReturnShape::Void if out_slots.is_empty() => Ok(Output::None),
                ReturnShape::Void => self
                    .abi
                    .results
                    .iter()
                    .zip(&out_slots)
                    .map(|(result, &slot)| result.decode_record(slot, args))
                    .collect::<JitResult<Vec<_>>>()
                    .map(Output::Tuple),
            }
        }
    }
}

/// libffi widens integer returns narrower than a register to a full
/// register; floats and pointers are stored as themselves.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    reason = "narrow integer returns occupy the low bits of the register"
)]
unsafe fn read_returned_field(kind: NativeKind, register: u64, ptr: *const u8) -> NativeValue {
    match kind {
        NativeKind::Int {
            bytes: 1,
            signed: false,
        } => NativeValue::U8(register as u8),
        NativeKind::Int { bytes: 1, .. } => NativeValue::I8(register as i8),
        NativeKind::Int { bytes: 2, .. } => NativeValue::I16(register as i16),
        NativeKind::Int { bytes: 4, .. } => NativeValue::I32(register as i32),
        // SAFETY: the return buffer holds at least 8 bytes.
        _ => unsafe { NativeValue::read_from(kind, ptr) },
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("address", &format_args!("{:#x}", self.address))
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "tests panic on failure")]
mod tests;
