use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::abi::compute_function_abi;
use crate::error::{JitError, MismatchKind};
use crate::value::{DType, DenseArray, Scalar};
use pretty_assertions::assert_eq;

fn prepare(src: &str, address: usize) -> NativeFunction {
    let sig = gb_ir::parse_signatures(src).unwrap().functions.remove(0);
    let abi = compute_function_abi(&sig).unwrap();
    NativeFunction::new(sig.name, address, abi)
}

fn call(function: &NativeFunction, args: &[Value]) -> JitResult<Output> {
    // SAFETY: every test pairs a signature with a matching Rust function.
    unsafe { function.invoke(args) }
}

fn single_scalar(output: Output) -> Scalar {
    output.into_single().unwrap().as_scalar().unwrap()
}

extern "C" fn add_one(x: i64) -> i64 {
    x + 1
}

#[test]
fn scalar_in_scalar_out() {
    let f = prepare("func @add_one(%x: i64) -> i64", add_one as usize);
    let out = call(&f, &[Value::from(5i64)]).unwrap();
    assert_eq!(single_scalar(out), Scalar::I64(6));
}

#[test]
fn arguments_are_converted_to_the_declared_type() {
    let f = prepare("func @add_one(%x: i64) -> i64", add_one as usize);
    let out = call(&f, &[Value::from(41i32)]).unwrap();
    assert_eq!(single_scalar(out), Scalar::I64(42));
}

extern "C" fn negate_i8(x: i8) -> i8 {
    -x
}

extern "C" fn flip(b: bool) -> bool {
    !b
}

extern "C" fn halve(x: f32) -> f32 {
    x / 2.0
}

#[test]
fn narrow_returns() {
    let f = prepare("func @negate(%x: i8) -> i8", negate_i8 as usize);
    assert_eq!(single_scalar(call(&f, &[Value::from(7i8)]).unwrap()), Scalar::I8(-7));

    let f = prepare("func @flip(%b: i1) -> i1", flip as usize);
    assert_eq!(single_scalar(call(&f, &[Value::from(true)]).unwrap()), Scalar::Bool(false));

    let f = prepare("func @halve(%x: f32) -> f32", halve as usize);
    assert_eq!(single_scalar(call(&f, &[Value::from(3.0f32)]).unwrap()), Scalar::F32(1.5));
}

extern "C" fn double_i16(x: i16) -> i16 {
    x.wrapping_mul(2)
}

extern "C" fn negate_i32(x: i32) -> i32 {
    -x
}

extern "C" fn next_index(x: u64) -> u64 {
    x.wrapping_add(1)
}

extern "C" fn square(x: f64) -> f64 {
    x * x
}

#[test]
fn every_scalar_width_crosses_the_call() {
    let f = prepare("func @double(%x: i16) -> i16", double_i16 as usize);
    assert_eq!(single_scalar(call(&f, &[Value::from(-300i16)]).unwrap()), Scalar::I16(-600));

    let f = prepare("func @negate(%x: i32) -> i32", negate_i32 as usize);
    assert_eq!(
        single_scalar(call(&f, &[Value::from(70_000i32)]).unwrap()),
        Scalar::I32(-70_000)
    );

    let f = prepare("func @square(%x: f64) -> f64", square as usize);
    assert_eq!(single_scalar(call(&f, &[Value::from(1.5f64)]).unwrap()), Scalar::F64(2.25));
}

#[test]
fn index_values_keep_the_high_bit() {
    let f = prepare("func @next(%i: index) -> index", next_index as usize);
    let i64_max = u64::try_from(i64::MAX).unwrap();
    let big = u64::MAX - 1;
    assert!(big > i64_max);
    assert_eq!(single_scalar(call(&f, &[Value::from(big)]).unwrap()), Scalar::U64(u64::MAX));
    assert_eq!(
        single_scalar(call(&f, &[Value::from(i64_max)]).unwrap()),
        Scalar::U64(1 << 63)
    );
    // Negative integers do not fit an index.
    let err = call(&f, &[Value::from(-1i64)]).unwrap_err();
    assert!(matches!(err, JitError::TypeMismatch { .. }), "{err}");
}

extern "C" fn sum(_allocated: *const f64, aligned: *const f64, offset: i64, size: i64, stride: i64) -> f64 {
    (0..size)
        // SAFETY: the descriptor addresses `size` readable elements.
        .map(|i| unsafe { *aligned.offset((offset + i * stride) as isize) })
        .sum()
}

#[test]
fn dense_arguments_expand_to_descriptor_fields() {
    let f = prepare("func @sum(%a: memref<?xf64>) -> f64", sum as usize);
    let array = DenseArray::from_vec(vec![1.0f64, 2.0, 3.0], [3]).unwrap();
    assert_eq!(single_scalar(call(&f, &[array.into()]).unwrap()), Scalar::F64(6.0));
}

#[repr(C)]
struct Descriptor1 {
    allocated: *mut f64,
    aligned: *mut f64,
    offset: i64,
    sizes: [i64; 1],
    strides: [i64; 1],
}

extern "C" fn tail(allocated: *mut f64, aligned: *mut f64, offset: i64, size: i64, stride: i64) -> Descriptor1 {
    Descriptor1 {
        allocated,
        aligned,
        offset: offset + stride,
        sizes: [size - 1],
        strides: [stride],
    }
}

#[test]
fn dense_results_alias_their_input() {
    let f = prepare("func @tail(%a: memref<?xf64>) -> memref<?xf64>", tail as usize);
    let array = DenseArray::from_vec(vec![1.0f64, 2.0, 3.0], [3]).unwrap();
    let out = call(&f, &[array.clone().into()]).unwrap().into_single().unwrap();
    let result = out.as_dense().unwrap();
    assert_eq!(result.shape(), &[2]);
    assert_eq!(result.offset(), 1);
    assert!(!result.is_foreign());
    assert_eq!(result.to_vec::<f64>().unwrap(), vec![2.0, 3.0]);

    // Shared buffer: writes through the input are visible in the result.
    array.set(&[2], 30.0f64).unwrap();
    assert_eq!(result.get::<f64>(&[1]), Some(30.0));
}

extern "C" fn pair_wrapper(first: *mut i64, second: *mut f64, x: i64) {
    // SAFETY: the caller passes one slot per result.
    unsafe {
        first.write(x);
        second.write(1.5);
    }
}

#[test]
fn multiple_results_come_back_through_out_pointers() {
    let f = prepare("func @pair(%x: i64) -> (i64, f64)", pair_wrapper as usize);
    let values = call(&f, &[Value::from(3i64)]).unwrap().into_tuple().unwrap();
    let scalars: Vec<_> = values.iter().map(|v| v.as_scalar().unwrap()).collect();
    assert_eq!(scalars, vec![Scalar::I64(3), Scalar::F64(1.5)]);
}

extern "C" fn fill_wrapper(out: *mut Descriptor1, count: *mut i64, n: i64) {
    let data: &'static mut [f64] = Box::leak(vec![7.0f64; 4].into_boxed_slice());
    // SAFETY: the caller passes one slot per result.
    unsafe {
        out.write(Descriptor1 {
            allocated: data.as_mut_ptr(),
            aligned: data.as_mut_ptr(),
            offset: 0,
            sizes: [n],
            strides: [1],
        });
        count.write(n);
    }
}

#[test]
fn dense_out_pointer_results_are_foreign() {
    let f = prepare("func @fill(%n: i64) -> (memref<?xf64>, i64)", fill_wrapper as usize);
    let values = call(&f, &[Value::from(4i64)]).unwrap().into_tuple().unwrap();
    let array = values[0].as_dense().unwrap();
    assert!(array.is_foreign());
    assert_eq!(array.dtype(), DType::F64);
    assert_eq!(array.to_vec::<f64>().unwrap(), vec![7.0; 4]);
    assert_eq!(values[1].as_scalar(), Some(Scalar::I64(4)));
}

static NOTHING_CALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn nothing(_x: i64) {
    NOTHING_CALLED.store(true, Ordering::SeqCst);
}

#[test]
fn no_result_is_none() {
    let f = prepare("func @nothing(%x: i64)", nothing as usize);
    assert!(call(&f, &[Value::from(1i64)]).unwrap().is_none());
    assert!(NOTHING_CALLED.load(Ordering::SeqCst));
}

static GUARDED_CALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn guarded(x: i64) -> i64 {
    GUARDED_CALLED.store(true, Ordering::SeqCst);
    x
}

#[test]
fn mismatches_fail_before_the_call() {
    let f = prepare("func @guarded(%x: i64) -> i64", guarded as usize);
    let array = DenseArray::zeros(DType::I64, [1]).unwrap();
    let err = call(&f, &[array.into()]).unwrap_err();
    assert!(
        matches!(err, JitError::TypeMismatch { property: MismatchKind::Kind, .. }),
        "{err}"
    );

    let err = call(&f, &[Value::from(0.5f64)]).unwrap_err();
    assert!(
        matches!(err, JitError::TypeMismatch { property: MismatchKind::ElementType, .. }),
        "{err}"
    );
    assert!(!GUARDED_CALLED.load(Ordering::SeqCst));
}

#[test]
fn argument_checks_do_not_call() {
    let f = prepare("func @sum(%a: memref<?xf64>) -> f64", sum as usize);
    let wrong = DenseArray::zeros(DType::F32, [2]).unwrap();
    let err = f.check_arguments(&[wrong.into()]).unwrap_err();
    assert!(
        matches!(err, JitError::TypeMismatch { property: MismatchKind::ElementType, .. }),
        "{err}"
    );
    let right = DenseArray::zeros(DType::F64, [2]).unwrap();
    f.check_arguments(&[right.into()]).unwrap();
}
