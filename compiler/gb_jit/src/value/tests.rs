use super::*;
use gb_ir::DimLevel;
use pretty_assertions::assert_eq;

// --- Scalars ---

#[test]
fn integers_cast_when_the_value_fits() {
    assert_eq!(Scalar::I64(100).cast(DType::I8), Some(Scalar::I8(100)));
    assert_eq!(Scalar::I64(300).cast(DType::I8), None);
    assert_eq!(Scalar::I32(-1).cast(DType::U64), None);
    assert_eq!(Scalar::U64(7).cast(DType::I32), Some(Scalar::I32(7)));
    assert_eq!(Scalar::Bool(true).cast(DType::I64), Some(Scalar::I64(1)));
}

#[test]
fn floats_never_become_integers_or_narrow() {
    assert_eq!(Scalar::F64(1.0).cast(DType::I64), None);
    assert_eq!(Scalar::F64(1.5).cast(DType::F32), None);
    assert_eq!(Scalar::F32(1.5).cast(DType::F64), Some(Scalar::F64(1.5)));
    assert_eq!(Scalar::I64(3).cast(DType::F64), Some(Scalar::F64(3.0)));
}

#[test]
fn only_booleans_become_booleans() {
    assert_eq!(Scalar::Bool(false).cast(DType::Bool), Some(Scalar::Bool(false)));
    assert_eq!(Scalar::I8(1).cast(DType::Bool), None);
}

#[test]
fn dtype_for_ir_scalars() {
    use gb_ir::{FloatKind, ScalarType};
    assert_eq!(DType::for_scalar(ScalarType::Integer(1)).unwrap(), DType::Bool);
    assert_eq!(DType::for_scalar(ScalarType::Index).unwrap(), DType::U64);
    assert!(matches!(
        DType::for_scalar(ScalarType::Integer(24)),
        Err(JitError::UnsupportedType { .. })
    ));
    assert!(matches!(
        DType::for_scalar(ScalarType::Float(FloatKind::BF16)),
        Err(JitError::UnsupportedType { .. })
    ));
}

// --- Dense arrays ---

#[test]
fn from_vec_is_row_major() {
    let a = DenseArray::from_vec(vec![1i32, 2, 3, 4, 5, 6], [2, 3]).unwrap();
    assert_eq!(a.strides(), [3, 1]);
    assert_eq!(a.get::<i32>(&[1, 0]), Some(4));
    assert_eq!(a.get::<i32>(&[2, 0]), None);
    assert_eq!(a.get::<i64>(&[0, 0]), None);
    assert_eq!(a.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    assert!(a.is_contiguous());
}

#[test]
fn from_vec_rejects_wrong_length() {
    let err = DenseArray::from_vec(vec![1.0f64, 2.0], [3]).unwrap_err();
    assert!(matches!(err, JitError::InvalidArgument { .. }), "{err}");
}

#[test]
fn clones_share_the_buffer() {
    let a = DenseArray::zeros(DType::F64, [2]).unwrap();
    let b = a.clone();
    b.set(&[1], 2.5f64).unwrap();
    assert_eq!(a.to_vec::<f64>().unwrap(), vec![0.0, 2.5]);
}

#[test]
fn rewrap_follows_the_new_descriptor() {
    let a = DenseArray::from_vec(vec![1i64, 2, 3, 4], [2, 2]).unwrap();
    // Transposed view of the same memory.
    let t = a.rewrap(a.aligned_ptr(), 0, vec![2, 2], vec![1, 2]);
    assert_eq!(t.to_vec::<i64>().unwrap(), vec![1, 3, 2, 4]);
    assert!(!t.is_contiguous());
    let copy = t.to_owned_contiguous().unwrap();
    assert!(copy.is_contiguous());
    assert_eq!(copy.to_vec::<i64>().unwrap(), vec![1, 3, 2, 4]);
}

#[test]
fn zero_rank_and_empty_arrays() {
    let s = DenseArray::from_vec(vec![true], Vec::<u64>::new()).unwrap();
    assert_eq!(s.len(), 1);
    assert_eq!(s.get::<bool>(&[]), Some(true));
    let e = DenseArray::zeros(DType::I8, [0, 4]).unwrap();
    assert!(e.is_empty());
    assert!(e.to_scalars().is_empty());
}

// --- Handles ---

#[derive(Debug)]
struct Wrapper(SparseTensor);

impl HostObject for Wrapper {
    fn as_sparse(&self) -> Option<SparseTensor> {
        Some(self.0.clone())
    }
}

#[test]
fn raw_handles_prefer_sparse_views() {
    let mut slot = 0u8;
    let ptr = VoidPtr::new(std::ptr::addr_of_mut!(slot).cast());
    let sparse = SparseTensor::new(ptr, DType::F64, vec![DimLevel::Dense, DimLevel::Compressed]);
    let handle = Value::Handle(Rc::new(Wrapper(sparse.clone())));
    assert_eq!(handle.raw_handle(), Some(ptr));
    assert_eq!(handle.sparse_view(), Some(sparse));
    assert_eq!(Value::Pointer(ptr).raw_handle(), Some(ptr));
    assert_eq!(Value::from(1i64).raw_handle(), None);
}

#[test]
fn output_accessors() {
    assert!(Output::None.is_none());
    let single = Output::Single(Value::from(6i64));
    assert_eq!(
        single.into_single().and_then(|v| v.as_scalar()),
        Some(Scalar::I64(6))
    );
    let tuple = Output::Tuple(vec![Value::from(3i64), Value::from(1.5f64)]);
    assert_eq!(tuple.into_tuple().map(|v| v.len()), Some(2));
}

#[test]
fn from_scalars_converts_elements() {
    let a = DenseArray::from_scalars(DType::F64, &[Scalar::I32(1), Scalar::F64(2.5)], [2]).unwrap();
    assert_eq!(a.to_vec::<f64>().unwrap(), vec![1.0, 2.5]);

    let err = DenseArray::from_scalars(DType::I64, &[Scalar::F64(0.5)], [1]).unwrap_err();
    assert!(matches!(err, JitError::TypeMismatch { .. }), "{err}");
}
