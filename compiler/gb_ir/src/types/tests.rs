use super::*;
use pretty_assertions::assert_eq;

fn csr(spelling: EncodingSpelling) -> SparseEncoding {
    SparseEncoding {
        dim_levels: vec![DimLevel::Dense, DimLevel::Compressed],
        dim_ordering: Some(vec![0, 1]),
        pointer_bit_width: 64,
        index_bit_width: 0,
        spelling,
    }
}

#[test]
fn scalars_print_as_ir_keywords() {
    assert_eq!(IrType::integer(1).to_string(), "i1");
    assert_eq!(IrType::f64().to_string(), "f64");
    assert_eq!(
        IrType::Scalar(ScalarType::Float(FloatKind::BF16)).to_string(),
        "bf16"
    );
    assert_eq!(IrType::Scalar(ScalarType::Index).to_string(), "index");
}

#[test]
fn dense_arrays_print_shape_prefix() {
    let ty = DenseArrayType {
        kind: ShapedKind::Tensor,
        dims: vec![Dim::Static(4), Dim::Dynamic],
        element: ScalarType::Float(FloatKind::F32),
        layout: None,
    };
    assert_eq!(ty.to_string(), "tensor<4x?xf32>");

    let scalar_memref = DenseArrayType {
        kind: ShapedKind::MemRef,
        dims: vec![],
        element: ScalarType::Integer(64),
        layout: None,
    };
    assert_eq!(scalar_memref.to_string(), "memref<i64>");

    let in_space_one = DenseArrayType {
        kind: ShapedKind::MemRef,
        dims: vec![Dim::Static(4)],
        element: ScalarType::Float(FloatKind::F64),
        layout: Some("1".to_string()),
    };
    assert_eq!(in_space_one.to_string(), "memref<4xf64, 1>");
}

#[test]
fn legacy_encoding_prints_legacy_keys() {
    assert_eq!(
        csr(EncodingSpelling::Legacy).to_string(),
        "#sparse_tensor.encoding<{ dimLevelType = [ \"dense\", \"compressed\" ], \
         dimOrdering = affine_map<(d0, d1) -> (d0, d1)>, \
         pointerBitWidth = 64, indexBitWidth = 0 }>"
    );
}

#[test]
fn level_type_encoding_prints_new_keys() {
    let mut enc = csr(EncodingSpelling::LevelTypes);
    enc.dim_ordering = None;
    assert_eq!(
        enc.to_string(),
        "#sparse_tensor.encoding<{ lvlTypes = [ \"dense\", \"compressed\" ], \
         posWidth = 64, crdWidth = 0 }>"
    );
}

#[test]
fn map_encoding_prints_permuted_levels() {
    let mut enc = csr(EncodingSpelling::Map);
    enc.dim_ordering = Some(vec![1, 0]);
    assert_eq!(
        enc.to_string(),
        "#sparse_tensor.encoding<{ map = (d0, d1) -> (d1 : dense, d0 : compressed), \
         posWidth = 64, crdWidth = 0 }>"
    );
}

#[test]
fn zero_width_means_native() {
    let enc = csr(EncodingSpelling::Legacy);
    assert_eq!(enc.pointer_width(), 64);
    assert_eq!(enc.index_width(), 64);
}

#[test]
fn pointers_print_typed_and_untyped() {
    let nested = IrType::pointer_to(IrType::pointer_to(IrType::integer(8)));
    assert_eq!(nested.to_string(), "!llvm.ptr<!llvm.ptr<i8>>");
    assert_eq!(IrType::OpaquePointer(None).to_string(), "!llvm.ptr");
    let vec = IrType::OpaquePointerVector {
        len: 4,
        pointee: Some(Box::new(IrType::f64())),
    };
    assert_eq!(vec.to_string(), "!llvm.vec<4 x ptr<f64>>");
}

#[test]
fn byte_pointer_detection() {
    assert!(IrType::pointer_to(IrType::integer(8)).is_byte_pointer());
    assert!(IrType::OpaquePointer(None).is_byte_pointer());
    assert!(!IrType::pointer_to(IrType::f64()).is_byte_pointer());
    assert!(!IrType::integer(8).is_byte_pointer());
}
