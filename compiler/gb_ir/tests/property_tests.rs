//! Property tests for type printing.
//!
//! The JIT re-emits resolved types as text (multi-value wrappers, type
//! lowering stubs), so every printable type must scan back to itself.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]
#![allow(
    clippy::redundant_closure_for_method_calls,
    reason = "Proptest macros generate code with these patterns"
)]

use gb_ir::{
    parse_signatures, parse_type, DenseArrayType, Dim, DimLevel, EncodingSpelling, FloatKind,
    IrType, ScalarType, ShapedKind, SparseEncoding, SparseTensorType,
};
use proptest::prelude::*;

fn scalar_strategy() -> impl Strategy<Value = ScalarType> {
    prop_oneof![
        prop::sample::select(vec![1u32, 8, 16, 32, 64]).prop_map(ScalarType::Integer),
        prop::sample::select(vec![FloatKind::F16, FloatKind::BF16, FloatKind::F32, FloatKind::F64])
            .prop_map(ScalarType::Float),
        Just(ScalarType::Index),
    ]
}

fn dim_strategy() -> impl Strategy<Value = Dim> {
    prop_oneof![Just(Dim::Dynamic), (1u64..1000).prop_map(Dim::Static)]
}

fn dense_strategy() -> impl Strategy<Value = IrType> {
    (
        prop::bool::ANY,
        prop::collection::vec(dim_strategy(), 0..4),
        scalar_strategy(),
    )
        .prop_map(|(is_tensor, dims, element)| {
            IrType::DenseArray(DenseArrayType {
                kind: if is_tensor {
                    ShapedKind::Tensor
                } else {
                    ShapedKind::MemRef
                },
                dims,
                element,
                layout: None,
            })
        })
}

fn spelling_strategy() -> impl Strategy<Value = EncodingSpelling> {
    prop::sample::select(vec![
        EncodingSpelling::Legacy,
        EncodingSpelling::LevelTypes,
        EncodingSpelling::Map,
    ])
}

fn sparse_strategy() -> impl Strategy<Value = IrType> {
    (1usize..4)
        .prop_flat_map(|rank| {
            (
                prop::collection::vec(dim_strategy(), rank),
                prop::collection::vec(
                    prop::sample::select(vec![
                        DimLevel::Dense,
                        DimLevel::Compressed,
                        DimLevel::Singleton,
                    ]),
                    rank,
                ),
                Just((0..rank).collect::<Vec<_>>()).prop_shuffle(),
                prop::bool::ANY,
                scalar_strategy(),
                prop::sample::select(vec![0u32, 8, 16, 32, 64]),
                prop::sample::select(vec![0u32, 8, 16, 32, 64]),
                spelling_strategy(),
            )
        })
        .prop_map(
            |(dims, dim_levels, order, ordered, element, pointer, index, spelling)| {
                let identity = order.iter().copied().eq(0..order.len());
                // The level-map spelling folds an identity ordering away.
                let dim_ordering = match spelling {
                    EncodingSpelling::Map if identity => None,
                    _ if ordered => Some(order),
                    _ => None,
                };
                IrType::SparseTensor(SparseTensorType {
                    dims,
                    element,
                    encoding: SparseEncoding {
                        dim_levels,
                        dim_ordering,
                        pointer_bit_width: pointer,
                        index_bit_width: index,
                        spelling,
                    },
                })
            },
        )
}

fn ir_type_strategy() -> impl Strategy<Value = IrType> {
    let leaf = prop_oneof![
        scalar_strategy().prop_map(IrType::Scalar),
        dense_strategy(),
        sparse_strategy(),
    ];
    leaf.prop_recursive(3, 8, 1, |inner| {
        prop_oneof![
            inner.prop_map(IrType::pointer_to),
            Just(IrType::OpaquePointer(None)),
        ]
    })
}

proptest! {
    #[test]
    fn printed_types_scan_back(ty in ir_type_strategy()) {
        let text = ty.to_string();
        prop_assert_eq!(parse_type(&text).unwrap(), ty);
    }

    #[test]
    fn printed_signatures_scan_back(
        args in prop::collection::vec(ir_type_strategy(), 0..4),
        results in prop::collection::vec(ir_type_strategy(), 0..3),
    ) {
        let params = args
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("%a{i}: {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rets = results
            .iter()
            .map(|ty| ty.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!("func @f({params}) -> ({rets}) {{\n  return\n}}\n");
        let module = parse_signatures(&text).unwrap();
        let f = &module.functions[0];
        prop_assert_eq!(f.args.iter().map(|a| a.ty.clone()).collect::<Vec<_>>(), args);
        prop_assert_eq!(&f.results, &results);
    }
}
