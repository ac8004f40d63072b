//! IR surface for the GraphBLAS JIT host.
//!
//! This crate knows just enough about IR text to drive the JIT: the closed
//! set of types that can cross the native boundary ([`IrType`]), the sparse
//! tensor encoding attribute, and a scanner that pulls function signatures
//! out of a unit of IR text with all aliases resolved.
//!
//! Full IR parsing and printing are out of scope; operation bodies are
//! skipped unread.
//!
//! # Example
//!
//! ```
//! use gb_ir::{parse_signatures, IrType};
//!
//! let module = parse_signatures("func @add_one(%x: i64) -> i64 { return %x : i64 }").unwrap();
//! let f = &module.functions[0];
//! assert_eq!(f.name, "add_one");
//! assert_eq!(f.results, vec![IrType::integer(64)]);
//! ```

mod error;
mod lexer;
mod parser;
mod types;

pub use error::ParseError;
pub use lexer::{tokenize, Spanned, Token};
pub use parser::{
    parse_signatures, parse_type, Argument, FuncKeyword, FunctionSignature, Module, Visibility,
};
pub use types::{
    DenseArrayType, Dim, DimLevel, EncodingSpelling, FloatKind, IrType, ScalarType, ShapedKind,
    SparseEncoding, SparseTensorType,
};
