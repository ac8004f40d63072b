//! Type grammar: builtin scalars and shaped types, the LLVM pointer types.

use super::Parser;
use crate::error::ParseError;
use crate::lexer::{split_dims, Token};
use crate::types::{DenseArrayType, Dim, FloatKind, IrType, ScalarType, ShapedKind, SparseTensorType};

pub(crate) fn scalar_from_keyword(word: &str) -> Option<ScalarType> {
    match word {
        "index" => Some(ScalarType::Index),
        "f16" => Some(ScalarType::Float(FloatKind::F16)),
        "bf16" => Some(ScalarType::Float(FloatKind::BF16)),
        "f32" => Some(ScalarType::Float(FloatKind::F32)),
        "f64" => Some(ScalarType::Float(FloatKind::F64)),
        _ => word
            .strip_prefix('i')
            .and_then(|w| w.parse::<u32>().ok())
            .filter(|w| *w > 0)
            .map(ScalarType::Integer),
    }
}

impl<'src> Parser<'src> {
    pub(crate) fn parse_type(&mut self) -> Result<IrType, ParseError> {
        let start = self.offset();
        match self.peek() {
            Some(&Token::Ident(word)) => {
                self.bump();
                self.parse_builtin_type(word, start)
            }
            Some(&Token::TypeRef(name)) => {
                self.bump();
                if let Some(&index) = self.type_aliases.get(name) {
                    return self.with_alias(name, index, Self::parse_type);
                }
                self.parse_dialect_type(name, start)
            }
            _ => Err(self.error("type")),
        }
    }

    fn parse_builtin_type(&mut self, word: &'src str, start: usize) -> Result<IrType, ParseError> {
        if let Some(scalar) = scalar_from_keyword(word) {
            return Ok(IrType::Scalar(scalar));
        }
        match word {
            "tensor" => self.parse_tensor(),
            "memref" => self.parse_memref(),
            _ => Err(ParseError::UnsupportedType {
                spelling: word.to_string(),
                offset: start,
            }),
        }
    }

    /// `<` already consumed: dimension prefix then element type.
    fn parse_shape(&mut self) -> Result<(Vec<Dim>, ScalarType), ParseError> {
        let start = self.offset();
        let dims = match self.peek() {
            Some(&Token::DimPrefix(prefix)) => {
                self.bump();
                split_dims(prefix)
                    .map(|d| d.map_or(Dim::Dynamic, Dim::Static))
                    .collect()
            }
            Some(Token::Star) => {
                return Err(ParseError::UnsupportedType {
                    spelling: "unranked shaped type".to_string(),
                    offset: start,
                })
            }
            _ => Vec::new(),
        };
        let element_start = self.offset();
        match self.peek() {
            Some(&Token::Ident(word)) => {
                self.bump();
                scalar_from_keyword(word)
                    .map(|element| (dims, element))
                    .ok_or_else(|| ParseError::UnsupportedType {
                        spelling: word.to_string(),
                        offset: element_start,
                    })
            }
            _ => Err(self.error("element type")),
        }
    }

    fn parse_tensor(&mut self) -> Result<IrType, ParseError> {
        self.expect(&Token::LAngle, "'<'")?;
        let (dims, element) = self.parse_shape()?;
        if self.eat(&Token::Comma) {
            let encoding = self.parse_encoding_attr()?;
            if encoding.dim_levels.len() != dims.len() {
                return Err(ParseError::InvalidEncoding {
                    reason: format!(
                        "{} level types for a rank-{} tensor",
                        encoding.dim_levels.len(),
                        dims.len()
                    ),
                });
            }
            self.expect(&Token::RAngle, "'>'")?;
            return Ok(IrType::SparseTensor(SparseTensorType {
                dims,
                element,
                encoding,
            }));
        }
        self.expect(&Token::RAngle, "'>'")?;
        Ok(IrType::DenseArray(DenseArrayType {
            kind: ShapedKind::Tensor,
            dims,
            element,
            layout: None,
        }))
    }

    fn parse_memref(&mut self) -> Result<IrType, ParseError> {
        self.expect(&Token::LAngle, "'<'")?;
        let (dims, element) = self.parse_shape()?;
        let layout = if self.eat(&Token::Comma) {
            Some(self.layout_text()?)
        } else {
            self.expect(&Token::RAngle, "'>'")?;
            None
        };
        Ok(IrType::DenseArray(DenseArrayType {
            kind: ShapedKind::MemRef,
            dims,
            element,
            layout,
        }))
    }

    /// Source text up to the `>` closing the memref, which is consumed.
    ///
    /// The text is reprinted verbatim, so it may not name attribute aliases.
    fn layout_text(&mut self) -> Result<String, ParseError> {
        let start = self.offset();
        let mut depth = 1usize;
        while let Some(spanned) = self.tokens.get(self.pos) {
            let end = spanned.span.start;
            match spanned.token {
                Some(Token::LAngle) => depth += 1,
                Some(Token::RAngle) => depth -= 1,
                Some(Token::AttrRef(name)) if self.attr_aliases.contains_key(name) => {
                    return Err(ParseError::UnsupportedType {
                        spelling: format!("memref layout #{name}"),
                        offset: end,
                    });
                }
                _ => {}
            }
            self.bump();
            if depth == 0 {
                let text = self.src[start..end].trim();
                if text.is_empty() {
                    return Err(ParseError::Unexpected {
                        offset: end,
                        expected: "memref layout or memory space",
                        found: ">".to_string(),
                    });
                }
                return Ok(text.to_string());
            }
        }
        Err(ParseError::UnexpectedEof { expected: "'>'" })
    }

    fn parse_dialect_type(&mut self, name: &'src str, start: usize) -> Result<IrType, ParseError> {
        match name {
            "llvm.ptr" => self.parse_pointer_body(),
            "llvm.vec" => self.parse_pointer_vector(start),
            _ if name.contains('.') => Err(ParseError::UnsupportedType {
                spelling: format!("!{name}"),
                offset: start,
            }),
            _ => Err(ParseError::UnknownAlias {
                sigil: '!',
                name: name.to_string(),
            }),
        }
    }

    /// After `!llvm.ptr` or a bare `ptr` inside an LLVM type.
    fn parse_pointer_body(&mut self) -> Result<IrType, ParseError> {
        if !self.eat(&Token::LAngle) {
            return Ok(IrType::OpaquePointer(None));
        }
        // `!llvm.ptr<1>`: untyped pointer in an address space.
        if let Some(Token::Integer(_)) = self.peek() {
            self.bump();
            self.expect(&Token::RAngle, "'>'")?;
            return Ok(IrType::OpaquePointer(None));
        }
        let pointee = self.parse_llvm_element()?;
        if self.eat(&Token::Comma) {
            match self.peek() {
                Some(Token::Integer(_)) => self.bump(),
                _ => return Err(self.error("address space")),
            }
        }
        self.expect(&Token::RAngle, "'>'")?;
        Ok(IrType::pointer_to(pointee))
    }

    /// Inside LLVM dialect brackets nested pointer types may drop the prefix.
    fn parse_llvm_element(&mut self) -> Result<IrType, ParseError> {
        if self.peek() == Some(&Token::Ident("ptr")) {
            self.bump();
            return self.parse_pointer_body();
        }
        self.parse_type()
    }

    fn parse_pointer_vector(&mut self, start: usize) -> Result<IrType, ParseError> {
        self.expect(&Token::LAngle, "'<'")?;
        let len = match self.peek() {
            Some(&Token::Integer(n)) => u64::try_from(n).map_err(|_| self.error("vector length"))?,
            _ => return Err(self.error("vector length")),
        };
        self.bump();
        self.expect(&Token::Ident("x"), "'x'")?;
        let element = self.parse_llvm_element()?;
        self.expect(&Token::RAngle, "'>'")?;
        match element {
            IrType::OpaquePointer(pointee) => Ok(IrType::OpaquePointerVector { len, pointee }),
            other => Err(ParseError::UnsupportedType {
                spelling: format!("!llvm.vec<{len} x {other}>"),
                offset: start,
            }),
        }
    }
}
