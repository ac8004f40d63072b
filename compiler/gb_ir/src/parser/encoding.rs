//! `#sparse_tensor.encoding<{...}>` attribute grammar.

use super::Parser;
use crate::error::ParseError;
use crate::lexer::Token;
use crate::types::{DimLevel, EncodingSpelling, SparseEncoding};

fn level_from_str(spelling: &str) -> Result<DimLevel, ParseError> {
    // `compressed-nu`, `compressed(nonunique)` and friends share a storage kind.
    let base = spelling
        .split(|c| c == '-' || c == '(')
        .next()
        .unwrap_or(spelling);
    match base {
        "dense" => Ok(DimLevel::Dense),
        "compressed" => Ok(DimLevel::Compressed),
        "singleton" => Ok(DimLevel::Singleton),
        _ => Err(ParseError::InvalidEncoding {
            reason: format!("unknown level type '{spelling}'"),
        }),
    }
}

fn invalid(reason: impl Into<String>) -> ParseError {
    ParseError::InvalidEncoding {
        reason: reason.into(),
    }
}

impl<'src> Parser<'src> {
    pub(crate) fn parse_encoding_attr(&mut self) -> Result<SparseEncoding, ParseError> {
        match self.peek() {
            Some(Token::AttrRef("sparse_tensor.encoding")) => {
                self.bump();
                self.parse_encoding_body()
            }
            Some(&Token::AttrRef(name)) => {
                self.bump();
                let index = self.attr_aliases.get(name).copied().ok_or_else(|| {
                    ParseError::UnknownAlias {
                        sigil: '#',
                        name: name.to_string(),
                    }
                })?;
                self.with_alias(name, index, Self::parse_encoding_attr)
            }
            _ => Err(self.error("sparse tensor encoding")),
        }
    }

    fn parse_encoding_body(&mut self) -> Result<SparseEncoding, ParseError> {
        self.expect(&Token::LAngle, "'<'")?;
        self.expect(&Token::LBrace, "'{'")?;

        let mut dim_levels = None;
        let mut dim_ordering = None;
        let mut pointer_bit_width = 0;
        let mut index_bit_width = 0;
        let mut spelling = EncodingSpelling::Legacy;

        if !self.eat(&Token::RBrace) {
            loop {
                let key = match self.peek() {
                    Some(&Token::Ident(key)) => key,
                    _ => return Err(self.error("encoding key")),
                };
                self.bump();
                self.expect(&Token::Equals, "'='")?;
                match key {
                    "dimLevelType" => dim_levels = Some(self.parse_level_list()?),
                    "lvlTypes" => {
                        spelling = EncodingSpelling::LevelTypes;
                        dim_levels = Some(self.parse_level_list()?);
                    }
                    "dimOrdering" | "dimToLvl" => {
                        dim_ordering = Some(self.parse_ordering_attr()?);
                    }
                    "map" => {
                        spelling = EncodingSpelling::Map;
                        let (levels, ordering) = self.parse_level_map()?;
                        dim_levels = Some(levels);
                        dim_ordering = ordering;
                    }
                    "pointerBitWidth" | "posWidth" => pointer_bit_width = self.parse_width()?,
                    "indexBitWidth" | "crdWidth" => index_bit_width = self.parse_width()?,
                    _ => self.skip_entry_value()?,
                }
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RBrace, "',' or '}'")?;
                break;
            }
        }
        self.expect(&Token::RAngle, "'>'")?;

        let dim_levels = dim_levels.ok_or_else(|| invalid("missing level types"))?;
        if let Some(order) = &dim_ordering {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            if !sorted.iter().copied().eq(0..dim_levels.len()) {
                return Err(invalid(format!(
                    "dimension ordering {order:?} is not a permutation of {} levels",
                    dim_levels.len()
                )));
            }
        }
        Ok(SparseEncoding {
            dim_levels,
            dim_ordering,
            pointer_bit_width,
            index_bit_width,
            spelling,
        })
    }

    fn parse_level_list(&mut self) -> Result<Vec<DimLevel>, ParseError> {
        self.expect(&Token::LBracket, "'['")?;
        let mut levels = Vec::new();
        if self.eat(&Token::RBracket) {
            return Ok(levels);
        }
        loop {
            match self.peek() {
                Some(&Token::Str(s)) => levels.push(level_from_str(s)?),
                _ => return Err(self.error("level type string")),
            }
            self.bump();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBracket, "',' or ']'")?;
            return Ok(levels);
        }
    }

    fn parse_width(&mut self) -> Result<u32, ParseError> {
        match self.peek() {
            Some(&Token::Integer(n)) => {
                let width = u32::try_from(n).map_err(|_| invalid(format!("bad bit width {n}")))?;
                self.bump();
                Ok(width)
            }
            _ => Err(self.error("bit width")),
        }
    }

    fn parse_ordering_attr(&mut self) -> Result<Vec<usize>, ParseError> {
        match self.peek() {
            Some(Token::Ident("affine_map")) => {
                self.bump();
                self.expect(&Token::LAngle, "'<'")?;
                let order = self.parse_permutation()?;
                self.expect(&Token::RAngle, "'>'")?;
                Ok(order)
            }
            Some(&Token::AttrRef(name)) => {
                self.bump();
                let index = self.attr_aliases.get(name).copied().ok_or_else(|| {
                    ParseError::UnknownAlias {
                        sigil: '#',
                        name: name.to_string(),
                    }
                })?;
                self.with_alias(name, index, Self::parse_ordering_attr)
            }
            _ => Err(self.error("affine map")),
        }
    }

    /// `(d0, d1, ...)`, returning the dimension names.
    fn parse_dim_names(&mut self) -> Result<Vec<&'src str>, ParseError> {
        self.expect(&Token::LParen, "'('")?;
        let mut names = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(names);
        }
        loop {
            match self.peek() {
                Some(&Token::Ident(name)) => names.push(name),
                _ => return Err(self.error("dimension name")),
            }
            self.bump();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            return Ok(names);
        }
    }

    fn dim_position(&self, dims: &[&str]) -> Result<usize, ParseError> {
        match self.peek() {
            Some(&Token::Ident(name)) => dims
                .iter()
                .position(|d| *d == name)
                .ok_or_else(|| invalid(format!("unknown dimension '{name}'"))),
            _ => Err(invalid("only permutation maps are supported")),
        }
    }

    /// `(d0, d1) -> (d1, d0)` as a permutation vector.
    fn parse_permutation(&mut self) -> Result<Vec<usize>, ParseError> {
        let dims = self.parse_dim_names()?;
        self.expect(&Token::Arrow, "'->'")?;
        self.expect(&Token::LParen, "'('")?;
        let mut order = Vec::with_capacity(dims.len());
        if self.eat(&Token::RParen) {
            return Ok(order);
        }
        loop {
            order.push(self.dim_position(&dims)?);
            self.bump();
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            return Ok(order);
        }
    }

    /// `(d0, d1) -> (d0 : dense, d1 : compressed)`.
    fn parse_level_map(&mut self) -> Result<(Vec<DimLevel>, Option<Vec<usize>>), ParseError> {
        let dims = self.parse_dim_names()?;
        self.expect(&Token::Arrow, "'->'")?;
        self.expect(&Token::LParen, "'('")?;
        let mut levels = Vec::with_capacity(dims.len());
        let mut order = Vec::with_capacity(dims.len());
        loop {
            order.push(self.dim_position(&dims)?);
            self.bump();
            self.expect(&Token::Colon, "':'")?;
            match self.peek() {
                Some(&Token::Ident(level)) => levels.push(level_from_str(level)?),
                _ => return Err(self.error("level type")),
            }
            self.bump();
            if self.peek() == Some(&Token::LParen) {
                self.skip_balanced(&Token::LParen, &Token::RParen)?;
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            break;
        }
        let identity = order.iter().copied().eq(0..order.len());
        Ok((levels, (!identity).then_some(order)))
    }

    /// Skip an unrecognised entry's value up to the next top-level `,` or `}`.
    fn skip_entry_value(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(spanned) = self.tokens.get(self.pos) {
            match spanned.token {
                Some(Token::LParen | Token::LAngle | Token::LBracket | Token::LBrace) => depth += 1,
                Some(Token::RParen | Token::RAngle | Token::RBracket) => depth = depth.saturating_sub(1),
                Some(Token::RBrace) if depth == 0 => return Ok(()),
                Some(Token::RBrace) => depth -= 1,
                Some(Token::Comma) if depth == 0 => return Ok(()),
                _ => {}
            }
            self.bump();
        }
        Err(ParseError::UnexpectedEof {
            expected: "'}' closing the encoding",
        })
    }
}
