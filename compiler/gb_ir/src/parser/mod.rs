//! Function signature scanner.
//!
//! Walks IR text and extracts the signature of every `func` / `func.func` /
//! `builtin.func` operation, skipping bodies by brace balancing. Top-level
//! type aliases (`!name = T`) and attribute aliases (`#name = ...`) are
//! collected first and substituted wherever they are used, recursively.
//!
//! The scanner deliberately does not understand operation bodies: anything
//! between a function's braces is opaque to it.

mod encoding;
mod types;

use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::ParseError;
use crate::lexer::{tokenize, Spanned, Token};
use crate::types::IrType;

/// Which spelling of the function operation was used.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FuncKeyword {
    /// `func`
    Func,
    /// `func.func`
    FuncFunc,
    /// `builtin.func`
    BuiltinFunc,
}

impl FuncKeyword {
    fn from_ident(word: &str) -> Option<Self> {
        match word {
            "func" => Some(Self::Func),
            "func.func" => Some(Self::FuncFunc),
            "builtin.func" => Some(Self::BuiltinFunc),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Func => "func",
            Self::FuncFunc => "func.func",
            Self::BuiltinFunc => "builtin.func",
        }
    }

    /// The call operation matching this spelling.
    #[must_use]
    pub fn call_op(self) -> &'static str {
        match self {
            Self::Func | Self::BuiltinFunc => "call",
            Self::FuncFunc => "func.call",
        }
    }

    /// The return operation matching this spelling.
    #[must_use]
    pub fn return_op(self) -> &'static str {
        match self {
            Self::Func | Self::BuiltinFunc => "return",
            Self::FuncFunc => "func.return",
        }
    }
}

/// Symbol visibility of a function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
    Nested,
}

/// A named, typed function argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argument {
    /// SSA name without the `%`.
    pub name: String,
    pub ty: IrType,
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}: {}", self.name, self.ty)
    }
}

/// One function's signature, with all aliases resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub visibility: Visibility,
    pub keyword: FuncKeyword,
    pub args: Vec<Argument>,
    pub results: Vec<IrType>,
    /// `false` for external declarations.
    pub has_body: bool,
}

impl FunctionSignature {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[must_use]
    pub fn arg_types(&self) -> Vec<&IrType> {
        self.args.iter().map(|a| &a.ty).collect()
    }
}

/// Every function signature found in a unit of IR text, in textual order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Module {
    pub functions: Vec<FunctionSignature>,
}

impl Module {
    pub fn public_functions(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.functions.iter().filter(|f| f.is_public())
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The function spelling the unit uses, `func` when it has no functions.
    #[must_use]
    pub fn keyword(&self) -> FuncKeyword {
        self.functions
            .first()
            .map_or(FuncKeyword::Func, |f| f.keyword)
    }
}

/// Scan `src` for function signatures.
pub fn parse_signatures(src: &str) -> Result<Module, ParseError> {
    let mut parser = Parser::new(src);
    let functions = parser.scan_functions()?;
    tracing::trace!(count = functions.len(), "scanned function signatures");
    Ok(Module { functions })
}

/// Parse a single standalone type (no aliases in scope).
pub fn parse_type(src: &str) -> Result<IrType, ParseError> {
    let mut parser = Parser::new(src);
    let ty = parser.parse_type()?;
    if parser.at_end() {
        Ok(ty)
    } else {
        Err(parser.error("end of type"))
    }
}

type AliasTable<'src> = FxHashMap<&'src str, usize>;

pub(crate) struct Parser<'src> {
    src: &'src str,
    tokens: Vec<Spanned<'src>>,
    pos: usize,
    type_aliases: AliasTable<'src>,
    attr_aliases: AliasTable<'src>,
    /// Aliases currently being expanded, for cycle detection.
    resolving: Vec<&'src str>,
}

/// Record where each top-level alias definition's value starts.
fn collect_aliases<'src>(tokens: &[Spanned<'src>]) -> (AliasTable<'src>, AliasTable<'src>) {
    let mut type_aliases = AliasTable::default();
    let mut attr_aliases = AliasTable::default();
    let mut depth = 0usize;
    for (i, spanned) in tokens.iter().enumerate() {
        let defines = depth == 0
            && tokens
                .get(i + 1)
                .is_some_and(|next| next.token == Some(Token::Equals));
        match spanned.token {
            Some(Token::LBrace) => depth += 1,
            Some(Token::RBrace) => depth = depth.saturating_sub(1),
            Some(Token::TypeRef(name)) if defines => {
                type_aliases.insert(name, i + 2);
            }
            Some(Token::AttrRef(name)) if defines => {
                attr_aliases.insert(name, i + 2);
            }
            _ => {}
        }
    }
    (type_aliases, attr_aliases)
}

impl<'src> Parser<'src> {
    pub(crate) fn new(src: &'src str) -> Self {
        let tokens = tokenize(src);
        let (type_aliases, attr_aliases) = collect_aliases(&tokens);
        Self {
            src,
            tokens,
            pos: 0,
            type_aliases,
            attr_aliases,
            resolving: Vec::new(),
        }
    }

    // --- Cursor ---

    fn peek(&self) -> Option<&Token<'src>> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token<'src>> {
        self.tokens
            .get(self.pos + ahead)
            .and_then(|s| s.token.as_ref())
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.src.len(), |s| s.span.start)
    }

    fn error(&self, expected: &'static str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(spanned) => ParseError::Unexpected {
                offset: spanned.span.start,
                expected,
                found: self.src[spanned.span.clone()].to_string(),
            },
            None => ParseError::UnexpectedEof { expected },
        }
    }

    fn eat(&mut self, token: &Token<'_>) -> bool {
        if self.peek() == Some(token) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token<'_>, expected: &'static str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    /// Skip from an opening delimiter past its matching close.
    fn skip_balanced(&mut self, open: &Token<'_>, close: &Token<'_>) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(spanned) = self.tokens.get(self.pos) {
            let token = spanned.token.as_ref();
            let (opens, closes) = (token == Some(open), token == Some(close));
            self.bump();
            if opens {
                depth += 1;
            } else if closes {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(ParseError::UnexpectedEof {
            expected: "closing delimiter",
        })
    }

    /// Run `f` with the cursor moved to an alias definition's value.
    fn with_alias<T>(
        &mut self,
        name: &'src str,
        index: usize,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.resolving.contains(&name) {
            return Err(ParseError::AliasCycle {
                name: name.to_string(),
            });
        }
        self.resolving.push(name);
        let saved = self.pos;
        self.pos = index;
        let result = f(self);
        self.pos = saved;
        self.resolving.pop();
        result
    }

    // --- Functions ---

    fn scan_functions(&mut self) -> Result<Vec<FunctionSignature>, ParseError> {
        let mut functions = Vec::new();
        while !self.at_end() {
            if let Some(&Token::Ident(word)) = self.peek() {
                if let Some(keyword) = FuncKeyword::from_ident(word) {
                    if self.function_header_follows() {
                        self.bump();
                        functions.push(self.parse_function(keyword)?);
                        continue;
                    }
                }
            }
            self.bump();
        }
        Ok(functions)
    }

    fn function_header_follows(&self) -> bool {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some(Token::Symbol(_)), _) => true,
            (Some(Token::Ident("private" | "public" | "nested")), Some(Token::Symbol(_))) => true,
            _ => false,
        }
    }

    fn parse_function(&mut self, keyword: FuncKeyword) -> Result<FunctionSignature, ParseError> {
        let visibility = match self.peek() {
            Some(Token::Ident("private")) => Visibility::Private,
            Some(Token::Ident("nested")) => Visibility::Nested,
            _ => Visibility::Public,
        };
        if matches!(
            self.peek(),
            Some(Token::Ident("private" | "public" | "nested"))
        ) {
            self.bump();
        }

        let name = match self.peek() {
            Some(&Token::Symbol(name)) => name.to_string(),
            _ => return Err(self.error("function name")),
        };
        self.bump();

        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_argument(args.len())?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen, "',' or ')'")?;
                break;
            }
        }

        let results = if self.eat(&Token::Arrow) {
            self.parse_results()?
        } else {
            Vec::new()
        };

        if self.peek() == Some(&Token::Ident("attributes")) {
            self.bump();
            if self.peek() != Some(&Token::LBrace) {
                return Err(self.error("attribute dictionary"));
            }
            self.skip_balanced(&Token::LBrace, &Token::RBrace)?;
        }

        let has_body = self.peek() == Some(&Token::LBrace);
        if has_body {
            self.skip_balanced(&Token::LBrace, &Token::RBrace)?;
        }

        tracing::trace!(%name, args = args.len(), results = results.len(), "function signature");
        Ok(FunctionSignature {
            name,
            visibility,
            keyword,
            args,
            results,
            has_body,
        })
    }

    fn parse_argument(&mut self, index: usize) -> Result<Argument, ParseError> {
        let name = if let Some(&Token::ValueId(name)) = self.peek() {
            self.bump();
            self.expect(&Token::Colon, "':'")?;
            name.to_string()
        } else {
            format!("arg{index}")
        };
        let ty = self.parse_type()?;
        self.skip_trailing_attributes()?;
        Ok(Argument { name, ty })
    }

    fn parse_results(&mut self) -> Result<Vec<IrType>, ParseError> {
        if !self.eat(&Token::LParen) {
            return Ok(vec![self.parse_type()?]);
        }
        let mut results = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(results);
        }
        loop {
            results.push(self.parse_type()?);
            self.skip_trailing_attributes()?;
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "',' or ')'")?;
            return Ok(results);
        }
    }

    /// Skip an argument/result attribute dictionary and a location.
    fn skip_trailing_attributes(&mut self) -> Result<(), ParseError> {
        if self.peek() == Some(&Token::LBrace) {
            self.skip_balanced(&Token::LBrace, &Token::RBrace)?;
        }
        if self.peek() == Some(&Token::Ident("loc")) {
            self.bump();
            self.skip_balanced(&Token::LParen, &Token::RParen)?;
        }
        Ok(())
    }
}
