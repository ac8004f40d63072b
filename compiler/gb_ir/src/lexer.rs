//! Tokenizer for IR text.
//!
//! Covers enough of the surface syntax to walk signatures, alias definitions
//! and sparse encodings. Function bodies are tokenized too, but the scanner
//! only counts braces there, so characters the lexer does not recognise are
//! kept as invalid tokens instead of aborting the scan.

use std::ops::Range;

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token<'src> {
    /// `@name`, stored without the sigil.
    #[regex(r"@[A-Za-z_$.][A-Za-z0-9_$.\-]*", |lex| &lex.slice()[1..])]
    Symbol(&'src str),

    /// `%name` or `%name#3`, stored without the `%`.
    #[regex(r"%[A-Za-z0-9_$.\-]+(#[0-9]+)?", |lex| &lex.slice()[1..])]
    ValueId(&'src str),

    /// `!alias` or dialect type prefix such as `!llvm.ptr`, without the `!`.
    #[regex(r"![A-Za-z_][A-Za-z0-9_$.]*", |lex| &lex.slice()[1..])]
    TypeRef(&'src str),

    /// `#alias` or dialect attribute prefix, without the `#`.
    #[regex(r"#[A-Za-z_][A-Za-z0-9_$.]*", |lex| &lex.slice()[1..])]
    AttrRef(&'src str),

    #[regex(r"[A-Za-z_][A-Za-z0-9_$.]*")]
    Ident(&'src str),

    /// Leading extents of a shaped type: `4x?x` in `tensor<4x?xf64>`.
    #[regex(r"([0-9]+|\?)x(([0-9]+|\?)x)*")]
    DimPrefix(&'src str),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"-?[0-9]+\.[0-9]*([eE][-+]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// String literal without the quotes.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    Str(&'src str),

    #[token("->")]
    Arrow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("?")]
    Question,
    #[token("*")]
    Star,
    #[token("^")]
    Caret,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
}

/// A token with its byte span. `token` is `None` for unrecognised input.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'src> {
    pub token: Option<Token<'src>>,
    pub span: Range<usize>,
}

/// Tokenize the whole input.
pub fn tokenize(src: &str) -> Vec<Spanned<'_>> {
    Token::lexer(src)
        .spanned()
        .map(|(token, span)| Spanned {
            token: token.ok(),
            span,
        })
        .collect()
}

/// Split a dimension prefix (`4x?x`) into its extents.
pub(crate) fn split_dims(prefix: &str) -> impl Iterator<Item = Option<u64>> + '_ {
    prefix
        .split('x')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().ok())
}

#[cfg(test)]
mod tests;
