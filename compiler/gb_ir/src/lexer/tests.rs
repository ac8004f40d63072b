use super::*;
use pretty_assertions::assert_eq;

fn kinds(src: &str) -> Vec<Option<Token<'_>>> {
    tokenize(src).into_iter().map(|s| s.token).collect()
}

#[test]
fn signature_tokens() {
    assert_eq!(
        kinds("func.func @add_one(%x: i64) -> i64 {"),
        vec![
            Some(Token::Ident("func.func")),
            Some(Token::Symbol("add_one")),
            Some(Token::LParen),
            Some(Token::ValueId("x")),
            Some(Token::Colon),
            Some(Token::Ident("i64")),
            Some(Token::RParen),
            Some(Token::Arrow),
            Some(Token::Ident("i64")),
            Some(Token::LBrace),
        ]
    );
}

#[test]
fn shaped_type_prefix() {
    assert_eq!(
        kinds("tensor<4x?xf64>"),
        vec![
            Some(Token::Ident("tensor")),
            Some(Token::LAngle),
            Some(Token::DimPrefix("4x?x")),
            Some(Token::Ident("f64")),
            Some(Token::RAngle),
        ]
    );
    assert_eq!(
        split_dims("4x?x").collect::<Vec<_>>(),
        vec![Some(4), None]
    );
}

#[test]
fn dialect_and_alias_refs() {
    assert_eq!(
        kinds("!llvm.ptr<i8> #CSR !Alias"),
        vec![
            Some(Token::TypeRef("llvm.ptr")),
            Some(Token::LAngle),
            Some(Token::Ident("i8")),
            Some(Token::RAngle),
            Some(Token::AttrRef("CSR")),
            Some(Token::TypeRef("Alias")),
        ]
    );
}

#[test]
fn literals() {
    assert_eq!(
        kinds("64 -1 1.5 \"compressed\""),
        vec![
            Some(Token::Integer(64)),
            Some(Token::Integer(-1)),
            Some(Token::Float(1.5)),
            Some(Token::Str("compressed")),
        ]
    );
}

#[test]
fn result_number_uses_stay_one_token() {
    assert_eq!(
        kinds("%var2#1"),
        vec![Some(Token::ValueId("var2#1"))]
    );
}

#[test]
fn comments_are_skipped_and_junk_is_kept() {
    let tokens = tokenize("// header\n} ` {");
    assert_eq!(tokens.len(), 3);
    assert_eq!(tokens[0].token, Some(Token::RBrace));
    assert_eq!(tokens[1].token, None);
    assert_eq!(tokens[2].token, Some(Token::LBrace));
}
