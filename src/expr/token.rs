//! Tokenizer for the flat infix condition-expression syntax.
//!
//! Built with the same `nom` combinator vocabulary `dsl-core::parser` uses
//! (`alt`, `recognize`, `many0`, character-class primitives) but over a
//! plain `Vec<Token>` output rather than an AST, since the infix grammar
//! needs a token stream for precedence climbing.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag};
use nom::character::complete::{char, digit1, multispace0, none_of, one_of};
use nom::combinator::{map, opt, recognize, value};
use nom::multi::many0;
use nom::sequence::{pair, preceded, tuple};
use nom::IResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    And,
    Or,
    Not,
    In,
    Exists,
    IsNull,
    Regex,
    StartsWith,
    EndsWith,
    Contains,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A token plus the byte offset it started at, for `BadExpression` position
/// reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, String> {
    let mut tokens = Vec::new();
    let mut rest = input;
    let mut consumed = 0usize;

    loop {
        let (after_ws, _) = multispace0::<_, nom::error::Error<&str>>(rest)
            .map_err(|e| format!("lex error: {e:?}"))?;
        consumed += rest.len() - after_ws.len();
        rest = after_ws;
        if rest.is_empty() {
            break;
        }

        let position = consumed;
        let (next, token) =
            token(rest).map_err(|_| format!("unexpected character at position {position}"))?;
        consumed += rest.len() - next.len();
        rest = next;
        tokens.push(Spanned { token, position });
    }

    Ok(tokens)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        keyword_or_ident,
        string_literal,
        number_literal,
        symbol,
    ))(input)
}

fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::LBracket, char('[')),
        value(Token::RBracket, char(']')),
        value(Token::Comma, char(',')),
        value(Token::Ne, tag("!=")),
        value(Token::Gte, tag(">=")),
        value(Token::Lte, tag("<=")),
        value(Token::Eq, alt((tag("=="), tag("=")))),
        value(Token::Gt, char('>')),
        value(Token::Lt, char('<')),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, Token> {
    alt((double_quoted, single_quoted))(input)
}

fn double_quoted(input: &str) -> IResult<&str, Token> {
    let (rest, content) = delimited_escaped(input, '"')?;
    Ok((rest, Token::Str(content)))
}

fn single_quoted(input: &str) -> IResult<&str, Token> {
    let (rest, content) = delimited_escaped(input, '\'')?;
    Ok((rest, Token::Str(content)))
}

fn delimited_escaped(input: &str, quote: char) -> IResult<&str, String> {
    let (input, _) = char(quote)(input)?;
    let (input, content) = opt(escaped_transform(
        none_of(match quote {
            '"' => "\"\\",
            _ => "'\\",
        }),
        '\\',
        alt((
            value('\\', char('\\')),
            value('"', char('"')),
            value('\'', char('\'')),
            value('\n', char('n')),
            value('\t', char('t')),
        )),
    ))(input)?;
    let (input, _) = char(quote)(input)?;
    Ok((input, content.unwrap_or_default()))
}

fn number_literal(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    let n: f64 = text
        .parse()
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    Ok((rest, Token::Num(n)))
}

fn identifier_text(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        nom::character::complete::alphanumeric1,
        recognize(one_of("_.$")),
    ))))(input)
}

fn keyword_or_ident(input: &str) -> IResult<&str, Token> {
    let (rest, text) = recognize(preceded(
        alt((nom::character::complete::alpha1, tag("$"), tag("_"))),
        identifier_text,
    ))(input)?;

    let upper = text.to_ascii_uppercase();
    let token = match upper.as_str() {
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "IN" => Token::In,
        "EXISTS" => Token::Exists,
        "IS_NULL" => Token::IsNull,
        "REGEX" => Token::Regex,
        "STARTS_WITH" => Token::StartsWith,
        "ENDS_WITH" => Token::EndsWith,
        "CONTAINS" => Token::Contains,
        "TRUE" => Token::Bool(true),
        "FALSE" => Token::Bool(false),
        _ => Token::Ident(text.to_string()),
    };
    Ok((rest, token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_comparison() {
        let tokens = tokenize("$req.amount > 100").unwrap();
        assert_eq!(
            tokens.iter().map(|s| s.token.clone()).collect::<Vec<_>>(),
            vec![
                Token::Ident("$req.amount".to_string()),
                Token::Gt,
                Token::Num(100.0)
            ]
        );
    }

    #[test]
    fn tokenizes_quoted_string_with_escape() {
        let tokens = tokenize(r#"status == "a\"b""#).unwrap();
        assert_eq!(
            tokens[2].token,
            Token::Str("a\"b".to_string())
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = tokenize("a and b or not c").unwrap();
        assert_eq!(tokens[1].token, Token::And);
        assert_eq!(tokens[3].token, Token::Or);
        assert_eq!(tokens[4].token, Token::Not);
    }
}
