//! Join condition parser using nom.
//!
//! Join conditions arrive as raw strings. Before they reach a query they
//! are parsed into a [`Predicate`] tree, so only comparisons between column
//! references and literals, combined with `AND`/`OR` and parentheses, can
//! ever be rendered.
//!
//! ```text
//! orders.cust_id = customers.id AND (customers.region = 'EU' OR orders.total >= 100)
//! ───────┬────── ┬ ──────┬─────      ─────────────┬──────────────────────────────
//!        │       │       │                        └── nested group
//!        │       │       └── column reference (table.column or column)
//!        │       └── comparison operator
//!        └── column reference
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, not, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::{BridgeError, BridgeResult};

/// Parse a complete join condition.
pub fn parse_predicate(input: &str) -> BridgeResult<Predicate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::Plan("empty join condition".to_string()));
    }

    match parse_or(trimmed) {
        Ok((rest, predicate)) if rest.trim().is_empty() => Ok(predicate),
        Ok((rest, _)) => Err(BridgeError::Plan(format!(
            "invalid join condition '{}': unexpected input at position {}: '{}'",
            trimmed,
            trimmed.len() - rest.len(),
            rest.trim()
        ))),
        Err(_) => Err(BridgeError::Plan(format!(
            "invalid join condition '{}': expected a comparison such as a.id = b.a_id",
            trimmed
        ))),
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(
        multispace0,
        terminated(tag_no_case(kw), not(satisfy(is_ident_char))),
        multispace0,
    )
}

/// `a OR b OR c`, lowest precedence.
fn parse_or(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(keyword("OR"), parse_and))(input)?;
    Ok((input, fold(LogicalOp::Or, first, rest)))
}

/// `a AND b AND c`.
fn parse_and(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0(preceded(keyword("AND"), parse_term))(input)?;
    Ok((input, fold(LogicalOp::And, first, rest)))
}

fn fold(op: LogicalOp, first: Predicate, rest: Vec<Predicate>) -> Predicate {
    rest.into_iter().fold(first, |left, right| Predicate::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// A parenthesized group or a single comparison.
fn parse_term(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = multispace0(input)?;
    alt((
        delimited(
            char('('),
            parse_or,
            preceded(multispace0, char(')')),
        ),
        parse_comparison,
    ))(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, (left, _, op, _, right)) = tuple((
        parse_operand,
        multispace0,
        parse_compare_op,
        multispace0,
        parse_operand,
    ))(input)?;

    Ok((input, Predicate::Compare { left, op, right }))
}

fn parse_compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Lte, tag("<=")),
        value(CompareOp::Gte, tag(">=")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Ne, tag("<>")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Eq, char('=')),
        value(CompareOp::Lt, char('<')),
        value(CompareOp::Gt, char('>')),
    ))(input)
}

fn parse_operand(input: &str) -> IResult<&str, Operand> {
    alt((parse_quoted_string, parse_number, map(parse_column_ref, Operand::Column)))(input)
}

/// `column`, `table.column`, with either part optionally backtick-quoted.
fn parse_column_ref(input: &str) -> IResult<&str, ColumnRef> {
    let (input, first) = parse_identifier(input)?;
    let (input, second) = opt(preceded(char('.'), parse_identifier))(input)?;

    let column_ref = match second {
        Some(column) => ColumnRef {
            table: Some(first),
            column,
        },
        None => ColumnRef {
            table: None,
            column: first,
        },
    };
    Ok((input, column_ref))
}

fn parse_identifier(input: &str) -> IResult<&str, String> {
    alt((
        map(
            recognize(pair(satisfy(is_ident_start), take_while(is_ident_char))),
            |s: &str| s.to_string(),
        ),
        map(
            delimited(char('`'), take_while1(|c| c != '`'), char('`')),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

/// Parse a number (integer or decimal).
fn parse_number(input: &str) -> IResult<&str, Operand> {
    let (rest, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    let operand = if num_str.contains('.') {
        num_str.parse::<f64>().ok().map(Operand::Float)
    } else {
        num_str
            .parse::<i64>()
            .ok()
            .map(Operand::Int)
            .or_else(|| num_str.parse::<f64>().ok().map(Operand::Float))
    };

    match operand {
        Some(op) => Ok((rest, op)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

/// Parse a single-quoted string. No escapes inside.
fn parse_quoted_string(input: &str) -> IResult<&str, Operand> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_while(|c| c != '\'')(input)?;
    let (input, _) = char('\'')(input)?;

    Ok((input, Operand::String(content.to_string())))
}
