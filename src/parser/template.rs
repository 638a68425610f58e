use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{map, opt, recognize},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use serde_json::Value;

use crate::error::{HrpError, Result};

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    /// `$name` or `${name}`
    Variable(String),
    /// `${fn(a, b)}`
    FunctionCall { name: String, args: Vec<Argument> },
}

/// A function-call argument: a variable reference or a literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Variable(String),
    Literal(Value),
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

// Argument boundary: end of input, a delimiter, or whitespace.
fn at_boundary(input: &str) -> bool {
    match input.chars().next() {
        None => true,
        Some(c) => c == ',' || c == ')' || c == '}' || c.is_whitespace(),
    }
}

fn quoted(input: &str) -> IResult<&str, String> {
    alt((
        delimited(char('"'), map(take_till1(|c| c == '"'), str::to_string), char('"')),
        map(tag("\"\""), |_| String::new()),
        delimited(char('\''), map(take_till1(|c| c == '\''), str::to_string), char('\'')),
        map(tag("''"), |_| String::new()),
    ))(input)
}

fn number_arg(input: &str) -> IResult<&str, Argument> {
    let (rest, raw) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    if !at_boundary(rest) {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)));
    }
    let value = if raw.contains('.') {
        serde_json::Number::from_f64(raw.parse::<f64>().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        raw.parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::Null)
    };
    Ok((rest, Argument::Literal(value)))
}

fn bool_arg(input: &str) -> IResult<&str, Argument> {
    let (rest, raw) = alt((tag("true"), tag("false")))(input)?;
    if !at_boundary(rest) {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    Ok((rest, Argument::Literal(Value::Bool(raw == "true"))))
}

fn argument(input: &str) -> IResult<&str, Argument> {
    preceded(
        multispace0,
        alt((
            map(preceded(char('$'), ident), |n: &str| Argument::Variable(n.to_string())),
            map(quoted, |s| Argument::Literal(Value::String(s))),
            number_arg,
            bool_arg,
            // bare word, up to the next delimiter
            map(take_while1(|c: char| c != ',' && c != ')' && c != '}'), |s: &str| {
                Argument::Literal(Value::String(s.trim().to_string()))
            }),
        )),
    )(input)
}

fn function_call(input: &str) -> IResult<&str, Segment> {
    let (input, name) = ws(ident)(input)?;
    let (input, args) = delimited(
        char('('),
        separated_list0(ws(char(',')), argument),
        ws(char(')')),
    )(input)?;
    Ok((input, Segment::FunctionCall { name: name.to_string(), args }))
}

fn braced_expr(input: &str) -> IResult<&str, Segment> {
    delimited(
        tag("${"),
        alt((
            function_call,
            map(ws(ident), |n: &str| Segment::Variable(n.to_string())),
        )),
        char('}'),
    )(input)
}

fn bare_variable(input: &str) -> IResult<&str, Segment> {
    map(preceded(char('$'), ident), |n: &str| Segment::Variable(n.to_string()))(input)
}

fn truncate_for_error(s: &str) -> &str {
    &s[..s.len().min(40)]
}

/// Split an interpolated string into segments. `$$` escapes a literal
/// dollar; a `${` without a matching close is a parse error.
pub fn tokenize(input: &str) -> Result<Vec<Segment>> {
    let mut rest = input;
    let mut segments = Vec::new();
    let mut literal = String::new();

    while !rest.is_empty() {
        if rest.starts_with("$$") {
            literal.push('$');
            rest = &rest[2..];
            continue;
        }
        if rest.starts_with("${") {
            match braced_expr(rest) {
                Ok((remaining, segment)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    rest = remaining;
                }
                Err(_) => {
                    return Err(HrpError::Parse(format!(
                        "invalid expression near {:?}",
                        truncate_for_error(rest)
                    )));
                }
            }
            continue;
        }
        if rest.starts_with('$') {
            match bare_variable(rest) {
                Ok((remaining, segment)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    rest = remaining;
                }
                Err(_) => {
                    // lone '$' with no identifier following
                    literal.push('$');
                    rest = &rest[1..];
                }
            }
            continue;
        }
        let next = rest.find('$').unwrap_or(rest.len());
        literal.push_str(&rest[..next]);
        rest = &rest[next..];
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// True when the string contains at least one variable or function token.
/// Malformed expressions count as tokens so they surface as parse errors.
pub fn has_tokens(input: &str) -> bool {
    match tokenize(input) {
        Ok(segments) => segments.iter().any(|s| !matches!(s, Segment::Literal(_))),
        Err(_) => true,
    }
}
