use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while, take_while1},
    character::complete::{char, digit1, hex_digit0, multispace1, none_of, not_line_ending, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize, value, verify},
    multi::{many0, many0_count, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use num_bigint::BigInt;

use super::{Micheline, MichelineError, Prim};

type ParseResult<'a, T> = IResult<&'a str, T>;

/// Whitespace, `#` line comments and `/* */` block comments.
fn sp(input: &str) -> ParseResult<'_, ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize(pair(char('#'), not_line_ending)),
            recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ))),
    )(input)
}

fn int_lit(input: &str) -> ParseResult<'_, Micheline> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<BigInt>().map(Micheline::Int)
    })(input)
}

fn string_lit(input: &str) -> ParseResult<'_, Micheline> {
    let body = escaped_transform(
        none_of("\\\""),
        '\\',
        alt((
            value("\\", tag("\\")),
            value("\"", tag("\"")),
            value("\n", tag("n")),
            value("\t", tag("t")),
            value("\r", tag("r")),
        )),
    );
    map(
        alt((
            value(String::new(), tag("\"\"")),
            delimited(char('"'), body, char('"')),
        )),
        Micheline::String,
    )(input)
}

fn bytes_lit(input: &str) -> ParseResult<'_, Micheline> {
    map_res(preceded(tag("0x"), hex_digit0), |s: &str| {
        hex::decode(s).map(Micheline::Bytes)
    })(input)
}

fn prim_name(input: &str) -> ParseResult<'_, &str> {
    verify(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        |s: &str| s.starts_with(|c: char| c.is_ascii_alphabetic()),
    )(input)
}

fn annot(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(
            one_of("%@:"),
            take_while(|c: char| c.is_ascii_alphanumeric() || "_.%@".contains(c)),
        )),
        str::to_owned,
    )(input)
}

fn seq(input: &str) -> ParseResult<'_, Micheline> {
    map(
        delimited(
            pair(char('{'), sp),
            terminated(
                separated_list0(delimited(sp, char(';'), sp), expr),
                opt(pair(sp, char(';'))),
            ),
            pair(sp, char('}')),
        ),
        Micheline::Seq,
    )(input)
}

/// A primitive applied to its annotations and arguments, e.g.
/// `pair (address %admin) nat`.
fn application(input: &str) -> ParseResult<'_, Micheline> {
    let (input, name) = prim_name(input)?;
    let (input, annots) = many0(preceded(sp, annot))(input)?;
    let (input, args) = many0(preceded(sp, arg))(input)?;
    Ok((
        input,
        Micheline::Prim(Prim {
            name: name.to_owned(),
            args,
            annots,
        }),
    ))
}

/// An argument position: literals, sequences, parenthesised applications and
/// bare primitives.
fn arg(input: &str) -> ParseResult<'_, Micheline> {
    alt((
        bytes_lit,
        int_lit,
        string_lit,
        seq,
        delimited(pair(char('('), sp), expr, pair(sp, char(')'))),
        map(prim_name, |name| Micheline::prim(name, Vec::new())),
    ))(input)
}

fn expr(input: &str) -> ParseResult<'_, Micheline> {
    alt((
        bytes_lit,
        int_lit,
        string_lit,
        seq,
        delimited(pair(char('('), sp), expr, pair(sp, char(')'))),
        application,
    ))(input)
}

fn to_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> MichelineError {
    let at = match &err {
        nom::Err::Error(e) | nom::Err::Failure(e) => input.len() - e.input.len(),
        nom::Err::Incomplete(_) => input.len(),
    };
    MichelineError::Parse(format!("unexpected input at offset {at}"))
}

/// Parses a single Michelson expression, such as a storage value or a type.
pub fn parse_expr(input: &str) -> Result<Micheline, MichelineError> {
    all_consuming(delimited(sp, expr, sp))(input)
        .map(|(_, expr)| expr)
        .map_err(|e| to_error(input, e))
}

/// Parses a contract script: `parameter ...; storage ...; code ...;`, with or
/// without surrounding braces.
pub fn parse_script(input: &str) -> Result<Vec<Micheline>, MichelineError> {
    let sections = alt((
        map(seq, |s| match s {
            Micheline::Seq(items) => items,
            other => vec![other],
        }),
        terminated(
            separated_list1(delimited(sp, char(';'), sp), application),
            opt(pair(sp, char(';'))),
        ),
    ));
    all_consuming(delimited(sp, sections, sp))(input)
        .map(|(_, sections)| sections)
        .map_err(|e| to_error(input, e))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_storage_values() {
        let expr = parse_expr(
            r#"Pair (Pair "tz1c6PPijJnZYjKiSQND4pMtGMg6csGeAiiF" 0) { Elt "ETHBTC" 10 } -5 0xff"#,
        )
        .unwrap();
        assert_eq!(
            expr,
            Micheline::prim(
                "Pair",
                vec![
                    Micheline::pair(
                        Micheline::string("tz1c6PPijJnZYjKiSQND4pMtGMg6csGeAiiF"),
                        Micheline::int(0)
                    ),
                    Micheline::Seq(vec![Micheline::elt(
                        Micheline::string("ETHBTC"),
                        Micheline::int(10)
                    )]),
                    Micheline::int(-5),
                    Micheline::Bytes(vec![0xff]),
                ]
            )
        );
    }

    #[test]
    fn parses_annotated_types() {
        let ty = parse_expr("pair %root (address %admin) (set %whitelist address)").unwrap();
        let prim = ty.as_prim().unwrap();
        assert_eq!(prim.name, "pair");
        assert_eq!(prim.annots, vec!["%root".to_owned()]);
        assert_eq!(prim.args[1].as_prim().unwrap().field_annot(), Some("whitelist"));
        assert_eq!(
            ty.to_string(),
            "pair %root (address %admin) (set %whitelist address)"
        );
    }

    #[test]
    fn parses_strings_with_escapes() {
        assert_eq!(parse_expr(r#""""#).unwrap(), Micheline::string(""));
        assert_eq!(
            parse_expr(r#""a\"b\\c\n""#).unwrap(),
            Micheline::string("a\"b\\c\n")
        );
    }

    #[test]
    fn rendering_parses_back() {
        let source = r#"Pair "KT1F3MuqvT9Yz57TgCS3EkDcKNZe9HpiavUJ" (Pair (Pair 10 "ETHBTC") 1000)"#;
        let expr = parse_expr(source).unwrap();
        assert_eq!(expr.to_string(), source);
    }

    #[test]
    fn parses_scripts_with_comments() {
        let script = r#"
            # oracle
            parameter (or (unit %default) (address %set_admin));
            storage (pair (address %admin) (nat %counter));
            code { CDR ; /* keep storage */ NIL operation ; PAIR } ;
        "#;
        let sections = parse_script(script).unwrap();
        let names: Vec<_> = sections
            .iter()
            .map(|s| s.as_prim().unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["parameter", "storage", "code"]);
        assert_eq!(
            sections[1].as_prim().unwrap().args[0].to_string(),
            "pair (address %admin) (nat %counter)"
        );
    }

    #[test]
    fn parses_braced_scripts() {
        let sections =
            parse_script("{ parameter unit ; storage unit ; code { CDR ; NIL operation ; PAIR } }")
                .unwrap();
        assert_eq!(sections.len(), 3);
    }

    #[test]
    fn reports_parse_errors() {
        let err = parse_expr("Pair (1 2").unwrap_err();
        assert!(matches!(err, MichelineError::Parse(_)));
        assert!(parse_script("storage unit ; }").is_err());
    }
}
