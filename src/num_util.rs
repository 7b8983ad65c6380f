use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{digit1, hex_digit1, oct_digit1},
    combinator::{all_consuming, map_res, opt, recognize},
    sequence::preceded,
};

use crate::state::Value;

fn magnitude(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |s| {
            u64::from_str_radix(s, 16)
        }),
        map_res(preceded(tag_no_case("0o"), oct_digit1), |s| {
            u64::from_str_radix(s, 8)
        }),
        map_res(
            preceded(
                tag_no_case("0b"),
                recognize(nom::multi::many1(alt((tag("0"), tag("1"))))),
            ),
            |s| u64::from_str_radix(s, 2),
        ),
        map_res(digit1, |s: &str| s.parse::<u64>()),
    ))(input)
}

/// Integer literal with an optional sign and an optional `0x`/`0o`/`0b`
/// prefix, the way the simulator prints immediates and offsets.
pub fn int_literal(input: &str) -> IResult<&str, Value> {
    let (input, sign) = opt(alt((tag("-"), tag("+"))))(input)?;
    let (input, value) = magnitude(input)?;
    let value = value as Value;
    Ok((input, if sign == Some("-") { value.wrapping_neg() } else { value }))
}

pub fn parse_int_auto(text: &str) -> Option<Value> {
    all_consuming(int_literal)(text.trim()).ok().map(|(_, v)| v)
}

/// Hexadecimal with or without the `0x` prefix. Addresses above `i64::MAX`
/// wrap around.
pub fn parse_hex(text: &str) -> Option<Value> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok().map(|v| v as Value)
}

pub fn parse_radix(text: &str, radix: u32) -> Option<Value> {
    match radix {
        16 => parse_hex(text),
        _ => {
            let text = text.trim();
            text.parse::<Value>()
                .ok()
                .or_else(|| u64::from_str_radix(text, radix).ok().map(|v| v as Value))
        }
    }
}
