//! Upcodes encoding & decoding for the Yate Engine external module protocol.
//!
//! ## Format of strings and `%`-based encoding
//!
//! Any value that contains special characters (ASCII `<32`)
//! MUST have them converted to `%<upcode>` where `<upcode>` is the character
//! with a numeric value equal with `64 + original ASCII code`.
//!
//! The `%` character itself MUST be converted to a special `%%` representation.
//! Characters with codes `>=32` (except `%`) SHOULD not be escaped but may be so.
//!
//! Anywhere in the line except the initial keyword,
//! a `%` character not followed by a character with
//! a numeric value `>64` (`40H`, `0x40`, `'@'`)
//! or another `%` is an error.
//!
//! _see <https://docs.yate.ro/wiki/External_module_command_flow#Format_of_commands_and_notifications>_.

use std::borrow::Cow;

use thiserror::Error;

/// An error that may occur while decoding `%`-encoded strings.
#[derive(Debug, Error)]
#[error("invalid upcode `{0}`, not in 64..=127 range")]
pub struct DecodeError(char);

fn updecode(ch: char) -> Result<char, DecodeError> {
    if ch == '%' {
        Ok(ch)
    } else {
        match u8::try_from(ch) {
            Ok(code @ 64..=127) => Ok(char::from(code - 64)),
            _ => Err(DecodeError(ch)),
        }
    }
}

/// Decode a `%`-encoded string in the context of value parsing.
pub fn decode(value: &str) -> Result<Cow<'_, str>, DecodeError> {
    if !value.contains('%') {
        return Ok(value.into());
    }

    let mut decoded = String::with_capacity(value.len());
    let mut decoding = false;
    for ch in value.chars() {
        if decoding {
            decoding = false;
            decoded.push(updecode(ch)?);
        } else if ch == '%' {
            decoding = true;
        } else {
            decoded.push(ch);
        }
    }

    if decoding {
        // a trailing lone `%` has no upcode to decode
        return Err(DecodeError('%'));
    }

    Ok(decoded.into())
}

fn upencode(ch: char) -> char {
    if ch == '%' {
        ch
    } else {
        char::from(ch as u8 + 64)
    }
}

/// Encode a `%`-encoded string in the context of value encoding.
pub fn encode(value: &str) -> Cow<'_, str> {
    let pred = |ch: &char| (*ch as u32) < 0x20 || matches!(ch, '%' | ':');
    let encodable = value.chars().filter(pred).count();

    if encodable == 0 {
        return value.into();
    }

    let mut encoded = String::with_capacity(value.len() + encodable);
    for ch in value.chars() {
        if pred(&ch) {
            encoded.push('%');
            encoded.push(upencode(ch));
        } else {
            encoded.push(ch);
        }
    }

    encoded.into()
}

/// Split a whole record line on `:` and decode every field.
pub fn split(line: &str) -> Result<Vec<String>, DecodeError> {
    line.split(':')
        .map(|field| decode(field).map(Cow::into_owned))
        .collect()
}

/// Encode every field and join them into a record line with `:`.
pub fn join<I>(fields: I) -> String
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fields
        .into_iter()
        .map(|field| encode(field.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}
