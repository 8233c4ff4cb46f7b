// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! printf-style `%` substitution of message templates.
//!
//! Supports `%s %r %d %i %u %f %F %e %E %x %X %o %c %%`, the flags `- 0 + space #`, a field
//! width, a `.precision`, and `%(name)s` lookups when the arguments are named. Length modifiers
//! (`h`, `l`, `L`) are accepted and ignored.

use serde_json::Value;

use crate::event::Args;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("not enough arguments for format string")]
    NotEnoughArguments,

    #[error("not all arguments converted during string formatting")]
    TooManyArguments,

    #[error("format requires a mapping")]
    MappingRequired,

    #[error("cannot use positional conversions with named arguments")]
    MixedArguments,

    #[error("missing key '{0}' in format arguments")]
    MissingKey(String),

    #[error("%{0} format: a number is required, not {1}")]
    NumberRequired(char, &'static str),

    #[error("%c requires an integer or a single character")]
    CharRequired,

    #[error("unsupported format character '{0}'")]
    UnsupportedConversion(char),

    #[error("incomplete format")]
    Incomplete,

    #[error("width or precision too big, the maximum is 65535")]
    WidthTooBig,
}

/// Largest accepted field width or precision. Nothing wider fits in a UDP datagram.
pub const MAX_FIELD_WIDTH: usize = 65_535;

#[derive(Debug, Default)]
struct Directive {
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Substitutes `args` into `template`.
pub fn percent_format(template: &str, args: &Args) -> Result<String, FormatError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_positional = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let key = if chars.peek() == Some(&'(') {
            chars.next();
            let mut key = String::new();
            let mut depth = 1;
            loop {
                match chars.next() {
                    Some('(') => {
                        depth += 1;
                        key.push('(');
                    }
                    Some(')') => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        key.push(')');
                    }
                    Some(other) => key.push(other),
                    None => return Err(FormatError::Incomplete),
                }
            }
            Some(key)
        } else {
            None
        };

        let mut directive = Directive::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => directive.left_align = true,
                '0' => directive.zero_pad = true,
                '+' => directive.plus_sign = true,
                ' ' => directive.space_sign = true,
                '#' => directive.alternate = true,
                _ => break,
            }
            chars.next();
        }
        directive.width = read_number(&mut chars)?;
        if chars.peek() == Some(&'.') {
            chars.next();
            directive.precision = Some(read_number(&mut chars)?.unwrap_or(0));
        }
        while matches!(chars.peek(), Some('h' | 'l' | 'L')) {
            chars.next();
        }

        let conversion = chars.next().ok_or(FormatError::Incomplete)?;
        if conversion == '%' {
            out.push('%');
            continue;
        }

        let value = match key {
            Some(key) => match args {
                Args::Named(map) => map.get(&key).ok_or(FormatError::MissingKey(key))?,
                _ => return Err(FormatError::MappingRequired),
            },
            None => positional(args, &mut next_positional)?,
        };
        out.push_str(&convert(conversion, value, &directive)?);
    }

    if let Args::Positional(values) = args {
        if next_positional < values.len() {
            return Err(FormatError::TooManyArguments);
        }
    }
    Ok(out)
}

fn read_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Option<usize>, FormatError> {
    let mut number: Option<usize> = None;
    while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
        number = Some(number.unwrap_or(0).saturating_mul(10).saturating_add(digit as usize));
        chars.next();
    }
    match number {
        Some(n) if n > MAX_FIELD_WIDTH => Err(FormatError::WidthTooBig),
        _ => Ok(number),
    }
}

fn positional<'a>(args: &'a Args, next: &mut usize) -> Result<&'a Value, FormatError> {
    match args {
        Args::Positional(values) => {
            let value = values.get(*next).ok_or(FormatError::NotEnoughArguments)?;
            *next += 1;
            Ok(value)
        }
        Args::Named(_) => Err(FormatError::MixedArguments),
        Args::None => Err(FormatError::NotEnoughArguments),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_integer(conversion: char, value: &Value) -> Result<i128, FormatError> {
    match value {
        Value::Bool(b) => Ok(i128::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i128::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(i128::from(u))
            } else {
                match conversion {
                    'd' | 'i' | 'u' => Ok(n.as_f64().unwrap_or_default().trunc() as i128),
                    _ => Err(FormatError::NumberRequired(conversion, "float")),
                }
            }
        }
        other => Err(FormatError::NumberRequired(conversion, type_name(other))),
    }
}

fn as_float(conversion: char, value: &Value) -> Result<f64, FormatError> {
    match value {
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        Value::Number(n) => n
            .as_f64()
            .ok_or(FormatError::NumberRequired(conversion, "number")),
        other => Err(FormatError::NumberRequired(conversion, type_name(other))),
    }
}

fn convert(conversion: char, value: &Value, directive: &Directive) -> Result<String, FormatError> {
    let rendered = match conversion {
        's' => truncate(display(value), directive.precision),
        'r' => truncate(value.to_string(), directive.precision),
        'c' => match value {
            Value::String(s) if s.chars().count() == 1 => s.clone(),
            Value::Number(_) | Value::Bool(_) => u32::try_from(as_integer('c', value)?)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .ok_or(FormatError::CharRequired)?,
            _ => return Err(FormatError::CharRequired),
        },
        'd' | 'i' | 'u' => {
            let n = as_integer(conversion, value)?;
            let digits = n.unsigned_abs().to_string();
            return Ok(pad_numeric(n < 0, "", &digits, directive));
        }
        'x' | 'X' | 'o' => {
            let n = as_integer(conversion, value)?;
            let magnitude = n.unsigned_abs();
            let (digits, prefix) = match conversion {
                'x' => (format!("{magnitude:x}"), "0x"),
                'X' => (format!("{magnitude:X}"), "0X"),
                _ => (format!("{magnitude:o}"), "0o"),
            };
            let prefix = if directive.alternate { prefix } else { "" };
            return Ok(pad_numeric(n < 0, prefix, &digits, directive));
        }
        'f' | 'F' => {
            let f = as_float(conversion, value)?;
            let digits = format!("{:.*}", directive.precision.unwrap_or(6), f.abs());
            return Ok(pad_numeric(f.is_sign_negative() && f != 0.0, "", &digits, directive));
        }
        'e' | 'E' => {
            let f = as_float(conversion, value)?;
            let mut digits = exponent(f.abs(), directive.precision.unwrap_or(6));
            if conversion == 'E' {
                digits = digits.to_uppercase();
            }
            return Ok(pad_numeric(f.is_sign_negative() && f != 0.0, "", &digits, directive));
        }
        other => return Err(FormatError::UnsupportedConversion(other)),
    };
    Ok(pad(rendered, directive))
}

fn truncate(s: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s,
    }
}

/// Scientific notation with a signed, at least two digit exponent (`1.500000e+03`).
fn exponent(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or_default();
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

fn pad(s: String, directive: &Directive) -> String {
    let len = s.chars().count();
    match directive.width {
        Some(width) if width > len => {
            let fill = " ".repeat(width - len);
            if directive.left_align {
                s + &fill
            } else {
                fill + &s
            }
        }
        _ => s,
    }
}

fn pad_numeric(negative: bool, prefix: &str, digits: &str, directive: &Directive) -> String {
    let sign = if negative {
        "-"
    } else if directive.plus_sign {
        "+"
    } else if directive.space_sign {
        " "
    } else {
        ""
    };
    let len = sign.len() + prefix.len() + digits.len();
    match directive.width {
        Some(width) if width > len && directive.zero_pad && !directive.left_align => {
            format!("{sign}{prefix}{}{digits}", "0".repeat(width - len))
        }
        _ => pad(format!("{sign}{prefix}{digits}"), directive),
    }
}
