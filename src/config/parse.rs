//! Typed parsers for configuration argument strings.
//!
//! Every function here follows one contract: parse the entire input or
//! fail, and never hand back a partial value. Numeric parsers report a
//! three-way status — well-formed, out of range (with saturation
//! available to callers that allow it), or malformed — because a
//! configuration that says `4000000000` for a 32-bit knob deserves a
//! different diagnostic than one that says `fast`.
//!
//! Splitting and quoting live here too: arguments are comma-separated at
//! the top brace/quote level, `"..."` strings take backslash escapes
//! (including `\<68 65 78>` hex blocks), and `'...'` strings are raw.

use crate::net::EtherAddr;
use crate::timestamp::Timestamp;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Outcome classification for numeric parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumStatus {
    Ok,
    /// Syntactically a number, but outside the representable range.
    Range,
    /// Not a number at all.
    Format,
}

// --- splitting and quoting ------------------------------------------------

/// Splits a configuration string into comma-separated arguments,
/// respecting quotes and bracket nesting. Whitespace around each
/// argument is trimmed; an all-whitespace input yields no arguments.
pub fn split_args(s: &str) -> Vec<String> {
    split_on(s, Some(','))
}

/// Splits a string into whitespace-separated words at the top level.
pub fn split_words(s: &str) -> Vec<String> {
    split_on(s, None)
}

fn split_on(s: &str, comma: Option<char>) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = s.chars().peekable();
    let mut any = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' && q == '"' {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if depth == 0 && comma == Some(c) => {
                out.push(current.trim().to_string());
                current.clear();
                any = true;
            }
            c if depth == 0 && comma.is_none() && c.is_whitespace() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() || any {
        out.push(last.to_string());
    }
    out
}

/// True iff `s` is a plain word: nonempty, no spaces, quotes, commas, or
/// brackets.
pub fn is_word(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            !c.is_whitespace() && !matches!(c, '"' | '\'' | ',' | '(' | ')' | '[' | ']' | '{' | '}')
        })
}

/// Resolves quoting and escapes. `"..."` segments take backslash escapes
/// including `\<hex bytes>` blocks; `'...'` segments are raw; text
/// outside quotes passes through.
pub fn unquote(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    out.push(c);
                }
            }
            '"' => {
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => match chars.next() {
                            Some('n') => out.push('\n'),
                            Some('r') => out.push('\r'),
                            Some('t') => out.push('\t'),
                            Some('a') => out.push('\x07'),
                            Some('b') => out.push('\x08'),
                            Some('f') => out.push('\x0c'),
                            Some('v') => out.push('\x0b'),
                            Some('0') => out.push('\0'),
                            Some('x') => {
                                let mut v = 0u32;
                                let mut n = 0;
                                while n < 2 {
                                    match chars.peek().and_then(|c| c.to_digit(16)) {
                                        Some(d) => {
                                            v = v * 16 + d;
                                            chars.next();
                                            n += 1;
                                        }
                                        None => break,
                                    }
                                }
                                if let Some(c) = char::from_u32(v) {
                                    out.push(c);
                                }
                            }
                            Some('<') => {
                                // Hex-literal block: pairs of hex digits
                                // up to the closing `>`.
                                let mut nibbles = Vec::new();
                                for c in chars.by_ref() {
                                    if c == '>' {
                                        break;
                                    }
                                    if let Some(d) = c.to_digit(16) {
                                        nibbles.push(d as u8);
                                    }
                                }
                                for pair in nibbles.chunks(2) {
                                    let byte = if pair.len() == 2 { pair[0] * 16 + pair[1] } else { pair[0] };
                                    out.push(byte as char);
                                }
                            }
                            Some(other) => out.push(other),
                            None => {}
                        },
                        other => out.push(other),
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Quotes `s` so that [`unquote`] returns it unchanged.
pub fn quote(s: &str) -> String {
    if is_word(s) && !s.contains('\\') {
        return s.to_string();
    }
    let mut out = String::from("\"");
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// --- booleans and integers ------------------------------------------------

pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "TRUE" | "1" => Some(true),
        "false" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

pub fn unparse_bool(b: bool) -> &'static str {
    if b { "true" } else { "false" }
}

/// Raw magnitude parse: sign, radix prefix (`0x`, `0b`, leading `0` for
/// octal), underscores as group separators.
fn parse_magnitude(s: &str) -> (u64, bool, NumStatus) {
    let (neg, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        (2, bin)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };
    if digits.is_empty() {
        return (0, neg, NumStatus::Format);
    }
    let mut value: u128 = 0;
    let mut saw_digit = false;
    let mut prev_underscore = true; // leading underscore is malformed
    for c in digits.chars() {
        if c == '_' {
            if prev_underscore {
                return (0, neg, NumStatus::Format);
            }
            prev_underscore = true;
            continue;
        }
        let Some(d) = c.to_digit(radix) else {
            return (0, neg, NumStatus::Format);
        };
        prev_underscore = false;
        saw_digit = true;
        value = value * radix as u128 + d as u128;
        if value > u64::MAX as u128 {
            return (u64::MAX, neg, NumStatus::Range);
        }
    }
    if !saw_digit || prev_underscore {
        return (0, neg, NumStatus::Format);
    }
    (value as u64, neg, NumStatus::Ok)
}

/// Parses an unsigned 64-bit integer; `Err` distinguishes range from
/// format problems.
pub fn parse_u64(s: &str) -> Result<u64, NumStatus> {
    match parse_magnitude(s) {
        (_, true, NumStatus::Ok) => Err(NumStatus::Range), // negative
        (v, false, NumStatus::Ok) => Ok(v),
        (_, _, status) => Err(status),
    }
}

/// Parses a signed 64-bit integer.
pub fn parse_i64(s: &str) -> Result<i64, NumStatus> {
    match parse_magnitude(s) {
        (v, false, NumStatus::Ok) => i64::try_from(v).map_err(|_| NumStatus::Range),
        (v, true, NumStatus::Ok) => {
            if v <= i64::MAX as u64 {
                Ok(-(v as i64))
            } else if v == i64::MAX as u64 + 1 {
                Ok(i64::MIN)
            } else {
                Err(NumStatus::Range)
            }
        }
        (_, _, status) => Err(status),
    }
}

macro_rules! narrow_unsigned {
    ($name:ident, $sat:ident, $t:ty) => {
        pub fn $name(s: &str) -> Result<$t, NumStatus> {
            match parse_u64(s) {
                Ok(v) => <$t>::try_from(v).map_err(|_| NumStatus::Range),
                Err(e) => Err(e),
            }
        }

        /// Saturating variant: out-of-range values clamp to the nearest
        /// representable value, reported through the status.
        pub fn $sat(s: &str) -> ($t, NumStatus) {
            match parse_magnitude(s) {
                (_, true, NumStatus::Ok) => (0, NumStatus::Range),
                (v, false, NumStatus::Ok) => match <$t>::try_from(v) {
                    Ok(v) => (v, NumStatus::Ok),
                    Err(_) => (<$t>::MAX, NumStatus::Range),
                },
                (_, false, NumStatus::Range) => (<$t>::MAX, NumStatus::Range),
                (_, true, NumStatus::Range) => (0, NumStatus::Range),
                (_, _, status) => (0, status),
            }
        }
    };
}

narrow_unsigned!(parse_u8, parse_u8_saturating, u8);
narrow_unsigned!(parse_u16, parse_u16_saturating, u16);
narrow_unsigned!(parse_u32, parse_u32_saturating, u32);

pub fn parse_i32(s: &str) -> Result<i32, NumStatus> {
    match parse_i64(s) {
        Ok(v) => i32::try_from(v).map_err(|_| NumStatus::Range),
        Err(e) => Err(e),
    }
}

pub fn parse_i32_saturating(s: &str) -> (i32, NumStatus) {
    match parse_i64(s) {
        Ok(v) => match i32::try_from(v) {
            Ok(v) => (v, NumStatus::Ok),
            Err(_) => (if v > 0 { i32::MAX } else { i32::MIN }, NumStatus::Range),
        },
        Err(NumStatus::Range) => {
            let neg = s.starts_with('-');
            (if neg { i32::MIN } else { i32::MAX }, NumStatus::Range)
        }
        Err(e) => (0, e),
    }
}

pub fn parse_u64_saturating(s: &str) -> (u64, NumStatus) {
    match parse_magnitude(s) {
        (_, true, NumStatus::Ok | NumStatus::Range) => (0, NumStatus::Range),
        (v, false, NumStatus::Ok) => (v, NumStatus::Ok),
        (_, false, NumStatus::Range) => (u64::MAX, NumStatus::Range),
        (_, _, status) => (0, status),
    }
}

// --- reals ----------------------------------------------------------------

/// Decomposed `[+-]digits[.digits][e[+-]digits]`.
struct RealParts {
    negative: bool,
    mantissa: u128,
    /// Power of ten the mantissa must be multiplied by.
    exponent: i32,
    overflowed: bool,
}

fn parse_real_parts(s: &str) -> Result<RealParts, NumStatus> {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut mantissa: u128 = 0;
    let mut exponent: i32 = 0;
    let mut overflowed = false;
    let mut saw_digit = false;
    let mut after_dot = false;
    let mut chars = rest.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '0'..='9' => {
                chars.next();
                saw_digit = true;
                if mantissa > (u128::MAX - 9) / 10 {
                    // Further digits only shift the scale.
                    overflowed = true;
                    if !after_dot {
                        exponent += 1;
                    }
                } else {
                    mantissa = mantissa * 10 + (c as u8 - b'0') as u128;
                    if after_dot {
                        exponent -= 1;
                    }
                }
            }
            '.' if !after_dot => {
                chars.next();
                after_dot = true;
            }
            'e' | 'E' => {
                chars.next();
                let exp_str: String = chars.collect();
                if exp_str.is_empty() {
                    return Err(NumStatus::Format);
                }
                let e: i32 = exp_str.parse().map_err(|_| NumStatus::Format)?;
                exponent = exponent.saturating_add(e);
                break;
            }
            _ => return Err(NumStatus::Format),
        }
    }
    if !saw_digit {
        return Err(NumStatus::Format);
    }
    Ok(RealParts { negative, mantissa, exponent, overflowed })
}

fn pow10_u128(e: u32) -> Option<u128> {
    10u128.checked_pow(e)
}

/// Parses a real number into an integer scaled by `10^frac_digits`.
/// Extra fractional digits truncate toward zero.
pub fn parse_real(s: &str, frac_digits: u32) -> Result<i64, NumStatus> {
    let parts = parse_real_parts(s)?;
    if parts.overflowed {
        return Err(NumStatus::Range);
    }
    let shift = parts.exponent + frac_digits as i32;
    let scaled: u128 = if shift >= 0 {
        let m = pow10_u128(shift as u32).ok_or(NumStatus::Range)?;
        parts.mantissa.checked_mul(m).ok_or(NumStatus::Range)?
    } else {
        let d = pow10_u128((-shift) as u32).ok_or(NumStatus::Range)?;
        parts.mantissa / d
    };
    if parts.negative {
        if scaled > i64::MAX as u128 + 1 {
            return Err(NumStatus::Range);
        }
        Ok((scaled as i128).wrapping_neg() as i64)
    } else {
        i64::try_from(scaled).map_err(|_| NumStatus::Range)
    }
}

/// Renders a scaled real so that `parse_real` round-trips it exactly.
pub fn unparse_real(value: i64, frac_digits: u32) -> String {
    let scale = 10i64.pow(frac_digits);
    let sign = if value < 0 { "-" } else { "" };
    let mag = value.unsigned_abs();
    let int = mag / scale as u64;
    let frac = mag % scale as u64;
    if frac == 0 {
        format!("{sign}{int}")
    } else {
        let mut frac_str = format!("{frac:0width$}", width = frac_digits as usize);
        while frac_str.ends_with('0') {
            frac_str.pop();
        }
        format!("{sign}{int}.{frac_str}")
    }
}

/// Parses a nonnegative real into an integer scaled by `2^frac_bits`,
/// rounding to nearest.
pub fn parse_real2(s: &str, frac_bits: u32) -> Result<u64, NumStatus> {
    let parts = parse_real_parts(s)?;
    if parts.negative && parts.mantissa != 0 {
        return Err(NumStatus::Range);
    }
    if parts.overflowed {
        return Err(NumStatus::Range);
    }
    let factor = 1u128.checked_shl(frac_bits).ok_or(NumStatus::Range)?;
    let shifted = parts.mantissa.checked_mul(factor).ok_or(NumStatus::Range)?;
    let scaled: u128 = if parts.exponent >= 0 {
        let m = pow10_u128(parts.exponent as u32).ok_or(NumStatus::Range)?;
        shifted.checked_mul(m).ok_or(NumStatus::Range)?
    } else {
        let d = pow10_u128((-parts.exponent) as u32).ok_or(NumStatus::Range)?;
        (shifted + d / 2) / d
    };
    u64::try_from(scaled).map_err(|_| NumStatus::Range)
}

/// Renders a fixed-point value exactly (binary fractions have finite
/// decimal expansions).
pub fn unparse_real2(value: u64, frac_bits: u32) -> String {
    let int = value >> frac_bits;
    let mask = (1u64 << frac_bits).wrapping_sub(1);
    let mut rem = value & mask;
    if frac_bits == 0 || rem == 0 {
        return int.to_string();
    }
    let mut out = format!("{int}.");
    while rem != 0 {
        rem *= 10;
        out.push(char::from(b'0' + (rem >> frac_bits) as u8));
        rem &= mask;
    }
    out
}

// --- seconds and bandwidth ------------------------------------------------

/// Unit suffixes in longest-match-first order: `(suffix, num, den)` such
/// that one unit equals `num/den` seconds.
const SECONDS_UNITS: &[(&str, u64, u64)] = &[
    ("nsec", 1, 1_000_000_000),
    ("usec", 1, 1_000_000),
    ("msec", 1, 1_000),
    ("sec", 1, 1),
    ("min", 60, 1),
    ("day", 86_400, 1),
    ("ns", 1, 1_000_000_000),
    ("us", 1, 1_000_000),
    ("ms", 1, 1_000),
    ("hr", 3_600, 1),
    ("s", 1, 1),
    ("m", 60, 1),
    ("h", 3_600, 1),
    ("d", 86_400, 1),
];

/// Parses a nonnegative duration: a real number with an optional unit
/// suffix (`ns`, `us`, `ms`, `s`, `sec`, `m`, `min`, `h`, `hr`, `d`,
/// `day`; SI sub-multiples spelled as their own units). No suffix means
/// seconds.
pub fn parse_seconds(s: &str) -> Result<Timestamp, NumStatus> {
    let trimmed = s.trim();
    let (number, num, den) = match SECONDS_UNITS
        .iter()
        .find(|(suffix, _, _)| trimmed.ends_with(suffix))
    {
        Some((suffix, num, den)) => (trimmed[..trimmed.len() - suffix.len()].trim_end(), *num, *den),
        None => (trimmed, 1, 1),
    };
    let nsec_per_unit = parse_real(number, 9)?;
    if nsec_per_unit < 0 {
        return Err(NumStatus::Range);
    }
    let total = (nsec_per_unit as i128)
        .checked_mul(num as i128)
        .ok_or(NumStatus::Range)?
        / den as i128;
    let sec = total / 1_000_000_000;
    let nsec = (total % 1_000_000_000) as u32;
    i64::try_from(sec).map(|sec| Timestamp::new(sec, nsec)).map_err(|_| NumStatus::Range)
}

/// Renders a duration so that `parse_seconds` round-trips it.
pub fn unparse_seconds(t: Timestamp) -> String {
    if t.nsec() == 0 {
        format!("{}s", t.sec())
    } else {
        let mut frac = format!("{:09}", t.nsec());
        while frac.ends_with('0') {
            frac.pop();
        }
        format!("{}.{}s", t.sec(), frac)
    }
}

/// Parses a bandwidth into bytes per second. Suffixes `baud`, `bps`, and
/// `b/s` count bits; `Bps` and `B/s` count bytes; each takes an optional
/// `k`, `M`, or `G` decimal multiplier. A bare number is bytes per
/// second.
pub fn parse_bandwidth(s: &str) -> Result<u64, NumStatus> {
    let trimmed = s.trim();
    const SUFFIXES: &[(&str, bool)] = &[
        ("baud", true),
        ("bps", true),
        ("b/s", true),
        ("Bps", false),
        ("B/s", false),
    ];
    let (rest, bits) = match SUFFIXES.iter().find(|(suffix, _)| trimmed.ends_with(suffix)) {
        Some((suffix, bits)) => (&trimmed[..trimmed.len() - suffix.len()], *bits),
        None => (trimmed, false),
    };
    let (number, mult) = match rest.as_bytes().last() {
        Some(b'k') | Some(b'K') => (&rest[..rest.len() - 1], 1_000u64),
        Some(b'M') => (&rest[..rest.len() - 1], 1_000_000),
        Some(b'G') => (&rest[..rest.len() - 1], 1_000_000_000),
        _ => (rest, 1),
    };
    let milli = parse_real(number.trim_end(), 3)?;
    if milli < 0 {
        return Err(NumStatus::Range);
    }
    let scaled = (milli as u128).checked_mul(mult as u128).ok_or(NumStatus::Range)?;
    let denom = if bits { 8_000u128 } else { 1_000 };
    u64::try_from(scaled / denom).map_err(|_| NumStatus::Range)
}

pub fn unparse_bandwidth(bytes_per_sec: u64) -> String {
    format!("{bytes_per_sec}Bps")
}

// --- addresses ------------------------------------------------------------

pub fn parse_ip_address(s: &str) -> Option<Ipv4Addr> {
    // Dotted quad only; name resolution belongs to a name-info service
    // this crate does not carry.
    let mut octets = [0u8; 4];
    let mut n = 0;
    for part in s.split('.') {
        if n == 4 || part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        octets[n] = part.parse().ok()?;
        n += 1;
    }
    (n == 4).then(|| Ipv4Addr::from(octets))
}

/// Parses `addr/len` or `addr/mask.mask.mask.mask`; a bare address is
/// accepted as a /32 when `allow_bare` is set.
pub fn parse_ip_prefix(s: &str, allow_bare: bool) -> Option<(Ipv4Addr, Ipv4Addr)> {
    match s.split_once('/') {
        Some((addr, mask)) => {
            let addr = parse_ip_address(addr)?;
            if let Some(m) = parse_ip_address(mask) {
                return Some((addr, m));
            }
            let len: u32 = mask.parse().ok()?;
            if len > 32 {
                return None;
            }
            let m = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            Some((addr, Ipv4Addr::from(m)))
        }
        None if allow_bare => Some((parse_ip_address(s)?, Ipv4Addr::from(u32::MAX))),
        None => None,
    }
}

/// Parses the conventional IPv6 text form, `::` compression and embedded
/// IPv4 tail included.
pub fn parse_ip6_address(s: &str) -> Option<Ipv6Addr> {
    s.parse().ok()
}

pub fn parse_ethernet_address(s: &str) -> Option<EtherAddr> {
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_args_respects_nesting_and_quotes() {
        assert_eq!(split_args("a, b, c"), vec!["a", "b", "c"]);
        assert_eq!(split_args("f(1, 2), g"), vec!["f(1, 2)", "g"]);
        assert_eq!(split_args("\"x, y\", z"), vec!["\"x, y\"", "z"]);
        assert_eq!(split_args(""), Vec::<String>::new());
        assert_eq!(split_args("  "), Vec::<String>::new());
        assert_eq!(split_args("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn split_words_at_top_level() {
        assert_eq!(split_words("a b  c"), vec!["a", "b", "c"]);
        assert_eq!(split_words("KEY (a b)"), vec!["KEY", "(a b)"]);
    }

    #[test]
    fn unquote_escapes() {
        assert_eq!(unquote("\"a\\nb\""), "a\nb");
        assert_eq!(unquote("'raw\\n'"), "raw\\n");
        assert_eq!(unquote("\"\\<68 65 78>\""), "hex");
        assert_eq!(unquote("\"\\x41\""), "A");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn quote_round_trips() {
        for s in ["simple", "has space", "has\"quote", "line\nbreak"] {
            assert_eq!(unquote(&quote(s)), s);
        }
    }

    #[test]
    fn integers_with_radix_and_separators() {
        assert_eq!(parse_u32("1_000_000"), Ok(1_000_000));
        assert_eq!(parse_u32("0x10"), Ok(16));
        assert_eq!(parse_u32("0b101"), Ok(5));
        assert_eq!(parse_u32("017"), Ok(15));
        assert_eq!(parse_i32("-42"), Ok(-42));
        assert_eq!(parse_u32("abc"), Err(NumStatus::Format));
        assert_eq!(parse_u32("_1"), Err(NumStatus::Format));
        assert_eq!(parse_u32("1__0"), Err(NumStatus::Format));
        assert_eq!(parse_u32("5000000000"), Err(NumStatus::Range));
        assert_eq!(parse_u32_saturating("5000000000"), (u32::MAX, NumStatus::Range));
        assert_eq!(parse_i32_saturating("-99999999999"), (i32::MIN, NumStatus::Range));
        assert_eq!(parse_i64("-9223372036854775808"), Ok(i64::MIN));
    }

    #[test]
    fn reals_scale_by_decimal_digits() {
        assert_eq!(parse_real("1.5", 3), Ok(1500));
        assert_eq!(parse_real("-0.25", 2), Ok(-25));
        assert_eq!(parse_real("2e3", 0), Ok(2000));
        assert_eq!(parse_real("1.2345e2", 2), Ok(12345));
        assert_eq!(parse_real(".5", 1), Ok(5));
        assert_eq!(parse_real("1.999", 1), Ok(19)); // truncation
        assert_eq!(parse_real("x", 1), Err(NumStatus::Format));
        assert_eq!(parse_real("1e40", 0), Err(NumStatus::Range));
    }

    #[test]
    fn real2_fixed_point() {
        assert_eq!(parse_real2("0.5", 8), Ok(128));
        assert_eq!(parse_real2("1.25", 2), Ok(5));
        assert_eq!(unparse_real2(128, 8), "0.5");
        assert_eq!(parse_real2(&unparse_real2(77, 4), 4), Ok(77));
    }

    #[test]
    fn seconds_units() {
        assert_eq!(parse_seconds("500ms"), Ok(Timestamp::from_msec(500)));
        assert_eq!(parse_seconds("1.5s"), Ok(Timestamp::from_msec(1500)));
        assert_eq!(parse_seconds("2min"), Ok(Timestamp::from_sec(120)));
        assert_eq!(parse_seconds("1h"), Ok(Timestamp::from_sec(3600)));
        assert_eq!(parse_seconds("250us"), Ok(Timestamp::new(0, 250_000)));
        assert_eq!(parse_seconds("3"), Ok(Timestamp::from_sec(3)));
        assert_eq!(parse_seconds("1 day"), Ok(Timestamp::from_sec(86_400)));
        assert!(parse_seconds("fast").is_err());
        assert!(parse_seconds("-1s").is_err());
    }

    #[test]
    fn bandwidth_units() {
        assert_eq!(parse_bandwidth("125000Bps"), Ok(125_000));
        assert_eq!(parse_bandwidth("1Mbps"), Ok(125_000));
        assert_eq!(parse_bandwidth("8kb/s"), Ok(1_000));
        assert_eq!(parse_bandwidth("1.5kBps"), Ok(1_500));
        assert_eq!(parse_bandwidth("9600baud"), Ok(1_200));
        assert_eq!(parse_bandwidth("100"), Ok(100));
        assert!(parse_bandwidth("quick").is_err());
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_ip_address("10.0.0.1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(parse_ip_address("10.0.0"), None);
        assert_eq!(parse_ip_address("10.0.0.256"), None);
        let (a, m) = parse_ip_prefix("192.168.1.0/24", false).unwrap();
        assert_eq!(a, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(m, Ipv4Addr::new(255, 255, 255, 0));
        let (_, m) = parse_ip_prefix("10.0.0.0/255.0.0.0", false).unwrap();
        assert_eq!(m, Ipv4Addr::new(255, 0, 0, 0));
        assert!(parse_ip_prefix("10.0.0.1", false).is_none());
        assert!(parse_ip_prefix("10.0.0.1", true).is_some());
        assert!(parse_ip6_address("::ffff:10.0.0.1").is_some());
        assert!(parse_ethernet_address("aa:bb:cc:dd:ee:ff").is_some());
    }

    #[test]
    fn unparse_round_trips() {
        for v in [0i64, 1, -1, 1500, -2750, 999_999] {
            assert_eq!(parse_real(&unparse_real(v, 3), 3), Ok(v));
        }
        for t in [Timestamp::ZERO, Timestamp::from_msec(500), Timestamp::from_sec(45)] {
            assert_eq!(parse_seconds(&unparse_seconds(t)), Ok(t));
        }
        for b in [0u64, 100, 125_000] {
            assert_eq!(parse_bandwidth(&unparse_bandwidth(b)), Ok(b));
        }
    }
}
