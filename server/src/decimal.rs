//! Text codec for decimal prices.
//!
//! Exchanges quote prices as strings so that no binary-float rounding
//! happens on the wire. Parsing is locale-invariant (`.` is the only
//! decimal point, no grouping separators) and fails closed: anything that
//! is not a plain decimal numeral is an error, never a silent zero.

use rust_decimal::Decimal;
use serde::Serializer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecimalParseError {
    #[error("empty numeral")]
    Empty,

    #[error("malformed numeral \"{0}\"")]
    Malformed(String),

    #[error("numeral \"{0}\" does not fit in a 96-bit decimal")]
    OutOfRange(String),

    #[error("price must be positive, got {0}")]
    NotPositive(Decimal),
}

/// Parses a plain decimal numeral: optional sign, digits, optional `.` and
/// fraction digits. At least one digit is required.
pub fn parse_decimal(text: &str) -> Result<Decimal, DecimalParseError> {
    if text.is_empty() {
        return Err(DecimalParseError::Empty);
    }

    let unsigned = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);

    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (unsigned, ""),
    };

    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if integer.len() + fraction.len() == 0 || !all_digits(integer) || !all_digits(fraction) {
        return Err(DecimalParseError::Malformed(text.to_string()));
    }

    let negative = text.starts_with('-');
    let integer = if integer.is_empty() { "0" } else { integer };
    let mut canonical = String::with_capacity(text.len() + 1);
    if negative {
        canonical.push('-');
    }
    canonical.push_str(integer);
    if !fraction.is_empty() {
        canonical.push('.');
        canonical.push_str(fraction);
    }

    Decimal::from_str_exact(&canonical)
        .map_err(|_| DecimalParseError::OutOfRange(text.to_string()))
}

/// Parses a price numeral and rejects zero and negative values.
pub fn parse_price(text: &str) -> Result<Decimal, DecimalParseError> {
    let value = parse_decimal(text)?;
    if value <= Decimal::ZERO {
        return Err(DecimalParseError::NotPositive(value));
    }
    Ok(value)
}

/// Encodes a decimal into the same text form [`parse_decimal`] accepts.
/// The scale is preserved, so `"0.10000000"` stays `"0.10000000"`.
pub fn format_decimal(value: &Decimal) -> String {
    value.to_string()
}

/// Serializes a decimal in its string form, for `#[serde(serialize_with)]`.
pub fn serialize_str<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_decimal(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_representative_values() {
        let samples = [
            "0",
            "42",
            "67321.5",
            "0.00000001",
            "1.23456789",
            "0.10000000",
            "98765432.12345678",
            "-3.5",
        ];

        for text in samples {
            let value = parse_decimal(text).unwrap();
            let encoded = format_decimal(&value);
            assert_eq!(encoded, text, "encoding changed the text form");
            assert_eq!(parse_decimal(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn integers_and_short_fractions_need_no_padding() {
        let value = Decimal::from(1500);
        assert_eq!(format_decimal(&value), "1500");

        let value = parse_decimal("1.5").unwrap();
        assert_eq!(format_decimal(&value), "1.5");
        assert_eq!(value.scale(), 1);
    }

    #[test]
    fn accepts_leading_or_trailing_point() {
        assert_eq!(parse_decimal(".5").unwrap(), Decimal::new(5, 1));
        assert_eq!(parse_decimal("5.").unwrap(), Decimal::new(5, 0));
        assert_eq!(parse_decimal("+7").unwrap(), Decimal::new(7, 0));
    }

    #[test]
    fn rejects_malformed_numerals() {
        let bad = [
            "", ".", "-", "abc", "1,000.50", "1.2.3", "1e5", " 1", "1 ", "NaN", "Infinity",
            "1_000", "0x1A", "١٢",
        ];

        for text in bad {
            assert!(parse_decimal(text).is_err(), "{text:?} should be rejected");
        }
    }

    #[test]
    fn rejects_out_of_range() {
        let huge = "9".repeat(40);
        assert!(matches!(
            parse_decimal(&huge),
            Err(DecimalParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn price_must_be_positive() {
        assert!(parse_price("0.00000001").is_ok());
        assert_eq!(
            parse_price("0"),
            Err(DecimalParseError::NotPositive(Decimal::ZERO))
        );
        assert!(matches!(
            parse_price("-1.5"),
            Err(DecimalParseError::NotPositive(_))
        ));
    }

    #[test]
    fn serializes_as_string_with_scale() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(serialize_with = "serialize_str")]
            value: Decimal,
        }

        let wrapper = Wrapper {
            value: parse_decimal("12.34000000").unwrap(),
        };
        assert_eq!(
            serde_json::to_string(&wrapper).unwrap(),
            r#"{"value":"12.34000000"}"#
        );
    }
}
