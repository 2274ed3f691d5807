use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub const ISO8601: &str = "iso8601";
pub const RFC3339: &str = "rfc3339";
pub const RFC2822: &str = "rfc2822";
pub const RFC2822Z: &str = "rfc2822z";
pub const TIMESTAMP_SECS: &str = "unix_timestamp_secs";
pub const TIMESTAMP_MILLIS: &str = "unix_timestamp_millis";
pub const TIMESTAMP_MICROS: &str = "unix_timestamp_micros";
pub const TIMESTAMP_NANOS: &str = "unix_timestamp_nanos";

#[derive(Debug, Error)]
pub enum TimeParseError {
    #[error("incoherent inputs: format `{format}` cannot decode value `{value}`")]
    MismatchedKind { format: String, value: Value },

    #[error("failed to parse `{value}` with format `{format}`: {source}")]
    Unparseable {
        format: String,
        value: String,
        source: chrono::ParseError,
    },

    #[error(
        "unix timestamp `{0}` out of range. Supported timestamps range \
         from `13 Apr 1972 23:59:55` to `16 Mar 2242 12:56:31`"
    )]
    OutOfRange(f64),

    #[error("unsupported timestamp value kind: `{0}`")]
    UnsupportedValue(Value),
}

/// Declared output encoding of a datetime field. Anything that is not one
/// of the reserved names is treated as a strftime-style format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Iso8601,
    Rfc3339,
    Rfc2822,
    Rfc2822z,
    UnixSecs,
    UnixMillis,
    UnixMicros,
    UnixNanos,
    Custom(String),
}

impl TimestampFormat {
    /// None for the empty string, which signals an unconfigured format.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => None,
            ISO8601 => Some(TimestampFormat::Iso8601),
            RFC3339 => Some(TimestampFormat::Rfc3339),
            RFC2822 => Some(TimestampFormat::Rfc2822),
            RFC2822Z => Some(TimestampFormat::Rfc2822z),
            TIMESTAMP_SECS => Some(TimestampFormat::UnixSecs),
            TIMESTAMP_MILLIS => Some(TimestampFormat::UnixMillis),
            TIMESTAMP_MICROS => Some(TimestampFormat::UnixMicros),
            TIMESTAMP_NANOS => Some(TimestampFormat::UnixNanos),
            other => Some(TimestampFormat::Custom(other.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TimestampFormat::Iso8601 => ISO8601,
            TimestampFormat::Rfc3339 => RFC3339,
            TimestampFormat::Rfc2822 => RFC2822,
            TimestampFormat::Rfc2822z => RFC2822Z,
            TimestampFormat::UnixSecs => TIMESTAMP_SECS,
            TimestampFormat::UnixMillis => TIMESTAMP_MILLIS,
            TimestampFormat::UnixMicros => TIMESTAMP_MICROS,
            TimestampFormat::UnixNanos => TIMESTAMP_NANOS,
            TimestampFormat::Custom(s) => s,
        }
    }

    fn unix_scale_nanos(&self) -> Option<i128> {
        match self {
            TimestampFormat::UnixSecs => Some(1_000_000_000),
            TimestampFormat::UnixMillis => Some(1_000_000),
            TimestampFormat::UnixMicros => Some(1_000),
            TimestampFormat::UnixNanos => Some(1),
            _ => None,
        }
    }
}

/// Decodes a raw scalar field value into an instant given its declared
/// encoding. A string value with a unix encoding (or a number with a
/// string encoding) is a hard decode error, not a silent coercion.
pub fn parse_time(value: &Value, format: &TimestampFormat) -> Result<DateTime<Utc>, TimeParseError> {
    match value {
        Value::String(s) => parse_time_str(s, format),
        Value::Number(n) => {
            let Some(scale) = format.unix_scale_nanos() else {
                return Err(TimeParseError::MismatchedKind {
                    format: format.name().to_string(),
                    value: value.clone(),
                });
            };

            // Floats are truncated toward zero before scaling.
            let raw = if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                f.trunc() as i64
            } else {
                return Err(TimeParseError::UnsupportedValue(value.clone()));
            };

            let nanos = (raw as i128)
                .checked_mul(scale)
                .and_then(|n| i64::try_from(n).ok())
                .ok_or(TimeParseError::OutOfRange(raw as f64))?;
            Ok(DateTime::from_timestamp_nanos(nanos))
        }
        other => Err(TimeParseError::UnsupportedValue(other.clone())),
    }
}

fn parse_time_str(s: &str, format: &TimestampFormat) -> Result<DateTime<Utc>, TimeParseError> {
    let unparseable = |source| TimeParseError::Unparseable {
        format: format.name().to_string(),
        value: s.to_string(),
        source,
    };

    match format {
        TimestampFormat::Iso8601 | TimestampFormat::Rfc3339 => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(unparseable),
        // chrono's rfc2822 parser accepts both named obsolete zones and
        // explicit numeric offsets.
        TimestampFormat::Rfc2822 | TimestampFormat::Rfc2822z => DateTime::parse_from_rfc2822(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(unparseable),
        TimestampFormat::Custom(layout) => parse_custom(s, layout).map_err(unparseable),
        _ => Err(TimeParseError::MismatchedKind {
            format: format.name().to_string(),
            value: Value::String(s.to_string()),
        }),
    }
}

fn parse_custom(s: &str, layout: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    // Offset-carrying layouts parse to an absolute instant; offset-less
    // layouts are interpreted as UTC, date-only layouts as midnight UTC.
    DateTime::parse_from_str(s, layout)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, layout).map(|t| t.and_utc()))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, layout)
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight").and_utc())
        })
}

const MIN_TIMESTAMP_SECONDS: i64 = 72_057_595;
const MAX_TIMESTAMP_SECONDS: i64 = 8_589_934_591;

/// Decodes a unix timestamp whose unit is unknown, inferring the unit from
/// the value's magnitude.
pub fn parse_unix_timestamp(timestamp: i64) -> Result<DateTime<Utc>, TimeParseError> {
    const MIN_MILLIS: i64 = MIN_TIMESTAMP_SECONDS * 1000;
    const MAX_MILLIS: i64 = MAX_TIMESTAMP_SECONDS * 1000;
    const MIN_MICROS: i64 = MIN_TIMESTAMP_SECONDS * 1_000_000;
    const MAX_MICROS: i64 = MAX_TIMESTAMP_SECONDS * 1_000_000;
    const MIN_NANOS: i64 = MIN_TIMESTAMP_SECONDS * 1_000_000_000;

    let nanos = match timestamp {
        MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS => timestamp * 1_000_000_000,
        MIN_MILLIS..=MAX_MILLIS => timestamp * 1_000_000,
        MIN_MICROS..=MAX_MICROS => timestamp * 1_000,
        _ if timestamp >= MIN_NANOS => timestamp,
        _ => return Err(TimeParseError::OutOfRange(timestamp as f64)),
    };

    Ok(DateTime::from_timestamp_nanos(nanos))
}

pub fn parse_unix_timestamp_float(timestamp: f64) -> Result<DateTime<Utc>, TimeParseError> {
    const MIN_SECONDS: f64 = MIN_TIMESTAMP_SECONDS as f64;
    const MAX_SECONDS: f64 = MAX_TIMESTAMP_SECONDS as f64;
    const MIN_MILLIS: f64 = MIN_SECONDS * 1000.0;
    const MAX_MILLIS: f64 = MAX_SECONDS * 1000.0;
    const MIN_MICROS: f64 = MIN_SECONDS * 1_000_000.0;
    const MAX_MICROS: f64 = MAX_SECONDS * 1_000_000.0;
    const MIN_NANOS: f64 = MIN_SECONDS * 1_000_000_000.0;
    const MAX_NANOS: f64 = MAX_SECONDS * 1_000_000_000.0;

    let nanos = if (MIN_SECONDS..=MAX_SECONDS).contains(&timestamp) {
        timestamp * 1_000_000_000.0
    } else if (MIN_MILLIS..=MAX_MILLIS).contains(&timestamp) {
        timestamp * 1_000_000.0
    } else if (MIN_MICROS..=MAX_MICROS).contains(&timestamp) {
        timestamp * 1_000.0
    } else if (MIN_NANOS..=MAX_NANOS).contains(&timestamp) {
        timestamp
    } else {
        return Err(TimeParseError::OutOfRange(timestamp));
    };

    Ok(DateTime::from_timestamp_nanos(nanos as i64))
}

/// Decodes a timestamp with no configured output format: strings must be
/// RFC3339, numbers get their unit inferred by magnitude.
pub fn parse_time_auto(value: &Value) -> Result<DateTime<Utc>, TimeParseError> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|source| TimeParseError::Unparseable {
                format: RFC3339.to_string(),
                value: s.clone(),
                source,
            }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                parse_unix_timestamp(i)
            } else if let Some(f) = n.as_f64() {
                parse_unix_timestamp_float(f)
            } else {
                Err(TimeParseError::UnsupportedValue(value.clone()))
            }
        }
        other => Err(TimeParseError::UnsupportedValue(other.clone())),
    }
}
