//! Ingestion line parser using nom.
//!
//! Grammar: `<name>:<value>|<type>`. The type token follows the last `|`
//! and has surrounding whitespace and NUL padding removed. The value sits
//! between the last `:` before that `|` and the `|` itself, so a name may
//! contain colons (`host:web1.hits:5|c` names `host:web1.hits`).

use crate::core::{MetricKind, MetricUpdate, Result, TallyError};
use nom::{combinator::all_consuming, number::complete::double, IResult};

/// Parse one raw line into a metric update.
///
/// Checks run in order: shape, then type token, then value, so a line
/// that is wrong in several ways reports the first failing part.
pub fn parse_line(line: &str) -> Result<MetricUpdate> {
    let (name, raw_value, raw_type) = line_parts(line).ok_or_else(|| TallyError::malformed(line))?;

    let type_token = raw_type.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let kind = MetricKind::from_token(type_token)
        .ok_or_else(|| TallyError::UnknownMetricType(type_token.to_string()))?;

    let value = match number(raw_value) {
        Ok((_, value)) if value.is_finite() => value,
        _ => return Err(TallyError::InvalidValue(raw_value.to_string())),
    };

    Ok(MetricUpdate::new(name, value, kind))
}

/// Split a line into name, value and type token at the last separators.
/// `None` when a separator is missing or the name is empty.
fn line_parts(line: &str) -> Option<(&str, &str, &str)> {
    let (head, type_token) = line.rsplit_once('|')?;
    let (name, value) = head.rsplit_once(':')?;
    (!name.is_empty()).then_some((name, value, type_token))
}

/// A complete floating-point literal
fn number(input: &str) -> IResult<&str, f64> {
    all_consuming(double)(input)
}
