use std::fmt;

use chrono::NaiveDate;

use formkeep_core::{FieldKind, FieldValue};

use crate::resolver::EffectiveFieldConfig;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Why a field is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Required,
    TypeMismatch { expected: &'static str },
    InvalidDate,
    NotAChoice,
    TooLong { max: usize },
    TooManyDecimals { max: u32 },
    /// Messages returned by the backend for this field on a rejected save.
    Rejected(Vec<String>),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::TypeMismatch { expected } => write!(f, "expected {expected}"),
            Self::InvalidDate => write!(f, "invalid date"),
            Self::NotAChoice => write!(f, "not one of the allowed choices"),
            Self::TooLong { max } => write!(f, "longer than {max} characters"),
            Self::TooManyDecimals { max } => write!(f, "more than {max} decimal places"),
            Self::Rejected(messages) => write!(f, "{}", messages.join("; ")),
        }
    }
}

/// Validate one field value against its effective configuration.
/// Pure: the result depends only on the two arguments.
pub fn validate_field(value: &FieldValue, config: &EffectiveFieldConfig) -> Option<FieldError> {
    if value.is_empty() {
        return config.required.then_some(FieldError::Required);
    }

    let mismatch = || {
        Some(FieldError::TypeMismatch {
            expected: config.kind.name(),
        })
    };

    match (&config.kind, value) {
        (FieldKind::Text { max_length }, FieldValue::Text(s)) => match max_length {
            Some(max) if s.chars().count() > *max => Some(FieldError::TooLong { max: *max }),
            _ => None,
        },
        (FieldKind::Number, FieldValue::Integer(_)) => None,
        (FieldKind::Decimal { decimal_places }, v) => {
            let Some(text) = decimal_text(v) else {
                return mismatch();
            };
            match decimal_places {
                Some(max) if fraction_digits(&text) > *max => {
                    Some(FieldError::TooManyDecimals { max: *max })
                }
                _ => None,
            }
        }
        (FieldKind::Date, FieldValue::Text(s)) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .err()
            .map(|_| FieldError::InvalidDate),
        (FieldKind::Choice(choices), v) => {
            if choices.iter().any(|c| &c.value == v) {
                None
            } else {
                Some(FieldError::NotAChoice)
            }
        }
        (FieldKind::MultiChoice(choices), FieldValue::List(items)) => {
            let all_known = items
                .iter()
                .all(|item| choices.iter().any(|c| &c.value == item));
            (!all_known).then_some(FieldError::NotAChoice)
        }
        (FieldKind::Boolean, FieldValue::Boolean(_)) => None,
        (FieldKind::NestedObject, FieldValue::Object(_)) => None,
        (FieldKind::NestedList, FieldValue::List(_)) => None,
        _ => mismatch(),
    }
}

/// Decimal values may arrive as numbers or as numeric text.
fn decimal_text(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Integer(n) => Some(n.to_string()),
        FieldValue::Decimal(d) if d.is_finite() => Some(d.to_string()),
        FieldValue::Text(s) => {
            let trimmed = s.trim();
            trimmed.parse::<f64>().ok().filter(|d| d.is_finite())?;
            Some(trimmed.to_string())
        }
        _ => None,
    }
}

fn fraction_digits(text: &str) -> u32 {
    match text.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}
