//! Metadata constraints applied to candidates before similarity ranking.

use std::collections::BTreeMap;

use crate::corpus::TimeOfDay;

use super::FieldValue;

/// A single metadata constraint on an indexed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// The named text field equals the given value exactly.
    TextEquals { field: String, value: String },
    /// The named flag field is present and true.
    FlagSet { field: String },
    /// The document's `opens`/`closes` range covers the given time of day.
    OpenDuring { minutes: u16 },
}

/// Conjunction of constraints. An empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPredicate {
    constraints: Vec<Constraint>,
}

impl SearchPredicate {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn text_equals(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.constraints.push(Constraint::TextEquals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[inline]
    pub fn flag_set(&mut self, field: impl Into<String>) -> &mut Self {
        self.constraints.push(Constraint::FlagSet {
            field: field.into(),
        });
        self
    }

    #[inline]
    pub fn open_during(&mut self, time: TimeOfDay) -> &mut Self {
        self.constraints.push(Constraint::OpenDuring {
            minutes: time.minutes_from_midnight(),
        });
        self
    }

    /// Whether a document's metadata satisfies every constraint.
    pub fn matches(&self, fields: &BTreeMap<String, FieldValue>) -> bool {
        self.constraints.iter().all(|constraint| match constraint {
            Constraint::TextEquals { field, value } => {
                matches!(fields.get(field), Some(FieldValue::Text(t)) if t == value)
            }
            Constraint::FlagSet { field } => {
                matches!(fields.get(field), Some(FieldValue::Flag(true)))
            }
            Constraint::OpenDuring { minutes } => {
                let minutes = f64::from(*minutes);
                let opens = fields.get("opens").and_then(FieldValue::as_number);
                let closes = fields.get("closes").and_then(FieldValue::as_number);
                match (opens, closes) {
                    (Some(opens), Some(closes)) => opens <= minutes && minutes <= closes,
                    _ => false,
                }
            }
        })
    }
}
