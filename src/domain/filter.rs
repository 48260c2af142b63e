//! Filter predicate over lead records
//!
//! A [`FilterSpec`] is an immutable query used identically by the local
//! (in-memory) and remote (CRM aggregation endpoint) computation paths, so
//! the two can never diverge on what "matches" means.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadRecord;

/// Which date attribute a date-range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    #[default]
    Created,
    Closed,
}

/// Immutable filter over lead records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    pub date_field: DateField,
    /// Inclusive lower bound, epoch seconds.
    pub date_from: Option<i64>,
    /// Inclusive upper bound, epoch seconds.
    pub date_to: Option<i64>,
    pub responsible_user_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    /// Tag intersection: at least one selected tag must be present on the
    /// record. Empty set means no tag filtering.
    pub tag_ids: BTreeSet<i64>,
}

impl FilterSpec {
    /// An empty filter selects every record; callers prefer the local path
    /// for it since the full snapshot is already materialized.
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.responsible_user_id.is_none()
            && self.pipeline_id.is_none()
            && self.tag_ids.is_empty()
    }

    /// Apply the predicates in order: date range (on the field named by
    /// `date_field`), responsible-user equality, pipeline equality, tag
    /// intersection.
    pub fn matches(&self, record: &LeadRecord) -> bool {
        if self.date_from.is_some() || self.date_to.is_some() {
            let value = match self.date_field {
                DateField::Created => Some(record.created_at),
                DateField::Closed => record.closed_at,
            };
            // A record with no closed_at can never match a closed-date range.
            let Some(ts) = value else { return false };
            if self.date_from.is_some_and(|from| ts < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| ts > to) {
                return false;
            }
        }

        if let Some(user) = self.responsible_user_id {
            if record.responsible_user_id != Some(user) {
                return false;
            }
        }

        if let Some(pipeline_id) = self.pipeline_id {
            if record.pipeline_id != pipeline_id {
                return false;
            }
        }

        if !self.tag_ids.is_empty() && !record.tags.iter().any(|t| self.tag_ids.contains(&t.id)) {
            return false;
        }

        true
    }
}
