//! Lead/deal records and payload normalization
//!
//! Remote payloads arrive as loosely-typed JSON. Normalization parses each
//! raw record into a strict [`LeadPatch`] and fails closed (malformed payload
//! error) on missing required fields instead of propagating nulls silently.
//! A patch only carries the fields the payload actually supplied, so a
//! partial payload can never erase previously-stored data on upsert.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One CRM tag attached to a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// One custom-field value block on a lead, order preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub field_id: i64,
    pub field_code: Option<String>,
    pub values: Vec<String>,
}

/// Normalized lead/deal record as persisted locally.
///
/// Invariant: `closed_at` is `Some` exactly when the lead sits in a terminal
/// (won/lost) status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Remote id, unique per account.
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub responsible_user_id: Option<i64>,
    pub pipeline_id: i64,
    pub status_id: i64,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds; set only for terminal (won/lost) leads.
    pub closed_at: Option<i64>,
    pub tags: Vec<Tag>,
    pub custom_fields: Vec<CustomFieldValue>,
    /// Soft-delete flag mirrored from remote; records are never dropped
    /// locally.
    pub is_deleted: bool,
}

/// Field-level patch extracted from one raw payload.
///
/// `None` means "not supplied, keep the stored value". For `closed_at` the
/// outer option is "supplied at all" and the inner one is the value, so an
/// explicit `null` (lead reopened) clears the stored timestamp while an
/// absent field preserves it. Same convention for tags: `Some(vec![])`
/// clears, `None` preserves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeadPatch {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<i64>,
    pub responsible_user_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub status_id: Option<i64>,
    pub created_at: Option<i64>,
    pub closed_at: Option<Option<i64>>,
    pub tags: Option<Vec<Tag>>,
    pub custom_fields: Option<Vec<CustomFieldValue>>,
    pub is_deleted: Option<bool>,
}

/// Reason a raw payload failed normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeError {
    pub reason: String,
}

impl NormalizeError {
    fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for NormalizeError {}

/// Epoch seconds from a JSON value that may arrive as a number or a numeric
/// string (the CRM is not consistent about this across endpoints).
fn parse_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_i64(value: &Value) -> Option<i64> {
    parse_epoch(value)
}

fn parse_tags(value: &Value) -> Result<Vec<Tag>, NormalizeError> {
    let items = value
        .as_array()
        .ok_or_else(|| NormalizeError::new("field 'tags' is not an array"))?;
    items
        .iter()
        .map(|item| {
            let id = item
                .get("id")
                .and_then(parse_i64)
                .ok_or_else(|| NormalizeError::new("tag entry missing 'id'"))?;
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| NormalizeError::new("tag entry missing 'name'"))?;
            Ok(Tag { id, name: name.to_string() })
        })
        .collect()
}

fn parse_custom_fields(value: &Value) -> Result<Vec<CustomFieldValue>, NormalizeError> {
    let items = value
        .as_array()
        .ok_or_else(|| NormalizeError::new("field 'custom_fields' is not an array"))?;
    items
        .iter()
        .map(|item| {
            let field_id = item
                .get("field_id")
                .and_then(parse_i64)
                .ok_or_else(|| NormalizeError::new("custom field entry missing 'field_id'"))?;
            let field_code = item
                .get("field_code")
                .and_then(Value::as_str)
                .map(str::to_string);
            let values = item
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| {
                    vals.iter()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(CustomFieldValue { field_id, field_code, values })
        })
        .collect()
}

impl LeadPatch {
    /// Normalize one raw payload. The remote `id` is the only field required
    /// on every payload; everything else is patched when present.
    pub fn from_raw(raw: &Value) -> Result<Self, NormalizeError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| NormalizeError::new("record is not a JSON object"))?;

        let id = obj
            .get("id")
            .and_then(parse_i64)
            .ok_or_else(|| NormalizeError::new("record missing required field 'id'"))?;

        let mut patch = LeadPatch { id, ..LeadPatch::default() };

        if let Some(v) = obj.get("name") {
            patch.name = Some(
                v.as_str()
                    .ok_or_else(|| NormalizeError::new("field 'name' is not a string"))?
                    .to_string(),
            );
        }
        if let Some(v) = obj.get("price") {
            patch.price =
                Some(parse_i64(v).ok_or_else(|| NormalizeError::new("field 'price' is not numeric"))?);
        }
        if let Some(v) = obj.get("responsible_user_id") {
            if !v.is_null() {
                patch.responsible_user_id = Some(
                    parse_i64(v)
                        .ok_or_else(|| NormalizeError::new("field 'responsible_user_id' is not numeric"))?,
                );
            }
        }
        if let Some(v) = obj.get("pipeline_id") {
            patch.pipeline_id = Some(
                parse_i64(v).ok_or_else(|| NormalizeError::new("field 'pipeline_id' is not numeric"))?,
            );
        }
        if let Some(v) = obj.get("status_id") {
            patch.status_id = Some(
                parse_i64(v).ok_or_else(|| NormalizeError::new("field 'status_id' is not numeric"))?,
            );
        }
        if let Some(v) = obj.get("created_at") {
            patch.created_at = Some(
                parse_epoch(v).ok_or_else(|| NormalizeError::new("field 'created_at' is not a timestamp"))?,
            );
        }
        if let Some(v) = obj.get("closed_at") {
            // Explicit null means the lead was reopened; clears the stored value.
            patch.closed_at = Some(if v.is_null() {
                None
            } else {
                Some(
                    parse_epoch(v)
                        .ok_or_else(|| NormalizeError::new("field 'closed_at' is not a timestamp"))?,
                )
            });
        }
        if let Some(v) = obj.get("tags") {
            patch.tags = Some(parse_tags(v)?);
        }
        if let Some(v) = obj.get("custom_fields") {
            patch.custom_fields = Some(parse_custom_fields(v)?);
        }
        if let Some(v) = obj.get("is_deleted") {
            patch.is_deleted = Some(
                v.as_bool()
                    .ok_or_else(|| NormalizeError::new("field 'is_deleted' is not a boolean"))?,
            );
        }

        Ok(patch)
    }

    /// Merge this patch over an existing record, or materialize a new record
    /// when none is stored yet. Creating a record requires name, pipeline,
    /// status and created_at to be present in the payload; updating does not.
    pub fn apply_to(&self, existing: Option<LeadRecord>) -> Result<LeadRecord, NormalizeError> {
        match existing {
            Some(mut record) => {
                debug_assert_eq!(record.id, self.id);
                if let Some(name) = &self.name {
                    record.name = name.clone();
                }
                if let Some(price) = self.price {
                    record.price = price;
                }
                if let Some(user) = self.responsible_user_id {
                    record.responsible_user_id = Some(user);
                }
                if let Some(pipeline_id) = self.pipeline_id {
                    record.pipeline_id = pipeline_id;
                }
                if let Some(status_id) = self.status_id {
                    record.status_id = status_id;
                }
                if let Some(created_at) = self.created_at {
                    record.created_at = created_at;
                }
                if let Some(closed_at) = self.closed_at {
                    record.closed_at = closed_at;
                }
                if let Some(tags) = &self.tags {
                    record.tags = tags.clone();
                }
                if let Some(custom_fields) = &self.custom_fields {
                    record.custom_fields = custom_fields.clone();
                }
                if let Some(is_deleted) = self.is_deleted {
                    record.is_deleted = is_deleted;
                }
                Ok(record)
            }
            None => {
                let missing = |field: &str| {
                    NormalizeError::new(format!("new record {} missing required field '{field}'", self.id))
                };
                Ok(LeadRecord {
                    id: self.id,
                    name: self.name.clone().ok_or_else(|| missing("name"))?,
                    price: self.price.unwrap_or(0),
                    responsible_user_id: self.responsible_user_id,
                    pipeline_id: self.pipeline_id.ok_or_else(|| missing("pipeline_id"))?,
                    status_id: self.status_id.ok_or_else(|| missing("status_id"))?,
                    created_at: self.created_at.ok_or_else(|| missing("created_at"))?,
                    closed_at: self.closed_at.flatten(),
                    tags: self.tags.clone().unwrap_or_default(),
                    custom_fields: self.custom_fields.clone().unwrap_or_default(),
                    is_deleted: self.is_deleted.unwrap_or(false),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_payload() -> Value {
        json!({
            "id": 101,
            "name": "Roof repair",
            "price": 1500,
            "responsible_user_id": 7,
            "pipeline_id": 3,
            "status_id": 31,
            "created_at": 1_704_067_200,
            "closed_at": null,
            "tags": [{"id": 5, "name": "VIP"}],
            "custom_fields": [{"field_id": 9, "field_code": "SOURCE", "values": ["web"]}],
            "is_deleted": false
        })
    }

    #[test]
    fn normalizes_full_payload_into_record() {
        let patch = LeadPatch::from_raw(&full_payload()).unwrap();
        let record = patch.apply_to(None).unwrap();
        assert_eq!(record.id, 101);
        assert_eq!(record.name, "Roof repair");
        assert_eq!(record.price, 1500);
        assert_eq!(record.responsible_user_id, Some(7));
        assert_eq!(record.closed_at, None);
        assert_eq!(record.tags, vec![Tag { id: 5, name: "VIP".into() }]);
        assert_eq!(record.custom_fields[0].field_code.as_deref(), Some("SOURCE"));
    }

    #[test]
    fn missing_id_fails_closed() {
        let err = LeadPatch::from_raw(&json!({"name": "no id"})).unwrap_err();
        assert!(err.reason.contains("'id'"));
    }

    #[test]
    fn non_numeric_price_fails_closed() {
        let err = LeadPatch::from_raw(&json!({"id": 1, "price": "expensive"})).unwrap_err();
        assert!(err.reason.contains("'price'"));
    }

    #[test]
    fn new_record_requires_core_fields() {
        let patch = LeadPatch::from_raw(&json!({"id": 1, "name": "bare"})).unwrap();
        let err = patch.apply_to(None).unwrap_err();
        assert!(err.reason.contains("pipeline_id"));
    }

    #[test]
    fn numeric_strings_are_accepted_for_timestamps() {
        let patch = LeadPatch::from_raw(&json!({"id": 1, "created_at": "1704067200"})).unwrap();
        assert_eq!(patch.created_at, Some(1_704_067_200));
    }

    #[test]
    fn partial_payload_preserves_unsupplied_fields() {
        let base = LeadPatch::from_raw(&full_payload()).unwrap().apply_to(None).unwrap();
        // Re-pull returns the same id with a new price and no tags key at all.
        let partial = LeadPatch::from_raw(&json!({"id": 101, "price": 2000})).unwrap();
        let merged = partial.apply_to(Some(base)).unwrap();
        assert_eq!(merged.price, 2000);
        assert_eq!(merged.tags, vec![Tag { id: 5, name: "VIP".into() }]);
        assert_eq!(merged.name, "Roof repair");
    }

    #[test]
    fn explicit_empty_tags_clears_stored_tags() {
        let base = LeadPatch::from_raw(&full_payload()).unwrap().apply_to(None).unwrap();
        let patch = LeadPatch::from_raw(&json!({"id": 101, "tags": []})).unwrap();
        let merged = patch.apply_to(Some(base)).unwrap();
        assert!(merged.tags.is_empty());
    }

    #[test]
    fn explicit_null_closed_at_reopens_lead() {
        let mut base = LeadPatch::from_raw(&full_payload()).unwrap().apply_to(None).unwrap();
        base.closed_at = Some(1_706_000_000);
        let patch = LeadPatch::from_raw(&json!({"id": 101, "status_id": 31, "closed_at": null})).unwrap();
        let merged = patch.apply_to(Some(base)).unwrap();
        assert_eq!(merged.closed_at, None);

        // Absent closed_at keeps the stored value.
        let untouched = LeadPatch::from_raw(&json!({"id": 101, "price": 10}))
            .unwrap()
            .apply_to(Some(merged.clone()))
            .unwrap();
        assert_eq!(untouched.closed_at, merged.closed_at);
    }
}
