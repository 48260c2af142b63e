//! Aggregate statistics and pipeline/stage metadata
//!
//! [`AggregateStats`] is the shape both computation paths produce: the local
//! recomputation from a cached record set and the remote CRM aggregation
//! endpoint. The [`PipelineCatalog`] supplies stage naming and the
//! open/won/lost typing that partitions every stage into exactly one kind.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::filter::FilterSpec;
use crate::domain::lead::LeadRecord;

/// CRM-wide terminal status ids used when a pipeline's catalog entry is
/// missing (the remote API uses the same pair in every pipeline).
pub const STATUS_WON: i64 = 142;
pub const STATUS_LOST: i64 = 143;

/// Kind of a pipeline stage. Partitions stages: every stage is exactly one
/// of the three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Open,
    Won,
    Lost,
}

/// Per-stage slice of a pipeline distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStat {
    pub status_id: i64,
    pub status_name: String,
    pub count: u64,
    #[serde(rename = "type")]
    pub stage_type: StageType,
}

/// Distribution of matching leads across one pipeline's stages.
///
/// Invariant: `total == stages.iter().map(|s| s.count).sum()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStageStat {
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub stages: Vec<StageStat>,
    pub total: u64,
}

/// Totals plus per-pipeline distribution for one `(record set, filter)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total: u64,
    pub won: u64,
    pub lost: u64,
    pub active: u64,
    pub pipelines: Vec<PipelineStageStat>,
}

impl AggregateStats {
    /// Deterministic aggregation of a record set under a filter.
    ///
    /// This is the single bucketing routine behind every local computation:
    /// the in-memory snapshot path and the store's predicate-pushdown path
    /// both end here, so they cannot disagree. Applying the filter to an
    /// already-filtered set is a no-op, which is what makes the pushdown an
    /// optimization rather than a second semantics.
    ///
    /// Soft-deleted records are excluded; they are mirrored locally for
    /// bookkeeping, not reporting.
    pub fn compute(records: &[LeadRecord], filter: &FilterSpec, catalog: &PipelineCatalog) -> Self {
        // pipeline -> status -> count, in stable id order
        let mut buckets: BTreeMap<i64, BTreeMap<i64, u64>> = BTreeMap::new();
        for record in records {
            if record.is_deleted || !filter.matches(record) {
                continue;
            }
            *buckets
                .entry(record.pipeline_id)
                .or_default()
                .entry(record.status_id)
                .or_default() += 1;
        }

        let mut stats = AggregateStats::default();
        for (pipeline_id, stages) in buckets {
            let mut pipeline_stat = PipelineStageStat {
                pipeline_id,
                pipeline_name: catalog.pipeline_name(pipeline_id),
                stages: Vec::with_capacity(stages.len()),
                total: 0,
            };
            for (status_id, count) in stages {
                let stage_type = catalog.stage_type(pipeline_id, status_id);
                match stage_type {
                    StageType::Won => stats.won += count,
                    StageType::Lost => stats.lost += count,
                    StageType::Open => stats.active += count,
                }
                pipeline_stat.total += count;
                pipeline_stat.stages.push(StageStat {
                    status_id,
                    status_name: catalog.status_name(pipeline_id, status_id),
                    count,
                    stage_type,
                });
            }
            stats.total += pipeline_stat.total;
            stats.pipelines.push(pipeline_stat);
        }
        stats
    }
}

/// Status metadata within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDef {
    pub status_id: i64,
    pub name: String,
    pub stage_type: StageType,
}

/// One configured pipeline with its ordered statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub pipeline_id: i64,
    pub name: String,
    pub statuses: Vec<StatusDef>,
}

/// Pipeline/stage metadata for one account, pulled from the CRM's pipelines
/// resource and consulted by the aggregator for naming and win/loss typing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineCatalog {
    pipelines: HashMap<i64, PipelineDef>,
}

impl PipelineCatalog {
    pub fn new(pipelines: Vec<PipelineDef>) -> Self {
        Self {
            pipelines: pipelines.into_iter().map(|p| (p.pipeline_id, p)).collect(),
        }
    }

    /// Parse one raw pipeline payload item into a [`PipelineDef`].
    ///
    /// Expected shape: `{"id", "name", "statuses": [{"id", "name", "type"}]}`
    /// where `type` is one of `open`/`won`/`lost` and defaults to the fixed
    /// terminal ids when absent.
    pub fn parse_pipeline(raw: &Value) -> Option<PipelineDef> {
        let id = raw.get("id")?.as_i64()?;
        let name = raw.get("name")?.as_str()?.to_string();
        let statuses = raw
            .get("statuses")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let status_id = item.get("id")?.as_i64()?;
                        let status_name = item.get("name")?.as_str()?.to_string();
                        let stage_type = match item.get("type").and_then(Value::as_str) {
                            Some("won") => StageType::Won,
                            Some("lost") => StageType::Lost,
                            Some(_) => StageType::Open,
                            None => default_stage_type(status_id),
                        };
                        Some(StatusDef { status_id, name: status_name, stage_type })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(PipelineDef { pipeline_id: id, name, statuses })
    }

    pub fn pipeline_name(&self, pipeline_id: i64) -> String {
        self.pipelines
            .get(&pipeline_id)
            .map_or_else(|| format!("Pipeline {pipeline_id}"), |p| p.name.clone())
    }

    pub fn status_name(&self, pipeline_id: i64, status_id: i64) -> String {
        self.pipelines
            .get(&pipeline_id)
            .and_then(|p| p.statuses.iter().find(|s| s.status_id == status_id))
            .map_or_else(|| format!("Stage {status_id}"), |s| s.name.clone())
    }

    /// Stage type for a status within a pipeline; unknown statuses fall back
    /// to the CRM-wide terminal ids, everything else is open.
    pub fn stage_type(&self, pipeline_id: i64, status_id: i64) -> StageType {
        self.pipelines
            .get(&pipeline_id)
            .and_then(|p| p.statuses.iter().find(|s| s.status_id == status_id))
            .map_or_else(|| default_stage_type(status_id), |s| s.stage_type)
    }
}

fn default_stage_type(status_id: i64) -> StageType {
    match status_id {
        STATUS_WON => StageType::Won,
        STATUS_LOST => StageType::Lost,
        _ => StageType::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_pipeline_with_typed_statuses() {
        let raw = json!({
            "id": 7,
            "name": "Sales",
            "statuses": [
                {"id": 10, "name": "New", "type": "open"},
                {"id": 142, "name": "Won", "type": "won"},
                {"id": 143, "name": "Lost", "type": "lost"}
            ]
        });
        let def = PipelineCatalog::parse_pipeline(&raw).unwrap();
        assert_eq!(def.name, "Sales");
        assert_eq!(def.statuses.len(), 3);

        let catalog = PipelineCatalog::new(vec![def]);
        assert_eq!(catalog.stage_type(7, 142), StageType::Won);
        assert_eq!(catalog.status_name(7, 10), "New");
    }

    #[test]
    fn unknown_statuses_fall_back_to_fixed_terminal_ids() {
        let catalog = PipelineCatalog::default();
        assert_eq!(catalog.stage_type(1, STATUS_WON), StageType::Won);
        assert_eq!(catalog.stage_type(1, STATUS_LOST), StageType::Lost);
        assert_eq!(catalog.stage_type(1, 55), StageType::Open);
        assert_eq!(catalog.pipeline_name(9), "Pipeline 9");
    }

    #[test]
    fn compute_buckets_by_pipeline_then_stage() {
        use crate::domain::filter::FilterSpec;
        use crate::domain::lead::LeadRecord;

        let lead = |id: i64, pipeline_id: i64, status_id: i64, is_deleted: bool| LeadRecord {
            id,
            name: format!("lead-{id}"),
            price: 0,
            responsible_user_id: None,
            pipeline_id,
            status_id,
            created_at: 0,
            closed_at: None,
            tags: vec![],
            custom_fields: vec![],
            is_deleted,
        };
        let records = vec![
            lead(1, 7, 10, false),
            lead(2, 7, 10, false),
            lead(3, 7, STATUS_WON, false),
            lead(4, 8, STATUS_LOST, false),
            lead(5, 8, 20, true), // soft-deleted, excluded
        ];

        let stats =
            AggregateStats::compute(&records, &FilterSpec::default(), &PipelineCatalog::default());
        assert_eq!(stats.total, 4);
        assert_eq!(stats.won, 1);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.total, stats.won + stats.lost + stats.active);

        assert_eq!(stats.pipelines.len(), 2);
        let sales = &stats.pipelines[0];
        assert_eq!(sales.pipeline_id, 7);
        assert_eq!(sales.total, sales.stages.iter().map(|s| s.count).sum::<u64>());
    }

    #[test]
    fn untyped_status_uses_id_convention() {
        let raw = json!({
            "id": 3,
            "name": "Support",
            "statuses": [{"id": 142, "name": "Done"}]
        });
        let def = PipelineCatalog::parse_pipeline(&raw).unwrap();
        assert_eq!(def.statuses[0].stage_type, StageType::Won);
    }
}
