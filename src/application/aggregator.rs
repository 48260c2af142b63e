//! Dual-path statistics aggregation
//!
//! Statistics can be computed locally from an already-materialized record
//! set or delegated to the CRM's aggregation endpoint. The route policy is
//! the engine's central correctness rule: a local aggregate is only trusted
//! when the snapshot is known complete relative to the filter being applied.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::account::Account;
use crate::domain::errors::SyncError;
use crate::domain::filter::FilterSpec;
use crate::domain::lead::LeadRecord;
use crate::domain::services::CrmApi;
use crate::domain::stats::{AggregateStats, PipelineCatalog};

/// Which computation path served a statistics request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRoute {
    Local,
    Remote,
}

impl AggregationRoute {
    /// Route policy. An empty filter always runs locally (the full
    /// unfiltered snapshot is already materialized, a remote re-fetch buys
    /// nothing). An active filter over a snapshot known to be partial must
    /// go remote, otherwise totals would be silently wrong. Completeness is
    /// an explicit flag on the snapshot, never inferred here.
    pub fn decide(filter: &FilterSpec, snapshot_complete: bool) -> Self {
        if filter.is_empty() {
            AggregationRoute::Local
        } else if !snapshot_complete {
            AggregationRoute::Remote
        } else {
            AggregationRoute::Local
        }
    }
}

/// Computes aggregate statistics through whichever path the route policy
/// picks; both paths are deterministic for a fixed `(record set, filter)`.
pub struct StatsAggregator {
    api: Arc<dyn CrmApi>,
}

impl StatsAggregator {
    pub fn new(api: Arc<dyn CrmApi>) -> Self {
        Self { api }
    }

    /// Local path: pure recomputation from the materialized record set.
    pub fn local(
        records: &[LeadRecord],
        filter: &FilterSpec,
        catalog: &PipelineCatalog,
    ) -> AggregateStats {
        AggregateStats::compute(records, filter, catalog)
    }

    /// Remote path: the CRM's aggregation endpoint, trusted verbatim.
    pub async fn remote(
        &self,
        account: &Account,
        filter: &FilterSpec,
    ) -> Result<AggregateStats, SyncError> {
        Ok(self.api.fetch_stats(account, filter).await?)
    }

    /// Aggregate via the route policy; returns the stats and which path
    /// produced them.
    pub async fn aggregate(
        &self,
        account: &Account,
        records: &[LeadRecord],
        filter: &FilterSpec,
        catalog: &PipelineCatalog,
        snapshot_complete: bool,
    ) -> Result<(AggregateStats, AggregationRoute), SyncError> {
        let route = AggregationRoute::decide(filter, snapshot_complete);
        debug!(account = %account.account_ref, ?route, "aggregating statistics");
        let stats = match route {
            AggregationRoute::Local => Self::local(records, filter, catalog),
            AggregationRoute::Remote => self.remote(account, filter).await?,
        };
        Ok((stats, route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::DateField;
    use crate::domain::lead::Tag;
    use crate::domain::stats::{StageType, STATUS_LOST, STATUS_WON};
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn lead(id: i64, pipeline_id: i64, status_id: i64, closed_at: Option<i64>) -> LeadRecord {
        LeadRecord {
            id,
            name: format!("lead-{id}"),
            price: 100,
            responsible_user_id: Some(4),
            pipeline_id,
            status_id,
            created_at: 1_700_000_000,
            closed_at,
            tags: vec![Tag { id: 5, name: "VIP".into() }],
            custom_fields: vec![],
            is_deleted: false,
        }
    }

    #[rstest]
    #[case::empty_filter_complete(FilterSpec::default(), true, AggregationRoute::Local)]
    #[case::empty_filter_partial(FilterSpec::default(), false, AggregationRoute::Local)]
    #[case::filtered_complete(
        FilterSpec { pipeline_id: Some(7), ..FilterSpec::default() },
        true,
        AggregationRoute::Local
    )]
    #[case::filtered_partial(
        FilterSpec { pipeline_id: Some(7), ..FilterSpec::default() },
        false,
        AggregationRoute::Remote
    )]
    fn route_policy(
        #[case] filter: FilterSpec,
        #[case] complete: bool,
        #[case] expected: AggregationRoute,
    ) {
        assert_eq!(AggregationRoute::decide(&filter, complete), expected);
    }

    #[test]
    fn closed_january_pipeline_filter_selects_one_of_three() {
        // 2024-01-01 .. 2024-01-31 inclusive, epoch seconds
        let filter = FilterSpec {
            date_field: DateField::Closed,
            date_from: Some(1_704_067_200),
            date_to: Some(1_706_745_599),
            pipeline_id: Some(7),
            ..FilterSpec::default()
        };
        let records = vec![
            // matches: pipeline 7, closed mid-January
            lead(1, 7, STATUS_WON, Some(1_705_000_000)),
            // wrong pipeline
            lead(2, 8, STATUS_WON, Some(1_705_000_000)),
            // right pipeline, closed in February
            lead(3, 7, STATUS_LOST, Some(1_707_000_000)),
        ];

        let stats = StatsAggregator::local(&records, &filter, &PipelineCatalog::default());
        assert_eq!(stats.total, 1);
        assert_eq!(stats.won, 1);
        assert_eq!(stats.pipelines.len(), 1);
        assert_eq!(stats.pipelines[0].pipeline_id, 7);
    }

    #[test]
    fn tag_filter_applies_after_pipeline() {
        let filter = FilterSpec {
            pipeline_id: Some(7),
            tag_ids: BTreeSet::from([99]),
            ..FilterSpec::default()
        };
        let records = vec![lead(1, 7, 10, None)];
        let stats = StatsAggregator::local(&records, &filter, &PipelineCatalog::default());
        assert_eq!(stats.total, 0);
        assert!(stats.pipelines.is_empty());
    }

    proptest! {
        /// Partition invariant: every stage is typed exactly one of
        /// open/won/lost and the totals always add up, for arbitrary
        /// record sets.
        #[test]
        fn totals_partition_for_arbitrary_records(
            specs in prop::collection::vec((1i64..4, prop_oneof![Just(10i64), Just(20), Just(STATUS_WON), Just(STATUS_LOST)]), 0..60)
        ) {
            let records: Vec<LeadRecord> = specs
                .iter()
                .enumerate()
                .map(|(i, (pipeline_id, status_id))| lead(i as i64 + 1, *pipeline_id, *status_id, None))
                .collect();

            let stats = StatsAggregator::local(&records, &FilterSpec::default(), &PipelineCatalog::default());
            prop_assert_eq!(stats.total, stats.won + stats.lost + stats.active);
            prop_assert_eq!(stats.total, records.len() as u64);
            for pipeline in &stats.pipelines {
                prop_assert_eq!(pipeline.total, pipeline.stages.iter().map(|s| s.count).sum::<u64>());
                for stage in &pipeline.stages {
                    prop_assert!(matches!(
                        stage.stage_type,
                        StageType::Open | StageType::Won | StageType::Lost
                    ));
                }
            }
        }
    }
}
