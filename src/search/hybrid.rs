//! Hybrid retrieval: semantic recall, then structured filtering
//!
//! Filtering only removes candidates. Survivors keep their semantic rank.

use std::collections::HashMap;

use tracing::debug;

use super::error::Result;
use super::index::SemanticIndex;
use crate::core::filter::StructuredFilter;
use crate::core::record::Record;
use crate::core::source::RecordSource;

/// Candidates requested per final result before filtering
pub const DEFAULT_RECALL_MULTIPLIER: usize = 5;

pub struct HybridRetriever<'a> {
    source: &'a dyn RecordSource,
    recall_multiplier: usize,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(source: &'a dyn RecordSource) -> Self {
        Self {
            source,
            recall_multiplier: DEFAULT_RECALL_MULTIPLIER,
        }
    }

    /// Values below 1 are raised to 1
    pub fn with_recall_multiplier(mut self, multiplier: usize) -> Self {
        self.recall_multiplier = multiplier.max(1);
        self
    }

    pub fn recall_budget(&self, topk: usize) -> usize {
        topk.saturating_mul(self.recall_multiplier)
    }

    /// Top `topk` records for `text` that pass `filter`, in semantic order
    pub fn query(
        &self,
        index: &SemanticIndex,
        text: &str,
        filter: Option<&dyn StructuredFilter>,
        topk: usize,
    ) -> Result<Vec<Record>> {
        Ok(self
            .query_scored(index, text, filter, topk)?
            .into_iter()
            .map(|(record, _)| record)
            .collect())
    }

    pub fn query_ids(
        &self,
        index: &SemanticIndex,
        text: &str,
        filter: Option<&dyn StructuredFilter>,
        topk: usize,
    ) -> Result<Vec<i64>> {
        Ok(self
            .query_scored(index, text, filter, topk)?
            .into_iter()
            .map(|(record, _)| record.id)
            .collect())
    }

    /// Like [`query`](Self::query), keeping each record's similarity score
    pub fn query_scored(
        &self,
        index: &SemanticIndex,
        text: &str,
        filter: Option<&dyn StructuredFilter>,
        topk: usize,
    ) -> Result<Vec<(Record, f32)>> {
        if topk == 0 {
            return Ok(Vec::new());
        }

        let budget = if filter.is_some() {
            self.recall_budget(topk)
        } else {
            topk
        };
        let candidates = index.search_scored(text, budget)?;
        debug!("{} semantic candidates for {:?}", candidates.len(), text);

        let ids: Vec<i64> = candidates.iter().map(|(id, _)| *id).collect();
        let mut resolved: HashMap<i64, Record> = self
            .source
            .fetch(&ids)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        // Ids that no longer resolve are dropped
        let ranked: Vec<Record> = ids.iter().filter_map(|id| resolved.remove(id)).collect();

        let survivors = match filter {
            Some(filter) => filter.retain(ranked)?,
            None => ranked,
        };

        // Restore semantic order whatever the filter did; drop anything it invented
        let rank: HashMap<i64, (usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(pos, &(id, score))| (id, (pos, score)))
            .collect();
        let mut survivors: Vec<(usize, Record, f32)> = survivors
            .into_iter()
            .filter_map(|r| rank.get(&r.id).map(|&(pos, score)| (pos, r, score)))
            .collect();
        survivors.sort_by_key(|(pos, _, _)| *pos);
        survivors.dedup_by_key(|(pos, _, _)| *pos);

        Ok(survivors
            .into_iter()
            .take(topk)
            .map(|(_, record, score)| (record, score))
            .collect())
    }
}
