//! Property-based tests for pipeline components using proptest.

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use matlit_core::config::{RelevanceConfig, SearchConfig};
use matlit_core::layout::safe_filename;
use matlit_core::relevance::parse_verdict;
use matlit_core::{
    ApiError, ClassificationRequest, MaterialId, MaterialRecord, PaperCandidate, PaperSearchSource,
    PaperSearcher, RelevanceClassifier, RelevanceFilter, RetryPolicy, SearchPage, SearchQuery,
    VerdictOrigin,
};

/// Accepts a candidate when its index in `verdicts` is true.
struct TableClassifier {
    verdicts: Vec<bool>,
}

#[async_trait]
impl RelevanceClassifier for TableClassifier {
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, ApiError> {
        let index: usize = request.paper_id.parse().unwrap_or(usize::MAX);
        let relevant = self.verdicts.get(index).copied().unwrap_or(false);
        Ok(format!(r#"{{"relevant": {relevant}, "score": 9}}"#))
    }
}

/// Serves a fixed id list in pages of the requested size.
struct ListSource {
    ids: Vec<String>,
}

#[async_trait]
impl PaperSearchSource for ListSource {
    async fn search_page(
        &self,
        _query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, ApiError> {
        let end = (offset + limit).min(self.ids.len());
        let start = offset.min(end);
        Ok(SearchPage {
            papers: self.ids[start..end]
                .iter()
                .map(|id| PaperCandidate::new(id.clone(), "t"))
                .collect(),
            next_offset: (end < self.ids.len()).then_some(end),
            total: Some(self.ids.len()),
        })
    }
}

fn material() -> MaterialRecord {
    MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3")
}

// --- Material ID normalization ---

proptest! {
    #[test]
    fn material_id_forms_agree(digits in "[0-9]{1,12}") {
        let bare = MaterialId::parse(&digits).unwrap();
        let lower = MaterialId::parse(&format!("mp-{digits}")).unwrap();
        let upper = MaterialId::parse(&format!("MP-{digits}")).unwrap();
        prop_assert_eq!(&bare, &lower);
        prop_assert_eq!(&bare, &upper);
        prop_assert_eq!(bare.as_str(), format!("mp-{digits}"));
    }

    #[test]
    fn material_id_rejects_non_digits(prefix in "[0-9]{0,4}", junk in "[a-zA-Z_ .]{1,4}", suffix in "[0-9]{0,4}") {
        let input = format!("mp-{prefix}{junk}{suffix}");
        // space-only junk at the end would be trimmed away
        prop_assume!(junk.chars().any(|c| c != ' '));
        prop_assert!(MaterialId::parse(&input).is_err());
    }
}

// --- Stopping rule ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn filter_never_exceeds_target(
        verdicts in proptest::collection::vec(any::<bool>(), 0..30),
        target in 0usize..12,
        concurrency in 1usize..6,
    ) {
        let candidates: Vec<PaperCandidate> = (0..verdicts.len())
            .map(|i| {
                let mut p = PaperCandidate::new(i.to_string(), format!("Paper {i}"));
                p.rank = i + 1;
                p
            })
            .collect();
        let relevant_total = verdicts.iter().filter(|v| **v).count();
        let filter = RelevanceFilter::new(
            Arc::new(TableClassifier { verdicts }),
            RelevanceConfig { concurrency, ..Default::default() },
            RetryPolicy::immediate(1),
        );

        let outcome = tokio_test::block_on(filter.filter(&material(), &candidates, target));
        let accepted = outcome.accepted_indices().len();

        prop_assert!(accepted <= target);
        prop_assert_eq!(accepted, target.min(relevant_total));
        if target == 0 {
            prop_assert_eq!(outcome.evaluated(), 0);
        }
        // evaluated candidates form a prefix of the search order
        let evaluated = outcome.evaluated();
        prop_assert!(outcome.verdicts[..evaluated].iter().all(Option::is_some));
        prop_assert!(outcome.verdicts[evaluated..].iter().all(Option::is_none));
    }
}

// --- Deduplication ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn search_results_are_unique_and_first_seen(
        ids in proptest::collection::vec("[a-e]{1,2}", 0..60),
        desired in 0usize..10,
        page_size in 1usize..15,
    ) {
        let searcher = PaperSearcher::new(
            Arc::new(ListSource { ids: ids.clone() }),
            SearchConfig { page_size, ..Default::default() },
            RetryPolicy::immediate(1),
        );
        let results = tokio_test::block_on(searcher.collect(&material(), desired)).unwrap();

        let mut expected = Vec::new();
        let mut seen = HashSet::new();
        for id in &ids {
            if seen.insert(id.clone()) {
                expected.push(id.clone());
            }
        }
        expected.truncate(SearchConfig::default().candidate_cap(desired));

        let got: Vec<String> = results.iter().map(|p| p.paper_id.clone()).collect();
        prop_assert_eq!(got, expected);
        for (i, paper) in results.iter().enumerate() {
            prop_assert_eq!(paper.rank, i + 1);
        }
    }
}

// --- Verdict parsing and file names ---

proptest! {
    #[test]
    fn parse_verdict_never_accepts_without_model_origin(raw in ".{0,200}") {
        let verdict = parse_verdict(&raw, 5.0);
        if verdict.relevant {
            prop_assert_eq!(verdict.origin, VerdictOrigin::Model);
        }
        prop_assert!(verdict.origin != VerdictOrigin::CallFailed);
    }

    #[test]
    fn safe_filename_has_no_reserved_characters(text in ".{0,80}") {
        let safe = safe_filename(&text);
        prop_assert!(!safe.chars().any(|c| "<>:\"/\\|?*".contains(c) || c.is_whitespace() || c.is_control()));
        prop_assert!(!safe.starts_with('.') && !safe.ends_with('.'));
    }
}
