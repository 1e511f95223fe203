//! Paper Search Client: collects candidate papers for a material.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::{ApiError, MatlitError};
use crate::retry::RetryPolicy;
use crate::types::{MaterialRecord, PaperCandidate};

/// Query sent to a scholarly search backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub terms: Vec<String>,
}

impl SearchQuery {
    pub fn for_material(material: &MaterialRecord, config: &SearchConfig) -> Self {
        Self {
            terms: material.search_terms(&config.extra_keywords),
        }
    }

    /// The query as a single space-separated string.
    pub fn text(&self) -> String {
        self.terms.join(" ")
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub papers: Vec<PaperCandidate>,
    /// Offset of the next page, `None` when there are no more results.
    pub next_offset: Option<usize>,
    /// Total number of matches, when the backend reports it.
    pub total: Option<usize>,
}

#[async_trait]
pub trait PaperSearchSource: Send + Sync {
    async fn search_page(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, ApiError>;
}

pub struct PaperSearcher {
    source: Arc<dyn PaperSearchSource>,
    config: SearchConfig,
    retry: RetryPolicy,
}

impl PaperSearcher {
    pub fn new(source: Arc<dyn PaperSearchSource>, config: SearchConfig, retry: RetryPolicy) -> Self {
        Self {
            source,
            config,
            retry,
        }
    }

    /// Collect up to the candidate cap for `desired` papers, in result order.
    ///
    /// Failure of the first page is fatal. A later page failing ends paging
    /// and keeps what was already collected.
    pub async fn collect(
        &self,
        material: &MaterialRecord,
        desired: usize,
    ) -> Result<Vec<PaperCandidate>, MatlitError> {
        let query = SearchQuery::for_material(material, &self.config);
        let cap = self.config.candidate_cap(desired);
        info!(query = %query.text(), cap, "Searching for papers");

        let mut seen = HashSet::new();
        let mut candidates: Vec<PaperCandidate> = Vec::new();
        let mut offset = 0usize;
        let mut first_page = true;

        while candidates.len() < cap {
            let limit = (cap - candidates.len()).min(self.config.page_size);
            let page = match self
                .retry
                .run("paper_search", || self.source.search_page(&query, offset, limit))
                .await
            {
                Ok(page) => page,
                Err(e) if first_page => return Err(MatlitError::Api(e)),
                Err(e) => {
                    warn!(
                        offset,
                        collected = candidates.len(),
                        error = %e,
                        "Search page failed, keeping results collected so far"
                    );
                    break;
                }
            };
            first_page = false;

            debug!(
                offset,
                returned = page.papers.len(),
                total = ?page.total,
                "Received search page"
            );
            if page.papers.is_empty() {
                break;
            }

            for paper in page.papers {
                if candidates.len() >= cap {
                    break;
                }
                if paper.paper_id.is_empty() || !seen.insert(paper.paper_id.clone()) {
                    continue;
                }
                if self.config.require_formula_mention && !mentions_formula(&paper, &material.formula) {
                    continue;
                }
                candidates.push(paper);
            }

            match page.next_offset {
                Some(next) if next > offset => offset = next,
                _ => break,
            }
        }

        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = i + 1;
        }
        info!(candidates = candidates.len(), "Paper search complete");
        Ok(candidates)
    }
}

/// Whether the title or abstract mentions `formula`, ignoring case.
pub fn mentions_formula(paper: &PaperCandidate, formula: &str) -> bool {
    let needle = formula.to_lowercase();
    if needle.is_empty() {
        return true;
    }
    paper.title.to_lowercase().contains(&needle)
        || paper
            .abstract_text
            .as_deref()
            .is_some_and(|a| a.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MaterialId;
    use std::sync::Mutex;

    /// Serves a fixed list of paper IDs in pages, optionally failing one offset.
    struct PagedSource {
        ids: Vec<String>,
        fail_at_offset: Option<usize>,
        requests: Mutex<Vec<(usize, usize)>>,
    }

    impl PagedSource {
        fn new(ids: &[&str]) -> Self {
            Self {
                ids: ids.iter().map(|s| s.to_string()).collect(),
                fail_at_offset: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PaperSearchSource for PagedSource {
        async fn search_page(
            &self,
            _query: &SearchQuery,
            offset: usize,
            limit: usize,
        ) -> Result<SearchPage, ApiError> {
            self.requests.lock().unwrap().push((offset, limit));
            if self.fail_at_offset == Some(offset) {
                return Err(ApiError::Rejected {
                    provider: "s2".into(),
                    status: 400,
                    message: "bad".into(),
                });
            }
            let end = (offset + limit).min(self.ids.len());
            let papers = self.ids[offset.min(end)..end]
                .iter()
                .map(|id| PaperCandidate::new(id.clone(), format!("Paper {id}")))
                .collect();
            Ok(SearchPage {
                papers,
                next_offset: (end < self.ids.len()).then_some(end),
                total: Some(self.ids.len()),
            })
        }
    }

    fn material() -> MaterialRecord {
        MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3")
    }

    fn searcher(source: Arc<PagedSource>, page_size: usize) -> PaperSearcher {
        let config = SearchConfig {
            page_size,
            ..Default::default()
        };
        PaperSearcher::new(source, config, RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_dedup_across_pages_and_ranks() {
        let source = Arc::new(PagedSource::new(&["a", "b", "c", "b", "d", "a", "e"]));
        let results = searcher(source, 3).collect(&material(), 5).await.unwrap();
        let ids: Vec<_> = results.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        let ranks: Vec<_> = results.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_respects_cap() {
        let ids: Vec<String> = (0..300).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let source = Arc::new(PagedSource::new(&refs));
        // desired 5 -> cap 25
        let results = searcher(source.clone(), 10).collect(&material(), 5).await.unwrap();
        assert_eq!(results.len(), 25);
        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_fatal() {
        let mut source = PagedSource::new(&["a", "b"]);
        source.fail_at_offset = Some(0);
        let err = searcher(Arc::new(source), 10)
            .collect(&material(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MatlitError::Api(ApiError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_later_page_failure_keeps_partial_results() {
        let mut source = PagedSource::new(&["a", "b", "c", "d", "e", "f"]);
        source.fail_at_offset = Some(2);
        let results = searcher(Arc::new(source), 2)
            .collect(&material(), 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_source_returns_everything() {
        let source = Arc::new(PagedSource::new(&["a", "b", "c"]));
        let results = searcher(source, 100).collect(&material(), 10).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_page_is_retried() {
        struct LimitedOnce {
            calls: Mutex<u32>,
        }

        #[async_trait]
        impl PaperSearchSource for LimitedOnce {
            async fn search_page(
                &self,
                _query: &SearchQuery,
                _offset: usize,
                _limit: usize,
            ) -> Result<SearchPage, ApiError> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    return Err(ApiError::RateLimited {
                        provider: "s2".into(),
                        retry_after_secs: 0,
                    });
                }
                Ok(SearchPage {
                    papers: vec![PaperCandidate::new("x", "X")],
                    next_offset: None,
                    total: Some(1),
                })
            }
        }

        let source = Arc::new(LimitedOnce {
            calls: Mutex::new(0),
        });
        let searcher = PaperSearcher::new(
            source.clone(),
            SearchConfig::default(),
            RetryPolicy::immediate(3),
        );
        let results = searcher.collect(&material(), 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(*source.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_formula_prefilter() {
        struct Mixed;

        #[async_trait]
        impl PaperSearchSource for Mixed {
            async fn search_page(
                &self,
                _query: &SearchQuery,
                _offset: usize,
                _limit: usize,
            ) -> Result<SearchPage, ApiError> {
                Ok(SearchPage {
                    papers: vec![
                        PaperCandidate::new("1", "Magnetism in yfeo3 crystals"),
                        PaperCandidate::new("2", "Unrelated oxide"),
                        PaperCandidate::new("3", "Perovskites")
                            .with_abstract("We grow YFeO3 films."),
                    ],
                    next_offset: None,
                    total: None,
                })
            }
        }

        let config = SearchConfig {
            require_formula_mention: true,
            ..Default::default()
        };
        let searcher = PaperSearcher::new(Arc::new(Mixed), config, RetryPolicy::immediate(1));
        let results = searcher.collect(&material(), 5).await.unwrap();
        let ids: Vec<_> = results.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn test_query_text() {
        let config = SearchConfig {
            extra_keywords: vec!["synthesis".into()],
            ..Default::default()
        };
        let query = SearchQuery::for_material(&material(), &config);
        assert_eq!(query.text(), "YFeO3 synthesis");
    }
}
