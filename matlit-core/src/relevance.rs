//! Relevance Filter: asks a language model whether each candidate is about
//! the target material, stopping as soon as enough papers are accepted.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RelevanceConfig;
use crate::error::ApiError;
use crate::retry::RetryPolicy;
use crate::types::{MaterialRecord, PaperCandidate, RelevanceVerdict, VerdictOrigin};

/// A single classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub paper_id: String,
    pub prompt: String,
}

/// A language model that answers classification prompts with raw text.
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, ApiError>;
}

/// Build the fixed classification prompt for one candidate.
pub fn build_prompt(material: &MaterialRecord, candidate: &PaperCandidate) -> String {
    let formula = &material.formula;
    let abstract_text = candidate
        .abstract_text
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or("(no abstract available)");
    let venue = candidate.venue.as_deref().unwrap_or("unknown venue");
    let year = candidate
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "unknown year".to_string());

    format!(
        r#"You are a materials science expert screening literature for the material {formula} ({material}).

Decide whether the paper below is an original research article that studies {formula} itself, or {formula} doped, modified, or in a composite.
Review articles, conference abstracts, editorials and papers that only mention {formula} in passing are NOT relevant.

Title: {title}
Venue: {venue} ({year})
Abstract: {abstract_text}

Score the paper from 0 to 10:
- 9-10: experimental or computational study directly on {formula}
- 7-8: highly relevant research paper
- 5-6: moderately relevant research paper
- 1-4: weakly relevant
- 0: review, low-quality venue, or unrelated

Answer with a single JSON object and nothing else:
{{"relevant": true or false, "score": <0-10>, "reason": "<one sentence>"}}"#,
        material = material.describe(),
        title = candidate.title,
    )
}

/// Interpret raw model text as a verdict. Never fails: anything that is not
/// a well-formed answer is a negative `Unparsable` verdict.
pub fn parse_verdict(raw: &str, min_score: f32) -> RelevanceVerdict {
    let Some(object) = first_json_object(strip_code_fences(raw)) else {
        return RelevanceVerdict::rejected(
            VerdictOrigin::Unparsable,
            format!("no JSON object in model answer: {}", preview(raw)),
        );
    };
    let Some(relevant) = object.get("relevant").and_then(Value::as_bool) else {
        return RelevanceVerdict::rejected(
            VerdictOrigin::Unparsable,
            "model answer has no boolean 'relevant' field",
        );
    };

    let score = object.get("score").and_then(|s| match s {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(text) => text.trim().parse::<f32>().ok(),
        _ => None,
    });
    let rationale = ["reason", "rationale"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string();

    let below_threshold = score.is_some_and(|s| s < min_score);
    RelevanceVerdict {
        relevant: relevant && !below_threshold,
        score,
        rationale,
        origin: VerdictOrigin::Model,
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.rsplit_once("```").map_or(body, |(inner, _)| inner).trim()
}

fn first_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let mut search_from = 0;
    while let Some(pos) = text[search_from..].find('{') {
        let start = search_from + pos;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
        search_from = start + 1;
    }
    None
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > 80 {
        format!("{}...", trimmed.chars().take(80).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// Verdicts for a candidate list, index-aligned with the candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// `None` for candidates never evaluated.
    pub verdicts: Vec<Option<RelevanceVerdict>>,
}

impl FilterOutcome {
    /// Indices of accepted candidates, in search order.
    pub fn accepted_indices(&self) -> Vec<usize> {
        self.verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_ref().is_some_and(|v| v.relevant))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn evaluated(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_some()).count()
    }

    /// Length of the evaluated prefix; evaluation always proceeds in order.
    pub fn evaluated_prefix(&self) -> usize {
        self.verdicts
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.verdicts.len())
    }
}

pub struct RelevanceFilter {
    classifier: Arc<dyn RelevanceClassifier>,
    config: RelevanceConfig,
    retry: RetryPolicy,
}

impl RelevanceFilter {
    pub fn new(
        classifier: Arc<dyn RelevanceClassifier>,
        config: RelevanceConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            classifier,
            config,
            retry,
        }
    }

    /// Evaluate candidates in order until `target` are accepted.
    ///
    /// Each wave holds `min(concurrency, target - accepted)` candidates, so
    /// the number accepted can never exceed `target`.
    pub async fn filter(
        &self,
        material: &MaterialRecord,
        candidates: &[PaperCandidate],
        target: usize,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            verdicts: vec![None; candidates.len()],
        };
        self.extend(material, candidates, &mut outcome, target).await;
        outcome
    }

    /// Continue after the last evaluated candidate until `additional` more
    /// are accepted or the candidates run out. Returns the indices accepted
    /// by this call, in search order.
    pub async fn extend(
        &self,
        material: &MaterialRecord,
        candidates: &[PaperCandidate],
        outcome: &mut FilterOutcome,
        additional: usize,
    ) -> Vec<usize> {
        outcome.verdicts.resize(candidates.len(), None);
        let mut newly_accepted = Vec::new();
        let mut next = outcome.evaluated_prefix();
        let concurrency = self.config.concurrency.max(1);

        while newly_accepted.len() < additional && next < candidates.len() {
            let wave = concurrency.min(additional - newly_accepted.len());
            let end = (next + wave).min(candidates.len());
            debug!(
                from = next + 1,
                to = end,
                accepted = newly_accepted.len(),
                additional,
                "Evaluating wave"
            );

            let results = join_all(
                candidates[next..end]
                    .iter()
                    .map(|candidate| self.evaluate(material, candidate)),
            )
            .await;

            for (offset, verdict) in results.into_iter().enumerate() {
                if verdict.relevant {
                    newly_accepted.push(next + offset);
                }
                outcome.verdicts[next + offset] = Some(verdict);
            }
            next = end;
        }

        info!(
            evaluated = next,
            accepted = newly_accepted.len(),
            additional,
            candidates = candidates.len(),
            "Relevance filtering complete"
        );
        newly_accepted
    }

    /// Classify one candidate. Failures become negative verdicts.
    pub async fn evaluate(
        &self,
        material: &MaterialRecord,
        candidate: &PaperCandidate,
    ) -> RelevanceVerdict {
        let request = ClassificationRequest {
            paper_id: candidate.paper_id.clone(),
            prompt: build_prompt(material, candidate),
        };
        match self
            .retry
            .run("relevance_classification", || self.classifier.classify(&request))
            .await
        {
            Ok(raw) => {
                let verdict = parse_verdict(&raw, self.config.min_score);
                if verdict.origin == VerdictOrigin::Unparsable {
                    warn!(paper_id = %candidate.paper_id, "Unparsable relevance answer");
                }
                debug!(
                    paper_id = %candidate.paper_id,
                    relevant = verdict.relevant,
                    score = ?verdict.score,
                    "Classified candidate"
                );
                verdict
            }
            Err(e) => {
                warn!(paper_id = %candidate.paper_id, error = %e, "Relevance classification failed");
                RelevanceVerdict::rejected(VerdictOrigin::CallFailed, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MaterialId;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_parse_plain_json() {
        let v = parse_verdict(r#"{"relevant": true, "score": 8.5, "reason": "direct study"}"#, 5.0);
        assert!(v.relevant);
        assert_eq!(v.score, Some(8.5));
        assert_eq!(v.rationale, "direct study");
        assert_eq!(v.origin, VerdictOrigin::Model);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"relevant\": true, \"score\": 9, \"reason\": \"ok\"}\n```";
        let v = parse_verdict(raw, 5.0);
        assert!(v.relevant);
        assert_eq!(v.score, Some(9.0));
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let raw = "Sure! Here is my answer: {\"relevant\": false, \"reason\": \"review\"} Hope that helps {x}";
        let v = parse_verdict(raw, 5.0);
        assert!(!v.relevant);
        assert_eq!(v.origin, VerdictOrigin::Model);
        assert_eq!(v.rationale, "review");
    }

    #[test]
    fn test_low_score_forces_rejection() {
        let v = parse_verdict(r#"{"relevant": true, "score": 3}"#, 5.0);
        assert!(!v.relevant);
        assert_eq!(v.origin, VerdictOrigin::Model);
    }

    #[test]
    fn test_string_score_is_accepted() {
        let v = parse_verdict(r#"{"relevant": true, "score": "7"}"#, 5.0);
        assert!(v.relevant);
        assert_eq!(v.score, Some(7.0));
    }

    #[test]
    fn test_unparsable_fails_closed() {
        for raw in [
            "",
            "yes, relevant",
            "{\"relevant\": \"yes\"}",
            "{\"score\": 10}",
            "[true]",
            "{broken",
        ] {
            let v = parse_verdict(raw, 5.0);
            assert!(!v.relevant, "accepted {raw:?}");
            assert_eq!(v.origin, VerdictOrigin::Unparsable, "origin for {raw:?}");
        }
    }

    #[test]
    fn test_prompt_mentions_material_and_paper() {
        let material = MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3");
        let paper = PaperCandidate::new("p1", "Magnetic order in YFeO3").with_abstract("We study...");
        let prompt = build_prompt(&material, &paper);
        assert!(prompt.contains("YFeO3 (mp-20738)"));
        assert!(prompt.contains("Magnetic order in YFeO3"));
        assert!(prompt.contains("We study..."));
        assert!(prompt.contains("\"relevant\""));
    }

    /// Accepts the candidates whose paper_id is in `accept`; records call order.
    struct ScriptedClassifier {
        accept: HashSet<String>,
        fail: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClassifier {
        fn new(accept: &[&str]) -> Self {
            Self {
                accept: accept.iter().map(|s| s.to_string()).collect(),
                fail: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RelevanceClassifier for ScriptedClassifier {
        async fn classify(&self, request: &ClassificationRequest) -> Result<String, ApiError> {
            self.calls.lock().unwrap().push(request.paper_id.clone());
            if self.fail.contains(&request.paper_id) {
                return Err(ApiError::Server {
                    provider: "gemini".into(),
                    status: 503,
                });
            }
            let relevant = self.accept.contains(&request.paper_id);
            Ok(format!(
                r#"{{"relevant": {relevant}, "score": {}, "reason": "scripted"}}"#,
                if relevant { 9 } else { 1 }
            ))
        }
    }

    fn candidates(n: usize) -> Vec<PaperCandidate> {
        (1..=n)
            .map(|i| {
                let mut p = PaperCandidate::new(format!("p{i}"), format!("Paper {i}"));
                p.rank = i;
                p
            })
            .collect()
    }

    fn filter_with(classifier: Arc<ScriptedClassifier>, concurrency: usize) -> RelevanceFilter {
        let config = RelevanceConfig {
            concurrency,
            ..Default::default()
        };
        RelevanceFilter::new(classifier, config, RetryPolicy::immediate(2))
    }

    fn material() -> MaterialRecord {
        MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3")
    }

    #[tokio::test]
    async fn test_target_zero_evaluates_nothing() {
        let classifier = Arc::new(ScriptedClassifier::new(&["p1"]));
        let outcome = filter_with(classifier.clone(), 4)
            .filter(&material(), &candidates(5), 0)
            .await;
        assert_eq!(outcome.evaluated(), 0);
        assert!(classifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stops_when_target_reached() {
        // accepts 2, 4, 5, 6, 7 of 8 with target 5 and concurrency 4:
        // wave 1 = 1..=4 (2 accepted), wave 2 = 5..=7 (3 accepted), stop.
        let classifier = Arc::new(ScriptedClassifier::new(&["p2", "p4", "p5", "p6", "p7"]));
        let outcome = filter_with(classifier.clone(), 4)
            .filter(&material(), &candidates(8), 5)
            .await;
        assert_eq!(outcome.accepted_indices(), vec![1, 3, 4, 5, 6]);
        assert_eq!(outcome.evaluated(), 7);
        assert!(outcome.verdicts[7].is_none());
        let mut calls = classifier.calls.lock().unwrap().clone();
        calls.sort();
        assert!(!calls.contains(&"p8".to_string()));
        assert_eq!(calls.len(), 7);
    }

    #[tokio::test]
    async fn test_pool_exhausted_before_target() {
        let classifier = Arc::new(ScriptedClassifier::new(&["p1"]));
        let outcome = filter_with(classifier, 2)
            .filter(&material(), &candidates(3), 5)
            .await;
        assert_eq!(outcome.evaluated(), 3);
        assert_eq!(outcome.accepted_indices(), vec![0]);
    }

    #[tokio::test]
    async fn test_failed_call_is_negative_not_fatal() {
        let mut scripted = ScriptedClassifier::new(&["p1", "p2", "p3"]);
        scripted.fail.insert("p2".into());
        let outcome = filter_with(Arc::new(scripted), 1)
            .filter(&material(), &candidates(3), 3)
            .await;
        let p2 = outcome.verdicts[1].as_ref().unwrap();
        assert!(!p2.relevant);
        assert_eq!(p2.origin, VerdictOrigin::CallFailed);
        assert_eq!(outcome.accepted_indices(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_extend_resumes_after_evaluated_prefix() {
        let classifier = Arc::new(ScriptedClassifier::new(&["p1", "p2", "p4", "p6"]));
        let filter = filter_with(classifier.clone(), 4);
        let papers = candidates(6);

        let mut outcome = filter.filter(&material(), &papers, 2).await;
        assert_eq!(outcome.accepted_indices(), vec![0, 1]);
        assert_eq!(outcome.evaluated_prefix(), 2);

        let more = filter.extend(&material(), &papers, &mut outcome, 2).await;
        assert_eq!(more, vec![3, 5]);
        assert_eq!(outcome.accepted_indices(), vec![0, 1, 3, 5]);
        assert_eq!(outcome.evaluated_prefix(), 6);
        // nothing is classified twice
        assert_eq!(classifier.calls.lock().unwrap().len(), 6);

        let none_left = filter.extend(&material(), &papers, &mut outcome, 1).await;
        assert!(none_left.is_empty());
    }
}
