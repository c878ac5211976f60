pub mod policy;

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::config::{DisplayConfig, Policy};
use crate::error::{ConfigError, PageError};
use crate::loader::Page;
use crate::store::{PAGE_KEY, ScoredRecord, VectorIndex};
pub use crate::cancel::CancelToken;
pub use policy::{Verdict, classify};

/// A stored page that survived the noise filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub candidate_source: String,
    /// Page of the candidate document, when recorded
    pub candidate_page: Option<u32>,
    pub matched_text: String,
    pub score: f32,
    pub classification: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page_number: u32,
    pub preview_text: String,
    /// Index ranking order, highest score first. Empty means nothing similar.
    pub matches: Vec<Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageReport {
    pub fn is_flagged(&self) -> bool {
        self.matches
            .iter()
            .any(|m| m.classification == Verdict::Plagiarism)
    }
}

#[derive(Debug, Serialize)]
pub struct CheckOutcome {
    /// In document page order
    pub reports: Vec<PageReport>,
    pub cancelled: bool,
    /// Pages never started because the check was cancelled
    pub unchecked: usize,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct CheckSummary {
    pub pages_checked: usize,
    pub pages_flagged: usize,
    pub pages_with_errors: usize,
    pub highest_score: Option<f32>,
}

impl CheckOutcome {
    pub fn summary(&self) -> CheckSummary {
        CheckSummary {
            pages_checked: self.reports.len(),
            pages_flagged: self.reports.iter().filter(|r| r.is_flagged()).count(),
            pages_with_errors: self.reports.iter().filter(|r| r.error.is_some()).count(),
            highest_score: self
                .reports
                .iter()
                .flat_map(|r| r.matches.iter().map(|m| m.score))
                .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s)))),
        }
    }
}

/// Read path: compares each page of a candidate document against the corpus.
pub struct Checker<'a> {
    index: &'a dyn VectorIndex,
    policy: Policy,
    display: DisplayConfig,
    max_concurrent: usize,
    cancel: Option<CancelToken>,
}

impl<'a> Checker<'a> {
    /// Fails if the policy's thresholds are unusable.
    pub fn new(index: &'a dyn VectorIndex, policy: Policy) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self {
            index,
            policy,
            display: DisplayConfig::default(),
            max_concurrent: 1,
            cancel: None,
        })
    }

    pub fn with_display(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    /// Query up to `n` pages at once. Reports still come back in page order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent = n.max(1);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Check every page with the configured policy.
    pub fn check(&self, pages: &[Page]) -> CheckOutcome {
        self.run(pages, &self.policy)
    }

    /// Check with a one-off policy, e.g. to compare classification settings.
    pub fn check_with_policy(
        &self,
        pages: &[Page],
        policy: &Policy,
    ) -> Result<CheckOutcome, ConfigError> {
        policy.validate()?;
        Ok(self.run(pages, policy))
    }

    fn run(&self, pages: &[Page], policy: &Policy) -> CheckOutcome {
        let workers = self.max_concurrent.min(pages.len()).max(1);
        let next = AtomicUsize::new(0);
        let done: Mutex<Vec<(usize, PageReport)>> = Mutex::new(Vec::with_capacity(pages.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.is_cancelled() {
                            break;
                        }
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        let Some(page) = pages.get(i) else { break };
                        record(&done, i, self.check_page(page, policy));
                    }
                });
            }
        });

        let mut done = done.into_inner().unwrap_or_else(PoisonError::into_inner);
        done.sort_by_key(|(i, _)| *i);
        let reports: Vec<PageReport> = done.into_iter().map(|(_, r)| r).collect();

        let unchecked = pages.len() - reports.len();
        let cancelled = unchecked > 0;
        if cancelled {
            warn!(checked = reports.len(), unchecked, "check cancelled, returning partial results");
        }

        let outcome = CheckOutcome {
            reports,
            cancelled,
            unchecked,
        };
        let summary = outcome.summary();
        info!(
            pages = summary.pages_checked,
            flagged = summary.pages_flagged,
            errors = summary.pages_with_errors,
            "check complete"
        );
        outcome
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Query, filter and classify a single page. Failures stay on the page.
    fn check_page(&self, page: &Page, policy: &Policy) -> PageReport {
        let preview_text = truncate_chars(&page.text, self.display.preview_length);

        match self.index.query_similar(&page.text, policy.top_k) {
            Ok(hits) => {
                let matches: Vec<Match> = hits
                    .into_iter()
                    .filter_map(|hit| self.to_match(hit, policy))
                    .collect();
                debug!(page = page.page_number, matches = matches.len(), "checked page");
                PageReport {
                    page_number: page.page_number,
                    preview_text,
                    matches,
                    error: None,
                }
            }
            Err(e) => {
                warn!(page = page.page_number, source_id = %page.source_id, error = %e, "page check failed");
                PageReport {
                    page_number: page.page_number,
                    preview_text,
                    matches: Vec::new(),
                    error: Some(PageError {
                        source_id: page.source_id.clone(),
                        page_number: page.page_number,
                        cause: e.to_string(),
                    }),
                }
            }
        }
    }

    fn to_match(&self, hit: ScoredRecord, policy: &Policy) -> Option<Match> {
        let classification = classify(hit.score, policy.noise_threshold, policy.similarity_threshold);
        if classification == Verdict::Rejected {
            return None;
        }
        Some(Match {
            candidate_source: hit.source().to_string(),
            candidate_page: hit.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok()),
            matched_text: truncate_chars(&hit.text, self.display.match_text_length),
            score: hit.score,
            classification,
        })
    }
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

/// Completed reports are kept even if another worker panicked while holding the lock.
fn record(done: &Mutex<Vec<(usize, PageReport)>>, i: usize, report: PageReport) {
    done.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((i, report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::hashed::HashedEmbedder;
    use crate::error::{EmbeddingError, IndexError};
    use crate::ingest::Ingestor;
    use crate::store::sqlite::SqliteIndex;
    use crate::store::{Metadata, SOURCE_KEY};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Returns canned hits per query text; texts starting with "err" fail.
    #[derive(Default)]
    struct ScriptedIndex {
        hits: HashMap<String, Vec<(String, f32)>>,
        delay_ms: HashMap<String, u64>,
        cancel_on: Option<(String, CancelToken)>,
    }

    impl ScriptedIndex {
        fn with(mut self, query: &str, hits: &[(&str, f32)]) -> Self {
            self.hits.insert(
                query.to_string(),
                hits.iter().map(|(s, score)| (s.to_string(), *score)).collect(),
            );
            self
        }

        fn delayed(mut self, query: &str, ms: u64) -> Self {
            self.delay_ms.insert(query.to_string(), ms);
            self
        }

        /// Trip `token` once `query` has been answered.
        fn cancels_after(mut self, query: &str, token: &CancelToken) -> Self {
            self.cancel_on = Some((query.to_string(), token.clone()));
            self
        }
    }

    impl VectorIndex for ScriptedIndex {
        fn insert(&self, _text: &str, _metadata: Metadata) -> Result<(), IndexError> {
            Ok(())
        }
        fn persist(&self) -> Result<(), IndexError> {
            Ok(())
        }
        fn rollback(&self) -> Result<usize, IndexError> {
            Ok(0)
        }
        fn query_similar(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>, IndexError> {
            if let Some(ms) = self.delay_ms.get(text) {
                std::thread::sleep(Duration::from_millis(*ms));
            }
            if text.starts_with("err") {
                return Err(EmbeddingError::Status(503).into());
            }
            if let Some((query, token)) = &self.cancel_on {
                if query == text {
                    token.cancel();
                }
            }
            let hits = self.hits.get(text).cloned().unwrap_or_default();
            Ok(hits
                .into_iter()
                .take(k)
                .map(|(source, score)| ScoredRecord {
                    text: format!("stored text from {source}"),
                    metadata: Metadata::from([(SOURCE_KEY.to_string(), source)]),
                    score,
                })
                .collect())
        }
        fn count(&self) -> Result<u64, IndexError> {
            Ok(self.hits.len() as u64)
        }
    }

    fn pages(source: &str, texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Page::new(source, i as u32 + 1, *t))
            .collect()
    }

    #[test]
    fn noise_filter_and_classification() {
        let index = ScriptedIndex::default().with(
            "candidate page",
            &[("x.pdf", 0.92), ("y.pdf", 0.75), ("z.pdf", 0.4)],
        );
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["candidate page"]));

        let matches = &outcome.reports[0].matches;
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].candidate_source, "x.pdf");
        assert_eq!(matches[0].classification, Verdict::Plagiarism);
        assert_eq!(matches[1].candidate_source, "y.pdf");
        assert_eq!(matches[1].classification, Verdict::Original);
        assert!(outcome.reports[0].is_flagged());
    }

    #[test]
    fn index_order_is_kept() {
        // Deliberately unsorted; the engine must not re-sort
        let index = ScriptedIndex::default().with("p", &[("b.pdf", 0.7), ("a.pdf", 0.9)]);
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["p"]));
        let sources: Vec<&str> = outcome.reports[0]
            .matches
            .iter()
            .map(|m| m.candidate_source.as_str())
            .collect();
        assert_eq!(sources, vec!["b.pdf", "a.pdf"]);
    }

    #[test]
    fn every_match_respects_thresholds() {
        let index = ScriptedIndex::default().with(
            "p",
            &[("a", 0.61), ("b", 0.6), ("c", 0.8), ("d", 0.81), ("e", 0.99)],
        );
        let policy = Policy {
            top_k: 5,
            ..Policy::default()
        };
        let checker = Checker::new(&index, policy).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["p"]));
        for m in &outcome.reports[0].matches {
            assert!(m.score > policy.noise_threshold);
            assert_eq!(
                m.classification == Verdict::Plagiarism,
                m.score > policy.similarity_threshold
            );
        }
        assert_eq!(outcome.reports[0].matches.len(), 4);
    }

    #[test]
    fn top_k_limits_neighbours() {
        let index = ScriptedIndex::default().with(
            "p",
            &[("a", 0.95), ("b", 0.94), ("c", 0.93), ("d", 0.92)],
        );
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["p"]));
        assert_eq!(outcome.reports[0].matches.len(), 3);
    }

    #[test]
    fn failing_page_is_isolated() {
        let index = ScriptedIndex::default()
            .with("first", &[("a.pdf", 0.9)])
            .with("third", &[("c.pdf", 0.7)]);
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["first", "error page", "third"]));

        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome.reports[0].error.is_none());
        let err = outcome.reports[1].error.as_ref().unwrap();
        assert_eq!(err.page_number, 2);
        assert_eq!(err.source_id, "new.pdf");
        assert!(err.cause.contains("503"));
        assert!(outcome.reports[1].matches.is_empty());
        assert_eq!(outcome.reports[2].matches.len(), 1);
        assert_eq!(outcome.summary().pages_with_errors, 1);
    }

    #[test]
    fn concurrent_check_keeps_page_order() {
        let index = ScriptedIndex::default()
            .with("p1", &[("a", 0.9)])
            .with("p2", &[("b", 0.9)])
            .with("p3", &[("c", 0.9)])
            .delayed("p1", 60)
            .delayed("p2", 30);
        let checker = Checker::new(&index, Policy::default())
            .unwrap()
            .with_concurrency(3);
        let outcome = checker.check(&pages("new.pdf", &["p1", "p2", "p3"]));
        let numbers: Vec<u32> = outcome.reports.iter().map(|r| r.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(outcome.reports[2].matches[0].candidate_source, "c");
        assert!(!outcome.cancelled);
    }

    #[test]
    fn cancelled_check_returns_partial_results() {
        let index = ScriptedIndex::default();
        let token = CancelToken::new();
        token.cancel();
        let checker = Checker::new(&index, Policy::default())
            .unwrap()
            .with_cancel(token);
        let outcome = checker.check(&pages("new.pdf", &["a", "b"]));
        assert!(outcome.cancelled);
        assert_eq!(outcome.unchecked, 2);
        assert!(outcome.reports.is_empty());
    }

    #[test]
    fn reports_survive_a_poisoned_lock() {
        let done: Mutex<Vec<(usize, PageReport)>> = Mutex::new(Vec::new());
        let page = |n: u32| PageReport {
            page_number: n,
            preview_text: String::new(),
            matches: Vec::new(),
            error: None,
        };
        record(&done, 0, page(1));
        let _ = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = done.lock().unwrap();
                    panic!("worker died holding the lock");
                })
                .join()
        });
        assert!(done.is_poisoned());

        record(&done, 1, page(2));
        let kept = done.into_inner().unwrap_or_else(PoisonError::into_inner);
        let pages: Vec<u32> = kept.iter().map(|(_, r)| r.page_number).collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn cancel_mid_check_keeps_completed_pages() {
        let token = CancelToken::new();
        let index = ScriptedIndex::default()
            .with("p1", &[("a.pdf", 0.9)])
            .with("p2", &[("b.pdf", 0.9)])
            .cancels_after("p1", &token);
        let checker = Checker::new(&index, Policy::default())
            .unwrap()
            .with_cancel(token);
        let outcome = checker.check(&pages("new.pdf", &["p1", "p2", "p3"]));

        assert!(outcome.cancelled);
        assert_eq!(outcome.unchecked, 2);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].page_number, 1);
        assert_eq!(outcome.reports[0].matches[0].candidate_source, "a.pdf");
        assert_eq!(outcome.summary().pages_checked, 1);
    }

    #[test]
    fn invalid_policy_refused() {
        let index = ScriptedIndex::default();
        let policy = Policy {
            noise_threshold: 0.9,
            similarity_threshold: 0.8,
            top_k: 3,
        };
        assert!(Checker::new(&index, policy).is_err());

        let checker = Checker::new(&index, Policy::default()).unwrap();
        assert!(checker.check_with_policy(&pages("n", &["x"]), &policy).is_err());
    }

    #[test]
    fn per_call_policy_override() {
        let index = ScriptedIndex::default().with("p", &[("a", 0.75)]);
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let strict = Policy {
            similarity_threshold: 0.7,
            noise_threshold: 0.5,
            top_k: 3,
        };
        let outcome = checker.check_with_policy(&pages("n", &["p"]), &strict).unwrap();
        assert_eq!(outcome.reports[0].matches[0].classification, Verdict::Plagiarism);
        let outcome = checker.check(&pages("n", &["p"]));
        assert_eq!(outcome.reports[0].matches[0].classification, Verdict::Original);
    }

    #[test]
    fn preview_and_match_text_truncated() {
        let long = "word ".repeat(100);
        let index = ScriptedIndex::default().with(&long, &[("a", 0.9)]);
        let checker = Checker::new(&index, Policy::default())
            .unwrap()
            .with_display(DisplayConfig {
                preview_length: 10,
                match_text_length: 6,
            });
        let outcome = checker.check(&pages("n", &[long.as_str()]));
        assert_eq!(outcome.reports[0].preview_text, "word word ");
        assert_eq!(outcome.reports[0].matches[0].matched_text, "stored");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("", 3), "");
    }

    // Against the real on-disk index

    fn open(dir: &std::path::Path) -> SqliteIndex {
        SqliteIndex::open(dir, "papers", Arc::new(HashedEmbedder::new(384))).unwrap()
    }

    #[test]
    fn empty_corpus_yields_empty_matches() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let outcome = checker.check(&pages("new.pdf", &["anything at all"]));
        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.reports[0].matches.is_empty());
        assert!(outcome.reports[0].error.is_none());
    }

    #[test]
    fn document_matches_itself() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let doc = pages(
            "A.pdf",
            &[
                "transformers replace recurrence with self attention over tokens",
                "we evaluate on machine translation benchmarks and report bleu",
                "limitations include quadratic memory in sequence length",
            ],
        );
        Ingestor::new(&index).ingest("A.pdf", &doc).unwrap();
        Ingestor::new(&index)
            .ingest("B.pdf", &pages("B.pdf", &["soil nitrogen cycles in wetlands"]))
            .unwrap();

        let checker = Checker::new(&index, Policy::default())
            .unwrap()
            .with_concurrency(2);
        let outcome = checker.check(&doc);
        assert_eq!(outcome.reports.len(), 3);
        for (report, page) in outcome.reports.iter().zip(&doc) {
            assert_eq!(report.page_number, page.page_number);
            let top = &report.matches[0];
            assert_eq!(top.candidate_source, "A.pdf");
            assert_eq!(top.candidate_page, Some(page.page_number));
            assert!(top.score > 0.99);
            assert_eq!(top.classification, Verdict::Plagiarism);
        }
    }

    #[test]
    fn blank_pages_match_their_stored_copy() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        let doc = pages("A.pdf", &["real words on the first page", "", "--- 1 ---"]);
        Ingestor::new(&index).ingest("A.pdf", &doc).unwrap();

        let outcome = Checker::new(&index, Policy::default()).unwrap().check(&doc);
        assert_eq!(outcome.reports.len(), 3);
        for report in &outcome.reports {
            let top = &report.matches[0];
            assert_eq!(top.candidate_source, "A.pdf");
            assert!(top.score > 0.99, "page {} scored {}", report.page_number, top.score);
        }
        assert_eq!(outcome.reports[1].matches[0].candidate_page, Some(2));
    }

    #[test]
    fn repeated_checks_agree() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(dir.path());
        Ingestor::new(&index)
            .ingest(
                "A.pdf",
                &pages("A.pdf", &["graph neural networks for molecules", "message passing layers"]),
            )
            .unwrap();
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let query = pages("q.pdf", &["graph neural networks for molecule property prediction"]);
        let first = checker.check(&query);
        let second = checker.check(&query);
        assert_eq!(first.reports[0].matches, second.reports[0].matches);
    }

    #[test]
    fn summary_counts() {
        let index = ScriptedIndex::default()
            .with("hot", &[("a", 0.95)])
            .with("warm", &[("b", 0.7)]);
        let checker = Checker::new(&index, Policy::default()).unwrap();
        let summary = checker.check(&pages("n", &["hot", "warm", "err"])).summary();
        assert_eq!(
            summary,
            CheckSummary {
                pages_checked: 3,
                pages_flagged: 1,
                pages_with_errors: 1,
                highest_score: Some(0.95),
            }
        );
    }
}
