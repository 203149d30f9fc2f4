//! Second-stage reranking with a cross-encoder style [`Scorer`].

use std::sync::Arc;

use strata_core::{Passage, RerankFailurePolicy, Scorer, StrataError};
use tracing::{debug, warn};

/// Rescores passages against the query and keeps the best `top_n`.
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn Scorer>,
    top_n: usize,
    policy: RerankFailurePolicy,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("top_n", &self.top_n)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Reranker {
    /// Create a reranker that fails the query when any passage cannot be
    /// scored.
    pub fn new(scorer: Arc<dyn Scorer>, top_n: usize) -> Self {
        Self {
            scorer,
            top_n,
            policy: RerankFailurePolicy::Fail,
        }
    }

    /// Choose what happens when a passage cannot be scored.
    pub fn with_policy(mut self, policy: RerankFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of passages kept.
    pub fn top_n(&self) -> usize {
        self.top_n
    }

    /// Score every passage, sort by descending rerank score and keep the
    /// first `top_n`. Ties keep their incoming order.
    ///
    /// # Errors
    ///
    /// With [`RerankFailurePolicy::Fail`], returns [`StrataError::Rerank`]
    /// naming the first passage the scorer failed on. With
    /// [`RerankFailurePolicy::PassThrough`] such passages score `0.0`.
    pub async fn rerank(
        &self,
        query: &str,
        mut passages: Vec<Passage>,
    ) -> Result<Vec<Passage>, StrataError> {
        if passages.is_empty() {
            return Ok(passages);
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let scores = self.scorer.score_batch(query, &texts).await;
        if scores.len() != passages.len() {
            return Err(StrataError::Rerank(format!(
                "scorer returned {} scores for {} passages",
                scores.len(),
                passages.len()
            )));
        }

        for (passage, score) in passages.iter_mut().zip(scores) {
            let score = match (score, self.policy) {
                (Ok(s), _) => s,
                (Err(e), RerankFailurePolicy::Fail) => {
                    return Err(StrataError::Rerank(format!(
                        "failed to score passage {}: {e}",
                        passage.id
                    )));
                }
                (Err(e), RerankFailurePolicy::PassThrough) => {
                    warn!(passage = %passage.id, error = %e, "rerank failed, scoring passage 0.0");
                    0.0
                }
            };
            passage.rerank_score = Some(score);
        }

        passages.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
        passages.truncate(self.top_n);
        debug!(kept = passages.len(), top_n = self.top_n, "reranked passages");
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strata_core::{NodeId, Span};

    /// Scores by text length; fails on texts containing "boom".
    struct Length;

    #[async_trait]
    impl Scorer for Length {
        async fn score(&self, _query: &str, passage: &str) -> Result<f32, StrataError> {
            if passage.contains("boom") {
                return Err(StrataError::Rerank("model overloaded".into()));
            }
            Ok(passage.len() as f32)
        }
    }

    struct Constant;

    #[async_trait]
    impl Scorer for Constant {
        async fn score(&self, _query: &str, _passage: &str) -> Result<f32, StrataError> {
            Ok(1.0)
        }
    }

    fn passage(id: &str, text: &str, score: f32) -> Passage {
        Passage {
            id: NodeId::new(id),
            text: text.into(),
            score,
            rerank_score: None,
            tier: 0,
            source_id: "d".into(),
            span: Span::new(0, text.len()),
            merged_from: vec![],
        }
    }

    #[tokio::test]
    async fn keeps_top_n_by_rerank_score() {
        let reranker = Reranker::new(Arc::new(Length), 2);
        let out = reranker
            .rerank(
                "q",
                vec![
                    passage("a", "x", 0.9),
                    passage("b", "xxxx", 0.1),
                    passage("c", "xxx", 0.5),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(out[0].rerank_score, Some(4.0));
        assert_eq!(out[0].score, 0.1);
    }

    #[tokio::test]
    async fn ties_keep_incoming_order() {
        let reranker = Reranker::new(Arc::new(Constant), 3);
        let out = reranker
            .rerank(
                "q",
                vec![passage("z", "1", 0.1), passage("a", "2", 0.2), passage("m", "3", 0.3)],
            )
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn failure_fails_the_query_by_default() {
        let reranker = Reranker::new(Arc::new(Length), 2);
        let err = reranker
            .rerank("q", vec![passage("a", "fine", 0.5), passage("b", "boom", 0.4)])
            .await
            .unwrap_err();
        match err {
            StrataError::Rerank(msg) => assert!(msg.contains('b'), "{msg}"),
            other => panic!("expected rerank error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pass_through_scores_failures_zero() {
        let reranker =
            Reranker::new(Arc::new(Length), 5).with_policy(RerankFailurePolicy::PassThrough);
        let out = reranker
            .rerank("q", vec![passage("a", "boom", 0.9), passage("b", "ok", 0.1)])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id.as_str(), "b");
        assert_eq!(out[1].rerank_score, Some(0.0));
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let reranker = Reranker::new(Arc::new(Length), 2);
        assert!(reranker.rerank("q", vec![]).await.unwrap().is_empty());
    }
}
