//! Question-answering prompt assembly.

use strata_core::{ModelMetadata, Passage};

/// Template for a question answered from retrieved context.
pub const QA_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query_str}\n\
Answer: ";

const PASSAGE_SEPARATOR: &str = "\n\n";

/// Rough token count: four characters per token, rounded up.
///
/// # Examples
///
/// ```
/// use strata_retrieve::prompt::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A filled-in prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Text sent to the generator.
    pub text: String,
    /// How many passages made it into the context block.
    pub included: usize,
}

/// Fill [`QA_TEMPLATE`] with as many passages as the model's prompt budget
/// allows.
///
/// Passages are taken in order until the next one would not fit. If even the
/// first passage is over budget it is cut to fit, so a non-empty passage list
/// never yields an empty context.
///
/// # Examples
///
/// ```
/// use strata_core::{ModelMetadata, NodeId, Passage, Span};
/// use strata_retrieve::prompt::build_prompt;
///
/// let passage = Passage {
///     id: NodeId::new("n1"),
///     text: "xAI was founded in 2023.".into(),
///     score: 0.9,
///     rerank_score: None,
///     tier: 0,
///     source_id: "d".into(),
///     span: Span::new(0, 24),
///     merged_from: vec![],
/// };
/// let meta = ModelMetadata {
///     model_name: "m".into(),
///     context_window: 4096,
///     num_output: 256,
/// };
/// let prompt = build_prompt("When was xAI founded?", &[passage], &meta);
/// assert_eq!(prompt.included, 1);
/// assert!(prompt.text.contains("xAI was founded in 2023."));
/// assert!(prompt.text.ends_with("Query: When was xAI founded?\nAnswer: "));
/// ```
pub fn build_prompt(query: &str, passages: &[Passage], metadata: &ModelMetadata) -> Prompt {
    let overhead = estimate_tokens(QA_TEMPLATE) + estimate_tokens(query);
    let budget = metadata.prompt_budget().saturating_sub(overhead);

    let mut selected: Vec<&str> = Vec::new();
    let mut used = 0;
    for passage in passages {
        let separator = if selected.is_empty() { 0 } else { 1 };
        let cost = estimate_tokens(&passage.text) + separator;
        if used + cost > budget {
            break;
        }
        used += cost;
        selected.push(&passage.text);
    }

    let context = match (selected.is_empty(), passages.first()) {
        (true, Some(first)) => truncate_chars(&first.text, budget * 4).to_string(),
        _ => selected.join(PASSAGE_SEPARATOR),
    };
    let included = if context.is_empty() { 0 } else { selected.len().max(1) };

    Prompt {
        text: fill_template(QA_TEMPLATE, &context, query),
        included,
    }
}

/// Substitute `{context_str}` and `{query_str}` in a single scan of
/// `template`. Substituted text is never rescanned.
fn fill_template(template: &str, context: &str, query: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + query.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        if let Some(after) = tail.strip_prefix("{context_str}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{query_str}") {
            out.push_str(query);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{NodeId, Span};

    fn passage(id: &str, text: &str) -> Passage {
        Passage {
            id: NodeId::new(id),
            text: text.into(),
            score: 1.0,
            rerank_score: None,
            tier: 0,
            source_id: "d".into(),
            span: Span::new(0, text.len()),
            merged_from: vec![],
        }
    }

    fn meta(context_window: usize) -> ModelMetadata {
        ModelMetadata {
            model_name: "test".into(),
            context_window,
            num_output: 0,
        }
    }

    #[test]
    fn template_layout() {
        let prompt = build_prompt("q?", &[passage("a", "one"), passage("b", "two")], &meta(4096));
        assert_eq!(
            prompt.text,
            "Context information is below.\n---------------------\none\n\ntwo\n\
             ---------------------\nGiven the context information and not prior knowledge, \
             answer the query.\nQuery: q?\nAnswer: "
        );
        assert_eq!(prompt.included, 2);
    }

    #[test]
    fn stops_at_first_passage_over_budget() {
        let overhead = estimate_tokens(QA_TEMPLATE) + estimate_tokens("q");
        let passages = vec![
            passage("a", &"a".repeat(40)),
            passage("b", &"b".repeat(400)),
            passage("c", &"c".repeat(4)),
        ];
        let prompt = build_prompt("q", &passages, &meta(overhead + 20));
        assert_eq!(prompt.included, 1);
        assert!(!prompt.text.contains('c'.to_string().repeat(4).as_str()));
    }

    #[test]
    fn oversized_first_passage_is_truncated() {
        let overhead = estimate_tokens(QA_TEMPLATE) + estimate_tokens("q");
        let prompt = build_prompt("q", &[passage("a", &"é".repeat(100))], &meta(overhead + 5));
        assert_eq!(prompt.included, 1);
        assert!(prompt.text.contains(&"é".repeat(20)));
        assert!(!prompt.text.contains(&"é".repeat(21)));
    }

    #[test]
    fn placeholders_in_passages_and_query_are_kept_verbatim() {
        let prompt = build_prompt(
            "What does {context_str} mean?",
            &[passage("a", "Templates use {query_str} as a placeholder.")],
            &meta(4096),
        );
        assert!(prompt
            .text
            .contains("Templates use {query_str} as a placeholder."));
        assert!(prompt
            .text
            .ends_with("Query: What does {context_str} mean?\nAnswer: "));
        assert_eq!(prompt.text.matches("Templates use").count(), 1);
    }

    #[test]
    fn no_passages_gives_empty_context() {
        let prompt = build_prompt("q", &[], &meta(4096));
        assert_eq!(prompt.included, 0);
        assert!(prompt.text.contains("---------------------\n\n---------------------"));
    }
}
