//! Articles that apply to every decision.

use crate::articles::ArticleProvider;
use crate::types::{Article, Rule, RuleLevel};

/// Provider for the global articles.
pub struct GlobalArticles;

impl ArticleProvider for GlobalArticles {
    fn domain(&self) -> &'static str {
        "global"
    }

    fn articles(&self) -> Vec<Article> {
        vec![
            Article {
                id: "art-1-dignity".to_string(),
                title: "Dignity of every participant".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![
                    Rule::new(
                        "dignity-no-harm",
                        "No action may target harm, exploitation or coercion of a participant.",
                    )
                    .with_level(RuleLevel::Absolute)
                    .forbidding_targets(["user_harm", "minor_exploitation", "coercion"]),
                    Rule::new(
                        "dignity-no-surveillance",
                        "Covert surveillance and identity disclosure are forbidden.",
                    )
                    .with_level(RuleLevel::Absolute)
                    .forbidding_actions(["covert_surveillance", "disclose_identity"]),
                ],
            },
            Article {
                id: "art-2-memory".to_string(),
                title: "Integrity of the public memory".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![
                    Rule::new(
                        "memory-append-only",
                        "The audit and governance ledgers can never be edited or erased.",
                    )
                    .with_level(RuleLevel::Absolute)
                    .forbidding_actions(["delete_audit_trail", "rewrite_ledger", "disable_audit"]),
                    Rule::new(
                        "memory-urgent-review",
                        "Actions taken under very high urgency are reviewed by human operations first.",
                    )
                    .with_level(RuleLevel::Critical)
                    .with_min_urgency(0.85)
                    .requiring_human_review(),
                ],
            },
        ]
    }
}
