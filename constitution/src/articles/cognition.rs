//! Articles for sovereign-scope decisions.

use crate::articles::ArticleProvider;
use crate::protocol::{PROTOCOL_BLACK_HOLE, PROTOCOL_PHOENIX};
use crate::types::{Article, Rule, RuleLevel};

/// Provider for the cognition articles.
pub struct CognitionArticles;

impl ArticleProvider for CognitionArticles {
    fn domain(&self) -> &'static str {
        "cognition"
    }

    fn articles(&self) -> Vec<Article> {
        vec![
            Article {
                id: "art-3-self-limitation".to_string(),
                title: "Self-limitation of the governing intelligence".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "cognition-no-self-amendment",
                    "The system may not amend its own constitution or disable its guardians.",
                )
                .with_level(RuleLevel::Absolute)
                .forbidding_actions(["amend_constitution", "disable_guardians", "override_human_ops"])],
            },
            Article {
                id: "art-4-sovereign-urgency".to_string(),
                title: "Sovereign action under pressure".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "cognition-protocol-bound",
                    "Sovereign actions above critical urgency require an armed protocol and human review.",
                )
                .with_level(RuleLevel::Critical)
                .requiring_human_review()
                .requiring_protocols([PROTOCOL_BLACK_HOLE, PROTOCOL_PHOENIX])],
            },
        ]
    }
}
