//! Articles for protocol activation requests (`activate_protocol_*`).

use crate::articles::ArticleProvider;
use crate::types::{Article, Rule, RuleLevel};

/// Provider for the security articles.
pub struct SecurityArticles;

impl ArticleProvider for SecurityArticles {
    fn domain(&self) -> &'static str {
        "security"
    }

    fn articles(&self) -> Vec<Article> {
        vec![
            Article {
                id: "art-5-arming".to_string(),
                title: "Arming of sovereign protocols".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "security-human-arming",
                    "Protocol activation at elevated urgency is armed by human operations.",
                )
                .with_level(RuleLevel::Critical)
                .with_min_urgency(0.7)
                .requiring_human_review()],
            },
            Article {
                id: "art-6-proportionality".to_string(),
                title: "Proportional containment".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "security-no-collective-punishment",
                    "Containment may not be aimed at the whole population or at non-involved participants.",
                )
                .with_level(RuleLevel::Protective)
                .forbidding_targets(["all_users", "bystanders"])],
            },
        ]
    }
}
