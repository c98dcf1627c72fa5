//! Articles for economic actions (`economic_*`).

use crate::articles::ArticleProvider;
use crate::types::{Article, Rule, RuleLevel};

/// Provider for the economy articles.
pub struct EconomyArticles;

impl ArticleProvider for EconomyArticles {
    fn domain(&self) -> &'static str {
        "economy"
    }

    fn articles(&self) -> Vec<Article> {
        vec![
            Article {
                id: "art-7-property".to_string(),
                title: "Protection of participant holdings".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "economy-no-confiscation",
                    "Holdings may not be confiscated or frozen wholesale.",
                )
                .with_level(RuleLevel::Absolute)
                .forbidding_actions(["economic_confiscate", "economic_freeze_all"])],
            },
            Article {
                id: "art-8-calm-markets".to_string(),
                title: "No economic moves in panic".to_string(),
                domain: Some(self.domain().to_string()),
                rules: vec![Rule::new(
                    "economy-urgency-ceiling",
                    "Economic actions are not taken at panic-level urgency.",
                )
                .with_level(RuleLevel::Protective)
                .with_max_urgency(0.8)],
            },
        ]
    }
}
