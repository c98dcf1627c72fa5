//! Canonical constitution articles.
//!
//! Each domain provider contributes the articles that apply to its slice
//! of decisions. [`canonical_constitution`] assembles and seals them.

pub mod cognition;
pub mod economy;
pub mod global;
pub mod security;

pub use cognition::CognitionArticles;
pub use economy::EconomyArticles;
pub use global::GlobalArticles;
pub use security::SecurityArticles;

use crate::error::Result;
use crate::types::{Article, Constitution};
use crate::verification::seal;

/// Identifier of the canonical constitution.
pub const CANONICAL_ID: &str = "tamv-constitution";
/// Version of the canonical constitution.
pub const CANONICAL_VERSION: &str = "1.0.0";

/// Trait for domain-specific article sets.
pub trait ArticleProvider: Send + Sync {
    /// Domain the articles are scoped to
    fn domain(&self) -> &'static str;

    /// Articles contributed by this provider
    fn articles(&self) -> Vec<Article>;
}

/// All providers in document order.
pub fn providers() -> Vec<Box<dyn ArticleProvider>> {
    vec![
        Box::new(GlobalArticles),
        Box::new(CognitionArticles),
        Box::new(SecurityArticles),
        Box::new(EconomyArticles),
    ]
}

/// Assemble and seal the canonical constitution.
pub fn canonical_constitution(signer: &str) -> Result<Constitution> {
    let articles = providers().iter().flat_map(|p| p.articles()).collect();
    seal(CANONICAL_ID, CANONICAL_VERSION, signer, articles)
}
