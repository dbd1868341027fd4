//! Built-in automation kinds. One instance of each is registered.

pub mod categorize;
pub mod followup;
pub mod musing;
pub mod reference;
pub mod tag;

use std::sync::Arc;

pub use categorize::CategorizeAutomation;
pub use followup::FollowupAutomation;
pub use musing::MusingAutomation;
pub use reference::ReferenceAutomation;
pub use tag::TagAutomation;

use super::automation::Automation;

pub fn builtin_automations() -> Vec<Arc<dyn Automation>> {
    vec![
        Arc::new(TagAutomation),
        Arc::new(CategorizeAutomation),
        Arc::new(FollowupAutomation),
        Arc::new(MusingAutomation),
        Arc::new(ReferenceAutomation),
    ]
}

/// Lowercased words with surrounding punctuation removed.
pub(crate) fn normalized_words(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect()
}
