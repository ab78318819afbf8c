use serde::{Deserialize, Serialize};

use crate::models::PreSearch;

/// Whether participant dispatch for `round_number` must hold until pre-search settles.
///
/// With web search off nothing blocks. With it on, a missing record blocks (the
/// search has not been created yet), `pending` and `streaming` block, and
/// `complete` or `failed` release the round.
#[must_use]
pub fn should_wait_for_pre_search(
    web_search_enabled: bool,
    pre_searches: &[PreSearch],
    round_number: u32,
) -> bool {
    if !web_search_enabled {
        return false;
    }

    match pre_searches
        .iter()
        .find(|pre_search| pre_search.round_number == round_number)
    {
        None => true,
        Some(pre_search) => !pre_search.status.is_terminal(),
    }
}

/// A user message queued until the round is allowed to dispatch it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMessage {
    pub round_number: u32,
    pub text: String,
}

impl PendingMessage {
    #[must_use]
    pub fn new(round_number: u32, text: impl Into<String>) -> Self {
        Self {
            round_number,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn is_ready(&self, web_search_enabled: bool, pre_searches: &[PreSearch]) -> bool {
        !should_wait_for_pre_search(web_search_enabled, pre_searches, self.round_number)
    }
}
