use serde::{Deserialize, Serialize};

/// Canonical token usage shape shared by the accumulator and the governance
/// engine. Per-provider usage payloads are translated into this shape at the
/// ingress boundary; nothing downstream needs to know which provider produced
/// them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl CanonicalUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Merges another usage snapshot in, taking the larger of each field.
    /// Used when a later chunk reports a superset of an earlier partial count.
    pub fn merge_max(&mut self, other: &CanonicalUsage) {
        self.prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(other.completion_tokens);
        self.cache_read_tokens = self.cache_read_tokens.max(other.cache_read_tokens);
        self.cache_write_tokens = self.cache_write_tokens.max(other.cache_write_tokens);
    }
}
