//! C1: Token Counter.
//!
//! Wraps `tokenizers::Tokenizer` (the HuggingFace `tokenizers` crate). The
//! chunker, the context builder, and the embedding/generation providers
//! must agree on one tokenizer family; that family is a configuration
//! value (`tokenizer_name`), not something callers pick ad hoc.

use std::collections::HashMap;
use std::sync::RwLock;

use tokenizers::Tokenizer;

use crate::errors::{CoreError, CoreResult};

/// A process-lifetime registry of loaded tokenizers, keyed by name.
/// Constructed once at startup and passed explicitly to components that
/// need token counts — no implicit module-level state.
pub struct TokenizerRegistry {
    tokenizers: RwLock<HashMap<String, Tokenizer>>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        TokenizerRegistry {
            tokenizers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tokenizer loaded from a local `tokenizer.json` file (the
    /// same file `embed.rs`'s `Embedder::new_with_model` downloads via
    /// `hf_hub`).
    pub fn register_from_file(&self, name: &str, path: &std::path::Path) -> CoreResult<()> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| CoreError::TokenizerUnavailable(format!("{name}: {e}")))?;
        self.tokenizers
            .write()
            .unwrap()
            .insert(name.to_string(), tokenizer);
        Ok(())
    }

    pub fn register(&self, name: &str, tokenizer: Tokenizer) {
        self.tokenizers
            .write()
            .unwrap()
            .insert(name.to_string(), tokenizer);
    }

    fn with_tokenizer<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Tokenizer) -> T,
    ) -> CoreResult<T> {
        let guard = self.tokenizers.read().unwrap();
        let tokenizer = guard
            .get(name)
            .ok_or_else(|| CoreError::TokenizerUnavailable(name.to_string()))?;
        Ok(f(tokenizer))
    }

    /// Deterministic token count for `text` under `tokenizer_name`.
    pub fn count(&self, tokenizer_name: &str, text: &str) -> CoreResult<usize> {
        self.with_tokenizer(tokenizer_name, |t| {
            t.encode(text, false)
                .map(|enc| enc.get_ids().len())
                .unwrap_or(0)
        })
    }

    /// Byte offsets of each token in `text`, used by the chunker to hard-split
    /// sentences longer than `MaxChunkTokens` on exact token boundaries.
    pub fn token_offsets(&self, tokenizer_name: &str, text: &str) -> CoreResult<Vec<(usize, usize)>> {
        self.with_tokenizer(tokenizer_name, |t| {
            t.encode(text, false)
                .map(|enc| enc.get_offsets().to_vec())
                .unwrap_or_default()
        })
    }

    /// Right-side, token-aligned truncation to at most `max_tokens` tokens.
    /// Used by the embedding provider (§4.6: inputs longer than
    /// `max_input_tokens()` are truncated, not rejected) and by context
    /// assembly (§4.15 step 6: the overflowing chunk is truncated on a
    /// token boundary).
    pub fn truncate(&self, tokenizer_name: &str, text: &str, max_tokens: usize) -> CoreResult<String> {
        self.with_tokenizer(tokenizer_name, |t| {
            let encoding = match t.encode(text, false) {
                Ok(e) => e,
                Err(_) => return text.to_string(),
            };
            let ids = encoding.get_ids();
            if ids.len() <= max_tokens {
                return text.to_string();
            }
            let truncated_ids = &ids[..max_tokens];
            t.decode(truncated_ids, true).unwrap_or_else(|_| text.to_string())
        })
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitespace_tokenizer() -> Tokenizer {
        use tokenizers::models::wordlevel::WordLevel;
        use tokenizers::pre_tokenizers::whitespace::Whitespace;
        use tokenizers::TokenizerImpl;

        let vocab: HashMap<String, u32> = (0..10000)
            .map(|_| ())
            .enumerate()
            .map(|(i, _)| (format!("w{i}"), i as u32))
            .collect();
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token("[UNK]".to_string())
            .build()
            .unwrap();
        let mut tokenizer: TokenizerImpl<_, _, _, _, _> = TokenizerImpl::new(model);
        tokenizer.with_pre_tokenizer(Some(Whitespace {}));
        Tokenizer::from(tokenizer)
    }

    #[test]
    fn unregistered_tokenizer_is_unavailable() {
        let registry = TokenizerRegistry::new();
        let err = registry.count("nonexistent", "hello").unwrap_err();
        assert!(matches!(err, CoreError::TokenizerUnavailable(_)));
    }

    #[test]
    fn count_is_deterministic() {
        let registry = TokenizerRegistry::new();
        registry.register("ws", whitespace_tokenizer());
        let a = registry.count("ws", "the quick brown fox").unwrap();
        let b = registry.count("ws", "the quick brown fox").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 4);
    }

    #[test]
    fn truncate_respects_token_budget() {
        let registry = TokenizerRegistry::new();
        registry.register("ws", whitespace_tokenizer());
        let text = "one two three four five";
        let truncated = registry.truncate("ws", text, 2).unwrap();
        let count = registry.count("ws", &truncated).unwrap();
        assert!(count <= 2);
    }
}
