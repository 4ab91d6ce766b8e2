// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Token vocabulary for graph node features
//!
//! The vocabulary is fixed at construction: an ordered list of token strings
//! defining the bijection token → [`TokenIndex`]. Node features are token
//! indices, so the vocabulary also fixes the width of the per-block global
//! feature vectors.

use std::collections::HashMap;

/// Position of a token string in the vocabulary.
pub type TokenIndex = usize;

/// Errors raised while building the vocabulary or resolving required tokens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VocabularyError {
    #[error("duplicate vocabulary token: '{token}'")]
    Duplicate { token: String },

    #[error("token not found in vocabulary: '{token}'")]
    Missing { token: String },
}

/// What to do when a node token is not in the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OovBehavior {
    /// Fail the block; the graph transaction rolls back.
    ReturnError,
    /// Substitute the named token (which must be in the vocabulary).
    ReplaceToken(String),
}

/// An immutable token → index mapping.
#[derive(Debug)]
pub struct Vocabulary {
    index: HashMap<String, TokenIndex>,
    size: usize,
}

impl Vocabulary {
    /// Build the vocabulary from an ordered token list.
    ///
    /// # Errors
    ///
    /// Returns [`VocabularyError::Duplicate`] if any token appears twice.
    pub fn new(tokens: Vec<String>) -> Result<Self, VocabularyError> {
        let size = tokens.len();
        let mut index = HashMap::with_capacity(size);
        for (i, token) in tokens.into_iter().enumerate() {
            if let Some(_previous) = index.insert(token.clone(), i) {
                return Err(VocabularyError::Duplicate { token });
            }
        }
        Ok(Self { index, size })
    }

    /// Look up a token, `None` when out of vocabulary.
    pub fn get(&self, token: &str) -> Option<TokenIndex> {
        self.index.get(token).copied()
    }

    /// Look up a token that is required to exist.
    ///
    /// # Errors
    ///
    /// Returns [`VocabularyError::Missing`] when the token is absent.
    pub fn require(&self, token: &str) -> Result<TokenIndex, VocabularyError> {
        self.get(token).ok_or_else(|| VocabularyError::Missing {
            token: token.to_string(),
        })
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True when the vocabulary has no tokens.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
