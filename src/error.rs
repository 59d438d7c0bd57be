// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

use crate::types::attempt::AttemptId;
use crate::types::card_id::CardId;
use crate::types::session::SessionId;

#[derive(Debug, Error)]
pub enum Error {
    /// The rating input was not one of the four ordinal values.
    #[error("invalid rating {0}: expected 1 (again), 2 (hard), 3 (good), or 4 (easy).")]
    InvalidRating(u8),
    /// A stored card violates one of its invariants.
    #[error("card {card} is in a corrupt state: {reason}.")]
    CorruptState { card: CardId, reason: String },
    /// Somebody else updated the card between our read and our write.
    #[error("card {card} was modified concurrently (expected version {expected}, found {found}).")]
    VersionConflict {
        card: CardId,
        expected: i64,
        found: i64,
    },
    /// The content-mutation collaborator could not accept the request.
    #[error("mutation request failed: {0}")]
    MutationRequestFailed(String),
    #[error("no such card: {0}.")]
    UnknownCard(CardId),
    #[error("no such attempt: {0}.")]
    UnknownAttempt(AttemptId),
    #[error("no such session: {0}.")]
    UnknownSession(SessionId),
    #[error("card {card} already has an open attempt ({attempt}).")]
    AttemptInProgress { card: CardId, attempt: AttemptId },
    #[error("attempt {0} has already been finalized.")]
    AttemptFinalized(AttemptId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub type Fallible<T> = Result<T, Error>;

pub fn fail<T>(msg: impl Into<String>) -> Fallible<T> {
    Err(Error::Other(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail() {
        let result: Fallible<()> = fail("directory does not exist.");
        let err = result.err().unwrap();
        assert_eq!(err.to_string(), "directory does not exist.");
    }

    #[test]
    fn test_invalid_rating_message() {
        let err = Error::InvalidRating(7);
        assert!(err.to_string().starts_with("invalid rating 7"));
    }
}
