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

use rusqlite::ToSql;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Serialize;

use crate::error::Error;
use crate::error::Fallible;
use crate::error::fail;
use crate::fsrs::Difficulty;
use crate::fsrs::MAX_DIFFICULTY;
use crate::fsrs::MIN_DIFFICULTY;
use crate::fsrs::Stability;
use crate::types::card_id::CardId;
use crate::types::card_kind::CardKind;
use crate::types::problem::ProblemId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CardState {
    /// Never rated.
    New,
    /// Rated, but not yet graduated to day-scale intervals.
    Learning,
    /// Graduated; scheduled in whole days.
    Review,
    /// Forgotten after graduating; waiting to graduate again.
    Relearning,
}

impl CardState {
    pub fn as_str(&self) -> &str {
        match self {
            CardState::New => "new",
            CardState::Learning => "learning",
            CardState::Review => "review",
            CardState::Relearning => "relearning",
        }
    }
}

impl TryFrom<String> for CardState {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "new" => Ok(CardState::New),
            "learning" => Ok(CardState::Learning),
            "review" => Ok(CardState::Review),
            "relearning" => Ok(CardState::Relearning),
            _ => fail(format!("Invalid card state: {}", value)),
        }
    }
}

impl ToSql for CardState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CardState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let string: String = FromSql::column_result(value)?;
        CardState::try_from(string).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// The memory model's estimate for a card that has been rated at least once.
#[derive(Clone, Copy, PartialEq, Debug, Serialize)]
pub struct MemoryState {
    /// Intrinsic hardness, in `[MIN_DIFFICULTY, MAX_DIFFICULTY]`.
    pub difficulty: Difficulty,
    /// Days until retrievability decays to the reference retention.
    pub stability: Stability,
}

/// The scheduling record for one (problem, kind) pair.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub problem: ProblemId,
    pub kind: CardKind,
    pub state: CardState,
    /// Absent exactly when the card is New.
    pub memory: Option<MemoryState>,
    pub due: Timestamp,
    pub last_review: Option<Timestamp>,
    pub reps: u32,
    pub lapses: u32,
    pub created_at: Timestamp,
    /// Bumped by the store on every successful update.
    pub version: i64,
}

impl Card {
    pub fn new(problem: ProblemId, kind: CardKind, now: Timestamp) -> Self {
        Self {
            id: CardId::derive(&problem, kind),
            problem,
            kind,
            state: CardState::New,
            memory: None,
            due: now,
            last_review: None,
            reps: 0,
            lapses: 0,
            created_at: now,
            version: 0,
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.state != CardState::New && self.due <= now
    }

    /// Check the invariants every stored card must satisfy.
    pub fn validate(&self) -> Fallible<()> {
        let corrupt = |reason: String| {
            Err(Error::CorruptState {
                card: self.id,
                reason,
            })
        };
        if let Some(last_review) = self.last_review {
            if self.due < last_review {
                return corrupt(format!(
                    "due date {} precedes last review {}",
                    self.due, last_review
                ));
            }
        }
        if self.state != CardState::New && self.last_review.is_none() {
            return corrupt(format!("{} card was never reviewed", self.state.as_str()));
        }
        match (self.state, self.memory) {
            (CardState::New, _) => {}
            (_, None) => {
                return corrupt(format!("{} card has no memory state", self.state.as_str()));
            }
            (_, Some(memory)) => {
                if !memory.stability.is_finite() || memory.stability <= 0.0 {
                    return corrupt(format!("stability {} is not positive", memory.stability));
                }
                if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&memory.difficulty) {
                    return corrupt(format!("difficulty {} is out of range", memory.difficulty));
                }
            }
        }
        Ok(())
    }

    /// Forget everything the memory model knows about this card, keeping
    /// its identity and its counters.
    pub fn reset(&self, now: Timestamp) -> Card {
        Card {
            state: CardState::New,
            memory: None,
            due: now,
            last_review: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Card {
        Card::new(ProblemId::new("two-sum"), CardKind::Solve, Timestamp::now())
    }

    #[test]
    fn test_new_card() {
        let card = card();
        assert_eq!(card.state, CardState::New);
        assert_eq!(card.reps, 0);
        assert_eq!(card.lapses, 0);
        assert!(card.validate().is_ok());
        assert!(!card.is_due(card.due));
    }

    #[test]
    fn test_validate_rejects_bad_stability() {
        let mut card = card();
        card.last_review = Some(card.due);
        card.state = CardState::Review;
        card.memory = Some(MemoryState {
            difficulty: 5.0,
            stability: 0.0,
        });
        assert!(matches!(card.validate(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_difficulty() {
        let mut card = card();
        card.last_review = Some(card.due);
        card.state = CardState::Review;
        card.memory = Some(MemoryState {
            difficulty: 11.0,
            stability: 3.0,
        });
        assert!(matches!(card.validate(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_validate_rejects_missing_memory() {
        let mut card = card();
        card.last_review = Some(card.due);
        card.state = CardState::Learning;
        assert!(matches!(card.validate(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_validate_rejects_due_before_last_review() {
        let mut card = card();
        card.state = CardState::Review;
        card.memory = Some(MemoryState {
            difficulty: 5.0,
            stability: 3.0,
        });
        card.last_review = Some(card.due.plus_days(1).unwrap());
        assert!(matches!(card.validate(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_reset_keeps_counters() {
        let mut card = card();
        card.state = CardState::Review;
        card.memory = Some(MemoryState {
            difficulty: 5.0,
            stability: 3.0,
        });
        card.reps = 7;
        card.lapses = 2;
        card.version = 4;
        let reset = card.reset(Timestamp::now());
        assert_eq!(reset.state, CardState::New);
        assert_eq!(reset.memory, None);
        assert_eq!(reset.reps, 7);
        assert_eq!(reset.lapses, 2);
        assert_eq!(reset.version, 4);
    }
}
