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

use crate::error::Fallible;
use crate::types::attempt::Attempt;
use crate::types::attempt::AttemptId;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::problem::ProblemId;
use crate::types::session::Member;
use crate::types::session::Session;
use crate::types::session::SessionId;
use crate::types::timestamp::Timestamp;

/// The persistence collaborator. Owns cards, attempts and sessions; callers
/// work on copies and write them back.
pub trait Store: Send + Sync {
    fn card(&self, id: CardId) -> Fallible<Option<Card>>;

    fn cards(&self) -> Fallible<Vec<Card>>;

    /// Insert a card. Fails if a card with the same id exists.
    fn insert_card(&self, card: &Card) -> Fallible<()>;

    /// Replace the stored card if its version is still `expected_version`,
    /// returning the stored copy with its new version. Fails with
    /// `VersionConflict` otherwise, leaving the row untouched.
    fn update_card(&self, expected_version: i64, card: &Card) -> Fallible<Card>;

    /// Non-New cards due at or before `now`.
    fn review_candidates(&self, now: Timestamp) -> Fallible<Vec<Card>>;

    /// Cards in state New.
    fn new_candidates(&self) -> Fallible<Vec<Card>>;

    /// Insert an attempt, ignoring its `id`, and return the assigned id.
    fn insert_attempt(&self, attempt: &Attempt) -> Fallible<AttemptId>;

    /// Rewrite an attempt that has not been finalized yet.
    fn update_attempt(&self, attempt: &Attempt) -> Fallible<()>;

    /// Remove an attempt that was never opened. Finalized attempts stay.
    fn delete_attempt(&self, id: AttemptId) -> Fallible<()>;

    fn attempt(&self, id: AttemptId) -> Fallible<Option<Attempt>>;

    /// All attempts of a problem, oldest first.
    fn attempts_for_problem(&self, problem: &ProblemId) -> Fallible<Vec<Attempt>>;

    fn attempts(&self) -> Fallible<Vec<Attempt>>;

    fn insert_session(&self, started_at: Timestamp, members: &[Member]) -> Fallible<SessionId>;

    fn update_session(&self, session: &Session) -> Fallible<()>;

    fn sessions(&self) -> Fallible<Vec<Session>>;
}
