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

use std::fmt::Display;
use std::fmt::Formatter;

use rusqlite::ToSql;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Serialize;

use crate::types::card_id::CardId;
use crate::types::mutation_class::MutationClass;
use crate::types::problem::ProblemId;
use crate::types::rating::Rating;
use crate::types::session::SessionId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct AttemptId(pub i64);

impl Display for AttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl ToSql for AttemptId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for AttemptId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(AttemptId(FromSql::column_result(value)?))
    }
}

/// One try at a problem.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: AttemptId,
    pub session: Option<SessionId>,
    pub problem: ProblemId,
    pub card: CardId,
    /// 1-based position among all attempts of this problem, across kinds.
    pub ordinal: u32,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    /// Time budget in seconds.
    pub time_budget: i64,
    pub rating: Option<Rating>,
    pub gave_up: bool,
    pub timed_out: bool,
    pub was_mutation: bool,
    pub mutation_class: Option<MutationClass>,
    /// The mutation request could not be delivered, so the learner saw the
    /// original statement.
    pub degraded: bool,
}

impl Attempt {
    pub fn is_finalized(&self) -> bool {
        self.rating.is_some()
    }

    /// Seconds between start and finish, once finished.
    pub fn elapsed(&self) -> Option<i64> {
        self.finished_at
            .map(|finished_at| finished_at.seconds_since(self.started_at))
    }
}

/// Things that happen to an open attempt before it is rated.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttemptEvent {
    TimerExpired,
    GaveUp,
}
