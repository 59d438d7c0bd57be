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
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Serialize;

use crate::error::Error;
use crate::error::fail;
use crate::types::card_id::CardId;
use crate::types::problem::Category;
use crate::types::problem::ProblemId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl ToSql for SessionId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for SessionId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(SessionId(FromSql::column_result(value)?))
    }
}

macro_rules! sql_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match value.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => fail(format!("Invalid {}: {}", stringify!($name), value)),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let string: String = FromSql::column_result(value)?;
                $name::try_from(string).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

/// Which half of the pair a member fills.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    New,
    Review,
}

sql_enum!(Slot { New => "new", Review => "review" });

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    Finalized,
    Skipped,
}

sql_enum!(MemberStatus {
    Pending => "pending",
    Finalized => "finalized",
    Skipped => "skipped",
});

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    /// Every member was finalized or skipped, at least one finalized.
    Completed,
    /// Every member was skipped.
    Skipped,
    /// Left open past the staleness timeout.
    Abandoned,
}

sql_enum!(SessionStatus {
    Open => "open",
    Completed => "completed",
    Skipped => "skipped",
    Abandoned => "abandoned",
});

/// Why a session came out with fewer than two members. Valid outcomes, not
/// errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum SessionGap {
    NoDueCards,
    NoNewCards,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub slot: Slot,
    pub card: CardId,
    pub problem: ProblemId,
    pub category: Option<Category>,
    pub status: MemberStatus,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub status: SessionStatus,
    pub members: Vec<Member>,
}

impl Session {
    pub fn member(&self, card: CardId) -> Option<&Member> {
        self.members.iter().find(|m| m.card == card)
    }

    pub fn member_in(&self, slot: Slot) -> Option<&Member> {
        self.members.iter().find(|m| m.slot == slot)
    }

    /// Whether no member is still pending.
    pub fn is_settled(&self) -> bool {
        self.members
            .iter()
            .all(|m| m.status != MemberStatus::Pending)
    }

    /// The terminal status implied by the members, once settled.
    pub fn settled_status(&self) -> SessionStatus {
        if self
            .members
            .iter()
            .any(|m| m.status == MemberStatus::Finalized)
        {
            SessionStatus::Completed
        } else {
            SessionStatus::Skipped
        }
    }
}

/// The result of asking for a session. `session` is absent when there was
/// nothing to pick at all.
#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub session: Option<Session>,
    pub gaps: Vec<SessionGap>,
}

impl SessionPlan {
    pub fn is_empty(&self) -> bool {
        self.session.is_none()
    }
}
