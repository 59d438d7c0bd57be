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

use clap::ValueEnum;
use rusqlite::ToSql;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::fail;

/// What the learner is asked to do with a problem. Each (problem, kind) pair
/// is scheduled as its own card.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    /// Write a working solution within the time budget.
    Solve,
    /// Name the pattern or approach that cracks the problem.
    Recognize,
}

impl CardKind {
    pub fn as_str(&self) -> &str {
        match self {
            CardKind::Solve => "solve",
            CardKind::Recognize => "recognize",
        }
    }
}

impl Display for CardKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for CardKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "solve" => Ok(CardKind::Solve),
            "recognize" => Ok(CardKind::Recognize),
            _ => fail(format!("Invalid card kind: {}", value)),
        }
    }
}

impl ToSql for CardKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CardKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let string: String = FromSql::column_result(value)?;
        CardKind::try_from(string).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(CardKind::try_from("solve".to_string()).unwrap(), CardKind::Solve);
        assert_eq!(
            CardKind::try_from("recognize".to_string()).unwrap(),
            CardKind::Recognize
        );
        assert!(CardKind::try_from("cloze".to_string()).is_err());
    }
}
