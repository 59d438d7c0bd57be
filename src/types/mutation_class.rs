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

/// The ways a problem statement can be varied once it has been seen too
/// often.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationClass {
    ConstraintChange,
    InputTypeChange,
    Inversion,
    FollowUpExtension,
    Combination,
}

impl MutationClass {
    pub const ALL: [MutationClass; 5] = [
        MutationClass::ConstraintChange,
        MutationClass::InputTypeChange,
        MutationClass::Inversion,
        MutationClass::FollowUpExtension,
        MutationClass::Combination,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            MutationClass::ConstraintChange => "constraint-change",
            MutationClass::InputTypeChange => "input-type-change",
            MutationClass::Inversion => "inversion",
            MutationClass::FollowUpExtension => "follow-up-extension",
            MutationClass::Combination => "combination",
        }
    }
}

impl Display for MutationClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for MutationClass {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match MutationClass::ALL.iter().find(|c| c.as_str() == value) {
            Some(class) => Ok(*class),
            None => fail(format!("Invalid mutation class: {}", value)),
        }
    }
}

impl ToSql for MutationClass {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MutationClass {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let string: String = FromSql::column_result(value)?;
        MutationClass::try_from(string).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_class() {
        for class in MutationClass::ALL {
            assert_eq!(MutationClass::try_from(class.as_str().to_string()).unwrap(), class);
        }
        assert!(MutationClass::try_from("rewording".to_string()).is_err());
    }
}
