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

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use rusqlite::ToSql;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;
use serde::Serialize;

use crate::error::Fallible;
use crate::error::fail;

/// A full-precision UTC instant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }

    /// Fails instead of overflowing when the result is outside chrono's
    /// range.
    pub fn plus(self, duration: Duration) -> Fallible<Self> {
        match self.0.checked_add_signed(duration) {
            Some(ts) => Ok(Self(ts)),
            None => fail(format!("{self} plus {duration} is out of range")),
        }
    }

    pub fn plus_days(self, days: i64) -> Fallible<Self> {
        match Duration::try_days(days) {
            Some(duration) => self.plus(duration),
            None => fail(format!("{days} days is out of range")),
        }
    }

    pub fn plus_minutes(self, minutes: i64) -> Fallible<Self> {
        match Duration::try_minutes(minutes) {
            Some(duration) => self.plus(duration),
            None => fail(format!("{minutes} minutes is out of range")),
        }
    }

    /// Whole days elapsed since `earlier`, truncated. Never negative: a clock
    /// that went backwards counts as zero days.
    pub fn whole_days_since(self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).num_days().max(0)
    }

    /// Whole seconds elapsed since `earlier`, never negative.
    pub fn seconds_since(self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).num_seconds().max(0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let str = self.0.to_rfc3339();
        Ok(ToSqlOutput::from(str))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let string: String = FromSql::column_result(value)?;
        let ts =
            DateTime::parse_from_rfc3339(&string).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        let ts = ts.with_timezone(&Utc);
        Ok(Timestamp(ts))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_whole_days_truncate() {
        let a = Timestamp::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
        let b = Timestamp::new(Utc.with_ymd_and_hms(2025, 1, 3, 11, 59, 0).unwrap());
        assert_eq!(b.whole_days_since(a), 1);
        assert_eq!(a.whole_days_since(b), 0);
    }

    #[test]
    fn test_arithmetic_out_of_range_fails() {
        let ts = Timestamp::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(ts.plus_days(i64::MAX / 2).is_err());
        assert!(ts.plus_days(1_000_000_000).is_err());
        assert!(ts.plus_minutes(i64::MIN).is_err());
        assert_eq!(
            ts.plus_days(2).unwrap(),
            Timestamp::new(Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_display_is_rfc3339() {
        let ts = Timestamp::new(Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap());
        assert_eq!(ts.to_string(), "2025-03-04T05:06:07+00:00");
    }
}
