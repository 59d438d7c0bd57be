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

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::config::DbConfig;

use crate::error::Error;
use crate::error::Fallible;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::attempt::AttemptId;
use crate::types::card::Card;
use crate::types::card::MemoryState;
use crate::types::card_id::CardId;
use crate::types::problem::Category;
use crate::types::problem::ProblemId;
use crate::types::session::Member;
use crate::types::session::Session;
use crate::types::session::SessionId;
use crate::types::session::SessionStatus;
use crate::types::timestamp::Timestamp;

const CARD_COLUMNS: &str = "card_id, problem_id, card_kind, state, difficulty, stability, due, last_review, reps, lapses, created_at, version";

const ATTEMPT_COLUMNS: &str = "attempt_id, session_id, problem_id, card_id, ordinal, started_at, finished_at, time_budget, rating, gave_up, timed_out, was_mutation, mutation_class, degraded";

/// SQLite implementation of the [`Store`] contract.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(database_path: &str) -> Fallible<Self> {
        let conn = Connection::open(database_path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Fallible<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Fallible<Self> {
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
        {
            let tx = conn.transaction()?;
            if !probe_schema_exists(&tx)? {
                log::debug!("Creating database schema.");
                tx.execute_batch(include_str!("schema.sql"))?;
                tx.commit()?;
            }
        }
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self { conn })
    }

    fn acquire(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn query_cards(&self, sql: &str) -> Fallible<Vec<Card>> {
        let conn = self.acquire();
        let mut stmt = conn.prepare(sql)?;
        let cards = stmt
            .query_map([], card_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cards)
    }
}

impl Store for Database {
    fn card(&self, id: CardId) -> Fallible<Option<Card>> {
        let conn = self.acquire();
        let sql = format!("select {CARD_COLUMNS} from cards where card_id = ?;");
        let card = conn.query_row(&sql, [id], card_from_row).optional()?;
        Ok(card)
    }

    fn cards(&self) -> Fallible<Vec<Card>> {
        self.query_cards(&format!(
            "select {CARD_COLUMNS} from cards order by created_at, card_id;"
        ))
    }

    fn insert_card(&self, card: &Card) -> Fallible<()> {
        log::debug!("Adding new card: {} ({} {})", card.id.short(), card.problem, card.kind);
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let sql = format!(
            "insert into cards ({CARD_COLUMNS}) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);"
        );
        tx.execute(
            &sql,
            (
                card.id,
                &card.problem,
                card.kind,
                card.state,
                card.memory.map(|m| m.difficulty),
                card.memory.map(|m| m.stability),
                card.due,
                card.last_review,
                card.reps,
                card.lapses,
                card.created_at,
                card.version,
            ),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_card(&self, expected_version: i64, card: &Card) -> Fallible<Card> {
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let found: Option<i64> = tx
            .query_row(
                "select version from cards where card_id = ?;",
                [card.id],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            None => return Err(Error::UnknownCard(card.id)),
            Some(found) if found != expected_version => {
                return Err(Error::VersionConflict {
                    card: card.id,
                    expected: expected_version,
                    found,
                });
            }
            Some(_) => {}
        }
        let version = expected_version + 1;
        let sql = "update cards set state = ?, difficulty = ?, stability = ?, due = ?, last_review = ?, reps = ?, lapses = ?, version = ? where card_id = ? and version = ?;";
        tx.execute(
            sql,
            (
                card.state,
                card.memory.map(|m| m.difficulty),
                card.memory.map(|m| m.stability),
                card.due,
                card.last_review,
                card.reps,
                card.lapses,
                version,
                card.id,
                expected_version,
            ),
        )?;
        tx.commit()?;
        Ok(Card {
            version,
            ..card.clone()
        })
    }

    fn review_candidates(&self, now: Timestamp) -> Fallible<Vec<Card>> {
        let cards = self.query_cards(&format!(
            "select {CARD_COLUMNS} from cards where state != 'new';"
        ))?;
        Ok(cards.into_iter().filter(|card| card.is_due(now)).collect())
    }

    fn new_candidates(&self) -> Fallible<Vec<Card>> {
        self.query_cards(&format!(
            "select {CARD_COLUMNS} from cards where state = 'new' order by created_at, card_id;"
        ))
    }

    fn insert_attempt(&self, attempt: &Attempt) -> Fallible<AttemptId> {
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let sql = "insert into attempts (session_id, problem_id, card_id, ordinal, started_at, finished_at, time_budget, rating, gave_up, timed_out, was_mutation, mutation_class, degraded) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) returning attempt_id;";
        let id: AttemptId = tx.query_row(
            sql,
            (
                attempt.session,
                &attempt.problem,
                attempt.card,
                attempt.ordinal,
                attempt.started_at,
                attempt.finished_at,
                attempt.time_budget,
                attempt.rating,
                attempt.gave_up,
                attempt.timed_out,
                attempt.was_mutation,
                attempt.mutation_class,
                attempt.degraded,
            ),
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn update_attempt(&self, attempt: &Attempt) -> Fallible<()> {
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let sql = "update attempts set finished_at = ?, rating = ?, gave_up = ?, timed_out = ?, was_mutation = ?, mutation_class = ?, degraded = ? where attempt_id = ? and rating is null;";
        let changed = tx.execute(
            sql,
            (
                attempt.finished_at,
                attempt.rating,
                attempt.gave_up,
                attempt.timed_out,
                attempt.was_mutation,
                attempt.mutation_class,
                attempt.degraded,
                attempt.id,
            ),
        )?;
        if changed == 0 {
            let exists: Option<i64> = tx
                .query_row(
                    "select attempt_id from attempts where attempt_id = ?;",
                    [attempt.id],
                    |row| row.get(0),
                )
                .optional()?;
            return match exists {
                Some(_) => Err(Error::AttemptFinalized(attempt.id)),
                None => Err(Error::UnknownAttempt(attempt.id)),
            };
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_attempt(&self, id: AttemptId) -> Fallible<()> {
        let conn = self.acquire();
        conn.execute(
            "delete from attempts where attempt_id = ? and rating is null;",
            [id],
        )?;
        Ok(())
    }

    fn attempt(&self, id: AttemptId) -> Fallible<Option<Attempt>> {
        let conn = self.acquire();
        let sql = format!("select {ATTEMPT_COLUMNS} from attempts where attempt_id = ?;");
        let attempt = conn.query_row(&sql, [id], attempt_from_row).optional()?;
        Ok(attempt)
    }

    fn attempts_for_problem(&self, problem: &ProblemId) -> Fallible<Vec<Attempt>> {
        let conn = self.acquire();
        let sql =
            format!("select {ATTEMPT_COLUMNS} from attempts where problem_id = ? order by ordinal;");
        let mut stmt = conn.prepare(&sql)?;
        let attempts = stmt
            .query_map([problem], attempt_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attempts)
    }

    fn attempts(&self) -> Fallible<Vec<Attempt>> {
        let conn = self.acquire();
        let sql = format!("select {ATTEMPT_COLUMNS} from attempts order by attempt_id;");
        let mut stmt = conn.prepare(&sql)?;
        let attempts = stmt
            .query_map([], attempt_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attempts)
    }

    fn insert_session(&self, started_at: Timestamp, members: &[Member]) -> Fallible<SessionId> {
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let sql = "insert into sessions (started_at, ended_at, status) values (?, null, ?) returning session_id;";
        let session_id: SessionId =
            tx.query_row(sql, (started_at, SessionStatus::Open), |row| row.get(0))?;
        for member in members {
            insert_member(&tx, session_id, member)?;
        }
        tx.commit()?;
        Ok(session_id)
    }

    fn update_session(&self, session: &Session) -> Fallible<()> {
        let mut conn = self.acquire();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "update sessions set ended_at = ?, status = ? where session_id = ?;",
            (session.ended_at, session.status, session.id),
        )?;
        if changed == 0 {
            return Err(Error::UnknownSession(session.id));
        }
        for member in &session.members {
            tx.execute(
                "update session_members set status = ? where session_id = ? and slot = ?;",
                (member.status, session.id, member.slot),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn sessions(&self) -> Fallible<Vec<Session>> {
        let conn = self.acquire();
        let mut members: HashMap<SessionId, Vec<Member>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "select session_id, slot, card_id, problem_id, category, status from session_members order by session_id, slot;",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let session_id: SessionId = row.get(0)?;
                let category: Option<String> = row.get(4)?;
                members.entry(session_id).or_default().push(Member {
                    slot: row.get(1)?,
                    card: row.get(2)?,
                    problem: row.get(3)?,
                    category: category.map(Category::new),
                    status: row.get(5)?,
                });
            }
        }
        let mut stmt = conn
            .prepare("select session_id, started_at, ended_at, status from sessions order by session_id;")?;
        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            let id: SessionId = row.get(0)?;
            sessions.push(Session {
                id,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                status: row.get(3)?,
                members: members.remove(&id).unwrap_or_default(),
            });
        }
        Ok(sessions)
    }
}

fn card_from_row(row: &Row) -> rusqlite::Result<Card> {
    let difficulty: Option<f64> = row.get(4)?;
    let stability: Option<f64> = row.get(5)?;
    let memory = match (difficulty, stability) {
        (Some(difficulty), Some(stability)) => Some(MemoryState {
            difficulty,
            stability,
        }),
        _ => None,
    };
    Ok(Card {
        id: row.get(0)?,
        problem: row.get(1)?,
        kind: row.get(2)?,
        state: row.get(3)?,
        memory,
        due: row.get(6)?,
        last_review: row.get(7)?,
        reps: row.get(8)?,
        lapses: row.get(9)?,
        created_at: row.get(10)?,
        version: row.get(11)?,
    })
}

fn attempt_from_row(row: &Row) -> rusqlite::Result<Attempt> {
    Ok(Attempt {
        id: row.get(0)?,
        session: row.get(1)?,
        problem: row.get(2)?,
        card: row.get(3)?,
        ordinal: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        time_budget: row.get(7)?,
        rating: row.get(8)?,
        gave_up: row.get(9)?,
        timed_out: row.get(10)?,
        was_mutation: row.get(11)?,
        mutation_class: row.get(12)?,
        degraded: row.get(13)?,
    })
}

fn insert_member(tx: &Transaction, session_id: SessionId, member: &Member) -> Fallible<()> {
    let sql = "insert into session_members (session_id, slot, card_id, problem_id, category, status) values (?, ?, ?, ?, ?, ?);";
    tx.execute(
        sql,
        (
            session_id,
            member.slot,
            member.card,
            &member.problem,
            member.category.as_ref().map(|c| c.as_str()),
            member.status,
        ),
    )?;
    Ok(())
}

fn probe_schema_exists(tx: &Transaction) -> Fallible<bool> {
    let sql = "select count(*) from sqlite_master where type='table' AND name=?;";
    let count: i64 = tx.query_row(sql, ["cards"], |row| row.get(0))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::types::card::CardState;
    use crate::types::card_kind::CardKind;
    use crate::types::rating::Rating;
    use crate::types::session::MemberStatus;
    use crate::types::session::Slot;

    fn card(problem: &str) -> Card {
        Card::new(ProblemId::new(problem), CardKind::Solve, Timestamp::now())
    }

    fn attempt(card: &Card, ordinal: u32) -> Attempt {
        Attempt {
            id: AttemptId(0),
            session: None,
            problem: card.problem.clone(),
            card: card.id,
            ordinal,
            started_at: Timestamp::now(),
            finished_at: None,
            time_budget: 1800,
            rating: None,
            gave_up: false,
            timed_out: false,
            was_mutation: false,
            mutation_class: None,
            degraded: false,
        }
    }

    #[test]
    fn test_insert_and_get_card() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        assert_eq!(db.card(card.id)?, Some(card.clone()));
        assert_eq!(db.cards()?.len(), 1);
        assert_eq!(db.new_candidates()?, vec![card]);
        assert!(db.review_candidates(Timestamp::now())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_duplicate_card_is_rejected() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        assert!(db.insert_card(&card).is_err());
        Ok(())
    }

    #[test]
    fn test_update_bumps_version() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        let now = Timestamp::now();
        let reviewed = Card {
            state: CardState::Review,
            memory: Some(MemoryState {
                difficulty: 5.0,
                stability: 3.0,
            }),
            last_review: Some(now),
            due: now.plus_days(3).unwrap(),
            reps: 1,
            ..card.clone()
        };
        let stored = db.update_card(0, &reviewed)?;
        assert_eq!(stored.version, 1);
        assert_eq!(db.card(card.id)?, Some(stored));
        assert!(db.new_candidates()?.is_empty());
        assert_eq!(db.review_candidates(now.plus_days(3).unwrap())?.len(), 1);
        assert!(db.review_candidates(now.plus_days(2).unwrap())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_stale_update_is_a_version_conflict() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        db.update_card(0, &Card { reps: 1, ..card.clone() })?;
        let result = db.update_card(0, &Card { reps: 5, ..card.clone() });
        assert!(matches!(
            result,
            Err(Error::VersionConflict {
                expected: 0,
                found: 1,
                ..
            })
        ));
        assert_eq!(db.card(card.id)?.map(|c| c.reps), Some(1));
        Ok(())
    }

    #[test]
    fn test_update_unknown_card() -> Fallible<()> {
        let db = Database::in_memory()?;
        let result = db.update_card(0, &card("ghost"));
        assert!(matches!(result, Err(Error::UnknownCard(_))));
        Ok(())
    }

    #[test]
    fn test_finalized_attempt_is_immutable() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        let id = db.insert_attempt(&attempt(&card, 1))?;
        let mut stored = db.attempt(id)?.unwrap();
        assert_eq!(stored.id, id);
        stored.rating = Some(Rating::Good);
        stored.finished_at = Some(Timestamp::now());
        db.update_attempt(&stored)?;
        stored.rating = Some(Rating::Again);
        assert!(matches!(
            db.update_attempt(&stored),
            Err(Error::AttemptFinalized(_))
        ));
        assert_eq!(db.attempt(id)?.unwrap().rating, Some(Rating::Good));
        db.delete_attempt(id)?;
        assert!(db.attempt(id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_delete_open_attempt() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        let id = db.insert_attempt(&attempt(&card, 1))?;
        db.delete_attempt(id)?;
        assert!(db.attempt(id)?.is_none());
        assert!(db.attempts_for_problem(&card.problem)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_attempts_for_problem_in_order() -> Fallible<()> {
        let db = Database::in_memory()?;
        let a = card("two-sum");
        let b = card("lru-cache");
        db.insert_card(&a)?;
        db.insert_card(&b)?;
        db.insert_attempt(&attempt(&a, 1))?;
        db.insert_attempt(&attempt(&b, 1))?;
        db.insert_attempt(&attempt(&a, 2))?;
        let ordinals: Vec<u32> = db
            .attempts_for_problem(&a.problem)?
            .iter()
            .map(|a| a.ordinal)
            .collect();
        assert_eq!(ordinals, vec![1, 2]);
        assert_eq!(db.attempts()?.len(), 3);
        // The same ordinal twice for one problem is rejected.
        assert!(db.insert_attempt(&attempt(&a, 2)).is_err());
        Ok(())
    }

    #[test]
    fn test_session_roundtrip() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = card("two-sum");
        db.insert_card(&card)?;
        let member = Member {
            slot: Slot::New,
            card: card.id,
            problem: card.problem.clone(),
            category: Some(Category::new("hashing")),
            status: MemberStatus::Pending,
        };
        let started_at = Timestamp::now();
        let id = db.insert_session(started_at, &[member.clone()])?;
        let mut session = db.sessions()?.remove(0);
        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.members, vec![member]);
        session.members[0].status = MemberStatus::Finalized;
        session.status = SessionStatus::Completed;
        session.ended_at = Some(Timestamp::now());
        db.update_session(&session)?;
        assert_eq!(db.sessions()?, vec![session]);
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_data() -> Fallible<()> {
        let dir = tempdir()?;
        let path = dir.path().join("drillbit.db");
        let path = path.to_str().unwrap();
        let card = card("two-sum");
        {
            let db = Database::new(path)?;
            db.insert_card(&card)?;
        }
        let db = Database::new(path)?;
        assert_eq!(db.card(card.id)?, Some(card));
        Ok(())
    }
}
