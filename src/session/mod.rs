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

pub mod select;

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::catalog::ProblemCatalog;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::error::Fallible;
use crate::error::fail;
use crate::session::select::Candidate;
use crate::session::select::advance_cursor;
use crate::session::select::order_new;
use crate::session::select::order_reviews;
use crate::session::select::pair;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::session::Member;
use crate::types::session::MemberStatus;
use crate::types::session::Session;
use crate::types::session::SessionGap;
use crate::types::session::SessionId;
use crate::types::session::SessionPlan;
use crate::types::session::SessionStatus;
use crate::types::session::Slot;
use crate::types::timestamp::Timestamp;

#[derive(Default)]
struct State {
    open: HashMap<SessionId, Session>,
    /// Which open session holds each card.
    locks: HashMap<CardId, SessionId>,
    rotation_cursor: usize,
}

impl State {
    fn close(&mut self, id: SessionId) -> Option<Session> {
        let session = self.open.remove(&id)?;
        for member in &session.members {
            self.locks.remove(&member.card);
        }
        Some(session)
    }
}

/// Plans sessions and holds the card locks of the open ones.
pub struct Orchestrator {
    config: SessionConfig,
    state: Mutex<State>,
}

impl Orchestrator {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Pick a review card and a new card, lock them, and persist the session.
    /// Missing halves are reported as gaps; an empty plan is not persisted.
    pub fn plan<S, C>(&self, store: &S, catalog: &C, now: Timestamp) -> Fallible<SessionPlan>
    where
        S: Store + ?Sized,
        C: ProblemCatalog + ?Sized,
    {
        let mut state = self.state.lock();
        self.sweep(&mut state, store, now)?;

        let unlocked = |cards: Vec<Card>| -> Vec<Candidate> {
            cards
                .into_iter()
                .filter(|card| !state.locks.contains_key(&card.id))
                .filter(|card| catalog.contains(&card.problem))
                .map(|card| Candidate {
                    category: catalog.category(&card.problem),
                    card,
                })
                .collect()
        };
        let mut reviews = unlocked(store.review_candidates(now)?);
        let mut news = unlocked(store.new_candidates()?);
        order_reviews(&mut reviews);
        order_new(&mut news, &self.config.new_card_order, state.rotation_cursor);
        let (review, new) = pair(&reviews, &news);

        let mut gaps = Vec::new();
        if review.is_none() {
            gaps.push(SessionGap::NoDueCards);
        }
        if new.is_none() {
            gaps.push(SessionGap::NoNewCards);
        }
        let picks = [(Slot::New, new.map(|i| &news[i])), (Slot::Review, review.map(|i| &reviews[i]))];
        let members: Vec<Member> = picks
            .into_iter()
            .filter_map(|(slot, pick)| {
                pick.map(|candidate| Member {
                    slot,
                    card: candidate.card.id,
                    problem: candidate.card.problem.clone(),
                    category: candidate.category.clone(),
                    status: MemberStatus::Pending,
                })
            })
            .collect();
        if members.is_empty() {
            log::info!("Nothing to practise: no due reviews and no new problems.");
            return Ok(SessionPlan {
                session: None,
                gaps,
            });
        }

        let id = store.insert_session(now, &members)?;
        let session = Session {
            id,
            started_at: now,
            ended_at: None,
            status: SessionStatus::Open,
            members,
        };
        for member in &session.members {
            state.locks.insert(member.card, id);
        }
        if let Some(member) = session.member_in(Slot::New) {
            state.rotation_cursor = advance_cursor(
                &self.config.new_card_order,
                state.rotation_cursor,
                member.category.as_ref(),
            );
        }
        state.open.insert(id, session.clone());
        log::info!(
            "Planned session {id}: {}.",
            session
                .members
                .iter()
                .map(|m| format!("{} {}", m.slot.as_str(), m.problem))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(SessionPlan {
            session: Some(session),
            gaps,
        })
    }

    /// Mark a member's attempt as rated.
    pub fn finalize_member<S: Store + ?Sized>(
        &self,
        store: &S,
        session: SessionId,
        card: CardId,
        now: Timestamp,
    ) -> Fallible<Session> {
        self.settle(store, session, card, MemberStatus::Finalized, now)
    }

    pub fn skip_member<S: Store + ?Sized>(
        &self,
        store: &S,
        session: SessionId,
        card: CardId,
        now: Timestamp,
    ) -> Fallible<Session> {
        self.settle(store, session, card, MemberStatus::Skipped, now)
    }

    fn settle<S: Store + ?Sized>(
        &self,
        store: &S,
        id: SessionId,
        card: CardId,
        status: MemberStatus,
        now: Timestamp,
    ) -> Fallible<Session> {
        let mut state = self.state.lock();
        let session = state.open.get(&id).ok_or(Error::UnknownSession(id))?;
        let mut session = session.clone();
        let member = session
            .members
            .iter_mut()
            .find(|m| m.card == card)
            .ok_or(Error::UnknownCard(card))?;
        if member.status != MemberStatus::Pending {
            return fail(format!(
                "card {} is already {} in session {id}",
                card.short(),
                member.status.as_str()
            ));
        }
        member.status = status;
        if session.is_settled() {
            session.status = session.settled_status();
            session.ended_at = Some(now);
        }
        store.update_session(&session)?;
        if session.status == SessionStatus::Open {
            state.open.insert(id, session.clone());
        } else {
            state.close(id);
            log::info!("Session {id} is {}.", session.status.as_str());
        }
        Ok(session)
    }

    /// Skip every pending member and close the session.
    pub fn skip_session<S: Store + ?Sized>(
        &self,
        store: &S,
        id: SessionId,
        now: Timestamp,
    ) -> Fallible<Session> {
        let mut state = self.state.lock();
        let mut session = state
            .open
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownSession(id))?;
        for member in &mut session.members {
            if member.status == MemberStatus::Pending {
                member.status = MemberStatus::Skipped;
            }
        }
        session.status = session.settled_status();
        session.ended_at = Some(now);
        store.update_session(&session)?;
        state.close(id);
        log::info!("Session {id} is {}.", session.status.as_str());
        Ok(session)
    }

    /// Abandon open sessions older than the staleness timeout and return
    /// them as they were when abandoned.
    pub fn release_stale<S: Store + ?Sized>(
        &self,
        store: &S,
        now: Timestamp,
    ) -> Fallible<Vec<Session>> {
        let mut state = self.state.lock();
        self.sweep(&mut state, store, now)
    }

    fn sweep<S: Store + ?Sized>(
        &self,
        state: &mut State,
        store: &S,
        now: Timestamp,
    ) -> Fallible<Vec<Session>> {
        let cutoff = now.plus_minutes(-self.config.stale_after_minutes)?;
        let mut ids: Vec<SessionId> = state
            .open
            .values()
            .filter(|session| session.started_at < cutoff)
            .map(|session| session.id)
            .collect();
        ids.sort();
        let mut stale = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = state.open.get(&id) {
                let mut session = session.clone();
                session.status = SessionStatus::Abandoned;
                session.ended_at = Some(now);
                store.update_session(&session)?;
                state.close(id);
                log::warn!("Session {id} went stale and was abandoned.");
                stale.push(session);
            }
        }
        Ok(stale)
    }

    pub fn is_locked(&self, card: CardId) -> bool {
        self.state.lock().locks.contains_key(&card)
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.state.lock().open.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::NewCardOrder;
    use crate::db::Database;
    use crate::types::card::CardState;
    use crate::types::card::MemoryState;
    use crate::types::card_kind::CardKind;
    use crate::types::problem::Category;
    use crate::types::problem::ProblemId;

    type Categories = HashMap<ProblemId, Category>;

    struct Fixture {
        db: Database,
        catalog: Categories,
        now: Timestamp,
    }

    impl Fixture {
        fn new() -> Fallible<Self> {
            Ok(Self {
                db: Database::in_memory()?,
                catalog: HashMap::new(),
                now: Timestamp::now(),
            })
        }

        fn new_card(&mut self, name: &str, category: &str, age_minutes: i64) -> Fallible<Card> {
            let problem = ProblemId::new(name);
            self.catalog.insert(problem.clone(), Category::new(category));
            let card = Card::new(problem, CardKind::Solve, self.now.plus_minutes(-age_minutes).unwrap());
            self.db.insert_card(&card)?;
            Ok(card)
        }

        fn review_card(&mut self, name: &str, category: &str, due_days: i64) -> Fallible<Card> {
            let mut card = self.new_card(name, category, 60 * 24 * 30)?;
            card.state = CardState::Review;
            card.memory = Some(MemoryState {
                difficulty: 5.0,
                stability: 4.0,
            });
            card.last_review = Some(self.now.plus_days(due_days - 4).unwrap());
            card.due = self.now.plus_days(due_days).unwrap();
            self.db.update_card(card.version, &card)
        }

        fn plan(&self, orchestrator: &Orchestrator) -> Fallible<SessionPlan> {
            orchestrator.plan(&self.db, &self.catalog, self.now)
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(SessionConfig::default())
    }

    fn problems(session: &Session) -> Vec<(Slot, &str)> {
        session
            .members
            .iter()
            .map(|m| (m.slot, m.problem.as_str()))
            .collect()
    }

    #[test]
    fn test_full_session() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.review_card("min-window", "sliding-window", -1)?;
        f.review_card("not-yet", "graphs", 2)?;
        f.new_card("two-sum", "hashing", 10)?;
        let orchestrator = orchestrator();
        let plan = f.plan(&orchestrator)?;
        assert!(plan.gaps.is_empty());
        let session = plan.session.unwrap();
        assert_eq!(
            problems(&session),
            vec![(Slot::New, "two-sum"), (Slot::Review, "min-window")]
        );
        assert_eq!(f.db.sessions()?, vec![session.clone()]);
        for member in &session.members {
            assert!(orchestrator.is_locked(member.card));
        }
        Ok(())
    }

    #[test]
    fn test_interleaves_categories() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.review_card("dijkstra", "graphs", -1)?;
        f.new_card("bfs", "graphs", 20)?;
        f.new_card("edit-distance", "dp", 10)?;
        let session = f.plan(&orchestrator())?.session.unwrap();
        assert_eq!(
            problems(&session),
            vec![(Slot::New, "edit-distance"), (Slot::Review, "dijkstra")]
        );
        Ok(())
    }

    #[test]
    fn test_no_due_cards() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.review_card("later", "graphs", 3)?;
        f.new_card("two-sum", "hashing", 10)?;
        let plan = f.plan(&orchestrator())?;
        assert_eq!(plan.gaps, vec![SessionGap::NoDueCards]);
        assert_eq!(
            problems(&plan.session.unwrap()),
            vec![(Slot::New, "two-sum")]
        );
        Ok(())
    }

    #[test]
    fn test_no_new_cards() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.review_card("dijkstra", "graphs", 0)?;
        let plan = f.plan(&orchestrator())?;
        assert_eq!(plan.gaps, vec![SessionGap::NoNewCards]);
        assert_eq!(
            problems(&plan.session.unwrap()),
            vec![(Slot::Review, "dijkstra")]
        );
        Ok(())
    }

    #[test]
    fn test_empty_plan_is_not_persisted() -> Fallible<()> {
        let f = Fixture::new()?;
        let plan = f.plan(&orchestrator())?;
        assert!(plan.is_empty());
        assert_eq!(plan.gaps, vec![SessionGap::NoDueCards, SessionGap::NoNewCards]);
        assert!(f.db.sessions()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_locked_cards_are_not_planned_twice() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.new_card("two-sum", "hashing", 20)?;
        f.new_card("three-sum", "two-pointers", 10)?;
        let orchestrator = orchestrator();
        let first = f.plan(&orchestrator)?.session.unwrap();
        let second = f.plan(&orchestrator)?.session.unwrap();
        assert_eq!(problems(&first), vec![(Slot::New, "two-sum")]);
        assert_eq!(problems(&second), vec![(Slot::New, "three-sum")]);
        assert!(f.plan(&orchestrator)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_settling_members_completes_the_session() -> Fallible<()> {
        let mut f = Fixture::new()?;
        let review = f.review_card("dijkstra", "graphs", -1)?;
        let new = f.new_card("two-sum", "hashing", 10)?;
        let orchestrator = orchestrator();
        let session = f.plan(&orchestrator)?.session.unwrap();
        let partial = orchestrator.finalize_member(&f.db, session.id, new.id, f.now)?;
        assert_eq!(partial.status, SessionStatus::Open);
        assert!(orchestrator.is_locked(review.id));
        assert!(orchestrator.finalize_member(&f.db, session.id, new.id, f.now).is_err());
        let done = orchestrator.skip_member(&f.db, session.id, review.id, f.now)?;
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.ended_at, Some(f.now));
        assert!(!orchestrator.is_locked(review.id));
        assert!(!orchestrator.is_locked(new.id));
        assert_eq!(f.db.sessions()?[0].status, SessionStatus::Completed);
        assert!(matches!(
            orchestrator.skip_member(&f.db, session.id, review.id, f.now),
            Err(Error::UnknownSession(_))
        ));
        Ok(())
    }

    #[test]
    fn test_skip_session_releases_locks() -> Fallible<()> {
        let mut f = Fixture::new()?;
        let card = f.new_card("two-sum", "hashing", 10)?;
        let orchestrator = orchestrator();
        let session = f.plan(&orchestrator)?.session.unwrap();
        let skipped = orchestrator.skip_session(&f.db, session.id, f.now)?;
        assert_eq!(skipped.status, SessionStatus::Skipped);
        assert!(!orchestrator.is_locked(card.id));
        let again = f.plan(&orchestrator)?.session.unwrap();
        assert_eq!(again.members[0].card, card.id);
        Ok(())
    }

    #[test]
    fn test_stale_sessions_are_abandoned() -> Fallible<()> {
        let mut f = Fixture::new()?;
        let card = f.new_card("two-sum", "hashing", 10)?;
        let orchestrator = orchestrator();
        let session = f.plan(&orchestrator)?.session.unwrap();
        assert!(orchestrator.release_stale(&f.db, f.now.plus_minutes(60).unwrap())?.is_empty());
        let stale = orchestrator.release_stale(&f.db, f.now.plus_minutes(121).unwrap())?;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, session.id);
        assert_eq!(stale[0].status, SessionStatus::Abandoned);
        assert_eq!(stale[0].members[0].card, card.id);
        assert!(!orchestrator.is_locked(card.id));
        assert_eq!(f.db.sessions()?[0].status, SessionStatus::Abandoned);
        Ok(())
    }

    #[test]
    fn test_plan_sweeps_stale_sessions() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.new_card("two-sum", "hashing", 10)?;
        let orchestrator = orchestrator();
        let first = f.plan(&orchestrator)?.session.unwrap();
        let later = orchestrator.plan(&f.db, &f.catalog, f.now.plus_minutes(200).unwrap())?;
        let second = later.session.unwrap();
        assert_eq!(second.members[0].card, first.members[0].card);
        assert!(orchestrator.session(first.id).is_none());
        Ok(())
    }

    #[test]
    fn test_unlisted_problems_are_not_planned() -> Fallible<()> {
        let mut f = Fixture::new()?;
        let removed = f.new_card("retired", "graphs", 20)?;
        f.review_card("old-review", "dp", -1)?;
        f.new_card("two-sum", "hashing", 10)?;
        f.catalog.remove(&removed.problem);
        f.catalog.remove(&ProblemId::new("old-review"));
        let plan = f.plan(&orchestrator())?;
        assert_eq!(plan.gaps, vec![SessionGap::NoDueCards]);
        assert_eq!(
            problems(&plan.session.unwrap()),
            vec![(Slot::New, "two-sum")]
        );
        // The rows stay for their history.
        assert_eq!(f.db.cards()?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_rotation_advances_across_sessions() -> Fallible<()> {
        let mut f = Fixture::new()?;
        f.new_card("knapsack", "dp", 30)?;
        f.new_card("bfs", "graphs", 20)?;
        f.new_card("dfs", "graphs", 10)?;
        let orchestrator = Orchestrator::new(SessionConfig {
            new_card_order: NewCardOrder::Rotation(vec![
                Category::new("graphs"),
                Category::new("dp"),
            ]),
            ..SessionConfig::default()
        });
        let picked: Vec<String> = (0..3)
            .map(|_| -> Fallible<String> {
                let session = f.plan(&orchestrator)?.session.unwrap();
                Ok(session.members[0].problem.to_string())
            })
            .collect::<Fallible<_>>()?;
        assert_eq!(picked, vec!["bfs", "knapsack", "dfs"]);
        Ok(())
    }
}
