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

use crate::attempt::Review;
use crate::attempt::Tracker;
use crate::attempt::dispatch::MutationSink;
use crate::catalog::ProblemCatalog;
use crate::config::Config;
use crate::error::Error;
use crate::error::Fallible;
use crate::error::fail;
use crate::session::Orchestrator;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::attempt::AttemptEvent;
use crate::types::attempt::AttemptId;
use crate::types::card_id::CardId;
use crate::types::problem::ProblemId;
use crate::types::session::MemberStatus;
use crate::types::session::Session;
use crate::types::session::SessionId;
use crate::types::session::SessionPlan;
use crate::types::timestamp::Timestamp;

/// Sessions, attempts and scheduling over one store and one catalog.
pub struct Practice<S, C> {
    store: S,
    catalog: C,
    config: Config,
    orchestrator: Orchestrator,
    tracker: Tracker,
}

impl<S: Store, C: ProblemCatalog> Practice<S, C> {
    pub fn new(store: S, catalog: C, config: Config, sink: Box<dyn MutationSink>) -> Self {
        let orchestrator = Orchestrator::new(config.session.clone());
        let tracker = Tracker::new(
            config.attempts.clone(),
            config.attempts.mutation_policy.build(),
            sink,
        );
        Self {
            store,
            catalog,
            config,
            orchestrator,
            tracker,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Abandon stale sessions along with their open attempts, then plan a
    /// new session.
    pub fn plan_session(&self, now: Timestamp) -> Fallible<SessionPlan> {
        for session in self.orchestrator.release_stale(&self.store, now)? {
            for member in &session.members {
                if let Some(attempt) = self.tracker.open_attempt(member.card) {
                    self.tracker.abandon(&self.store, attempt.id, now)?;
                }
            }
        }
        self.orchestrator.plan(&self.store, &self.catalog, now)
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.orchestrator.session(id)
    }

    /// Start an attempt on a pending member of an open session.
    pub fn start_attempt(
        &self,
        session: SessionId,
        card: CardId,
        now: Timestamp,
    ) -> Fallible<Attempt> {
        let problem = self.pending_member(session, card)?;
        let minutes = self
            .catalog
            .time_budget_minutes(&problem)
            .unwrap_or(self.config.attempts.default_time_budget_minutes);
        self.tracker
            .start(&self.store, Some(session), card, minutes * 60, now)
    }

    pub fn record_event(
        &self,
        attempt: AttemptId,
        event: AttemptEvent,
        at: Timestamp,
    ) -> Fallible<Attempt> {
        self.tracker.record_event(&self.store, attempt, event, at)
    }

    /// Flag an attempt whose mutated statement could not be generated.
    /// Returns `None` if the attempt has already been closed.
    pub fn mutation_failed(&self, attempt: AttemptId) -> Fallible<Option<Attempt>> {
        match self.tracker.mutation_failed(&self.store, attempt) {
            Ok(attempt) => Ok(Some(attempt)),
            Err(Error::AttemptFinalized(_) | Error::UnknownAttempt(_)) => {
                log::debug!("Attempt {attempt} is closed; ignoring its failed mutation.");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Rate an attempt and settle its session member. The rating stands even
    /// if the session has been closed in the meantime.
    pub fn submit_rating(
        &self,
        attempt: AttemptId,
        raw_rating: u8,
        now: Timestamp,
    ) -> Fallible<(Review, Option<Session>)> {
        let review = self.tracker.submit_rating(
            &self.store,
            &self.config.scheduler,
            attempt,
            raw_rating,
            now,
        )?;
        let session = match review.attempt.session {
            Some(session) => {
                match self
                    .orchestrator
                    .finalize_member(&self.store, session, review.card.id, now)
                {
                    Ok(session) => Some(session),
                    Err(Error::UnknownSession(_)) => {
                        log::info!("Session {session} closed before attempt {attempt} was rated.");
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        Ok((review, session))
    }

    /// Skip a member, dropping its open attempt if there is one.
    pub fn skip(&self, session: SessionId, card: CardId, now: Timestamp) -> Fallible<Session> {
        if let Some(attempt) = self.tracker.open_attempt(card) {
            self.tracker.abandon(&self.store, attempt.id, now)?;
        }
        self.orchestrator.skip_member(&self.store, session, card, now)
    }

    /// Skip the whole session, dropping any open attempts of its members.
    pub fn skip_session(&self, session: SessionId, now: Timestamp) -> Fallible<Session> {
        let open = self
            .orchestrator
            .session(session)
            .ok_or(Error::UnknownSession(session))?;
        for member in &open.members {
            if let Some(attempt) = self.tracker.open_attempt(member.card) {
                self.tracker.abandon(&self.store, attempt.id, now)?;
            }
        }
        self.orchestrator.skip_session(&self.store, session, now)
    }

    fn pending_member(&self, session: SessionId, card: CardId) -> Fallible<ProblemId> {
        let open = self
            .orchestrator
            .session(session)
            .ok_or(Error::UnknownSession(session))?;
        let member = open.member(card).ok_or(Error::UnknownCard(card))?;
        if member.status != MemberStatus::Pending {
            return fail(format!(
                "card {} is already {} in session {session}",
                card.short(),
                member.status.as_str()
            ));
        }
        Ok(member.problem.clone())
    }
}
