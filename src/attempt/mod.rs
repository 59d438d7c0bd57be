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

pub mod dispatch;
pub mod policy;
pub mod timer;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RawMutex;
use parking_lot::lock_api::ArcMutexGuard;

use crate::attempt::dispatch::MutationSink;
use crate::attempt::policy::MutationPolicy;
use crate::attempt::policy::MutationRequest;
use crate::attempt::policy::should_mutate;
use crate::config::AttemptConfig;
use crate::error::Error;
use crate::error::Fallible;
use crate::fsrs::Parameters;
use crate::scheduler::fuzz_seed;
use crate::scheduler::schedule;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::attempt::AttemptEvent;
use crate::types::attempt::AttemptId;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::problem::ProblemId;
use crate::types::rating::Rating;
use crate::types::session::SessionId;
use crate::types::timestamp::Timestamp;

/// The result of rating an attempt.
#[derive(Clone, Debug)]
pub struct Review {
    pub attempt: Attempt,
    pub card: Card,
}

#[derive(Default)]
struct OpenAttempts {
    attempts: HashMap<AttemptId, Attempt>,
    by_card: HashMap<CardId, AttemptId>,
}

impl OpenAttempts {
    fn insert(&mut self, attempt: Attempt) {
        self.by_card.insert(attempt.card, attempt.id);
        self.attempts.insert(attempt.id, attempt);
    }

    fn remove(&mut self, id: AttemptId) -> Option<Attempt> {
        let attempt = self.attempts.remove(&id)?;
        self.by_card.remove(&attempt.card);
        Some(attempt)
    }
}

type Guard = ArcMutexGuard<RawMutex, ()>;

/// One mutex per key, created on first use.
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn lock(&self, key: &K) -> Guard {
        let lock = self.locks.lock().entry(key.clone()).or_default().clone();
        lock.lock_arc()
    }
}

/// Logs attempts, decides which ones are mutated, and turns ratings into
/// card updates.
///
/// Every change to a card or to its open attempt happens under that card's
/// writer lock. Starting an attempt also holds the problem's lock, since
/// ordinals are counted per problem. The `open` map is only held for lookups.
pub struct Tracker {
    config: AttemptConfig,
    policy: Box<dyn MutationPolicy>,
    sink: Box<dyn MutationSink>,
    open: Mutex<OpenAttempts>,
    writers: KeyedLocks<CardId>,
    problems: KeyedLocks<ProblemId>,
}

impl Tracker {
    pub fn new(
        config: AttemptConfig,
        policy: Box<dyn MutationPolicy>,
        sink: Box<dyn MutationSink>,
    ) -> Self {
        Self {
            config,
            policy,
            sink,
            open: Mutex::new(OpenAttempts::default()),
            writers: KeyedLocks::default(),
            problems: KeyedLocks::default(),
        }
    }

    /// Start an attempt on `card`. At most one attempt per card may be open.
    pub fn start<S: Store + ?Sized>(
        &self,
        store: &S,
        session: Option<SessionId>,
        card: CardId,
        time_budget_seconds: i64,
        now: Timestamp,
    ) -> Fallible<Attempt> {
        let card = store.card(card)?.ok_or(Error::UnknownCard(card))?;
        let _problem = self.problems.lock(&card.problem);
        let _writer = self.writers.lock(&card.id);
        let in_progress = self.open.lock().by_card.get(&card.id).copied();
        if let Some(attempt) = in_progress {
            return Err(Error::AttemptInProgress {
                card: card.id,
                attempt,
            });
        }
        let history = store.attempts_for_problem(&card.problem)?;
        let ordinal = history.last().map(|a| a.ordinal).unwrap_or(0) + 1;
        let was_mutation = should_mutate(self.config.mutation_threshold, ordinal);
        let mutation_class = if was_mutation {
            let prior_mutations = history.iter().filter(|a| a.was_mutation).count() as u32;
            Some(self.policy.choose(&card.problem, prior_mutations))
        } else {
            None
        };
        let mut attempt = Attempt {
            id: AttemptId(0),
            session,
            problem: card.problem.clone(),
            card: card.id,
            ordinal,
            started_at: now,
            finished_at: None,
            time_budget: time_budget_seconds,
            rating: None,
            gave_up: false,
            timed_out: false,
            was_mutation,
            mutation_class,
            degraded: false,
        };
        attempt.id = store.insert_attempt(&attempt)?;
        if let Some(class) = mutation_class {
            let request = MutationRequest::new(&card.problem, class, ordinal, &history);
            if let Err(e) = self.sink.submit(attempt.id, request) {
                log::warn!(
                    "Attempt {} of {} falls back to the original statement: {e}",
                    attempt.id,
                    card.problem
                );
                attempt.degraded = true;
                if let Err(e) = store.update_attempt(&attempt) {
                    // An attempt that never opened must not count towards
                    // later ordinals.
                    if let Err(cleanup) = store.delete_attempt(attempt.id) {
                        log::error!("Could not remove attempt {}: {cleanup}", attempt.id);
                    }
                    return Err(e);
                }
            }
        }
        log::info!(
            "Started attempt {} ({} #{}, card {}).",
            attempt.id,
            attempt.problem,
            attempt.ordinal,
            card.id.short()
        );
        self.open.lock().insert(attempt.clone());
        Ok(attempt)
    }

    /// Take the writer lock of the card `id` is open on, then re-read the
    /// attempt, since it may have been settled while we waited.
    fn lock_open<S: Store + ?Sized>(
        &self,
        store: &S,
        id: AttemptId,
    ) -> Fallible<(Guard, Attempt)> {
        let card = self.open.lock().attempts.get(&id).map(|a| a.card);
        let Some(card) = card else {
            return Err(not_open(store, id));
        };
        let writer = self.writers.lock(&card);
        let attempt = self.open.lock().attempts.get(&id).cloned();
        match attempt {
            Some(attempt) => Ok((writer, attempt)),
            None => Err(not_open(store, id)),
        }
    }

    /// Record a timer expiry or a give-up. The first event sets the finish
    /// time. The card is not touched.
    pub fn record_event<S: Store + ?Sized>(
        &self,
        store: &S,
        id: AttemptId,
        event: AttemptEvent,
        at: Timestamp,
    ) -> Fallible<Attempt> {
        let (_writer, mut attempt) = self.lock_open(store, id)?;
        if attempt.finished_at.is_none() {
            attempt.finished_at = Some(at);
        }
        match event {
            AttemptEvent::TimerExpired => attempt.timed_out = true,
            AttemptEvent::GaveUp => attempt.gave_up = true,
        }
        store.update_attempt(&attempt)?;
        self.open.lock().insert(attempt.clone());
        log::debug!("Attempt {id}: {event:?}.");
        Ok(attempt)
    }

    /// Flag a mutated attempt whose statement never arrived, so the learner
    /// is solving the original.
    pub fn mutation_failed<S: Store + ?Sized>(
        &self,
        store: &S,
        id: AttemptId,
    ) -> Fallible<Attempt> {
        let (_writer, mut attempt) = self.lock_open(store, id)?;
        if attempt.was_mutation && !attempt.degraded {
            attempt.degraded = true;
            store.update_attempt(&attempt)?;
            self.open.lock().insert(attempt.clone());
            log::warn!(
                "Attempt {id} of {} falls back to the original statement.",
                attempt.problem
            );
        }
        Ok(attempt)
    }

    /// Rate an open attempt: schedule its card, persist the card, then
    /// finalize the attempt.
    pub fn submit_rating<S: Store + ?Sized>(
        &self,
        store: &S,
        params: &Parameters,
        id: AttemptId,
        raw_rating: u8,
        now: Timestamp,
    ) -> Fallible<Review> {
        let rating = Rating::try_from(raw_rating)?;
        let (_writer, mut attempt) = self.lock_open(store, id)?;
        let card = self.apply(store, params, attempt.card, rating, now)?;
        attempt.rating = Some(rating);
        if attempt.finished_at.is_none() {
            attempt.finished_at = Some(now);
        }
        store.update_attempt(&attempt)?;
        self.open.lock().remove(id);
        self.sink.cancel(id);
        log::info!(
            "Rated attempt {id} {}; {} is due {}.",
            rating.as_str(),
            card.problem,
            card.due
        );
        Ok(Review { attempt, card })
    }

    /// Schedule and persist, re-reading the card after a version conflict.
    fn apply<S: Store + ?Sized>(
        &self,
        store: &S,
        params: &Parameters,
        card_id: CardId,
        rating: Rating,
        now: Timestamp,
    ) -> Fallible<Card> {
        let mut retries = 0;
        loop {
            let card = store.card(card_id)?.ok_or(Error::UnknownCard(card_id))?;
            let next = match schedule(params, &card, rating, now, fuzz_seed(&card)) {
                Ok(next) => next,
                Err(Error::CorruptState { reason, .. }) => {
                    log::warn!(
                        "Card {} is corrupt ({reason}); resetting it to new.",
                        card.id.short()
                    );
                    let reset = card.reset(now);
                    schedule(params, &reset, rating, now, fuzz_seed(&reset))?
                }
                Err(e) => return Err(e),
            };
            match store.update_card(card.version, &next) {
                Ok(stored) => return Ok(stored),
                Err(Error::VersionConflict { expected, found, .. })
                    if retries < self.config.max_update_retries =>
                {
                    retries += 1;
                    log::warn!(
                        "Card {} changed underneath us (version {expected}, now {found}); retrying.",
                        card.id.short()
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop an open attempt without rating it.
    pub fn abandon<S: Store + ?Sized>(
        &self,
        store: &S,
        id: AttemptId,
        now: Timestamp,
    ) -> Fallible<Attempt> {
        let (_writer, mut attempt) = self.lock_open(store, id)?;
        if attempt.finished_at.is_none() {
            attempt.finished_at = Some(now);
            store.update_attempt(&attempt)?;
        }
        self.open.lock().remove(id);
        self.sink.cancel(id);
        log::info!("Abandoned attempt {id}.");
        Ok(attempt)
    }

    pub fn open_attempt(&self, card: CardId) -> Option<Attempt> {
        let open = self.open.lock();
        let id = open.by_card.get(&card)?;
        open.attempts.get(id).cloned()
    }
}

fn not_open<S: Store + ?Sized>(store: &S, id: AttemptId) -> Error {
    match store.attempt(id) {
        Ok(Some(attempt)) if attempt.is_finalized() => Error::AttemptFinalized(id),
        Ok(_) => Error::UnknownAttempt(id),
        Err(e) => e,
    }
}
