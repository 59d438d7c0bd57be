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
use serde::Serialize;

use crate::collection::Collection;
use crate::error::Fallible;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::card::Card;
use crate::types::card::CardState;
use crate::types::session::Session;
use crate::types::session::SessionStatus;
use crate::types::timestamp::Timestamp;

#[derive(ValueEnum, Clone)]
pub enum StatsFormat {
    /// Plain text output.
    Text,
    /// JSON output.
    Json,
}

impl Display for StatsFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsFormat::Text => write!(f, "text"),
            StatsFormat::Json => write!(f, "json"),
        }
    }
}

pub fn print_stats(directory: Option<String>, format: StatsFormat) -> Fallible<()> {
    let coll: Collection = Collection::new(directory)?;
    let stats = Stats::collect(
        &coll.db.cards()?,
        &coll.db.attempts()?,
        &coll.db.sessions()?,
        Timestamp::now(),
    );
    match format {
        StatsFormat::Text => print!("{}", stats.to_text()),
        StatsFormat::Json => {
            let stats_json = serde_json::to_string_pretty(&stats)?;
            println!("{}", stats_json);
        }
    }
    Ok(())
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    card_count: usize,
    new_count: usize,
    learning_count: usize,
    review_count: usize,
    relearning_count: usize,
    due_count: usize,
    lapse_count: u64,
    attempt_count: usize,
    mutated_attempt_count: usize,
    degraded_attempt_count: usize,
    given_up_attempt_count: usize,
    timed_out_attempt_count: usize,
    session_count: usize,
    completed_session_count: usize,
    skipped_session_count: usize,
    abandoned_session_count: usize,
}

impl Stats {
    fn collect(cards: &[Card], attempts: &[Attempt], sessions: &[Session], now: Timestamp) -> Self {
        let in_state = |state: CardState| cards.iter().filter(|c| c.state == state).count();
        let attempts_where = |f: fn(&Attempt) -> bool| attempts.iter().filter(|a| f(a)).count();
        let with_status =
            |status: SessionStatus| sessions.iter().filter(|s| s.status == status).count();
        Self {
            card_count: cards.len(),
            new_count: in_state(CardState::New),
            learning_count: in_state(CardState::Learning),
            review_count: in_state(CardState::Review),
            relearning_count: in_state(CardState::Relearning),
            due_count: cards.iter().filter(|c| c.is_due(now)).count(),
            lapse_count: cards.iter().map(|c| c.lapses as u64).sum(),
            attempt_count: attempts.len(),
            mutated_attempt_count: attempts_where(|a| a.was_mutation),
            degraded_attempt_count: attempts_where(|a| a.degraded),
            given_up_attempt_count: attempts_where(|a| a.gave_up),
            timed_out_attempt_count: attempts_where(|a| a.timed_out),
            session_count: sessions.len(),
            completed_session_count: with_status(SessionStatus::Completed),
            skipped_session_count: with_status(SessionStatus::Skipped),
            abandoned_session_count: with_status(SessionStatus::Abandoned),
        }
    }

    fn to_text(&self) -> String {
        format!(
            "Cards:    {} ({} new, {} learning, {} review, {} relearning)\n\
             Due now:  {}\n\
             Lapses:   {}\n\
             Attempts: {} ({} mutated, {} degraded, {} given up, {} timed out)\n\
             Sessions: {} ({} completed, {} skipped, {} abandoned)\n",
            self.card_count,
            self.new_count,
            self.learning_count,
            self.review_count,
            self.relearning_count,
            self.due_count,
            self.lapse_count,
            self.attempt_count,
            self.mutated_attempt_count,
            self.degraded_attempt_count,
            self.given_up_attempt_count,
            self.timed_out_attempt_count,
            self.session_count,
            self.completed_session_count,
            self.skipped_session_count,
            self.abandoned_session_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::card::MemoryState;
    use crate::types::card_kind::CardKind;
    use crate::types::problem::ProblemId;

    #[test]
    fn test_non_existent_directory() {
        assert!(print_stats(Some("./derpherp".to_string()), StatsFormat::Json).is_err());
    }

    #[test]
    fn test_counts() {
        let now = Timestamp::now();
        let fresh = Card::new(ProblemId::new("two-sum"), CardKind::Solve, now);
        let mut due = Card::new(ProblemId::new("lru-cache"), CardKind::Solve, now);
        due.state = CardState::Relearning;
        due.memory = Some(MemoryState {
            difficulty: 6.0,
            stability: 1.0,
        });
        due.last_review = Some(now.plus_days(-2).unwrap());
        due.due = now.plus_days(-1).unwrap();
        due.lapses = 2;
        let stats = Stats::collect(&[fresh, due], &[], &[], now);
        assert_eq!(stats.card_count, 2);
        assert_eq!(stats.new_count, 1);
        assert_eq!(stats.relearning_count, 1);
        assert_eq!(stats.due_count, 1);
        assert_eq!(stats.lapse_count, 2);
        assert!(stats.to_text().starts_with("Cards:    2 (1 new"));
    }
}
