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

use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::attempt::dispatch::MutationOutcome;
use crate::attempt::timer::spawn_timer;
use crate::catalog::ProblemCatalog;
use crate::collection::Collection;
use crate::error::Error;
use crate::error::Fallible;
use crate::practice::Practice;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::attempt::AttemptEvent;
use crate::types::attempt::AttemptId;
use crate::types::session::Member;
use crate::types::session::Session;
use crate::types::session::SessionGap;
use crate::types::timestamp::Timestamp;

pub async fn drill(directory: Option<String>) -> Fallible<()> {
    let coll: Collection = Collection::new(directory)?;
    let (sink, mut outcomes) = coll.mutation_sink();
    let practice = coll.into_practice(sink);
    let plan = practice.plan_session(Timestamp::now())?;
    for gap in &plan.gaps {
        match gap {
            SessionGap::NoDueCards => println!("No reviews are due."),
            SessionGap::NoNewCards => println!("No new problems are left."),
        }
    }
    let Some(session) = plan.session else {
        println!("Nothing to practise.");
        return Ok(());
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for member in &session.members {
        run_member(&practice, &session, member, &mut lines, &mut outcomes).await?;
    }
    println!("Session done.");
    Ok(())
}

async fn run_member<S, C, R>(
    practice: &Practice<S, C>,
    session: &Session,
    member: &Member,
    lines: &mut Lines<R>,
    outcomes: &mut Option<UnboundedReceiver<MutationOutcome>>,
) -> Fallible<()>
where
    S: Store,
    C: ProblemCatalog,
    R: AsyncBufRead + Unpin,
{
    let attempt = practice.start_attempt(session.id, member.card, Timestamp::now())?;
    println!();
    println!("{}", describe(member, &attempt));
    println!("Ratings: 1 (again), 2 (hard), 3 (good), 4 (easy). g gives up, s skips.");
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let budget = Duration::from_secs(attempt.time_budget.max(0) as u64);
    let timer = spawn_timer(attempt.id, budget, events_tx);
    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("Input closed; skipping.");
                    practice.skip(session.id, member.card, Timestamp::now())?;
                    break Ok(());
                };
                match handle_line(practice, session, member, attempt.id, line.trim()) {
                    Ok(true) => break Ok(()),
                    Ok(false) => {}
                    Err(e) => break Err(e),
                }
            }
            Some((id, event)) = events.recv() => {
                practice.record_event(id, event, Timestamp::now())?;
                println!("Time is up. Rate the attempt when you are done.");
            }
            Some(outcome) = next_outcome(outcomes) => {
                handle_outcome(practice, attempt.id, outcome)?;
            }
        }
    };
    timer.abort();
    result
}

/// Act on one line of input. Returns whether the member is settled.
fn handle_line<S: Store, C: ProblemCatalog>(
    practice: &Practice<S, C>,
    session: &Session,
    member: &Member,
    attempt: AttemptId,
    input: &str,
) -> Fallible<bool> {
    match input {
        "g" => {
            practice.record_event(attempt, AttemptEvent::GaveUp, Timestamp::now())?;
            println!("Gave up. The card is only updated once you rate the attempt.");
            Ok(false)
        }
        "s" => {
            practice.skip(session.id, member.card, Timestamp::now())?;
            println!("Skipped.");
            Ok(true)
        }
        other => match other.parse::<u8>() {
            Ok(raw) => match practice.submit_rating(attempt, raw, Timestamp::now()) {
                Ok((review, _)) => {
                    println!(
                        "Rated {}. Next review: {}.",
                        review.attempt.rating.map(|r| r.as_str().to_string()).unwrap_or_default(),
                        review.card.due.into_inner().format("%Y-%m-%d %H:%M")
                    );
                    Ok(true)
                }
                Err(e @ Error::InvalidRating(_)) => {
                    println!("{e}");
                    Ok(false)
                }
                Err(e) => Err(e),
            },
            Err(_) => {
                println!("Invalid input. Enter 1-4, g or s.");
                Ok(false)
            }
        },
    }
}

fn describe(member: &Member, attempt: &Attempt) -> String {
    let category = member
        .category
        .as_ref()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default();
    let mut text = format!(
        "{} problem: {}{category}, attempt {}, {} minutes.",
        member.slot.as_str(),
        member.problem,
        attempt.ordinal,
        attempt.time_budget / 60
    );
    if let Some(class) = attempt.mutation_class {
        if attempt.degraded {
            text.push_str(&format!(" Planned mutation ({class}) unavailable; solve the original."));
        } else {
            text.push_str(&format!(" Mutation: {class}; the statement follows when ready."));
        }
    }
    text
}

async fn next_outcome(
    outcomes: &mut Option<UnboundedReceiver<MutationOutcome>>,
) -> Option<MutationOutcome> {
    match outcomes {
        Some(outcomes) => outcomes.recv().await,
        None => std::future::pending().await,
    }
}

/// Show a mutated statement, or record that it could not be generated.
fn handle_outcome<S: Store, C: ProblemCatalog>(
    practice: &Practice<S, C>,
    current: AttemptId,
    outcome: MutationOutcome,
) -> Fallible<()> {
    if let Err(e) = &outcome.statement {
        practice.mutation_failed(outcome.attempt)?;
        if outcome.attempt == current {
            println!("The mutated statement could not be generated ({e}); solve the original.");
        }
        return Ok(());
    }
    if outcome.attempt != current {
        log::debug!("Ignoring late mutation for attempt {}.", outcome.attempt);
        return Ok(());
    }
    if let Ok(statement) = outcome.statement {
        println!("--- mutated statement ---");
        println!("{statement}");
        println!("-------------------------");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::attempt::dispatch::CommandMutator;
    use crate::attempt::dispatch::MutationDispatcher;
    use crate::attempt::dispatch::NoMutator;
    use crate::config::Config;
    use crate::db::Database;
    use crate::types::card::Card;
    use crate::types::card::CardState;
    use crate::types::card_kind::CardKind;
    use crate::types::problem::Category;
    use crate::types::problem::ProblemId;
    use crate::types::session::SessionStatus;

    type TestPractice = Practice<Database, HashMap<ProblemId, Category>>;

    fn setup() -> Fallible<(TestPractice, Session)> {
        let db = Database::in_memory()?;
        let card = Card::new(ProblemId::new("two-sum"), CardKind::Solve, Timestamp::now());
        db.insert_card(&card)?;
        let catalog = HashMap::from([(card.problem.clone(), Category::new("hashing"))]);
        let practice = Practice::new(db, catalog, Config::default(), Box::new(NoMutator));
        let session = practice.plan_session(Timestamp::now())?.session.unwrap();
        Ok((practice, session))
    }

    async fn run(input: &'static str) -> Fallible<(TestPractice, Session)> {
        let (practice, session) = setup()?;
        let mut lines = BufReader::new(input.as_bytes()).lines();
        let member = session.members[0].clone();
        run_member(&practice, &session, &member, &mut lines, &mut None).await?;
        Ok((practice, session))
    }

    #[tokio::test]
    async fn test_rating_after_bad_input() -> Fallible<()> {
        let (practice, session) = run("x\n7\ng\n3\n").await?;
        let card = practice.store().card(session.members[0].card)?.unwrap();
        assert_eq!(card.state, CardState::Review);
        let attempts = practice.store().attempts()?;
        assert!(attempts[0].gave_up);
        assert_eq!(attempts[0].rating.map(|r| r.as_str().to_string()), Some("good".to_string()));
        assert_eq!(practice.store().sessions()?[0].status, SessionStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_skip() -> Fallible<()> {
        let (practice, session) = run("s\n").await?;
        let card = practice.store().card(session.members[0].card)?.unwrap();
        assert_eq!(card.state, CardState::New);
        assert_eq!(practice.store().sessions()?[0].status, SessionStatus::Skipped);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_mutation_is_recorded() -> Fallible<()> {
        let db = Database::in_memory()?;
        let card = Card::new(ProblemId::new("two-sum"), CardKind::Solve, Timestamp::now());
        db.insert_card(&card)?;
        let catalog = HashMap::from([(card.problem.clone(), Category::new("hashing"))]);
        let mut config = Config::default();
        config.attempts.mutation_threshold = 1;
        let (sink, mut outcomes) = MutationDispatcher::new(CommandMutator::new(
            "cat > /dev/null; exit 1".to_string(),
            Duration::from_secs(10),
        ));
        let practice = Practice::new(db, catalog, config, Box::new(sink));
        let session = practice.plan_session(Timestamp::now())?.session.unwrap();
        let attempt = practice.start_attempt(session.id, card.id, Timestamp::now())?;
        assert!(attempt.was_mutation);
        assert!(!attempt.degraded);
        let outcome = outcomes.recv().await.unwrap();
        handle_outcome(&practice, attempt.id, outcome)?;
        let stored = practice.store().attempt(attempt.id)?.unwrap();
        assert!(stored.was_mutation);
        assert!(stored.degraded);
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_input_skips() -> Fallible<()> {
        let (practice, _) = run("").await?;
        assert_eq!(practice.store().sessions()?[0].status, SessionStatus::Skipped);
        Ok(())
    }
}
