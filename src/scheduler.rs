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

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::Error;
use crate::error::Fallible;
use crate::fsrs::Parameters;
use crate::fsrs::Retrievability;
use crate::fsrs::Stability;
use crate::fsrs::graduation_stability;
use crate::fsrs::initial_difficulty;
use crate::fsrs::initial_stability;
use crate::fsrs::interval;
use crate::fsrs::lapse_stability;
use crate::fsrs::next_difficulty;
use crate::fsrs::recall_stability;
use crate::fsrs::retrievability;
use crate::types::card::Card;
use crate::types::card::CardState;
use crate::types::card::MemoryState;
use crate::types::rating::Rating;
use crate::types::timestamp::Timestamp;

/// Intervals shorter than this many days are never fuzzed.
const FUZZ_MIN_INTERVAL: i64 = 3;

/// Apply a rating to a card, returning the updated card.
///
/// Pure: the output depends only on the arguments. The `seed` drives the
/// interval fuzz; pass the same seed to get the same card back.
pub fn schedule(
    params: &Parameters,
    card: &Card,
    rating: Rating,
    now: Timestamp,
    seed: u64,
) -> Fallible<Card> {
    card.validate()?;
    let mut next = card.clone();
    next.reps = card.reps.saturating_add(1);
    next.last_review = Some(now);
    match (card.state, card.memory, card.last_review) {
        (CardState::New, _, _) => {
            let stability = initial_stability(params, rating);
            next.memory = Some(MemoryState {
                difficulty: initial_difficulty(params, rating),
                stability,
            });
            if rating == Rating::Again {
                next.state = CardState::Learning;
                next.due = now.plus_minutes(params.learning_step_minutes)?;
            } else {
                next.state = CardState::Review;
                next.due = day_due(params, stability, now, seed)?;
            }
        }
        (CardState::Learning | CardState::Relearning, Some(memory), _) => {
            let difficulty = next_difficulty(params, memory.difficulty, rating);
            if rating == Rating::Again {
                next.memory = Some(MemoryState {
                    difficulty,
                    stability: memory.stability,
                });
                next.due = now.plus_minutes(match card.state {
                    CardState::Learning => params.learning_step_minutes,
                    _ => params.relearning_step_minutes,
                })?;
            } else {
                let stability = graduation_stability(params, memory.stability, rating);
                next.memory = Some(MemoryState {
                    difficulty,
                    stability,
                });
                next.state = CardState::Review;
                next.due = day_due(params, stability, now, seed)?;
            }
        }
        (CardState::Review, Some(memory), Some(last_review)) => {
            let elapsed = now.whole_days_since(last_review) as f64;
            let r = retrievability(params, elapsed, memory.stability);
            let difficulty = next_difficulty(params, memory.difficulty, rating);
            if rating == Rating::Again {
                next.lapses = card.lapses.saturating_add(1);
                next.memory = Some(MemoryState {
                    difficulty,
                    stability: lapse_stability(params, memory.difficulty, memory.stability, r),
                });
                next.state = CardState::Relearning;
                next.due = now.plus_minutes(params.relearning_step_minutes)?;
            } else {
                let stability =
                    recall_stability(params, memory.difficulty, memory.stability, r, rating);
                next.memory = Some(MemoryState {
                    difficulty,
                    stability,
                });
                next.due = day_due(params, stability, now, seed)?;
            }
        }
        // `validate` rejects every other combination.
        (state, _, _) => {
            return Err(Error::CorruptState {
                card: card.id,
                reason: format!("{} card is missing its review history", state.as_str()),
            });
        }
    }
    if let Some(memory) = next.memory {
        log::debug!(
            "{} {} {} -> {} S={:.2}d D={:.2} due={}",
            card.id.short(),
            rating.as_str(),
            card.state.as_str(),
            next.state.as_str(),
            memory.stability,
            memory.difficulty,
            next.due
        );
    }
    Ok(next)
}

/// What each of the four ratings would do to a card right now.
pub fn preview(
    params: &Parameters,
    card: &Card,
    now: Timestamp,
    seed: u64,
) -> Fallible<Vec<(Rating, Card)>> {
    Rating::ALL
        .iter()
        .map(|rating| Ok((*rating, schedule(params, card, *rating, now, seed)?)))
        .collect()
}

/// The card's current recall probability, if it has a memory state.
pub fn current_retrievability(
    params: &Parameters,
    card: &Card,
    now: Timestamp,
) -> Option<Retrievability> {
    let memory = card.memory?;
    let last_review = card.last_review?;
    let elapsed = now.whole_days_since(last_review) as f64;
    Some(retrievability(params, elapsed, memory.stability))
}

/// The fuzz seed for the next review of `card`: a digest of its id and its
/// review count, so replaying the same review gives the same interval.
pub fn fuzz_seed(card: &Card) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(card.id.as_bytes());
    hasher.update(&card.reps.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Whole-day interval for a stability, clamped and optionally fuzzed.
pub fn interval_days(params: &Parameters, s: Stability, seed: u64) -> i64 {
    let days = interval(params, s).round() as i64;
    let days = days.clamp(params.min_interval_days, params.max_interval_days);
    fuzz_interval(params, days, seed)
}

fn day_due(params: &Parameters, s: Stability, now: Timestamp, seed: u64) -> Fallible<Timestamp> {
    now.plus_days(interval_days(params, s, seed))
}

fn fuzz_interval(params: &Parameters, days: i64, seed: u64) -> i64 {
    if !params.fuzz || days < FUZZ_MIN_INTERVAL {
        return days;
    }
    let spread = ((days as f64) * params.fuzz_factor).round().max(1.0) as i64;
    let mut rng = StdRng::seed_from_u64(seed);
    let fuzzed = rng.gen_range(days - spread..=days + spread);
    fuzzed.clamp(params.min_interval_days, params.max_interval_days)
}
