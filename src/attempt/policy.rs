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

use rand::SeedableRng;
use rand::distributions::Distribution;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::types::attempt::Attempt;
use crate::types::card_id::CardId;
use crate::types::mutation_class::MutationClass;
use crate::types::problem::ProblemId;
use crate::types::rating::Rating;
use crate::types::timestamp::Timestamp;

/// Picks the mutation class for a problem's next mutated attempt. The only
/// state it sees is how many earlier attempts of the problem were mutated.
pub trait MutationPolicy: Send + Sync {
    fn choose(&self, problem: &ProblemId, prior_mutations: u32) -> MutationClass;
}

/// Cycles through the classes in declaration order.
pub struct Rotation;

impl MutationPolicy for Rotation {
    fn choose(&self, _problem: &ProblemId, prior_mutations: u32) -> MutationClass {
        MutationClass::ALL[prior_mutations as usize % MutationClass::ALL.len()]
    }
}

/// Draws a class with the given relative weights. The draw is seeded by the
/// problem and the mutation index, so it is reproducible.
pub struct Weighted {
    weights: [u32; 5],
}

impl Weighted {
    pub fn new(weights: [u32; 5]) -> Self {
        Self { weights }
    }
}

impl MutationPolicy for Weighted {
    fn choose(&self, problem: &ProblemId, prior_mutations: u32) -> MutationClass {
        let distribution = match WeightedIndex::new(self.weights) {
            Ok(distribution) => distribution,
            Err(_) => return Rotation.choose(problem, prior_mutations),
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(problem.as_str().as_bytes());
        hasher.update(&prior_mutations.to_le_bytes());
        let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());
        MutationClass::ALL[distribution.sample(&mut rng)]
    }
}

/// Whether the attempt with this ordinal should be mutated.
pub fn should_mutate(threshold: u32, ordinal: u32) -> bool {
    ordinal >= threshold
}

/// One earlier try, as the content-mutation collaborator sees it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorAttempt {
    pub ordinal: u32,
    pub card: CardId,
    pub started_at: Timestamp,
    pub elapsed_seconds: Option<i64>,
    pub rating: Option<Rating>,
    pub gave_up: bool,
    pub timed_out: bool,
    pub mutation_class: Option<MutationClass>,
}

/// The descriptor handed to the content-mutation collaborator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub problem: ProblemId,
    pub class: MutationClass,
    pub attempt_ordinal: u32,
    pub prior_attempts: Vec<PriorAttempt>,
}

impl MutationRequest {
    pub fn new(
        problem: &ProblemId,
        class: MutationClass,
        attempt_ordinal: u32,
        history: &[Attempt],
    ) -> Self {
        let prior_attempts = history
            .iter()
            .map(|attempt| PriorAttempt {
                ordinal: attempt.ordinal,
                card: attempt.card,
                started_at: attempt.started_at,
                elapsed_seconds: attempt.elapsed(),
                rating: attempt.rating,
                gave_up: attempt.gave_up,
                timed_out: attempt.timed_out,
                mutation_class: attempt.mutation_class,
            })
            .collect();
        Self {
            problem: problem.clone(),
            class,
            attempt_ordinal,
            prior_attempts,
        }
    }
}
