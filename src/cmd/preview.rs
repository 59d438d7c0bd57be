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

use crate::collection::Collection;
use crate::error::Error;
use crate::error::Fallible;
use crate::scheduler::current_retrievability;
use crate::scheduler::fuzz_seed;
use crate::scheduler::preview;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::card_kind::CardKind;
use crate::types::problem::ProblemId;
use crate::types::timestamp::Timestamp;

pub fn preview_card(directory: Option<String>, problem: String, kind: CardKind) -> Fallible<()> {
    let coll: Collection = Collection::new(directory)?;
    let id = CardId::derive(&ProblemId::new(problem), kind);
    let card = coll.db.card(id)?.ok_or(Error::UnknownCard(id))?;
    println!("{}", render(&coll, &card, Timestamp::now())?);
    Ok(())
}

fn render(coll: &Collection, card: &Card, now: Timestamp) -> Fallible<String> {
    let params = &coll.config.scheduler;
    let mut lines = vec![format!(
        "{} ({}): {}, {} reps, {} lapses",
        card.problem,
        card.kind,
        card.state.as_str(),
        card.reps,
        card.lapses
    )];
    if let Some(r) = current_retrievability(params, card, now) {
        lines.push(format!("Recall probability now: {:.0}%", r * 100.0));
    }
    for (rating, next) in preview(params, card, now, fuzz_seed(card))? {
        let memory = next
            .memory
            .map(|m| format!("S={:.2} D={:.2}", m.stability, m.difficulty))
            .unwrap_or_default();
        let wait = next.due.seconds_since(now);
        let wait = if wait >= 86_400 {
            format!("{} days", wait / 86_400)
        } else {
            format!("{} minutes", wait / 60)
        };
        lines.push(format!(
            "{:<6} -> {:<10} due in {wait} ({memory})",
            rating.as_str(),
            next.state.as_str()
        ));
    }
    Ok(lines.join("\n"))
}
