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

use serde::Serialize;

use crate::catalog::ProblemCatalog;
use crate::collection::Collection;
use crate::error::Fallible;
use crate::fsrs::Retrievability;
use crate::scheduler::current_retrievability;
use crate::store::Store;
use crate::types::attempt::Attempt;
use crate::types::card::Card;
use crate::types::problem::Category;
use crate::types::session::Session;
use crate::types::timestamp::Timestamp;

pub fn export_collection(directory: Option<String>) -> Fallible<()> {
    let coll: Collection = Collection::new(directory)?;
    let export: Export = get_export(&coll, Timestamp::now())?;
    let json: String = serde_json::to_string_pretty(&export)?;
    println!("{json}");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Export {
    exported_at: Timestamp,
    cards: Vec<CardExport>,
    attempts: Vec<Attempt>,
    sessions: Vec<Session>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CardExport {
    #[serde(flatten)]
    card: Card,
    category: Option<Category>,
    retrievability: Option<Retrievability>,
}

fn get_export(coll: &Collection, now: Timestamp) -> Fallible<Export> {
    let params = &coll.config.scheduler;
    let cards: Vec<CardExport> = coll
        .db
        .cards()?
        .into_iter()
        .map(|card| CardExport {
            category: coll.catalog.category(&card.problem),
            retrievability: current_retrievability(params, &card, now),
            card,
        })
        .collect();
    Ok(Export {
        exported_at: now,
        cards,
        attempts: coll.db.attempts()?,
        sessions: coll.db.sessions()?,
    })
}
