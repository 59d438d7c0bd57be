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

use std::collections::HashSet;
use std::env::current_dir;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::attempt::dispatch::CommandMutator;
use crate::attempt::dispatch::MutationDispatcher;
use crate::attempt::dispatch::MutationOutcome;
use crate::attempt::dispatch::MutationSink;
use crate::attempt::dispatch::NoMutator;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::Database;
use crate::error::Error;
use crate::error::Fallible;
use crate::error::fail;
use crate::practice::Practice;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::timestamp::Timestamp;

/// A practice directory: `drillbit.toml`, `problems.toml` and `drillbit.db`.
pub struct Collection {
    pub directory: PathBuf,
    pub config: Config,
    pub catalog: Catalog,
    pub db: Database,
}

impl Collection {
    pub fn new(directory: Option<String>) -> Fallible<Self> {
        let directory: PathBuf = match directory {
            Some(dir) => PathBuf::from(dir),
            None => current_dir()?,
        };
        let directory = if directory.exists() {
            directory.canonicalize()?
        } else {
            return fail("directory does not exist.");
        };

        let config = Config::load(&directory.join("drillbit.toml"))?;
        let catalog = Catalog::load(&directory.join("problems.toml"))?;

        let db_path: PathBuf = directory.join("drillbit.db");
        let db_path: &str = db_path
            .to_str()
            .ok_or_else(|| Error::Other("invalid path".to_string()))?;
        let db: Database = Database::new(db_path)?;

        let coll = Self {
            directory,
            config,
            catalog,
            db,
        };
        coll.sync(Timestamp::now())?;
        Ok(coll)
    }

    /// Create a New card for every catalog (problem, kind) pair that does
    /// not have one yet. Returns how many were added.
    fn sync(&self, now: Timestamp) -> Fallible<usize> {
        let start = Instant::now();
        let known: HashSet<CardId> = self.db.cards()?.iter().map(|card| card.id).collect();
        let mut added = 0;
        for entry in self.catalog.problems() {
            for kind in &entry.kinds {
                let card = Card::new(entry.id.clone(), *kind, now);
                if !known.contains(&card.id) {
                    self.db.insert_card(&card)?;
                    added += 1;
                }
            }
        }
        let duration = start.elapsed().as_millis();
        log::debug!("Synced catalog in {duration}ms, {added} new cards.");
        Ok(added)
    }

    /// Cards whose problem is no longer in the catalog.
    pub fn orphans(&self) -> Fallible<Vec<Card>> {
        let cards = self.db.cards()?;
        Ok(cards
            .into_iter()
            .filter(|card| self.catalog.get(&card.problem).is_none())
            .collect())
    }

    /// The configured mutation collaborator, and the channel its statements
    /// arrive on.
    pub fn mutation_sink(
        &self,
    ) -> (Box<dyn MutationSink>, Option<UnboundedReceiver<MutationOutcome>>) {
        match &self.config.mutation.command {
            Some(command) => {
                let mutator = CommandMutator::new(
                    command.clone(),
                    Duration::from_secs(self.config.mutation.timeout_seconds),
                );
                let (dispatcher, outcomes) = MutationDispatcher::new(mutator);
                (Box::new(dispatcher), Some(outcomes))
            }
            None => (Box::new(NoMutator), None),
        }
    }

    pub fn into_practice(self, sink: Box<dyn MutationSink>) -> Practice<Database, Catalog> {
        Practice::new(self.db, self.catalog, self.config, sink)
    }
}
