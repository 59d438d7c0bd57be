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

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::error::Fallible;
use crate::types::card_kind::CardKind;
use crate::types::problem::Category;
use crate::types::problem::ProblemId;

/// The problem-metadata collaborator: tells the orchestrator which pattern
/// family a problem belongs to.
pub trait ProblemCatalog: Send + Sync {
    /// Whether the problem is still listed. Cards of unlisted problems keep
    /// their history but are not planned.
    fn contains(&self, problem: &ProblemId) -> bool;

    fn category(&self, problem: &ProblemId) -> Option<Category>;

    /// Per-problem override of the default time budget.
    fn time_budget_minutes(&self, _problem: &ProblemId) -> Option<i64> {
        None
    }
}

impl ProblemCatalog for HashMap<ProblemId, Category> {
    fn contains(&self, problem: &ProblemId) -> bool {
        self.contains_key(problem)
    }

    fn category(&self, problem: &ProblemId) -> Option<Category> {
        self.get(problem).cloned()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemEntry {
    pub id: ProblemId,
    pub category: Option<Category>,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<CardKind>,
    pub time_budget_minutes: Option<i64>,
}

fn default_kinds() -> Vec<CardKind> {
    vec![CardKind::Solve]
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default, rename = "problem")]
    problems: Vec<ProblemEntry>,
}

/// A catalog read from `problems.toml`:
///
/// ```toml
/// [[problem]]
/// id = "two-sum"
/// category = "hashing"
/// kinds = ["solve", "recognize"]
/// time_budget_minutes = 20
/// ```
pub struct Catalog {
    problems: Vec<ProblemEntry>,
    index: HashMap<ProblemId, usize>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            problems: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load the catalog at `path`. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Fallible<Self> {
        if !path.exists() {
            log::debug!("No catalog at {}.", path.display());
            return Ok(Self::empty());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Fallible<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        let mut index = HashMap::new();
        for (position, entry) in file.problems.iter().enumerate() {
            if index.insert(entry.id.clone(), position).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "problem {} is listed twice",
                    entry.id
                )));
            }
            let kinds: HashSet<&CardKind> = entry.kinds.iter().collect();
            if entry.kinds.is_empty() || kinds.len() != entry.kinds.len() {
                return Err(Error::InvalidConfig(format!(
                    "problem {} must list each card kind at most once, and at least one",
                    entry.id
                )));
            }
            if let Some(minutes) = entry.time_budget_minutes {
                if minutes <= 0 {
                    return Err(Error::InvalidConfig(format!(
                        "problem {} has a non-positive time budget",
                        entry.id
                    )));
                }
            }
        }
        Ok(Self {
            problems: file.problems,
            index,
        })
    }

    pub fn problems(&self) -> &[ProblemEntry] {
        &self.problems
    }

    pub fn get(&self, problem: &ProblemId) -> Option<&ProblemEntry> {
        self.index.get(problem).map(|position| &self.problems[*position])
    }
}

impl ProblemCatalog for Catalog {
    fn contains(&self, problem: &ProblemId) -> bool {
        self.index.contains_key(problem)
    }

    fn category(&self, problem: &ProblemId) -> Option<Category> {
        self.get(problem).and_then(|entry| entry.category.clone())
    }

    fn time_budget_minutes(&self, problem: &ProblemId) -> Option<i64> {
        self.get(problem).and_then(|entry| entry.time_budget_minutes)
    }
}
