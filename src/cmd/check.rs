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
use crate::error::Fallible;
use crate::error::fail;
use crate::store::Store;

pub fn check_collection(directory: Option<String>) -> Fallible<()> {
    let coll = Collection::new(directory)?;
    let problems = find_problems(&coll)?;
    for problem in &problems {
        println!("{problem}");
    }
    if problems.is_empty() {
        println!("ok");
        Ok(())
    } else {
        fail(format!("{} problems found.", problems.len()))
    }
}

fn find_problems(coll: &Collection) -> Fallible<Vec<String>> {
    let mut problems = Vec::new();
    for card in coll.db.cards()? {
        if let Err(e) = card.validate() {
            problems.push(e.to_string());
        }
    }
    for card in coll.orphans()? {
        problems.push(format!(
            "card {} ({} {}) is not in the catalog.",
            card.id.short(),
            card.problem,
            card.kind
        ));
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use std::fs::write;

    use tempfile::tempdir;

    use super::*;
    use crate::types::card::CardState;
    use crate::types::card_id::CardId;
    use crate::types::card_kind::CardKind;
    use crate::types::problem::ProblemId;

    #[test]
    fn test_non_existent_directory() {
        assert!(check_collection(Some("./derpherp".to_string())).is_err());
    }

    #[test]
    fn test_clean_directory() -> Fallible<()> {
        let dir = tempdir()?;
        write(dir.path().join("problems.toml"), "[[problem]]\nid = \"two-sum\"\n")?;
        check_collection(Some(dir.path().display().to_string()))
    }

    #[test]
    fn test_reports_corrupt_cards() -> Fallible<()> {
        let dir = tempdir()?;
        write(dir.path().join("problems.toml"), "[[problem]]\nid = \"two-sum\"\n")?;
        let coll = Collection::new(Some(dir.path().display().to_string()))?;
        let id = CardId::derive(&ProblemId::new("two-sum"), CardKind::Solve);
        let mut card = coll.db.card(id)?.unwrap();
        card.state = CardState::Review;
        coll.db.update_card(card.version, &card)?;
        let problems = find_problems(&coll)?;
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("corrupt"));
        Ok(())
    }
}
