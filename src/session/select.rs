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

//! Pure ordering and pairing rules for session planning.

use std::cmp::Ordering;

use crate::config::NewCardOrder;
use crate::types::card::Card;
use crate::types::problem::Category;

/// A card together with the category the catalog assigns its problem.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub card: Card,
    pub category: Option<Category>,
}

/// Review slot order: earliest due, then most lapses, then least recently
/// reviewed (never reviewed first).
pub fn order_reviews(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.card
            .due
            .cmp(&b.card.due)
            .then_with(|| b.card.lapses.cmp(&a.card.lapses))
            .then_with(|| a.card.last_review.cmp(&b.card.last_review))
            .then_with(|| a.card.id.cmp(&b.card.id))
    });
}

/// New slot order under the configured policy. `cursor` is the rotation
/// position, ignored for insertion order.
pub fn order_new(candidates: &mut [Candidate], order: &NewCardOrder, cursor: usize) {
    let by_age = |a: &Candidate, b: &Candidate| -> Ordering {
        a.card
            .created_at
            .cmp(&b.card.created_at)
            .then_with(|| a.card.id.cmp(&b.card.id))
    };
    match order {
        NewCardOrder::Insertion => candidates.sort_by(by_age),
        NewCardOrder::Rotation(categories) => {
            let len = categories.len();
            let distance = |candidate: &Candidate| -> usize {
                candidate
                    .category
                    .as_ref()
                    .and_then(|category| categories.iter().position(|c| c == category))
                    .map(|position| (position + len - cursor % len) % len)
                    .unwrap_or(len)
            };
            candidates.sort_by(|a, b| distance(a).cmp(&distance(b)).then_with(|| by_age(a, b)));
        }
    }
}

/// Where the rotation cursor goes after picking a card of `picked`.
pub fn advance_cursor(order: &NewCardOrder, cursor: usize, picked: Option<&Category>) -> usize {
    match (order, picked) {
        (NewCardOrder::Rotation(categories), Some(picked)) => {
            match categories.iter().position(|c| c == picked) {
                Some(position) => (position + 1) % categories.len(),
                None => cursor,
            }
        }
        _ => cursor,
    }
}

/// Both categories are known and equal.
fn same_category(a: &Option<Category>, b: &Option<Category>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Both categories are known and differ.
fn different_category(a: &Option<Category>, b: &Option<Category>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

/// Pick indices into the ordered pools: the head of each, unless both
/// heads share a category and some other candidate breaks the tie. The new
/// pool is searched for an alternative before the review pool.
pub fn pair(reviews: &[Candidate], news: &[Candidate]) -> (Option<usize>, Option<usize>) {
    let mut review = (!reviews.is_empty()).then_some(0);
    let mut new = (!news.is_empty()).then_some(0);
    if let (Some(r), Some(n)) = (review, new) {
        let review_category = &reviews[r].category;
        let new_category = &news[n].category;
        if same_category(review_category, new_category) {
            if let Some(alternative) = news
                .iter()
                .position(|c| different_category(&c.category, review_category))
            {
                new = Some(alternative);
            } else if let Some(alternative) = reviews
                .iter()
                .position(|c| different_category(&c.category, new_category))
            {
                review = Some(alternative);
            } else {
                log::debug!("No alternative to a same-category pair.");
            }
        }
    }
    (review, new)
}
