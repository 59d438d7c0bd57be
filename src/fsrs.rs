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

//! The memory model: retrievability, stability and difficulty updates.
//!
//! Every function takes the parameters explicitly; there is no global state.

use serde::Deserialize;

use crate::error::Error;
use crate::error::Fallible;
use crate::types::rating::Rating;

/// Estimated recall probability, in `(0, 1]`.
pub type Retrievability = f64;

/// Days until retrievability decays to the reference retention.
pub type Stability = f64;

/// Intrinsic hardness of a card.
pub type Difficulty = f64;

pub const MIN_DIFFICULTY: Difficulty = 1.0;
pub const MAX_DIFFICULTY: Difficulty = 10.0;
pub const MIN_STABILITY: Stability = 0.01;
pub const MAX_STABILITY: Stability = 36500.0;
/// The longest interval a config may ask for, a hundred years.
pub const MAX_INTERVAL_DAYS: i64 = 36500;

/// Algorithm constants. Passed by reference into every scheduling call.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    /// Retrievability when the elapsed time equals the stability.
    pub reference_retention: f64,
    /// Recall probability the day intervals aim for.
    pub desired_retention: f64,
    /// Stability after the first rating, indexed by rating.
    pub initial_stability: [Stability; 4],
    /// Difficulty after the first rating, indexed by rating.
    pub initial_difficulty: [Difficulty; 4],
    pub difficulty_step: f64,
    /// Pull towards `initial_difficulty[Easy]` on every update.
    pub mean_reversion: f64,
    pub recall: RecallWeights,
    pub lapse: LapseWeights,
    /// Stability multipliers on graduation, for Hard, Good and Easy.
    pub graduation_multipliers: [f64; 3],
    pub learning_step_minutes: i64,
    pub relearning_step_minutes: i64,
    pub min_interval_days: i64,
    pub max_interval_days: i64,
    pub fuzz: bool,
    /// Half-width of the fuzz window, as a fraction of the interval.
    pub fuzz_factor: f64,
}

/// Weights of the stability gain after a successful review.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecallWeights {
    pub scale: f64,
    pub stability_decay: f64,
    pub retrievability_weight: f64,
    pub hard_penalty: f64,
    pub easy_bonus: f64,
}

/// Weights of the post-lapse stability.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LapseWeights {
    pub scale: f64,
    pub difficulty_exponent: f64,
    pub stability_exponent: f64,
    pub retrievability_weight: f64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            reference_retention: 0.9,
            desired_retention: 0.9,
            initial_stability: [0.40255, 1.18385, 3.173, 15.69105],
            initial_difficulty: [7.1949, 6.4883, 5.2824, 3.2244],
            difficulty_step: 1.4604,
            mean_reversion: 0.0046,
            recall: RecallWeights::default(),
            lapse: LapseWeights::default(),
            graduation_multipliers: [0.611, 1.051, 1.808],
            learning_step_minutes: 10,
            relearning_step_minutes: 10,
            min_interval_days: 1,
            max_interval_days: 36500,
            fuzz: true,
            fuzz_factor: 0.05,
        }
    }
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            scale: 1.54575,
            stability_decay: 0.1192,
            retrievability_weight: 1.01925,
            hard_penalty: 0.2315,
            easy_bonus: 2.9898,
        }
    }
}

impl Default for LapseWeights {
    fn default() -> Self {
        Self {
            scale: 1.9395,
            difficulty_exponent: 0.11,
            stability_exponent: 0.29605,
            retrievability_weight: 2.2698,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Fallible<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        for (name, value) in [
            ("reference_retention", self.reference_retention),
            ("desired_retention", self.desired_retention),
        ] {
            if value.is_nan() || value <= 0.0 || value >= 1.0 {
                return invalid(format!("{name} must be between 0 and 1, got {value}"));
            }
        }
        if self
            .initial_stability
            .iter()
            .any(|s| !s.is_finite() || *s < MIN_STABILITY)
        {
            return invalid(format!(
                "initial_stability values must be at least {MIN_STABILITY}"
            ));
        }
        if self
            .initial_difficulty
            .iter()
            .any(|d| !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(d))
        {
            return invalid(format!(
                "initial_difficulty values must lie in [{MIN_DIFFICULTY}, {MAX_DIFFICULTY}]"
            ));
        }
        if !(0.0..=1.0).contains(&self.mean_reversion) {
            return invalid("mean_reversion must lie in [0, 1]".to_string());
        }
        if self
            .graduation_multipliers
            .iter()
            .any(|m| m.is_nan() || *m <= 0.0)
        {
            return invalid("graduation_multipliers must be positive".to_string());
        }
        for (name, minutes) in [
            ("learning_step_minutes", self.learning_step_minutes),
            ("relearning_step_minutes", self.relearning_step_minutes),
        ] {
            if !(1..24 * 60).contains(&minutes) {
                return invalid(format!("{name} must be shorter than a day, got {minutes}"));
            }
        }
        if self.min_interval_days < 1
            || self.min_interval_days > self.max_interval_days
            || self.max_interval_days > MAX_INTERVAL_DAYS
        {
            return invalid(format!(
                "interval bounds [{}, {}] must lie within [1, {MAX_INTERVAL_DAYS}]",
                self.min_interval_days, self.max_interval_days
            ));
        }
        if !(0.0..1.0).contains(&self.fuzz_factor) {
            return invalid(format!("fuzz_factor must lie in [0, 1), got {}", self.fuzz_factor));
        }
        Ok(())
    }
}

/// Recall probability after `elapsed` days, given stability `s`. Decays
/// exponentially, passing through the reference retention at `elapsed = s`.
pub fn retrievability(params: &Parameters, elapsed: f64, s: Stability) -> Retrievability {
    params.reference_retention.powf(elapsed.max(0.0) / s)
}

/// Days until retrievability falls to the desired retention.
pub fn interval(params: &Parameters, s: Stability) -> f64 {
    s * params.desired_retention.ln() / params.reference_retention.ln()
}

pub fn initial_stability(params: &Parameters, rating: Rating) -> Stability {
    params.initial_stability[rating.index()].max(MIN_STABILITY)
}

pub fn initial_difficulty(params: &Parameters, rating: Rating) -> Difficulty {
    clamp_d(params.initial_difficulty[rating.index()])
}

pub fn next_difficulty(params: &Parameters, d: Difficulty, rating: Rating) -> Difficulty {
    let delta = -params.difficulty_step * (rating.value() - 3.0);
    let damped = d + delta * ((MAX_DIFFICULTY - d) / 9.0);
    let target = initial_difficulty(params, Rating::Easy);
    clamp_d(params.mean_reversion * target + (1.0 - params.mean_reversion) * damped)
}

/// Stability after a successful review of a graduated card. Never below `s`.
pub fn recall_stability(
    params: &Parameters,
    d: Difficulty,
    s: Stability,
    r: Retrievability,
    rating: Rating,
) -> Stability {
    let w = &params.recall;
    let t_d = 11.0 - d;
    let t_s = s.powf(-w.stability_decay);
    let t_r = f64::exp(w.retrievability_weight * (1.0 - r)) - 1.0;
    let h = if rating == Rating::Hard {
        w.hard_penalty
    } else {
        1.0
    };
    let b = if rating == Rating::Easy {
        w.easy_bonus
    } else {
        1.0
    };
    let alpha = 1.0 + f64::exp(w.scale) * t_d * t_s * t_r * h * b;
    clamp_s((s * alpha).max(s))
}

/// Stability after a graduated card is forgotten. Never above `s`.
pub fn lapse_stability(
    params: &Parameters,
    d: Difficulty,
    s: Stability,
    r: Retrievability,
) -> Stability {
    let w = &params.lapse;
    let d_f = d.powf(-w.difficulty_exponent);
    let s_f = (s + 1.0).powf(w.stability_exponent) - 1.0;
    let r_f = f64::exp(w.retrievability_weight * (1.0 - r));
    clamp_s(f64::min(w.scale * d_f * s_f * r_f, s))
}

/// Stability when a learning card graduates with a passing rating.
pub fn graduation_stability(params: &Parameters, s: Stability, rating: Rating) -> Stability {
    let multiplier = match rating {
        Rating::Again => 1.0,
        Rating::Hard => params.graduation_multipliers[0],
        Rating::Good => params.graduation_multipliers[1],
        Rating::Easy => params.graduation_multipliers[2],
    };
    clamp_s(s * multiplier)
}

fn clamp_d(d: Difficulty) -> Difficulty {
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn clamp_s(s: Stability) -> Stability {
    if s.is_nan() {
        return MIN_STABILITY;
    }
    s.clamp(MIN_STABILITY, MAX_STABILITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(Parameters::default().validate().is_ok());
    }

    #[test]
    fn test_retrievability_anchor() {
        let params = Parameters::default();
        assert!(approx_eq(retrievability(&params, 0.0, 5.0), 1.0));
        assert!(approx_eq(retrievability(&params, 5.0, 5.0), 0.9));
        assert!(retrievability(&params, 10.0, 5.0) < 0.9);
    }

    #[test]
    fn test_interval_equals_stability_at_reference() {
        let params = Parameters::default();
        assert!(approx_eq(interval(&params, 7.5), 7.5));
        let stricter = Parameters {
            desired_retention: 0.95,
            ..Parameters::default()
        };
        assert!(interval(&stricter, 7.5) < 7.5);
    }

    #[test]
    fn test_difficulty_ordering() {
        let params = Parameters::default();
        let d = 5.0;
        let again = next_difficulty(&params, d, Rating::Again);
        let hard = next_difficulty(&params, d, Rating::Hard);
        let good = next_difficulty(&params, d, Rating::Good);
        let easy = next_difficulty(&params, d, Rating::Easy);
        assert!(again > hard);
        assert!(hard > good);
        assert!(good > easy);
        assert!(again > d);
        assert!(easy < d);
    }

    #[test]
    fn test_difficulty_is_bounded() {
        let params = Parameters::default();
        let mut d = 5.0;
        for _ in 0..100 {
            d = next_difficulty(&params, d, Rating::Again);
        }
        assert!(d <= MAX_DIFFICULTY);
        for _ in 0..100 {
            d = next_difficulty(&params, d, Rating::Easy);
        }
        assert!(d >= MIN_DIFFICULTY);
    }

    #[test]
    fn test_recall_gain_diminishes_with_retrievability() {
        let params = Parameters::default();
        let low_r = recall_stability(&params, 5.0, 10.0, 0.6, Rating::Good);
        let high_r = recall_stability(&params, 5.0, 10.0, 0.95, Rating::Good);
        assert!(low_r > high_r);
        assert!(high_r >= 10.0);
    }

    #[test]
    fn test_recall_gain_larger_for_easier_cards_and_higher_ratings() {
        let params = Parameters::default();
        let easy_card = recall_stability(&params, 2.0, 10.0, 0.8, Rating::Good);
        let hard_card = recall_stability(&params, 9.0, 10.0, 0.8, Rating::Good);
        assert!(easy_card > hard_card);
        let hard = recall_stability(&params, 5.0, 10.0, 0.8, Rating::Hard);
        let good = recall_stability(&params, 5.0, 10.0, 0.8, Rating::Good);
        let easy = recall_stability(&params, 5.0, 10.0, 0.8, Rating::Easy);
        assert!(hard < good);
        assert!(good < easy);
    }

    #[test]
    fn test_lapse_shrinks_stability() {
        let params = Parameters::default();
        let r = retrievability(&params, 12.0, 10.0);
        let s = lapse_stability(&params, 5.0, 10.0, r);
        assert!(s < 10.0);
        assert!(s >= MIN_STABILITY);
    }

    #[test]
    fn test_validate_rejects_bad_retention() {
        let params = Parameters {
            reference_retention: 1.0,
            ..Parameters::default()
        };
        assert!(matches!(params.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_interval_bounds() {
        let params = Parameters {
            min_interval_days: 10,
            max_interval_days: 5,
            ..Parameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_intervals() {
        let params = Parameters {
            min_interval_days: 1_000_000_000,
            max_interval_days: i64::MAX / 2,
            fuzz: false,
            ..Parameters::default()
        };
        assert!(params.validate().is_err());
        let params = Parameters {
            max_interval_days: MAX_INTERVAL_DAYS + 1,
            ..Parameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_day_long_step() {
        let params = Parameters {
            relearning_step_minutes: 24 * 60,
            ..Parameters::default()
        };
        assert!(params.validate().is_err());
    }
}
