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

use std::path::Path;

use serde::Deserialize;

use crate::attempt::policy::MutationPolicy;
use crate::attempt::policy::Rotation;
use crate::attempt::policy::Weighted;
use crate::error::Error;
use crate::error::Fallible;
use crate::fsrs::Parameters;
use crate::types::problem::Category;

/// The contents of `drillbit.toml`. Every section and key is optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scheduler: Parameters,
    pub session: SessionConfig,
    pub attempts: AttemptConfig,
    pub mutation: MutationConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Open sessions older than this are abandoned and their cards unlocked.
    pub stale_after_minutes: i64,
    pub new_card_order: NewCardOrder,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: 120,
            new_card_order: NewCardOrder::Insertion,
        }
    }
}

/// How the new slot is filled.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewCardOrder {
    /// Oldest card first.
    Insertion,
    /// Cycle through these categories, one per session.
    Rotation(Vec<Category>),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttemptConfig {
    /// The attempt with this ordinal, and every later one, is mutated.
    pub mutation_threshold: u32,
    pub mutation_policy: MutationPolicyConfig,
    pub default_time_budget_minutes: i64,
    /// How many times a rating is re-applied after a version conflict.
    pub max_update_retries: u32,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            mutation_threshold: 3,
            mutation_policy: MutationPolicyConfig::Rotation,
            default_time_budget_minutes: 30,
            max_update_retries: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationPolicyConfig {
    Rotation,
    /// Weights for constraint-change, input-type-change, inversion,
    /// follow-up-extension and combination, in that order.
    Weighted([u32; 5]),
}

impl MutationPolicyConfig {
    pub fn build(&self) -> Box<dyn MutationPolicy> {
        match self {
            MutationPolicyConfig::Rotation => Box::new(Rotation),
            MutationPolicyConfig::Weighted(weights) => Box::new(Weighted::new(*weights)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MutationConfig {
    /// Shell command that reads a mutation request as JSON on stdin and
    /// prints the mutated statement on stdout.
    pub command: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_seconds: 120,
        }
    }
}

impl Config {
    /// Load `path`, falling back to the defaults when it does not exist.
    pub fn load(path: &Path) -> Fallible<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Fallible<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Fallible<()> {
        self.scheduler.validate()?;
        if self.session.stale_after_minutes <= 0 {
            return Err(Error::InvalidConfig(
                "stale_after_minutes must be positive".to_string(),
            ));
        }
        if let NewCardOrder::Rotation(categories) = &self.session.new_card_order {
            if categories.is_empty() {
                return Err(Error::InvalidConfig(
                    "a rotation needs at least one category".to_string(),
                ));
            }
        }
        if self.attempts.mutation_threshold == 0 {
            return Err(Error::InvalidConfig(
                "mutation_threshold must be at least 1".to_string(),
            ));
        }
        if let MutationPolicyConfig::Weighted(weights) = &self.attempts.mutation_policy {
            if weights.iter().all(|w| *w == 0) {
                return Err(Error::InvalidConfig(
                    "mutation weights must not all be zero".to_string(),
                ));
            }
        }
        if self.attempts.default_time_budget_minutes <= 0 {
            return Err(Error::InvalidConfig(
                "default_time_budget_minutes must be positive".to_string(),
            ));
        }
        if self.mutation.timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "mutation timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() -> Fallible<()> {
        assert_eq!(Config::from_toml("")?, Config::default());
        Ok(())
    }

    #[test]
    fn test_partial_sections() -> Fallible<()> {
        let config = Config::from_toml(
            r#"
[scheduler]
desired_retention = 0.85
fuzz = false

[scheduler.recall]
easy_bonus = 2.5

[session]
new_card_order = { rotation = ["graphs", "dp"] }

[attempts]
mutation_threshold = 5
mutation_policy = { weighted = [1, 0, 0, 0, 3] }

[mutation]
command = "mutate --json"
"#,
        )?;
        assert_eq!(config.scheduler.desired_retention, 0.85);
        assert!(!config.scheduler.fuzz);
        assert_eq!(config.scheduler.recall.easy_bonus, 2.5);
        assert_eq!(
            config.scheduler.recall.hard_penalty,
            Parameters::default().recall.hard_penalty
        );
        assert_eq!(
            config.session.new_card_order,
            NewCardOrder::Rotation(vec![Category::new("graphs"), Category::new("dp")])
        );
        assert_eq!(config.session.stale_after_minutes, 120);
        assert_eq!(config.attempts.mutation_threshold, 5);
        assert_eq!(
            config.attempts.mutation_policy,
            MutationPolicyConfig::Weighted([1, 0, 0, 0, 3])
        );
        assert_eq!(config.mutation.command.as_deref(), Some("mutate --json"));
        Ok(())
    }

    #[test]
    fn test_insertion_order_as_string() -> Fallible<()> {
        let config = Config::from_toml("[session]\nnew_card_order = \"insertion\"\n")?;
        assert_eq!(config.session.new_card_order, NewCardOrder::Insertion);
        Ok(())
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_toml("[attempts]\nmutation_threshold = 0\n").is_err());
        assert!(Config::from_toml("[scheduler]\ndesired_retention = 1.5\n").is_err());
        assert!(Config::from_toml("[session]\nnew_card_order = { rotation = [] }\n").is_err());
        assert!(
            Config::from_toml("[attempts]\nmutation_policy = { weighted = [0, 0, 0, 0, 0] }\n")
                .is_err()
        );
        assert!(Config::from_toml("[session]\nstale_after_minutes = 0\n").is_err());
    }

    #[test]
    fn test_unknown_key() {
        assert!(matches!(
            Config::from_toml("[session]\nmax_cards = 3\n"),
            Err(Error::Toml(_))
        ));
    }
}
