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

use clap::Parser;

use crate::cmd::check::check_collection;
use crate::cmd::drill::drill;
use crate::cmd::export::export_collection;
use crate::cmd::preview::preview_card;
use crate::cmd::stats::StatsFormat;
use crate::cmd::stats::print_stats;
use crate::error::Fallible;
use crate::types::card_kind::CardKind;

#[derive(Parser)]
#[command(version, about, long_about = None)]
enum Command {
    /// Plan a session and drill it.
    Drill {
        /// Optional path to the practice directory.
        directory: Option<String>,
    },
    /// Show what each rating would do to a card.
    Preview {
        /// The problem id.
        problem: String,
        /// Which card of the problem.
        #[arg(long, value_enum, default_value_t = CardKind::Solve)]
        kind: CardKind,
        /// Optional path to the practice directory.
        directory: Option<String>,
    },
    /// Print collection statistics.
    Stats {
        /// Optional path to the practice directory.
        directory: Option<String>,
        /// Output format.
        #[arg(long, default_value_t = StatsFormat::Text)]
        format: StatsFormat,
    },
    /// Export cards, attempts and sessions as JSON.
    Export {
        /// Optional path to the practice directory.
        directory: Option<String>,
    },
    /// Check the configuration, the catalog and the stored cards.
    Check {
        /// Optional path to the practice directory.
        directory: Option<String>,
    },
}

pub async fn entrypoint() -> Fallible<()> {
    let cli: Command = Command::parse();
    match cli {
        Command::Drill { directory } => drill(directory).await,
        Command::Preview {
            problem,
            kind,
            directory,
        } => preview_card(directory, problem, kind),
        Command::Stats { directory, format } => print_stats(directory, format),
        Command::Export { directory } => export_collection(directory),
        Command::Check { directory } => check_collection(directory),
    }
}
