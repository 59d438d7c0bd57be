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

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::types::attempt::AttemptEvent;
use crate::types::attempt::AttemptId;

/// Send `TimerExpired` for `attempt` once `budget` has elapsed. Abort the
/// returned handle to stop the timer early.
pub fn spawn_timer(
    attempt: AttemptId,
    budget: Duration,
    events: UnboundedSender<(AttemptId, AttemptEvent)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(budget).await;
        if events.send((attempt, AttemptEvent::TimerExpired)).is_err() {
            log::debug!("Timer for attempt {attempt} fired after its listener left.");
        }
    })
}
