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
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::attempt::policy::MutationRequest;
use crate::error::Error;
use crate::error::Fallible;
use crate::types::attempt::AttemptId;

/// Where the tracker sends mutation requests. `submit` must return without
/// waiting for the statement to be generated.
pub trait MutationSink: Send + Sync {
    fn submit(&self, attempt: AttemptId, request: MutationRequest) -> Fallible<()>;

    /// Best effort: stop waiting for the statement of `attempt`.
    fn cancel(&self, attempt: AttemptId);
}

/// Used when no mutation collaborator is configured. Every mutated attempt
/// degrades to the original statement.
pub struct NoMutator;

impl MutationSink for NoMutator {
    fn submit(&self, _attempt: AttemptId, _request: MutationRequest) -> Fallible<()> {
        Err(Error::MutationRequestFailed(
            "no mutation command is configured".to_string(),
        ))
    }

    fn cancel(&self, _attempt: AttemptId) {}
}

/// Something that turns a mutation request into a problem statement.
pub trait ContentMutator: Send + Sync + 'static {
    fn mutate(&self, request: MutationRequest) -> impl Future<Output = Fallible<String>> + Send;
}

#[derive(Debug)]
pub struct MutationOutcome {
    pub attempt: AttemptId,
    pub statement: Fallible<String>,
}

/// Runs a [`ContentMutator`] on the tokio runtime, one task per request, and
/// reports each statement on a channel as it arrives.
pub struct MutationDispatcher<M> {
    mutator: Arc<M>,
    outcomes: mpsc::UnboundedSender<MutationOutcome>,
    inflight: Arc<Mutex<HashMap<AttemptId, AbortHandle>>>,
}

impl<M: ContentMutator> MutationDispatcher<M> {
    pub fn new(mutator: M) -> (Self, mpsc::UnboundedReceiver<MutationOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            mutator: Arc::new(mutator),
            outcomes,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        };
        (dispatcher, receiver)
    }

    #[cfg(test)]
    fn inflight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<M: ContentMutator> MutationSink for MutationDispatcher<M> {
    fn submit(&self, attempt: AttemptId, request: MutationRequest) -> Fallible<()> {
        let handle =
            Handle::try_current().map_err(|e| Error::MutationRequestFailed(e.to_string()))?;
        if self.outcomes.is_closed() {
            return Err(Error::MutationRequestFailed(
                "nobody is waiting for mutated statements".to_string(),
            ));
        }
        let mutator = self.mutator.clone();
        let outcomes = self.outcomes.clone();
        let inflight = self.inflight.clone();
        // Hold the map while spawning so the task cannot remove its entry
        // before it has been inserted.
        let mut map = self.inflight.lock();
        let task = handle.spawn(async move {
            let statement = mutator.mutate(request).await;
            inflight.lock().remove(&attempt);
            if let Err(e) = &statement {
                log::warn!("Mutation for attempt {attempt} failed: {e}");
            }
            if outcomes.send(MutationOutcome { attempt, statement }).is_err() {
                log::debug!("Dropping mutation for attempt {attempt}: receiver is gone.");
            }
        });
        map.insert(attempt, task.abort_handle());
        log::debug!("Dispatched mutation request for attempt {attempt}.");
        Ok(())
    }

    fn cancel(&self, attempt: AttemptId) {
        if let Some(task) = self.inflight.lock().remove(&attempt) {
            task.abort();
            log::debug!("Cancelled mutation for attempt {attempt}.");
        }
    }
}

/// Pipes the request as JSON into a shell command and reads the mutated
/// statement from its standard output.
pub struct CommandMutator {
    command: String,
    timeout: Duration,
}

impl CommandMutator {
    pub fn new(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

impl ContentMutator for CommandMutator {
    fn mutate(&self, request: MutationRequest) -> impl Future<Output = Fallible<String>> + Send {
        let command = self.command.clone();
        let timeout = self.timeout;
        async move {
            let payload = serde_json::to_vec(&request)?;
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;
            let stdin = child.stdin.take();
            let run = async move {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(&payload).await?;
                }
                child.wait_with_output().await
            };
            let output = match tokio::time::timeout(timeout, run).await {
                Ok(output) => output?,
                Err(_) => {
                    return Err(Error::MutationRequestFailed(format!(
                        "`{command}` did not finish within {} seconds",
                        timeout.as_secs()
                    )));
                }
            };
            if !output.status.success() {
                return Err(Error::MutationRequestFailed(format!(
                    "`{command}` exited with {}",
                    output.status
                )));
            }
            let statement = String::from_utf8(output.stdout)
                .map_err(|_| Error::MutationRequestFailed("output is not UTF-8".to_string()))?;
            let statement = statement.trim();
            if statement.is_empty() {
                return Err(Error::MutationRequestFailed(format!(
                    "`{command}` printed nothing"
                )));
            }
            Ok(statement.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mutation_class::MutationClass;
    use crate::types::problem::ProblemId;

    fn request() -> MutationRequest {
        MutationRequest::new(
            &ProblemId::new("two-sum"),
            MutationClass::ConstraintChange,
            3,
            &[],
        )
    }

    struct Echo;

    impl ContentMutator for Echo {
        fn mutate(
            &self,
            request: MutationRequest,
        ) -> impl Future<Output = Fallible<String>> + Send {
            async move { Ok(format!("{} ({})", request.problem, request.class)) }
        }
    }

    struct Never;

    impl ContentMutator for Never {
        fn mutate(
            &self,
            _request: MutationRequest,
        ) -> impl Future<Output = Fallible<String>> + Send {
            std::future::pending()
        }
    }

    #[test]
    fn test_no_mutator_always_fails() {
        let result = NoMutator.submit(AttemptId(1), request());
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }

    #[test]
    fn test_dispatch_outside_runtime_fails() {
        let (dispatcher, _outcomes) = MutationDispatcher::new(Echo);
        let result = dispatcher.submit(AttemptId(1), request());
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }

    #[tokio::test]
    async fn test_dispatch_reports_outcome() -> Fallible<()> {
        let (dispatcher, mut outcomes) = MutationDispatcher::new(Echo);
        dispatcher.submit(AttemptId(7), request())?;
        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.attempt, AttemptId(7));
        assert_eq!(outcome.statement?, "two-sum (constraint-change)");
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_receiver_is_gone() {
        let (dispatcher, outcomes) = MutationDispatcher::new(Echo);
        drop(outcomes);
        let result = dispatcher.submit(AttemptId(1), request());
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }

    #[tokio::test]
    async fn test_cancel_aborts_inflight_request() -> Fallible<()> {
        let (dispatcher, mut outcomes) = MutationDispatcher::new(Never);
        dispatcher.submit(AttemptId(2), request())?;
        assert_eq!(dispatcher.inflight(), 1);
        dispatcher.cancel(AttemptId(2));
        assert_eq!(dispatcher.inflight(), 0);
        drop(dispatcher);
        assert!(outcomes.recv().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_command_mutator_reads_stdout() -> Fallible<()> {
        let mutator = CommandMutator::new("tr a-z A-Z".to_string(), Duration::from_secs(10));
        let statement = mutator.mutate(request()).await?;
        assert!(statement.contains("TWO-SUM"));
        Ok(())
    }

    #[tokio::test]
    async fn test_command_mutator_rejects_failure() {
        let mutator = CommandMutator::new("cat > /dev/null; exit 3".to_string(), Duration::from_secs(10));
        let result = mutator.mutate(request()).await;
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }

    #[tokio::test]
    async fn test_command_mutator_times_out_on_unread_stdin() {
        let mutator = CommandMutator::new("sleep 5".to_string(), Duration::from_millis(200));
        // Far more than a pipe buffer, so the write blocks.
        let mut large = request();
        large.problem = ProblemId::new("x".repeat(1 << 20));
        let result = mutator.mutate(large).await;
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }

    #[tokio::test]
    async fn test_command_mutator_times_out() {
        let mutator = CommandMutator::new("sleep 5".to_string(), Duration::from_millis(100));
        let result = mutator.mutate(request()).await;
        assert!(matches!(result, Err(Error::MutationRequestFailed(_))));
    }
}
