//! Lifecycle enforcement around a single retriever.
//!
//! [`DeliveryDriver`] owns one boxed [`Retriever`] for one cycle. Every call
//! goes through it so that call order, acknowledgment order, timeouts and
//! panic isolation are checked in one place rather than trusted to each
//! retriever implementation.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::time::timeout;

use crate::collection::disposition::Ack;
use crate::retriever::{CandidateFile, Retriever, RetrieverError};

/// Lifecycle state of a driven retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RetrieverState {
    /// Built, not yet validated.
    Unconfigured,
    /// `test_configuration` returned true.
    Validated,
    /// `startup` returned true.
    Ready,
    /// A batch has been staged; acknowledgments are accepted.
    Iterating,
    /// `load_next_file` returned `None`.
    Exhausted,
    /// `shutdown` has run (or was not needed).
    Closed,
}

/// Failure of a driven retriever call.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{op} timed out after {after:?}")]
    TimedOut { op: &'static str, after: Duration },

    #[error("{op} failed: {source}")]
    Retriever {
        op: &'static str,
        #[source]
        source: RetrieverError,
    },

    #[error("{op} panicked: {message}")]
    Panicked { op: &'static str, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Per-call time limits for retriever operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Limit for `test_configuration`, `startup` and `shutdown`.
    pub startup: Duration,
    /// Limit for `load_next_file`.
    pub load: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(30),
            load: Duration::from_secs(60),
        }
    }
}

/// Drives one retriever through its lifecycle.
pub struct DeliveryDriver {
    retriever: Box<dyn Retriever>,
    timeouts: CallTimeouts,
    state: RetrieverState,
    // Staged names not yet acknowledged, in staging order.
    pending: VecDeque<String>,
    // Set once `startup` ran and did not cleanly refuse.
    acquired: bool,
}

impl std::fmt::Debug for DeliveryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDriver")
            .field("kind", &self.retriever.kind())
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryDriver {
    pub fn new(retriever: Box<dyn Retriever>, timeouts: CallTimeouts) -> Self {
        Self {
            retriever,
            timeouts,
            state: RetrieverState::Unconfigured,
            pending: VecDeque::new(),
            acquired: false,
        }
    }

    pub fn state(&self) -> RetrieverState {
        self.state
    }

    pub fn kind(&self) -> &str {
        self.retriever.kind()
    }

    /// Whether `close` will call `shutdown` on the retriever.
    pub fn needs_shutdown(&self) -> bool {
        self.acquired && self.state != RetrieverState::Closed
    }

    fn expect_state(&self, op: &str, allowed: &[RetrieverState]) -> Result<(), DriverError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::Protocol(format!(
                "{op} called in state {}",
                self.state
            )))
        }
    }

    pub async fn test_configuration(&mut self) -> Result<bool, DriverError> {
        self.expect_state("test_configuration", &[RetrieverState::Unconfigured])?;
        let ok = guarded(
            "test_configuration",
            self.timeouts.startup,
            self.retriever.test_configuration(),
        )
        .await?;
        if ok {
            self.state = RetrieverState::Validated;
        }
        Ok(ok)
    }

    /// Start the retriever.
    ///
    /// A clean `false` leaves nothing acquired. A timeout, error or panic
    /// leaves the retriever marked for shutdown.
    pub async fn startup(&mut self) -> Result<bool, DriverError> {
        self.expect_state("startup", &[RetrieverState::Validated])?;
        self.acquired = true;
        let started = guarded("startup", self.timeouts.startup, self.retriever.startup()).await?;
        if started {
            self.state = RetrieverState::Ready;
        } else {
            self.acquired = false;
        }
        Ok(started)
    }

    /// Stage the next batch. Every file of the previous batch must have been
    /// acknowledged first.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<CandidateFile>>, DriverError> {
        self.expect_state(
            "load_next_file",
            &[RetrieverState::Ready, RetrieverState::Iterating],
        )?;
        if let Some(name) = self.pending.front() {
            return Err(DriverError::Protocol(format!(
                "load_next_file called while '{name}' is unacknowledged"
            )));
        }

        let batch = guarded(
            "load_next_file",
            self.timeouts.load,
            self.retriever.load_next_file(),
        )
        .await?;
        match batch {
            Some(files) => {
                self.pending = files.iter().map(|f| f.name.clone()).collect();
                self.state = RetrieverState::Iterating;
                Ok(Some(files))
            }
            None => {
                self.state = RetrieverState::Exhausted;
                Ok(None)
            }
        }
    }

    /// Acknowledge the oldest unacknowledged file of the current batch.
    pub fn acknowledge(&mut self, file: &CandidateFile, ack: Ack) -> Result<(), DriverError> {
        self.expect_state(ack.as_ref(), &[RetrieverState::Iterating])?;
        match self.pending.front() {
            Some(expected) if *expected == file.name => {}
            Some(expected) => {
                return Err(DriverError::Protocol(format!(
                    "{ack} for '{}' out of order, expected '{expected}'",
                    file.name
                )));
            }
            None => {
                return Err(DriverError::Protocol(format!(
                    "{ack} for '{}' with no staged file",
                    file.name
                )));
            }
        }
        self.pending.pop_front();

        let op: &'static str = match ack {
            Ack::Succeeded => "file_succeeded",
            Ack::Failed => "file_failed",
            Ack::NotProcessed => "file_not_processed",
        };
        let retriever = &mut self.retriever;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| match ack {
            Ack::Succeeded => retriever.file_succeeded(file),
            Ack::Failed => retriever.file_failed(file),
            Ack::NotProcessed => retriever.file_not_processed(file),
        }));
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DriverError::Retriever { op, source }),
            Err(payload) => Err(DriverError::Panicked {
                op,
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Let the retriever persist what has been acknowledged so far.
    pub async fn checkpoint(&mut self) -> Result<(), DriverError> {
        self.expect_state(
            "checkpoint",
            &[RetrieverState::Iterating, RetrieverState::Exhausted],
        )?;
        guarded("checkpoint", self.timeouts.load, self.retriever.checkpoint()).await
    }

    /// Shut the retriever down if it acquired anything. Idempotent.
    ///
    /// Returns whether `shutdown` was invoked by this call.
    pub async fn close(&mut self) -> Result<bool, DriverError> {
        if !self.needs_shutdown() {
            self.state = RetrieverState::Closed;
            return Ok(false);
        }
        self.state = RetrieverState::Closed;
        self.pending.clear();
        guarded("shutdown", self.timeouts.startup, self.retriever.shutdown()).await?;
        Ok(true)
    }
}

/// Run one retriever call under a time limit, converting panics into errors.
async fn guarded<T, F>(op: &'static str, limit: Duration, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, RetrieverError>>,
{
    match timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(DriverError::TimedOut { op, after: limit }),
        Ok(Err(payload)) => Err(DriverError::Panicked {
            op,
            message: panic_message(payload.as_ref()),
        }),
        Ok(Ok(Err(source))) => Err(DriverError::Retriever { op, source }),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        config_ok: bool,
        startup_ok: bool,
        batches: VecDeque<Vec<&'static str>>,
        hang_on_load: bool,
        panic_on_startup: bool,
        panic_on_ack: bool,
    }

    struct Scripted {
        script: Script,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn boxed(script: Script) -> (Box<dyn Retriever>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let retriever = Scripted {
                script,
                calls: Arc::clone(&calls),
            };
            (Box::new(retriever), calls)
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait::async_trait]
    impl Retriever for Scripted {
        fn kind(&self) -> &str {
            "scripted"
        }

        async fn test_configuration(&mut self) -> Result<bool, RetrieverError> {
            self.record("test_configuration".into());
            Ok(self.script.config_ok)
        }

        async fn startup(&mut self) -> Result<bool, RetrieverError> {
            self.record("startup".into());
            if self.script.panic_on_startup {
                panic!("device vanished");
            }
            Ok(self.script.startup_ok)
        }

        async fn load_next_file(&mut self) -> Result<Option<Vec<CandidateFile>>, RetrieverError> {
            self.record("load_next_file".into());
            if self.script.hang_on_load {
                std::future::pending::<()>().await;
            }
            Ok(self
                .script
                .batches
                .pop_front()
                .map(|names| names.into_iter().map(|n| CandidateFile::new(n, n.as_bytes())).collect()))
        }

        fn file_succeeded(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
            self.record(format!("file_succeeded:{}", file.name));
            if self.script.panic_on_ack {
                panic!("cursor corrupted");
            }
            Ok(())
        }

        async fn checkpoint(&mut self) -> Result<(), RetrieverError> {
            self.record("checkpoint".into());
            Ok(())
        }

        fn file_failed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
            self.record(format!("file_failed:{}", file.name));
            Ok(())
        }

        fn file_not_processed(&mut self, file: &CandidateFile) -> Result<(), RetrieverError> {
            self.record(format!("file_not_processed:{}", file.name));
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), RetrieverError> {
            self.record("shutdown".into());
            Ok(())
        }
    }

    fn ready_script(batches: Vec<Vec<&'static str>>) -> Script {
        Script {
            config_ok: true,
            startup_ok: true,
            batches: batches.into(),
            ..Script::default()
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (retriever, calls) = Scripted::boxed(ready_script(vec![vec!["a", "b"], vec!["c"]]));
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());

        assert!(driver.test_configuration().await.unwrap());
        assert!(driver.startup().await.unwrap());
        assert_eq!(driver.state(), RetrieverState::Ready);

        while let Some(batch) = driver.next_batch().await.unwrap() {
            for file in &batch {
                driver.acknowledge(file, Ack::Succeeded).unwrap();
            }
        }
        assert_eq!(driver.state(), RetrieverState::Exhausted);
        assert!(driver.close().await.unwrap());
        assert!(!driver.close().await.unwrap());
        assert_eq!(driver.state(), RetrieverState::Closed);

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "test_configuration",
                "startup",
                "load_next_file",
                "file_succeeded:a",
                "file_succeeded:b",
                "load_next_file",
                "file_succeeded:c",
                "load_next_file",
                "shutdown",
            ]
        );
    }

    #[tokio::test]
    async fn test_startup_requires_validation() {
        let (retriever, calls) = Scripted::boxed(Script::default());
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());

        assert!(!driver.test_configuration().await.unwrap());
        assert!(matches!(driver.startup().await, Err(DriverError::Protocol(_))));
        assert!(!driver.close().await.unwrap());
        assert_eq!(*calls.lock().unwrap(), vec!["test_configuration"]);
    }

    #[tokio::test]
    async fn test_refused_startup_needs_no_shutdown() {
        let script = Script {
            config_ok: true,
            ..Script::default()
        };
        let (retriever, calls) = Scripted::boxed(script);
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());

        assert!(driver.test_configuration().await.unwrap());
        assert!(!driver.startup().await.unwrap());
        assert!(!driver.needs_shutdown());
        assert!(!driver.close().await.unwrap());
        assert_eq!(*calls.lock().unwrap(), vec!["test_configuration", "startup"]);
    }

    #[tokio::test]
    async fn test_out_of_order_ack_is_rejected() {
        let (retriever, calls) = Scripted::boxed(ready_script(vec![vec!["a", "b"]]));
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();
        driver.startup().await.unwrap();

        let batch = driver.next_batch().await.unwrap().unwrap();
        let err = driver.acknowledge(&batch[1], Ack::Succeeded).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
        assert_eq!(driver.pending, ["a", "b"]);
        assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("file_")));
    }

    #[tokio::test]
    async fn test_load_with_unacknowledged_files_is_rejected() {
        let (retriever, _) = Scripted::boxed(ready_script(vec![vec!["a"], vec!["b"]]));
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();
        driver.startup().await.unwrap();

        driver.next_batch().await.unwrap();
        assert!(matches!(driver.next_batch().await, Err(DriverError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_ack_before_batch_is_rejected() {
        let (retriever, _) = Scripted::boxed(ready_script(vec![]));
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();
        driver.startup().await.unwrap();

        let stray = CandidateFile::new("x", Vec::new());
        assert!(matches!(
            driver.acknowledge(&stray, Ack::Failed),
            Err(DriverError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let mut script = ready_script(vec![]);
        script.hang_on_load = true;
        let (retriever, calls) = Scripted::boxed(script);
        let timeouts = CallTimeouts {
            startup: Duration::from_secs(1),
            load: Duration::from_millis(50),
        };
        let mut driver = DeliveryDriver::new(retriever, timeouts);
        driver.test_configuration().await.unwrap();
        driver.startup().await.unwrap();

        let err = driver.next_batch().await.unwrap_err();
        assert!(matches!(err, DriverError::TimedOut { op: "load_next_file", .. }));
        assert!(driver.close().await.unwrap());
        assert_eq!(calls.lock().unwrap().last().unwrap(), "shutdown");
    }

    #[tokio::test]
    async fn test_ack_panic_is_contained_and_shut_down() {
        let mut script = ready_script(vec![vec!["a", "b"]]);
        script.panic_on_ack = true;
        let (retriever, calls) = Scripted::boxed(script);
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();
        driver.startup().await.unwrap();

        let batch = driver.next_batch().await.unwrap().unwrap();
        match driver.acknowledge(&batch[0], Ack::Succeeded).unwrap_err() {
            DriverError::Panicked { op, message } => {
                assert_eq!(op, "file_succeeded");
                assert_eq!(message, "cursor corrupted");
            }
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(driver.close().await.unwrap());
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["test_configuration", "startup", "load_next_file", "file_succeeded:a", "shutdown"]
        );
    }

    #[tokio::test]
    async fn test_checkpoint_only_while_iterating() {
        let (retriever, calls) = Scripted::boxed(ready_script(vec![vec!["a"]]));
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();
        assert!(matches!(driver.checkpoint().await, Err(DriverError::Protocol(_))));
        driver.startup().await.unwrap();

        let batch = driver.next_batch().await.unwrap().unwrap();
        driver.acknowledge(&batch[0], Ack::Succeeded).unwrap();
        driver.checkpoint().await.unwrap();
        assert_eq!(calls.lock().unwrap().last().unwrap(), "checkpoint");
    }

    #[tokio::test]
    async fn test_startup_panic_is_contained_and_shut_down() {
        let mut script = ready_script(vec![]);
        script.panic_on_startup = true;
        let (retriever, calls) = Scripted::boxed(script);
        let mut driver = DeliveryDriver::new(retriever, CallTimeouts::default());
        driver.test_configuration().await.unwrap();

        let err = driver.startup().await.unwrap_err();
        match err {
            DriverError::Panicked { op, message } => {
                assert_eq!(op, "startup");
                assert_eq!(message, "device vanished");
            }
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(driver.needs_shutdown());
        assert!(driver.close().await.unwrap());
        assert_eq!(calls.lock().unwrap().last().unwrap(), "shutdown");
    }
}
