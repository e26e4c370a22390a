//! In-memory client for exercising query runners without a server.
//!
//! A [`RecordingPool`] hands out connections that journal every statement they
//! receive, answer from scripted responses and fail on demand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{ClientConnection, ClientPool};
use crate::error::{DriverError, QueryRunnerError};
use crate::results::{ClientResponse, RowSequence};
use crate::types::RowValues;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// Which connection of the pool ran it, counting from 1
    pub connection: usize,
    pub sql: String,
    pub params: Vec<RowValues>,
}

#[derive(Debug)]
struct Failure {
    prefix: String,
    error: DriverError,
    once: bool,
}

#[derive(Debug, Default)]
struct Journal {
    statements: Vec<RecordedStatement>,
    responses: Vec<(String, ClientResponse)>,
    failures: Vec<Failure>,
    connect_error: Option<String>,
    latency: Option<Duration>,
    shutdowns: Vec<Duration>,
}

/// Scriptable pool that records what its connections were asked to run.
#[derive(Debug, Clone)]
pub struct RecordingPool {
    name: Arc<str>,
    journal: Arc<Mutex<Journal>>,
    connects: Arc<AtomicUsize>,
}

fn matches_prefix(sql: &str, prefix: &str) -> bool {
    let sql = sql.trim_start();
    sql.len() >= prefix.len()
        && sql.is_char_boundary(prefix.len())
        && sql[..prefix.len()].eq_ignore_ascii_case(prefix)
}

impl RecordingPool {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            journal: Arc::new(Mutex::new(Journal::default())),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle for handing to a [`Driver`](crate::router::Driver).
    #[must_use]
    pub fn shared(&self) -> Arc<dyn ClientPool> {
        Arc::new(self.clone())
    }

    /// Answer statements starting with `prefix` (case-insensitive) with `response`.
    /// Earlier registrations win.
    pub fn respond_to(&self, prefix: &str, response: ClientResponse) {
        self.lock().responses.push((prefix.to_string(), response));
    }

    /// Fail every statement starting with `prefix`.
    pub fn fail_on(&self, prefix: &str, error: DriverError) {
        self.push_failure(prefix, error, false);
    }

    /// Fail only the next statement starting with `prefix`.
    pub fn fail_once(&self, prefix: &str, error: DriverError) {
        self.push_failure(prefix, error, true);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Make [`connect`](ClientPool::connect) fail with `message` until cleared.
    pub fn fail_connect(&self, message: Option<&str>) {
        self.lock().connect_error = message.map(str::to_string);
    }

    /// Delay applied to every statement before it is answered.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// SQL text of every statement received, in order, including failed ones.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.iter().map(|s| s.sql.clone()).collect()
    }

    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedStatement> {
        self.lock().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Drain timeouts passed to each [`shutdown`](ClientPool::shutdown) call.
    #[must_use]
    pub fn shutdown_calls(&self) -> Vec<Duration> {
        self.lock().shutdowns.clone()
    }

    fn push_failure(&self, prefix: &str, error: DriverError, once: bool) {
        self.lock().failures.push(Failure {
            prefix: prefix.to_string(),
            error,
            once,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn answer(&self, connection: usize, sql: &str, params: &[RowValues]) -> Result<ClientResponse, DriverError> {
        let mut journal = self.lock();
        journal.statements.push(RecordedStatement {
            connection,
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if let Some(pos) = journal
            .failures
            .iter()
            .position(|failure| matches_prefix(sql, &failure.prefix))
        {
            let error = if journal.failures[pos].once {
                journal.failures.remove(pos).error
            } else {
                journal.failures[pos].error.clone()
            };
            return Err(error);
        }

        if let Some((_, response)) = journal
            .responses
            .iter()
            .find(|(prefix, _)| matches_prefix(sql, prefix))
        {
            return Ok(response.clone());
        }

        let verb = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let mut sequence = RowSequence::new(Vec::new()).with_command(verb.clone());
        if verb == "UPDATE" || verb == "DELETE" {
            sequence = sequence.with_count(0);
        }
        Ok(ClientResponse::Rows(sequence))
    }
}

#[async_trait]
impl ClientPool for RecordingPool {
    async fn connect(&self) -> Result<Box<dyn ClientConnection>, QueryRunnerError> {
        let connect_error = self.lock().connect_error.clone();
        if let Some(message) = connect_error {
            return Err(QueryRunnerError::ConnectionError(message));
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(RecordingConnection {
            id,
            pool: self.clone(),
        }))
    }

    async fn shutdown(&self, drain_timeout: Duration) {
        self.lock().shutdowns.push(drain_timeout);
    }
}

/// Connection handed out by a [`RecordingPool`].
#[derive(Debug)]
pub struct RecordingConnection {
    id: usize,
    pool: RecordingPool,
}

#[async_trait]
impl ClientConnection for RecordingConnection {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ClientResponse, DriverError> {
        let latency = self.pool.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.pool.answer(self.id, sql, params)
    }
}
