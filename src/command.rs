//! Command execution on top of partition routing.

use crate::cluster::Cluster;
use crate::cluster::node::Node;
use crate::cluster::partition::{Partition, ReplicaPolicy};
use crate::connection::TransportKind;
use crate::connection::pool::PooledConnection;
use crate::core::{CommandKind, ERR_NET_TIMEOUT, ERR_TIMEOUT, Error, Result, ResultCode, chain_errors};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, Level, event, info_span};

/// A single-record command routed to the node owning its partition.
///
/// The command owns its encoding; the executor only decides where it goes and
/// classifies what goes wrong.
#[async_trait]
pub trait Command: Send {
    fn partition(&self) -> &Partition;

    fn kind(&self) -> CommandKind;

    /// Sends the request. Once this returns `Ok` the command counts as sent.
    async fn write_request(&mut self, connection: &mut PooledConnection) -> Result<()>;

    /// Reads and applies the response.
    async fn read_response(&mut self, connection: &mut PooledConnection) -> Result<()>;
}

/// Timeouts, replica choice and transport of one execution.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    /// Budget for the whole execution including retries
    pub total_timeout: Option<Duration>,
    /// Budget for each write and each read on the connection
    pub socket_timeout: Option<Duration>,
    pub replica: ReplicaPolicy,
    pub transport: TransportKind,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            total_timeout: Some(Duration::from_secs(1)),
            socket_timeout: Some(Duration::from_secs(30)),
            replica: ReplicaPolicy::Master,
            transport: TransportKind::Tcp,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    Retry {
        delay: Duration,
        /// Wake the tend before retrying
        refresh_topology: bool,
    },
}

/// Decides whether a failed attempt is retried.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the zero-based iteration that just failed.
    fn decide(&self, err: &Error, attempt: u32) -> RetryDecision;
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _err: &Error, _attempt: u32) -> RetryDecision {
        RetryDecision::Stop
    }
}

/// Failure of one attempt and whether the request got out.
struct AttemptFailure {
    err: Error,
    sent: bool,
}

impl Cluster {
    /// Runs `command` against the node serving its partition, retrying as
    /// `retry` decides.
    ///
    /// Errors carry the node they happened on, the iteration and the in-doubt
    /// flag. Once any attempt of a write got its request out, every later
    /// error for the command is in doubt.
    pub async fn execute(
        &self,
        command: &mut dyn Command,
        policy: &CommandPolicy,
        retry: &dyn RetryPolicy,
    ) -> Result<()> {
        let partition = command.partition().clone();
        let span = info_span!(
            "cluster.command",
            namespace = %partition.namespace,
            partition_id = partition.partition_id
        );
        self.execute_attempts(command, &partition, policy, retry)
            .instrument(span)
            .await
    }

    async fn execute_attempts(
        &self,
        command: &mut dyn Command,
        partition: &Partition,
        policy: &CommandPolicy,
        retry: &dyn RetryPolicy,
    ) -> Result<()> {
        let kind = command.kind();
        let deadline = policy.total_timeout.map(|t| Instant::now() + t);
        let mut sent_any = false;
        let mut iteration = 0u32;
        let mut last_error: Option<Error> = None;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let timeout = ERR_TIMEOUT
                    .err()
                    .at_iteration(iteration)
                    .with_in_doubt(kind, sent_any);
                return Err(chain_errors(Some(timeout), last_error).unwrap_or_else(|| ERR_TIMEOUT.err()));
            }

            let failure = match self
                .attempt(command, partition, policy, iteration, deadline)
                .await
            {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };
            sent_any |= failure.sent;
            let err = failure
                .err
                .at_iteration(iteration)
                .with_in_doubt(kind, sent_any);

            match retry.decide(&err, iteration) {
                RetryDecision::Stop => return Err(err),
                RetryDecision::Retry {
                    delay,
                    refresh_topology,
                } => {
                    event!(
                        Level::DEBUG,
                        iteration,
                        error = %err,
                        refresh_topology,
                        "retrying command"
                    );
                    if refresh_topology {
                        self.request_tend();
                    }
                    if let Some(deadline) = deadline {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if delay >= remaining {
                            let timeout = ERR_TIMEOUT
                                .err()
                                .at_iteration(iteration)
                                .with_in_doubt(kind, sent_any);
                            return Err(timeout.wrap(err));
                        }
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                    iteration += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        command: &mut dyn Command,
        partition: &Partition,
        policy: &CommandPolicy,
        iteration: u32,
        deadline: Option<Instant>,
    ) -> std::result::Result<(), AttemptFailure> {
        let node = self
            .get_node(partition, policy.replica, iteration)
            .map_err(|err| {
                self.request_tend();
                AttemptFailure { err, sent: false }
            })?;

        let mut connection = node
            .get_connection(policy.transport)
            .await
            .map_err(|err| AttemptFailure { err, sent: false })?;

        // The write is bounded by the socket timeout only, never cut short by
        // the total deadline.
        let written = with_timeout(
            policy.socket_timeout,
            None,
            command.write_request(&mut connection),
        )
        .await;
        if let Err(err) = written {
            return Err(Self::fail_attempt(&node, &mut connection, err, false));
        }

        let read = with_timeout(
            policy.socket_timeout,
            deadline,
            command.read_response(&mut connection),
        )
        .await;
        read.map_err(|err| Self::fail_attempt(&node, &mut connection, err, true))
    }

    fn fail_attempt(
        node: &Arc<Node>,
        connection: &mut PooledConnection,
        err: Error,
        sent: bool,
    ) -> AttemptFailure {
        if err.matches(&[
            ResultCode::NetworkError,
            ResultCode::Timeout,
            ResultCode::ParseError,
        ]) {
            connection.mark_unusable();
            node.record_command_error();
        }
        AttemptFailure {
            err: err.in_node(node.name().to_string()),
            sent,
        }
    }
}

/// Bounds `io` by the socket timeout and, when given, the total deadline.
/// Hitting the deadline reports a total timeout; hitting the socket timeout a
/// network timeout.
async fn with_timeout<T>(
    socket_timeout: Option<Duration>,
    deadline: Option<Instant>,
    io: impl Future<Output = Result<T>>,
) -> Result<T> {
    let now = Instant::now();
    let remaining = deadline.map(|d| d.saturating_duration_since(now));
    let limit = match (socket_timeout, remaining) {
        (Some(socket), Some(remaining)) => Some(socket.min(remaining)),
        (socket, remaining) => socket.or(remaining),
    };

    let Some(limit) = limit else {
        return io.await;
    };
    match tokio::time::timeout(limit, io).await {
        Ok(result) => result,
        Err(_) if deadline.is_some_and(|d| Instant::now() >= d) => Err(ERR_TIMEOUT.err()),
        Err(_) => Err(ERR_NET_TIMEOUT.err()),
    }
}
