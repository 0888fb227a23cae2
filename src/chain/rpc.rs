//! JSON-RPC client for chain daemons.
//!
//! Calls go through a process-wide queue that bounds in-flight requests, and a
//! per-client circuit breaker that fails calls fast for a short window after
//! the daemon misbehaves.

use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::chain::network::ChainNetwork;
use crate::config::{CredentialTable, RpcClientConfig, RpcEndpoint};
use crate::error::{Error, Result};

/// Daemon commands used by the swap engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCommand {
    BestBlockHash,
    BlockCount,
    GetBlock,
    GetBlockHash,
    GetBlockHeader,
    GetRawTransaction,
    GetRawMempool,
    SendRawTransaction,
    EstimateSmartFee,
    GetTxOut,
    Generate,
    GenerateToAddress,
    Stop,
    CreateNewAddress,
}

impl RpcCommand {
    pub fn method(self) -> &'static str {
        match self {
            RpcCommand::BestBlockHash => "getbestblockhash",
            RpcCommand::BlockCount => "getblockcount",
            RpcCommand::GetBlock => "getblock",
            RpcCommand::GetBlockHash => "getblockhash",
            RpcCommand::GetBlockHeader => "getblockheader",
            RpcCommand::GetRawTransaction => "getrawtransaction",
            RpcCommand::GetRawMempool => "getrawmempool",
            RpcCommand::SendRawTransaction => "sendrawtransaction",
            RpcCommand::EstimateSmartFee => "estimatesmartfee",
            RpcCommand::GetTxOut => "gettxout",
            RpcCommand::Generate => "generate",
            RpcCommand::GenerateToAddress => "generatetoaddress",
            RpcCommand::Stop => "stop",
            RpcCommand::CreateNewAddress => "getnewaddress",
        }
    }
}

/// Raw HTTP answer from a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Delivers a JSON-RPC request body to a daemon endpoint.
pub trait RpcTransport: Send + Sync {
    fn post(
        &self,
        endpoint: &RpcEndpoint,
        body: &Value,
    ) -> impl Future<Output = std::result::Result<HttpReply, String>> + Send;
}

/// HTTP POST with Basic authentication.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RpcTransport for HttpTransport {
    async fn post(
        &self,
        endpoint: &RpcEndpoint,
        body: &Value,
    ) -> std::result::Result<HttpReply, String> {
        let response = self
            .client
            .post(endpoint.url())
            .basic_auth(&endpoint.user, Some(&endpoint.password))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("send request: {e}"))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("read response body: {e}"))?;

        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}

/// Bounds the number of simultaneous daemon calls. Waiters are served in FIFO order.
#[derive(Debug, Clone)]
pub struct RpcQueue {
    permits: Arc<Semaphore>,
}

static SHARED_QUEUE: OnceLock<RpcQueue> = OnceLock::new();

impl RpcQueue {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// The process-wide queue. Created by the first caller, reused afterwards.
    pub fn shared(max_in_flight: usize) -> Self {
        SHARED_QUEUE
            .get_or_init(|| Self::new(max_in_flight))
            .clone()
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| Error::DaemonUnavailable("rpc queue closed".to_string()))
    }
}

/// Pauses all calls for a fixed window after a daemon failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    pause: Duration,
    pause_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(pause: Duration) -> Self {
        Self {
            pause,
            pause_until: Mutex::new(None),
        }
    }

    /// Remaining pause, if the breaker is open.
    pub fn paused_for(&self) -> Option<Duration> {
        let mut pause_until = self.pause_until.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match *pause_until {
            Some(until) if now < until => Some(until - now),
            Some(_) => {
                *pause_until = None;
                None
            }
            None => None,
        }
    }

    fn check(&self) -> Result<()> {
        match self.paused_for() {
            Some(remaining) => Err(Error::CircuitOpen(remaining)),
            None => Ok(()),
        }
    }

    fn trip(&self) {
        let until = Instant::now() + self.pause;
        *self.pause_until.lock().expect("breaker mutex poisoned") = Some(until);
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct RpcClient<T = HttpTransport> {
    transport: T,
    credentials: Arc<CredentialTable>,
    queue: RpcQueue,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl<T: Clone> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            credentials: self.credentials.clone(),
            queue: self.queue.clone(),
            breaker: self.breaker.clone(),
            timeout: self.timeout,
        }
    }
}

impl RpcClient<HttpTransport> {
    /// HTTP client sharing the process-wide queue.
    pub fn new(credentials: CredentialTable, config: RpcClientConfig) -> Self {
        Self::with_transport(
            HttpTransport::new(),
            credentials,
            config,
            RpcQueue::shared(config.max_in_flight),
        )
    }
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn with_transport(
        transport: T,
        credentials: CredentialTable,
        config: RpcClientConfig,
        queue: RpcQueue,
    ) -> Self {
        Self {
            transport,
            credentials: Arc::new(credentials),
            queue,
            breaker: Arc::new(CircuitBreaker::new(config.pause)),
            timeout: config.timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Executes `command` against the daemon of `network`, returning the
    /// `result` member of the JSON-RPC reply.
    pub async fn call(
        &self,
        command: RpcCommand,
        network: ChainNetwork,
        params: Vec<Value>,
    ) -> Result<Value> {
        self.breaker.check()?;
        let endpoint = self.credentials.resolve(network)?;

        let _permit = self.queue.acquire().await?;
        // The breaker may have tripped while this call was queued.
        self.breaker.check()?;

        let body = json!({
            "id": "1",
            "method": command.method(),
            "params": params,
        });

        let reply = match tokio::time::timeout(self.timeout, self.transport.post(&endpoint, &body))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                self.trip(command, network, &err);
                return Err(Error::DaemonUnavailable(err));
            }
            Err(_) => {
                self.trip(command, network, "timeout");
                return Err(Error::Timeout(self.timeout));
            }
        };

        if reply.status == 401 {
            tracing::warn!(%network, method = command.method(), "rpc credentials rejected");
            return Err(Error::AuthenticationFailure);
        }

        let parsed = serde_json::from_slice::<RpcResponse>(&reply.body);

        if !(200..300).contains(&reply.status) {
            let reason = match parsed {
                Ok(RpcResponse {
                    error: Some(error), ..
                }) => format!("http {}: rpc error {}: {}", reply.status, error.code, error.message),
                _ => format!("http {}", reply.status),
            };
            self.trip(command, network, &reason);
            return Err(Error::DaemonUnavailable(reason));
        }

        let response = match parsed {
            Ok(response) => response,
            Err(err) => {
                let reason = format!("parse response: {err}");
                self.trip(command, network, &reason);
                return Err(Error::DaemonUnavailable(reason));
            }
        };

        if let Some(error) = response.error {
            tracing::debug!(%network, method = command.method(), code = error.code, "rpc command failed");
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    fn trip(&self, command: RpcCommand, network: ChainNetwork, reason: &str) {
        self.breaker.trip();
        tracing::warn!(
            %network,
            method = command.method(),
            reason,
            pause_ms = self.breaker.pause.as_millis() as u64,
            "chain daemon failure, pausing rpc calls"
        );
    }
}
