//! The public client: lifecycle plus the typed request API.
//!
//! Requests are fire-and-forget: the packet is queued before the request
//! method returns, and the result arrives through a future completed by the
//! reactor thread. Dropping the future does not cancel the request.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use futures_channel::oneshot;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{self, ClientConfig};
use crate::context::{CompletionHandler, Core, Shared};
use crate::error::{AcquireError, InitError, InitResult, PacketStatus};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::operation::Operation;
use crate::packet::{Submission, UserSlice};
use crate::pool::PacketPool;
use crate::protocol::{ProtocolClient, TcpSession};
use crate::queue::SubmissionQueue;
use crate::reactor::Reactor;
use crate::types::{
    self, Account, AccountBalance, AccountFilter, CreateAccountResult, CreateAccountsResult,
    CreateTransferResult, CreateTransfersResult, EventResult, QueryFilter, Transfer,
};

/// A connection to a Tallygrid cluster.
///
/// `Client` is `Send + Sync`: requests may be submitted concurrently from
/// any number of threads, and the client coalesces them into batches behind
/// the cluster's one-request-inflight discipline. The cluster only ever sees
/// one request from this client at a time, so throughput depends on events
/// reaching it in large batches, whether the application builds them or the
/// client coalesces them.
pub struct Client {
    pub(crate) shared: Arc<Shared>,
    reactor_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Per-request state owned by the completion router.
///
/// The boxed state's address travels through the packet `user_tag`; the
/// events buffer must stay put because the packet's data pointer aims at it.
struct RequestState {
    events: Box<[u8]>,
    tx: oneshot::Sender<(PacketStatus, Vec<u8>)>,
}

/// Completion handler for clients driven through the typed API: route the
/// reply to the request's oneshot channel and return the packet to the pool.
fn routed_completion() -> CompletionHandler {
    Box::new(|shared, completion| {
        // Safety: every user_tag on a typed-API client was produced by
        // Box::into_raw in submit_request, exactly once per completion.
        let state = unsafe { Box::from_raw(completion.user_tag as *mut RequestState) };
        let reply = completion.reply.map(<[u8]>::to_vec).unwrap_or_default();
        let _ = state.tx.send((completion.status, reply));
        shared.release(completion.packet);
    })
}

impl Client {
    /// Connect to a cluster.
    ///
    /// `addresses` is a comma- or space-separated replica list; see
    /// [`parse_addresses`](crate::parse_addresses) for the entry format.
    /// The reactor thread is spawned here and the registration handshake
    /// starts immediately; requests submitted before it completes are held
    /// back and flushed once the cluster acknowledges the client.
    ///
    /// # Errors
    ///
    /// See [`InitError`]. Any failure rewinds every resource acquired so far.
    pub fn new(cluster_id: u128, addresses: &str, config: ClientConfig) -> InitResult<Client> {
        let replicas = config::parse_addresses(addresses)?;
        Self::init(cluster_id, config, routed_completion(), move |client_id| {
            Box::new(TcpSession::new(cluster_id, client_id, replicas))
        })
    }

    /// Connect through a caller-supplied protocol session.
    ///
    /// This is how tests and simulations swap the TCP transport for a
    /// scripted one; see [`testing::SimSession`](crate::testing::SimSession).
    pub fn with_protocol_client(
        cluster_id: u128,
        config: ClientConfig,
        session: Box<dyn ProtocolClient>,
    ) -> InitResult<Client> {
        Self::init(cluster_id, config, routed_completion(), move |_| session)
    }

    pub(crate) fn init<F>(
        cluster_id: u128,
        config: ClientConfig,
        completion: CompletionHandler,
        make_session: F,
    ) -> InitResult<Client>
    where
        F: FnOnce(u128) -> Box<dyn ProtocolClient>,
    {
        config.validate()?;
        let client_id = random_client_id();
        let capacity = config.concurrency_max;
        let (reactor, signal) = Reactor::new();
        let session = make_session(client_id);

        let shared = Arc::new(Shared {
            cluster_id,
            client_id,
            config,
            pool: PacketPool::new(capacity),
            submissions: SubmissionQueue::new(),
            signal,
            shutdown: AtomicBool::new(false),
            metrics: ClientMetrics::default(),
            completion,
        });

        let core = Core::new(capacity, session, reactor);
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("tallygrid-reactor".into())
            .spawn(move || core.run(thread_shared))
            .map_err(|err| InitError::SystemResources(err.to_string()))?;

        info!(
            cluster = %format_args!("{cluster_id:x}"),
            client = %format_args!("{client_id:032x}"),
            concurrency_max = capacity,
            "client initialized"
        );
        Ok(Client { shared, reactor_thread: Mutex::new(Some(handle)) })
    }

    /// The random nonzero id this client registered with.
    pub fn id(&self) -> u128 {
        self.shared.client_id
    }

    /// Point-in-time multiplexer counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Shut the client down and wait for the reactor thread to drain.
    ///
    /// The first caller flips the shutdown flag and joins the reactor;
    /// concurrent and repeated calls are no-ops. Outstanding requests
    /// complete (or fail with [`PacketStatus::ClientShutdown`]) before this
    /// returns. Must not be called from inside a completion callback.
    pub fn close(&self) {
        if self.shared.initiate_shutdown() {
            debug!("client shutdown initiated");
            self.shared.signal.notify();
            let handle = self.reactor_thread.lock().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }

    /// Create one or more accounts.
    ///
    /// The reply is sparse: only unsuccessful events produce a
    /// [`CreateAccountsResult`], whose `index` points back into `events`.
    ///
    /// # Errors
    ///
    /// [`AcquireError`] synchronously when no packet is available; the
    /// future resolves to [`PacketStatus`] when the request itself fails.
    pub fn create_accounts(
        &self,
        events: &[Account],
    ) -> Result<impl Future<Output = Result<Vec<CreateAccountsResult>, PacketStatus>>, AcquireError>
    {
        let rx = self.submit_request(Operation::CreateAccounts, events)?;
        Ok(async move {
            let results: Vec<EventResult> = decode_reply(rx).await?;
            Ok(results
                .into_iter()
                .map(|raw| CreateAccountsResult {
                    index: raw.index as usize,
                    result: CreateAccountResult::from_code(raw.result),
                })
                .collect())
        })
    }

    /// Create one or more transfers.
    ///
    /// The reply is sparse: only unsuccessful events produce a
    /// [`CreateTransfersResult`], whose `index` points back into `events`.
    ///
    /// # Errors
    ///
    /// [`AcquireError`] synchronously when no packet is available; the
    /// future resolves to [`PacketStatus`] when the request itself fails.
    pub fn create_transfers(
        &self,
        events: &[Transfer],
    ) -> Result<impl Future<Output = Result<Vec<CreateTransfersResult>, PacketStatus>>, AcquireError>
    {
        let rx = self.submit_request(Operation::CreateTransfers, events)?;
        Ok(async move {
            let results: Vec<EventResult> = decode_reply(rx).await?;
            Ok(results
                .into_iter()
                .map(|raw| CreateTransfersResult {
                    index: raw.index as usize,
                    result: CreateTransferResult::from_code(raw.result),
                })
                .collect())
        })
    }

    /// Look up accounts by id. Returns one record per id, zeroed when the
    /// account does not exist.
    pub fn lookup_accounts(
        &self,
        ids: &[u128],
    ) -> Result<impl Future<Output = Result<Vec<Account>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::LookupAccounts, ids)?;
        Ok(decode_reply(rx))
    }

    /// Look up transfers by id. Returns one record per id, zeroed when the
    /// transfer does not exist.
    pub fn lookup_transfers(
        &self,
        ids: &[u128],
    ) -> Result<impl Future<Output = Result<Vec<Transfer>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::LookupTransfers, ids)?;
        Ok(decode_reply(rx))
    }

    /// Fetch transfers touching one account, filtered and bounded by `filter`.
    pub fn get_account_transfers(
        &self,
        filter: AccountFilter,
    ) -> Result<impl Future<Output = Result<Vec<Transfer>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::GetAccountTransfers, &[filter])?;
        Ok(decode_reply(rx))
    }

    /// Fetch historical balances of one account, filtered and bounded by
    /// `filter`. The account must carry the `HISTORY` flag.
    pub fn get_account_balances(
        &self,
        filter: AccountFilter,
    ) -> Result<impl Future<Output = Result<Vec<AccountBalance>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::GetAccountBalances, &[filter])?;
        Ok(decode_reply(rx))
    }

    /// Query accounts across the ledger by the filter's fields.
    pub fn query_accounts(
        &self,
        filter: QueryFilter,
    ) -> Result<impl Future<Output = Result<Vec<Account>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::QueryAccounts, &[filter])?;
        Ok(decode_reply(rx))
    }

    /// Query transfers across the ledger by the filter's fields.
    pub fn query_transfers(
        &self,
        filter: QueryFilter,
    ) -> Result<impl Future<Output = Result<Vec<Transfer>, PacketStatus>>, AcquireError> {
        let rx = self.submit_request(Operation::QueryTransfers, &[filter])?;
        Ok(decode_reply(rx))
    }

    /// Acquire a packet, box the request state, and queue the submission.
    fn submit_request<E: Copy>(
        &self,
        operation: Operation,
        events: &[E],
    ) -> Result<oneshot::Receiver<(PacketStatus, Vec<u8>)>, AcquireError> {
        let packet = self.shared.acquire()?;
        let (tx, rx) = oneshot::channel();
        let state = Box::new(RequestState {
            events: types::as_bytes(events).to_vec().into_boxed_slice(),
            tx,
        });
        let data = UserSlice::new(state.events.as_ptr(), state.events.len() as u32);
        let user_tag = Box::into_raw(state) as usize;
        self.shared.submit(Submission { packet, operation: operation.code(), data, user_tag });
        Ok(rx)
    }
}

async fn decode_reply<R: Copy>(
    rx: oneshot::Receiver<(PacketStatus, Vec<u8>)>,
) -> Result<Vec<R>, PacketStatus> {
    let (status, reply) = rx.await.map_err(|_| PacketStatus::ClientShutdown)?;
    if status != PacketStatus::Ok {
        return Err(status);
    }
    types::decode_records(&reply).ok_or(PacketStatus::InvalidDataSize)
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &format_args!("{:032x}", self.shared.client_id))
            .finish()
    }
}

fn random_client_id() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_nonzero_and_distinct() {
        let a = random_client_id();
        let b = random_client_id();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn init_rejects_bad_concurrency() {
        let config = ClientConfig { concurrency_max: 0, ..ClientConfig::default() };
        let result = Client::new(0, "3001", config);
        assert!(matches!(result, Err(InitError::ConcurrencyMaxInvalid { .. })));
    }

    #[test]
    fn init_rejects_bad_addresses() {
        let result = Client::new(0, "definitely not an address", ClientConfig::default());
        assert!(matches!(result, Err(InitError::AddressInvalid(_))));
    }
}
