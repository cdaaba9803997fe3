//! Stable C ABI.
//!
//! Clients and packets cross the boundary as opaque integer handles resolved
//! through a process-wide registry, so a stale handle can never dereference
//! freed memory and `tg_client_deinit` is safely idempotent. The completion
//! callback runs on the reactor thread; the reply pointer it receives is
//! valid only for the duration of the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::warn;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::context::CompletionHandler;
use crate::error::{AcquireError, InitError};
use crate::packet::{PacketId, Submission, UserSlice};
use crate::protocol::TcpSession;

/// Completion callback installed at init.
///
/// Arguments: the `completion_ctx` passed to `tg_client_init`, the client
/// handle, the packet handle, the packet's terminal status, the caller's
/// `user_tag` returned verbatim, and the reply slice (null/0 unless the
/// status is ok). The packet belongs to the application again once the
/// callback returns; release it with `tg_client_release_packet`.
pub type TgCompletionFn = extern "C" fn(
    completion_ctx: usize,
    client: u64,
    packet: u32,
    status: u8,
    user_tag: usize,
    reply_ptr: *const u8,
    reply_len: u32,
);

/// Status codes returned by `tg_client_init`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TgInitStatus {
    Success = 0,
    Unexpected = 1,
    OutOfMemory = 2,
    AddressInvalid = 3,
    AddressLimitExceeded = 4,
    SystemResources = 5,
    ConcurrencyMaxInvalid = 6,
}

/// Status codes returned by `tg_client_acquire_packet`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TgAcquireStatus {
    Ok = 0,
    ConcurrencyMaxExceeded = 1,
    Shutdown = 2,
}

impl From<InitError> for TgInitStatus {
    fn from(err: InitError) -> Self {
        match err {
            InitError::ConcurrencyMaxInvalid { .. } => Self::ConcurrencyMaxInvalid,
            InitError::AddressInvalid(_) => Self::AddressInvalid,
            InitError::AddressLimitExceeded { .. } => Self::AddressLimitExceeded,
            InitError::SystemResources(_) => Self::SystemResources,
            InitError::OutOfMemory => Self::OutOfMemory,
            InitError::Unexpected(_) => Self::Unexpected,
        }
    }
}

fn registry() -> &'static RwLock<HashMap<u64, Arc<Client>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u64, Arc<Client>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn lookup(client: u64) -> Option<Arc<Client>> {
    registry().read().get(&client).cloned()
}

/// Initialize a client and store its handle in `out_client`.
///
/// `cluster_id` points at 16 little-endian bytes. `addresses` is a UTF-8
/// replica list of `addresses_len` bytes, not null-terminated.
///
/// # Safety
///
/// `out_client`, `cluster_id`, and `addresses` must be valid for the
/// lengths implied above for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn tg_client_init(
    out_client: *mut u64,
    cluster_id: *const u8,
    addresses: *const u8,
    addresses_len: u32,
    concurrency_max: u32,
    completion_ctx: usize,
    on_completion: TgCompletionFn,
) -> TgInitStatus {
    if out_client.is_null() || cluster_id.is_null() || addresses.is_null() {
        return TgInitStatus::Unexpected;
    }
    let mut cluster_bytes = [0u8; 16];
    cluster_bytes.copy_from_slice(std::slice::from_raw_parts(cluster_id, 16));
    let cluster_id = u128::from_le_bytes(cluster_bytes);

    let addresses = std::slice::from_raw_parts(addresses, addresses_len as usize);
    let Ok(addresses) = std::str::from_utf8(addresses) else {
        return TgInitStatus::AddressInvalid;
    };
    let replicas = match crate::config::parse_addresses(addresses) {
        Ok(replicas) => replicas,
        Err(err) => return TgInitStatus::from(err),
    };

    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let completion: CompletionHandler = Box::new(move |_shared, c| {
        let (reply_ptr, reply_len) = match c.reply {
            Some(reply) => (reply.as_ptr(), reply.len() as u32),
            None => (std::ptr::null(), 0),
        };
        on_completion(
            completion_ctx,
            handle,
            c.packet.raw(),
            c.status.code(),
            c.user_tag,
            reply_ptr,
            reply_len,
        );
    });

    let config = ClientConfig { concurrency_max, ..ClientConfig::default() };
    let client = match Client::init(cluster_id, config, completion, move |client_id| {
        Box::new(TcpSession::new(cluster_id, client_id, replicas))
    }) {
        Ok(client) => client,
        Err(err) => return TgInitStatus::from(err),
    };

    registry().write().insert(handle, Arc::new(client));
    out_client.write(handle);
    TgInitStatus::Success
}

/// Acquire a packet from the client's pool.
///
/// # Safety
///
/// `out_packet` must be valid for writes for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn tg_client_acquire_packet(
    client: u64,
    out_packet: *mut u32,
) -> TgAcquireStatus {
    if out_packet.is_null() {
        return TgAcquireStatus::Shutdown;
    }
    let Some(client) = lookup(client) else {
        return TgAcquireStatus::Shutdown;
    };
    match client.shared.acquire() {
        Ok(id) => {
            out_packet.write(id.raw());
            TgAcquireStatus::Ok
        }
        Err(AcquireError::ConcurrencyMaxExceeded) => TgAcquireStatus::ConcurrencyMaxExceeded,
        Err(AcquireError::Shutdown) => TgAcquireStatus::Shutdown,
    }
}

/// Return an acquired packet to the pool without submitting it.
#[no_mangle]
pub extern "C" fn tg_client_release_packet(client: u64, packet: u32) {
    let Some(client) = lookup(client) else { return };
    if packet >= client.shared.pool.capacity() {
        warn!(packet, "ignoring release of an out-of-range packet handle");
        return;
    }
    client.shared.release(PacketId::new(packet));
}

/// Submit an acquired packet.
///
/// The completion callback fires exactly once for every submitted packet,
/// on the reactor thread, with `user_tag` returned verbatim.
///
/// # Safety
///
/// `data` must point at `data_size` readable bytes that stay valid and
/// unmodified until the packet's completion callback returns.
#[no_mangle]
pub unsafe extern "C" fn tg_client_submit(
    client: u64,
    packet: u32,
    operation: u8,
    data: *const u8,
    data_size: u32,
    user_tag: usize,
) {
    let Some(client) = lookup(client) else { return };
    if packet >= client.shared.pool.capacity() {
        warn!(packet, "ignoring submit of an out-of-range packet handle");
        return;
    }
    client.shared.submit(Submission {
        packet: PacketId::new(packet),
        operation,
        data: UserSlice::new(data, data_size),
        user_tag,
    });
}

/// Shut the client down, wait for outstanding packets, and free it.
///
/// The first call tears the client down; later calls, and calls with an
/// unknown handle, are no-ops.
#[no_mangle]
pub extern "C" fn tg_client_deinit(client: u64) {
    let removed = registry().write().remove(&client);
    if let Some(client) = removed {
        // Join outside the registry lock so other clients stay usable.
        client.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacketStatus;
    use parking_lot::Mutex;

    type Record = (u64, u32, u8, usize, u32);

    fn recorded() -> &'static Mutex<Vec<Record>> {
        static RECORDED: OnceLock<Mutex<Vec<Record>>> = OnceLock::new();
        RECORDED.get_or_init(|| Mutex::new(Vec::new()))
    }

    extern "C" fn record_and_release(
        _ctx: usize,
        client: u64,
        packet: u32,
        status: u8,
        user_tag: usize,
        _reply_ptr: *const u8,
        reply_len: u32,
    ) {
        recorded().lock().push((client, packet, status, user_tag, reply_len));
        tg_client_release_packet(client, packet);
    }

    fn init_client(concurrency_max: u32) -> u64 {
        let mut handle = 0u64;
        let cluster = 0u128.to_le_bytes();
        // Reserved port: connects fail fast, so only the shutdown path runs.
        let addresses = b"127.0.0.1:0";
        let status = unsafe {
            tg_client_init(
                &mut handle,
                cluster.as_ptr(),
                addresses.as_ptr(),
                addresses.len() as u32,
                concurrency_max,
                0xC0FFEE,
                record_and_release,
            )
        };
        assert_eq!(status, TgInitStatus::Success);
        handle
    }

    #[test]
    fn init_validates_inputs() {
        let cluster = 0u128.to_le_bytes();
        let bad = b"not an address";
        let mut handle = 0u64;
        let status = unsafe {
            tg_client_init(
                &mut handle,
                cluster.as_ptr(),
                bad.as_ptr(),
                bad.len() as u32,
                32,
                0,
                record_and_release,
            )
        };
        assert_eq!(status, TgInitStatus::AddressInvalid);

        let addresses = b"3001";
        let status = unsafe {
            tg_client_init(
                &mut handle,
                cluster.as_ptr(),
                addresses.as_ptr(),
                addresses.len() as u32,
                0,
                0,
                record_and_release,
            )
        };
        assert_eq!(status, TgInitStatus::ConcurrencyMaxInvalid);
    }

    #[test]
    fn shutdown_completes_submitted_packets_through_the_callback() {
        let handle = init_client(2);

        let mut packet = u32::MAX;
        assert_eq!(
            unsafe { tg_client_acquire_packet(handle, &mut packet) },
            TgAcquireStatus::Ok
        );
        let data = [0u8; 16];
        unsafe { tg_client_submit(handle, packet, 3, data.as_ptr(), 16, 0xAB) };

        tg_client_deinit(handle);

        let records: Vec<Record> =
            recorded().lock().iter().copied().filter(|r| r.0 == handle).collect();
        assert_eq!(records.len(), 1);
        let (_, completed_packet, status, user_tag, reply_len) = records[0];
        assert_eq!(completed_packet, packet);
        assert_eq!(status, PacketStatus::ClientShutdown.code());
        assert_eq!(user_tag, 0xAB);
        assert_eq!(reply_len, 0);

        // Stale handles are inert.
        assert_eq!(
            unsafe { tg_client_acquire_packet(handle, &mut packet) },
            TgAcquireStatus::Shutdown
        );
        tg_client_deinit(handle);
    }

    #[test]
    fn pool_exhaustion_and_handles_are_reported() {
        let handle = init_client(1);
        let mut first = u32::MAX;
        let mut second = u32::MAX;
        assert_eq!(unsafe { tg_client_acquire_packet(handle, &mut first) }, TgAcquireStatus::Ok);
        assert_eq!(
            unsafe { tg_client_acquire_packet(handle, &mut second) },
            TgAcquireStatus::ConcurrencyMaxExceeded
        );
        tg_client_release_packet(handle, first);
        assert_eq!(unsafe { tg_client_acquire_packet(handle, &mut second) }, TgAcquireStatus::Ok);
        tg_client_release_packet(handle, second);
        tg_client_deinit(handle);
    }
}
