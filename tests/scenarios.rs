//! End-to-end scenarios through the public API, against a scripted session.

use std::time::{Duration, Instant};

use futures::executor::block_on;
use tallygrid_client::testing::{SimController, SimSession};
use tallygrid_client::{
    id, Account, AccountFilter, AcquireError, Client, ClientConfig, PacketStatus,
};

fn client(concurrency_max: u32) -> (Client, SimController) {
    let (session, controller) = SimSession::new();
    let config = ClientConfig { concurrency_max, tick_interval: Duration::from_millis(1) };
    let client = Client::with_protocol_client(0, config, Box::new(session)).unwrap();
    (client, controller)
}

#[track_caller]
fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within deadline");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn account() -> Account {
    Account { id: id(), ledger: 1, code: 1, ..Default::default() }
}

#[test]
fn singleton_create_round_trip() {
    let (client, controller) = client(4);
    let accounts = [account(), account()];

    let pending = client.create_accounts(&accounts).unwrap();
    wait_until(|| controller.inflight().is_some());

    let request = controller.inflight().unwrap();
    assert_eq!(request.operation, 1);
    assert_eq!(request.body.len(), 256);
    assert_eq!(request.client_id, client.id());

    // Empty sparse reply: every event succeeded.
    assert!(controller.complete(&[]));
    let results = block_on(pending).unwrap();
    assert!(results.is_empty());

    let metrics = client.metrics();
    assert_eq!(metrics.batches_dispatched, 1);
    assert_eq!(metrics.merged, 0);
    assert_eq!(metrics.completed, 1);
    client.close();
}

#[test]
fn packets_behind_an_inflight_request_merge_and_partition() {
    let (client, controller) = client(8);

    // First request occupies the wire.
    let first = client.lookup_accounts(&[1]).unwrap();
    wait_until(|| controller.inflight().is_some());

    // Two more lookups arrive while the wire is busy; they coalesce into one
    // pending batch rather than joining the inflight chain.
    let second = client.lookup_accounts(&[2, 3]).unwrap();
    let third = client.lookup_accounts(&[4]).unwrap();
    wait_until(|| client.metrics().merged == 1);
    assert_eq!(controller.request_count(), 1);
    assert_eq!(client.metrics().pending_roots, 1);

    // Complete the first; the merged batch goes out as one request.
    assert!(controller.complete(&[0u8; 128]));
    wait_until(|| controller.request_count() == 2);
    let batched = controller.inflight().unwrap();
    assert_eq!(batched.body.len(), 48, "three 16-byte events coalesced");

    // Reply carries one record per event; each future sees only its slice.
    let mut reply = vec![0u8; 3 * 128];
    for (n, chunk) in reply.chunks_exact_mut(128).enumerate() {
        chunk[0] = n as u8 + 1;
    }
    assert!(controller.complete(&reply));

    assert_eq!(block_on(first).unwrap().len(), 1);
    let second = block_on(second).unwrap();
    let third = block_on(third).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(third.len(), 1);
    assert_eq!(second[0].id & 0xFF, 1);
    assert_eq!(second[1].id & 0xFF, 2);
    assert_eq!(third[0].id & 0xFF, 3);
    client.close();
}

#[test]
fn non_batchable_filters_never_merge() {
    let (client, controller) = client(4);

    let first = client.get_account_transfers(AccountFilter {
        account_id: 7,
        limit: 10,
        ..Default::default()
    });
    let first = first.unwrap();
    wait_until(|| controller.inflight().is_some());

    let second = client
        .get_account_transfers(AccountFilter { account_id: 8, limit: 10, ..Default::default() })
        .unwrap();
    wait_until(|| client.metrics().pending_roots == 1);
    assert_eq!(client.metrics().merged, 0);

    // Each filter gets the whole of its own reply.
    assert!(controller.complete(&[0u8; 256]));
    assert_eq!(block_on(first).unwrap().len(), 2);
    wait_until(|| controller.request_count() == 2);
    assert!(controller.complete(&[0u8; 128]));
    assert_eq!(block_on(second).unwrap().len(), 1);
    client.close();
}

#[test]
fn oversized_and_empty_requests_fail_without_touching_the_wire() {
    let (client, controller) = client(4);

    // 8193 accounts exceed the 1 MiB body cap.
    let oversized = vec![Account::default(); 8193];
    let pending = client.create_accounts(&oversized).unwrap();
    assert_eq!(block_on(pending), Err(PacketStatus::TooMuchData));

    let pending = client.lookup_accounts(&[]).unwrap();
    assert_eq!(block_on(pending), Err(PacketStatus::InvalidDataSize));

    assert_eq!(controller.request_count(), 0);
    let metrics = client.metrics();
    assert_eq!(metrics.validation_failures, 2);
    assert_eq!(metrics.batches_dispatched, 0);
    client.close();
}

#[test]
fn registration_gates_the_first_dispatch() {
    let (session, controller) = SimSession::with_manual_registration();
    let config = ClientConfig { concurrency_max: 4, tick_interval: Duration::from_millis(1) };
    let client = Client::with_protocol_client(0, config, Box::new(session)).unwrap();

    let pending = client.lookup_accounts(&[1]).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(controller.request_count(), 0, "no dispatch before registration");

    controller.deliver_registration();
    wait_until(|| controller.request_count() == 1);
    assert!(controller.complete(&[0u8; 128]));
    assert_eq!(block_on(pending).unwrap().len(), 1);
    client.close();
}

#[test]
fn pool_pressure_is_reported_synchronously() {
    let (client, controller) = client(1);

    let first = client.lookup_accounts(&[1]).unwrap();
    assert_eq!(
        client.lookup_accounts(&[2]).err(),
        Some(AcquireError::ConcurrencyMaxExceeded)
    );

    wait_until(|| controller.inflight().is_some());
    assert!(controller.complete(&[0u8; 128]));
    block_on(first).unwrap();

    // Completion returned the packet; capacity is available again.
    let deadline = Instant::now() + Duration::from_secs(5);
    let third = loop {
        match client.lookup_accounts(&[3]) {
            Ok(pending) => break pending,
            Err(AcquireError::ConcurrencyMaxExceeded) => {
                assert!(Instant::now() < deadline, "packet never returned to the pool");
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => panic!("unexpected acquire error: {err}"),
        }
    };
    wait_until(|| controller.inflight().is_some());
    assert!(controller.complete(&[0u8; 128]));
    block_on(third).unwrap();
    client.close();
}

#[test]
fn eviction_fails_the_inflight_batch_but_not_pending_work() {
    let (client, controller) = client(4);

    let first = client.lookup_accounts(&[1]).unwrap();
    wait_until(|| controller.inflight().is_some());
    let second = client.lookup_accounts(&[2]).unwrap();
    wait_until(|| client.metrics().pending_roots == 1);

    assert!(controller.fail(PacketStatus::ClientEvicted));
    assert_eq!(block_on(first), Err(PacketStatus::ClientEvicted));

    // The pending root takes the freed inflight slot and still completes.
    wait_until(|| controller.request_count() == 2);
    assert!(controller.complete(&[0u8; 128]));
    assert_eq!(block_on(second).unwrap().len(), 1);

    let metrics = client.metrics();
    assert_eq!(metrics.completed, 2);
    assert_eq!(metrics.pending_roots, 0);
    client.close();
}

#[test]
fn shutdown_completes_everything_and_unblocks_close() {
    let (client, controller) = client(4);

    let inflight = client.lookup_accounts(&[1]).unwrap();
    wait_until(|| controller.inflight().is_some());
    let queued = client.lookup_accounts(&[2]).unwrap();
    wait_until(|| client.metrics().pending_roots == 1);

    let closer = {
        let client: &'static Client = Box::leak(Box::new(client));
        std::thread::spawn(move || {
            client.close();
            client
        })
    };

    // The pending root is cancelled promptly; close still waits on the
    // inflight request.
    assert_eq!(block_on(queued), Err(PacketStatus::ClientShutdown));
    assert!(!closer.is_finished());

    // The reply that arrives during shutdown still completes its packet.
    assert!(controller.complete(&[0u8; 128]));
    assert_eq!(block_on(inflight).unwrap().len(), 1);

    let client = closer.join().unwrap();
    assert_eq!(client.lookup_accounts(&[3]).err(), Some(AcquireError::Shutdown));
    // Idempotent: a second close is a no-op.
    client.close();
}
