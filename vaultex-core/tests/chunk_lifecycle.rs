//! Full watch-list lifecycles: prepare, commit, refund routing, removal
//! with reserve promotion, abandonment, and the tamper failsafe.

mod support;

use support::{chunk_named, client, reference_holder, started_handler};
use vaultex_core::chunk_info::ResetReason;
use vaultex_core::error::VaultError;
use vaultex_model::{MAX_RESERVE_WATCH_LIST_ENTRIES, MIN_CHUNK_COPIES, WATCH_LIST_CAPACITY};

/// Everyone who can possibly hold a slot, plus one overflow watcher.
const NUM_CLIENTS: usize = WATCH_LIST_CAPACITY + 1;

#[test]
fn single_watcher_full_lifecycle() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");
    let a = client(0);

    let prereqs = handler.prepare_add_to_watch_list(&chunk, &a, 123).unwrap();
    assert_eq!(prereqs.required_references, 2);
    assert_eq!(prereqs.required_payments, MIN_CHUNK_COPIES as i32);

    for i in 0..2 {
        handler
            .add_to_reference_list(&chunk, &reference_holder(i), 123)
            .unwrap();
    }
    handler.set_storing_done(&chunk, &a);
    handler.set_payments_done(&chunk, &a);

    let outcome = handler.try_commit_to_watch_list(&chunk, &a).unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.creditor, None);
    assert_eq!(outcome.refunds, 0);

    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);
    assert_eq!(info.watcher_count, 1);

    let removal = handler.remove_from_watch_list(&chunk, &a).unwrap();
    assert_eq!(removal.chunk_size, 123);
    assert_eq!(removal.creditors, vec![a; MIN_CHUNK_COPIES]);
    assert_eq!(
        removal.references,
        vec![reference_holder(0), reference_holder(1)]
    );
    assert!(!handler.has_watchers(&chunk));
    assert_eq!(
        handler.get_active_references(&chunk),
        Err(VaultError::InvalidName)
    );
}

#[test]
fn second_watcher_pays_back_the_first() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");
    let (a, b) = (client(0), client(1));

    handler.prepare_add_to_watch_list(&chunk, &a, 123).unwrap();
    handler.set_storing_done(&chunk, &a);
    handler.set_payments_done(&chunk, &a);
    assert!(handler.try_commit_to_watch_list(&chunk, &a).unwrap().committed);
    handler
        .add_to_reference_list(&chunk, &reference_holder(0), 123)
        .unwrap();
    handler
        .add_to_reference_list(&chunk, &reference_holder(1), 123)
        .unwrap();

    let prereqs = handler.prepare_add_to_watch_list(&chunk, &b, 123).unwrap();
    assert_eq!(prereqs.required_references, 1);
    assert_eq!(prereqs.required_payments, 1);

    handler.set_storing_done(&chunk, &b);
    handler.set_payments_done(&chunk, &b);
    let outcome = handler.try_commit_to_watch_list(&chunk, &b).unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.creditor, Some(a));
    assert_eq!(outcome.refunds, 0);

    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watcher_count, 2);
    assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);
    assert_eq!(info.occupied_slots(), 2);
}

#[test]
fn two_simultaneous_first_payers_settle_by_refund() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");
    let (a, b) = (client(0), client(1));

    // Both prepare against an empty watch list, so both are quoted the full
    // price.
    for p in [&a, &b] {
        let prereqs = handler.prepare_add_to_watch_list(&chunk, p, 123).unwrap();
        assert_eq!(prereqs.required_payments, MIN_CHUNK_COPIES as i32);
        handler.set_storing_done(&chunk, p);
        handler.set_payments_done(&chunk, p);
    }

    let first = handler.try_commit_to_watch_list(&chunk, &a).unwrap();
    assert_eq!(first.refunds, 0);
    let second = handler.try_commit_to_watch_list(&chunk, &b).unwrap();
    assert_eq!(second.creditor, Some(a));
    assert_eq!(second.refunds, MIN_CHUNK_COPIES as i32 - 1);

    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);
    assert_eq!(info.watcher_count, 2);
    assert!(info.waiting_list.is_empty());
}

#[test]
fn watch_list_fills_then_takes_overflow_watchers() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");

    for i in 0..NUM_CLIENTS {
        let p = client(i);
        let prereqs = handler.prepare_add_to_watch_list(&chunk, &p, 123).unwrap();
        if i == 0 {
            assert_eq!(prereqs.required_payments, MIN_CHUNK_COPIES as i32);
        } else if i < WATCH_LIST_CAPACITY {
            assert_eq!(prereqs.required_payments, 1);
        } else {
            // Full house already visible at prepare time: free to watch.
            assert_eq!(prereqs.required_payments, 0);
        }
        handler.set_storing_done(&chunk, &p);
        handler.set_payments_done(&chunk, &p);
        let outcome = handler.try_commit_to_watch_list(&chunk, &p).unwrap();
        assert!(outcome.committed);

        if i == 0 {
            assert_eq!(outcome.creditor, None);
        } else if i < MIN_CHUNK_COPIES {
            // Replaces one of the first payer's placeholder slots.
            assert_eq!(outcome.creditor, Some(client(0)));
            assert_eq!(outcome.refunds, 0);
        } else {
            // Grows the reserve, or joins slotless once the list is full.
            assert_eq!(outcome.creditor, None);
            assert_eq!(outcome.refunds, 0);
        }
    }

    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), WATCH_LIST_CAPACITY);
    assert_eq!(info.watcher_count, NUM_CLIENTS as u64);
    assert!(info.waiting_list.is_empty());
}

#[test]
fn commit_into_a_list_that_filled_meanwhile_refunds_the_unit() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");

    for i in 0..WATCH_LIST_CAPACITY - 1 {
        let p = client(i);
        handler.prepare_add_to_watch_list(&chunk, &p, 123).unwrap();
        handler.set_storing_done(&chunk, &p);
        handler.set_payments_done(&chunk, &p);
        assert!(handler.try_commit_to_watch_list(&chunk, &p).unwrap().committed);
    }

    // Both stragglers are quoted one unit against the same free slot.
    let (x, y) = (client(WATCH_LIST_CAPACITY - 1), client(WATCH_LIST_CAPACITY));
    for p in [&x, &y] {
        let prereqs = handler.prepare_add_to_watch_list(&chunk, p, 123).unwrap();
        assert_eq!(prereqs.required_payments, 1);
        handler.set_storing_done(&chunk, p);
        handler.set_payments_done(&chunk, p);
    }

    let first = handler.try_commit_to_watch_list(&chunk, &x).unwrap();
    assert_eq!(first.refunds, 0);
    // The slot went to the first committer; the second still becomes a
    // watcher but gets its unit back.
    let second = handler.try_commit_to_watch_list(&chunk, &y).unwrap();
    assert!(second.committed);
    assert_eq!(second.creditor, None);
    assert_eq!(second.refunds, 1);

    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), WATCH_LIST_CAPACITY);
    assert_eq!(info.watcher_count, (WATCH_LIST_CAPACITY + 1) as u64);
}

#[test]
fn removal_promotes_reserves_then_unwinds_to_nothing() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");

    for i in 0..NUM_CLIENTS {
        let p = client(i);
        handler.prepare_add_to_watch_list(&chunk, &p, 123).unwrap();
        handler.set_storing_done(&chunk, &p);
        handler.set_payments_done(&chunk, &p);
        assert!(handler.try_commit_to_watch_list(&chunk, &p).unwrap().committed);
    }
    handler
        .add_to_reference_list(&chunk, &reference_holder(0), 123)
        .unwrap();
    handler
        .add_to_reference_list(&chunk, &reference_holder(1), 123)
        .unwrap();

    // A mandatory-slot watcher leaves; the first reserve moves up and the
    // leaver is refunded.
    let removal = handler.remove_from_watch_list(&chunk, &client(0)).unwrap();
    assert_eq!(removal.creditors, vec![client(0)]);
    assert!(removal.references.is_empty());
    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), WATCH_LIST_CAPACITY - 1);
    assert_eq!(info.watcher_count, (NUM_CLIENTS - 1) as u64);

    // The overflow watcher never held a slot; its removal touches only the
    // counters.
    let removal = handler
        .remove_from_watch_list(&chunk, &client(NUM_CLIENTS - 1))
        .unwrap();
    assert!(removal.creditors.is_empty());
    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watch_list.len(), WATCH_LIST_CAPACITY - 1);
    assert_eq!(info.watcher_count, (NUM_CLIENTS - 2) as u64);

    // Drain the reserve: each leaver is refunded and the list shrinks.
    for i in (MIN_CHUNK_COPIES + 1..NUM_CLIENTS - 1).rev() {
        let removal = handler.remove_from_watch_list(&chunk, &client(i)).unwrap();
        assert_eq!(removal.creditors, vec![client(i)]);
        assert!(removal.references.is_empty());
        let info = handler.get_chunk_info(&chunk).unwrap();
        assert_eq!(info.watch_list.len(), i - 1);
        assert_eq!(info.watcher_count, info.occupied_slots() as u64);
    }

    // Mandatory slots flip to deletable placeholders, no refunds yet.
    for i in (2..=MIN_CHUNK_COPIES).rev() {
        let removal = handler.remove_from_watch_list(&chunk, &client(i)).unwrap();
        assert!(removal.creditors.is_empty());
        let info = handler.get_chunk_info(&chunk).unwrap();
        assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);
        assert_eq!(info.watcher_count, (i - 1) as u64);
    }

    // Reference list shrinks but refuses to lose its last entry while the
    // chunk is still watched.
    assert_eq!(
        handler.remove_from_reference_list(&chunk_named("fail"), &reference_holder(1)),
        Err(VaultError::InvalidName)
    );
    assert_eq!(
        handler.remove_from_reference_list(&chunk, &client(7)),
        Err(VaultError::CannotDelete)
    );
    assert_eq!(
        handler.remove_from_reference_list(&chunk, &reference_holder(1)),
        Ok(123)
    );
    assert_eq!(
        handler.remove_from_reference_list(&chunk, &reference_holder(0)),
        Err(VaultError::CannotDelete)
    );
    assert_eq!(
        handler.get_active_references(&chunk).unwrap(),
        vec![reference_holder(0)]
    );

    // The last watcher leaves: every remaining slot is refunded and the
    // remaining replica is released.
    let removal = handler.remove_from_watch_list(&chunk, &client(1)).unwrap();
    assert_eq!(removal.chunk_size, 123);
    assert_eq!(removal.creditors.len(), MIN_CHUNK_COPIES);
    assert!(removal.creditors.contains(&client(1)));
    assert_eq!(removal.references, vec![reference_holder(0)]);
    assert!(!handler.has_watchers(&chunk));
}

#[test]
fn reserve_of_reserves_is_bounded() {
    // The reserve constant is not pinned by the protocol, but the capacity
    // relation is.
    assert_eq!(
        WATCH_LIST_CAPACITY,
        MIN_CHUNK_COPIES + MAX_RESERVE_WATCH_LIST_ENTRIES
    );
}

#[test]
fn abandoning_the_last_pending_watcher_implodes_the_chunk() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");

    for i in 0..3 {
        handler
            .prepare_add_to_watch_list(&chunk, &client(i), 123)
            .unwrap();
    }
    handler
        .add_to_reference_list(&chunk, &reference_holder(0), 123)
        .unwrap();
    assert!(handler.has_watchers(&chunk));

    // Unknown pmid: nothing matches, nothing changes.
    let (creditors, references) = handler
        .reset_add_to_watch_list(&chunk_named("fail"), &client(0), ResetReason::PaymentFailed)
        .unwrap();
    assert!(creditors.is_empty() && references.is_empty());

    // Payments already done, so a payment-failed reset matches nothing.
    handler.set_payments_done(&chunk, &client(0));
    let (creditors, _) = handler
        .reset_add_to_watch_list(&chunk, &client(0), ResetReason::PaymentFailed)
        .unwrap();
    assert!(creditors.is_empty());
    assert_eq!(handler.get_chunk_info(&chunk).unwrap().waiting_list.len(), 3);

    let (creditors, _) = handler
        .reset_add_to_watch_list(&chunk, &client(0), ResetReason::StoringFailed)
        .unwrap();
    assert!(creditors.is_empty());
    assert_eq!(handler.get_chunk_info(&chunk).unwrap().waiting_list.len(), 2);

    handler.set_storing_done(&chunk, &client(1));
    let (creditors, _) = handler
        .reset_add_to_watch_list(&chunk, &client(1), ResetReason::StoringFailed)
        .unwrap();
    assert!(creditors.is_empty());
    assert_eq!(handler.get_chunk_info(&chunk).unwrap().waiting_list.len(), 2);

    let (creditors, _) = handler
        .reset_add_to_watch_list(&chunk, &client(1), ResetReason::PaymentFailed)
        .unwrap();
    assert!(creditors.is_empty());
    assert_eq!(handler.get_chunk_info(&chunk).unwrap().waiting_list.len(), 1);

    // Last pending watcher gives up: no committed slots to refund, but the
    // replica holder is released and the record destroyed.
    let (creditors, references) = handler
        .reset_add_to_watch_list(&chunk, &client(2), ResetReason::PaymentFailed)
        .unwrap();
    assert!(creditors.is_empty());
    assert_eq!(references, vec![reference_holder(0)]);
    assert!(!handler.has_watchers(&chunk));
    assert_eq!(handler.get_chunk_info(&chunk), Err(VaultError::InvalidName));
}

#[test]
fn removing_an_unlisted_watcher_is_a_conservative_no_op() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");
    let (listed, intruder) = (client(1), client(2));

    handler.prepare_add_to_watch_list(&chunk, &listed, 123).unwrap();
    handler.set_storing_done(&chunk, &listed);
    handler.set_payments_done(&chunk, &listed);
    assert!(handler.try_commit_to_watch_list(&chunk, &listed).unwrap().committed);

    let removal = handler.remove_from_watch_list(&chunk, &intruder).unwrap();
    assert_eq!(removal.chunk_size, 123);
    assert!(removal.creditors.is_empty());
    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watcher_count, 1);
    assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);

    // The checksum now carries the intruder's negative contribution, so
    // even after the real watcher leaves the record is kept as tampered
    // evidence rather than imploding with refunds.
    let removal = handler.remove_from_watch_list(&chunk, &listed).unwrap();
    assert!(removal.creditors.is_empty());
    assert!(removal.references.is_empty());
    let info = handler.get_chunk_info(&chunk).unwrap();
    assert_eq!(info.watcher_count, 0);
    assert_eq!(info.watch_list.len(), MIN_CHUNK_COPIES);
    assert!(handler.has_watchers(&chunk));
}

#[test]
fn full_lifecycle_refunds_exactly_the_mandatory_copies() {
    let (_, handler) = started_handler();
    let chunk = chunk_named("chunk");
    let a = client(0);

    let prereqs = handler.prepare_add_to_watch_list(&chunk, &a, 42).unwrap();
    let paid = prereqs.required_payments;
    handler.set_storing_done(&chunk, &a);
    handler.set_payments_done(&chunk, &a);
    let commit = handler.try_commit_to_watch_list(&chunk, &a).unwrap();
    let removal = handler.remove_from_watch_list(&chunk, &a).unwrap();

    let refunded = commit.refunds as usize + removal.creditors.len();
    assert_eq!(paid, MIN_CHUNK_COPIES as i32);
    assert_eq!(refunded, MIN_CHUNK_COPIES);
}
