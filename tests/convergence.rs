//! End-to-end convergence scenarios (spec §8 S1-S6) and the randomized
//! permutation-independence property (P3), exercised through the public
//! `Replica` API rather than any single component in isolation.

use liveshare::{Operation, Replica, SiteId};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Builds a finite multiset of operations by driving a scratch replica
/// through a random sequence of inserts/deletes, recording every
/// operation it emits along the way.
fn random_operation_multiset(edits: &[(bool, usize, char)]) -> Vec<Operation> {
    let mut scratch = Replica::new(SiteId::from_raw(0));
    let mut ops = Vec::new();

    for &(is_insert, raw_index, value) in edits {
        if is_insert || scratch.is_empty() {
            let index = raw_index.min(scratch.len());
            ops.push(scratch.local_insert(index, value).unwrap());
        } else {
            let index = raw_index % scratch.len();
            if let Some(op) = scratch.local_delete(index) {
                ops.push(op);
            }
        }
    }

    ops
}

fn apply_all(site: u128, ops: &[Operation]) -> Replica {
    let mut r = Replica::new(SiteId::from_raw(site));
    for op in ops {
        r.apply_remote(op.clone()).unwrap();
    }
    r
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// P3: applying the same multiset of operations in any two orders
    /// converges on the same live sequence and tombstone set.
    #[test]
    fn convergence_is_independent_of_delivery_order(
        edits in prop::collection::vec((any::<bool>(), 0usize..64, prop::char::range('a', 'z')), 1..200),
        seed_a in any::<u64>(),
        seed_b in any::<u64>(),
    ) {
        let ops = random_operation_multiset(&edits);

        let mut order_a = ops.clone();
        let mut order_b = ops;
        order_a.shuffle(&mut StdRng::seed_from_u64(seed_a));
        order_b.shuffle(&mut StdRng::seed_from_u64(seed_b));

        let r1 = apply_all(1, &order_a);
        let r2 = apply_all(2, &order_b);

        let snap1 = r1.snapshot();
        let snap2 = r2.snapshot();

        prop_assert_eq!(snap1.live, snap2.live);

        let mut tomb1 = snap1.tombstones;
        let mut tomb2 = snap2.tombstones;
        tomb1.sort();
        tomb2.sort();
        prop_assert_eq!(tomb1, tomb2);
    }
}

/// S1: two empty replicas insert concurrently at the same index; after
/// full exchange both converge on the same two-character text, and the
/// winning order is deterministic under the §4.2 tie-break.
#[test]
fn s1_concurrent_inserts_at_same_index_converge() {
    let mut r1 = Replica::new(SiteId::from_raw(1));
    let mut r2 = Replica::new(SiteId::from_raw(2));

    let op_a = r1.local_insert(0, 'A').unwrap();
    let op_b = r2.local_insert(0, 'B').unwrap();

    r1.apply_remote(op_b).unwrap();
    r2.apply_remote(op_a).unwrap();

    assert_eq!(r1.text(), r2.text());
    assert_eq!(r1.text().chars().count(), 2);

    // Re-running the same exchange produces the same winning order:
    // the tie-break is a pure function of the operations, not of
    // delivery timing.
    let mut r1b = Replica::new(SiteId::from_raw(1));
    let mut r2b = Replica::new(SiteId::from_raw(2));
    let op_a2 = r1b.local_insert(0, 'A').unwrap();
    let op_b2 = r2b.local_insert(0, 'B').unwrap();
    r1b.apply_remote(op_b2).unwrap();
    r2b.apply_remote(op_a2).unwrap();
    assert_eq!(r1.text(), r1b.text());
}

/// S2: sequential inserts on R1, exchanged, then an append on R2
/// exchanged back — both replicas converge on "Hi!".
#[test]
fn s2_sequential_inserts_interleaved_with_exchange() {
    let mut r1 = Replica::new(SiteId::from_raw(1));
    let mut r2 = Replica::new(SiteId::from_raw(2));

    let op_h = r1.local_insert(0, 'H').unwrap();
    let op_i = r1.local_insert(1, 'i').unwrap();
    r2.apply_remote(op_h).unwrap();
    r2.apply_remote(op_i).unwrap();

    let op_bang = r2.local_insert(2, '!').unwrap();
    r1.apply_remote(op_bang).unwrap();

    assert_eq!(r1.text(), "Hi!");
    assert_eq!(r2.text(), "Hi!");
}

/// S3: R2 only observes the first and third of three inserts, deletes
/// the first of those, then every operation eventually arrives
/// everywhere. Both replicas converge on "bc".
#[test]
fn s3_delete_of_partially_delivered_insert_converges() {
    let mut r1 = Replica::new(SiteId::from_raw(1));
    let mut r2 = Replica::new(SiteId::from_raw(2));

    let op_a = r1.local_insert(0, 'a').unwrap();
    let op_b = r1.local_insert(1, 'b').unwrap();
    let op_c = r1.local_insert(2, 'c').unwrap();

    // R2 only sees 'a' and 'c' for now; 'b' is in flight.
    r2.apply_remote(op_a.clone()).unwrap();
    r2.apply_remote(op_c.clone()).unwrap();
    assert_eq!(r2.text(), "ac");

    let op_delete_a = r2.local_delete(0).unwrap();

    // Now everything is delivered everywhere, in any order.
    r1.apply_remote(op_b.clone()).unwrap();
    r1.apply_remote(op_delete_a.clone()).unwrap();
    r2.apply_remote(op_b).unwrap();

    assert_eq!(r1.text(), "bc");
    assert_eq!(r2.text(), "bc");
}

/// S4: R1 types "X", drops, types "Y" while disconnected, reconnects
/// and resyncs; R2 observes each insert exactly once and sees "XY".
#[test]
fn s4_queue_replays_ops_produced_while_disconnected() {
    use liveshare::{MemoryQueueStore, OutboundQueue};

    let mut r1 = Replica::new(SiteId::from_raw(1));
    let mut queue = OutboundQueue::open(Box::new(MemoryQueueStore::default()));

    let op_x = r1.local_insert(0, 'X').unwrap();
    queue.enqueue(op_x);
    // "connection drops" here; R1 keeps typing.
    let op_y = r1.local_insert(1, 'Y').unwrap();
    queue.enqueue(op_y);

    // Reconnect: the relay fans out every queued entry exactly once.
    let mut r2 = Replica::new(SiteId::from_raw(2));
    let queued: Vec<_> = queue.peek_all().into_iter().map(|e| e.op).collect();
    for op in &queued {
        r2.apply_remote(op.clone()).unwrap();
    }

    assert_eq!(r2.text(), "XY");

    let ids: Vec<_> = queue.peek_all().iter().map(|e| e.queue_id).collect();
    queue.ack(&ids);
    assert!(queue.is_empty());
}

/// S5: two replicas each produce 1000 random inserts while partitioned;
/// after healing, exchanging all ops in shuffled order on both sides
/// converges on byte-identical, 2000-character text.
#[test]
fn s5_large_partition_heals_to_identical_text() {
    let mut r1 = Replica::new(SiteId::from_raw(1));
    let mut r2 = Replica::new(SiteId::from_raw(2));

    let mut rng = StdRng::seed_from_u64(42);
    let mut ops1 = Vec::new();
    let mut ops2 = Vec::new();

    for i in 0..1000u32 {
        let index = (i as usize) % (r1.len() + 1);
        ops1.push(r1.local_insert(index, 'x').unwrap());
        let index = (i as usize) % (r2.len() + 1);
        ops2.push(r2.local_insert(index, 'y').unwrap());
    }

    let mut incoming_for_r1 = ops2.clone();
    let mut incoming_for_r2 = ops1.clone();
    incoming_for_r1.shuffle(&mut rng);
    incoming_for_r2.shuffle(&mut rng);

    for op in incoming_for_r1 {
        r1.apply_remote(op).unwrap();
    }
    for op in incoming_for_r2 {
        r2.apply_remote(op).unwrap();
    }

    assert_eq!(r1.text(), r2.text());
    assert_eq!(r1.text().chars().count(), 2000);
}

/// S6: the same insert delivered twice still yields exactly one
/// character (idempotence, I1's "no duplicates" clause).
#[test]
fn s6_duplicate_delivery_yields_one_character() {
    let mut r1 = Replica::new(SiteId::from_raw(1));
    let op = r1.local_insert(0, 'Q').unwrap();

    let mut r2 = Replica::new(SiteId::from_raw(2));
    r2.apply_remote(op.clone()).unwrap();
    r2.apply_remote(op).unwrap();

    assert_eq!(r2.text(), "Q");
    assert_eq!(r2.len(), 1);
}
