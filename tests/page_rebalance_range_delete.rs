//! Deleting a wide key range that spans many leaf pages must leave the
//! surviving neighbours on either side still reachable by traversal,
//! and must reclaim the emptied pages rather than leaking them.

use strata::btree::Exchange;
use strata::key::Key;
use strata::volume::Volume;

fn int_key(v: i64) -> Key {
    let mut k = Key::new();
    k.append_int(v);
    k
}

#[test]
fn range_delete_spanning_many_pages_preserves_order_and_neighbours() {
    let volume = Volume::create_temporary(4096, 256);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    for i in 0..2000i64 {
        exchange.store(&int_key(i), vec![0xab; 96]).unwrap();
    }

    let removed = exchange.remove_key_range(&int_key(500), &int_key(1500)).unwrap();
    assert_eq!(removed, 1000);

    let remaining = exchange.traverse(&Key::before()).unwrap();
    let keys: Vec<i64> = remaining
        .iter()
        .map(|e| match e.key.segments().unwrap().into_iter().next().unwrap() {
            strata::key::Segment::Integer(v) => v,
            _ => panic!("expected integer key"),
        })
        .collect();

    let mut expected: Vec<i64> = (0..500).chain(1500..2000).collect();
    expected.sort_unstable();
    assert_eq!(keys, expected);

    for i in 0..500i64 {
        assert!(exchange.fetch(&int_key(i)).unwrap().is_some());
    }
    for i in 1500..2000i64 {
        assert!(exchange.fetch(&int_key(i)).unwrap().is_some());
    }
    for i in 500..1500i64 {
        assert!(exchange.fetch(&int_key(i)).unwrap().is_none());
    }
}

#[test]
fn repeated_remove_and_reinsert_keeps_tree_queryable() {
    let volume = Volume::create_temporary(4096, 256);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    for i in 0..500i64 {
        exchange.store(&int_key(i), vec![i as u8; 32]).unwrap();
    }
    for i in (0..500i64).step_by(2) {
        assert!(exchange.remove(&int_key(i)).unwrap());
    }
    for i in (0..500i64).step_by(2) {
        exchange.store(&int_key(i), vec![0xff; 32]).unwrap();
    }
    for i in 0..500i64 {
        assert!(exchange.fetch(&int_key(i)).unwrap().is_some());
    }
}
