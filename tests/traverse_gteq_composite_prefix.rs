//! A GTEQ positional traversal from a key that is itself a prefix of a
//! deeper composite key must land on the first matching composite key,
//! never skip past it to the next top-level segment value.

use strata::btree::{Direction, Exchange};
use strata::key::{Key, Segment};
use strata::volume::Volume;

fn composite(a: i64, b: i64) -> Key {
    let mut k = Key::new();
    k.append_int(a);
    k.append_int(b);
    k
}

fn shallow(a: i64) -> Key {
    let mut k = Key::new();
    k.append_int(a);
    k
}

#[test]
fn gteq_from_a_bare_prefix_lands_on_first_deeper_match() {
    let volume = Volume::create_temporary(4096, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    exchange.store(&composite(5, 10), b"a".to_vec()).unwrap();
    exchange.store(&composite(5, 20), b"b".to_vec()).unwrap();
    exchange.store(&composite(6, 1), b"c".to_vec()).unwrap();

    let hit = exchange
        .traverse_dir(&shallow(5), Direction::Gteq, false, |_| true)
        .unwrap()
        .expect("expected a hit");

    match hit.key.segments().unwrap()[1] {
        Segment::Integer(v) => assert_eq!(v, 10),
        _ => panic!("expected integer second segment"),
    }
}

#[test]
fn gt_skips_past_an_exact_match_to_the_next_key() {
    let volume = Volume::create_temporary(4096, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    exchange.store(&composite(5, 10), b"a".to_vec()).unwrap();
    exchange.store(&composite(5, 20), b"b".to_vec()).unwrap();

    let hit = exchange
        .traverse_dir(&composite(5, 10), Direction::Gt, true, |_| true)
        .unwrap()
        .expect("expected a hit");
    assert_eq!(hit.key, composite(5, 20));
}
