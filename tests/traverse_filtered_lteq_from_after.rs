//! A filtered LTEQ positional traversal starting from the reserved
//! `after()` cursor must return the greatest key that both satisfies
//! the key-filter range and sorts at or below the cursor - i.e. the
//! overall maximum key in the range.

use strata::btree::{Direction, Exchange, KeyFilterRange};
use strata::key::Key;
use strata::volume::Volume;

fn str_key(v: &str) -> Key {
    let mut k = Key::new();
    k.append_str(v);
    k
}

#[test]
fn lteq_from_after_with_upper_bound_filter_finds_the_range_maximum() {
    let volume = Volume::create_temporary(4096, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    for word in ["alpha", "bravo", "charlie", "delta", "echo"] {
        exchange.store(&str_key(word), word.as_bytes().to_vec()).unwrap();
    }

    let range = KeyFilterRange {
        lower: Key::before(),
        upper: str_key("charlie"),
        lower_inclusive: true,
        upper_inclusive: true,
    };

    let hit = exchange
        .traverse_dir_filtered(&Key::after(), Direction::Lteq, true, &range)
        .unwrap()
        .expect("expected a hit");
    assert_eq!(hit.key, str_key("charlie"));
}

#[test]
fn lteq_from_after_with_exclusive_upper_bound_excludes_the_boundary_key() {
    let volume = Volume::create_temporary(4096, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    for word in ["alpha", "bravo", "charlie"] {
        exchange.store(&str_key(word), word.as_bytes().to_vec()).unwrap();
    }

    let range = KeyFilterRange {
        lower: Key::before(),
        upper: str_key("charlie"),
        lower_inclusive: true,
        upper_inclusive: false,
    };

    let hit = exchange
        .traverse_dir_filtered(&Key::after(), Direction::Lteq, true, &range)
        .unwrap()
        .expect("expected a hit");
    assert_eq!(hit.key, str_key("bravo"));
}
