#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use rankkit::ds::RankedMap;

// Fuzz arbitrary operation sequences on RankedMap
//
// Drives set, get_or_create, get, delete_key, delete-by-handle, set_rank,
// and clear against a plain HashMap reference, checking index/heap
// agreement after every operation.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut map: RankedMap<u8, u16, u16> = RankedMap::new();
    let mut reference: HashMap<u8, u16> = HashMap::new();

    let mut idx = 0;
    while idx + 3 < data.len() {
        let op = data[idx] % 7;
        let key = data[idx + 1];
        let rank = u16::from_le_bytes([data[idx + 2], data[idx + 3]]);
        idx += 4;

        match op {
            0 => {
                // set overwrites rank and value
                let item = map.set(key, rank, rank);
                assert!(item.present());
                assert_eq!(item.key(), key);
                assert_eq!(item.rank(), rank);
                assert_eq!(*item.value(), rank);
                reference.insert(key, rank);
            }
            1 => {
                // get_or_create keeps the existing rank
                let (item, existed) = map.get_or_create(key, rank);
                assert_eq!(existed, reference.contains_key(&key));
                assert!(item.present());
                if !existed {
                    reference.insert(key, rank);
                }
                assert_eq!(item.rank(), reference[&key]);
            }
            2 => {
                // get mirrors exists
                let item = map.get(&key);
                assert_eq!(item.present(), reference.contains_key(&key));
            }
            3 => {
                // delete_key reports removal
                let removed = map.delete_key(&key);
                assert_eq!(removed, reference.remove(&key).is_some());
                assert!(!map.exists(&key));
            }
            4 => {
                // delete via handle
                if map.exists(&key) {
                    let item = map.get(&key);
                    map.delete(&item);
                    assert!(!item.present());
                    reference.remove(&key);
                }
            }
            5 => {
                // set_rank keeps the key mapped
                if map.exists(&key) {
                    let item = map.get(&key);
                    map.set_rank(&item, rank);
                    assert!(map.exists(&key));
                    reference.insert(key, rank);
                }
            }
            6 => {
                // clear
                map.clear();
                reference.clear();
                assert!(map.is_empty());
            }
            _ => unreachable!(),
        }

        assert_eq!(map.len(), reference.len());
        map.check_invariants().expect("index and heap must agree");
    }

    // drain and compare against the reference as a rank-sorted multiset
    let mut expected: Vec<(u16, u8)> = reference.iter().map(|(k, r)| (*r, *k)).collect();
    expected.sort_unstable();
    let mut drained: Vec<(u16, u8)> = map
        .remove_ordered()
        .map(|item| (item.rank(), item.key()))
        .collect();
    assert!(drained.windows(2).all(|w| w[0].0 <= w[1].0));
    drained.sort_unstable();
    assert_eq!(drained, expected);
});
