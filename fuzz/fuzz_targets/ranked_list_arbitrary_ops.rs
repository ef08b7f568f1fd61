#![no_main]

use libfuzzer_sys::fuzz_target;
use rankkit::ds::{Item, RankedList};

// Fuzz arbitrary operation sequences on RankedList
//
// Tests random sequences of insert, set_rank, delete, delete_first, partial
// ordered drains, and clear, validating heap invariants after every step.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut list: RankedList<u16, u16> = RankedList::new();
    let mut live: Vec<Item<u16, u16>> = Vec::new();

    let mut idx = 0;
    while idx + 2 < data.len() {
        let op = data[idx] % 6;
        let arg = u16::from_le_bytes([data[idx + 1], data[idx + 2]]);
        idx += 3;

        match op {
            0 => {
                // insert
                let item = list.insert(arg, arg);
                assert!(item.present());
                assert_eq!(item.rank(), arg);
                live.push(item);
            }
            1 => {
                // set_rank on a live handle
                if !live.is_empty() {
                    let item = &live[arg as usize % live.len()];
                    list.set_rank(item, arg);
                    assert_eq!(item.rank(), arg);
                    assert!(item.present());
                }
            }
            2 => {
                // delete a live handle
                if !live.is_empty() {
                    let item = live.swap_remove(arg as usize % live.len());
                    let old_len = list.len();
                    list.delete(&item);
                    assert!(!item.present());
                    assert_eq!(list.len(), old_len - 1);
                }
            }
            3 => {
                // delete_first must remove a minimum-rank item
                if !list.is_empty() {
                    let first = list.first();
                    let min = first.rank();
                    for item in &live {
                        assert!(!(item.rank() < min));
                    }
                    list.delete_first();
                    assert!(!first.present());
                    live.retain(|item| item.present());
                }
            }
            4 => {
                // partial ordered drain
                let take = arg as usize % 8;
                let mut last: Option<u16> = None;
                for item in list.remove_ordered().take(take) {
                    let rank = item.rank();
                    if let Some(prev) = last {
                        assert!(prev <= rank);
                    }
                    last = Some(rank);
                }
                live.retain(|item| item.present());
            }
            5 => {
                // clear
                list.clear();
                for item in &live {
                    assert!(!item.present());
                }
                live.clear();
                assert_eq!(list.len(), 0);
            }
            _ => unreachable!(),
        }

        assert_eq!(list.len(), live.len());
        list.check_invariants().expect("heap invariants must hold");
    }

    // whatever survived must drain in ascending rank order
    let mut expected: Vec<u16> = live.iter().map(|item| item.rank()).collect();
    expected.sort_unstable();
    let drained: Vec<u16> = list.remove_ordered().map(|item| item.rank()).collect();
    assert_eq!(drained, expected);
});
