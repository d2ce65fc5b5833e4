//! Model-based test for single-threaded transactions
//!
//! Random sequences of masked reads and writes grouped into transactions
//! that either commit or roll back; memory must match a plain array model
//! and every read must return the model's view including buffered writes.

use hytm_norec::Norec;
use hytm_primitives::{byte_mask, merge, TmWord};
use proptest::prelude::*;

const WORDS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Read { idx: usize, offset: usize, len: usize },
    Write { idx: usize, value: u64, offset: usize, len: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WORDS, 0usize..8, 1usize..=8).prop_map(|(idx, offset, len)| Op::Read {
            idx,
            offset,
            len
        }),
        (0..WORDS, any::<u64>(), 0usize..8, 1usize..=8).prop_map(
            |(idx, value, offset, len)| Op::Write {
                idx,
                value,
                offset,
                len
            }
        ),
    ]
}

fn block() -> impl Strategy<Value = (Vec<Op>, bool)> {
    (prop::collection::vec(op(), 0..20), any::<bool>())
}

proptest! {
    #[test]
    fn transactions_match_model(blocks in prop::collection::vec(block(), 1..20)) {
        let norec = Norec::default();
        let words: Vec<TmWord> = (0..WORDS as u64).map(|i| TmWord::new(i << 8)).collect();
        let mut memory: Vec<u64> = (0..WORDS as u64).map(|i| i << 8).collect();
        let mut commits = 0u64;

        for (ops, commit) in blocks {
            let mut view = memory.clone();
            let mut wrote = false;
            let mut tx = norec.begin();

            for op in ops {
                match op {
                    Op::Read { idx, offset, len } => {
                        let mask = byte_mask(offset, len);
                        let value = tx.read(&words[idx], mask);
                        prop_assert_eq!(value, Ok(view[idx] & mask));
                    }
                    Op::Write { idx, value, offset, len } => {
                        let mask = byte_mask(offset, len);
                        tx.write(&words[idx], value, mask);
                        view[idx] = merge(view[idx], value, mask);
                        wrote = true;
                    }
                }
            }

            if commit {
                prop_assert!(tx.commit().is_ok());
                memory = view;
                if wrote {
                    commits += 1;
                }
            } else {
                tx.rollback();
            }

            for (word, expected) in words.iter().zip(&memory) {
                prop_assert_eq!(word.get(), *expected);
            }
        }

        prop_assert_eq!(norec.clock().commit_count(), commits);
    }
}
