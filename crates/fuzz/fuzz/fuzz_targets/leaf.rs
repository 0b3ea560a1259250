#![no_main]

use fuzz::{test_leaf_fuzzer, LeafAction};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|actions: Vec<LeafAction>| {
    let mut actions = actions;
    test_leaf_fuzzer(&mut actions);
});
