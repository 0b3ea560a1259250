#![no_main]

use fuzz::test_random_block;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    test_random_block(data);
});
