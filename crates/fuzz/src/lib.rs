mod leaf_fuzzer;
pub use leaf_fuzzer::{
    minify_simple as leaf_minify_simple, test_leaf_fuzzer, test_random_block,
    Action as LeafAction, Value as LeafValue,
};
