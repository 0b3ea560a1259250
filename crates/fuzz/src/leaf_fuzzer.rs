use std::panic::{catch_unwind, AssertUnwindSafe};

use arbitrary::Arbitrary;
use rustc_hash::{FxHashMap, FxHashSet};
use zap_leaf::{byteswap, zap_hash, Ints, Leaf, LeafConfig, ZapError, ZapStats};

/// Small blocks (18 chunks) so that splits happen after a few inserts.
const BLOCK_SIZE: usize = 512;
const SALT: u64 = 0x2ab1eaf;
/// Few hash bits so that names collide and get distinct cds.
const HASH_BITS: u32 = 12;
const MAX_NAME: usize = 40;
const MAX_VALUE_BYTES: usize = 200;

#[derive(Clone, PartialEq, Eq, Arbitrary)]
pub enum Value {
    Bytes(Vec<u8>),
    Words(Vec<u32>),
    Longs(Vec<u64>),
}

impl Value {
    fn ints(&self) -> Ints<'_> {
        match self {
            Value::Bytes(v) => Ints::U8(v),
            Value::Words(v) => Ints::U32(v),
            Value::Longs(v) => Ints::U64(v),
        }
    }

    fn widened(&self) -> Vec<u64> {
        let ints = self.ints();
        (0..ints.len()).map(|i| ints.get(i)).collect()
    }

    /// Keeps every entry small enough for one block.
    fn truncate(&mut self) {
        match self {
            Value::Bytes(v) => v.truncate(MAX_VALUE_BYTES),
            Value::Words(v) => v.truncate(MAX_VALUE_BYTES / 4),
            Value::Longs(v) => v.truncate(MAX_VALUE_BYTES / 8),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bytes(v) => write!(f, "Bytes(vec!{:?})", v),
            Value::Words(v) => write!(f, "Words(vec!{:?})", v),
            Value::Longs(v) => write!(f, "Longs(vec!{:?})", v),
        }
    }
}

#[derive(Clone, Arbitrary)]
pub enum Action {
    Insert { name: Vec<u8>, value: Value },
    Update { index: usize, value: Value },
    Remove(usize),
    Get(usize),
    /// Walks one leaf in hash order with `lookup_closest`.
    Scan(usize),
    Byteswap(usize),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Insert { name, value } => {
                write!(
                    f,
                    "Insert{{\n\tname: vec!{:?}, \n\tvalue: {:?}\n}}",
                    name, value
                )
            }
            Action::Update { index, value } => {
                write!(f, "Update{{\n\tindex: {}, \n\tvalue: {:?}\n}}", index, value)
            }
            Action::Remove(index) => write!(f, "Remove({})", index),
            Action::Get(index) => write!(f, "Get({})", index),
            Action::Scan(index) => write!(f, "Scan({})", index),
            Action::Byteswap(index) => write!(f, "Byteswap({})", index),
        }
    }
}

fn name_hash(name: &[u8]) -> u64 {
    zap_hash(SALT, Ints::U8(name), HASH_BITS)
}

/// A directory of leaves, each serving one prefix of the hash space, checked
/// against a hash map.
pub struct LeafFuzzer {
    config: LeafConfig,
    blocks: Vec<Vec<u8>>,
    model: FxHashMap<Vec<u8>, Value>,
    names: Vec<Vec<u8>>,
    rejected: usize,
}

impl Default for LeafFuzzer {
    fn default() -> Self {
        let config = LeafConfig::default();
        let mut block = vec![0; BLOCK_SIZE];
        Leaf::init_with_config(&mut block, config).unwrap();
        Self {
            config,
            blocks: vec![block],
            model: Default::default(),
            names: Default::default(),
            rejected: 0,
        }
    }
}

enum Outcome {
    Done,
    Full,
}

impl LeafFuzzer {
    fn leaf(&mut self, i: usize) -> Leaf<'_> {
        Leaf::open_with_config(&mut self.blocks[i], self.config).unwrap()
    }

    fn home(&mut self, hash: u64) -> usize {
        (0..self.blocks.len())
            .find(|&i| self.leaf(i).covers(hash))
            .expect("leaves cover the whole hash space")
    }

    /// Splits leaf `i` into a new block. Returns false once the leaf's
    /// prefix is as long as the hash, where splitting separates nothing.
    fn split(&mut self, i: usize) -> bool {
        if self.leaf(i).header().prefix_len as u32 >= HASH_BITS {
            return false;
        }
        let mut dest = vec![0; BLOCK_SIZE];
        {
            let config = self.config;
            let mut dst = Leaf::init_with_config(&mut dest, config).unwrap();
            self.leaf(i).split(&mut dst).unwrap();
        }
        self.blocks.push(dest);
        true
    }

    /// Sets `name` to `value`, splitting the home leaf until it fits.
    fn set(&mut self, name: &[u8], value: &Value) {
        let hash = name_hash(name);
        loop {
            let i = self.home(hash);
            let mut leaf = self.leaf(i);
            let result = match leaf.lookup(name, hash) {
                Ok(mut h) => leaf.entry_update(&mut h, value.ints()),
                Err(ZapError::NotFound) => leaf.entry_create(name, hash, None, value.ints()).map(|_| ()),
                Err(e) => panic!("lookup failed: {}", e),
            };
            let outcome = match result {
                Ok(()) => Outcome::Done,
                Err(e) if e.is_retryable() => Outcome::Full,
                Err(e) => panic!("set failed: {}", e),
            };
            match outcome {
                Outcome::Done => {
                    if self.model.insert(name.to_vec(), value.clone()).is_none() {
                        self.names.push(name.to_vec());
                    }
                    return;
                }
                Outcome::Full => {
                    if !self.split(i) {
                        tracing::debug!("leaf {} cannot split further", i);
                        self.rejected += 1;
                        return;
                    }
                }
            }
        }
    }

    fn get(&mut self, name: &[u8]) {
        let hash = name_hash(name);
        let expected = self.model[name].widened();
        let i = self.home(hash);
        let leaf = self.leaf(i);
        let h = leaf.lookup(name, hash).unwrap();
        assert_eq!(h.num_integers(), expected.len());
        let mut value = vec![0u64; expected.len()];
        leaf.entry_read(&h, &mut value[..]).unwrap();
        assert_eq!(value, expected, "value mismatch for {:?}", name);
        let mut stored = vec![0u8; h.name_len()];
        leaf.entry_read_name(&h, &mut stored[..]).unwrap();
        assert_eq!(stored, name);
    }

    fn scan(&mut self, i: usize) {
        let names: Vec<Vec<u8>> = self.model.keys().cloned().collect();
        let leaf = self.leaf(i);
        let mut seen = FxHashSet::default();
        let mut cursor = (0u64, 0u32);
        loop {
            let h = match leaf.lookup_closest(cursor.0, cursor.1) {
                Ok(h) => h,
                Err(ZapError::NotFound) => break,
                Err(e) => panic!("closest failed: {}", e),
            };
            assert!((h.hash(), h.cd()) >= cursor);
            let mut name = vec![0u8; h.name_len()];
            leaf.entry_read_name(&h, &mut name[..]).unwrap();
            assert!(seen.insert(name));
            cursor = (h.hash(), h.cd() + 1);
        }
        let expected: FxHashSet<Vec<u8>> = names
            .into_iter()
            .filter(|name| leaf.covers(name_hash(name)))
            .collect();
        assert_eq!(seen, expected);
    }

    fn prepare(&self, action: &mut Action) {
        match action {
            Action::Insert { name, value } => {
                if name.is_empty() {
                    *name = vec![0];
                }
                name.truncate(MAX_NAME);
                value.truncate();
            }
            Action::Update { index, value } => {
                value.truncate();
                if self.names.is_empty() {
                    *action = Action::Insert {
                        name: vec![0],
                        value: value.clone(),
                    };
                } else {
                    *index %= self.names.len();
                }
            }
            Action::Remove(index) | Action::Get(index) => {
                if self.names.is_empty() {
                    *action = Action::Insert {
                        name: vec![0],
                        value: Value::Bytes(vec![0]),
                    };
                } else {
                    *index %= self.names.len();
                }
            }
            Action::Scan(index) | Action::Byteswap(index) => {
                *index %= self.blocks.len();
            }
        }
    }

    fn apply(&mut self, action: &Action) {
        match action {
            Action::Insert { name, value } => self.set(name, value),
            Action::Update { index, value } => {
                let name = self.names[*index].clone();
                self.set(&name, value);
            }
            Action::Remove(index) => {
                let name = self.names.swap_remove(*index);
                let hash = name_hash(&name);
                let i = self.home(hash);
                let mut leaf = self.leaf(i);
                let h = leaf.lookup(&name[..], hash).unwrap();
                leaf.entry_remove(h).unwrap();
                assert_eq!(leaf.lookup(&name[..], hash), Err(ZapError::NotFound));
                self.model.remove(&name);
            }
            Action::Get(index) => {
                let name = self.names[*index].clone();
                self.get(&name);
            }
            Action::Scan(index) => self.scan(*index),
            Action::Byteswap(index) => {
                let block = &mut self.blocks[*index];
                let original = block.clone();
                byteswap(block).unwrap();
                assert!(Leaf::open(block).is_err());
                byteswap(block).unwrap();
                assert_eq!(*block, original);
            }
        }
    }

    /// Structural checks on every leaf after each action.
    fn check(&mut self) {
        let mut entries = 0;
        let mut stats = ZapStats::default();
        for i in 0..self.blocks.len() {
            let leaf = self.leaf(i);
            let usage = leaf.verify().unwrap();
            assert_eq!(usage.total(), leaf.num_chunks());
            leaf.stats(HASH_BITS, &mut stats).unwrap();
            entries += usage.entry;
        }
        assert_eq!(entries, self.model.len());
        assert_eq!(
            stats.buckets_with_n_entries.iter().sum::<u64>(),
            self.blocks.len() as u64 * self.leaf(0).hash_entries() as u64
        );
    }

    fn equal(&mut self) {
        let names = self.names.clone();
        for name in names.iter() {
            self.get(name);
        }
        tracing::info!(
            "{} entries in {} leaves, {} inserts rejected",
            self.model.len(),
            self.blocks.len(),
            self.rejected
        );
    }
}

pub fn test_leaf_fuzzer(actions: &mut [Action]) {
    let mut fuzzer = LeafFuzzer::default();
    let mut applied = Vec::new();
    for action in actions {
        fuzzer.prepare(action);
        applied.push(action.clone());
        tracing::info!("\n{:#?}", applied);
        fuzzer.apply(action);
        fuzzer.check();
    }
    tracing::info!("\n{:#?}", applied);
    fuzzer.equal();
}

/// Runs read and write operations over a block with arbitrary content
/// behind a valid header. Errors are fine, panics are not.
pub fn test_random_block(bytes: &[u8]) {
    // keep block type and magic, let the fuzzer own everything after them
    const BODY: usize = 28;
    let mut buf = vec![0u8; BLOCK_SIZE];
    Leaf::init(&mut buf).unwrap();
    let n = bytes.len().min(BLOCK_SIZE - BODY);
    buf[BODY..BODY + n].copy_from_slice(&bytes[..n]);

    if let Ok(mut leaf) = Leaf::open(&mut buf) {
        let _ = leaf.verify();
        let _ = leaf.stats(HASH_BITS, &mut ZapStats::default());
        if let Ok(h) = leaf.lookup_closest(0, 0) {
            let mut value = [0u64; 8];
            let _ = leaf.entry_read(&h, &mut value);
            let mut name = [0u8; 8];
            let _ = leaf.entry_read_name(&h, &mut name);
        }
        let name = b"probe";
        let hash = name_hash(name);
        match leaf.lookup(name, hash) {
            Ok(h) => {
                let _ = leaf.entry_remove(h);
            }
            Err(_) => {
                let _ = leaf.entry_create(name, hash, None, &[1u64, 2]);
            }
        }
        let mut dest = vec![0u8; BLOCK_SIZE];
        if let Ok(mut dst) = Leaf::init(&mut dest) {
            let _ = leaf.split(&mut dst);
        }
    }
    let _ = byteswap(&mut buf);
}

pub fn minify_simple<T, F>(f: F, actions: Vec<T>)
where
    F: Fn(&mut [T]),
    T: Clone + std::fmt::Debug,
{
    std::panic::set_hook(Box::new(|_info| {
        // ignore panic output
    }));
    let fails = |actions: &[T]| {
        let mut actions = actions.to_vec();
        catch_unwind(AssertUnwindSafe(|| f(&mut actions[..]))).is_err()
    };
    if !fails(&actions) {
        println!("No Error Found");
        return;
    }
    let mut minified = actions.clone();
    let mut current_index = minified.len() as i64 - 1;
    while current_index > 0 {
        let a = minified.remove(current_index as usize);
        let re = fails(&minified);
        if !re {
            minified.insert(current_index as usize, a);
        }
        println!(
            "{}/{} {}",
            actions.len() as i64 - current_index,
            actions.len(),
            re
        );
        current_index -= 1;
    }

    println!("{:?}", &minified);
    println!(
        "Old Length {}, New Length {}",
        actions.len(),
        minified.len()
    );
    if actions.len() > minified.len() {
        minify_simple(f, minified);
    }
}
