//! Instrumented micro-benchmarks driven by the `benchtree run` command
//!
//! Each workload opens one [`Bunch`] annotated with its parameters and
//! compares two implementations of the same operation, each wrapped in a
//! [`Task`] run `iterations` times. Setup is timed separately with a
//! [`Scope`].

use crate::environment::Environment;
use crate::recorder::{Bunch, Scope, Task};
use clap::ValueEnum;
use std::hint::black_box;

/// Bits in the position bitset used by [`Workload::BitsetFill`]
pub const BITSET_BITS: usize = 65_536;
/// Width of one range set by the bitset workload
pub const BITSET_RANGE: usize = 1_000;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Workload {
    /// Fill a vector element by element vs from an iterator
    VectorFill,
    /// Copy a byte vector with an indexed loop vs `clone_from`
    VectorCopy,
    /// Set bit ranges one bit at a time vs one word at a time
    BitsetFill,
}

impl Workload {
    pub fn name(self) -> &'static str {
        match self {
            Workload::VectorFill => "vector_fill",
            Workload::VectorCopy => "vector_copy",
            Workload::BitsetFill => "bitset_fill",
        }
    }
}

/// Parameters shared by every workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadParams {
    /// Number of elements (ranges for the bitset workload)
    pub size: usize,
    /// Runs of each variant
    pub iterations: usize,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        WorkloadParams {
            size: 4096,
            iterations: 10,
        }
    }
}

/// Run `workload` on the calling thread, recording into `env`
pub fn run(workload: Workload, params: WorkloadParams, env: &Environment) {
    let mut bunch = Bunch::in_env(env, workload.name());
    bunch.add_comment("N", params.size);
    bunch.add_comment("iterations", params.iterations);

    match workload {
        Workload::VectorFill => vector_fill(params, env),
        Workload::VectorCopy => vector_copy(params, env),
        Workload::BitsetFill => bitset_fill(params, env),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    chr: u8,
    value: usize,
    value1: usize,
    son: usize,
}

impl Node {
    fn new(chr: u8, value: usize, value1: usize) -> Self {
        Node {
            chr,
            value,
            value1,
            son: 0,
        }
    }
}

fn vector_fill(params: WorkloadParams, env: &Environment) {
    let mut nodes: Vec<Node> = {
        let _setup = Scope::in_env(env, "reserve");
        Vec::with_capacity(params.size)
    };

    let mut push = Task::in_env(env, "push", |out: &mut Vec<Node>| {
        out.clear();
        for i in 0..params.size {
            out.push(Node::new(1, i, 3));
        }
    });
    let mut extend = Task::in_env(env, "extend", |out: &mut Vec<Node>| {
        out.clear();
        out.extend((0..params.size).map(|i| Node::new(1, i, 3)));
    });

    for _ in 0..params.iterations {
        push.run_with(&mut nodes);
        black_box(&nodes);
        extend.run_with(&mut nodes);
        black_box(&nodes);
    }
    drop(push);
    drop(extend);

    let checksum: usize = nodes
        .iter()
        .map(|n| n.value + n.value1 + n.son + usize::from(n.chr))
        .sum();
    black_box(checksum);
}

fn vector_copy(params: WorkloadParams, env: &Environment) {
    let source = {
        let _setup = Scope::in_env(env, "allocate");
        vec![b'a'; params.size]
    };
    let mut target: Vec<u8> = Vec::new();

    let mut indexed = Task::in_env(env, "indexed_loop", |dst: &mut Vec<u8>| {
        dst.resize(source.len(), 0);
        for i in 0..source.len() {
            dst[i] = source[i];
        }
    });
    let mut assign = Task::in_env(env, "clone_from", |dst: &mut Vec<u8>| {
        dst.clone_from(&source);
    });

    for _ in 0..params.iterations {
        indexed.run_with(&mut target);
        black_box(&target);
        assign.run_with(&mut target);
        black_box(&target);
    }
    drop(indexed);
    drop(assign);
}

/// Set bits `first..last` of `bits` one at a time
pub fn set_range_per_bit(bits: &mut [u64], first: usize, last: usize) {
    let last = last.min(bits.len() * WORD_BITS);
    for bit in first..last {
        bits[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
    }
}

/// Set bits `first..last` of `bits` with whole-word masks
pub fn set_range_word_wise(bits: &mut [u64], first: usize, last: usize) {
    let last = last.min(bits.len() * WORD_BITS);
    if first >= last {
        return;
    }

    let (first_word, last_word) = (first / WORD_BITS, (last - 1) / WORD_BITS);
    let head = u64::MAX << (first % WORD_BITS);
    let tail = u64::MAX >> (WORD_BITS - 1 - (last - 1) % WORD_BITS);

    if first_word == last_word {
        bits[first_word] |= head & tail;
        return;
    }
    bits[first_word] |= head;
    for word in &mut bits[first_word + 1..last_word] {
        *word = u64::MAX;
    }
    bits[last_word] |= tail;
}

fn bitset_fill(params: WorkloadParams, env: &Environment) {
    let mut bits = vec![0u64; BITSET_BITS / WORD_BITS];
    let ranges = params.size.min(BITSET_BITS.div_ceil(BITSET_RANGE));

    let mut per_bit = Task::in_env(env, "per_bit", |bits: &mut Vec<u64>| {
        bits.fill(0);
        for i in 0..ranges {
            set_range_per_bit(bits, i * BITSET_RANGE, (i + 1) * BITSET_RANGE);
        }
    });
    per_bit.add_comment("ranges", ranges);

    let mut word_wise = Task::in_env(env, "word_wise", |bits: &mut Vec<u64>| {
        bits.fill(0);
        for i in 0..ranges {
            set_range_word_wise(bits, i * BITSET_RANGE, (i + 1) * BITSET_RANGE);
        }
    });
    word_wise.add_comment("ranges", ranges);

    for _ in 0..params.iterations {
        per_bit.run_with(&mut bits);
        black_box(&bits);
        word_wise.run_with(&mut bits);
        black_box(&bits);
    }
    drop(per_bit);
    drop(word_wise);
}
