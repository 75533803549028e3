//! Fast, non-cryptographic hash maps/sets for compiler-internal bookkeeping.
//!
//! A thin alias over `rustc-hash`'s `FxHashMap`/`FxHashSet`.

pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type FxHashSet<T> = rustc_hash::FxHashSet<T>;
