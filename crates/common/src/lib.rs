// teamgraph-common: wire types and diff algorithms shared across teamgraph crates

pub mod diff;
pub mod protocol;
pub mod types;
