//! Shared helpers for the behavioural suites.
#![allow(dead_code)]

use std::sync::Arc;

use vaultex_core::chunk_info::{ChunkInfoHandler, ChunkInfoOptions};
use vaultex_core::hash::{IdHasher, Sha512IdHasher};
use vaultex_core::time::FrozenClock;
use vaultex_model::{ChunkName, Id, Pmid};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn hash_id(text: &str) -> Id {
    Sha512IdHasher.digest(text.as_bytes())
}

pub fn chunk_named(text: &str) -> ChunkName {
    ChunkName::new(hash_id(text))
}

pub fn client(index: usize) -> Pmid {
    Pmid::new(hash_id(&format!("id{index}")))
}

pub fn reference_holder(index: usize) -> Pmid {
    Pmid::new(hash_id(&format!("rf{index}")))
}

pub fn started_handler() -> (Arc<FrozenClock>, ChunkInfoHandler) {
    init_tracing();
    let clock = Arc::new(FrozenClock::at(1_700_000_000));
    let handler = ChunkInfoHandler::new(clock.clone(), ChunkInfoOptions::default(), true);
    (clock, handler)
}
