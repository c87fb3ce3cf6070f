//! Shared helpers for the integration suite.
//!
//! The suite needs a live PostgreSQL database, named by the
//! `PGLEASE_TEST_URL` environment variable. When the variable is unset every
//! test returns early, so the suite passes without a backend.

#![allow(dead_code)]

use pglease::Pool;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

pub fn url() -> Option<String> {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
    match std::env::var("PGLEASE_TEST_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: PGLEASE_TEST_URL not set");
            None
        }
    }
}

pub fn pool() -> Option<Pool> {
    let url = url()?;
    Some(Pool::connect_url(&url).expect("PGLEASE_TEST_URL must be a valid postgres:// URL"))
}

/// A table name unique to one test run, safe for concurrent suites.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Wait for every outstanding lease to come back to the pool. Lease release
/// from Drop and cursor workers is asynchronous.
pub async fn wait_for_release(pool: &Pool) {
    for _ in 0..250 {
        if pool.acquired() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("leases were not released (acquired = {})", pool.acquired());
}
