//! Shared proptest configuration for the property-test modules scattered
//! across this crate's unit tests. The solver's branch-and-bound cover
//! search is the expensive one here, so the default case count stays modest
//! unless a developer asks for more.

use proptest::prelude::ProptestConfig;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(64);
    ProptestConfig { cases, failure_persistence: None, ..ProptestConfig::default() }
}
