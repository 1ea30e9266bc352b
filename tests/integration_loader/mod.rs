//! Loader behaviour observed through its public surface only.

mod catalog_discovery;
mod execution;
mod fetchers;
mod selection;
mod support;
mod teardown;
mod transform_rules;
