#[path = "../support/fixtures.rs"]
pub mod fixtures;

mod liveness_it;
mod registry_it;
