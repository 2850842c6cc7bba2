#[path = "../support/fixtures.rs"]
pub mod fixtures;

mod next_hop_it;
