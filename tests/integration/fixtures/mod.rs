pub mod link;
pub mod peer;
