pub mod core;
pub mod events;
pub mod responses;
pub mod test_setup;
