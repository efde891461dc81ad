pub mod common;

pub mod end_to_end_refresh;
pub mod server_api;
