pub mod batch;
pub mod http;
