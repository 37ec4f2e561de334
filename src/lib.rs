pub mod config;
pub mod error;
pub mod http;
pub mod storage;
pub mod tcp;
pub mod test_util;
pub mod transport;
