pub mod anchor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod evidence;
pub mod integrity;
pub mod server;
pub mod service;
pub mod state;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
