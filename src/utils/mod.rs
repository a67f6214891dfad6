pub mod crypto;
pub mod logging;
