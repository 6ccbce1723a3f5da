pub mod common;
pub mod credentials;
pub mod crypto;
pub mod qr;
pub mod transfer;
pub mod transport;
pub mod utils;
