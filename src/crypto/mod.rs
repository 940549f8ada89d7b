pub mod key_management;

pub use key_management::{KeyManager, PayloadCipher};
