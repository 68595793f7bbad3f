pub mod credentials;

pub use credentials::{load_credential, ApiCredential};
