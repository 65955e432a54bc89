pub mod dns_guard;
pub mod url_guard;

pub use dns_guard::{check_rebind, is_private_ip};
pub use url_guard::{normalize, ValidatedTarget};
