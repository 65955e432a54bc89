pub mod repository;

pub use repository::{PgScanStore, ScanStore, StoreError};

#[cfg(test)]
pub use repository::MockScanStore;
