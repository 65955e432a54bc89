pub mod indicators;
pub mod session;

pub use session::BrowserScanSession;
