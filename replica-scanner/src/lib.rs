pub mod auth;
pub mod capture;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod crawler;
pub mod error;
pub mod http;
pub mod result;
pub mod session;

pub use auth::{AuthOutcome, authenticate};
pub use capture::{CaptureProgressCallback, PageCapture};
#[cfg(feature = "chromium")]
pub use chromium::ChromiumSession;
pub use crawler::{Discoverer, ProgressCallback};
pub use error::ScanError;
pub use http::HttpSession;
pub use result::{Bucket, PageRecord, ResourceInventory};
pub use session::{BrowserSession, FormFill};
