pub mod assets;
pub mod config;
pub mod error;
pub mod markup;
pub mod mirror;
pub mod persist;
pub mod rewrite;
pub mod validate;

pub use assets::{AssetMap, AssetRecord, AssetResolver, ResolveStats};
pub use config::{Engine, MirrorConfig};
pub use error::MirrorError;
pub use mirror::{MirrorOptions, MirrorSummary, run_mirror};
pub use persist::{PageWriter, create_layout, page_output_path};
pub use rewrite::{PathRewriter, RewriteOutcome};
pub use validate::{ValidationReport, validate_mirror};
