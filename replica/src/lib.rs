// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{
    MirrorOverrides, apply_overrides, format_summary, init_logging, load_config,
};

pub use replica_core::{MirrorOptions, MirrorSummary, run_mirror, validate_mirror};
