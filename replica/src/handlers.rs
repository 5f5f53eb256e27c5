use clap::ArgMatches;
use colored::Colorize;
use replica_core::config::{Engine, MirrorConfig};
use replica_core::{MirrorOptions, MirrorSummary, run_mirror, validate_mirror};
use replica_scanner::{BrowserSession, HttpSession};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Values given on the command line that override the configuration file.
#[derive(Debug, Clone, Default)]
pub struct MirrorOverrides {
    pub url: Option<Url>,
    pub output: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub concurrency: Option<usize>,
    pub engine: Option<Engine>,
}

impl MirrorOverrides {
    pub fn from_matches(sub_matches: &ArgMatches) -> Self {
        Self {
            url: sub_matches.get_one::<Url>("url").cloned(),
            output: sub_matches.get_one::<PathBuf>("output").cloned(),
            username: sub_matches.get_one::<String>("username").cloned(),
            password: sub_matches.get_one::<String>("password").cloned(),
            max_pages: sub_matches.get_one::<usize>("max-pages").copied(),
            max_depth: sub_matches.get_one::<usize>("max-depth").copied(),
            timeout_secs: sub_matches.get_one::<u64>("timeout").copied(),
            concurrency: sub_matches.get_one::<usize>("concurrency").copied(),
            engine: sub_matches
                .get_one::<String>("engine")
                .and_then(|e| e.parse().ok()),
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the flags.
pub fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn print_banner() {
    println!(
        "{} {}",
        "replica".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("{}\n", "static mirrors of live websites".dimmed());
}

/// Load the configuration file, expanding a leading `~`, or start from defaults.
pub fn load_config(path: Option<&str>) -> Result<MirrorConfig, String> {
    match path {
        Some(path) => {
            let expanded = shellexpand::tilde(path);
            MirrorConfig::load(Path::new(expanded.as_ref())).map_err(|e| e.to_string())
        }
        None => Ok(MirrorConfig::default()),
    }
}

pub fn apply_overrides(config: &mut MirrorConfig, overrides: &MirrorOverrides) {
    if let Some(ref url) = overrides.url {
        config.target.base_url = url.to_string();
    }
    if let Some(ref output) = overrides.output {
        config.output.directory = output.clone();
    }
    if let Some(ref username) = overrides.username {
        config.credentials.username = Some(username.clone());
    }
    if let Some(ref password) = overrides.password {
        config.credentials.password = Some(password.clone());
    }
    if let Some(max_pages) = overrides.max_pages {
        config.target.max_pages = max_pages;
    }
    if let Some(max_depth) = overrides.max_depth {
        config.target.max_depth = max_depth;
    }
    if let Some(timeout) = overrides.timeout_secs {
        config.target.timeout_secs = timeout;
    }
    if let Some(concurrency) = overrides.concurrency {
        config.assets.concurrent_downloads = concurrency;
    }
    if let Some(engine) = overrides.engine {
        config.crawler.engine = engine;
    }
}

async fn open_session(config: &MirrorConfig) -> Result<Box<dyn BrowserSession>, String> {
    match config.crawler.engine {
        Engine::Http => HttpSession::with_user_agent(&config.crawler.user_agent)
            .map(|s| Box::new(s) as Box<dyn BrowserSession>)
            .map_err(|e| format!("Failed to create HTTP session: {}", e)),
        #[cfg(feature = "chromium")]
        Engine::Chromium => replica_scanner::ChromiumSession::launch(&config.crawler.user_agent)
            .await
            .map(|s| Box::new(s) as Box<dyn BrowserSession>)
            .map_err(|e| format!("Failed to launch Chromium: {}", e)),
        #[cfg(not(feature = "chromium"))]
        Engine::Chromium => {
            Err("This build has no Chromium support; rebuild with --features chromium".to_string())
        }
    }
}

/// Human-readable run summary.
pub fn format_summary(summary: &MirrorSummary) -> String {
    let divider = "═".repeat(50);
    let mut out = String::new();
    out.push_str(&format!("{}\n", divider.bright_blue().bold()));
    out.push_str(&format!("{}\n", "WEBSITE MIRROR SUMMARY".bold()));
    out.push_str(&format!("{}\n", divider.bright_blue().bold()));
    out.push_str(&format!("Pages discovered:    {}\n", summary.pages_discovered));
    out.push_str(&format!("Pages captured:      {}\n", summary.pages_captured));
    out.push_str(&format!("Pages written:       {}\n", summary.pages_written));
    out.push_str(&format!(
        "Assets downloaded:   {} ({} failed, {} skipped, {} reused)\n",
        summary.assets.fetched, summary.assets.failed, summary.assets.skipped, summary.assets.reused
    ));
    out.push_str(&format!("References rewritten: {}\n", summary.references_rewritten));
    out.push_str(&format!(
        "Authenticated:       {}\n",
        if summary.authenticated { "yes" } else { "no" }
    ));
    out.push_str(&format!("Output directory:    {}\n", summary.output_dir.display()));
    if let Some(ref validation) = summary.validation {
        out.push_str(&format!(
            "Validation:          {} errors, {} warnings\n",
            validation.errors.len(),
            validation.warnings.len()
        ));
    }
    out.push_str(&format!("{}\n", divider.bright_blue().bold()));
    out
}

/// A run without a validation report is treated as valid.
pub fn mirror_is_valid(summary: &MirrorSummary) -> bool {
    summary.validation.as_ref().is_none_or(|v| v.is_ok())
}

pub async fn handle_mirror(sub_matches: &ArgMatches, quiet: bool) {
    let mut config = match load_config(sub_matches.get_one::<String>("config").map(String::as_str)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(1);
        }
    };
    apply_overrides(&mut config, &MirrorOverrides::from_matches(sub_matches));

    if let Err(e) = config.validate() {
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(1);
    }

    if !quiet {
        println!("Mirroring {}", config.target.base_url.bright_white().bold());
        println!(
            "Max pages: {}  Max depth: {}  Downloads: {}",
            config.target.max_pages, config.target.max_depth, config.assets.concurrent_downloads
        );
        println!("Output: {}\n", config.output.directory.display());
    }

    let mut session = match open_session(&config).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(1);
        }
    };

    let options = MirrorOptions {
        config,
        show_progress_bars: !quiet && !sub_matches.get_flag("no-progress"),
    };
    match run_mirror(options, session.as_mut()).await {
        Ok(summary) => {
            let valid = mirror_is_valid(&summary);
            if valid {
                println!("\n{} Mirror complete!\n", "✓".green());
            } else {
                eprintln!("\n{} Mirror written but failed validation\n", "✗".red());
            }
            print!("{}", format_summary(&summary));
            if let Some(ref validation) = summary.validation {
                for error in &validation.errors {
                    eprintln!("  {} {}", "error:".red().bold(), error);
                }
            }
            if !valid {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{} Mirror failed: {}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}

pub fn handle_validate(sub_matches: &ArgMatches) {
    let path = sub_matches
        .get_one::<PathBuf>("PATH")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("public_html"));
    let format = sub_matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");

    let report = match validate_mirror(&path) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(1);
        }
    };

    if format == "json" {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e);
                std::process::exit(1);
            }
        }
    } else {
        print!("{}", report.render_text());
    }

    if !report.is_ok() {
        std::process::exit(1);
    }
}
