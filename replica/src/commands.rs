use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("replica")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("replica")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and lower logging to warnings")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Log per-link and per-asset detail")
                .required(false)
                .global(true)
                .conflicts_with("quiet"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("mirror")
                .about(
                    "Clone a live website into a static, self-hosted mirror with relocated \
                assets and rewritten references.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("Base URL of the site to mirror (overrides target.base_url)")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Output directory (default: public_html)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("JSON configuration file; flags override its values"),
                )
                .arg(
                    arg!(--"username" <USERNAME>)
                        .required(false)
                        .help("Username for the site's login form")
                        .requires("password"),
                )
                .arg(
                    arg!(--"password" <PASSWORD>)
                        .required(false)
                        .help("Password for the site's login form")
                        .requires("username"),
                )
                .arg(
                    arg!(--"max-pages" <NUM>)
                        .required(false)
                        .help("Ceiling on the number of discovered pages")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-depth" <NUM>)
                        .required(false)
                        .help("Maximum link distance from the base URL")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Navigation timeout in seconds")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-t --"concurrency" <NUM_WORKERS>)
                        .required(false)
                        .help("Number of concurrent asset downloads")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"engine" <ENGINE>)
                        .required(false)
                        .help("Rendering engine: http (static fetch) or chromium (headless browser)")
                        .value_parser(["http", "chromium"]),
                )
                .arg(
                    arg!(--"no-progress")
                        .required(false)
                        .help("Disable the progress spinner")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("validate")
                .about("Check a finished mirror for missing assets and structural problems")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Mirror directory to validate")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .default_value("public_html"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
}
