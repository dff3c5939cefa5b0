use clap::{value_parser, Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use anyhow::Context;
use boundary_normalizer::{process_file, FlattenDepth, Options, OutputFormat, Report};

fn main() {
    let matches = Command::new("Boundary Normalizer")
        .version("1.0")
        .author("Jesper Fjellin")
        .about("Flattens nested feature collections in a GeoJSON boundary file and rewrites feature identifiers")
        .arg(
            Arg::new("file")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("GeoJSON file to normalize (overwritten unless --output is given)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("Write the result here instead of back to the input file"),
        )
        .arg(
            Arg::new("recursive")
                .long("recursive")
                .action(ArgAction::SetTrue)
                .help("Unwrap feature collections nested at any depth"),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .action(ArgAction::SetTrue)
                .help("Pretty-print the written document"),
        )
        .arg(
            Arg::new("validate")
                .long("validate")
                .action(ArgAction::SetTrue)
                .help("Check every output feature is valid GeoJSON before writing"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Process the file without writing anything"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Verbosity (-v, -vv, -vvv)"),
        )
        .get_matches();

    setup_logging(matches.get_count("verbose"));

    let Some(file) = matches.get_one::<PathBuf>("file").cloned() else {
        eprintln!("Error: no input file given");
        std::process::exit(1);
    };

    let options = Options {
        output: matches.get_one::<PathBuf>("output").cloned(),
        depth: if matches.get_flag("recursive") {
            FlattenDepth::Recursive
        } else {
            FlattenDepth::Single
        },
        format: if matches.get_flag("pretty") {
            OutputFormat::Pretty
        } else {
            OutputFormat::Compact
        },
        validate: matches.get_flag("validate"),
        dry_run: matches.get_flag("dry-run"),
    };

    if !file.exists() {
        eprintln!("Error: File not found: {}", file.display());
        std::process::exit(1);
    }

    match run(&file, &options) {
        Ok(report) => println!("Processing completed successfully: {report}"),
        Err(e) => {
            eprintln!("Error processing file: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(file: &Path, options: &Options) -> anyhow::Result<Report> {
    process_file(file, options).with_context(|| format!("normalizing {}", file.display()))
}

fn setup_logging(verbosity: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
