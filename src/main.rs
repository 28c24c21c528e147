use std::path::PathBuf;

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info};

use mdict_bundler::{convert, ConvertConfig, IdentityOverrides, MddSource};

/// Convert an MDict dictionary into a macOS `.dictionary` bundle.
#[derive(Parser, Debug)]
#[command(name = "mdict-bundler", version, about, arg_required_else_help = true)]
struct Cli {
    /// The .mdx file to convert.
    input: PathBuf,

    /// Bundle name (CFBundleName). Defaults to the input file stem.
    #[arg(long)]
    name: Option<String>,

    /// Name shown in Dictionary.app. Defaults to the dictionary title.
    #[arg(long)]
    display_name: Option<String>,

    /// Bundle identifier, e.g. com.example.mydict.
    #[arg(long)]
    identifier: Option<String>,

    #[arg(long)]
    bundle_version: Option<String>,

    #[arg(long)]
    copyright: Option<String>,

    #[arg(long)]
    manufacturer: Option<String>,

    /// Destination bundle. Defaults to <stem>.dictionary next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Resource volume to include (repeatable). Defaults to sibling .mdd files.
    #[arg(long = "mdd", value_name = "FILE", conflicts_with = "no_mdd")]
    mdd: Vec<PathBuf>,

    /// Ignore .mdd resource volumes.
    #[arg(long)]
    no_mdd: bool,

    /// Registration code (hex) and user email for encrypted dictionaries.
    #[arg(long, value_name = "REGCODE,EMAIL", value_parser = parse_passcode)]
    passcode: Option<(String, String)>,

    /// Override the text encoding declared in the header (v1/v2 only).
    #[arg(long)]
    encoding: Option<String>,

    /// Do not expand the header stylesheet into entries.
    #[arg(long)]
    no_styles: bool,

    /// Worker threads for record decoding. Defaults to available parallelism.
    #[arg(long, env = "MDICT_BUNDLER_WORKERS")]
    workers: Option<usize>,

    /// Decoded record blocks kept in memory. Defaults to twice the worker count.
    #[arg(long, env = "MDICT_BUNDLER_CACHE_BLOCKS")]
    cache_blocks: Option<usize>,

    /// Replace existing output.
    #[arg(long)]
    force: bool,

    /// Also write a Dictionary Development Kit project to this directory.
    #[arg(long, value_name = "DIR")]
    ddk_project: Option<PathBuf>,
}

fn parse_passcode(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(',') {
        Some((code, email)) if !code.trim().is_empty() => {
            Ok((code.trim().to_string(), email.trim().to_string()))
        }
        _ => Err("expected <REGCODE_HEX>,<EMAIL>".to_string()),
    }
}

impl Cli {
    fn into_config(self) -> ConvertConfig {
        let mdd = if self.no_mdd {
            MddSource::Disabled
        } else if self.mdd.is_empty() {
            MddSource::Siblings
        } else {
            MddSource::Explicit(self.mdd)
        };

        let mut config = ConvertConfig::new(self.input)
            .with_mdd(mdd)
            .with_overwrite(self.force)
            .with_identity(IdentityOverrides {
                name: self.name,
                display_name: self.display_name,
                identifier: self.identifier,
                version: self.bundle_version,
                copyright: self.copyright,
                manufacturer: self.manufacturer,
            });
        if let Some(output) = self.output {
            config = config.with_output(output);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(dir) = self.ddk_project {
            config = config.with_ddk_project(dir);
        }
        config.passcode = self.passcode;
        config.encoding = self.encoding;
        config.substitute_styles = !self.no_styles;
        config.cache_blocks = self.cache_blocks;
        config
    }
}

fn init_logger() {
    // RUST_LOG wins; default level is info.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();
    let config = Cli::parse().into_config();

    match convert(&config) {
        Ok(report) => {
            info!(
                "Done: {} entries, {} index slots, {} resources, {} warnings",
                report.entries,
                report.index_slots,
                report.resources,
                report.anomalies.len()
            );
            println!("{}", report.output.display());
            if let Some(project) = &report.ddk_project {
                println!("{}", project.display());
            }
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn passcode_needs_both_parts() {
        assert_eq!(
            parse_passcode("0a1b,me@example.com").unwrap(),
            ("0a1b".to_string(), "me@example.com".to_string())
        );
        assert!(parse_passcode("0a1b").is_err());
    }

    #[test]
    fn mdd_flags_select_source() {
        let cli = Cli::parse_from(["mdict-bundler", "d.mdx", "--no-mdd", "--force"]);
        let config = cli.into_config();
        assert_eq!(config.mdd, MddSource::Disabled);
        assert!(config.overwrite);

        let cli = Cli::parse_from(["mdict-bundler", "d.mdx", "--mdd", "a.mdd", "--mdd", "b.mdd"]);
        assert_eq!(
            cli.into_config().mdd,
            MddSource::Explicit(vec![PathBuf::from("a.mdd"), PathBuf::from("b.mdd")])
        );
    }
}
