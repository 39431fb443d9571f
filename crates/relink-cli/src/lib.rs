//! `relink` command line front end
//!
//! The only part of the workspace that touches the filesystem. Documents,
//! catalogs, metadata and pattern maps are read with `tokio::fs`; the engine
//! itself stays synchronous and I/O free.

#![allow(missing_docs)]

pub mod logging;
mod repository;

pub use repository::FilePatternRepository;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use relink_engine::{
    AssetCatalog, BaseUrl, MatchOutcome, PatternReferenceMap, RelinkConfig, RelinkEngine, RelinkError, RelinkInput,
    RelinkReport,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit code when the engine refused to produce output
const EXIT_REJECTED: u8 = 2;

fn input_arg() -> Arg {
    Arg::new("input")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Block document to read")
}

fn output_arg() -> Arg {
    Arg::new("output")
        .long("output")
        .short('o')
        .value_parser(value_parser!(PathBuf))
        .help("Write the document here instead of stdout")
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

/// Command line definition
#[must_use]
pub fn build_cli() -> Command {
    Command::new("relink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relink media references in block documents")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("relink")
                .about("Point references at newly imported assets")
                .arg(input_arg())
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON object of old filename to {new_identifier, new_url}"),
                )
                .arg(
                    Arg::new("metadata")
                        .long("metadata")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON object of metadata key to string value"),
                )
                .arg(
                    Arg::new("base-url")
                        .long("base-url")
                        .help("Rebase managed-asset URLs onto this origin"),
                )
                .arg(
                    Arg::new("patterns")
                        .long("patterns")
                        .value_parser(value_parser!(PathBuf))
                        .help("Pattern map file used to remap fragment references"),
                )
                .arg(output_arg())
                .arg(
                    Arg::new("metadata-output")
                        .long("metadata-output")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write changed metadata entries here as JSON"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the relink report here as JSON"),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("List media references without changing anything")
                .arg(input_arg())
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .value_parser(value_parser!(PathBuf))
                        .help("Also show what each reference would match"),
                )
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("rebase")
                .about("Move managed-asset URLs to a new origin")
                .arg(input_arg())
                .arg(
                    Arg::new("base-url")
                        .long("base-url")
                        .required(true)
                        .help("Target origin, e.g. https://new.example"),
                )
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check that a document parses, repairing known corruption")
                .arg(input_arg())
                .arg(output_arg().help("Write the repaired document here"))
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("patterns")
                .about("Manage the fragment reference map")
                .subcommand_required(true)
                .arg(
                    Arg::new("store")
                        .long("store")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Pattern map file"),
                )
                .subcommand(
                    Command::new("import")
                        .about("Merge old to new fragment ids into the map")
                        .arg(
                            Arg::new("map")
                                .required(true)
                                .value_parser(value_parser!(PathBuf))
                                .help("JSON object of old id to new id"),
                        ),
                )
                .subcommand(Command::new("show").about("Print the map as JSON"))
                .subcommand(Command::new("clear").about("Remove every mapping")),
        )
}

/// Run the parsed command line
///
/// # Errors
/// Unreadable inputs, invalid configuration or catalogs, and engine errors
/// other than a rejected output (which maps to a non-zero exit code).
pub async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path)).await?;
    match matches.subcommand() {
        Some(("relink", args)) => relink(config, args).await,
        Some(("scan", args)) => scan(config, args).await,
        Some(("rebase", args)) => rebase(config, args).await,
        Some(("validate", args)) => validate(config, args).await,
        Some(("patterns", args)) => patterns(config, args).await,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
}

async fn load_config(path: Option<&Path>) -> Result<RelinkConfig> {
    let Some(path) = path else {
        return Ok(RelinkConfig::default());
    };
    let text = read_text(path).await?;
    let config = RelinkConfig::from_toml_str(&text).with_context(|| format!("invalid configuration {}", path.display()))?;
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

async fn relink(config: RelinkConfig, args: &ArgMatches) -> Result<ExitCode> {
    let mut engine = RelinkEngine::new(config)?;
    if let Some(store) = args.get_one::<PathBuf>("patterns") {
        engine = engine.with_patterns(Arc::new(FilePatternRepository::new(store)));
    }
    let text = read_text(required_path(args, "input")?).await?;
    let catalog = read_catalog(required_path(args, "catalog")?).await?;
    let metadata: Option<IndexMap<String, String>> = match args.get_one::<PathBuf>("metadata") {
        Some(path) => Some(read_json(path).await?),
        None => None,
    };
    let base = args
        .get_one::<String>("base-url")
        .map(String::as_str)
        .map(BaseUrl::parse)
        .transpose()?;

    let mut input = RelinkInput::new(&text, &catalog);
    if let Some(metadata) = &metadata {
        input = input.with_metadata(metadata);
    }
    if let Some(base) = &base {
        input = input.with_base_url(base);
    }

    match engine.relink(&input) {
        Ok(output) => {
            write_report(args, &output.report).await?;
            if let Some(path) = args.get_one::<PathBuf>("metadata-output") {
                write_text(path, &serde_json::to_string_pretty(&output.metadata)?).await?;
            }
            emit_document(args, &output.document).await?;
            eprint!("{}", output.report.summary());
            Ok(ExitCode::SUCCESS)
        }
        Err(RelinkError::Fatal { message, report }) => {
            write_report(args, &report).await?;
            eprint!("{}", report.summary());
            error!(%message, "document rejected; nothing written");
            Ok(ExitCode::from(EXIT_REJECTED))
        }
        Err(e) => Err(e).context("relink failed"),
    }
}

async fn scan(config: RelinkConfig, args: &ArgMatches) -> Result<ExitCode> {
    let engine = RelinkEngine::new(config)?;
    let text = read_text(required_path(args, "input")?).await?;
    let catalog = match args.get_one::<PathBuf>("catalog") {
        Some(path) => Some(read_catalog(path).await?),
        None => None,
    };
    let rows: Vec<serde_json::Value> = match &catalog {
        Some(catalog) => engine
            .preview(&text, catalog)?
            .into_iter()
            .map(|(reference, outcome)| {
                let resolution = match outcome {
                    MatchOutcome::Matched { entry, strategy, .. } => json!({
                        "strategy": strategy,
                        "new_identifier": entry.new_identifier,
                        "new_url": entry.new_url,
                    }),
                    MatchOutcome::NoMatch(reason) => json!({ "unmatched": reason.to_string() }),
                };
                json!({
                    "locator": reference.locator.to_string(),
                    "raw_value": reference.raw_value,
                    "filename": reference.extracted_filename,
                    "encoding": reference.encoding,
                    "match": resolution,
                })
            })
            .collect(),
        None => engine
            .scan(&text)?
            .into_iter()
            .map(|reference| {
                json!({
                    "locator": reference.locator.to_string(),
                    "raw_value": reference.raw_value,
                    "filename": reference.extracted_filename,
                    "encoding": reference.encoding,
                })
            })
            .collect(),
    };

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            let target = match row.get("match") {
                Some(m) if m.get("new_url").is_some() => format!(" -> {} ({})", text_of(&m["new_url"]), text_of(&m["strategy"])),
                Some(m) => format!(" -> unmatched: {}", text_of(&m["unmatched"])),
                None => String::new(),
            };
            println!("{}\t{}{target}", text_of(&row["locator"]), text_of(&row["filename"]));
        }
        eprintln!("{} reference(s)", rows.len());
    }
    Ok(ExitCode::SUCCESS)
}

async fn rebase(config: RelinkConfig, args: &ArgMatches) -> Result<ExitCode> {
    let engine = RelinkEngine::new(config)?;
    let text = read_text(required_path(args, "input")?).await?;
    let url = args.get_one::<String>("base-url").context("missing --base-url")?;
    let base = BaseUrl::parse(url)?;
    let catalog = AssetCatalog::new();

    match engine.relink(&RelinkInput::new(&text, &catalog).with_base_url(&base)) {
        Ok(output) => {
            emit_document(args, &output.document).await?;
            eprintln!("rebased {} url(s) onto {base}", output.report.domain_rewrites);
            Ok(ExitCode::SUCCESS)
        }
        Err(RelinkError::Fatal { message, .. }) => {
            error!(%message, "document rejected; nothing written");
            Ok(ExitCode::from(EXIT_REJECTED))
        }
        Err(e) => Err(e).context("rebase failed"),
    }
}

async fn validate(config: RelinkConfig, args: &ArgMatches) -> Result<ExitCode> {
    let engine = RelinkEngine::new(config)?;
    let text = read_text(required_path(args, "input")?).await?;
    let json_output = args.get_flag("json");

    match engine.validate(&text) {
        Ok(outcome) => {
            let repairs = outcome.repair_names();
            if json_output {
                let summary = json!({ "valid": true, "blocks": outcome.tree.block_count(), "repairs": repairs });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if repairs.is_empty() {
                println!("ok: {} block(s)", outcome.tree.block_count());
            } else {
                println!("repairable: {}", repairs.join(", "));
            }
            if let Some(path) = args.get_one::<PathBuf>("output") {
                write_text(path, &outcome.text).await?;
            }
            Ok(if repairs.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Err(e) => {
            if json_output {
                println!("{}", serde_json::to_string_pretty(&json!({ "valid": false, "error": e.to_string() }))?);
            } else {
                println!("invalid: {e}");
            }
            Ok(ExitCode::from(EXIT_REJECTED))
        }
    }
}

async fn patterns(config: RelinkConfig, args: &ArgMatches) -> Result<ExitCode> {
    let store = required_path(args, "store")?;
    let engine = RelinkEngine::new(config)?.with_patterns(Arc::new(FilePatternRepository::new(store)));
    match args.subcommand() {
        Some(("import", sub)) => {
            let additions: PatternReferenceMap = read_json(required_path(sub, "map")?).await?;
            let merged = engine.record_fragment_import(&additions)?;
            println!("imported {} mapping(s); {} total", additions.len(), merged.len());
        }
        Some(("show", _)) => {
            println!("{}", serde_json::to_string_pretty(&engine.fragment_map()?)?);
        }
        Some(("clear", _)) => {
            engine.clear_fragment_map()?;
            println!("pattern map cleared");
        }
        Some((other, _)) => bail!("unknown patterns command '{other}'"),
        None => bail!("no patterns command given"),
    }
    Ok(ExitCode::SUCCESS)
}

fn text_of(value: &serde_json::Value) -> &str {
    value.as_str().unwrap_or_default()
}

fn required_path<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a Path> {
    args.get_one::<PathBuf>(name)
        .map(PathBuf::as_path)
        .with_context(|| format!("missing argument '{name}'"))
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_text(path).await?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

async fn read_catalog(path: &Path) -> Result<AssetCatalog> {
    let text = read_text(path).await?;
    AssetCatalog::from_json_str(&text).with_context(|| format!("invalid catalog {}", path.display()))
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn emit_document(args: &ArgMatches, document: &str) -> Result<()> {
    match args.get_one::<PathBuf>("output") {
        Some(path) => write_text(path, document).await,
        None => {
            print!("{document}");
            Ok(())
        }
    }
}

async fn write_report(args: &ArgMatches, report: &RelinkReport) -> Result<()> {
    if let Some(path) = args.get_one::<PathBuf>("report") {
        write_text(path, &serde_json::to_string_pretty(report)?).await?;
    }
    Ok(())
}
