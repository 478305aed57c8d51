use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use regstat_config::LogFormat;
use regstat_core::Dimension;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct QueryArgs {
    #[arg(
        long,
        help = "Filter configuration as JSON, or @path to read it from a file"
    )]
    pub filter: String,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,

    #[arg(long, help = "Print the compiled SQL and binds instead of running the query")]
    pub sql: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct HierarchyArgs {
    #[arg(long, value_name = "CODE", help = "Only show one canonical make")]
    pub make: Option<String>,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct OptionsArgs {
    #[arg(
        value_parser = parse_dimension,
        help = "Dimension: make, model, model_year, fuel_type or vehicle_type"
    )]
    pub dimension: Dimension,

    #[arg(long, help = "Only offer values present in curated years")]
    pub curated_only: bool,

    #[arg(long, value_name = "CODE", help = "Scope to one make")]
    pub make: Option<String>,

    #[arg(long, value_name = "CODE", help = "Scope to one model")]
    pub model: Option<String>,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CurateArgs {
    #[arg(help = "Registration year")]
    pub year: i32,

    #[arg(long, help = "Mark the year uncurated instead")]
    pub uncurated: bool,
}

/// An uncurated (make, model) pair given by code or display name.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct PairArgs {
    #[arg(long, help = "Uncurated make")]
    pub make: String,

    #[arg(long, help = "Uncurated model")]
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ShowMappingArgs {
    #[command(flatten)]
    pub pair: PairArgs,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ListMappingsArgs {
    #[arg(
        long,
        value_name = "CODE",
        help = "Only mappings whose own vehicle type is this one"
    )]
    pub vehicle_type: Option<String>,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SetWildcardArgs {
    #[command(flatten)]
    pub pair: PairArgs,

    #[arg(long, help = "Canonical make the pair stands for")]
    pub canonical_make: String,

    #[arg(long, help = "Canonical model the pair stands for")]
    pub canonical_model: String,

    #[arg(
        long,
        default_value = "unreviewed",
        help = "Vehicle type code, or 'unreviewed' / 'unknown'"
    )]
    pub vehicle_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SetTripletArgs {
    #[command(flatten)]
    pub pair: PairArgs,

    #[arg(long, help = "Model year of the canonical model")]
    pub model_year: String,

    #[arg(
        long,
        default_value = "unreviewed",
        help = "Fuel type code, or 'unreviewed' / 'unknown'"
    )]
    pub fuel_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum MappingCommand {
    /// Show a pair's mappings and completeness
    Show(ShowMappingArgs),
    /// List mapped pairs with their completeness
    List(ListMappingsArgs),
    /// Map an uncurated pair to a canonical make and model
    SetWildcard(SetWildcardArgs),
    /// Record the fuel type of one model year of a mapped pair
    SetTriplet(SetTripletArgs),
    /// Remove a pair's mapping and all of its model-year entries
    Delete(PairArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Create .regstat/config.toml and the database
    Init,
    /// Run a time-series query
    Query(QueryArgs),
    /// Print the canonical Make > Model > ModelYear hierarchy
    Hierarchy(HierarchyArgs),
    /// List dropdown values for a dimension
    Options(OptionsArgs),
    /// Mark a registration year as curated or uncurated
    Curate(CurateArgs),
    /// Inspect and edit regularization mappings
    #[command(subcommand)]
    Mapping(MappingCommand),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Vehicle registration statistics engine")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .regstat/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        value_parser = parse_log_format,
        help = "Log format: human or json (defaults to [logging].format)"
    )]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_dimension(value: &str) -> Result<Dimension, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "regstat",
            "query",
            "--filter",
            "{}",
            "--output",
            "json",
            "--workspace",
            "/tmp/ws",
            "--log-format",
            "json",
        ])
        .expect("parse cli");

        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        match cli.command {
            Commands::Query(args) => {
                assert_eq!(args.output, OutputFormat::Json);
                assert!(!args.sql);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_mapping_subcommands() {
        let cli = Cli::try_parse_from([
            "regstat",
            "mapping",
            "set-wildcard",
            "--make",
            "NOVABUS",
            "--model",
            "LFS",
            "--canonical-make",
            "NOVA",
            "--canonical-model",
            "LFS",
        ])
        .expect("parse cli");

        match cli.command {
            Commands::Mapping(MappingCommand::SetWildcard(args)) => {
                assert_eq!(args.pair.make, "NOVABUS");
                assert_eq!(args.vehicle_type, "unreviewed");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn options_dimension_accepts_hyphenated_names() {
        let cli = Cli::try_parse_from(["regstat", "options", "vehicle-type", "--curated-only"])
            .expect("parse cli");

        match cli.command {
            Commands::Options(args) => {
                assert_eq!(args.dimension, Dimension::VehicleType);
                assert!(args.curated_only);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_output_format() {
        let parsed = Cli::try_parse_from(["regstat", "hierarchy", "--output", "csv"]);
        assert!(parsed.is_err());
        assert!("csv".parse::<OutputFormat>().is_err());
    }
}
