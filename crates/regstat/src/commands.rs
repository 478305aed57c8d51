use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use regstat_core::{
    Assignment, CategoryId, Dimension, FilterConfiguration, MappingPair, TripletMapping,
    WildcardMapping,
};
use regstat_engine::{Engine, OptionScope};

use crate::cli::{
    CurateArgs, HierarchyArgs, ListMappingsArgs, MappingCommand, OptionsArgs, PairArgs, QueryArgs,
    SetTripletArgs, SetWildcardArgs, ShowMappingArgs,
};
use crate::output::{
    hierarchy_entries, write_compiled_sql, write_hierarchy, write_mapping_statuses, write_options,
    write_query_result,
};

pub fn run_query(engine: &Engine, args: &QueryArgs, out: &mut dyn Write) -> Result<()> {
    let config = read_filter(&args.filter)?;

    if args.sql {
        let compiled = engine.compile(&config).context("failed to compile query")?;
        write_compiled_sql(&compiled, out).context("failed to write compiled SQL")?;
        return Ok(());
    }

    let result = engine.run_query(&config).context("query failed")?;
    write_query_result(&result, args.output, out).context("failed to write query result")?;
    Ok(())
}

pub fn run_hierarchy(engine: &Engine, args: &HierarchyArgs, out: &mut dyn Write) -> Result<()> {
    let make = args
        .make
        .as_deref()
        .map(|make| engine.resolve(Dimension::Make, make))
        .transpose()
        .context("failed to resolve --make")?;

    let hierarchy = engine
        .hierarchy()
        .context("failed to build canonical hierarchy")?;
    let ids = engine.id_snapshot().context("failed to load category ids")?;
    let entries = hierarchy_entries(&hierarchy, &ids, make);
    write_hierarchy(&entries, args.output, out).context("failed to write hierarchy")?;
    Ok(())
}

pub fn run_options(engine: &Engine, args: &OptionsArgs, out: &mut dyn Write) -> Result<()> {
    let scope = OptionScope {
        curated_only: args.curated_only,
        make: args.make.clone(),
        model: args.model.clone(),
    };
    let options = engine
        .options(args.dimension, &scope)
        .with_context(|| format!("failed to list {} options", args.dimension.as_str()))?;
    write_options(&options, args.output, out).context("failed to write options")?;
    Ok(())
}

pub fn run_curate(engine: &Engine, args: &CurateArgs, out: &mut dyn Write) -> Result<()> {
    let record = engine
        .set_year_curated(args.year, !args.uncurated)
        .with_context(|| format!("failed to update curation of year {}", args.year))?;
    writeln!(out, "year {} curated={}", record.year, record.curated)?;
    Ok(())
}

pub fn run_mapping(engine: &Engine, command: &MappingCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        MappingCommand::Show(args) => show_mapping(engine, args, out),
        MappingCommand::List(args) => list_mappings(engine, args, out),
        MappingCommand::SetWildcard(args) => set_wildcard(engine, args, out),
        MappingCommand::SetTriplet(args) => set_triplet(engine, args, out),
        MappingCommand::Delete(args) => {
            let pair = resolve_pair(engine, args)?;
            let removed = engine
                .delete_mapping(pair)
                .context("failed to delete mapping")?;
            writeln!(
                out,
                "{} {}/{}",
                if removed { "deleted" } else { "no mapping for" },
                args.make,
                args.model
            )?;
            Ok(())
        }
    }
}

fn show_mapping(engine: &Engine, args: &ShowMappingArgs, out: &mut dyn Write) -> Result<()> {
    let pair = resolve_pair(engine, &args.pair)?;
    let status = engine
        .mapping_status(pair)
        .context("failed to load mapping")?;
    let ids = engine.id_snapshot().context("failed to load category ids")?;
    write_mapping_statuses(&[status], &ids, args.output, out).context("failed to write mapping")?;
    Ok(())
}

fn list_mappings(engine: &Engine, args: &ListMappingsArgs, out: &mut dyn Write) -> Result<()> {
    let vehicle_type = args
        .vehicle_type
        .as_deref()
        .map(|code| engine.resolve(Dimension::VehicleType, code))
        .transpose()
        .context("failed to resolve --vehicle-type")?;
    let statuses = engine
        .list_mappings(vehicle_type)
        .context("failed to list mappings")?;
    let ids = engine.id_snapshot().context("failed to load category ids")?;
    write_mapping_statuses(&statuses, &ids, args.output, out)
        .context("failed to write mappings")?;
    Ok(())
}

fn set_wildcard(engine: &Engine, args: &SetWildcardArgs, out: &mut dyn Write) -> Result<()> {
    let mapping = WildcardMapping {
        pair: resolve_pair(engine, &args.pair)?,
        canonical_make: engine
            .resolve(Dimension::Make, &args.canonical_make)
            .context("failed to resolve --canonical-make")?,
        canonical_model: engine
            .resolve(Dimension::Model, &args.canonical_model)
            .context("failed to resolve --canonical-model")?,
        vehicle_type: parse_assignment(engine, Dimension::VehicleType, &args.vehicle_type)?,
    };
    let status = engine
        .upsert_wildcard(&mapping)
        .context("failed to save wildcard mapping")?;
    writeln!(
        out,
        "mapped {}/{} status={}",
        args.pair.make,
        args.pair.model,
        status.status.as_str()
    )?;
    Ok(())
}

fn set_triplet(engine: &Engine, args: &SetTripletArgs, out: &mut dyn Write) -> Result<()> {
    let triplet = TripletMapping {
        pair: resolve_pair(engine, &args.pair)?,
        model_year: engine
            .resolve(Dimension::ModelYear, &args.model_year)
            .context("failed to resolve --model-year")?,
        fuel_type: parse_assignment(engine, Dimension::FuelType, &args.fuel_type)?,
    };
    let status = engine
        .upsert_triplet(&triplet)
        .context("failed to save model-year mapping")?;
    writeln!(
        out,
        "mapped {}/{} model year {} status={}",
        args.pair.make,
        args.pair.model,
        args.model_year,
        status.status.as_str()
    )?;
    Ok(())
}

fn resolve_pair(engine: &Engine, args: &PairArgs) -> Result<MappingPair> {
    Ok(MappingPair::new(
        engine
            .resolve(Dimension::Make, &args.make)
            .context("failed to resolve --make")?,
        engine
            .resolve(Dimension::Model, &args.model)
            .context("failed to resolve --model")?,
    ))
}

/// `unreviewed` and `unknown` are review states; anything else is a code.
fn parse_assignment(
    engine: &Engine,
    dimension: Dimension,
    value: &str,
) -> Result<Assignment<CategoryId>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "unreviewed" => Ok(Assignment::Unreviewed),
        "unknown" => Ok(Assignment::Unknown),
        _ => {
            let id = engine
                .resolve(dimension, value)
                .with_context(|| format!("failed to resolve {} '{value}'", dimension.as_str()))?;
            Ok(Assignment::Assigned(id))
        }
    }
}

/// Inline JSON, or `@path` naming a JSON file.
fn read_filter(raw: &str) -> Result<FilterConfiguration> {
    let json = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read filter file {path}"))?,
        None => raw.to_owned(),
    };
    serde_json::from_str(&json).context("failed to parse filter configuration JSON")
}

#[cfg(test)]
mod tests {
    use regstat_store::RegistrationRecord;
    use tempfile::tempdir;

    use super::*;
    use crate::cli::OutputFormat;

    fn engine_with_fleet(workspace: &std::path::Path) -> Engine {
        let engine = Engine::open(workspace).expect("open engine");
        let row = |year: i32, make: &str| RegistrationRecord {
            year,
            make: Some(make.to_owned()),
            model: Some("LFS".to_owned()),
            model_year: Some("2010".to_owned()),
            fuel_type: Some("DIESEL".to_owned()),
            vehicle_type: Some("BUS".to_owned()),
            ..RegistrationRecord::default()
        };
        engine
            .record_batch(&[row(2010, "NOVA"), row(2011, "NOVA"), row(2011, "NOVABUS")])
            .expect("record batch");
        engine.set_year_curated(2010, true).expect("curate 2010");
        engine.set_year_curated(2011, false).expect("uncurate 2011");
        engine
    }

    fn render(run: impl FnOnce(&mut dyn Write) -> Result<()>) -> String {
        let mut out = Vec::new();
        run(&mut out).expect("run command");
        String::from_utf8(out).expect("utf8 output")
    }

    fn pair(make: &str) -> PairArgs {
        PairArgs {
            make: make.to_owned(),
            model: "LFS".to_owned(),
        }
    }

    #[test]
    fn query_reads_filter_from_file_and_prints_table() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());
        let filter_path = temp.path().join("filter.json");
        fs::write(
            &filter_path,
            r#"{"selections": {"make": ["NOVA"]}, "metric": {"kind": "count"}}"#,
        )
        .expect("write filter");

        let args = QueryArgs {
            filter: format!("@{}", filter_path.display()),
            output: OutputFormat::Table,
            sql: false,
        };
        let rendered = render(|out| run_query(&engine, &args, out));

        assert!(rendered.contains("year\tvalue"));
        assert!(rendered.contains("2010\t1"));
        assert!(rendered.contains("2011\t1"));
    }

    #[test]
    fn query_sql_flag_prints_compiled_statement() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());
        let args = QueryArgs {
            filter: r#"{"selections": {"make": ["NOVA"]}, "metric": {"kind": "count"}, "regularization_enabled": true}"#
                .to_owned(),
            output: OutputFormat::Table,
            sql: true,
        };

        let rendered = render(|out| run_query(&engine, &args, out));
        assert!(rendered.starts_with("-- primary"));
        assert!(rendered.contains("wildcard_mappings"));
        assert!(!rendered.contains("-- baseline"));
    }

    #[test]
    fn malformed_filter_is_reported() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());
        let args = QueryArgs {
            filter: "{not json".to_owned(),
            output: OutputFormat::Json,
            sql: false,
        };

        let mut out = Vec::new();
        let err = run_query(&engine, &args, &mut out).expect_err("bad json must fail");
        assert!(format!("{err:#}").contains("filter configuration JSON"));
    }

    #[test]
    fn mapping_commands_set_show_and_delete() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());

        let set = SetWildcardArgs {
            pair: pair("NOVABUS"),
            canonical_make: "NOVA".to_owned(),
            canonical_model: "LFS".to_owned(),
            vehicle_type: "bus".to_owned(),
        };
        let rendered = render(|out| run_mapping(&engine, &MappingCommand::SetWildcard(set), out));
        assert_eq!(rendered.trim(), "mapped NOVABUS/LFS status=needs_review");

        let triplet = SetTripletArgs {
            pair: pair("NOVABUS"),
            model_year: "2010".to_owned(),
            fuel_type: "unknown".to_owned(),
        };
        let rendered =
            render(|out| run_mapping(&engine, &MappingCommand::SetTriplet(triplet), out));
        assert!(rendered.trim().ends_with("status=complete"));

        let list = ListMappingsArgs {
            vehicle_type: Some("BUS".to_owned()),
            output: OutputFormat::Table,
        };
        let rendered = render(|out| run_mapping(&engine, &MappingCommand::List(list), out));
        assert!(rendered.contains("NOVABUS\tLFS\tNOVA\tLFS\tBUS\t1/1\tcomplete"));

        let rendered =
            render(|out| run_mapping(&engine, &MappingCommand::Delete(pair("NOVABUS")), out));
        assert_eq!(rendered.trim(), "deleted NOVABUS/LFS");

        let show = ShowMappingArgs {
            pair: pair("NOVABUS"),
            output: OutputFormat::Table,
        };
        let rendered = render(|out| run_mapping(&engine, &MappingCommand::Show(show), out));
        assert!(rendered.contains("\t-\t-\t-\t0/0\tunassigned"));
    }

    #[test]
    fn options_and_curate_commands() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());

        let options = OptionsArgs {
            dimension: Dimension::Make,
            curated_only: true,
            make: None,
            model: None,
            output: OutputFormat::Table,
        };
        let rendered = render(|out| run_options(&engine, &options, out));
        assert!(rendered.contains("\tNOVA\tNOVA\ttrue"));
        assert!(!rendered.contains("NOVABUS"));

        let curate = CurateArgs {
            year: 2011,
            uncurated: false,
        };
        let rendered = render(|out| run_curate(&engine, &curate, out));
        assert_eq!(rendered.trim(), "year 2011 curated=true");

        let rendered = render(|out| run_options(&engine, &options, out));
        assert!(rendered.contains("\tNOVABUS\tNOVABUS\ttrue"));
    }

    #[test]
    fn hierarchy_command_rejects_unknown_make() {
        let temp = tempdir().expect("tempdir");
        let engine = engine_with_fleet(temp.path());
        let args = HierarchyArgs {
            make: Some("TESLA".to_owned()),
            output: OutputFormat::Table,
        };

        let mut out = Vec::new();
        assert!(run_hierarchy(&engine, &args, &mut out).is_err());

        let args = HierarchyArgs {
            make: None,
            output: OutputFormat::Table,
        };
        let rendered = render(|out| run_hierarchy(&engine, &args, out));
        assert!(rendered.contains("NOVA\tLFS\t2010\tDIESEL\tBUS\t1"));
    }
}
