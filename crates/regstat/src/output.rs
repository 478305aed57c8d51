use std::io::Write;

use regstat_core::{Assignment, CategoryId, Dimension, FuelSlot, PointValue};
use regstat_engine::{
    CanonicalHierarchy, CategoryOption, CompiledQuery, IdSnapshot, MappingStatus, QueryResult,
};
use regstat_store::SqlQuery;
use serde::Serialize;

use crate::cli::OutputFormat;

/// One Make > Model > ModelYear leaf, flattened for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HierarchyEntry {
    pub make: String,
    pub model: String,
    pub model_year: String,
    pub fuel_types: Vec<String>,
    pub vehicle_types: Vec<String>,
    pub rows: i64,
}

pub fn hierarchy_entries(
    hierarchy: &CanonicalHierarchy,
    ids: &IdSnapshot,
    make: Option<CategoryId>,
) -> Vec<HierarchyEntry> {
    let mut entries = Vec::new();
    let makes = hierarchy
        .makes()
        .iter()
        .filter(|(id, _)| make.is_none_or(|wanted| wanted == **id));

    for (make_id, make_node) in makes {
        for (model_id, model_node) in &make_node.models {
            for (model_year_id, node) in &model_node.model_years {
                entries.push(HierarchyEntry {
                    make: code(ids, Dimension::Make, *make_id),
                    model: code(ids, Dimension::Model, *model_id),
                    model_year: code(ids, Dimension::ModelYear, *model_year_id),
                    fuel_types: node
                        .fuel_types
                        .iter()
                        .map(|slot| match slot {
                            FuelSlot::Known(id) => code(ids, Dimension::FuelType, *id),
                            FuelSlot::Unassigned => "unassigned".to_owned(),
                        })
                        .collect(),
                    vehicle_types: node
                        .vehicle_types
                        .iter()
                        .map(|id| code(ids, Dimension::VehicleType, *id))
                        .collect(),
                    rows: node.rows,
                });
            }
        }
    }

    entries
}

pub fn write_query_result(
    result: &QueryResult,
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(result, out);
    }

    writeln!(out, "# {}", normalize_field(&result.legend))?;
    for unresolved in &result.unresolved {
        writeln!(
            out,
            "# unresolved {}={}",
            unresolved.dimension.as_str(),
            normalize_field(&unresolved.value)
        )?;
    }
    if result.flags.normalization_skipped {
        writeln!(out, "# normalization skipped: first value was undefined or not positive")?;
    }

    writeln!(out, "year\tvalue")?;
    for point in &result.points {
        writeln!(out, "{}\t{}", point.year, format_value(point.value))?;
    }
    Ok(())
}

pub fn write_compiled_sql(compiled: &CompiledQuery, out: &mut dyn Write) -> std::io::Result<()> {
    write_sql("primary", &compiled.primary, out)?;
    if let Some(baseline) = &compiled.baseline {
        write_sql("baseline", baseline, out)?;
    }
    Ok(())
}

fn write_sql(name: &str, query: &SqlQuery, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "-- {name}")?;
    writeln!(out, "{}", query.sql.trim())?;
    for (index, bind) in query.binds.iter().enumerate() {
        writeln!(out, "-- ?{} = {bind:?}", index + 1)?;
    }
    Ok(())
}

pub fn write_options(
    options: &[CategoryOption],
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(options, out);
    }

    writeln!(out, "id\tcode\tdisplay_name\tcurated")?;
    for option in options {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            option.id,
            normalize_field(&option.code),
            normalize_field(&option.display_name),
            option.curated
        )?;
    }
    Ok(())
}

pub fn write_hierarchy(
    entries: &[HierarchyEntry],
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(entries, out);
    }

    writeln!(out, "make\tmodel\tmodel_year\tfuel_types\tvehicle_types\trows")?;
    for entry in entries {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            normalize_field(&entry.make),
            normalize_field(&entry.model),
            normalize_field(&entry.model_year),
            normalize_field(&entry.fuel_types.join(",")),
            normalize_field(&entry.vehicle_types.join(",")),
            entry.rows
        )?;
    }
    Ok(())
}

pub fn write_mapping_statuses(
    statuses: &[MappingStatus],
    ids: &IdSnapshot,
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    if format == OutputFormat::Json {
        return write_json(statuses, out);
    }

    writeln!(
        out,
        "make\tmodel\tcanonical_make\tcanonical_model\tvehicle_type\tmodel_years\tstatus"
    )?;
    for status in statuses {
        let (canonical_make, canonical_model, vehicle_type) = match &status.wildcard {
            Some(wildcard) => (
                code(ids, Dimension::Make, wildcard.canonical_make),
                code(ids, Dimension::Model, wildcard.canonical_model),
                assignment(ids, Dimension::VehicleType, &wildcard.vehicle_type),
            ),
            None => ("-".to_owned(), "-".to_owned(), "-".to_owned()),
        };
        let reviewed = status
            .triplets
            .iter()
            .filter(|triplet| status.expected_model_years.contains(&triplet.model_year))
            .filter(|triplet| triplet.fuel_type.is_reviewed())
            .count();

        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}/{}\t{}",
            normalize_field(&code(ids, Dimension::Make, status.pair.make)),
            normalize_field(&code(ids, Dimension::Model, status.pair.model)),
            normalize_field(&canonical_make),
            normalize_field(&canonical_model),
            normalize_field(&vehicle_type),
            reviewed,
            status.expected_model_years.len(),
            status.status.as_str()
        )?;
    }
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(value: &T, out: &mut dyn Write) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)
}

fn format_value(value: PointValue) -> String {
    match value {
        PointValue::Measured(value) => value.to_string(),
        PointValue::Undefined => "undefined".to_owned(),
    }
}

fn assignment(ids: &IdSnapshot, dimension: Dimension, value: &Assignment<CategoryId>) -> String {
    match value {
        Assignment::Assigned(id) => code(ids, dimension, *id),
        other => other.state_str().to_owned(),
    }
}

fn code(ids: &IdSnapshot, dimension: Dimension, id: CategoryId) -> String {
    ids.code(dimension, id)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("#{id}"))
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
