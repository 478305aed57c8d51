use std::collections::BTreeSet;

use regstat_core::FilterConfiguration;

use crate::compiler::CompiledQuery;
use crate::ids::IdSnapshot;

pub const REGULARIZED_MARKER: &str = " [regularized]";

/// Human-readable description of a series, e.g.
/// `Count | Make=HONDA | curated years only | normalized [regularized]`.
///
/// The marker follows what the compiled query does, not the raw toggle, so
/// two series with different semantics never share a legend.
pub fn describe(config: &FilterConfiguration, compiled: &CompiledQuery, ids: &IdSnapshot) -> String {
    let mut parts = vec![config.metric().kind.label()];

    for (dimension, values) in config.selections() {
        let shown = values
            .iter()
            .map(|value| match ids.resolve(dimension, value) {
                Some(id) => ids.display_name(dimension, id),
                None => value.clone(),
            })
            .collect::<Vec<_>>()
            .join(",");
        parts.push(format!("{}={shown}", dimension.label()));
    }

    if !config.years().is_empty() {
        parts.push(format!("years={}", year_ranges(config.years())));
    }
    if config.curated_years_only() {
        parts.push("curated years only".to_owned());
    }
    if config.metric().normalize_to_first {
        parts.push("normalized".to_owned());
    }
    if config.metric().cumulative {
        parts.push("cumulative".to_owned());
    }

    let mut legend = parts.join(" | ");
    if compiled.regularization_applied {
        legend.push_str(REGULARIZED_MARKER);
    }
    legend
}

/// `2010-2012,2015` style rendering of a year set.
fn year_ranges(years: &BTreeSet<i32>) -> String {
    let mut ranges: Vec<(i32, i32)> = Vec::new();
    for year in years {
        if let Some((_, end)) = ranges.last_mut() {
            if *end + 1 == *year {
                *end = *year;
                continue;
            }
        }
        ranges.push((*year, *year));
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use regstat_core::{CanonicalEntity, CategoryId, Dimension, MetricSpec};

    use super::*;
    use crate::cache::Versioned;
    use crate::compiler::QueryCompiler;

    fn ids() -> Versioned<IdSnapshot> {
        Versioned::new(
            1,
            IdSnapshot::from_parts(
                vec![CanonicalEntity {
                    kind: Dimension::Make,
                    id: CategoryId(1),
                    code: "HONDA".to_owned(),
                    display_name: "Honda".to_owned(),
                }],
                Vec::new(),
            ),
        )
    }

    #[test]
    fn marker_follows_applied_regularization_not_the_toggle() {
        let ids = ids();
        let compiler = QueryCompiler::new(1_000.0);

        let regularized = FilterConfiguration::builder(MetricSpec::count())
            .select(Dimension::Make, ["HONDA"])
            .regularization(true)
            .build()
            .expect("config");
        let raw = r#"{
            "selections": {"make": ["HONDA"]},
            "metric": {"kind": "count"},
            "regularization_enabled": true,
            "curated_years_only": true
        }"#;
        let curated: FilterConfiguration = serde_json::from_str(raw).expect("parse config");

        let with_marker = describe(
            &regularized,
            &compiler.compile(&regularized, &ids).expect("compile"),
            &ids,
        );
        let without_marker = describe(
            &curated,
            &compiler.compile(&curated, &ids).expect("compile"),
            &ids,
        );

        assert_eq!(with_marker, "Count | Make=Honda [regularized]");
        assert_eq!(without_marker, "Count | Make=Honda | curated years only");
    }

    #[test]
    fn lists_years_and_transforms() {
        let ids = ids();
        let config = FilterConfiguration::builder(MetricSpec::count().with_normalization().with_cumulative())
            .years([2010, 2011, 2012, 2015])
            .build()
            .expect("config");
        let compiled = QueryCompiler::new(1_000.0)
            .compile(&config, &ids)
            .expect("compile");

        assert_eq!(
            describe(&config, &compiled, &ids),
            "Count | years=2010-2012,2015 | normalized | cumulative"
        );
    }
}
