use std::collections::BTreeSet;

use regstat_core::{Assignment, CategoryId, MappingPair, TripletMapping, WildcardMapping};
use rusqlite::{OptionalExtension, Row, params};

use crate::{SqliteStore, StoreError, bump_data_version};

/// Persistent many-to-one mapping from uncurated (make, model) pairs to
/// canonical entities.
pub trait RegularizationStore {
    fn get_mapping(&self, pair: MappingPair) -> Result<Option<WildcardMapping>, StoreError>;
    fn get_triplet(
        &self,
        pair: MappingPair,
        model_year: CategoryId,
    ) -> Result<Option<TripletMapping>, StoreError>;
    fn list_triplets(&self, pair: MappingPair) -> Result<Vec<TripletMapping>, StoreError>;

    /// Inserts or replaces the wildcard mapping of a pair. When the canonical
    /// (make, model) changes, triplets for model years outside
    /// `target_model_years` are removed in the same transaction. Returns the
    /// number of triplets removed.
    fn upsert_wildcard(
        &self,
        mapping: &WildcardMapping,
        target_model_years: &BTreeSet<CategoryId>,
    ) -> Result<usize, StoreError>;
    fn upsert_triplet(&self, mapping: &TripletMapping) -> Result<(), StoreError>;
    /// Removes the wildcard mapping of a pair together with its triplets.
    fn delete_mapping(&self, pair: MappingPair) -> Result<bool, StoreError>;

    /// Wildcard mappings whose own vehicle type is the given one, or every
    /// mapping for `None`.
    ///
    /// Listing only. Turning this into a make/model id filter would match
    /// every make sharing the vehicle type; query compilation checks each
    /// row's own mapping instead.
    fn all_pairs_matching(
        &self,
        vehicle_type: Option<CategoryId>,
    ) -> Result<Vec<WildcardMapping>, StoreError>;
}

impl RegularizationStore for SqliteStore {
    fn get_mapping(&self, pair: MappingPair) -> Result<Option<WildcardMapping>, StoreError> {
        let mut stmt = self.connection().prepare(
            r#"
            SELECT uncurated_make_id, uncurated_model_id, canonical_make_id, canonical_model_id,
                   vehicle_type_state, vehicle_type_id
            FROM wildcard_mappings
            WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2
            "#,
        )?;

        let mapping = stmt
            .query_row(params![pair.make.get(), pair.model.get()], wildcard_from_row)
            .optional()?;
        Ok(mapping)
    }

    fn get_triplet(
        &self,
        pair: MappingPair,
        model_year: CategoryId,
    ) -> Result<Option<TripletMapping>, StoreError> {
        let mut stmt = self.connection().prepare(
            r#"
            SELECT uncurated_make_id, uncurated_model_id, model_year_id, fuel_type_state, fuel_type_id
            FROM triplet_mappings
            WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2 AND model_year_id = ?3
            "#,
        )?;

        let triplet = stmt
            .query_row(
                params![pair.make.get(), pair.model.get(), model_year.get()],
                triplet_from_row,
            )
            .optional()?;
        Ok(triplet)
    }

    fn list_triplets(&self, pair: MappingPair) -> Result<Vec<TripletMapping>, StoreError> {
        let mut stmt = self.connection().prepare(
            r#"
            SELECT uncurated_make_id, uncurated_model_id, model_year_id, fuel_type_state, fuel_type_id
            FROM triplet_mappings
            WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2
            ORDER BY model_year_id
            "#,
        )?;

        let rows = stmt.query_map(params![pair.make.get(), pair.model.get()], triplet_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn upsert_wildcard(
        &self,
        mapping: &WildcardMapping,
        target_model_years: &BTreeSet<CategoryId>,
    ) -> Result<usize, StoreError> {
        let (make_id, model_id) = (mapping.pair.make.get(), mapping.pair.model.get());
        let (state, vehicle_type_id) = mapping.vehicle_type.to_parts();
        let tx = self.connection().unchecked_transaction()?;

        let previous: Option<(i64, i64)> = tx
            .query_row(
                r#"
                SELECT canonical_make_id, canonical_model_id
                FROM wildcard_mappings
                WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2
                "#,
                params![make_id, model_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        tx.execute(
            r#"
            INSERT INTO wildcard_mappings (
                uncurated_make_id, uncurated_model_id, canonical_make_id, canonical_model_id,
                vehicle_type_state, vehicle_type_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(uncurated_make_id, uncurated_model_id) DO UPDATE SET
                canonical_make_id = excluded.canonical_make_id,
                canonical_model_id = excluded.canonical_model_id,
                vehicle_type_state = excluded.vehicle_type_state,
                vehicle_type_id = excluded.vehicle_type_id
            "#,
            params![
                make_id,
                model_id,
                mapping.canonical_make.get(),
                mapping.canonical_model.get(),
                state,
                vehicle_type_id,
            ],
        )?;

        let target = (mapping.canonical_make.get(), mapping.canonical_model.get());
        let mut pruned = 0;
        if previous.is_some_and(|previous| previous != target) {
            let stale: Vec<i64> = {
                let mut stmt = tx.prepare(
                    r#"
                    SELECT model_year_id
                    FROM triplet_mappings
                    WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2
                    "#,
                )?;
                let rows = stmt.query_map(params![make_id, model_id], |row| row.get::<_, i64>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter(|id| !target_model_years.contains(&CategoryId(*id)))
                    .collect()
            };
            for model_year_id in stale {
                pruned += tx.execute(
                    r#"
                    DELETE FROM triplet_mappings
                    WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2 AND model_year_id = ?3
                    "#,
                    params![make_id, model_id, model_year_id],
                )?;
            }
        }

        bump_data_version(&tx)?;
        tx.commit()?;

        Ok(pruned)
    }

    fn upsert_triplet(&self, mapping: &TripletMapping) -> Result<(), StoreError> {
        let (state, fuel_type_id) = mapping.fuel_type.to_parts();
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO triplet_mappings (
                uncurated_make_id, uncurated_model_id, model_year_id, fuel_type_state, fuel_type_id
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(uncurated_make_id, uncurated_model_id, model_year_id) DO UPDATE SET
                fuel_type_state = excluded.fuel_type_state,
                fuel_type_id = excluded.fuel_type_id
            "#,
            params![
                mapping.pair.make.get(),
                mapping.pair.model.get(),
                mapping.model_year.get(),
                state,
                fuel_type_id,
            ],
        )?;
        bump_data_version(&tx)?;
        tx.commit()?;

        Ok(())
    }

    fn delete_mapping(&self, pair: MappingPair) -> Result<bool, StoreError> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM triplet_mappings WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2",
            params![pair.make.get(), pair.model.get()],
        )?;
        let removed = tx.execute(
            "DELETE FROM wildcard_mappings WHERE uncurated_make_id = ?1 AND uncurated_model_id = ?2",
            params![pair.make.get(), pair.model.get()],
        )?;
        if removed > 0 {
            bump_data_version(&tx)?;
        }
        tx.commit()?;

        Ok(removed > 0)
    }

    fn all_pairs_matching(
        &self,
        vehicle_type: Option<CategoryId>,
    ) -> Result<Vec<WildcardMapping>, StoreError> {
        let mut stmt = self.connection().prepare(
            r#"
            SELECT uncurated_make_id, uncurated_model_id, canonical_make_id, canonical_model_id,
                   vehicle_type_state, vehicle_type_id
            FROM wildcard_mappings
            WHERE ?1 IS NULL OR vehicle_type_id = ?1
            ORDER BY uncurated_make_id, uncurated_model_id
            "#,
        )?;

        let rows = stmt.query_map(params![vehicle_type.map(CategoryId::get)], wildcard_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn assignment_from_columns(
    row: &Row<'_>,
    state_index: usize,
    id_index: usize,
) -> rusqlite::Result<Assignment<CategoryId>> {
    let state: String = row.get(state_index)?;
    let id: Option<i64> = row.get(id_index)?;
    Assignment::from_parts(&state, id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            state_index,
            rusqlite::types::Type::Text,
            format!("inconsistent assignment state '{state}' with id {id:?}").into(),
        )
    })
}

fn wildcard_from_row(row: &Row<'_>) -> rusqlite::Result<WildcardMapping> {
    Ok(WildcardMapping {
        pair: MappingPair::new(CategoryId(row.get(0)?), CategoryId(row.get(1)?)),
        canonical_make: CategoryId(row.get(2)?),
        canonical_model: CategoryId(row.get(3)?),
        vehicle_type: assignment_from_columns(row, 4, 5)?,
    })
}

fn triplet_from_row(row: &Row<'_>) -> rusqlite::Result<TripletMapping> {
    Ok(TripletMapping {
        pair: MappingPair::new(CategoryId(row.get(0)?), CategoryId(row.get(1)?)),
        model_year: CategoryId(row.get(2)?),
        fuel_type: assignment_from_columns(row, 3, 4)?,
    })
}
