//! Association Graph: directed, typed edges between records and the catalog
//! of association types (labels) they are typed by.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{
    BatchCollector, BatchResponse, MAX_ASSOCIATION_ARCHIVE, MAX_ASSOCIATION_CREATE,
    MAX_ASSOCIATION_READ, check_batch_size,
};
use crate::database::Database;
use crate::datatype::format_timestamp;
use crate::error::{CrmockError, Result};
use crate::page::{self, Page};
use crate::record::{self, RecordId};

pub const DEFAULT_ASSOCIATION_LIMIT: usize = 500;
pub const MAX_ASSOCIATION_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationCategory {
    HubspotDefined,
    UserDefined,
    IntegratorDefined,
}

impl AssociationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HubspotDefined => "HUBSPOT_DEFINED",
            Self::UserDefined => "USER_DEFINED",
            Self::IntegratorDefined => "INTEGRATOR_DEFINED",
        }
    }
}

impl fmt::Display for AssociationCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationCategory {
    type Err = CrmockError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HUBSPOT_DEFINED" => Ok(Self::HubspotDefined),
            "USER_DEFINED" => Ok(Self::UserDefined),
            "INTEGRATOR_DEFINED" => Ok(Self::IntegratorDefined),
            other => Err(CrmockError::validation(format!(
                "unknown association category '{other}'"
            ))),
        }
    }
}

/// One row of the label catalog. Directional: A→B and B→A are distinct rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationTypeDef {
    pub type_id: i64,
    pub from_object_type_id: String,
    pub to_object_type_id: String,
    pub category: AssociationCategory,
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationSpec {
    pub association_category: AssociationCategory,
    pub association_type_id: i64,
}

impl AssociationSpec {
    pub fn new(association_category: AssociationCategory, association_type_id: i64) -> Self {
        Self {
            association_category,
            association_type_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationType {
    pub category: AssociationCategory,
    pub type_id: i64,
    /// `None` for the default type and for types whose label was deleted.
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociatedRecord {
    pub to_object_id: RecordId,
    pub association_types: Vec<AssociationType>,
}

/// An association requested alongside a record create.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationInput {
    pub to: RecordId,
    pub types: Vec<AssociationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationLink {
    pub from_object_type_id: String,
    pub from_object_id: RecordId,
    pub to_object_type_id: String,
    pub to_object_id: RecordId,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationPair {
    pub from: RecordId,
    pub to: RecordId,
    /// Empty means the default association only.
    #[serde(default)]
    pub types: Vec<AssociationSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationTargets {
    pub from: RecordId,
    pub to: Vec<AssociatedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInput {
    pub from: RecordId,
    pub to: Vec<RecordId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelInput {
    pub label: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub inverse_label: Option<String>,
}

impl LabelInput {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
    pub fn with_inverse(mut self, inverse_label: impl Into<String>) -> Self {
        self.inverse_label = Some(inverse_label.into());
        self
    }
}

// ------------- Storage -------------
const TYPE_COLUMNS: &str =
    "id, from_object_type_id, to_object_type_id, category, label, inverse_label, name";

pub(crate) struct NewAssociationType<'a> {
    /// Seeded types keep their upstream ids, everything else is numbered by SQLite.
    pub id: Option<i64>,
    pub from_object_type_id: &'a str,
    pub to_object_type_id: &'a str,
    pub category: AssociationCategory,
    pub label: Option<&'a str>,
    pub inverse_label: Option<&'a str>,
    pub name: Option<&'a str>,
}

fn read_type(r: &rusqlite::Row) -> rusqlite::Result<(AssociationTypeDef, String)> {
    Ok((
        AssociationTypeDef {
            type_id: r.get(0)?,
            from_object_type_id: r.get(1)?,
            to_object_type_id: r.get(2)?,
            category: AssociationCategory::HubspotDefined,
            label: r.get(4)?,
            inverse_label: r.get(5)?,
            name: r.get(6)?,
        },
        r.get(3)?,
    ))
}

fn with_category((mut def, category): (AssociationTypeDef, String)) -> Result<AssociationTypeDef> {
    def.category = category.parse().map_err(|_| CrmockError::DataCorruption {
        message: format!("association type {} has category '{category}'", def.type_id),
    })?;
    Ok(def)
}

/// Returns whether a row was written; seeded ids that exist already are left alone.
pub(crate) fn insert_type(
    conn: &Connection,
    new: &NewAssociationType<'_>,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let written = conn
        .prepare_cached(
            "insert or ignore into association_types \
             (id, from_object_type_id, to_object_type_id, category, label, inverse_label, name, created_at) \
             values (?, ?, ?, ?, ?, ?, ?, ?)",
        )?
        .execute(params![
            new.id,
            new.from_object_type_id,
            new.to_object_type_id,
            new.category.as_str(),
            new.label,
            new.inverse_label,
            new.name,
            format_timestamp(now),
        ])?;
    Ok(written > 0)
}

pub(crate) fn find_type(conn: &Connection, type_id: i64) -> Result<Option<AssociationTypeDef>> {
    conn.prepare_cached(&format!(
        "select {TYPE_COLUMNS} from association_types where id = ?"
    ))?
    .query_row(params![type_id], read_type)
    .optional()?
    .map(with_category)
    .transpose()
}

fn types_between(conn: &Connection, from: &str, to: &str) -> Result<Vec<AssociationTypeDef>> {
    let mut statement = conn.prepare_cached(&format!(
        "select {TYPE_COLUMNS} from association_types \
         where from_object_type_id = ? and to_object_type_id = ? order by id"
    ))?;
    let rows = statement
        .query_map(params![from, to], read_type)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(with_category).collect()
}

/// The unlabeled system type of a directed type pair, created on first use.
pub(crate) fn default_type(
    conn: &Connection,
    from: &str,
    to: &str,
    now: &DateTime<Utc>,
) -> Result<AssociationTypeDef> {
    let lookup = |conn: &Connection| -> Result<Option<(AssociationTypeDef, String)>> {
        conn.prepare_cached(&format!(
            "select {TYPE_COLUMNS} from association_types \
             where from_object_type_id = ? and to_object_type_id = ? \
             and category = 'HUBSPOT_DEFINED' and label is null order by id limit 1"
        ))?
        .query_row(params![from, to], read_type)
        .optional()
        .map_err(CrmockError::from)
    };
    if let Some(found) = lookup(conn)? {
        return with_category(found);
    }
    insert_type(
        conn,
        &NewAssociationType {
            id: None,
            from_object_type_id: from,
            to_object_type_id: to,
            category: AssociationCategory::HubspotDefined,
            label: None,
            inverse_label: None,
            name: None,
        },
        now,
    )?;
    debug!(from, to, "default association type created");
    lookup(conn)?
        .map(with_category)
        .transpose()?
        .ok_or_else(|| CrmockError::Invariant(format!("no default association from {from} to {to}")))
}

fn insert_edge(
    conn: &Connection,
    from: i64,
    to: i64,
    def: &AssociationTypeDef,
    now: &str,
) -> Result<()> {
    conn.prepare_cached(
        "insert or ignore into associations \
         (from_object_id, to_object_id, association_type_id, association_category, created_at) \
         values (?, ?, ?, ?, ?)",
    )?
    .execute(params![from, to, def.type_id, def.category.as_str(), now])?;
    Ok(())
}

/// Checks a requested type against the pair it is used for.
fn check_spec(
    conn: &Connection,
    from_type: &str,
    to_type: &str,
    spec: &AssociationSpec,
) -> Result<AssociationTypeDef> {
    let def = find_type(conn, spec.association_type_id)?
        .filter(|d| d.from_object_type_id == from_type && d.to_object_type_id == to_type)
        .ok_or_else(|| {
            CrmockError::not_found(format!(
                "association type {} from {from_type} to {to_type}",
                spec.association_type_id
            ))
        })?;
    if def.category != spec.association_category {
        return Err(CrmockError::validation(format!(
            "association type {} is {}, not {}",
            def.type_id, def.category, spec.association_category
        )));
    }
    Ok(def)
}

/// Writes the default edge plus one edge per requested type.
pub(crate) fn link(
    conn: &Connection,
    from_type: &str,
    from: i64,
    to_type: &str,
    to: i64,
    specs: &[AssociationSpec],
    now: &DateTime<Utc>,
) -> Result<AssociationLink> {
    record::require_live(conn, from_type, from)?;
    record::require_live(conn, to_type, to)?;
    let mut defs = Vec::with_capacity(specs.len());
    for spec in specs {
        defs.push(check_spec(conn, from_type, to_type, spec)?);
    }
    let timestamp = format_timestamp(now);
    let default = default_type(conn, from_type, to_type, now)?;
    insert_edge(conn, from, to, &default, &timestamp)?;
    for def in &defs {
        insert_edge(conn, from, to, def, &timestamp)?;
    }
    debug!(from, to, types = defs.len() + 1, "records associated");
    let mut labels: Vec<String> = defs.into_iter().filter_map(|d| d.label).collect();
    labels.dedup();
    Ok(AssociationLink {
        from_object_type_id: from_type.to_string(),
        from_object_id: RecordId(from),
        to_object_type_id: to_type.to_string(),
        to_object_id: RecordId(to),
        labels,
    })
}

/// Associations given with a record create; the target type follows from the
/// first association type.
pub(crate) fn link_input(
    conn: &Connection,
    from_type: &str,
    from: i64,
    input: &AssociationInput,
    now: &DateTime<Utc>,
) -> Result<AssociationLink> {
    let first = input.types.first().ok_or_else(|| {
        CrmockError::validation(format!("association to {} names no type", input.to))
    })?;
    let to_type = find_type(conn, first.association_type_id)?
        .filter(|d| d.from_object_type_id == from_type)
        .map(|d| d.to_object_type_id)
        .ok_or_else(|| {
            CrmockError::not_found(format!(
                "association type {} from {from_type}",
                first.association_type_id
            ))
        })?;
    link(conn, from_type, from, &to_type, input.to.0, &input.types, now)
}

/// Edges from one record to live records of a type, grouped by target. Targets
/// come in the order they were first linked.
fn edges_from(conn: &Connection, from: i64, to_type: &str) -> Result<Vec<AssociatedRecord>> {
    let mut statement = conn.prepare_cached(
        "select a.to_object_id, a.association_type_id, a.association_category, t.label \
         from associations a \
         join objects o on o.id = a.to_object_id \
         left join association_types t on t.id = a.association_type_id \
         where a.from_object_id = ?1 and o.object_type_id = ?2 and o.archived = 0 \
         order by (select min(f.rowid) from associations f \
                   where f.from_object_id = ?1 and f.to_object_id = a.to_object_id), \
                  a.association_type_id",
    )?;
    let rows = statement
        .query_map(params![from, to_type], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut grouped: Vec<AssociatedRecord> = Vec::new();
    for (to, type_id, category, label) in rows {
        let association_type = AssociationType {
            category: category.parse().map_err(|_| CrmockError::DataCorruption {
                message: format!("association {from}->{to} has category '{category}'"),
            })?,
            type_id,
            label,
        };
        match grouped.last_mut() {
            Some(last) if last.to_object_id.0 == to => last.association_types.push(association_type),
            _ => grouped.push(AssociatedRecord {
                to_object_id: RecordId(to),
                association_types: vec![association_type],
            }),
        }
    }
    Ok(grouped)
}

fn delete_pair(conn: &Connection, from: i64, to: i64) -> Result<usize> {
    Ok(conn
        .prepare_cached("delete from associations where from_object_id = ? and to_object_id = ?")?
        .execute(params![from, to])?)
}

fn delete_typed(conn: &Connection, from: i64, to: i64, def: &AssociationTypeDef) -> Result<usize> {
    Ok(conn
        .prepare_cached(
            "delete from associations \
             where from_object_id = ? and to_object_id = ? and association_type_id = ?",
        )?
        .execute(params![from, to, def.type_id])?)
}

/// Moves every edge touching `from_record` over to `into_record`, both
/// directions. Edges between the two records themselves are dropped.
pub(crate) fn transfer_edges(
    conn: &Connection,
    from_record: i64,
    into_record: i64,
    now: &DateTime<Utc>,
) -> Result<()> {
    let timestamp = format_timestamp(now);
    conn.execute(
        "insert or ignore into associations \
         (from_object_id, to_object_id, association_type_id, association_category, created_at) \
         select ?2, to_object_id, association_type_id, association_category, ?3 \
         from associations where from_object_id = ?1 and to_object_id <> ?2",
        params![from_record, into_record, timestamp],
    )?;
    conn.execute(
        "insert or ignore into associations \
         (from_object_id, to_object_id, association_type_id, association_category, created_at) \
         select from_object_id, ?2, association_type_id, association_category, ?3 \
         from associations where to_object_id = ?1 and from_object_id <> ?2",
        params![from_record, into_record, timestamp],
    )?;
    let moved = conn.execute(
        "delete from associations where from_object_id = ?1 or to_object_id = ?1",
        params![from_record],
    )?;
    debug!(from_record, into_record, moved, "associations transferred");
    Ok(())
}

fn parse_id(token: &str, object_type: &str) -> Result<i64> {
    token
        .trim()
        .parse::<i64>()
        .map_err(|_| CrmockError::not_found(format!("record {token} of type {object_type}")))
}

// ------------- Graph -------------
pub struct AssociationGraph<'db> {
    database: &'db Database,
}

impl<'db> AssociationGraph<'db> {
    pub fn new(database: &'db Database) -> Self {
        Self { database }
    }

    pub fn associate_default(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        to_id: &str,
    ) -> Result<AssociationLink> {
        self.associate(from_type, from_id, to_type, to_id, &[])
    }

    /// Labels imply the default association, which is written as well.
    pub fn associate(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        to_id: &str,
        types: &[AssociationSpec],
    ) -> Result<AssociationLink> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let from = parse_id(from_id, &from_ty.id)?;
        let to = parse_id(to_id, &to_ty.id)?;
        let now = self.database.now();
        self.database
            .write(|tx| link(tx, &from_ty.id, from, &to_ty.id, to, types, &now))
    }

    /// Paged by position; `after` is an offset into the grouped targets.
    pub fn get(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Page<AssociatedRecord>> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let from = parse_id(from_id, &from_ty.id)?;
        let limit = page::check_limit(limit, DEFAULT_ASSOCIATION_LIMIT, MAX_ASSOCIATION_LIMIT)?;
        let offset = page::decode_offset(after)?;
        let all = self.database.read(|conn| {
            record::require_live(conn, &from_ty.id, from)?;
            edges_from(conn, from, &to_ty.id)
        })?;
        let total = all.len();
        let results: Vec<_> = all.into_iter().skip(offset).take(limit).collect();
        let end = offset + results.len();
        let next = (end < total).then(|| page::encode(end));
        Ok(Page::new(results, next))
    }

    /// Removes every edge of the ordered pair, labels included.
    pub fn remove(&self, from_type: &str, from_id: &str, to_type: &str, to_id: &str) -> Result<()> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let from = parse_id(from_id, &from_ty.id)?;
        let to = parse_id(to_id, &to_ty.id)?;
        let removed = self.database.write(|tx| {
            record::require_live(tx, &from_ty.id, from)?;
            delete_pair(tx, from, to)
        })?;
        debug!(from, to, removed, "associations removed");
        Ok(())
    }

    /// Removes only the given types; removing the default removes the pair.
    pub fn remove_labels(
        &self,
        from_type: &str,
        from_id: &str,
        to_type: &str,
        to_id: &str,
        types: &[AssociationSpec],
    ) -> Result<()> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let from = parse_id(from_id, &from_ty.id)?;
        let to = parse_id(to_id, &to_ty.id)?;
        let now = self.database.now();
        self.database.write(|tx| {
            remove_labels_in(tx, &from_ty.id, from, &to_ty.id, to, types, &now)
        })
    }

    pub fn batch_associate_default(
        &self,
        from_type: &str,
        to_type: &str,
        pairs: Vec<(RecordId, RecordId)>,
    ) -> Result<BatchResponse<AssociationLink>> {
        let inputs = pairs
            .into_iter()
            .map(|(from, to)| AssociationPair {
                from,
                to,
                types: Vec::new(),
            })
            .collect();
        self.batch_create(from_type, to_type, inputs)
    }

    pub fn batch_create(
        &self,
        from_type: &str,
        to_type: &str,
        inputs: Vec<AssociationPair>,
    ) -> Result<BatchResponse<AssociationLink>> {
        check_batch_size(inputs.len(), MAX_ASSOCIATION_CREATE, "association batch create")?;
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let now = self.database.now();
        let mut collector = BatchCollector::new("association batch create", now);
        self.database.write_batch(|tx| {
            for (index, input) in inputs.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = link(
                    &savepoint,
                    &from_ty.id,
                    input.from.0,
                    &to_ty.id,
                    input.to.0,
                    &input.types,
                    &now,
                );
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(input.from.to_string()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    /// Unpaged; every target of each source record.
    pub fn batch_read(
        &self,
        from_type: &str,
        to_type: &str,
        ids: Vec<RecordId>,
    ) -> Result<BatchResponse<AssociationTargets>> {
        check_batch_size(ids.len(), MAX_ASSOCIATION_READ, "association batch read")?;
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let mut collector = BatchCollector::new("association batch read", self.database.now());
        self.database.read(|conn| {
            for (index, id) in ids.iter().enumerate() {
                let outcome = record::require_live(conn, &from_ty.id, id.0)
                    .and_then(|_| edges_from(conn, id.0, &to_ty.id))
                    .map(|to| AssociationTargets { from: *id, to });
                collector.record(index, Some(id.to_string()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    pub fn batch_archive(
        &self,
        from_type: &str,
        to_type: &str,
        inputs: Vec<ArchiveInput>,
    ) -> Result<BatchResponse<ArchiveInput>> {
        check_batch_size(inputs.len(), MAX_ASSOCIATION_ARCHIVE, "association batch archive")?;
        let from_ty = self.database.resolve(from_type)?;
        self.database.resolve(to_type)?;
        let mut collector = BatchCollector::new("association batch archive", self.database.now());
        self.database.write_batch(|tx| {
            for (index, input) in inputs.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = record::require_live(&savepoint, &from_ty.id, input.from.0).and_then(|_| {
                    for to in &input.to {
                        delete_pair(&savepoint, input.from.0, to.0)?;
                    }
                    Ok(input.clone())
                });
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(input.from.to_string()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    pub fn batch_remove_labels(
        &self,
        from_type: &str,
        to_type: &str,
        inputs: Vec<AssociationPair>,
    ) -> Result<BatchResponse<AssociationLink>> {
        check_batch_size(inputs.len(), MAX_ASSOCIATION_ARCHIVE, "association labels archive")?;
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        let now = self.database.now();
        let mut collector = BatchCollector::new("association labels archive", now);
        self.database.write_batch(|tx| {
            for (index, input) in inputs.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = remove_labels_in(
                    &savepoint,
                    &from_ty.id,
                    input.from.0,
                    &to_ty.id,
                    input.to.0,
                    &input.types,
                    &now,
                )
                .map(|_| AssociationLink {
                    from_object_type_id: from_ty.id.clone(),
                    from_object_id: input.from,
                    to_object_type_id: to_ty.id.clone(),
                    to_object_id: input.to,
                    labels: Vec::new(),
                });
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(input.from.to_string()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    // ------------- Labels -------------

    /// Every association type of the directed pair, lowest id first.
    pub fn labels(&self, from_type: &str, to_type: &str) -> Result<Vec<AssociationTypeDef>> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        self.database
            .read(|conn| types_between(conn, &from_ty.id, &to_ty.id))
    }

    /// Creates a user-defined label, and its reverse when an inverse label is given.
    /// Returns the created definitions, forward first.
    pub fn create_label(
        &self,
        from_type: &str,
        to_type: &str,
        input: LabelInput,
    ) -> Result<Vec<AssociationTypeDef>> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        if input.label.trim().is_empty() {
            return Err(CrmockError::validation("association labels must not be empty"));
        }
        let now = self.database.now();
        let created = self.database.write(|tx| {
            let mut created = Vec::with_capacity(2);
            let mut directions = vec![(
                from_ty.id.as_str(),
                to_ty.id.as_str(),
                input.label.as_str(),
                input.inverse_label.as_deref(),
            )];
            if let Some(inverse) = input.inverse_label.as_deref() {
                directions.push((to_ty.id.as_str(), from_ty.id.as_str(), inverse, Some(input.label.as_str())));
            }
            for (from, to, label, inverse_label) in directions {
                let written = insert_type(
                    tx,
                    &NewAssociationType {
                        id: None,
                        from_object_type_id: from,
                        to_object_type_id: to,
                        category: AssociationCategory::UserDefined,
                        label: Some(label),
                        inverse_label,
                        name: input.name.as_deref(),
                    },
                    &now,
                )?;
                if !written {
                    return Err(CrmockError::conflict(format!(
                        "association label '{label}' from {from} to {to} already exists"
                    )));
                }
                let id = tx.last_insert_rowid();
                created.push(find_type(tx, id)?.ok_or_else(|| {
                    CrmockError::Invariant(format!("association type {id} vanished after insert"))
                })?);
            }
            Ok(created)
        })?;
        info!(from = %from_ty.name, to = %to_ty.name, label = %input.label, "association label created");
        Ok(created)
    }

    pub fn update_label(
        &self,
        from_type: &str,
        to_type: &str,
        type_id: i64,
        input: LabelInput,
    ) -> Result<AssociationTypeDef> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        self.database.write(|tx| {
            let current = self.user_label(tx, &from_ty.id, &to_ty.id, type_id)?;
            tx.execute(
                "update association_types set label = ?, inverse_label = ?, name = ? where id = ?",
                params![
                    input.label,
                    input.inverse_label.or(current.inverse_label),
                    input.name.or(current.name),
                    type_id
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    CrmockError::conflict(format!(
                        "association label '{}' already exists",
                        input.label
                    ))
                }
                other => other.into(),
            })?;
            find_type(tx, type_id)?
                .ok_or_else(|| CrmockError::Invariant(format!("association type {type_id} vanished")))
        })
    }

    /// Drops the definition only; its edges stay and read back unlabeled.
    pub fn delete_label(&self, from_type: &str, to_type: &str, type_id: i64) -> Result<()> {
        let from_ty = self.database.resolve(from_type)?;
        let to_ty = self.database.resolve(to_type)?;
        self.database.write(|tx| {
            self.user_label(tx, &from_ty.id, &to_ty.id, type_id)?;
            tx.execute("delete from association_types where id = ?", params![type_id])?;
            Ok(())
        })?;
        info!(from = %from_ty.name, to = %to_ty.name, type_id, "association label deleted");
        Ok(())
    }

    fn user_label(
        &self,
        conn: &Connection,
        from: &str,
        to: &str,
        type_id: i64,
    ) -> Result<AssociationTypeDef> {
        let def = find_type(conn, type_id)?
            .filter(|d| d.from_object_type_id == from && d.to_object_type_id == to)
            .ok_or_else(|| {
                CrmockError::not_found(format!("association type {type_id} from {from} to {to}"))
            })?;
        if def.category != AssociationCategory::UserDefined {
            return Err(CrmockError::validation(format!(
                "association type {type_id} is {} and cannot be changed",
                def.category
            )));
        }
        Ok(def)
    }
}

fn remove_labels_in(
    conn: &Connection,
    from_type: &str,
    from: i64,
    to_type: &str,
    to: i64,
    types: &[AssociationSpec],
    now: &DateTime<Utc>,
) -> Result<()> {
    record::require_live(conn, from_type, from)?;
    let default = default_type(conn, from_type, to_type, now)?;
    for spec in types {
        let def = check_spec(conn, from_type, to_type, spec)?;
        if def.type_id == default.type_id {
            delete_pair(conn, from, to)?;
        } else {
            delete_typed(conn, from, to, &def)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_use_upstream_spelling() {
        assert_eq!(
            serde_json::to_value(AssociationCategory::HubspotDefined).unwrap(),
            serde_json::json!("HUBSPOT_DEFINED")
        );
        assert_eq!(
            "USER_DEFINED".parse::<AssociationCategory>().unwrap(),
            AssociationCategory::UserDefined
        );
        assert!("SOMETHING".parse::<AssociationCategory>().is_err());
    }

    #[test]
    fn specs_deserialize_from_camel_case() {
        let spec: AssociationSpec = serde_json::from_value(serde_json::json!({
            "associationCategory": "HUBSPOT_DEFINED",
            "associationTypeId": 279
        }))
        .unwrap();
        assert_eq!(spec, AssociationSpec::new(AssociationCategory::HubspotDefined, 279));
    }
}
