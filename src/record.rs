//! Record Store: the generic records of every object type, their EAV
//! property values and the append-only value history.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::association::{self, AssociationInput};
use crate::batch::{BatchCollector, BatchResponse, MAX_RECORD_BATCH, check_batch_size};
use crate::database::{Database, OtherHasher};
use crate::datatype::{format_timestamp, parse_timestamp};
use crate::error::{CrmockError, Result};
use crate::page::{self, Page};
use crate::property::{
    DEFAULT_PROPERTIES, HS_CREATEDATE, HS_LASTMODIFIEDDATE, HS_MERGED_OBJECT_IDS, HS_OBJECT_ID,
    PropertyRules, is_system_property,
};
use crate::registry::ObjectType;

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 100;

// ------------- Identity -------------

/// Record ids are monotonic integers that travel as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = CrmockError;
    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(RecordId)
            .map_err(|_| CrmockError::validation(format!("'{s}' is not a record id")))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(RecordId(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId(id)
    }
}

// ------------- Shapes -------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSource {
    Api,
    Merge,
    System,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "API",
            Self::Merge => "MERGE",
            Self::System => "SYSTEM",
        }
    }
}

impl FromStr for ChangeSource {
    type Err = CrmockError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "API" => Ok(Self::Api),
            "MERGE" => Ok(Self::Merge),
            "SYSTEM" => Ok(Self::System),
            other => Err(CrmockError::DataCorruption {
                message: format!("unknown change source '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyHistory {
    pub value: String,
    pub timestamp: DateTime<Utc>,
    pub source_type: ChangeSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    #[serde(skip)]
    pub object_type_id: String,
    /// Requested properties; `None` means requested but unset.
    pub properties: BTreeMap<String, Option<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties_with_history: BTreeMap<String, Vec<PropertyHistory>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_into_id: Option<RecordId>,
}

impl Record {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_deref())
    }
}

pub type PropertyMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub associations: Vec<AssociationInput>,
}

impl RecordInput {
    pub fn new<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            associations: Vec::new(),
        }
    }
    pub fn with_association(mut self, association: AssociationInput) -> Self {
        self.associations.push(association);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOptions {
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub properties_with_history: Vec<String>,
    /// Lets archived records be found too.
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub id_property: Option<String>,
}

impl ReadOptions {
    pub fn properties<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            properties: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    /// Lists archived records instead of live ones.
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInput {
    pub id: String,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertInput {
    /// Value of `id_property` identifying the record.
    pub id: String,
    #[serde(default)]
    pub id_property: Option<String>,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    #[serde(flatten)]
    pub record: Record,
    pub new: bool,
}

// ------------- Storage -------------
const OBJECT_COLUMNS: &str =
    "id, object_type_id, archived, archived_at, created_at, updated_at, merged_into_id";
const JOINED_OBJECT_COLUMNS: &str =
    "o.id, o.object_type_id, o.archived, o.archived_at, o.created_at, o.updated_at, o.merged_into_id";

#[derive(Debug, Clone)]
pub(crate) struct ObjectRow {
    pub id: i64,
    pub object_type_id: String,
    pub archived: bool,
    archived_at: Option<String>,
    created_at: String,
    updated_at: String,
    merged_into_id: Option<i64>,
}

impl ObjectRow {
    fn read(r: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            object_type_id: r.get(1)?,
            archived: r.get(2)?,
            archived_at: r.get(3)?,
            created_at: r.get(4)?,
            updated_at: r.get(5)?,
            merged_into_id: r.get(6)?,
        })
    }
}

/// Which properties a read returns: the defaults, then whatever was asked for.
#[derive(Debug, Clone)]
pub(crate) struct Projection {
    properties: Vec<String>,
    history: Vec<String>,
}

impl Projection {
    pub(crate) fn new(requested: &[String], history: &[String]) -> Self {
        let mut properties: Vec<String> = DEFAULT_PROPERTIES.iter().map(|p| p.to_string()).collect();
        for name in requested {
            if !properties.contains(name) {
                properties.push(name.clone());
            }
        }
        Self {
            properties,
            history: history.to_vec(),
        }
    }
    fn with(names: impl IntoIterator<Item = String>) -> Self {
        Self::new(&names.into_iter().collect::<Vec<_>>(), &[])
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn find_object(
    conn: &Connection,
    object_type_id: &str,
    id: i64,
    include_archived: bool,
) -> Result<Option<ObjectRow>> {
    let row = conn
        .prepare_cached(&format!(
            "select {OBJECT_COLUMNS} from objects where id = ? and object_type_id = ?"
        ))?
        .query_row(params![id, object_type_id], ObjectRow::read)
        .optional()?;
    Ok(row.filter(|r| include_archived || !r.archived))
}

pub(crate) fn require_live(conn: &Connection, object_type_id: &str, id: i64) -> Result<ObjectRow> {
    find_object(conn, object_type_id, id, false)?
        .ok_or_else(|| CrmockError::not_found(format!("record {id} of type {object_type_id}")))
}

/// Loads rows in the order of `ids`, silently skipping ids that do not exist.
pub(crate) fn load_rows(conn: &Connection, ids: &[i64]) -> Result<Vec<ObjectRow>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut statement = conn.prepare(&format!(
        "select {OBJECT_COLUMNS} from objects where id in ({})",
        placeholders(ids.len())
    ))?;
    let mut found: HashMap<i64, ObjectRow, OtherHasher> = statement
        .query_map(params_from_iter(ids.iter()), ObjectRow::read)?
        .map(|row| row.map(|r| (r.id, r)))
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
}

/// Current values of `ids`, restricted to `names` unless that is `None`.
fn fetch_values(
    conn: &Connection,
    ids: &[i64],
    names: Option<&[String]>,
) -> Result<HashMap<i64, BTreeMap<String, String>, OtherHasher>> {
    let mut values: HashMap<i64, BTreeMap<String, String>, OtherHasher> = HashMap::default();
    if ids.is_empty() || names.is_some_and(|n| n.is_empty()) {
        return Ok(values);
    }
    let mut sql = format!(
        "select object_id, property_name, value from property_values where object_id in ({})",
        placeholders(ids.len())
    );
    let mut bound: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
    if let Some(names) = names {
        sql.push_str(&format!(" and property_name in ({})", placeholders(names.len())));
        bound.extend(names.iter().map(|n| Value::Text(n.clone())));
    }
    let mut statement = conn.prepare(&sql)?;
    let rows = statement.query_map(params_from_iter(bound), |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (id, name, value) = row?;
        values.entry(id).or_default().insert(name, value);
    }
    Ok(values)
}

fn fetch_history(
    conn: &Connection,
    id: i64,
    names: &[String],
) -> Result<BTreeMap<String, Vec<PropertyHistory>>> {
    let mut history = BTreeMap::new();
    let mut statement = conn.prepare_cached(
        "select value, timestamp, source_type from property_value_history \
         where object_id = ? and property_name = ? order by timestamp desc, id desc",
    )?;
    for name in names {
        let rows = statement
            .query_map(params![id, name], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut entries = Vec::with_capacity(rows.len());
        for (value, timestamp, source) in rows {
            entries.push(PropertyHistory {
                value,
                timestamp: parse_timestamp(&timestamp)?,
                source_type: source.parse()?,
            });
        }
        history.insert(name.clone(), entries);
    }
    Ok(history)
}

/// Turns rows into records carrying exactly the projected properties.
pub(crate) fn load_records(
    conn: &Connection,
    rows: Vec<ObjectRow>,
    projection: &Projection,
) -> Result<Vec<Record>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut values = fetch_values(conn, &ids, Some(&projection.properties))?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut stored = values.remove(&row.id).unwrap_or_default();
        let properties = projection
            .properties
            .iter()
            .map(|name| (name.clone(), stored.remove(name)))
            .collect();
        let properties_with_history = if projection.history.is_empty() {
            BTreeMap::new()
        } else {
            fetch_history(conn, row.id, &projection.history)?
        };
        records.push(Record {
            id: RecordId(row.id),
            object_type_id: row.object_type_id,
            properties,
            properties_with_history,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            archived: row.archived,
            archived_at: row.archived_at.as_deref().map(parse_timestamp).transpose()?,
            merged_into_id: row.merged_into_id.map(RecordId),
        });
    }
    Ok(records)
}

fn load_record(conn: &Connection, row: ObjectRow, projection: &Projection) -> Result<Record> {
    let id = row.id;
    load_records(conn, vec![row], projection)?
        .pop()
        .ok_or_else(|| CrmockError::Invariant(format!("record {id} vanished while loading")))
}

/// Writes values and their history. Empty values clear the property.
fn write_values(
    conn: &Connection,
    id: i64,
    values: &[(String, String)],
    now: &str,
    source: ChangeSource,
) -> Result<()> {
    let mut upsert = conn.prepare_cached(
        "insert into property_values (object_id, property_name, value, updated_at) \
         values (?, ?, ?, ?) \
         on conflict (object_id, property_name) do update set \
         value = excluded.value, updated_at = excluded.updated_at",
    )?;
    let mut clear =
        conn.prepare_cached("delete from property_values where object_id = ? and property_name = ?")?;
    let mut history = conn.prepare_cached(
        "insert into property_value_history (object_id, property_name, value, source_type, timestamp) \
         values (?, ?, ?, ?, ?)",
    )?;
    for (name, value) in values {
        if value.is_empty() {
            clear.execute(params![id, name])?;
        } else {
            upsert.execute(params![id, name, value, now])?;
        }
        history.execute(params![id, name, value, source.as_str(), now])?;
    }
    Ok(())
}

/// Validates caller-supplied values and returns them normalized.
fn prepare_writes(rules: &PropertyRules, properties: &PropertyMap) -> Result<Vec<(String, String)>> {
    let mut writes = Vec::with_capacity(properties.len());
    for (name, value) in properties {
        rules.check_writable(name)?;
        writes.push((name.clone(), rules.normalize(name, value)?));
    }
    Ok(writes)
}

fn check_unique(
    conn: &Connection,
    object_type: &ObjectType,
    rules: &PropertyRules,
    own_id: Option<i64>,
    writes: &[(String, String)],
) -> Result<()> {
    let mut statement = conn.prepare_cached(
        "select o.id from property_values pv join objects o on o.id = pv.object_id \
         where o.object_type_id = ? and o.archived = 0 and pv.property_name = ? and pv.value = ? \
         and o.id <> ? limit 1",
    )?;
    for (name, value) in writes {
        if value.is_empty() || !rules.is_unique(name) {
            continue;
        }
        let holder: Option<i64> = statement
            .query_row(
                params![object_type.id, name, value, own_id.unwrap_or(0)],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(holder) = holder {
            return Err(CrmockError::conflict(format!(
                "a {} with {name} '{value}' already exists (id {holder})",
                object_type.label_singular.to_lowercase()
            )));
        }
    }
    Ok(())
}

fn touch(conn: &Connection, id: i64, now: &str) -> Result<()> {
    conn.prepare_cached("update objects set updated_at = ? where id = ?")?
        .execute(params![now, id])?;
    write_values(
        conn,
        id,
        &[(HS_LASTMODIFIEDDATE.to_string(), now.to_string())],
        now,
        ChangeSource::System,
    )
}

/// Finds a record by id or by the value of a unique property.
fn locate(
    conn: &Connection,
    object_type: &ObjectType,
    rules: &PropertyRules,
    token: &str,
    id_property: Option<&str>,
    include_archived: bool,
) -> Result<Option<ObjectRow>> {
    let property = id_property.unwrap_or(HS_OBJECT_ID);
    if property == HS_OBJECT_ID {
        return match token.trim().parse::<i64>() {
            Ok(id) => find_object(conn, &object_type.id, id, include_archived),
            Err(_) => Ok(None),
        };
    }
    let value = match rules.normalize(property, token) {
        Ok(value) if !value.is_empty() => value,
        _ => return Ok(None),
    };
    let row = conn
        .prepare_cached(&format!(
            "select {JOINED_OBJECT_COLUMNS} from objects o join property_values pv on pv.object_id = o.id \
             where o.object_type_id = ? and pv.property_name = ? and pv.value = ? \
             and (o.archived = 0 or ?) order by o.archived, o.id desc limit 1"
        ))?
        .query_row(
            params![object_type.id, property, value, include_archived],
            ObjectRow::read,
        )
        .optional()?;
    Ok(row)
}

fn check_id_property(rules: &PropertyRules, id_property: Option<&str>) -> Result<()> {
    match id_property {
        Some(property) if !rules.can_identify(property) => Err(CrmockError::validation(format!(
            "{property} is not a unique identifier property"
        ))),
        _ => Ok(()),
    }
}

fn not_found(object_type: &ObjectType, token: &str) -> CrmockError {
    CrmockError::not_found(format!(
        "{} {token}",
        object_type.label_singular.to_lowercase()
    ))
}

fn create_in(
    conn: &Connection,
    object_type: &ObjectType,
    rules: &PropertyRules,
    input: &RecordInput,
    now: &DateTime<Utc>,
) -> Result<Record> {
    let writes = prepare_writes(rules, &input.properties)?;
    check_unique(conn, object_type, rules, None, &writes)?;
    let timestamp = format_timestamp(now);
    conn.prepare_cached(
        "insert into objects (object_type_id, archived, created_at, updated_at) values (?, 0, ?, ?)",
    )?
    .execute(params![object_type.id, timestamp, timestamp])?;
    let id = conn.last_insert_rowid();
    let system = [
        (HS_OBJECT_ID.to_string(), id.to_string()),
        (HS_CREATEDATE.to_string(), timestamp.clone()),
        (HS_LASTMODIFIEDDATE.to_string(), timestamp.clone()),
    ];
    write_values(conn, id, &system, &timestamp, ChangeSource::System)?;
    write_values(conn, id, &writes, &timestamp, ChangeSource::Api)?;
    for association in &input.associations {
        association::link_input(conn, &object_type.id, id, association, now)?;
    }
    debug!(object_type = %object_type.name, id, properties = writes.len(), "record created");
    let row = require_live(conn, &object_type.id, id)?;
    load_record(conn, row, &Projection::with(writes.into_iter().map(|(n, _)| n)))
}

fn update_in(
    conn: &Connection,
    object_type: &ObjectType,
    rules: &PropertyRules,
    row: ObjectRow,
    properties: &PropertyMap,
    now: &DateTime<Utc>,
) -> Result<Record> {
    let writes = prepare_writes(rules, properties)?;
    check_unique(conn, object_type, rules, Some(row.id), &writes)?;
    let timestamp = format_timestamp(now);
    write_values(conn, row.id, &writes, &timestamp, ChangeSource::Api)?;
    touch(conn, row.id, &timestamp)?;
    debug!(object_type = %object_type.name, id = row.id, properties = writes.len(), "record updated");
    let row = require_live(conn, &object_type.id, row.id)?;
    load_record(conn, row, &Projection::with(writes.into_iter().map(|(n, _)| n)))
}

/// Returns whether the record went from live to archived.
fn archive_in(conn: &Connection, object_type: &ObjectType, token: &str, now: &str) -> Result<bool> {
    let id = token
        .trim()
        .parse::<i64>()
        .map_err(|_| not_found(object_type, token))?;
    let row = find_object(conn, &object_type.id, id, true)?.ok_or_else(|| not_found(object_type, token))?;
    if row.archived {
        return Ok(false);
    }
    conn.prepare_cached("update objects set archived = 1, archived_at = ?, updated_at = ? where id = ?")?
        .execute(params![now, now, id])?;
    debug!(object_type = %object_type.name, id, "record archived");
    Ok(true)
}

fn merged_ids(values: &BTreeMap<String, String>) -> impl Iterator<Item = &str> {
    values
        .get(HS_MERGED_OBJECT_IDS)
        .map(|v| v.as_str())
        .unwrap_or("")
        .split(';')
        .filter(|s| !s.is_empty())
}

// ------------- Store -------------
pub struct RecordStore<'db> {
    database: &'db Database,
}

impl<'db> RecordStore<'db> {
    pub fn new(database: &'db Database) -> Self {
        Self { database }
    }

    pub fn create(&self, object_type: &str, input: RecordInput) -> Result<Record> {
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        self.database.write(|tx| {
            let rules = PropertyRules::load(tx, &ty.id)?;
            create_in(tx, &ty, &rules, &input, &now)
        })
    }

    pub fn get(&self, object_type: &str, id: &str, options: &ReadOptions) -> Result<Record> {
        let ty = self.database.resolve(object_type)?;
        self.database.read(|conn| {
            let rules = PropertyRules::load(conn, &ty.id)?;
            check_id_property(&rules, options.id_property.as_deref())?;
            let row = locate(conn, &ty, &rules, id, options.id_property.as_deref(), options.archived)?
                .ok_or_else(|| not_found(&ty, id))?;
            load_record(
                conn,
                row,
                &Projection::new(&options.properties, &options.properties_with_history),
            )
        })
    }

    /// Ascending ids after the cursor; `next` is set only when more rows exist.
    pub fn list(&self, object_type: &str, options: &ListOptions) -> Result<Page<Record>> {
        let ty = self.database.resolve(object_type)?;
        let limit = page::check_limit(options.limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT)?;
        let after = page::decode_after_id(options.after.as_deref())?;
        self.database.read(|conn| {
            let mut rows = conn
                .prepare_cached(&format!(
                    "select {OBJECT_COLUMNS} from objects \
                     where object_type_id = ? and archived = ? and id > ? order by id limit ?"
                ))?
                .query_map(
                    params![ty.id, options.archived, after, (limit + 1) as i64],
                    ObjectRow::read,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let next = if rows.len() > limit {
                rows.truncate(limit);
                rows.last().map(|r| page::encode(r.id))
            } else {
                None
            };
            let records = load_records(conn, rows, &Projection::new(&options.properties, &[]))?;
            Ok(Page::new(records, next))
        })
    }

    pub fn update(
        &self,
        object_type: &str,
        id: &str,
        id_property: Option<&str>,
        properties: PropertyMap,
    ) -> Result<Record> {
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        self.database.write(|tx| {
            let rules = PropertyRules::load(tx, &ty.id)?;
            check_id_property(&rules, id_property)?;
            let row = locate(tx, &ty, &rules, id, id_property, false)?
                .ok_or_else(|| not_found(&ty, id))?;
            update_in(tx, &ty, &rules, row, &properties, &now)
        })
    }

    /// Idempotent: archiving an archived record succeeds without changes.
    pub fn archive(&self, object_type: &str, id: &str) -> Result<()> {
        let ty = self.database.resolve(object_type)?;
        let now = format_timestamp(&self.database.now());
        self.database
            .write(|tx| archive_in(tx, &ty, id, &now))
            .map(|_| ())
    }

    pub fn batch_create(
        &self,
        object_type: &str,
        inputs: Vec<RecordInput>,
    ) -> Result<BatchResponse<Record>> {
        check_batch_size(inputs.len(), MAX_RECORD_BATCH, "batch create")?;
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        let mut collector = BatchCollector::new("batch create", now);
        self.database.write_batch(|tx| {
            let rules = PropertyRules::load(tx, &ty.id)?;
            for (index, input) in inputs.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = create_in(&savepoint, &ty, &rules, input, &now);
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, None, outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    pub fn batch_read(
        &self,
        object_type: &str,
        ids: Vec<String>,
        options: &ReadOptions,
    ) -> Result<BatchResponse<Record>> {
        check_batch_size(ids.len(), MAX_RECORD_BATCH, "batch read")?;
        let ty = self.database.resolve(object_type)?;
        let mut collector = BatchCollector::new("batch read", self.database.now());
        let projection = Projection::new(&options.properties, &options.properties_with_history);
        self.database.read(|conn| {
            let rules = PropertyRules::load(conn, &ty.id)?;
            check_id_property(&rules, options.id_property.as_deref())?;
            for (index, id) in ids.iter().enumerate() {
                let outcome = locate(conn, &ty, &rules, id, options.id_property.as_deref(), options.archived)
                    .and_then(|row| row.ok_or_else(|| not_found(&ty, id)))
                    .and_then(|row| load_record(conn, row, &projection));
                collector.record(index, Some(id.clone()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    pub fn batch_update(
        &self,
        object_type: &str,
        inputs: Vec<UpdateInput>,
        id_property: Option<&str>,
    ) -> Result<BatchResponse<Record>> {
        check_batch_size(inputs.len(), MAX_RECORD_BATCH, "batch update")?;
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        let mut collector = BatchCollector::new("batch update", now);
        self.database.write_batch(|tx| {
            let rules = PropertyRules::load(tx, &ty.id)?;
            check_id_property(&rules, id_property)?;
            for (index, input) in inputs.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = locate(&savepoint, &ty, &rules, &input.id, id_property, false)
                    .and_then(|row| row.ok_or_else(|| not_found(&ty, &input.id)))
                    .and_then(|row| update_in(&savepoint, &ty, &rules, row, &input.properties, &now));
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(input.id.clone()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    /// Updates the live record holding each input's id value, or creates one
    /// carrying it.
    pub fn batch_upsert(
        &self,
        object_type: &str,
        inputs: Vec<UpsertInput>,
    ) -> Result<BatchResponse<UpsertOutcome>> {
        check_batch_size(inputs.len(), MAX_RECORD_BATCH, "batch upsert")?;
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        let mut collector = BatchCollector::new("batch upsert", now);
        self.database.write_batch(|tx| {
            let rules = PropertyRules::load(tx, &ty.id)?;
            for (index, input) in inputs.iter().enumerate() {
                let id_property = input
                    .id_property
                    .clone()
                    .unwrap_or_else(|| rules.default_id_property().to_string());
                let savepoint = tx.savepoint()?;
                let outcome = check_id_property(&rules, Some(id_property.as_str()))
                    .and_then(|_| {
                        locate(&savepoint, &ty, &rules, &input.id, Some(id_property.as_str()), false)
                    })
                    .and_then(|found| match found {
                        Some(row) => update_in(&savepoint, &ty, &rules, row, &input.properties, &now)
                            .map(|record| UpsertOutcome { record, new: false }),
                        None => {
                            let mut properties = input.properties.clone();
                            if id_property != HS_OBJECT_ID {
                                properties.insert(id_property.clone(), input.id.clone());
                            }
                            let create = RecordInput {
                                properties,
                                associations: Vec::new(),
                            };
                            create_in(&savepoint, &ty, &rules, &create, &now)
                                .map(|record| UpsertOutcome { record, new: true })
                        }
                    });
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(input.id.clone()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    pub fn batch_archive(
        &self,
        object_type: &str,
        ids: Vec<String>,
    ) -> Result<BatchResponse<RecordId>> {
        check_batch_size(ids.len(), MAX_RECORD_BATCH, "batch archive")?;
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        let timestamp = format_timestamp(&now);
        let mut collector = BatchCollector::new("batch archive", now);
        self.database.write_batch(|tx| {
            for (index, id) in ids.iter().enumerate() {
                let savepoint = tx.savepoint()?;
                let outcome = archive_in(&savepoint, &ty, id, &timestamp)
                    .and_then(|_| id.parse::<RecordId>());
                if outcome.is_ok() {
                    savepoint.commit()?;
                }
                collector.record(index, Some(id.clone()), outcome)?;
            }
            Ok(())
        })?;
        Ok(collector.finish(self.database.now()))
    }

    /// Folds `merge_id` into `primary_id`: unset properties are absorbed, the
    /// associations move over and the merged record is archived.
    pub fn merge(&self, object_type: &str, primary_id: &str, merge_id: &str) -> Result<Record> {
        let ty = self.database.resolve(object_type)?;
        let now = self.database.now();
        let timestamp = format_timestamp(&now);
        let parse = |token: &str| {
            token
                .trim()
                .parse::<i64>()
                .map_err(|_| not_found(&ty, token))
        };
        let (primary, merged) = (parse(primary_id)?, parse(merge_id)?);
        if primary == merged {
            return Err(CrmockError::validation(format!(
                "record {primary} cannot be merged into itself"
            )));
        }
        let record = self.database.write(|tx| {
            let primary_row = require_live(tx, &ty.id, primary)?;
            require_live(tx, &ty.id, merged)?;
            let mut values = fetch_values(tx, &[primary, merged], None)?;
            let primary_values = values.remove(&primary).unwrap_or_default();
            let merged_values = values.remove(&merged).unwrap_or_default();

            tx.prepare_cached(
                "update objects set archived = 1, archived_at = ?, updated_at = ?, merged_into_id = ? \
                 where id = ?",
            )?
            .execute(params![timestamp, timestamp, primary, merged])?;

            let absorbed: Vec<(String, String)> = merged_values
                .iter()
                .filter(|(name, _)| !is_system_property(name) && !primary_values.contains_key(*name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            write_values(tx, primary, &absorbed, &timestamp, ChangeSource::Merge)?;

            let mut ids: Vec<String> = Vec::new();
            let merged_token = merged.to_string();
            for id in merged_ids(&primary_values)
                .chain(std::iter::once(merged_token.as_str()))
                .chain(merged_ids(&merged_values))
            {
                if !ids.iter().any(|known| known == id) {
                    ids.push(id.to_string());
                }
            }
            write_values(
                tx,
                primary,
                &[(HS_MERGED_OBJECT_IDS.to_string(), ids.join(";"))],
                &timestamp,
                ChangeSource::System,
            )?;
            association::transfer_edges(tx, merged, primary, &now)?;
            touch(tx, primary, &timestamp)?;
            let row = require_live(tx, &ty.id, primary_row.id)?;
            let mut shown: Vec<String> = absorbed.into_iter().map(|(n, _)| n).collect();
            shown.push(HS_MERGED_OBJECT_IDS.to_string());
            load_record(tx, row, &Projection::with(shown))
        })?;
        info!(object_type = %ty.name, primary, merged, "records merged");
        Ok(record)
    }

    pub fn count(&self, object_type: &str, archived: bool) -> Result<i64> {
        let ty = self.database.resolve(object_type)?;
        self.database.read(|conn| {
            Ok(conn.query_row(
                "select count(*) from objects where object_type_id = ? and archived = ?",
                params![ty.id, archived],
                |r| r.get(0),
            )?)
        })
    }
}
