//! Type Registry: which object types exist and how a caller-supplied token
//! (a name such as `contacts` or an id such as `0-1`) resolves to one.

use std::collections::HashMap;
use std::sync::Arc;

use bimap::BiMap;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::association;
use crate::database::{Database, OtherHasher};
use crate::datatype::{format_timestamp, parse_timestamp};
use crate::error::{CrmockError, Result};
use crate::property::{self, PropertyInput, SystemFlags};
use crate::seed;

lazy_static! {
    static ref TYPE_NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("type name pattern");
}

/// Prefix of every custom type id.
const CUSTOM_PREFIX: &str = "2-";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectType {
    pub id: String,
    pub name: String,
    pub label_singular: String,
    pub label_plural: String,
    pub primary_display_property: Option<String>,
    pub searchable_properties: Vec<String>,
    pub is_custom: bool,
    pub fully_qualified_name: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectType {
    pub fn default_group(&self) -> String {
        match seed::standard_type(&self.id) {
            Some(standard) => standard.group.to_string(),
            None => format!("{}_information", self.name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTypeLabels {
    pub singular: String,
    pub plural: String,
}

/// Everything needed to register a custom object type in one call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub name: String,
    pub labels: ObjectTypeLabels,
    #[serde(default)]
    pub primary_display_property: Option<String>,
    #[serde(default)]
    pub searchable_properties: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyInput>,
    /// Tokens of the types that get default association types to and from the new one.
    #[serde(default)]
    pub associated_objects: Vec<String>,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: ObjectTypeLabels {
                singular: singular.into(),
                plural: plural.into(),
            },
            primary_display_property: None,
            searchable_properties: Vec::new(),
            properties: Vec::new(),
            associated_objects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTypeUpdate {
    pub label_singular: Option<String>,
    pub label_plural: Option<String>,
    pub primary_display_property: Option<String>,
    pub searchable_properties: Option<Vec<String>>,
}

// ------------- Keeper -------------

/// In-memory view of `object_types`. Holds archived types too, so that
/// records of an archived type still know their labels; only live types
/// take part in name resolution.
#[derive(Debug)]
pub struct TypeKeeper {
    kept: HashMap<String, Arc<ObjectType>, OtherHasher>,
    names: BiMap<String, String>,
}

impl TypeKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
            names: BiMap::new(),
        }
    }
    pub fn keep(&mut self, object_type: ObjectType) -> Arc<ObjectType> {
        let id = object_type.id.clone();
        if object_type.archived {
            self.names.remove_by_right(&id);
        } else {
            self.names.insert(object_type.name.clone(), id.clone());
        }
        let kept = Arc::new(object_type);
        self.kept.insert(id, kept.clone());
        kept
    }
    /// Names win over ids, although the two never overlap in practice.
    pub fn resolve(&self, token: &str) -> Option<Arc<ObjectType>> {
        let id = match self.names.get_by_left(token) {
            Some(id) => id.as_str(),
            None if self.names.contains_right(token) => token,
            None => return None,
        };
        self.kept.get(id).cloned()
    }
    /// Falls back to the singular label, so `associations.contact` finds `contacts`.
    pub fn resolve_singular(&self, token: &str) -> Option<Arc<ObjectType>> {
        self.resolve(token).or_else(|| {
            self.live()
                .into_iter()
                .find(|t| t.label_singular.eq_ignore_ascii_case(token))
        })
    }
    pub fn live(&self) -> Vec<Arc<ObjectType>> {
        let mut live: Vec<_> = self
            .kept
            .values()
            .filter(|t| !t.archived)
            .cloned()
            .collect();
        live.sort_by_key(|t| id_order(&t.id));
        live
    }
    pub fn len(&self) -> usize {
        self.names.len()
    }
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for TypeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

/// Orders `0-2` before `0-14` and standard types before custom ones.
fn id_order(id: &str) -> (u32, u32) {
    let mut parts = id.splitn(2, '-').map(|p| p.parse::<u32>().unwrap_or(u32::MAX));
    (
        parts.next().unwrap_or(u32::MAX),
        parts.next().unwrap_or(u32::MAX),
    )
}

// ------------- Storage -------------
const TYPE_COLUMNS: &str = "id, name, label_singular, label_plural, primary_display_property, \
    searchable_properties, is_custom, fully_qualified_name, archived, created_at, updated_at";

pub(crate) fn insert_type(conn: &Connection, object_type: &ObjectType, ignore: bool) -> Result<()> {
    let verb = if ignore { "insert or ignore" } else { "insert" };
    let timestamp = format_timestamp(&object_type.created_at);
    conn.prepare_cached(&format!(
        "{verb} into object_types ({TYPE_COLUMNS}) values (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)"
    ))?
    .execute(params![
        object_type.id,
        object_type.name,
        object_type.label_singular,
        object_type.label_plural,
        object_type.primary_display_property,
        serde_json::to_string(&object_type.searchable_properties)?,
        object_type.is_custom,
        object_type.fully_qualified_name,
        timestamp,
        format_timestamp(&object_type.updated_at),
    ])?;
    Ok(())
}

fn read_type(r: &rusqlite::Row) -> rusqlite::Result<RawType> {
    Ok(RawType {
        id: r.get(0)?,
        name: r.get(1)?,
        label_singular: r.get(2)?,
        label_plural: r.get(3)?,
        primary_display_property: r.get(4)?,
        searchable_properties: r.get(5)?,
        is_custom: r.get(6)?,
        fully_qualified_name: r.get(7)?,
        archived: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

struct RawType {
    id: String,
    name: String,
    label_singular: String,
    label_plural: String,
    primary_display_property: Option<String>,
    searchable_properties: String,
    is_custom: bool,
    fully_qualified_name: String,
    archived: bool,
    created_at: String,
    updated_at: String,
}

fn into_type(raw: RawType) -> Result<ObjectType> {
    Ok(ObjectType {
        id: raw.id,
        name: raw.name,
        label_singular: raw.label_singular,
        label_plural: raw.label_plural,
        primary_display_property: raw.primary_display_property,
        searchable_properties: serde_json::from_str(&raw.searchable_properties)?,
        is_custom: raw.is_custom,
        fully_qualified_name: raw.fully_qualified_name,
        archived: raw.archived,
        created_at: parse_timestamp(&raw.created_at)?,
        updated_at: parse_timestamp(&raw.updated_at)?,
    })
}

/// Every persisted type, archived ones included.
pub(crate) fn restore(conn: &Connection) -> Result<Vec<ObjectType>> {
    let mut statement = conn.prepare(&format!("select {TYPE_COLUMNS} from object_types"))?;
    let rows = statement
        .query_map([], read_type)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_type).collect()
}

fn load_type(conn: &Connection, id: &str) -> Result<ObjectType> {
    let raw = conn.query_row(
        &format!("select {TYPE_COLUMNS} from object_types where id = ?"),
        params![id],
        read_type,
    )?;
    into_type(raw)
}

fn next_custom_id(conn: &Connection) -> Result<String> {
    let mut statement =
        conn.prepare_cached("select id from object_types where is_custom = 1")?;
    let ids = statement
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let highest = ids
        .iter()
        .filter_map(|id| id.strip_prefix(CUSTOM_PREFIX))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(format!("{CUSTOM_PREFIX}{}", highest + 1))
}

fn live_name_taken(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn.query_row(
        "select exists(select 1 from object_types where name = ? and archived = 0)",
        params![name],
        |r| r.get(0),
    )?)
}

fn count_live_records(conn: &Connection, object_type_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "select count(*) from objects where object_type_id = ? and archived = 0",
        params![object_type_id],
        |r| r.get(0),
    )?)
}

// ------------- Registry -------------
pub struct TypeRegistry<'db> {
    database: &'db Database,
}

impl<'db> TypeRegistry<'db> {
    pub fn new(database: &'db Database) -> Self {
        Self { database }
    }

    pub fn resolve(&self, token: &str) -> Result<Arc<ObjectType>> {
        self.database.resolve(token)
    }

    pub fn list(&self) -> Result<Vec<Arc<ObjectType>>> {
        Ok(self.database.type_keeper().lock()?.live())
    }

    /// Registers a custom type together with its properties and default
    /// associations, all in one transaction.
    pub fn register(&self, schema: SchemaDefinition) -> Result<Arc<ObjectType>> {
        if !TYPE_NAME.is_match(&schema.name) {
            return Err(CrmockError::validation(format!(
                "'{}' is not a valid object type name",
                schema.name
            )));
        }
        if schema.labels.singular.trim().is_empty() || schema.labels.plural.trim().is_empty() {
            return Err(CrmockError::validation("object type labels must not be empty"));
        }
        for named in schema
            .primary_display_property
            .iter()
            .chain(schema.searchable_properties.iter())
        {
            let declared = schema.properties.iter().any(|p| &p.name == named)
                || property::is_system_property(named);
            if !declared {
                return Err(CrmockError::validation(format!(
                    "property {named} is not part of the schema"
                )));
            }
        }
        let mut associated = Vec::with_capacity(schema.associated_objects.len());
        for token in &schema.associated_objects {
            associated.push(self.database.resolve(token)?);
        }
        let now = self.database.now();
        let object_type = self.database.write(|tx| {
            if live_name_taken(tx, &schema.name)? {
                return Err(CrmockError::conflict(format!(
                    "an object type named {} already exists",
                    schema.name
                )));
            }
            let object_type = ObjectType {
                id: next_custom_id(tx)?,
                name: schema.name.clone(),
                label_singular: schema.labels.singular.clone(),
                label_plural: schema.labels.plural.clone(),
                primary_display_property: schema.primary_display_property.clone(),
                searchable_properties: schema.searchable_properties.clone(),
                is_custom: true,
                fully_qualified_name: format!("p0_{}", schema.name),
                archived: false,
                created_at: now,
                updated_at: now,
            };
            insert_type(tx, &object_type, false)?;
            seed::seed_type_scaffolding(tx, &object_type, &now)?;
            let default_group = object_type.default_group();
            for input in &schema.properties {
                let group_name = input.group_name.as_deref().unwrap_or(&default_group);
                if !property::group_exists(tx, &object_type.id, group_name)? {
                    return Err(CrmockError::validation(format!(
                        "property group {group_name} does not exist on {}",
                        object_type.name
                    )));
                }
                let written = property::insert_definition(
                    tx,
                    &object_type.id,
                    input,
                    group_name,
                    SystemFlags::default(),
                    &now,
                )?;
                if !written {
                    return Err(CrmockError::conflict(format!(
                        "property {} is declared twice",
                        input.name
                    )));
                }
            }
            for other in &associated {
                association::default_type(tx, &object_type.id, &other.id, &now)?;
                association::default_type(tx, &other.id, &object_type.id, &now)?;
            }
            Ok(object_type)
        })?;
        info!(id = %object_type.id, name = %object_type.name, "object type registered");
        Ok(self.database.type_keeper().lock()?.keep(object_type))
    }

    pub fn update(&self, token: &str, update: ObjectTypeUpdate) -> Result<Arc<ObjectType>> {
        let current = self.database.resolve(token)?;
        let now = format_timestamp(&self.database.now());
        let updated = self.database.write(|tx| {
            let primary = update
                .primary_display_property
                .clone()
                .or_else(|| current.primary_display_property.clone());
            let searchable = update
                .searchable_properties
                .clone()
                .unwrap_or_else(|| current.searchable_properties.clone());
            for named in primary.iter().chain(searchable.iter()) {
                if property::live_definition(tx, &current.id, named)?.is_none() {
                    return Err(CrmockError::validation(format!(
                        "property {named} is not declared on {}",
                        current.name
                    )));
                }
            }
            tx.execute(
                "update object_types set label_singular = ?, label_plural = ?, \
                 primary_display_property = ?, searchable_properties = ?, updated_at = ? \
                 where id = ?",
                params![
                    update
                        .label_singular
                        .as_deref()
                        .unwrap_or(&current.label_singular),
                    update
                        .label_plural
                        .as_deref()
                        .unwrap_or(&current.label_plural),
                    primary,
                    serde_json::to_string(&searchable)?,
                    now,
                    current.id,
                ],
            )?;
            load_type(tx, &current.id)
        })?;
        Ok(self.database.type_keeper().lock()?.keep(updated))
    }

    /// Custom types only, and only once no live records remain.
    pub fn archive(&self, token: &str) -> Result<()> {
        let current = self.database.resolve(token)?;
        if !current.is_custom {
            return Err(CrmockError::validation(format!(
                "{} is a standard object type and cannot be archived",
                current.name
            )));
        }
        let now = format_timestamp(&self.database.now());
        let archived = self.database.write(|tx| {
            let live = count_live_records(tx, &current.id)?;
            if live > 0 {
                warn!(name = %current.name, live, "refusing to archive a type with live records");
                return Err(CrmockError::conflict(format!(
                    "{} still has {live} live records",
                    current.name
                )));
            }
            tx.execute(
                "update object_types set archived = 1, updated_at = ? where id = ?",
                params![now, current.id],
            )?;
            load_type(tx, &current.id)
        })?;
        info!(id = %archived.id, name = %archived.name, "object type archived");
        self.database.type_keeper().lock()?.keep(archived);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_type(id: &str, name: &str, archived: bool) -> ObjectType {
        let now = Utc::now();
        ObjectType {
            id: id.into(),
            name: name.into(),
            label_singular: name.trim_end_matches('s').into(),
            label_plural: name.into(),
            primary_display_property: None,
            searchable_properties: vec![],
            is_custom: id.starts_with(CUSTOM_PREFIX),
            fully_qualified_name: name.into(),
            archived,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn resolves_by_name_and_id() {
        let mut keeper = TypeKeeper::new();
        keeper.keep(object_type("0-1", "contacts", false));
        assert_eq!(keeper.resolve("contacts").unwrap().id, "0-1");
        assert_eq!(keeper.resolve("0-1").unwrap().name, "contacts");
        assert!(keeper.resolve("companies").is_none());
    }

    #[test]
    fn archived_types_stop_resolving() {
        let mut keeper = TypeKeeper::new();
        keeper.keep(object_type("2-1", "cars", false));
        keeper.keep(object_type("2-1", "cars", true));
        assert!(keeper.resolve("cars").is_none());
        assert!(keeper.resolve("2-1").is_none());
        assert!(keeper.live().is_empty());
        keeper.keep(object_type("2-2", "cars", false));
        assert_eq!(keeper.resolve("cars").unwrap().id, "2-2");
    }

    #[test]
    fn singular_labels_resolve() {
        let mut keeper = TypeKeeper::new();
        keeper.keep(object_type("0-1", "contacts", false));
        assert_eq!(keeper.resolve_singular("contact").unwrap().id, "0-1");
    }

    #[test]
    fn live_types_are_listed_in_id_order() {
        let mut keeper = TypeKeeper::new();
        for (id, name) in [("0-14", "quotes"), ("2-1", "cars"), ("0-2", "companies")] {
            keeper.keep(object_type(id, name, false));
        }
        let ids: Vec<_> = keeper.live().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["0-2", "0-14", "2-1"]);
    }
}
