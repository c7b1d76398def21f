//! Property Catalog: the declared properties of each object type, their
//! groups, and the validation contract the record store writes through.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::{Database, OtherHasher};
use crate::datatype::{Comparison, PropertyType, format_timestamp, parse_timestamp};
use crate::error::{CrmockError, Result};

lazy_static! {
    static ref PROPERTY_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("property name pattern");
}

pub const HS_OBJECT_ID: &str = "hs_object_id";
pub const HS_CREATEDATE: &str = "hs_createdate";
pub const HS_LASTMODIFIEDDATE: &str = "hs_lastmodifieddate";
pub const HS_MERGED_OBJECT_IDS: &str = "hs_merged_object_ids";

/// Returned by every read regardless of projection.
pub const DEFAULT_PROPERTIES: [&str; 3] = [HS_OBJECT_ID, HS_CREATEDATE, HS_LASTMODIFIEDDATE];
/// Maintained by the store itself, never absorbed by merges.
pub const SYSTEM_PROPERTIES: [&str; 4] = [
    HS_OBJECT_ID,
    HS_CREATEDATE,
    HS_LASTMODIFIEDDATE,
    HS_MERGED_OBJECT_IDS,
];

pub fn is_system_property(name: &str) -> bool {
    SYSTEM_PROPERTIES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub hidden: bool,
}

impl PropertyOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            display_order: -1,
            hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    #[serde(skip)]
    pub object_type_id: String,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub field_type: String,
    pub group_name: String,
    pub description: String,
    pub options: Vec<PropertyOption>,
    pub display_order: i64,
    pub has_unique_value: bool,
    pub hidden: bool,
    pub form_field: bool,
    pub hubspot_defined: bool,
    pub read_only_value: bool,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropertyDefinition {
    /// Checks a candidate value against the declared type and returns the text
    /// to store. The empty string clears a value and is always accepted.
    pub fn normalize(&self, value: &str) -> Result<String> {
        if value.is_empty() {
            return Ok(String::new());
        }
        let mismatch = || CrmockError::PropertyValue {
            property: self.name.clone(),
            value: value.to_string(),
            expected: self.property_type.as_str(),
        };
        let normalized = self.property_type.normalize(value).ok_or_else(mismatch)?;
        if self.property_type == PropertyType::Enumeration && !self.options.is_empty() {
            let known = |v: &str| self.options.iter().any(|o| o.value == v);
            let accepted = if self.field_type == "checkbox" {
                normalized.split(';').all(known)
            } else {
                known(&normalized)
            };
            if !accepted {
                return Err(mismatch());
            }
        }
        Ok(normalized)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInput {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub field_type: String,
    /// `None` places the property in the type's default group.
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<PropertyOption>,
    #[serde(default)]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub has_unique_value: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub form_field: bool,
}

impl PropertyInput {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        property_type: PropertyType,
        field_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            property_type,
            field_type: field_type.into(),
            group_name: None,
            description: String::new(),
            options: Vec::new(),
            display_order: None,
            has_unique_value: false,
            hidden: false,
            form_field: false,
        }
    }
    pub fn in_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }
    pub fn unique(mut self) -> Self {
        self.has_unique_value = true;
        self
    }
    pub fn with_options<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let value = v.into();
                PropertyOption {
                    label: value.clone(),
                    value,
                    display_order: i as i64,
                    hidden: false,
                }
            })
            .collect();
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub field_type: Option<String>,
    pub options: Option<Vec<PropertyOption>>,
    pub display_order: Option<i64>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroup {
    pub name: String,
    pub label: String,
    #[serde(default = "unordered")]
    pub display_order: i64,
    #[serde(default)]
    pub archived: bool,
}

fn unordered() -> i64 {
    -1
}

impl PropertyGroup {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            display_order: -1,
            archived: false,
        }
    }
}

// ------------- Storage -------------
const DEFINITION_COLUMNS: &str = "object_type_id, name, label, type, field_type, group_name, \
    description, options, display_order, has_unique_value, hidden, form_field, hubspot_defined, \
    read_only_value, archived, archived_at, created_at, updated_at";

struct RawDefinition {
    object_type_id: String,
    name: String,
    label: String,
    property_type: String,
    field_type: String,
    group_name: String,
    description: String,
    options: String,
    display_order: i64,
    has_unique_value: bool,
    hidden: bool,
    form_field: bool,
    hubspot_defined: bool,
    read_only_value: bool,
    archived: bool,
    archived_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawDefinition {
    fn read(r: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            object_type_id: r.get(0)?,
            name: r.get(1)?,
            label: r.get(2)?,
            property_type: r.get(3)?,
            field_type: r.get(4)?,
            group_name: r.get(5)?,
            description: r.get(6)?,
            options: r.get(7)?,
            display_order: r.get(8)?,
            has_unique_value: r.get(9)?,
            hidden: r.get(10)?,
            form_field: r.get(11)?,
            hubspot_defined: r.get(12)?,
            read_only_value: r.get(13)?,
            archived: r.get(14)?,
            archived_at: r.get(15)?,
            created_at: r.get(16)?,
            updated_at: r.get(17)?,
        })
    }
    fn into_definition(self) -> Result<PropertyDefinition> {
        let property_type = self.property_type.parse().map_err(|_| CrmockError::DataCorruption {
            message: format!(
                "property {} has unknown type '{}'",
                self.name, self.property_type
            ),
        })?;
        Ok(PropertyDefinition {
            object_type_id: self.object_type_id,
            name: self.name,
            label: self.label,
            property_type,
            field_type: self.field_type,
            group_name: self.group_name,
            description: self.description,
            options: serde_json::from_str(&self.options)?,
            display_order: self.display_order,
            has_unique_value: self.has_unique_value,
            hidden: self.hidden,
            form_field: self.form_field,
            hubspot_defined: self.hubspot_defined,
            read_only_value: self.read_only_value,
            archived: self.archived,
            archived_at: self.archived_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn query_definitions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<PropertyDefinition>> {
    let mut statement = conn.prepare_cached(sql)?;
    let raw = statement
        .query_map(params, RawDefinition::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawDefinition::into_definition).collect()
}

pub(crate) fn live_definition(
    conn: &Connection,
    object_type_id: &str,
    name: &str,
) -> Result<Option<PropertyDefinition>> {
    let sql = format!(
        "select {DEFINITION_COLUMNS} from property_definitions \
         where object_type_id = ? and name = ? and archived = 0"
    );
    Ok(query_definitions(conn, &sql, params![object_type_id, name])?
        .into_iter()
        .next())
}

pub(crate) fn group_exists(conn: &Connection, object_type_id: &str, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "select 1 from property_groups where object_type_id = ? and name = ? and archived = 0",
            params![object_type_id, name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn insert_group(
    conn: &Connection,
    object_type_id: &str,
    group: &PropertyGroup,
) -> Result<()> {
    conn.prepare_cached(
        "insert or ignore into property_groups (object_type_id, name, label, display_order, archived) \
         values (?, ?, ?, ?, 0)",
    )?
    .execute(params![
        object_type_id,
        group.name,
        group.label,
        group.display_order
    ])?;
    Ok(())
}

/// Flags only the store itself may set.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemFlags {
    pub hubspot_defined: bool,
    pub read_only_value: bool,
}

/// Inserts a definition unless one with the same name already exists for the
/// type (live or archived). Returns whether a row was written.
pub(crate) fn insert_definition(
    conn: &Connection,
    object_type_id: &str,
    input: &PropertyInput,
    group_name: &str,
    flags: SystemFlags,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let options = serde_json::to_string(&input.options)?;
    let timestamp = format_timestamp(now);
    let written = conn
        .prepare_cached(
            "insert into property_definitions (object_type_id, name, label, type, field_type, \
             group_name, description, options, display_order, has_unique_value, hidden, form_field, \
             hubspot_defined, read_only_value, archived, created_at, updated_at) \
             select ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, ?15, ?15 \
             where not exists (select 1 from property_definitions \
                               where object_type_id = ?1 and name = ?2 and archived = 0)",
        )?
        .execute(params![
            object_type_id,
            input.name,
            input.label,
            input.property_type.as_str(),
            input.field_type,
            group_name,
            input.description,
            options,
            input.display_order.unwrap_or(-1),
            input.has_unique_value,
            input.hidden,
            input.form_field,
            flags.hubspot_defined,
            flags.read_only_value,
            timestamp,
        ])?;
    Ok(written > 0)
}

// ------------- Validation -------------

/// The definitions of one object type, loaded once per operation so that every
/// value of a write is checked against the same snapshot.
#[derive(Debug)]
pub(crate) struct PropertyRules {
    live: HashMap<String, PropertyDefinition, OtherHasher>,
    archived: HashSet<String, OtherHasher>,
}

impl PropertyRules {
    pub(crate) fn load(conn: &Connection, object_type_id: &str) -> Result<Self> {
        let sql = format!(
            "select {DEFINITION_COLUMNS} from property_definitions \
             where object_type_id = ? order by display_order, name"
        );
        let mut live = HashMap::default();
        let mut archived = HashSet::default();
        for definition in query_definitions(conn, &sql, params![object_type_id])? {
            if definition.archived {
                archived.insert(definition.name.clone());
            } else {
                live.insert(definition.name.clone(), definition);
            }
        }
        archived.retain(|name| !live.contains_key(name));
        Ok(Self { live, archived })
    }
    pub(crate) fn get(&self, name: &str) -> Option<&PropertyDefinition> {
        self.live.get(name)
    }
    /// Unknown names pass through untouched; archived-only names are not writable.
    pub(crate) fn normalize(&self, name: &str, value: &str) -> Result<String> {
        match self.live.get(name) {
            Some(definition) => definition.normalize(value),
            None if self.archived.contains(name) => Err(CrmockError::validation(format!(
                "property {name} is archived and cannot be written"
            ))),
            None => Ok(value.to_string()),
        }
    }
    pub(crate) fn check_writable(&self, name: &str) -> Result<()> {
        let read_only = self
            .live
            .get(name)
            .map(|d| d.read_only_value)
            .unwrap_or_else(|| is_system_property(name));
        if read_only {
            return Err(CrmockError::validation(format!(
                "property {name} is read-only"
            )));
        }
        Ok(())
    }
    pub(crate) fn is_unique(&self, name: &str) -> bool {
        self.live.get(name).is_some_and(|d| d.has_unique_value)
    }
    pub(crate) fn can_identify(&self, name: &str) -> bool {
        name == HS_OBJECT_ID || self.is_unique(name)
    }
    pub(crate) fn default_id_property(&self) -> &str {
        self.live
            .values()
            .filter(|d| d.has_unique_value && d.name != HS_OBJECT_ID)
            .min_by(|a, b| (a.display_order, &a.name).cmp(&(b.display_order, &b.name)))
            .map(|d| d.name.as_str())
            .unwrap_or(HS_OBJECT_ID)
    }
    pub(crate) fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.live.get(name).map(|d| d.property_type)
    }
    pub(crate) fn comparison(&self, name: &str) -> Comparison {
        self.property_type(name)
            .map(|t| t.comparison())
            .unwrap_or(Comparison::Text)
    }
}

// ------------- Catalog -------------
pub struct PropertyCatalog<'db> {
    database: &'db Database,
}

impl<'db> PropertyCatalog<'db> {
    pub fn new(database: &'db Database) -> Self {
        Self { database }
    }

    pub fn declare(&self, object_type: &str, input: PropertyInput) -> Result<PropertyDefinition> {
        let ty = self.database.resolve(object_type)?;
        if !PROPERTY_NAME.is_match(&input.name) {
            return Err(CrmockError::validation(format!(
                "'{}' is not a valid property name",
                input.name
            )));
        }
        let now = self.database.now();
        let group_name = input.group_name.clone().unwrap_or_else(|| ty.default_group());
        let definition = self.database.write(|tx| {
            if live_definition(tx, &ty.id, &input.name)?.is_some() {
                return Err(CrmockError::conflict(format!(
                    "property {} already exists on {}",
                    input.name, ty.name
                )));
            }
            if !group_exists(tx, &ty.id, &group_name)? {
                return Err(CrmockError::validation(format!(
                    "property group {group_name} does not exist on {}",
                    ty.name
                )));
            }
            insert_definition(tx, &ty.id, &input, &group_name, SystemFlags::default(), &now)?;
            live_definition(tx, &ty.id, &input.name)?.ok_or_else(|| {
                CrmockError::Invariant(format!("property {} vanished after insert", input.name))
            })
        })?;
        info!(object_type = %ty.name, property = %definition.name, "property declared");
        Ok(definition)
    }

    pub fn get(&self, object_type: &str, name: &str) -> Result<PropertyDefinition> {
        let ty = self.database.resolve(object_type)?;
        self.database
            .read(|conn| live_definition(conn, &ty.id, name))?
            .ok_or_else(|| CrmockError::not_found(format!("property {name} on {}", ty.name)))
    }

    /// Live definitions, or archived ones when `archived` is set, by display order.
    pub fn list(&self, object_type: &str, archived: bool) -> Result<Vec<PropertyDefinition>> {
        let ty = self.database.resolve(object_type)?;
        let sql = format!(
            "select {DEFINITION_COLUMNS} from property_definitions \
             where object_type_id = ? and archived = ? order by display_order, name"
        );
        self.database
            .read(|conn| query_definitions(conn, &sql, params![ty.id, archived]))
    }

    pub fn update(
        &self,
        object_type: &str,
        name: &str,
        update: PropertyUpdate,
    ) -> Result<PropertyDefinition> {
        let ty = self.database.resolve(object_type)?;
        let now = format_timestamp(&self.database.now());
        self.database.write(|tx| {
            let current = live_definition(tx, &ty.id, name)?
                .ok_or_else(|| CrmockError::not_found(format!("property {name} on {}", ty.name)))?;
            if current.read_only_value {
                return Err(CrmockError::validation(format!(
                    "property {name} is read-only"
                )));
            }
            let group_name = update.group_name.unwrap_or(current.group_name);
            if !group_exists(tx, &ty.id, &group_name)? {
                return Err(CrmockError::validation(format!(
                    "property group {group_name} does not exist on {}",
                    ty.name
                )));
            }
            let options = serde_json::to_string(&update.options.unwrap_or(current.options))?;
            tx.execute(
                "update property_definitions set label = ?, description = ?, group_name = ?, \
                 field_type = ?, options = ?, display_order = ?, hidden = ?, updated_at = ? \
                 where object_type_id = ? and name = ? and archived = 0",
                params![
                    update.label.unwrap_or(current.label),
                    update.description.unwrap_or(current.description),
                    group_name,
                    update.field_type.unwrap_or(current.field_type),
                    options,
                    update.display_order.unwrap_or(current.display_order),
                    update.hidden.unwrap_or(current.hidden),
                    now,
                    ty.id,
                    name,
                ],
            )?;
            live_definition(tx, &ty.id, name)?
                .ok_or_else(|| CrmockError::Invariant(format!("property {name} vanished")))
        })
    }

    /// Soft-deletes the live definition. Archiving an archived property is a no-op.
    pub fn archive(&self, object_type: &str, name: &str) -> Result<()> {
        let ty = self.database.resolve(object_type)?;
        let now = format_timestamp(&self.database.now());
        self.database.write(|tx| {
            match live_definition(tx, &ty.id, name)? {
                Some(definition) if definition.hubspot_defined => Err(CrmockError::validation(
                    format!("property {name} is defined by the system and cannot be archived"),
                )),
                Some(_) => {
                    tx.execute(
                        "update property_definitions set archived = 1, archived_at = ?, updated_at = ? \
                         where object_type_id = ? and name = ? and archived = 0",
                        params![now, now, ty.id, name],
                    )?;
                    info!(object_type = %ty.name, property = %name, "property archived");
                    Ok(())
                }
                None => {
                    let known: bool = tx.query_row(
                        "select exists(select 1 from property_definitions where object_type_id = ? and name = ?)",
                        params![ty.id, name],
                        |r| r.get(0),
                    )?;
                    if known {
                        Ok(())
                    } else {
                        Err(CrmockError::not_found(format!("property {name} on {}", ty.name)))
                    }
                }
            }
        })
    }

    /// The validation contract the record store writes through: returns the
    /// text that would be stored for `value`.
    pub fn validate(&self, object_type: &str, name: &str, value: &str) -> Result<String> {
        let ty = self.database.resolve(object_type)?;
        let rules = self.database.read(|conn| PropertyRules::load(conn, &ty.id))?;
        rules.normalize(name, value)
    }

    /// The property batch upserts match on when the caller names none.
    pub fn default_id_property(&self, object_type: &str) -> Result<String> {
        let ty = self.database.resolve(object_type)?;
        let rules = self.database.read(|conn| PropertyRules::load(conn, &ty.id))?;
        Ok(rules.default_id_property().to_string())
    }

    pub fn create_group(&self, object_type: &str, group: PropertyGroup) -> Result<PropertyGroup> {
        let ty = self.database.resolve(object_type)?;
        if !PROPERTY_NAME.is_match(&group.name) {
            return Err(CrmockError::validation(format!(
                "'{}' is not a valid property group name",
                group.name
            )));
        }
        self.database.write(|tx| {
            let exists: bool = tx.query_row(
                "select exists(select 1 from property_groups where object_type_id = ? and name = ?)",
                params![ty.id, group.name],
                |r| r.get(0),
            )?;
            if exists {
                return Err(CrmockError::conflict(format!(
                    "property group {} already exists on {}",
                    group.name, ty.name
                )));
            }
            insert_group(tx, &ty.id, &group)
        })?;
        Ok(PropertyGroup {
            archived: false,
            ..group
        })
    }

    pub fn list_groups(&self, object_type: &str) -> Result<Vec<PropertyGroup>> {
        let ty = self.database.resolve(object_type)?;
        self.database.read(|conn| {
            let mut statement = conn.prepare_cached(
                "select name, label, display_order, archived from property_groups \
                 where object_type_id = ? and archived = 0 order by display_order, name",
            )?;
            let groups = statement
                .query_map(params![ty.id], |r| {
                    Ok(PropertyGroup {
                        name: r.get(0)?,
                        label: r.get(1)?,
                        display_order: r.get(2)?,
                        archived: r.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(property_type: PropertyType, field_type: &str) -> PropertyDefinition {
        let now = Utc::now();
        PropertyDefinition {
            object_type_id: "0-1".into(),
            name: "sample".into(),
            label: "Probe".into(),
            property_type,
            field_type: field_type.into(),
            group_name: "contactinformation".into(),
            description: String::new(),
            options: vec![PropertyOption::new("Red", "red"), PropertyOption::new("Blue", "blue")],
            display_order: -1,
            has_unique_value: false,
            hidden: false,
            form_field: false,
            hubspot_defined: false,
            read_only_value: false,
            archived: false,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn enumeration_values_must_be_options() {
        let select = definition(PropertyType::Enumeration, "select");
        assert_eq!(select.normalize("red").unwrap(), "red");
        assert!(select.normalize("green").is_err());
        assert!(select.normalize("red;blue").is_err());
        let checkbox = definition(PropertyType::Enumeration, "checkbox");
        assert_eq!(checkbox.normalize("red;blue").unwrap(), "red;blue");
    }

    #[test]
    fn empty_values_clear_regardless_of_type() {
        assert_eq!(definition(PropertyType::Number, "number").normalize("").unwrap(), "");
    }

    #[test]
    fn numeric_mismatch_names_property_and_value() {
        let err = definition(PropertyType::Number, "number")
            .normalize("many")
            .unwrap_err();
        match err {
            CrmockError::PropertyValue { property, value, .. } => {
                assert_eq!(property, "sample");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
