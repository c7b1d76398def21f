// used for persistence
use rusqlite::{Connection, Transaction};
use tracing::debug;

use crate::error::Result;

/// Where the single backing connection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- Persistence -------------
pub struct Persistor {
    connection: Connection,
}

impl Persistor {
    pub fn new(mode: &PersistenceMode) -> Result<Self> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => {
                let connection = Connection::open(path)?;
                let _mode: String =
                    connection.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
                connection
            }
        };
        connection.pragma_update(None, "foreign_keys", true)?;
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch(
            "
            create table if not exists object_types (
                id text not null,
                name text not null,
                label_singular text not null,
                label_plural text not null,
                primary_display_property text null,
                searchable_properties text not null default '[]',
                is_custom integer not null,
                fully_qualified_name text not null,
                archived integer not null default 0,
                created_at text not null,
                updated_at text not null,
                constraint referenceable_object_type primary key (
                    id
                )
            );
            create unique index if not exists unique_live_object_type_name
                on object_types (name) where archived = 0;

            create table if not exists property_groups (
                object_type_id text not null,
                name text not null,
                label text not null,
                display_order integer not null default -1,
                archived integer not null default 0,
                constraint group_of_object_type foreign key (
                    object_type_id
                ) references object_types(id),
                constraint unique_property_group primary key (
                    object_type_id,
                    name
                )
            );

            create table if not exists property_definitions (
                id integer primary key autoincrement,
                object_type_id text not null,
                name text not null,
                label text not null,
                type text not null,
                field_type text not null,
                group_name text not null,
                description text not null default '',
                options text not null default '[]',
                display_order integer not null default -1,
                has_unique_value integer not null default 0,
                hidden integer not null default 0,
                form_field integer not null default 0,
                hubspot_defined integer not null default 0,
                read_only_value integer not null default 0,
                archived integer not null default 0,
                archived_at text null,
                created_at text not null,
                updated_at text not null,
                constraint definition_of_object_type foreign key (
                    object_type_id
                ) references object_types(id)
            );
            create unique index if not exists unique_live_property_definition
                on property_definitions (object_type_id, name) where archived = 0;

            -- merged_into_id is a weak back-reference and deliberately has no foreign key
            create table if not exists objects (
                id integer primary key autoincrement,
                object_type_id text not null,
                archived integer not null default 0,
                archived_at text null,
                created_at text not null,
                updated_at text not null,
                merged_into_id integer null,
                constraint object_of_object_type foreign key (
                    object_type_id
                ) references object_types(id)
            );
            create index if not exists objects_by_type
                on objects (object_type_id, archived, id);

            create table if not exists property_values (
                object_id integer not null,
                property_name text not null,
                value text not null,
                updated_at text not null,
                constraint value_of_object foreign key (
                    object_id
                ) references objects(id),
                constraint unique_property_value primary key (
                    object_id,
                    property_name
                )
            );
            create index if not exists property_values_by_value
                on property_values (property_name, value);

            create table if not exists property_value_history (
                id integer primary key autoincrement,
                object_id integer not null,
                property_name text not null,
                value text not null,
                source_type text not null,
                timestamp text not null,
                constraint history_of_object foreign key (
                    object_id
                ) references objects(id)
            );
            create index if not exists property_value_history_by_object
                on property_value_history (object_id, property_name);

            create table if not exists association_types (
                id integer primary key autoincrement,
                from_object_type_id text not null,
                to_object_type_id text not null,
                category text not null,
                label text null,
                inverse_label text null,
                name text null,
                created_at text not null
            );
            create unique index if not exists unique_association_type
                on association_types (from_object_type_id, to_object_type_id, category, ifnull(label, ''));

            -- association_type_id has no foreign key, deleted labels leave orphaned edges behind
            create table if not exists associations (
                from_object_id integer not null,
                to_object_id integer not null,
                association_type_id integer not null,
                association_category text not null,
                created_at text not null,
                constraint association_from_object foreign key (
                    from_object_id
                ) references objects(id),
                constraint association_to_object foreign key (
                    to_object_id
                ) references objects(id),
                constraint unique_association primary key (
                    from_object_id,
                    to_object_id,
                    association_type_id
                )
            );
            create index if not exists associations_by_target
                on associations (to_object_id);
            ",
        )?;
        debug!(?mode, "schema ready");
        Ok(Self { connection })
    }
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.connection.transaction()?)
    }
    /// Row counts per table, mostly for tooling and tests that inspect the store.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        const TABLES: [&str; 8] = [
            "object_types",
            "property_groups",
            "property_definitions",
            "objects",
            "property_values",
            "property_value_history",
            "association_types",
            "associations",
        ];
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            // table names come from the constant list above, never from callers
            let count: i64 = self.connection.query_row(
                &format!("select count(*) from {table}"),
                [],
                |r| r.get(0),
            )?;
            counts.push((table, count));
        }
        Ok(counts)
    }
}
