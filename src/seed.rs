//! The portal every fresh database starts with: the standard object types,
//! their default property groups and properties, and the association types
//! between them with their upstream ids.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::association::{self, AssociationCategory};
use crate::datatype::PropertyType;
use crate::error::Result;
use crate::property::{
    self, HS_CREATEDATE, HS_LASTMODIFIEDDATE, HS_MERGED_OBJECT_IDS, HS_OBJECT_ID, PropertyGroup,
    PropertyInput, SystemFlags,
};
use crate::registry::{self, ObjectType};

pub struct SeedProperty {
    pub name: &'static str,
    pub label: &'static str,
    pub property_type: PropertyType,
    pub field_type: &'static str,
    pub has_unique_value: bool,
    pub options: &'static [&'static str],
}

const fn text(name: &'static str, label: &'static str) -> SeedProperty {
    SeedProperty {
        name,
        label,
        property_type: PropertyType::String,
        field_type: "text",
        has_unique_value: false,
        options: &[],
    }
}

const fn textarea(name: &'static str, label: &'static str) -> SeedProperty {
    SeedProperty {
        field_type: "textarea",
        ..text(name, label)
    }
}

const fn number(name: &'static str, label: &'static str) -> SeedProperty {
    SeedProperty {
        property_type: PropertyType::Number,
        field_type: "number",
        ..text(name, label)
    }
}

const fn datetime(name: &'static str, label: &'static str) -> SeedProperty {
    SeedProperty {
        property_type: PropertyType::Datetime,
        field_type: "date",
        ..text(name, label)
    }
}

const fn select(
    name: &'static str,
    label: &'static str,
    options: &'static [&'static str],
) -> SeedProperty {
    SeedProperty {
        property_type: PropertyType::Enumeration,
        field_type: "select",
        options,
        ..text(name, label)
    }
}

const fn unique(property: SeedProperty) -> SeedProperty {
    SeedProperty {
        has_unique_value: true,
        ..property
    }
}

impl SeedProperty {
    fn input(&self) -> PropertyInput {
        let input = PropertyInput::new(self.name, self.label, self.property_type, self.field_type)
            .with_options(self.options.iter().copied());
        if self.has_unique_value {
            input.unique()
        } else {
            input
        }
    }
}

pub struct StandardType {
    pub id: &'static str,
    pub name: &'static str,
    pub singular: &'static str,
    pub plural: &'static str,
    pub primary_display_property: &'static str,
    pub searchable: &'static [&'static str],
    pub group: &'static str,
    pub properties: &'static [SeedProperty],
}

pub const STANDARD_TYPES: &[StandardType] = &[
    StandardType {
        id: "0-1",
        name: "contacts",
        singular: "Contact",
        plural: "Contacts",
        primary_display_property: "email",
        searchable: &["email", "firstname", "lastname", "phone", "company"],
        group: "contactinformation",
        properties: &[
            unique(text("email", "Email")),
            text("firstname", "First Name"),
            text("lastname", "Last Name"),
            SeedProperty {
                field_type: "phonenumber",
                ..text("phone", "Phone Number")
            },
            text("company", "Company Name"),
            text("website", "Website URL"),
            text("jobtitle", "Job Title"),
            text("city", "City"),
            select(
                "lifecyclestage",
                "Lifecycle Stage",
                &[
                    "subscriber",
                    "lead",
                    "marketingqualifiedlead",
                    "salesqualifiedlead",
                    "opportunity",
                    "customer",
                    "evangelist",
                    "other",
                ],
            ),
        ],
    },
    StandardType {
        id: "0-2",
        name: "companies",
        singular: "Company",
        plural: "Companies",
        primary_display_property: "name",
        searchable: &["name", "domain", "website", "phone"],
        group: "companyinformation",
        properties: &[
            text("name", "Company name"),
            text("domain", "Company Domain Name"),
            text("website", "Website URL"),
            text("phone", "Phone Number"),
            text("industry", "Industry"),
            text("city", "City"),
            number("numberofemployees", "Number of Employees"),
            number("annualrevenue", "Annual Revenue"),
        ],
    },
    StandardType {
        id: "0-3",
        name: "deals",
        singular: "Deal",
        plural: "Deals",
        primary_display_property: "dealname",
        searchable: &["dealname"],
        group: "dealinformation",
        properties: &[
            text("dealname", "Deal Name"),
            number("amount", "Amount"),
            text("dealstage", "Deal Stage"),
            text("pipeline", "Pipeline"),
            datetime("closedate", "Close Date"),
        ],
    },
    StandardType {
        id: "0-5",
        name: "tickets",
        singular: "Ticket",
        plural: "Tickets",
        primary_display_property: "subject",
        searchable: &["subject", "content"],
        group: "ticketinformation",
        properties: &[
            text("subject", "Ticket name"),
            textarea("content", "Ticket description"),
            text("hs_pipeline", "Pipeline"),
            text("hs_pipeline_stage", "Ticket status"),
            select(
                "hs_ticket_priority",
                "Priority",
                &["LOW", "MEDIUM", "HIGH", "URGENT"],
            ),
        ],
    },
    StandardType {
        id: "0-7",
        name: "products",
        singular: "Product",
        plural: "Products",
        primary_display_property: "name",
        searchable: &["name", "hs_sku", "description"],
        group: "productinformation",
        properties: &[
            text("name", "Name"),
            textarea("description", "Description"),
            number("price", "Unit price"),
            text("hs_sku", "SKU"),
        ],
    },
    StandardType {
        id: "0-8",
        name: "line_items",
        singular: "Line Item",
        plural: "Line Items",
        primary_display_property: "name",
        searchable: &["name"],
        group: "lineiteminformation",
        properties: &[
            text("name", "Name"),
            number("quantity", "Quantity"),
            number("price", "Unit price"),
            number("amount", "Net price"),
            text("hs_product_id", "Product ID"),
        ],
    },
    StandardType {
        id: "0-14",
        name: "quotes",
        singular: "Quote",
        plural: "Quotes",
        primary_display_property: "hs_title",
        searchable: &["hs_title"],
        group: "quoteinformation",
        properties: &[
            text("hs_title", "Quote Name"),
            datetime("hs_expiration_date", "Expiration date"),
            text("hs_status", "Quote approval status"),
        ],
    },
    StandardType {
        id: "0-27",
        name: "tasks",
        singular: "Task",
        plural: "Tasks",
        primary_display_property: "hs_task_subject",
        searchable: &["hs_task_subject", "hs_task_body"],
        group: "taskinformation",
        properties: &[
            datetime("hs_timestamp", "Due date"),
            text("hs_task_subject", "Task Title"),
            textarea("hs_task_body", "Notes"),
            select(
                "hs_task_status",
                "Task Status",
                &["NOT_STARTED", "IN_PROGRESS", "WAITING", "COMPLETED", "DEFERRED"],
            ),
        ],
    },
    StandardType {
        id: "0-46",
        name: "notes",
        singular: "Note",
        plural: "Notes",
        primary_display_property: "hs_note_body",
        searchable: &["hs_note_body"],
        group: "noteinformation",
        properties: &[
            datetime("hs_timestamp", "Activity date"),
            textarea("hs_note_body", "Note body"),
        ],
    },
    StandardType {
        id: "0-47",
        name: "meetings",
        singular: "Meeting",
        plural: "Meetings",
        primary_display_property: "hs_meeting_title",
        searchable: &["hs_meeting_title", "hs_meeting_body"],
        group: "meetinginformation",
        properties: &[
            datetime("hs_timestamp", "Activity date"),
            text("hs_meeting_title", "Meeting name"),
            textarea("hs_meeting_body", "Meeting description"),
            datetime("hs_meeting_start_time", "Start Time"),
            datetime("hs_meeting_end_time", "End Time"),
        ],
    },
    StandardType {
        id: "0-48",
        name: "calls",
        singular: "Call",
        plural: "Calls",
        primary_display_property: "hs_call_title",
        searchable: &["hs_call_title", "hs_call_body"],
        group: "callinformation",
        properties: &[
            datetime("hs_timestamp", "Activity date"),
            text("hs_call_title", "Call Title"),
            textarea("hs_call_body", "Call notes"),
            number("hs_call_duration", "Call duration"),
            text("hs_call_status", "Call status"),
        ],
    },
    StandardType {
        id: "0-49",
        name: "emails",
        singular: "Email",
        plural: "Emails",
        primary_display_property: "hs_email_subject",
        searchable: &["hs_email_subject", "hs_email_text"],
        group: "emailinformation",
        properties: &[
            datetime("hs_timestamp", "Activity date"),
            text("hs_email_subject", "Email subject"),
            textarea("hs_email_text", "Email body"),
            select(
                "hs_email_direction",
                "Email direction",
                &["EMAIL", "INCOMING_EMAIL", "FORWARDED_EMAIL"],
            ),
        ],
    },
];

pub fn standard_type(id: &str) -> Option<&'static StandardType> {
    STANDARD_TYPES.iter().find(|t| t.id == id)
}

/// Present on every type, standard or custom, and never writable by callers.
pub const SYSTEM_PROPERTIES: &[SeedProperty] = &[
    number(HS_OBJECT_ID, "Record ID"),
    datetime(HS_CREATEDATE, "Create Date"),
    datetime(HS_LASTMODIFIEDDATE, "Last Modified Date"),
    text(HS_MERGED_OBJECT_IDS, "Merged Record IDs"),
];

/// Upstream ids of the associations between standard types:
/// `(id, from, to, label)` where unlabeled rows are the defaults.
pub const STANDARD_ASSOCIATIONS: &[(i64, &str, &str, Option<&str>)] = &[
    (1, "0-1", "0-2", Some("Primary")),
    (2, "0-2", "0-1", Some("Primary")),
    (3, "0-3", "0-1", None),
    (4, "0-1", "0-3", None),
    (5, "0-3", "0-2", Some("Primary")),
    (6, "0-2", "0-3", Some("Primary")),
    (15, "0-1", "0-5", None),
    (16, "0-5", "0-1", None),
    (19, "0-3", "0-8", None),
    (20, "0-8", "0-3", None),
    (25, "0-2", "0-5", Some("Primary")),
    (26, "0-5", "0-2", Some("Primary")),
    (27, "0-3", "0-5", None),
    (28, "0-5", "0-3", None),
    (63, "0-3", "0-14", None),
    (64, "0-14", "0-3", None),
    (181, "0-2", "0-48", None),
    (182, "0-48", "0-2", None),
    (185, "0-2", "0-49", None),
    (186, "0-49", "0-2", None),
    (187, "0-2", "0-47", None),
    (188, "0-47", "0-2", None),
    (189, "0-2", "0-46", None),
    (190, "0-46", "0-2", None),
    (191, "0-2", "0-27", None),
    (192, "0-27", "0-2", None),
    (193, "0-1", "0-48", None),
    (194, "0-48", "0-1", None),
    (197, "0-1", "0-49", None),
    (198, "0-49", "0-1", None),
    (199, "0-1", "0-47", None),
    (200, "0-47", "0-1", None),
    (201, "0-1", "0-46", None),
    (202, "0-46", "0-1", None),
    (203, "0-1", "0-27", None),
    (204, "0-27", "0-1", None),
    (205, "0-3", "0-48", None),
    (206, "0-48", "0-3", None),
    (209, "0-3", "0-49", None),
    (210, "0-49", "0-3", None),
    (211, "0-3", "0-47", None),
    (212, "0-47", "0-3", None),
    (213, "0-3", "0-46", None),
    (214, "0-46", "0-3", None),
    (215, "0-3", "0-27", None),
    (216, "0-27", "0-3", None),
    (279, "0-1", "0-2", None),
    (280, "0-2", "0-1", None),
    (339, "0-5", "0-2", None),
    (340, "0-2", "0-5", None),
    (341, "0-3", "0-2", None),
    (342, "0-2", "0-3", None),
];

/// Description of the group every type keeps its properties in by default.
pub fn default_group(object_type: &ObjectType) -> PropertyGroup {
    let name = object_type.default_group();
    PropertyGroup::new(name, format!("{} information", object_type.label_singular))
}

/// Writes the system properties and default group of a type.
pub(crate) fn seed_type_scaffolding(
    conn: &Connection,
    object_type: &ObjectType,
    now: &DateTime<Utc>,
) -> Result<()> {
    let group = default_group(object_type);
    property::insert_group(conn, &object_type.id, &group)?;
    let flags = SystemFlags {
        hubspot_defined: true,
        read_only_value: true,
    };
    for (order, system) in SYSTEM_PROPERTIES.iter().enumerate() {
        let mut input = system.input();
        input.display_order = Some(order as i64);
        property::insert_definition(conn, &object_type.id, &input, &group.name, flags, now)?;
    }
    Ok(())
}

/// Idempotent, so it runs on every start against file databases as well.
pub(crate) fn seed(conn: &Connection, now: &DateTime<Utc>) -> Result<()> {
    let flags = SystemFlags {
        hubspot_defined: true,
        read_only_value: false,
    };
    for standard in STANDARD_TYPES {
        let object_type = ObjectType {
            id: standard.id.to_string(),
            name: standard.name.to_string(),
            label_singular: standard.singular.to_string(),
            label_plural: standard.plural.to_string(),
            primary_display_property: Some(standard.primary_display_property.to_string()),
            searchable_properties: standard.searchable.iter().map(|s| s.to_string()).collect(),
            is_custom: false,
            fully_qualified_name: standard.name.to_string(),
            archived: false,
            created_at: *now,
            updated_at: *now,
        };
        registry::insert_type(conn, &object_type, true)?;
        seed_type_scaffolding(conn, &object_type, now)?;
        for (order, seeded) in standard.properties.iter().enumerate() {
            let mut input = seeded.input();
            input.display_order = Some((SYSTEM_PROPERTIES.len() + order) as i64);
            property::insert_definition(conn, standard.id, &input, standard.group, flags, now)?;
        }
    }
    for &(id, from, to, label) in STANDARD_ASSOCIATIONS {
        association::insert_type(
            conn,
            &association::NewAssociationType {
                id: Some(id),
                from_object_type_id: from,
                to_object_type_id: to,
                category: AssociationCategory::HubspotDefined,
                label,
                inverse_label: None,
                name: None,
            },
            now,
        )?;
    }
    debug!(
        types = STANDARD_TYPES.len(),
        associations = STANDARD_ASSOCIATIONS.len(),
        "standard portal seeded"
    );
    Ok(())
}
