//! Relation graph catalog
//!
//! Declarative table of how each resource type reaches the user that owns it.
//! A traversal is an ordered list of hops; each hop reads one row by primary
//! key and projects the column that keys the next hop. The last hop is
//! terminal and projects the owner's user id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Storage kind of a column, and therefore of any key that column feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Text,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Integer => f.write_str("integer"),
            ColumnKind::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn int(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Integer }
}

const fn text(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Text }
}

const USER_COLUMNS: &[Column] = &[text("id"), text("email"), text("role")];
const FIELD_COLUMNS: &[Column] = &[text("id"), text("user_id"), text("name")];
const PEN_COLUMNS: &[Column] = &[int("id"), text("field_id"), text("name")];
const REPORT_COLUMNS: &[Column] = &[int("id"), text("field_id"), text("name")];
const SUBJECT_COLUMNS: &[Column] = &[int("id"), text("field_id"), text("name")];
const VARIABLE_COLUMNS: &[Column] = &[int("id"), text("user_id"), text("name")];
const TYPE_OF_OBJECT_COLUMNS: &[Column] = &[int("id"), text("user_id"), text("name")];
const PEN_VARIABLE_TYPE_OF_OBJECT_COLUMNS: &[Column] = &[
    int("id"),
    int("pen_id"),
    int("variable_id"),
    int("type_of_object_id"),
];
const MEASUREMENT_COLUMNS: &[Column] = &[
    int("id"),
    int("pen_variable_type_of_object_id"),
    int("report_id"),
    int("subject_id"),
    text("value"),
];
const PRODUCTIVITY_COLUMNS: &[Column] = &[
    int("id"),
    text("user_id"),
    int("report_id"),
    text("period"),
];

/// Stored entity the resolver can read. Each maps to one table keyed by `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    User,
    Field,
    Pen,
    Report,
    Subject,
    Variable,
    TypeOfObject,
    PenVariableTypeOfObject,
    Measurement,
    Productivity,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Field => "fields",
            Entity::Pen => "pens",
            Entity::Report => "reports",
            Entity::Subject => "subjects",
            Entity::Variable => "variables",
            Entity::TypeOfObject => "type_of_objects",
            Entity::PenVariableTypeOfObject => "pen_variable_type_of_objects",
            Entity::Measurement => "measurements",
            Entity::Productivity => "productivities",
        }
    }

    pub fn key_column(self) -> &'static str {
        "id"
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Entity::User => USER_COLUMNS,
            Entity::Field => FIELD_COLUMNS,
            Entity::Pen => PEN_COLUMNS,
            Entity::Report => REPORT_COLUMNS,
            Entity::Subject => SUBJECT_COLUMNS,
            Entity::Variable => VARIABLE_COLUMNS,
            Entity::TypeOfObject => TYPE_OF_OBJECT_COLUMNS,
            Entity::PenVariableTypeOfObject => PEN_VARIABLE_TYPE_OF_OBJECT_COLUMNS,
            Entity::Measurement => MEASUREMENT_COLUMNS,
            Entity::Productivity => PRODUCTIVITY_COLUMNS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|column| column.name == name)
    }

    pub fn key_kind(self) -> ColumnKind {
        match self {
            Entity::User | Entity::Field => ColumnKind::Text,
            _ => ColumnKind::Integer,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Closed set of resource types an operation can declare ownership on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Field,
    Pen,
    Report,
    Subject,
    Measurement,
    Variable,
    TypeOfObject,
    PenVariableType,
    Productivity,
    User,
}

impl ResourceType {
    pub const ALL: [ResourceType; 10] = [
        ResourceType::Field,
        ResourceType::Pen,
        ResourceType::Report,
        ResourceType::Subject,
        ResourceType::Measurement,
        ResourceType::Variable,
        ResourceType::TypeOfObject,
        ResourceType::PenVariableType,
        ResourceType::Productivity,
        ResourceType::User,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Field => "field",
            ResourceType::Pen => "pen",
            ResourceType::Report => "report",
            ResourceType::Subject => "subject",
            ResourceType::Measurement => "measurement",
            ResourceType::Variable => "variable",
            ResourceType::TypeOfObject => "type_of_object",
            ResourceType::PenVariableType => "pen_variable_type",
            ResourceType::Productivity => "productivity",
            ResourceType::User => "user",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownResourceType(s.to_string()))
    }
}

/// Qualifier that picks an alternate traversal. The supplied identifier is
/// then read as the id of the selected entity instead of the resource's own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    Field,
    Report,
    Subject,
}

impl Selector {
    pub fn as_str(self) -> &'static str {
        match self {
            Selector::Field => "field",
            Selector::Report => "report",
            Selector::Subject => "subject",
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Selector {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "field" => Ok(Selector::Field),
            "report" => Ok(Selector::Report),
            "subject" => Ok(Selector::Subject),
            other => Err(CatalogError::UnknownSelector(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("unknown selector: {0}")]
    UnknownSelector(String),
    #[error("resource type already registered: {0}")]
    Duplicate(ResourceType),
    #[error("{resource_type}: traversal has no hops")]
    EmptyTraversal { resource_type: ResourceType },
    #[error("{resource_type}: no default traversal")]
    NoDefault { resource_type: ResourceType },
    #[error("{resource_type}: {entity} has no column {column}")]
    UnknownColumn {
        resource_type: ResourceType,
        entity: Entity,
        column: &'static str,
    },
    #[error("{resource_type}: only the last hop may be terminal (hop {index})")]
    TerminalPosition { resource_type: ResourceType, index: usize },
    #[error("{resource_type}: {entity}.{column} is {found} but the next key is {expected}")]
    KeyMismatch {
        resource_type: ResourceType,
        entity: Entity,
        column: &'static str,
        found: ColumnKind,
        expected: ColumnKind,
    },
}

/// One step of a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub entity: Entity,
    /// Column matched against the current key.
    pub key: &'static str,
    /// Column read from the matched row and carried to the next hop.
    pub project: &'static str,
    /// Set when `project` is the owner's user id.
    pub terminal: bool,
}

impl Hop {
    pub fn step(entity: Entity, project: &'static str) -> Self {
        Self {
            entity,
            key: entity.key_column(),
            project,
            terminal: false,
        }
    }

    pub fn owner(entity: Entity, project: &'static str) -> Self {
        Self {
            entity,
            key: entity.key_column(),
            project,
            terminal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    hops: Vec<Hop>,
}

impl Traversal {
    pub fn new(hops: impl IntoIterator<Item = Hop>) -> Self {
        Self {
            hops: hops.into_iter().collect(),
        }
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Kind of identifier this traversal accepts as its starting key.
    pub fn key_kind(&self) -> Option<ColumnKind> {
        self.hops
            .first()
            .and_then(|hop| hop.entity.column(hop.key))
            .map(|column| column.kind)
    }

    fn validate(&self, resource_type: ResourceType) -> Result<(), CatalogError> {
        let last = match self.hops.len() {
            0 => return Err(CatalogError::EmptyTraversal { resource_type }),
            n => n - 1,
        };

        for (index, hop) in self.hops.iter().enumerate() {
            for column in [hop.key, hop.project] {
                if hop.entity.column(column).is_none() {
                    return Err(CatalogError::UnknownColumn {
                        resource_type,
                        entity: hop.entity,
                        column,
                    });
                }
            }

            if hop.terminal != (index == last) {
                return Err(CatalogError::TerminalPosition { resource_type, index });
            }

            let found = hop
                .entity
                .column(hop.project)
                .map(|column| column.kind)
                .unwrap_or(ColumnKind::Text);
            let expected = match self.hops.get(index + 1) {
                Some(next) => next
                    .entity
                    .column(next.key)
                    .map(|column| column.kind)
                    .unwrap_or(ColumnKind::Text),
                // Owner ids are user ids.
                None => Entity::User.key_kind(),
            };
            if found != expected {
                return Err(CatalogError::KeyMismatch {
                    resource_type,
                    entity: hop.entity,
                    column: hop.project,
                    found,
                    expected,
                });
            }
        }

        Ok(())
    }
}

/// Every way a resource type can be traced to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    default: Vec<Traversal>,
    alternates: BTreeMap<Selector, Traversal>,
}

impl PathSet {
    pub fn new(default: Traversal) -> Self {
        Self {
            default: vec![default],
            alternates: BTreeMap::new(),
        }
    }

    /// Adds a candidate tried when every earlier default candidate ends in
    /// a missing row or a null link.
    pub fn or_else(mut self, fallback: Traversal) -> Self {
        self.default.push(fallback);
        self
    }

    pub fn with_selector(mut self, selector: Selector, traversal: Traversal) -> Self {
        self.alternates.insert(selector, traversal);
        self
    }

    fn validate(&self, resource_type: ResourceType) -> Result<(), CatalogError> {
        if self.default.is_empty() {
            return Err(CatalogError::NoDefault { resource_type });
        }
        self.default
            .iter()
            .chain(self.alternates.values())
            .try_for_each(|traversal| traversal.validate(resource_type))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<ResourceType, PathSet>,
}

impl Catalog {
    /// A catalog with no entries; every lookup is NotConfigured.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The farm domain's ownership graph.
    pub fn standard() -> Result<Self, CatalogError> {
        use Entity as E;

        let field_owner = || Traversal::new([Hop::owner(E::Field, "user_id")]);
        let via_field = |entity: Entity| {
            Traversal::new([Hop::step(entity, "field_id"), Hop::owner(E::Field, "user_id")])
        };

        let mut catalog = Self::empty();
        catalog.register(ResourceType::Field, PathSet::new(field_owner()))?;
        catalog.register(
            ResourceType::Pen,
            PathSet::new(via_field(E::Pen)).with_selector(Selector::Field, field_owner()),
        )?;
        catalog.register(
            ResourceType::Report,
            PathSet::new(via_field(E::Report)).with_selector(Selector::Field, field_owner()),
        )?;
        catalog.register(
            ResourceType::Subject,
            PathSet::new(via_field(E::Subject)).with_selector(Selector::Field, field_owner()),
        )?;
        catalog.register(
            ResourceType::Measurement,
            PathSet::new(Traversal::new([
                Hop::step(E::Measurement, "pen_variable_type_of_object_id"),
                Hop::step(E::PenVariableTypeOfObject, "pen_id"),
                Hop::step(E::Pen, "field_id"),
                Hop::owner(E::Field, "user_id"),
            ]))
            .with_selector(Selector::Field, field_owner())
            .with_selector(Selector::Report, via_field(E::Report))
            .with_selector(Selector::Subject, via_field(E::Subject)),
        )?;
        catalog.register(
            ResourceType::Variable,
            PathSet::new(Traversal::new([Hop::owner(E::Variable, "user_id")])),
        )?;
        catalog.register(
            ResourceType::TypeOfObject,
            PathSet::new(Traversal::new([Hop::owner(E::TypeOfObject, "user_id")])),
        )?;
        catalog.register(
            ResourceType::PenVariableType,
            PathSet::new(Traversal::new([
                Hop::step(E::PenVariableTypeOfObject, "pen_id"),
                Hop::step(E::Pen, "field_id"),
                Hop::owner(E::Field, "user_id"),
            ])),
        )?;
        catalog.register(
            ResourceType::Productivity,
            PathSet::new(Traversal::new([Hop::owner(E::Productivity, "user_id")])).or_else(
                Traversal::new([
                    Hop::step(E::Productivity, "report_id"),
                    Hop::step(E::Report, "field_id"),
                    Hop::owner(E::Field, "user_id"),
                ]),
            ),
        )?;
        catalog.register(
            ResourceType::User,
            PathSet::new(Traversal::new([Hop::owner(E::User, "id")])),
        )?;

        Ok(catalog)
    }

    /// Adds the paths for a resource type. Rejects duplicates and malformed
    /// traversals so mistakes surface at startup rather than per request.
    pub fn register(&mut self, resource_type: ResourceType, paths: PathSet) -> Result<(), CatalogError> {
        if self.entries.contains_key(&resource_type) {
            return Err(CatalogError::Duplicate(resource_type));
        }
        paths.validate(resource_type)?;
        self.entries.insert(resource_type, paths);
        Ok(())
    }

    /// Candidate traversals for a resource type, in the order they are tried.
    /// `None` means the pair is not configured.
    pub fn lookup(&self, resource_type: ResourceType, selector: Option<Selector>) -> Option<&[Traversal]> {
        let paths = self.entries.get(&resource_type)?;
        match selector {
            None => Some(paths.default.as_slice()),
            Some(selector) => paths.alternates.get(&selector).map(std::slice::from_ref),
        }
    }

    pub fn is_registered(&self, resource_type: ResourceType) -> bool {
        self.entries.contains_key(&resource_type)
    }
}
