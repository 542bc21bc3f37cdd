use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::entity::{Entity, EntityType};
use crate::error::CoreError;
use crate::value::SqlKind;

pub const DEFAULT_ID_COLUMN: &str = "Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConflictAction {
    Rollback,
    #[default]
    Abort,
    Fail,
    Ignore,
    Replace,
    /// Resolve the row by natural key on save and update it in place.
    Update,
}

impl ConflictAction {
    /// SQLite conflict clause. `Update` is resolved by the mapper before writing,
    /// so the table itself aborts.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Rollback => "ROLLBACK",
            Self::Abort | Self::Update => "ABORT",
            Self::Fail => "FAIL",
            Self::Ignore => "IGNORE",
            Self::Replace => "REPLACE",
        }
    }
}

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Char,
    Text,
    Blob,
    Enum,
    Reference(EntityType),
    /// Value handled by the serializer registered under this name.
    Custom(&'static str),
}

impl FieldKind {
    /// Storage class written for this kind, when it does not depend on a serializer.
    pub fn storage_kind(&self) -> Option<SqlKind> {
        match self {
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::Bool | Self::Reference(_) => {
                Some(SqlKind::Integer)
            }
            Self::F32 | Self::F64 => Some(SqlKind::Real),
            Self::Char | Self::Text | Self::Enum => Some(SqlKind::Text),
            Self::Blob => Some(SqlKind::Blob),
            Self::Custom(_) => None,
        }
    }
}

/// Declaration of one persisted field.
#[derive(Debug, Clone)]
pub struct ColumnDescription {
    name: String,
    column: Option<String>,
    kind: FieldKind,
    not_null: bool,
    unique: bool,
    on_unique_conflict: ConflictAction,
    unique_groups: Vec<String>,
    on_unique_conflicts: Vec<ConflictAction>,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind,
            not_null: false,
            unique: false,
            on_unique_conflict: ConflictAction::default(),
            unique_groups: Vec::new(),
            on_unique_conflicts: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self, on_conflict: ConflictAction) -> Self {
        self.unique = true;
        self.on_unique_conflict = on_conflict;
        self
    }

    /// Adds the field to `group` with the policy for that group.
    pub fn unique_group(mut self, group: impl Into<String>, on_conflict: ConflictAction) -> Self {
        let position = self.unique_groups.len();
        self.unique_groups.push(group.into());
        self.on_unique_conflicts.truncate(position);
        self.on_unique_conflicts.push(on_conflict);
        self
    }

    /// Group names and policies as two positional lists. A group without a policy
    /// at its position takes no part in conflict resolution.
    pub fn unique_groups<G, S>(mut self, groups: G, on_conflicts: &[ConflictAction]) -> Self
    where
        G: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_groups = groups.into_iter().map(Into::into).collect();
        self.on_unique_conflicts = on_conflicts.to_vec();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

/// Declaration of one entity type's table.
#[derive(Debug, Clone, Default)]
pub struct TableDescription {
    table: Option<String>,
    id_column: Option<String>,
    columns: Vec<ColumnDescription>,
}

impl TableDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = Some(id_column.into());
        self
    }

    pub fn column(mut self, column: ColumnDescription) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(&self) -> &[ColumnDescription] {
        &self.columns
    }

    pub fn resolved_table(&self, type_name: &str) -> String {
        self.table.clone().unwrap_or_else(|| type_name.to_string())
    }

    pub fn resolved_id_column(&self) -> String {
        self.id_column
            .clone()
            .unwrap_or_else(|| DEFAULT_ID_COLUMN.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub not_null: bool,
    /// Single-column uniqueness and its conflict clause.
    pub unique: Option<ConflictAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueGroup {
    pub name: String,
    pub action: ConflictAction,
    members: Vec<usize>,
}

/// Derived mapping between an entity type and its table.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    entity: &'static str,
    table: String,
    id_column: String,
    fields: Vec<FieldDescriptor>,
    unique_fields: Vec<usize>,
    unique_groups: Vec<UniqueGroup>,
    constraints: Vec<UniqueGroup>,
}

impl Schema {
    pub fn derive(entity: &'static str, description: &TableDescription) -> Result<Self, CoreError> {
        let table = description.resolved_table(entity);
        if table.trim().is_empty() {
            return Err(CoreError::InvalidSchema {
                entity: entity.to_string(),
                reason: "empty table name".into(),
            });
        }
        let id_column = description.resolved_id_column();
        if id_column.trim().is_empty() {
            return Err(CoreError::MissingPrimaryKey {
                entity: entity.to_string(),
            });
        }

        let mut fields = vec![FieldDescriptor {
            name: id_column.clone(),
            column: id_column.clone(),
            kind: FieldKind::I64,
            primary_key: true,
            not_null: false,
            unique: None,
        }];
        let mut unique_fields = Vec::new();
        let mut unique_groups: Vec<UniqueGroup> = Vec::new();
        let mut constraints: Vec<UniqueGroup> = Vec::new();

        // Reverse declaration order; rows with repeated column names resolve to the
        // first matching field.
        for column in description.columns.iter().rev() {
            let resolved = column
                .column
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| column.name.clone());
            if resolved == id_column {
                return Err(CoreError::InvalidSchema {
                    entity: entity.to_string(),
                    reason: format!("field {} shadows the primary key column {id_column}", column.name),
                });
            }
            if fields.iter().any(|f| f.name == column.name) {
                return Err(CoreError::InvalidSchema {
                    entity: entity.to_string(),
                    reason: format!("field {} declared twice", column.name),
                });
            }

            let index = fields.len();
            fields.push(FieldDescriptor {
                name: column.name.clone(),
                column: resolved,
                kind: column.kind,
                primary_key: false,
                not_null: column.not_null,
                unique: column.unique.then_some(column.on_unique_conflict),
            });

            if column.unique && column.on_unique_conflict == ConflictAction::Update {
                unique_fields.push(index);
            }

            for (position, group) in column.unique_groups.iter().enumerate() {
                let action = column.on_unique_conflicts.get(position).copied();
                add_member(&mut constraints, group, action.unwrap_or_default(), index);
                if action == Some(ConflictAction::Update) {
                    add_member(&mut unique_groups, group, ConflictAction::Update, index);
                }
            }
        }

        Ok(Self {
            entity,
            table,
            id_column,
            fields,
            unique_fields,
            unique_groups,
            constraints,
        })
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Primary key first, then declared fields in reverse declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn primary_key(&self) -> &FieldDescriptor {
        &self.fields[0]
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn column_for(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.column.as_str())
    }

    pub fn has_update_on_conflict(&self) -> bool {
        !self.unique_fields.is_empty() || !self.unique_groups.is_empty()
    }

    /// Standalone unique fields with update-on-conflict policy.
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.unique_fields.iter().map(|&i| &self.fields[i])
    }

    /// Update-on-conflict groups, in first-seen order.
    pub fn unique_groups(&self) -> &[UniqueGroup] {
        &self.unique_groups
    }

    /// Every declared unique group, whatever its policy.
    pub fn group_constraints(&self) -> &[UniqueGroup] {
        &self.constraints
    }

    pub fn group_members<'a>(
        &'a self,
        group: &'a UniqueGroup,
    ) -> impl Iterator<Item = &'a FieldDescriptor> + 'a {
        group.members.iter().map(|&i| &self.fields[i])
    }
}

fn add_member(groups: &mut Vec<UniqueGroup>, name: &str, action: ConflictAction, index: usize) {
    match groups.iter_mut().find(|g| g.name == name) {
        Some(group) => group.members.push(index),
        None => groups.push(UniqueGroup {
            name: name.to_string(),
            action,
            members: vec![index],
        }),
    }
}

/// Per-type schema cache. Each schema is derived at most once; concurrent first
/// callers block on the write lock and share the result.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<TypeId, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_for<T: Entity>(&self) -> Result<Arc<Schema>, CoreError> {
        self.schema_of(&EntityType::of::<T>())
    }

    pub fn schema_of(&self, entity: &EntityType) -> Result<Arc<Schema>, CoreError> {
        let type_id = entity.type_id();
        if let Some(schema) = self.schemas.read().get(&type_id) {
            return Ok(schema.clone());
        }

        let mut schemas = self.schemas.write();
        if let Some(schema) = schemas.get(&type_id) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(Schema::derive(entity.name(), &entity.describe())?);
        debug!(
            entity = entity.name(),
            table = schema.table(),
            fields = schema.fields().len(),
            update_on_conflict = schema.has_update_on_conflict(),
            "derived schema"
        );
        schemas.insert(type_id, schema.clone());
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> TableDescription {
        TableDescription::new()
            .table("Contacts")
            .column(ColumnDescription::new("first", FieldKind::Text).unique_group("person", ConflictAction::Update))
            .column(
                ColumnDescription::new("last", FieldKind::Text)
                    .column("last_name")
                    .unique_group("person", ConflictAction::Update),
            )
            .column(ColumnDescription::new("email", FieldKind::Text).unique(ConflictAction::Update))
            .column(ColumnDescription::new("phone", FieldKind::Text).unique(ConflictAction::Replace))
            .column(
                ColumnDescription::new("street", FieldKind::Text)
                    .unique_groups(["address", "person"], &[ConflictAction::Abort]),
            )
    }

    #[test]
    fn fields_follow_reverse_declaration_order() {
        let schema = Schema::derive("Contact", &contact()).unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "street", "phone", "email", "last", "first"]);
        assert!(schema.primary_key().primary_key);
        assert_eq!(schema.column_for("last"), Some("last_name"));
        assert_eq!(schema.column_for("first"), Some("first"));
    }

    #[test]
    fn update_on_conflict_membership() {
        let schema = Schema::derive("Contact", &contact()).unwrap();
        let unique: Vec<&str> = schema.unique_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(unique, vec!["email"]);

        assert_eq!(schema.unique_groups().len(), 1);
        let group = &schema.unique_groups()[0];
        assert_eq!(group.name, "person");
        let members: Vec<&str> = schema.group_members(group).map(|f| f.name.as_str()).collect();
        assert_eq!(members, vec!["last", "first"]);
        assert!(schema.has_update_on_conflict());
    }

    #[test]
    fn constraints_keep_groups_without_update_policy() {
        let schema = Schema::derive("Contact", &contact()).unwrap();
        let names: Vec<&str> = schema.group_constraints().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["address", "person"]);
        let person = &schema.group_constraints()[1];
        let members: Vec<&str> = schema.group_members(person).map(|f| f.name.as_str()).collect();
        assert_eq!(members, vec!["street", "last", "first"]);
    }

    #[test]
    fn default_names() {
        let description = TableDescription::new().column(ColumnDescription::new("title", FieldKind::Text));
        let schema = Schema::derive("Book", &description).unwrap();
        assert_eq!(schema.table(), "Book");
        assert_eq!(schema.id_column(), DEFAULT_ID_COLUMN);
        assert!(!schema.has_update_on_conflict());
    }

    #[test]
    fn missing_primary_key_is_fatal() {
        let description = TableDescription::new().id_column("");
        assert!(matches!(
            Schema::derive("Broken", &description),
            Err(CoreError::MissingPrimaryKey { .. })
        ));
    }

    #[test]
    fn shadowing_the_primary_key_is_rejected() {
        let description = TableDescription::new()
            .column(ColumnDescription::new("key", FieldKind::I64).column("Id"));
        assert!(matches!(
            Schema::derive("Broken", &description),
            Err(CoreError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn derivation_is_idempotent() {
        let first = Schema::derive("Contact", &contact()).unwrap();
        let second = Schema::derive("Contact", &contact()).unwrap();
        assert_eq!(first, second);
    }
}
