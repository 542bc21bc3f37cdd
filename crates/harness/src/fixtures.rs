use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rowbind_core::{
    ColumnDescription, ConflictAction, CoreError, Entity, EntityType, FieldKind, Model,
    TableDescription, Value,
};

fn unknown(entity: &str, field: &str) -> CoreError {
    CoreError::UnknownField {
        entity: entity.to_string(),
        field: field.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Reader,
    Editor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reader => "Reader",
            Self::Editor => "Editor",
            Self::Admin => "Admin",
        }
    }

    fn from_value(value: Value) -> Result<Self, CoreError> {
        let name: String = value.extract()?;
        match name.as_str() {
            "Reader" => Ok(Self::Reader),
            "Editor" => Ok(Self::Editor),
            "Admin" => Ok(Self::Admin),
            other => Err(CoreError::InvalidData(format!("unknown role {other}"))),
        }
    }
}

/// Account keyed naturally by `email`.
#[derive(Debug, Default)]
pub struct User {
    pub id: Option<i64>,
    pub email: String,
    pub name: String,
    pub age: i32,
    pub active: bool,
    pub role: Role,
    pub token: Option<Uuid>,
}

impl User {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for User {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Users")
            .column(ColumnDescription::new("email", FieldKind::Text).not_null().unique(ConflictAction::Update))
            .column(ColumnDescription::new("name", FieldKind::Text))
            .column(ColumnDescription::new("age", FieldKind::I32))
            .column(ColumnDescription::new("active", FieldKind::Bool))
            .column(ColumnDescription::new("role", FieldKind::Enum))
            .column(ColumnDescription::new("token", FieldKind::Custom("uuid")))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        Ok(match field {
            "email" => self.email.as_str().into(),
            "name" => self.name.as_str().into(),
            "age" => self.age.into(),
            "active" => self.active.into(),
            "role" => Value::enumeration(self.role.as_str()),
            "token" => self.token.map_or(Value::Null, Value::custom),
            _ => return Err(unknown("User", field)),
        })
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "email" => self.email = value.extract()?,
            "name" => self.name = value.extract()?,
            "age" => self.age = value.extract()?,
            "active" => self.active = value.extract()?,
            "role" => self.role = Role::from_value(value)?,
            "token" => self.token = value.extract_custom_opt()?,
            _ => return Err(unknown("User", field)),
        }
        Ok(())
    }
}

/// Person identified by the combination of first and last name.
#[derive(Debug, Default)]
pub struct Contact {
    pub id: Option<i64>,
    pub first: String,
    pub last: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn new(first: &str, last: Option<&str>, phone: Option<&str>) -> Self {
        Self {
            id: None,
            first: first.into(),
            last: last.map(String::from),
            phone: phone.map(String::from),
        }
    }
}

impl Entity for Contact {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Contacts")
            .column(ColumnDescription::new("first", FieldKind::Text).unique_group("person", ConflictAction::Update))
            .column(
                ColumnDescription::new("last", FieldKind::Text)
                    .column("last_name")
                    .unique_group("person", ConflictAction::Update),
            )
            .column(ColumnDescription::new("phone", FieldKind::Text))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        Ok(match field {
            "first" => self.first.as_str().into(),
            "last" => self.last.clone().into(),
            "phone" => self.phone.clone().into(),
            _ => return Err(unknown("Contact", field)),
        })
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "first" => self.first = value.extract()?,
            "last" => self.last = value.extract()?,
            "phone" => self.phone = value.extract()?,
            _ => return Err(unknown("Contact", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Author {
    pub id: Option<i64>,
    pub name: String,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Entity for Author {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Authors")
            .column(ColumnDescription::new("name", FieldKind::Text))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        match field {
            "name" => Ok(self.name.as_str().into()),
            _ => Err(unknown("Author", field)),
        }
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "name" => self.name = value.extract()?,
            _ => return Err(unknown("Author", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Genre {
    #[default]
    Fiction,
    Poetry,
    Reference,
}

impl Genre {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Fiction => "Fiction",
            Self::Poetry => "Poetry",
            Self::Reference => "Reference",
        }
    }

    fn from_value(value: Value) -> Result<Self, CoreError> {
        let name: String = value.extract()?;
        match name.as_str() {
            "Fiction" => Ok(Self::Fiction),
            "Poetry" => Ok(Self::Poetry),
            "Reference" => Ok(Self::Reference),
            other => Err(CoreError::InvalidData(format!("unknown genre {other}"))),
        }
    }
}

/// Carries one field of every built-in kind.
#[derive(Debug, Default)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub author: Option<Model<Author>>,
    pub edition: i8,
    pub pages: i16,
    pub copies: i32,
    pub isbn: i64,
    pub weight: f32,
    pub rating: f64,
    pub in_print: bool,
    pub shelf: char,
    pub cover: Vec<u8>,
    pub genre: Genre,
    pub published: Option<SystemTime>,
}

impl Entity for Book {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Books")
            .column(ColumnDescription::new("title", FieldKind::Text))
            .column(ColumnDescription::new("author", FieldKind::Reference(EntityType::of::<Author>())))
            .column(ColumnDescription::new("edition", FieldKind::I8))
            .column(ColumnDescription::new("pages", FieldKind::I16))
            .column(ColumnDescription::new("copies", FieldKind::I32))
            .column(ColumnDescription::new("isbn", FieldKind::I64))
            .column(ColumnDescription::new("weight", FieldKind::F32))
            .column(ColumnDescription::new("rating", FieldKind::F64))
            .column(ColumnDescription::new("in_print", FieldKind::Bool))
            .column(ColumnDescription::new("shelf", FieldKind::Char))
            .column(ColumnDescription::new("cover", FieldKind::Blob))
            .column(ColumnDescription::new("genre", FieldKind::Enum))
            .column(ColumnDescription::new("published", FieldKind::Custom("timestamp")))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        Ok(match field {
            "title" => self.title.as_str().into(),
            "author" => self.author.as_ref().into(),
            "edition" => self.edition.into(),
            "pages" => self.pages.into(),
            "copies" => self.copies.into(),
            "isbn" => self.isbn.into(),
            "weight" => self.weight.into(),
            "rating" => self.rating.into(),
            "in_print" => self.in_print.into(),
            "shelf" => self.shelf.into(),
            "cover" => self.cover.clone().into(),
            "genre" => Value::enumeration(self.genre.as_str()),
            "published" => self.published.map_or(Value::Null, Value::custom),
            _ => return Err(unknown("Book", field)),
        })
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "title" => self.title = value.extract()?,
            "author" => self.author = value.extract()?,
            "edition" => self.edition = value.extract()?,
            "pages" => self.pages = value.extract()?,
            "copies" => self.copies = value.extract()?,
            "isbn" => self.isbn = value.extract()?,
            "weight" => self.weight = value.extract()?,
            "rating" => self.rating = value.extract()?,
            "in_print" => self.in_print = value.extract()?,
            "shelf" => self.shelf = value.extract()?,
            "cover" => self.cover = value.extract()?,
            "genre" => self.genre = Genre::from_value(value)?,
            "published" => self.published = value.extract_custom_opt()?,
            _ => return Err(unknown("Book", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Tag {
    pub id: Option<i64>,
    pub label: String,
}

impl Tag {
    pub fn new(label: &str) -> Self {
        Self {
            id: None,
            label: label.into(),
        }
    }
}

impl Entity for Tag {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Tags")
            .column(ColumnDescription::new("label", FieldKind::Text).unique(ConflictAction::Update))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        match field {
            "label" => Ok(self.label.as_str().into()),
            _ => Err(unknown("Tag", field)),
        }
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "label" => self.label = value.extract()?,
            _ => return Err(unknown("Tag", field)),
        }
        Ok(())
    }
}

/// Link row between [`Book`] and [`Tag`].
#[derive(Debug, Default)]
pub struct BookTag {
    pub id: Option<i64>,
    pub book: Option<Model<Book>>,
    pub tag: Option<Model<Tag>>,
}

impl BookTag {
    pub fn new(book: &Model<Book>, tag: &Model<Tag>) -> Self {
        Self {
            id: None,
            book: Some(book.clone()),
            tag: Some(tag.clone()),
        }
    }
}

impl Entity for BookTag {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("BookTags")
            .column(
                ColumnDescription::new("book", FieldKind::Reference(EntityType::of::<Book>()))
                    .column("book_id")
                    .unique_group("pair", ConflictAction::Update),
            )
            .column(
                ColumnDescription::new("tag", FieldKind::Reference(EntityType::of::<Tag>()))
                    .column("tag_id")
                    .unique_group("pair", ConflictAction::Update),
            )
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        match field {
            "book" => Ok(self.book.as_ref().into()),
            "tag" => Ok(self.tag.as_ref().into()),
            _ => Err(unknown("BookTag", field)),
        }
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "book" => self.book = value.extract()?,
            "tag" => self.tag = value.extract()?,
            _ => return Err(unknown("BookTag", field)),
        }
        Ok(())
    }
}

/// Measurements kept as one MessagePack blob column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width_mm: u32,
    pub height_mm: u32,
    pub depth_mm: u32,
    pub fragile: bool,
}

impl Dimensions {
    /// Serializer name the [`Parcel::dimensions`] column is declared with.
    pub const SERIALIZER: &'static str = "dimensions";
}

#[derive(Debug, Default)]
pub struct Parcel {
    pub id: Option<i64>,
    pub label: String,
    pub dimensions: Option<Dimensions>,
}

impl Parcel {
    pub fn new(label: &str, dimensions: Option<Dimensions>) -> Self {
        Self {
            id: None,
            label: label.into(),
            dimensions,
        }
    }
}

impl Entity for Parcel {
    fn describe() -> TableDescription {
        TableDescription::new()
            .table("Parcels")
            .column(ColumnDescription::new("label", FieldKind::Text))
            .column(ColumnDescription::new("dimensions", FieldKind::Custom(Dimensions::SERIALIZER)))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn get(&self, field: &str) -> Result<Value, CoreError> {
        match field {
            "label" => Ok(self.label.as_str().into()),
            "dimensions" => Ok(self.dimensions.clone().map_or(Value::Null, Value::custom)),
            _ => Err(unknown("Parcel", field)),
        }
    }

    fn set(&mut self, field: &str, value: Value) -> Result<(), CoreError> {
        match field {
            "label" => self.label = value.extract()?,
            "dimensions" => self.dimensions = value.extract_custom_opt()?,
            _ => return Err(unknown("Parcel", field)),
        }
        Ok(())
    }
}
