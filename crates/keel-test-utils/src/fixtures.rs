//! Fixture entities.

use keel_core::{
    ColumnDescriptor, Entity, EntityDescriptor, Error, Result, Row, SqlType, Value,
};
use keel_query::Column;

static PATIENT_COLUMNS: [ColumnDescriptor; 4] = [
    ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
    ColumnDescriptor::new("name", SqlType::Text).not_null().size(100),
    ColumnDescriptor::new("age", SqlType::Integer).not_null(),
    ColumnDescriptor::new("email", SqlType::Text).unique(),
];

static PATIENT: EntityDescriptor = EntityDescriptor::new("Patient", "patients", &PATIENT_COLUMNS);

/// A patient with a store-generated integer key.
#[derive(Debug, Clone, PartialEq)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub email: Option<String>,
}

impl Patient {
    pub const ID: Column<i64> = Column::new("id");
    pub const NAME: Column<String> = Column::new("name");
    pub const AGE: Column<i32> = Column::new("age");
    pub const EMAIL: Column<Option<String>> = Column::new("email");

    /// A patient not yet stored (key unset).
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            age,
            email: None,
        }
    }

    /// A patient as if loaded with key `id`.
    pub fn stored(id: i64, name: &str, age: i32) -> Self {
        Self {
            id,
            ..Self::new(name, age)
        }
    }
}

impl Entity for Patient {
    fn descriptor() -> &'static EntityDescriptor {
        &PATIENT
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::BigInt(self.id),
            Value::Text(self.name.clone()),
            Value::Int(self.age),
            self.email.clone().into(),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as(0)?,
            name: row.get_as(1)?,
            age: row.get_as(2)?,
            email: row.get_as(3)?,
        })
    }

    fn set_primary_key(&mut self, value: Value) -> Result<()> {
        self.id = value
            .as_i64()
            .ok_or_else(|| Error::Custom(format!("Patient key must be an integer, got {}", value)))?;
        Ok(())
    }
}

/// A row shaped like `patients`, as a driver would return it.
pub fn patient_row(id: i64, name: &str, age: i32, email: Option<&str>) -> Row {
    Row::new(
        PATIENT.column_names().into_iter().map(String::from).collect(),
        vec![
            Value::BigInt(id),
            Value::Text(name.to_string()),
            Value::Int(age),
            email.into(),
        ],
    )
}

static WARD_COLUMNS: [ColumnDescriptor; 2] = [
    ColumnDescriptor::new("code", SqlType::Text).primary_key(),
    ColumnDescriptor::new("floor", SqlType::Integer).column("floor_no"),
];

static WARD: EntityDescriptor = EntityDescriptor::new("Ward", "wards", &WARD_COLUMNS);

/// A ward keyed by a caller-assigned text code.
#[derive(Debug, Clone, PartialEq)]
pub struct Ward {
    pub code: String,
    pub floor: i32,
}

impl Ward {
    pub fn new(code: &str, floor: i32) -> Self {
        Self {
            code: code.to_string(),
            floor,
        }
    }
}

impl Entity for Ward {
    fn descriptor() -> &'static EntityDescriptor {
        &WARD
    }

    fn to_values(&self) -> Vec<Value> {
        vec![Value::Text(self.code.clone()), Value::Int(self.floor)]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            code: row.get_as(0)?,
            floor: row.get_as(1)?,
        })
    }

    fn set_primary_key(&mut self, value: Value) -> Result<()> {
        self.code = value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Custom(format!("Ward code must be text, got {}", value)))?;
        Ok(())
    }
}

/// A row shaped like `wards`.
pub fn ward_row(code: &str, floor: i32) -> Row {
    Row::new(
        vec!["code".to_string(), "floor_no".to_string()],
        vec![Value::Text(code.to_string()), Value::Int(floor)],
    )
}
