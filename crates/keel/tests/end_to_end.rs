use std::sync::Arc;

use keel::prelude::*;
use keel::{FlushError, ValidationErrorKind};
use keel_test_utils::MockConnection;

static VISIT_COLUMNS: [ColumnDescriptor; 4] = [
    ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
    ColumnDescriptor::new("patient", SqlType::Text)
        .not_null()
        .size(100),
    ColumnDescriptor::new("urgent", SqlType::Boolean)
        .not_null()
        .default_value("FALSE"),
    ColumnDescriptor::new("room", SqlType::Integer),
];

static VISIT: EntityDescriptor = EntityDescriptor::new("Visit", "visits", &VISIT_COLUMNS);

#[derive(Debug, Clone, PartialEq)]
struct Visit {
    id: i64,
    patient: String,
    urgent: bool,
    room: Option<i32>,
}

impl Visit {
    const ID: Column<i64> = Column::new("id");
    const PATIENT: Column<String> = Column::new("patient");
    const URGENT: Column<bool> = Column::new("urgent");
    const ROOM: Column<Option<i32>> = Column::new("room");

    fn new(patient: &str, room: i32) -> Self {
        Self {
            id: 0,
            patient: patient.to_string(),
            urgent: false,
            room: Some(room),
        }
    }
}

impl Entity for Visit {
    fn descriptor() -> &'static EntityDescriptor {
        &VISIT
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::BigInt(self.id),
            Value::Text(self.patient.clone()),
            Value::Bool(self.urgent),
            self.room.into(),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_as(0)?,
            patient: row.get_as(1)?,
            urgent: row.get_as(2)?,
            room: row.get_as(3)?,
        })
    }

    fn set_primary_key(&mut self, value: Value) -> Result<()> {
        self.id = value
            .as_i64()
            .ok_or_else(|| Error::Custom(format!("visit key must be an integer, got {}", value)))?;
        Ok(())
    }
}

fn visit_row(id: i64, patient: &str, urgent: bool, room: Option<i32>) -> Row {
    Row::new(
        VISIT.column_names().into_iter().map(String::from).collect(),
        vec![
            Value::BigInt(id),
            Value::Text(patient.to_string()),
            Value::Bool(urgent),
            room.into(),
        ],
    )
}

#[test]
fn test_migrate_insert_query_update() {
    let conn = MockConnection::new().on_query(|_, _| {
        Ok(vec![
            visit_row(1001, "Milica1", false, Some(3)),
            visit_row(1002, "Milica2", true, None),
        ])
    });
    auto_migrate(&conn, &[&VISIT]).unwrap();
    assert_eq!(
        conn.committed()[0].0,
        "CREATE TABLE IF NOT EXISTS visits (\n    id BIGSERIAL PRIMARY KEY,\n    patient VARCHAR(100) NOT NULL,\n    urgent BOOLEAN NOT NULL DEFAULT FALSE,\n    room INTEGER\n)"
    );

    let db = Database::new(conn.clone());
    let visits: Vec<_> = [("Milica1", 3), ("Milica2", 4), ("Milica3", 5)]
        .into_iter()
        .map(|(name, room)| entity_ref(Visit::new(name, room)))
        .collect();
    for visit in &visits {
        db.add(visit);
    }
    assert_eq!(db.save_changes().unwrap(), 3);
    let ids: Vec<_> = visits.iter().map(|v| read(v).id).collect();
    assert_eq!(ids, vec![1001, 1002, 1003]);

    // Inserted instances are tracked under their new keys.
    let first = db.set::<Visit>().find(1001).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &visits[0]));
    assert_eq!(conn.query_count(), 0);

    write(&visits[0]).urgent = true;
    db.detect_changes();
    let entry = db.entry(&visits[0]).unwrap();
    assert_eq!(entry.changed_fields(), vec![("urgent", Value::Bool(true))]);
    assert_eq!(db.save_changes().unwrap(), 1);
    assert_eq!(
        conn.committed().last().cloned(),
        Some((
            "UPDATE visits SET urgent = $1 WHERE id = $2".to_string(),
            vec![Value::Bool(true), Value::BigInt(1001)]
        ))
    );

    // A reload replaces the tracked entries with fresh instances.
    let reloaded = db.set::<Visit>().all().unwrap();
    assert_eq!(reloaded.len(), 2);
    assert!(!Arc::ptr_eq(&reloaded[0], &visits[0]));
    assert_eq!(read(&reloaded[1]).room, None);
    assert_eq!(db.tracker().len(), 3);
}

#[test]
fn test_generated_sql() {
    let db = Database::new(MockConnection::new().with_dialect(Dialect::Sqlite));
    let (sql, args) = db
        .set::<Visit>()
        .filter(Visit::URGENT.is_true())
        .filter(Visit::PATIENT.contains("Mil"))
        .filter(Visit::ROOM.lt(Some(10)).or(Visit::ROOM.is_null()))
        .order_by(Visit::ROOM.desc())
        .order_by(Visit::ID.asc())
        .limit(10)
        .to_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT id, patient, urgent, room FROM visits WHERE urgent = ?1 AND patient LIKE ?2 AND (room < ?3 OR room IS NULL) ORDER BY room DESC, id ASC LIMIT 10"
    );
    assert_eq!(
        args,
        vec![
            Value::Bool(true),
            Value::Text("%Mil%".into()),
            Value::Int(10)
        ]
    );
}

#[test]
fn test_empty_collections_lower_to_neutral_predicates() {
    let db = Database::new(MockConnection::new());

    let (sql, args) = db
        .query::<Visit>()
        .filter(Visit::ID.is_in(Vec::new()))
        .to_sql()
        .unwrap();
    assert!(sql.ends_with("WHERE FALSE"));
    assert!(args.is_empty());

    assert_eq!(Condition::any(Vec::new()).lower(1).unwrap().sql, "FALSE");
    assert_eq!(Condition::all(Vec::new()).lower(1).unwrap().sql, "TRUE");

    let lowered = Condition::all([Visit::ID.gt(5), Condition::any(Vec::new())]).lower(4).unwrap();
    assert_eq!(lowered.sql, "(id > $4 AND FALSE)");
    assert_eq!(lowered.next_index, 5);
}

#[test]
fn test_mixed_in_list_is_rejected() {
    let err = Condition::is_in("room", vec![Value::Int(1), Value::Text("2".into())]).unwrap_err();
    let Error::Validation(validation) = err else {
        panic!("expected validation error");
    };
    assert_eq!(validation.kind, ValidationErrorKind::MixedTypes);
    assert_eq!(validation.field, "room");

    // Typed lists holding None are caught before any SQL reaches the store.
    let conn = MockConnection::new();
    let db = Database::new(conn.clone());
    let err = db
        .set::<Visit>()
        .filter(Visit::ROOM.is_in([Some(1), None]))
        .all()
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(conn.query_count(), 0);
}

#[test]
fn test_failed_flush_is_atomic_and_reported() {
    let conn = MockConnection::new().fail_on_statement(2);
    let db = Database::new(conn.clone());

    let a = entity_ref(Visit::new("A", 1));
    let b = entity_ref(Visit::new("B", 2));
    db.add_range([&a, &b]);

    let err = db.save_changes().unwrap_err();
    assert!(conn.committed().is_empty());
    assert_eq!(read(&a).id, 0);
    assert_eq!(read(&b).id, 0);

    let Error::Flush(FlushError {
        entity,
        state,
        applied_rows,
        ..
    }) = &err
    else {
        panic!("expected flush error, got {err:?}");
    };
    assert_eq!(*entity, "Visit");
    assert_eq!(*state, EntityState::Added);
    assert_eq!(*applied_rows, 1);
    assert!(err.to_string().starts_with("Flush error: Visit Added entry Visit#2"));

    // The tracker still holds both inserts; a retry succeeds.
    assert_eq!(db.save_changes().unwrap(), 2);
    assert_ne!(read(&a).id, 0);
}

#[test]
fn test_entry_json_rendering() {
    let db = Database::new(MockConnection::new());
    let visit = entity_ref(Visit::new("A", 7));
    let entry = db.add(&visit);
    let json = entry.describe();
    assert_eq!(json["shape"], "Visit");
    assert_eq!(json["state"], "Added");
    assert_eq!(json["current"]["room"], serde_json::json!({"Int": 7}));
    assert_eq!(json["has_snapshot"], false);
}
