use std::sync::Arc;

use keel_core::{Connection, Dialect, EntityState, Error, TransactionOps, Value};
use keel_session::{Database, DatabaseConfig, entity_ref, read, write};
use keel_test_utils::{MockConnection, Patient, Ward, patient_row};

fn with_patients(rows: Vec<(i64, &'static str, i32)>) -> MockConnection {
    MockConnection::new().on_query(move |sql, params| {
        let wanted = if sql.contains("WHERE id = ") {
            params.first().and_then(Value::as_i64)
        } else {
            None
        };
        Ok(rows
            .iter()
            .filter(|(id, _, _)| wanted.is_none_or(|w| w == *id))
            .map(|(id, name, age)| patient_row(*id, name, *age, None))
            .collect())
    })
}

#[test]
fn test_detected_age_change_is_written_alone() {
    let conn = with_patients(vec![(1, "Ana", 25)]);
    let db = Database::new(conn.clone());

    let ana = db.query::<Patient>().find(1).unwrap().unwrap();
    write(&ana).age = 26;

    assert_eq!(db.detect_changes(), 1);
    let entry = db.entry(&ana).unwrap();
    assert_eq!(entry.state(), EntityState::Modified);
    assert_eq!(entry.changed_fields(), vec![("age", Value::Int(26))]);

    assert_eq!(db.save_changes().unwrap(), 1);
    assert_eq!(
        conn.committed(),
        vec![(
            "UPDATE patients SET age = $1 WHERE id = $2".to_string(),
            vec![Value::Int(26), Value::BigInt(1)]
        )]
    );
    assert_eq!(entry.state(), EntityState::Unchanged);
    assert!(entry.changed_fields().is_empty());
}

#[test]
fn test_nothing_pending_runs_no_statements() {
    let conn = with_patients(vec![(1, "Ana", 25), (2, "Bea", 30)]);
    let db = Database::new(conn.clone());
    db.query::<Patient>().all().unwrap();

    assert_eq!(db.save_changes().unwrap(), 0);
    assert!(conn.attempted().is_empty());
    assert_eq!(conn.begins(), 0);
}

#[test]
fn test_insert_assigns_key_and_settles_unchanged() {
    let conn = MockConnection::new();
    let db = Database::new(conn.clone());
    let bea = entity_ref(Patient::new("Bea", 30));
    db.add(&bea);

    assert_eq!(db.save_changes().unwrap(), 1);

    let id = read(&bea).id;
    assert_ne!(id, 0);
    let entry = db.entry(&bea).unwrap();
    assert_eq!(entry.state(), EntityState::Unchanged);

    // Re-keyed under the assigned key: found without a query.
    let found = db.query::<Patient>().find(id).unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &bea));
    assert_eq!(conn.query_count(), 0);
}

#[test]
fn test_find_twice_hits_identity_map() {
    let conn = with_patients(vec![(7, "Ana", 25)]);
    let db = Database::new(conn.clone());

    let first = db.query::<Patient>().find(7).unwrap().unwrap();
    let second = db.query::<Patient>().find(7_i64).unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(conn.query_count(), 1);
}

#[test]
fn test_find_without_tracking_still_misses_next_time() {
    let conn = with_patients(vec![(7, "Ana", 25)]);
    let db = Database::new(conn.clone());

    db.query::<Patient>().as_no_tracking().find(7).unwrap().unwrap();
    db.query::<Patient>().find(7).unwrap().unwrap();
    assert_eq!(conn.query_count(), 2);
}

#[test]
fn test_failed_second_update_rolls_back_everything() {
    let conn = with_patients(vec![(1, "Ana", 25), (2, "Bea", 30), (3, "Cy", 35)]).fail_on_statement(2);
    let db = Database::new(conn.clone());

    let patients = db.query::<Patient>().all().unwrap();
    for p in &patients {
        write(p).age += 1;
    }

    let err = db.save_changes().unwrap_err();
    let Error::Flush(flush) = &err else {
        panic!("expected flush error, got {err:?}");
    };
    assert_eq!(flush.entity, "Patient");
    assert_eq!(flush.key, "Patient:2");
    assert_eq!(flush.state, EntityState::Modified);
    assert_eq!(flush.applied_rows, 1);
    assert!(err.sql().is_some_and(|s| s.starts_with("UPDATE patients")));

    assert!(conn.committed().is_empty());
    assert_eq!(conn.rollbacks(), 1);
    // Nothing was accepted: all three are still pending.
    assert_eq!(db.tracker().entries_by_state(EntityState::Modified).len(), 3);
    assert!(db.has_changes());
}

#[test]
fn test_flush_order_is_delete_insert_update() {
    let conn = with_patients(vec![(1, "Ana", 25), (2, "Bea", 30)]);
    let db = Database::new(conn.clone());

    let loaded = db.query::<Patient>().all().unwrap();
    write(&loaded[0]).name = "Anna".to_string();
    db.remove(&loaded[1]);
    db.add(&entity_ref(Patient::new("Cy", 35)));

    assert_eq!(db.save_changes().unwrap(), 3);
    let verbs: Vec<_> = conn
        .committed()
        .iter()
        .map(|(sql, _)| sql.split_whitespace().next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(verbs, vec!["DELETE", "INSERT", "UPDATE"]);
    assert_eq!(db.tracker().len(), 2);
}

#[test]
fn test_unchanged_safety_net_without_auto_detect() {
    let conn = with_patients(vec![(1, "Ana", 25)]);
    let db = Database::with_config(conn.clone(), DatabaseConfig::new().auto_detect_changes(false));

    let ana = db.query::<Patient>().find(1).unwrap().unwrap();
    write(&ana).age = 30;
    assert_eq!(db.entry(&ana).unwrap().state(), EntityState::Unchanged);

    assert_eq!(db.save_changes().unwrap(), 1);
    assert_eq!(conn.committed().len(), 1);
}

#[test]
fn test_explicit_update_writes_only_later_edits() {
    let conn = MockConnection::new();
    let db = Database::new(conn.clone());
    let ana = entity_ref(Patient::stored(5, "Ana", 25));

    db.update(&ana);
    assert_eq!(db.save_changes().unwrap(), 0);

    write(&ana).name = "Anna".to_string();
    assert_eq!(db.save_changes().unwrap(), 1);
    assert_eq!(conn.committed()[0].0, "UPDATE patients SET name = $1 WHERE id = $2");
}

#[test]
fn test_save_changes_in_caller_transaction() {
    let conn = MockConnection::new();
    let db = Database::new(conn.clone());
    let bea = entity_ref(Patient::new("Bea", 30));
    db.add(&bea);

    let tx = conn.begin().unwrap();
    assert_eq!(db.save_changes_in(&tx).unwrap(), 1);
    assert_eq!(db.entry(&bea).unwrap().state(), EntityState::Added);
    tx.commit().unwrap();
    db.accept_all_changes();

    assert_eq!(db.entry(&bea).unwrap().state(), EntityState::Unchanged);
    assert_eq!(conn.committed().len(), 1);
    assert_eq!(conn.begins(), 1);
}

#[test]
fn test_mysql_reads_key_back_without_returning() {
    let conn = MockConnection::new().with_dialect(Dialect::Mysql);
    let db = Database::new(conn.clone());
    let bea = entity_ref(Patient::new("Bea", 30));
    db.add(&bea);

    db.save_changes().unwrap();
    assert_eq!(read(&bea).id, 1001);
    assert_eq!(
        conn.committed()[0].0,
        "INSERT INTO patients (name, age, email) VALUES (?, ?, ?)"
    );
}

#[test]
fn test_range_operations() {
    let conn = MockConnection::new();
    let db = Database::new(conn.clone());
    let wards: Vec<_> = ["ICU", "ER", "OR"]
        .iter()
        .enumerate()
        .map(|(floor, code)| entity_ref(Ward::new(code, i32::try_from(floor).unwrap_or(0))))
        .collect();

    assert_eq!(db.add_range(&wards).len(), 3);
    assert_eq!(db.save_changes().unwrap(), 3);

    for ward in &wards {
        write(ward).floor += 10;
    }
    db.update_range(&wards);
    assert_eq!(db.save_changes().unwrap(), 3);

    db.remove_range(&wards);
    assert_eq!(db.save_changes().unwrap(), 3);
    assert!(db.tracker().is_empty());
    assert_eq!(conn.committed().len(), 9);
    assert_eq!(
        conn.committed()[3].0,
        "UPDATE wards SET floor_no = $1 WHERE code = $2"
    );
}

#[test]
fn test_entry_describe_for_diagnostics() {
    let db = Database::new(MockConnection::new());
    let ana = entity_ref(Patient::stored(2, "Ana", 25));
    let entry = db.attach(&ana);
    let json = entry.describe();
    assert_eq!(json["key"], "Patient:2");
    assert_eq!(json["state"], "Unchanged");
    assert_eq!(json["has_snapshot"], true);
}

#[test]
fn test_shared_database_across_threads() {
    let db = Arc::new(Database::new(MockConnection::new()));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 0..10 {
                    db.attach(&entity_ref(Patient::stored(t * 10 + i + 1, "P", 20)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(db.tracker().len(), 40);
    assert_eq!(db.save_changes().unwrap(), 0);
}
