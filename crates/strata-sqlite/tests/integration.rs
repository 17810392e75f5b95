//! The full stack against a real SQLite database: compile queries, flush a
//! unit of work, read the rows back.

use strata_core::test_support::fixtures::cms_registry;
use strata_core::{Driver, Value};
use strata_orm::{EntityData, EntityState, Session};
use strata_query::ParameterBag;
use strata_sqlite::{SqliteConfig, SqliteDriver};

const SCHEMA: &str = "
    CREATE TABLE cms_users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status TEXT,
        username TEXT,
        name TEXT
    );
    CREATE TABLE cms_phonenumbers (
        phonenumber TEXT PRIMARY KEY,
        user_id INTEGER REFERENCES cms_users(id)
    );
    CREATE TABLE cms_articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        topic TEXT,
        text TEXT,
        user_id INTEGER REFERENCES cms_users(id)
    );
    CREATE TABLE cms_addresses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        country TEXT,
        zip TEXT,
        city TEXT,
        user_id INTEGER REFERENCES cms_users(id)
    );
    CREATE TABLE cms_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT
    );
    CREATE TABLE cms_users_groups (
        user_id INTEGER REFERENCES cms_users(id),
        group_id INTEGER REFERENCES cms_groups(id)
    );
";

fn memory_driver() -> SqliteDriver {
    let driver = SqliteDriver::memory().unwrap();
    driver.execute_batch(SCHEMA).unwrap();
    driver
}

fn sample_user() -> EntityData {
    EntityData::new("CmsUser")
        .with_field("status", "developer")
        .with_field("username", "romanb")
        .with_field("name", "Roman")
}

#[test]
fn save_query_mutate_delete_roundtrip() {
    let mut driver = memory_driver();
    let mut session = Session::new(cms_registry());

    // persist a user with one cascaded phonenumber
    let user = session.create(sample_user()).unwrap();
    let phone = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    session.data_mut(phone).set_one("user", Some(user));
    session.data_mut(user).add_to("phonenumbers", phone);
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();
    let user_id = session.data(user).get_field("id").cloned().unwrap();
    assert_eq!(user_id, Value::Int(1));

    // a fresh session sees the rows through the query pipeline
    let mut session = Session::new(cms_registry());
    let handles = session
        .query(
            &mut driver,
            "SELECT u FROM CmsUser u WHERE u.username = ?1",
            ParameterBag::new().set_positional(1, "romanb"),
        )
        .unwrap();
    assert_eq!(handles.len(), 1);
    let user = handles[0];
    assert_eq!(session.data(user).get_field("name"), Some(&Value::from("Roman")));
    assert_eq!(session.state(user), EntityState::Managed);

    // joined entities hydrate alongside the root
    let handles = session
        .query(
            &mut driver,
            "SELECT u, p FROM CmsUser u JOIN u.phonenumbers p",
            &ParameterBag::new(),
        )
        .unwrap();
    assert_eq!(handles, vec![user]);
    assert!(session
        .find("CmsPhonenumber", &Value::from("6155139"))
        .is_some());

    // an in-place edit flushes as an update
    session.data_mut(user).set_field("name", "Guilherme");
    session.flush(&mut driver).unwrap();
    let rows = driver
        .query("SELECT name FROM cms_users WHERE id = ?", &[user_id.clone()])
        .unwrap();
    assert_eq!(rows[0]["name"], Value::from("Guilherme"));

    // deleting the user cascades to the phonenumber
    session.delete(user).unwrap();
    session.flush(&mut driver).unwrap();
    assert!(driver.query("SELECT id FROM cms_users", &[]).unwrap().is_empty());
    assert!(driver
        .query("SELECT phonenumber FROM cms_phonenumbers", &[])
        .unwrap()
        .is_empty());
}

#[test]
fn many_to_many_links_survive_the_roundtrip() {
    let mut driver = memory_driver();
    let mut session = Session::new(cms_registry());

    let user = session.create(sample_user()).unwrap();
    let group = session
        .create(EntityData::new("CmsGroup").with_field("name", "admins"))
        .unwrap();
    session.data_mut(user).add_to("groups", group);
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();

    let links = driver
        .query("SELECT user_id, group_id FROM cms_users_groups", &[])
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["user_id"], Value::Int(1));
    assert_eq!(links[0]["group_id"], Value::Int(1));

    // deleting the owner removes its link rows first
    session.delete(user).unwrap();
    session.flush(&mut driver).unwrap();
    assert!(driver
        .query("SELECT user_id FROM cms_users_groups", &[])
        .unwrap()
        .is_empty());
}

#[test]
fn dql_updates_and_aggregates_run_against_real_rows() {
    let mut driver = memory_driver();
    let mut session = Session::new(cms_registry());

    for (username, status) in [("romanb", "developer"), ("gblanco", "developer"), ("bw", "pm")] {
        let user = session
            .create(
                EntityData::new("CmsUser")
                    .with_field("status", status)
                    .with_field("username", username)
                    .with_field("name", username),
            )
            .unwrap();
        session.save(user).unwrap();
    }
    session.flush(&mut driver).unwrap();

    let update = session
        .create_query("UPDATE CmsUser u SET u.status = 'retired' WHERE u.status = ?1")
        .unwrap();
    let params = update
        .plan
        .bind(ParameterBag::new().set_positional(1, "developer"))
        .unwrap();
    let affected = driver.execute(&update.plan.sql, &params).unwrap();
    assert_eq!(affected, 2);

    let count = session
        .create_query("SELECT COUNT(u.id) FROM CmsUser u WHERE u.status = 'retired'")
        .unwrap();
    let rows = driver.query(&count.plan.sql, &[]).unwrap();
    assert_eq!(rows[0][&count.plan.result_columns[0].column_alias], Value::Int(2));
}

#[test]
fn file_backed_database_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");

    {
        let driver = SqliteDriver::open(&SqliteConfig::file(&path)).unwrap();
        driver.execute_batch(SCHEMA).unwrap();
        let mut session = Session::new(cms_registry());
        let mut driver = driver;
        let user = session.create(sample_user()).unwrap();
        session.save(user).unwrap();
        session.flush(&mut driver).unwrap();
    }

    let mut driver = SqliteDriver::open(&SqliteConfig::file(&path)).unwrap();
    let rows = driver.query("SELECT username FROM cms_users", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["username"], Value::from("romanb"));
}

#[test]
fn failed_transaction_rolls_back_cleanly() {
    let mut driver = memory_driver();
    let mut session = Session::new(cms_registry());

    let phone = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    session.save(phone).unwrap();
    session.flush(&mut driver).unwrap();
    session.clear();

    // a second row with the same primary key violates the constraint
    let duplicate = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    session.save(duplicate).unwrap();

    driver.begin().unwrap();
    assert!(session.flush(&mut driver).is_err());
    driver.rollback().unwrap();

    let rows = driver
        .query("SELECT phonenumber FROM cms_phonenumbers", &[])
        .unwrap();
    assert_eq!(rows.len(), 1);
}
