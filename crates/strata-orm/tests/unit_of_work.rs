//! End-to-end unit-of-work behavior against the recording driver.

use strata_core::test_support::fixtures::{cms_registry, forum_registry};
use strata_core::test_support::mocks::RecordingDriver;
use strata_core::Value;
use indexmap::IndexMap;
use strata_orm::{EntityData, EntityState, OrmError, Session};

fn user_data(username: &str, name: &str) -> EntityData {
    EntityData::new("CmsUser")
        .with_field("status", "developer")
        .with_field("username", username)
        .with_field("name", name)
}

#[test]
fn insert_writes_all_set_fields_and_assigns_the_generated_id() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec!["INSERT INTO cms_users (status, username, name) VALUES (?, ?, ?)"]
    );
    assert_eq!(
        driver.statements[0].params,
        vec![
            Value::from("developer"),
            Value::from("romanb"),
            Value::from("Roman"),
        ]
    );
    assert_eq!(session.data(user).get_field("id"), Some(&Value::Int(1)));
    assert_eq!(session.find("CmsUser", &Value::Int(1)), Some(user));
    assert_eq!(session.state(user), EntityState::Managed);
}

#[test]
fn second_flush_issues_no_statements() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();
    let statements = driver.sql_log().len();

    session.flush(&mut driver).unwrap();
    assert_eq!(driver.sql_log().len(), statements);
}

#[test]
fn referenced_rows_are_inserted_before_their_referrers() {
    let mut session = Session::new(forum_registry());
    let mut driver = RecordingDriver::new();

    let user = session
        .create(EntityData::new("ForumUser").with_field("username", "romanb"))
        .unwrap();
    let avatar = session.create(EntityData::new("ForumAvatar")).unwrap();
    session.data_mut(user).set_one("avatar", Some(avatar));
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec![
            "INSERT INTO forum_avatars DEFAULT VALUES",
            "INSERT INTO forum_users (username, avatar_id) VALUES (?, ?)",
        ]
    );
    // the avatar's generated id flows into the user's foreign key
    assert_eq!(
        driver.statements[1].params,
        vec![Value::from("romanb"), Value::Int(1)]
    );
}

#[test]
fn update_touches_only_the_changed_field() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session
        .unit_of_work()
        .register_loaded(user_data("romanb", "Roman").with_field("id", 1i64))
        .unwrap();
    session.data_mut(user).set_field("name", "Guilherme");
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec!["UPDATE cms_users SET name = ? WHERE id = ?"]
    );
    assert_eq!(
        driver.statements[0].params,
        vec![Value::from("Guilherme"), Value::Int(1)]
    );
}

#[test]
fn moving_a_to_one_reference_updates_the_foreign_key() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session
        .unit_of_work()
        .register_loaded(user_data("romanb", "Roman").with_field("id", 1i64))
        .unwrap();
    let mut phone = EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139");
    phone.set_one("user", None);
    let phone = session.unit_of_work().register_loaded(phone).unwrap();

    session.data_mut(phone).set_one("user", Some(user));
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec!["UPDATE cms_phonenumbers SET user_id = ? WHERE phonenumber = ?"]
    );
    assert_eq!(
        driver.statements[0].params,
        vec![Value::Int(1), Value::from("6155139")]
    );
}

#[test]
fn register_loaded_returns_the_managed_instance() {
    let mut session = Session::new(cms_registry());

    let first = session
        .unit_of_work()
        .register_loaded(user_data("romanb", "Roman").with_field("id", 1i64))
        .unwrap();
    // a second load of the same identity must not create a second instance
    let second = session
        .unit_of_work()
        .register_loaded(user_data("romanb", "Roman (stale)").with_field("id", 1i64))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(session.data(first).get_field("name"), Some(&Value::from("Roman")));
    assert_eq!(session.unit_of_work().size(), 1);
}

#[test]
fn save_cascades_to_phonenumbers_but_not_articles() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    let phone = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    let article = session
        .create(
            EntityData::new("CmsArticle")
                .with_field("topic", "Foo")
                .with_field("text", "Bar"),
        )
        .unwrap();
    session.data_mut(phone).set_one("user", Some(user));
    session.data_mut(user).add_to("phonenumbers", phone);
    session.data_mut(user).add_to("articles", article);

    session.save(user).unwrap();
    assert_eq!(session.state(phone), EntityState::Managed);
    assert_eq!(session.state(article), EntityState::New);

    session.flush(&mut driver).unwrap();
    assert!(driver.statements_matching("cms_phonenumbers").len() == 1);
    assert!(driver.statements_matching("cms_articles").is_empty());
}

#[test]
fn delete_cascades_and_runs_in_reverse_dependency_order() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    let phone = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    session.data_mut(phone).set_one("user", Some(user));
    session.data_mut(user).add_to("phonenumbers", phone);
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();
    driver.statements.clear();

    session.delete(user).unwrap();
    assert_eq!(session.state(phone), EntityState::Removed);
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec![
            "DELETE FROM cms_phonenumbers WHERE phonenumber = ?",
            "DELETE FROM cms_users_groups WHERE user_id = ?",
            "DELETE FROM cms_users WHERE id = ?",
        ]
    );
    assert_eq!(session.state(user), EntityState::New);
    assert_eq!(session.find("CmsUser", &Value::Int(1)), None);
}

#[test]
fn owning_many_to_many_writes_link_rows() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    let admins = session
        .create(EntityData::new("CmsGroup").with_field("name", "admins"))
        .unwrap();
    let devs = session
        .create(EntityData::new("CmsGroup").with_field("name", "devs"))
        .unwrap();
    session.data_mut(user).add_to("groups", admins);
    session.data_mut(user).add_to("groups", devs);

    session.save(user).unwrap();
    // save-only cascade reaches the groups
    assert_eq!(session.state(admins), EntityState::Managed);

    session.flush(&mut driver).unwrap();
    let links = driver.statements_matching("INSERT INTO cms_users_groups");
    assert_eq!(links.len(), 2);
    assert_eq!(
        links[0].sql,
        "INSERT INTO cms_users_groups (user_id, group_id) VALUES (?, ?)"
    );
    assert_eq!(links[0].params, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(links[1].params, vec![Value::Int(1), Value::Int(3)]);

    // the link delta is empty on the next flush
    let statements = driver.sql_log().len();
    session.flush(&mut driver).unwrap();
    assert_eq!(driver.sql_log().len(), statements);
}

#[test]
fn removing_a_group_deletes_its_link_row() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    let admins = session
        .create(EntityData::new("CmsGroup").with_field("name", "admins"))
        .unwrap();
    session.data_mut(user).add_to("groups", admins);
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();
    driver.statements.clear();

    session.data_mut(user).remove_from("groups", admins);
    session.flush(&mut driver).unwrap();

    assert_eq!(
        driver.sql_log(),
        vec!["DELETE FROM cms_users_groups WHERE user_id = ? AND group_id = ?"]
    );
}

#[test]
fn owning_reference_to_an_unsaved_entity_fails_the_flush() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    let phone = session
        .create(EntityData::new("CmsPhonenumber").with_field("phonenumber", "6155139"))
        .unwrap();
    session.data_mut(phone).set_one("user", Some(user));
    // only the phonenumber is saved; its user reference dangles
    session.save(phone).unwrap();

    let err = session.flush(&mut driver).unwrap_err();
    assert!(matches!(err, OrmError::UnregisteredEntity { entity } if entity == "CmsUser"));
    assert!(driver.statements.is_empty());
}

#[test]
fn stale_update_reports_a_concurrency_conflict() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();
    driver.rows_affected = 0;

    let user = session
        .unit_of_work()
        .register_loaded(user_data("romanb", "Roman").with_field("id", 1i64))
        .unwrap();
    session.data_mut(user).set_field("name", "Guilherme");

    let err = session.flush(&mut driver).unwrap_err();
    assert!(matches!(err, OrmError::Concurrency { .. }));
}

#[test]
fn deleting_a_never_persisted_entity_issues_no_sql() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    session.save(user).unwrap();
    session.delete(user).unwrap();
    session.flush(&mut driver).unwrap();

    assert!(driver.statements.is_empty());
    assert_eq!(session.state(user), EntityState::Detached);
}

#[test]
fn clear_detaches_everything() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let user = session.create(user_data("romanb", "Roman")).unwrap();
    session.save(user).unwrap();
    session.flush(&mut driver).unwrap();
    assert_eq!(session.unit_of_work().size(), 1);

    session.clear();
    assert_eq!(session.unit_of_work().size(), 0);
    assert!(!session.contains(user));
    assert_eq!(session.find("CmsUser", &Value::Int(1)), None);
}

#[test]
fn query_hydrates_entities_into_the_identity_map() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let mut row = IndexMap::new();
    row.insert("u_id".to_string(), Value::Int(1));
    row.insert("u_status".to_string(), Value::from("developer"));
    row.insert("u_username".to_string(), Value::from("romanb"));
    row.insert("u_name".to_string(), Value::from("Roman"));
    driver.push_rows(vec![row.clone()]);

    let handles = session
        .query(
            &mut driver,
            "SELECT u FROM CmsUser u",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    assert_eq!(handles.len(), 1);
    let user = handles[0];
    assert_eq!(session.data(user).entity, "CmsUser");
    assert_eq!(session.data(user).get_field("name"), Some(&Value::from("Roman")));
    assert_eq!(session.find("CmsUser", &Value::Int(1)), Some(user));

    // a second query for the same row yields the same handle
    driver.push_rows(vec![row]);
    let again = session
        .query(
            &mut driver,
            "SELECT u FROM CmsUser u",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    assert_eq!(again, vec![user]);
}

#[test]
fn entities_scheduled_for_deletion_stay_out_of_query_results() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let mut row = IndexMap::new();
    row.insert("u_id".to_string(), Value::Int(1));
    row.insert("u_status".to_string(), Value::from("developer"));
    row.insert("u_username".to_string(), Value::from("romanb"));
    row.insert("u_name".to_string(), Value::from("Roman"));
    driver.push_rows(vec![row.clone()]);

    let handles = session
        .query(
            &mut driver,
            "SELECT u FROM CmsUser u",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    let user = handles[0];
    session.delete(user).unwrap();

    // the row still exists in the database until the next flush
    driver.push_rows(vec![row]);
    let handles = session
        .query(
            &mut driver,
            "SELECT u FROM CmsUser u",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    assert!(handles.is_empty());
    assert_eq!(session.state(user), EntityState::Removed);
}

#[test]
fn unmatched_left_join_rows_hydrate_only_the_root() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let mut row = IndexMap::new();
    row.insert("u_id".to_string(), Value::Int(1));
    row.insert("u_status".to_string(), Value::from("developer"));
    row.insert("u_username".to_string(), Value::from("romanb"));
    row.insert("u_name".to_string(), Value::from("Roman"));
    row.insert("p_phonenumber".to_string(), Value::Null);
    driver.push_rows(vec![row]);

    let handles = session
        .query(
            &mut driver,
            "SELECT u, p FROM CmsUser u LEFT JOIN u.phonenumbers p",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(session.unit_of_work().size(), 1);
}

#[test]
fn duplicated_root_rows_collapse_to_one_handle() {
    let mut session = Session::new(cms_registry());
    let mut driver = RecordingDriver::new();

    let mut first = IndexMap::new();
    first.insert("u_id".to_string(), Value::Int(1));
    first.insert("u_status".to_string(), Value::from("developer"));
    first.insert("u_username".to_string(), Value::from("romanb"));
    first.insert("u_name".to_string(), Value::from("Roman"));
    first.insert("p_phonenumber".to_string(), Value::from("6155139"));
    let mut second = first.clone();
    second.insert("p_phonenumber".to_string(), Value::from("1234567"));
    driver.push_rows(vec![first, second]);

    let handles = session
        .query(
            &mut driver,
            "SELECT u, p FROM CmsUser u JOIN u.phonenumbers p",
            &strata_query::ParameterBag::new(),
        )
        .unwrap();
    assert_eq!(handles.len(), 1);
    // both phonenumbers were registered alongside the user
    assert_eq!(session.unit_of_work().size(), 3);
}
