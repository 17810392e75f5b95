//! Generated SQL text, parameter ordering, and result-column layout.

use strata_core::test_support::fixtures::{cms_registry, forum_registry};
use strata_core::{MetadataRegistry, Value};
use strata_query::ast::InputParameter;
use strata_query::{parse, ParameterBag, ParsedQuery, ParserConfig};

fn compile(dql: &str) -> ParsedQuery {
    compile_with(&cms_registry(), dql)
}

fn compile_with(registry: &MetadataRegistry, dql: &str) -> ParsedQuery {
    let config = ParserConfig::default();
    match parse(dql, registry, &config) {
        Ok(query) => query,
        Err(err) => panic!("query failed to compile: {dql}\n  {err}"),
    }
}

#[test]
fn entity_select_expands_to_all_state_field_columns() {
    let query = compile("SELECT u FROM CmsUser u");
    assert_eq!(
        query.plan.sql,
        "SELECT t0.id AS u_id, t0.status AS u_status, t0.username AS u_username, \
         t0.name AS u_name FROM cms_users t0"
    );
    let fields: Vec<Option<&str>> = query
        .plan
        .result_columns
        .iter()
        .map(|c| c.field.as_deref())
        .collect();
    assert_eq!(
        fields,
        vec![Some("id"), Some("status"), Some("username"), Some("name")]
    );
    assert!(query
        .plan
        .result_columns
        .iter()
        .all(|c| c.dql_alias.as_deref() == Some("u")));
}

#[test]
fn where_parameter_becomes_a_placeholder() {
    let query = compile("SELECT u FROM CmsUser u WHERE u.username = ?1");
    assert!(query.plan.sql.ends_with("WHERE t0.username = ?"));
    assert_eq!(query.plan.parameters, vec![InputParameter::Positional(1)]);
}

#[test]
fn parameters_are_ordered_by_placeholder_position() {
    let query =
        compile("SELECT u FROM CmsUser u WHERE u.name = :name AND u.id BETWEEN ?1 AND ?2");
    assert_eq!(
        query.plan.parameters,
        vec![
            InputParameter::Named("name".to_string()),
            InputParameter::Positional(1),
            InputParameter::Positional(2),
        ]
    );
    let bound = query
        .plan
        .bind(
            ParameterBag::new()
                .set_positional(1, 1i64)
                .set_positional(2, 10i64)
                .set_named("name", "Roman"),
        )
        .unwrap();
    assert_eq!(
        bound,
        vec![Value::from("Roman"), Value::Int(1), Value::Int(10)]
    );
}

#[test]
fn join_to_inverse_collection_uses_the_owning_foreign_key() {
    let query = compile("SELECT u, p FROM CmsUser u JOIN u.phonenumbers p");
    assert_eq!(
        query.plan.sql,
        "SELECT t0.id AS u_id, t0.status AS u_status, t0.username AS u_username, \
         t0.name AS u_name, t1.phonenumber AS p_phonenumber \
         FROM cms_users t0 INNER JOIN cms_phonenumbers t1 ON t1.user_id = t0.id"
    );
}

#[test]
fn join_from_the_owning_side() {
    let query = compile("SELECT p, u FROM CmsPhonenumber p JOIN p.user u");
    assert!(query
        .plan
        .sql
        .contains("FROM cms_phonenumbers t0 INNER JOIN cms_users t1 ON t0.user_id = t1.id"));
}

#[test]
fn left_join_emits_left_join() {
    let query = compile("SELECT u, p FROM CmsUser u LEFT JOIN u.phonenumbers p");
    assert!(query
        .plan
        .sql
        .contains("LEFT JOIN cms_phonenumbers t1 ON t1.user_id = t0.id"));
}

#[test]
fn many_to_many_join_goes_through_the_join_table() {
    let query = compile("SELECT u, g FROM CmsUser u JOIN u.groups g");
    assert!(
        query.plan.sql.contains(
            "INNER JOIN cms_users_groups t2 ON t2.user_id = t0.id \
             INNER JOIN cms_groups t1 ON t2.group_id = t1.id"
        ),
        "sql: {}",
        query.plan.sql
    );
}

#[test]
fn join_with_condition_is_appended_to_the_on_clause() {
    let query =
        compile("SELECT u FROM CmsUser u JOIN u.phonenumbers p WITH p.phonenumber = ?1");
    assert!(query
        .plan
        .sql
        .contains("ON t1.user_id = t0.id AND (t1.phonenumber = ?)"));
    assert_eq!(query.plan.parameters, vec![InputParameter::Positional(1)]);
}

#[test]
fn to_one_traversal_allocates_an_implicit_inner_join() {
    let query = compile("SELECT p FROM CmsPhonenumber p WHERE p.user.name = ?1");
    assert_eq!(
        query.plan.sql,
        "SELECT t0.phonenumber AS p_phonenumber FROM cms_phonenumbers t0 \
         INNER JOIN cms_users t1 ON t0.user_id = t1.id WHERE t1.name = ?"
    );
}

#[test]
fn repeated_traversal_reuses_the_implicit_join() {
    let query =
        compile("SELECT p FROM CmsPhonenumber p WHERE p.user.name = ?1 AND p.user.status = ?2");
    let joins = query.plan.sql.matches("INNER JOIN cms_users").count();
    assert_eq!(joins, 1, "sql: {}", query.plan.sql);
}

#[test]
fn owning_to_one_terminal_resolves_to_the_foreign_key_column() {
    let query = compile("SELECT a FROM CmsAddress a WHERE a.user IS NULL");
    assert!(query.plan.sql.ends_with("WHERE t0.user_id IS NULL"));
}

#[test]
fn correlated_subselect_sees_outer_aliases() {
    let query = compile(
        "SELECT u FROM CmsUser u WHERE EXISTS \
         (SELECT p.phonenumber FROM CmsPhonenumber p WHERE p.user = u.id)",
    );
    assert!(
        query.plan.sql.contains(
            "EXISTS (SELECT t1.phonenumber FROM cms_phonenumbers t1 WHERE t1.user_id = t0.id)"
        ),
        "sql: {}",
        query.plan.sql
    );
}

#[test]
fn in_subselect_projects_the_identifier() {
    let query =
        compile("SELECT u FROM CmsUser u WHERE u.id IN (SELECT u2 FROM CmsUser u2)");
    assert!(query
        .plan
        .sql
        .contains("WHERE t0.id IN (SELECT t1.id FROM cms_users t1)"));
}

#[test]
fn literals_are_inlined_with_quote_escaping() {
    let query = compile("SELECT u FROM CmsUser u WHERE u.name = 'it''s' AND u.id > 3");
    assert!(query.plan.sql.ends_with("WHERE t0.name = 'it''s' AND t0.id > 3"));
    assert!(query.plan.parameters.is_empty());

    let query = compile("SELECT u FROM CmsUser u WHERE u.status IN ('a', 'b')");
    assert!(query.plan.sql.ends_with("WHERE t0.status IN ('a', 'b')"));
}

#[test]
fn aggregates_collapse_to_scalar_columns() {
    let query = compile("SELECT COUNT(u.id) FROM CmsUser u");
    assert_eq!(
        query.plan.sql,
        "SELECT COUNT(t0.id) AS expr0 FROM cms_users t0"
    );
    assert_eq!(query.plan.result_columns.len(), 1);
    assert!(query.plan.result_columns[0].dql_alias.is_none());

    let query = compile("SELECT COUNT(u) FROM CmsUser u");
    assert!(query.plan.sql.starts_with("SELECT COUNT(t0.id) AS"));

    let query = compile("SELECT COUNT(DISTINCT u.status) num FROM CmsUser u");
    assert!(query.plan.sql.starts_with("SELECT COUNT(DISTINCT t0.status) AS num"));
}

#[test]
fn group_having_order_render_in_clause_order() {
    let query = compile(
        "SELECT u.status, COUNT(u.id) FROM CmsUser u \
         GROUP BY u.status HAVING COUNT(u.id) > 1 ORDER BY u.status DESC",
    );
    assert!(query.plan.sql.ends_with(
        "GROUP BY t0.status HAVING COUNT(t0.id) > 1 ORDER BY t0.status DESC"
    ));
}

#[test]
fn distinct_select() {
    let query = compile("SELECT DISTINCT u.status FROM CmsUser u");
    assert!(query
        .plan
        .sql
        .starts_with("SELECT DISTINCT t0.status AS u_status"));
}

#[test]
fn functions_emit_through_their_handlers() {
    let query = compile("SELECT u FROM CmsUser u WHERE TRIM(u.username) = ?1");
    assert!(query.plan.sql.contains("WHERE TRIM(t0.username) = ?"));

    let query = compile("SELECT u FROM CmsUser u WHERE TRIM(LEADING ' ' FROM u.username) = 'x'");
    assert!(query
        .plan
        .sql
        .contains("WHERE TRIM(LEADING ' ' FROM t0.username) = 'x'"));

    let query = compile("SELECT u FROM CmsUser u WHERE CONCAT(u.name, ?1) = ?2");
    assert!(query.plan.sql.contains("WHERE CONCAT(t0.name, ?) = ?"));
    assert_eq!(query.plan.parameters.len(), 2);

    let query = compile("SELECT u FROM CmsUser u WHERE UPPER(u.username) = 'GBLANCO'");
    assert!(query.plan.sql.contains("WHERE UPPER(t0.username) = 'GBLANCO'"));
}

#[test]
fn update_generates_single_table_sql() {
    let query = compile("UPDATE CmsUser u SET u.name = ?1, u.status = 'inactive' WHERE u.id = ?2");
    assert_eq!(
        query.plan.sql,
        "UPDATE cms_users SET name = ?, status = 'inactive' WHERE id = ?"
    );
    assert_eq!(
        query.plan.parameters,
        vec![InputParameter::Positional(1), InputParameter::Positional(2)]
    );
}

#[test]
fn update_set_null() {
    let query = compile("UPDATE CmsUser u SET u.name = NULL WHERE u.id = ?1");
    assert_eq!(
        query.plan.sql,
        "UPDATE cms_users SET name = NULL WHERE id = ?"
    );
}

#[test]
fn delete_generates_single_table_sql() {
    let query = compile("DELETE FROM CmsUser u WHERE u.id = ?1");
    assert_eq!(query.plan.sql, "DELETE FROM cms_users WHERE id = ?");

    let query = compile("DELETE FROM CmsUser");
    assert_eq!(query.plan.sql, "DELETE FROM cms_users");
}

#[test]
fn two_step_traversal_chains_implicit_joins() {
    let registry = forum_registry();
    let query = compile_with(
        &registry,
        "SELECT f FROM ForumUser f WHERE f.avatar IS NULL",
    );
    assert!(query.plan.sql.ends_with("WHERE t0.avatar_id IS NULL"));

    let query = compile("SELECT a FROM CmsArticle a WHERE a.user.address.zip = ?1");
    assert_eq!(
        query.plan.sql,
        "SELECT t0.id AS a_id, t0.topic AS a_topic, t0.text AS a_text FROM cms_articles t0 \
         INNER JOIN cms_users t1 ON t0.user_id = t1.id \
         INNER JOIN cms_addresses t2 ON t2.user_id = t1.id WHERE t2.zip = ?"
    );
}

#[test]
fn unbound_parameter_is_reported_by_name() {
    let query = compile("SELECT u FROM CmsUser u WHERE u.name = :name");
    let err = query.plan.bind(&ParameterBag::new()).unwrap_err();
    assert!(err.to_string().contains(":name"));
}

#[test]
fn cache_key_is_stable_per_salt() {
    let query = compile("SELECT u FROM CmsUser u");
    let again = compile("SELECT u FROM CmsUser u");
    assert_eq!(query.plan.cache_key("v1"), again.plan.cache_key("v1"));
    assert_ne!(query.plan.cache_key("v1"), query.plan.cache_key("v2"));
}

#[test]
fn plan_round_trips_through_serde() {
    let query = compile("SELECT u FROM CmsUser u WHERE u.id = ?1");
    let json = serde_json::to_string(&query.plan).unwrap();
    let back: strata_query::ExecutablePlan = serde_json::from_str(&json).unwrap();
    assert_eq!(back.sql, query.plan.sql);
    assert_eq!(back.parameters, query.plan.parameters);
    assert_eq!(back.result_columns, query.plan.result_columns);
}
