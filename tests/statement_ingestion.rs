use cmi5_lrs::core::error::LrsError;
use cmi5_lrs::core::store::Store;
use cmi5_lrs::services::actors::{ActorRegistry, SqliteActorRegistry};
use cmi5_lrs::services::statements::{Ingested, SqliteStatementStore, StatementRepository};
use cmi5_lrs::subsystems;
use cmi5_lrs::xapi::builder::{self, StatementBuilder};
use cmi5_lrs::xapi::model::{Agent, Verb};
use cmi5_lrs::LrsConfig;
use rusqlite::Connection;
use std::sync::Arc;
use tempfile::tempdir;

const AU: &str = "https://example.com/course/au-1";
const REG: &str = "6a0b7c1e-3f44-4c1d-9b0e-2d9a1c5e7f10";

fn open(root: &std::path::Path) -> (Store, Arc<SqliteActorRegistry>, SqliteStatementStore) {
    let store = Store::with_config(root, LrsConfig::default()).expect("store");
    subsystems::initialize_all_dbs(&store).expect("init");
    let actors = Arc::new(SqliteActorRegistry::new(&store));
    let statements = SqliteStatementStore::new(&store, actors.clone());
    (store, actors, statements)
}

fn learner() -> Agent {
    Agent::with_mbox("mailto:ann@example.com").named("Ann")
}

fn row_count(store: &Store) -> i64 {
    let conn = Connection::open(store.db_path()).expect("open db");
    conn.query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))
        .expect("count")
}

#[test]
fn resubmitting_identical_statement_is_a_noop() {
    let tmp = tempdir().expect("tempdir");
    let (store, _, statements) = open(tmp.path());

    let statement = builder::completed(&learner(), AU, REG).build().expect("build");
    let first = statements.append(statement.clone()).expect("first append");
    let second = statements.append(statement).expect("second append");

    assert!(matches!(first, Ingested::Stored(_)));
    assert!(second.is_duplicate());
    assert_eq!(first.receipt(), second.receipt());
    assert_eq!(row_count(&store), 1);
}

#[test]
fn reused_id_with_different_content_conflicts() {
    let tmp = tempdir().expect("tempdir");
    let (store, _, statements) = open(tmp.path());

    let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
    let original = builder::completed(&learner(), AU, REG)
        .id(id)
        .build()
        .expect("build");
    let altered = builder::passed(&learner(), AU, REG, 0.9)
        .id(id)
        .build()
        .expect("build");

    statements.append(original).expect("append");
    let err = statements.append(altered).expect_err("conflict");
    assert!(matches!(err, LrsError::Conflict(_)));
    assert_eq!(row_count(&store), 1);
}

#[test]
fn id_and_registration_case_do_not_defeat_idempotence() {
    let tmp = tempdir().expect("tempdir");
    let (store, _, statements) = open(tmp.path());

    let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
    let lower = builder::completed(&learner(), AU, REG)
        .id(id)
        .timestamp("2026-03-01T10:00:00.000Z")
        .build()
        .expect("build");
    let upper = builder::completed(&learner(), AU, &REG.to_uppercase())
        .id(&id.to_uppercase())
        .timestamp("2026-03-01T10:00:00.000Z")
        .build()
        .expect("build");

    let first = statements.append(lower).expect("append");
    let second = statements.append(upper).expect("append with other case");
    assert!(second.is_duplicate());
    assert_eq!(first.receipt(), second.receipt());
    assert_eq!(row_count(&store), 1);
}

#[test]
fn invalid_statement_leaves_no_row() {
    let tmp = tempdir().expect("tempdir");
    let (store, _, statements) = open(tmp.path());

    let mut statement = builder::completed(&learner(), AU, REG).build().expect("build");
    statement.verb.id = "not an iri".to_string();
    let err = statements.append(statement).expect_err("invalid verb");
    assert_eq!(err.kind(), "validation");
    assert_eq!(row_count(&store), 0);
}

#[test]
fn missing_id_is_assigned_and_fields_are_filled() {
    let tmp = tempdir().expect("tempdir");
    let (_, _, statements) = open(tmp.path());

    let statement = StatementBuilder::new()
        .actor(learner())
        .verb(Verb {
            id: "http://adlnet.gov/expapi/verbs/experienced".to_string(),
            display: Default::default(),
        })
        .activity("https://example.com/page/1", Some("Page one"))
        .build()
        .expect("build");
    assert!(statement.id.is_none());

    let receipt = statements.append(statement).expect("append").receipt().clone();
    assert!(cmi5_lrs::xapi::validate::is_uuid(&receipt.statement_id));

    let stored = statements.get(&receipt.statement_id).expect("get");
    assert_eq!(stored.seq, receipt.seq);
    assert!(stored.statement.stored.is_some());
    assert!(stored.statement.timestamp.is_some());
    assert!(stored.statement.authority.is_some());
    assert!(!stored.voided);
}

#[test]
fn seq_orders_statements_and_lists_filter_by_attempt() {
    let tmp = tempdir().expect("tempdir");
    let (_, actors, statements) = open(tmp.path());
    let other_reg = "9d3c2b1a-0000-4000-8000-000000000001";

    let a = statements
        .append(builder::launched(&learner(), AU, REG).build().expect("build"))
        .expect("append");
    let b = statements
        .append(builder::initialized(&learner(), AU, REG).build().expect("build"))
        .expect("append");
    statements
        .append(builder::launched(&learner(), AU, other_reg).build().expect("build"))
        .expect("append");
    statements
        .append(
            builder::launched(&learner(), "https://example.com/course/au-2", REG)
                .build()
                .expect("build"),
        )
        .expect("append");

    assert!(a.receipt().seq < b.receipt().seq);
    assert!(a.receipt().stored <= b.receipt().stored);

    let actor_id = actors
        .lookup_agent(&learner())
        .expect("lookup")
        .expect("known actor");
    let attempt = statements
        .list_for_activity(AU, &actor_id, Some(REG))
        .expect("list");
    assert_eq!(attempt.len(), 2);
    assert!(attempt.windows(2).all(|w| w[0].seq < w[1].seq));

    let registration = statements
        .list_for_registration(&actor_id, Some(REG))
        .expect("list");
    assert_eq!(registration.len(), 3);

    let page = statements.list_after(a.receipt().seq, 2).expect("page");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].seq, b.receipt().seq);
    assert_eq!(statements.count().expect("count"), 4);
}

#[test]
fn voiding_marks_target_and_cannot_be_chained() {
    let tmp = tempdir().expect("tempdir");
    let (_, _, statements) = open(tmp.path());

    let pass = statements
        .append(builder::passed(&learner(), AU, REG, 0.9).build().expect("build"))
        .expect("append");
    let target = pass.receipt().statement_id.clone();
    assert!(!statements.get(&target).expect("get").voided);

    let void = statements
        .append(builder::voided(&learner(), &target).build().expect("build"))
        .expect("void");
    assert!(statements.get(&target).expect("get").voided);

    let err = statements
        .append(
            builder::voided(&learner(), &void.receipt().statement_id)
                .build()
                .expect("build"),
        )
        .expect_err("voiding a voiding statement");
    assert!(matches!(err, LrsError::ValidationError(_)));
}

#[test]
fn void_may_precede_its_target() {
    let tmp = tempdir().expect("tempdir");
    let (_, _, statements) = open(tmp.path());

    let target_id = "3b241101-e2bb-4255-8caf-4136c566a962";
    statements
        .append(builder::voided(&learner(), target_id).build().expect("build"))
        .expect("void first");
    statements
        .append(
            builder::passed(&learner(), AU, REG, 0.9)
                .id(target_id)
                .build()
                .expect("build"),
        )
        .expect("late target");
    assert!(statements.get(target_id).expect("get").voided);
}

#[test]
fn actor_resolution_is_stable_across_property_forms() {
    let tmp = tempdir().expect("tempdir");
    let (_, actors, _) = open(tmp.path());

    let a = actors
        .resolve_agent(&Agent::with_mbox("mailto:Ann@Example.com"))
        .expect("resolve");
    let b = actors.resolve_agent(&learner()).expect("resolve");
    assert_eq!(a, b);

    let account = actors
        .resolve_agent(&Agent::with_account("https://lms.example.com/", "ann"))
        .expect("resolve");
    let same_account = actors
        .resolve_agent(&Agent::with_account("https://lms.example.com", "ann"))
        .expect("resolve");
    assert_eq!(account, same_account);
    assert_ne!(a, account);

    let stored = actors.get(&a).expect("get");
    assert_eq!(stored.id, a);
    assert!(
        actors
            .lookup_agent(&Agent::with_mbox("mailto:nobody@example.com"))
            .expect("lookup")
            .is_none()
    );
}
