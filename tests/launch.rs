use cmi5_lrs::core::store::Store;
use cmi5_lrs::services::manifest::{ActivityInput, LaunchMethod, MoveOn, PackageManifest};
use cmi5_lrs::subsystems;
use cmi5_lrs::xapi::model::Agent;
use cmi5_lrs::{LaunchRequest, Lrs, LrsConfig, LrsError};
use rusqlite::Connection;
use tempfile::tempdir;

const AU: &str = "https://example.com/course/au-1";

fn config() -> LrsConfig {
    LrsConfig {
        endpoint: "https://lrs.example.com/xapi/".to_string(),
        auth_token: "Basic dGVzdDp0ZXN0".to_string(),
        fetch_url: Some("https://lrs.example.com/fetch".to_string()),
        ..LrsConfig::default()
    }
}

fn open_lrs(root: &std::path::Path) -> (Store, Lrs) {
    let store = Store::with_config(root, config()).expect("store");
    subsystems::initialize_all_dbs(&store).expect("init");
    let lrs = Lrs::open(&store);
    (store, lrs)
}

fn manifest() -> PackageManifest {
    PackageManifest {
        id: "https://example.com/course".to_string(),
        title: "Course".to_string(),
        version: None,
        content_base_url: Some("https://cdn.example.com/course/".to_string()),
        blocks: Vec::new(),
        activities: vec![ActivityInput {
            id: AU.to_string(),
            title: "Lesson one".to_string(),
            description: None,
            launch_url: "lesson1/index.html?mode=normal".to_string(),
            launch_method: LaunchMethod::OwnWindow,
            move_on: MoveOn::Passed,
            mastery_score: Some(0.7),
            activity_type: None,
            duration: None,
        }],
    }
}

fn request(package_id: &str, registration: Option<&str>) -> LaunchRequest {
    LaunchRequest {
        package_id: package_id.to_string(),
        activity_id: AU.to_string(),
        actor: Agent::with_mbox("mailto:ann@example.com").named("Ann"),
        registration: registration.map(str::to_string),
        launch_parameters: vec![
            ("locale".to_string(), "de-DE".to_string()),
            ("returnURL".to_string(), "app://course/1?tab=2".to_string()),
        ],
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[test]
fn launch_url_carries_the_cmi5_query_convention() {
    let tmp = tempdir().expect("tempdir");
    let (_, lrs) = open_lrs(tmp.path());
    let package_id = lrs.register_package(&manifest()).expect("register");

    let response = lrs.launch(&request(&package_id, None)).expect("launch");
    assert!(cmi5_lrs::xapi::validate::is_uuid(&response.registration));
    assert!(
        response
            .launch_url
            .starts_with("https://cdn.example.com/course/lesson1/index.html?mode=normal&endpoint=")
    );

    let params = &response.launch_parameters;
    assert_eq!(param(params, "mode"), Some("normal"));
    assert_eq!(param(params, "endpoint"), Some("https://lrs.example.com/xapi/"));
    assert_eq!(param(params, "fetch"), Some("https://lrs.example.com/fetch"));
    assert_eq!(param(params, "auth"), Some("Basic dGVzdDp0ZXN0"));
    assert_eq!(param(params, "registration"), Some(response.registration.as_str()));
    assert_eq!(param(params, "activityId"), Some(AU));
    assert_eq!(param(params, "locale"), Some("de-DE"));
    assert_eq!(param(params, "returnURL"), Some("app://course/1?tab=2"));

    let actor: Agent =
        serde_json::from_str(param(params, "actor").expect("actor param")).expect("actor json");
    assert_eq!(actor.mbox.as_deref(), Some("mailto:ann@example.com"));

    assert_eq!(response.launch_method, LaunchMethod::OwnWindow);
    assert_eq!(response.move_on, MoveOn::Passed);
    assert_eq!(response.mastery_score, Some(0.7));
}

#[test]
fn relaunch_with_same_registration_is_stable_and_writes_no_statements() {
    let tmp = tempdir().expect("tempdir");
    let (store, lrs) = open_lrs(tmp.path());
    let package_id = lrs.register_package(&manifest()).expect("register");
    let registration = "6A0B7C1E-3F44-4C1D-9B0E-2D9A1C5E7F10";

    let first = lrs
        .launch(&request(&package_id, Some(registration)))
        .expect("launch");
    let second = lrs
        .launch(&request(&package_id, Some(registration)))
        .expect("relaunch");
    assert_eq!(first.registration, registration.to_lowercase());
    assert_eq!(first.launch_url, second.launch_url);
    assert_eq!(first.actor_id, second.actor_id);

    let conn = Connection::open(store.db_path()).expect("open db");
    let statements: i64 = conn
        .query_row("SELECT COUNT(*) FROM statements", [], |row| row.get(0))
        .expect("count");
    assert_eq!(statements, 0);
}

#[test]
fn launch_rejects_bad_registration_and_reserved_params() {
    let tmp = tempdir().expect("tempdir");
    let (_, lrs) = open_lrs(tmp.path());
    let package_id = lrs.register_package(&manifest()).expect("register");

    let err = lrs
        .launch(&request(&package_id, Some("attempt-1")))
        .expect_err("non-uuid registration");
    assert!(matches!(err, LrsError::ValidationError(_)));

    let mut hijack = request(&package_id, None);
    hijack
        .launch_parameters
        .push(("endpoint".to_string(), "https://evil.example.com".to_string()));
    let err = lrs.launch(&hijack).expect_err("reserved key");
    assert!(matches!(err, LrsError::ValidationError(_)));
}

#[test]
fn launch_of_unknown_activity_is_not_found() {
    let tmp = tempdir().expect("tempdir");
    let (_, lrs) = open_lrs(tmp.path());
    let package_id = lrs.register_package(&manifest()).expect("register");

    let mut req = request(&package_id, None);
    req.activity_id = "https://example.com/course/au-404".to_string();
    assert!(matches!(lrs.launch(&req), Err(LrsError::NotFound(_))));

    let req = request("P_01HZZZZZZZZZZZZZZZZZZZZZZZ", None);
    assert!(matches!(lrs.launch(&req), Err(LrsError::NotFound(_))));
}

#[test]
fn manifest_registration_is_all_or_nothing() {
    let tmp = tempdir().expect("tempdir");
    let (store, lrs) = open_lrs(tmp.path());

    let mut broken = manifest();
    let mut duplicate = broken.activities[0].clone();
    duplicate.title = "Same id again".to_string();
    broken.activities.push(duplicate);
    let err = lrs.register_package(&broken).expect_err("duplicate activity id");
    assert!(matches!(err, LrsError::ValidationError(_)));

    let conn = Connection::open(store.db_path()).expect("open db");
    let packages: i64 = conn
        .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
        .expect("count");
    let activities: i64 = conn
        .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))
        .expect("count");
    assert_eq!((packages, activities), (0, 0));

    let first = lrs.register_package(&manifest()).expect("register");
    let again = lrs.register_package(&manifest()).expect("re-register");
    assert_eq!(first, again);
    assert_eq!(lrs.manifests().list_packages().expect("list").len(), 1);

    let found = lrs.manifests().find_activity(&first, AU).expect("find");
    assert_eq!(found.title, "Lesson one");
    assert_eq!(found.block_id, "https://example.com/course");
}

#[test]
fn activities_can_be_located_across_packages() {
    let tmp = tempdir().expect("tempdir");
    let (_store, lrs) = open_lrs(tmp.path());

    let first = lrs.register_package(&manifest()).expect("register");
    let mut revised = manifest();
    revised.version = Some("2".to_string());
    revised.activities[0].move_on = MoveOn::Completed;
    let second = lrs.register_package(&revised).expect("register revision");
    assert_ne!(first, second);

    let locations = lrs.manifests().locate_activity(AU).expect("locate");
    let packages: Vec<&str> = locations.iter().map(|l| l.package_id.as_str()).collect();
    assert_eq!(packages.len(), 2);
    assert!(packages.contains(&first.as_str()));
    assert!(packages.contains(&second.as_str()));
    let revision = locations
        .iter()
        .find(|l| l.package_id == second)
        .expect("revision row");
    assert_eq!(revision.move_on, "Completed");
    assert_eq!(revision.block_id, "https://example.com/course");
    assert_eq!(revision.order_index, 0);

    assert!(
        lrs.manifests()
            .locate_activity("https://example.com/elsewhere")
            .expect("locate")
            .is_empty()
    );
}
