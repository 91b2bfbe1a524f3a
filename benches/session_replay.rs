use cmi5_lrs::core::store::Store;
use cmi5_lrs::services::manifest::{ActivityInput, BlockInput, ManifestTree, MoveOn, PackageManifest};
use cmi5_lrs::services::progress;
use cmi5_lrs::services::session::{self, Policy};
use cmi5_lrs::services::statements::StoredStatement;
use cmi5_lrs::subsystems;
use cmi5_lrs::xapi::builder;
use cmi5_lrs::xapi::model::{Agent, Statement};
use cmi5_lrs::{Lrs, LrsConfig};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tempfile::TempDir;

const REG: &str = "6a0b7c1e-3f44-4c1d-9b0e-2d9a1c5e7f10";

fn learner() -> Agent {
    Agent::with_mbox("mailto:bench@example.com")
}

fn activity_id(n: usize) -> String {
    format!("https://example.com/bench/au-{}", n)
}

/// One launch span per 10 statements: launched, initialized, progress, terminated.
fn attempt(activity: &str, len: usize) -> Vec<Statement> {
    let actor = learner();
    (0..len)
        .map(|i| {
            let ts = format!("2026-01-01T{:02}:{:02}:{:02}.000Z", (i / 3600) % 24, (i / 60) % 60, i % 60);
            let b = match i % 10 {
                0 => builder::launched(&actor, activity, REG),
                1 => builder::initialized(&actor, activity, REG),
                9 => builder::terminated(&actor, activity, REG),
                n => builder::progressed(&actor, activity, REG, (n * 10) as u8),
            };
            b.timestamp(&ts).build().unwrap()
        })
        .collect()
}

fn stored(statements: Vec<Statement>) -> Vec<StoredStatement> {
    statements
        .into_iter()
        .enumerate()
        .map(|(i, statement)| StoredStatement {
            seq: i as i64 + 1,
            actor_id: "A_BENCH".to_string(),
            voided: false,
            statement,
        })
        .collect()
}

fn course(activities: usize) -> PackageManifest {
    let au = |n: usize| ActivityInput {
        id: activity_id(n),
        title: format!("Unit {}", n),
        description: None,
        launch_url: format!("unit{}/index.html", n),
        launch_method: Default::default(),
        move_on: MoveOn::CompletedAndPassed,
        mastery_score: Some(0.8),
        activity_type: None,
        duration: None,
    };
    PackageManifest {
        id: "https://example.com/bench".to_string(),
        title: "Bench course".to_string(),
        version: None,
        content_base_url: Some("https://cdn.example.com/bench/".to_string()),
        blocks: (0..activities / 5)
            .map(|b| BlockInput {
                id: format!("https://example.com/bench/block-{}", b),
                title: format!("Block {}", b),
                blocks: Vec::new(),
                activities: (b * 5..b * 5 + 5).map(au).collect(),
            })
            .collect(),
        activities: Vec::new(),
    }
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_replay");
    let policy = Policy {
        move_on: MoveOn::CompletedOrPassed,
        mastery_score: Some(0.8),
    };

    for len in [10usize, 100, 1000] {
        let history = stored(attempt(&activity_id(0), len));
        group.bench_with_input(BenchmarkId::new("replay", len), &history, |b, history| {
            b.iter(|| black_box(session::replay(policy, history)));
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("course_progress");

    for activities in [10usize, 50] {
        let tree = ManifestTree::build("P_BENCH", &course(activities)).unwrap();
        let history: Vec<StoredStatement> = stored(
            (0..activities)
                .flat_map(|n| attempt(&activity_id(n), 20))
                .collect(),
        );
        group.bench_with_input(
            BenchmarkId::new("aggregate", activities),
            &history,
            |b, history| {
                b.iter(|| black_box(progress::aggregate(&tree, Some(REG), history, None)));
            },
        );
    }
    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("statement_ingest");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    group.bench_function("submit_100", |b| {
        b.iter(|| {
            let temp_dir = TempDir::new().unwrap();
            let store = Store::with_config(temp_dir.path(), LrsConfig::default()).unwrap();
            subsystems::initialize_all_dbs(&store).unwrap();
            let lrs = Lrs::open(&store);
            for statement in attempt(&activity_id(0), 100) {
                black_box(lrs.submit_statement(statement).unwrap());
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_replay, bench_aggregate, bench_ingest);
criterion_main!(benches);
