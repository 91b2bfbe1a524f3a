//! Output rendering for CLI surfaces.
//!
//! Every command can print either a JSON command envelope or compact coloured
//! text. Text rendering stays bounded so long IRIs do not flood the terminal.

use crate::core::time;
use crate::services::manifest::ManifestTree;
use crate::services::progress::{CourseProgress, CourseVerdict};
use crate::services::session::{SessionState, SessionSummary};
use crate::services::statements::StoredStatement;
use colored::Colorize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Prints `payload` inside an `ok` envelope for JSON, or runs `text` otherwise.
pub fn emit<F: FnOnce()>(format: Format, cmd: &str, payload: JsonValue, text: F) {
    match format {
        Format::Json => println!("{}", time::command_envelope(cmd, "ok", payload)),
        Format::Text => text(),
    }
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Last path segment of an IRI, for compact display of verbs and activities.
pub fn short_iri(iri: &str) -> &str {
    iri.trim_end_matches('/')
        .rsplit(['/', '#', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(iri)
}

fn state_label(state: SessionState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        SessionState::Passed | SessionState::Completed => label.bright_green(),
        SessionState::Failed | SessionState::Abandoned => label.bright_red(),
        SessionState::NotStarted => label.dimmed(),
        _ => label.bright_yellow(),
    }
}

fn check(flag: bool) -> colored::ColoredString {
    if flag { "●".bright_green() } else { "○".dimmed() }
}

pub fn print_session(activity_id: &str, summary: &SessionSummary) {
    println!("{} {}", "Activity".bold(), activity_id);
    println!("  state      {}", state_label(summary.state));
    println!("  satisfied  {}", check(summary.satisfied));
    if let Some(score) = summary.score {
        println!("  score      {:.2}", score);
    }
    println!("  progress   {}%", summary.progress_percent);
    println!(
        "  elapsed    {}",
        time::format_duration_secs(summary.elapsed_seconds.round() as u64)
    );
    println!(
        "  launches   {} ({} abandoned)",
        summary.launch_count, summary.abandoned_spans
    );
    println!("  statements {}", summary.statement_count);
}

pub fn print_progress(progress: &CourseProgress) {
    let verdict = match progress.overall_verdict {
        CourseVerdict::Satisfied => "Satisfied".bright_green().bold(),
        CourseVerdict::InProgress => "InProgress".bright_yellow().bold(),
        CourseVerdict::NotStarted => "NotStarted".dimmed(),
    };
    println!(
        "{} {}  {}/{} ({:.1}%)  {}",
        "Package".bold(),
        progress.package_id,
        progress.completed_activities,
        progress.total_activities,
        progress.percent,
        verdict
    );
    for block in &progress.blocks {
        println!(
            "  {} {} [{}/{}]",
            check(block.satisfied),
            compact_line(&block.title, 60).bright_white(),
            block.satisfied_activities,
            block.total_activities
        );
    }
    for activity in &progress.activities {
        println!(
            "    {} {} {}",
            check(activity.session.satisfied),
            compact_line(&activity.title, 60),
            state_label(activity.session.state)
        );
    }
}

pub fn print_tree(tree: &ManifestTree) {
    println!(
        "{} {} {}",
        "Package".bold(),
        tree.package_id,
        format!("({})", tree.identifier).dimmed()
    );
    print_block(tree, 0, 1);
}

fn print_block(tree: &ManifestTree, node: usize, depth: usize) {
    let Some(block) = tree.block(node) else {
        return;
    };
    let indent = "  ".repeat(depth);
    println!("{}{} {}", indent, "▸".bright_magenta(), block.title.bold());
    for activity in block.activities.iter().filter_map(|s| tree.activity_at(*s)) {
        let mastery = activity
            .mastery_score
            .map(|m| format!(" mastery {:.2}", m))
            .unwrap_or_default();
        println!(
            "{}  {} {} [{}{}]",
            indent,
            "●".bright_cyan(),
            compact_line(&activity.title, 50),
            activity.move_on,
            mastery
        );
        println!("{}    {}", indent, activity.id.dimmed());
    }
    for child in &block.blocks {
        print_block(tree, *child, depth + 1);
    }
}

pub fn print_statement(stored: &StoredStatement) {
    let st = &stored.statement;
    let voided = if stored.voided {
        " (voided)".bright_red().to_string()
    } else {
        String::new()
    };
    println!(
        "{:>6}  {}  {} {}{}",
        stored.seq,
        st.stored.as_deref().unwrap_or("-").dimmed(),
        short_iri(&st.verb.id).bright_cyan(),
        compact_line(&st.object.id, 70),
        voided
    );
}
