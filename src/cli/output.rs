//! Human-readable and JSON rendering for CLI commands.

use colored::*;
use eyre::{Context, Result};
use serde::Serialize;

use drillr::analytics::{GenerationSuggestion, ScoreSummary, SystemHealth, UserPerformanceSummary};
use drillr::domain::{GenerationHint, GenerationRun, RunOutcome, ScoreDistribution, TopicGap, WorkerStatus};
use drillr::scheduler::PassResult;

/// Print `value` as pretty JSON, or hand it to `human`.
pub fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
        println!("{}", text);
    } else {
        human(value);
    }
    Ok(())
}

fn outcome_label(outcome: RunOutcome) -> ColoredString {
    match outcome {
        RunOutcome::Success => outcome.as_str().green(),
        RunOutcome::Partial => outcome.as_str().yellow(),
        RunOutcome::Failure => outcome.as_str().red(),
        RunOutcome::Skipped | RunOutcome::Cancelled => outcome.as_str().dimmed(),
    }
}

pub fn print_run(run: &GenerationRun) {
    println!(
        "  {} {} {}ms  gaps={} calls={}/{} items={}/{}{}",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        outcome_label(run.outcome),
        run.duration_ms,
        run.gaps_found,
        run.calls_succeeded,
        run.calls_attempted,
        run.items_generated,
        run.items_requested,
        if run.rate_limited { " rate-limited".red().to_string() } else { String::new() },
    );
    for detail in &run.details {
        println!("      {}", detail.dimmed());
    }
}

pub fn print_pass(result: &PassResult) {
    match result {
        PassResult::Completed(run) => {
            println!("{} {}", "Pass finished:".green(), run.run_id);
            print_run(run);
        }
        PassResult::Busy => println!("{}", "A pass is already running on this instance".yellow()),
        PassResult::Paused(scope) => println!("{} {}", "Paused:".yellow(), scope),
    }
}

pub fn print_status(status: &WorkerStatus, runs: &[GenerationRun]) {
    let state = if status.is_paused {
        "paused".yellow()
    } else if status.is_running {
        "running".green()
    } else {
        "stopped".dimmed()
    };
    println!("{} {} ({})", "Instance:".cyan(), status.instance_id, state);
    println!("  activity:        {}", status.current_activity);
    match status.last_heartbeat {
        Some(beat) => println!("  last heartbeat:  {}", beat.to_rfc3339()),
        None => println!("  last heartbeat:  {}", "never".dimmed()),
    }
    println!("  total runs:      {}", status.total_runs);
    println!("  items generated: {}", status.total_items_generated);
    if let Some(error) = &status.last_run_error {
        println!("  last error:      {}", error.red());
    }
    if !runs.is_empty() {
        println!("{}", "Recent runs:".cyan());
        for run in runs {
            print_run(run);
        }
    }
}

pub fn print_distribution(distribution: &ScoreDistribution) {
    println!(
        "{} {}  {} {}  {} {}  (total {}, avg {:.1})",
        "high".red(),
        distribution.high,
        "medium".yellow(),
        distribution.medium,
        "low".green(),
        distribution.low,
        distribution.total,
        distribution.average
    );
}

pub fn print_gaps(gaps: &[TopicGap]) {
    if gaps.is_empty() {
        println!("{}", "No coverage gaps".green());
        return;
    }
    for gap in gaps {
        let who = match gap.subject_id {
            Some(id) => format!("subject {}", id),
            None => format!("{} subjects", gap.subjects_affected),
        };
        println!(
            "  {:<32} {:<14} fresh {}/{} ({:.0}% < {:.0}%)  suggest {}{}",
            gap.key.to_string().cyan(),
            who,
            gap.fresh_items,
            gap.total_items,
            gap.fresh_ratio * 100.0,
            gap.target_ratio * 100.0,
            gap.suggested_count.to_string().yellow(),
            if gap.hinted { " hinted".magenta().to_string() } else { String::new() },
        );
        if !gap.focus_topics.is_empty() {
            println!("      focus: {}", gap.focus_topics.join(", ").dimmed());
        }
    }
}

pub fn print_hint(hint: &GenerationHint) {
    println!(
        "{} subject {} {} (weight {}, expires {})",
        "Hint added:".green(),
        hint.subject_id,
        hint.key.to_string().cyan(),
        hint.priority_weight,
        hint.expires_at.format("%Y-%m-%d %H:%M:%S")
    );
}

pub fn print_health(health: &SystemHealth) {
    let perf = &health.performance;
    println!("{}", "Performance:".cyan());
    println!("  calculations/s:  {:.3}", perf.calculations_per_second);
    println!("  avg calculation: {:.2}ms", perf.avg_calculation_time_ms);
    println!("  avg query:       {:.2}ms", perf.avg_query_time_ms);
    println!("  avg score:       {:.1}", perf.avg_score);

    let jobs = &health.background_jobs;
    let status = match jobs.status.as_str() {
        "healthy" => jobs.status.green(),
        "degraded" => jobs.status.red(),
        _ => jobs.status.yellow(),
    };
    println!("{} {}", "Background jobs:".cyan(), status);
    if let Some(outcome) = jobs.last_run_outcome {
        println!("  last run:         {}", outcome_label(outcome));
    }
    println!("  priority updates: {}", jobs.priority_updates);
    println!("  queue size:       {}", jobs.queue_size);
    match jobs.last_update {
        Some(at) => println!("  last update:      {}", at.to_rfc3339()),
        None => println!("  last update:      {}", "N/A".dimmed()),
    }

    println!("{}", "Workers:".cyan());
    if health.workers.is_empty() {
        println!("  {}", "none registered".dimmed());
    }
    for worker in &health.workers {
        let mark = if worker.healthy { "healthy".green() } else { "stale".red() };
        println!(
            "  {:<16} {:<8} runs={} items={} {}",
            worker.instance_id, mark, worker.total_runs, worker.total_items_generated, worker.current_activity
        );
    }
}

pub fn print_comparison(summaries: &[ScoreSummary]) {
    for summary in summaries {
        print!("{} {:<6} ", "subject".cyan(), summary.subject_id.0);
        print_distribution(&summary.distribution);
        for area in &summary.weak_areas {
            println!(
                "    weak: {} ({}/{})",
                area.topic.yellow(),
                area.correct_attempts,
                area.total_attempts
            );
        }
    }
}

pub fn print_summary(summary: &UserPerformanceSummary) {
    println!("{} {}", "Subject".cyan(), summary.subject_id);
    print!("  ");
    print_distribution(&summary.distribution);
    for area in &summary.weak_areas {
        println!("  weak: {} {:.0}%", area.topic.yellow(), area.accuracy * 100.0);
    }
    for item in &summary.high_priority_items {
        println!(
            "  item {:<6} {:>7.1}  {}/{}/{} {}",
            item.item_id.0,
            item.score,
            item.language,
            item.level,
            item.kind,
            item.topic.as_deref().unwrap_or("")
        );
    }
}

pub fn print_suggestions(suggestions: &[GenerationSuggestion]) {
    if suggestions.is_empty() {
        println!("{}", "Every bucket is well stocked".green());
        return;
    }
    for s in suggestions {
        println!(
            "  {}/{}/{:<24} available {:<4} high-priority {:<4} avg {:.1}",
            s.language, s.level, s.kind.as_str(), s.available, s.high_priority, s.avg_priority
        );
    }
}
