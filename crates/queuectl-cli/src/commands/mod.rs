//! CLI command implementations

pub mod config;
pub mod dlq;
pub mod enqueue;
pub mod list;
pub mod status;
pub mod worker;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use queuectl_queue::{JobEntry, JobState};

pub(crate) fn state_cell(state: JobState) -> Cell {
    let color = match state {
        JobState::Pending => Color::Yellow,
        JobState::Processing => Color::Cyan,
        JobState::Completed => Color::Green,
        JobState::Dead => Color::Red,
    };
    Cell::new(state).fg(color)
}

/// Render jobs as a table
pub(crate) fn jobs_table(jobs: &[JobEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["ID", "State", "Attempts", "Run at", "Command"]);

    for job in jobs {
        let run_at = job
            .run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&job.id),
            state_cell(job.state),
            Cell::new(format!("{}/{}", job.attempts, job.max_retries)),
            Cell::new(run_at),
            Cell::new(&job.command),
        ]);
    }
    table
}
