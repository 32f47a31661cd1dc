use colored::*;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use crate::core::aggregator::DashboardSnapshot;
use crate::core::models::{Finding, Severity, Task, TaskStatus, User};

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn severity_color(severity: Option<Severity>) -> Color {
    match severity {
        Some(Severity::Critical) => Color::Magenta,
        Some(Severity::High) => Color::Red,
        Some(Severity::Medium) => Color::Yellow,
        Some(Severity::Low) => Color::Green,
        None => Color::Grey,
    }
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Done => Color::Green,
        TaskStatus::Running => Color::Blue,
        TaskStatus::Pending => Color::Yellow,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Unknown => Color::Grey,
    }
}

fn bar(count: usize, max: usize, width: usize) -> String {
    if max == 0 {
        return String::new();
    }
    "█".repeat((count * width).div_ceil(max))
}

pub fn render_dashboard(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} ({} scope, as of {})\n",
        "Dashboard".green().bold(),
        snapshot.scope.as_str(),
        snapshot.reference_date
    ));
    out.push_str(&format!(
        "{}: {}   {}: {}\n\n",
        "Tasks".cyan().bold(),
        snapshot.task_count,
        "Results".cyan().bold(),
        snapshot.result_count
    ));

    let mut histogram = new_table(&["Severity", "Count"]);
    for severity in Severity::ALL.iter().rev() {
        histogram.add_row(vec![
            Cell::new(severity.as_str()).fg(severity_color(Some(*severity))),
            Cell::new(snapshot.severity_histogram.get(*severity)),
        ]);
    }
    if snapshot.unbucketed > 0 {
        histogram.add_row(vec![
            Cell::new("other").fg(severity_color(None)),
            Cell::new(snapshot.unbucketed),
        ]);
    }
    histogram.add_row(vec![
        Cell::new("total").add_attribute(Attribute::Bold),
        Cell::new(snapshot.severity_histogram.total() + snapshot.unbucketed),
    ]);
    out.push_str(&histogram.to_string());
    out.push('\n');

    let peak = snapshot.trend.iter().map(|p| p.count).max().unwrap_or(0);
    let mut trend = new_table(&["Date", "Count", ""]);
    for point in &snapshot.trend {
        trend.add_row(vec![
            Cell::new(point.date.format("%m-%d")),
            Cell::new(point.count),
            Cell::new(bar(point.count, peak, 20)).fg(Color::Cyan),
        ]);
    }
    out.push_str(&trend.to_string());
    out
}

pub fn render_tasks(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No tasks".dimmed().to_string();
    }

    let mut table = new_table(&["ID", "Target", "Template", "Status", "Created"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(task.id),
            Cell::new(&task.target),
            Cell::new(&task.template),
            Cell::new(task.status.as_str()).fg(status_color(task.status)),
            Cell::new(
                task.created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table.to_string()
}

pub fn render_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No findings".dimmed().to_string();
    }

    let mut table = new_table(&["ID", "Severity", "Vulnerability", "Target", "Seen"]);
    for finding in findings {
        let severity = if finding.severity.is_empty() { "-" } else { finding.severity.as_str() };
        table.add_row(vec![
            Cell::new(finding.id),
            Cell::new(severity).fg(severity_color(finding.severity_bucket())),
            Cell::new(&finding.vulnerability),
            Cell::new(&finding.target),
            Cell::new(
                finding
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table.to_string()
}

fn format_time(timestamp: Option<&chrono::DateTime<chrono::FixedOffset>>) -> String {
    timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M:%S %:z").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn detail_table(rows: Vec<(&str, Cell)>) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label).add_attribute(Attribute::Bold), value]);
    }
    table.to_string()
}

pub fn render_task_detail(task: &Task) -> String {
    detail_table(vec![
        ("ID", Cell::new(task.id)),
        ("Target", Cell::new(&task.target)),
        ("Template", Cell::new(&task.template)),
        ("Status", Cell::new(task.status.as_str()).fg(status_color(task.status))),
        ("Owner", Cell::new(task.user_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()))),
        ("Created", Cell::new(format_time(task.created_at.as_ref()))),
    ])
}

pub fn render_finding_detail(finding: &Finding) -> String {
    let detail = if finding.detail.is_empty() { "-" } else { finding.detail.as_str() };
    detail_table(vec![
        ("ID", Cell::new(finding.id)),
        ("Task", Cell::new(finding.task_id)),
        ("Vulnerability", Cell::new(&finding.vulnerability)),
        ("Severity", Cell::new(&finding.severity).fg(severity_color(finding.severity_bucket()))),
        ("Target", Cell::new(&finding.target)),
        ("Seen", Cell::new(format_time(finding.timestamp.as_ref()))),
        ("Detail", Cell::new(detail)),
    ])
}

pub fn render_users(users: &[User]) -> String {
    let mut table = new_table(&["ID", "Username", "Role"]);
    for user in users {
        table.add_row(vec![
            Cell::new(user.id),
            Cell::new(&user.username),
            Cell::new(user.role.as_str()),
        ]);
    }
    table.to_string()
}
