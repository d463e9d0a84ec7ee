use std::fmt::Write;

use chrono::NaiveDate;

use crate::analytics::DashboardSnapshot;
use crate::models::{Filter, Priority, RankingMetric, StudentData, StudentRanking};

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn count_cell(value: Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn ranking_value(ranking: &StudentRanking) -> String {
    match ranking.metric {
        RankingMetric::Attendance => format!("{:.1}%", ranking.value),
        RankingMetric::Improvement => format!("{:+.1}", ranking.value),
        RankingMetric::Average => format!("{:.1}", ranking.value),
    }
}

fn ranking_title(metric: RankingMetric) -> &'static str {
    match metric {
        RankingMetric::Average => "Best Averages",
        RankingMetric::Improvement => "Biggest Improvement",
        RankingMetric::Attendance => "Best Attendance",
    }
}

pub fn student_report_file_name(name: &str) -> String {
    let slug: Vec<&str> = name.split_whitespace().collect();
    format!("report_{}.md", slug.join("_"))
}

pub fn build_dashboard_report(
    snapshot: &DashboardSnapshot,
    filter: &Filter,
    generated_on: NaiveDate,
) -> String {
    let mut output = String::new();
    let class_label = filter.class.as_deref().unwrap_or("all classes");
    let subject_label = filter.subject.as_deref().unwrap_or("all subjects");

    let _ = writeln!(output, "# Academic Dashboard Report");
    let _ = writeln!(
        output,
        "Generated for {} / {} on {}",
        class_label, subject_label, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Statistics");

    if snapshot.class_stats.is_empty() {
        let _ = writeln!(output, "No grade records match this filter.");
    } else {
        let _ = writeln!(
            output,
            "| Class | Subject | Average | Grade pass rate | Attendance pass rate | Students |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for stats in &snapshot.class_stats {
            let _ = writeln!(
                output,
                "| {} | {} | {:.1} | {:.1}% | {:.1}% | {} |",
                stats.class,
                stats.subject,
                stats.class_average,
                stats.grade_pass_rate,
                stats.attendance_pass_rate,
                stats.student_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");
    for bucket in &snapshot.distribution {
        let _ = writeln!(output, "- {}: {}", bucket.range_label, bucket.count);
    }

    for (metric, rankings) in [
        (RankingMetric::Average, &snapshot.top_by_average),
        (RankingMetric::Improvement, &snapshot.top_by_improvement),
        (RankingMetric::Attendance, &snapshot.top_by_attendance),
    ] {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", ranking_title(metric));
        if rankings.is_empty() {
            let _ = writeln!(output, "No data for this ranking.");
        }
        for (position, ranking) in rankings.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {} ({}) {}",
                position + 1,
                ranking.student,
                ranking.class,
                ranking_value(ranking)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students at Risk");
    if snapshot.at_risk.is_empty() {
        let _ = writeln!(output, "No students close to the passing limits.");
    } else {
        for entry in &snapshot.at_risk {
            let _ = writeln!(output, "- {} ({}): {}", entry.student, entry.class, entry.reason);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommended Interventions");
    if snapshot.interventions.is_empty() {
        let _ = writeln!(output, "No interventions recommended.");
    }
    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let tier: Vec<_> = snapshot
            .interventions
            .iter()
            .filter(|i| i.priority == priority)
            .collect();
        if tier.is_empty() {
            continue;
        }
        let _ = writeln!(output, "### {} priority", priority.label());
        for intervention in tier {
            let _ = writeln!(
                output,
                "- **{}** ({}) {}: {}. Action: {}",
                intervention.student,
                intervention.class,
                intervention.type_label,
                intervention.indicator_text,
                intervention.suggested_action
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## All Students");
    if snapshot.students.is_empty() {
        let _ = writeln!(output, "No students found.");
    } else {
        let _ = writeln!(output, "| Name | Class | Overall average | Attendance |");
        let _ = writeln!(output, "|---|---|---|---|");
        for row in &snapshot.students {
            let _ = writeln!(
                output,
                "| {} | {} | {:.1} | {:.1}% |",
                row.student, row.class, row.overall_average, row.overall_attendance
            );
        }
    }

    output
}

pub fn build_student_report(student: &StudentData, generated_on: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Individual Student Report");
    let _ = writeln!(output, "Student: {}", student.name);
    let _ = writeln!(output, "Class: {}", student.class);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grades and Performance");
    let _ = writeln!(
        output,
        "| Subject | Term 1 | Term 2 | Term 3 | Term 4 | Average | Status |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---|---|");
    for grade in &student.grades {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} |",
            grade.subject,
            cell(grade.scores[0]),
            cell(grade.scores[1]),
            cell(grade.scores[2]),
            cell(grade.scores[3]),
            grade
                .final_average
                .map_or_else(|| "-".to_string(), |v| format!("{v:.1}")),
            grade.pass_status.label()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance");
    if student.attendance.is_empty() {
        let _ = writeln!(output, "No attendance records.");
    } else {
        let _ = writeln!(
            output,
            "| Subject | Absences 1 | Absences 2 | Absences 3 | Absences 4 | Total absences | Attendance | Status |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|---|");
        for record in &student.attendance {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {:.1}% | {} |",
                record.subject,
                count_cell(record.absences[0]),
                count_cell(record.absences[1]),
                count_cell(record.absences[2]),
                count_cell(record.absences[3]),
                record.total_absences,
                record.attendance_percent,
                record.pass_status.label()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Generated on {}", generated_on.format("%d/%m/%Y"));
    output
}
