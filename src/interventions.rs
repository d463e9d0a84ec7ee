use std::collections::HashMap;

use crate::analytics::{Mean, OrderedGroups};
use crate::config::ActionCatalog;
use crate::models::{AttendanceRecord, GradeRecord, Intervention, InterventionKind, Priority};

pub const PASSING_AVERAGE: f64 = 5.0;
pub const BORDERLINE_AVERAGE: f64 = 6.0;
pub const DEVELOPING_AVERAGE: f64 = 7.0;
pub const MINIMUM_ATTENDANCE: f64 = 75.0;
pub const WATCH_ATTENDANCE: f64 = 80.0;
pub const DROP_THRESHOLD: f64 = -1.5;

/// Attendance assumed for a student with no attendance records.
pub const DEFAULT_ATTENDANCE: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct StudentProfile<'a> {
    pub student: &'a str,
    pub class: &'a str,
    pub overall_average: f64,
    pub overall_attendance: f64,
    pub grades: Vec<&'a GradeRecord>,
}

pub struct Rule {
    pub kind: InterventionKind,
    pub priority: Priority,
    pub applies: fn(&StudentProfile) -> bool,
    pub indicator: fn(&StudentProfile) -> String,
}

fn is_failing(p: &StudentProfile) -> bool {
    p.overall_average > 0.0 && p.overall_average < PASSING_AVERAGE
}

fn is_absent(p: &StudentProfile) -> bool {
    p.overall_attendance > 0.0 && p.overall_attendance < MINIMUM_ATTENDANCE
}

fn is_borderline(p: &StudentProfile) -> bool {
    (PASSING_AVERAGE..BORDERLINE_AVERAGE).contains(&p.overall_average)
}

fn is_borderline_and_irregular(p: &StudentProfile) -> bool {
    is_borderline(p) && p.overall_attendance < WATCH_ATTENDANCE
}

fn is_attendance_watch(p: &StudentProfile) -> bool {
    (MINIMUM_ATTENDANCE..WATCH_ATTENDANCE).contains(&p.overall_attendance)
}

fn is_developing(p: &StudentProfile) -> bool {
    (BORDERLINE_AVERAGE..DEVELOPING_AVERAGE).contains(&p.overall_average)
}

fn average_indicator(p: &StudentProfile) -> String {
    format!("Overall average: {:.1}", p.overall_average)
}

fn attendance_indicator(p: &StudentProfile) -> String {
    format!("Overall attendance: {:.1}%", p.overall_attendance)
}

fn combined_indicator(p: &StudentProfile) -> String {
    format!(
        "Overall average: {:.1} | Overall attendance: {:.1}%",
        p.overall_average, p.overall_attendance
    )
}

/// Every matching rule fires.
pub const INDEPENDENT_RULES: &[Rule] = &[
    Rule {
        kind: InterventionKind::IntensiveRecovery,
        priority: Priority::High,
        applies: is_failing,
        indicator: average_indicator,
    },
    Rule {
        kind: InterventionKind::ActiveSearch,
        priority: Priority::High,
        applies: is_absent,
        indicator: attendance_indicator,
    },
];

/// Evaluated in order; only the first matching rule fires.
pub const FOLLOW_UP_CHAIN: &[Rule] = &[
    Rule {
        kind: InterventionKind::IntegralFollowUp,
        priority: Priority::High,
        applies: is_borderline_and_irregular,
        indicator: combined_indicator,
    },
    Rule {
        kind: InterventionKind::PedagogicalReinforcement,
        priority: Priority::Medium,
        applies: is_borderline,
        indicator: average_indicator,
    },
    Rule {
        kind: InterventionKind::AttendanceMonitoring,
        priority: Priority::Medium,
        applies: is_attendance_watch,
        indicator: attendance_indicator,
    },
    Rule {
        kind: InterventionKind::StimulusForDevelopment,
        priority: Priority::Low,
        applies: is_developing,
        indicator: average_indicator,
    },
];

fn first_transition(grade: &GradeRecord) -> Option<f64> {
    grade.delta_1_2
}

fn second_transition(grade: &GradeRecord) -> Option<f64> {
    grade.delta_2_3
}

/// Term transitions checked for a drop. The 3→4 transition is not checked.
const DROP_TRANSITIONS: [(&str, fn(&GradeRecord) -> Option<f64>); 2] =
    [("1→2", first_transition), ("2→3", second_transition)];

pub fn build_profiles<'a>(
    grades: &'a [GradeRecord],
    attendance: &'a [AttendanceRecord],
) -> Vec<StudentProfile<'a>> {
    let mut presence: HashMap<&str, Mean> = HashMap::new();
    for record in attendance {
        presence
            .entry(record.student.as_str())
            .or_default()
            .add(record.attendance_percent);
    }

    let mut per_student: OrderedGroups<&str, Vec<&GradeRecord>> = OrderedGroups::new();
    for grade in grades {
        per_student
            .entry_or_insert_with(grade.student.as_str(), Vec::new)
            .push(grade);
    }

    per_student
        .into_entries()
        .into_iter()
        .map(|(student, records)| {
            let mut average = Mean::default();
            for value in records.iter().filter_map(|g| g.final_average) {
                average.add(value);
            }
            StudentProfile {
                student,
                class: records[0].class.as_str(),
                overall_average: average.value_or(0.0),
                overall_attendance: presence
                    .get(student)
                    .and_then(Mean::value)
                    .unwrap_or(DEFAULT_ATTENDANCE),
                grades: records,
            }
        })
        .collect()
}

fn from_rule(rule: &Rule, profile: &StudentProfile, catalog: &ActionCatalog) -> Intervention {
    let copy = catalog.copy(rule.kind);
    Intervention {
        student: profile.student.to_string(),
        class: profile.class.to_string(),
        priority: rule.priority,
        kind: rule.kind,
        type_label: rule.kind.label(),
        description: copy.description,
        indicator_text: (rule.indicator)(profile),
        suggested_action: copy.suggested_action,
        subject: None,
        term_label: None,
    }
}

pub fn evaluate_profile(profile: &StudentProfile, catalog: &ActionCatalog) -> Vec<Intervention> {
    let mut found: Vec<Intervention> = INDEPENDENT_RULES
        .iter()
        .filter(|rule| (rule.applies)(profile))
        .map(|rule| from_rule(rule, profile, catalog))
        .collect();

    if let Some(rule) = FOLLOW_UP_CHAIN.iter().find(|rule| (rule.applies)(profile)) {
        found.push(from_rule(rule, profile, catalog));
    }

    let copy = catalog.copy(InterventionKind::PerformanceDrop);
    for grade in profile.grades.iter().copied() {
        for (term_label, delta_of) in DROP_TRANSITIONS {
            let Some(delta) = delta_of(grade) else {
                continue;
            };
            if delta < DROP_THRESHOLD {
                found.push(Intervention {
                    student: profile.student.to_string(),
                    class: profile.class.to_string(),
                    priority: Priority::Medium,
                    kind: InterventionKind::PerformanceDrop,
                    type_label: InterventionKind::PerformanceDrop.label(),
                    description: copy.description.clone(),
                    indicator_text: format!(
                        "{}: change of {:.1} points between terms {}",
                        grade.subject, delta, term_label
                    ),
                    suggested_action: copy.suggested_action.clone(),
                    subject: Some(grade.subject.clone()),
                    term_label: Some(term_label.to_string()),
                });
            }
        }
    }

    found
}

/// Recommended interventions for every student in `grades`, HIGH first.
pub fn classify(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    catalog: &ActionCatalog,
) -> Vec<Intervention> {
    let profiles = build_profiles(grades, attendance);
    let mut interventions: Vec<Intervention> = profiles
        .iter()
        .flat_map(|profile| evaluate_profile(profile, catalog))
        .collect();

    interventions.sort_by_key(|i| i.priority);
    tracing::debug!(
        students = profiles.len(),
        interventions = interventions.len(),
        "classified interventions"
    );
    interventions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::{attendance, grade};

    fn kinds(found: &[Intervention]) -> Vec<InterventionKind> {
        found.iter().map(|i| i.kind).collect()
    }

    fn profile(average: f64, presence: f64) -> StudentProfile<'static> {
        StudentProfile {
            student: "Ana",
            class: "9A",
            overall_average: average,
            overall_attendance: presence,
            grades: Vec::new(),
        }
    }

    #[test]
    fn failing_student_without_attendance_gets_only_recovery() {
        let grades = vec![grade("Ana", "9A", "Math", Some(4.0))];
        let found = classify(&grades, &[], &ActionCatalog::default());
        assert_eq!(kinds(&found), vec![InterventionKind::IntensiveRecovery]);
        assert_eq!(found[0].priority, Priority::High);
        assert_eq!(found[0].type_label, "Intensive Recovery");
        assert_eq!(found[0].indicator_text, "Overall average: 4.0");
    }

    #[test]
    fn drop_is_flagged_per_subject_and_transition() {
        let mut history = grade("Ana", "9A", "History", Some(8.0));
        history.delta_1_2 = Some(-2.0);
        history.delta_2_3 = Some(-1.0);
        history.delta_3_4 = Some(-4.0);

        let found = classify(&[history], &[], &ActionCatalog::default());
        assert_eq!(found.len(), 1);
        let drop = &found[0];
        assert_eq!(drop.kind, InterventionKind::PerformanceDrop);
        assert_eq!(drop.priority, Priority::Medium);
        assert_eq!(drop.subject.as_deref(), Some("History"));
        assert_eq!(drop.term_label.as_deref(), Some("1→2"));
        assert!(drop.indicator_text.contains("-2.0"));
    }

    #[test]
    fn drop_threshold_is_strict() {
        let mut math = grade("Ana", "9A", "Math", Some(8.0));
        math.delta_1_2 = Some(-1.5);
        math.delta_2_3 = Some(-1.6);
        let found = classify(&[math], &[], &ActionCatalog::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].term_label.as_deref(), Some("2→3"));
    }

    #[test]
    fn independent_and_chained_entries_combine() {
        let catalog = ActionCatalog::default();

        let found = evaluate_profile(&profile(4.9, 78.0), &catalog);
        assert_eq!(
            kinds(&found),
            vec![
                InterventionKind::IntensiveRecovery,
                InterventionKind::AttendanceMonitoring
            ]
        );

        let found = evaluate_profile(&profile(5.5, 70.0), &catalog);
        assert_eq!(
            kinds(&found),
            vec![InterventionKind::ActiveSearch, InterventionKind::IntegralFollowUp]
        );

        let found = evaluate_profile(&profile(4.0, 60.0), &catalog);
        assert_eq!(
            kinds(&found),
            vec![InterventionKind::IntensiveRecovery, InterventionKind::ActiveSearch]
        );
    }

    #[test]
    fn follow_up_chain_stops_at_first_match() {
        let catalog = ActionCatalog::default();
        let cases = [
            (5.0, 79.9, Some(InterventionKind::IntegralFollowUp)),
            (5.9, 90.0, Some(InterventionKind::PedagogicalReinforcement)),
            (6.5, 78.0, Some(InterventionKind::AttendanceMonitoring)),
            (6.0, 80.0, Some(InterventionKind::StimulusForDevelopment)),
            (7.0, 100.0, None),
            (8.5, 75.0, Some(InterventionKind::AttendanceMonitoring)),
        ];
        for (average, presence, expected) in cases {
            let found = evaluate_profile(&profile(average, presence), &catalog);
            let chained = found
                .iter()
                .map(|i| i.kind)
                .find(|kind| FOLLOW_UP_CHAIN.iter().any(|rule| rule.kind == *kind));
            assert_eq!(chained, expected, "average {average}, attendance {presence}");
        }
    }

    #[test]
    fn chain_order_is_fixed() {
        let order: Vec<InterventionKind> = FOLLOW_UP_CHAIN.iter().map(|r| r.kind).collect();
        assert_eq!(
            order,
            vec![
                InterventionKind::IntegralFollowUp,
                InterventionKind::PedagogicalReinforcement,
                InterventionKind::AttendanceMonitoring,
                InterventionKind::StimulusForDevelopment,
            ]
        );
        assert!(INDEPENDENT_RULES.iter().all(|r| r.priority == Priority::High));
    }

    #[test]
    fn zero_values_do_not_trigger_independent_rules() {
        let grades = vec![grade("Ana", "9A", "Math", None)];
        let records = vec![attendance("Ana", "9A", "Math", 0.0)];
        assert!(classify(&grades, &records, &ActionCatalog::default()).is_empty());
    }

    #[test]
    fn results_are_stably_sorted_by_priority() {
        let grades = vec![
            grade("Ana", "9A", "Math", Some(6.5)),
            grade("Bia", "9A", "Math", Some(5.5)),
            grade("Caio", "9B", "Math", Some(3.0)),
            grade("Duda", "9B", "Math", Some(5.2)),
            grade("Enzo", "9B", "Math", Some(4.0)),
        ];
        let records = vec![attendance("Duda", "9B", "Math", 72.0)];
        let found = classify(&grades, &records, &ActionCatalog::default());
        let summary: Vec<(&str, Priority)> = found
            .iter()
            .map(|i| (i.student.as_str(), i.priority))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Caio", Priority::High),
                ("Duda", Priority::High),
                ("Duda", Priority::High),
                ("Enzo", Priority::High),
                ("Bia", Priority::Medium),
                ("Ana", Priority::Low),
            ]
        );
    }

    #[test]
    fn attendance_only_students_are_not_classified() {
        let records = vec![attendance("Zeca", "9A", "Math", 10.0)];
        assert!(classify(&[], &records, &ActionCatalog::default()).is_empty());
    }
}
