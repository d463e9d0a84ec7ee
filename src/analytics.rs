use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::ActionCatalog;
use crate::interventions;
use crate::models::{
    AtRiskStudent, AttendanceRecord, ClassStats, Dataset, Filter, GradeDistributionBucket,
    GradeRecord, Intervention, RankingMetric, StudentData, StudentRanking, StudentRollup,
};

pub const DISTRIBUTION_LABELS: [&str; 6] = [
    "< 5.0",
    "5.0 - 6.0",
    "6.0 - 7.0",
    "7.0 - 8.0",
    "8.0 - 9.0",
    "9.0 - 10.0",
];

pub const GRADE_RISK_RANGE: (f64, f64) = (5.0, 6.0);
pub const ATTENDANCE_RISK_RANGE: (f64, f64) = (70.0, 75.0);

/// Rounds to one decimal, half away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Mean {
    total: f64,
    count: usize,
}

impl Mean {
    pub(crate) fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    pub(crate) fn value(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.total / self.count as f64)
        }
    }

    pub(crate) fn value_or(&self, default: f64) -> f64 {
        self.value().unwrap_or(default)
    }
}

/// Insertion-ordered grouping: iteration follows the first time each key was seen.
pub(crate) struct OrderedGroups<K, V> {
    slots: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K: Eq + Hash + Clone, V> OrderedGroups<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub(crate) fn entry_or_insert_with(&mut self, key: K, init: impl FnOnce() -> V) -> &mut V {
        let index = match self.slots.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.entries.len();
                self.slots.insert(key.clone(), index);
                self.entries.push((key, init()));
                index
            }
        };
        &mut self.entries[index].1
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.slots.get(key) {
            Some(&index) => Some(&mut self.entries[index].1),
            None => None,
        }
    }

    pub(crate) fn into_entries(self) -> Vec<(K, V)> {
        self.entries
    }
}

#[derive(Debug, Clone)]
struct StudentAccumulator {
    class: String,
    mean: Mean,
}

impl StudentAccumulator {
    fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            mean: Mean::default(),
        }
    }
}

pub fn distinct_classes(grades: &[GradeRecord]) -> Vec<String> {
    grades
        .iter()
        .map(|g| g.class.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn distinct_subjects(grades: &[GradeRecord]) -> Vec<String> {
    grades
        .iter()
        .map(|g| g.subject.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn filter_dataset(dataset: &Dataset, filter: &Filter) -> Dataset {
    Dataset {
        grades: dataset
            .grades
            .iter()
            .filter(|g| filter.matches(&g.class, &g.subject))
            .cloned()
            .collect(),
        attendance: dataset
            .attendance
            .iter()
            .filter(|a| filter.matches(&a.class, &a.subject))
            .cloned()
            .collect(),
    }
}

pub fn compute_class_stats(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    class: Option<&str>,
    subject: Option<&str>,
) -> Vec<ClassStats> {
    let mut groups: OrderedGroups<(String, String), Vec<&GradeRecord>> = OrderedGroups::new();

    for grade in grades {
        if class.is_some_and(|c| c != grade.class) || subject.is_some_and(|s| s != grade.subject) {
            continue;
        }
        groups
            .entry_or_insert_with((grade.class.clone(), grade.subject.clone()), Vec::new)
            .push(grade);
    }

    groups
        .into_entries()
        .into_iter()
        .map(|((class, subject), records)| {
            let mut average = Mean::default();
            for value in records.iter().filter_map(|g| g.final_average) {
                average.add(value);
            }

            let passed_by_grade_count = records.iter().filter(|g| g.pass_status.is_passed()).count();
            let grade_pass_rate = 100.0 * passed_by_grade_count as f64 / records.len() as f64;

            let class_attendance: Vec<&AttendanceRecord> = attendance
                .iter()
                .filter(|a| a.class == class && a.subject == subject)
                .collect();
            let passed_by_attendance_count = class_attendance
                .iter()
                .filter(|a| a.pass_status.is_passed())
                .count();
            let attendance_pass_rate = if class_attendance.is_empty() {
                0.0
            } else {
                100.0 * passed_by_attendance_count as f64 / class_attendance.len() as f64
            };

            ClassStats {
                class,
                subject,
                class_average: round1(average.value_or(0.0)),
                grade_pass_rate: round1(grade_pass_rate),
                attendance_pass_rate: round1(attendance_pass_rate),
                student_count: records.len(),
                passed_by_grade_count,
                passed_by_attendance_count,
            }
        })
        .collect()
}

pub fn top_students(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    metric: RankingMetric,
    limit: usize,
) -> Vec<StudentRanking> {
    let mut per_student: OrderedGroups<String, StudentAccumulator> = OrderedGroups::new();

    match metric {
        RankingMetric::Average => {
            for grade in grades {
                let entry = per_student
                    .entry_or_insert_with(grade.student.clone(), || StudentAccumulator::new(&grade.class));
                if let Some(value) = grade.final_average {
                    entry.mean.add(value);
                }
            }
        }
        RankingMetric::Improvement => {
            // Only the first two term transitions count towards improvement.
            for grade in grades {
                let entry = per_student
                    .entry_or_insert_with(grade.student.clone(), || StudentAccumulator::new(&grade.class));
                for delta in [grade.delta_1_2, grade.delta_2_3].into_iter().flatten() {
                    entry.mean.add(delta);
                }
            }
        }
        RankingMetric::Attendance => {
            for record in attendance {
                per_student
                    .entry_or_insert_with(record.student.clone(), || StudentAccumulator::new(&record.class))
                    .mean
                    .add(record.attendance_percent);
            }
        }
    }

    let mut rankings: Vec<StudentRanking> = per_student
        .into_entries()
        .into_iter()
        .filter_map(|(student, acc)| {
            acc.mean.value().map(|value| StudentRanking {
                student,
                class: acc.class,
                value,
                metric,
            })
        })
        .collect();

    rankings.sort_by(|a, b| b.value.total_cmp(&a.value));
    rankings.truncate(limit);
    rankings
}

fn distribution_band(average: f64) -> usize {
    if average < 5.0 {
        0
    } else if average < 6.0 {
        1
    } else if average < 7.0 {
        2
    } else if average < 8.0 {
        3
    } else if average < 9.0 {
        4
    } else {
        5
    }
}

pub fn grade_distribution(grades: &[GradeRecord]) -> Vec<GradeDistributionBucket> {
    let mut counts = [0usize; 6];
    for average in grades.iter().filter_map(|g| g.final_average) {
        counts[distribution_band(average)] += 1;
    }

    DISTRIBUTION_LABELS
        .into_iter()
        .zip(counts)
        .map(|(label, count)| GradeDistributionBucket {
            range_label: label,
            count,
        })
        .collect()
}

pub fn students_at_risk(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
) -> Vec<AtRiskStudent> {
    let (grade_low, grade_high) = GRADE_RISK_RANGE;
    let (attendance_low, attendance_high) = ATTENDANCE_RISK_RANGE;

    let grade_risk = grades.iter().filter_map(|g| {
        let average = g.final_average?;
        (grade_low..=grade_high).contains(&average).then(|| AtRiskStudent {
            student: g.student.clone(),
            class: g.class.clone(),
            subject: g.subject.clone(),
            reason: format!("Average close to the limit: {} in {}", average, g.subject),
        })
    });

    let attendance_risk = attendance
        .iter()
        .filter(|a| (attendance_low..=attendance_high).contains(&a.attendance_percent))
        .map(|a| AtRiskStudent {
            student: a.student.clone(),
            class: a.class.clone(),
            subject: a.subject.clone(),
            reason: format!(
                "Attendance close to the limit: {}% in {}",
                a.attendance_percent, a.subject
            ),
        });

    grade_risk.chain(attendance_risk).collect()
}

/// Returns `None` when the student has no grade records, even if attendance exists.
pub fn student_lookup(
    name: &str,
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
) -> Option<StudentData> {
    let student_grades: Vec<GradeRecord> =
        grades.iter().filter(|g| g.student == name).cloned().collect();
    let class = student_grades.first()?.class.clone();

    Some(StudentData {
        name: name.to_string(),
        class,
        grades: student_grades,
        attendance: attendance
            .iter()
            .filter(|a| a.student == name)
            .cloned()
            .collect(),
    })
}

fn collation_key(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Tie-breakers for equal collation keys: unaccented before accented, then
/// lowercase before uppercase.
fn collation_tiebreak(name: &str) -> (String, String) {
    let accents = name.nfd().flat_map(char::to_lowercase).collect();
    let mut inverted_case = String::with_capacity(name.len());
    for c in name.nfd() {
        if c.is_uppercase() {
            inverted_case.extend(c.to_lowercase());
        } else {
            inverted_case.extend(c.to_uppercase());
        }
    }
    (accents, inverted_case)
}

pub fn rollup_all_students(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
) -> Vec<StudentRollup> {
    let mut per_student: OrderedGroups<String, (StudentAccumulator, Mean)> = OrderedGroups::new();

    for grade in grades {
        let (acc, _) = per_student.entry_or_insert_with(grade.student.clone(), || {
            (StudentAccumulator::new(&grade.class), Mean::default())
        });
        if let Some(value) = grade.final_average {
            acc.mean.add(value);
        }
    }

    // Attendance only attaches to students already known from grades.
    for record in attendance {
        if let Some((_, presence)) = per_student.get_mut(&record.student) {
            presence.add(record.attendance_percent);
        }
    }

    let mut rows: Vec<StudentRollup> = per_student
        .into_entries()
        .into_iter()
        .map(|(student, (acc, presence))| StudentRollup {
            student,
            class: acc.class,
            overall_average: round1(acc.mean.value_or(0.0)),
            overall_attendance: round1(presence.value_or(0.0)),
        })
        .collect();

    rows.sort_by_cached_key(|row| {
        (
            collation_key(&row.student),
            collation_tiebreak(&row.student),
        )
    });
    rows
}

/// Everything the dashboard view renders for one filter selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub classes: Vec<String>,
    pub subjects: Vec<String>,
    pub class_stats: Vec<ClassStats>,
    pub top_by_average: Vec<StudentRanking>,
    pub top_by_improvement: Vec<StudentRanking>,
    pub top_by_attendance: Vec<StudentRanking>,
    pub distribution: Vec<GradeDistributionBucket>,
    pub at_risk: Vec<AtRiskStudent>,
    pub students: Vec<StudentRollup>,
    pub interventions: Vec<Intervention>,
}

pub const DASHBOARD_TOP_LIMIT: usize = 5;

pub fn dashboard(dataset: &Dataset, filter: &Filter, catalog: &ActionCatalog) -> DashboardSnapshot {
    let filtered = filter_dataset(dataset, filter);
    let (grades, attendance) = (&filtered.grades, &filtered.attendance);

    DashboardSnapshot {
        classes: distinct_classes(&dataset.grades),
        subjects: distinct_subjects(&dataset.grades),
        class_stats: compute_class_stats(
            &dataset.grades,
            &dataset.attendance,
            filter.class.as_deref(),
            filter.subject.as_deref(),
        ),
        top_by_average: top_students(grades, attendance, RankingMetric::Average, DASHBOARD_TOP_LIMIT),
        top_by_improvement: top_students(
            grades,
            attendance,
            RankingMetric::Improvement,
            DASHBOARD_TOP_LIMIT,
        ),
        top_by_attendance: top_students(
            grades,
            attendance,
            RankingMetric::Attendance,
            DASHBOARD_TOP_LIMIT,
        ),
        distribution: grade_distribution(grades),
        at_risk: students_at_risk(grades, attendance),
        students: rollup_all_students(grades, attendance),
        interventions: interventions::classify(grades, attendance, catalog),
    }
}
