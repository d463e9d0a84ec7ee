use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassStatus {
    #[serde(alias = "APROVADO")]
    Passed,
    #[serde(alias = "REPROVADO")]
    Failed,
}

impl PassStatus {
    pub fn is_passed(self) -> bool {
        matches!(self, PassStatus::Passed)
    }

    pub fn label(self) -> &'static str {
        match self {
            PassStatus::Passed => "PASSED",
            PassStatus::Failed => "FAILED",
        }
    }
}

/// One student's grades in one subject. Scores are on a 0-10 scale, one per term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub student: String,
    pub class: String,
    pub subject: String,
    pub scores: [Option<f64>; 4],
    pub delta_1_2: Option<f64>,
    pub delta_2_3: Option<f64>,
    pub delta_3_4: Option<f64>,
    pub final_average: Option<f64>,
    pub pass_status: PassStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student: String,
    pub class: String,
    pub subject: String,
    pub absences: [Option<u32>; 4],
    pub total_classes: u32,
    pub total_absences: u32,
    pub attendance_percent: f64,
    pub pass_status: PassStatus,
}

/// The two base collections. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub grades: Vec<GradeRecord>,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub class: Option<String>,
    pub subject: Option<String>,
}

impl Filter {
    pub fn matches(&self, class: &str, subject: &str) -> bool {
        self.class.as_deref().map_or(true, |c| c == class)
            && self.subject.as_deref().map_or(true, |s| s == subject)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStats {
    pub class: String,
    pub subject: String,
    pub class_average: f64,
    pub grade_pass_rate: f64,
    pub attendance_pass_rate: f64,
    pub student_count: usize,
    pub passed_by_grade_count: usize,
    pub passed_by_attendance_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RankingMetric {
    Average,
    Improvement,
    Attendance,
}

impl RankingMetric {
    pub fn label(self) -> &'static str {
        match self {
            RankingMetric::Average => "average",
            RankingMetric::Improvement => "improvement",
            RankingMetric::Attendance => "attendance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRanking {
    pub student: String,
    pub class: String,
    pub value: f64,
    pub metric: RankingMetric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistributionBucket {
    pub range_label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student: String,
    pub class: String,
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentData {
    pub name: String,
    pub class: String,
    pub grades: Vec<GradeRecord>,
    pub attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRollup {
    pub student: String,
    pub class: String,
    pub overall_average: f64,
    pub overall_attendance: f64,
}

/// Declaration order is the sort order: High first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterventionKind {
    IntensiveRecovery,
    ActiveSearch,
    IntegralFollowUp,
    PedagogicalReinforcement,
    AttendanceMonitoring,
    StimulusForDevelopment,
    PerformanceDrop,
}

impl InterventionKind {
    pub const ALL: [InterventionKind; 7] = [
        InterventionKind::IntensiveRecovery,
        InterventionKind::ActiveSearch,
        InterventionKind::IntegralFollowUp,
        InterventionKind::PedagogicalReinforcement,
        InterventionKind::AttendanceMonitoring,
        InterventionKind::StimulusForDevelopment,
        InterventionKind::PerformanceDrop,
    ];

    pub fn label(self) -> &'static str {
        match self {
            InterventionKind::IntensiveRecovery => "Intensive Recovery",
            InterventionKind::ActiveSearch => "Active Search",
            InterventionKind::IntegralFollowUp => "Integral Follow-up",
            InterventionKind::PedagogicalReinforcement => "Pedagogical Reinforcement",
            InterventionKind::AttendanceMonitoring => "Attendance Monitoring",
            InterventionKind::StimulusForDevelopment => "Stimulus for Development",
            InterventionKind::PerformanceDrop => "Performance Drop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub student: String,
    pub class: String,
    pub priority: Priority,
    pub kind: InterventionKind,
    #[serde(rename = "type")]
    pub type_label: &'static str,
    pub description: String,
    pub indicator_text: String,
    pub suggested_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub imported_at: DateTime<Utc>,
    pub grade_count: usize,
    pub attendance_count: usize,
}

impl ImportBatch {
    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            imported_at: Utc::now(),
            grade_count: dataset.grades.len(),
            attendance_count: dataset.attendance.len(),
        }
    }
}
