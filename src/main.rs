use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod analytics;
mod config;
mod import;
mod interventions;
mod models;
mod report;
mod store;

use config::ActionCatalog;
use models::{Dataset, Filter, RankingMetric};
use store::{DatasetStore, DirStore, PgStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// JSON files in a local directory
    Dir,
    /// Postgres, via DATABASE_URL
    Postgres,
}

#[derive(Parser)]
#[command(name = "academic-dashboard")]
#[command(about = "Grade and attendance analytics for school classes", long_about = None)]
struct Cli {
    #[arg(long, value_enum, env = "DASHBOARD_BACKEND", default_value_t = Backend::Dir, global = true)]
    backend: Backend,
    #[arg(long, env = "DASHBOARD_DATA_DIR", default_value = ".dashboard", global = true)]
    data_dir: PathBuf,
    /// JSON file overriding intervention descriptions and suggested actions
    #[arg(long, env = "DASHBOARD_CATALOG", global = true)]
    catalog: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    subject: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            class: args.class,
            subject: args.subject,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema
    InitDb,
    /// Replace the stored dataset with the given spreadsheets
    Import {
        /// CSV file, or a workbook (.xlsx, .xls, .ods) with attendance on its second sheet
        #[arg(long)]
        grades: PathBuf,
        /// CSV file or workbook; replaces a workbook's second sheet
        #[arg(long)]
        attendance: Option<PathBuf>,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// Show the last import batch
    Status,
    #[command(flatten)]
    Query(QueryCommand),
    /// Copy the stored dataset into a directory store
    Export {
        #[arg(long)]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum QueryCommand {
    /// List classes
    Classes,
    /// List subjects
    Subjects,
    /// Per class and subject statistics
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Rank students by a metric
    Top {
        #[arg(long, value_enum, default_value_t = RankingMetric::Average)]
        metric: RankingMetric,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Grade distribution histogram
    Distribution {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Students close to the grade or attendance limits
    AtRisk {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// All records for one student
    Student {
        #[arg(long)]
        name: String,
    },
    /// Overall average and attendance for every student
    Students {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Recommended pedagogical interventions
    Interventions {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Everything the dashboard shows for one filter
    Dashboard {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Write a markdown dashboard report
    Report {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Write a markdown report for one student
    StudentReport {
        #[arg(long)]
        name: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(backend = ?cli.backend, "starting");

    match cli.backend {
        Backend::Dir => {
            let store = DirStore::new(&cli.data_dir);
            tracing::debug!(root = %store.root().display(), "using directory store");
            run(&store, cli).await
        }
        Backend::Postgres => {
            let database_url = std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for the postgres backend")?;
            let store = PgStore::connect(&database_url).await?;
            if matches!(cli.command, Commands::InitDb) {
                store.init().await?;
                println!("Schema ready.");
                return Ok(());
            }
            run(&store, cli).await
        }
    }
}

async fn run<S: DatasetStore>(store: &S, cli: Cli) -> anyhow::Result<()> {
    let Cli {
        command,
        catalog,
        json,
        ..
    } = cli;
    let catalog = ActionCatalog::load(catalog.as_deref())?;

    match command {
        Commands::InitDb => {
            println!("The directory backend needs no schema.");
        }
        Commands::Import {
            grades,
            attendance,
            delimiter,
        } => {
            if !delimiter.is_ascii() {
                anyhow::bail!("delimiter must be a single ASCII character");
            }
            let dataset = import::read_dataset(&grades, attendance.as_deref(), delimiter as u8)?;
            let batch = store.save(&dataset).await?;
            println!(
                "Imported {} grade records and {} attendance records (batch {}).",
                batch.grade_count, batch.attendance_count, batch.batch_id
            );
        }
        Commands::Status => match store.last_batch().await? {
            Some(batch) if json => print_json(&batch)?,
            Some(batch) => println!(
                "Batch {} imported at {}: {} grade records, {} attendance records.",
                batch.batch_id, batch.imported_at, batch.grade_count, batch.attendance_count
            ),
            None => println!("No dataset loaded."),
        },
        Commands::Export { out_dir } => {
            let Some(dataset) = store.load().await? else {
                println!("No dataset loaded.");
                return Ok(());
            };
            let target = DirStore::new(&out_dir);
            target.save(&dataset).await?;
            println!("Dataset exported to {}.", out_dir.display());
        }
        Commands::Query(query) => {
            let Some(dataset) = store.load().await? else {
                println!("No dataset loaded. Run `import` first.");
                return Ok(());
            };
            analytics_command(query, &dataset, &catalog, json)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn analytics_command(
    command: QueryCommand,
    dataset: &Dataset,
    catalog: &ActionCatalog,
    json: bool,
) -> anyhow::Result<()> {
    match command {
        QueryCommand::Classes => {
            let classes = analytics::distinct_classes(&dataset.grades);
            if json {
                return print_json(&classes);
            }
            for class in classes {
                println!("{class}");
            }
        }
        QueryCommand::Subjects => {
            let subjects = analytics::distinct_subjects(&dataset.grades);
            if json {
                return print_json(&subjects);
            }
            for subject in subjects {
                println!("{subject}");
            }
        }
        QueryCommand::Stats { filter } => {
            let stats = analytics::compute_class_stats(
                &dataset.grades,
                &dataset.attendance,
                filter.class.as_deref(),
                filter.subject.as_deref(),
            );
            if json {
                return print_json(&stats);
            }
            if stats.is_empty() {
                println!("No grade records match this filter.");
            }
            for row in stats {
                println!(
                    "- {} / {}: average {:.1}, grade pass {:.1}%, attendance pass {:.1}% across {} students",
                    row.class,
                    row.subject,
                    row.class_average,
                    row.grade_pass_rate,
                    row.attendance_pass_rate,
                    row.student_count
                );
            }
        }
        QueryCommand::Top {
            metric,
            limit,
            filter,
        } => {
            let filtered = analytics::filter_dataset(dataset, &filter.into());
            let rankings =
                analytics::top_students(&filtered.grades, &filtered.attendance, metric, limit);
            if json {
                return print_json(&rankings);
            }
            if rankings.is_empty() {
                println!("No students to rank by {}.", metric.label());
                return Ok(());
            }
            println!("Top students by {}:", metric.label());
            for (position, ranking) in rankings.iter().enumerate() {
                println!(
                    "{}. {} ({}) {:.2}",
                    position + 1,
                    ranking.student,
                    ranking.class,
                    ranking.value
                );
            }
        }
        QueryCommand::Distribution { filter } => {
            let filtered = analytics::filter_dataset(dataset, &filter.into());
            let buckets = analytics::grade_distribution(&filtered.grades);
            if json {
                return print_json(&buckets);
            }
            for bucket in buckets {
                println!("{:>10}: {}", bucket.range_label, bucket.count);
            }
        }
        QueryCommand::AtRisk { filter } => {
            let filtered = analytics::filter_dataset(dataset, &filter.into());
            let at_risk = analytics::students_at_risk(&filtered.grades, &filtered.attendance);
            if json {
                return print_json(&at_risk);
            }
            if at_risk.is_empty() {
                println!("No students close to the passing limits.");
            }
            for entry in at_risk {
                println!("- {} ({}): {}", entry.student, entry.class, entry.reason);
            }
        }
        QueryCommand::Student { name } => {
            let Some(student) =
                analytics::student_lookup(&name, &dataset.grades, &dataset.attendance)
            else {
                println!("Student {name} not found.");
                return Ok(());
            };
            if json {
                return print_json(&student);
            }
            print!("{}", report::build_student_report(&student, Utc::now().date_naive()));
        }
        QueryCommand::Students { filter } => {
            let filtered = analytics::filter_dataset(dataset, &filter.into());
            let rows = analytics::rollup_all_students(&filtered.grades, &filtered.attendance);
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("No students found.");
            }
            for row in rows {
                println!(
                    "- {} ({}) average {:.1}, attendance {:.1}%",
                    row.student, row.class, row.overall_average, row.overall_attendance
                );
            }
        }
        QueryCommand::Interventions { filter } => {
            let filtered = analytics::filter_dataset(dataset, &filter.into());
            let found =
                interventions::classify(&filtered.grades, &filtered.attendance, catalog);
            if json {
                return print_json(&found);
            }
            if found.is_empty() {
                println!("No interventions recommended.");
            }
            for intervention in found {
                let scope = match (&intervention.subject, &intervention.term_label) {
                    (Some(subject), Some(term)) => format!(" [{subject}, {term}]"),
                    _ => String::new(),
                };
                println!(
                    "[{}] {} ({}) {}{}: {}",
                    intervention.priority.label(),
                    intervention.student,
                    intervention.class,
                    intervention.type_label,
                    scope,
                    intervention.indicator_text
                );
                println!("    {}", intervention.suggested_action);
            }
        }
        QueryCommand::Dashboard { filter } => {
            let filter: Filter = filter.into();
            let snapshot = analytics::dashboard(dataset, &filter, catalog);
            if json {
                return print_json(&snapshot);
            }
            print!(
                "{}",
                report::build_dashboard_report(&snapshot, &filter, Utc::now().date_naive())
            );
        }
        QueryCommand::Report { filter, out } => {
            let filter: Filter = filter.into();
            let snapshot = analytics::dashboard(dataset, &filter, catalog);
            let output =
                report::build_dashboard_report(&snapshot, &filter, Utc::now().date_naive());
            std::fs::write(&out, output)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        QueryCommand::StudentReport { name, out } => {
            let Some(student) =
                analytics::student_lookup(&name, &dataset.grades, &dataset.attendance)
            else {
                println!("Student {name} not found.");
                return Ok(());
            };
            let out = out.unwrap_or_else(|| PathBuf::from(report::student_report_file_name(&name)));
            let output = report::build_student_report(&student, Utc::now().date_naive());
            std::fs::write(&out, output)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Student report written to {}.", out.display());
        }
    }

    Ok(())
}
