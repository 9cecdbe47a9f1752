use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use school_dashboard_engine::aggregate::{
    absentees_with_leave, compute_absentees_for_day, compute_trend, guardian_rollup, rates_by_student,
    MAX_WINDOW_DAYS,
};
use school_dashboard_engine::config::{SourceConfig, DEFAULT_TIMEOUT_SECS};
use school_dashboard_engine::filter::{apply_filters, AudienceFilter, AudienceScope, QueryFilter};
use school_dashboard_engine::models::{Roster, Student};
use school_dashboard_engine::reconcile::{guardian_for, students_in_roster};
use school_dashboard_engine::report::{self, absentee_section, format_notice, format_rate, ReportOptions};
use school_dashboard_engine::{NormalizedKey, ReloadOutcome, Snapshot, SnapshotStore};

#[derive(Parser)]
#[command(name = "school-dashboard")]
#[command(about = "Attendance and notice views reconciled from the school API", long_about = None)]
#[command(group(
    ArgGroup::new("source")
        .args(["api_url", "data_dir"])
        .required(true)
        .multiple(false)
))]
struct Cli {
    /// Base URL of the school REST API
    #[arg(long, env = "SCHOOL_API_URL")]
    api_url: Option<String>,
    /// Directory holding <collection>.json files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Read attendance from this CSV file instead
    #[arg(long)]
    attendance_csv: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    /// Reference day (defaults to today, UTC)
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Print rates, absentees, trends, rollups and notices as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attendance rate per student, lowest first
    Rates {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, requires = "class")]
        section: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Students not marked present on a day
    Absentees {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        class: Option<String>,
        #[arg(long, requires = "class")]
        section: Option<String>,
    },
    /// Daily present/absent counts over a rolling window
    Trend {
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_DAYS as i64))]
        days: u32,
    },
    /// Attendance for each child of a guardian
    Guardian {
        #[arg(long)]
        email: String,
    },
    /// Notices addressed to, or sent by, a viewer
    Notices {
        #[arg(long)]
        viewer: String,
        #[arg(long)]
        by_me: bool,
        /// Only notices valid on the reference day
        #[arg(long)]
        active: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        viewer: Option<String>,
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_DAYS as i64))]
        days: u32,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn roster_arg(class: Option<String>, section: Option<String>) -> Option<Roster> {
    class.map(|class_name| Roster::new(class_name, section.as_deref()))
}

fn viewer_key(value: &str) -> anyhow::Result<NormalizedKey> {
    NormalizedKey::parse(value).with_context(|| format!("viewer identity {value:?} is blank"))
}

async fn load_snapshot(cli: &Cli) -> anyhow::Result<Arc<Snapshot>> {
    let config = SourceConfig {
        api_url: cli.api_url.clone(),
        data_dir: cli.data_dir.clone(),
        attendance_csv: cli.attendance_csv.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    };
    let sources = config.build_sources().context("failed to configure sources")?;

    let store = SnapshotStore::new();
    match store.reload(&sources).await {
        ReloadOutcome::Applied(snapshot) => Ok(snapshot),
        ReloadOutcome::Stale { generation, latest } => {
            bail!("reload {generation} was superseded by reload {latest}")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "school_dashboard=info,school_dashboard_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let today = cli.today.unwrap_or_else(|| Utc::now().date_naive());
    let snapshot = load_snapshot(&cli).await?;

    match cli.command {
        Commands::Rates {
            class,
            section,
            limit,
        } => {
            let enriched = snapshot.enriched_attendance()?;
            let filter = QueryFilter {
                roster: roster_arg(class, section),
                ..QueryFilter::default()
            };
            let scoped: Vec<_> = apply_filters(&enriched, &filter).into_iter().cloned().collect();
            let rates = rates_by_student(&scoped);
            let lowest = &rates[..rates.len().min(limit)];

            if cli.json {
                return print_json(lowest);
            }
            if rates.is_empty() {
                println!("No attendance found for this scope.");
                return Ok(());
            }

            println!("Students by attendance rate (lowest first):");
            for rate in lowest {
                let roster = rate.roster.as_ref().map_or_else(|| "no class".to_string(), Roster::to_string);
                println!("- {} ({}, {}) {}", rate.name, rate.identity, roster, format_rate(&rate.rate));
            }
        }
        Commands::Absentees {
            date,
            class,
            section,
        } => {
            let day = date.unwrap_or(today);
            let students = snapshot.students()?;
            let events = snapshot.attendance()?;
            let scope: Vec<Student> = match roster_arg(class, section) {
                Some(roster) => students_in_roster(students, &roster).into_iter().cloned().collect(),
                None => students.to_vec(),
            };

            if cli.json {
                let absentees = compute_absentees_for_day(&scope, events, day);
                let leaves = snapshot.leaves();
                let annotated = absentees_with_leave(&absentees, leaves.as_deref().unwrap_or(&[]), day);
                return print_json(&json!({
                    "day": day,
                    "attendance_taken": events.iter().any(|event| event.date == Some(day)),
                    "absentees": annotated,
                    "leaves_unavailable": leaves.err().map(|err| err.to_string()),
                }));
            }
            print!("{}", absentee_section(&scope, events, snapshot.leaves(), day, usize::MAX));
        }
        Commands::Trend { days } => {
            let events = snapshot.attendance()?;
            let points = compute_trend(events, days, today);
            if cli.json {
                return print_json(&points);
            }

            println!("Attendance over the {days} days ending {today}:");
            for point in points {
                println!(
                    "- {}: {} present, {} absent, {} total",
                    point.day, point.present_count, point.absent_count, point.total
                );
            }
        }
        Commands::Guardian { email } => {
            let viewer = viewer_key(&email)?;
            let guardians = snapshot.guardians_with_children()?;
            let enriched = snapshot.enriched_attendance()?;
            let Some(guardian) = guardian_for(&guardians, &viewer) else {
                bail!("no guardian record for {viewer}");
            };
            let rollups = guardian_rollup(guardian, &enriched);

            if cli.json {
                return print_json(&json!({
                    "guardian": viewer,
                    "children": rollups,
                    "unresolved_children": guardian.unresolved_children,
                }));
            }

            println!("Children of {} ({}):", guardian.guardian.name, viewer);
            for rollup in rollups {
                println!("- {}: {}", rollup.child.name, format_rate(&rollup.rate));
            }
            for unresolved in &guardian.unresolved_children {
                println!("- {unresolved}: no student profile found");
            }
        }
        Commands::Notices {
            viewer,
            by_me,
            active,
        } => {
            let viewer = viewer_key(&viewer)?;
            let notices = snapshot.notices()?;
            let filter = QueryFilter {
                audience: Some(AudienceFilter {
                    viewer,
                    scope: if by_me {
                        AudienceScope::ByMe
                    } else {
                        AudienceScope::ForMe
                    },
                }),
                ..QueryFilter::default()
            };

            let matches: Vec<_> = apply_filters(notices, &filter)
                .into_iter()
                .filter(|notice| !active || notice.is_active_on(today))
                .collect();
            if cli.json {
                return print_json(&matches);
            }
            if matches.is_empty() {
                println!("No notices found.");
            }
            for notice in matches {
                println!("- {}", format_notice(notice));
            }
        }
        Commands::Report {
            viewer,
            days,
            limit,
            out,
        } => {
            let options = ReportOptions {
                today,
                window_days: days,
                viewer: viewer.as_deref().map(viewer_key).transpose()?,
                limit,
            };
            let report = report::build_report(&snapshot, &options);
            std::fs::write(&out, report).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
