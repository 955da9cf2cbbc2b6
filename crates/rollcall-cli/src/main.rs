use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::Table;
use rollcall_engine::{AttendanceCapture, CapturePolicy, MarkOutcome};
use rollcall_store::{Filter, LocalStore, RecordAccess, RecordStore, Via};
use serde_json::Value;
use std::sync::Arc;

mod config;

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configured record service
    Health,
    /// Show the record service's network addresses
    Info,
    /// Print records matching a filter
    Select {
        table: Table,
        /// Equality constraint, repeatable (e.g. --eq semester=5)
        #[arg(long = "eq", value_parser = parse_eq)]
        eq: Vec<(String, Value)>,
        /// Column to order by
        #[arg(long)]
        order: Option<String>,
        /// Order descending
        #[arg(long, requires = "order")]
        desc: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count records matching a filter
    Count {
        table: Table,
        #[arg(long = "eq", value_parser = parse_eq)]
        eq: Vec<(String, Value)>,
    },
    /// Mark a student present (manual)
    Mark { session: String, student: String },
    /// Start a session (upcoming → live)
    Start { session: String },
    /// End a session
    End { session: String },
    /// List attendance for a session
    Attendance { session: String },
    /// Record marks (0–100) on an attendance row
    SetMark { attendance: String, marks: u32 },
}

/// `field=value`; the value is JSON when it parses as JSON, else a string.
fn parse_eq(s: &str) -> Result<(String, Value), String> {
    let (field, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got `{s}`"))?;
    if field.is_empty() {
        return Err(format!("empty field name in `{s}`"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}

fn filter_of(eq: Vec<(String, Value)>) -> Filter {
    eq.into_iter()
        .fold(Filter::all(), |f, (field, value)| f.and(field, value))
}

fn report_via(via: Via) {
    if via == Via::Local {
        tracing::debug!("served by local store");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::Config::from_env();

    let local = Arc::new(
        LocalStore::open(&cfg.db_path)
            .await
            .with_context(|| format!("opening {}", cfg.db_path.display()))?,
    );
    let access = Arc::new(
        RecordAccess::connect(local, cfg.server_url.as_deref(), cfg.request_timeout).await?,
    );

    match cli.command {
        Commands::Health => {
            let Some(url) = access.endpoint() else {
                println!("local mode: no record service configured");
                return Ok(());
            };
            if !access.check_health().await {
                bail!("{url}: unreachable");
            }
            println!("{url}: ok");
        }
        Commands::Info => match access.server_info().await {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => bail!("record service unavailable (local mode)"),
        },
        Commands::Select {
            table,
            eq,
            order,
            desc,
            limit,
        } => {
            let mut filter = filter_of(eq);
            if let Some(column) = order {
                filter = filter.order_by(column, !desc);
            }
            if let Some(n) = limit {
                filter = filter.limit(n);
            }
            let served = access.select(table, &filter).await?;
            report_via(served.via);
            println!("{}", serde_json::to_string_pretty(&served.value)?);
        }
        Commands::Count { table, eq } => {
            let served = access.count(table, &filter_of(eq)).await?;
            report_via(served.via);
            println!("{}", served.value);
        }
        Commands::Mark { session, student } => {
            let store: Arc<dyn RecordStore> = access.clone();
            let capture =
                AttendanceCapture::load(store, &session, &cfg.actor, CapturePolicy::from_env())
                    .await?;
            let reported = capture.mark_manual(&student).await;
            if let Some(notice) = &reported.notice {
                println!("{notice}");
            }
            match reported.outcome {
                MarkOutcome::Marked { attendance_id } => println!("{attendance_id}"),
                MarkOutcome::AlreadyMarked => {
                    if reported.notice.is_none() {
                        println!("already marked");
                    }
                }
                MarkOutcome::Failed { error } => bail!("mark failed: {error}"),
            }
        }
        Commands::Start { session } => {
            let s = rollcall_engine::start_session(access.as_ref(), &session).await?;
            println!("{} is {}", s.id, s.status.as_str());
        }
        Commands::End { session } => {
            let s = rollcall_engine::end_session(access.as_ref(), &session).await?;
            println!("{} is {}", s.id, s.status.as_str());
        }
        Commands::Attendance { session } => {
            let filter = Filter::by("session_id", session).order_by("timestamp", true);
            let served = access.select(Table::Attendance, &filter).await?;
            report_via(served.via);
            println!("{}", serde_json::to_string_pretty(&served.value)?);
        }
        Commands::SetMark { attendance, marks } => {
            rollcall_engine::set_mark(access.as_ref(), &attendance, marks).await?;
            println!("{attendance}: {marks}");
        }
    }

    Ok(())
}
