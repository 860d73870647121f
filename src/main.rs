use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod prediction;
mod recommend;
mod report;
mod risk;

use config::AppConfig;
use models::{RiskLevel, Student};

#[derive(Parser)]
#[command(name = "dropout-risk-tracker")]
#[command(about = "Student dropout risk scoring, reporting and REST API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import mentors from a CSV file
    ImportMentors {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score risk across students
    #[command(group(
        ArgGroup::new("scope")
            .args(["level", "mentor"])
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        level: Option<String>,
        /// Mentor email
        #[arg(long)]
        mentor: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    #[command(group(
        ArgGroup::new("scope")
            .args(["level", "mentor"])
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        mentor: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export all students as CSV
    Export {
        #[arg(long, default_value = "students.csv")]
        out: PathBuf,
    },
    /// Run the HTTP API
    Serve,
}

async fn scoped_students(
    pool: &SqlitePool,
    level: Option<&str>,
    mentor: Option<&str>,
) -> anyhow::Result<Vec<Student>> {
    if let Some(level) = level {
        let level = RiskLevel::parse(level).with_context(|| {
            format!(
                "level must be one of: {}",
                RiskLevel::ALL.map(|l| l.as_str()).join(", ")
            )
        })?;
        return db::list_by_risk_level(pool, level).await;
    }

    if let Some(email) = mentor {
        let mentor = db::find_mentor_by_email(pool, email)
            .await?
            .with_context(|| format!("no mentor registered as {email}"))?;
        return db::list_students_for_mentor(pool, mentor.id).await;
    }

    db::list_students(pool).await
}

async fn serve(config: &AppConfig, pool: SqlitePool) -> anyhow::Result<()> {
    db::init_db(&pool).await?;

    let predictor =
        prediction::PredictionClient::new(&config.model_service_url, config.model_timeout)?;
    let state = api::AppState {
        pool,
        jwt: auth::JwtService::new(&config.jwt_secret),
        predictor,
    };
    let app = api::create_router(state);

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(address.as_str())
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(
        %address,
        model_service = %config.model_service_url,
        "server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using development secret");
    }

    let pool = db::connect(&config.database_url).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new students).");
        }
        Commands::Import { csv } => {
            let file = File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = db::import_students_csv(&pool, file).await?;
            println!(
                "Processed {} rows from {}: {} inserted, {} errors.",
                summary.processed,
                csv.display(),
                summary.inserted,
                summary.errors
            );
        }
        Commands::ImportMentors { csv } => {
            let file = File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
            let summary = db::import_mentors_csv(&pool, file).await?;
            println!(
                "Processed {} mentor rows from {}: {} inserted, {} errors.",
                summary.processed,
                csv.display(),
                summary.inserted,
                summary.errors
            );
        }
        Commands::Score {
            level,
            mentor,
            limit,
        } => {
            let students = scoped_students(&pool, level.as_deref(), mentor.as_deref()).await?;
            let scores = risk::score_students(&students);

            if scores.is_empty() {
                println!("No students found for this scope.");
                return Ok(());
            }

            println!("Top students by risk score:");
            for score in scores.iter().take(limit) {
                println!(
                    "- {} ({}) score {} [{}] attendance {:.1}%, academic {:.1}, fee {}",
                    score.name,
                    score.email.as_deref().unwrap_or("no email"),
                    score.risk_score,
                    score.risk_level,
                    score.attendance,
                    score.score,
                    score.fee_status.as_str()
                );
            }
        }
        Commands::Report {
            level,
            mentor,
            limit,
            out,
        } => {
            let students = scoped_students(&pool, level.as_deref(), mentor.as_deref()).await?;
            let scope = level.as_deref().or(mentor.as_deref());
            let today = chrono::Local::now().date_naive();
            let report = report::build_report(scope, today, &students, limit);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { out } => {
            let file = File::create(&out).with_context(|| format!("failed to create {}", out.display()))?;
            let count = db::export_students_csv(&pool, BufWriter::new(file)).await?;
            println!("Exported {count} students to {}.", out.display());
        }
        Commands::Serve => serve(&config, pool).await?,
    }

    Ok(())
}
