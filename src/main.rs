use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use acta_lib::analytics::{
    self,
    retention::{self, RetentionPolicy, DEFAULT_KEEP_DAYS, DEFAULT_KEEP_WEEKS},
    MAX_RANGE_DAYS,
};
use acta_lib::config::AppConfig;
use acta_lib::model::{NewUser, User};
use acta_lib::time::{add_days, format_date, parse_date, today, to_date};
use acta_lib::{db, defaults, migrate, users};

#[derive(Debug, Parser)]
#[command(name = "acta", about = "Task management backend operator tools", version)]
struct Cli {
    /// SQLite database file. Overrides ACTA_DB.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Schema migration commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Manage user accounts.
    #[command(subcommand)]
    Users(UsersCommand),
    /// Category maintenance.
    #[command(subcommand)]
    Categories(CategoriesCommand),
    /// Recompute or expire analytics rollups.
    #[command(subcommand)]
    Analytics(AnalyticsCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply any pending migrations.
    Migrate,
    /// List migrations and whether they have been applied.
    Status {
        /// Emit JSON instead of the table view.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum UsersCommand {
    /// Create a user account.
    Create {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    /// List every user account.
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CategoriesCommand {
    /// Create the default category set for one user, or for every active user.
    SeedDefaults {
        /// Email of the user to seed.
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum AnalyticsCommand {
    /// Recompute daily rollups for the N days ending on --date.
    Calculate {
        /// Last day to recompute (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<String>,
        /// Only recompute for this user's email.
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Also recompute the week containing --date.
        #[arg(long)]
        weekly: bool,
    },
    /// Delete expired rollups.
    Cleanup {
        /// Keep daily rollups for this many days.
        #[arg(long, default_value_t = DEFAULT_KEEP_DAYS)]
        days: u32,
        /// Keep weekly rollups for this many weeks.
        #[arg(long, default_value_t = DEFAULT_KEEP_WEEKS)]
        weeks: u32,
        /// Report what would be deleted without deleting it.
        #[arg(long, conflicts_with = "confirm")]
        dry_run: bool,
        /// Actually delete the expired rows.
        #[arg(long)]
        confirm: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = match AppConfig::resolve(cli.db.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };
    acta_lib::init_logging(&config.log_filter);
    tracing::debug!(
        target = "acta",
        event = "cli_start",
        git = acta_lib::GIT_HASH.unwrap_or("unknown")
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start async runtime: {err}");
            process::exit(1);
        }
    };
    match runtime.block_on(run(cli.command, config)) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(command: Commands, config: AppConfig) -> Result<i32> {
    let pool = db::open_sqlite_pool(&config.db_path)
        .await
        .with_context(|| format!("open database {}", config.db_path.display()))?;

    let result = dispatch(&pool, command).await;
    pool.close().await;
    result
}

async fn dispatch(pool: &SqlitePool, command: Commands) -> Result<i32> {
    if !matches!(command, Commands::Db(_)) {
        migrate::apply_migrations(pool)
            .await
            .context("apply migrations")?;
    }
    match command {
        Commands::Db(DbCommand::Status { json }) => handle_db_status(pool, json).await,
        Commands::Db(DbCommand::Migrate) => handle_db_migrate(pool).await,
        Commands::Users(cmd) => handle_users(pool, cmd).await,
        Commands::Categories(cmd) => handle_categories(pool, cmd).await,
        Commands::Analytics(cmd) => handle_analytics(pool, cmd).await,
    }
}

async fn handle_db_migrate(pool: &SqlitePool) -> Result<i32> {
    migrate::apply_migrations(pool)
        .await
        .context("apply migrations")?;
    let states = migrate::migration_status(pool)
        .await
        .context("read migration status")?;
    println!("{} migrations applied.", states.len());
    Ok(0)
}

async fn handle_db_status(pool: &SqlitePool, json: bool) -> Result<i32> {
    let states = migrate::migration_status(pool)
        .await
        .context("read migration status")?;
    if json {
        let serialized =
            serde_json::to_string_pretty(&states).context("serialize migration status")?;
        println!("{serialized}");
    } else {
        for state in &states {
            let applied = match state.applied_at {
                Some(ms) => to_date(ms).to_rfc3339(),
                None => "pending".to_string(),
            };
            println!("{:<40} {applied}", state.version);
        }
    }
    let pending = states.iter().filter(|s| s.applied_at.is_none()).count();
    Ok(if pending == 0 { 0 } else { 2 })
}

async fn handle_users(pool: &SqlitePool, command: UsersCommand) -> Result<i32> {
    match command {
        UsersCommand::Create {
            email,
            first_name,
            last_name,
        } => {
            let user = users::create_user(
                pool,
                NewUser {
                    email,
                    first_name,
                    last_name,
                },
            )
            .await
            .context("create user")?;
            println!("Created user {} ({})", user.email, user.id);
        }
        UsersCommand::List { json } => {
            let all = users::list_users(pool).await.context("list users")?;
            if json {
                let serialized =
                    serde_json::to_string_pretty(&all).context("serialize users")?;
                println!("{serialized}");
            } else {
                for user in &all {
                    let state = if user.is_active { "active" } else { "inactive" };
                    println!("{}  {:<32} {}", user.id, user.email, state);
                }
            }
        }
    }
    Ok(0)
}

/// Users selected by `--user`, or every active user when absent.
async fn select_users(pool: &SqlitePool, email: Option<&str>) -> Result<Vec<User>> {
    match email {
        Some(email) => {
            let user = users::find_user_by_email(pool, email)
                .await
                .context("look up user")?;
            match user {
                Some(user) => Ok(vec![user]),
                None => bail!("no user with email {email}"),
            }
        }
        None => {
            let all = users::list_users(pool).await.context("list users")?;
            Ok(all.into_iter().filter(|u| u.is_active).collect())
        }
    }
}

async fn handle_categories(pool: &SqlitePool, command: CategoriesCommand) -> Result<i32> {
    match command {
        CategoriesCommand::SeedDefaults { user } => {
            for user in select_users(pool, user.as_deref()).await? {
                let seeded = defaults::seed_default_categories(pool, &user.id)
                    .await
                    .with_context(|| format!("seed categories for {}", user.email))?;
                let created = seeded.iter().filter(|s| s.created).count();
                println!("{}: {created} default categories created", user.email);
            }
        }
    }
    Ok(0)
}

async fn handle_analytics(pool: &SqlitePool, command: AnalyticsCommand) -> Result<i32> {
    match command {
        AnalyticsCommand::Calculate {
            date,
            user,
            days,
            weekly,
        } => {
            let target = match date {
                Some(raw) => parse_date(&raw).with_context(|| format!("parse --date {raw}"))?,
                None => today(),
            };
            if days == 0 || i64::from(days) > MAX_RANGE_DAYS {
                bail!("--days must be between 1 and {MAX_RANGE_DAYS}");
            }
            let start = add_days(target, 1 - i64::from(days));
            let selected = select_users(pool, user.as_deref()).await?;
            println!("Calculating analytics for {} users...", selected.len());
            for user in &selected {
                calculate_for(pool, user, start, target, weekly).await?;
            }
            println!("Analytics calculated for {} users", selected.len());
            Ok(0)
        }
        AnalyticsCommand::Cleanup {
            days,
            weeks,
            dry_run,
            confirm,
        } => {
            if !dry_run && !confirm {
                println!(
                    "Nothing deleted. Pass --dry-run to preview or --confirm to delete expired rollups."
                );
                return Ok(0);
            }
            let policy = RetentionPolicy {
                keep_days: days,
                keep_weeks: weeks,
            };
            let report = retention::cleanup(pool, policy, today(), dry_run)
                .await
                .context("clean up rollups")?;
            let verb = if report.dry_run { "Would delete" } else { "Deleted" };
            println!(
                "{verb} {} daily rollups before {} and {} weekly rollups before {}",
                report.daily_rows,
                format_date(report.daily_cutoff),
                report.weekly_rows,
                format_date(report.weekly_cutoff)
            );
            Ok(0)
        }
    }
}

async fn calculate_for(
    pool: &SqlitePool,
    user: &User,
    start: NaiveDate,
    end: NaiveDate,
    weekly: bool,
) -> Result<()> {
    let rows = analytics::recompute_daily_range(pool, &user.id, start, end)
        .await
        .with_context(|| format!("recompute daily rollups for {}", user.email))?;
    println!(
        "{}: {} daily rollups ({} to {})",
        user.email,
        rows.len(),
        format_date(start),
        format_date(end)
    );
    if weekly {
        let week = analytics::recompute_weekly(pool, &user.id, end)
            .await
            .with_context(|| format!("recompute weekly rollup for {}", user.email))?;
        println!(
            "{}: week {} of {} ({} created, {} completed)",
            user.email, week.iso_week, week.iso_year, week.tasks_created, week.tasks_completed
        );
    }
    Ok(())
}
