use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use course_forge::{
    CourseStore, Launcher, Outline, SqliteStore,
    api::group_pending,
    config::Config,
    utils::{init_log, prepare_database_dir},
};

#[derive(Debug, clap::Parser)]
#[command(about = "Operate the course content pipeline from the command line")]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Path to a toml config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// sqlx database url, overrides the config file
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Generate content and questions for an outline json file and wait for the result
    Generate {
        #[arg(short = 'i', long)]
        course_id: i64,
        #[arg(short = 'n', long, default_value = "General Course")]
        course_name: String,
        /// json file with a `course_mastertitle_breakdown` array
        outline: PathBuf,
    },
    /// Latest durable progress row of a course
    Progress { course_id: i64 },
    /// Stored content of a course
    Content { course_id: i64 },
    /// Stored question bank of a course
    Questions { course_id: i64 },
    /// Courses with completed or running generations
    Pending,
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn generate(
    config: &Config,
    store: Arc<dyn CourseStore>,
    course_id: i64,
    course_name: &str,
    outline: PathBuf,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&outline)
        .await
        .with_context(|| format!("read outline {}", outline.display()))?;
    let outline: Outline = serde_json::from_str(&text)
        .with_context(|| format!("parse outline {}", outline.display()))?;

    let launcher = Launcher::from_config(config, store);
    let (receipt, mut handle) = launcher.spawn(course_id, course_name, outline)?;
    println!("started job {}", receipt.job_id);

    let mut last = None;
    loop {
        let finished = tokio::select! {
            joined = &mut handle => {
                joined?;
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => false,
        };
        if let Some(state) = launcher.progress().get(&receipt.job_id) {
            let line = format!(
                "{} {}/{} ({}%)",
                state.durable_status(),
                state.completed_items,
                state.total_items.unwrap_or_default(),
                state.progress_percent()
            );
            if last.as_ref() != Some(&line) {
                println!("{line}");
                last = Some(line);
            }
            if finished {
                if let Some(error) = &state.error {
                    anyhow::bail!("job {} failed: {}", receipt.job_id, error);
                }
                let placeholders = state.items.iter().filter(|i| i.placeholder).count();
                println!(
                    "done: {} items ({} placeholders), {} questions stored",
                    state.items.len(),
                    placeholders,
                    state.questions_stored
                );
            }
        }
        if finished {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    let _guard = init_log(config.log_dir.clone());

    prepare_database_dir(&config.database)?;
    let store = Arc::new(SqliteStore::connect(&config.database).await?);
    match args.command {
        Commands::Generate {
            course_id,
            course_name,
            outline,
        } => generate(&config, store, course_id, &course_name, outline).await?,
        Commands::Progress { course_id } => match store.latest_progress(course_id).await? {
            Some(row) => print_json(&row)?,
            None => println!("no progress found for course {course_id}"),
        },
        Commands::Content { course_id } => print_json(&store.course_content(course_id).await?)?,
        Commands::Questions { course_id } => {
            print_json(&store.course_questions(course_id).await?)?
        }
        Commands::Pending => print_json(&group_pending(store.pending_progress().await?))?,
    }
    Ok(())
}
