use anyhow::Result;
use clap::{Parser, Subcommand};
use lords_pipeline::{dump_sql, import_staging, run_pipeline, PipelineConfig, ScrapePipeline};

#[derive(Debug, Parser)]
#[command(name = "lords-cli")]
#[command(about = "Scrape wiki character pages into a relational lords dataset")]
struct Cli {
    /// Category to enumerate (overrides LORDS_CATEGORY)
    #[arg(long, global = true)]
    category: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enumerate the category and write the title list file
    BuildList,
    /// Fetch and extract every listed page into the staging CSVs
    Scrape {
        /// Only process the first N titles
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Rebuild the SQLite store from the staging CSVs
    Import,
    /// Write the SQLite store out as a SQL script
    Dump,
    /// build-list, scrape, import and dump in sequence
    Run {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();
    if let Some(category) = cli.category {
        config.category = category;
    }

    match cli.command.unwrap_or(Commands::Run { limit: None }) {
        Commands::BuildList => {
            let titles = ScrapePipeline::new(config.clone())?.build_title_list().await?;
            println!(
                "saved {} titles -> {}",
                titles.len(),
                config.titles_file.display()
            );
        }
        Commands::Scrape { limit } => {
            let summary = ScrapePipeline::new(config)?.run_once(limit).await?;
            println!(
                "scrape complete: run_id={} titles={} lords={} traits={} skills={} dir={}",
                summary.run_id,
                summary.titles,
                summary.staged.lords,
                summary.staged.traits,
                summary.staged.skills,
                summary.staging_dir
            );
        }
        Commands::Import => {
            let summary = import_staging(&config.db_path, &config.staging_paths()).await?;
            println!(
                "import complete: lords={} traits={} skills={} skill_keys={} dropped_traits={} dropped_skills={} -> {}",
                summary.lords,
                summary.traits,
                summary.skills,
                summary.skill_keys,
                summary.dropped_traits,
                summary.dropped_skills,
                config.db_path.display()
            );
        }
        Commands::Dump => {
            let summary = dump_sql(&config.db_path, &config.dump_path).await?;
            println!(
                "dump complete: tables={} statements={} -> {}",
                summary.tables,
                summary.statements,
                config.dump_path.display()
            );
        }
        Commands::Run { limit } => {
            let summary = run_pipeline(config, limit).await?;
            println!(
                "run complete: run_id={} lords={} imported={} dropped={} statements={}",
                summary.scrape.run_id,
                summary.scrape.staged.lords,
                summary.import.lords,
                summary.import.dropped_traits + summary.import.dropped_skills,
                summary.dump.statements
            );
        }
    }

    Ok(())
}
