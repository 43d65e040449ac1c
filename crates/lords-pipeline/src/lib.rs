//! Scrape → stage → import pipeline for the lords dataset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lords_core::{Lord, LordRow, LordSkillRow, LordTraitRow};
use lords_extract::Extractor;
use lords_fetch::{CachedFetcher, HttpClientConfig, HttpTransport, ResponseCache, WikiApi};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lords-pipeline";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_url: String,
    pub wiki_base: String,
    pub category: String,
    pub data_dir: PathBuf,
    pub titles_file: PathBuf,
    pub db_path: PathBuf,
    pub dump_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub polite_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_url: "https://bannerlord.fandom.com/api.php".to_string(),
            wiki_base: "https://bannerlord.fandom.com/wiki".to_string(),
            category: "Category:Bannerlord_characters".to_string(),
            data_dir: PathBuf::from("./data"),
            titles_file: PathBuf::from("./lords_list.txt"),
            db_path: PathBuf::from("./bannerlord.db"),
            dump_path: PathBuf::from("./dataset.sql"),
            user_agent: "BannerlordScraper/1.0 (+educational use)".to_string(),
            http_timeout_secs: 30,
            polite_delay_ms: 600,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("LORDS_API_URL").unwrap_or(defaults.api_url),
            wiki_base: std::env::var("LORDS_WIKI_BASE").unwrap_or(defaults.wiki_base),
            category: std::env::var("LORDS_CATEGORY").unwrap_or(defaults.category),
            data_dir: std::env::var("LORDS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            titles_file: std::env::var("LORDS_TITLES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.titles_file),
            db_path: std::env::var("LORDS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            dump_path: std::env::var("LORDS_DUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dump_path),
            user_agent: std::env::var("LORDS_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("LORDS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            polite_delay_ms: std::env::var("LORDS_POLITE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.polite_delay_ms),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn staging_paths(&self) -> StagingPaths {
        StagingPaths::in_dir(self.processed_dir())
    }

    pub fn polite_delay(&self) -> Duration {
        Duration::from_millis(self.polite_delay_ms)
    }
}

pub fn build_wiki_api(config: &PipelineConfig) -> Result<WikiApi> {
    let transport = HttpTransport::new(HttpClientConfig {
        api_url: config.api_url.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })?;
    let fetcher = CachedFetcher::new(ResponseCache::new(config.cache_dir()), Box::new(transport))
        .with_polite_delay(config.polite_delay());
    Ok(WikiApi::new(fetcher))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

pub fn write_title_list(path: &Path, titles: &[String]) -> Result<()> {
    ensure_parent_dir(path)?;
    std::fs::write(path, titles.join("\n")).with_context(|| format!("writing {}", path.display()))
}

pub fn read_title_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        bail!(
            "{} not found; run `lords-cli build-list` first",
            path.display()
        );
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    pub lords: PathBuf,
    pub traits: PathBuf,
    pub skills: PathBuf,
}

impl StagingPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            lords: dir.join("lords.csv"),
            traits: dir.join("lord_traits.csv"),
            skills: dir.join("lord_skills.csv"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingCounts {
    pub lords: usize,
    pub traits: usize,
    pub skills: usize,
}

/// Overwrites all three staging files, header row first even when empty.
pub fn write_staging(paths: &StagingPaths, lords: &[Lord]) -> Result<StagingCounts> {
    let lord_rows = lords.iter().map(Lord::to_row).collect::<Vec<_>>();
    let trait_rows = lords.iter().flat_map(Lord::trait_rows).collect::<Vec<_>>();
    let skill_rows = lords.iter().flat_map(Lord::skill_rows).collect::<Vec<_>>();

    write_csv(&paths.lords, &LordRow::HEADERS, &lord_rows)?;
    write_csv(&paths.traits, &LordTraitRow::HEADERS, &trait_rows)?;
    write_csv(&paths.skills, &LordSkillRow::HEADERS, &skill_rows)?;

    Ok(StagingCounts {
        lords: lord_rows.len(),
        traits: trait_rows.len(),
        skills: skill_rows.len(),
    })
}

fn write_csv<T: Serialize>(path: &Path, headers: &[&str], rows: &[T]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(headers)
        .with_context(|| format!("writing header to {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

pub fn read_staging<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("parsing {}", path.display()))
}

/// Association files are optional; a missing one imports as empty.
fn read_optional_staging<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_staging(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub titles: usize,
    pub staged: StagingCounts,
    pub staging_dir: String,
}

pub struct ScrapePipeline {
    config: PipelineConfig,
    api: WikiApi,
    extractor: Extractor,
}

impl ScrapePipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let api = build_wiki_api(&config)?;
        Self::with_api(config, api)
    }

    pub fn with_api(config: PipelineConfig, api: WikiApi) -> Result<Self> {
        Ok(Self {
            config,
            api,
            extractor: Extractor::new()?,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Enumerates the configured category and writes the title list file.
    pub async fn build_title_list(&self) -> Result<Vec<String>> {
        let category = &self.config.category;
        let titles = self
            .api
            .list_category_members(category)
            .await
            .with_context(|| format!("listing members of {category}"))?;
        write_title_list(&self.config.titles_file, &titles)?;
        info!(
            titles = titles.len(),
            path = %self.config.titles_file.display(),
            "saved title list"
        );
        Ok(titles)
    }

    /// Any fetch failure aborts the whole run; the cache makes a re-run cheap.
    pub async fn scrape_titles(&self, titles: &[String]) -> Result<Vec<Lord>> {
        let mut lords = Vec::with_capacity(titles.len());
        for title in titles {
            let html = self
                .api
                .fetch_page_html(title)
                .await
                .with_context(|| format!("fetching page {title}"))?;
            let page = self.extractor.extract(&html);
            let lord = Lord::from_page(title, &self.config.wiki_base, page);
            info!(
                title = %title,
                traits = lord.traits.len(),
                skills = lord.skills.len(),
                "scraped lord"
            );
            lords.push(lord);
        }
        Ok(lords)
    }

    pub async fn run_once(&self, limit: Option<usize>) -> Result<ScrapeRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let mut titles = read_title_list(&self.config.titles_file)?;
        if let Some(limit) = limit {
            titles.truncate(limit);
        }

        let lords = self.scrape_titles(&titles).await?;
        let paths = self.config.staging_paths();
        let staged = write_staging(&paths, &lords)?;

        let summary = ScrapeRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            titles: titles.len(),
            staged,
            staging_dir: self.config.processed_dir().display().to_string(),
        };
        let summary_path = self.config.processed_dir().join("run_summary.json");
        let bytes = serde_json::to_vec_pretty(&summary).context("serializing run summary")?;
        fs::write(&summary_path, bytes)
            .await
            .with_context(|| format!("writing {}", summary_path.display()))?;
        Ok(summary)
    }
}

const SCHEMA_SQL: &str = r#"
DROP TABLE IF EXISTS lord_skills;
DROP TABLE IF EXISTS lord_traits;
DROP TABLE IF EXISTS skills;
DROP TABLE IF EXISTS lords;

CREATE TABLE lords (
  lord_id     INTEGER PRIMARY KEY AUTOINCREMENT,
  ext_id      TEXT UNIQUE,
  clan_id     INTEGER,
  name        TEXT NOT NULL,
  gender      TEXT,
  age         INTEGER,
  culture_id  INTEGER,
  level       INTEGER,
  sp_per_lvl  INTEGER,
  sum_stats   INTEGER,
  traits      TEXT,
  source_url  TEXT NOT NULL
);

CREATE TABLE skills (
  skill_id   INTEGER PRIMARY KEY AUTOINCREMENT,
  skill_key  TEXT NOT NULL UNIQUE
);

CREATE TABLE lord_traits (
  lord_id INTEGER NOT NULL,
  trait   TEXT NOT NULL,
  PRIMARY KEY (lord_id, trait),
  FOREIGN KEY (lord_id) REFERENCES lords(lord_id)
);

CREATE TABLE lord_skills (
  lord_id  INTEGER NOT NULL,
  skill_id INTEGER NOT NULL,
  value    INTEGER,
  PRIMARY KEY (lord_id, skill_id),
  FOREIGN KEY (lord_id) REFERENCES lords(lord_id),
  FOREIGN KEY (skill_id) REFERENCES skills(skill_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_lords_ext ON lords(ext_id);
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub lords: usize,
    pub duplicate_lords: usize,
    pub traits: usize,
    pub skills: usize,
    pub skill_keys: usize,
    pub dropped_traits: usize,
    pub dropped_skills: usize,
    pub blank_skill_keys: usize,
}

pub async fn connect_store(db_path: &Path) -> Result<SqlitePool> {
    ensure_parent_dir(db_path)?;
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("opening {}", db_path.display()))
}

/// Drop-and-rebuild import of the three staging files into `db_path`.
pub async fn import_staging(db_path: &Path, paths: &StagingPaths) -> Result<ImportSummary> {
    let lords: Vec<LordRow> = read_staging(&paths.lords)?;
    let traits: Vec<LordTraitRow> = read_optional_staging(&paths.traits)?;
    let skills: Vec<LordSkillRow> = read_optional_staging(&paths.skills)?;

    let pool = connect_store(db_path).await?;
    let summary = import_rows(&pool, &lords, &traits, &skills).await;
    pool.close().await;
    let summary = summary?;
    info!(
        db = %db_path.display(),
        lords = summary.lords,
        traits = summary.traits,
        skills = summary.skills,
        dropped_traits = summary.dropped_traits,
        dropped_skills = summary.dropped_skills,
        "import complete"
    );
    Ok(summary)
}

/// Association rows whose `ext_id` has no lord are dropped and counted, never
/// inserted with a placeholder id.
pub async fn import_rows(
    pool: &SqlitePool,
    lords: &[LordRow],
    traits: &[LordTraitRow],
    skills: &[LordSkillRow],
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await.context("opening import transaction")?;

    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&mut *tx)
        .await
        .context("rebuilding schema")?;

    for row in lords {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO lords
              (ext_id, clan_id, name, gender, age, culture_id, level, sp_per_lvl, sum_stats, traits, source_url)
            VALUES (?, NULL, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.ext_id.as_str())
        .bind(row.name.as_str())
        .bind(row.gender.as_deref())
        .bind(row.age)
        .bind(row.culture_id)
        .bind(row.level)
        .bind(row.sp_per_lvl)
        .bind(row.sum_stats)
        .bind(row.traits.as_deref())
        .bind(row.source_url.as_str())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting lord {}", row.ext_id))?;

        if result.rows_affected() == 0 {
            debug!(ext_id = %row.ext_id, "duplicate lord row ignored");
            summary.duplicate_lords += 1;
        } else {
            summary.lords += 1;
        }
    }

    let mut ext_to_id = HashMap::new();
    for row in sqlx::query("SELECT ext_id, lord_id FROM lords")
        .fetch_all(&mut *tx)
        .await
        .context("reading back lord ids")?
    {
        let ext_id: String = row.try_get("ext_id")?;
        let lord_id: i64 = row.try_get("lord_id")?;
        ext_to_id.insert(ext_id, lord_id);
    }

    for row in traits {
        let Some(&lord_id) = ext_to_id.get(&row.ext_id) else {
            debug!(ext_id = %row.ext_id, "trait row without lord dropped");
            summary.dropped_traits += 1;
            continue;
        };
        let result = sqlx::query("INSERT OR IGNORE INTO lord_traits (lord_id, trait) VALUES (?, ?)")
            .bind(lord_id)
            .bind(row.trait_text.as_str())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("inserting trait for {}", row.ext_id))?;
        summary.traits += result.rows_affected() as usize;
    }

    let mut skill_ids: HashMap<String, i64> = HashMap::new();
    for row in skills {
        let Some(&lord_id) = ext_to_id.get(&row.ext_id) else {
            debug!(ext_id = %row.ext_id, "skill row without lord dropped");
            summary.dropped_skills += 1;
            continue;
        };
        let key = row.skill_key.trim().to_lowercase();
        if key.is_empty() {
            summary.blank_skill_keys += 1;
            continue;
        }

        // Sequential ids on first sight; staging order makes them reproducible.
        let skill_id = match skill_ids.get(&key) {
            Some(&id) => id,
            None => {
                let id = sqlx::query("INSERT INTO skills (skill_key) VALUES (?)")
                    .bind(key.as_str())
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("registering skill {key}"))?
                    .last_insert_rowid();
                skill_ids.insert(key.clone(), id);
                id
            }
        };

        let result = sqlx::query(
            "INSERT OR IGNORE INTO lord_skills (lord_id, skill_id, value) VALUES (?, ?, ?)",
        )
        .bind(lord_id)
        .bind(skill_id)
        .bind(row.value)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("inserting skill {key} for {}", row.ext_id))?;
        summary.skills += result.rows_affected() as usize;
    }
    summary.skill_keys = skill_ids.len();

    tx.commit().await.context("committing import")?;
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub tables: usize,
    pub statements: usize,
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reconstructive SQL for the whole store: schema, one INSERT per row, indexes.
///
/// Tables come out in name order, so foreign keys are switched off for the
/// replay the same way `sqlite3 .dump` does it.
pub async fn dump_statements(pool: &SqlitePool) -> Result<(Vec<String>, usize)> {
    let mut out = vec![
        "PRAGMA foreign_keys=OFF;".to_string(),
        "BEGIN TRANSACTION;".to_string(),
    ];
    let mut tables = 0usize;

    let schema = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE sql NOT NULL AND type == 'table' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .context("reading table schema")?;

    for entry in schema {
        let name: String = entry.try_get("name")?;
        let sql: String = entry.try_get("sql")?;
        match name.as_str() {
            "sqlite_sequence" => out.push("DELETE FROM \"sqlite_sequence\";".to_string()),
            "sqlite_stat1" => out.push("ANALYZE \"sqlite_master\";".to_string()),
            n if n.starts_with("sqlite_") => continue,
            _ => {
                out.push(format!("{sql};"));
                tables += 1;
            }
        }

        let table = quote_identifier(&name);
        let columns = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(pool)
            .await
            .with_context(|| format!("reading columns of {name}"))?
            .iter()
            .map(|c| c.try_get::<String, _>("name"))
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            continue;
        }

        let values = columns
            .iter()
            .map(|c| format!("'||quote({})||'", quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(",");
        let select = format!("SELECT 'INSERT INTO {table} VALUES({values})' FROM {table}");
        for row in sqlx::query(&select)
            .fetch_all(pool)
            .await
            .with_context(|| format!("dumping rows of {name}"))?
        {
            out.push(format!("{};", row.try_get::<String, _>(0)?));
        }
    }

    for entry in sqlx::query(
        "SELECT sql FROM sqlite_master WHERE sql NOT NULL AND type IN ('index', 'trigger', 'view')",
    )
    .fetch_all(pool)
    .await
    .context("reading index schema")?
    {
        out.push(format!("{};", entry.try_get::<String, _>("sql")?));
    }

    out.push("COMMIT;".to_string());
    Ok((out, tables))
}

pub async fn dump_sql(db_path: &Path, out_path: &Path) -> Result<DumpSummary> {
    if !db_path.exists() {
        bail!("{} not found; run `lords-cli import` first", db_path.display());
    }
    let pool = connect_store(db_path).await?;
    let dumped = dump_statements(&pool).await;
    pool.close().await;
    let (lines, tables) = dumped?;

    ensure_parent_dir(out_path)?;
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(out_path, text)
        .await
        .with_context(|| format!("writing {}", out_path.display()))?;
    info!(path = %out_path.display(), tables, statements = lines.len(), "wrote sql dump");
    Ok(DumpSummary {
        tables,
        statements: lines.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub scrape: ScrapeRunSummary,
    pub import: ImportSummary,
    pub dump: DumpSummary,
}

/// build-list → scrape → import → dump.
pub async fn run_pipeline(config: PipelineConfig, limit: Option<usize>) -> Result<PipelineRunSummary> {
    let pipeline = ScrapePipeline::new(config.clone())?;
    pipeline.build_title_list().await?;
    let scrape = pipeline.run_once(limit).await?;
    let import = import_staging(&config.db_path, &config.staging_paths()).await?;
    let dump = dump_sql(&config.db_path, &config.dump_path).await?;
    Ok(PipelineRunSummary {
        scrape,
        import,
        dump,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use lords_fetch::{ApiParams, FetchError, Transport};
    use serde_json::{json, Value as JsonValue};
    use tempfile::tempdir;

    struct FakeWiki {
        pages: BTreeMap<String, String>,
    }

    #[async_trait]
    impl Transport for FakeWiki {
        async fn get_json(&self, params: &ApiParams) -> Result<JsonValue, FetchError> {
            match params.get("action").map(String::as_str) {
                Some("query") => Ok(json!({
                    "query": {
                        "categorymembers": self
                            .pages
                            .keys()
                            .rev()
                            .map(|t| json!({ "title": t }))
                            .chain([json!({ "title": "Template:Lord" })])
                            .collect::<Vec<_>>()
                    }
                })),
                Some("parse") => {
                    let page = params.get("page").cloned().unwrap_or_default();
                    match self.pages.get(&page) {
                        Some(html) => Ok(json!({ "parse": { "text": { "*": html } } })),
                        None => Ok(json!({ "error": { "code": "missingtitle" } })),
                    }
                }
                _ => Err(FetchError::HttpStatus {
                    status: 400,
                    url: "fake".into(),
                }),
            }
        }
    }

    fn pipeline_in(dir: &Path, pages: &[(&str, &str)]) -> ScrapePipeline {
        let config = PipelineConfig {
            data_dir: dir.join("data"),
            titles_file: dir.join("lords_list.txt"),
            db_path: dir.join("lords.db"),
            dump_path: dir.join("dataset.sql"),
            polite_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let transport = FakeWiki {
            pages: pages
                .iter()
                .map(|(t, h)| (t.to_string(), h.to_string()))
                .collect(),
        };
        let fetcher = CachedFetcher::new(ResponseCache::new(config.cache_dir()), Box::new(transport))
            .with_polite_delay(Duration::ZERO);
        ScrapePipeline::with_api(config, WikiApi::new(fetcher)).expect("pipeline")
    }

    #[tokio::test]
    async fn scrape_run_writes_sorted_title_list_and_staging() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline_in(
            dir.path(),
            &[
                (
                    "Derthert",
                    r#"<h1 id="firstHeading">Derthert</h1>
                       <table class="infobox"><tr><th>Age</th><td>57</td></tr></table>
                       <h2>Traits</h2><ul><li>Honorable</li></ul>
                       <table><tr><th>Skill</th><th>Value</th></tr><tr><td>Riding</td><td>180</td></tr></table>"#,
                ),
                ("Caladog of Battania", "<p>stub</p>"),
            ],
        );

        let titles = pipeline.build_title_list().await.expect("titles");
        assert_eq!(titles, vec!["Caladog of Battania", "Derthert"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("lords_list.txt")).unwrap(),
            "Caladog of Battania\nDerthert"
        );

        let summary = pipeline.run_once(None).await.expect("run");
        assert_eq!(summary.titles, 2);
        assert_eq!(
            summary.staged,
            StagingCounts {
                lords: 2,
                traits: 1,
                skills: 1
            }
        );

        let paths = pipeline.config().staging_paths();
        let lords = std::fs::read_to_string(&paths.lords).unwrap();
        assert_eq!(
            lords,
            "ext_id,name,gender,age,culture_id,level,sp_per_lvl,sum_stats,traits,source_url\n\
             Caladog_of_Battania,Caladog of Battania,,,,,,,,https://bannerlord.fandom.com/wiki/Caladog_of_Battania\n\
             Derthert,Derthert,,57,,,,,Honorable,https://bannerlord.fandom.com/wiki/Derthert\n"
        );
        assert_eq!(
            std::fs::read_to_string(&paths.skills).unwrap(),
            "ext_id,skill_key,value\nDerthert,riding,180\n"
        );
    }

    #[tokio::test]
    async fn missing_page_aborts_the_run() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline_in(dir.path(), &[]);
        write_title_list(&pipeline.config().titles_file, &["Nobody".to_string()]).unwrap();

        let err = pipeline.run_once(None).await.unwrap_err();
        assert!(format!("{err:#}").contains("fetching page Nobody"));
        assert!(!pipeline.config().staging_paths().lords.exists());
    }

    #[test]
    fn title_list_skips_blank_lines() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "Arina\n\n  Derthert  \n").unwrap();
        assert_eq!(read_title_list(&path).unwrap(), vec!["Arina", "Derthert"]);
        assert!(read_title_list(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn staging_round_trips_unset_fields_as_none() {
        let dir = tempdir().expect("tempdir");
        let paths = StagingPaths::in_dir(dir.path());
        let lord = Lord::from_page("Arina", "https://w/wiki", Default::default());
        write_staging(&paths, &[lord]).unwrap();

        let rows: Vec<LordRow> = read_staging(&paths.lords).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].age, None);
        assert_eq!(rows[0].gender, None);
        assert_eq!(rows[0].level, None);
        assert_eq!(rows[0].traits, None);
        assert_eq!(
            std::fs::read_to_string(&paths.traits).unwrap(),
            "ext_id,trait\n"
        );
    }
}
