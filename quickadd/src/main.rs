use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, TimeZone};
use clap::{Args, Parser, Subcommand};
use quickadd::catalog::Catalog;
use quickadd::core::{BlockedBlock, ParseConfig, ParseResult, Tag, TaskChanges, TaskDraft};
use quickadd::duration::parse_duration_ms;
use quickadd::slots::bucket_by_day;
use quickadd::{DEFAULT_MAX_DAYS_TO_CHECK, find_next_available_start_in, short_syntax};

#[derive(Debug, Parser)]
#[command(
    name = "quickadd",
    about = "Quick-entry task syntax and free slot lookup",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a task title written in short syntax.
    Parse(ParseArgs),

    /// Find the next free slot between blocked intervals.
    Slot(SlotArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Task title, e.g. `Fix bug +Work #urgent @friday 4pm 30m/2h`.
    #[arg(required = true)]
    title: Vec<String>,
    /// JSON file with `config`, `tags` and `projects`.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Tag ids already on the task.
    #[arg(long = "tag-id")]
    tag_ids: Vec<String>,
    /// Reference time (RFC 3339). Defaults to now in the local zone.
    #[arg(long)]
    now: Option<DateTime<FixedOffset>>,
    /// Ignore `@` due dates.
    #[arg(long)]
    no_due: bool,
    /// Ignore `+` projects.
    #[arg(long)]
    no_project: bool,
    /// Ignore `#` tags.
    #[arg(long)]
    no_tag: bool,
    /// Emit JSON instead of a human-readable summary.
    #[arg(long)]
    json: bool,
    /// Create new tags, save them to `--catalog` and print the updated task.
    #[arg(long)]
    apply: bool,
}

#[derive(Debug, Args)]
struct SlotArgs {
    /// Slot length, e.g. `30m`, `1h30m`, `1.5h`.
    #[arg(long, value_parser = parse_duration_arg)]
    duration: u64,
    /// JSON array of `{"start", "end"}` intervals in epoch milliseconds.
    #[arg(long)]
    blocked: Option<PathBuf>,
    /// Search start (RFC 3339). Defaults to now in the local zone.
    #[arg(long)]
    from: Option<DateTime<FixedOffset>>,
    /// Number of days to search before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_DAYS_TO_CHECK)]
    max_days: u32,
    /// Emit JSON instead of a timestamp.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Slot(args) => handle_slot(args),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn parse_duration_arg(s: &str) -> Result<u64, String> {
    parse_duration_ms(s)
        .ok_or_else(|| format!("invalid duration {s:?}, expected e.g. 30m or 1h30m"))
}

/* ------------------------------- parse ------------------------------- */

fn handle_parse(args: ParseArgs) -> Result<()> {
    let mut catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::default(),
    };
    log::info!(
        "{} tags, {} projects in catalog",
        catalog.tags.len(),
        catalog.projects.len()
    );
    let config = effective_config(catalog.config, &args);
    match args.now {
        Some(now) => run_parse(&args, &mut catalog, config, &now),
        None => run_parse(&args, &mut catalog, config, &Local::now()),
    }
}

fn effective_config(mut config: ParseConfig, args: &ParseArgs) -> ParseConfig {
    if args.no_due {
        config.is_enable_due = false;
    }
    if args.no_project {
        config.is_enable_project = false;
    }
    if args.no_tag {
        config.is_enable_tag = false;
    }
    config
}

fn run_parse<Tz: TimeZone>(
    args: &ParseArgs,
    catalog: &mut Catalog,
    config: ParseConfig,
    now: &DateTime<Tz>,
) -> Result<()>
where
    Tz::Offset: Display,
{
    let draft =
        TaskDraft::new(args.title.join(" ")).with_tag_ids(args.tag_ids.iter().map(String::as_str));
    let projects = catalog.active_projects();
    let result = short_syntax(
        &draft,
        &config,
        Some(catalog.tags.as_slice()),
        &projects,
        now,
    );

    let Some(result) = result else {
        if args.json {
            println!("null");
        } else {
            println!("no short syntax found");
        }
        return Ok(());
    };

    if !args.apply {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_summary(&result, catalog, &now.timezone());
        }
        return Ok(());
    }

    let created = catalog.create_tags(&result.new_tag_titles);
    if let Some(path) = &args.catalog {
        if !created.is_empty() {
            catalog.save(path)?;
            log::info!("saved {} new tags to {:?}", created.len(), path);
        }
    }
    let changes = with_created_tags(&draft, &result.task_changes, &created);
    let task = draft.apply(&changes);
    if args.json {
        #[derive(serde::Serialize)]
        #[serde(rename_all = "camelCase")]
        struct AppliedOutput<'a> {
            task: &'a TaskDraft,
            created_tags: &'a [Tag],
            #[serde(flatten)]
            result: &'a ParseResult,
        }

        let payload = AppliedOutput {
            task: &task,
            created_tags: &created,
            result: &result,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_summary(&result, catalog, &now.timezone());
        for tag in &created {
            println!("created:   #{} ({})", tag.title, tag.id);
        }
        println!("task:      {:?}", task.title);
    }
    Ok(())
}

/// Adds freshly minted tag ids on top of whatever the parse decided.
fn with_created_tags(draft: &TaskDraft, changes: &TaskChanges, created: &[Tag]) -> TaskChanges {
    let mut changes = changes.clone();
    if !created.is_empty() {
        let mut ids = changes
            .tag_ids
            .take()
            .unwrap_or_else(|| draft.tag_ids.clone());
        ids.extend(created.iter().map(|t| t.id.clone()));
        changes.tag_ids = Some(ids);
    }
    changes
}

fn print_summary<Tz: TimeZone>(result: &ParseResult, catalog: &Catalog, tz: &Tz)
where
    Tz::Offset: Display,
{
    let changes = &result.task_changes;
    if let Some(title) = &changes.title {
        println!("title:     {:?}", title);
    }
    if let Some(id) = &result.project_id {
        let name = catalog
            .project_by_id(id)
            .map_or(id.to_string(), |p| p.title.clone());
        println!("project:   {}", name);
    }
    if let Some(ids) = &changes.tag_ids {
        let names: Vec<String> = ids
            .iter()
            .map(|id| catalog.tag_by_id(id).map_or(id.to_string(), |t| t.title.clone()))
            .collect();
        println!("tags:      {}", names.join(", "));
    }
    if !result.new_tag_titles.is_empty() {
        println!("new tags:  {}", result.new_tag_titles.join(", "));
    }
    if let Some(estimate) = changes.time_estimate {
        println!("estimate:  {}", format_duration(estimate));
    }
    if let Some(days) = &changes.time_spent_on_day {
        for (day, spent) in days {
            println!("spent:     {} on {}", format_duration(*spent), day);
        }
    }
    if let Some(due) = changes.due_with_time {
        match tz.timestamp_millis_opt(due).single() {
            Some(at) if changes.has_planned_time == Some(false) => {
                println!("due:       {} (no time)", at.format("%Y-%m-%d"));
            }
            Some(at) => println!("due:       {}", at.format("%Y-%m-%d %H:%M %:z")),
            None => println!("due:       {}ms", due),
        }
    }
}

fn format_duration(ms: u64) -> String {
    let minutes = ms / 60_000;
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h{m}m"),
    }
}

/* -------------------------------- slot -------------------------------- */

fn handle_slot(args: SlotArgs) -> Result<()> {
    let blocks = match &args.blocked {
        Some(path) => read_blocks(path)?,
        None => Vec::new(),
    };
    log::info!("{} blocked intervals", blocks.len());
    match args.from {
        Some(from) => run_slot(&args, &blocks, &from.timezone(), from.timestamp_millis()),
        None => run_slot(&args, &blocks, &Local, Local::now().timestamp_millis()),
    }
}

fn run_slot<Tz: TimeZone>(
    args: &SlotArgs,
    blocks: &[BlockedBlock],
    tz: &Tz,
    start_from: i64,
) -> Result<()>
where
    Tz::Offset: Display,
{
    let by_day = bucket_by_day(tz, blocks)?;
    let duration = i64::try_from(args.duration).context("duration out of range")?;
    let start = find_next_available_start_in(tz, &by_day, start_from, duration, args.max_days);
    let at = tz
        .timestamp_millis_opt(start)
        .single()
        .with_context(|| format!("{} is not a valid instant", start))?;

    if args.json {
        let payload = serde_json::json!({
            "start": start,
            "startLocal": at.to_rfc3339(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", at.format("%Y-%m-%d %H:%M %:z"));
    }
    Ok(())
}

fn read_blocks(path: &Path) -> Result<Vec<BlockedBlock>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing blocked intervals {:?}", path))
}
