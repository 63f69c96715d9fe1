use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use overleaf_store::config;
use overleaf_store::{
    ChangeKind, DiffQuery, EditIntent, EditOutcome, LogQuery, ProjectStore, TitleMatch,
    WriteOptions,
};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "overleaf-store")]
#[command(about = "Local git mirrors of Overleaf projects with section-aware editing", long_about = None)]
#[command(version)]
struct Cli {
    /// Project config file (default: $OVERLEAF_CONFIG_FILE or overleaf_config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project key (default: the configured default project)
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured projects
    Projects,

    /// List files in a project
    Files {
        /// Only files with this extension (e.g. tex)
        #[arg(short, long)]
        extension: Option<String>,
    },

    /// Print a file
    Read { path: String },

    /// Show the section outline of a LaTeX file
    Sections { path: String },

    /// Print the body of one section
    Section {
        path: String,
        title: String,
        /// Match the title case-insensitively
        #[arg(short, long)]
        ignore_case: bool,
    },

    /// Show recent commits
    History {
        /// Number of commits (max 100)
        #[arg(short = 'n', long, default_value_t = overleaf_store::mirror::DEFAULT_LOG_LIMIT)]
        limit: usize,
        /// Only commits touching this file
        #[arg(long)]
        path: Option<String>,
    },

    /// Show a diff between revisions, or against the working tree
    Diff {
        /// Base revision
        #[arg(long, default_value = "HEAD")]
        from: String,
        /// Target revision (default: working tree)
        #[arg(long)]
        to: Option<String>,
        /// Only this file
        #[arg(long)]
        path: Option<String>,
    },

    /// Pull the latest changes from the remote
    Sync,

    /// Delete the local mirror and clone it again
    Refresh,

    /// Push local commits that have not reached the remote
    Push,

    /// Replace a unique piece of text
    Replace {
        path: String,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Overwrite a whole file
    Write {
        path: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Replace the body of a section
    UpdateSection {
        path: String,
        title: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Append text to the end of a section
    AppendSection {
        path: String,
        title: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Create a new file
    Create {
        path: String,
        #[command(flatten)]
        content: ContentArgs,
        #[command(flatten)]
        write: WriteArgs,
    },

    /// Delete a file
    Delete {
        path: String,
        #[command(flatten)]
        write: WriteArgs,
    },
}

#[derive(Args)]
struct ContentArgs {
    /// New text (read from stdin when neither --content nor --from-file is given)
    #[arg(long, conflicts_with = "from_file")]
    content: Option<String>,

    /// Read the new text from a local file
    #[arg(long)]
    from_file: Option<PathBuf>,
}

impl ContentArgs {
    fn read(self) -> Result<String> {
        if let Some(content) = self.content {
            return Ok(content);
        }
        if let Some(path) = self.from_file {
            return fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()));
        }
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read content from stdin")?;
        Ok(buffer)
    }
}

#[derive(Args)]
struct WriteArgs {
    /// Commit message (default depends on the operation)
    #[arg(short, long)]
    message: Option<String>,

    /// Commit locally without pushing
    #[arg(long)]
    no_push: bool,

    /// Show what would change without writing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show a unified diff of the change
    #[arg(short, long)]
    diff: bool,

    /// Match section titles case-insensitively
    #[arg(short, long)]
    ignore_case: bool,
}

impl WriteArgs {
    fn options(&self) -> WriteOptions {
        WriteOptions {
            commit_message: self.message.clone(),
            push: !self.no_push,
            dry_run: self.dry_run,
            title_match: title_match(self.ignore_case),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let registry = config::load(cli.config.as_deref(), |key| std::env::var(key).ok())?;
    let store = ProjectStore::from_config(registry)?;
    let project = cli.project.as_deref();
    let json = cli.json;

    match cli.command {
        Commands::Projects => cmd_projects(&store, json),
        Commands::Files { extension } => {
            let files = store.list_files(project, extension.as_deref())?;
            if json {
                print_json(&files)
            } else {
                for file in files {
                    println!("{file}");
                }
                Ok(())
            }
        }
        Commands::Read { path } => {
            print!("{}", store.read_file(project, &path)?);
            Ok(())
        }
        Commands::Sections { path } => cmd_sections(&store, project, &path, json),
        Commands::Section {
            path,
            title,
            ignore_case,
        } => {
            print!(
                "{}",
                store.section_content(project, &path, &title, title_match(ignore_case))?
            );
            Ok(())
        }
        Commands::History { limit, path } => cmd_history(&store, project, limit, path, json),
        Commands::Diff { from, to, path } => {
            let diff = store.diff(
                project,
                &DiffQuery {
                    from: Some(from),
                    to,
                    path,
                },
            )?;
            if diff.is_empty() {
                println!("{}", "No changes".dimmed());
            } else {
                print_patch(&diff);
            }
            Ok(())
        }
        Commands::Sync => {
            let state = store.sync(project)?;
            println!("{} mirror is {}", "✓".green(), state);
            Ok(())
        }
        Commands::Refresh => {
            store.refresh(project)?;
            println!("{} mirror re-cloned", "✓".green());
            Ok(())
        }
        Commands::Push => {
            let report = store.push(project)?;
            if json {
                return print_json(&report);
            }
            if !report.pushed {
                println!("{}", "No local mirror, nothing to push".dimmed());
            } else if report.retried {
                println!(
                    "{} pushed {}",
                    "✓".green(),
                    "(after replaying onto the remote)".dimmed()
                );
            } else {
                println!("{} pushed", "✓".green());
            }
            Ok(())
        }
        Commands::Replace {
            path,
            old,
            new,
            write,
        } => run_write(
            &store,
            project,
            EditIntent::ReplaceUnique { path, old, new },
            &write,
            json,
        ),
        Commands::Write {
            path,
            content,
            write,
        } => {
            let content = content.read()?;
            run_write(
                &store,
                project,
                EditIntent::Overwrite { path, content },
                &write,
                json,
            )
        }
        Commands::UpdateSection {
            path,
            title,
            content,
            write,
        } => {
            let content = content.read()?;
            run_write(
                &store,
                project,
                EditIntent::ReplaceSection {
                    path,
                    title,
                    content,
                },
                &write,
                json,
            )
        }
        Commands::AppendSection {
            path,
            title,
            content,
            write,
        } => {
            let content = content.read()?;
            run_write(
                &store,
                project,
                EditIntent::AppendToSection {
                    path,
                    title,
                    content,
                },
                &write,
                json,
            )
        }
        Commands::Create {
            path,
            content,
            write,
        } => {
            let content = content.read()?;
            run_write(
                &store,
                project,
                EditIntent::Create { path, content },
                &write,
                json,
            )
        }
        Commands::Delete { path, write } => run_write(
            &store,
            project,
            EditIntent::Delete { path },
            &write,
            json,
        ),
    }
}

/// `OVERLEAF_STORE_LOG` wins over `RUST_LOG`; `-v` only raises the fallback.
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("OVERLEAF_STORE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn title_match(ignore_case: bool) -> TitleMatch {
    if ignore_case {
        TitleMatch::IgnoreCase
    } else {
        TitleMatch::Exact
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_projects(store: &ProjectStore, json: bool) -> Result<()> {
    let projects = store.list_projects();
    if json {
        return print_json(&projects);
    }

    for project in projects {
        let marker = if project.is_default { "*" } else { " " };
        println!(
            "{} {} {}",
            marker.green(),
            project.name.bold(),
            format!("({})", project.display_name).dimmed()
        );
        println!("    {}", project.url.dimmed());
    }
    Ok(())
}

fn cmd_sections(store: &ProjectStore, project: Option<&str>, path: &str, json: bool) -> Result<()> {
    let outline = store.sections(project, path)?;
    if json {
        return print_json(&outline);
    }
    if outline.is_empty() {
        println!("{}", "No sections found".yellow());
        return Ok(());
    }

    for entry in outline {
        let indent = "  ".repeat(entry.depth);
        let star = if entry.starred { "*" } else { "" };
        println!(
            "{}{} {}",
            indent,
            format!("\\{}{}", entry.kind, star).cyan(),
            entry.title.bold()
        );
        let preview = entry.preview.replace('\n', " ");
        if !preview.is_empty() {
            println!("{}  {}", indent, preview.dimmed());
        }
    }
    Ok(())
}

fn cmd_history(
    store: &ProjectStore,
    project: Option<&str>,
    limit: usize,
    path: Option<String>,
    json: bool,
) -> Result<()> {
    let commits = store.history(project, &LogQuery { limit, path })?;
    if json {
        return print_json(&commits);
    }
    if commits.is_empty() {
        println!("{}", "No commits".dimmed());
    }

    for commit in commits {
        println!(
            "{} {} {} {}",
            commit.short_id.yellow(),
            commit.date_display().dimmed(),
            commit.author.cyan(),
            commit.message
        );
    }
    Ok(())
}

fn run_write(
    store: &ProjectStore,
    project: Option<&str>,
    intent: EditIntent,
    args: &WriteArgs,
    json: bool,
) -> Result<()> {
    let outcome = store.apply(project, &intent, &args.options())?;
    if json {
        return print_json(&outcome);
    }

    if args.diff || args.dry_run {
        display_diff(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &EditOutcome) {
    if outcome.dry_run {
        println!(
            "{}",
            format!("[DRY RUN] {} would be {}", outcome.path, change_verb(outcome.change)).cyan()
        );
        return;
    }

    println!(
        "{} {} {}",
        "✓".green(),
        outcome.path,
        change_verb(outcome.change)
    );
    match &outcome.commit {
        Some(commit) => println!("  commit {}", commit.yellow()),
        None => println!("  {}", "nothing to commit".dimmed()),
    }
    if outcome.pushed {
        let note = if outcome.retried {
            " (after replaying onto the remote)"
        } else {
            ""
        };
        println!("  {}{}", "pushed".green(), note.dimmed());
    } else {
        println!("  {}", "not pushed".yellow());
    }
}

fn change_verb(change: ChangeKind) -> &'static str {
    match change {
        ChangeKind::Created => "created",
        ChangeKind::Modified => "modified",
        ChangeKind::Deleted => "deleted",
        ChangeKind::Unchanged => "unchanged",
    }
}

fn display_diff(outcome: &EditOutcome) {
    let original = outcome.before.as_deref().unwrap_or("");
    let modified = outcome.after.as_deref().unwrap_or("");

    println!(
        "\n{}",
        format!("--- {} (original)", outcome.path).dimmed()
    );
    println!("{}", format!("+++ {} (modified)", outcome.path).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
    if !modified.ends_with('\n') && !modified.is_empty() {
        println!();
    }
}

/// Colorize a unified diff produced by git.
fn print_patch(patch: &str) {
    for line in patch.lines() {
        let styled = if line.starts_with("+++") || line.starts_with("---") {
            line.bold()
        } else if line.starts_with('+') {
            line.green()
        } else if line.starts_with('-') {
            line.red()
        } else if line.starts_with("@@") {
            line.cyan()
        } else {
            line.normal()
        };
        println!("{}", styled);
    }
}
