use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::error::{ModsError, ModsResult};
use crate::core::manifest::SourceKind;
use crate::core::mutation::{
    AddRequest, InitOptions, ModsEngine, PurgeOptions, RemoveMode, RepairPlan, StatusReport,
};
use crate::core::reconcile::ReconciliationResult;
use crate::core::sources::expand_home;
use crate::core::state::settings::{
    load_user_config, save_user_config, user_config_path, CONFIG_FILE_NAME,
};
use crate::core::state::ServerSettings;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// `validate` found drift between the manifest and the filesystem.
pub const EXIT_DRIFT: i32 = 2;
/// A file mutation was refused because the server is running.
pub const EXIT_SERVER_RUNNING: i32 = 3;

pub fn exit_code(err: &ModsError) -> i32 {
    match err {
        ModsError::ServerRunning { .. } => EXIT_SERVER_RUNNING,
        _ => EXIT_FAILURE,
    }
}

// ─── Arguments ──────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum ModsCommand {
    /// Create the mods manifest in the server data directory
    Init {
        /// Overwrite an existing manifest
        #[arg(long)]
        force: bool,
        /// Track the archives already in the mods directory
        #[arg(long)]
        adopt_existing: bool,
    },
    /// Show manifest summary and filesystem drift
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List tracked mods with their condition
    List {
        #[arg(long)]
        json: bool,
        /// Hide untracked files
        #[arg(long)]
        no_extras: bool,
    },
    /// Add a mod and copy or download its file
    Add(AddArgs),
    /// Remove mods from the manifest and disk
    Remove(RemoveArgs),
    /// Enable mods, moving their files back into the mods directory
    Enable(ToggleArgs),
    /// Disable mods, moving their files into mods-disabled
    Disable(ToggleArgs),
    /// Exit non-zero when the manifest and filesystem disagree
    Validate {
        #[arg(long)]
        json: bool,
    },
    /// Remove every mod
    Purge {
        /// Only clear the manifest
        #[arg(long)]
        keep_files: bool,
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
        #[command(flatten)]
        guard: GuardArgs,
    },
    /// Download or copy every tracked mod whose file is missing
    Sync {
        #[command(flatten)]
        guard: GuardArgs,
    },
    /// Plan (and with --apply, execute) fixes for drift
    Repair {
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        guard: GuardArgs,
    },
    /// Restart the server container
    Restart,
}

#[derive(Debug, Clone, Copy, Default, Args)]
pub struct GuardArgs {
    /// Allow the change while the server is running
    #[arg(long)]
    pub force: bool,
    /// Restart the server after a successful change
    #[arg(long)]
    pub restart: bool,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Local path, URL, or registry identifier (e.g. modrinth:lithium)
    pub source: String,
    /// Explicit manifest id
    #[arg(long = "id")]
    pub mod_id: Option<String>,
    /// Human readable name
    #[arg(long)]
    pub name: Option<String>,
    /// Add the mod disabled
    #[arg(long)]
    pub disable: bool,
    /// Record the entry without any file step
    #[arg(long, requires = "filename")]
    pub manifest_only: bool,
    /// Destination filename
    #[arg(long)]
    pub filename: Option<String>,
    /// Skip source type detection (local, url, modrinth, curseforge)
    #[arg(long, value_parser = parse_source_kind)]
    pub source_type: Option<SourceKind>,
    /// Loader to resolve for; defaults to the manifest loader
    #[arg(long)]
    pub loader: Option<String>,
    /// Minecraft version to resolve for; defaults to the manifest version
    #[arg(long)]
    pub mc_version: Option<String>,
    /// Specific remote version or file id
    #[arg(long)]
    pub version: Option<String>,
    /// Explicit Modrinth or CurseForge project id
    #[arg(long)]
    pub project_id: Option<String>,
    /// Accept builds that do not declare the loader or Minecraft version
    #[arg(long)]
    pub no_compat_check: bool,
    #[command(flatten)]
    pub guard: GuardArgs,
}

impl AddArgs {
    fn into_request(self) -> AddRequest {
        AddRequest {
            source: self.source,
            source_type: self.source_type,
            id: self.mod_id,
            name: self.name,
            disable: self.disable,
            manifest_only: self.manifest_only,
            filename: self.filename,
            loader: self.loader,
            mc_version: self.mc_version,
            version: self.version,
            project_id: self.project_id,
            force: self.guard.force,
            check_compat: !self.no_compat_check,
        }
    }
}

fn parse_source_kind(raw: &str) -> Result<SourceKind, String> {
    SourceKind::parse(raw).ok_or_else(|| format!("unknown source type '{raw}'"))
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Manifest mod ids
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Drop the manifest entry but leave the file on disk
    #[arg(long, conflicts_with = "file_only")]
    pub keep_file: bool,
    /// Delete the file but keep the manifest entry
    #[arg(long)]
    pub file_only: bool,
    #[command(flatten)]
    pub guard: GuardArgs,
}

impl RemoveArgs {
    fn mode(&self) -> RemoveMode {
        if self.keep_file {
            RemoveMode::KeepFile
        } else if self.file_only {
            RemoveMode::FileOnly
        } else {
            RemoveMode::Both
        }
    }
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    /// Manifest mod ids
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Only flip the manifest flag
    #[arg(long)]
    pub no_move: bool,
    #[command(flatten)]
    pub guard: GuardArgs,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the per-user config
    Show,
    /// Remember a default server root
    SetRoot { path: PathBuf },
    /// Forget the default server root
    ClearRoot,
}

// ─── mods ───────────────────────────────────────────────

/// Load settings for `root` and run one `mods` subcommand.
pub async fn mods(root: Option<&Path>, command: ModsCommand) -> ModsResult<i32> {
    let settings = ServerSettings::load(root)?;
    debug!(
        "Server root {:?}, data dir {:?}",
        settings.server_root, settings.data_dir
    );
    let engine = ModsEngine::from_settings(&settings)?;
    run_mods(&engine, command).await
}

pub async fn run_mods(engine: &ModsEngine, command: ModsCommand) -> ModsResult<i32> {
    match command {
        ModsCommand::Init {
            force,
            adopt_existing,
        } => {
            let report = engine
                .init(InitOptions {
                    force,
                    adopt_existing,
                })
                .await?;
            println!(
                "Initialised mods manifest at {}",
                report.manifest_path.display()
            );
            if !report.adopted.is_empty() {
                println!(
                    "Adopted {} existing mod(s): {}",
                    report.adopted.len(),
                    report.adopted.join(", ")
                );
            }
            Ok(EXIT_OK)
        }
        ModsCommand::Status { json } => {
            let report = engine.status().await?;
            if json {
                print_json(&report)?;
            } else {
                print_status(engine, &report);
            }
            Ok(EXIT_OK)
        }
        ModsCommand::List { json, no_extras } => {
            let report = engine.status().await?;
            if json {
                print_json(&report)?;
            } else {
                print_list(&report, !no_extras);
            }
            Ok(EXIT_OK)
        }
        ModsCommand::Add(args) => {
            let guard = args.guard;
            let entry = engine.add(args.into_request()).await?;
            let state = if entry.enabled { "enabled" } else { "disabled" };
            let placement = if entry.hashes.sha256.is_some() {
                format!("{}/{}", entry.expected_placement(), entry.filename)
            } else {
                format!("{} (manifest only)", entry.filename)
            };
            println!("Added '{}' {} ({})", entry.id, placement, state);
            finish(engine, guard.restart, true).await?;
            Ok(EXIT_OK)
        }
        ModsCommand::Remove(args) => {
            let mode = args.mode();
            let mut batch = Batch::default();
            for id in &args.ids {
                let result = engine.remove(id, mode, args.guard.force).await;
                if let Some(report) = batch.record(id, result) {
                    batch.changed += 1;
                    match (report.entry_removed, report.deleted.len()) {
                        (true, 0) => println!("Removed '{id}'"),
                        (true, n) => println!("Removed '{id}' and {n} file(s)"),
                        (false, n) => println!("Deleted {n} file(s) of '{id}'; entry kept"),
                    }
                }
            }
            batch.finish(engine, args.guard.restart).await
        }
        ModsCommand::Enable(args) => toggle(engine, args, true).await,
        ModsCommand::Disable(args) => toggle(engine, args, false).await,
        ModsCommand::Validate { json } => {
            let result = engine.validate().await?;
            if json {
                print_json(&result)?;
            } else if result.is_clean() {
                println!("Manifest and filesystem are in sync");
            } else {
                print_drift(&result);
            }
            Ok(if result.is_clean() { EXIT_OK } else { EXIT_DRIFT })
        }
        ModsCommand::Purge {
            keep_files,
            yes,
            guard,
        } => {
            let report = engine
                .purge(PurgeOptions {
                    keep_files,
                    yes,
                    force: guard.force,
                })
                .await?;
            println!(
                "Purged {} mod(s), deleted {} file(s)",
                report.removed,
                report.deleted.len()
            );
            finish(engine, guard.restart, report.removed > 0).await?;
            Ok(EXIT_OK)
        }
        ModsCommand::Sync { guard } => {
            let report = engine.sync(guard.force).await?;
            if report.installed.is_empty() && report.failed.is_empty() {
                println!("Every tracked mod is present");
            }
            for id in &report.installed {
                println!("Installed '{id}'");
            }
            let mut code = EXIT_OK;
            for (id, err) in &report.failed {
                eprintln!("{id}: {err}");
                code = code.max(exit_code(err));
            }
            finish(engine, guard.restart, !report.installed.is_empty()).await?;
            Ok(code)
        }
        ModsCommand::Repair { apply, json, guard } => {
            let plan = engine.plan_repair().await?;
            if json {
                print_json(&plan)?;
            } else {
                print_plan(&plan);
            }
            if !apply || plan.is_empty() {
                if !json && !plan.actions.is_empty() {
                    println!("Run again with --apply to execute the plan");
                }
                return Ok(EXIT_OK);
            }
            let applied = engine.apply_repair(&plan, guard.force).await?;
            println!("Applied {applied} repair action(s)");
            finish(engine, guard.restart, applied > 0).await?;
            Ok(EXIT_OK)
        }
        ModsCommand::Restart => {
            engine.restart().await?;
            println!("Server restarted");
            Ok(EXIT_OK)
        }
    }
}

async fn toggle(engine: &ModsEngine, args: ToggleArgs, enabled: bool) -> ModsResult<i32> {
    let mut batch = Batch::default();
    for id in &args.ids {
        let result = engine
            .set_enabled(id, enabled, !args.no_move, args.guard.force)
            .await;
        let Some(report) = batch.record(id, result) else {
            continue;
        };
        if report.changed {
            batch.changed += 1;
        }
        let verb = if enabled { "Enabled" } else { "Disabled" };
        match (report.changed, report.moved) {
            (false, _) => println!("'{id}' is already {}", verb.to_lowercase()),
            (true, Some((_, to))) => println!("{verb} '{id}' -> {}", to.display()),
            (true, None) => println!("{verb} '{id}'"),
        }
    }
    batch.finish(engine, args.guard.restart).await
}

/// Per-id outcomes of a multi-id command. One failure never stops the rest.
#[derive(Debug, Default)]
struct Batch {
    changed: usize,
    code: i32,
}

impl Batch {
    fn record<T>(&mut self, id: &str, result: ModsResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                eprintln!("{id}: {err}");
                self.code = self.code.max(exit_code(&err));
                None
            }
        }
    }

    async fn finish(self, engine: &ModsEngine, restart: bool) -> ModsResult<i32> {
        finish(engine, restart, self.changed > 0).await?;
        Ok(self.code)
    }
}

async fn finish(engine: &ModsEngine, restart: bool, changed: bool) -> ModsResult<()> {
    if restart && changed {
        engine.restart().await?;
        println!("Server restarted");
    }
    Ok(())
}

// ─── config ─────────────────────────────────────────────

pub fn config(command: ConfigCommand) -> ModsResult<i32> {
    let mut user = load_user_config()?;
    match command {
        ConfigCommand::Show => {
            let root = user
                .server_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".into());
            let file = user_config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(unavailable)".into());
            print!(
                "{}",
                render_table(
                    &["Field", "Value"],
                    &[
                        vec!["Server root".into(), root],
                        vec!["File".into(), file],
                    ],
                )
            );
        }
        ConfigCommand::SetRoot { path } => {
            let raw = path.to_string_lossy();
            let expanded = expand_home(&raw);
            let resolved =
                std::fs::canonicalize(&expanded).map_err(|e| ModsError::io(&expanded, e))?;
            if !resolved.is_dir() {
                return Err(ModsError::Config(format!(
                    "{} is not a directory",
                    resolved.display()
                )));
            }
            if !resolved.join(CONFIG_FILE_NAME).exists() {
                eprintln!(
                    "Warning: {} has no {CONFIG_FILE_NAME} yet; commands will fail until it exists",
                    resolved.display()
                );
            }
            user.server_root = Some(resolved.clone());
            let saved = save_user_config(&user)?;
            info!("Default server root set to {:?}", resolved);
            println!("Default server root set to {}", resolved.display());
            println!("Saved to {}", saved.display());
        }
        ConfigCommand::ClearRoot => {
            user.server_root = None;
            save_user_config(&user)?;
            println!("Cleared stored server root");
        }
    }
    Ok(EXIT_OK)
}

// ─── Output ─────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> ModsResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(engine: &ModsEngine, report: &StatusReport) {
    let manifest = &report.manifest;
    let summary = report.reconciliation.summary();
    println!("Manifest   {}", engine.manifest_path().display());
    println!(
        "Loader     {} (Minecraft {})",
        manifest.loader.as_deref().unwrap_or("unknown"),
        manifest.minecraft_version.as_deref().unwrap_or("unknown")
    );
    println!();
    let rows = [
        ("Tracked mods", summary.total),
        ("Healthy", summary.in_sync),
        ("Missing", summary.missing),
        ("Misplaced", summary.misplaced),
        ("Hash mismatch", summary.modified),
        ("Extras", summary.extras),
    ]
    .into_iter()
    .map(|(label, count)| vec![label.to_string(), count.to_string()])
    .collect::<Vec<_>>();
    print!("{}", render_table(&["Metric", "Value"], &rows));
    print_extras(&report.reconciliation);
}

fn print_list(report: &StatusReport, show_extras: bool) {
    if report.manifest.mods.is_empty() {
        println!("No mods tracked");
    } else {
        let rows = report
            .manifest
            .mods
            .iter()
            .map(|entry| {
                let condition = report
                    .reconciliation
                    .status_of(&entry.id)
                    .map(|(c, _)| c.to_string())
                    .unwrap_or_else(|| "-".into());
                vec![
                    entry.id.clone(),
                    entry.name.clone().unwrap_or_else(|| "-".into()),
                    entry.filename.clone(),
                    if entry.enabled { "yes" } else { "no" }.into(),
                    condition,
                    entry.source.kind().to_string(),
                    entry.version.clone().unwrap_or_else(|| "-".into()),
                ]
            })
            .collect::<Vec<_>>();
        print!(
            "{}",
            render_table(
                &["ID", "Name", "Filename", "Enabled", "Status", "Source", "Version"],
                &rows
            )
        );
    }
    if show_extras {
        print_extras(&report.reconciliation);
    }
}

fn print_extras(result: &ReconciliationResult) {
    if result.filesystem_only.is_empty() {
        return;
    }
    println!();
    println!("Untracked files:");
    let rows = result
        .filesystem_only
        .iter()
        .map(|extra| vec![extra.filename.clone(), format!("{}/", extra.directory)])
        .collect::<Vec<_>>();
    print!("{}", render_table(&["Filename", "Location"], &rows));
}

fn print_drift(result: &ReconciliationResult) {
    for status in result.missing() {
        println!(
            "missing        {} ({} not found in {}/)",
            status.id, status.filename, status.expected
        );
    }
    for status in result.misplaced() {
        if let Some(found) = status.misplaced {
            println!(
                "misplaced      {} ({} is in {}/, expected {}/)",
                status.id, status.filename, found, status.expected
            );
        }
    }
    for status in &result.modified {
        println!("hash-mismatch  {} ({})", status.id, status.filename);
    }
    for extra in &result.filesystem_only {
        println!("untracked      {}/{}", extra.directory, extra.filename);
    }
}

fn print_plan(plan: &RepairPlan) {
    if plan.is_empty() {
        println!("Nothing to repair");
        return;
    }
    for action in &plan.actions {
        println!("  {action}");
    }
    for conflict in &plan.conflicts {
        println!("  conflict: {conflict}");
    }
}

/// Left-aligned columns separated by two spaces.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = render_row(headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&render_row(&rule.iter().map(String::as_str).collect::<Vec<_>>(), &widths));
    for row in rows {
        out.push_str(&render_row(&row.iter().map(String::as_str).collect::<Vec<_>>(), &widths));
    }
    out
}

fn render_row(cells: &[&str], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", line.trim_end())
}
