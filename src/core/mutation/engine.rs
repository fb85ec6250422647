use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::repair::{plan_repair, unique_id, RepairAction, RepairPlan};
use super::state::{transition, ModState};
use crate::core::downloader::{Downloader, Fetcher, RateLimiter, RetryPolicy};
use crate::core::error::{ModsError, ModsResult};
use crate::core::guard::{check_allowed, GuardDecision, OperationKind};
use crate::core::http::build_http_client;
use crate::core::manifest::layout::check_artifact_name;
use crate::core::manifest::{
    derive_mod_id, humanize_name, Manifest, ManifestStore, ModEntry, ModSource, ModsLayout,
    Placement, SourceKind,
};
use crate::core::reconcile::{reconcile, ReconciliationResult};
use crate::core::scanner::{hash_records, scan, scan_orphans, FileRecord};
use crate::core::server::{ComposeServer, ServerControl};
use crate::core::sources::{ResolvedMod, SourceRegistry, SourceRequest};
use crate::core::state::{Defaults, ServerSettings};

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    pub force: bool,
    pub adopt_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub manifest_path: PathBuf,
    pub adopted: Vec<String>,
}

/// Everything `add` accepts besides the source string itself.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub source: String,
    pub source_type: Option<SourceKind>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub disable: bool,
    pub manifest_only: bool,
    pub filename: Option<String>,
    pub loader: Option<String>,
    pub mc_version: Option<String>,
    pub version: Option<String>,
    pub project_id: Option<String>,
    pub force: bool,
    /// Version safety; only `--no-compat-check` clears it.
    pub check_compat: bool,
}

impl AddRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_type: None,
            id: None,
            name: None,
            disable: false,
            manifest_only: false,
            filename: None,
            loader: None,
            mc_version: None,
            version: None,
            project_id: None,
            force: false,
            check_compat: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoveMode {
    /// Delete the entry and its file.
    #[default]
    Both,
    /// Delete the entry only (`--keep-file`).
    KeepFile,
    /// Delete the file only, keeping a demoted entry.
    FileOnly,
}

impl RemoveMode {
    fn deletes_file(self) -> bool {
        !matches!(self, RemoveMode::KeepFile)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveReport {
    pub entry: ModEntry,
    pub deleted: Vec<PathBuf>,
    /// False when the entry was demoted instead of deleted.
    pub entry_removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleReport {
    pub entry: ModEntry,
    pub moved: Option<(PathBuf, PathBuf)>,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeOptions {
    pub keep_files: bool,
    pub yes: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub removed: usize,
    pub deleted: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub failed: Vec<(String, ModsError)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub manifest: Manifest,
    pub reconciliation: ReconciliationResult,
}

/// Orchestrates mutations over the manifest and the two mods directories.
pub struct ModsEngine {
    data_dir: PathBuf,
    store: ManifestStore,
    registry: SourceRegistry,
    downloader: Downloader,
    server: Arc<dyn ServerControl>,
    defaults: Defaults,
}

impl ModsEngine {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        registry: SourceRegistry,
        downloader: Downloader,
        server: Arc<dyn ServerControl>,
        defaults: Defaults,
    ) -> Self {
        let data_dir = data_dir.into();
        Self {
            store: ManifestStore::for_data_dir(&data_dir),
            data_dir,
            registry,
            downloader,
            server,
            defaults,
        }
    }

    /// Engine wired to the real HTTP stack and `docker compose`.
    pub fn from_settings(settings: &ServerSettings) -> ModsResult<Self> {
        let defaults = settings.defaults();
        let client = build_http_client(&defaults.user_agent)
            .map_err(|e| ModsError::Config(format!("Could not build HTTP client: {e}")))?;
        let fetcher = Arc::new(Fetcher::new(
            client,
            Arc::new(RateLimiter::default()),
            RetryPolicy::default(),
        ));
        let registry = SourceRegistry::with_builtin(fetcher.clone(), defaults.api_key.clone());
        let server = Arc::new(ComposeServer::new(
            &settings.server_root,
            &settings.docker_service,
        ));
        Ok(Self::new(
            &settings.data_dir,
            registry,
            Downloader::new(fetcher),
            server,
            defaults,
        ))
    }

    pub fn manifest_path(&self) -> &Path {
        self.store.path()
    }

    pub fn server(&self) -> &Arc<dyn ServerControl> {
        &self.server
    }

    async fn load(&self) -> ModsResult<(Manifest, ModsLayout)> {
        let manifest = self.store.load().await?;
        let layout = ModsLayout::for_manifest(&self.data_dir, &manifest);
        Ok((manifest, layout))
    }

    async fn guard(&self, op: OperationKind, force: bool) -> ModsResult<GuardDecision> {
        if !op.touches_files() {
            return Ok(GuardDecision::Allowed);
        }
        let running = self.server.is_running().await;
        check_allowed(op, running, force)
    }

    // ── init ────────────────────────────────────────────

    pub async fn init(&self, options: InitOptions) -> ModsResult<InitReport> {
        if self.store.exists().await && !options.force {
            return Err(ModsError::ManifestExists(self.store.path().to_path_buf()));
        }

        let mut manifest = Manifest::new(
            self.defaults.loader.clone(),
            self.defaults.minecraft_version.clone(),
        );
        let layout = ModsLayout::for_manifest(&self.data_dir, &manifest);
        layout.ensure_dirs().await?;

        let mut adopted = Vec::new();
        if options.adopt_existing {
            let mut records = scan(&layout.mods_dir, &layout.disabled_dir).await?;
            records.retain(|r| r.directory == Placement::Enabled);
            hash_records(&mut records, |_| true).await?;

            let mut taken = HashSet::new();
            for record in &records {
                let id = unique_id(&derive_mod_id(&record.filename), &taken);
                taken.insert(id.clone());
                let entry = adopted_entry(&id, record, &manifest);
                manifest.add(entry)?;
                adopted.push(id);
            }
        }

        self.store.save(&manifest).await?;
        info!(
            "Initialised mods manifest at {:?} ({} adopted)",
            self.store.path(),
            adopted.len()
        );
        Ok(InitReport {
            manifest_path: self.store.path().to_path_buf(),
            adopted,
        })
    }

    // ── read-only ───────────────────────────────────────

    /// Reconcile the manifest against both directories, hashing the files
    /// that entries point at.
    pub async fn status(&self) -> ModsResult<StatusReport> {
        let (manifest, layout) = self.load().await?;
        let mut records = scan(&layout.mods_dir, &layout.disabled_dir).await?;
        let tracked: HashSet<&str> = manifest
            .mods
            .iter()
            .filter(|m| m.sha256().is_some())
            .map(|m| m.filename.as_str())
            .collect();
        hash_records(&mut records, |r| tracked.contains(r.filename.as_str())).await?;

        let reconciliation = reconcile(&manifest, &records);
        Ok(StatusReport {
            manifest,
            reconciliation,
        })
    }

    /// Same classification as `status`; callers treat any drift as failure.
    pub async fn validate(&self) -> ModsResult<ReconciliationResult> {
        let report = self.status().await?;
        if report.reconciliation.is_clean() {
            debug!("Manifest and filesystem agree");
        } else {
            let summary = report.reconciliation.summary();
            warn!(
                "Drift detected: {} missing, {} misplaced, {} modified, {} untracked",
                summary.missing, summary.misplaced, summary.modified, summary.extras
            );
        }
        Ok(report.reconciliation)
    }

    // ── add ─────────────────────────────────────────────

    pub async fn add(&self, request: AddRequest) -> ModsResult<ModEntry> {
        let (mut manifest, layout) = self.load().await?;

        let mut source = SourceRequest::parse(&request.source, request.source_type)
            .map_err(|e| ModsError::resolution(&request.source, e))?;
        if request.version.is_some() {
            source.version_id = request.version.clone();
        }
        source.project_id = request.project_id.clone();
        source.filename_override = request.filename.clone();
        source.loader = request.loader.clone();
        source.mc_version = request.mc_version.clone();
        source.check_compat = request.check_compat;
        SourceRegistry::apply_defaults(&mut source, &mut manifest, &self.defaults);

        let entry = if request.manifest_only {
            self.guard(OperationKind::MetadataEdit, request.force).await?;
            manifest_only_entry(&request, &source, &manifest)?
        } else {
            self.guard(OperationKind::Install, request.force).await?;
            self.install(&request, &source, &manifest, &layout).await?
        };

        let result = entry.clone();
        manifest.add(entry)?;
        self.store.save(&manifest).await?;
        info!("Added '{}' ({})", result.id, result.filename);
        Ok(result)
    }

    async fn install(
        &self,
        request: &AddRequest,
        source: &SourceRequest,
        manifest: &Manifest,
        layout: &ModsLayout,
    ) -> ModsResult<ModEntry> {
        let resolved = self.registry.resolve(source).await?;
        let id = request
            .id
            .clone()
            .or_else(|| resolved.suggested_id.clone())
            .unwrap_or_else(|| derive_mod_id(&resolved.filename));
        let placement = if request.disable {
            Placement::Disabled
        } else {
            Placement::Enabled
        };
        check_free(manifest, &id, &resolved.filename, placement, None)?;

        let mut entry = self
            .place_artifact(&id, &resolved, layout.path_of(&resolved.filename, placement))
            .await?;
        entry.name = request
            .name
            .clone()
            .or_else(|| resolved.name.clone())
            .or_else(|| Some(humanize_name(&entry.id)));
        entry.enabled = placement == Placement::Enabled;
        entry.loader = resolved.recorded_loader(source.loader.as_deref());
        entry.mc_version = resolved.recorded_mc_version(source.mc_version.as_deref());
        transition(&entry.id, ModState::Staged, ModState::of(&entry));
        Ok(entry)
    }

    /// Stage then commit an artifact, returning a fresh entry describing it.
    async fn place_artifact(
        &self,
        id: &str,
        resolved: &ResolvedMod,
        target: PathBuf,
    ) -> ModsResult<ModEntry> {
        transition(id, ModState::Absent, ModState::Staged);
        let staged = self.downloader.stage(resolved, &target).await?;
        let sha256 = staged.sha256.clone();
        staged.commit().await?;

        let mut entry = ModEntry::new(id, &resolved.filename, resolved.source.clone());
        entry.version = resolved.version.clone();
        entry.installed_at = Some(Utc::now());
        entry.hashes = resolved.hashes.clone();
        entry.hashes.sha256 = Some(sha256);
        Ok(entry)
    }

    // ── remove ──────────────────────────────────────────

    pub async fn remove(&self, id: &str, mode: RemoveMode, force: bool) -> ModsResult<RemoveReport> {
        let (mut manifest, layout) = self.load().await?;
        let entry = manifest.find(id)?.clone();
        self.guard(
            OperationKind::Remove {
                with_file: mode.deletes_file(),
            },
            force,
        )
        .await?;

        let mut deleted = Vec::new();
        if mode.deletes_file() {
            for path in owned_paths(&manifest, &entry, &layout) {
                if delete_artifact(&path).await? {
                    deleted.push(path);
                }
            }
        }

        let entry_removed = mode != RemoveMode::FileOnly;
        let entry = if entry_removed {
            manifest.remove(id)?
        } else {
            let demoted = manifest.find_mut(id)?;
            demoted.hashes.sha256 = None;
            demoted.installed_at = None;
            demoted.clone()
        };
        self.store.save(&manifest).await?;

        if entry_removed {
            transition(id, ModState::of(&entry), ModState::Removed);
        }
        info!("Removed '{}' ({} file(s) deleted)", id, deleted.len());
        Ok(RemoveReport {
            entry,
            deleted,
            entry_removed,
        })
    }

    // ── enable / disable ────────────────────────────────

    pub async fn set_enabled(
        &self,
        id: &str,
        enabled: bool,
        move_file: bool,
        force: bool,
    ) -> ModsResult<ToggleReport> {
        let (mut manifest, layout) = self.load().await?;
        let entry = manifest.find(id)?.clone();
        if entry.enabled == enabled {
            debug!("'{}' is already {}", id, ModState::of(&entry));
            return Ok(ToggleReport {
                entry,
                moved: None,
                changed: false,
            });
        }

        if enabled {
            if let Some(owner) = manifest.enabled_owner_of(&entry.filename, Some(id)) {
                return Err(ModsError::FilenameInUse {
                    filename: entry.filename.clone(),
                    owner: owner.id.clone(),
                });
            }
        }
        self.guard(OperationKind::Toggle { move_file }, force).await?;

        let from = entry.expected_placement();
        let to = from.other();
        let mut moved = None;
        if move_file {
            let src = layout.path_of(&entry.filename, from);
            let dst = layout.path_of(&entry.filename, to);
            if path_exists(&src).await {
                move_artifact(&src, &dst).await?;
                moved = Some((src, dst));
            } else if path_exists(&dst).await {
                debug!("{:?} is already in place", dst);
            } else {
                warn!(
                    "No file for '{}' in {}/; only the manifest flag changes",
                    id, from
                );
            }
        }

        let updated = manifest.find_mut(id)?;
        updated.enabled = enabled;
        let updated = updated.clone();
        self.store.save(&manifest).await?;
        transition(id, ModState::of(&entry), ModState::of(&updated));

        Ok(ToggleReport {
            entry: updated,
            moved,
            changed: true,
        })
    }

    // ── purge ───────────────────────────────────────────

    pub async fn purge(&self, options: PurgeOptions) -> ModsResult<PurgeReport> {
        if !options.yes {
            return Err(ModsError::ConfirmationRequired {
                operation: "purge every mod".into(),
                flag: "--yes",
            });
        }
        let (mut manifest, layout) = self.load().await?;
        self.guard(
            OperationKind::Purge {
                with_files: !options.keep_files,
            },
            options.force,
        )
        .await?;

        let mut deleted = Vec::new();
        if !options.keep_files {
            for entry in &manifest.mods {
                for path in owned_paths(&manifest, entry, &layout) {
                    if delete_artifact(&path).await? {
                        deleted.push(path);
                    }
                }
            }
        }

        let removed = manifest.mods.len();
        manifest.mods.clear();
        self.store.save(&manifest).await?;
        info!("Purged {} mod(s), deleted {} file(s)", removed, deleted.len());
        Ok(PurgeReport { removed, deleted })
    }

    // ── sync ────────────────────────────────────────────

    /// Re-acquire every missing artifact from its recorded source.
    pub async fn sync(&self, force: bool) -> ModsResult<SyncReport> {
        let status = self.status().await?;
        let missing: Vec<String> = status
            .reconciliation
            .missing()
            .map(|s| s.id.clone())
            .collect();
        let mut report = SyncReport::default();
        if missing.is_empty() {
            info!("Nothing to sync");
            return Ok(report);
        }

        self.guard(OperationKind::Sync, force).await?;
        let mut manifest = status.manifest;
        let layout = ModsLayout::for_manifest(&self.data_dir, &manifest);
        layout.ensure_dirs().await?;

        for id in missing {
            match self.reinstall(&manifest, &layout, &id).await {
                Ok(fresh) => {
                    let entry = manifest.find_mut(&id)?;
                    entry.hashes.sha256 = fresh.hashes.sha256;
                    entry.installed_at = fresh.installed_at;
                    if entry.version.is_none() {
                        entry.version = fresh.version;
                    }
                    report.installed.push(id);
                }
                Err(e) => {
                    warn!("Could not sync '{}': {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }

        if !report.installed.is_empty() {
            self.store.save(&manifest).await?;
        }
        Ok(report)
    }

    async fn reinstall(&self, manifest: &Manifest, layout: &ModsLayout, id: &str) -> ModsResult<ModEntry> {
        let entry = manifest.find(id)?;
        let mut request = SourceRequest::from_source(&entry.source, &entry.filename)
            .map_err(|e| ModsError::resolution(id, e))?;
        request.loader = entry.loader.clone().or_else(|| manifest.loader.clone());
        request.mc_version = entry
            .mc_version
            .clone()
            .or_else(|| manifest.minecraft_version.clone());

        let resolved = self.registry.resolve(&request).await?;
        let target = layout.path_of(&entry.filename, entry.expected_placement());
        let fresh = self.place_artifact(id, &resolved, target).await?;
        transition(id, ModState::Staged, ModState::of(entry));
        Ok(fresh)
    }

    // ── repair ──────────────────────────────────────────

    /// Inspect both directories and compute what `apply_repair` would do.
    pub async fn plan_repair(&self) -> ModsResult<RepairPlan> {
        let (manifest, layout) = self.load().await?;
        let mut records = scan(&layout.mods_dir, &layout.disabled_dir).await?;
        hash_records(&mut records, |_| true).await?;
        let orphans = scan_orphans(&[&layout.mods_dir, &layout.disabled_dir]).await?;
        Ok(plan_repair(&manifest, &records, &orphans))
    }

    /// Execute a plan produced by `plan_repair`.
    pub async fn apply_repair(&self, plan: &RepairPlan, force: bool) -> ModsResult<usize> {
        if !plan.conflicts.is_empty() {
            return Err(ModsError::RepairConflicts(plan.conflicts.len()));
        }
        if plan.actions.is_empty() {
            return Ok(0);
        }
        self.guard(
            OperationKind::RepairApply {
                with_files: plan.touches_files(),
            },
            force,
        )
        .await?;

        let (mut manifest, layout) = self.load().await?;

        // Filesystem steps first; the manifest is written only if all succeed.
        for action in &plan.actions {
            match action {
                RepairAction::MoveMisplaced {
                    filename, from, to, ..
                } => {
                    move_artifact(&layout.path_of(filename, *from), &layout.path_of(filename, *to))
                        .await?;
                }
                RepairAction::RemoveOrphanTemp { path } => {
                    delete_artifact(path).await?;
                }
                _ => {}
            }
        }

        for action in &plan.actions {
            match action {
                RepairAction::AdoptExtra {
                    id,
                    filename,
                    directory,
                    sha256,
                } => {
                    let record = FileRecord {
                        filename: filename.clone(),
                        directory: *directory,
                        path: layout.path_of(filename, *directory),
                        size: 0,
                        sha256: Some(sha256.clone()),
                    };
                    let entry = adopted_entry(id, &record, &manifest);
                    manifest.add(entry)?;
                }
                RepairAction::DropMissing { id, .. } => {
                    manifest.remove(id)?;
                }
                RepairAction::RefreshHash { id, sha256, .. } => {
                    manifest.find_mut(id)?.hashes.sha256 = Some(sha256.clone());
                }
                RepairAction::MoveMisplaced { .. } | RepairAction::RemoveOrphanTemp { .. } => {}
            }
        }

        self.store.save(&manifest).await?;
        info!("Applied {} repair action(s)", plan.actions.len());
        Ok(plan.actions.len())
    }

    // ── lifecycle ───────────────────────────────────────

    pub async fn restart(&self) -> ModsResult<()> {
        self.server.request_restart().await
    }
}

fn adopted_entry(id: &str, record: &FileRecord, manifest: &Manifest) -> ModEntry {
    let mut entry = ModEntry::new(
        id,
        &record.filename,
        ModSource::Local {
            path: Some(record.path.clone()),
        },
    );
    entry.name = Some(humanize_name(id));
    entry.enabled = record.directory == Placement::Enabled;
    entry.loader = manifest.loader.clone();
    entry.mc_version = manifest.minecraft_version.clone();
    entry.installed_at = Some(Utc::now());
    entry.hashes.sha256 = record.sha256.clone();
    entry
}

fn manifest_only_entry(
    request: &AddRequest,
    source: &SourceRequest,
    manifest: &Manifest,
) -> ModsResult<ModEntry> {
    let filename = request.filename.clone().ok_or_else(|| {
        ModsError::Other("--manifest-only requires --filename".into())
    })?;
    check_artifact_name(&filename).map_err(ModsError::InvalidFilename)?;
    let id = request
        .id
        .clone()
        .unwrap_or_else(|| derive_mod_id(&filename));
    let placement = if request.disable {
        Placement::Disabled
    } else {
        Placement::Enabled
    };
    check_free(manifest, &id, &filename, placement, None)?;

    let mut entry = ModEntry::new(&id, filename, source.to_source());
    entry.name = Some(request.name.clone().unwrap_or_else(|| humanize_name(&id)));
    entry.enabled = placement == Placement::Enabled;
    entry.version = request.version.clone();
    entry.loader = source.loader.clone();
    entry.mc_version = source.mc_version.clone();
    entry.notes = Some("Manifest entry only".into());
    Ok(entry)
}

/// Reject a new entry whose id is taken or whose target path belongs to
/// another entry.
fn check_free(
    manifest: &Manifest,
    id: &str,
    filename: &str,
    placement: Placement,
    except: Option<&str>,
) -> ModsResult<()> {
    if manifest.contains(id) && Some(id) != except {
        return Err(ModsError::DuplicateMod(id.to_string()));
    }
    let owner = manifest.mods.iter().find(|m| {
        m.filename == filename
            && m.expected_placement() == placement
            && Some(m.id.as_str()) != except
    });
    match owner {
        Some(owner) => Err(ModsError::FilenameInUse {
            filename: filename.to_string(),
            owner: owner.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Paths that hold `entry`'s file: its expected location, plus the other
/// directory unless another entry expects its file there.
fn owned_paths(manifest: &Manifest, entry: &ModEntry, layout: &ModsLayout) -> Vec<PathBuf> {
    let expected = entry.expected_placement();
    let other = expected.other();
    let mut paths = vec![layout.path_of(&entry.filename, expected)];
    let claimed_elsewhere = manifest.mods.iter().any(|m| {
        m.id != entry.id && m.filename == entry.filename && m.expected_placement() == other
    });
    if !claimed_elsewhere {
        paths.push(layout.path_of(&entry.filename, other));
    }
    paths
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Delete a file; `Ok(false)` if it was already gone.
async fn delete_artifact(path: &Path) -> ModsResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Deleted {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ModsError::io(path, e)),
    }
}

/// Rename between the sibling mods directories, never overwriting.
async fn move_artifact(from: &Path, to: &Path) -> ModsResult<()> {
    if path_exists(to).await {
        return Err(ModsError::io(
            to,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "destination exists"),
        ));
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ModsError::io(parent, e))?;
    }
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| ModsError::io(from, e))?;
    info!("Moved {:?} -> {:?}", from, to);
    Ok(())
}
