mod common;

use common::{exists, Fixture};
use msc_lib::core::error::ModsError;
use msc_lib::core::mutation::{AddRequest, InitOptions, PurgeOptions, RemoveMode, RepairAction};
use msc_lib::core::reconcile::Condition;

#[tokio::test]
async fn init_creates_manifest_once() {
    let fx = Fixture::new();
    let report = fx.engine.init(InitOptions::default()).await.unwrap();

    assert!(exists(&report.manifest_path));
    assert!(exists(fx.mods_dir()));
    assert!(exists(fx.disabled_dir()));
    let manifest = fx.manifest();
    assert_eq!(manifest.loader.as_deref(), Some("fabric"));
    assert_eq!(manifest.minecraft_version.as_deref(), Some("1.21.1"));

    let again = fx.engine.init(InitOptions::default()).await;
    assert!(matches!(again, Err(ModsError::ManifestExists(_))));

    let forced = fx
        .engine
        .init(InitOptions {
            force: true,
            adopt_existing: false,
        })
        .await;
    assert!(forced.is_ok());
}

#[tokio::test]
async fn init_adopts_archives_already_present() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.mods_dir()).unwrap();
    std::fs::write(fx.mods_dir().join("Lithium-0.14.jar"), b"lithium").unwrap();
    std::fs::write(fx.mods_dir().join("extra.zip"), b"zip").unwrap();
    std::fs::write(fx.mods_dir().join("README.txt"), b"not a mod").unwrap();

    let report = fx
        .engine
        .init(InitOptions {
            force: false,
            adopt_existing: true,
        })
        .await
        .unwrap();

    // Scan order is by filename, byte-wise.
    assert_eq!(report.adopted, vec!["lithium-0-14", "extra"]);
    let status = fx.engine.status().await.unwrap();
    assert!(status.reconciliation.is_clean());
    assert_eq!(status.reconciliation.in_sync.len(), 2);
}

#[tokio::test]
async fn add_local_installs_and_reconciles() {
    let fx = Fixture::initialised().await;
    let source = fx.source_file("lithium.jar", b"lithium bytes");

    let entry = fx.engine.add(AddRequest::new(source)).await.unwrap();

    assert_eq!(entry.id, "lithium");
    assert!(entry.enabled);
    assert_eq!(entry.loader.as_deref(), Some("fabric"));
    assert!(entry.hashes.sha256.is_some());
    assert!(exists(fx.mods_dir().join("lithium.jar")));

    let status = fx.engine.status().await.unwrap();
    assert!(status.reconciliation.is_clean());
    assert_eq!(
        status.reconciliation.status_of("lithium").map(|(c, _)| c),
        Some(Condition::Ok)
    );
}

#[tokio::test]
async fn add_disabled_lands_in_disabled_dir() {
    let fx = Fixture::initialised().await;
    let mut request = AddRequest::new(fx.source_file("ferrite.jar", b"ferrite"));
    request.disable = true;
    request.id = Some("ferrite-core".into());

    let entry = fx.engine.add(request).await.unwrap();

    assert_eq!(entry.id, "ferrite-core");
    assert!(!entry.enabled);
    assert!(exists(fx.disabled_dir().join("ferrite.jar")));
    assert!(!exists(fx.mods_dir().join("ferrite.jar")));
}

#[tokio::test]
async fn add_is_refused_while_server_runs() {
    let fx = Fixture::initialised().await;
    let source = fx.source_file("lithium.jar", b"lithium");
    fx.server.set_running(true);

    let refused = fx.engine.add(AddRequest::new(source.clone())).await;

    assert!(matches!(refused, Err(ModsError::ServerRunning { .. })));
    assert!(fx.manifest().mods.is_empty());
    assert!(!exists(fx.mods_dir().join("lithium.jar")));

    let mut forced = AddRequest::new(source);
    forced.force = true;
    assert!(fx.engine.add(forced).await.is_ok());
    assert_eq!(fx.manifest().mods.len(), 1);
}

#[tokio::test]
async fn manifest_only_add_rejects_paths_outside_the_mods_tree() {
    let fx = Fixture::initialised().await;
    let victim = fx.root.path().join("server.properties");
    std::fs::write(&victim, b"motd=hello").unwrap();

    let mut request = AddRequest::new("modrinth:evil");
    request.manifest_only = true;
    request.id = Some("evil".into());
    request.filename = Some("../../server.properties".into());
    let added = fx.engine.add(request).await;

    assert!(matches!(added, Err(ModsError::InvalidFilename(_))));
    assert!(fx.manifest().mods.is_empty());
    assert!(exists(&victim));
}

#[tokio::test]
async fn hand_edited_escaping_filename_is_refused_on_load() {
    let fx = Fixture::initialised().await;
    let victim = fx.root.path().join("server.properties");
    std::fs::write(&victim, b"motd=hello").unwrap();
    let manifest = serde_json::json!({
        "schema_version": msc_lib::core::manifest::CURRENT_SCHEMA_VERSION,
        "mods_dir": "mods",
        "mods": [{
            "id": "evil",
            "filename": "../../server.properties",
            "source": { "type": "local" }
        }]
    });
    std::fs::write(fx.engine.manifest_path(), manifest.to_string()).unwrap();

    let removed = fx.engine.remove("evil", RemoveMode::Both, false).await;
    assert!(matches!(removed, Err(ModsError::CorruptManifest(_))));
    let purged = fx
        .engine
        .purge(PurgeOptions {
            keep_files: false,
            yes: true,
            force: false,
        })
        .await;
    assert!(matches!(purged, Err(ModsError::CorruptManifest(_))));
    assert!(exists(&victim));
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let fx = Fixture::initialised().await;
    let source = fx.source_file("lithium.jar", b"lithium");
    fx.engine.add(AddRequest::new(source.clone())).await.unwrap();

    let again = fx.engine.add(AddRequest::new(source)).await;

    assert!(matches!(again, Err(ModsError::DuplicateMod(id)) if id == "lithium"));
    assert_eq!(fx.manifest().mods.len(), 1);
}

#[tokio::test]
async fn manifest_only_add_skips_files_and_guard() {
    let fx = Fixture::initialised().await;
    fx.server.set_running(true);
    let mut request = AddRequest::new("modrinth:future-mod");
    request.manifest_only = true;
    request.filename = Some("future-mod.jar".into());

    let entry = fx.engine.add(request).await.unwrap();

    assert_eq!(entry.id, "future-mod");
    assert!(entry.hashes.sha256.is_none());
    assert!(!exists(fx.mods_dir().join("future-mod.jar")));
    let status = fx.engine.status().await.unwrap();
    assert_eq!(status.reconciliation.missing().count(), 1);
}

#[tokio::test]
async fn disable_and_enable_move_files() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("lithium.jar", b"lithium")))
        .await
        .unwrap();

    let report = fx
        .engine
        .set_enabled("lithium", false, true, false)
        .await
        .unwrap();
    assert!(report.changed);
    assert!(report.moved.is_some());
    assert!(exists(fx.disabled_dir().join("lithium.jar")));
    assert!(!exists(fx.mods_dir().join("lithium.jar")));
    assert!(fx.engine.status().await.unwrap().reconciliation.is_clean());

    let unchanged = fx
        .engine
        .set_enabled("lithium", false, true, false)
        .await
        .unwrap();
    assert!(!unchanged.changed);

    fx.engine
        .set_enabled("lithium", true, true, false)
        .await
        .unwrap();
    assert!(exists(fx.mods_dir().join("lithium.jar")));
    assert!(fx.engine.status().await.unwrap().reconciliation.is_clean());
}

#[tokio::test]
async fn toggle_without_move_leaves_file_misplaced_until_repair() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("lithium.jar", b"lithium")))
        .await
        .unwrap();

    fx.engine
        .set_enabled("lithium", false, false, false)
        .await
        .unwrap();
    let status = fx.engine.status().await.unwrap();
    assert_eq!(status.reconciliation.misplaced().count(), 1);

    let plan = fx.engine.plan_repair().await.unwrap();
    assert!(matches!(
        plan.actions.as_slice(),
        [RepairAction::MoveMisplaced { id, .. }] if id == "lithium"
    ));
    fx.engine.apply_repair(&plan, false).await.unwrap();

    assert!(exists(fx.disabled_dir().join("lithium.jar")));
    assert!(fx.engine.status().await.unwrap().reconciliation.is_clean());
    assert!(fx.engine.plan_repair().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_modes() {
    let fx = Fixture::initialised().await;
    for name in ["a.jar", "b.jar", "c.jar"] {
        fx.engine
            .add(AddRequest::new(fx.source_file(name, name.as_bytes())))
            .await
            .unwrap();
    }

    let both = fx.engine.remove("a", RemoveMode::Both, false).await.unwrap();
    assert!(both.entry_removed);
    assert_eq!(both.deleted.len(), 1);
    assert!(!exists(fx.mods_dir().join("a.jar")));

    let keep = fx
        .engine
        .remove("b", RemoveMode::KeepFile, false)
        .await
        .unwrap();
    assert!(keep.deleted.is_empty());
    assert!(exists(fx.mods_dir().join("b.jar")));

    let file_only = fx
        .engine
        .remove("c", RemoveMode::FileOnly, false)
        .await
        .unwrap();
    assert!(!file_only.entry_removed);
    assert!(!exists(fx.mods_dir().join("c.jar")));

    let manifest = fx.manifest();
    assert_eq!(manifest.mods.len(), 1);
    assert_eq!(manifest.mods[0].id, "c");
    assert!(manifest.mods[0].hashes.sha256.is_none());

    let summary = fx.engine.status().await.unwrap().reconciliation.summary();
    assert_eq!(summary.extras, 1);
    assert_eq!(summary.missing, 1);

    let unknown = fx.engine.remove("zzz", RemoveMode::Both, false).await;
    assert!(matches!(unknown, Err(ModsError::ModNotFound(_))));
}

#[tokio::test]
async fn remove_is_refused_while_server_runs() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("a.jar", b"a")))
        .await
        .unwrap();
    fx.server.set_running(true);

    let refused = fx.engine.remove("a", RemoveMode::Both, false).await;

    assert!(matches!(refused, Err(ModsError::ServerRunning { .. })));
    assert!(exists(fx.mods_dir().join("a.jar")));
    assert_eq!(fx.manifest().mods.len(), 1);

    // Dropping only the entry touches no files.
    let keep = fx.engine.remove("a", RemoveMode::KeepFile, false).await;
    assert!(keep.is_ok());
}

#[tokio::test]
async fn purge_needs_confirmation() {
    let fx = Fixture::initialised().await;
    for name in ["a.jar", "b.jar"] {
        fx.engine
            .add(AddRequest::new(fx.source_file(name, name.as_bytes())))
            .await
            .unwrap();
    }
    fx.engine.set_enabled("b", false, true, false).await.unwrap();

    let unconfirmed = fx.engine.purge(PurgeOptions::default()).await;
    assert!(matches!(
        unconfirmed,
        Err(ModsError::ConfirmationRequired { flag: "--yes", .. })
    ));
    assert_eq!(fx.manifest().mods.len(), 2);

    let report = fx
        .engine
        .purge(PurgeOptions {
            yes: true,
            ..PurgeOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.deleted.len(), 2);
    assert!(fx.manifest().mods.is_empty());
    assert!(!exists(fx.disabled_dir().join("b.jar")));
}

#[tokio::test]
async fn validate_reports_modified_files() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("a.jar", b"original")))
        .await
        .unwrap();
    assert!(fx.engine.validate().await.unwrap().is_clean());

    std::fs::write(fx.mods_dir().join("a.jar"), b"tampered").unwrap();

    let result = fx.engine.validate().await.unwrap();
    assert!(!result.is_clean());
    assert_eq!(result.modified.len(), 1);
    assert_eq!(
        result.status_of("a").map(|(c, _)| c),
        Some(Condition::HashMismatch)
    );

    // Repair accepts what is on disk.
    let plan = fx.engine.plan_repair().await.unwrap();
    assert!(matches!(
        plan.actions.as_slice(),
        [RepairAction::RefreshHash { .. }]
    ));
    fx.engine.apply_repair(&plan, false).await.unwrap();
    assert!(fx.engine.validate().await.unwrap().is_clean());
}

#[tokio::test]
async fn repair_adopts_extras_and_removes_orphans() {
    let fx = Fixture::initialised().await;
    std::fs::write(fx.mods_dir().join("Extra_Mod.jar"), b"extra").unwrap();
    let orphan = fx.mods_dir().join(".msc-tmp-0123abcd-lithium.jar");
    std::fs::write(&orphan, b"partial").unwrap();

    let plan = fx.engine.plan_repair().await.unwrap();
    assert_eq!(plan.actions.len(), 2);
    assert!(plan.touches_files());

    fx.server.set_running(true);
    let refused = fx.engine.apply_repair(&plan, false).await;
    assert!(matches!(refused, Err(ModsError::ServerRunning { .. })));
    assert!(exists(&orphan));

    let applied = fx.engine.apply_repair(&plan, true).await.unwrap();
    assert_eq!(applied, 2);
    assert!(!exists(&orphan));
    let manifest = fx.manifest();
    assert_eq!(manifest.mods.len(), 1);
    assert_eq!(manifest.mods[0].id, "extra-mod");

    assert!(fx.engine.plan_repair().await.unwrap().is_empty());
}

#[tokio::test]
async fn repair_drops_entries_whose_file_is_gone() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("a.jar", b"a")))
        .await
        .unwrap();
    std::fs::remove_file(fx.mods_dir().join("a.jar")).unwrap();

    let plan = fx.engine.plan_repair().await.unwrap();
    assert!(!plan.touches_files());
    fx.server.set_running(true);
    // Manifest-only edits are allowed while the server runs.
    fx.engine.apply_repair(&plan, false).await.unwrap();

    assert!(fx.manifest().mods.is_empty());
}

#[tokio::test]
async fn sync_restores_missing_files() {
    let fx = Fixture::initialised().await;
    fx.engine
        .add(AddRequest::new(fx.source_file("lithium.jar", b"lithium")))
        .await
        .unwrap();
    std::fs::remove_file(fx.mods_dir().join("lithium.jar")).unwrap();

    let report = fx.engine.sync(false).await.unwrap();

    assert_eq!(report.installed, vec!["lithium"]);
    assert!(report.failed.is_empty());
    assert!(exists(fx.mods_dir().join("lithium.jar")));
    assert!(fx.engine.status().await.unwrap().reconciliation.is_clean());
}

#[tokio::test]
async fn sync_reports_entries_it_cannot_fetch() {
    let fx = Fixture::initialised().await;
    let mut request = AddRequest::new("someday-mod");
    request.manifest_only = true;
    request.filename = Some("someday.jar".into());
    fx.engine.add(request).await.unwrap();

    let report = fx.engine.sync(false).await.unwrap();

    assert!(report.installed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "someday");
}

#[tokio::test]
async fn restart_goes_through_server_control() {
    let fx = Fixture::initialised().await;
    fx.engine.restart().await.unwrap();
    assert_eq!(fx.server.restarts(), 1);
}

#[tokio::test]
async fn operations_need_a_manifest() {
    let fx = Fixture::new();
    let status = fx.engine.status().await;
    assert!(matches!(status, Err(ModsError::ManifestNotFound(_))));
}
