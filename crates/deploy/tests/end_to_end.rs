//! Library scan, BIOS verification and a full deployment onto a card
//! directory, then a resume of a run that stopped mid-plan.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use romrunner_catalog::Catalog;
use romrunner_deploy::{DeployInputs, DeployOrchestrator, DeploySettings, DeployTarget};
use romrunner_library::{BiosStatus, HashPool, LibraryScanOptions, scan_library, verify_bios};
use romrunner_protocol::{DeploymentItem, DeploymentItemKind, DeploymentPlan, TransferState};
use romrunner_store::{DeploymentRecord, DeploymentStatus, JsonStore, destination_id};

const CATALOG: &str = r#"{
    "version": "e2e",
    "platforms": [
        {"id": "gb", "name": "Game Boy", "extensions": ["gb"], "difficulty": "light"},
        {"id": "psx", "name": "PlayStation", "extensions": ["iso", "cue", "chd"], "difficulty": "moderate"},
        {"id": "ps2", "name": "PlayStation 2", "extensions": ["iso"], "difficulty": "demanding"}
    ],
    "chipsets": [{"id": "h700", "name": "Allwinner H700"}],
    "devices": [
        {"id": "rg35xx-plus", "name": "RG35XX Plus", "chipsetId": "h700", "defaultOs": "muos"}
    ],
    "operatingSystems": [
        {"id": "muos", "name": "muOS", "defaultEmulators": {"gb": "gambatte", "psx": "pcsx"}}
    ],
    "biosFiles": [
        {"id": "psx-scph1001", "filename": "scph1001.bin", "platformId": "psx", "required": true},
        {"id": "psx-scph5501", "filename": "scph5501.bin", "platformId": "psx", "required": true}
    ],
    "layoutProfiles": [
        {"id": "muos-default", "osId": "muos",
         "paths": {"roms": "ROMS", "bios": "MUOS/bios"},
         "platformFolders": {"gb": "GB", "psx": "PS"},
         "detection": {"markersAll": ["MUOS"]}}
    ],
    "performance": [
        {"platformId": "gb", "chipsetId": "h700", "tier": "excellent"},
        {"platformId": "psx", "chipsetId": "h700", "tier": "good"}
    ],
    "policy": {"performanceCoverage": ["ps2"]}
}"#;

fn write(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

#[tokio::test]
async fn library_to_card() {
    let (lib, bios, card, store_dir) = (
        tempfile::tempdir().unwrap(),
        tempfile::tempdir().unwrap(),
        tempfile::tempdir().unwrap(),
        tempfile::tempdir().unwrap(),
    );
    write(&lib.path().join("gb/Tetris.gb"), b"tetris");
    write(&lib.path().join("psx/Crash.iso"), &vec![7u8; 64 * 1024]);
    write(&lib.path().join("ps2/GT4.iso"), b"gt4");
    write(&bios.path().join("SCPH1001.BIN"), b"psx bios");
    fs::create_dir(card.path().join("MUOS")).unwrap();

    let catalog = Arc::new(Catalog::from_json(CATALOG).unwrap());
    let scan = scan_library(
        &[lib.path().to_path_buf()],
        &catalog,
        &LibraryScanOptions::default(),
    )
    .unwrap();
    assert_eq!(scan.items.len(), 3);
    assert!(scan.ambiguous.is_empty());

    let pool = HashPool::with_threads(2).unwrap();
    let report = verify_bios(&catalog, bios.path(), &pool).unwrap();
    assert_eq!(
        report.find("psx-scph1001").unwrap().status,
        BiosStatus::Unknown
    );
    assert_eq!(report.find("psx-scph5501").unwrap().status, BiosStatus::Missing);

    let store = Arc::new(JsonStore::open(store_dir.path()).unwrap());
    let mut orch = DeployOrchestrator::new(catalog, Arc::clone(&store), DeploySettings::default());
    let mut events = orch.take_events().unwrap();
    let drain = tokio::spawn(async move {
        let mut names = Vec::new();
        while let Some(ev) = events.recv().await {
            names.push(ev.name());
        }
        names
    });

    let target = DeployTarget {
        root: card.path().to_path_buf(),
        device_id: "rg35xx-plus".into(),
        os_id: None,
    };
    let inputs = DeployInputs {
        library: scan.items.clone(),
        bios: Some(report),
        ..Default::default()
    };
    let outcome = orch.deploy(&target, &inputs).await.unwrap();
    drop(orch);

    assert_eq!(outcome.report.state, TransferState::Completed);
    assert_eq!(outcome.plan.len(), 3);
    assert_eq!(outcome.plan.missing_auxiliary(), ["psx-scph5501"]);
    assert_eq!(outcome.plan.skipped().len(), 1);
    assert_eq!(fs::read(card.path().join("ROMS/GB/Tetris.gb")).unwrap(), b"tetris");
    assert_eq!(
        fs::read(card.path().join("MUOS/bios/scph1001.bin")).unwrap(),
        b"psx bios"
    );
    assert_eq!(
        fs::metadata(card.path().join("ROMS/PS/Crash.iso")).unwrap().len(),
        64 * 1024
    );
    assert!(outcome.validation.warnings.iter().any(|w| w.code.as_str() == "PLAN_MISSING_AUXILIARY"));

    let names = drain.await.unwrap();
    assert_eq!(names.first(), Some(&"scan_progress"));
    assert!(names.contains(&"plan_ready"));
    assert_eq!(names.last(), Some(&"transfer_complete"));

    let record = store.deployment(outcome.plan.plan_id()).unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Completed);
    assert_eq!(record.items_completed, 3);
}

#[tokio::test]
async fn interrupted_run_is_resumed_from_the_log() {
    let (lib, card, store_dir) = (
        tempfile::tempdir().unwrap(),
        tempfile::tempdir().unwrap(),
        tempfile::tempdir().unwrap(),
    );
    let source = lib.path().join("Tetris.gb");
    write(&source, b"tetris");

    let plan = DeploymentPlan::new(
        "resume-me",
        card.path(),
        vec![DeploymentItem {
            kind: DeploymentItemKind::Rom,
            source_path: source.clone(),
            dest_path: "ROMS/GB/Tetris.gb".into(),
            byte_size: 6,
            source_size: 6,
            requires_conversion: false,
            target_format: None,
            content_id: Some("Tetris".into()),
            platform_id: Some("gb".into()),
        }],
    );

    // A run that was still `running` when the process died.
    {
        let store = JsonStore::open(store_dir.path()).unwrap();
        store.save_plan(&plan).unwrap();
        store
            .record_deployment(DeploymentRecord::started(&plan, destination_id(card.path())))
            .unwrap();
    }

    let store = Arc::new(JsonStore::open(store_dir.path()).unwrap());
    let interrupted = store.interrupted().unwrap();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].plan_id, "resume-me");

    let catalog = Arc::new(Catalog::from_json(CATALOG).unwrap());
    let mut orch = DeployOrchestrator::new(catalog, Arc::clone(&store), DeploySettings::default());
    let mut events = orch.take_events().unwrap();
    let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });

    let report = orch.resume_deployment("resume-me").await.unwrap();
    drop(orch);
    drain.await.unwrap();

    assert_eq!(report.state, TransferState::Completed);
    assert_eq!(fs::read(card.path().join("ROMS/GB/Tetris.gb")).unwrap(), b"tetris");
    assert!(store.interrupted().unwrap().is_empty());
}
