//! Ensemble file operations over both cloud implementations.

use consort_cloud::{
    list_ensembles, remove_ensemble, CloudFileSystem, DeviceRegistration, LocalDirCloudFileSystem,
    MemoryCloudFileSystem, RemoteEnsemble, RemoteError,
};
use consort_core::{
    properties, Baseline, ChangeSet, DeviceId, GlobalId, ObjectChange, Revision, RevisionSet,
};
use std::sync::Arc;
use tempfile::TempDir;

fn change_set(device: &str, sequence: u64) -> ChangeSet {
    let device = DeviceId::new(device);
    let mut dependencies = RevisionSet::new();
    dependencies.set(device.clone(), sequence - 1);
    ChangeSet::new(
        Revision::new(device, sequence),
        1_000 + sequence as i64,
        dependencies,
        vec![ObjectChange::update(
            GlobalId::new("n"),
            "Number",
            properties([("number", sequence as i64)]),
        )],
    )
}

async fn exercise(cloud: Arc<dyn CloudFileSystem>) {
    let remote = RemoteEnsemble::new(cloud.clone(), "numbers");

    // change sets
    assert!(remote.upload_change_set(&change_set("a", 1)).await.unwrap());
    assert!(remote.upload_change_set(&change_set("a", 2)).await.unwrap());
    assert!(!remote.upload_change_set(&change_set("a", 2)).await.unwrap());
    assert!(remote.upload_change_set(&change_set("b", 1)).await.unwrap());

    assert_eq!(
        remote.change_set_devices().await.unwrap(),
        vec![DeviceId::new("a"), DeviceId::new("b")]
    );
    let device = DeviceId::new("a");
    assert_eq!(remote.change_set_sequences(&device, 0).await.unwrap(), vec![1, 2]);
    assert_eq!(remote.change_set_sequences(&device, 1).await.unwrap(), vec![2]);
    assert_eq!(
        remote.download_change_set(&device, 2).await.unwrap(),
        change_set("a", 2)
    );

    // baselines
    let late = Baseline::new(DeviceId::new("b"), 20, RevisionSet::new(), Default::default()).unwrap();
    let early = Baseline::origin(
        DeviceId::new("a"),
        10,
        vec![(GlobalId::new("n"), "Number".to_string(), properties([("number", 1i64)]))],
    )
    .unwrap();
    remote.upload_baseline(&late).await.unwrap();
    remote.upload_baseline(&early).await.unwrap();

    let entries = remote.baselines().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, early.id);
    assert_eq!(remote.download_baseline(&entries[0]).await.unwrap(), early);

    // devices
    let registration = DeviceRegistration {
        device: device.clone(),
        registered_at: 5,
        identity_token: None,
        merged: RevisionSet::from_entries([(device.clone(), 2)]),
        updated_at: 6,
    };
    remote.publish_device(&registration).await.unwrap();
    assert_eq!(remote.devices().await.unwrap(), vec![registration.clone()]);
    assert_eq!(remote.device(&device).await.unwrap(), Some(registration));

    // discovery
    RemoteEnsemble::new(cloud.clone(), "other")
        .upload_change_set(&change_set("z", 1))
        .await
        .unwrap();
    assert_eq!(
        list_ensembles(cloud.as_ref()).await.unwrap(),
        vec!["numbers".to_string(), "other".to_string()]
    );
    assert_eq!(remove_ensemble(cloud.clone(), "numbers").await.unwrap(), 6);
    assert_eq!(list_ensembles(cloud.as_ref()).await.unwrap(), vec!["other".to_string()]);
}

#[tokio::test]
async fn test_memory_cloud_ensemble_files() {
    exercise(Arc::new(MemoryCloudFileSystem::new())).await;
}

#[tokio::test]
async fn test_local_dir_cloud_ensemble_files() {
    let dir = TempDir::new().unwrap();
    let cloud = LocalDirCloudFileSystem::new(dir.path()).await.unwrap();
    exercise(Arc::new(cloud)).await;
}

#[tokio::test]
async fn test_tampered_change_set_is_rejected() {
    let cloud = MemoryCloudFileSystem::new();
    let remote = RemoteEnsemble::new(Arc::new(cloud.clone()), "numbers");
    remote.upload_change_set(&change_set("a", 1)).await.unwrap();

    // a file whose content names a different revision than its path
    let bytes = cloud
        .get("numbers/changesets/a/00000000000000000001.json")
        .await
        .unwrap();
    cloud
        .put("numbers/changesets/a/00000000000000000002.json", bytes)
        .await
        .unwrap();

    let result = remote.download_change_set(&DeviceId::new("a"), 2).await;
    assert!(matches!(result, Err(RemoteError::Codec(_))));
}

#[tokio::test]
async fn test_local_dir_rejects_escaping_paths() {
    let dir = TempDir::new().unwrap();
    let cloud = LocalDirCloudFileSystem::new(dir.path()).await.unwrap();
    assert!(cloud.put("../escape.json", vec![1]).await.is_err());
    assert!(cloud.get("/etc/passwd").await.is_err());
}
