//! File-level tests for the kpcn_io formats.

use kpcn_io::{
    load_npy, load_ply, load_snapshot_file, save_npy, save_ply, save_snapshot_file, KpcnIoError,
    Point3, SnapshotEntry,
};
use tempfile::tempdir;

#[test]
fn ply_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layer_0_conv.ply");
    let points: Vec<Point3> = (0..15)
        .map(|i| Point3::new(i as f32, -(i as f32) * 0.5, 0.25))
        .collect();

    save_ply(&points, &path).unwrap();
    let loaded = load_ply(&path).unwrap();
    assert_eq!(loaded.points(), points.as_slice());
}

#[test]
fn npy_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("layer_0_conv.npy");
    let values: Vec<f32> = (0..15 * 2 * 4).map(|v| v as f32).collect();

    save_npy(&[15, 2, 4], &values, &path).unwrap();
    let loaded = load_npy(&path).unwrap();
    assert_eq!(loaded.shape, vec![15, 2, 4]);
    assert_eq!(loaded.values, values);
}

#[test]
fn snapshot_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("variables.bin");
    let entries = vec![
        SnapshotEntry::new("layer_0/conv/weights", vec![2, 3], vec![0.5; 6]).unwrap(),
        SnapshotEntry::new("head/fc/bias", vec![3], vec![1.0, 2.0, 3.0]).unwrap(),
    ];

    save_snapshot_file(&entries, &path).unwrap();
    assert_eq!(load_snapshot_file(&path).unwrap(), entries);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = load_snapshot_file(dir.path().join("absent.bin")).unwrap_err();
    assert!(matches!(err, KpcnIoError::Io(_)));
}
