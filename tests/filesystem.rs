#![cfg(unix)]

use std::error::Error;
use std::os::unix::fs::symlink;

use packflow::fs::{FileSystem, RealFileSystem};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn walk_lists_nested_files_sorted() -> TestResult {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("objects/sub"))?;
    std::fs::write(dir.path().join("objects/b.tif"), "b")?;
    std::fs::write(dir.path().join("objects/sub/a.tif"), "a")?;
    std::fs::write(dir.path().join("manifest.txt"), "m")?;

    let files = RealFileSystem.walk_files(dir.path())?;
    assert_eq!(
        files,
        vec![
            dir.path().join("manifest.txt"),
            dir.path().join("objects/b.tif"),
            dir.path().join("objects/sub/a.tif"),
        ]
    );
    Ok(())
}

#[test]
fn walk_does_not_follow_directory_symlinks() -> TestResult {
    let dir = tempfile::tempdir()?;
    let objects = dir.path().join("objects");
    std::fs::create_dir_all(&objects)?;
    std::fs::write(objects.join("a.tif"), "a")?;
    symlink(&objects, objects.join("loop"))?;

    let files = RealFileSystem.walk_files(dir.path())?;
    assert_eq!(files, vec![objects.join("a.tif")]);
    Ok(())
}

#[test]
fn walk_of_missing_root_is_empty() -> TestResult {
    let dir = tempfile::tempdir()?;
    let files = RealFileSystem.walk_files(&dir.path().join("absent"))?;
    assert!(files.is_empty());
    Ok(())
}
