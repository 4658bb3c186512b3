//! Concurrent-writer behavior: racing commits, write-lock serialization.

use revfs::{Error, Filesystem};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::tempdir;

fn commit_one(fs: &Filesystem, base: u32, path: &str, content: &[u8]) -> Result<u32, Error> {
    let txn = fs.begin_txn(base)?;
    txn.make_file(path)?;
    txn.apply_text(path, content)?;
    txn.commit()
}

#[test]
fn test_same_base_race_produces_one_winner() {
    let dir = tempdir().unwrap();
    let fs = Filesystem::create(dir.path().join("repo")).unwrap();

    // both transactions stage against revision 0 before either commits
    let t1 = fs.begin_txn(0).unwrap();
    t1.make_file("/one").unwrap();
    t1.apply_text("/one", b"first\n").unwrap();
    let t2 = fs.begin_txn(0).unwrap();
    t2.make_file("/two").unwrap();
    t2.apply_text("/two", b"second\n").unwrap();

    let wins = AtomicU32::new(0);
    let stale = AtomicU32::new(0);
    std::thread::scope(|scope| {
        for txn in [&t1, &t2] {
            let (wins, stale) = (&wins, &stale);
            scope.spawn(move || match txn.commit() {
                Ok(rev) => {
                    assert_eq!(rev, 1);
                    wins.fetch_add(1, Ordering::SeqCst);
                }
                Err(Error::TxnOutOfDate { base, youngest }) => {
                    assert_eq!(base, 0);
                    assert_eq!(youngest, 1);
                    stale.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected commit failure: {other}"),
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(stale.load(Ordering::SeqCst), 1);
    assert_eq!(fs.youngest().unwrap(), 1);

    // the loser remains on disk and is purgeable
    let remaining = fs.list_txns().unwrap();
    assert_eq!(remaining.len(), 1);
    fs.abort_txn(remaining[0]).unwrap();
    assert!(fs.list_txns().unwrap().is_empty());
}

#[test]
fn test_serialized_commits_from_many_threads() {
    let dir = tempdir().unwrap();
    let fs = Filesystem::create(dir.path().join("repo")).unwrap();

    // each thread retries with a fresh base until its commit lands
    std::thread::scope(|scope| {
        for n in 0..4u32 {
            let fs = &fs;
            scope.spawn(move || {
                let path = format!("/file-{n}");
                loop {
                    let base = fs.youngest().unwrap();
                    match commit_one(fs, base, &path, b"payload\n") {
                        Ok(_) => break,
                        Err(e) if e.is_retryable() => continue,
                        Err(e) => panic!("commit of {path} failed: {e}"),
                    }
                }
            });
        }
    });

    assert_eq!(fs.youngest().unwrap(), 4);
    let entries = fs.dir_entries(4, "/").unwrap();
    assert_eq!(entries.len(), 4);
    for n in 0..4u32 {
        assert_eq!(
            fs.read_file(4, &format!("/file-{n}")).unwrap(),
            b"payload\n"
        );
    }
}

#[test]
fn test_revision_numbers_strictly_increase() {
    let dir = tempdir().unwrap();
    let fs = Filesystem::create(dir.path().join("repo")).unwrap();

    let mut revs = Vec::new();
    for n in 0..5u32 {
        revs.push(commit_one(&fs, fs.youngest().unwrap(), &format!("/f{n}"), b"x\n").unwrap());
    }
    assert_eq!(revs, vec![1, 2, 3, 4, 5]);
}
