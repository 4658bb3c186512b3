//! End-to-end commit scenarios driven through the public API.

use revfs::{ChangeKind, ChangeRecord, Error, Filesystem, FsConfig, NodeKind, PropList};
use revfs_engine::reader;
use std::fs;
use tempfile::tempdir;

fn new_repo(dir: &std::path::Path) -> Filesystem {
    Filesystem::create(dir.join("repo")).unwrap()
}

/// Commit one file change and return the new revision.
fn commit_file(fs: &Filesystem, base: u32, path: &str, content: &[u8], create: bool) -> u32 {
    let txn = fs.begin_txn(base).unwrap();
    if create {
        txn.make_file(path).unwrap();
    }
    txn.apply_text(path, content).unwrap();
    txn.commit().unwrap()
}

#[test]
fn test_first_commit_from_empty_tree() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/iota").unwrap();
    txn.apply_text("/iota", b"hello\n").unwrap();
    let rev = txn.commit().unwrap();

    assert_eq!(rev, 1);
    assert_eq!(fs.youngest().unwrap(), 1);
    assert_eq!(fs.read_file(1, "/iota").unwrap(), b"hello\n");

    let node = reader::node_at_path(&fs, 1, "/iota").unwrap();
    let rep = node.data_rep.unwrap();
    assert_eq!(rep.md5.to_string(), "b1946ac92492d2347c6235b4d2611184");
    assert_eq!(rep.expanded_size, 6);

    let changes = fs.paths_changed(1).unwrap();
    assert_eq!(changes.len(), 1);
    let change = &changes["/iota"];
    assert_eq!(change.kind, ChangeKind::Add);
    assert_eq!(change.node_kind, NodeKind::File);
    assert!(change.text_mod);

    // the transaction directory is gone after the commit
    assert!(fs.list_txns().unwrap().is_empty());
}

#[test]
fn test_youngest_advances_once_per_commit() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let mut rev = 0;
    rev = commit_file(&fs, rev, "/iota", b"one\n", true);
    rev = commit_file(&fs, rev, "/iota", b"two\n", false);
    rev = commit_file(&fs, rev, "/iota", b"three\n", false);
    assert_eq!(rev, 3);
    assert_eq!(fs.youngest().unwrap(), 3);

    // every revision has a revision file, revprops and both indexes
    for r in 1..=3 {
        let layout = fs.layout();
        assert!(layout.rev_path(r).exists(), "rev file for r{r}");
        assert!(layout.l2p_path(r).exists(), "l2p for r{r}");
        assert!(layout.p2l_path(r).exists(), "p2l for r{r}");
        assert!(layout.revprops_path(r).exists(), "revprops for r{r}");
        assert!(fs
            .revision_proplist(r)
            .unwrap()
            .contains_key("svn:date"));
    }
    assert_eq!(fs.read_file(2, "/iota").unwrap(), b"two\n");
    assert_eq!(fs.read_file(3, "/iota").unwrap(), b"three\n");
}

#[test]
fn test_out_of_date_commit_leaves_repository_untouched() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());
    commit_file(&fs, 0, "/iota", b"one\n", true);

    let stale = fs.begin_txn(0).unwrap();
    stale.make_file("/other").unwrap();

    let before = fs::read(fs.layout().rev_path(1)).unwrap();
    match stale.commit() {
        Err(Error::TxnOutOfDate { base, youngest }) => {
            assert_eq!(base, 0);
            assert_eq!(youngest, 1);
        }
        other => panic!("expected TxnOutOfDate, got {other:?}"),
    }

    assert_eq!(fs.youngest().unwrap(), 1);
    assert_eq!(fs::read(fs.layout().rev_path(1)).unwrap(), before);
    assert!(!fs.layout().rev_path(2).exists());

    // the losing transaction survives for retry or purge
    assert_eq!(fs.list_txns().unwrap(), vec![stale.txn_id()]);
    fs.abort_txn(stale.txn_id()).unwrap();
    assert!(fs.list_txns().unwrap().is_empty());
}

#[test]
fn test_abort_never_advances_youngest() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/doomed").unwrap();
    txn.apply_text("/doomed", b"bytes\n").unwrap();
    fs.abort_txn(txn.txn_id()).unwrap();

    assert_eq!(fs.youngest().unwrap(), 0);
    assert!(!fs.layout().rev_path(1).exists());
}

#[test]
fn test_rep_sharing_references_older_revision() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());
    commit_file(&fs, 0, "/iota", b"hello\n", true);
    commit_file(&fs, 1, "/iota", b"interim\n", false);

    let rev1_rep = reader::node_at_path(&fs, 1, "/iota")
        .unwrap()
        .data_rep
        .unwrap();

    // writing the r1 content again dedups against the r1 representation
    let rev = commit_file(&fs, 2, "/iota", b"hello\n", false);
    assert_eq!(rev, 3);
    let rep = reader::node_at_path(&fs, 3, "/iota")
        .unwrap()
        .data_rep
        .unwrap();
    assert_eq!(rep.change_set, rev1_rep.change_set);
    assert_eq!(rep.item_index, rev1_rep.item_index);
    assert_eq!(fs.read_file(3, "/iota").unwrap(), b"hello\n");

    // the r3 revision file holds no second copy of the content bytes
    let contains = |rev: u32| {
        let bytes = fs::read(fs.layout().rev_path(rev)).unwrap();
        bytes.windows(6).any(|w| w == b"hello\n")
    };
    assert!(contains(1));
    assert!(!contains(3));
}

#[test]
fn test_identical_files_in_one_commit_share_one_rep() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/a").unwrap();
    txn.apply_text("/a", b"same bytes\n").unwrap();
    txn.make_file("/b").unwrap();
    txn.apply_text("/b", b"same bytes\n").unwrap();
    txn.commit().unwrap();

    let rep_a = reader::node_at_path(&fs, 1, "/a").unwrap().data_rep.unwrap();
    let rep_b = reader::node_at_path(&fs, 1, "/b").unwrap().data_rep.unwrap();
    assert_eq!(rep_a.item_index, rep_b.item_index);
    assert_eq!(rep_a.change_set, rep_b.change_set);
}

#[test]
fn test_skip_delta_and_linear_tail() {
    let dir = tempdir().unwrap();
    let mut config = FsConfig::default();
    config.deltification.max_linear_deltification = 4;
    let fs = Filesystem::create_with_config(dir.path().join("repo"), config).unwrap();

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/iota").unwrap();
    txn.apply_text("/iota", b"content 1\n").unwrap();
    txn.commit().unwrap();
    for n in 2..=17u32 {
        let txn = fs.begin_txn(n - 1).unwrap();
        txn.apply_text("/iota", format!("content {n}\n").as_bytes())
            .unwrap();
        assert_eq!(txn.commit().unwrap(), n);
    }

    let base_rev_of = |rev: u32| {
        let rep = reader::node_at_path(&fs, rev, "/iota")
            .unwrap()
            .data_rep
            .unwrap();
        reader::rep_delta_base(&fs, &rep).unwrap().map(|(r, _)| r)
    };

    // r10 has predecessor count 9: within the linear tail, the base is the
    // immediate predecessor
    assert_eq!(base_rev_of(10), Some(9));
    // r13 has count 12: skip-delta to the count-8 ancestor, written in r9
    assert_eq!(base_rev_of(13), Some(9));
    // r17 has count 16: skip-delta all the way to the count-0 ancestor
    assert_eq!(base_rev_of(17), Some(1));

    // reconstruction chains stay within the configured bound
    for r in 1..=17 {
        let rep = reader::node_at_path(&fs, r, "/iota")
            .unwrap()
            .data_rep
            .unwrap();
        assert!(reader::rep_chain_length(&fs, &rep).unwrap() <= 2 * 4 + 2);
        assert_eq!(
            fs.read_file(r, "/iota").unwrap(),
            format!("content {r}\n").as_bytes()
        );
    }
}

#[test]
fn test_deleting_ancestor_collapses_descendants() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let setup = fs.begin_txn(0).unwrap();
    setup.make_dir("/a").unwrap();
    setup.make_dir("/a/b").unwrap();
    setup.commit().unwrap();

    let txn = fs.begin_txn(1).unwrap();
    txn.make_file("/a/b/c").unwrap();
    txn.delete("/a").unwrap();
    let rev = txn.commit().unwrap();

    let changes = fs.paths_changed(rev).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes["/a"].kind, ChangeKind::Delete);
    assert!(fs.dir_entries(rev, "/").unwrap().is_empty());
}

#[test]
fn test_move_without_delete_is_incomplete() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());
    commit_file(&fs, 0, "/foo", b"payload\n", true);

    let txn = fs.begin_txn(1).unwrap();
    // a move is declared for /bar but /foo is never deleted
    let source = reader::node_at_path(&fs, 1, "/foo").unwrap();
    txn.add_change(&ChangeRecord {
        path: "/bar".to_string(),
        kind: ChangeKind::Move,
        node_rev_id: Some(source.id),
        text_mod: false,
        prop_mod: false,
        node_kind: NodeKind::File,
        copyfrom: Some((1, "/foo".to_string())),
    })
    .unwrap();

    assert!(matches!(
        txn.commit(),
        Err(Error::IncompleteMove { .. })
    ));
    fs.abort_txn(txn.txn_id()).unwrap();
}

#[test]
fn test_move_commits_and_rewrites_copyfrom_rev() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());
    commit_file(&fs, 0, "/foo", b"payload\n", true);

    let txn = fs.begin_txn(1).unwrap();
    txn.move_path("/foo", "/bar").unwrap();
    let rev = txn.commit().unwrap();

    let changes = fs.paths_changed(rev).unwrap();
    assert_eq!(changes["/bar"].kind, ChangeKind::Move);
    // the changed-paths block stamps the move source at new_rev - 1
    assert_eq!(changes["/bar"].copyfrom, Some((rev - 1, "/foo".to_string())));
    assert_eq!(changes["/foo"].kind, ChangeKind::Delete);

    assert_eq!(fs.read_file(rev, "/bar").unwrap(), b"payload\n");
    assert!(matches!(
        fs.read_file(rev, "/foo"),
        Err(Error::PathNotFound(_))
    ));
}

#[test]
fn test_node_props_survive_commit() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/iota").unwrap();
    let mut props = PropList::new();
    props.insert("color".to_string(), "teal".to_string());
    txn.set_node_props("/iota", &props).unwrap();
    let rev = txn.commit().unwrap();

    assert_eq!(fs.node_proplist(rev, "/iota").unwrap(), props);
    assert!(fs.paths_changed(rev).unwrap()["/iota"].prop_mod);
}

#[test]
fn test_revprops_strip_markers_and_stamp_date() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/iota").unwrap();
    txn.change_txn_prop("svn:log", Some("a message")).unwrap();
    txn.change_txn_prop("check-locks", Some("true")).unwrap();
    let rev = txn.commit().unwrap();

    let props = fs.revision_proplist(rev).unwrap();
    assert_eq!(props.get("svn:log").map(String::as_str), Some("a message"));
    assert!(props.contains_key("svn:date"));
    assert!(!props.contains_key("check-locks"));
}

#[test]
fn test_client_date_is_preserved() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_file("/iota").unwrap();
    txn.change_txn_prop("svn:date", Some("2020-01-01T00:00:00.000000Z"))
        .unwrap();
    txn.change_txn_prop("client-date", Some("1")).unwrap();
    let rev = txn.commit().unwrap();

    let props = fs.revision_proplist(rev).unwrap();
    assert_eq!(
        props.get("svn:date").map(String::as_str),
        Some("2020-01-01T00:00:00.000000Z")
    );
    assert!(!props.contains_key("client-date"));
}

#[test]
fn test_empty_commit_produces_empty_revision() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    let rev = txn.commit().unwrap();
    assert_eq!(rev, 1);
    assert!(fs.paths_changed(1).unwrap().is_empty());
    assert!(fs.dir_entries(1, "/").unwrap().is_empty());
}

#[test]
fn test_copy_records_copyfrom() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());
    commit_file(&fs, 0, "/foo", b"payload\n", true);

    let txn = fs.begin_txn(1).unwrap();
    txn.copy("/foo", "/copy").unwrap();
    let rev = txn.commit().unwrap();

    assert_eq!(fs.read_file(rev, "/copy").unwrap(), b"payload\n");
    assert_eq!(fs.read_file(rev, "/foo").unwrap(), b"payload\n");
    let changes = fs.paths_changed(rev).unwrap();
    assert_eq!(changes["/copy"].kind, ChangeKind::Add);
    assert_eq!(changes["/copy"].copyfrom, Some((1, "/foo".to_string())));

    let copied = reader::node_at_path(&fs, rev, "/copy").unwrap();
    assert_eq!(copied.copyfrom, Some((1, "/foo".to_string())));
    assert!(copied.predecessor.is_some());
}

#[test]
fn test_folded_log_matches_committed_changes() {
    let dir = tempdir().unwrap();
    let fs = new_repo(dir.path());

    let txn = fs.begin_txn(0).unwrap();
    txn.make_dir("/d").unwrap();
    txn.make_file("/d/f").unwrap();
    txn.apply_text("/d/f", b"x\n").unwrap();
    txn.make_file("/gone").unwrap();
    txn.delete("/gone").unwrap();

    let folded = revfs_engine::fold::fold_changes(txn.read_changes().unwrap()).unwrap();
    let rev = txn.commit().unwrap();
    let committed = fs.paths_changed(rev).unwrap();

    let shape = |map: &std::collections::BTreeMap<String, ChangeRecord>| {
        map.iter()
            .map(|(path, record)| (path.clone(), record.kind, record.text_mod, record.prop_mod))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&folded), shape(&committed));
}

#[test]
fn test_reopened_filesystem_sees_committed_state() {
    let dir = tempdir().unwrap();
    let repo = dir.path().join("repo");
    {
        let fs = Filesystem::create(&repo).unwrap();
        commit_file(&fs, 0, "/iota", b"persisted\n", true);
    }
    let fs = Filesystem::open(&repo).unwrap();
    assert_eq!(fs.youngest().unwrap(), 1);
    assert_eq!(fs.read_file(1, "/iota").unwrap(), b"persisted\n");
}
