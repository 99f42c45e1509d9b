#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::directory::allocator::{BlockAllocator, SequentialBlockAllocator};
    use crate::directory::errors::DirectoryError;
    use crate::directory::tree::DirectoryTree;
    use crate::directory::types::*;
    use crate::directory::workers::{FileSizeTracker, LeaseExpiryWorker, SyncWorker};
    use crate::storage::recording::RecordingStorageManager;

    fn fixture(
        capacity: usize,
    ) -> (
        Arc<SequentialBlockAllocator>,
        Arc<RecordingStorageManager>,
        Arc<DirectoryTree>,
    ) {
        let alloc = Arc::new(SequentialBlockAllocator::with_capacity(capacity));
        let sm = Arc::new(RecordingStorageManager::new());
        let tree = Arc::new(DirectoryTree::new(alloc.clone(), sm.clone()));
        (alloc, sm, tree)
    }

    fn no_tags() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Stable chains must partition [0, SLOT_MAX] exactly once.
    fn assert_slot_partition(status: &DataStatus) {
        let mut next = 0;
        for chain in status.data_blocks() {
            assert_eq!(chain.status, ChainStatus::Stable);
            assert_eq!(chain.slot_begin(), next);
            assert!(chain.slot_begin() <= chain.slot_end());
            next = chain.slot_end() + 1;
        }
        assert_eq!(next, SLOT_MAX + 1);
    }

    // ============================================================
    // NAMESPACE TESTS
    // ============================================================

    #[test]
    fn test_create_directory() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_directories("/sandbox/1/2/a").unwrap();
        assert!(tree.is_directory("/sandbox/1/2/a").unwrap());
        assert!(tree.is_directory("/sandbox/1/2").unwrap());
        assert!(tree.is_directory("/sandbox/1").unwrap());
        assert!(tree.is_directory("/sandbox").unwrap());

        tree.create_directory("/sandbox/1/2/b").unwrap();
        assert!(tree.is_directory("/sandbox/1/2/b").unwrap());

        let err = tree.create_directory("/sandbox/1/1/b").unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));

        let err = tree.create_directory("/sandbox/1/2/a").unwrap_err();
        assert!(matches!(err, DirectoryError::Exists(_)));
    }

    #[test]
    fn test_create_file() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/a.txt", "/tmp").unwrap();
        assert!(tree.is_regular_file("/sandbox/a.txt").unwrap());

        tree.create_file("/sandbox/foo/bar/baz/a", "/tmp").unwrap();
        assert!(tree.is_regular_file("/sandbox/foo/bar/baz/a").unwrap());

        let err = tree
            .create_file("/sandbox/foo/bar/baz/a/b", "/tmp")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotDirectory(_)));

        let err = tree
            .create_directories("/sandbox/foo/bar/baz/a/b")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotDirectory(_)));

        let err = tree.create_file("/sandbox/a.txt", "/tmp").unwrap_err();
        assert!(matches!(err, DirectoryError::Exists(_)));
    }

    #[test]
    fn test_exists() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        assert!(tree.exists("/sandbox"));
        assert!(tree.exists("/sandbox/file"));
        assert!(!tree.exists("/sandbox/foo"));
    }

    #[test]
    fn test_malformed_paths() {
        let (_alloc, _sm, tree) = fixture(4);

        let err = tree.create_directory("relative/path").unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidArgument(_)));

        let err = tree.create_directory("/sandbox//a").unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidArgument(_)));
    }

    #[test]
    fn test_open_and_open_or_create() {
        let (_alloc, _sm, tree) = fixture(4);

        let created = tree
            .open_or_create("/sandbox/file", "/tmp", 1, 1, 0, Perms::ALL, &no_tags())
            .unwrap();
        assert_eq!(created.data_blocks().len(), 1);

        let opened = tree
            .open_or_create("/sandbox/file", "/tmp", 1, 1, 0, Perms::ALL, &no_tags())
            .unwrap();
        assert_eq!(opened, created);

        assert_eq!(tree.open("/sandbox/file").unwrap(), created);
        let err = tree.open("/sandbox/missing").unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
        let err = tree.open("/sandbox").unwrap_err();
        assert!(matches!(err, DirectoryError::IsDirectory(_)));
    }

    #[test]
    fn test_last_write_time_and_touch() {
        let (_alloc, _sm, tree) = fixture(4);

        let before = now_ms();
        tree.create_file("/sandbox/file", "/tmp").unwrap();
        let after = now_ms();
        assert!(before <= tree.last_write_time("/sandbox/file").unwrap());
        assert!(tree.last_write_time("/sandbox/file").unwrap() <= after);

        let before = now_ms();
        tree.touch("/sandbox/file").unwrap();
        let after = now_ms();
        assert!(before <= tree.last_write_time("/sandbox/file").unwrap());
        assert!(tree.last_write_time("/sandbox/file").unwrap() <= after);

        // Touching a directory advances it, its ancestors and its subtree to
        // the same instant.
        let before = now_ms();
        tree.touch("/sandbox").unwrap();
        let after = now_ms();
        assert!(before <= tree.last_write_time("/sandbox").unwrap());
        assert!(tree.last_write_time("/sandbox").unwrap() <= after);
        assert_eq!(
            tree.last_write_time("/sandbox").unwrap(),
            tree.last_write_time("/sandbox/file").unwrap()
        );
    }

    #[test]
    fn test_touch_is_monotone() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        let mut previous = 0;
        for _ in 0..5 {
            tree.touch("/sandbox/file").unwrap();
            let time = tree.last_write_time("/sandbox/file").unwrap();
            assert!(time >= previous);
            previous = time;
        }
    }

    #[test]
    fn test_permissions() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        assert_eq!(tree.permissions("/sandbox").unwrap(), Perms::ALL);
        assert_eq!(tree.permissions("/sandbox/file").unwrap(), Perms::ALL);

        tree.set_permissions(
            "/sandbox/file",
            Perms::OWNER_ALL | Perms::GROUP_ALL,
            PermOptions::Replace,
        )
        .unwrap();
        assert_eq!(
            tree.permissions("/sandbox/file").unwrap(),
            Perms::OWNER_ALL | Perms::GROUP_ALL
        );

        tree.set_permissions("/sandbox/file", Perms::OTHERS_ALL, PermOptions::Add)
            .unwrap();
        assert_eq!(
            tree.permissions("/sandbox/file").unwrap(),
            Perms::OWNER_ALL | Perms::GROUP_ALL | Perms::OTHERS_ALL
        );

        tree.set_permissions(
            "/sandbox/file",
            Perms::GROUP_ALL | Perms::OTHERS_ALL,
            PermOptions::Remove,
        )
        .unwrap();
        assert_eq!(tree.permissions("/sandbox/file").unwrap(), Perms::OWNER_ALL);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/abcdef/example/a/b", "/tmp").unwrap();
        assert_eq!(alloc.num_free(), 3);

        tree.remove("/sandbox/abcdef/example/a/b").unwrap();
        assert!(!tree.exists("/sandbox/abcdef/example/a/b"));

        tree.remove("/sandbox/abcdef/example/a").unwrap();
        assert!(!tree.exists("/sandbox/abcdef/example/a"));

        let err = tree.remove("/sandbox/abcdef").unwrap_err();
        assert!(matches!(err, DirectoryError::DirectoryNotEmpty(_)));
        assert!(tree.exists("/sandbox/abcdef"));

        tree.remove_all("/sandbox/abcdef").unwrap();
        assert!(!tree.exists("/sandbox/abcdef"));
        assert_eq!(alloc.num_free(), 4);

        assert_eq!(sm.commands(), vec!["clear:0".to_string()]);
    }

    #[test]
    fn test_dump_ordering_and_modes() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/abcdef/example/a/b", "/tmp").unwrap();
        tree.create_file("/sandbox/abcdef/example/c", "/tmp").unwrap();
        assert_eq!(alloc.num_free(), 2);

        tree.dump("/sandbox/abcdef/example/c", "/tmp").unwrap();
        assert_eq!(
            tree.dstatus("/sandbox/abcdef/example/c").unwrap().mode(),
            vec![StorageMode::OnDisk]
        );

        tree.dump("/sandbox/abcdef/example/a", "/tmp").unwrap();
        assert_eq!(
            tree.dstatus("/sandbox/abcdef/example/a/b").unwrap().mode(),
            vec![StorageMode::OnDisk]
        );

        assert_eq!(alloc.num_free(), 4);
        assert_eq!(
            sm.commands(),
            vec![
                "flush:1:/tmp/0_65536".to_string(),
                "flush:0:/tmp/0_65536".to_string(),
            ]
        );
    }

    #[test]
    fn test_rename() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/from/file1.txt", "/tmp").unwrap();
        tree.create_directory("/sandbox/to").unwrap();

        let err = tree
            .rename("/sandbox/from/file1.txt", "/sandbox/to/")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidArgument(_)));

        tree.rename("/sandbox/from/file1.txt", "/sandbox/to/file2.txt")
            .unwrap();
        assert!(tree.exists("/sandbox/to/file2.txt"));
        assert!(!tree.exists("/sandbox/from/file1.txt"));

        let err = tree.rename("/sandbox/from", "/sandbox/to").unwrap_err();
        assert!(matches!(err, DirectoryError::Exists(_)));

        tree.rename("/sandbox/from", "/sandbox/to/subdir").unwrap();
        assert!(tree.exists("/sandbox/to/subdir"));
        assert!(!tree.exists("/sandbox/from"));
    }

    #[test]
    fn test_rename_preserves_subtree() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/from/a/b", "/tmp").unwrap();
        tree.create_file("/sandbox/from/c", "/tmp").unwrap();
        let before: Vec<String> = tree
            .recursive_directory_entries("/sandbox/from")
            .unwrap()
            .iter()
            .map(|entry| entry.name.clone())
            .collect();

        tree.rename("/sandbox/from", "/sandbox/moved").unwrap();

        let after: Vec<String> = tree
            .recursive_directory_entries("/sandbox/moved")
            .unwrap()
            .iter()
            .map(|entry| entry.name.clone())
            .collect();
        assert_eq!(before, after);
        assert!(tree.is_regular_file("/sandbox/moved/a/b").unwrap());
    }

    #[test]
    fn test_status() {
        let (_alloc, _sm, tree) = fixture(4);

        let before = now_ms();
        tree.create_file("/sandbox/file", "/tmp").unwrap();
        let after = now_ms();
        let status = tree.status("/sandbox/file").unwrap();
        assert_eq!(status.permissions, Perms::ALL);
        assert_eq!(status.file_type, FileType::Regular);
        assert!(before <= status.last_write_time);
        assert!(status.last_write_time <= after);

        let before = now_ms();
        tree.create_directory("/sandbox/dir").unwrap();
        let after = now_ms();
        let status = tree.status("/sandbox/dir").unwrap();
        assert_eq!(status.permissions, Perms::ALL);
        assert_eq!(status.file_type, FileType::Directory);
        assert!(before <= status.last_write_time);
        assert!(status.last_write_time <= after);
    }

    #[test]
    fn test_directory_entries() {
        let (_alloc, _sm, tree) = fixture(4);

        let t0 = now_ms();
        tree.create_directories("/sandbox/a/b").unwrap();
        let t1 = now_ms();
        tree.create_file("/sandbox/file1.txt", "/tmp").unwrap();
        let t2 = now_ms();
        tree.create_file("/sandbox/file2.txt", "/tmp").unwrap();
        let t3 = now_ms();

        let entries = tree.directory_entries("/sandbox").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].file_type(), FileType::Directory);
        assert_eq!(entries[0].permissions(), Perms::ALL);
        assert!(t0 <= entries[0].last_write_time());
        assert!(entries[0].last_write_time() <= t1);
        assert_eq!(entries[1].name, "file1.txt");
        assert_eq!(entries[1].file_type(), FileType::Regular);
        assert!(t1 <= entries[1].last_write_time());
        assert!(entries[1].last_write_time() <= t2);
        assert_eq!(entries[2].name, "file2.txt");
        assert_eq!(entries[2].file_type(), FileType::Regular);
        assert!(t2 <= entries[2].last_write_time());
        assert!(entries[2].last_write_time() <= t3);

        let err = tree.directory_entries("/sandbox/file1.txt").unwrap_err();
        assert!(matches!(err, DirectoryError::NotDirectory(_)));
    }

    #[test]
    fn test_recursive_directory_entries() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_directories("/sandbox/a/b").unwrap();
        tree.create_file("/sandbox/file1.txt", "/tmp").unwrap();
        tree.create_file("/sandbox/file2.txt", "/tmp").unwrap();

        // Pre-order DFS: each directory's children in name order.
        let names: Vec<String> = tree
            .recursive_directory_entries("/sandbox")
            .unwrap()
            .iter()
            .map(|entry| entry.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "file1.txt", "file2.txt"]);
    }

    #[test]
    fn test_dstatus_and_tags() {
        let (_alloc, _sm, tree) = fixture(4);

        let mut tags = BTreeMap::new();
        tags.insert("owner".to_string(), "ingest".to_string());
        tree.create("/sandbox/file.txt", "/tmp", 1, 1, 0, Perms::ALL, &tags)
            .unwrap();

        let err = tree.dstatus("/sandbox").unwrap_err();
        assert!(matches!(err, DirectoryError::IsDirectory(_)));

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.mode(), vec![StorageMode::InMemory]);
        assert_eq!(status.backing_path(), "/tmp");
        assert_eq!(status.data_blocks().len(), 1);
        assert_eq!(status.chain_length(), 1);
        assert_eq!(status.get_tag("owner"), Some("ingest"));
        assert_slot_partition(&status);

        let mut more = BTreeMap::new();
        more.insert("tier".to_string(), "hot".to_string());
        tree.add_tags("/sandbox/file.txt", &more).unwrap();
        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.get_tag("tier"), Some("hot"));
        assert_eq!(status.get_tag("owner"), Some("ingest"));
    }

    #[test]
    fn test_file_size() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        assert_eq!(tree.file_size("/sandbox/file").unwrap(), 0);
        sm.set_storage_size("0", 20);
        assert_eq!(tree.file_size("/sandbox/file").unwrap(), 20);

        tree.create_file("/sandbox/file2", "/tmp").unwrap();
        sm.set_storage_size("1", 15);
        assert_eq!(tree.file_size("/sandbox").unwrap(), 35);
    }

    // ============================================================
    // CAPACITY MANAGEMENT TESTS
    // ============================================================

    #[test]
    fn test_add_block_until_capacity() {
        let (alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        assert_eq!(tree.num_blocks("/sandbox/file.txt").unwrap(), 1);

        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();

        let err = tree.add_block_to_file("/sandbox/file.txt").unwrap_err();
        assert!(matches!(err, DirectoryError::AtCapacity(_)));

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.data_blocks().len(), 4);
        assert_slot_partition(&status);
        assert_eq!(alloc.num_free(), 0);
        assert_eq!(alloc.num_allocated(), 4);
    }

    #[test]
    fn test_remove_data_blocks() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        sm.clear_commands();

        tree.remove_data_block("/sandbox/file.txt", 2).unwrap();
        assert_eq!(alloc.num_allocated(), 3);
        assert_eq!(alloc.num_free(), 1);

        tree.remove_all_data_blocks("/sandbox/file.txt").unwrap();
        assert!(tree
            .dstatus("/sandbox/file.txt")
            .unwrap()
            .data_blocks()
            .is_empty());
        assert_eq!(alloc.num_free(), 4);
        assert_eq!(alloc.num_allocated(), 0);

        // Chains sit in slot order ["0", "3", "2", "1"] after three splits,
        // so index 2 holds block "2".
        assert_eq!(
            sm.commands(),
            vec![
                "clear:2".to_string(),
                "clear:0".to_string(),
                "clear:3".to_string(),
                "clear:1".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_block_prefers_largest_chain() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        tree.add_block_to_file("/sandbox/file.txt").unwrap();

        // Chains: "0" on [0, 32768], "1" on [32769, 65536]. Make the second
        // one the fullest; it must be the next donor.
        sm.set_storage_size("0", 10);
        sm.set_storage_size("1", 100);
        tree.add_block_to_file("/sandbox/file.txt").unwrap();

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_slot_partition(&status);
        let donor = &status.data_blocks()[1];
        assert_eq!(donor.block_names, vec!["1".to_string()]);
        assert_eq!(donor.slot_range, (32769, 49152));
        let recipient = &status.data_blocks()[2];
        assert_eq!(recipient.block_names, vec!["2".to_string()]);
        assert_eq!(recipient.slot_range, (49153, 65536));
    }

    #[test]
    fn test_split_slot_range() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        tree.split_slot_range("/sandbox/file.txt", 0, SLOT_MAX).unwrap();

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.data_blocks().len(), 2);
        assert_eq!(status.data_blocks()[0].slot_range, (0, 32768));
        assert_eq!(status.data_blocks()[1].slot_range, (32769, 65536));
        assert_slot_partition(&status);

        let control = sm.control_commands();
        assert!(control.iter().any(|c| c.starts_with("setup_importing:1:")));
        assert!(control.contains(&"set_exporting:0:1:32769:65536".to_string()));
        assert!(control.contains(&"set_regular:0:0:32768".to_string()));
        assert!(control.contains(&"set_regular:1:32769:65536".to_string()));

        let err = tree
            .split_slot_range("/sandbox/file.txt", 5, 10)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn test_merge_slot_range() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        tree.split_slot_range("/sandbox/file.txt", 0, SLOT_MAX).unwrap();
        sm.clear_commands();

        tree.merge_slot_range("/sandbox/file.txt", 0, 32768).unwrap();

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.data_blocks().len(), 1);
        assert_eq!(status.data_blocks()[0].slot_range, (0, SLOT_MAX));
        assert_eq!(status.data_blocks()[0].block_names, vec!["1".to_string()]);
        assert_slot_partition(&status);

        // Donor blocks are reset and returned to the pool.
        assert_eq!(sm.commands(), vec!["clear:0".to_string()]);
        let control = sm.control_commands();
        assert!(control.contains(&"set_importing:1:0:32768".to_string()));
        assert!(control.contains(&"set_exporting:0:1:0:32768".to_string()));
        assert!(control.contains(&"set_regular:1:0:65536".to_string()));
        assert_eq!(alloc.num_allocated(), 1);
        assert_eq!(alloc.num_free(), 3);
    }

    #[test]
    fn test_split_then_merge_restores_shape() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        let before = tree.dstatus("/sandbox/file.txt").unwrap();

        tree.split_slot_range("/sandbox/file.txt", 0, SLOT_MAX).unwrap();
        tree.merge_slot_range("/sandbox/file.txt", 0, 32768).unwrap();

        // Equivalent modulo block identities.
        let after = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(after.data_blocks().len(), before.data_blocks().len());
        assert_eq!(
            after.data_blocks()[0].slot_range,
            before.data_blocks()[0].slot_range
        );
        assert_eq!(after.data_blocks()[0].status, ChainStatus::Stable);
        assert_eq!(after.data_blocks()[0].mode, StorageMode::InMemory);
        assert_eq!(after.chain_length(), before.chain_length());
    }

    #[test]
    fn test_merge_without_partner() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        // A single chain ending at SLOT_MAX has no right neighbor.
        let err = tree
            .merge_slot_range("/sandbox/file.txt", 0, SLOT_MAX)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NoPartner(_)));

        tree.split_slot_range("/sandbox/file.txt", 0, SLOT_MAX).unwrap();
        let err = tree
            .merge_slot_range("/sandbox/file.txt", 32769, SLOT_MAX)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NoPartner(_)));

        let err = tree
            .merge_slot_range("/sandbox/file.txt", 7, 11)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn test_create_rolls_back_on_storage_failure() {
        let (alloc, sm, tree) = fixture(4);

        sm.set_block_failing("1", true);
        let err = tree
            .create("/sandbox/file.txt", "/tmp", 2, 1, 0, Perms::ALL, &no_tags())
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Storage(_)));
        assert!(!tree.exists("/sandbox/file.txt"));
        assert_eq!(alloc.num_free(), 4);
        // The block that did get set up was reset again.
        assert_eq!(sm.commands(), vec!["clear:0".to_string()]);
    }

    #[test]
    fn test_split_rolls_back_on_storage_failure() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        sm.set_block_failing("1", true);

        let err = tree.add_block_to_file("/sandbox/file.txt").unwrap_err();
        assert!(matches!(err, DirectoryError::Storage(_)));
        assert_eq!(alloc.num_free(), 3);

        let status = tree.dstatus("/sandbox/file.txt").unwrap();
        assert_eq!(status.data_blocks().len(), 1);
        assert_eq!(status.data_blocks()[0].status, ChainStatus::Stable);
        assert_slot_partition(&status);

        // The donor is usable again once storage recovers.
        sm.set_block_failing("1", false);
        tree.add_block_to_file("/sandbox/file.txt").unwrap();
        assert_eq!(tree.dstatus("/sandbox/file.txt").unwrap().data_blocks().len(), 2);
    }

    #[test]
    fn test_resolve_failures_replaces_dead_members() {
        let (alloc, sm, tree) = fixture(4);

        tree.create("/sandbox/file.txt", "/tmp", 1, 2, 0, Perms::ALL, &no_tags())
            .unwrap();
        let chain = tree.dstatus("/sandbox/file.txt").unwrap().data_blocks()[0].clone();
        assert_eq!(chain.block_names, vec!["0".to_string(), "1".to_string()]);

        sm.set_block_failing("1", true);
        let repaired = tree.resolve_failures("/sandbox/file.txt", &chain).unwrap();
        assert_eq!(repaired.block_names, vec!["0".to_string(), "2".to_string()]);
        assert_eq!(repaired.slot_range, (0, SLOT_MAX));
        assert_eq!(
            tree.dstatus("/sandbox/file.txt").unwrap().data_blocks()[0],
            repaired
        );
        assert_eq!(alloc.num_allocated(), 3);

        let control = sm.control_commands();
        assert!(control.iter().any(|c| c.starts_with("setup_block:2:")));
        assert!(control.contains(&"resend_pending:0".to_string()));
    }

    #[test]
    fn test_resolve_failures_intact_chain_is_unchanged() {
        let (alloc, _sm, tree) = fixture(4);

        tree.create("/sandbox/file.txt", "/tmp", 1, 2, 0, Perms::ALL, &no_tags())
            .unwrap();
        let chain = tree.dstatus("/sandbox/file.txt").unwrap().data_blocks()[0].clone();

        let repaired = tree.resolve_failures("/sandbox/file.txt", &chain).unwrap();
        assert_eq!(repaired, chain);
        assert_eq!(alloc.num_allocated(), 2);

        let stranger = ReplicaChain::new(
            vec!["9".to_string()],
            0,
            SLOT_MAX,
            ChainStatus::Stable,
            StorageMode::InMemory,
        );
        let err = tree
            .resolve_failures("/sandbox/file.txt", &stranger)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn test_add_replica_to_chain() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file.txt", "/tmp").unwrap();
        let chain = tree.dstatus("/sandbox/file.txt").unwrap().data_blocks()[0].clone();

        let extended = tree
            .add_replica_to_chain("/sandbox/file.txt", &chain)
            .unwrap();
        assert_eq!(extended.block_names, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(
            tree.dstatus("/sandbox/file.txt").unwrap().data_blocks()[0],
            extended
        );
        assert_eq!(alloc.num_allocated(), 2);

        // The prior tail was re-pointed at the new tail and replayed its data.
        let control = sm.control_commands();
        assert!(control.iter().any(|c| c.starts_with("setup_block:0:") && c.ends_with(":1")));
        assert!(control.iter().any(|c| c.starts_with("setup_block:1:") && c.ends_with(":nil")));
        assert!(control.contains(&"forward_all:0".to_string()));
    }

    // ============================================================
    // PERSISTENCE TESTS
    // ============================================================

    #[test]
    fn test_sync() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        tree.sync("/sandbox/file", "/tmp").unwrap();
        assert_eq!(sm.commands(), vec!["sync:0:/tmp/0_65536".to_string()]);
        assert_eq!(
            tree.dstatus("/sandbox/file").unwrap().mode(),
            vec![StorageMode::InMemory]
        );
    }

    #[test]
    fn test_dump_then_load() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        tree.dump("/sandbox/file", "/tmp").unwrap();
        assert_eq!(
            tree.dstatus("/sandbox/file").unwrap().mode(),
            vec![StorageMode::OnDisk]
        );
        assert_eq!(alloc.num_free(), 4);

        tree.load("/sandbox/file", "/tmp").unwrap();
        let status = tree.dstatus("/sandbox/file").unwrap();
        assert_eq!(status.mode(), vec![StorageMode::InMemory]);
        assert_eq!(status.data_blocks()[0].block_names, vec!["1".to_string()]);
        assert_slot_partition(&status);
        assert_eq!(alloc.num_allocated(), 1);

        assert_eq!(
            sm.commands(),
            vec![
                "flush:0:/tmp/0_65536".to_string(),
                "load:1:/tmp/0_65536".to_string(),
            ]
        );

        // Dump of a loaded file flips the mode back; the cycle is idempotent
        // in dstatus mode.
        tree.dump("/sandbox/file", "/tmp").unwrap();
        assert_eq!(
            tree.dstatus("/sandbox/file").unwrap().mode(),
            vec![StorageMode::OnDisk]
        );
    }

    #[test]
    fn test_replicated_dump_resets_non_tails() {
        let (alloc, sm, tree) = fixture(4);

        tree.create("/sandbox/file", "/tmp", 1, 3, 0, Perms::ALL, &no_tags())
            .unwrap();
        tree.dump("/sandbox/file", "/tmp").unwrap();

        // Head and mid are reset; only the tail flushes.
        assert_eq!(
            sm.commands(),
            vec![
                "clear:0".to_string(),
                "clear:1".to_string(),
                "flush:2:/tmp/0_65536".to_string(),
            ]
        );
        assert_eq!(alloc.num_free(), 4);
    }

    // ============================================================
    // LEASE EXPIRY TESTS
    // ============================================================

    #[test]
    fn test_lease_expiry_removes_plain_file() {
        let (alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        tree.handle_lease_expiry("/sandbox/file").unwrap();
        assert!(!tree.exists("/sandbox/file"));
        assert_eq!(alloc.num_free(), 4);
        assert_eq!(sm.commands(), vec!["clear:0".to_string()]);
    }

    #[test]
    fn test_lease_expiry_keeps_pinned_file() {
        let (alloc, sm, tree) = fixture(4);

        tree.create(
            "/sandbox/file",
            "/tmp",
            1,
            1,
            DataStatus::PINNED,
            Perms::ALL,
            &no_tags(),
        )
        .unwrap();
        tree.handle_lease_expiry("/sandbox/file").unwrap();
        assert!(tree.exists("/sandbox/file"));
        assert_eq!(alloc.num_allocated(), 1);
        assert!(sm.commands().is_empty());
    }

    #[test]
    fn test_lease_expiry_flushes_mapped_file() {
        let (alloc, sm, tree) = fixture(4);

        tree.create(
            "/sandbox/file",
            "/tmp",
            1,
            1,
            DataStatus::MAPPED,
            Perms::ALL,
            &no_tags(),
        )
        .unwrap();
        tree.handle_lease_expiry("/sandbox/file").unwrap();
        assert!(tree.exists("/sandbox/file"));
        assert_eq!(
            tree.dstatus("/sandbox/file").unwrap().mode(),
            vec![StorageMode::OnDisk]
        );
        assert_eq!(alloc.num_free(), 4);
        assert_eq!(sm.commands(), vec!["flush:0:/tmp/0_65536".to_string()]);
    }

    #[test]
    fn test_lease_expiry_on_directory_is_recursive() {
        let (alloc, _sm, tree) = fixture(4);

        tree.create(
            "/sandbox/pinned",
            "/tmp",
            1,
            1,
            DataStatus::PINNED,
            Perms::ALL,
            &no_tags(),
        )
        .unwrap();
        tree.create_file("/sandbox/plain", "/tmp").unwrap();

        tree.handle_lease_expiry("/sandbox").unwrap();
        // The plain file went away; the pinned one holds the directory open.
        assert!(!tree.exists("/sandbox/plain"));
        assert!(tree.exists("/sandbox/pinned"));
        assert!(tree.exists("/sandbox"));
        assert_eq!(alloc.num_allocated(), 1);

        tree.create_directories("/sandbox/empty").unwrap();
        tree.handle_lease_expiry("/sandbox/empty").unwrap();
        assert!(!tree.exists("/sandbox/empty"));
    }

    // ============================================================
    // WORKER TESTS
    // ============================================================

    #[test]
    fn test_sync_worker_syncs_mapped_files() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create(
            "/sandbox/file",
            "/tmp",
            1,
            1,
            DataStatus::MAPPED,
            Perms::ALL,
            &no_tags(),
        )
        .unwrap();
        tree.create_file("/sandbox/plain", "/tmp").unwrap();

        let mut worker = SyncWorker::new(tree.clone(), Duration::from_millis(20));
        worker.start();
        std::thread::sleep(Duration::from_millis(300));
        worker.stop();

        assert!(worker.num_epochs() >= 1);
        let commands = sm.commands();
        assert!(commands.iter().any(|c| c.starts_with("sync:0:")));
        // The unmapped file is never synced.
        assert!(!commands.iter().any(|c| c.starts_with("sync:1:")));
    }

    #[test]
    fn test_lease_expiry_worker_removes_stale_files() {
        let (_alloc, _sm, tree) = fixture(4);

        tree.create_file("/sandbox/stale", "/tmp").unwrap();
        tree.create(
            "/sandbox/pinned",
            "/tmp",
            1,
            1,
            DataStatus::PINNED,
            Perms::ALL,
            &no_tags(),
        )
        .unwrap();

        let mut worker = LeaseExpiryWorker::new(
            tree.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
            Duration::ZERO,
        );
        worker.start();
        std::thread::sleep(Duration::from_millis(300));
        worker.stop();

        assert!(worker.num_epochs() >= 1);
        assert!(!tree.exists("/sandbox/stale"));
        assert!(tree.exists("/sandbox/pinned"));
    }

    #[test]
    fn test_file_size_tracker() {
        let (_alloc, sm, tree) = fixture(4);

        tree.create_file("/sandbox/file", "/tmp").unwrap();
        sm.set_storage_size("0", 42);

        let mut tracker = FileSizeTracker::new(tree.clone(), Duration::from_millis(20));
        tracker.start();
        std::thread::sleep(Duration::from_millis(300));
        tracker.stop();

        let tracked = tracker.tracked();
        assert!(tracked.contains(&("/sandbox/file".to_string(), 42)));
        assert_eq!(tracker.num_tracked(), 1);
    }

    // ============================================================
    // ADAPTER TESTS
    // ============================================================

    use axum::Json;
    use axum::extract::Extension;
    use axum::http::StatusCode;

    use crate::directory::handlers;
    use crate::directory::protocol::{CreateRequest, PathRequest, RenameRequest};

    fn create_request(path: &str) -> CreateRequest {
        CreateRequest {
            path: path.to_string(),
            backing_path: "/tmp".to_string(),
            num_blocks: 1,
            chain_length: 1,
            flags: 0,
            permissions: Perms::ALL.bits() as i32,
            tags: BTreeMap::new(),
        }
    }

    fn path_request(path: &str) -> PathRequest {
        PathRequest {
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn test_adapter_create_and_open() {
        let (_alloc, _sm, tree) = fixture(4);

        let created = handlers::handle_create(
            Extension(tree.clone()),
            Json(create_request("/sandbox/file")),
        )
        .await
        .expect("create should succeed");
        assert_eq!(created.0.data_blocks.len(), 1);
        assert_eq!(created.0.storage_modes, vec![0]);
        assert_eq!(created.0.backing_path, "/tmp");

        let opened = handlers::handle_open(
            Extension(tree.clone()),
            Json(path_request("/sandbox/file")),
        )
        .await
        .expect("open should succeed");
        assert_eq!(opened.0.data_blocks[0].block_names, vec!["0".to_string()]);

        let exists = handlers::handle_exists(
            Extension(tree.clone()),
            Json(path_request("/sandbox/file")),
        )
        .await
        .unwrap();
        assert!(exists.0.value);
    }

    #[tokio::test]
    async fn test_adapter_error_mapping() {
        let (_alloc, _sm, tree) = fixture(4);

        let (status, body) = handlers::handle_open(
            Extension(tree.clone()),
            Json(path_request("/missing")),
        )
        .await
        .expect_err("open of a missing path must fail");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.0.error.is_empty());

        handlers::handle_create(
            Extension(tree.clone()),
            Json(create_request("/sandbox/file")),
        )
        .await
        .unwrap();
        let (status, _) = handlers::handle_create(
            Extension(tree.clone()),
            Json(create_request("/sandbox/file")),
        )
        .await
        .expect_err("duplicate create must fail");
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = handlers::handle_rename(
            Extension(tree.clone()),
            Json(RenameRequest {
                old_path: "/sandbox/file".to_string(),
                new_path: "/sandbox/to/".to_string(),
            }),
        )
        .await
        .expect_err("rename onto a trailing slash must fail");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
