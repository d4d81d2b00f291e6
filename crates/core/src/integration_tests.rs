//! Integration tests: exercise full flows against synthetic device files.
//!
//! Regular files stand in for usbfs nodes (their contents play the descriptor
//! stream) and a temporary directory holds the lock buckets, so locking,
//! probing, enumeration and the exchange engine run end to end without hardware.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::device::ProductId;
    use crate::enumerate::{self, discover_devices};
    use crate::error::Error;
    use crate::lock::{lock_bucket, LockFile};
    use crate::probe;
    use crate::protocol::{self, exchange_with};
    use crate::session::DeviceSession;
    use crate::transport::mock::{Event, MockAttach, MockTransport};
    use crate::transport::TransportKind;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                lock_dir: dir.path().join("locks"),
                usbfs_override: Some(dir.path().join("usb")),
                usbfs_fallbacks: vec![],
                hid_prefix: dir.path().join("grdhid").to_str().unwrap().to_string(),
                hid_node_count: 16,
            };
            std::fs::create_dir(&config.lock_dir).unwrap();
            Self { dir, config }
        }

        /// Create a fake device file with the given contents.
        fn device(&self, name: &str, contents: &[u8]) -> String {
            let path = self.dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, contents).unwrap();
            path.to_str().unwrap().to_string()
        }

        /// Assert nobody holds the lock for `path` any more.
        fn assert_unlocked(&self, path: &str) {
            let (tx, rx) = mpsc::channel();
            let config = self.config.clone();
            let path = path.to_string();
            thread::spawn(move || {
                let acquired = LockFile::acquire(&config, &path).and_then(|l| l.release());
                let _ = tx.send(acquired.is_ok());
            });
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(5)),
                Ok(true),
                "lock still held"
            );
        }
    }

    fn descriptor(pid: u8) -> Vec<u8> {
        let mut d = vec![0u8; 18];
        d[0] = 18;
        d[1] = 1;
        d[8] = 0x89;
        d[9] = 0x0A;
        d[10] = pid;
        d
    }

    /// Another file name in `dir` whose path hashes into the same bucket as `path`.
    fn colliding_name(dir: &Path, path: &str) -> PathBuf {
        let bucket = lock_bucket(path);
        (0..10_000)
            .map(|n| dir.join(format!("collide{n}")))
            .find(|p| {
                let s = p.to_str().unwrap();
                s != path && lock_bucket(s) == bucket
            })
            .unwrap()
    }

    /// Another file name in `dir` whose path hashes into a different bucket.
    fn distinct_name(dir: &Path, path: &str) -> PathBuf {
        let bucket = lock_bucket(path);
        (0..10_000)
            .map(|n| dir.join(format!("other{n}")))
            .find(|p| lock_bucket(p.to_str().unwrap()) != bucket)
            .unwrap()
    }

    #[test]
    fn probe_recognizes_raw_descriptors() {
        let fx = Fixture::new();
        for product in ProductId::RAW {
            let path = fx.device(&format!("dev{:02x}", product.pid()), &descriptor(product.pid() as u8));
            assert_eq!(probe::probe(&fx.config, &path).unwrap(), product);
            fx.assert_unlocked(&path);
        }
    }

    #[test]
    fn probe_rejects_foreign_descriptor_and_unlocks() {
        let fx = Fixture::new();
        let path = fx.device("mouse", &descriptor(0x42));
        let err = probe::probe(&fx.config, &path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDevice(_)));
        fx.assert_unlocked(&path);
    }

    #[test]
    fn probe_short_descriptor_fails() {
        let fx = Fixture::new();
        let path = fx.device("short", &[0x12, 0x01, 0x00]);
        assert!(matches!(
            probe::probe(&fx.config, &path),
            Err(Error::TransferShort { actual: 3, .. })
        ));
        fx.assert_unlocked(&path);
    }

    #[test]
    fn probe_hid_node_that_is_not_hiddev_fails() {
        let fx = Fixture::new();
        let path = format!("{}0", fx.config.hid_prefix);
        std::fs::write(&path, descriptor(0x08)).unwrap();
        // HID prefix selects the devinfo ioctl, which a regular file rejects.
        assert!(probe::probe(&fx.config, &path).is_err());
        fx.assert_unlocked(&path);
    }

    #[test]
    fn exchange_moves_all_packets_and_unlocks() {
        let fx = Fixture::new();
        let path = fx.device("dongle", &[]);
        let attach = MockAttach::new(MockTransport::new());

        let out: Vec<u8> = (0..32).collect();
        let mut input = vec![0u8; 16];
        exchange_with(&fx.config, &path, &attach, 8, &out, &mut input).unwrap();

        let events = attach.transport.events();
        assert_eq!(events.last(), Some(&Event::Release));
        let writes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(writes, out.chunks(8).map(<[u8]>::to_vec).collect::<Vec<_>>());
        assert_eq!(input, (0..16).collect::<Vec<u8>>());
        fx.assert_unlocked(&path);
    }

    #[test]
    fn exchange_failure_mid_loop_still_unlocks() {
        let fx = Fixture::new();
        let path = fx.device("dongle", &[]);
        let attach = MockAttach::new(MockTransport::failing_at(2));

        let mut input = vec![0u8; 8];
        let err = exchange_with(&fx.config, &path, &attach, 8, &[0u8; 24], &mut input).unwrap_err();
        assert!(matches!(err, Error::TransferTimeout(_)));
        assert_eq!(attach.transport.events().last(), Some(&Event::Release));
        fx.assert_unlocked(&path);
    }

    #[test]
    fn release_failure_fails_a_complete_exchange() {
        let fx = Fixture::new();
        let path = fx.device("dongle", &[]);
        let mut transport = MockTransport::new();
        transport.fail_release = true;
        let attach = MockAttach::new(transport);

        let mut input = vec![0u8; 4];
        let err = exchange_with(&fx.config, &path, &attach, 4, &[1, 2, 3, 4], &mut input).unwrap_err();
        assert!(matches!(err, Error::ResourceRelease { .. }));
        // The data still moved; only the outcome is escalated.
        assert_eq!(input, vec![0, 1, 2, 3]);
        fx.assert_unlocked(&path);
    }

    #[test]
    fn attach_failure_closes_session() {
        let fx = Fixture::new();
        let path = fx.device("dongle", &[]);
        let mut attach = MockAttach::new(MockTransport::new());
        attach.fail_attach = true;

        let err = exchange_with(&fx.config, &path, &attach, 4, &[0; 4], &mut [0; 4]).unwrap_err();
        assert!(matches!(err, Error::InterfaceClaimFailed(_)));
        assert!(attach.transport.events().is_empty());
        fx.assert_unlocked(&path);
    }

    #[test]
    fn invalid_lengths_never_open_the_device() {
        let fx = Fixture::new();
        let attach = MockAttach::new(MockTransport::new());
        let err = exchange_with(&fx.config, "/nonexistent", &attach, 8, &[0; 12], &mut [0; 8]).unwrap_err();
        assert!(matches!(err, Error::ProtocolLengthInvalid { .. }));

        let mut hid = MockAttach::new(MockTransport::new());
        hid.kind = TransportKind::Hid;
        let err = exchange_with(&fx.config, "/nonexistent", &hid, 32, &[0; 32], &mut [0; 32]).unwrap_err();
        assert!(matches!(err, Error::ProtocolLengthInvalid { .. }));
    }

    #[test]
    fn real_bulk_transport_on_plain_file_fails_to_claim() {
        let fx = Fixture::new();
        let path = fx.device("not-usbfs", &descriptor(0x08));
        let err = protocol::exchange(&fx.config, &path, 0x08, 8, &[0; 8], &mut [0; 8]).unwrap_err();
        assert!(matches!(err, Error::InterfaceClaimFailed(_)));
        fx.assert_unlocked(&path);
    }

    #[test]
    fn real_hid_transport_on_plain_file_fails_to_attach() {
        let fx = Fixture::new();
        let path = fx.device("not-hiddev", &[]);
        let err = protocol::exchange(&fx.config, &path, 0x0C, 64, &[0; 64], &mut [0; 64]).unwrap_err();
        assert!(matches!(err, Error::InterfaceClaimFailed(_)));
        fx.assert_unlocked(&path);
    }

    #[test]
    fn same_path_sessions_serialize() {
        let fx = Fixture::new();
        let path = fx.device("shared", &[]);
        let first_closed = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = mpsc::channel();

        let holder = {
            let config = fx.config.clone();
            let path = path.clone();
            let first_closed = Arc::clone(&first_closed);
            thread::spawn(move || {
                let session = DeviceSession::open(&config, &path).unwrap();
                opened_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(300));
                first_closed.store(true, Ordering::SeqCst);
                session.close().unwrap();
            })
        };

        opened_rx.recv().unwrap();
        let second = DeviceSession::open(&fx.config, &path).unwrap();
        assert!(first_closed.load(Ordering::SeqCst));
        second.close().unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn colliding_paths_serialize() {
        let fx = Fixture::new();
        let first = fx.device("dongle", &[]);
        let second = colliding_name(fx.dir.path(), &first);
        std::fs::write(&second, b"").unwrap();
        let second = second.to_str().unwrap().to_string();
        assert_ne!(first, second);
        assert_eq!(lock_bucket(&first), lock_bucket(&second));

        let first_closed = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = mpsc::channel();
        let holder = {
            let config = fx.config.clone();
            let first_closed = Arc::clone(&first_closed);
            thread::spawn(move || {
                let session = DeviceSession::open(&config, &first).unwrap();
                opened_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(300));
                first_closed.store(true, Ordering::SeqCst);
                session.close().unwrap();
            })
        };

        opened_rx.recv().unwrap();
        let session = DeviceSession::open(&fx.config, &second).unwrap();
        assert!(first_closed.load(Ordering::SeqCst));
        session.close().unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn different_buckets_do_not_block() {
        let fx = Fixture::new();
        let first = fx.device("dongle", &[]);
        let second = distinct_name(fx.dir.path(), &first);
        std::fs::write(&second, b"").unwrap();
        let second = second.to_str().unwrap().to_string();

        let held = DeviceSession::open(&fx.config, &first).unwrap();
        let (tx, rx) = mpsc::channel();
        let config = fx.config.clone();
        thread::spawn(move || {
            let opened = DeviceSession::open(&config, &second).and_then(|s| s.close());
            let _ = tx.send(opened.is_ok());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        held.close().unwrap();
    }

    #[test]
    fn discovery_finds_only_dongles() {
        let fx = Fixture::new();
        let sign = fx.device("usb/001/002", &descriptor(0x08));
        let code = fx.device("usb/002/005", &descriptor(0xC3));
        fx.device("usb/001/001", &descriptor(0x00));
        fx.device("usb/002/001", &[0u8; 4]);
        fx.device("usb/002/.hidden", &descriptor(0x09));

        let mut found = discover_devices(&fx.config).unwrap();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        let summary: Vec<_> = found.iter().map(|d| (d.path.clone(), d.product)).collect();
        assert_eq!(
            summary,
            vec![(sign, ProductId::SignTime), (code, ProductId::CodeWinUsb)]
        );
    }

    #[test]
    fn enumerate_counts_probe_matches_including_hid_nodes() {
        let fx = Fixture::new();
        fx.device("usb/001/002", &descriptor(0x09));
        fx.device("usb/001/003", &descriptor(0x77));
        let hid = format!("{}4", fx.config.hid_prefix);
        std::fs::write(&hid, b"").unwrap();

        let mut visited = 0;
        let count = enumerate::enumerate(&fx.config, |path| {
            visited += 1;
            probe::probe(&fx.config, path.to_str().unwrap()).is_ok()
        })
        .unwrap();
        assert_eq!(visited, 3);
        assert_eq!(count, 1);
    }
}
