//! Device discovery: candidate usbfs and hiddev nodes.
//!
//! The usbfs root is walked two levels deep (`<root>/<bus>/<device>`), then the
//! fixed hiddev nodes `<prefix>0` .. `<prefix>15` that exist are appended.
//! Entries whose names start with `.` are skipped. Nothing is opened here;
//! callers filter candidates (usually with [`crate::probe::probe`]).

use crate::config::Config;
use crate::device::ProductId;
use crate::error::{Error, Result};
use crate::probe;
use serde::Serialize;
use std::ffi::OsStr;
use std::fs::{self, ReadDir};
use std::ops::Range;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// First existing usbfs root: the override, then the well-known fallbacks.
pub fn usbfs_root(config: &Config) -> Result<PathBuf> {
    config
        .usbfs_candidates()
        .find(|candidate| fs::metadata(candidate).is_ok())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = config
                .usbfs_candidates()
                .map(|p| p.display().to_string())
                .collect();
            Error::EnumerationRootNotFound(tried.join(", "))
        })
}

fn is_hidden(name: &OsStr) -> bool {
    name.as_bytes().first() == Some(&b'.')
}

/// `dir + "/" + name` without normalizing `dir`.
///
/// Candidate paths feed the lock bucket hash, so the root is kept byte for
/// byte: a root ending in `/` yields `root//bus/dev`.
fn join_verbatim(dir: &Path, name: &OsStr) -> PathBuf {
    let mut path = dir.as_os_str().to_os_string();
    path.push("/");
    path.push(name);
    PathBuf::from(path)
}

/// Lazy sequence of candidate device paths.
pub struct Candidates {
    root: PathBuf,
    buses: Option<ReadDir>,
    devices: Option<(PathBuf, ReadDir)>,
    hid_prefix: String,
    hid_nodes: Range<usize>,
}

impl Candidates {
    fn next_usbfs(&mut self) -> Option<PathBuf> {
        loop {
            if let Some((bus_dir, devices)) = self.devices.as_mut() {
                match devices.next() {
                    Some(Ok(entry)) if !is_hidden(&entry.file_name()) => {
                        return Some(join_verbatim(bus_dir, &entry.file_name()));
                    }
                    Some(_) => continue,
                    None => self.devices = None,
                }
            }

            let buses = self.buses.as_mut()?;
            match buses.next() {
                Some(Ok(entry)) if !is_hidden(&entry.file_name()) => {
                    let bus_dir = join_verbatim(&self.root, &entry.file_name());
                    // Plain files at bus level fail read_dir and contribute nothing.
                    self.devices = fs::read_dir(&bus_dir).ok().map(|devices| (bus_dir, devices));
                }
                Some(_) => {}
                None => self.buses = None,
            }
        }
    }

    fn next_hid(&mut self) -> Option<PathBuf> {
        self.hid_nodes
            .by_ref()
            .map(|index| PathBuf::from(format!("{}{}", self.hid_prefix, index)))
            .find(|node| fs::metadata(node).is_ok())
    }
}

impl Iterator for Candidates {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        let next = self.next_usbfs().or_else(|| self.next_hid());
        if let Some(path) = &next {
            trace!(path = %path.display(), "Candidate device");
        }
        next
    }
}

/// Start discovery. Fails only if no usbfs root exists.
pub fn candidates(config: &Config) -> Result<Candidates> {
    let root = usbfs_root(config)?;
    debug!(root = %root.display(), "Enumerating usbfs devices");
    Ok(Candidates {
        buses: fs::read_dir(&root).ok(),
        root,
        devices: None,
        hid_prefix: config.hid_prefix.clone(),
        hid_nodes: 0..config.hid_node_count,
    })
}

/// Count the candidates accepted by `predicate`, which sees every candidate once.
pub fn enumerate<F>(config: &Config, mut predicate: F) -> Result<usize>
where
    F: FnMut(&Path) -> bool,
{
    let count = candidates(config)?.filter(|path| predicate(path)).count();
    debug!(count, "Device enumeration complete");
    Ok(count)
}

/// A supported dongle found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub product: ProductId,
    pub pid: u32,
}

/// Discover all connected Guardant dongles by probing every candidate.
pub fn discover_devices(config: &Config) -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();
    enumerate(config, |path| {
        let Some(path) = path.to_str() else {
            return false;
        };
        match probe::probe(config, path) {
            Ok(product) => {
                devices.push(DeviceInfo {
                    path: path.to_string(),
                    product,
                    pid: product.pid(),
                });
                true
            }
            Err(_) => false,
        }
    })?;
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config_for(root: &Path, hid_prefix: &Path) -> Config {
        Config {
            lock_dir: root.to_path_buf(),
            usbfs_override: Some(root.join("usb")),
            usbfs_fallbacks: vec![],
            hid_prefix: hid_prefix.to_str().unwrap().to_string(),
            hid_node_count: 16,
        }
    }

    /// Build `usb/<bus>/<device>` with `buses` × `devices` files plus dotfiles.
    fn build_tree(root: &Path, buses: usize, devices: usize) {
        let usb = root.join("usb");
        fs::create_dir(&usb).unwrap();
        fs::write(usb.join(".hidden"), b"").unwrap();
        fs::create_dir(usb.join(".dotbus")).unwrap();
        fs::write(usb.join(".dotbus").join("001"), b"").unwrap();
        for bus in 1..=buses {
            let bus_dir = usb.join(format!("{bus:03}"));
            fs::create_dir(&bus_dir).unwrap();
            fs::write(bus_dir.join(".lock"), b"").unwrap();
            for dev in 1..=devices {
                fs::write(bus_dir.join(format!("{dev:03}")), b"").unwrap();
            }
        }
    }

    #[test]
    fn root_prefers_existing_override() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("usb")).unwrap();
        let config = config_for(dir.path(), &dir.path().join("grdhid"));
        assert_eq!(usbfs_root(&config).unwrap(), dir.path().join("usb"));
    }

    #[test]
    fn root_falls_back_when_override_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback");
        fs::create_dir(&fallback).unwrap();
        let config = Config {
            usbfs_fallbacks: vec![dir.path().join("absent"), fallback.clone()],
            ..config_for(dir.path(), &dir.path().join("grdhid"))
        };
        assert_eq!(usbfs_root(&config).unwrap(), fallback);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path(), &dir.path().join("grdhid"));
        let err = enumerate(&config, |_| true).unwrap_err();
        assert!(matches!(err, Error::EnumerationRootNotFound(_)));
    }

    #[test]
    fn walks_every_device_once_skipping_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), 3, 4);
        let config = config_for(dir.path(), &dir.path().join("grdhid"));

        let mut seen = Vec::new();
        let count = enumerate(&config, |path| {
            seen.push(path.to_path_buf());
            true
        })
        .unwrap();

        assert_eq!(count, 12);
        assert_eq!(seen.len(), 12);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 12);
        for path in &seen {
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(!name.starts_with('.'));
            assert_eq!(path.parent().unwrap().parent().unwrap(), dir.path().join("usb"));
        }
    }

    #[test]
    fn root_is_joined_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), 1, 1);
        let root = format!("{}/", dir.path().join("usb").display());
        let config = Config {
            usbfs_override: Some(PathBuf::from(&root)),
            ..config_for(dir.path(), &dir.path().join("grdhid"))
        };

        // Path equality ignores repeated separators; compare the raw strings.
        let all: Vec<String> = candidates(&config)
            .unwrap()
            .map(|p| p.to_str().unwrap().to_string())
            .collect();
        assert_eq!(all, vec![format!("{root}/001/001")]);
    }

    #[test]
    fn count_is_number_of_accepted_candidates() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), 2, 5);
        let config = config_for(dir.path(), &dir.path().join("grdhid"));
        let mut calls = 0;
        let count = enumerate(&config, |path| {
            calls += 1;
            path.ends_with("001") || path.ends_with("003")
        })
        .unwrap();
        assert_eq!(calls, 10);
        assert_eq!(count, 4);
    }

    #[test]
    fn existing_hid_nodes_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path(), 1, 2);
        let prefix = dir.path().join("grdhid");
        for n in [0, 7, 15, 16] {
            fs::write(format!("{}{}", prefix.display(), n), b"").unwrap();
        }
        let config = config_for(dir.path(), &prefix);

        let all: Vec<PathBuf> = candidates(&config).unwrap().collect();
        assert_eq!(all.len(), 2 + 3);
        let hid: Vec<String> = all[2..]
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(hid, vec!["grdhid0", "grdhid7", "grdhid15"]);
    }

    #[test]
    fn empty_root_yields_only_hid_nodes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("usb")).unwrap();
        let prefix = dir.path().join("grdhid");
        fs::write(format!("{}3", prefix.display()), b"").unwrap();
        let config = config_for(dir.path(), &prefix);
        assert_eq!(enumerate(&config, |_| true).unwrap(), 1);
        assert_eq!(enumerate(&config, |_| false).unwrap(), 0);
    }
}
