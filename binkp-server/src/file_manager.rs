//! Outbound queue construction and post-session file triage
//!
//! During a session every received file lands in a private receive
//! directory. Once the session ends the manager files each one where it
//! belongs: flat network queue files become numbered pending packets in
//! the network directory, FTN bundles and packets go to the inbound
//! directory, validated TIC uploads go to the TIC directory, and anything
//! unrecognized is parked in the unknown directory. Moves never overwrite:
//! a name collision logs an error and leaves the loser where it is.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

use crate::flo::{BundleStatus, FloDirective, FloFile, flo_name};
use crate::names::{
    MAX_PENDING_FILES, flat_outbound_name, is_bundle_file, is_packet_file, is_safe_receive_name,
    is_tic_file, pending_name,
};
use crate::net::{Dirs, Network, NetworkKind};
use crate::remote::Remote;
use crate::tic::TicFile;
use crate::transfer::{DiskTransferFile, FloAssociation, TransferFile};

/// Per-session file bookkeeping for one network
pub struct FileManager {
    network: Network,
    dirs: Dirs,
    received: Vec<String>,
}

impl FileManager {
    /// Build the manager and create the session's receive directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the receive directory cannot be created.
    pub fn new(network: Network, dirs: Dirs) -> io::Result<FileManager> {
        fs::create_dir_all(dirs.receive_dir())?;
        Ok(FileManager { network, dirs, received: Vec::new() })
    }

    pub fn dirs(&self) -> &Dirs {
        &self.dirs
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Record a completed receive for post-session triage
    pub fn receive_file(&mut self, name: &str) {
        self.received.push(name.to_string());
    }

    pub fn received_files(&self) -> &[String] {
        &self.received
    }

    /// Build the outbound queue for this session's peer.
    ///
    /// Flat networks offer the single `s<node>.net` queue file when it
    /// exists. FTN networks walk the `.?lo` control files for every
    /// resolved peer address in priority order, offering each referenced
    /// bundle once; the first control file naming a bundle keeps the
    /// association used to apply its directive after delivery.
    pub fn create_transfer_file_list(
        &self,
        remote: &Remote,
        with_crc: bool,
    ) -> Vec<Box<dyn TransferFile + Send>> {
        match self.network.kind {
            NetworkKind::Flat => self.flat_transfer_file_list(remote, with_crc),
            NetworkKind::Ftn => self.ftn_transfer_file_list(remote, with_crc),
        }
    }

    fn flat_transfer_file_list(
        &self,
        remote: &Remote,
        with_crc: bool,
    ) -> Vec<Box<dyn TransferFile + Send>> {
        let node = remote.wwivnet_node();
        if node == 0 {
            debug!("No flat node resolved, nothing to send");
            return Vec::new();
        }
        let path = self.dirs.net_dir().join(flat_outbound_name(node));
        if !path.exists() {
            return Vec::new();
        }
        match DiskTransferFile::outbound(path.clone(), with_crc) {
            Ok(file) => vec![Box::new(file)],
            Err(e) => {
                warn!("Failed to queue {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    fn ftn_transfer_file_list(
        &self,
        remote: &Remote,
        with_crc: bool,
    ) -> Vec<Box<dyn TransferFile + Send>> {
        let outbound = self.dirs.outbound_dir();
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut list: Vec<Box<dyn TransferFile + Send>> = Vec::new();

        for status in BundleStatus::SENDABLE {
            for address in remote.ftn_addresses() {
                let flo_path = outbound.join(flo_name(address, status));
                let flo = match FloFile::load(&flo_path) {
                    Ok(flo) => flo,
                    Err(e) => {
                        warn!("Failed to read {}: {}", flo_path.display(), e);
                        continue;
                    }
                };
                if !flo.is_valid() || !flo.exists() || flo.empty() {
                    continue;
                }
                let entries = flo.entries().to_vec();
                let shared = Arc::new(Mutex::new(flo));
                for entry in entries {
                    if entry.directive == FloDirective::SkipFile {
                        continue;
                    }
                    let bundle = if entry.path.is_absolute() {
                        entry.path.clone()
                    } else {
                        outbound.join(&entry.path)
                    };
                    if !seen.insert(bundle.clone()) {
                        continue;
                    }
                    match DiskTransferFile::outbound(bundle.clone(), with_crc) {
                        Ok(file) => {
                            let file = file.with_flo(FloAssociation {
                                flo: shared.clone(),
                                entry_path: entry.path.clone(),
                                directive: entry.directive,
                            });
                            list.push(Box::new(file));
                        }
                        Err(e) => {
                            warn!("Queued bundle {} unreadable: {}", bundle.display(), e);
                        }
                    }
                }
            }
        }
        list
    }

    /// File received flat queue files as numbered pending packets.
    ///
    /// Each received file moves into the network directory under the first
    /// free `p<0|1>-0-<n>.net` slot. Losing a slot race just probes the
    /// next one.
    pub fn rename_pending_files(&self) {
        for name in &self.received {
            let src = self.dirs.receive_dir().join(name);
            if !src.exists() {
                continue;
            }
            let mut moved = false;
            let mut gave_up = false;
            for sequence in 0..MAX_PENDING_FILES {
                let dest = self.dirs.net_dir().join(pending_name(name, sequence));
                if dest.exists() {
                    continue;
                }
                match move_without_overwrite(&src, &dest) {
                    Ok(()) => {
                        info!("Filed {} as {}", name, dest.display());
                        moved = true;
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                    Err(e) => {
                        error!("Failed to file {}: {}", name, e);
                        gave_up = true;
                    }
                }
                break;
            }
            if !moved && !gave_up {
                error!("No free pending slot for {}, leaving in receive dir", name);
            }
        }
    }

    /// Triage received FTN files into inbound/TIC/unknown directories.
    ///
    /// `tic_password` is the password configured for this link's TIC
    /// sidecars, when any.
    pub fn rename_ftn_pending_files(&self, tic_password: Option<&str>) {
        // Names the first pass decided to leave in the receive dir; the
        // sweep must not shovel those into the unknown pile.
        let mut leave: BTreeSet<String> = BTreeSet::new();

        for name in &self.received {
            if !self.receive_path(name).exists() {
                continue;
            }
            if is_bundle_file(name) || is_packet_file(name) {
                if !self.move_received(name, self.dirs.inbound_dir()) {
                    leave.insert(name.clone());
                }
            }
        }

        for name in &self.received {
            if !is_tic_file(name) || !self.receive_path(name).exists() {
                continue;
            }
            if !self.network.fido.process_tic {
                error!("TIC processing disabled, leaving {} for the unknown pile", name);
                continue;
            }
            self.file_tic(name, tic_password);
        }

        for name in &self.received {
            if leave.contains(name) || !self.receive_path(name).exists() {
                continue;
            }
            self.move_received(name, self.dirs.unknown_dir());
        }
    }

    /// Validate one TIC sidecar and file it with its payload.
    ///
    /// Anything that does not check out sends both files to the unknown
    /// directory.
    fn file_tic(&self, name: &str, tic_password: Option<&str>) {
        let tic = match TicFile::load(&self.receive_path(name)) {
            Ok(tic) => tic,
            Err(e) => {
                error!("Bad TIC file {}: {}", name, e);
                self.move_received(name, self.dirs.unknown_dir());
                return;
            }
        };

        let payload = tic.file.clone();
        if !is_safe_receive_name(&payload) {
            // The sidecar's payload name is as untrusted as a wire offer;
            // never join it into a path.
            error!("Rejecting unsafe payload name in {}: {}", name, payload);
            self.move_received(name, self.dirs.unknown_dir());
            return;
        }
        if !tic.payload_matches(self.dirs.receive_dir()) {
            error!("TIC payload check failed for {} ({})", name, payload);
            self.move_received(name, self.dirs.unknown_dir());
            self.move_received(&payload, self.dirs.unknown_dir());
            return;
        }
        if !tic.password_matches(tic_password) {
            error!("TIC password mismatch for {}", name);
            self.move_received(name, self.dirs.unknown_dir());
            self.move_received(&payload, self.dirs.unknown_dir());
            return;
        }

        let payload_ok = self.move_received(&payload, self.dirs.tic_dir());
        let tic_ok = self.move_received(name, self.dirs.tic_dir());
        if !payload_ok || !tic_ok {
            // A collision mid-filing: park whatever is still here.
            self.move_received(name, self.dirs.unknown_dir());
            self.move_received(&payload, self.dirs.unknown_dir());
        }
    }

    /// Move one received file into `dest_dir` without overwriting.
    ///
    /// Returns whether the file is no longer in the receive directory.
    fn move_received(&self, name: &str, dest_dir: &Path) -> bool {
        let src = self.receive_path(name);
        if !src.exists() {
            return true;
        }
        if let Err(e) = fs::create_dir_all(dest_dir) {
            error!("Failed to create {}: {}", dest_dir.display(), e);
            return false;
        }
        let dest = dest_dir.join(name);
        match move_without_overwrite(&src, &dest) {
            Ok(()) => {
                info!("Filed {} as {}", name, dest.display());
                true
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                error!("Not overwriting {}, leaving {} in receive dir", dest.display(), name);
                false
            }
            Err(e) => {
                error!("Failed to move {} to {}: {}", name, dest.display(), e);
                false
            }
        }
    }

    /// Drop the session's receive directory once it has nothing left
    pub fn remove_receive_dir_if_empty(&self) {
        if let Err(e) = fs::remove_dir(self.dirs.receive_dir()) {
            debug!("Receive dir kept: {}", e);
        }
    }

    fn receive_path(&self, name: &str) -> PathBuf {
        self.dirs.receive_dir().join(name)
    }
}

/// Move by linking to the destination and removing the source.
///
/// Unlike a rename this fails with `AlreadyExists` when the destination is
/// taken, so concurrent sessions cannot clobber each other's files.
fn move_without_overwrite(src: &Path, dest: &Path) -> io::Result<()> {
    fs::hard_link(src, dest)?;
    fs::remove_file(src)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use binkp_common::address::FtnAddress;

    use crate::config::BinkConfig;

    fn addr(s: &str) -> FtnAddress {
        s.parse().unwrap()
    }

    fn flat_network(dir: &Path) -> Network {
        serde_json::from_str(&format!(
            r#"{{"name": "wwivnet", "kind": "flat", "dir": "{}", "node": 1}}"#,
            dir.display()
        ))
        .unwrap()
    }

    fn ftn_network(dir: &Path, process_tic: bool) -> Network {
        serde_json::from_str(&format!(
            r#"{{"name": "fsxnet", "kind": "ftn", "dir": "{}",
                 "address": "21:9/99@fsxnet",
                 "fido": {{"process_tic": {}}}}}"#,
            dir.display(),
            process_tic
        ))
        .unwrap()
    }

    fn manager(network: Network) -> FileManager {
        let dirs = Dirs::for_network(&network, 1);
        FileManager::new(network, dirs).unwrap()
    }

    fn remote_for(network: &Network, target: &str) -> Remote {
        let config: BinkConfig = serde_json::from_str(&format!(
            r#"{{"system_name": "S", "sysop_name": "Z", "networks": [{}]}}"#,
            serde_json::to_string(network).unwrap()
        ))
        .unwrap();
        Remote::for_originating(Arc::new(config), &network.name, addr(target))
    }

    #[test]
    fn test_new_creates_receive_dir() {
        let tmp = TempDir::new().unwrap();
        let network = flat_network(tmp.path());
        let fm = manager(network);
        assert!(fm.dirs().receive_dir().is_dir());
    }

    #[test]
    fn test_flat_list_offers_queue_file() {
        let tmp = TempDir::new().unwrap();
        let network = flat_network(tmp.path());
        fs::write(tmp.path().join("s2.net"), b"packet").unwrap();

        let fm = manager(network.clone());
        let remote = remote_for(&network, "20000:20000/2@wwivnet");
        let list = fm.create_transfer_file_list(&remote, false);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].filename(), "s2.net");
    }

    #[test]
    fn test_flat_list_empty_without_queue_file() {
        let tmp = TempDir::new().unwrap();
        let network = flat_network(tmp.path());
        let fm = manager(network.clone());
        let remote = remote_for(&network, "20000:20000/2@wwivnet");
        assert!(fm.create_transfer_file_list(&remote, false).is_empty());
    }

    #[test]
    fn test_ftn_list_walks_priority_order() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let crash_bundle = out.join("00000001.su0");
        let normal_bundle = out.join("00000002.su0");
        fs::write(&crash_bundle, b"crash").unwrap();
        fs::write(&normal_bundle, b"normal").unwrap();
        // Peer 21:1/100 -> stem 00010064.
        fs::write(out.join("00010064.clo"), format!("^{}\n", crash_bundle.display())).unwrap();
        fs::write(out.join("00010064.flo"), format!("^{}\n", normal_bundle.display())).unwrap();

        let fm = manager(network.clone());
        let remote = remote_for(&network, "21:1/100@fsxnet");
        let list = fm.create_transfer_file_list(&remote, false);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].filename(), "00000001.su0");
        assert_eq!(list[1].filename(), "00000002.su0");
    }

    #[test]
    fn test_ftn_list_dedups_and_skips() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();

        let bundle = out.join("00000001.su0");
        let skipped = out.join("00000002.su0");
        fs::write(&bundle, b"bundle").unwrap();
        fs::write(&skipped, b"skipped").unwrap();
        fs::write(
            out.join("00010064.clo"),
            format!("^{}\n~{}\n", bundle.display(), skipped.display()),
        )
        .unwrap();
        // The same bundle queued again at normal priority is offered once.
        fs::write(out.join("00010064.flo"), format!("^{}\n", bundle.display())).unwrap();

        let fm = manager(network.clone());
        let remote = remote_for(&network, "21:1/100@fsxnet");
        let list = fm.create_transfer_file_list(&remote, false);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].filename(), "00000001.su0");
    }

    #[test]
    fn test_ftn_list_ignores_poll_and_missing_bundles() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();

        fs::write(out.join("00010064.clo"), "").unwrap();
        fs::write(out.join("00010064.flo"), "^/nonexistent/00000009.su0\n").unwrap();

        let fm = manager(network.clone());
        let remote = remote_for(&network, "21:1/100@fsxnet");
        assert!(fm.create_transfer_file_list(&remote, false).is_empty());
    }

    #[test]
    fn test_rename_pending_files_takes_first_free_slot() {
        let tmp = TempDir::new().unwrap();
        let network = flat_network(tmp.path());
        let mut fm = manager(network);
        fs::write(fm.dirs().receive_dir().join("s1.net"), b"a").unwrap();
        fm.receive_file("s1.net");
        // Slot 0 is taken already.
        fs::write(tmp.path().join("p1-0-0.net"), b"old").unwrap();

        fm.rename_pending_files();

        assert!(!fm.dirs().receive_dir().join("s1.net").exists());
        assert_eq!(fs::read(tmp.path().join("p1-0-1.net")).unwrap(), b"a");
        assert_eq!(fs::read(tmp.path().join("p1-0-0.net")).unwrap(), b"old");
    }

    #[test]
    fn test_rename_pending_files_zero_node_prefix() {
        let tmp = TempDir::new().unwrap();
        let network = flat_network(tmp.path());
        let mut fm = manager(network);
        fs::write(fm.dirs().receive_dir().join("s0.net"), b"dead").unwrap();
        fm.receive_file("s0.net");

        fm.rename_pending_files();
        assert!(tmp.path().join("p0-0-0.net").exists());
    }

    #[test]
    fn test_ftn_triage_scenarios() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::write(rdir.join("0000006f.su0"), b"bundle").unwrap();
        fs::write(rdir.join("1a2b3c4d.pkt"), b"packet").unwrap();
        fs::write(rdir.join("random.dat"), b"other").unwrap();
        fm.receive_file("0000006f.su0");
        fm.receive_file("1a2b3c4d.pkt");
        fm.receive_file("random.dat");

        fm.rename_ftn_pending_files(None);

        assert!(fm.dirs().inbound_dir().join("0000006f.su0").exists());
        assert!(fm.dirs().inbound_dir().join("1a2b3c4d.pkt").exists());
        assert!(fm.dirs().unknown_dir().join("random.dat").exists());
        fm.remove_receive_dir_if_empty();
        assert!(!rdir.exists());
    }

    #[test]
    fn test_ftn_triage_collision_leaves_loser() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::create_dir_all(fm.dirs().inbound_dir()).unwrap();
        fs::write(fm.dirs().inbound_dir().join("0000006f.su0"), b"winner").unwrap();
        fs::write(rdir.join("0000006f.su0"), b"loser").unwrap();
        fm.receive_file("0000006f.su0");

        fm.rename_ftn_pending_files(None);

        // The winner is untouched and the loser stays put.
        assert_eq!(
            fs::read(fm.dirs().inbound_dir().join("0000006f.su0")).unwrap(),
            b"winner"
        );
        assert_eq!(fs::read(rdir.join("0000006f.su0")).unwrap(), b"loser");
        assert!(!fm.dirs().unknown_dir().join("0000006f.su0").exists());
        fm.remove_receive_dir_if_empty();
        assert!(rdir.exists());
    }

    #[test]
    fn test_tic_accepted_with_matching_password() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), true);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::write(rdir.join("upload.zip"), b"payload").unwrap();
        fs::write(rdir.join("upload.tic"), "File upload.zip\nSize 7\nPw secret\n").unwrap();
        fm.receive_file("upload.zip");
        fm.receive_file("upload.tic");

        fm.rename_ftn_pending_files(Some("secret"));

        assert!(fm.dirs().tic_dir().join("upload.zip").exists());
        assert!(fm.dirs().tic_dir().join("upload.tic").exists());
        assert!(!fm.dirs().unknown_dir().exists());
    }

    #[test]
    fn test_tic_password_mismatch_goes_unknown() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), true);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::write(rdir.join("upload.zip"), b"payload").unwrap();
        fs::write(rdir.join("upload.tic"), "File upload.zip\nPw wrong\n").unwrap();
        fm.receive_file("upload.zip");
        fm.receive_file("upload.tic");

        fm.rename_ftn_pending_files(Some("secret"));

        assert!(fm.dirs().unknown_dir().join("upload.zip").exists());
        assert!(fm.dirs().unknown_dir().join("upload.tic").exists());
        assert!(!fm.dirs().tic_dir().join("upload.zip").exists());
    }

    #[test]
    fn test_tic_disabled_goes_unknown() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), false);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::write(rdir.join("upload.zip"), b"payload").unwrap();
        fs::write(rdir.join("upload.tic"), "File upload.zip\n").unwrap();
        fm.receive_file("upload.zip");
        fm.receive_file("upload.tic");

        fm.rename_ftn_pending_files(None);

        assert!(fm.dirs().unknown_dir().join("upload.zip").exists());
        assert!(fm.dirs().unknown_dir().join("upload.tic").exists());
    }

    #[test]
    fn test_tic_size_mismatch_goes_unknown() {
        let tmp = TempDir::new().unwrap();
        let network = ftn_network(tmp.path(), true);
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        fs::write(rdir.join("upload.zip"), b"payload").unwrap();
        fs::write(rdir.join("upload.tic"), "File upload.zip\nSize 9999\n").unwrap();
        fm.receive_file("upload.zip");
        fm.receive_file("upload.tic");

        fm.rename_ftn_pending_files(None);

        assert!(fm.dirs().unknown_dir().join("upload.zip").exists());
        assert!(fm.dirs().unknown_dir().join("upload.tic").exists());
    }

    #[test]
    fn test_tic_unsafe_payload_name_quarantines_tic_only() {
        let tmp = TempDir::new().unwrap();
        let network: Network = serde_json::from_str(&format!(
            r#"{{"name": "fsxnet", "kind": "ftn", "dir": "{}",
                 "address": "21:9/99@fsxnet",
                 "fido": {{"process_tic": true, "unknown_dir": "deep/unknown"}}}}"#,
            tmp.path().display()
        ))
        .unwrap();
        let mut fm = manager(network);
        let rdir = fm.dirs().receive_dir().to_path_buf();

        // A file outside the receive dir that the sidecar tries to name.
        fs::write(tmp.path().join("victim.txt"), b"keep me").unwrap();
        fs::write(rdir.join("evil.tic"), "File ../victim.txt\nSize 9999\n").unwrap();
        fm.receive_file("evil.tic");

        fm.rename_ftn_pending_files(None);

        assert_eq!(fs::read(tmp.path().join("victim.txt")).unwrap(), b"keep me");
        assert!(!tmp.path().join("deep").join("victim.txt").exists());
        assert!(fm.dirs().unknown_dir().join("evil.tic").exists());
        fm.remove_receive_dir_if_empty();
        assert!(!rdir.exists());
    }
}
