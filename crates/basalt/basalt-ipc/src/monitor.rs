//! Node liveness tokens.
//!
//! Every node keeps an exclusive `flock` on `<root>/nodes/<id>.node` for its
//! whole life. The kernel drops the lock when the process dies, so a token
//! whose lock can be taken belongs to a dead node.

use basalt_mmap::lock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const TOKEN_SUFFIX: &str = ".node";

pub(crate) fn nodes_dir(root: &Path) -> PathBuf {
    root.join("nodes")
}

pub(crate) fn token_path(root: &Path, node_id: u64) -> PathBuf {
    nodes_dir(root).join(format!("{node_id:016x}{TOKEN_SUFFIX}"))
}

/// Node id encoded in a token file name.
pub(crate) fn parse_token_name(file_name: &str) -> Option<u64> {
    let hex = file_name.strip_suffix(TOKEN_SUFFIX)?;
    if hex.len() != 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Alive,
    Dead,
    /// No token exists.
    Gone,
}

pub(crate) fn probe(path: &Path) -> io::Result<Liveness> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Liveness::Gone),
        Err(e) => return Err(e),
    };

    if lock::try_lock_shared(&file)? {
        Ok(Liveness::Dead)
    } else {
        Ok(Liveness::Alive)
    }
}

/// Whether the node owning `node_id` still runs. Unreadable tokens count as
/// alive so nothing is reclaimed on a guess.
pub(crate) fn is_alive(root: &Path, node_id: u64) -> bool {
    let path = token_path(root, node_id);
    match probe(&path) {
        Ok(Liveness::Alive) => true,
        Ok(Liveness::Dead | Liveness::Gone) => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot determine node liveness");
            true
        }
    }
}

/// Held token of a running node; removes the token file on drop.
pub(crate) struct Token {
    path: PathBuf,
    _file: File,
}

impl Token {
    /// Publishes a locked token with `contents` for `node_id`.
    ///
    /// The file is written and locked under a temporary name first, so no
    /// observer ever sees an unlocked token of a live node.
    pub(crate) fn create(root: &Path, node_id: u64, contents: &str) -> io::Result<Self> {
        fs::create_dir_all(nodes_dir(root))?;
        let path = token_path(root, node_id);
        let staging = path.with_extension("node.tmp");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&staging)?;
        let published = lock::lock_exclusive(&file)
            .and_then(|_| file.write_all(contents.as_bytes()))
            .and_then(|_| file.sync_data())
            .and_then(|_| fs::rename(&staging, &path));
        if let Err(e) = published {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        Ok(Self { path, _file: file })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove node token");
        }
    }
}
