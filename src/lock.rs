use std::fs;
use std::path::{Path, PathBuf};

/// Exclusive hold on one state file, so two CLI runs never share a
/// coordinator's view of it. Released when dropped.
#[must_use = "the state file is unlocked when StateLock is dropped"]
pub struct StateLock {
    file: fslock::LockFile,
    path: PathBuf,
}

impl StateLock {
    /// The `.lock` file guarding the state.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for StateLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLock")
            .field("path", &self.path)
            .field("owned", &self.file.owns_lock())
            .finish()
    }
}

/// `outreach-state.json` is guarded by `outreach-state.json.lock` beside it.
pub fn lock_path_for(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "outreach-state".into());
    name.push(".lock");
    state_path.with_file_name(name)
}

/// Lock `state_path` for this process, creating its directory if needed.
///
/// The holder's PID is written into the lock file itself, so a refused caller
/// can say who has it.
pub fn acquire(state_path: &Path) -> Result<StateLock, String> {
    if let Some(dir) = state_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
    }

    let path = lock_path_for(state_path);
    let mut file = fslock::LockFile::open(&path)
        .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;

    let locked = file
        .try_lock_with_pid()
        .map_err(|e| format!("Failed to lock {}: {}", path.display(), e))?;
    if locked {
        return Ok(StateLock { file, path });
    }

    let holder = fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    Err(match holder {
        Some(pid) => format!(
            "Another outreach process (PID {}) is using {}",
            pid,
            state_path.display()
        ),
        None => format!(
            "Another outreach process is using {} (lock: {})",
            state_path.display(),
            path.display()
        ),
    })
}
