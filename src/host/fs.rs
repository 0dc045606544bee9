//! Host filesystem capability (stat/chown/chmod/mkdir)

use reconcile::{Error, Filesystem, OwnershipPolicy, PathStat, Result};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt, lchown};
use std::path::Path;
use walkdir::WalkDir;

/// The local filesystem
pub struct HostFilesystem;

impl HostFilesystem {
    /// First entry below `root` not owned by `uid:gid`
    fn find_foreign(root: &Path, uid: u32, gid: u32) -> Result<Option<(std::path::PathBuf, u32, u32)>> {
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| Error::Filesystem {
                path: e.path().unwrap_or(root).to_path_buf(),
                message: e.to_string(),
                retryable: false,
            })?;
            let meta = entry
                .metadata()
                .map_err(|e| Error::Filesystem {
                    path: entry.path().to_path_buf(),
                    message: e.to_string(),
                    retryable: false,
                })?;
            if meta.uid() != uid || meta.gid() != gid {
                return Ok(Some((entry.path().to_path_buf(), meta.uid(), meta.gid())));
            }
        }
        Ok(None)
    }

    fn chown_tree(root: &Path, uid: u32, gid: u32) -> Result<usize> {
        let mut changed = 0;
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| Error::Filesystem {
                path: e.path().unwrap_or(root).to_path_buf(),
                message: e.to_string(),
                retryable: false,
            })?;
            lchown(entry.path(), Some(uid), Some(gid))
                .map_err(|e| Error::filesystem(entry.path(), &e))?;
            changed += 1;
        }
        Ok(changed)
    }
}

impl Filesystem for HostFilesystem {
    fn stat(&self, path: &Path) -> Result<Option<PathStat>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(PathStat {
                uid: meta.uid(),
                gid: meta.gid(),
                mode: meta.mode() & 0o7777,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::filesystem(path, &e)),
        }
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| Error::filesystem(path, &e))?;
        // The umask applies to mkdir, so set the bits explicitly
        self.set_permissions(path, mode)
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32, policy: OwnershipPolicy) -> Result<()> {
        match policy {
            OwnershipPolicy::Fail => {
                if let Some((entry, found_uid, found_gid)) = Self::find_foreign(path, uid, gid)? {
                    return Err(Error::Filesystem {
                        path: entry,
                        message: format!(
                            "owned by {}:{}, expected {}:{} (set ownership_policy = \"recursive\" to rewrite the tree)",
                            found_uid, found_gid, uid, gid
                        ),
                        retryable: false,
                    });
                }
                lchown(path, Some(uid), Some(gid)).map_err(|e| Error::filesystem(path, &e))
            }
            OwnershipPolicy::Recursive => {
                let changed = Self::chown_tree(path, uid, gid)?;
                log::debug!("Changed owner of {} entries under {}", changed, path.display());
                Ok(())
            }
        }
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| Error::filesystem(path, &e))
    }
}
