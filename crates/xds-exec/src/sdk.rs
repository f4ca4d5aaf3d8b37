use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ids::SdkId;

const ENV_SETUP_PREFIX: &str = "environment-setup";

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("cannot retrieve environment setup file in {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no environment setup file found in {0}")]
    MissingEnvFile(PathBuf),
    #[error("more than one environment setup file found in {0}")]
    AmbiguousEnvFile(PathBuf),
}

/// Cross SDK installed as `.../<profile>/<version>/<arch>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrossSdk {
    pub id: SdkId,
    pub name: String,
    pub profile: String,
    pub version: String,
    pub arch: String,
    pub path: PathBuf,
    pub env_file: PathBuf,
}

impl CrossSdk {
    pub fn from_path(path: &Path) -> Result<Self, SdkError> {
        let arch = component_name(Some(path));
        let version_dir = path.parent();
        let version = component_name(version_dir);
        let profile = component_name(version_dir.and_then(Path::parent));

        let env_file = find_env_file(path)?;

        Ok(Self {
            id: sdk_id(&profile, &arch, &version),
            name: format!("{arch}  ({version})"),
            profile,
            version,
            arch,
            path: path.to_path_buf(),
            env_file,
        })
    }

    /// Shell words that load the SDK environment.
    pub fn env_cmd(&self) -> [String; 2] {
        [".".to_string(), self.env_file.display().to_string()]
    }
}

/// Name-based so the same SDK keeps its id across restarts.
pub fn sdk_id(profile: &str, arch: &str, version: &str) -> SdkId {
    let name = format!("{profile}_{arch}_{version}");
    SdkId::from_uuid(Uuid::new_v3(&Uuid::nil(), name.as_bytes()))
}

fn component_name(path: Option<&Path>) -> String {
    path.and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn find_env_file(dir: &Path) -> Result<PathBuf, SdkError> {
    let entries = fs::read_dir(dir).map_err(|source| SdkError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut found = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(ENV_SETUP_PREFIX) {
            continue;
        }
        if found.is_some() {
            return Err(SdkError::AmbiguousEnvFile(dir.to_path_buf()));
        }
        found = Some(entry.path());
    }
    found.ok_or_else(|| SdkError::MissingEnvFile(dir.to_path_buf()))
}

/// SDKs found under one root directory, plus the current selection.
#[derive(Clone, Debug, Default)]
pub struct SdkRegistry {
    sdks: Vec<CrossSdk>,
    current: Option<SdkId>,
}

impl SdkRegistry {
    pub fn new(sdks: Vec<CrossSdk>) -> Self {
        let current = sdks.first().map(|sdk| sdk.id);
        Self { sdks, current }
    }

    /// Loads every `<root>/<profile>/<version>/<arch>` directory. Entries that do not
    /// look like an SDK are skipped.
    pub fn scan(root: &Path) -> Self {
        let mut sdks = Vec::new();
        for arch_dir in dirs_at_depth(root, 3) {
            match CrossSdk::from_path(&arch_dir) {
                Ok(sdk) => {
                    debug!(sdk = %sdk.id, path = %arch_dir.display(), "sdk registered");
                    sdks.push(sdk);
                }
                Err(err) => warn!("skipping {}: {err}", arch_dir.display()),
            }
        }
        sdks.sort_by(|a, b| a.path.cmp(&b.path));
        Self::new(sdks)
    }

    pub fn list(&self) -> &[CrossSdk] {
        &self.sdks
    }

    pub fn get(&self, id: &SdkId) -> Option<&CrossSdk> {
        self.sdks.iter().find(|sdk| &sdk.id == id)
    }

    pub fn current_id(&self) -> Option<SdkId> {
        self.current
    }

    /// Returns false and keeps the previous selection when `id` is unknown.
    pub fn select(&mut self, id: SdkId) -> bool {
        if self.get(&id).is_none() {
            return false;
        }
        self.current = Some(id);
        true
    }
}

fn dirs_at_depth(root: &Path, depth: usize) -> Vec<PathBuf> {
    let mut level = vec![root.to_path_buf()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for dir in &level {
            let Ok(entries) = fs::read_dir(dir) else {
                continue;
            };
            next.extend(
                entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.is_dir()),
            );
        }
        level = next;
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sdk(root: &Path, profile: &str, version: &str, arch: &str) -> PathBuf {
        let dir = root.join(profile).join(version).join(arch);
        fs::create_dir_all(&dir).expect("sdk dir");
        fs::write(
            dir.join(format!("environment-setup-{arch}-agl-linux")),
            "export CC=gcc\n",
        )
        .expect("env file");
        dir
    }

    #[test]
    fn from_path_splits_profile_version_arch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = make_sdk(tmp.path(), "poky-agl", "4.0.1", "aarch64");

        let sdk = CrossSdk::from_path(&dir).expect("sdk");

        assert_eq!(sdk.profile, "poky-agl");
        assert_eq!(sdk.version, "4.0.1");
        assert_eq!(sdk.arch, "aarch64");
        assert_eq!(sdk.name, "aarch64  (4.0.1)");
        assert!(sdk
            .env_file
            .ends_with("environment-setup-aarch64-agl-linux"));
        assert_eq!(sdk.id, sdk_id("poky-agl", "aarch64", "4.0.1"));
    }

    #[test]
    fn id_is_stable_and_depends_on_all_parts() {
        assert_eq!(sdk_id("p", "a", "1"), sdk_id("p", "a", "1"));
        assert_ne!(sdk_id("p", "a", "1"), sdk_id("p", "a", "2"));
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("p").join("1").join("x86-64");
        fs::create_dir_all(&dir).expect("dir");

        let err = CrossSdk::from_path(&dir).expect_err("no env file");
        assert!(matches!(err, SdkError::MissingEnvFile(_)));
    }

    #[test]
    fn two_env_files_are_ambiguous() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = make_sdk(tmp.path(), "p", "1", "arm");
        fs::write(dir.join("environment-setup-other"), "").expect("second env");

        let err = CrossSdk::from_path(&dir).expect_err("ambiguous");
        assert!(matches!(err, SdkError::AmbiguousEnvFile(_)));
    }

    #[test]
    fn scan_skips_broken_entries_and_selects_first() {
        let tmp = tempfile::tempdir().expect("tempdir");
        make_sdk(tmp.path(), "agl", "5.0", "aarch64");
        make_sdk(tmp.path(), "agl", "5.0", "x86-64");
        fs::create_dir_all(tmp.path().join("agl").join("5.0").join("broken")).expect("broken");

        let mut registry = SdkRegistry::scan(tmp.path());

        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.current_id(), Some(registry.list()[0].id));

        let second = registry.list()[1].id;
        assert!(registry.select(second));
        assert_eq!(registry.current_id(), Some(second));
        assert!(!registry.select(sdk_id("nope", "nope", "nope")));
        assert_eq!(registry.current_id(), Some(second));
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let registry = SdkRegistry::scan(Path::new("/nonexistent/xds/sdks"));
        assert!(registry.list().is_empty());
        assert!(registry.current_id().is_none());
    }
}
