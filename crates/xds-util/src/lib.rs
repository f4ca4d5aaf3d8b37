use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;

pub const DEFAULT_SHELL: &str = "/bin/sh";
/// One day, matching the server-side default when a request carries no timeout.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 24 * 60 * 60;

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDS_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/xds")
    } else {
        PathBuf::from("/tmp/xds")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// command output.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warn".parse()?),
        )
        .try_init()
        .map_err(|err| err as Box<dyn std::error::Error>)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn write_json_atomic_creates_parents_and_leaves_no_tmp() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("state").join("sample.json");
        let value = Sample {
            name: "demo".into(),
            count: 3,
        };

        write_json_atomic(&path, &value).expect("write");

        let data = fs::read_to_string(&path).expect("read back");
        let parsed: Sample = serde_json::from_str(&data).expect("parse");
        assert_eq!(parsed, value);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn expand_user_leaves_plain_paths_alone() {
        assert_eq!(expand_user("/opt/sdk"), PathBuf::from("/opt/sdk"));
        assert_eq!(expand_user("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn init_tracing_installs_the_subscriber_once() {
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_err());
    }
}
