use serde::{Deserialize, Serialize};

use crate::ids::{CommandId, SdkId};

/// Build of a project sub-directory with the selected SDK.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(rename = "id")]
    pub project_id: String,
    #[serde(rename = "rpath", default)]
    pub subpath: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "sdkid", default, skip_serializing_if = "Option::is_none")]
    pub sdk_id: Option<SdkId>,
}

/// Arbitrary command run from inside a project folder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub id: String,
    /// Relative path inside the project.
    #[serde(default)]
    pub rpath: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "sdkid", default, skip_serializing_if = "Option::is_none")]
    pub sdk_id: Option<SdkId>,
    /// Completion timeout in seconds, 0 selects the service default.
    #[serde(rename = "timeout", default)]
    pub timeout_secs: u64,
}

impl From<BuildRequest> for ExecRequest {
    fn from(req: BuildRequest) -> Self {
        Self {
            id: req.project_id,
            rpath: req.subpath,
            cmd: "make".into(),
            args: req.args,
            sdk_id: req.sdk_id,
            timeout_secs: 0,
        }
    }
}

/// One chunk of output of a running command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    #[serde(rename = "cmdID")]
    pub cmd_id: CommandId,
    pub timestamp: i64,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Sent once when a command has exited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecExit {
    #[serde(rename = "cmdID")]
    pub cmd_id: CommandId,
    pub timestamp: i64,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}
