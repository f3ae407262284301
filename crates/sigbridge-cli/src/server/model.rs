use serde::{Deserialize, Serialize};
use sigbridge::{SignOutput, SignerStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    pub cmd: String,
    /// Payload as hex
    pub src: String,
    pub seq: i32,
}

/// Sign values as upper-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueResponse {
    pub token: String,
    pub extra: String,
    pub sign: String,
}

impl From<&SignOutput> for ValueResponse {
    fn from(output: &SignOutput) -> Self {
        let [token, extra, sign] = output.to_hex();
        Self { token, extra, sign }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignResponse {
    pub value: ValueResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub loaded: bool,
    pub target: String,
    pub offset: String,
    pub module_base: Option<String>,
    pub loaded_at: Option<String>,
}

impl From<SignerStatus> for StatusResponse {
    fn from(status: SignerStatus) -> Self {
        Self {
            loaded: status.loaded,
            target: status.target.display().to_string(),
            offset: format!("0x{:X}", status.offset),
            module_base: status.module_base.map(|base| format!("0x{:X}", base)),
            loaded_at: status.loaded_at.map(|t| t.to_rfc3339()),
        }
    }
}
