use derive_more::From;
use k8s_openapi::serde_json;
use kube::error::ErrorResponse;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Kubeconfig(kube::config::KubeconfigError),

    #[from]
    Io(std::io::Error),

    /// A listed or watched object could not be decoded into its typed form
    Decode {
        kind: &'static str,
        source: serde_json::Error,
    },

    /// The watch stream delivered an error status other than `410 Gone`
    WatchStatus(ErrorResponse),

    /// A store lock was poisoned by a panicking writer
    LockPoisoned(&'static str),

    /// A walk visitor rejected an entry
    Visitor(String),

    /// Custom error message
    Custom(String),
}

impl Error {
    /// Builds a visitor error from any displayable message.
    pub fn visitor(message: impl Into<String>) -> Self {
        Self::Visitor(message.into())
    }

    /// `true` for errors that just mean the remote collection is not served
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
