use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("can't set up cloud credentials: {0}")]
    Auth(String),
    #[error("bad settings: {0}")]
    Settings(String),
    #[error("no instance type named {0:?} in settings")]
    UnknownConfig(String),
    #[error("instance type {config:?} doesn't specify {field}")]
    MissingField { config: String, field: &'static str },
    #[error("can't list images for {family}: {reason}")]
    ImageLookup { family: String, reason: String },
    #[error("no stable image in family {0}")]
    NoStableImage(String),
    #[error("can't find images for family {0:?}")]
    UnsupportedFamily(String),
    #[error("can't parse image name {0:?}")]
    BadImageName(String),
    #[error("instance insertion of {name} failed: {reason}")]
    Create { name: String, reason: String },
    #[error("compute api returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("exhausted {attempts} attempts waiting for {what}")]
    ExhaustedAttempts { what: String, attempts: usize },
    #[error("can't use ssh key {path}: {reason}")]
    SshKey { path: String, reason: String },
    #[error("ssh to {addr} failed: {reason}")]
    Ssh { addr: String, reason: String },
    #[error("got token {got:?}, want {want:?}. Maybe this is an IP hijack?")]
    TokenMismatch { got: String, want: String },
    #[error("can't read node metadata: {0}")]
    Metadata(String),
    #[error("bootstrap command {command:?} on {node} failed: {reason}")]
    Bootstrap {
        node: String,
        command: String,
        reason: String,
    },
    #[error("usage: {0}")]
    Usage(String),
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("error parsing json: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// True for a resource that is already gone. Teardown treats this as done.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Api { status: 404, .. })
    }
}
