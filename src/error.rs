use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Kubeconfig(kube::config::KubeconfigError),

    #[from]
    WebSocket(tokio_tungstenite::tungstenite::Error),

    #[from]
    Tls(rustls::Error),

    #[from]
    Pem(rustls::pki_types::pem::Error),

    #[from]
    Toml(toml::de::Error),

    #[from]
    Io(std::io::Error),

    /// The named context is not part of the loaded kubeconfig
    ContextNotFound(String),

    /// A client frame that could not be turned into a command
    MalformedCommand(String),

    /// Watch stream interrupted; recovered by a resync, never surfaced to clients
    TransientWatch(String),

    /// Read or write failure on a client connection
    Transport(String),

    /// Custom error message
    Custom(String),
}

impl Error {
    #[must_use]
    pub const fn is_context_not_found(&self) -> bool {
        matches!(self, Self::ContextNotFound(_))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::ContextNotFound(name) => write!(fmt, "the context \"{name}\" does not exist"),
            Self::MalformedCommand(reason) => write!(fmt, "malformed command: {reason}"),
            Self::TransientWatch(reason) => write!(fmt, "watch interrupted: {reason}"),
            Self::Transport(reason) => write!(fmt, "transport error: {reason}"),
            Self::Custom(message) => write!(fmt, "{message}"),
            Self::Kube(e) => write!(fmt, "kubernetes api error: {e}"),
            Self::Kubeconfig(e) => write!(fmt, "kubeconfig error: {e}"),
            Self::Json(e) => write!(fmt, "json error: {e}"),
            Self::WebSocket(e) => write!(fmt, "websocket error: {e}"),
            Self::Tls(e) => write!(fmt, "tls error: {e}"),
            Self::Pem(e) => write!(fmt, "pem error: {e:?}"),
            Self::Toml(e) => write!(fmt, "configuration file error: {e}"),
            Self::Io(e) => write!(fmt, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {}
