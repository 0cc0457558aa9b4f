//! The error type shared across vigil

/// An error from vigil
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// An error from the k8s client
    K8s(kube::Error),
    /// An error from loading a kubeconfig
    K8sConfig(kube::config::KubeconfigError),
    /// An error from loading an in-cluster k8s config
    K8sInCluster(kube::config::InClusterError),
    /// An error from converting a value with serde
    Serde(serde_json::Error),
    /// An error from loading a config
    Config(config::ConfigError),
    /// An error from parsing a timestamp/date
    ChronoParse(chrono::ParseError),
    /// An error from sending or recieving a request
    Reqwest(reqwest::Error),
    /// An error from using a regex
    Regex(regex::Error),
    /// An error from parsing an int
    ParseInt(std::num::ParseIntError),
    /// An IO Error
    IO(std::io::Error),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get the error message for this error if one exists
    pub fn msg(&self) -> Option<String> {
        // get the msg from any error types that support it
        match self {
            Error::Generic(msg) => Some(msg.clone()),
            Error::K8s(err) => Some(err.to_string()),
            Error::K8sConfig(err) => Some(err.to_string()),
            Error::K8sInCluster(err) => Some(err.to_string()),
            Error::Serde(err) => Some(err.to_string()),
            Error::Config(err) => Some(err.to_string()),
            Error::ChronoParse(err) => Some(err.to_string()),
            Error::Reqwest(err) => Some(err.to_string()),
            Error::Regex(err) => Some(err.to_string()),
            Error::ParseInt(err) => Some(err.to_string()),
            Error::IO(err) => Some(err.to_string()),
        }
    }

    /// Get the kind of error as a str
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Generic(_) => "Generic",
            Error::K8s(_) => "K8s",
            Error::K8sConfig(_) => "K8sConfig",
            Error::K8sInCluster(_) => "K8sInCluster",
            Error::Serde(_) => "Serde",
            Error::Config(_) => "Config",
            Error::ChronoParse(_) => "ChronoParse",
            Error::Reqwest(_) => "Reqwest",
            Error::Regex(_) => "Regex",
            Error::ParseInt(_) => "ParseInt",
            Error::IO(_) => "IO",
        }
    }
}

impl std::fmt::Display for Error {
    /// Display this error in an easily readable format
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.msg() {
            Some(msg) => write!(f, "Error: {}", msg),
            None => write!(f, "Kind: {}", self.kind()),
        }
    }
}

// mark that this is an error struct
impl std::error::Error for Error {}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::K8s(error)
    }
}

impl From<kube::config::KubeconfigError> for Error {
    fn from(error: kube::config::KubeconfigError) -> Self {
        Error::K8sConfig(error)
    }
}

impl From<kube::config::InClusterError> for Error {
    fn from(error: kube::config::InClusterError) -> Self {
        Error::K8sInCluster(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<chrono::ParseError> for Error {
    fn from(error: chrono::ParseError) -> Self {
        Error::ChronoParse(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Reqwest(error)
    }
}

impl From<regex::Error> for Error {
    fn from(error: regex::Error) -> Self {
        Error::Regex(error)
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(error: std::num::ParseIntError) -> Self {
        Error::ParseInt(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}
