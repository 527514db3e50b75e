use thiserror::Error;

/// Why a broker refused (or never answered) our CONNECT.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    #[error("MQTT server unavailable")]
    ServerUnavailable,

    #[error("bad username or password")]
    BadCredentials,

    #[error("not authorized")]
    NotAuthorized,

    #[error("connection refused, error code {0}")]
    Refused(u8), // any other CONNACK return code

    #[error("network error: {0}")]
    Network(String),

    #[error("no CONNACK received before the connect timeout")]
    TimedOut,
}

impl ConnectFailure {
    /// Classify an MQTT 3.1.1 CONNACK return code. `None` means the connection was accepted.
    pub fn from_return_code(code: u8) -> Option<Self> {
        match code {
            0 => None,
            3 => Some(ConnectFailure::ServerUnavailable),
            4 => Some(ConnectFailure::BadCredentials),
            5 => Some(ConnectFailure::NotAuthorized),
            other => Some(ConnectFailure::Refused(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported configuration format for '{path}' (expected .yml, .yaml or .json)")]
    ConfigFormat { path: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Missing required configuration field '{0}'")]
    ConfigMissingField(&'static str),

    #[error("Cannot substitute '{placeholder}' in {field}: {details}")]
    ConfigSubstitution {
        field: &'static str,
        placeholder: String,
        details: String,
    },

    #[error("Unable to connect to MQTT broker: {reason}")]
    BrokerConnect { reason: ConnectFailure },

    #[error("Subscription to '{pattern}' failed: {details}")]
    Subscribe { pattern: String, details: String },

    #[error("Publish to '{topic}' failed: {details}")]
    Publish { topic: String, details: String },

    #[error("File I/O Error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}
