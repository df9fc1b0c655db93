use thiserror::Error;

/// Message returned to clients when a team or league name is not in the mapping.
pub const UNRESOLVED_KEY_MESSAGE: &str = "Nom d'équipe ou ligue introuvable";

/// One or more of league / team1 / team2 is absent from the lookup table.
///
/// The fields record which lookups missed so the server log can say so; the
/// client-facing message stays generic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", UNRESOLVED_KEY_MESSAGE)]
pub struct UnresolvedKey {
    pub league: bool,
    pub team1: bool,
    pub team2: bool,
}

impl UnresolvedKey {
    /// Names of the request fields that failed to resolve, for logging.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.league {
            out.push("league");
        }
        if self.team1 {
            out.push("team1");
        }
        if self.team2 {
            out.push("team2");
        }
        out
    }
}

/// The model artifact could not be retrieved from the artifact store.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Model download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model download rejected with status {status} for id '{identifier}'")]
    Status {
        identifier: String,
        status: reqwest::StatusCode,
    },

    #[error("Artifact store returned a web page instead of the model for id '{0}' (invalid id or quota exceeded)")]
    NotAnArtifact(String),

    #[error("Invalid artifact store URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to write model artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// The artifact was retrieved but could not be turned into a model handle.
#[derive(Error, Debug)]
pub enum DeserializationError {
    #[error(
        "The model requires '{dependency}' which is not available in this build. Install it with: {remedy}"
    )]
    MissingDependency {
        dependency: &'static str,
        remedy: &'static str,
    },

    #[error("Unsupported model type '{0}'")]
    UnsupportedModelType(String),

    #[error("Model artifact is malformed: {0}")]
    Malformed(String),

    #[error("Model artifact is inconsistent: {0}")]
    Inconsistent(String),

    #[error("Failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DeserializationError {
    fn from(err: serde_json::Error) -> Self {
        DeserializationError::Malformed(err.to_string())
    }
}

/// Everything that can go wrong while serving one prediction request.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    UnresolvedKey(#[from] UnresolvedKey),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Deserialize(#[from] DeserializationError),

    #[error("Prediction failed: {0}")]
    Inference(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_key_message_is_generic() {
        let err = UnresolvedKey {
            league: false,
            team1: true,
            team2: false,
        };
        assert_eq!(err.to_string(), "Nom d'équipe ou ligue introuvable");
        assert_eq!(err.missing_fields(), vec!["team1"]);
    }

    #[test]
    fn missing_dependency_names_the_dependency_and_remedy() {
        let err = DeserializationError::MissingDependency {
            dependency: "tract-onnx",
            remedy: "cargo build --release --features onnx",
        };
        let msg = PredictError::from(err).to_string();
        assert!(msg.contains("tract-onnx"));
        assert!(msg.contains("--features onnx"));
    }
}
