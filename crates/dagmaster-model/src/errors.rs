use thiserror::Error;

/// Errors raised while constructing or validating the data model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("dag contains a cycle reachable from node '{node}'")]
    CyclicDag { node: String },

    #[error("task node '{name}' references unknown dependency '{dep}'")]
    UnknownDependency { name: String, dep: String },

    #[error("duplicate task node name '{name}' in dag")]
    DuplicateNode { name: String },

    #[error("unknown start node name '{name}' requested for flow dag")]
    UnknownStartNode { name: String },

    #[error("invalid command param: {reason}")]
    InvalidCommandParam { reason: String },

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn cyclic(node: impl Into<String>) -> Self {
        Self::CyclicDag { node: node.into() }
    }

    pub fn unknown_dependency(name: impl Into<String>, dep: impl Into<String>) -> Self {
        Self::UnknownDependency {
            name: name.into(),
            dep: dep.into(),
        }
    }

    pub fn duplicate_node(name: impl Into<String>) -> Self {
        Self::DuplicateNode { name: name.into() }
    }

    pub fn invalid_command_param(reason: impl Into<String>) -> Self {
        Self::InvalidCommandParam {
            reason: reason.into(),
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_populate_fields() {
        let err = ModelError::cyclic("A");
        assert_eq!(err.to_string(), "dag contains a cycle reachable from node 'A'");

        let err = ModelError::unknown_dependency("B", "Z");
        assert!(err.to_string().contains("'B'"));
        assert!(err.to_string().contains("'Z'"));
    }
}
