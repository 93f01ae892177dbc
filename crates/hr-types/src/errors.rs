use thiserror::Error;

/// Main error type for the Heurace system
#[derive(Error, Debug)]
pub enum HrError {
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Grammar error: {0}")]
    Grammar(#[from] GrammarError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl HrError {
    /// Startup errors must halt the process before any experiment runs.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            HrError::Registration(_) | HrError::Filter(_) | HrError::Grammar(_)
        )
    }
}

/// Errors raised while populating the component registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("Component {component} declares no constructor")]
    MissingConstructor { component: String },

    #[error("Component {component} declares {count} constructors, exactly one is allowed")]
    MultipleConstructors { component: String, count: usize },

    #[error("Ambiguous component {component}: already registered as {capability} with an identical parameter signature")]
    Ambiguous { component: String, capability: String },

    #[error("Component name {component} already registered with a different signature")]
    DuplicateName { component: String },

    #[error("Invalid parameter {parameter} in component {component}: {message}")]
    InvalidParameter {
        component: String,
        parameter: String,
        message: String,
    },
}

/// Errors in the whitelist / blacklist configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Filter references unknown component: {component}")]
    UnknownComponent { component: String },

    #[error("Both whitelist and blacklist provided, specify only one")]
    Conflicting,

    #[error("Filter list is empty")]
    EmptyList,
}

/// Errors detected while expanding the configuration space
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
    #[error("Cyclic component chain: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Cannot bind provided value {provided} to parameter {component}.{parameter} declared as {declared}")]
    Binding {
        component: String,
        parameter: String,
        provided: String,
        declared: String,
    },

    #[error("No configurable component reachable for capability {capability}")]
    Empty { capability: String },
}

/// Errors turning a sampled or parsed configuration into a live component
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown component: {component}")]
    UnknownComponent { component: String },

    #[error("Missing parameter {parameter} for component {component}")]
    MissingParameter { component: String, parameter: String },

    #[error("Parameter {parameter} of {component} expected {expected}, got {actual}")]
    TypeMismatch {
        component: String,
        parameter: String,
        expected: String,
        actual: String,
    },

    #[error("Component {component} has capability {actual}, expected {expected}")]
    WrongCapability {
        component: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot parse configuration at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
}

/// Errors raised by algorithm bodies and the execution machinery
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Algorithm {algorithm} failed: {message}")]
    AlgorithmFailed { algorithm: String, message: String },

    #[error("Instance not found: {instance}")]
    InstanceNotFound { instance: String },

    #[error("Infeasible solution: {message}")]
    Infeasible { message: String },

    #[error("Expected {expected} results, received {received}")]
    MissingResults { expected: usize, received: usize },

    #[error("Worker pool error: {message}")]
    Pool { message: String },
}

/// Result type alias for Heurace operations
pub type HrResult<T> = Result<T, HrError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HrError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HrError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HrError::Config(format!($($arg)*))
    };
}
