use snafu::Snafu;

/// The public error type for the stack model.
#[derive(Debug, Snafu)]
pub struct Error(OpaqueError);
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum OpaqueError {
    #[snafu(display(
        "Attribute '{}' of resource '{}' has an unexpected type: {}",
        field,
        resource,
        source
    ))]
    AttributeType {
        resource: String,
        field: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to compute a deferred value: {}", message))]
    Computation { message: String },

    #[snafu(display("Error deserializing configuration: {}", source))]
    ConfigDeserialization { source: serde_json::Error },

    #[snafu(display("Error serializing configuration: {}", source))]
    ConfigSerialization { source: serde_json::Error },

    #[snafu(display(
        "Error serializing configuration: expected Value::Object type but got something else."
    ))]
    ConfigWrongValueType {},

    #[snafu(display("The dependency graph contains a cycle between {:?}", resources))]
    Cycle { resources: Vec<String> },

    #[snafu(display("A resource named '{}' has already been declared", name))]
    DuplicateResource { name: String },

    #[snafu(display("'{}' is not a valid field reference", input))]
    InvalidFieldRef { input: String },

    #[snafu(display("Resource '{}' has no attribute '{}'", resource, field))]
    MissingAttribute { resource: String, field: String },

    #[snafu(display("Parse error: {}", source))]
    SerdePlain { source: serde_plain::Error },

    #[snafu(display(
        "Resource '{}' references '{}' which is not declared in the stack",
        resource,
        dependency
    ))]
    UnknownReference {
        resource: String,
        dependency: String,
    },

    #[snafu(display("Invalid arguments for resource '{}': {}", resource, message))]
    Validation { resource: String, message: String },
}
