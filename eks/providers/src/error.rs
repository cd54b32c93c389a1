use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid stack configuration: {}", source))]
    Config { source: eks_stack_types::Error },

    #[snafu(display("Unable to declare '{}': {}", resource, source))]
    Declare {
        resource: String,
        source: stack_model::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
