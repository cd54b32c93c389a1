use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("'{}' is not a valid ARN: {}", arn, reason))]
    Arn { arn: String, reason: String },

    #[snafu(display("Unable to decode user data: {}", source))]
    Base64Decode { source: base64::DecodeError },

    #[snafu(display("'{}' is not a valid IPv4 CIDR block: {}", cidr, reason))]
    Cidr { cidr: String, reason: String },

    #[snafu(display("Invalid stack configuration: {}", message))]
    InvalidConfig { message: String },

    #[snafu(display("'{}' is not a valid issuer URL: {}", input, source))]
    IssuerUrl {
        input: String,
        source: url::ParseError,
    },

    #[snafu(display("Unable to parse stack configuration: {}", source))]
    ParseConfig { source: serde_yaml::Error },

    #[snafu(display("Decoded user data is not UTF-8: {}", source))]
    Utf8 { source: std::string::FromUtf8Error },
}

pub type Result<T> = std::result::Result<T, Error>;
