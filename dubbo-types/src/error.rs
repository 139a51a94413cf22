use thiserror::Error;

/// Errors raised while parsing a Dubbo provider URL string.
///
/// All variants are non-fatal to the caller: the reconciler skips the
/// offending URL and continues with the rest of the listing (spec §4.A).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("provider url [{url}] is missing the \"://\" scheme delimiter")]
    MissingSchemeDelimiter { url: String },

    #[error("provider url [{url}] is missing the authority/service \"/\" delimiter")]
    MissingServiceDelimiter { url: String },

    #[error("provider url [{url}] is missing the \"?\" query delimiter")]
    MissingQueryDelimiter { url: String },

    #[error("provider url [{url}] has an empty authority")]
    EmptyAddr { url: String },

    #[error("provider url [{url}] has an empty service path")]
    EmptyService { url: String },

    #[error("provider url [{url}] has a query param segment without \"=\": [{segment}]")]
    MalformedParam { url: String, segment: String },

    #[error("provider url [{url}] is not percent-decodable: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::str::Utf8Error,
    },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
