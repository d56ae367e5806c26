//! Error types for the ad serving engine.
//!
//! All fallible internal paths return [`error_stack::Report<AdServeError>`].
//! Public serving entry points never surface these to the host: repository
//! failures degrade to "no ad shown" and write failures are retried then
//! dropped (see the recorder module).

use derive_more::{Display, Error};

/// Top-level error type for the ad engine.
#[derive(Debug, Display, Error)]
pub enum AdServeError {
    /// Settings could not be loaded or parsed.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// The ad repository failed a read or write.
    #[display("Repository error: {message}")]
    Repository { message: String },

    /// A creative payload could not be turned into injectable markup.
    #[display("Injection error: {message}")]
    Injection { message: String },

    /// An event referenced an advertisement the repository does not know.
    #[display("Unknown advertisement: {id}")]
    UnknownAd { id: String },
}
