use thiserror::Error;

/// Result alias for the MongoDB backend.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures specific to the MongoDB driver and transport.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// A required environment variable was not set.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the missing variable.
        var: &'static str,
    },
    /// The connection URI could not be parsed.
    #[error("invalid MongoDB URI `{uri}`")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Driver-reported parse failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// The client could not be constructed from the parsed options.
    #[error("failed to build MongoDB client")]
    ClientConstruction {
        /// Driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// The database never answered the initial ping.
    #[error("MongoDB did not answer the initial ping after {attempts} attempts")]
    InitialPing {
        /// Number of pings attempted before giving up.
        attempts: u32,
        /// Last driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// A health-check ping failed.
    #[error("MongoDB health ping failed")]
    HealthPing {
        /// Driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// Index creation failed during startup.
    #[error("failed to ensure index `{index}` on `{collection}`")]
    EnsureIndex {
        /// Collection being indexed.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// A write against a collection failed at the transport level.
    #[error("write to `{collection}` failed")]
    Write {
        /// Target collection.
        collection: &'static str,
        /// Driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// A read against a collection failed at the transport level.
    #[error("read from `{collection}` failed")]
    Read {
        /// Target collection.
        collection: &'static str,
        /// Driver-reported failure.
        #[source]
        source: mongodb::error::Error,
    },
    /// A value could not be converted to BSON.
    #[error("failed to serialize value for `{collection}`")]
    Serialize {
        /// Target collection.
        collection: &'static str,
        /// BSON serializer failure.
        #[source]
        source: mongodb::bson::error::Error,
    },
}
