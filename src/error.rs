use crate::car_collector::CarSamplerError;
use crate::config::ConfigError;
use crate::db_fetcher::StationLookupError;
use crate::db_parser::FeedError;
use config_file::ConfigFileError;

use std::fmt;

#[derive(Debug)]
pub enum Error {
    ConfigFileError(ConfigFileError),
    ConfigError(ConfigError),
    HttpRequestError(reqwest::Error),
    IoError(std::io::Error),
    FeedError(FeedError),
    StationLookupError(StationLookupError),
    CarSamplerError(CarSamplerError),
    SqliteError(rusqlite::Error),
    SerdeJsonError(serde_json::Error),
    RocketError(rocket::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConfigFileError(x) => write!(f, "Could not read config file: {}", x),
            Error::ConfigError(x) => write!(f, "{}", x),
            Error::HttpRequestError(x) => write!(f, "HTTP request failed: {}", x),
            Error::IoError(x) => write!(f, "I/O error: {}", x),
            Error::FeedError(x) => write!(f, "{}", x),
            Error::StationLookupError(x) => write!(f, "{}", x),
            Error::CarSamplerError(x) => write!(f, "{}", x),
            Error::SqliteError(x) => write!(f, "Database error: {}", x),
            Error::SerdeJsonError(x) => write!(f, "JSON error: {}", x),
            Error::RocketError(x) => write!(f, "Web UI error: {}", x),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigFileError> for Error {
    fn from(error: ConfigFileError) -> Self {
        Error::ConfigFileError(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::ConfigError(error)
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::HttpRequestError(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error)
    }
}

impl From<FeedError> for Error {
    fn from(error: FeedError) -> Self {
        Error::FeedError(error)
    }
}

impl From<StationLookupError> for Error {
    fn from(error: StationLookupError) -> Self {
        Error::StationLookupError(error)
    }
}

impl From<CarSamplerError> for Error {
    fn from(error: CarSamplerError) -> Self {
        Error::CarSamplerError(error)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Error::SqliteError(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::SerdeJsonError(error)
    }
}

impl From<rocket::Error> for Error {
    fn from(error: rocket::Error) -> Self {
        Error::RocketError(error)
    }
}
