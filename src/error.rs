use std::fmt::Display;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    Request(String),
    General(String),
    IO(String),
    Parser(String),
    InvalidValue(String),
    MissingTable(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        return Self::Request(format!("Reqwest error: {}", err.to_string()));
    }
}

impl From<&'static str> for Error {
    fn from(str_err: &'static str) -> Self {
        Error::General(String::from(str_err))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value.to_string())
    }
}

impl From<serde_json::error::Error> for Error {
    fn from(value: serde_json::error::Error) -> Self {
        Self::Parser(value.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Request(msg) => write!(f, "request failed: {}", msg),
            Error::General(msg) => write!(f, "{}", msg),
            Error::IO(msg) => write!(f, "io error: {}", msg),
            Error::Parser(msg) => write!(f, "parse error: {}", msg),
            Error::InvalidValue(msg) => write!(f, "invalid value: {}", msg),
            Error::MissingTable(url) => write!(f, "no table found in {}", url),
        }
    }
}
