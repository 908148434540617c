use crate::formula::{RuntimeError, SyntaxError};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),
    #[error("Syntax error at line {line}: {message}")]
    FormulaSyntax { line: usize, message: String },
    #[error("Runtime error{}: {message}", location(.date, .row))]
    RowRuntime {
        date: Option<NaiveDate>,
        row: Option<usize>,
        message: String,
    },
    #[error("No data in range {}..{}", bound(.start), bound(.end))]
    DataRangeEmpty {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn location(date: &Option<NaiveDate>, row: &Option<usize>) -> String {
    match (date, row) {
        (Some(d), Some(r)) => format!(" on {} row {}", d, r),
        (Some(d), None) => format!(" on {}", d),
        (None, Some(r)) => format!(" at row {}", r),
        (None, None) => String::new(),
    }
}

fn bound(date: &Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

impl Error {
    pub fn runtime(error: &RuntimeError, date: Option<NaiveDate>, row: Option<usize>) -> Self {
        Error::RowRuntime {
            date,
            row,
            message: error.to_string(),
        }
    }

    /// 日付・行番号を補う
    pub fn at(self, date: NaiveDate) -> Self {
        match self {
            Error::RowRuntime {
                date: None,
                row,
                message,
            } => Error::RowRuntime {
                date: Some(date),
                row,
                message,
            },
            other => other,
        }
    }
}

impl From<SyntaxError> for Error {
    fn from(e: SyntaxError) -> Self {
        Error::FormulaSyntax {
            line: e.line,
            message: e.message,
        }
    }
}

impl From<common::types::Error> for Error {
    fn from(e: common::types::Error) -> Self {
        Error::InvalidParams(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
