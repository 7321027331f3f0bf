use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("custom error {code}: {reason}")]
pub struct CustomError {
    pub code: u32,
    pub reason: &'static str,
}

impl CustomError {
    pub fn new(code: u32, reason: &'static str) -> Self {
        CustomError { code, reason }
    }
}
