// Container helpers for the command line tools

pub mod mp3;
pub mod wave;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("can't find sync word")]
    NoSync,
    #[error("can't find valid header")]
    Invalid,
    #[error("header ends early")]
    Truncated,
}
