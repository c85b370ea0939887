use std::io;

use realtime_store::StoreError;
use sheet_source::SheetError;
use thiserror::Error;

use crate::remote::CommandError;
use crate::store::ConnectError;
use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum PrompterError {
    #[error("invalid launch url: {0}")]
    LaunchUrl(#[from] url::ParseError),
    #[error("{0}")]
    Sheet(#[from] SheetError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Connect(#[from] ConnectError),
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
