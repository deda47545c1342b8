use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics output was not valid utf8: {0}")]
    Encoding(#[from] FromUtf8Error),
}
