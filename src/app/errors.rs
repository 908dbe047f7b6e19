use crate::{
    encoder::EncoderError,
    encodings::{EncodingStoreError, RankError, RecordError},
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("no stored face encodings found, please add images first")]
    EmptyCorpus,

    #[error("no face found in the provided image")]
    NoFaceDetected,

    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("storage error: {0}")]
    Storage(#[from] EncodingStoreError),

    #[error("ranking error: {0}")]
    Rank(RankError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<RankError> for AppError {
    fn from(err: RankError) -> Self {
        match err {
            // rank's empty-corpus guard and the service's pre-check are the
            // same user-facing condition
            RankError::EmptyCorpus => AppError::EmptyCorpus,
            other => AppError::Rank(other),
        }
    }
}

impl From<RecordError> for AppError {
    fn from(err: RecordError) -> Self {
        AppError::Storage(EncodingStoreError::Record(err))
    }
}
