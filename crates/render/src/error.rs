use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RenderError {
    #[snafu(display("markdown payload of {len} bytes exceeds the {limit} byte limit"))]
    PayloadTooLarge {
        stage: &'static str,
        len: usize,
        limit: usize,
    },
    #[snafu(display("markdown conversion failed on `{stage}`: {details}"))]
    Markdown {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("html sanitization failed on `{stage}`: {details}"))]
    Sanitize {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("render step `{stage}` panicked: {details}"))]
    Panicked {
        stage: &'static str,
        details: String,
    },
}

impl RenderError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { stage, .. }
            | Self::Markdown { stage, .. }
            | Self::Sanitize { stage, .. }
            | Self::Panicked { stage, .. } => stage,
        }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
