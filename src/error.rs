use crate::downloader::DownloadError;
use thiserror::Error;

/// 整个拉取流程对调用方暴露的错误。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("无效的分享链接: {0}")]
    InvalidLink(String),

    #[error("没有账号有足够的配额（需要 {required} 字节）")]
    NoQuota { required: u64 },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("下载完成但文件不存在: {0}")]
    MissingArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn invalid_link(message: impl Into<String>) -> Self {
        Self::InvalidLink(message.into())
    }
}
