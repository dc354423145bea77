//! 托管服务 Web API 协作方：文件信息、账号限额查询与直链构造。

mod client;
mod types;

pub use client::{HostingClient, HostingError, basic_auth, extract_file_id, split_custom_name};
pub use types::{FileInfo, UserLimits};
