//! sealdrop - Encrypted expiring file-share engine
//!
//! A sender encrypts a file and publishes a tokenized share with an expiry
//! date and a download quota; recipients fetch it until either limit is
//! reached. This crate is the share lifecycle and storage-resolution core:
//! codec, chunked upload assembly, tiered persistence, and atomic quota
//! enforcement. Transport, link formatting, and admission control live
//! outside and consume [`service::ShareService`].

pub mod config;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod share;
pub mod storage;
pub mod upload;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::crypto::derive_key;
    pub use crate::error::{Error, Result};
    pub use crate::service::{Download, PublishOutcome, PublishRequest, ShareService};
    pub use crate::share::{
        generate_access_token, generate_file_id, FileId, ShareStatus, ShareSummary,
    };
}
