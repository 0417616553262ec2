//! The content pipeline: analyze -> caption -> upload.
//!
//! Collaborator contracts live at the seams ([`ContentAnalyzer`],
//! [`CaptionGenerator`], [`Uploader`]); the [`ContentProcessor`] drives one
//! acquired ledger entry through all three stages and reports the outcome
//! back to the lifecycle table.

pub mod analyzer;
pub mod caption;
pub mod processor;
pub mod uploader;

pub use analyzer::{Analysis, AnalyzeError, ContentAnalyzer, HttpAnalyzer};
pub use caption::{CaptionError, CaptionGenerator, TemplateCaptioner};
pub use processor::{ContentProcessor, PipelinePolicy};
pub use uploader::{
    HttpUploader, HttpUploaderFactory, UploadError, UploadReceipt, Uploader, UploaderFactory,
};
