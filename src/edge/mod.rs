pub mod configuration_source;
pub mod outbox_publisher;
pub mod staged_uploader;
pub mod upload_layout;

pub use configuration_source::{
    ConfigUpdateNotifier, ConfigUpdates, ConfigurationSource, FileConfigurationSource,
    StaticConfigurationSource, config_update_channel, fetch_with_retry,
};
pub use outbox_publisher::OutboxPublisher;
pub use staged_uploader::{ExportTask, StagedExportUploader};
pub use upload_layout::UploadLayout;
