//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use creatflow::catalog::{AssetFormat, FormatType};
use creatflow::config::schema::{AiConfig, Config, LogConfig, TaskOverride, WorkerSettings};

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    upload_dir: PathBuf,
    worker_count: usize,
    poll_interval_ms: u64,
    use_image_editor: bool,
    task_overrides: HashMap<String, TaskOverride>,
}

impl ConfigBuilder {
    pub fn new(upload_dir: &Path) -> Self {
        Self {
            upload_dir: upload_dir.to_path_buf(),
            worker_count: 1,
            poll_interval_ms: 20,
            use_image_editor: false,
            task_overrides: HashMap::new(),
        }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn use_image_editor(mut self, enabled: bool) -> Self {
        self.use_image_editor = enabled;
        self
    }

    pub fn task_override(mut self, task: &str, over: TaskOverride) -> Self {
        self.task_overrides.insert(task.to_string(), over);
        self
    }

    pub fn build(self) -> Config {
        Config {
            version: "1.0".to_string(),
            upload_dir: self.upload_dir,
            database_path: None,
            worker: WorkerSettings {
                count: self.worker_count,
                poll_interval_ms: self.poll_interval_ms,
                reap_interval_ms: 50,
                ..WorkerSettings::default()
            },
            log: LogConfig::default(),
            ai: AiConfig {
                use_image_editor: self.use_image_editor,
                ..AiConfig::default()
            },
            task_overrides: self.task_overrides,
        }
    }
}

/// Builder for `AssetFormat` catalog rows.
pub struct FormatBuilder {
    format: AssetFormat,
}

impl FormatBuilder {
    pub fn new(id: &str, width: u32, height: u32) -> Self {
        Self {
            format: AssetFormat {
                id: id.to_string(),
                name: format!("{} {}x{}", id, width, height),
                format_type: FormatType::Resizing,
                width,
                height,
                platform_name: None,
                category: None,
                is_active: true,
            },
        }
    }

    pub fn platform(mut self, name: &str) -> Self {
        self.format.platform_name = Some(name.to_string());
        self
    }

    pub fn category(mut self, name: &str) -> Self {
        self.format.category = Some(name.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.format.is_active = false;
        self
    }

    pub fn build(self) -> AssetFormat {
        self.format
    }
}
