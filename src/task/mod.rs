//! 任务层：描述符、文字识别、资产查找表与单任务状态机

pub mod assets;
pub mod classifier;
pub mod descriptor;
pub mod instance;

pub use assets::{AssetCategory, AssetTable};
pub use classifier::{extract_tracker_labels, parse_progress, ClassifierRule, TaskClassifier};
pub use descriptor::{TaskDescriptor, TaskKind};
pub use instance::{TaskId, TaskInstance, TaskStatus};
