//! # Occupancy Forecasting ML Engine
//!
//! 酒店入住率预测：特征工程、模型搜索、评估和产物持久化。
//!
//! ## 主要模块
//!
//! - `features`: 日历、比率、滚动、滞后和周期特征
//! - `preprocessing`: 缺失值处理、噪声增强和标准化
//! - `selection`: 单变量筛选和 PCA
//! - `models`: 线性模型和树模型
//! - `search`: 网格搜索与时间序列交叉验证
//! - `evaluation`: 评估指标和运行报告
//! - `artifact`: 模型产物的原子保存与加载
//! - `pipeline`: 端到端的训练管道

pub mod types;
pub mod config;
pub mod timeseries;
pub mod features;
pub mod preprocessing;
pub mod selection;
pub mod models;
pub mod search;
pub mod evaluation;
pub mod artifact;
pub mod pipeline;

pub use artifact::{Artifact, ArtifactMetadata, ArtifactStore, FeaturePathDescriptor};
pub use config::{LeakageMode, PipelineConfig};
pub use evaluation::{Evaluator, ReportEntry, RunReport};
pub use features::{FeatureEngine, FeatureTable};
pub use models::{Estimator, Model};
pub use pipeline::{OccupancyPipeline, RunOutcome};
pub use search::{CandidateFailure, GridSearch, ParamSet, SearchResult};
pub use types::{CandidateKind, FeaturePath, MLError, MLResult, Metrics};
