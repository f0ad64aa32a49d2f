//! # ETL - Extract, Transform, Load
//!
//! 酒店入住率预测的数据准备层
//!
//! ## 功能
//!
//! - 从数据源加载已类型化的日表（访客、广告花费、入住率）
//! - 按日期预聚合（同一日期多行求和）
//! - 以访客表为种子按日期左连接，缺失值保持缺失

pub mod types;
pub mod provider;
pub mod join;
pub mod pipeline;

pub use join::TableJoiner;
pub use pipeline::{ETLPipeline, ETLPipelineBuilder};
pub use provider::{CsvDataProvider, DataProvider, InMemoryProvider};
pub use types::{
    Column, ColumnValues, DailyTable, ETLConfig, ETLError, ETLResult, JoinedTable,
};
