//! ETL 管道

use crate::join::TableJoiner;
use crate::provider::{CsvDataProvider, DataProvider};
use crate::types::{ETLConfig, ETLResult, JoinedTable};
use std::path::PathBuf;

/// ETL 管道：加载各数据源并按日期连接
pub struct ETLPipeline {
    config: ETLConfig,
    provider: Box<dyn DataProvider>,
    joiner: TableJoiner,
}

impl ETLPipeline {
    /// 创建新的 ETL 管道（CSV 数据源）
    pub fn new(config: ETLConfig) -> Self {
        let provider = Box::new(CsvDataProvider::new(&config));
        Self::with_provider(config, provider)
    }

    /// 使用自定义数据源
    pub fn with_provider(config: ETLConfig, provider: Box<dyn DataProvider>) -> Self {
        let joiner = TableJoiner::new(config.date_key.clone());
        Self {
            config,
            provider,
            joiner,
        }
    }

    pub fn config(&self) -> &ETLConfig {
        &self.config
    }

    /// 完整的 ETL 流程：访客表为种子，依次左连接广告花费和入住率
    pub async fn run(&self) -> ETLResult<JoinedTable> {
        tracing::info!("Running ETL pipeline with {} provider", self.provider.name());

        // 1. Extract
        self.provider.check().await?;
        let visitors = self.provider.visitors().await?;
        let ppc = self.provider.ppc_spend().await?;
        let occupancy = self.provider.occupancy().await?;

        // 2. Transform: 日期对齐
        let joined = self.joiner.join(&visitors, &[ppc, occupancy])?;

        for (column, missing) in joined.missing_counts() {
            if missing > 0 {
                tracing::warn!("Column {} has {} missing values after join", column, missing);
            }
        }

        tracing::info!(
            "ETL pipeline completed: {} dates, {} columns",
            joined.n_rows(),
            joined.columns.len()
        );
        Ok(joined)
    }
}

/// ETL 管道构建器
pub struct ETLPipelineBuilder {
    config: ETLConfig,
    provider: Option<Box<dyn DataProvider>>,
}

impl ETLPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: ETLConfig::default(),
            provider: None,
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn with_date_key(mut self, key: impl Into<String>) -> Self {
        self.config.date_key = key.into();
        self
    }

    pub fn with_config(mut self, config: ETLConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, provider: Box<dyn DataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> ETLPipeline {
        match self.provider {
            Some(provider) => ETLPipeline::with_provider(self.config, provider),
            None => ETLPipeline::new(self.config),
        }
    }
}

impl Default for ETLPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
