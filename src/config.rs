//! Engine configuration (SPEC_FULL.md §4.I): not part of spec.md's data
//! model, but required for any embeddable engine to know where its files
//! live and how large its conversion pool is.

use crate::shard::POOL_THREAD_NUM;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub thread_pool_size: usize,
}

impl EngineConfig {
    pub fn builder(data_dir: impl Into<PathBuf>) -> EngineConfigBuilder {
        EngineConfigBuilder {
            data_dir: data_dir.into(),
            thread_pool_size: POOL_THREAD_NUM,
        }
    }
}

pub struct EngineConfigBuilder {
    data_dir: PathBuf,
    thread_pool_size: usize,
}

impl EngineConfigBuilder {
    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig {
            data_dir: self.data_dir,
            thread_pool_size: self.thread_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_thread_pool_size() {
        let cfg = EngineConfig::builder("/tmp/vehicle-tsdb").build();
        assert_eq!(cfg.thread_pool_size, POOL_THREAD_NUM);
    }

    #[test]
    fn builder_overrides_thread_pool_size() {
        let cfg = EngineConfig::builder("/tmp/vehicle-tsdb").thread_pool_size(2).build();
        assert_eq!(cfg.thread_pool_size, 2);
    }
}
