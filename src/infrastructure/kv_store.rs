//! 持久化键值存储 - 基础设施层
//!
//! 持有唯一的存储资源，只暴露 get / set / remove 能力，
//! 用于保存计时器剩余时间和未送达的答案，页面刷新（进程重启）后仍然存在。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 持久化键值存储
///
/// 职责：
/// - 不认识计时器 / 答案
/// - 只按字符串键读写字符串值
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

/// 内存实现（测试 / 不需要跨进程保存时使用）
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| AppError::Other(format!("存储锁已损坏: {}", e)))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| AppError::Other(format!("存储锁已损坏: {}", e)))?;
        entries.remove(key);
        Ok(())
    }
}

/// 单个 JSON 文件实现
///
/// 每次写入都整体重写文件，数据量很小（几个计时器和少量答案）。
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// 使用配置中的 `storage_path`
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage_path)
    }

    fn read_all(&self) -> AppResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| AppError::storage_read_failed(self.path.display().to_string(), e))?;

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                // 文件损坏时当作空存储，下一次写入会覆盖
                warn!("⚠️ 存储文件格式无效，已忽略: {}", self.path.display());
                Ok(Map::new())
            }
        }
    }

    fn write_all(&self, map: &Map<String, Value>) -> AppResult<()> {
        let content = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, content)
            .map_err(|e| AppError::storage_write_failed(self.path.display().to_string(), e))?;
        debug!("已写入存储文件: {}", self.path.display());
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> AppResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| AppError::Other(format!("存储锁已损坏: {}", e)))?;
        let mut map = self.read_all()?;
        f(&mut map);
        self.write_all(&map)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        match self.read_all() {
            Ok(map) => map.get(key).and_then(|v| v.as_str()).map(str::to_string),
            Err(e) => {
                warn!("⚠️ 读取存储失败: {}", e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.update(|map| {
            map.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "mock_exam_session_{}_{}.json",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("timer:1:2", "120").unwrap();
        assert_eq!(store.get("timer:1:2").as_deref(), Some("120"));
        store.remove("timer:1:2").unwrap();
        assert_eq!(store.get("timer:1:2"), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        FileStore::new(&path).set("timer:7:9", "300").unwrap();
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("timer:7:9").as_deref(), Some("300"));

        reopened.remove("timer:7:9").unwrap();
        assert_eq!(FileStore::new(&path).get("timer:7:9"), None);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_store_from_config_uses_storage_path() {
        let path = temp_path("config");
        let _ = std::fs::remove_file(&path);
        let config = Config {
            storage_path: path.display().to_string(),
            ..Config::default()
        };

        FileStore::from_config(&config).set("dropped_answers:1:2", "[]").unwrap();
        assert!(path.exists());
        assert_eq!(FileStore::new(&path).get("dropped_answers:1:2").as_deref(), Some("[]"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("anything"), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));

        let _ = std::fs::remove_file(&path);
    }
}
