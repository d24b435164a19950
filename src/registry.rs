//! 文件监听开关表
//!
//! 文件标识 → 是否继续监听。未登记的文件视为关闭。

use std::collections::HashMap;

use parking_lot::RwLock;

/// 文件监听开关表
///
/// 由 Agent 持有并以 `Arc` 共享给每个 FileWatcher 和外部控制方。
/// 条目只增不删，数量受同时监听的文件数约束。
#[derive(Debug, Default)]
pub struct WatchRegistry {
    switches: RwLock<HashMap<String, bool>>,
}

impl WatchRegistry {
    /// 创建空开关表
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置开关（幂等）
    pub fn set_enabled(&self, file_id: &str, enabled: bool) {
        let mut switches = self.switches.write();
        match switches.get_mut(file_id) {
            Some(current) => *current = enabled,
            None => {
                switches.insert(file_id.to_string(), enabled);
            }
        }
        tracing::trace!("🔀 Watch switch: {} → {}", file_id, enabled);
    }

    /// 查询开关，未知文件返回 false
    pub fn is_enabled(&self, file_id: &str) -> bool {
        self.switches.read().get(file_id).copied().unwrap_or(false)
    }

    /// 关闭所有开关，返回此前处于开启状态的数量
    pub fn disable_all(&self) -> usize {
        let mut switches = self.switches.write();
        let mut count = 0;
        for enabled in switches.values_mut() {
            if *enabled {
                *enabled = false;
                count += 1;
            }
        }
        count
    }

    /// 当前开启的文件标识
    pub fn enabled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .switches
            .read()
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}
