// 服务进程配置
// 配置文件缺失时写出默认值，环境变量可覆盖监听地址

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// 监听地址环境变量，优先于配置文件
const BIND_ENV: &str = "SHELLRELAY_BIND";

/// 服务配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// WebSocket / HTTP 监听地址
    pub bind_addr: String,
    /// 新会话的默认终端类型
    pub shell_term: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8022".to_string(),
            shell_term: "xterm-256color".to_string(),
        }
    }
}

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/shellrelay
/// Linux: ~/.config/shellrelay
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("shellrelay");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir).context("无法创建配置目录")?;
    }
    Ok(config_dir)
}

/// 获取设置配置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载服务配置
/// 首次运行时写出默认配置文件，便于手工修改
pub fn load_settings() -> Result<RelaySettings> {
    let path = get_settings_file()?;
    let mut settings = if path.exists() {
        let content = fs::read_to_string(&path).context("无法读取设置配置文件")?;
        serde_json::from_str(&content).context("无法解析设置配置文件")?
    } else {
        let defaults = RelaySettings::default();
        save_settings(&defaults)?;
        info!("[Settings] Wrote default settings to {}", path.display());
        defaults
    };

    if let Ok(bind) = std::env::var(BIND_ENV) {
        if !bind.is_empty() {
            info!("[Settings] {} overrides bind address: {}", BIND_ENV, bind);
            settings.bind_addr = bind;
        }
    }

    Ok(settings)
}

/// 保存服务配置
pub fn save_settings(settings: &RelaySettings) -> Result<()> {
    let path = get_settings_file()?;
    let content = serde_json::to_string_pretty(settings).context("无法序列化设置")?;
    fs::write(&path, content).context("无法写入设置配置文件")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.bind_addr, "127.0.0.1:8022");
        assert_eq!(settings.shell_term, "xterm-256color");
    }

    #[test]
    fn test_partial_settings_file_fills_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"bind_addr": "0.0.0.0:9000"}"#).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:9000");
        assert_eq!(settings.shell_term, "xterm-256color");
    }

    #[test]
    fn test_settings_round_trip() {
        let settings = RelaySettings {
            bind_addr: "10.0.0.1:22222".to_string(),
            shell_term: "vt100".to_string(),
        };
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: RelaySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bind_addr, settings.bind_addr);
        assert_eq!(parsed.shell_term, settings.shell_term);
    }
}
