//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__TOOL_TIMEOUT_SECS=10`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::EngineError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；是否真正启用由 API Key 决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmModelSection,
    #[serde(default)]
    pub openai: LlmModelSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [engine] 段：工具超时、事件通道容量、环境提示、分类阈值与各阶段 token 上限
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 进度事件 broadcast 通道容量
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// 允许暴露给模型的环境变量名（仅非敏感值，如默认 bucket / endpoint）
    #[serde(default = "default_env_hints")]
    pub env_hints: Vec<String>,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub tokens: TokensSection,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            event_capacity: default_event_capacity(),
            env_hints: default_env_hints(),
            classifier: ClassifierSection::default(),
            tokens: TokensSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    64
}

fn default_env_hints() -> Vec<String> {
    vec!["MINIO_ENDPOINT".into(), "DEFAULT_BUCKET_NAME".into()]
}

/// [engine.classifier] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    /// 字符数不超过此值的输入直接判为闲聊
    #[serde(default = "default_short_input_chars")]
    pub short_input_chars: usize,
    /// 规则无法判断时，字符数超过此值判为任务
    #[serde(default = "default_task_length_threshold")]
    pub task_length_threshold: usize,
    /// 规则无法判断时是否询问模型
    #[serde(default = "default_use_llm")]
    pub use_llm: bool,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            short_input_chars: default_short_input_chars(),
            task_length_threshold: default_task_length_threshold(),
            use_llm: default_use_llm(),
        }
    }
}

fn default_short_input_chars() -> usize {
    3
}

fn default_task_length_threshold() -> usize {
    8
}

fn default_use_llm() -> bool {
    true
}

/// [engine.tokens] 段：各类模型请求的 max_tokens
#[derive(Debug, Clone, Deserialize)]
pub struct TokensSection {
    #[serde(default = "default_classify_tokens")]
    pub classify: u32,
    #[serde(default = "default_plan_tokens")]
    pub plan: u32,
    #[serde(default = "default_repair_tokens")]
    pub repair: u32,
    #[serde(default = "default_summary_tokens")]
    pub summary: u32,
    #[serde(default = "default_chat_tokens")]
    pub chat: u32,
}

impl Default for TokensSection {
    fn default() -> Self {
        Self {
            classify: default_classify_tokens(),
            plan: default_plan_tokens(),
            repair: default_repair_tokens(),
            summary: default_summary_tokens(),
            chat: default_chat_tokens(),
        }
    }
}

fn default_classify_tokens() -> u32 {
    20
}

fn default_plan_tokens() -> u32 {
    2000
}

fn default_repair_tokens() -> u32 {
    400
}

fn default_summary_tokens() -> u32 {
    600
}

fn default_chat_tokens() -> u32 {
    100
}

impl EngineSection {
    /// 读取 env_hints 中列出的环境变量，仅保留已设置且非空的值
    pub fn collect_env_hints(&self) -> HashMap<String, String> {
        self.env_hints
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.clone(), v))
            })
            .collect()
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, EngineError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| EngineError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.tool_timeout_secs, 30);
        assert_eq!(cfg.engine.classifier.short_input_chars, 3);
        assert_eq!(cfg.engine.classifier.task_length_threshold, 8);
        assert_eq!(cfg.engine.tokens.plan, 2000);
        assert_eq!(cfg.engine.tokens.repair, 400);
        assert_eq!(cfg.llm.provider, "deepseek");
    }

    #[test]
    fn test_load_from_file_overrides_engine_section() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[engine]\ntool_timeout_secs = 5\n\n[engine.classifier]\nuse_llm = false\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engine.tool_timeout_secs, 5);
        assert!(!cfg.engine.classifier.use_llm);
        // 未出现的键保持默认
        assert_eq!(cfg.engine.tokens.summary, 600);
    }

    #[test]
    fn test_collect_env_hints_skips_unset() {
        let section = EngineSection {
            env_hints: vec!["HIVE_TEST_SURELY_UNSET_VAR".to_string()],
            ..EngineSection::default()
        };
        assert!(section.collect_env_hints().is_empty());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[engine]\ntool_timeout_secs = \"soon\"\n").unwrap();

        let err = load_config(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
