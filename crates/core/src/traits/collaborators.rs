//! 外部协作方接口
//!
//! 核心只通过这些窄接口依赖LLM/STT/TTS/记忆等外部能力，
//! 具体实现（真实模型或测试替身）在组装时注入，不做运行时探测。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::XiaoyouResult;

/// 对话历史中的一轮
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 大语言模型协作方
#[async_trait]
pub trait LlmService: Send + Sync {
    /// 生成对话回复，失败作为单次请求错误处理
    async fn query(
        &self,
        user_id: &str,
        prompt: &str,
        history: &[ChatTurn],
    ) -> XiaoyouResult<String>;
}

/// 语音识别协作方
#[async_trait]
pub trait SttService: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> XiaoyouResult<String>;
}

/// 语音合成协作方（尽力而为，失败只记录日志）
#[async_trait]
pub trait TtsService: Send + Sync {
    async fn speak(&self, text: &str) -> XiaoyouResult<()>;
}

/// 对话记忆协作方
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn add_message(&self, role: &str, content: &str);

    /// 是否达到自动持久化条件
    async fn should_auto_save(&self) -> bool;

    /// 持久化记忆，失败不影响内存中的对话状态
    async fn save(&self) -> XiaoyouResult<()>;

    async fn history(&self) -> Vec<ChatTurn>;
}
