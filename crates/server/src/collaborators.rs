//! 内置协作方实现
//!
//! 没有接入真实模型服务时使用的默认实现，
//! 在组装根按配置选择注入，核心代码对此无感知。

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use xiaoyou_core::{ChatTurn, LlmService, MemoryService, SttService, TtsService, XiaoyouResult};

/// 内置陪伴式回复生成器
///
/// 按关键词返回预置回复，作为未接入真实LLM时的兜底实现。
pub struct CompanionLlm {
    persona_name: String,
}

impl CompanionLlm {
    pub fn new(persona_name: impl Into<String>) -> Self {
        Self {
            persona_name: persona_name.into(),
        }
    }
}

#[async_trait]
impl LlmService for CompanionLlm {
    async fn query(
        &self,
        user_id: &str,
        prompt: &str,
        history: &[ChatTurn],
    ) -> XiaoyouResult<String> {
        debug!(user_id, history_len = history.len(), "生成内置回复");
        let reply = if prompt.contains("你好") || prompt.contains("hello") {
            format!("你好呀，我是{}，很高兴见到你！", self.persona_name)
        } else if prompt.contains("名字") {
            format!("我叫{}，是你的专属伙伴～", self.persona_name)
        } else if prompt.contains('?') || prompt.contains('？') {
            format!("这个问题很有意思，让{}想一想……你是怎么看的呢？", self.persona_name)
        } else {
            format!("{}听到啦：{}", self.persona_name, prompt)
        };
        Ok(reply)
    }
}

/// 占位语音识别实现
pub struct PlaceholderStt;

#[async_trait]
impl SttService for PlaceholderStt {
    async fn transcribe(&self, audio: &[u8]) -> XiaoyouResult<String> {
        debug!(bytes = audio.len(), "占位STT收到音频");
        Ok(format!("[收到{}字节音频，语音识别尚未接入]", audio.len()))
    }
}

/// 静默语音合成实现（只记录日志）
pub struct SilentTts;

#[async_trait]
impl TtsService for SilentTts {
    async fn speak(&self, text: &str) -> XiaoyouResult<()> {
        debug!(chars = text.chars().count(), "静默TTS跳过合成");
        Ok(())
    }
}

/// 内存对话记忆
///
/// 对话历史保存在进程内；`save`只做日志占位，
/// 失败不影响已持有的内存状态。
pub struct InMemoryMemory {
    auto_save_threshold: usize,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    turns: Vec<ChatTurn>,
    unsaved: usize,
}

impl InMemoryMemory {
    pub fn new(auto_save_threshold: usize) -> Self {
        Self {
            auto_save_threshold,
            state: Mutex::new(MemoryState::default()),
        }
    }
}

#[async_trait]
impl MemoryService for InMemoryMemory {
    async fn add_message(&self, role: &str, content: &str) {
        let mut state = self.state.lock().await;
        state.turns.push(ChatTurn::new(role, content));
        state.unsaved += 1;
    }

    async fn should_auto_save(&self) -> bool {
        self.state.lock().await.unsaved >= self.auto_save_threshold
    }

    async fn save(&self) -> XiaoyouResult<()> {
        let mut state = self.state.lock().await;
        info!(turns = state.turns.len(), "记忆已持久化（内存实现）");
        state.unsaved = 0;
        Ok(())
    }

    async fn history(&self) -> Vec<ChatTurn> {
        self.state.lock().await.turns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_companion_llm_greets_with_persona() {
        let llm = CompanionLlm::new("小优");
        let reply = llm.query("u1", "你好", &[]).await.unwrap();
        assert!(reply.contains("小优"));
    }

    #[tokio::test]
    async fn test_memory_auto_save_threshold() {
        let memory = InMemoryMemory::new(2);
        memory.add_message("user", "a").await;
        assert!(!memory.should_auto_save().await);
        memory.add_message("assistant", "b").await;
        assert!(memory.should_auto_save().await);

        memory.save().await.unwrap();
        assert!(!memory.should_auto_save().await);
        // 持久化不清空内存中的历史
        assert_eq!(memory.history().await.len(), 2);
    }
}
