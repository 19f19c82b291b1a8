use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use xiaoyou_core::XiaoyouResult;

/// 客户端入站消息信封
///
/// 以`type`字段区分类型；未识别的类型落入`Unknown`，
/// 由路由层记录日志后忽略（对新客户端前向兼容）。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "text_input")]
    TextInput { text: String },
    #[serde(rename = "audio_input")]
    AudioInput { audio_data: String },
    #[serde(rename = "system_status")]
    SystemStatus,
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn parse(raw: &str) -> XiaoyouResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::TextInput { .. } => "text_input",
            ClientMessage::AudioInput { .. } => "audio_input",
            ClientMessage::SystemStatus => "system_status",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// 系统状态计数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusData {
    pub active_users: usize,
    pub total_queries: u64,
}

/// 服务端出站消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// 系统提示（如"思考中"确认）
    #[serde(rename = "system")]
    System { content: String },
    /// 对话回复
    #[serde(rename = "message")]
    Message {
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// 语音识别结果
    #[serde(rename = "transcription")]
    Transcription { content: String },
    /// 状态查询响应
    #[serde(rename = "system_status")]
    SystemStatus { data: StatusData },
}

impl ServerMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ServerMessage::System {
            content: content.into(),
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        ServerMessage::Message {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn transcription(content: impl Into<String>) -> Self {
        ServerMessage::Transcription {
            content: content.into(),
        }
    }

    pub fn status(active_users: usize, total_queries: u64) -> Self {
        ServerMessage::SystemStatus {
            data: StatusData {
                active_users,
                total_queries,
            },
        }
    }

    pub fn serialize(&self) -> XiaoyouResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
