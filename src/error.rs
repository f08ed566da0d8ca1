use std::fmt;

/// novel-agent 项目的统一错误类型
#[derive(Debug)]
pub enum NovelError {
    /// 文本生成服务错误
    Llm(LlmError),
    /// 向量嵌入服务错误
    Embedding(EmbeddingError),
    /// 任务调度错误
    Task(TaskError),
    /// 相似度存储错误
    Store(StoreError),
    /// 上下文树错误
    Context(ContextError),
    /// Agent 执行错误
    Agent(AgentError),
    /// 解析错误
    Parse(ParseError),
    /// 配置错误
    Config(ConfigError),
    /// 单个任务执行超时
    Timeout { task_id: String, timeout_ms: u64 },
    /// 执行被取消
    Cancelled(String),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 生成服务（LLM）相关错误
#[derive(Debug)]
pub enum LlmError {
    /// 网络请求失败
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
    /// 没有返回内容
    EmptyResponse,
    /// 流式响应中途出错
    StreamError(String),
}

/// 嵌入服务相关错误
#[derive(Debug)]
pub enum EmbeddingError {
    /// 网络请求失败
    NetworkError(String),
    /// API 返回错误状态码
    ApiError { status: u16, message: String },
    /// 响应格式无效
    InvalidResponse(String),
}

/// 任务调度错误
#[derive(Debug)]
pub enum TaskError {
    /// 任务 ID 已存在
    Duplicate(String),
    /// 任务不存在
    Unknown(String),
    /// 当前状态不允许该操作
    InvalidState {
        id: String,
        status: String,
        action: &'static str,
    },
    /// 添加该任务会形成循环依赖，`path` 为从新任务出发回到自身的路径
    CyclicDependency { id: String, path: Vec<String> },
}

/// 相似度存储错误
#[derive(Debug)]
pub enum StoreError {
    /// 向量维度与存储配置不符
    DimensionMismatch { expected: usize, actual: usize },
    /// 持久化文件读写失败
    IoError(String),
    /// 序列化/反序列化失败
    SerializationError(String),
}

/// 上下文树错误
#[derive(Debug)]
pub enum ContextError {
    /// 节点句柄不属于这棵树
    UnknownNode(usize),
}

/// Agent 执行错误
#[derive(Debug)]
pub enum AgentError {
    /// 注册表中没有该名称的 Agent
    NotFound(String),
    /// Agent 返回了空内容
    EmptyOutput(String),
    /// 注册表为空，无法为未指派的任务选择 Worker
    NoAgents,
}

/// 解析错误
#[derive(Debug)]
pub enum ParseError {
    /// JSON 解析错误
    JsonError(String),
    /// Worker 的结构化输出不符合预期 schema
    MalformedResponse(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 环境变量格式错误
    EnvFormatError(String),
    /// 未知的配置项
    UnknownKey { key: String, env: String },
    /// 缺少必需的配置项
    MissingField { model: String, field: String },
    /// 找不到指定模型
    ModelNotFound(String),
}

// 实现 Display trait
impl fmt::Display for NovelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NovelError::Llm(e) => write!(f, "Generation service error: {}", e),
            NovelError::Embedding(e) => write!(f, "Embedding service error: {}", e),
            NovelError::Task(e) => write!(f, "Task error: {}", e),
            NovelError::Store(e) => write!(f, "Store error: {}", e),
            NovelError::Context(e) => write!(f, "Context error: {}", e),
            NovelError::Agent(e) => write!(f, "Agent error: {}", e),
            NovelError::Parse(e) => write!(f, "Parse error: {}", e),
            NovelError::Config(e) => write!(f, "Config error: {}", e),
            NovelError::Timeout {
                task_id,
                timeout_ms,
            } => write!(f, "Task '{}' timed out after {} ms", task_id, timeout_ms),
            NovelError::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
            NovelError::Io(e) => write!(f, "IO Error: {}", e),
            NovelError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            LlmError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            LlmError::EmptyResponse => write!(f, "Empty response from LLM"),
            LlmError::StreamError(msg) => write!(f, "Stream error: {}", msg),
        }
    }
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            EmbeddingError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            EmbeddingError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Duplicate(id) => write!(f, "Task '{}' already exists", id),
            TaskError::Unknown(id) => write!(f, "Task '{}' not found", id),
            TaskError::InvalidState { id, status, action } => {
                write!(f, "Cannot {} task '{}' in state {}", action, id, status)
            }
            TaskError::CyclicDependency { id, path } => write!(
                f,
                "Task '{}' would create a dependency cycle: {}",
                id,
                path.join(" -> ")
            ),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DimensionMismatch { expected, actual } => write!(
                f,
                "Embedding dimension mismatch: expected {}, got {}",
                expected, actual
            ),
            StoreError::IoError(msg) => write!(f, "IO error: {}", msg),
            StoreError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::UnknownNode(id) => write!(f, "Context node #{} not found", id),
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::NotFound(name) => write!(f, "Agent '{}' not found", name),
            AgentError::EmptyOutput(name) => write!(f, "Agent '{}' returned empty output", name),
            AgentError::NoAgents => write!(f, "No agents available"),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::JsonError(msg) => write!(f, "JSON parse error: {}", msg),
            ParseError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::EnvFormatError(key) => {
                write!(f, "Malformed model environment variable: {}", key)
            }
            ConfigError::UnknownKey { key, env } => {
                write!(f, "Unknown model config key '{}' in {}", key, env)
            }
            ConfigError::MissingField { model, field } => {
                write!(f, "Model '{}' is missing config field '{}'", model, field)
            }
            ConfigError::ModelNotFound(model) => write!(f, "Model '{}' is not configured", model),
        }
    }
}

// 实现 std::error::Error trait
impl std::error::Error for NovelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NovelError::Io(e) => Some(e),
            NovelError::Llm(e) => Some(e),
            NovelError::Embedding(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for LlmError {}
impl std::error::Error for EmbeddingError {}
impl std::error::Error for TaskError {}
impl std::error::Error for StoreError {}
impl std::error::Error for ContextError {}
impl std::error::Error for AgentError {}
impl std::error::Error for ParseError {}
impl std::error::Error for ConfigError {}

impl NovelError {
    /// 是否值得由调用方重试：只有外部生成/嵌入服务的瞬时故障才可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            NovelError::Llm(LlmError::NetworkError(_))
            | NovelError::Llm(LlmError::EmptyResponse)
            | NovelError::Llm(LlmError::StreamError(_))
            | NovelError::Embedding(EmbeddingError::NetworkError(_)) => true,
            NovelError::Llm(LlmError::ApiError { status, .. })
            | NovelError::Embedding(EmbeddingError::ApiError { status, .. }) => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

// From 转换实现
impl From<std::io::Error> for NovelError {
    fn from(err: std::io::Error) -> Self {
        NovelError::Io(err)
    }
}

impl From<reqwest::Error> for NovelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NovelError::Llm(LlmError::NetworkError("Request timeout".to_string()))
        } else if err.is_connect() {
            NovelError::Llm(LlmError::NetworkError(format!(
                "Connection failed: {}",
                err
            )))
        } else {
            NovelError::Llm(LlmError::NetworkError(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for NovelError {
    fn from(err: serde_json::Error) -> Self {
        NovelError::Parse(ParseError::JsonError(err.to_string()))
    }
}

impl From<serde_yaml::Error> for NovelError {
    fn from(err: serde_yaml::Error) -> Self {
        NovelError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<LlmError> for NovelError {
    fn from(err: LlmError) -> Self {
        NovelError::Llm(err)
    }
}

impl From<EmbeddingError> for NovelError {
    fn from(err: EmbeddingError) -> Self {
        NovelError::Embedding(err)
    }
}

impl From<TaskError> for NovelError {
    fn from(err: TaskError) -> Self {
        NovelError::Task(err)
    }
}

impl From<StoreError> for NovelError {
    fn from(err: StoreError) -> Self {
        NovelError::Store(err)
    }
}

impl From<ContextError> for NovelError {
    fn from(err: ContextError) -> Self {
        NovelError::Context(err)
    }
}

impl From<AgentError> for NovelError {
    fn from(err: AgentError) -> Self {
        NovelError::Agent(err)
    }
}

impl From<ParseError> for NovelError {
    fn from(err: ParseError) -> Self {
        NovelError::Parse(err)
    }
}

impl From<ConfigError> for NovelError {
    fn from(err: ConfigError) -> Self {
        NovelError::Config(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, NovelError>;
