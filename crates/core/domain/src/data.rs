use std::fmt;

/// 点位值的数据类型。
#[derive(Debug, Clone, PartialEq)]
pub enum PointValueData {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl PointValueData {
    /// 从设备返回的文本解析：整数、浮点、布尔，其余按字符串保留。
    pub fn parse_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::I64(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Self::F64(value);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" | "on" => Self::Bool(true),
            "false" | "off" => Self::Bool(false),
            _ => Self::String(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I64(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::String(v) => v.trim().parse::<f64>().ok(),
        }
    }
}

impl fmt::Display for PointValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I64(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
        }
    }
}

/// 点位值更新事件。
///
/// `value` 为 `None` 表示“无可用数据”，下游据此把点位标记为过期，
/// 而不是沿用旧值。
#[derive(Debug, Clone, PartialEq)]
pub struct PointEvent {
    pub point_id: String,
    pub value: Option<PointValueData>,
    pub ts_ms: i64,
    pub is_alarm: bool,
}

impl PointEvent {
    pub fn value(point_id: impl Into<String>, value: PointValueData, ts_ms: i64) -> Self {
        Self {
            point_id: point_id.into(),
            value: Some(value),
            ts_ms,
            is_alarm: false,
        }
    }

    pub fn no_data(point_id: impl Into<String>, ts_ms: i64) -> Self {
        Self {
            point_id: point_id.into(),
            value: None,
            ts_ms,
            is_alarm: false,
        }
    }

    pub fn with_alarm(mut self, is_alarm: bool) -> Self {
        self.is_alarm = is_alarm;
        self
    }

    pub fn is_no_data(&self) -> bool {
        self.value.is_none()
    }
}

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
