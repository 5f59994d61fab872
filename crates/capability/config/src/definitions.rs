//! 通道声明与点位声明文件。
//!
//! 通道声明为纯文本，每行一个：
//!
//! ```text
//! # kind        args（冒号分隔）
//! ASCIISocket   192.168.1.20:4001:3000
//! Simulator     5:1:10
//! ```
//!
//! 点位声明为 JSON 数组，见 [`PointDefinition`]。

use std::fs;

use serde::Deserialize;
use tracing::error;

use crate::ConfigError;

/// 一条通道声明。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub kind: String,
    pub args: Vec<String>,
    /// 声明所在行号（从 1 开始），用于报错。
    pub line: usize,
}

impl ChannelDefinition {
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// 解析通道声明文本。`#` 之后为注释，空行忽略；参数只取类型之后的第一个字段。
///
/// 类型名不合法的行记录错误日志后跳过，不影响其余声明。
pub fn parse_channel_definitions(text: &str) -> Vec<ChannelDefinition> {
    let mut definitions = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        let mut tokens = content.split_whitespace();
        let Some(kind) = tokens.next() else {
            continue;
        };
        if !kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            error!(
                target: "ems.config",
                line,
                kind,
                "invalid driver kind, declaration skipped"
            );
            continue;
        }
        let args = tokens
            .next()
            .map(|args| args.split(':').map(str::to_string).collect())
            .unwrap_or_default();
        definitions.push(ChannelDefinition {
            kind: kind.to_string(),
            args,
            line,
        });
    }
    definitions
}

pub fn load_channel_definitions(path: &str) -> Result<Vec<ChannelDefinition>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::Read(path.to_string(), err.to_string()))?;
    Ok(parse_channel_definitions(&text))
}

/// 一条点位声明。
///
/// `input` / `output` 为冒号分隔的 transaction 参数（不含通道名），
/// 全部路由到 `channel`。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PointDefinition {
    pub id: String,
    #[serde(default)]
    pub period_ms: i64,
    pub channel: String,
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl PointDefinition {
    pub fn input_args(&self) -> Vec<Vec<String>> {
        split_args(&self.input)
    }

    pub fn output_args(&self) -> Vec<Vec<String>> {
        split_args(&self.output)
    }
}

fn split_args(raw: &[String]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|item| item.split(':').map(str::to_string).collect())
        .collect()
}

pub fn parse_point_definitions(json: &str) -> Result<Vec<PointDefinition>, ConfigError> {
    let definitions: Vec<PointDefinition> =
        serde_json::from_str(json).map_err(|err| ConfigError::Points(err.to_string()))?;
    let mut seen = std::collections::HashSet::new();
    for definition in &definitions {
        if definition.id.trim().is_empty() {
            return Err(ConfigError::Points("point id must not be empty".to_string()));
        }
        if definition.period_ms < 0 {
            return Err(ConfigError::Points(format!(
                "point {} has negative period",
                definition.id
            )));
        }
        if !seen.insert(definition.id.as_str()) {
            return Err(ConfigError::Points(format!(
                "duplicate point id {}",
                definition.id
            )));
        }
    }
    Ok(definitions)
}

pub fn load_point_definitions(path: &str) -> Result<Vec<PointDefinition>, ConfigError> {
    let json = fs::read_to_string(path).map_err(|err| ConfigError::Read(path.to_string(), err.to_string()))?;
    parse_point_definitions(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channels_with_comments_and_blank_lines() {
        let text = "\
# 设备通道
ASCIISocket 10.0.0.5:4001:2000

Simulator 3:1:5   # 调试用
MqttSubscriber
";
        let definitions = parse_channel_definitions(text);
        assert_eq!(definitions.len(), 3);
        assert_eq!(definitions[0].kind, "ASCIISocket");
        assert_eq!(definitions[0].args, vec!["10.0.0.5", "4001", "2000"]);
        assert_eq!(definitions[0].line, 2);
        assert_eq!(definitions[1].arg(0), Some("3"));
        assert_eq!(definitions[1].line, 4);
        assert!(definitions[2].args.is_empty());
    }

    #[test]
    fn skips_declaration_with_bad_kind() {
        let definitions =
            parse_channel_definitions("Simulator 1:1:2\nbad$kind a:b\nSimulator 2:1:2\n");
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].line, 1);
        assert_eq!(definitions[1].line, 3);
        assert_eq!(definitions[1].arg(0), Some("2"));
    }

    #[test]
    fn parses_point_definitions() {
        let json = r#"[
            {"id": "site.temp", "period_ms": 1000, "channel": "10.0.0.5:4001", "input": ["TEMP?\\n:1"]},
            {"id": "site.valve", "channel": "modbus:10.0.0.6:502", "output": ["1:40"]}
        ]"#;
        let points = parse_point_definitions(json).expect("parse");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].input_args(), vec![vec!["TEMP?\\n", "1"]]);
        assert_eq!(points[1].period_ms, 0);
        assert_eq!(points[1].output_args(), vec![vec!["1", "40"]]);
    }

    #[test]
    fn rejects_duplicate_point_ids() {
        let json = r#"[{"id": "a", "channel": "c"}, {"id": "a", "channel": "c"}]"#;
        assert!(matches!(
            parse_point_definitions(json),
            Err(ConfigError::Points(_))
        ));
    }
}
