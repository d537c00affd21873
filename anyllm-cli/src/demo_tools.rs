//! Offline demo handlers wired into `anyllm tools`.

use anyllm_client::{Tool, ToolCall};
use anyllm_tools::{
    ChunkStream, FunctionRegistry, Result, StreamChunk, StreamingToolCallHandler, ToolBuilder,
    ToolCallHandler, ToolError, chunk_channel, parse_arguments,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;

pub fn demo_tools() -> Vec<Tool> {
    vec![
        ToolBuilder::new("get_weather", "Get the current weather for a location")
            .string_param("location", "City name, e.g. Beijing", true, &[])
            .string_param("unit", "Temperature unit", false, &["celsius", "fahrenheit"])
            .build(),
        ToolBuilder::new("calculator", "Evaluate an arithmetic expression")
            .string_param("expression", "Expression such as 2+3*4", true, &[])
            .build(),
        ToolBuilder::new("write_story", "Write a short story, streamed sentence by sentence")
            .string_param("topic", "What the story is about", true, &[])
            .integer_param("sentences", "Number of sentences (1-8)", false)
            .build(),
        ToolBuilder::new("analyze_data", "Summary statistics for a list of numbers")
            .array_param("values", "Numbers to analyze", "number", true)
            .build(),
    ]
}

pub fn register_demo_tools(registry: &FunctionRegistry) {
    registry.register("get_weather", Weather);
    registry.register("calculator", Calculator);
    registry.register_streaming("write_story", StoryWriter { pause: Duration::from_millis(120) });
    registry.register_unified("analyze_data", Analyzer);
}

#[derive(Deserialize)]
struct WeatherArgs {
    location: String,
    #[serde(default)]
    unit: Option<String>,
}

pub struct Weather;

#[async_trait]
impl ToolCallHandler for Weather {
    #[tracing::instrument(level = "info", skip_all)]
    async fn handle_tool_call(&self, call: &ToolCall) -> Result<String> {
        let args: WeatherArgs = parse_arguments(call)?;
        let (temp, unit) = match args.unit.as_deref() {
            Some("fahrenheit") => (72, "°F"),
            _ => (22, "°C"),
        };
        Ok(format!("{}: sunny, {temp}{unit}, light breeze", args.location))
    }
}

#[derive(Deserialize)]
struct CalculatorArgs {
    expression: String,
}

pub struct Calculator;

#[async_trait]
impl ToolCallHandler for Calculator {
    #[tracing::instrument(level = "info", skip_all)]
    async fn handle_tool_call(&self, call: &ToolCall) -> Result<String> {
        let args: CalculatorArgs = parse_arguments(call)?;
        let value = evaluate(&args.expression)?;
        Ok(format!("{} = {value}", args.expression.trim()))
    }
}

/// Deepest run of parentheses or unary minus `evaluate` accepts.
const MAX_NESTING: usize = 64;

/// `+ - * /`, parentheses and unary minus over `f64`.
fn evaluate(expr: &str) -> Result<f64> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = Expr {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.sum()?;
    if parser.pos != parser.tokens.len() {
        return Err(ToolError::InvalidArguments(format!(
            "unexpected {:?} at {} in {expr:?}",
            parser.tokens[parser.pos], parser.pos
        )));
    }
    if !value.is_finite() {
        return Err(ToolError::ExecutionFailed(format!("{expr:?} is not finite")));
    }
    Ok(value)
}

struct Expr {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Expr {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ToolError::InvalidArguments(format!(
                "expression nested deeper than {MAX_NESTING}"
            )));
        }
        Ok(())
    }

    fn sum(&mut self) -> Result<f64> {
        let mut acc = self.product()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.product()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn product(&mut self) -> Result<f64> {
        let mut acc = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == '/' && rhs == 0.0 {
                return Err(ToolError::ExecutionFailed("division by zero".to_string()));
            }
            acc = if op == '*' { acc * rhs } else { acc / rhs };
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<f64> {
        if self.peek() == Some('-') {
            self.pos += 1;
            self.descend()?;
            let v = self.unary()?;
            self.depth -= 1;
            return Ok(-v);
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<f64> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.descend()?;
                let v = self.sum()?;
                if self.peek() != Some(')') {
                    return Err(ToolError::InvalidArguments("missing ')'".to_string()));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let text: String = self.tokens[start..self.pos].iter().collect();
                text.parse()
                    .map_err(|_| ToolError::InvalidArguments(format!("bad number {text:?}")))
            }
            Some(c) => Err(ToolError::InvalidArguments(format!("unexpected {c:?}"))),
            None => Err(ToolError::InvalidArguments("unexpected end of expression".to_string())),
        }
    }
}

#[derive(Deserialize)]
struct StoryArgs {
    topic: String,
    #[serde(default)]
    sentences: Option<usize>,
}

pub struct StoryWriter {
    pause: Duration,
}

const STORY_BEATS: [&str; 8] = [
    "Once there was {topic}, and nobody expected much of it.",
    "Every morning it woke before the sun.",
    "One day a stranger asked about {topic}.",
    "The question stayed long after the stranger left.",
    "Slowly, {topic} began to change.",
    "Friends noticed, then neighbours, then the whole town.",
    "By winter, {topic} was the talk of every kitchen.",
    "And that was only the beginning.",
];

#[async_trait]
impl StreamingToolCallHandler for StoryWriter {
    #[tracing::instrument(level = "info", skip_all)]
    async fn handle_tool_call_stream(&self, call: &ToolCall) -> Result<ChunkStream> {
        let args: StoryArgs = parse_arguments(call)?;
        let count = args.sentences.unwrap_or(4).clamp(1, STORY_BEATS.len());
        let pause = self.pause;
        let (tx, stream) = chunk_channel(4);
        tokio::spawn(async move {
            for beat in STORY_BEATS.iter().take(count) {
                let sentence = format!("{} ", beat.replace("{topic}", &args.topic));
                if tx.send(StreamChunk::content(sentence)).await.is_err() {
                    tracing::debug!("story reader went away");
                    return;
                }
                tokio::time::sleep(pause).await;
            }
            let _ = tx.send(StreamChunk::done("")).await;
        });
        Ok(stream)
    }
}

#[derive(Deserialize)]
struct AnalyzeArgs {
    values: Vec<f64>,
}

/// Whole-result and per-statistic streaming forms.
pub struct Analyzer;

impl Analyzer {
    fn stats(call: &ToolCall) -> Result<Vec<(&'static str, f64)>> {
        let args: AnalyzeArgs = parse_arguments(call)?;
        if args.values.is_empty() {
            return Err(ToolError::InvalidArguments("values is empty".to_string()));
        }
        let n = args.values.len() as f64;
        let sum: f64 = args.values.iter().sum();
        let min = args.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = args.values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(vec![
            ("count", n),
            ("sum", sum),
            ("mean", sum / n),
            ("min", min),
            ("max", max),
        ])
    }
}

#[async_trait]
impl ToolCallHandler for Analyzer {
    async fn handle_tool_call(&self, call: &ToolCall) -> Result<String> {
        let stats = Self::stats(call)?;
        let body = stats
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(body)
    }
}

#[async_trait]
impl StreamingToolCallHandler for Analyzer {
    async fn handle_tool_call_stream(&self, call: &ToolCall) -> Result<ChunkStream> {
        let stats = Self::stats(call)?;
        let last = stats.len().saturating_sub(1);
        let chunks: Vec<StreamChunk> = stats
            .into_iter()
            .enumerate()
            .map(|(i, (k, v))| {
                let sep = if i == last { "" } else { ", " };
                let mut chunk = StreamChunk::content(format!("{k}={v}{sep}"));
                chunk.done = i == last;
                chunk
            })
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &str) -> ToolCall {
        ToolCall::new("c", name, args)
    }

    #[test]
    fn evaluates_expressions() {
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("(2+3)*4").unwrap(), 20.0);
        assert_eq!(evaluate("-3 - -2").unwrap(), -1.0);
        assert_eq!(evaluate("7/2").unwrap(), 3.5);
        assert!(matches!(evaluate("1/0"), Err(ToolError::ExecutionFailed(_))));
        assert!(matches!(evaluate("2+"), Err(ToolError::InvalidArguments(_))));
        assert!(matches!(evaluate("(1"), Err(ToolError::InvalidArguments(_))));
        assert!(matches!(evaluate("1)"), Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(evaluate(&ok).unwrap(), 1.0);
        assert_eq!(evaluate(&format!("{}1", "-".repeat(MAX_NESTING))).unwrap(), 1.0);

        let parens = format!("{}1", "(".repeat(200_000));
        assert!(matches!(evaluate(&parens), Err(ToolError::InvalidArguments(m)) if m.contains("nested")));
        let minus = format!("{}1", "-".repeat(200_000));
        assert!(matches!(evaluate(&minus), Err(ToolError::InvalidArguments(_))));

        // siblings do not accumulate depth
        let wide = vec!["(1)"; 500].join("+");
        assert_eq!(evaluate(&wide).unwrap(), 500.0);
    }

    #[test]
    fn schemas_are_valid_tool_names() {
        for tool in demo_tools() {
            anyllm_client::validate_tool_name(&tool.function.name).unwrap();
        }
    }

    #[tokio::test]
    async fn registry_runs_every_demo_tool() {
        let registry = FunctionRegistry::new();
        register_demo_tools(&registry);
        registry.register_streaming("write_story", StoryWriter { pause: Duration::ZERO });

        let results = registry
            .handle_all(&[
                call("get_weather", r#"{"location":"Oslo","unit":"fahrenheit"}"#),
                call("calculator", r#"{"expression":"6*7"}"#),
                call("write_story", r#"{"topic":"a lighthouse","sentences":2}"#),
                call("analyze_data", r#"{"values":[1,2,3,6]}"#),
            ])
            .await;

        assert_eq!(results[0].content, "Oslo: sunny, 72°F, light breeze");
        assert_eq!(results[1].content, "6*7 = 42");
        assert_eq!(
            results[2].content,
            "Once there was a lighthouse, and nobody expected much of it. Every morning it woke before the sun. "
        );
        assert_eq!(results[3].content, "count=4, sum=12, mean=3, min=1, max=6");
        assert!(results.iter().all(|r| r.error.is_none()));
    }

    #[tokio::test]
    async fn analyzer_streams_the_same_text() {
        let registry = FunctionRegistry::new();
        register_demo_tools(&registry);
        assert!(registry.can_handle_streaming("analyze_data"));
        let chunks: Vec<StreamChunk> = registry
            .handle_streaming(&call("analyze_data", r#"{"values":[2,4]}"#))
            .await
            .collect()
            .await;
        let text: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(text, "count=2, sum=6, mean=3, min=2, max=4");
        assert!(chunks.last().unwrap().done);
    }
}
