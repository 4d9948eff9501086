//! Multi-Round Executor (§4.2): drives an iterative tool-use loop between an
//! agent and a fixed tool set, bounded by a round budget, terminating on the
//! `FINAL_ANSWER:` sentinel.
//!
//! Each round is a fresh, stateless call through the Agent Invoker with the
//! full transcript so far as the prompt — the agent CLIs this orchestrates
//! are single-shot processes, so the "conversation" lives in the text we
//! resend, not in a long-lived session.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::harness::Harness;
use crate::invoker::{self, InvokeOutcome};

pub const DEFAULT_MAX_ROUNDS: u32 = 20;
const SENTINEL: &str = "final_answer:";

/// One tool invocation the executor must be able to dispatch by name. Must
/// be total: every call returns a result string, success or structured
/// error — a failing tool does not abort the loop, the agent may recover.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, input: &str, workspace: &Path) -> String;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: std::collections::HashMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn ToolHandler>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn describe(&self) -> String {
        self.tools
            .keys()
            .map(|n| format!("- {n}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs a shell command in the task's workspace. The orchestrator treats
/// this as a trusted tool available to the agents it invokes, scoped to the
/// per-task workspace directory — it is not a generic code-execution
/// facility reachable from untrusted text (see [`ExpressionTool`] for that
/// boundary).
pub struct ShellTool;

#[async_trait]
impl ToolHandler for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    async fn call(&self, input: &str, workspace: &Path) -> String {
        let output = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(input)
            .current_dir(workspace)
            .output()
            .await;
        match output {
            Ok(out) => {
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                if combined.is_empty() {
                    format!("(exit {})", out.status.code().unwrap_or(-1))
                } else {
                    combined
                }
            }
            Err(e) => format!("ERROR: shell spawn failed: {e}"),
        }
    }
}

/// A closed-whitelist arithmetic evaluator standing in for the "SQL" tool:
/// per the design notes, any in-orchestrator expression evaluation must be a
/// fixed grammar plus a fixed function set, never a generic-code-execution
/// facility reachable from agent-authored text. Supports `+ - * / ( )` and
/// `abs`, `min`, `max`.
pub struct ExpressionTool;

#[async_trait]
impl ToolHandler for ExpressionTool {
    fn name(&self) -> &str {
        "sql"
    }

    async fn call(&self, input: &str, _workspace: &Path) -> String {
        match eval_expression(input) {
            Ok(v) => v.to_string(),
            Err(e) => format!("ERROR: {e}"),
        }
    }
}

fn eval_expression(input: &str) -> Result<f64, String> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let value = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err("unexpected trailing tokens".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Tok>, String> {
    let mut out = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            out.push(Tok::Num(s.parse().map_err(|_| format!("bad number: {s}"))?));
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_alphanumeric() {
                i += 1;
            }
            out.push(Tok::Ident(chars[start..i].iter().collect()));
        } else {
            match c {
                '+' => out.push(Tok::Plus),
                '-' => out.push(Tok::Minus),
                '*' => out.push(Tok::Star),
                '/' => out.push(Tok::Slash),
                '(' => out.push(Tok::LParen),
                ')' => out.push(Tok::RParen),
                ',' => out.push(Tok::Comma),
                other => return Err(format!("unexpected character: {other}")),
            }
            i += 1;
        }
    }
    Ok(out)
}

fn parse_expr(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_term(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Tok::Plus) => {
                *pos += 1;
                value += parse_term(tokens, pos)?;
            }
            Some(Tok::Minus) => {
                *pos += 1;
                value -= parse_term(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_factor(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Tok::Star) => {
                *pos += 1;
                value *= parse_factor(tokens, pos)?;
            }
            Some(Tok::Slash) => {
                *pos += 1;
                let divisor = parse_factor(tokens, pos)?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_factor(tokens: &[Tok], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some(Tok::Minus) => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos)?)
        }
        Some(Tok::Num(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Tok::LParen) => {
            *pos += 1;
            let v = parse_expr(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Tok::RParen) => {
                    *pos += 1;
                    Ok(v)
                }
                _ => Err("expected )".to_string()),
            }
        }
        Some(Tok::Ident(name)) => {
            let name = name.clone();
            *pos += 1;
            match tokens.get(*pos) {
                Some(Tok::LParen) => {
                    *pos += 1;
                    let mut args = vec![parse_expr(tokens, pos)?];
                    while matches!(tokens.get(*pos), Some(Tok::Comma)) {
                        *pos += 1;
                        args.push(parse_expr(tokens, pos)?);
                    }
                    match tokens.get(*pos) {
                        Some(Tok::RParen) => *pos += 1,
                        _ => return Err("expected )".to_string()),
                    }
                    call_function(&name, &args)
                }
                _ => Err(format!("unknown identifier: {name}")),
            }
        }
        other => Err(format!("unexpected token: {other:?}")),
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, String> {
    match name {
        "abs" if args.len() == 1 => Ok(args[0].abs()),
        "min" if args.len() == 2 => Ok(args[0].min(args[1])),
        "max" if args.len() == 2 => Ok(args[0].max(args[1])),
        _ => Err(format!("unknown function or arity: {name}/{}", args.len())),
    }
}

/// One tool call the executor dispatched, and what came back.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub round: u32,
    pub tool: String,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    input: String,
}

/// Outcome of a [`run`] call.
#[derive(Debug, Clone)]
pub struct ExecutorResult {
    pub final_answer: Option<String>,
    pub rounds_used: u32,
    pub tool_log: Vec<ToolCallRecord>,
    pub success: bool,
    pub error: Option<String>,
}

fn extract_final_answer(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    let lower = trimmed.to_lowercase();
    if let Some(rest) = lower.strip_prefix(SENTINEL) {
        let offset = trimmed.len() - rest.len();
        return Some(trimmed[offset..].trim().to_string());
    }
    None
}

/// Each tool call is a single JSON object per line: `{"tool": "...",
/// "input": "..."}`. Non-matching lines are ignored, not errors — agent
/// prose surrounding a tool-call block is expected.
fn parse_tool_calls(reply: &str) -> Vec<ToolCall> {
    reply
        .lines()
        .filter_map(|line| serde_json::from_str::<ToolCall>(line.trim()).ok())
        .collect()
}

fn build_system_preamble(task_prompt: &str, tools: &ToolRegistry) -> String {
    format!(
        "You may call any of the following tools, one per line as JSON: {{\"tool\": \"<name>\", \"input\": \"...\"}}.\n\
Available tools:\n{}\n\
When you have a final answer, reply with a line starting with `FINAL_ANSWER:` (case-insensitive) followed by the answer.\n\n\
Task: {task_prompt}",
        tools.describe()
    )
}

/// `Run(task, toolset, maxRounds) -> ExecutorResult`.
pub async fn run(
    harness: &dyn Harness,
    workspace: &Path,
    task_prompt: &str,
    tools: &ToolRegistry,
    max_rounds: u32,
    round_timeout: Duration,
    cancel: CancellationToken,
) -> ExecutorResult {
    let mut transcript = build_system_preamble(task_prompt, tools);
    let mut tool_log = Vec::new();
    let mut round: u32 = 0;

    loop {
        let outcome: InvokeOutcome = invoker::invoke(harness, &transcript, workspace, round_timeout, cancel.clone()).await;
        if !outcome.success {
            return ExecutorResult {
                final_answer: None,
                rounds_used: round,
                tool_log,
                success: false,
                error: outcome.error,
            };
        }
        let reply = outcome.output;

        if let Some(answer) = extract_final_answer(&reply) {
            return ExecutorResult {
                final_answer: Some(answer),
                rounds_used: round + 1,
                tool_log,
                success: true,
                error: None,
            };
        }

        let calls = parse_tool_calls(&reply);
        if calls.is_empty() {
            if round + 1 >= max_rounds {
                return ExecutorResult {
                    final_answer: None,
                    rounds_used: round + 1,
                    tool_log,
                    success: false,
                    error: Some("no conclusion".to_string()),
                };
            }
            transcript.push_str("\n\nNo tool call and no FINAL_ANSWER detected. Please either call a tool or provide a final answer.");
        } else {
            transcript.push_str("\n\n");
            transcript.push_str(&reply);
            for call in calls {
                let handler = tools.get(&call.tool);
                let output = match handler {
                    Some(h) => h.call(&call.input, workspace).await,
                    None => format!("ERROR: unknown tool {}", call.tool),
                };
                transcript.push_str(&format!(
                    "\n\ntool_result[{}]: {output}",
                    call.tool
                ));
                tool_log.push(ToolCallRecord {
                    round: round + 1,
                    tool: call.tool,
                    input: call.input,
                    output,
                });
            }
        }

        round += 1;
        if round >= max_rounds {
            return ExecutorResult {
                final_answer: None,
                rounds_used: round,
                tool_log,
                success: false,
                error: Some("round limit".to_string()),
            };
        }
    }
}
