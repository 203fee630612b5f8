//! Heuristic code analysis for shared snippets.
//!
//! Pure and deterministic: line counts and pattern checks, no upstream
//! calls. Runs on the client — the relay never inspects snippet contents.

use serde::{Deserialize, Serialize};

/// Complexity is scored 0–5 from line count alone.
const MAX_COMPLEXITY: f32 = 5.0;
const LONG_SNIPPET_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAnalysis {
    pub suggestions: Vec<String>,
    pub complexity: f32,
    pub issues: Vec<String>,
    pub improvements: Vec<String>,
    pub explanation: String,
}

/// Analyze a code snippet with language-aware pattern heuristics.
pub fn analyze_code(code: &str, language: &str) -> CodeAnalysis {
    let lines = code.lines().count();
    let complexity = (lines as f32 / 10.0).min(MAX_COMPLEXITY);
    let language = language.to_ascii_lowercase();

    let mut issues = Vec::new();
    let mut improvements = Vec::new();

    if lines > LONG_SNIPPET_LINES {
        issues.push(
            "Code is quite long. Consider breaking it into smaller functions.".to_string(),
        );
    }

    match language.as_str() {
        "javascript" | "typescript" => {
            if code.contains(": any") || code.contains("<any>") {
                issues.push(
                    "Usage of \"any\" type detected. Consider using more specific types."
                        .to_string(),
                );
            }
            if code.contains("console.log") {
                issues.push(
                    "Debug logs found in code. Consider removing them before production."
                        .to_string(),
                );
            }
            if code.contains("setTimeout") || code.contains("setInterval") {
                improvements.push(
                    "Consider using async/await instead of callbacks for better readability."
                        .to_string(),
                );
            }
            if code.contains("var ") {
                improvements.push(
                    "Consider using \"let\" or \"const\" instead of \"var\" for better scoping."
                        .to_string(),
                );
            }
        }
        "rust" => {
            if code.contains("dbg!") || code.contains("println!") {
                issues.push(
                    "Debug output found in code. Consider removing it before production."
                        .to_string(),
                );
            }
            if code.contains(".unwrap()") || code.contains(".expect(") {
                improvements.push(
                    "Consider propagating errors with `?` instead of unwrapping.".to_string(),
                );
            }
        }
        "python" => {
            if code.contains("print(") {
                issues.push(
                    "Debug output found in code. Consider using a logger instead.".to_string(),
                );
            }
            if code.contains("except:") {
                improvements
                    .push("Bare `except:` swallows everything; catch specific exceptions.".to_string());
            }
        }
        _ => {}
    }

    let explanation = format!(
        "This code has a complexity score of {:.1}/5. {} {}",
        complexity,
        if issues.is_empty() {
            "The code looks generally well-structured."
        } else {
            "There are some issues that need attention."
        },
        if improvements.is_empty() {
            ""
        } else {
            "Consider implementing the suggested improvements."
        }
    )
    .trim_end()
    .to_string();

    CodeAnalysis {
        suggestions: vec![
            "Add error handling".to_string(),
            "Include input validation".to_string(),
            "Add documentation".to_string(),
        ],
        complexity,
        issues,
        improvements,
        explanation,
    }
}
