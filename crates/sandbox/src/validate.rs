//! Static checks run before any code reaches the interpreter.
//!
//! This is a denylist and therefore bypassable. The process-level isolation
//! in [`crate::executor`] is what bounds the damage; these checks only keep
//! obviously dangerous or non-terminating code from being started at all.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::SandboxConfig;

/// Modules whose import is refused (matched on the top-level package).
pub const DENIED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "importlib",
    "ctypes",
    "multiprocessing",
    "threading",
    "signal",
    "pickle",
    "marshal",
    "requests",
    "urllib",
    "http",
    "inspect",
    "builtins",
    "pty",
    "asyncio",
];

/// Builtins refused when called.
pub const DENIED_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "input",
    "breakpoint",
];

/// Attribute escapes refused anywhere in the source.
pub const DENIED_SUBSTRINGS: &[&str] = &["__builtins__", "__subclasses__", "__globals__", "__code__"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:^|;)\s*(?:from\s+([\w.]+)\s+import\b|import\s+([\w.,\s]+?)\s*(?:[#;].*)?$)")
            .expect("valid regex")
    })
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = DENIED_CALLS.join("|");
        Regex::new(&format!(r"(?:^|[^\w.])({})\s*\(", names)).expect("valid regex")
    })
}

fn while_true_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)while\s+(?:True|1|\(True\))\s*:(.*)$").expect("valid regex"))
}

fn endless_for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)for\s+.+\bin\s+.*(?:\bcount\s*\(|\biter\s*\(\s*int\s*,)(?:.*):(.*)$")
            .expect("valid regex")
    })
}

fn exit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:break|return)\b").expect("valid regex"))
}

/// Validate code against the length limit, the denylists and the
/// unbounded-loop heuristic. The first problem found is reported.
pub fn validate_code(code: &str, config: &SandboxConfig) -> Validation {
    if code.trim().is_empty() {
        return Validation::rejected("code is empty");
    }
    let length = code.chars().count();
    if length > config.max_code_length {
        return Validation::rejected(format!(
            "code is {} characters, limit is {}",
            length, config.max_code_length
        ));
    }

    if let Some(module) = denied_import(code) {
        return Validation::rejected(format!("import of '{}' is not allowed", module));
    }

    if let Some(caps) = call_re().captures(code) {
        return Validation::rejected(format!("call to '{}' is not allowed", &caps[1]));
    }

    if let Some(token) = DENIED_SUBSTRINGS
        .iter()
        .copied()
        .chain(config.extra_denylist.iter().map(String::as_str).filter(|e| !e.is_empty()))
        .find(|token| code.contains(token))
    {
        return Validation::rejected(format!("'{}' is not allowed", token));
    }

    if let Some(line) = unbounded_loop(code) {
        return Validation::rejected(format!("unbounded loop without break at line {}", line));
    }

    Validation::ok()
}

fn denied_import(code: &str) -> Option<String> {
    let denied = |name: &str| {
        let root = name.split('.').next().unwrap_or(name);
        DENIED_MODULES.contains(&root)
    };

    for caps in import_re().captures_iter(code) {
        if let Some(m) = caps.get(1) {
            if denied(m.as_str()) {
                return Some(m.as_str().to_string());
            }
        }
        if let Some(list) = caps.get(2) {
            // `import a, b as c`
            for item in list.as_str().split(',') {
                let name = item.split_whitespace().next().unwrap_or("");
                if !name.is_empty() && denied(name) {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

/// 1-based line of the first loop that never exits: `while True:` (or an
/// endless `for` over `itertools.count()` / `iter(int, 1)`) whose body has
/// no `break` or `return`.
fn unbounded_loop(code: &str) -> Option<usize> {
    let lines: Vec<&str> = code.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let caps = match while_true_re().captures(line) {
            Some(c) => c,
            None => match endless_for_re().captures(line) {
                Some(c) => c,
                None => continue,
            },
        };

        let indent = caps[1].len();
        let inline_body = caps.get(2).map_or("", |m| m.as_str());
        if exit_re().is_match(inline_body) {
            continue;
        }

        let has_exit = lines[idx + 1..]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .take_while(|l| indentation(l) > indent)
            .any(|l| exit_re().is_match(strip_comment(l)));
        if !has_exit {
            return Some(idx + 1);
        }
    }
    None
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> Validation {
        validate_code(code, &SandboxConfig::default())
    }

    #[test]
    fn test_accepts_plain_math() {
        let code = "import math\nfrom decimal import Decimal\nprint(round(math.sqrt(2) * 100, 2))\n";
        assert_eq!(check(code), Validation::ok());
    }

    #[test]
    fn test_rejects_denied_imports() {
        for code in [
            "import os\nprint(1)",
            "import math, subprocess",
            "from os.path import join",
            "import urllib.request",
            "  import socket as s",
            "x = 1; import os",
        ] {
            let v = check(code);
            assert!(!v.valid, "{code} should be rejected");
            assert!(v.reason.unwrap().contains("import"));
        }
    }

    #[test]
    fn test_rejects_denied_calls() {
        assert!(!check("x = eval('1+1')").valid);
        assert!(!check("exec (\"print(1)\")").valid);
        assert!(!check("f = open('/etc/passwd')").valid);
        assert!(!check("print(().__class__.__subclasses__())").valid);
        // Names that merely contain a denied word are fine
        assert!(check("def evaluate(x):\n    return x\nprint(evaluate(2))").valid);
        assert!(check("import decimal\nprint(decimal.Decimal('1').compare(2))").valid);
    }

    #[test]
    fn test_length_limit() {
        let config = SandboxConfig { max_code_length: 10, ..SandboxConfig::default() };
        let v = validate_code("print(12345678)", &config);
        assert!(!v.valid);
        assert!(v.reason.unwrap().contains("limit is 10"));
        assert!(!check("   ").valid);
    }

    #[test]
    fn test_unbounded_loops() {
        assert!(!check("while True:\n    x = 1\nprint(x)").valid);
        assert!(!check("while 1: pass").valid);
        assert!(!check("import itertools\nfor i in itertools.count(1):\n    print(i)").valid);
        assert!(!check("for _ in iter(int, 1):\n    pass").valid);

        assert!(check("while True:\n    x = input_value()\n    if x:\n        break").valid);
        assert!(check("def f():\n    while True:\n        return 1\nprint(f())").valid);
        assert!(check("i = 0\nwhile i < 10:\n    i += 1\nprint(i)").valid);
        // A break after the loop body does not count
        assert!(!check("while True:\n    x = 1\nbreak").valid);
    }

    #[test]
    fn test_extra_denylist() {
        let config = SandboxConfig {
            extra_denylist: vec!["numpy".into(), "lambda".into()],
            ..SandboxConfig::default()
        };
        assert!(!validate_code("import numpy as np", &config).valid);
        assert!(!validate_code("f = lambda x: x", &config).valid);
        assert!(validate_code("import math", &config).valid);
    }
}
